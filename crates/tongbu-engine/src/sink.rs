//! 音频输出设备接口与拉取回调.
//!
//! 设备按自己的节奏调用 [`AudioPuller::fill`] 取数据. 回调只做有界等待,
//! 取不到锁或没有数据时输出静音, 绝不阻塞设备线程.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tongbu_core::{ChannelLayout, PlayerError, PlayerResult, SampleFormat};

use crate::clock::wall_clock_us;
use crate::state::SharedState;

/// 回调中等待 `audio_lock` 的上限
pub const AUDIO_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// 音频设备参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 交错采样格式
    pub sample_format: SampleFormat,
    /// 每次回调的采样数 (每声道)
    pub samples: u32,
}

impl AudioSpec {
    /// 根据解码器输出参数协商设备参数
    ///
    /// 采样格式映射到设备支持的交错格式, 回调大小为 10ms.
    pub fn negotiate(
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> PlayerResult<Self> {
        let sink_format = sample_format
            .sink_format()
            .ok_or_else(|| PlayerError::UnsupportedSampleFormat(sample_format.to_string()))?;
        if sample_rate == 0 || channel_layout.channels == 0 {
            return Err(PlayerError::OutputDevice(format!(
                "无效的音频参数: {sample_rate}Hz, {} 声道",
                channel_layout.channels
            )));
        }
        Ok(Self {
            sample_rate,
            channels: channel_layout.channels,
            sample_format: sink_format,
            samples: (sample_rate / 100).max(1),
        })
    }

    /// 一个采样帧 (所有声道) 的字节数
    pub fn frame_bytes(&self) -> usize {
        (self.channels * self.sample_format.bytes_per_sample()) as usize
    }

    /// 一次回调的字节数
    pub fn callback_bytes(&self) -> usize {
        self.samples as usize * self.frame_bytes()
    }
}

/// 音频输出设备句柄
pub trait AudioDevice: Send {
    /// 暂停或恢复回调
    fn pause(&mut self, paused: bool);

    /// 关闭设备, 返回后不再调用回调
    fn close(&mut self);
}

/// 音频拉取回调
///
/// 由输出后端在设备线程上调用, 可以克隆给多个调用点.
#[derive(Clone)]
pub struct AudioPuller {
    shared: Arc<SharedState>,
    silence: u8,
}

impl AudioPuller {
    pub(crate) fn new(shared: Arc<SharedState>, sample_format: SampleFormat) -> Self {
        Self {
            shared,
            silence: sample_format.silence_byte(),
        }
    }

    /// 填满 `out`
    ///
    /// - 未播放: 静音
    /// - 10ms 内取不到锁: 整块静音
    /// - 缓冲区为空: 整块静音
    /// - 数据不足: 取出现有数据, 剩余部分补静音
    pub fn fill(&self, out: &mut [u8]) {
        let Some(audio) = self.shared.audio.as_ref() else {
            out.fill(self.silence);
            return;
        };
        if !self.shared.playing.load(Ordering::Acquire) {
            out.fill(self.silence);
            return;
        }

        let Some(mut buffer) = audio.try_lock_for(AUDIO_LOCK_TIMEOUT) else {
            self.shared.stats.add_lock_timeout();
            out.fill(self.silence);
            return;
        };
        let n = buffer.pull(out, wall_clock_us());
        drop(buffer);

        if n < out.len() {
            self.shared.stats.add_underrun();
            out[n..].fill(self.silence);
        }
        if n > 0 {
            self.shared.decode_wakeup.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_buffer::AudioRingBuffer;

    fn puller_with(buffer: AudioRingBuffer) -> (AudioPuller, Arc<SharedState>) {
        let format = buffer.sample_format();
        let shared = Arc::new(SharedState::new(Some(buffer), None));
        shared.playing.store(true, Ordering::Release);
        (AudioPuller::new(Arc::clone(&shared), format), shared)
    }

    #[test]
    fn test_negotiate_格式映射() {
        let spec = AudioSpec::negotiate(44100, SampleFormat::F32p, ChannelLayout::STEREO).unwrap();
        assert_eq!(spec.sample_format, SampleFormat::F32);
        assert_eq!(spec.samples, 441);
        assert_eq!(spec.frame_bytes(), 8);
        assert!(matches!(
            AudioSpec::negotiate(44100, SampleFormat::None, ChannelLayout::STEREO),
            Err(PlayerError::UnsupportedSampleFormat(_))
        ));
    }

    #[test]
    fn test_fill_空缓冲区输出静音() {
        let (puller, shared) = puller_with(AudioRingBuffer::new(8000, 1, SampleFormat::U8));
        let mut out = [0u8; 32];
        puller.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0x80));
        assert_eq!(shared.stats.snapshot().underruns, 1);
    }

    #[test]
    fn test_fill_数据不足补静音() {
        let mut buf = AudioRingBuffer::new(8000, 1, SampleFormat::S16);
        buf.push(&[1, 1, 2, 2]).unwrap();
        let (puller, shared) = puller_with(buf);
        let mut out = [9u8; 8];
        puller.fill(&mut out);
        assert_eq!(out, [1, 1, 2, 2, 0, 0, 0, 0]);
        let audio = shared.audio.as_ref().unwrap().lock();
        assert_eq!(audio.pts(), audio.end_pts());
        assert!(audio.pts_updated_at().is_some());
    }

    #[test]
    fn test_fill_锁被占用时超时静音() {
        let mut buf = AudioRingBuffer::new(8000, 1, SampleFormat::S16);
        buf.push(&[1u8; 64]).unwrap();
        let (puller, shared) = puller_with(buf);
        let guard = shared.audio.as_ref().unwrap().lock();
        let mut out = [7u8; 16];
        let start = std::time::Instant::now();
        std::thread::scope(|s| {
            s.spawn(|| puller.fill(&mut out));
        });
        assert!(start.elapsed() < Duration::from_millis(500));
        drop(guard);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(shared.stats.snapshot().lock_timeouts, 1);
        assert_eq!(shared.audio.as_ref().unwrap().lock().len(), 64);
    }

    #[test]
    fn test_fill_未播放输出静音() {
        let mut buf = AudioRingBuffer::new(8000, 1, SampleFormat::S16);
        buf.push(&[1u8; 8]).unwrap();
        let (puller, shared) = puller_with(buf);
        shared.playing.store(false, Ordering::Release);
        let mut out = [7u8; 8];
        puller.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(shared.audio.as_ref().unwrap().lock().len(), 8);
    }
}
