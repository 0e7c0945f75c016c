//! 解码音频到环形缓冲区的桥接.
//!
//! 重采样在锁外完成, 只有追加字节时持有 `audio_lock`.

use log::trace;
use parking_lot::Mutex;
use tongbu_core::{PlayerError, PlayerResult, Rational, Rounding, rescale_rnd};
use tongbu_resample::ResampleContext;

use crate::audio_buffer::AudioRingBuffer;
use crate::frame::AudioFrame;
use crate::sink::AudioSpec;

/// 重采样器接口
pub trait Resampler: Send {
    /// 把一帧音频转换为输出格式的交错字节, 最多 `max_out` 个采样
    fn convert(
        &mut self,
        planes: &[&[u8]],
        nb_samples: u32,
        max_out: u32,
    ) -> PlayerResult<(Vec<u8>, u32)>;
}

impl Resampler for ResampleContext {
    fn convert(
        &mut self,
        planes: &[&[u8]],
        nb_samples: u32,
        max_out: u32,
    ) -> PlayerResult<(Vec<u8>, u32)> {
        ResampleContext::convert(self, planes, nb_samples, max_out)
    }
}

/// 音频桥接器
pub struct AudioBridge {
    resampler: Box<dyn Resampler>,
    src_sample_rate: u32,
    sink: AudioSpec,
}

impl AudioBridge {
    /// 使用给定的重采样器创建
    pub fn new(resampler: Box<dyn Resampler>, src_sample_rate: u32, sink: AudioSpec) -> Self {
        Self {
            resampler,
            src_sample_rate,
            sink,
        }
    }

    /// 输出参数
    pub fn sink(&self) -> &AudioSpec {
        &self.sink
    }

    /// 按输出采样率计算一帧转换后的目标采样数 (向上取整)
    pub fn target_samples(&self, nb_samples: u32) -> u32 {
        let n = rescale_rnd(
            i64::from(nb_samples),
            Rational::per_sample(self.src_sample_rate),
            Rational::per_sample(self.sink.sample_rate),
            Rounding::Up,
        );
        n.clamp(0, i64::from(u32::MAX)) as u32
    }

    /// 转换一帧并追加到缓冲区
    ///
    /// 返回是否写入了数据. 失败只影响这一帧, 缓冲区保持不变.
    pub fn push(&mut self, frame: &AudioFrame, ring: &Mutex<AudioRingBuffer>) -> PlayerResult<bool> {
        if frame.nb_samples == 0 {
            return Ok(false);
        }
        let target = self.target_samples(frame.nb_samples);
        let planes = frame.planes();
        let (bytes, converted) = self.resampler.convert(&planes, frame.nb_samples, target)?;
        if converted == 0 {
            return Ok(false);
        }
        let expected = converted as usize * self.sink.frame_bytes();
        if bytes.len() != expected {
            return Err(PlayerError::Resample(format!(
                "重采样输出长度不符: 期望 {expected} 字节, 实际 {} 字节",
                bytes.len()
            )));
        }

        let mut buffer = ring.lock();
        buffer.push(&bytes)?;
        trace!(
            "音频写入 {converted} 采样, 缓冲 {}us",
            buffer.buffered_us()
        );
        Ok(true)
    }
}
