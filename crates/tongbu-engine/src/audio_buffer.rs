//! 音频环形缓冲区.
//!
//! 存放已转换为输出设备格式的交错 PCM 字节. 解码线程在尾部追加, 音频回调从头部取走.
//! 头尾时间戳由写入/消费的采样计数换算得到, 不做逐次累加, 因此
//! `end_pts - pts` 始终等于缓冲采样数对应的时长 (误差不超过 1 微秒).

use std::collections::VecDeque;

use tongbu_core::{
    NOPTS_VALUE, PlayerError, PlayerResult, Rational, SampleFormat, TIME_BASE, rescale,
};

/// 音频环形缓冲区
///
/// 所有方法都要求调用方持有 `audio_lock`.
#[derive(Debug)]
pub struct AudioRingBuffer {
    data: VecDeque<u8>,
    sample_rate: u32,
    channels: u32,
    sample_format: SampleFormat,
    /// 一个采样帧 (所有声道) 的字节数
    frame_bytes: usize,
    /// 时钟基准 (微秒), 对应采样计数 0
    base_pts: i64,
    written: i64,
    consumed: i64,
    /// 第一帧音频的绝对时间戳 (微秒)
    first_pts: i64,
    /// 上次消费时的墙钟时间 (微秒)
    pts_updated_at: Option<i64>,
    /// 上次消费的时长 (微秒)
    last_pull_us: i64,
}

impl AudioRingBuffer {
    /// 创建空缓冲区
    pub fn new(sample_rate: u32, channels: u32, sample_format: SampleFormat) -> Self {
        Self {
            data: VecDeque::new(),
            sample_rate,
            channels,
            sample_format,
            frame_bytes: (channels * sample_format.bytes_per_sample()) as usize,
            base_pts: 0,
            written: 0,
            consumed: 0,
            first_pts: NOPTS_VALUE,
            pts_updated_at: None,
            last_pull_us: 0,
        }
    }

    /// 按设备实际参数重新配置, 丢弃已有数据
    pub fn reconfigure(&mut self, sample_rate: u32, channels: u32, sample_format: SampleFormat) {
        *self = Self {
            first_pts: self.first_pts,
            ..Self::new(sample_rate, channels, sample_format)
        };
    }

    /// 采样率
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// 声道数
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// 采样格式 (交错)
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// 一个采样帧的字节数
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    fn samples_to_us(&self, samples: i64) -> i64 {
        rescale(samples, Rational::per_sample(self.sample_rate), TIME_BASE)
    }

    /// 头部 (下一个要播放的采样) 的流时间 (微秒)
    pub fn pts(&self) -> i64 {
        self.base_pts + self.samples_to_us(self.consumed)
    }

    /// 尾部 (最后写入采样之后) 的流时间 (微秒)
    pub fn end_pts(&self) -> i64 {
        self.base_pts + self.samples_to_us(self.written)
    }

    /// 缓冲的采样数 (每声道)
    pub fn buffered_samples(&self) -> usize {
        if self.frame_bytes == 0 {
            return 0;
        }
        self.data.len() / self.frame_bytes
    }

    /// 缓冲的时长 (微秒)
    pub fn buffered_us(&self) -> i64 {
        self.end_pts() - self.pts()
    }

    /// 缓冲的字节数
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 第一帧音频的绝对时间戳, 未设置时为 `NOPTS_VALUE`
    pub fn first_pts(&self) -> i64 {
        self.first_pts
    }

    /// 记录第一帧音频的绝对时间戳
    pub fn set_first_pts(&mut self, first_pts: i64) {
        self.first_pts = first_pts;
    }

    /// 上次消费时的墙钟时间
    pub fn pts_updated_at(&self) -> Option<i64> {
        self.pts_updated_at
    }

    /// 上次消费的时长 (微秒), 主时钟外推不超过它
    pub fn last_pull_us(&self) -> i64 {
        self.last_pull_us
    }

    /// 重设时钟, 使下一个写入的采样的流时间为 `pts`
    ///
    /// 已缓冲的数据保持在新时间轴上 `pts` 之前.
    pub fn rebase(&mut self, pts: i64) {
        self.base_pts = pts;
        self.written = 0;
        self.consumed = -(self.buffered_samples() as i64);
    }

    /// 在尾部追加交错 PCM, 返回追加的采样数
    ///
    /// 字节数必须是采样帧大小的整数倍.
    pub fn push(&mut self, bytes: &[u8]) -> PlayerResult<usize> {
        if self.frame_bytes == 0 || bytes.len() % self.frame_bytes != 0 {
            return Err(PlayerError::Resample(format!(
                "写入字节数 {} 不是采样帧大小 {} 的整数倍",
                bytes.len(),
                self.frame_bytes
            )));
        }
        self.data
            .try_reserve(bytes.len())
            .map_err(|e| PlayerError::OutOfMemory(format!("音频缓冲区扩容失败: {e}")))?;
        self.data.extend(bytes);
        let samples = bytes.len() / self.frame_bytes;
        self.written += samples as i64;
        Ok(samples)
    }

    /// 从头部取出最多 `out.len()` 字节 (按采样帧对齐), 返回实际字节数
    ///
    /// 取到数据时记录 `now_us` 作为时钟外推起点.
    pub fn pull(&mut self, out: &mut [u8], now_us: i64) -> usize {
        if self.frame_bytes == 0 {
            return 0;
        }
        let want = out.len() / self.frame_bytes * self.frame_bytes;
        let n = want.min(self.data.len());
        if n == 0 {
            return 0;
        }
        for (dst, src) in out[..n].iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        let samples = (n / self.frame_bytes) as i64;
        self.consumed += samples;
        self.pts_updated_at = Some(now_us);
        self.last_pull_us = self.samples_to_us(samples);
        n
    }

    /// 清空数据, 时钟停在当前头部位置
    pub fn clear(&mut self) {
        let pts = self.pts();
        self.data.clear();
        self.base_pts = pts;
        self.written = 0;
        self.consumed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_s16(rate: u32) -> AudioRingBuffer {
        AudioRingBuffer::new(rate, 2, SampleFormat::S16)
    }

    #[test]
    fn test_push_pull_时间戳() {
        let mut buf = stereo_s16(48000);
        buf.rebase(0);
        assert_eq!(buf.push(&[0u8; 4 * 4800]).unwrap(), 4800);
        assert_eq!(buf.pts(), 0);
        assert_eq!(buf.end_pts(), 100_000);

        let mut out = vec![0u8; 4 * 480];
        assert_eq!(buf.pull(&mut out, 7), 4 * 480);
        assert_eq!(buf.pts(), 10_000);
        assert_eq!(buf.pts_updated_at(), Some(7));
        assert_eq!(buf.last_pull_us(), 10_000);
        assert!(buf.pts() <= buf.end_pts());
        assert_eq!(buf.buffered_us(), 90_000);
    }

    #[test]
    fn test_空取不改变上次消费记录() {
        let mut buf = stereo_s16(1000);
        buf.push(&[0u8; 4 * 10]).unwrap();
        let mut out = [0u8; 4 * 20];
        assert_eq!(buf.pull(&mut out, 100), 4 * 10);
        assert_eq!(buf.last_pull_us(), 10_000);
        assert_eq!(buf.pull(&mut out, 250_000), 0);
        assert_eq!(buf.pts_updated_at(), Some(100));
        assert_eq!(buf.last_pull_us(), 10_000);
    }

    #[test]
    fn test_时长不累积舍入误差() {
        // 44100Hz 下单个采样 = 22.675us, 逐个消费也不能漂移
        let mut buf = AudioRingBuffer::new(44100, 1, SampleFormat::S16);
        buf.push(&vec![0u8; 2 * 44100]).unwrap();
        let mut out = [0u8; 2];
        for _ in 0..44100 {
            buf.pull(&mut out, 0);
        }
        assert_eq!(buf.pts(), 1_000_000);
        assert_eq!(buf.pts(), buf.end_pts());
    }

    #[test]
    fn test_fifo_顺序() {
        let mut buf = AudioRingBuffer::new(8000, 1, SampleFormat::U8);
        buf.push(&[1, 2, 3]).unwrap();
        buf.push(&[4, 5]).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(buf.pull(&mut out, 0), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        let mut out = [0u8; 4];
        assert_eq!(buf.pull(&mut out, 0), 1);
        assert_eq!(out[0], 5);
    }

    #[test]
    fn test_空缓冲区_pull() {
        let mut buf = stereo_s16(48000);
        let mut out = [0xAAu8; 16];
        assert_eq!(buf.pull(&mut out, 0), 0);
        assert_eq!(buf.pts_updated_at(), None);
        assert_eq!(buf.pts(), buf.end_pts());
    }

    #[test]
    fn test_pull_按采样帧对齐() {
        let mut buf = stereo_s16(48000);
        buf.push(&[0u8; 8]).unwrap();
        let mut out = [0u8; 6];
        assert_eq!(buf.pull(&mut out, 0), 4);
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_push_非整帧() {
        let mut buf = stereo_s16(48000);
        assert!(buf.push(&[0u8; 3]).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_rebase_保留缓冲数据() {
        let mut buf = stereo_s16(1000);
        buf.push(&[0u8; 4 * 10]).unwrap();
        buf.rebase(500_000);
        assert_eq!(buf.end_pts(), 500_000);
        assert_eq!(buf.pts(), 490_000);
        buf.push(&[0u8; 4 * 10]).unwrap();
        assert_eq!(buf.end_pts(), 510_000);
    }

    #[test]
    fn test_clear_保持时钟() {
        let mut buf = stereo_s16(1000);
        buf.push(&[0u8; 4 * 10]).unwrap();
        let mut out = [0u8; 8];
        buf.pull(&mut out, 0);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.pts(), 2_000);
        assert_eq!(buf.end_pts(), 2_000);
    }
}
