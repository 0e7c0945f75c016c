//! # tongbu-resample
//!
//! Tongbu 同步播放引擎音频重采样库.
//!
//! 把解码器输出的音频帧转换为输出设备格式:
//! - 采样格式转换 (如 F32 平面 -> F32 交错)
//! - 声道布局转换 (如立体声 -> 单声道)
//! - 采样率转换 (如 44100Hz -> 48000Hz, 线性插值)
//!
//! 上下文在连续的帧之间保留插值相位和上一帧的末尾采样, 因此帧与帧之间没有接缝.

mod convert;

use log::trace;
use tongbu_core::{ChannelLayout, PlayerError, PlayerResult, SampleFormat};

pub use convert::{decode_to_f64, encode_from_f64, mix_channels};

/// 重采样上下文
///
/// 配置一次后对同一条音频流连续调用 [`ResampleContext::convert`].
pub struct ResampleContext {
    /// 源采样率
    pub src_sample_rate: u32,
    /// 源采样格式
    pub src_sample_format: SampleFormat,
    /// 源声道布局
    pub src_channel_layout: ChannelLayout,
    /// 目标采样率
    pub dst_sample_rate: u32,
    /// 目标采样格式 (必须为交错格式)
    pub dst_sample_format: SampleFormat,
    /// 目标声道布局
    pub dst_channel_layout: ChannelLayout,
    /// 上一次输入的最后一个采样 (每声道, 已混合到目标声道数)
    carry: Option<Vec<f64>>,
    /// 下一个输出采样在当前输入块中的位置, -1 表示 `carry`
    phase: f64,
}

impl ResampleContext {
    /// 创建新的重采样上下文
    pub fn new(
        src_sample_rate: u32,
        src_sample_format: SampleFormat,
        src_channel_layout: ChannelLayout,
        dst_sample_rate: u32,
        dst_sample_format: SampleFormat,
        dst_channel_layout: ChannelLayout,
    ) -> PlayerResult<Self> {
        if src_sample_rate == 0 || dst_sample_rate == 0 {
            return Err(PlayerError::Resample("采样率不能为 0".into()));
        }
        if dst_sample_format.is_planar() || dst_sample_format.bytes_per_sample() == 0 {
            return Err(PlayerError::UnsupportedSampleFormat(
                dst_sample_format.to_string(),
            ));
        }
        if src_channel_layout.channels == 0 || dst_channel_layout.channels == 0 {
            return Err(PlayerError::Resample("声道数不能为 0".into()));
        }
        Ok(Self {
            src_sample_rate,
            src_sample_format,
            src_channel_layout,
            dst_sample_rate,
            dst_sample_format,
            dst_channel_layout,
            carry: None,
            phase: 0.0,
        })
    }

    /// 是否需要转换 (源和目标参数不同)
    pub fn is_needed(&self) -> bool {
        self.src_sample_rate != self.dst_sample_rate
            || self.src_sample_format != self.dst_sample_format
            || self.src_channel_layout.channels != self.dst_channel_layout.channels
    }

    /// 执行转换
    ///
    /// 按以下顺序处理:
    /// 1. 解码为 f64 并交错
    /// 2. 声道布局转换
    /// 3. 采样率转换 (跨调用保持相位)
    /// 4. 编码为目标格式
    ///
    /// # 参数
    /// - `planes`: 平面格式每声道一个切片, 交错格式一个切片
    /// - `nb_samples`: 输入每声道采样数
    /// - `max_out`: 输出每声道采样数上限, 超出部分丢弃
    ///
    /// # 返回
    /// 交错格式字节数据和输出每声道采样数
    pub fn convert(
        &mut self,
        planes: &[&[u8]],
        nb_samples: u32,
        max_out: u32,
    ) -> PlayerResult<(Vec<u8>, u32)> {
        let nb = nb_samples as usize;
        let max_out = max_out as usize;
        let src_channels = self.src_channel_layout.channels as usize;
        let dst_channels = self.dst_channel_layout.channels as usize;
        if nb == 0 || max_out == 0 {
            return Ok((Vec::new(), 0));
        }

        // 快速路径: 仅需复制
        if !self.is_needed() && !self.src_sample_format.is_planar() {
            let bytes = nb.min(max_out) * dst_channels * self.dst_sample_format.bytes_per_sample() as usize;
            let data = planes
                .first()
                .ok_or_else(|| PlayerError::Resample("缺少采样数据".into()))?;
            if data.len() < bytes {
                return Err(PlayerError::Resample(format!(
                    "数据不足: 期望 {bytes} 字节, 实际 {} 字节",
                    data.len()
                )));
            }
            return Ok((data[..bytes].to_vec(), nb.min(max_out) as u32));
        }

        let samples = decode_to_f64(planes, self.src_sample_format, nb, src_channels)?;
        let mixed = mix_channels(&samples, nb, src_channels, dst_channels);

        let (output, out_nb) = if self.src_sample_rate != self.dst_sample_rate {
            self.resample_linear(&mixed, nb, dst_channels, max_out)
        } else {
            let out_nb = nb.min(max_out);
            (mixed[..out_nb * dst_channels].to_vec(), out_nb)
        };

        trace!(
            "重采样: 输入 {nb} 采样 @ {}Hz -> 输出 {out_nb} 采样 @ {}Hz",
            self.src_sample_rate, self.dst_sample_rate
        );

        let bytes = encode_from_f64(&output, self.dst_sample_format)?;
        Ok((bytes, out_nb as u32))
    }

    /// 清除插值状态 (用于不连续的输入)
    pub fn reset(&mut self) {
        self.carry = None;
        self.phase = 0.0;
    }

    /// 线性插值重采样, 输入块之间通过 `carry` 衔接
    fn resample_linear(
        &mut self,
        samples: &[f64],
        nb_samples: usize,
        channels: usize,
        max_out: usize,
    ) -> (Vec<f64>, usize) {
        let ratio = f64::from(self.src_sample_rate) / f64::from(self.dst_sample_rate);
        let mut output = Vec::with_capacity(max_out * channels);
        let mut produced = 0;

        let at = |idx: isize, ch: usize, carry: &Option<Vec<f64>>| -> f64 {
            if idx < 0 {
                carry
                    .as_ref()
                    .map_or(samples[ch], |prev| prev[ch])
            } else {
                samples[idx as usize * channels + ch]
            }
        };

        while produced < max_out {
            let pos = self.phase;
            let idx0 = pos.floor() as isize;
            let idx1 = idx0 + 1;
            let frac = pos - idx0 as f64;
            if frac == 0.0 && idx0 >= 0 && (idx0 as usize) < nb_samples {
                // 恰好落在输入采样上
                for ch in 0..channels {
                    output.push(at(idx0, ch, &self.carry));
                }
            } else if (idx1 as usize) < nb_samples {
                for ch in 0..channels {
                    let s0 = at(idx0, ch, &self.carry);
                    let s1 = at(idx1, ch, &self.carry);
                    output.push(s0 + (s1 - s0) * frac);
                }
            } else {
                break;
            }
            produced += 1;
            self.phase += ratio;
        }

        // 相位转换到下一块的坐标系, 输出上限导致的积压直接丢弃
        self.phase = (self.phase - nb_samples as f64).max(-1.0);
        let last = (nb_samples - 1) * channels;
        self.carry = Some(samples[last..last + channels].to_vec());
        (output, produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn read_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_无需转换() {
        let mut ctx = ResampleContext::new(
            44100,
            SampleFormat::S16,
            ChannelLayout::STEREO,
            44100,
            SampleFormat::S16,
            ChannelLayout::STEREO,
        )
        .unwrap();
        assert!(!ctx.is_needed());
        let input = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let (out, nb) = ctx.convert(&[&input], 2, 16).unwrap();
        assert_eq!(out, input);
        assert_eq!(nb, 2);
    }

    #[test]
    fn test_平面转交错() {
        let mut ctx = ResampleContext::new(
            48000,
            SampleFormat::F32p,
            ChannelLayout::STEREO,
            48000,
            SampleFormat::F32,
            ChannelLayout::STEREO,
        )
        .unwrap();
        let left = f32_bytes(&[0.5, 0.25]);
        let right = f32_bytes(&[-0.5, -0.25]);
        let (out, nb) = ctx.convert(&[&left, &right], 2, 2).unwrap();
        assert_eq!(nb, 2);
        assert_eq!(read_f32(&out), vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn test_输出上限截断() {
        let mut ctx = ResampleContext::new(
            48000,
            SampleFormat::S16,
            ChannelLayout::MONO,
            48000,
            SampleFormat::F32,
            ChannelLayout::MONO,
        )
        .unwrap();
        let input = vec![0u8; 20];
        let (out, nb) = ctx.convert(&[&input], 10, 4).unwrap();
        assert_eq!(nb, 4);
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_上采样_总数与比例一致() {
        let mut ctx = ResampleContext::new(
            24000,
            SampleFormat::F32,
            ChannelLayout::MONO,
            48000,
            SampleFormat::F32,
            ChannelLayout::MONO,
        )
        .unwrap();
        let mut total = 0;
        for _ in 0..10 {
            let input = f32_bytes(&[0.1; 100]);
            let (_, nb) = ctx.convert(&[&input], 100, 201).unwrap();
            total += nb;
        }
        // 1000 个输入采样 -> 约 2000 个输出采样, 帧间不丢不重
        assert!((1998..=2000).contains(&total), "total={total}");
    }

    #[test]
    fn test_下采样_帧间连续() {
        let mut ctx = ResampleContext::new(
            48000,
            SampleFormat::F32,
            ChannelLayout::MONO,
            32000,
            SampleFormat::F32,
            ChannelLayout::MONO,
        )
        .unwrap();
        // 线性斜坡在插值后仍是线性斜坡
        let ramp: Vec<f32> = (0..96).map(|i| i as f32 / 96.0).collect();
        let (a, na) = ctx.convert(&[&f32_bytes(&ramp[..48])], 48, 64).unwrap();
        let (b, nb) = ctx.convert(&[&f32_bytes(&ramp[48..])], 48, 64).unwrap();
        let mut out = read_f32(&a);
        out.extend(read_f32(&b));
        assert_eq!((na + nb) as usize, out.len());
        assert!(out.len() >= 63);
        let step = 1.5 / 96.0;
        for pair in out.windows(2) {
            assert!(((pair[1] - pair[0]) - step).abs() < 1e-4, "{pair:?}");
        }
    }

    #[test]
    fn test_无效参数() {
        let err = ResampleContext::new(
            0,
            SampleFormat::S16,
            ChannelLayout::MONO,
            48000,
            SampleFormat::S16,
            ChannelLayout::MONO,
        );
        assert!(err.is_err());
        let err = ResampleContext::new(
            48000,
            SampleFormat::S16,
            ChannelLayout::MONO,
            48000,
            SampleFormat::S16p,
            ChannelLayout::MONO,
        );
        assert!(matches!(err, Err(PlayerError::UnsupportedSampleFormat(_))));
    }
}
