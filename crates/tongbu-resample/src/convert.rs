//! 采样格式和声道布局转换.
//!
//! 所有转换都经过归一化的 f64 中间表示 (-1.0 ~ 1.0), 统一为交错排列.

use tongbu_core::{PlayerError, PlayerResult, SampleFormat};

/// 将原始采样数据解码为交错排列的 f64 样本
///
/// # 参数
/// - `planes`: 平面格式每声道一个切片, 交错格式只有一个切片
/// - `format`: 源采样格式
/// - `nb_samples`: 每声道采样数
/// - `channels`: 声道数
pub fn decode_to_f64(
    planes: &[&[u8]],
    format: SampleFormat,
    nb_samples: usize,
    channels: usize,
) -> PlayerResult<Vec<f64>> {
    let bps = format.bytes_per_sample() as usize;
    if bps == 0 || channels == 0 {
        return Err(PlayerError::Resample(format!(
            "无效的采样参数: {format}, {channels} 声道"
        )));
    }

    let mut output = Vec::with_capacity(nb_samples * channels);
    if format.is_planar() {
        if planes.len() < channels {
            return Err(PlayerError::Resample(format!(
                "平面数量不足: 期望 {channels}, 实际 {}",
                planes.len()
            )));
        }
        let expected = nb_samples * bps;
        if let Some(short) = planes[..channels].iter().find(|p| p.len() < expected) {
            return Err(PlayerError::Resample(format!(
                "数据不足: 期望 {expected} 字节, 实际 {} 字节",
                short.len()
            )));
        }
        for s in 0..nb_samples {
            let offset = s * bps;
            for plane in &planes[..channels] {
                output.push(decode_sample(&plane[offset..offset + bps], format)?);
            }
        }
    } else {
        let data = planes
            .first()
            .ok_or_else(|| PlayerError::Resample("缺少采样数据".into()))?;
        let expected = nb_samples * channels * bps;
        if data.len() < expected {
            return Err(PlayerError::Resample(format!(
                "数据不足: 期望 {expected} 字节, 实际 {} 字节",
                data.len()
            )));
        }
        for chunk in data[..expected].chunks_exact(bps) {
            output.push(decode_sample(chunk, format)?);
        }
    }
    Ok(output)
}

/// 将交错排列的 f64 样本编码为指定的交错格式
pub fn encode_from_f64(samples: &[f64], format: SampleFormat) -> PlayerResult<Vec<u8>> {
    let bps = format.bytes_per_sample() as usize;
    let mut output = Vec::with_capacity(samples.len() * bps);
    for &s in samples {
        encode_sample(s, format, &mut output)?;
    }
    Ok(output)
}

/// 声道混合
///
/// 支持的转换:
/// - 单声道 → 多声道: 复制到所有声道
/// - 多声道 → 单声道: 取平均
/// - N 声道 → M 声道: 对应声道直接映射, 多余声道填零
pub fn mix_channels(
    samples: &[f64],
    nb_samples: usize,
    src_channels: usize,
    dst_channels: usize,
) -> Vec<f64> {
    if src_channels == dst_channels {
        return samples.to_vec();
    }

    let mut output = Vec::with_capacity(nb_samples * dst_channels);
    for frame in samples.chunks_exact(src_channels).take(nb_samples) {
        for dst_ch in 0..dst_channels {
            let val = if src_channels == 1 {
                frame[0]
            } else if dst_channels == 1 {
                frame.iter().sum::<f64>() / src_channels as f64
            } else if dst_ch < src_channels {
                frame[dst_ch]
            } else {
                0.0
            };
            output.push(val);
        }
    }
    output
}

/// 将原始字节解码为归一化 f64 样本
fn decode_sample(data: &[u8], format: SampleFormat) -> PlayerResult<f64> {
    let sample = match format.to_interleaved() {
        SampleFormat::U8 => (f64::from(data[0]) - 128.0) / 128.0,
        SampleFormat::S16 => f64::from(i16::from_le_bytes([data[0], data[1]])) / 32768.0,
        SampleFormat::S32 => {
            let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            f64::from(v) / 2_147_483_648.0
        }
        SampleFormat::S64 => {
            let v = i64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]);
            v as f64 / 9_223_372_036_854_775_808.0
        }
        SampleFormat::F32 => f64::from(f32::from_le_bytes([data[0], data[1], data[2], data[3]])),
        SampleFormat::F64 => f64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]),
        _ => {
            return Err(PlayerError::UnsupportedSampleFormat(format.to_string()));
        }
    };
    Ok(sample)
}

/// 将归一化 f64 样本编码为原始字节
fn encode_sample(value: f64, format: SampleFormat, output: &mut Vec<u8>) -> PlayerResult<()> {
    match format.to_interleaved() {
        SampleFormat::U8 => {
            let v = ((value * 128.0) + 128.0).round().clamp(0.0, 255.0) as u8;
            output.push(v);
        }
        SampleFormat::S16 => {
            let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 => {
            let v = (value * 2_147_483_648.0)
                .round()
                .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S64 => {
            let v = (value * 9_223_372_036_854_775_808.0).round() as i64;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => {
            output.extend_from_slice(&(value as f32).to_le_bytes());
        }
        SampleFormat::F64 => {
            output.extend_from_slice(&value.to_le_bytes());
        }
        _ => {
            return Err(PlayerError::UnsupportedSampleFormat(format.to_string()));
        }
    }
    Ok(())
}
