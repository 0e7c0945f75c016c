//! 解码后的帧数据.

use tongbu_core::{ChannelLayout, NOPTS_VALUE, PixelFormat, Rational, SampleFormat, Timestamp};

/// 视频帧
///
/// 多平面存储, 例如 YUV420P 有 Y, U, V 三个平面.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数
    pub linesize: Vec<usize>,
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素格式
    pub pixel_format: PixelFormat,
    /// 显示时间戳
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
}

impl VideoFrame {
    /// 创建按像素格式分配好平面的视频帧
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count() as usize;
        let mut data = Vec::with_capacity(plane_count);
        let mut linesize = Vec::with_capacity(plane_count);
        for plane in 0..plane_count {
            let (line, rows) = pixel_format
                .plane_size(plane, width, height)
                .unwrap_or((0, 0));
            data.push(vec![0u8; line * rows]);
            linesize.push(line);
        }
        Self {
            data,
            linesize,
            width,
            height,
            pixel_format,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
        }
    }

    /// 时间戳 (带时间基)
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.pts, self.time_base)
    }
}

/// 音频帧
///
/// 平面格式: data 中每个 Vec 对应一个声道.
/// 交错格式: data 中只有一个 Vec, 所有声道交替排列.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 音频采样数据
    pub data: Vec<Vec<u8>>,
    /// 本帧包含的采样数 (每声道)
    pub nb_samples: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 采样格式
    pub sample_format: SampleFormat,
    /// 声道布局
    pub channel_layout: ChannelLayout,
    /// 显示时间戳
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
}

impl AudioFrame {
    /// 创建已分配好采样空间 (静音) 的音频帧
    pub fn new(
        nb_samples: u32,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> Self {
        let bps = sample_format.bytes_per_sample() as usize;
        let channels = channel_layout.channels as usize;
        let (plane_count, plane_bytes) = if sample_format.is_planar() {
            (channels, nb_samples as usize * bps)
        } else {
            (1, nb_samples as usize * bps * channels)
        };
        let silence = sample_format.silence_byte();
        Self {
            data: vec![vec![silence; plane_bytes]; plane_count],
            nb_samples,
            sample_rate,
            sample_format,
            channel_layout,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
        }
    }

    /// 时间戳 (带时间基)
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.pts, self.time_base)
    }

    /// 各平面的只读切片
    pub fn planes(&self) -> Vec<&[u8]> {
        self.data.iter().map(Vec::as_slice).collect()
    }
}

/// 帧 (视频帧或音频帧的统一包装)
#[derive(Debug, Clone)]
pub enum Frame {
    /// 视频帧
    Video(VideoFrame),
    /// 音频帧
    Audio(AudioFrame),
}
