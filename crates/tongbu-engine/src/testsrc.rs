//! 合成测试源.
//!
//! 标识格式: `testsrc` 或 `testsrc?key=value&...`, 支持的参数:
//!
//! | 参数 | 含义 | 默认 |
//! |------|------|------|
//! | `duration` | 时长 (秒) | 5 |
//! | `fps` | 帧率, 整数或 `num/den` | 25 |
//! | `rate` | 采样率 | 48000 |
//! | `channels` | 声道数 | 2 |
//! | `format` | 解码输出采样格式 | fltp |
//! | `width` / `height` | 画面尺寸 | 320 / 240 |
//! | `audio` / `video` | 是否包含该流 (0/1) | 1 |
//! | `video_delay` | 视频相对音频的起始延迟 (毫秒) | 0 |
//! | `freq` | 正弦波频率 (Hz) | 440 |
//!
//! 音频是正弦波, 视频是 YUV420P 的移动竖条, 时间戳精确无抖动.

use std::collections::VecDeque;
use std::f64::consts::PI;

use log::debug;
use tongbu_core::{
    ChannelLayout, MediaType, PixelFormat, PlayerError, PlayerResult, Rational, SampleFormat,
    rescale,
};
use tongbu_resample::encode_from_f64;

use crate::frame::{AudioFrame, Frame, VideoFrame};
use crate::source::{DecodeStatus, FrameSource, Packet, SourceOpener, StreamInfo, StreamParams};

/// 每个音频包的采样数
pub const AUDIO_PACKET_SAMPLES: u32 = 1024;

/// 视频流时间基
const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);

/// 竖条宽度 (像素)
const BAR_WIDTH: u32 = 8;

/// 测试源参数
#[derive(Debug, Clone, PartialEq)]
pub struct TestSourceConfig {
    pub duration_us: i64,
    pub frame_rate: Rational,
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_format: SampleFormat,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub video: bool,
    pub video_delay_us: i64,
    pub frequency: f64,
}

impl Default for TestSourceConfig {
    fn default() -> Self {
        Self {
            duration_us: 5_000_000,
            frame_rate: Rational::new(25, 1),
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::F32p,
            width: 320,
            height: 240,
            audio: true,
            video: true,
            video_delay_us: 0,
            frequency: 440.0,
        }
    }
}

fn invalid(msg: String) -> PlayerError {
    PlayerError::NoStreamOrDecoder(msg)
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> PlayerResult<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("测试源参数 {key} 无效: {value}")))
}

fn parse_flag(key: &str, value: &str) -> PlayerResult<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(invalid(format!("测试源参数 {key} 无效: {value}"))),
    }
}

fn parse_frame_rate(value: &str) -> PlayerResult<Rational> {
    let rate = match value.split_once('/') {
        Some((num, den)) => Rational::new(parse_num("fps", num)?, parse_num("fps", den)?),
        None => Rational::new(parse_num("fps", value)?, 1),
    };
    if rate.num <= 0 || rate.den <= 0 {
        return Err(invalid(format!("测试源帧率无效: {value}")));
    }
    Ok(rate)
}

impl TestSourceConfig {
    /// 解析测试源标识
    pub fn parse(source: &str) -> PlayerResult<Self> {
        let query = match source.strip_prefix("testsrc") {
            Some("") => "",
            Some(rest) => rest
                .strip_prefix('?')
                .ok_or_else(|| invalid(format!("无法识别的测试源: {source}")))?,
            None => return Err(invalid(format!("无法打开媒体源: {source}"))),
        };

        let mut cfg = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("测试源参数缺少值: {pair}")))?;
            match key {
                "duration" => {
                    let secs: f64 = parse_num(key, value)?;
                    if secs.is_nan() || secs <= 0.0 {
                        return Err(invalid(format!("测试源时长无效: {value}")));
                    }
                    cfg.duration_us = (secs * 1_000_000.0).round() as i64;
                }
                "fps" => cfg.frame_rate = parse_frame_rate(value)?,
                "rate" => cfg.sample_rate = parse_num(key, value)?,
                "channels" => cfg.channels = parse_num(key, value)?,
                "format" => {
                    cfg.sample_format = value
                        .parse()
                        .map_err(PlayerError::UnsupportedSampleFormat)?
                }
                "width" => cfg.width = parse_num(key, value)?,
                "height" => cfg.height = parse_num(key, value)?,
                "audio" => cfg.audio = parse_flag(key, value)?,
                "video" => cfg.video = parse_flag(key, value)?,
                "video_delay" => cfg.video_delay_us = parse_num::<i64>(key, value)? * 1000,
                "freq" => cfg.frequency = parse_num(key, value)?,
                _ => return Err(invalid(format!("未知的测试源参数: {key}"))),
            }
        }

        if cfg.audio && (cfg.sample_rate == 0 || !(1..=8).contains(&cfg.channels)) {
            return Err(invalid(format!(
                "测试源音频参数无效: {}Hz, {} 声道",
                cfg.sample_rate, cfg.channels
            )));
        }
        if cfg.video && (cfg.width == 0 || cfg.height == 0) {
            return Err(invalid(format!(
                "测试源画面尺寸无效: {}x{}",
                cfg.width, cfg.height
            )));
        }
        Ok(cfg)
    }

    /// 帧间隔 (微秒)
    pub fn frame_interval_us(&self) -> i64 {
        rescale(1, self.frame_rate.invert(), Rational::MICRO)
    }

    fn total_samples(&self) -> i64 {
        rescale(
            self.duration_us,
            Rational::MICRO,
            Rational::per_sample(self.sample_rate),
        )
    }

    fn total_frames(&self) -> i64 {
        let tft = self.frame_interval_us().max(1);
        (self.duration_us + tft - 1) / tft
    }
}

/// 合成测试源
pub struct TestSource {
    config: TestSourceConfig,
    streams: Vec<StreamInfo>,
    audio_index: Option<usize>,
    video_index: Option<usize>,
    /// 下一个音频包的起始采样
    next_sample: i64,
    /// 下一个视频包的帧序号
    next_frame: i64,
    /// 各流已送入解码器、尚未取走的包
    pending: Vec<VecDeque<Packet>>,
    flushed: Vec<bool>,
}

impl TestSource {
    /// 按参数创建
    pub fn new(config: TestSourceConfig) -> Self {
        let mut streams = Vec::new();
        let mut audio_index = None;
        let mut video_index = None;
        if config.audio {
            audio_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                media_type: MediaType::Audio,
                time_base: Rational::per_sample(config.sample_rate),
                params: StreamParams::Audio {
                    sample_rate: config.sample_rate,
                    sample_format: config.sample_format,
                    channel_layout: ChannelLayout::from_channels(config.channels),
                },
            });
        }
        if config.video {
            video_index = Some(streams.len());
            streams.push(StreamInfo {
                index: streams.len(),
                media_type: MediaType::Video,
                time_base: VIDEO_TIME_BASE,
                params: StreamParams::Video {
                    width: config.width,
                    height: config.height,
                    pixel_format: PixelFormat::Yuv420p,
                    frame_rate: config.frame_rate,
                },
            });
        }
        debug!(
            "测试源: {} 个流, 时长 {}us",
            streams.len(),
            config.duration_us
        );
        let n = streams.len();
        Self {
            config,
            streams,
            audio_index,
            video_index,
            next_sample: 0,
            next_frame: 0,
            pending: vec![VecDeque::new(); n],
            flushed: vec![false; n],
        }
    }

    fn audio_packet(&mut self, index: usize) -> Packet {
        let remaining = self.config.total_samples() - self.next_sample;
        let n = remaining.min(i64::from(AUDIO_PACKET_SAMPLES));
        let packet = Packet {
            stream_index: index,
            data: Vec::new(),
            pts: self.next_sample,
            duration: n,
        };
        self.next_sample += n;
        packet
    }

    fn video_packet(&mut self, index: usize) -> Packet {
        let tb = self.config.frame_rate.invert();
        let start = self.config.video_delay_us + rescale(self.next_frame, tb, Rational::MICRO);
        let end = self.config.video_delay_us + rescale(self.next_frame + 1, tb, Rational::MICRO);
        let pts = rescale(start, Rational::MICRO, VIDEO_TIME_BASE);
        let packet = Packet {
            stream_index: index,
            data: self.next_frame.to_le_bytes().to_vec(),
            pts,
            duration: rescale(end, Rational::MICRO, VIDEO_TIME_BASE) - pts,
        };
        self.next_frame += 1;
        packet
    }

    fn decode_audio(&self, packet: &Packet) -> PlayerResult<AudioFrame> {
        let cfg = &self.config;
        let nb = packet.duration.max(0) as usize;
        let channels = cfg.channels as usize;
        let step = 2.0 * PI * cfg.frequency / f64::from(cfg.sample_rate);
        let tone: Vec<f64> = (0..nb)
            .map(|i| 0.25 * (step * (packet.pts + i as i64) as f64).sin())
            .collect();

        let interleaved_format = cfg.sample_format.to_interleaved();
        let data = if cfg.sample_format.is_planar() {
            let plane = encode_from_f64(&tone, interleaved_format)?;
            vec![plane; channels]
        } else {
            let samples: Vec<f64> = tone
                .iter()
                .flat_map(|&s| std::iter::repeat_n(s, channels))
                .collect();
            vec![encode_from_f64(&samples, interleaved_format)?]
        };

        Ok(AudioFrame {
            data,
            nb_samples: nb as u32,
            sample_rate: cfg.sample_rate,
            sample_format: cfg.sample_format,
            channel_layout: ChannelLayout::from_channels(cfg.channels),
            pts: packet.pts,
            time_base: Rational::per_sample(cfg.sample_rate),
        })
    }

    fn decode_video(&self, packet: &Packet) -> PlayerResult<VideoFrame> {
        let bytes: [u8; 8] = packet
            .data
            .as_slice()
            .try_into()
            .map_err(|_| PlayerError::Decode(format!("视频包长度无效: {}", packet.data.len())))?;
        let index = i64::from_le_bytes(bytes);

        let cfg = &self.config;
        let mut frame = VideoFrame::new(cfg.width, cfg.height, PixelFormat::Yuv420p);
        let stride = frame.linesize[0];
        let bar = (index.max(0) as u64 * u64::from(BAR_WIDTH) % u64::from(cfg.width)) as usize;
        let bar_end = (bar + BAR_WIDTH as usize).min(cfg.width as usize);
        for row in frame.data[0].chunks_mut(stride) {
            row.fill(16);
            row[bar..bar_end].fill(235);
        }
        for plane in frame.data.iter_mut().skip(1) {
            plane.fill(128);
        }
        frame.pts = packet.pts;
        frame.time_base = VIDEO_TIME_BASE;
        frame.duration = packet.duration;
        Ok(frame)
    }
}

impl FrameSource for TestSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration_us(&self) -> Option<i64> {
        Some(self.config.duration_us)
    }

    fn next_packet(&mut self) -> PlayerResult<Option<Packet>> {
        let audio_due = self
            .audio_index
            .filter(|_| self.next_sample < self.config.total_samples())
            .map(|i| {
                let t = rescale(
                    self.next_sample,
                    Rational::per_sample(self.config.sample_rate),
                    Rational::MICRO,
                );
                (i, t)
            });
        let video_due = self
            .video_index
            .filter(|_| self.next_frame < self.config.total_frames())
            .map(|i| {
                let t = self.config.video_delay_us
                    + rescale(self.next_frame, self.config.frame_rate.invert(), Rational::MICRO);
                (i, t)
            });

        let packet = match (audio_due, video_due) {
            (Some((a, ta)), Some((_, tv))) if ta <= tv => self.audio_packet(a),
            (_, Some((v, _))) => self.video_packet(v),
            (Some((a, _)), None) => self.audio_packet(a),
            (None, None) => return Ok(None),
        };
        Ok(Some(packet))
    }

    fn send_packet(&mut self, packet: Packet) -> PlayerResult<()> {
        let queue = self
            .pending
            .get_mut(packet.stream_index)
            .ok_or_else(|| PlayerError::Decode(format!("无效的流索引: {}", packet.stream_index)))?;
        queue.push_back(packet);
        Ok(())
    }

    fn send_eof(&mut self, stream_index: usize) -> PlayerResult<()> {
        let flushed = self
            .flushed
            .get_mut(stream_index)
            .ok_or_else(|| PlayerError::Decode(format!("无效的流索引: {stream_index}")))?;
        *flushed = true;
        Ok(())
    }

    fn receive_frame(&mut self, stream_index: usize) -> PlayerResult<DecodeStatus> {
        let Some(packet) = self
            .pending
            .get_mut(stream_index)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(if self.flushed.get(stream_index).copied().unwrap_or(true) {
                DecodeStatus::EndOfStream
            } else {
                DecodeStatus::NeedMore
            });
        };

        let frame = if Some(stream_index) == self.audio_index {
            Frame::Audio(self.decode_audio(&packet)?)
        } else {
            Frame::Video(self.decode_video(&packet)?)
        };
        Ok(DecodeStatus::Frame(frame))
    }
}

/// 打开 `testsrc` 标识的数据源
#[derive(Debug, Clone, Copy, Default)]
pub struct TestSourceOpener;

impl SourceOpener for TestSourceOpener {
    fn open(&self, source: &str) -> PlayerResult<Box<dyn FrameSource>> {
        let config = TestSourceConfig::parse(source)?;
        Ok(Box::new(TestSource::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut TestSource) -> Vec<Packet> {
        std::iter::from_fn(|| source.next_packet().unwrap()).collect()
    }

    #[test]
    fn test_parse_参数() {
        let cfg = TestSourceConfig::parse("testsrc?duration=1.5&fps=30000/1001&rate=44100&channels=1&video_delay=80")
            .unwrap();
        assert_eq!(cfg.duration_us, 1_500_000);
        assert_eq!(cfg.frame_rate, Rational::new(30000, 1001));
        assert_eq!(cfg.sample_rate, 44100);
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.video_delay_us, 80_000);
        assert_eq!(TestSourceConfig::parse("testsrc").unwrap(), TestSourceConfig::default());
    }

    #[test]
    fn test_parse_错误() {
        assert!(matches!(
            TestSourceConfig::parse("movie.mp4"),
            Err(PlayerError::NoStreamOrDecoder(_))
        ));
        assert!(TestSourceConfig::parse("testsrc?fps=0").is_err());
        assert!(TestSourceConfig::parse("testsrc?bogus=1").is_err());
        assert!(matches!(
            TestSourceConfig::parse("testsrc?format=xyz"),
            Err(PlayerError::UnsupportedSampleFormat(_))
        ));
    }

    #[test]
    fn test_包按时间交错且数量正确() {
        let cfg = TestSourceConfig::parse("testsrc?duration=1&fps=25&rate=48000").unwrap();
        let mut source = TestSource::new(cfg);
        let packets = drain(&mut source);
        let audio: i64 = packets
            .iter()
            .filter(|p| p.stream_index == 0)
            .map(|p| p.duration)
            .sum();
        let video = packets.iter().filter(|p| p.stream_index == 1).count();
        assert_eq!(audio, 48000);
        assert_eq!(video, 25);
        // 第一个包是音频 (时间相同时音频优先)
        assert_eq!(packets[0].stream_index, 0);
        assert_eq!(packets[1].stream_index, 1);
    }

    #[test]
    fn test_解码帧参数() {
        let cfg = TestSourceConfig::parse("testsrc?duration=0.1&channels=2&width=16&height=8").unwrap();
        let mut source = TestSource::new(cfg);
        let packets = drain(&mut source);
        for p in packets {
            source.send_packet(p).unwrap();
        }
        match source.receive_frame(0).unwrap() {
            DecodeStatus::Frame(Frame::Audio(f)) => {
                assert_eq!(f.nb_samples, AUDIO_PACKET_SAMPLES);
                assert_eq!(f.data.len(), 2);
                assert_eq!(f.data[0].len(), AUDIO_PACKET_SAMPLES as usize * 4);
                assert_eq!(f.pts, 0);
            }
            other => panic!("应得到音频帧: {other:?}"),
        }
        match source.receive_frame(1).unwrap() {
            DecodeStatus::Frame(Frame::Video(f)) => {
                assert_eq!((f.width, f.height), (16, 8));
                assert_eq!(f.data[0][0..8], [235u8; 8]);
                assert_eq!(f.data[0][8], 16);
                assert_eq!(f.timestamp().to_micros(), 0);
            }
            other => panic!("应得到视频帧: {other:?}"),
        }
    }

    #[test]
    fn test_冲刷后返回流结束() {
        let cfg = TestSourceConfig::parse("testsrc?video=0").unwrap();
        let mut source = TestSource::new(cfg);
        assert!(matches!(source.receive_frame(0).unwrap(), DecodeStatus::NeedMore));
        source.send_eof(0).unwrap();
        assert!(matches!(source.receive_frame(0).unwrap(), DecodeStatus::EndOfStream));
    }
}
