//! 解封装/解码数据源接口.
//!
//! 引擎本身不解析容器和码流, 由 [`FrameSource`] 提供压缩包和解码后的帧.
//! 协议与 send/receive 解码模型一致: 向解码器送入包, 再反复取帧直到需要更多数据.

use tongbu_core::{ChannelLayout, MediaType, PixelFormat, PlayerResult, Rational, SampleFormat};

use crate::frame::Frame;

/// 流参数
#[derive(Debug, Clone, PartialEq)]
pub enum StreamParams {
    /// 音频流参数 (解码器输出)
    Audio {
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    },
    /// 视频流参数 (解码器输出)
    Video {
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        /// 帧率, 决定帧间隔
        frame_rate: Rational,
    },
    /// 其他流, 播放时忽略
    Other,
}

/// 流信息
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// 流索引
    pub index: usize,
    /// 媒体类型
    pub media_type: MediaType,
    /// 时间基
    pub time_base: Rational,
    /// 流参数
    pub params: StreamParams,
}

/// 压缩数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 所属流索引
    pub stream_index: usize,
    /// 压缩数据
    pub data: Vec<u8>,
    /// 显示时间戳 (以流时间基为单位)
    pub pts: i64,
    /// 时长 (以流时间基为单位)
    pub duration: i64,
}

/// 取帧结果
#[derive(Debug)]
pub enum DecodeStatus {
    /// 得到一帧
    Frame(Frame),
    /// 解码器需要更多输入包
    NeedMore,
    /// 该流已解码完毕
    EndOfStream,
}

/// 解封装 + 解码数据源
pub trait FrameSource: Send {
    /// 所有流的信息
    fn streams(&self) -> &[StreamInfo];

    /// 媒体总时长 (微秒), 未知时返回 `None`
    fn duration_us(&self) -> Option<i64> {
        None
    }

    /// 读取下一个压缩包, `None` 表示没有更多数据
    fn next_packet(&mut self) -> PlayerResult<Option<Packet>>;

    /// 向对应流的解码器送入一个包
    fn send_packet(&mut self, packet: Packet) -> PlayerResult<()>;

    /// 通知对应流的解码器输入结束, 之后取帧会冲刷缓存的帧
    fn send_eof(&mut self, stream_index: usize) -> PlayerResult<()>;

    /// 从对应流的解码器取一帧
    fn receive_frame(&mut self, stream_index: usize) -> PlayerResult<DecodeStatus>;
}

/// 根据媒体源标识打开数据源
pub trait SourceOpener {
    /// 打开数据源, 标识格式由实现决定
    fn open(&self, source: &str) -> PlayerResult<Box<dyn FrameSource>>;
}

/// 查找第一个指定类型的流
pub fn find_stream(streams: &[StreamInfo], media_type: MediaType) -> Option<&StreamInfo> {
    streams.iter().find(|s| s.media_type == media_type)
}
