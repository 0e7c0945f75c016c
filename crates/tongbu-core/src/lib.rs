//! # tongbu-core
//!
//! Tongbu 同步播放引擎核心库, 提供基础类型定义、错误处理和时间换算.
//!
//! 整个引擎内部统一使用微秒作为全局时间基, 见 [`timestamp::TIME_BASE`].

pub mod channel_layout;
pub mod error;
pub mod media_type;
pub mod pixel_format;
pub mod rational;
pub mod sample_format;
pub mod timestamp;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use error::{PlayerError, PlayerResult};
pub use media_type::MediaType;
pub use pixel_format::PixelFormat;
pub use rational::{Rational, Rounding};
pub use sample_format::SampleFormat;
pub use timestamp::{NOPTS_VALUE, TIME_BASE, Timestamp, rescale, rescale_rnd};
