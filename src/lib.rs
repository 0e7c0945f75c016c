//! # Tongbu (同步)
//!
//! 纯 Rust 实现的本地音视频同步播放引擎.
//!
//! 解码线程按缓冲区占用填充音频环形缓冲区和视频帧队列, 音频设备按自己的节奏拉取数据,
//! 事件线程上的调度器以音频消费进度为主时钟决定每一帧视频何时显示、何时丢弃.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tongbu::engine::{HeadlessBackend, Session, Settings, TestSourceOpener};
//!
//! let mut backend = HeadlessBackend::default();
//! let settings = Settings {
//!     audio_buffer_ms: 200,
//!     ..Settings::default()
//! };
//! let mut session = Session::create("testsrc?duration=3", &TestSourceOpener, &mut backend, Some(settings))?;
//! session.play();
//! session.wait_until_finished(None);
//! println!("统计: {:?}", session.stats());
//! session.free();
//! # Ok::<(), tongbu::core::PlayerError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tongbu-core` | 时间基换算、采样/像素格式、声道布局、错误类型 |
//! | `tongbu-resample` | 音频重采样 (格式、声道、采样率转换) |
//! | `tongbu-engine` | 缓冲区、解码驱动、同步调度、会话 |

/// 核心类型与工具
pub use tongbu_core as core;

/// 音频重采样
pub use tongbu_resample as resample;

/// 同步播放引擎
pub use tongbu_engine as engine;

pub use tongbu_core::{PlayerError, PlayerResult};
pub use tongbu_engine::{Session, Settings, play};

/// 日志系统
pub mod logging;

/// 获取 Tongbu 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 版本号打包为整数: `major << 16 | minor << 8 | patch`
pub fn version_int() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0) & 0xff;
    part(env!("CARGO_PKG_VERSION_MAJOR")) << 16
        | part(env!("CARGO_PKG_VERSION_MINOR")) << 8
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}
