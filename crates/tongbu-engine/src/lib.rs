//! # tongbu-engine
//!
//! Tongbu 音视频同步播放引擎.
//!
//! 数据流:
//!
//! ```text
//! FrameSource → 解码线程 → { AudioRingBuffer, VideoFrameQueue }
//!                              │                  │
//!                     音频设备拉取回调        事件线程 + SyncScheduler
//! ```
//!
//! 音频回调的消费进度是主时钟, 调度器据此决定视频帧的显示、丢弃和下一次刷新时间.
//! 引擎只有两个常驻线程 (解码、事件), 外加由输出后端驱动的音频回调.
//!
//! ```rust,no_run
//! use tongbu_engine::{HeadlessBackend, Session, TestSourceOpener};
//!
//! let mut backend = HeadlessBackend::default();
//! let mut session = Session::create("testsrc?duration=2", &TestSourceOpener, &mut backend, None)?;
//! session.play();
//! session.wait_until_finished(None);
//! session.free();
//! # Ok::<(), tongbu_core::PlayerError>(())
//! ```

pub mod audio_bridge;
pub mod audio_buffer;
pub mod clock;
mod decode;
mod events;
pub mod frame;
pub mod headless;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod sink;
pub mod source;
mod state;
pub mod surface;
pub mod testsrc;
pub mod video_queue;

pub use audio_bridge::{AudioBridge, Resampler};
pub use audio_buffer::AudioRingBuffer;
pub use clock::MasterClock;
pub use events::PlayerEvent;
pub use frame::{AudioFrame, Frame, VideoFrame};
pub use headless::{HeadlessBackend, HeadlessStats};
pub use scheduler::{RefreshPlan, SchedulerState, SyncScheduler};
pub use session::{Session, play};
pub use settings::Settings;
pub use sink::{AudioDevice, AudioPuller, AudioSpec};
pub use source::{DecodeStatus, FrameSource, Packet, SourceOpener, StreamInfo, StreamParams};
pub use state::{SyncStats, SyncStatsSnapshot};
pub use surface::{
    OutputBackend, Rect, SurfaceRequest, VideoSurface, WindowEvent, WindowHandle,
};
pub use testsrc::{TestSource, TestSourceConfig, TestSourceOpener};
pub use video_queue::VideoFrameQueue;
