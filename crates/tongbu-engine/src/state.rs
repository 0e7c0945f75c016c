//! 会话内各线程共享的状态.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use log::error;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tongbu_core::{NOPTS_VALUE, PlayerError};

use crate::audio_buffer::AudioRingBuffer;
use crate::clock::MasterClock;
use crate::sink::AudioDevice;
use crate::video_queue::VideoFrameQueue;

/// 播放统计 (原子计数)
#[derive(Debug, Default)]
pub struct SyncStats {
    displayed: AtomicU64,
    dropped: AtomicU64,
    coalesced: AtomicU64,
    refreshes: AtomicU64,
    underruns: AtomicU64,
    lock_timeouts: AtomicU64,
}

/// 播放统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatsSnapshot {
    /// 显示过的视频帧数
    pub displayed: u64,
    /// 未显示即被丢弃的视频帧数
    pub dropped: u64,
    /// 前瞻合并跳过的刷新槽数
    pub coalesced: u64,
    /// 调度器执行次数
    pub refreshes: u64,
    /// 音频回调遇到数据不足的次数
    pub underruns: u64,
    /// 音频回调等锁超时的次数
    pub lock_timeouts: u64,
}

impl SyncStats {
    pub(crate) fn add_displayed(&self) {
        self.displayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_coalesced(&self, n: u64) {
        self.coalesced.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// 读取当前计数
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            displayed: self.displayed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// 唤醒解码线程用的条件变量
///
/// 消费方取走数据后通知, 解码线程空闲时最多等待一个超时.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Notifier {
    /// 通知等待方, 不会阻塞 (锁被占用时只发信号)
    pub(crate) fn notify(&self) {
        if let Some(mut pending) = self.pending.try_lock() {
            *pending = true;
        }
        self.cond.notify_one();
    }

    /// 等待通知或超时
    pub(crate) fn wait_timeout(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.cond.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

/// 共享状态
///
/// `audio` 与 `video` 两把锁从不嵌套持有.
pub(crate) struct SharedState {
    /// 音频缓冲区与 `audio_lock`
    pub audio: Option<Mutex<AudioRingBuffer>>,
    /// 视频队列与 `video_lock`
    pub video: Option<Mutex<VideoFrameQueue>>,
    pub clock: MasterClock,
    /// 协作式停止标志
    pub stopping: AtomicBool,
    pub playing: AtomicBool,
    pub audio_eof: AtomicBool,
    pub video_eof: AtomicBool,
    /// 下一次视频显示的预计墙钟时间, 用于入队避让
    pub next_video_timestamp: AtomicI64,
    /// 显示刷新间隔 (微秒)
    pub display_frame_us: AtomicI64,
    pub last_error: Mutex<Option<PlayerError>>,
    pub audio_device: Mutex<Option<Box<dyn AudioDevice>>>,
    pub stats: SyncStats,
    pub decode_wakeup: Notifier,
}

impl SharedState {
    pub(crate) fn new(audio: Option<AudioRingBuffer>, video: Option<VideoFrameQueue>) -> Self {
        Self {
            audio: audio.map(Mutex::new),
            video: video.map(Mutex::new),
            clock: MasterClock::new(),
            stopping: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            audio_eof: AtomicBool::new(false),
            video_eof: AtomicBool::new(false),
            next_video_timestamp: AtomicI64::new(NOPTS_VALUE),
            display_frame_us: AtomicI64::new(1_000_000 / 60),
            last_error: Mutex::new(None),
            audio_device: Mutex::new(None),
            stats: SyncStats::default(),
            decode_wakeup: Notifier::default(),
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// 置位停止标志并唤醒解码线程
    pub(crate) fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.playing.store(false, Ordering::Release);
        self.decode_wakeup.notify();
    }

    /// 记录运行期错误, 保留最近一次
    pub(crate) fn record_error(&self, err: PlayerError) {
        error!("{err}");
        *self.last_error.lock() = Some(err);
    }

    /// 暂停或恢复音频设备 (设备未打开时忽略)
    pub(crate) fn pause_audio_device(&self, paused: bool) {
        if let Some(device) = self.audio_device.lock().as_mut() {
            device.pause(paused);
        }
    }
}
