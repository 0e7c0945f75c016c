//! 事件分发循环.
//!
//! 事件线程是唯一执行视频同步调度的地方. 循环在三种输入之间等待, 每次最多阻塞 [`EVENT_WAIT`]:
//! - 会话发来的 [`PlayerEvent`] (刷新请求、退出)
//! - 视频表面上的窗口事件
//! - 调度器设定的下一次刷新时间

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::clock::wall_clock_us;
use crate::frame::VideoFrame;
use crate::scheduler::SyncScheduler;
use crate::state::SharedState;
use crate::surface::{Rect, VideoSurface, WindowEvent};

/// 单次等待事件的上限
pub const EVENT_WAIT: Duration = Duration::from_millis(5);

/// 发往事件线程的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// 立即执行一次调度
    Refresh,
    /// 退出事件循环
    Quit,
}

/// 事件分发器
pub(crate) struct EventDispatcher {
    shared: Arc<SharedState>,
    events: Receiver<PlayerEvent>,
    surface: Option<Box<dyn VideoSurface>>,
    scheduler: SyncScheduler,
    rect: Rect,
    resize: bool,
    last_frame: Option<Arc<VideoFrame>>,
    /// 下一次刷新的墙钟时间 (微秒)
    deadline: Option<i64>,
}

impl EventDispatcher {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        events: Receiver<PlayerEvent>,
        surface: Option<Box<dyn VideoSurface>>,
        scheduler: SyncScheduler,
        resize: bool,
    ) -> Self {
        let rect = surface
            .as_ref()
            .map(|s| {
                let (w, h) = s.size();
                Rect::full(w, h)
            })
            .unwrap_or_default();
        Self {
            shared,
            events,
            surface,
            scheduler,
            rect,
            resize,
            last_frame: None,
            deadline: None,
        }
    }

    /// 运行事件循环直到退出
    pub(crate) fn run(mut self) {
        debug!("事件线程启动");
        loop {
            if self.drain_window_events() {
                break;
            }

            let now = wall_clock_us();
            let wait = match self.deadline {
                Some(deadline) => Duration::from_micros((deadline - now).max(0) as u64).min(EVENT_WAIT),
                None => EVENT_WAIT,
            };
            match self.events.recv_timeout(wait) {
                Ok(PlayerEvent::Quit) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(PlayerEvent::Refresh) => self.deadline = Some(wall_clock_us()),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_stopping() {
                        break;
                    }
                }
            }

            if let Some(deadline) = self.deadline {
                if wall_clock_us() >= deadline {
                    self.refresh();
                }
            }
        }
        self.scheduler.stop();
        debug!("事件线程退出");
    }

    /// 处理所有待处理的窗口事件, 返回是否需要退出
    fn drain_window_events(&mut self) -> bool {
        loop {
            let Some(event) = self.surface.as_mut().and_then(|s| s.poll_event()) else {
                return false;
            };
            match event {
                WindowEvent::Close => {
                    info!("窗口关闭, 停止播放");
                    self.shared.pause_audio_device(true);
                    self.shared.request_stop();
                    return true;
                }
                WindowEvent::Exposed => {
                    if let Some(frame) = self.last_frame.clone() {
                        self.render(&frame);
                    }
                }
                WindowEvent::Resized { width, height } => {
                    if self.resize {
                        debug!("窗口尺寸变化: {width}x{height}");
                        self.rect = Rect::full(width, height);
                    }
                }
            }
        }
    }

    fn refresh(&mut self) {
        if self.surface.is_none() {
            // 没有视频流, 调度器不工作
            self.deadline = None;
            return;
        }
        let plan = self.scheduler.refresh(&self.shared);
        if let Some(frame) = plan.display {
            if self.render(&frame) {
                self.shared.stats.add_displayed();
            }
            self.last_frame = Some(frame);
        }
        self.deadline = Some(wall_clock_us() + plan.delay_us);
    }

    /// 绘制并呈现一帧, 返回是否成功
    fn render(&mut self, frame: &VideoFrame) -> bool {
        let Some(surface) = self.surface.as_mut() else {
            return false;
        };
        let result = surface.blit(frame, self.rect).and_then(|()| surface.present());
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("视频帧渲染失败: {e}");
                self.shared.record_error(e);
                false
            }
        }
    }
}
