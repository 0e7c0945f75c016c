//! 视频同步调度器.
//!
//! 每次定时器触发时根据主时钟决定: 丢弃已过期的帧, 显示队首帧, 以及下一次触发的时间.
//!
//! 时间量:
//! - `ft`: 显示刷新间隔
//! - `tft`: 流帧间隔
//! - `curpos`: 主时钟换算到视频时间轴上的当前位置
//!
//! 追赶: 只要 `curpos` 越过队首帧显示区间的结束 (即下一帧的时间戳) 超过 `ft/8`, 就出队并推进 `tft`.
//! 时钟仍在队首帧区间内时保留该帧.
//! 前瞻: 以队首帧时间为起点按 `ft` 步进, 跳过距离 `curpos` 不足 `ft/4` 的刷新槽,
//! 下一次触发取该槽与队首帧区间结束两者中较早的一个.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, trace};
use tongbu_core::NOPTS_VALUE;

use crate::clock::wall_clock_us;
use crate::frame::VideoFrame;
use crate::state::SharedState;
use crate::video_queue::VideoFrameQueue;

/// 最短触发间隔 (微秒)
pub const MIN_DELAY_US: i64 = 1_000;

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// 尚未触发过
    Uninitialized,
    /// 等待第一帧视频或主时钟就绪
    Priming,
    /// 正常跟踪主时钟
    Tracking,
    /// 队列已空 (解码跟不上或流已结束)
    Draining,
    /// 会话停止
    Stopped,
}

/// 一次调度的决策
#[derive(Debug, Clone)]
pub struct RefreshPlan {
    /// 需要显示的帧 (队首帧首次显示时才有)
    pub display: Option<Arc<VideoFrame>>,
    /// 距离下一次触发的时间 (微秒)
    pub delay_us: i64,
    /// 本次丢弃的未显示帧数
    pub dropped: u64,
    /// 本次前瞻跳过的刷新槽数
    pub coalesced: u64,
}

impl RefreshPlan {
    fn poll(ft: i64) -> Self {
        Self {
            display: None,
            delay_us: poll_delay(ft),
            dropped: 0,
            coalesced: 0,
        }
    }
}

/// 队列为空或时钟未就绪时的轮询间隔
pub fn poll_delay(ft: i64) -> i64 {
    (ft / 4).max(MIN_DELAY_US)
}

/// 同步调度器
#[derive(Debug)]
pub struct SyncScheduler {
    state: SchedulerState,
    /// 显示刷新间隔 `ft` (微秒)
    display_frame_us: i64,
}

impl SyncScheduler {
    /// 创建调度器
    pub fn new(display_frame_us: i64) -> Self {
        Self {
            state: SchedulerState::Uninitialized,
            display_frame_us: display_frame_us.max(MIN_DELAY_US),
        }
    }

    /// 当前状态
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// 显示刷新间隔
    pub fn display_frame_us(&self) -> i64 {
        self.display_frame_us
    }

    /// 进入停止状态, 之后的调度不再触碰队列
    pub fn stop(&mut self) {
        self.state = SchedulerState::Stopped;
    }

    /// 针对时钟位置 `curpos` 做一次调度决策
    ///
    /// 调用方持有 `video_lock`.
    pub fn plan(&mut self, curpos: i64, queue: &mut VideoFrameQueue) -> RefreshPlan {
        let ft = self.display_frame_us;
        if self.state == SchedulerState::Stopped {
            return RefreshPlan::poll(ft);
        }
        let tft = queue.frame_interval_us();

        // 追赶
        let mut dropped = 0;
        while !queue.is_empty() && curpos > queue.video_pts() + tft + ft / 8 {
            match queue.pop() {
                Some(popped) if !popped.displayed => dropped += 1,
                _ => {}
            }
        }

        if queue.is_empty() {
            self.state = match self.state {
                SchedulerState::Uninitialized | SchedulerState::Priming => SchedulerState::Priming,
                _ => SchedulerState::Draining,
            };
            let mut plan = RefreshPlan::poll(ft);
            plan.dropped = dropped;
            return plan;
        }

        // 前瞻
        let head_pts = queue.video_pts();
        let mut next = head_pts + ft;
        let mut coalesced = 0;
        while curpos >= next - ft / 4 {
            next += ft;
            coalesced += 1;
        }
        let delay_us = (next - curpos)
            .min(head_pts + tft - curpos)
            .max(MIN_DELAY_US);

        let display = if queue.head_displayed() {
            None
        } else {
            queue.mark_head_displayed();
            queue.peek()
        };

        self.state = SchedulerState::Tracking;
        RefreshPlan {
            display,
            delay_us,
            dropped,
            coalesced,
        }
    }

    /// 读取共享状态, 执行一次调度
    ///
    /// 先在 `audio_lock` 下取时钟快照并释放, 再持有 `video_lock` 做决策, 两把锁不嵌套.
    pub(crate) fn refresh(&mut self, shared: &SharedState) -> RefreshPlan {
        let ft = self.display_frame_us;
        shared.stats.add_refresh();
        let Some(video) = shared.video.as_ref() else {
            return RefreshPlan::poll(ft);
        };
        if shared.is_stopping() {
            self.stop();
            return RefreshPlan::poll(ft);
        }

        let now = wall_clock_us();
        let audio = shared.audio.as_ref().map(|audio| {
            let audio = audio.lock();
            AudioSnapshot {
                pts: audio.pts(),
                updated_at: audio.pts_updated_at(),
                last_pull_us: audio.last_pull_us(),
                first_pts: audio.first_pts(),
            }
        });

        let plan = {
            let mut queue = video.lock();
            match current_position(shared, audio, &queue, now) {
                Some(curpos) => {
                    trace!(
                        "调度: curpos={curpos}, video_pts={}, 队列 {} 帧",
                        queue.video_pts(),
                        queue.len()
                    );
                    self.plan(curpos, &mut queue)
                }
                None => {
                    self.state = SchedulerState::Priming;
                    RefreshPlan::poll(ft)
                }
            }
        };

        if plan.dropped > 0 {
            debug!("丢弃 {} 个过期视频帧", plan.dropped);
            shared.stats.add_dropped(plan.dropped);
            shared.decode_wakeup.notify();
        }
        shared.stats.add_coalesced(plan.coalesced);
        shared
            .next_video_timestamp
            .store(now + plan.delay_us, Ordering::Release);
        plan
    }
}

/// 在 `audio_lock` 下取得的音频时钟快照
#[derive(Debug, Clone, Copy)]
pub(crate) struct AudioSnapshot {
    pub pts: i64,
    pub updated_at: Option<i64>,
    pub last_pull_us: i64,
    pub first_pts: i64,
}

impl AudioSnapshot {
    /// 音频主时钟位置 (相对 `first_pts`)
    ///
    /// 音频流结束前外推不超过上次消费的时长.
    pub(crate) fn position(&self, shared: &SharedState, now: i64) -> i64 {
        let limit = if shared.audio_eof.load(Ordering::Acquire) {
            None
        } else {
            Some(self.last_pull_us)
        };
        shared
            .clock
            .audio_position(self.pts, self.updated_at, limit, now)
    }
}

/// 主时钟换算到视频时间轴上的当前位置
///
/// 有音频时: 音频位置 - (video_first_pts - first_pts). 音频尚无数据且未结束时返回 `None`.
/// 无音频时: 墙钟, 在第一次得到视频帧时以队首时间启动.
fn current_position(
    shared: &SharedState,
    audio: Option<AudioSnapshot>,
    queue: &VideoFrameQueue,
    now: i64,
) -> Option<i64> {
    let video_first = queue.first_pts();
    if video_first == NOPTS_VALUE {
        return None;
    }
    if let Some(snapshot) = audio {
        if snapshot.first_pts != NOPTS_VALUE {
            let clock_offset = video_first - snapshot.first_pts;
            return Some(snapshot.position(shared, now) - clock_offset);
        }
        if !shared.audio_eof.load(Ordering::Acquire) {
            return None;
        }
    }
    if shared.clock.is_paused() && !shared.clock.wall_started() {
        return Some(queue.video_pts());
    }
    shared.clock.start_wall(queue.video_pts(), now);
    shared.clock.wall_position(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_buffer::AudioRingBuffer;
    use tongbu_core::{PixelFormat, SampleFormat};

    const FT: i64 = 16_000;
    const TFT: i64 = 40_000;

    fn queue_with(n: usize) -> VideoFrameQueue {
        let mut q = VideoFrameQueue::new(n.max(1), TFT);
        q.set_first_pts(0);
        q.rebase(0);
        for i in 0..n {
            let mut f = VideoFrame::new(2, 2, PixelFormat::Rgba);
            f.pts = i as i64;
            q.push(Arc::new(f));
        }
        q
    }

    #[test]
    fn test_首帧立即显示() {
        let mut s = SyncScheduler::new(FT);
        let mut q = queue_with(3);
        let plan = s.plan(0, &mut q);
        assert_eq!(plan.display.as_ref().map(|f| f.pts), Some(0));
        assert_eq!(plan.dropped, 0);
        assert_eq!(s.state(), SchedulerState::Tracking);
        assert!(plan.delay_us > 0 && plan.delay_us <= FT);

        // 同一帧不重复显示
        let plan = s.plan(5_000, &mut q);
        assert!(plan.display.is_none());
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn test_时钟跳变_丢弃k减1帧() {
        for k in 2..6 {
            let mut s = SyncScheduler::new(FT);
            let mut q = queue_with(10);
            let first = s.plan(0, &mut q);
            assert!(first.display.is_some());

            let plan = s.plan(k * TFT + FT / 8 + 1, &mut q);
            assert_eq!(plan.dropped, (k - 1) as u64, "k={k}");
            let shown = plan.display.expect("应显示落点帧");
            assert_eq!(shown.pts, k);
            assert_eq!(q.video_pts(), k * TFT);
        }
    }

    #[test]
    fn test_时钟在帧区间内保留该帧() {
        let mut s = SyncScheduler::new(FT);
        let mut q = queue_with(8);
        s.plan(0, &mut q);

        // 越过帧 0 区间结束但未超过 ft/8: 帧 0 仍为队首
        let plan = s.plan(TFT + FT / 8, &mut q);
        assert_eq!(plan.dropped, 0);
        assert!(plan.display.is_none());
        assert_eq!(q.len(), 8);
        assert!(plan.delay_us >= MIN_DELAY_US);

        // 时钟落在帧 1 区间 [TFT, 2*TFT) 的末尾: 显示帧 1, 不提前显示帧 2
        let plan = s.plan(2 * TFT - FT / 8 + 1, &mut q);
        assert_eq!(plan.dropped, 0);
        assert_eq!(plan.display.map(|f| f.pts), Some(1));
        assert_eq!(q.video_pts(), TFT);
        assert_eq!(q.len(), 7);
    }

    #[test]
    fn test_延迟不超过帧区间结束() {
        let mut s = SyncScheduler::new(FT);
        let mut q = queue_with(3);
        let plan = s.plan(20_000, &mut q);
        // 刷新槽 16000 已过, 下一个槽 32000
        assert_eq!(plan.coalesced, 1);
        assert_eq!(plan.delay_us, 12_000);

        let mut q = queue_with(3);
        let plan = s.plan(30_000, &mut q);
        // 槽 32000 与 30000 相距不足 ft/4, 合并到 48000; 但帧区间在 40000 结束
        assert_eq!(plan.coalesced, 2);
        assert_eq!(plan.delay_us, 10_000);
    }

    #[test]
    fn test_队列为空() {
        let mut s = SyncScheduler::new(FT);
        let mut q = queue_with(0);
        let plan = s.plan(0, &mut q);
        assert!(plan.display.is_none());
        assert_eq!(plan.delay_us, poll_delay(FT));
        assert_eq!(s.state(), SchedulerState::Priming);

        let mut q = queue_with(1);
        s.plan(0, &mut q);
        let plan = s.plan(TFT * 2, &mut q);
        assert_eq!(plan.dropped, 0);
        assert!(q.is_empty());
        assert_eq!(s.state(), SchedulerState::Draining);
    }

    #[test]
    fn test_停止后不触碰队列() {
        let mut s = SyncScheduler::new(FT);
        let mut q = queue_with(3);
        s.stop();
        let plan = s.plan(TFT * 10, &mut q);
        assert!(plan.display.is_none());
        assert_eq!(q.len(), 3);
        assert_eq!(s.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_refresh_按音频时钟偏移() {
        // 音频从 0 开始, 视频从 80ms 开始: 音频位置 100ms 对应视频时间轴 20ms
        let mut audio = AudioRingBuffer::new(1000, 1, SampleFormat::S16);
        audio.set_first_pts(0);
        audio.rebase(0);
        audio.push(&[0u8; 2 * 200]).unwrap();
        let mut out = [0u8; 2 * 100];
        audio.pull(&mut out, 0);

        let mut q = queue_with(3);
        q.set_first_pts(80_000);
        let shared = SharedState::new(Some(audio), Some(q));

        let mut s = SyncScheduler::new(FT);
        let plan = s.refresh(&shared);
        assert_eq!(plan.display.map(|f| f.pts), Some(0));
        assert_eq!(shared.video.as_ref().unwrap().lock().len(), 3);
        assert_ne!(
            shared.next_video_timestamp.load(Ordering::Acquire),
            NOPTS_VALUE
        );
    }

    #[test]
    fn test_refresh_等待音频首帧() {
        let audio = AudioRingBuffer::new(1000, 1, SampleFormat::S16);
        let shared = SharedState::new(Some(audio), Some(queue_with(2)));
        let mut s = SyncScheduler::new(FT);
        let plan = s.refresh(&shared);
        assert!(plan.display.is_none());
        assert_eq!(s.state(), SchedulerState::Priming);

        // 音频流结束且没有任何数据: 退回墙钟
        shared.audio_eof.store(true, Ordering::Release);
        let plan = s.refresh(&shared);
        assert_eq!(plan.display.map(|f| f.pts), Some(0));
    }
}
