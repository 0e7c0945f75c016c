//! 视频帧队列.
//!
//! 有界 FIFO, 队首帧的流时间为 `video_pts`, 每出队一帧推进一个帧间隔.
//! 帧以 `Arc` 存放, 调度线程在锁外渲染队首帧时不需要复制像素数据.

use std::collections::VecDeque;
use std::sync::Arc;

use tongbu_core::NOPTS_VALUE;

use crate::frame::VideoFrame;

/// 出队结果
#[derive(Debug)]
pub struct Popped {
    /// 出队的帧
    pub frame: Arc<VideoFrame>,
    /// 该帧出队前是否已显示过
    pub displayed: bool,
}

/// 视频帧队列
///
/// 所有方法都要求调用方持有 `video_lock`.
#[derive(Debug)]
pub struct VideoFrameQueue {
    frames: VecDeque<Arc<VideoFrame>>,
    capacity: usize,
    /// 流帧间隔 (微秒)
    frame_interval_us: i64,
    video_pts: i64,
    video_end_pts: i64,
    video_first_pts: i64,
    head_displayed: bool,
}

impl VideoFrameQueue {
    /// 创建空队列
    ///
    /// `capacity` 为软上限: 解码线程在达到上限后停止生产, `push` 本身不拒绝.
    pub fn new(capacity: usize, frame_interval_us: i64) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            frame_interval_us: frame_interval_us.max(1),
            video_pts: 0,
            video_end_pts: 0,
            video_first_pts: NOPTS_VALUE,
            head_displayed: false,
        }
    }

    /// 软容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 流帧间隔 (微秒)
    pub fn frame_interval_us(&self) -> i64 {
        self.frame_interval_us
    }

    /// 队首帧的流时间 (微秒)
    pub fn video_pts(&self) -> i64 {
        self.video_pts
    }

    /// 队尾之后的流时间 (微秒)
    pub fn video_end_pts(&self) -> i64 {
        self.video_end_pts
    }

    /// 第一帧视频的绝对时间戳, 未设置时为 `NOPTS_VALUE`
    pub fn first_pts(&self) -> i64 {
        self.video_first_pts
    }

    /// 记录第一帧视频的绝对时间戳
    pub fn set_first_pts(&mut self, first_pts: i64) {
        self.video_first_pts = first_pts;
    }

    /// 重设时钟, 使下一个入队的帧的流时间为 `pts`
    pub fn rebase(&mut self, pts: i64) {
        self.video_end_pts = pts;
        self.video_pts = pts - self.frames.len() as i64 * self.frame_interval_us;
    }

    /// 帧数
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// 是否达到软容量
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// 在队尾追加一帧
    pub fn push(&mut self, frame: Arc<VideoFrame>) {
        self.frames.push_back(frame);
        self.video_end_pts += self.frame_interval_us;
    }

    /// 查看队首帧 (不出队)
    pub fn peek(&self) -> Option<Arc<VideoFrame>> {
        self.frames.front().cloned()
    }

    /// 队首帧是否已显示
    pub fn head_displayed(&self) -> bool {
        self.head_displayed
    }

    /// 标记队首帧已显示
    pub fn mark_head_displayed(&mut self) {
        if !self.frames.is_empty() {
            self.head_displayed = true;
        }
    }

    /// 队首帧出队, `video_pts` 推进一个帧间隔
    pub fn pop(&mut self) -> Option<Popped> {
        let frame = self.frames.pop_front()?;
        let displayed = std::mem::replace(&mut self.head_displayed, false);
        self.video_pts += self.frame_interval_us;
        Some(Popped { frame, displayed })
    }

    /// 丢弃所有帧, 返回丢弃的帧数
    pub fn drain(&mut self) -> usize {
        let n = self.frames.len();
        self.frames.clear();
        self.head_displayed = false;
        self.video_pts = self.video_end_pts;
        n
    }
}
