//! 解码驱动线程.
//!
//! 按缓冲区占用决定向哪个流要帧: 音频缓冲不足目标时长时解码音频, 视频队列未满时解码视频.
//! 两者都不需要数据时在条件变量上等待消费方唤醒 (最多 [`DECODE_IDLE_WAIT`]).

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{debug, info, warn};
use tongbu_core::{NOPTS_VALUE, PlayerError, PlayerResult, Rational, Timestamp};

use crate::audio_bridge::AudioBridge;
use crate::clock::wall_clock_us;
use crate::frame::{AudioFrame, Frame, VideoFrame};
use crate::source::{DecodeStatus, FrameSource};
use crate::state::SharedState;

/// 无事可做时的等待上限
pub const DECODE_IDLE_WAIT: Duration = Duration::from_millis(5);

/// 同一个流连续解码失败达到该次数后放弃该流
const MAX_CONSECUTIVE_ERRORS: u32 = 32;

/// 单个流的解码状态
#[derive(Debug)]
struct Track {
    index: usize,
    time_base: Rational,
    eof: bool,
    /// 尚未得到第一个有效时间戳
    pts_due: bool,
    errors: u32,
}

impl Track {
    fn new(index: usize, time_base: Rational) -> Self {
        Self {
            index,
            time_base,
            eof: false,
            pts_due: true,
            errors: 0,
        }
    }

    /// 帧时间戳换算为微秒, 帧没有时间基时使用流时间基
    fn micros(&self, pts: i64, time_base: Rational) -> i64 {
        let tb = if time_base.is_valid() {
            time_base
        } else {
            self.time_base
        };
        Timestamp::new(pts, tb).to_micros()
    }
}

/// 解码驱动
pub(crate) struct DecodeDriver {
    shared: Arc<SharedState>,
    source: Box<dyn FrameSource>,
    audio: Option<(Track, AudioBridge)>,
    video: Option<Track>,
    /// 解封装已读到末尾
    demux_eof: bool,
    /// 音频缓冲目标时长 (微秒)
    audio_target_us: i64,
}

impl DecodeDriver {
    pub(crate) fn new(
        shared: Arc<SharedState>,
        source: Box<dyn FrameSource>,
        audio: Option<(usize, Rational, AudioBridge)>,
        video: Option<(usize, Rational)>,
        audio_buffer_ms: u32,
    ) -> Self {
        Self {
            shared,
            source,
            audio: audio.map(|(index, tb, bridge)| (Track::new(index, tb), bridge)),
            video: video.map(|(index, tb)| Track::new(index, tb)),
            demux_eof: false,
            audio_target_us: i64::from(audio_buffer_ms.max(1)) * 1000,
        }
    }

    /// 运行解码循环直到停止或播放结束
    pub(crate) fn run(mut self) {
        info!("解码线程启动");
        while !self.shared.is_stopping() {
            let mut progressed = false;
            if self.wants_audio() {
                progressed |= self.step_audio();
            }
            if self.wants_video() {
                progressed |= self.step_video();
            }
            if self.finished() {
                info!("所有流已播放完毕");
                self.shared.pause_audio_device(true);
                self.shared.request_stop();
                break;
            }
            if !progressed {
                self.shared.decode_wakeup.wait_timeout(DECODE_IDLE_WAIT);
            }
        }
        debug!("解码线程退出");
    }

    fn wants_audio(&self) -> bool {
        let Some((track, _)) = self.audio.as_ref() else {
            return false;
        };
        if track.eof {
            return false;
        }
        match self.shared.audio.as_ref() {
            Some(ring) => ring.lock().buffered_us() < self.audio_target_us,
            None => false,
        }
    }

    fn wants_video(&self) -> bool {
        let Some(track) = self.video.as_ref() else {
            return false;
        };
        if track.eof {
            return false;
        }
        match self.shared.video.as_ref() {
            Some(queue) => !queue.lock().is_full(),
            None => false,
        }
    }

    /// 所有存在的流都已结束且缓冲区已放空
    fn finished(&self) -> bool {
        let audio_done = match self.audio.as_ref() {
            Some((track, _)) => {
                track.eof
                    && self
                        .shared
                        .audio
                        .as_ref()
                        .is_none_or(|ring| ring.lock().is_empty())
            }
            None => true,
        };
        if !audio_done {
            return false;
        }
        match self.video.as_ref() {
            Some(track) => {
                track.eof
                    && self
                        .shared
                        .video
                        .as_ref()
                        .is_none_or(|queue| queue.lock().is_empty())
            }
            None => true,
        }
    }

    fn step_audio(&mut self) -> bool {
        let Some(index) = self.audio.as_ref().map(|(t, _)| t.index) else {
            return false;
        };
        match self.request_frame(index) {
            Ok(Some(Frame::Audio(frame))) => {
                self.reset_errors(index);
                self.feed_audio(frame);
                true
            }
            Ok(Some(Frame::Video(_))) => {
                warn!("音频流 {index} 返回了视频帧, 已忽略");
                true
            }
            Ok(None) => {
                self.end_audio();
                true
            }
            Err(e) => {
                self.on_decode_error(index, e);
                true
            }
        }
    }

    fn step_video(&mut self) -> bool {
        let Some(index) = self.video.as_ref().map(|t| t.index) else {
            return false;
        };
        match self.request_frame(index) {
            Ok(Some(Frame::Video(frame))) => {
                self.reset_errors(index);
                self.feed_video(frame);
                true
            }
            Ok(Some(Frame::Audio(_))) => {
                warn!("视频流 {index} 返回了音频帧, 已忽略");
                true
            }
            Ok(None) => {
                self.end_video();
                true
            }
            Err(e) => {
                self.on_decode_error(index, e);
                true
            }
        }
    }

    /// 从指定流取一帧, 需要时读取并分发压缩包. `None` 表示该流已结束.
    fn request_frame(&mut self, index: usize) -> PlayerResult<Option<Frame>> {
        loop {
            match self.source.receive_frame(index)? {
                DecodeStatus::Frame(frame) => return Ok(Some(frame)),
                DecodeStatus::EndOfStream => return Ok(None),
                DecodeStatus::NeedMore => {
                    if self.demux_eof {
                        // 已送入 EOF 仍要求输入, 视为流结束
                        return Ok(None);
                    }
                    self.read_packet();
                }
            }
        }
    }

    /// 读取一个压缩包并送入所属流的解码器, 其他流的包直接丢弃
    fn read_packet(&mut self) {
        let packet = match self.source.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => {
                debug!("解封装结束");
                self.finish_demux();
                return;
            }
            Err(e) => {
                self.shared.record_error(e);
                self.finish_demux();
                return;
            }
        };

        let index = packet.stream_index;
        let wanted = self
            .audio
            .as_ref()
            .is_some_and(|(t, _)| t.index == index && !t.eof)
            || self.video.as_ref().is_some_and(|t| t.index == index && !t.eof);
        if !wanted {
            return;
        }
        if let Err(e) = self.source.send_packet(packet) {
            self.on_decode_error(index, e);
        }
    }

    fn finish_demux(&mut self) {
        self.demux_eof = true;
        let indices = [
            self.audio.as_ref().map(|(t, _)| t.index),
            self.video.as_ref().map(|t| t.index),
        ];
        for index in indices.into_iter().flatten() {
            if let Err(e) = self.source.send_eof(index) {
                warn!("流 {index} 冲刷解码器失败: {e}");
            }
        }
    }

    fn feed_audio(&mut self, frame: AudioFrame) {
        let Some(ring) = self.shared.audio.as_ref() else {
            return;
        };
        let Some((track, bridge)) = self.audio.as_mut() else {
            return;
        };

        if track.pts_due {
            let pts = track.micros(frame.pts, frame.time_base);
            if pts == NOPTS_VALUE {
                debug!("跳过没有时间戳的音频帧");
                return;
            }
            track.pts_due = false;
            let mut buffer = ring.lock();
            buffer.set_first_pts(pts);
            buffer.rebase(0);
            debug!("音频首帧时间戳 {pts}us");
        }

        match bridge.push(&frame, ring) {
            Ok(_) => {}
            Err(PlayerError::OutOfMemory(msg)) => {
                self.shared.record_error(PlayerError::OutOfMemory(msg));
                warn!("内存不足, 停止解码音频");
                self.end_audio();
            }
            Err(e) => self.shared.record_error(e),
        }
    }

    fn feed_video(&mut self, frame: VideoFrame) {
        let Some(queue) = self.shared.video.as_ref() else {
            return;
        };
        let Some(track) = self.video.as_mut() else {
            return;
        };

        if track.pts_due {
            let pts = track.micros(frame.pts, frame.time_base);
            if pts == NOPTS_VALUE {
                debug!("跳过没有时间戳的视频帧");
                return;
            }
            track.pts_due = false;
            let mut queue = queue.lock();
            queue.set_first_pts(pts);
            queue.rebase(0);
            debug!("视频首帧时间戳 {pts}us");
        }

        self.avoid_refresh_collision();
        queue.lock().push(Arc::new(frame));
    }

    /// 入队时间紧贴下一次调度时, 先让出这一次调度
    fn avoid_refresh_collision(&self) {
        let next = self.shared.next_video_timestamp.load(Ordering::Acquire);
        if next == NOPTS_VALUE {
            return;
        }
        let margin = self.shared.display_frame_us.load(Ordering::Acquire) / 8;
        let diff = next - wall_clock_us();
        if diff.abs() <= margin {
            let ms = (diff + margin) / 1000 + 1;
            std::thread::sleep(Duration::from_millis(ms.max(0) as u64));
        }
    }

    fn end_audio(&mut self) {
        if let Some((track, _)) = self.audio.as_mut() {
            if !track.eof {
                debug!("音频流 {} 结束", track.index);
            }
            track.eof = true;
        }
        self.shared.audio_eof.store(true, Ordering::Release);
    }

    fn end_video(&mut self) {
        if let Some(track) = self.video.as_mut() {
            if !track.eof {
                debug!("视频流 {} 结束", track.index);
            }
            track.eof = true;
        }
        self.shared.video_eof.store(true, Ordering::Release);
    }

    fn reset_errors(&mut self, index: usize) {
        if let Some(track) = self.track_mut(index) {
            track.errors = 0;
        }
    }

    /// 记录解码错误. 内存不足或连续失败过多时只结束出错的流.
    fn on_decode_error(&mut self, index: usize, err: PlayerError) {
        let oom = matches!(err, PlayerError::OutOfMemory(_));
        self.shared.record_error(err);
        let give_up = match self.track_mut(index) {
            Some(track) => {
                track.errors += 1;
                oom || track.errors >= MAX_CONSECUTIVE_ERRORS
            }
            None => false,
        };
        if !give_up {
            return;
        }
        warn!("流 {index} 无法继续解码, 已停用");
        if self.audio.as_ref().is_some_and(|(t, _)| t.index == index) {
            self.end_audio();
        } else {
            self.end_video();
        }
    }

    fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        if let Some((track, _)) = self.audio.as_mut() {
            if track.index == index {
                return Some(track);
            }
        }
        self.video.as_mut().filter(|t| t.index == index)
    }
}
