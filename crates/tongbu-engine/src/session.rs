//! 播放会话.
//!
//! 会话持有缓冲区、解码驱动线程、事件线程和音频设备.
//!
//! 创建顺序: 打开数据源 → 查找流 → 协商音频参数 → 打开音频设备 → 创建视频表面 → 启动线程.
//! 任一步失败时, 已创建的资源按相反顺序释放.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tongbu_core::{
    ChannelLayout, MediaType, NOPTS_VALUE, PlayerError, PlayerResult, Rational, SampleFormat,
    rescale,
};
use tongbu_resample::ResampleContext;

use crate::audio_bridge::AudioBridge;
use crate::audio_buffer::AudioRingBuffer;
use crate::clock::wall_clock_us;
use crate::decode::DecodeDriver;
use crate::events::{EventDispatcher, PlayerEvent};
use crate::scheduler::{AudioSnapshot, SyncScheduler};
use crate::settings::Settings;
use crate::sink::{AudioPuller, AudioSpec};
use crate::source::{SourceOpener, StreamInfo, StreamParams, find_stream};
use crate::state::{SharedState, SyncStatsSnapshot};
use crate::surface::{OutputBackend, SurfaceRequest, display_frame_us};
use crate::video_queue::VideoFrameQueue;

/// 视频流没有有效帧率时使用的帧率
const FALLBACK_FRAME_RATE: Rational = Rational::new(25, 1);

/// 等待播放结束时的轮询间隔
const FINISH_POLL: Duration = Duration::from_millis(10);

struct AudioStream {
    index: usize,
    time_base: Rational,
    sample_rate: u32,
    sample_format: SampleFormat,
    channel_layout: ChannelLayout,
}

struct VideoStream {
    index: usize,
    time_base: Rational,
    width: u32,
    height: u32,
    frame_interval_us: i64,
}

fn audio_stream(streams: &[StreamInfo]) -> Option<AudioStream> {
    let info = find_stream(streams, MediaType::Audio)?;
    match info.params {
        StreamParams::Audio {
            sample_rate,
            sample_format,
            channel_layout,
        } => Some(AudioStream {
            index: info.index,
            time_base: info.time_base,
            sample_rate,
            sample_format,
            channel_layout,
        }),
        _ => {
            warn!("音频流 {} 缺少解码参数, 已忽略", info.index);
            None
        }
    }
}

fn video_stream(streams: &[StreamInfo]) -> Option<VideoStream> {
    let info = find_stream(streams, MediaType::Video)?;
    match info.params {
        StreamParams::Video {
            width,
            height,
            frame_rate,
            ..
        } => {
            let rate = if frame_rate.is_valid() && frame_rate.num > 0 && frame_rate.den > 0 {
                frame_rate
            } else {
                warn!("视频流 {} 帧率无效 ({frame_rate}), 按 25fps 处理", info.index);
                FALLBACK_FRAME_RATE
            };
            Some(VideoStream {
                index: info.index,
                time_base: info.time_base,
                width,
                height,
                frame_interval_us: rescale(1, rate.invert(), Rational::MICRO).max(1),
            })
        }
        _ => {
            warn!("视频流 {} 缺少解码参数, 已忽略", info.index);
            None
        }
    }
}

/// 播放会话
pub struct Session {
    shared: Arc<SharedState>,
    events: Option<Sender<PlayerEvent>>,
    event_thread: Option<JoinHandle<()>>,
    decode_thread: Option<JoinHandle<()>>,
    duration_us: Option<i64>,
    freed: bool,
}

impl Session {
    /// 创建会话
    ///
    /// 返回时音频设备处于暂停状态, 解码线程已开始填充缓冲区; 调用 [`Session::play`] 开始播放.
    pub fn create(
        source: &str,
        opener: &dyn SourceOpener,
        backend: &mut dyn OutputBackend,
        settings: Option<Settings>,
    ) -> PlayerResult<Self> {
        if source.is_empty() {
            return Err(PlayerError::NullArgument("媒体源为空".into()));
        }
        let settings = settings.unwrap_or_default();
        info!("打开媒体源: {source}");

        let frame_source = opener.open(source)?;
        let duration_us = frame_source.duration_us();
        let audio = audio_stream(frame_source.streams());
        let video = video_stream(frame_source.streams());
        if audio.is_none() && video.is_none() {
            return Err(PlayerError::NoStreamOrDecoder(format!(
                "没有可播放的音频流或视频流: {source}"
            )));
        }

        let desired = match audio.as_ref() {
            Some(a) => Some(AudioSpec::negotiate(
                a.sample_rate,
                a.sample_format,
                a.channel_layout,
            )?),
            None => None,
        };
        let ring = desired
            .as_ref()
            .map(|spec| AudioRingBuffer::new(spec.sample_rate, spec.channels, spec.sample_format));
        let queue = video.as_ref().map(|v| {
            VideoFrameQueue::new(
                settings.video_queue_capacity(v.frame_interval_us),
                v.frame_interval_us,
            )
        });

        // 之后的失败由 Drop 释放已创建的资源
        let mut session = Self {
            shared: Arc::new(SharedState::new(ring, queue)),
            events: None,
            event_thread: None,
            decode_thread: None,
            duration_us,
            freed: false,
        };

        let bridge = match (audio.as_ref(), desired) {
            (Some(a), Some(spec)) => Some(session.open_audio(a, spec, backend)?),
            _ => None,
        };

        let (surface, ft) = match video.as_ref() {
            Some(v) => {
                let request = SurfaceRequest {
                    width: v.width,
                    height: v.height,
                    resize: settings.resize,
                    window_handle: settings.window_handle,
                    title: source.to_string(),
                };
                let surface = backend.create_surface(&request)?;
                let refresh_rate = surface.refresh_rate();
                if refresh_rate == 0 {
                    warn!("无法获取显示刷新率, 按 60Hz 处理");
                }
                (Some(surface), display_frame_us(refresh_rate))
            }
            None => (None, display_frame_us(0)),
        };
        session.shared.display_frame_us.store(ft, Ordering::Release);

        let (tx, rx) = mpsc::channel();
        session.events = Some(tx);
        let dispatcher = EventDispatcher::new(
            Arc::clone(&session.shared),
            rx,
            surface,
            SyncScheduler::new(ft),
            settings.resize,
        );
        session.event_thread = Some(
            std::thread::Builder::new()
                .name("tongbu-event".into())
                .spawn(move || dispatcher.run())
                .map_err(|e| PlayerError::ThreadStartFailed(format!("事件线程: {e}")))?,
        );

        let driver = DecodeDriver::new(
            Arc::clone(&session.shared),
            frame_source,
            audio.as_ref().zip(bridge).map(|(a, b)| (a.index, a.time_base, b)),
            video.as_ref().map(|v| (v.index, v.time_base)),
            settings.audio_buffer_ms,
        );
        session.decode_thread = Some(
            std::thread::Builder::new()
                .name("tongbu-decode".into())
                .spawn(move || driver.run())
                .map_err(|e| PlayerError::ThreadStartFailed(format!("解码线程: {e}")))?,
        );

        debug!(
            "会话已创建: 音频 {}, 视频 {}, 刷新间隔 {ft}us",
            audio.is_some(),
            video.is_some()
        );
        Ok(session)
    }

    /// 打开音频设备并创建重采样桥接
    fn open_audio(
        &mut self,
        stream: &AudioStream,
        desired: AudioSpec,
        backend: &mut dyn OutputBackend,
    ) -> PlayerResult<AudioBridge> {
        let puller = AudioPuller::new(Arc::clone(&self.shared), desired.sample_format);
        let (device, obtained) = backend.open_audio(&desired, puller)?;
        *self.shared.audio_device.lock() = Some(device);

        if obtained.sample_format != desired.sample_format {
            return Err(PlayerError::OutputDevice(format!(
                "音频设备采样格式不符: 请求 {}, 得到 {}",
                desired.sample_format, obtained.sample_format
            )));
        }
        if obtained.sample_rate == 0 || obtained.channels == 0 {
            return Err(PlayerError::OutputDevice(format!(
                "音频设备参数无效: {}Hz, {} 声道",
                obtained.sample_rate, obtained.channels
            )));
        }
        if obtained != desired {
            debug!(
                "音频设备参数: {}Hz {} 声道, 每次回调 {} 采样",
                obtained.sample_rate, obtained.channels, obtained.samples
            );
        }
        if let Some(ring) = self.shared.audio.as_ref() {
            ring.lock().reconfigure(
                obtained.sample_rate,
                obtained.channels,
                obtained.sample_format,
            );
        }

        let resampler = ResampleContext::new(
            stream.sample_rate,
            stream.sample_format,
            stream.channel_layout,
            obtained.sample_rate,
            obtained.sample_format,
            ChannelLayout::from_channels(obtained.channels),
        )?;
        Ok(AudioBridge::new(
            Box::new(resampler),
            stream.sample_rate,
            obtained,
        ))
    }

    /// 开始或恢复播放
    pub fn play(&self) {
        if self.freed || self.shared.is_stopping() {
            return;
        }
        self.shared.clock.set_paused(false, wall_clock_us());
        self.shared.playing.store(true, Ordering::Release);
        self.shared.pause_audio_device(false);
        if let Some(events) = self.events.as_ref() {
            let _ = events.send(PlayerEvent::Refresh);
        }
        debug!("开始播放");
    }

    /// 暂停播放, 主时钟冻结
    pub fn pause(&self) {
        if self.freed {
            return;
        }
        self.shared.playing.store(false, Ordering::Release);
        self.shared.clock.set_paused(true, wall_clock_us());
        self.shared.pause_audio_device(true);
        debug!("暂停播放");
    }

    /// 是否正在播放
    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire) && !self.shared.is_stopping()
    }

    /// 是否在等待数据: 未结束的流的缓冲区为空
    pub fn is_buffering(&self) -> bool {
        if self.shared.is_stopping() {
            return false;
        }
        let audio_starved = self.shared.audio.as_ref().is_some_and(|ring| {
            !self.shared.audio_eof.load(Ordering::Acquire) && ring.lock().is_empty()
        });
        if audio_starved {
            return true;
        }
        self.shared.video.as_ref().is_some_and(|queue| {
            !self.shared.video_eof.load(Ordering::Acquire) && queue.lock().is_empty()
        })
    }

    /// 是否已停止 (播放结束、窗口关闭或已释放)
    pub fn is_finished(&self) -> bool {
        self.shared.is_stopping()
    }

    /// 媒体总时长 (微秒)
    pub fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    /// 当前播放位置 (微秒, 媒体时间轴), 尚无数据时返回 `None`
    pub fn position_us(&self) -> Option<i64> {
        let now = wall_clock_us();
        if let Some(ring) = self.shared.audio.as_ref() {
            let snapshot = {
                let ring = ring.lock();
                AudioSnapshot {
                    pts: ring.pts(),
                    updated_at: ring.pts_updated_at(),
                    last_pull_us: ring.last_pull_us(),
                    first_pts: ring.first_pts(),
                }
            };
            if snapshot.first_pts != NOPTS_VALUE {
                return Some(snapshot.first_pts + snapshot.position(&self.shared, now));
            }
        }
        let (first_pts, video_pts) = {
            let queue = self.shared.video.as_ref()?.lock();
            (queue.first_pts(), queue.video_pts())
        };
        if first_pts == NOPTS_VALUE {
            return None;
        }
        Some(first_pts + self.shared.clock.wall_position(now).unwrap_or(video_pts))
    }

    /// 最近一次运行期错误
    pub fn last_error(&self) -> Option<PlayerError> {
        self.shared.last_error.lock().clone()
    }

    /// 播放统计
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// 等待播放结束, 返回是否已结束 (超时返回 `false`)
    pub fn wait_until_finished(&self, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        while !self.shared.is_stopping() {
            if timeout.is_some_and(|t| start.elapsed() >= t) {
                return false;
            }
            std::thread::sleep(FINISH_POLL);
        }
        true
    }

    /// 停止播放并释放所有资源
    ///
    /// 可以重复调用.
    pub fn free(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;

        let device = self.shared.audio_device.lock().take();
        if let Some(mut device) = device {
            device.close();
        }
        self.shared.request_stop();

        if let Some(events) = self.events.take() {
            let _ = events.send(PlayerEvent::Quit);
        }
        if let Some(thread) = self.event_thread.take() {
            if thread.join().is_err() {
                error!("事件线程异常退出");
            }
        }
        self.shared.decode_wakeup.notify();
        if let Some(thread) = self.decode_thread.take() {
            if thread.join().is_err() {
                error!("解码线程异常退出");
            }
        }

        if let Some(queue) = self.shared.video.as_ref() {
            let left = queue.lock().drain();
            if left > 0 {
                warn!("视频缓冲区剩余 {left} 帧");
            }
        }
        if let Some(ring) = self.shared.audio.as_ref() {
            ring.lock().clear();
        }
        info!("会话已释放");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.free();
    }
}

/// 播放一个媒体源直到结束
pub fn play(
    source: &str,
    opener: &dyn SourceOpener,
    backend: &mut dyn OutputBackend,
    settings: Option<Settings>,
) -> PlayerResult<()> {
    let mut session = Session::create(source, opener, backend, settings)?;
    session.play();
    session.wait_until_finished(None);
    if let Some(err) = session.last_error() {
        warn!("播放过程中出现错误: {err}");
    }
    session.free();
    Ok(())
}
