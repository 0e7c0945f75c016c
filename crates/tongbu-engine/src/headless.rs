//! 无界面输出后端.
//!
//! 音频设备是一个按实时节奏调用拉取回调的线程, 视频表面只统计绘制次数.
//! 用于命令行的无设备模式和端到端测试.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;
use tongbu_core::{PlayerError, PlayerResult, SampleFormat};

use crate::frame::VideoFrame;
use crate::sink::{AudioDevice, AudioPuller, AudioSpec};
use crate::surface::{
    DEFAULT_REFRESH_RATE, OutputBackend, Rect, SurfaceRequest, VideoSurface, WindowEvent,
};

/// 无界面后端的统计
#[derive(Debug, Default)]
pub struct HeadlessStats {
    /// 音频回调次数
    pub audio_callbacks: AtomicU64,
    /// 音频回调输出的字节数
    pub audio_bytes: AtomicU64,
    /// 回调中非静音的字节数
    pub audio_nonsilent_bytes: AtomicU64,
    pub blits: AtomicU64,
    pub presents: AtomicU64,
}

/// 无界面输出后端
pub struct HeadlessBackend {
    refresh_rate: u32,
    force_sample_format: Option<SampleFormat>,
    stats: Arc<HeadlessStats>,
    events_tx: Sender<WindowEvent>,
    events_rx: Arc<Mutex<Receiver<WindowEvent>>>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_RATE)
    }
}

impl HeadlessBackend {
    /// 以给定的显示刷新率创建
    pub fn new(refresh_rate: u32) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            refresh_rate,
            force_sample_format: None,
            stats: Arc::new(HeadlessStats::default()),
            events_tx,
            events_rx: Arc::new(Mutex::new(events_rx)),
        }
    }

    /// 让音频设备报告指定的采样格式, 而不是请求的格式
    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.force_sample_format = Some(format);
        self
    }

    /// 统计数据
    pub fn stats(&self) -> Arc<HeadlessStats> {
        Arc::clone(&self.stats)
    }

    /// 向视频表面注入窗口事件
    pub fn window_events(&self) -> Sender<WindowEvent> {
        self.events_tx.clone()
    }
}

impl OutputBackend for HeadlessBackend {
    fn open_audio(
        &mut self,
        desired: &AudioSpec,
        puller: AudioPuller,
    ) -> PlayerResult<(Box<dyn AudioDevice>, AudioSpec)> {
        let mut obtained = *desired;
        if let Some(format) = self.force_sample_format {
            obtained.sample_format = format;
        }
        let device = HeadlessAudioDevice::start(obtained, puller, Arc::clone(&self.stats))?;
        Ok((Box::new(device), obtained))
    }

    fn create_surface(&mut self, request: &SurfaceRequest) -> PlayerResult<Box<dyn VideoSurface>> {
        if request.width == 0 || request.height == 0 {
            return Err(PlayerError::OutputDevice(format!(
                "无效的表面尺寸: {}x{}",
                request.width, request.height
            )));
        }
        debug!(
            "创建无界面表面 {}x{} ({})",
            request.width, request.height, request.title
        );
        Ok(Box::new(HeadlessSurface {
            size: (request.width, request.height),
            refresh_rate: self.refresh_rate,
            stats: Arc::clone(&self.stats),
            events: Arc::clone(&self.events_rx),
        }))
    }
}

struct DeviceFlags {
    paused: AtomicBool,
    closed: AtomicBool,
}

/// 实时节奏的音频设备线程
struct HeadlessAudioDevice {
    flags: Arc<DeviceFlags>,
    thread: Option<JoinHandle<()>>,
}

impl HeadlessAudioDevice {
    fn start(spec: AudioSpec, puller: AudioPuller, stats: Arc<HeadlessStats>) -> PlayerResult<Self> {
        let flags = Arc::new(DeviceFlags {
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        let period = Duration::from_micros(
            u64::from(spec.samples) * 1_000_000 / u64::from(spec.sample_rate.max(1)),
        );
        let silence = spec.sample_format.silence_byte();
        let mut buf = vec![0u8; spec.callback_bytes()];

        let thread_flags = Arc::clone(&flags);
        let thread = std::thread::Builder::new()
            .name("tongbu-headless-audio".into())
            .spawn(move || {
                let mut next = Instant::now();
                while !thread_flags.closed.load(Ordering::Acquire) {
                    if !thread_flags.paused.load(Ordering::Acquire) {
                        puller.fill(&mut buf);
                        stats.audio_callbacks.fetch_add(1, Ordering::Relaxed);
                        stats
                            .audio_bytes
                            .fetch_add(buf.len() as u64, Ordering::Relaxed);
                        let audible = buf.iter().filter(|&&b| b != silence).count();
                        stats
                            .audio_nonsilent_bytes
                            .fetch_add(audible as u64, Ordering::Relaxed);
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| PlayerError::ThreadStartFailed(format!("音频设备线程: {e}")))?;

        Ok(Self {
            flags,
            thread: Some(thread),
        })
    }
}

impl AudioDevice for HeadlessAudioDevice {
    fn pause(&mut self, paused: bool) {
        self.flags.paused.store(paused, Ordering::Release);
    }

    fn close(&mut self) {
        self.flags.closed.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("音频设备线程异常退出");
            }
        }
    }
}

impl Drop for HeadlessAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// 只计数的视频表面
struct HeadlessSurface {
    size: (u32, u32),
    refresh_rate: u32,
    stats: Arc<HeadlessStats>,
    events: Arc<Mutex<Receiver<WindowEvent>>>,
}

impl VideoSurface for HeadlessSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn refresh_rate(&self) -> u32 {
        self.refresh_rate
    }

    fn blit(&mut self, frame: &VideoFrame, rect: Rect) -> PlayerResult<()> {
        if frame.data.is_empty() || rect.width == 0 || rect.height == 0 {
            return Err(PlayerError::OutputDevice("空帧或空绘制区域".into()));
        }
        self.stats.blits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn present(&mut self) -> PlayerResult<()> {
        self.stats.presents.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<WindowEvent> {
        let event = self.events.lock().try_recv().ok()?;
        if let WindowEvent::Resized { width, height } = event {
            self.size = (width, height);
        }
        Some(event)
    }
}
