//! 系统音频设备后端 (cpal).
//!
//! cpal 的 `Stream` 不一定能跨线程移动, 因此在专用线程上创建并持有,
//! 暂停/关闭通过通道发给该线程. 视频表面沿用无界面后端.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, warn};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use tongbu::core::{PlayerError, PlayerResult, SampleFormat};
use tongbu::engine::{
    AudioDevice, AudioPuller, AudioSpec, HeadlessBackend, OutputBackend, SurfaceRequest,
    VideoSurface,
};

/// 可从小端字节解出的 PCM 采样
trait PcmSample: cpal::SizedSample + Send + 'static {
    const SIZE: usize;
    fn from_le(bytes: &[u8]) -> Self;
}

impl PcmSample for u8 {
    const SIZE: usize = 1;
    fn from_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl PcmSample for i16 {
    const SIZE: usize = 2;
    fn from_le(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl PcmSample for i32 {
    const SIZE: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl PcmSample for f32 {
    const SIZE: usize = 4;
    fn from_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

enum Command {
    Pause(bool),
    Close,
}

/// 使用系统默认输出设备的后端
pub struct CpalBackend {
    video: HeadlessBackend,
}

impl CpalBackend {
    pub fn new(refresh_rate: u32) -> Self {
        Self {
            video: HeadlessBackend::new(refresh_rate),
        }
    }
}

impl OutputBackend for CpalBackend {
    fn open_audio(
        &mut self,
        desired: &AudioSpec,
        puller: AudioPuller,
    ) -> PlayerResult<(Box<dyn AudioDevice>, AudioSpec)> {
        let spec = *desired;
        let (ready_tx, ready_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("tongbu-cpal".into())
            .spawn(move || run_stream(spec, puller, ready_tx, cmd_rx))
            .map_err(|e| PlayerError::ThreadStartFailed(format!("音频设备线程: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(
                    "cpal 输出已打开: {}Hz, {} 声道, {}",
                    spec.sample_rate, spec.channels, spec.sample_format
                );
                let device = CpalDevice {
                    commands: cmd_tx,
                    thread: Some(thread),
                };
                Ok((Box::new(device), spec))
            }
            Ok(Err(msg)) => {
                let _ = thread.join();
                Err(PlayerError::OutputDevice(msg))
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlayerError::OutputDevice("音频设备线程提前退出".into()))
            }
        }
    }

    fn create_surface(&mut self, request: &SurfaceRequest) -> PlayerResult<Box<dyn VideoSurface>> {
        self.video.create_surface(request)
    }
}

fn build_stream<T: PcmSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    puller: AudioPuller,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let mut bytes = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            bytes.resize(data.len() * T::SIZE, 0);
            puller.fill(&mut bytes);
            for (sample, chunk) in data.iter_mut().zip(bytes.chunks_exact(T::SIZE)) {
                *sample = T::from_le(chunk);
            }
        },
        |err| error!("音频输出错误: {err}"),
        None,
    )
}

fn open_stream(spec: AudioSpec, puller: AudioPuller) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "没有可用的音频输出设备".to_string())?;
    let channels = u16::try_from(spec.channels).map_err(|_| format!("声道数过多: {}", spec.channels))?;
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let stream = match spec.sample_format {
        SampleFormat::U8 => build_stream::<u8>(&device, &config, puller),
        SampleFormat::S16 => build_stream::<i16>(&device, &config, puller),
        SampleFormat::S32 => build_stream::<i32>(&device, &config, puller),
        SampleFormat::F32 => build_stream::<f32>(&device, &config, puller),
        other => return Err(format!("设备不支持的采样格式: {other}")),
    }
    .map_err(|e| format!("创建音频输出流失败: {e}"))?;
    // 设备创建后保持暂停, 等待会话开始播放
    if let Err(e) = stream.pause() {
        warn!("暂停音频输出流失败: {e}");
    }
    Ok(stream)
}

fn run_stream(
    spec: AudioSpec,
    puller: AudioPuller,
    ready: Sender<Result<(), String>>,
    commands: Receiver<Command>,
) {
    let stream = match open_stream(spec, puller) {
        Ok(stream) => stream,
        Err(msg) => {
            let _ = ready.send(Err(msg));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }
    while let Ok(cmd) = commands.recv() {
        match cmd {
            Command::Pause(true) => {
                if let Err(e) = stream.pause() {
                    warn!("暂停音频输出流失败: {e}");
                }
            }
            Command::Pause(false) => {
                if let Err(e) = stream.play() {
                    warn!("启动音频输出流失败: {e}");
                }
            }
            Command::Close => break,
        }
    }
    drop(stream);
    debug!("cpal 输出已关闭");
}

struct CpalDevice {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl AudioDevice for CpalDevice {
    fn pause(&mut self, paused: bool) {
        let _ = self.commands.send(Command::Pause(paused));
    }

    fn close(&mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("音频设备线程异常退出");
            }
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close();
    }
}
