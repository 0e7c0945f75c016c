//! 端到端同步测试: 合成测试源 + 实时节奏的输出后端.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tongbu::core::{PlayerError, PlayerResult};
use tongbu::engine::{
    AudioDevice, AudioPuller, AudioSpec, DecodeStatus, FrameSource, HeadlessBackend,
    OutputBackend, Packet, Session, Settings, SourceOpener, StreamInfo, SurfaceRequest,
    TestSourceOpener, VideoSurface,
};

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_25fps_48k_每秒约25次显示() {
    let mut backend = HeadlessBackend::new(60);
    let stats = backend.stats();
    let mut session = Session::create(
        "testsrc?duration=4&fps=25&rate=48000",
        &TestSourceOpener,
        &mut backend,
        None,
    )
    .expect("创建会话失败");
    session.play();

    assert!(
        wait_for(Duration::from_secs(2), || session.stats().displayed >= 1),
        "应在 2 秒内显示第一帧"
    );
    let before = session.stats().displayed;
    let presents_before = stats.presents.load(Ordering::Relaxed);
    std::thread::sleep(Duration::from_secs(1));
    let shown = session.stats().displayed - before;
    let presents = stats.presents.load(Ordering::Relaxed) - presents_before;

    assert!((18..=32).contains(&shown), "1 秒内显示 {shown} 帧");
    assert_eq!(presents, shown);
    assert!(stats.audio_nonsilent_bytes.load(Ordering::Relaxed) > 0);
    assert!(session.is_playing());
    assert!(session.last_error().is_none());

    session.free();
    assert!(!session.is_playing());
}

#[test]
fn test_视频晚于音频开始() {
    let mut backend = HeadlessBackend::new(60);
    let mut session = Session::create(
        "testsrc?duration=2&video_delay=300",
        &TestSourceOpener,
        &mut backend,
        None,
    )
    .expect("创建会话失败");
    session.play();

    // 音频播到 300ms 之前视频首帧不会被丢弃, 只会等待
    assert!(wait_for(Duration::from_secs(2), || session.stats().displayed >= 1));
    std::thread::sleep(Duration::from_millis(500));
    let stats = session.stats();
    assert!(stats.displayed >= 3, "{stats:?}");
    assert!(stats.dropped <= 2, "{stats:?}");
    session.free();
}

#[test]
fn test_仅视频按墙钟播放完毕() {
    let mut backend = HeadlessBackend::new(60);
    let mut session = Session::create(
        "testsrc?duration=0.5&fps=20&audio=0",
        &TestSourceOpener,
        &mut backend,
        None,
    )
    .expect("创建会话失败");
    session.play();
    assert!(session.wait_until_finished(Some(Duration::from_secs(5))));
    let stats = session.stats();
    assert!(stats.displayed + stats.dropped >= 9, "{stats:?}");
    session.free();
}

/// 读到第 `after` 个包时停顿一次的数据源
struct StallingSource {
    inner: Box<dyn FrameSource>,
    stall: Option<Duration>,
    after: usize,
    reads: usize,
}

impl FrameSource for StallingSource {
    fn streams(&self) -> &[StreamInfo] {
        self.inner.streams()
    }

    fn next_packet(&mut self) -> PlayerResult<Option<Packet>> {
        if self.reads >= self.after {
            if let Some(stall) = self.stall.take() {
                std::thread::sleep(stall);
            }
        }
        self.reads += 1;
        self.inner.next_packet()
    }

    fn send_packet(&mut self, packet: Packet) -> PlayerResult<()> {
        self.inner.send_packet(packet)
    }

    fn send_eof(&mut self, stream_index: usize) -> PlayerResult<()> {
        self.inner.send_eof(stream_index)
    }

    fn receive_frame(&mut self, stream_index: usize) -> PlayerResult<DecodeStatus> {
        self.inner.receive_frame(stream_index)
    }
}

/// 停顿时长和停顿前读取的包数
struct StallingOpener(Duration, usize);

impl SourceOpener for StallingOpener {
    fn open(&self, source: &str) -> PlayerResult<Box<dyn FrameSource>> {
        Ok(Box::new(StallingSource {
            inner: TestSourceOpener.open(source)?,
            stall: Some(self.0),
            after: self.1,
            reads: 0,
        }))
    }
}

struct NullDevice;

impl AudioDevice for NullDevice {
    fn pause(&mut self, _paused: bool) {}
    fn close(&mut self) {}
}

/// 把拉取回调交给测试直接调用的后端
#[derive(Default)]
struct ManualBackend {
    puller: Arc<Mutex<Option<(AudioPuller, AudioSpec)>>>,
}

impl OutputBackend for ManualBackend {
    fn open_audio(
        &mut self,
        desired: &AudioSpec,
        puller: AudioPuller,
    ) -> PlayerResult<(Box<dyn AudioDevice>, AudioSpec)> {
        *self.puller.lock() = Some((puller, *desired));
        Ok((Box::new(NullDevice), *desired))
    }

    fn create_surface(&mut self, _request: &SurfaceRequest) -> PlayerResult<Box<dyn VideoSurface>> {
        Err(PlayerError::OutputDevice("没有视频输出".into()))
    }
}

#[test]
fn test_解码停滞时回调输出静音且不阻塞() {
    let mut backend = ManualBackend::default();
    let handle = Arc::clone(&backend.puller);
    let mut session = Session::create(
        "testsrc?duration=2&video=0&rate=48000&channels=2",
        &StallingOpener(Duration::from_millis(500), 0),
        &mut backend,
        None,
    )
    .expect("创建会话失败");
    session.play();

    let (puller, spec) = handle.lock().clone().expect("音频设备应已打开");
    let mut buf = vec![0xAAu8; spec.callback_bytes()];
    let stall_start = Instant::now();
    while stall_start.elapsed() < Duration::from_millis(300) {
        buf.fill(0xAA);
        let call = Instant::now();
        puller.fill(&mut buf);
        assert!(call.elapsed() < Duration::from_millis(50), "回调阻塞");
        assert_eq!(buf.len(), spec.callback_bytes());
        assert!(buf.iter().all(|&b| b == 0), "停滞期间应输出静音");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(session.stats().underruns > 0);

    // 停滞结束后恢复出声
    assert!(wait_for(Duration::from_secs(3), || {
        puller.fill(&mut buf);
        buf.iter().any(|&b| b != 0)
    }));
    session.free();
}

#[test]
fn test_播放中途断流时钟停住且不倒退() {
    let mut backend = ManualBackend::default();
    let handle = Arc::clone(&backend.puller);
    let settings = Settings {
        audio_buffer_ms: 100,
        ..Settings::default()
    };
    // 每包 1024 采样, 10 个包约 213ms 后停顿
    let mut session = Session::create(
        "testsrc?duration=3&video=0&rate=48000&channels=2",
        &StallingOpener(Duration::from_millis(800), 10),
        &mut backend,
        Some(settings),
    )
    .expect("创建会话失败");
    session.play();

    let (puller, spec) = handle.lock().clone().expect("音频设备应已打开");
    let chunk_us = 10_000;
    let mut buf = vec![0u8; spec.callback_bytes()];
    let fill = |buf: &mut Vec<u8>| {
        puller.fill(buf);
        std::thread::sleep(Duration::from_millis(10));
        buf.iter().any(|&b| b != 0)
    };

    assert!(wait_for(Duration::from_secs(2), || fill(&mut buf)), "应开始出声");
    assert!(
        wait_for(Duration::from_secs(2), || !fill(&mut buf)),
        "缓冲区耗尽后应输出静音"
    );

    let stalled_at = session.position_us().expect("应有播放位置");
    for _ in 0..20 {
        fill(&mut buf);
    }
    let still_at = session.position_us().expect("应有播放位置");
    assert!(
        still_at - stalled_at <= chunk_us,
        "断流期间时钟前进了 {}us",
        still_at - stalled_at
    );
    assert!(session.stats().underruns > 0);

    assert!(wait_for(Duration::from_secs(3), || fill(&mut buf)), "停顿结束后应恢复出声");
    let resumed_at = session.position_us().expect("应有播放位置");
    assert!(
        resumed_at >= still_at - chunk_us,
        "恢复后时钟倒退: {still_at} -> {resumed_at}"
    );
    session.free();
}
