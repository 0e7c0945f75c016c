//! # tongbu-play
//!
//! Tongbu 命令行播放器.
//!
//! 播放合成测试源, 默认使用无界面后端 (实时节奏的音频回调 + 计数表面),
//! 启用 `cpal` 特性后可以通过系统音频设备出声. 播放结束后输出同步统计.

#[cfg(feature = "cpal")]
mod cpal_backend;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tongbu::engine::{HeadlessBackend, OutputBackend, Session, Settings, TestSourceOpener};
use tongbu::logging::{self, LogFileConfig, LoggingConfig};

/// 本项目所有 crate 的 target 前缀 (用于 -vv 级别的定向 trace)
const TONGBU_CRATE_TARGETS: &[&str] = &[
    "tongbu",
    "tongbu_core",
    "tongbu_resample",
    "tongbu_engine",
    "tongbu_play",
];

/// Tongbu 音视频同步播放器
#[derive(Parser)]
#[command(name = "tongbu-play", version, about = "Tongbu 音视频同步播放器")]
struct Args {
    /// 媒体源, 例如 `testsrc?duration=5&fps=30&rate=44100`
    #[arg(default_value = "testsrc")]
    source: String,

    /// 会话设置 (JSON 文件)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// 日志详细程度 (-v debug, -vv 本项目 trace, -vvv 全局 trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// 日志文件
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// 追加写入日志文件
    #[arg(long)]
    log_append: bool,

    /// 日志文件的最高级别
    #[arg(long, default_value = "debug")]
    log_level: String,

    /// 无界面后端的显示刷新率 (Hz), 0 表示未知
    #[arg(long, default_value_t = 60)]
    refresh_rate: u32,

    /// 通过系统音频设备播放 (需要 cpal 特性)
    #[arg(long)]
    audio_device: bool,

    /// 最长播放时间 (秒)
    #[arg(long)]
    timeout: Option<u64>,

    /// 以 JSON 输出统计
    #[arg(long)]
    json: bool,
}

/// 根据 verbosity 构建控制台日志级别
fn console_level(verbosity: u8) -> String {
    match verbosity {
        0 => "info".to_string(),
        1 => "debug".to_string(),
        2 => {
            let mut directives = TONGBU_CRATE_TARGETS
                .iter()
                .map(|t| format!("{t}=trace"))
                .collect::<Vec<_>>();
            directives.push("info".to_string());
            directives.join(",")
        }
        _ => "trace".to_string(),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取设置文件失败, path={}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("解析设置文件失败, path={}", path.display()))
}

fn create_backend(args: &Args) -> Result<Box<dyn OutputBackend>> {
    if args.audio_device {
        #[cfg(feature = "cpal")]
        {
            return Ok(Box::new(cpal_backend::CpalBackend::new(args.refresh_rate)));
        }
        #[cfg(not(feature = "cpal"))]
        {
            anyhow::bail!("未启用 cpal 特性, 无法使用系统音频设备");
        }
    }
    Ok(Box::new(HeadlessBackend::new(args.refresh_rate)))
}

fn format_us(us: Option<i64>) -> String {
    match us {
        Some(us) => format!("{:.2}s", us as f64 / 1_000_000.0),
        None => "--".to_string(),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(LoggingConfig {
        level: console_level(args.verbose),
        file: args.log_file.clone().map(|path| LogFileConfig {
            path,
            append: args.log_append,
            max_level: args.log_level.clone(),
        }),
    })?;

    info!("tongbu-play {}: 打开 {}", tongbu::version(), args.source);
    let settings = load_settings(args.settings.as_deref())?;
    let mut backend = create_backend(&args)?;

    let mut session = Session::create(
        &args.source,
        &TestSourceOpener,
        backend.as_mut(),
        Some(settings),
    )
    .map_err(|e| anyhow!("创建会话失败 (错误码 {}): {e}", e.code()))?;

    session.play();
    let start = Instant::now();
    let deadline = args.timeout.map(Duration::from_secs);
    while !session.wait_until_finished(Some(Duration::from_secs(1))) {
        info!(
            "进度 {} / {}{}",
            format_us(session.position_us()),
            format_us(session.duration_us()),
            if session.is_buffering() { " (缓冲中)" } else { "" }
        );
        if deadline.is_some_and(|d| start.elapsed() >= d) {
            info!("到达播放时长上限, 停止");
            break;
        }
    }

    let stats = session.stats();
    let last_error = session.last_error();
    session.free();

    if let Some(err) = last_error {
        warn!("播放过程中出现错误 (错误码 {}): {err}", err.code());
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        info!(
            "显示 {} 帧, 丢弃 {} 帧, 合并刷新 {} 次, 音频欠载 {} 次, 等锁超时 {} 次",
            stats.displayed, stats.dropped, stats.coalesced, stats.underruns, stats.lock_timeouts
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_level() {
        assert_eq!(console_level(0), "info");
        assert_eq!(console_level(1), "debug");
        assert!(console_level(2).starts_with("tongbu=trace,"));
        assert!(console_level(2).ends_with(",info"));
        assert_eq!(console_level(5), "trace");
    }

    #[test]
    fn test_args_默认值() {
        let args = Args::parse_from(["tongbu-play"]);
        assert_eq!(args.source, "testsrc");
        assert_eq!(args.refresh_rate, 60);
        assert!(!args.audio_device);
    }

    #[test]
    fn test_format_us() {
        assert_eq!(format_us(Some(1_500_000)), "1.50s");
        assert_eq!(format_us(None), "--");
    }
}
