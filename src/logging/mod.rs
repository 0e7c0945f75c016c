use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, Timelike};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::filter_fn,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 控制台日志级别的环境变量, 语法同 `RUST_LOG`
pub const LOG_ENV: &str = "TONGBU_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 控制台日志级别 (未设置 `TONGBU_LOG` 时生效)
    pub level: String,
    /// 启动时打开的日志文件
    pub file: Option<LogFileConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogFileConfig {
    pub path: PathBuf,
    /// 追加写入, 否则截断
    #[serde(default)]
    pub append: bool,
    #[serde(default = "default_file_level")]
    pub max_level: String,
}

fn default_file_level() -> String {
    "debug".to_string()
}

/// 日志文件状态: 进程内唯一, 可随时替换
struct LogFileState {
    file: Mutex<Option<File>>,
    /// 文件日志的最高级别, 0 表示关闭
    max_level: AtomicU8,
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static LOG_FILE: OnceLock<Arc<LogFileState>> = OnceLock::new();
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn log_file_state() -> &'static Arc<LogFileState> {
    LOG_FILE.get_or_init(|| {
        Arc::new(LogFileState {
            file: Mutex::new(None),
            max_level: AtomicU8::new(0),
        })
    })
}

fn level_rank(level: &Level) -> u8 {
    match *level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

fn filter_rank(filter: LevelFilter) -> u8 {
    filter.into_level().map_or(0, |level| level_rank(&level))
}

/// 解析级别名称 (`off`/`error`/`warn`/`info`/`debug`/`trace`)
pub fn parse_level(name: &str) -> Result<LevelFilter> {
    name.parse::<LevelFilter>()
        .with_context(|| format!("无效的日志级别: {name}"))
}

/// 安装全局日志订阅器
///
/// 只在第一次调用时生效, 之后的调用直接返回 `Ok`. `log` 宏的记录同样会输出.
pub fn init(config: LoggingConfig) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let state = Arc::clone(log_file_state());
    let (non_blocking, guard) = tracing_appender::non_blocking(LogFileWriter(Arc::clone(&state)));
    LOG_GUARD.set(guard).ok();

    let console_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(console_filter);

    let file_state = Arc::clone(&state);
    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(filter_fn(move |meta| {
            level_rank(meta.level()) <= file_state.max_level.load(Ordering::Relaxed)
        }));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装日志订阅器失败")?;

    if let Some(file) = config.file {
        let level = parse_level(&file.max_level)?;
        set_log_file(Some(&file.path), file.append, level)?;
    }
    Ok(())
}

/// 打开、替换或关闭日志文件
///
/// `path` 为 `None` 时关闭文件日志. 打开失败时文件日志关闭, 控制台日志不受影响.
pub fn set_log_file(path: Option<&Path>, append: bool, max_level: LevelFilter) -> Result<()> {
    let state = log_file_state();
    let Some(path) = path else {
        state.max_level.store(0, Ordering::Relaxed);
        *state.file.lock() = None;
        return Ok(());
    };

    match open_log_file(path, append) {
        Ok(file) => {
            *state.file.lock() = Some(file);
            state
                .max_level
                .store(filter_rank(max_level), Ordering::Relaxed);
            Ok(())
        }
        Err(err) => {
            state.max_level.store(0, Ordering::Relaxed);
            *state.file.lock() = None;
            Err(err)
        }
    }
}

fn open_log_file(path: &Path, append: bool) -> Result<File> {
    if path.as_os_str().is_empty() {
        bail!("日志文件路径为空");
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

/// 写入当前日志文件, 没有文件时丢弃
struct LogFileWriter(Arc<LogFileState>);

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = self.0.file.lock().as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.0.file.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        )?;
        let color = match *meta.level() {
            Level::ERROR => "\x1b[31m",
            Level::WARN => "\x1b[33m",
            Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m {} > ",
            color,
            meta.level().to_string(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {:5} > ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
            event.metadata().level().to_string()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
