//! 驱动日志.
//!
//! 库 crate 通过 `log` 门面输出, 这里安装 `tracing` 订阅器 (同时接管 `log` 记录):
//! 控制台层与按日期命名的文件层. 后台维护任务负责每日翻滚、压缩历史日志以及
//! 清理过期的命令流转储.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod task;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件层过滤规则 (EnvFilter 语法)
    pub level: String,
    #[serde(default = "default_console_level")]
    pub console_level: String,
    pub directory: String,
    pub file_prefix: String,
    /// 命令流转储目录, 维护任务按相同的保留期清理
    #[serde(default)]
    pub trace_directory: Option<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress_history: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_console_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    14
}

fn default_cleanup_interval() -> u64 {
    3600
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 安装全局订阅器并启动维护任务, 必须在 tokio 运行时内调用
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;
    if let Some(trace_directory) = &config.trace_directory {
        std::fs::create_dir_all(trace_directory)
            .with_context(|| format!("创建转储目录失败, path={trace_directory}"))?;
    }

    let rotate_requested = Arc::new(AtomicBool::new(false));
    let file_writer = DailyFileWriter::new(
        Path::new(&config.directory),
        &config.file_prefix,
        Arc::clone(&rotate_requested),
    )?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
    LOG_GUARD.set(guard).ok();

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(LineFormatter { console: true })
        .with_filter(EnvFilter::new(&config.console_level));

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter { console: false })
        .with_filter(EnvFilter::new(&config.level));

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("全局日志订阅器已安装")?;

    task::spawn_log_maintenance_task(config, rotate_requested);
    Ok(())
}

/// 写入当日日志文件, 维护任务翻滚后重新打开
struct DailyFileWriter {
    directory: PathBuf,
    prefix: String,
    rotate_requested: Arc<AtomicBool>,
    file: File,
}

impl DailyFileWriter {
    fn new(directory: &Path, prefix: &str, rotate_requested: Arc<AtomicBool>) -> Result<Self> {
        let path = build_current_log_path(directory, prefix, Local::now().date_naive());
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            rotate_requested,
            file: open_append_file(&path)?,
        })
    }

    fn reopen(&mut self) -> std::io::Result<()> {
        let path = build_current_log_path(&self.directory, &self.prefix, Local::now().date_naive());
        self.file = open_append_file(&path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for DailyFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.rotate_requested.swap(false, Ordering::AcqRel) {
            self.reopen()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 一次解码会话的命令流转储路径: `<prefix>.<日期>.<时分秒>.trace`
pub fn build_trace_dump_path(directory: &Path, prefix: &str, now: DateTime<Local>) -> PathBuf {
    directory.join(format!(
        "{}.{}.{}.trace",
        prefix,
        now.format("%Y-%m-%d"),
        now.format("%H%M%S")
    ))
}

/// 单行格式: `[月-日 时:分:秒.毫秒] 级别 target > 字段`
///
/// 控制台输出带颜色与源码位置, 文件输出只带 target.
struct LineFormatter {
    console: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormatter
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
        if self.console {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            write!(
                writer,
                "{}{:5}\x1b[0m {}:{} > ",
                color,
                meta.level().to_string(),
                meta.file().unwrap_or("unknown"),
                meta.line().unwrap_or(0)
            )?;
        } else {
            write!(writer, "{:5} {} > ", meta.level().to_string(), meta.target())?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_build_current_log_path() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).expect("测试日期无效");
        let path = build_current_log_path(Path::new("logs"), "vdx", date);
        assert_eq!(path, PathBuf::from("logs/vdx.2026-03-09.log"));
    }

    #[test]
    fn test_build_trace_dump_path() {
        let now = Local
            .with_ymd_and_hms(2026, 3, 9, 7, 5, 30)
            .earliest()
            .expect("测试时间无效");
        let path = build_trace_dump_path(Path::new("traces"), "session", now);
        assert_eq!(path, PathBuf::from("traces/session.2026-03-09.070530.trace"));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: LoggingConfig = serde_json::from_str(
            r#"{"level": "debug", "directory": "logs", "file_prefix": "vdx"}"#,
        )
        .expect("解析日志配置失败");
        assert_eq!(config.console_level, "info");
        assert_eq!(config.retention_days, 14);
        assert!(config.compress_history);
        assert!(config.trace_directory.is_none());
    }
}
