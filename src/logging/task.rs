use super::{LoggingConfig, build_current_log_path};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

/// 维护的文件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Log,
    Trace,
}

/// 从文件名解析出的归档信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArchiveEntry {
    kind: ArchiveKind,
    date: NaiveDate,
    compressed: bool,
}

pub(super) fn spawn_log_maintenance_task(config: LoggingConfig, rotate_requested: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut cleanup_interval =
            tokio::time::interval(Duration::from_secs(config.cleanup_interval_seconds.max(1)));

        if let Err(err) = ensure_current_log_file(&config) {
            error!("初始化当前日志文件失败: {:#}", err);
        }

        let mut next_rollover_at = next_rollover_or_soon();
        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    if let Err(err) = housekeeping(&config) {
                        error!("清理日志失败: {:#}", err);
                    }
                }
                _ = tokio::time::sleep_until(next_rollover_at) => {
                    match ensure_current_log_file(&config) {
                        Ok(()) => rotate_requested.store(true, Ordering::Release),
                        Err(err) => error!("日志翻滚失败: {:#}", err),
                    }
                    if let Err(err) = housekeeping(&config) {
                        error!("翻滚后清理日志失败: {:#}", err);
                    }
                    next_rollover_at = next_rollover_or_soon();
                }
            }
        }
    });
}

fn next_rollover_or_soon() -> tokio::time::Instant {
    match compute_next_rollover(Local::now()) {
        Ok(at) => at,
        Err(err) => {
            error!("计算下一次翻滚时间失败: {:#}", err);
            tokio::time::Instant::now() + Duration::from_secs(1)
        }
    }
}

/// 创建当日日志文件 (翻滚后写入器重新打开它)
fn ensure_current_log_file(config: &LoggingConfig) -> Result<()> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;
    let current_path =
        build_current_log_path(directory, &config.file_prefix, Local::now().date_naive());
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&current_path)
        .with_context(|| format!("创建当前日志文件失败, path={}", current_path.display()))?;
    Ok(())
}

/// 清理日志目录与转储目录
fn housekeeping(config: &LoggingConfig) -> Result<()> {
    let today = Local::now().date_naive();
    cleanup_directory(Path::new(&config.directory), config, today)?;
    if let Some(trace_directory) = &config.trace_directory {
        cleanup_directory(Path::new(trace_directory), config, today)?;
    }
    Ok(())
}

/// 删除超过保留期的文件, 压缩当日之前未压缩的文件
fn cleanup_directory(directory: &Path, config: &LoggingConfig, today: NaiveDate) -> Result<()> {
    if !directory.exists() {
        return Ok(());
    }
    let cutoff = today - ChronoDuration::days(config.retention_days);

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(archive) = parse_archive_name(&file_name, &config.file_prefix) else {
            continue;
        };
        let path = entry.path();

        if archive.date < cutoff {
            debug!("删除过期{:?}文件: {}", archive.kind, path.display());
            let _ = fs::remove_file(&path);
            continue;
        }
        if config.compress_history && !archive.compressed && archive.date < today {
            if let Err(err) = compress_to_gz(&path) {
                error!("压缩 {} 失败: {:#}", path.display(), err);
            }
        }
    }
    Ok(())
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩文件失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩文件失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());

    let mut buf = [0u8; 8 * 1024];
    loop {
        let read = input.read(&mut buf)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read])?;
    }

    encoder.finish()?;
    fs::remove_file(path).with_context(|| format!("删除已压缩文件失败, path={}", path.display()))?;
    Ok(())
}

/// 日志: `<prefix>.<日期>.log[.gz]`; 转储: `<任意前缀>.<日期>.<时分秒>.trace[.gz]`
fn parse_archive_name(file_name: &str, log_prefix: &str) -> Option<ArchiveEntry> {
    let (name, compressed) = match file_name.strip_suffix(".gz") {
        Some(name) => (name, true),
        None => (file_name, false),
    };

    if let Some(stem) = name.strip_suffix(".log") {
        let date_part = stem.strip_prefix(log_prefix)?.strip_prefix('.')?;
        return Some(ArchiveEntry {
            kind: ArchiveKind::Log,
            date: parse_date(date_part)?,
            compressed,
        });
    }

    if let Some(stem) = name.strip_suffix(".trace") {
        let mut parts = stem.rsplitn(3, '.');
        let time_part = parts.next()?;
        let date_part = parts.next()?;
        parts.next()?;
        if time_part.len() != 6 || !time_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return Some(ArchiveEntry {
            kind: ArchiveKind::Trace,
            date: parse_date(date_part)?,
            compressed,
        });
    }

    None
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn compute_next_rollover(now: DateTime<Local>) -> Result<tokio::time::Instant> {
    let next_date = now.date_naive() + ChronoDuration::days(1);
    let next_midnight = next_date
        .and_hms_opt(0, 0, 0)
        .context("计算下一次日志翻滚时间失败")?;
    let next_local = Local
        .from_local_datetime(&next_midnight)
        .earliest()
        .context("转换本地时间失败")?;
    let system_time = SystemTime::from(next_local.with_timezone(&Utc));
    let duration = system_time
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Ok(tokio::time::Instant::now() + duration)
}
