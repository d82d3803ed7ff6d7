//! Tracing setup with optional file output.
//!
//! Console output goes to stderr. File output goes to `run.log` in the
//! configured directory; the previous run's file is archived on startup as
//! `wallet-sync.<timestamp>.log` (`wallet-sync.<timestamp>.<n>.log` when that
//! name is taken) and only the newest archives are kept. Lines emitted while a
//! sync session or rescan runs carry its `sync_session` or `rescan` span, and
//! the file records each span's duration when it closes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{LoggingError, LoggingResult};

const ARCHIVE_PREFIX: &str = "wallet-sync.";
const ACTIVE_LOG_NAME: &str = "run.log";
const ARCHIVE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Keeps the non-blocking file writer alive. Dropping it flushes pending lines.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level filter. None reads `RUST_LOG` and falls back to INFO.
    pub level: Option<LevelFilter>,
    /// Log to stderr.
    pub console: bool,
    /// Log to a file.
    pub file: Option<LogFileConfig>,
}

#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub log_dir: PathBuf,
    /// Archived files to keep besides the active one.
    pub max_files: usize,
}

/// Console-only logging at `level`.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Install the global tracing subscriber.
///
/// With neither console nor file output configured nothing is installed and
/// tracing macros stay no-ops. Fails if a global subscriber already exists.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _file_guard: None,
        });
    }

    let filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, file_guard) = match config.file.as_ref() {
        Some(file_config) => {
            let (writer, guard) = open_log_file(file_config)?;
            // Session and rescan spans log their duration when they close
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = config.console.then(|| fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn open_log_file(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&config.log_dir)?;
    archive_previous_log(&config.log_dir)?;
    prune_archives(&config.log_dir, config.max_files)?;

    let file = File::create(config.log_dir.join(ACTIVE_LOG_NAME))?;
    Ok(tracing_appender::non_blocking(file))
}

/// Rename an existing `run.log` to a timestamped archive name.
fn archive_previous_log(log_dir: &Path) -> LoggingResult<Option<PathBuf>> {
    let active = log_dir.join(ACTIVE_LOG_NAME);
    if !active.exists() {
        return Ok(None);
    }

    let stamp = fs::metadata(&active)
        .and_then(|m| m.modified())
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now())
        .format(ARCHIVE_TIME_FORMAT)
        .to_string();

    let target = std::iter::once(format!("{}{}.log", ARCHIVE_PREFIX, stamp))
        .chain((1..1000).map(|n| format!("{}{}.{}.log", ARCHIVE_PREFIX, stamp, n)))
        .map(|name| log_dir.join(name))
        .find(|path| !path.exists())
        .ok_or_else(|| {
            LoggingError::RotationFailed(format!("no free archive name for {}", stamp))
        })?;

    fs::rename(&active, &target).map_err(|e| LoggingError::RotationFailed(e.to_string()))?;
    Ok(Some(target))
}

/// Age order of an archive: its timestamp, then the collision index.
fn archive_order(path: &Path) -> (String, u32) {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    let stem = name
        .strip_prefix(ARCHIVE_PREFIX)
        .and_then(|rest| rest.strip_suffix(".log"))
        .unwrap_or(name);
    match stem.split_once('.') {
        Some((stamp, index)) => (stamp.to_string(), index.parse().unwrap_or(0)),
        None => (stem.to_string(), 0),
    }
}

/// Delete the oldest archives beyond `keep`.
fn prune_archives(log_dir: &Path, keep: usize) -> LoggingResult<()> {
    let mut archives: Vec<PathBuf> = fs::read_dir(log_dir)
        .map_err(|e| LoggingError::RotationFailed(format!("failed to read log dir: {}", e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".log"))
        })
        .collect();

    if archives.len() <= keep {
        return Ok(());
    }

    archives.sort_by_cached_key(|path| archive_order(path));
    let excess = archives.len() - keep;
    for path in archives.into_iter().take(excess) {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to remove old log file {}: {}", path.display(), e);
        }
    }
    Ok(())
}
