//! Tracing setup for training runs.
//!
//! Every line is prefixed with the run's process id, which is how the hosting platform groups
//! job output. Lines go to stdout and to `cognimaker_<process_id>_<timestamp>.log` under the
//! application log directory; older run logs are pruned to the newest [`MAX_LOG_FILES`].

use std::{
    fmt::Write as _,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing::{Event, Subscriber};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FmtContext, FormatEvent, FormatFields, format::Writer},
    prelude::*,
    registry::LookupSpan,
};

use crate::app_dirs;

/// Run logs kept in the log directory, the current one included.
pub const MAX_LOG_FILES: usize = 10;
const LOG_FILE_PREFIX: &str = "cognimaker";

/// Worker guard and log path of the installed subscriber.
static INSTALLED: OnceLock<(WorkerGuard, PathBuf)> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("No log directory: {0}")]
    AppDir(#[from] app_dirs::AppDirError),
    #[error("Failed to prepare log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove old log file {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to format log filename time: {0}")]
    FormatTime(time::error::Format),
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
    #[error("Failed to create log file at {path}: {source}")]
    CreateLogFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Install logging for a run tagged `process_id` under the application log directory.
///
/// Returns the log file path. Only the first call installs a subscriber; later calls return the
/// path chosen then. The level comes from `RUST_LOG`, defaulting to `info`.
pub fn init(process_id: &str) -> Result<PathBuf, LoggingError> {
    if let Some((_, path)) = INSTALLED.get() {
        return Ok(path.clone());
    }
    init_in(&app_dirs::logs_dir()?, process_id)
}

/// Same as [`init`] with an explicit log directory.
pub fn init_in(dir: &Path, process_id: &str) -> Result<PathBuf, LoggingError> {
    if let Some((_, path)) = INSTALLED.get() {
        return Ok(path.clone());
    }
    fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let file_name = log_file_name(process_id, now_local_or_utc())?;
    let log_path = dir.join(&file_name);
    ensure_file_exists(&log_path)?;
    prune_old_logs(dir, MAX_LOG_FILES)?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling::never(dir, &file_name));
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .event_format(ProcessTagged::new(
            process_id,
            fmt::format().with_timer(build_timer()),
        ));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .event_format(ProcessTagged::new(
            process_id,
            fmt::format().with_timer(build_timer()),
        ));
    let subscriber = Registry::default()
        .with(build_env_filter())
        .with(stdout_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    if INSTALLED.set((guard, log_path.clone())).is_err() {
        tracing::debug!("Logging already installed");
    }

    tracing::info!(path = %log_path.display(), "Logging initialized");
    Ok(log_path)
}

/// Event format that writes `[<process_id>] ` before the wrapped format's output.
struct ProcessTagged<F> {
    process_id: String,
    inner: F,
}

impl<F> ProcessTagged<F> {
    fn new(process_id: &str, inner: F) -> Self {
        Self {
            process_id: process_id.to_string(),
            inner,
        }
    }
}

impl<S, N, F> FormatEvent<S, N> for ProcessTagged<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(writer, "[{}] ", self.process_id)?;
        self.inner.format_event(ctx, writer, event)
    }
}

fn ensure_file_exists(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|source| LoggingError::CreateLogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete the oldest `cognimaker_*.log` files beyond `max_files`. Other files are left alone.
fn prune_old_logs(dir: &Path, max_files: usize) -> Result<(), LoggingError> {
    let mut runs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
        .filter(|entry| is_run_log(&entry.file_name().to_string_lossy()))
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();

    runs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let excess = runs.len().saturating_sub(max_files);
    for (_, path) in runs.drain(..excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveFile { path, source })?;
    }
    Ok(())
}

fn is_run_log(name: &str) -> bool {
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log")
}

/// `cognimaker_<process_id>_<timestamp>.log`, with the id reduced to filename-safe characters.
fn log_file_name(process_id: &str, now: OffsetDateTime) -> Result<String, LoggingError> {
    const NAME_FORMAT: &[FormatItem<'_>] =
        format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = now.format(NAME_FORMAT).map_err(LoggingError::FormatTime)?;
    let id: String = process_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    Ok(format!("{LOG_FILE_PREFIX}_{id}_{stamp}.log"))
}

fn build_timer() -> fmt::time::OffsetTime<time::format_description::BorrowedFormatItem<'static>> {
    const DISPLAY_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    fmt::time::OffsetTime::new(offset, DISPLAY_FORMAT.into())
}

fn now_local_or_utc() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
