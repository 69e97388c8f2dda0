// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run logging.
//!
//! Every run writes a plain-text log of one line per event:
//!
//! ```text
//! 2026-03-14 09:26:53 - INFO - Inserted user::42 in destination key=user::42
//! 2026-03-14 09:26:53 - ERROR - Did not find user::43 in source, skipping key=user::43 error=key user::43 not found
//! ```
//!
//! # Pipeline
//!
//! ```text
//! tracing macros ──► Dispatch (owned by the run, not global)
//!                      ├── fmt layer + LineFormat ──► non_blocking ──► RotatingFileWriter
//!                      └── fmt layer + LineFormat ──► stderr (optional)
//! ```
//!
//! The file writer rotates by size: when the next line would push the file
//! past `max_bytes`, `sync.log` becomes `sync.log.1`, `sync.log.1` becomes
//! `sync.log.2` and so on, keeping at most `max_files` backups.
//!
//! The non-blocking worker is configured to never drop lines; the
//! [`Telemetry`] guard flushes pending lines when it is dropped.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry};

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configured log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
    /// No tracing level above ERROR exists, so this filters like `Error`.
    Critical,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!(
                "unknown log level '{other}' (expected debug, info, warning, error or critical)"
            )),
        }
    }
}

/// Where and how a run logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory holding the log file. Created if missing.
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_file_name")]
    pub file_name: String,

    #[serde(default)]
    pub level: LogLevel,

    /// Size cap of the active file before it is rotated. 0 disables rotation.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Rotated backups kept. 0 disables rotation.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Mirror log lines to stderr.
    #[serde(default = "default_stderr")]
    pub stderr: bool,
}

fn default_log_dir() -> String {
    "log".to_string()
}

fn default_log_file_name() -> String {
    "bucket_sync.log".to_string()
}

fn default_max_bytes() -> u64 {
    1024 * 1024
}

fn default_max_files() -> usize {
    10
}

fn default_stderr() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_name: default_log_file_name(),
            level: LogLevel::default(),
            max_bytes: default_max_bytes(),
            max_files: default_max_files(),
            stderr: default_stderr(),
        }
    }
}

impl LoggingConfig {
    pub fn file_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.file_name)
    }

    pub fn rotation(&self) -> LogRotationPolicy {
        LogRotationPolicy {
            max_bytes: self.max_bytes,
            max_files: self.max_files,
        }
    }
}

/// Size-based rotation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl LogRotationPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Size-rotating file writer
// ═══════════════════════════════════════════════════════════════════════════════

/// Append-only log file that rotates itself by size.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    file: File,
    written: u64,
    policy: LogRotationPolicy,
}

impl RotatingFileWriter {
    /// Open (or create) `path` for appending. Parent directories are created.
    pub fn open(path: impl Into<PathBuf>, policy: LogRotationPolicy) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the `n`th backup (`sync.log.1` is the most recent).
    pub fn backup_path(&self, n: usize) -> PathBuf {
        backup_path(&self.path, n)
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        self.policy.is_enabled()
            && self.written > 0
            && self.written + incoming as u64 > self.policy.max_bytes
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        for n in (1..self.policy.max_files).rev() {
            let from = backup_path(&self.path, n);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, n + 1))?;
            }
        }
        fs::rename(&self.path, backup_path(&self.path, 1))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Line format
// ═══════════════════════════════════════════════════════════════════════════════

/// `YYYY-mm-dd HH:MM:SS - LEVEL - message key=value...`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        use std::fmt::Write as _;

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        write!(writer, "{timestamp} - {} - ", level_label(event.metadata().level()))?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::WARN => "WARNING",
        other => other.as_str(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Telemetry handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Log pipeline for one run.
///
/// Holds the subscriber and the non-blocking worker guard. Events emitted
/// under [`Telemetry::dispatch`] reach the file; dropping the handle flushes.
pub struct Telemetry {
    dispatch: Dispatch,
    log_path: PathBuf,
    _guard: WorkerGuard,
}

impl Telemetry {
    /// Build the log pipeline without installing it globally.
    ///
    /// Fails when the log directory or file cannot be created.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let log_path = config.file_path();
        let writer = RotatingFileWriter::open(&log_path, config.rotation()).map_err(|e| {
            SyncError::Logging(format!("cannot open log file {}: {e}", log_path.display()))
        })?;

        let (non_blocking, guard) = NonBlockingBuilder::default().lossy(false).finish(writer);
        let level = config.level.filter();

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
        layers.push(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(level)
                .boxed(),
        );
        if config.stderr {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .event_format(LineFormat)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .with_filter(level)
                    .boxed(),
            );
        }

        let dispatch = Dispatch::new(Registry::default().with(layers));

        Ok(Self {
            dispatch,
            log_path,
            _guard: guard,
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("log_path", &self.log_path)
            .finish()
    }
}
