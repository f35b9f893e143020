//! Subscriber setup for the `socialconnector` binary.
//!
//! `listen` runs until interrupted, so when a log directory is configured it
//! also writes JSON lines to daily files. One-shot commands log to stderr
//! only. `RUST_LOG` overrides the configured level in both cases.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "socialconnector.log";

/// HTTP stack targets kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

/// Where log events go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Human-readable lines on stderr.
    Console,
    /// Stderr plus daily-rotated JSON files under the directory.
    ConsoleAndFiles(PathBuf),
}

impl LogSink {
    /// Files are only written for long-running commands with a directory set.
    pub fn select(long_running: bool, dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) if long_running => Self::ConsoleAndFiles(dir),
            _ => Self::Console,
        }
    }
}

/// Keeps the background file writer alive. Dropping it flushes pending lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    file_writer: Option<WorkerGuard>,
}

impl std::fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("writes_files", &self.file_writer.is_some())
            .finish()
    }
}

/// `RUST_LOG` if set, else `default_level` with the HTTP stack quietened.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = QUIET_TARGETS
            .iter()
            .fold(default_level.to_owned(), |acc, target| format!("{acc},{target}=warn"));
        EnvFilter::new(directives)
    })
}

/// Install the global subscriber for `sink`.
///
/// # Errors
///
/// The log directory cannot be created, or a subscriber is already installed.
pub fn install(sink: &LogSink, default_level: &str) -> anyhow::Result<LoggingGuard> {
    let console = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(filter(default_level))
        .with(console);

    let file_writer = match sink {
        LogSink::Console => {
            registry.try_init().context("installing console logger")?;
            None
        }
        LogSink::ConsoleAndFiles(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            let files = fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer);
            registry
                .with(files)
                .try_init()
                .context("installing file logger")?;
            Some(guard)
        }
    };

    Ok(LoggingGuard { file_writer })
}
