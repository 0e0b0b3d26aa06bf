//! Logging for the voipscope binaries
//!
//! Every binary appends to one daily file under `$XDG_STATE_HOME/voipscope/`
//! (`voipscope.<date>.log`), tagging its events with the binary name.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Prefix of the rotated log files.
pub const LOG_FILE_PREFIX: &str = "voipscope";

/// Target of the tshark/mergecap invocations and their output parsing.
pub const EXTRACT_TARGET: &str = "voipscope_core::extract";

/// Build the event filter.
///
/// `RUST_LOG` wins outright when set. Otherwise the configured level
/// applies, with `tool_level` overriding it for the extraction target.
fn build_filter(rust_log: Option<&str>, config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(env) => env.to_string(),
        None => match &config.tool_level {
            Some(level) => format!("{},{}={}", config.level, EXTRACT_TARGET, level),
            None => config.level.clone(),
        },
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", directives, e)))
}

/// Install the file subscriber for `binary`.
///
/// The returned guard must be held until exit so buffered events are flushed.
pub fn init(binary: &str, config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(rust_log.as_deref(), config)?;

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        binary,
        pid = std::process::id(),
        log_dir = %log_dir.display(),
        level = %config.level,
        tool_level = config.tool_level.as_deref().unwrap_or("-"),
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Keeps the non-blocking writer alive; flushes on drop.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}
