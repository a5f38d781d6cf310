//! Shared observability helpers for the server binary and integration tests.
//!
//! [`init_logging`] centralises the `tracing` setup: an `EnvFilter` honouring
//! `RUST_LOG`, a stderr sink (what container platforms collect), and an
//! optional daily-rolling file sink. Call it once near process start; later
//! callers are no-ops and receive the originally resolved file path.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Environment variable consulted when [`LogConfig::log_dir`] is unset.
pub const LOG_DIR_ENV: &str = "FEEDGEN_LOG_DIR";
/// Environment variable selecting the encoding (`json` or `text`).
pub const LOG_FORMAT_ENV: &str = "FEEDGEN_LOG_FORMAT";

/// Output encoding for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Resolve the format from `FEEDGEN_LOG_FORMAT`, falling back to `default`.
    pub fn from_env_or(default: LogFormat) -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|raw| Self::parse(&raw))
            .unwrap_or(default)
    }

    /// `json` or `text`, case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            s if s.eq_ignore_ascii_case("json") => Some(LogFormat::Json),
            s if s.eq_ignore_ascii_case("text") => Some(LogFormat::Text),
            _ => None,
        }
    }
}

/// Configuration passed to [`init_logging`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Logical name of the component (used for the log file name).
    pub app_name: &'static str,
    /// Optional explicit directory for the file sink. If `None`, we consult
    /// `FEEDGEN_LOG_DIR`; without either, no file sink is installed.
    pub log_dir: Option<PathBuf>,
    /// Whether to emit events to `stderr`.
    pub emit_stderr: bool,
    /// Preferred log encoding.
    pub format: LogFormat,
    /// Default filter applied when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_name: "feedgen",
            log_dir: None,
            emit_stderr: true,
            format: LogFormat::Text,
            default_filter: "info".into(),
        }
    }
}

/// Initialise the global `tracing` subscriber.
///
/// Returns the concrete log file path for the current day when a file sink is
/// configured. Subsequent calls hand back the originally resolved location.
pub fn init_logging(config: LogConfig) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = LOG_PATH.get() {
        return Ok(path.clone());
    }

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_path = None;

    if let Some(dir) = resolve_log_dir(config.log_dir.as_deref()) {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

        let log_filename = format!("{}.log", config.app_name);
        let today = Local::now().format("%Y-%m-%d").to_string();
        file_path = Some(dir.join(format!("{log_filename}.{today}")));

        let appender = rolling::daily(&dir, &log_filename);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);

        layers.push(match config.format {
            LogFormat::Text => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        });
    }

    if config.emit_stderr {
        layers.push(match config.format {
            LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        });
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing setup failed: {e}"))?;

    let _ = LOG_PATH.set(file_path.clone());
    Ok(file_path)
}

fn resolve_log_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(expand_home(dir));
    }

    match std::env::var(LOG_DIR_ENV) {
        Ok(env_dir) if !env_dir.trim().is_empty() => Some(expand_home(Path::new(&env_dir))),
        _ => None,
    }
}

fn expand_home(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
