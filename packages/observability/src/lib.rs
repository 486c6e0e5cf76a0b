//! # Observability
//!
//! Logging initialisation shared by the courier binaries.
//!
//! Services call `observability::init()` (or `init_with_config`) once at
//! startup and use plain `tracing` macros everywhere else. Output goes to
//! stderr in compact form and, when a log path is configured, to a JSONL
//! file flushed per line:
//!
//! ```text
//! tail -f ~/.apns-courier/logs/apns-courier.jsonl | jq
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "apns-courier".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod file;

pub use file::{default_log_path, LogFileWriter};

use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, attached to the startup line.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by the `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL log file. No file output when unset.
    pub log_path: Option<PathBuf>,

    /// Emit compact logs to stderr. Forced on when there is no file.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Does nothing if a global subscriber is already installed. A log file that
/// cannot be opened is reported on stderr and skipped.
pub fn init_with_config(config: LogConfig) {
    let (file_writer, file_error) = match &config.log_path {
        Some(path) => match LogFileWriter::open(path) {
            Ok(writer) => (Some(writer), None),
            Err(e) => (None, Some(format!("{}: {}", path.display(), e))),
        },
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer)
            .with_filter(config.env_filter())
    });

    let stderr_layer = (config.also_stderr || file_layer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(config.env_filter())
    });

    if tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    if let Some(error) = file_error {
        tracing::warn!(error = %error, "Log file unavailable, logging to stderr only");
    }

    tracing::info!(
        service = %config.service_name,
        pid = std::process::id(),
        log_path = ?config.log_path,
        "observability initialized"
    );
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};
