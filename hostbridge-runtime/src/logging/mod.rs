//! Logging infrastructure - structured tracing throughout runtime
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Optional JSON output and non-blocking file output

use once_cell::sync::OnceCell;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

// Re-export tracing macros for use throughout the runtime
pub use tracing::{debug, error, info, trace, warn};

/// Global logging state (holds the file writer guard alive)
static LOGGER_INITIALIZED: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path (console only when `None`)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // HOSTBRIDGE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("HOSTBRIDGE_LOG_LEVEL") {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        // HOSTBRIDGE_LOG_FILE: path to log file
        if let Ok(path) = std::env::var("HOSTBRIDGE_LOG_FILE") {
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("HOSTBRIDGE_LOG_JSON").is_ok();
        config.show_spans = std::env::var("HOSTBRIDGE_LOG_SPANS").is_ok();

        config
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some("hostbridge_runtime.log".to_string()),
            json_format: false,
            show_spans: true,
        }
    }
}

/// Parse a level name as accepted in `HOSTBRIDGE_LOG_LEVEL`
pub fn parse_level(value: &str) -> Option<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Initialize logging with default configuration
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber; later calls are ignored.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "hostbridge_runtime={level},hostbridge={level}",
                level = config.level.as_str().to_lowercase()
            ))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match &config.log_path {
            Some(path) => {
                let appender = tracing_appender::rolling::never(".", path);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
            }
            None => (fmt::writer::BoxMakeWriter::new(io::stderr), None),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions));
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.compact().boxed()
        };

        // Another subscriber may already be installed by the embedder
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();

        guard
    });
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Runtime-specific logging functions
// ============================================================================

/// Log memory allocation
#[inline]
pub fn log_allocation(size: usize, ptr: *const u8) {
    trace!(
        event = "allocation",
        size_bytes = size,
        address = ?ptr,
        "Memory allocated"
    );
}

/// Log memory deallocation
#[inline]
pub fn log_deallocation(ptr: *const u8) {
    trace!(
        event = "deallocation",
        address = ?ptr,
        "Memory deallocated"
    );
}

/// Log type readiness
pub fn log_type_ready(name: &str, basicsize: usize) {
    debug!(
        event = "type_ready",
        type_name = name,
        basicsize,
        "Type object ready"
    );
}

/// Log error indicator being set
pub fn log_error_set(kind: &str, message: &str) {
    trace!(
        event = "error_set",
        kind,
        message,
        "Error indicator set"
    );
}

/// Log runtime initialization
pub fn log_runtime_init(generation: u64, revision: &str) {
    info!(
        event = "runtime_init",
        generation,
        revision,
        "Foreign runtime initialized"
    );
}

/// Log runtime shutdown
pub fn log_runtime_shutdown(generation: u64) {
    info!(
        event = "runtime_shutdown",
        generation,
        "Foreign runtime shutting down"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_path.is_none());

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
        assert!(debug_config.show_spans);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init(); // Should not panic
        assert!(is_initialized());
    }
}
