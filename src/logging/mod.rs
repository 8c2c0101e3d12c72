//! Logging infrastructure - structured tracing throughout the heap
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled (event fields are evaluated lazily)
//! - Console or daily-rolling file output through a non-blocking writer
//!
//! The heap itself only emits events. Installing a subscriber is left to the
//! embedding program through [`init_logging`].

use crate::diagnostics::LeakReport;
use crate::identity::TypeIdentity;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

// Re-export tracing macros for use throughout the crate
pub use tracing::{debug, error, info, trace, warn, Level};

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format with timestamps
    #[default]
    Pretty,
    /// Compact format for production
    Compact,
    /// JSON format for structured logging
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// File with daily rotation
    File { directory: String, prefix: String },
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Whether to include span events
    pub span_events: bool,
    /// Custom filter directives (e.g., "managed_heap=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            output: LogOutput::Stderr,
            span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // MANAGED_HEAP_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("MANAGED_HEAP_LOG_LEVEL") {
            config.level = level.parse().unwrap_or(Level::INFO);
        }

        if let Ok(format) = std::env::var("MANAGED_HEAP_LOG_FORMAT") {
            config.format = format.parse().unwrap_or_default();
        }

        // MANAGED_HEAP_LOG_DIR: switch to daily rolling files
        if let Ok(directory) = std::env::var("MANAGED_HEAP_LOG_DIR") {
            config.output = LogOutput::File {
                directory,
                prefix: "managed-heap".to_string(),
            };
        }

        config
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Initialize the global logging system
///
/// Returns a `WorkerGuard` that must be kept alive for the duration of the
/// program so buffered events get flushed. Only the first call installs a
/// subscriber; later calls return `None`.
pub fn init_logging(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;

    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = build_filter(&config);

        let (writer, worker) = match &config.output {
            LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File { directory, prefix } => {
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
        };
        let writer = BoxMakeWriter::new(writer);
        let span_events = span_events_config(config.span_events);

        let layer = match config.format {
            LogFormat::Pretty => fmt::layer()
                .with_writer(writer)
                .pretty()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
        };

        // Another subscriber may already be installed by the host program
        if tracing_subscriber::registry().with(layer).try_init().is_ok() {
            guard = Some(worker);
        }
    });

    guard
}

/// Initialize logging with defaults for development
pub fn init_dev_logging() -> Option<WorkerGuard> {
    init_logging(LogConfig {
        level: Level::DEBUG,
        format: LogFormat::Pretty,
        output: LogOutput::Stderr,
        span_events: false,
        filter: Some("managed_heap=debug".to_string()),
    })
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base_filter = EnvFilter::from_default_env().add_directive(config.level.into());

    match &config.filter {
        Some(filter_str) => filter_str.split(',').fold(base_filter, |filter, directive| {
            filter.add_directive(directive.parse().unwrap_or_else(|_| {
                warn!("Invalid filter directive: {}", directive);
                config.level.into()
            }))
        }),
        None => base_filter,
    }
}

fn span_events_config(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

// ============================================================================
// Heap-specific logging functions
// ============================================================================

/// Log raw storage allocation
#[inline]
pub fn log_allocation(size: usize, ptr: *const u8) {
    trace!(
        event = "allocation",
        size_bytes = size,
        address = ?ptr,
        "Storage allocated"
    );
}

/// Log raw storage release
#[inline]
pub fn log_deallocation(size: usize, ptr: *const u8) {
    trace!(
        event = "deallocation",
        size_bytes = size,
        address = ?ptr,
        "Storage freed"
    );
}

/// Log an object becoming live
#[inline]
pub fn log_export(identity: TypeIdentity, ptr: *const u8) {
    trace!(
        event = "export",
        type_name = %identity.display_name(),
        address = ?ptr,
        "Object exported"
    );
}

#[inline]
pub fn log_finalize(identity: TypeIdentity, ptr: *const u8) {
    trace!(
        event = "finalize",
        type_name = %identity.display_name(),
        address = ?ptr,
        "Strong count reached zero, finalizing"
    );
}

/// Log an object whose finalizer took a new strong reference
pub fn log_resurrect(identity: TypeIdentity, ptr: *const u8) {
    debug!(
        event = "resurrect",
        type_name = %identity.display_name(),
        address = ?ptr,
        "Object resurrected by its finalizer"
    );
}

#[inline]
pub fn log_destroy(identity: TypeIdentity, ptr: *const u8, weak_cleared: usize) {
    trace!(
        event = "destroy",
        type_name = %identity.display_name(),
        address = ?ptr,
        weak_cleared = weak_cleared,
        "Object destroyed"
    );
}

/// Log the outstanding-object report
pub fn log_leak_report(report: &LeakReport) {
    if report.is_clean() {
        info!(event = "leak_report", "All the objects are deleted");
        return;
    }

    warn!(
        event = "leak_report",
        live_objects = report.live_objects,
        "{} object(s) still alive",
        report.live_objects
    );
    for (type_name, count) in &report.by_type {
        warn!(
            event = "leak_report",
            type_name = %type_name,
            count = count,
            "{} '{}' object(s) still alive",
            count,
            type_name
        );
    }
}
