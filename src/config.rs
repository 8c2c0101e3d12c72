use crate::error::{HeapError, Result};
use crate::logging::{LogConfig, LogFormat, LogOutput, Level};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File looked up by [`HeapConfig::discover`]
pub const CONFIG_FILE_NAME: &str = "managed-heap.toml";

static CURRENT: OnceCell<HeapConfig> = OnceCell::new();

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeapConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Log to daily rolling files in this directory instead of stderr
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_false")]
    pub span_events: bool,

    /// Extra filter directives, comma separated
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Count live objects per type (debug builds or `leak-monitor`)
    #[serde(default = "default_true")]
    pub track_leaks: bool,

    /// Log the leak report when a `LeakGuard` is dropped
    #[serde(default = "default_true")]
    pub report_on_exit: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
            file_prefix: default_prefix(),
            span_events: false,
            filter: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            track_leaks: true,
            report_on_exit: true,
        }
    }
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_level() -> String { "info".to_string() }
fn default_prefix() -> String { "managed-heap".to_string() }

impl HeapConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| HeapError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| HeapError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Find and load `managed-heap.toml` from the current directory or parents
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }

            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Apply `MANAGED_HEAP_*` environment variables on top
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup, named like the environment variables
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup("MANAGED_HEAP_LOG_LEVEL") {
            if level.parse::<Level>().is_ok() {
                self.logging.level = level.to_lowercase();
            }
        }

        if let Some(format) = lookup("MANAGED_HEAP_LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                self.logging.format = format;
            }
        }

        if let Some(directory) = lookup("MANAGED_HEAP_LOG_DIR") {
            self.logging.directory = Some(directory);
        }

        if let Some(track) = lookup("MANAGED_HEAP_TRACK_LEAKS") {
            self.diagnostics.track_leaks = matches!(track.as_str(), "1" | "true" | "yes" | "on");
        }

        self
    }

    fn validate(&self) -> Result<()> {
        self.logging
            .level
            .parse::<Level>()
            .map(|_| ())
            .map_err(|_| HeapError::Config(format!("Unknown log level '{}'", self.logging.level)))
    }

    /// Logging setup described by this configuration
    pub fn log_config(&self) -> LogConfig {
        let output = match &self.logging.directory {
            Some(directory) => LogOutput::File {
                directory: directory.clone(),
                prefix: self.logging.file_prefix.clone(),
            },
            None => LogOutput::Stderr,
        };

        LogConfig {
            level: self.logging.level.parse().unwrap_or(Level::INFO),
            format: self.logging.format,
            output,
            span_events: self.logging.span_events,
            filter: self.logging.filter.clone(),
        }
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HeapError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)
            .map_err(|e| HeapError::Config(format!("Failed to write {}: {}", path.display(), e)))
    }
}

/// Make `config` the process-wide configuration
///
/// Fails if a configuration is already in place, including the default one
/// that [`current`] settles on when nothing was installed.
pub fn install(config: HeapConfig) -> Result<()> {
    CURRENT
        .set(config)
        .map_err(|_| HeapError::Config("configuration already installed".to_string()))
}

/// Process-wide configuration, defaults plus environment overrides unless
/// [`install`] ran first
pub fn current() -> &'static HeapConfig {
    CURRENT.get_or_init(|| HeapConfig::default().with_env_overrides())
}
