//! Logging utilities for wisp
//!
//! Provides consistent tracing configuration for hosts embedding the engine.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration matching config file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include module target
    #[serde(default = "default_true")]
    pub show_target: bool,

    /// Use ANSI colors
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// Log level as string
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            timestamps: true,
            show_target: true,
            ansi_colors: true,
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Create a debug configuration with verbose output
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Set log level
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    /// Parse level string to tracing Level
    pub fn get_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG` overrides the configured level when set. Safe to call once per
/// process; a second call returns without replacing the active subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.get_level().to_string().to_lowercase()));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.show_target)
        .with_ansi(config.ansi_colors);

    let result = if config.timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialized, keeping active subscriber");
    }
}

/// Initialize logging from a JSON config file, falling back to defaults
/// when the file is missing or malformed.
pub fn init_logging_from_file(path: &str) -> LogConfig {
    let config = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<LogConfig>(&text).ok())
        .unwrap_or_default();
    init_logging(&config);
    config
}
