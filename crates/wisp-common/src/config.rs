//! Engine configuration
//!
//! Hosts embedding the engine tune it through [`EngineConfig`], loadable
//! from a JSON file. All fields have defaults so partial files are fine.

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};

/// Bound on the remote-thread wait, in milliseconds.
pub const DEFAULT_THREAD_WAIT_MS: u32 = 0xAFAF;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long `create_and_execute` waits for a remote thread to exit
    #[serde(default = "default_thread_wait_ms")]
    pub thread_wait_ms: u32,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_thread_wait_ms() -> u32 {
    DEFAULT_THREAD_WAIT_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_wait_ms: DEFAULT_THREAD_WAIT_MS,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing or malformed files yield the defaults.
    pub fn from_file(path: &str) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }
}
