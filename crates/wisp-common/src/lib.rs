//! Wisp Common Types
//!
//! Shared value types, the error taxonomy, logging bootstrap and engine
//! configuration used by all wisp components.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use logging::{init_logging, init_logging_from_file, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
