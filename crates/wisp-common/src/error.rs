//! Error types for wisp
//!
//! Every failure is local and immediate: nothing in the engine retries, and
//! the non-blocking variants reject with the same errors as their
//! synchronous counterparts. Platform failures carry the native error code.

use crate::types::address::RemoteAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Null, zero, empty or too-short inputs, caught before any platform call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to open process {pid} (os error {code})")]
    ProcessOpen { pid: u32, code: i32 },

    #[error("Failed to allocate remote memory (os error {code})")]
    Allocation { code: i32 },

    #[error("Failed to release remote memory at {address} (os error {code})")]
    Release { address: RemoteAddr, code: i32 },

    #[error("Failed to read remote memory at {address} (os error {code})")]
    MemoryRead { address: RemoteAddr, code: i32 },

    #[error("Failed to write remote memory at {address} (os error {code})")]
    MemoryWrite { address: RemoteAddr, code: i32 },

    #[error("Failed to create remote thread (os error {code})")]
    ThreadCreate { code: i32 },

    #[error("Failed to query remote thread (os error {code})")]
    ThreadQuery { code: i32 },

    #[error("Failed to close handle (os error {code})")]
    HandleClose { code: i32 },

    #[error("Remote thread did not exit within {waited_ms} ms")]
    Timeout { waited_ms: u32 },

    #[error("No active hook at {0}")]
    HookNotFound(RemoteAddr),

    #[error("Struct layout '{0}' is not list-shaped")]
    NotListShaped(String),

    #[error("Worker pool failure: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
