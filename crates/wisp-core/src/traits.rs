//! Platform trait definitions
//!
//! These traits define the abstract call surface the engines run against.
//! The live implementation ([`crate::win::WinProcess`]) drives the OS
//! cross-process primitives; tests implement them over an in-memory arena.

use std::time::Duration;
use wisp_common::{RemoteAddr, Result};

/// Outcome of waiting on a remote thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The thread exited within the bound
    Signaled,
    /// The bound elapsed with the thread still running
    TimedOut,
}

/// A thread created in the target process.
pub trait RemoteThread: Send {
    /// Block until the thread exits or the bound elapses.
    fn wait(&self, timeout: Duration) -> Result<WaitStatus>;

    /// Fetch the thread's exit code. Only meaningful after a signaled wait.
    fn exit_code(&self) -> Result<u32>;

    /// Release the thread handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// The target process's memory and threading call surface.
///
/// One attempt per call, no internal retry: a failed platform call
/// surfaces immediately with its native error code.
pub trait ProcessVm: Send + Sync {
    /// Copy `buf.len()` bytes out of the target starting at `addr`.
    fn read_memory(&self, addr: RemoteAddr, buf: &mut [u8]) -> Result<()>;

    /// Copy `data` into the target starting at `addr`.
    fn write_memory(&self, addr: RemoteAddr, data: &[u8]) -> Result<()>;

    /// Reserve and commit `size` bytes of read/write/execute memory.
    fn alloc_rwx(&self, size: usize) -> Result<RemoteAddr>;

    /// Free a region previously returned by `alloc_rwx`.
    fn free(&self, addr: RemoteAddr) -> Result<()>;

    /// Create a thread in the target starting at `start`.
    fn create_thread(
        &self,
        start: RemoteAddr,
        parameter: u32,
        stack_size: u32,
        flags: u32,
    ) -> Result<Box<dyn RemoteThread>>;

    /// Release the process handle. Idempotent: the handle is closed
    /// exactly once, subsequent calls are no-ops.
    fn close(&self) -> Result<()>;
}
