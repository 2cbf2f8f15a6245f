//! Remote thread execution
//!
//! Creates threads inside the target and runs code at a remote address to
//! completion. The wait is the only operation in the engine with a bound:
//! a thread still running when the bound elapses surfaces as a timeout,
//! and the possibly-still-running remote thread is not cleaned up.

use crate::traits::{ProcessVm, RemoteThread, WaitStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wisp_common::config::DEFAULT_THREAD_WAIT_MS;
use wisp_common::{Error, RemoteAddr, Result};

/// Runs code in the target by spawning remote threads.
#[derive(Clone)]
pub struct ThreadRunner {
    vm: Arc<dyn ProcessVm>,
    wait_ms: u32,
}

impl ThreadRunner {
    pub fn new(vm: Arc<dyn ProcessVm>) -> Self {
        Self {
            vm,
            wait_ms: DEFAULT_THREAD_WAIT_MS,
        }
    }

    /// Override the wait bound used by [`create_and_execute`].
    ///
    /// [`create_and_execute`]: ThreadRunner::create_and_execute
    pub fn with_wait_ms(mut self, wait_ms: u32) -> Self {
        self.wait_ms = wait_ms;
        self
    }

    pub fn wait_ms(&self) -> u32 {
        self.wait_ms
    }

    /// Create a thread in the target starting at `start`.
    pub fn create(
        &self,
        start: RemoteAddr,
        parameter: u32,
        stack_size: u32,
        flags: u32,
    ) -> Result<Box<dyn RemoteThread>> {
        if start.is_null() {
            return Err(Error::InvalidArgument("thread start address is null".into()));
        }
        self.vm.create_thread(start, parameter, stack_size, flags)
    }

    /// Create a thread at `start`, block until it exits or the bound
    /// elapses, fetch its exit code and close the handle.
    pub fn create_and_execute(&self, start: RemoteAddr) -> Result<u32> {
        let thread = self.create(start, 0, 0, 0)?;
        debug!(start = %start, wait_ms = self.wait_ms, "waiting for remote thread");

        match thread.wait(Duration::from_millis(u64::from(self.wait_ms)))? {
            WaitStatus::TimedOut => Err(Error::Timeout {
                waited_ms: self.wait_ms,
            }),
            WaitStatus::Signaled => {
                let exit_code = thread.exit_code()?;
                thread.close()?;
                debug!(start = %start, exit_code, "remote thread finished");
                Ok(exit_code)
            }
        }
    }

    /// Non-blocking [`create_and_execute`]: the same blocking wait,
    /// submitted to the worker pool.
    ///
    /// [`create_and_execute`]: ThreadRunner::create_and_execute
    pub async fn create_and_execute_async(&self, start: RemoteAddr) -> Result<u32> {
        let runner = self.clone();
        tokio::task::spawn_blocking(move || runner.create_and_execute(start))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}
