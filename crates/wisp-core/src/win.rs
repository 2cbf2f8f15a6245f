//! Windows process backend
//!
//! Implements [`ProcessVm`] over the Win32 cross-process call surface.
//! The process handle is acquired on construction and closed exactly once
//! by an explicit `close()`; raw handle values are stored as integers so
//! the backend is shareable across threads.

use crate::traits::{ProcessVm, RemoteThread, WaitStatus};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use windows::Win32::Foundation::{
    CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeThread, OpenProcess, WaitForSingleObject, PROCESS_ALL_ACCESS,
};
use wisp_common::{Error, RemoteAddr, Result};

fn last_error_code() -> i32 {
    windows::core::Error::from_win32().code().0
}

/// An attached target process.
pub struct WinProcess {
    /// Raw process handle; `None` once closed
    raw: Mutex<Option<isize>>,
    pid: u32,
}

impl WinProcess {
    /// Open the process with full access.
    pub fn open(pid: u32) -> Result<Arc<Self>> {
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }.map_err(|e| {
            Error::ProcessOpen {
                pid,
                code: e.code().0,
            }
        })?;
        info!(pid, "opened target process");
        Ok(Arc::new(Self {
            raw: Mutex::new(Some(handle.0 as isize)),
            pid,
        }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn handle(&self) -> Result<HANDLE> {
        match *self.raw.lock() {
            Some(raw) => Ok(HANDLE(raw as *mut c_void)),
            None => Err(Error::InvalidArgument("process handle is closed".into())),
        }
    }
}

impl ProcessVm for WinProcess {
    fn read_memory(&self, addr: RemoteAddr, buf: &mut [u8]) -> Result<()> {
        let handle = self.handle()?;
        let mut bytes_read = 0usize;
        let result = unsafe {
            ReadProcessMemory(
                handle,
                addr.value() as usize as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut bytes_read),
            )
        };
        if result.is_err() || bytes_read != buf.len() {
            return Err(Error::MemoryRead {
                address: addr,
                code: last_error_code(),
            });
        }
        Ok(())
    }

    fn write_memory(&self, addr: RemoteAddr, data: &[u8]) -> Result<()> {
        let handle = self.handle()?;
        let mut bytes_written = 0usize;
        let result = unsafe {
            WriteProcessMemory(
                handle,
                addr.value() as usize as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut bytes_written),
            )
        };
        if result.is_err() || bytes_written != data.len() {
            return Err(Error::MemoryWrite {
                address: addr,
                code: last_error_code(),
            });
        }
        Ok(())
    }

    fn alloc_rwx(&self, size: usize) -> Result<RemoteAddr> {
        let handle = self.handle()?;
        let region = unsafe {
            VirtualAllocEx(
                handle,
                None,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        if region.is_null() {
            return Err(Error::Allocation {
                code: last_error_code(),
            });
        }
        debug!(address = region as usize, size, "VirtualAllocEx");
        Ok(RemoteAddr::new(region as usize as u32))
    }

    fn free(&self, addr: RemoteAddr) -> Result<()> {
        let handle = self.handle()?;
        unsafe {
            VirtualFreeEx(
                handle,
                addr.value() as usize as *mut c_void,
                0,
                MEM_RELEASE,
            )
        }
        .map_err(|e| Error::Release {
            address: addr,
            code: e.code().0,
        })
    }

    fn create_thread(
        &self,
        start: RemoteAddr,
        parameter: u32,
        stack_size: u32,
        flags: u32,
    ) -> Result<Box<dyn RemoteThread>> {
        let handle = self.handle()?;
        let start_routine: unsafe extern "system" fn(*mut c_void) -> u32 =
            unsafe { std::mem::transmute(start.value() as usize) };

        let thread = unsafe {
            CreateRemoteThread(
                handle,
                None,
                stack_size as usize,
                Some(start_routine),
                Some(parameter as usize as *const c_void),
                flags,
                None,
            )
        }
        .map_err(|e| Error::ThreadCreate { code: e.code().0 })?;

        debug!(start = %start, "created remote thread");
        Ok(Box::new(WinThread {
            raw: thread.0 as isize,
        }))
    }

    fn close(&self) -> Result<()> {
        let raw = self.raw.lock().take();
        match raw {
            Some(raw) => {
                unsafe { CloseHandle(HANDLE(raw as *mut c_void)) }.map_err(|e| {
                    Error::HandleClose { code: e.code().0 }
                })?;
                info!(pid = self.pid, "closed process handle");
                Ok(())
            }
            // Already closed: closing is idempotent.
            None => Ok(()),
        }
    }
}

/// A thread created in the target.
struct WinThread {
    raw: isize,
}

impl WinThread {
    fn handle(&self) -> HANDLE {
        HANDLE(self.raw as *mut c_void)
    }
}

impl RemoteThread for WinThread {
    fn wait(&self, timeout: Duration) -> Result<WaitStatus> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let event = unsafe { WaitForSingleObject(self.handle(), millis) };
        if event == WAIT_OBJECT_0 {
            Ok(WaitStatus::Signaled)
        } else if event == WAIT_TIMEOUT {
            Ok(WaitStatus::TimedOut)
        } else {
            Err(Error::ThreadQuery {
                code: last_error_code(),
            })
        }
    }

    fn exit_code(&self) -> Result<u32> {
        let mut code = 0u32;
        unsafe { GetExitCodeThread(self.handle(), &mut code) }
            .map_err(|e| Error::ThreadQuery { code: e.code().0 })?;
        Ok(code)
    }

    fn close(self: Box<Self>) -> Result<()> {
        unsafe { CloseHandle(self.handle()) }
            .map_err(|e| Error::HandleClose { code: e.code().0 })
    }
}
