//! In-memory `ProcessVm` used by the unit tests
//!
//! A sparse byte arena plus a scriptable thread outcome, so the engines can
//! be exercised without a live target. Unread bytes default to zero.

use crate::traits::{ProcessVm, RemoteThread, WaitStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wisp_common::{Error, RemoteAddr, Result};

const ALLOC_BASE: u32 = 0x0050_0000;

#[derive(Debug, Clone)]
pub(crate) struct ThreadPlan {
    pub wait: WaitStatus,
    pub exit_code: u32,
    pub fail_create: bool,
    pub fail_query: bool,
    pub fail_close: bool,
}

impl Default for ThreadPlan {
    fn default() -> Self {
        Self {
            wait: WaitStatus::Signaled,
            exit_code: 0,
            fail_create: false,
            fail_query: false,
            fail_close: false,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeVm {
    mem: Mutex<HashMap<u32, u8>>,
    next_alloc: AtomicU32,
    allocations: Mutex<HashMap<u32, usize>>,
    freed: Mutex<Vec<RemoteAddr>>,
    fail_free_at: Mutex<HashSet<u32>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_alloc: AtomicBool,
    thread_plan: Mutex<ThreadPlan>,
    started_threads: Mutex<Vec<RemoteAddr>>,
    closed: AtomicBool,
    close_calls: AtomicU32,
}

impl FakeVm {
    pub fn new() -> Arc<Self> {
        let vm = Self {
            next_alloc: AtomicU32::new(ALLOC_BASE),
            ..Default::default()
        };
        Arc::new(vm)
    }

    /// Seed target memory with fixture bytes.
    pub fn seed(&self, addr: RemoteAddr, bytes: &[u8]) {
        let mut mem = self.mem.lock();
        for (i, b) in bytes.iter().enumerate() {
            mem.insert(addr.value().wrapping_add(i as u32), *b);
        }
    }

    /// Snapshot `len` bytes of target memory.
    pub fn dump(&self, addr: RemoteAddr, len: usize) -> Vec<u8> {
        let mem = self.mem.lock();
        (0..len)
            .map(|i| {
                mem.get(&addr.value().wrapping_add(i as u32))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_alloc(&self, fail: bool) {
        self.fail_alloc.store(fail, Ordering::SeqCst);
    }

    pub fn fail_free_at(&self, addr: RemoteAddr) {
        self.fail_free_at.lock().insert(addr.value());
    }

    pub fn set_thread_plan(&self, plan: ThreadPlan) {
        *self.thread_plan.lock() = plan;
    }

    pub fn started_threads(&self) -> Vec<RemoteAddr> {
        self.started_threads.lock().clone()
    }

    pub fn freed(&self) -> Vec<RemoteAddr> {
        self.freed.lock().clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl ProcessVm for FakeVm {
    fn read_memory(&self, addr: RemoteAddr, buf: &mut [u8]) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::MemoryRead {
                address: addr,
                code: 998,
            });
        }
        let mem = self.mem.lock();
        for (i, out) in buf.iter_mut().enumerate() {
            *out = mem
                .get(&addr.value().wrapping_add(i as u32))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }

    fn write_memory(&self, addr: RemoteAddr, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::MemoryWrite {
                address: addr,
                code: 998,
            });
        }
        self.seed(addr, data);
        Ok(())
    }

    fn alloc_rwx(&self, size: usize) -> Result<RemoteAddr> {
        if self.fail_alloc.load(Ordering::SeqCst) {
            return Err(Error::Allocation { code: 8 });
        }
        let aligned = ((size.max(1) as u32) + 0xF) & !0xF;
        let addr = RemoteAddr::new(self.next_alloc.fetch_add(aligned + 0x100, Ordering::SeqCst));
        self.allocations.lock().insert(addr.value(), size);
        Ok(addr)
    }

    fn free(&self, addr: RemoteAddr) -> Result<()> {
        if self.fail_free_at.lock().contains(&addr.value()) {
            return Err(Error::Release {
                address: addr,
                code: 487,
            });
        }
        self.allocations.lock().remove(&addr.value());
        self.freed.lock().push(addr);
        Ok(())
    }

    fn create_thread(
        &self,
        start: RemoteAddr,
        _parameter: u32,
        _stack_size: u32,
        _flags: u32,
    ) -> Result<Box<dyn RemoteThread>> {
        let plan = self.thread_plan.lock().clone();
        if plan.fail_create {
            return Err(Error::ThreadCreate { code: 5 });
        }
        self.started_threads.lock().push(start);
        Ok(Box::new(FakeThread { plan }))
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub(crate) struct FakeThread {
    plan: ThreadPlan,
}

impl RemoteThread for FakeThread {
    fn wait(&self, _timeout: Duration) -> Result<WaitStatus> {
        Ok(self.plan.wait)
    }

    fn exit_code(&self) -> Result<u32> {
        if self.plan.fail_query {
            return Err(Error::ThreadQuery { code: 87 });
        }
        Ok(self.plan.exit_code)
    }

    fn close(self: Box<Self>) -> Result<()> {
        if self.plan.fail_close {
            return Err(Error::HandleClose { code: 6 });
        }
        Ok(())
    }
}
