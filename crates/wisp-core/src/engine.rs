//! Engine facade
//!
//! Composes the engines over one process backend and owns teardown:
//! detach every hook, release every tracked allocation, close the handle.
//! Orchestration only, no logic of its own.

use crate::codegen::CodeEngine;
use crate::detour::DetourEngine;
use crate::mapper::StructMapper;
use crate::memory::MemoryEngine;
use crate::threads::ThreadRunner;
use crate::traits::ProcessVm;
use std::sync::Arc;
use tracing::info;
use wisp_common::{EngineConfig, Result};

pub struct ProcessEngine {
    vm: Arc<dyn ProcessVm>,
    memory: MemoryEngine,
    threads: ThreadRunner,
    code: CodeEngine,
    detours: DetourEngine,
    mapper: StructMapper,
}

impl ProcessEngine {
    pub fn new(vm: Arc<dyn ProcessVm>) -> Self {
        Self::with_config(vm, &EngineConfig::default())
    }

    pub fn with_config(vm: Arc<dyn ProcessVm>, config: &EngineConfig) -> Self {
        let memory = MemoryEngine::new(vm.clone());
        let threads = ThreadRunner::new(vm.clone()).with_wait_ms(config.thread_wait_ms);
        let code = CodeEngine::new(memory.clone(), threads.clone());
        let detours = DetourEngine::new(memory.clone(), code.clone());
        let mapper = StructMapper::new(memory.clone());
        Self {
            vm,
            memory,
            threads,
            code,
            detours,
            mapper,
        }
    }

    /// Attach to a running process by pid.
    #[cfg(windows)]
    pub fn open(pid: u32) -> Result<Self> {
        let vm = crate::win::WinProcess::open(pid)?;
        Ok(Self::new(vm))
    }

    pub fn memory(&self) -> &MemoryEngine {
        &self.memory
    }

    pub fn threads(&self) -> &ThreadRunner {
        &self.threads
    }

    pub fn code(&self) -> &CodeEngine {
        &self.code
    }

    pub fn detours(&self) -> &DetourEngine {
        &self.detours
    }

    pub fn mapper(&self) -> &StructMapper {
        &self.mapper
    }

    /// Tear the engine down: detach all hooks, release all tracked
    /// allocations, close the process handle. The handle is closed even
    /// when an earlier step fails; the first error is reported.
    pub fn shutdown(self) -> Result<()> {
        info!("shutting down process engine");
        let detach_result = self.detours.detach_all();
        let release_result = self.memory.release_all();
        let close_result = self.vm.close();
        detach_result.and(release_result).and(close_result)
    }
}
