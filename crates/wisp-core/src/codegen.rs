//! Machine-code generation and injection
//!
//! Builds the 32-bit x86 byte sequences that call a remote function with a
//! register/stack argument assignment, injects them through the memory
//! engine and runs them on a remote thread. The byte layouts here are the
//! system's wire format and must not drift:
//!
//! ```text
//! call stub:   [mov eax,imm32?][mov ecx,imm32?][mov edx,imm32?]
//!              [push imm8 ...][mov edi,target][call edi][ret]
//! wrapped:     [pusha][pushf][mov edi,stub][call edi][popf][popa]
//! ```

use crate::memory::MemoryEngine;
use crate::threads::ThreadRunner;
use tracing::debug;
use wisp_common::{CallSpec, Error, RemoteAddr, Result};

pub const MOV_EAX_IMM32: u8 = 0xB8;
pub const MOV_ECX_IMM32: u8 = 0xB9;
pub const MOV_EDX_IMM32: u8 = 0xBA;
pub const MOV_EDI_IMM32: u8 = 0xBF;
pub const PUSH_IMM8: u8 = 0x6A;
pub const PUSH_IMM32: u8 = 0x68;
pub const CALL_EDI: [u8; 2] = [0xFF, 0xD7];
pub const RET: u8 = 0xC3;
pub const NOP: u8 = 0x90;
pub const PUSHA: u8 = 0x60;
pub const PUSHF: u8 = 0x9C;
pub const POPF: u8 = 0x9D;
pub const POPA: u8 = 0x61;

/// Emit a call stub for `target`: optional EAX/ECX/EDX immediates in that
/// order, byte-sized stack arguments pushed right-to-left, an indirect
/// call through EDI, then a return.
pub fn generate_call(target: RemoteAddr, spec: Option<&CallSpec>) -> Vec<u8> {
    let mut code = Vec::new();

    if let Some(spec) = spec {
        if let Some(eax) = spec.eax {
            code.push(MOV_EAX_IMM32);
            code.extend_from_slice(&eax.to_le_bytes());
        }
        if let Some(ecx) = spec.ecx {
            code.push(MOV_ECX_IMM32);
            code.extend_from_slice(&ecx.to_le_bytes());
        }
        if let Some(edx) = spec.edx {
            code.push(MOV_EDX_IMM32);
            code.extend_from_slice(&edx.to_le_bytes());
        }
        for &arg in spec.stack.iter().rev() {
            code.push(PUSH_IMM8);
            code.push(arg);
        }
    }

    code.push(MOV_EDI_IMM32);
    code.extend_from_slice(&target.to_le_bytes());
    code.extend_from_slice(&CALL_EDI);
    code.push(RET);

    code
}

/// A save/restore wrapper around an injected call stub.
pub struct WrappedStub {
    /// `[pusha][pushf][mov edi,inner][call edi][popf][popa]`: safe to
    /// splice into arbitrary code, clobbers nothing
    pub code: Vec<u8>,
    /// Address of the injected inner call stub
    pub inner: RemoteAddr,
}

/// Generates, injects and executes call stubs in the target.
#[derive(Clone)]
pub struct CodeEngine {
    memory: MemoryEngine,
    threads: ThreadRunner,
}

impl CodeEngine {
    pub fn new(memory: MemoryEngine, threads: ThreadRunner) -> Self {
        Self { memory, threads }
    }

    /// Allocate exactly `code.len()` bytes in the target and write the
    /// sequence there. The allocation is tracked by the memory engine.
    pub fn inject(&self, code: &[u8]) -> Result<RemoteAddr> {
        if code.is_empty() {
            return Err(Error::InvalidArgument("code sequence is empty".into()));
        }
        let address = self.memory.allocate(code.len())?;
        self.memory.write_bytes(address, code)?;
        debug!(address = %address, len = code.len(), "injected code");
        Ok(address)
    }

    /// Inject a plain call stub for `target`, then return the save/restore
    /// sequence that invokes it without clobbering caller state. Detour
    /// trampolines splice this in front of the displaced instructions.
    pub fn generate_wrapped_call(
        &self,
        target: RemoteAddr,
        spec: Option<&CallSpec>,
    ) -> Result<WrappedStub> {
        if target.is_null() {
            return Err(Error::InvalidArgument("call target is null".into()));
        }
        let inner = self.inject(&generate_call(target, spec))?;

        let mut code = vec![PUSHA, PUSHF, MOV_EDI_IMM32];
        code.extend_from_slice(&inner.to_le_bytes());
        code.extend_from_slice(&CALL_EDI);
        code.push(POPF);
        code.push(POPA);

        Ok(WrappedStub { code, inner })
    }

    /// Run code already resident at `address` on a remote thread and
    /// return its exit code.
    pub fn execute_at(&self, address: RemoteAddr) -> Result<u32> {
        if address.is_null() {
            return Err(Error::InvalidArgument("execution target is null".into()));
        }
        self.threads.create_and_execute(address)
    }

    /// Inject `code`, execute it, then release the temporary allocation.
    ///
    /// The release only runs after a successful execution: a failed
    /// execution leaves the temporary allocation tracked but unreleased.
    pub fn execute_bytes(&self, code: &[u8]) -> Result<u32> {
        let address = self.inject(code)?;
        let exit_code = self.execute_at(address)?;
        self.memory.release(address)?;
        Ok(exit_code)
    }

    /// Call the function at `address` with no generated argument setup.
    pub fn call_function(&self, address: RemoteAddr) -> Result<u32> {
        self.execute_at(address)
    }

    /// Generate a call stub for `address` with the given convention,
    /// inject and execute it.
    pub fn call_function_with(&self, address: RemoteAddr, spec: &CallSpec) -> Result<u32> {
        if address.is_null() {
            return Err(Error::InvalidArgument("call target is null".into()));
        }
        self.execute_bytes(&generate_call(address, Some(spec)))
    }

    pub async fn execute_at_async(&self, address: RemoteAddr) -> Result<u32> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.execute_at(address))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }

    pub async fn execute_bytes_async(&self, code: Vec<u8>) -> Result<u32> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.execute_bytes(&code))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }

    pub async fn call_function_with_async(
        &self,
        address: RemoteAddr,
        spec: CallSpec,
    ) -> Result<u32> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.call_function_with(address, &spec))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}
