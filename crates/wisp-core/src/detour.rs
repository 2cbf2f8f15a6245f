//! Inline detours
//!
//! Redirects a target function's entry into a generated trampoline that
//! invokes the detour function, re-executes the displaced original
//! instructions and resumes the original function just past the patched
//! region. Per target address the state machine is
//! `Unhooked -> Attached -> Unhooked`; attach either fully installs the
//! hook or fails before target memory is touched.
//!
//! ```text
//! redirect:    [push trampoline][ret][nop ...]
//! trampoline:  [pusha][pushf][mov edi,caller][call edi][popf][popa]
//!              [displaced bytes][push target+count][ret]
//! ```

use crate::codegen::{self, CodeEngine};
use crate::memory::MemoryEngine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use wisp_common::{CallSpec, Error, RemoteAddr, Result};

/// Room for `[push imm32][ret]`: one push opcode, a 4-byte immediate and a
/// 1-byte return, the minimum relocation unit.
pub const MIN_REPLACEABLE_BYTES: usize = 6;

/// Bookkeeping for one installed hook.
struct HookRecord {
    original: Vec<u8>,
    trampoline: RemoteAddr,
    caller_stub: RemoteAddr,
}

/// Installs and removes inline hooks.
#[derive(Clone)]
pub struct DetourEngine {
    memory: MemoryEngine,
    code: CodeEngine,
    hooks: Arc<Mutex<HashMap<RemoteAddr, HookRecord>>>,
}

impl DetourEngine {
    pub fn new(memory: MemoryEngine, code: CodeEngine) -> Self {
        Self {
            memory,
            code,
            hooks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Addresses with an active hook, unordered.
    pub fn hooked_addresses(&self) -> Vec<RemoteAddr> {
        self.hooks.lock().keys().copied().collect()
    }

    /// Redirect `target` into `detour`, displacing the first
    /// `replaceable_bytes` bytes of the target's prologue.
    ///
    /// `replaceable_bytes` must cover whole instructions at the target and
    /// be at least [`MIN_REPLACEABLE_BYTES`]; the caller gets that from
    /// inspecting the target function. The detour is invoked with the
    /// given convention, registers and flags preserved around it.
    pub fn attach(
        &self,
        target: RemoteAddr,
        replaceable_bytes: usize,
        detour: RemoteAddr,
        spec: Option<&CallSpec>,
    ) -> Result<()> {
        if target.is_null() {
            return Err(Error::InvalidArgument("hook target is null".into()));
        }
        if detour.is_null() {
            return Err(Error::InvalidArgument("detour function is null".into()));
        }
        if replaceable_bytes < MIN_REPLACEABLE_BYTES {
            return Err(Error::InvalidArgument(format!(
                "need at least {} replaceable bytes to detour, got {}",
                MIN_REPLACEABLE_BYTES, replaceable_bytes
            )));
        }

        let mut hooks = self.hooks.lock();
        if hooks.contains_key(&target) {
            return Err(Error::InvalidArgument(format!(
                "{} is already hooked",
                target
            )));
        }

        // Snapshot the instructions being displaced before anything is
        // written.
        let original = self.memory.read_bytes(target, replaceable_bytes)?;

        let wrapped = self.code.generate_wrapped_call(detour, spec)?;

        let resume = target.add(replaceable_bytes as u32);
        let mut trampoline = wrapped.code;
        trampoline.extend_from_slice(&original);
        trampoline.push(codegen::PUSH_IMM32);
        trampoline.extend_from_slice(&resume.to_le_bytes());
        trampoline.push(codegen::RET);
        let trampoline_addr = self.code.inject(&trampoline)?;

        // Last step touches the target: push trampoline, ret, nop padding.
        let mut redirect = Vec::with_capacity(replaceable_bytes);
        redirect.push(codegen::PUSH_IMM32);
        redirect.extend_from_slice(&trampoline_addr.to_le_bytes());
        redirect.push(codegen::RET);
        redirect.resize(replaceable_bytes, codegen::NOP);
        self.memory.write_bytes(target, &redirect)?;

        hooks.insert(
            target,
            HookRecord {
                original,
                trampoline: trampoline_addr,
                caller_stub: wrapped.inner,
            },
        );
        info!(target = %target, detour = %detour, trampoline = %trampoline_addr, "hook attached");
        Ok(())
    }

    /// Restore the original bytes at `target` and forget the hook. The
    /// injected trampoline and detour-caller stub are released.
    pub fn detach(&self, target: RemoteAddr) -> Result<()> {
        let mut hooks = self.hooks.lock();
        let record = hooks.get(&target).ok_or(Error::HookNotFound(target))?;

        self.memory.write_bytes(target, &record.original)?;
        let record = hooks
            .remove(&target)
            .ok_or(Error::HookNotFound(target))?;
        drop(hooks);

        self.memory.release(record.trampoline)?;
        self.memory.release(record.caller_stub)?;
        info!(target = %target, "hook detached");
        Ok(())
    }

    /// Detach every active hook, best-effort: each hook gets one attempt
    /// and the first error is reported after the sweep. A no-op with zero
    /// active hooks.
    pub fn detach_all(&self) -> Result<()> {
        let targets = self.hooked_addresses();
        debug!(count = targets.len(), "detaching all hooks");
        let mut first_error = None;
        for target in targets {
            if let Err(err) = self.detach(target) {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn attach_async(
        &self,
        target: RemoteAddr,
        replaceable_bytes: usize,
        detour: RemoteAddr,
        spec: Option<CallSpec>,
    ) -> Result<()> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || {
            engine.attach(target, replaceable_bytes, detour, spec.as_ref())
        })
        .await
        .map_err(|e| Error::Worker(e.to_string()))?
    }

    pub async fn detach_async(&self, target: RemoteAddr) -> Result<()> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.detach(target))
            .await
            .map_err(|e| Error::Worker(e.to_string()))?
    }
}
