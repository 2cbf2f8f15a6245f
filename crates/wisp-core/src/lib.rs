//! Wisp Core Library
//!
//! Engines for instrumenting a separate running process: remote memory
//! access, machine-code generation and injection, inline detours, remote
//! thread execution and schema-driven struct mapping. The platform call
//! surface sits behind [`traits::ProcessVm`] so every engine is testable
//! against an in-memory backend.

pub mod codegen;
pub mod detour;
pub mod engine;
pub mod mapper;
pub mod memory;
pub mod threads;
pub mod traits;

#[cfg(windows)]
pub mod win;

#[cfg(test)]
pub(crate) mod testvm;

pub use codegen::CodeEngine;
pub use detour::DetourEngine;
pub use engine::ProcessEngine;
pub use mapper::StructMapper;
pub use memory::{MemoryEngine, Scalar};
pub use threads::ThreadRunner;
pub use traits::{ProcessVm, RemoteThread, WaitStatus};
pub use wisp_common::{Error, Result};
