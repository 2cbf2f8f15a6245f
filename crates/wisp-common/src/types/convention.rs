//! Calling-convention descriptor for generated call stubs

use serde::{Deserialize, Serialize};

/// Register and stack assignment for a generated remote call.
///
/// Each register immediate is loaded only when present, in EAX, ECX, EDX
/// order. Stack arguments are single bytes pushed right-to-left, so the
/// first element of `stack` is the callee's leftmost argument. Byte-sized
/// stack arguments are a deliberate limitation of the stub format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    pub eax: Option<u32>,
    pub ecx: Option<u32>,
    pub edx: Option<u32>,
    #[serde(default)]
    pub stack: Vec<u8>,
}

impl CallSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eax(mut self, value: u32) -> Self {
        self.eax = Some(value);
        self
    }

    pub fn with_ecx(mut self, value: u32) -> Self {
        self.ecx = Some(value);
        self
    }

    pub fn with_edx(mut self, value: u32) -> Self {
        self.edx = Some(value);
        self
    }

    pub fn with_stack(mut self, args: &[u8]) -> Self {
        self.stack = args.to_vec();
        self
    }

    /// True when no register or stack argument is set.
    pub fn is_empty(&self) -> bool {
        self.eax.is_none() && self.ecx.is_none() && self.edx.is_none() && self.stack.is_empty()
    }
}
