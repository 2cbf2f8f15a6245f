//! Remote address type
//!
//! Addresses in the target's address space are plain 32-bit values, never
//! host pointers: the generated stubs are 32-bit x86 and every remote
//! pointer on the wire is 4 bytes. Keeping the type opaque makes the arena
//! and bookkeeping code testable without a live target.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An address inside the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteAddr(u32);

impl RemoteAddr {
    /// The null sentinel. Reads, writes and thread starts reject it.
    pub const NULL: RemoteAddr = RemoteAddr(0);

    /// Size of a remote pointer in bytes.
    pub const SIZE: usize = 4;

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Add a signed byte offset, wrapping on overflow.
    pub const fn offset(self, delta: i32) -> Self {
        Self(self.0.wrapping_add(delta as u32))
    }

    /// Advance by an unsigned byte count, wrapping on overflow.
    pub const fn add(self, count: u32) -> Self {
        Self(self.0.wrapping_add(count))
    }

    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub const fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for RemoteAddr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
