//! Byte-signature patterns with wildcard positions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Mask character marking a position that matches any byte.
pub const WILDCARD: char = '?';

/// A byte signature with a wildcard mask and a result offset adjustment.
///
/// `mask` has one character per pattern byte: `x` (or any non-`?`
/// character) requires an exact match, `?` matches any byte. `offset` is
/// added to the match address before it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub bytes: Vec<u8>,
    pub mask: String,
    #[serde(default)]
    pub offset: i32,
}

impl PatternSpec {
    pub fn new(bytes: Vec<u8>, mask: impl Into<String>, offset: i32) -> Result<Self> {
        let spec = Self {
            bytes,
            mask: mask.into(),
            offset,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parse a signature string like `"48 8B ?? 44"`, where `??` (or a
    /// single `?`) is a wildcard byte.
    pub fn parse(pattern: &str, offset: i32) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut mask = String::new();

        for token in pattern.split_whitespace() {
            if token == "?" || token == "??" {
                bytes.push(0);
                mask.push(WILDCARD);
            } else {
                let byte = u8::from_str_radix(token, 16).map_err(|_| {
                    Error::InvalidArgument(format!("invalid pattern byte '{}'", token))
                })?;
                bytes.push(byte);
                mask.push('x');
            }
        }

        if bytes.is_empty() {
            return Err(Error::InvalidArgument("empty pattern".into()));
        }

        Ok(Self {
            bytes,
            mask,
            offset,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check the pattern/mask length invariant.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(Error::InvalidArgument("empty pattern".into()));
        }
        if self.bytes.len() != self.mask.chars().count() {
            return Err(Error::InvalidArgument(format!(
                "pattern length {} does not match mask length {}",
                self.bytes.len(),
                self.mask.chars().count()
            )));
        }
        Ok(())
    }

    /// True when position `i` matches any byte.
    pub fn is_wildcard(&self, i: usize) -> bool {
        self.mask.as_bytes().get(i).copied() == Some(WILDCARD as u8)
    }
}
