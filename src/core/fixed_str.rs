//! Fixed-capacity, NUL-padded string fields
//!
//! Header strings are stored as raw byte arrays. A value that fills the
//! whole field carries no terminator, so the logical length is "bytes up
//! to the first NUL, or the full capacity".

use crate::error::{RkafError, Result};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedStr<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> FixedStr<N> {
    /// Empty (all zero) field
    pub const fn empty() -> Self {
        Self { bytes: [0; N] }
    }

    /// Build a field from a value that must fit with its terminator
    ///
    /// # Errors
    ///
    /// Returns `FieldTooLong` if `value` has `N` or more bytes.
    pub fn new(field: &'static str, value: &str) -> Result<Self> {
        if value.len() >= N {
            return Err(RkafError::FieldTooLong {
                field,
                len: value.len(),
                max: N - 1,
            });
        }
        let mut bytes = [0u8; N];
        bytes[..value.len()].copy_from_slice(value.as_bytes());
        Ok(Self { bytes })
    }

    /// Wrap raw field bytes as found on disk
    pub fn from_raw(raw: &[u8]) -> Self {
        let mut bytes = [0u8; N];
        let len = raw.len().min(N);
        bytes[..len].copy_from_slice(&raw[..len]);
        Self { bytes }
    }

    /// Raw field bytes including padding
    pub fn raw(&self) -> &[u8; N] {
        &self.bytes
    }

    /// Logical content, up to the first NUL
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.bytes.iter().position(|&b| b == 0).unwrap_or(N);
        &self.bytes[..end]
    }

    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.as_bytes().starts_with(prefix)
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> PartialEq<str> for FixedStr<N> {
    fn eq(&self, other: &str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> PartialEq<&str> for FixedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_str_lossy())
    }
}

impl<const N: usize> Serialize for FixedStr<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_str_lossy())
    }
}
