//! Flash layout parsing
//!
//! The target flash layout travels inside the parameter file as the
//! `mtdparts=` token of the `CMDLINE` key:
//!
//! ```text
//! rk29xxnand:0x00002000@0x00002000(uboot),0x00008000@0x00004000(boot),-@0x0000c000(userdata:grow)
//! ```
//!
//! Every entry is `SIZE@OFFSET(NAME)` with hexadecimal numbers. A size of
//! `-` (grow to the end of the device) yields zero.

use crate::error::{RkafError, Result};
use crate::header::{NAME_LEN, PARAMETER_NAME};
use serde::Serialize;
use tracing::{debug, warn};

/// Maximum number of flash partitions collected in one run
pub const MAX_PARTITIONS: usize = 32;

/// Size of the `parameter` partition when the layout does not declare one
pub const DEFAULT_PARAMETER_SIZE: u32 = 0x2000;

/// A named region of the target device's flash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlashPartition {
    pub name: String,
    pub start: u32,
    pub size: u32,
}

/// Parse a leading hexadecimal number the way `strtol(s, &end, 16)` does
///
/// Leading whitespace, a sign and a `0x` prefix are accepted. Returns the
/// value and the unparsed remainder; if no digits are found the value is
/// zero and the remainder is the whole input.
pub fn parse_hex_prefix(input: &str) -> (u32, &str) {
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }

    let mut negative = false;
    if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
        negative = bytes[pos] == b'-';
        pos += 1;
    }

    if bytes.get(pos) == Some(&b'0')
        && matches!(bytes.get(pos + 1), Some(b'x') | Some(b'X'))
        && bytes.get(pos + 2).is_some_and(|b| b.is_ascii_hexdigit())
    {
        pos += 2;
    }

    let digits_start = pos;
    let mut value: i64 = 0;
    while let Some(digit) = bytes.get(pos).and_then(|&b| (b as char).to_digit(16)) {
        value = value
            .checked_mul(16)
            .and_then(|v| v.checked_add(i64::from(digit)))
            .unwrap_or(i64::MAX);
        pos += 1;
    }

    if pos == digits_start {
        return (0, input);
    }

    // Same narrowing as assigning a `long` to a 32-bit field
    let value = (if negative { value.wrapping_neg() } else { value }) as u32;
    (value, &input[pos..])
}

/// Parse one `SIZE@OFFSET(NAME)` entry, `None` if it has no `@`
fn parse_entry(entry: &str) -> Option<FlashPartition> {
    let (size, rest) = parse_hex_prefix(entry);
    let at = rest.find('@')?;
    let (start, rest) = parse_hex_prefix(&rest[at + 1..]);

    let name = match rest.find('(') {
        Some(open) => {
            let inner = &rest[open + 1..];
            let close = inner.find(')').unwrap_or(inner.len());
            truncate_name(&inner[..close])
        }
        None => String::new(),
    };

    Some(FlashPartition { name, start, size })
}

/// Keep at most `NAME_LEN - 1` bytes, never splitting a character
fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Ordered list of flash partitions collected during one pack run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartitionTable {
    partitions: Vec<FlashPartition>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `mtdparts` value (`label:entry,entry,...`) and append its
    /// partitions in declaration order
    ///
    /// Entries without `@` are skipped. A value without a `:` declares no
    /// partitions.
    pub fn parse_mtdparts(&mut self, value: &str) -> Result<usize> {
        let Some((label, parts)) = value.split_once(':') else {
            warn!("mtdparts value has no ':' separator, no partitions declared");
            return Ok(0);
        };
        debug!("Parsing mtdparts for {}", label);

        let mut added = 0;
        for part in parts.split(',').filter(|p| !p.is_empty()) {
            let Some(partition) = parse_entry(part) else {
                warn!("Skipping malformed mtdparts entry '{}'", part);
                continue;
            };
            self.push(partition)?;
            added += 1;
        }

        Ok(added)
    }

    pub fn push(&mut self, partition: FlashPartition) -> Result<()> {
        if self.partitions.len() >= MAX_PARTITIONS {
            return Err(RkafError::TooManyEntries {
                kind: "flash partitions",
                max: MAX_PARTITIONS,
            });
        }
        debug!(
            "  Partition {}: {} start={:#x} size={:#x}",
            self.partitions.len(),
            partition.name,
            partition.start,
            partition.size
        );
        self.partitions.push(partition);
        Ok(())
    }

    /// Look up a partition by name
    ///
    /// The latest declaration wins. `parameter` falls back to the
    /// built-in default when the layout does not declare it.
    pub fn find(&self, name: &str) -> Option<FlashPartition> {
        if let Some(found) = self.partitions.iter().rev().find(|p| p.name == name) {
            return Some(found.clone());
        }
        if name == PARAMETER_NAME {
            return Some(FlashPartition {
                name: PARAMETER_NAME.to_string(),
                start: 0,
                size: DEFAULT_PARAMETER_SIZE,
            });
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlashPartition> {
        self.partitions.iter()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}
