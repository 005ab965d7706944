//! Integrity and range checks for RKAF images
//!
//! The image checksum covers the first `length` bytes and is stored right
//! after them. Entries are only trusted once their payload range has been
//! checked against that same `length`.

use crate::error::{RkafError, Result};
use crate::header::{Header, PartitionEntry};
use crate::io::{ImageFile, CHECKSUM_SIZE};
use crate::param_block::{PARAM_CHECKSUM_SIZE, PARAM_HEADER_SIZE};
use std::path::{Component, Path};
use tracing::debug;

/// Payload range `(offset, size)` to extract for `entry`
///
/// Parameter entries record the whole wrapped block, so the wrapper's
/// header and checksum are stripped here. Returns `None` when a parameter
/// entry is too small to hold the wrapper at all.
pub fn extraction_range(entry: &PartitionEntry) -> Option<(u64, u64)> {
    let offset = u64::from(entry.pos);
    let size = u64::from(entry.size);

    if entry.is_parameter() {
        let size = size.checked_sub((PARAM_HEADER_SIZE + PARAM_CHECKSUM_SIZE) as u64)?;
        return Some((offset + PARAM_HEADER_SIZE as u64, size));
    }

    Some((offset, size))
}

/// Check that `offset + size` does not run past `length`
pub fn check_entry_range(name: &str, offset: u64, size: u64, length: u32) -> Result<()> {
    if offset + size > u64::from(length) {
        return Err(RkafError::InvalidPartitionRange {
            name: name.to_string(),
            offset: offset as u32,
            size: size as u32,
            length,
        });
    }
    Ok(())
}

/// Validate the range of one header entry
pub fn check_entry(entry: &PartitionEntry, length: u32) -> Result<(u64, u64)> {
    let name = entry.name.to_str_lossy();
    let (offset, size) =
        extraction_range(entry).ok_or_else(|| RkafError::InvalidPartitionRange {
            name: name.to_string(),
            offset: entry.pos,
            size: entry.size,
            length,
        })?;
    check_entry_range(&name, offset, size, length)?;
    Ok((offset, size))
}

/// Read the header and check its magic and the trailing image checksum
///
/// Returns the header and the verified checksum.
pub fn verify_image(image: &mut ImageFile) -> Result<(Header, u32)> {
    let header = image.read_header()?;
    header.validate_magic()?;

    let file_len = image.len()?;
    if u64::from(header.length) + CHECKSUM_SIZE > file_len {
        return Err(RkafError::MalformedHeader(format!(
            "declared length {:#x} plus checksum exceeds file size {:#x}",
            header.length, file_len
        )));
    }

    let stored = image.read_checksum(header.length)?;
    let computed = image.checksum(header.length)?;
    if stored != computed {
        return Err(RkafError::ChecksumMismatch { stored, computed });
    }

    debug!(
        "Image {:?} verified: length {:#x}, crc {:#010x}",
        image.path(),
        header.length,
        computed
    );
    Ok((header, computed))
}

/// Whether a recorded filename stays inside the destination directory
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
