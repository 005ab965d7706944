//! # rkaf-rs - Rockchip RKAF firmware image packer
//!
//! `rkaf-rs` builds and takes apart RKAF update images: a 4KB header with a
//! partition table, the padded partition payloads, and a trailing RKCRC
//! checksum over everything before it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rkaf_rs::{pack, unpack, Result};
//!
//! # fn main() -> Result<()> {
//! // Source directory holds `parameter`, `package-file` and the payloads
//! let summary = pack("firmware/", "update.img")?;
//! println!("{} entries, crc {:#010x}", summary.header.num_parts, summary.checksum);
//!
//! // Verify and extract again
//! let report = unpack("update.img", "out/")?;
//! for entry in &report.extracted {
//!     println!("{} -> {}", entry.name, entry.filename);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Inspecting an image
//!
//! ```rust,no_run
//! use rkaf_rs::{Container, Result};
//!
//! # fn main() -> Result<()> {
//! let container = Container::open("update.img")?;
//! println!("{} v{}", container.header().model, container.firmware_version());
//! for skipped in container.skipped_entries() {
//!     println!("would skip {}: {}", skipped.name, skipped.reason);
//! }
//! # Ok(())
//! # }
//! ```

// Format implementation
pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    checksum, descriptor, error, fixed_str, header, io, mtdparts, packer, param_block, unpacker,
    validation,
};

// Re-export core types that users need
pub use crate::core::{
    checksum::{checksum, RkCrc},
    descriptor::{ImageInfo, PackageMapping, ParameterFile},
    error::{Result, RkafError},
    fixed_str::FixedStr,
    header::{FirmwareVersion, Header, PartitionEntry, HEADER_SIZE, MAGIC},
    mtdparts::{FlashPartition, PartitionTable},
    packer::{PackImage, PackOptions, PackSummary, Packer},
    param_block::ParameterBlock,
    unpacker::{
        ExtractedEntry, SkipReason, SkippedEntry, UnpackOptions, UnpackReport, Unpacker,
    },
};

use crate::core::io::ImageFile;
use crate::core::unpacker::plan_entries;
use crate::core::validation::verify_image;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Pack `source_dir` into the image `dest` with default descriptor names
pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(source_dir: P, dest: Q) -> Result<PackSummary> {
    Packer::new(source_dir).pack(dest)
}

/// Verify the image `src` and extract it into `dest`
pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dest: Q) -> Result<UnpackReport> {
    Unpacker::new().unpack(src, dest)
}

/// Printable summary of an image, also used for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub path: PathBuf,
    pub model: String,
    pub id: String,
    pub manufacturer: String,
    pub version: String,
    pub length: u32,
    pub checksum: u32,
    pub entries: Vec<PartitionEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// A verified RKAF image opened for inspection
///
/// Opening checks the magic and the trailing checksum, so every
/// `Container` refers to an intact image.
///
/// # Examples
///
/// ```rust,no_run
/// use rkaf_rs::Container;
///
/// let container = Container::open("update.img")?;
/// for entry in container.entries() {
///     println!("{:<32} {:#010x} {:#010x}", entry.name, entry.pos, entry.size);
/// }
/// # Ok::<(), rkaf_rs::RkafError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    header: Header,
    checksum: u32,
}

impl Container {
    /// Open and verify an image
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening image {:?}", path);
        let mut image = ImageFile::open(path)?;
        let (header, checksum) = verify_image(&mut image)?;
        Ok(Container {
            path: path.to_path_buf(),
            header,
            checksum,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.header.firmware_version()
    }

    /// Entries in use, in table order
    pub fn entries(&self) -> impl Iterator<Item = &PartitionEntry> {
        self.header.entries().map(|(_, part)| part)
    }

    /// Entries that an unpack would leave out, with the reason
    pub fn skipped_entries(&self) -> Vec<SkippedEntry> {
        plan_entries(&self.header).1
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            path: self.path.clone(),
            model: self.header.model.to_string(),
            id: self.header.id.to_string(),
            manufacturer: self.header.manufacturer.to_string(),
            version: self.firmware_version().to_string(),
            length: self.header.length,
            checksum: self.checksum,
            entries: self.entries().copied().collect(),
            skipped: self.skipped_entries(),
        }
    }

    /// Extract the image into `dest`
    pub fn unpack_to<P: AsRef<Path>>(
        &self,
        dest: P,
        options: UnpackOptions,
    ) -> Result<UnpackReport> {
        Unpacker::new().with_options(options).unpack(&self.path, dest)
    }
}
