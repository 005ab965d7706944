//! Extracting the payloads of an RKAF image into a directory
//!
//! Header, magic and checksum problems abort before anything is written.
//! Problems with a single entry only skip that entry.

use crate::error::Result;
use crate::header::{Header, HEADER_SIZE};
use crate::io::ImageFile;
use crate::validation::{check_entry, is_safe_relative_path, verify_image};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Name of the diagnostic header dump inside the destination directory
pub const HEADER_DUMP_NAME: &str = "header";

/// Package path of placeholder entries written without a payload
const RESERVED_FILENAME: &str = "RESERVED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    dump_header: bool,
}

impl UnpackOptions {
    pub fn new() -> Self {
        UnpackOptions { dump_header: true }
    }

    /// Write the raw header to `<dest>/header` (default on)
    pub fn dump_header(mut self, enabled: bool) -> Self {
        self.dump_header = enabled;
        self
    }
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an entry was not extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Describes the image itself
    SelfReference,
    /// Placeholder without payload
    Reserved,
    /// Payload runs past the image length
    InvalidRange(String),
    /// Filename would escape the destination directory
    UnsafePath,
    /// Writing the output file failed
    ExtractFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SelfReference => write!(f, "self reference"),
            SkipReason::Reserved => write!(f, "reserved entry"),
            SkipReason::InvalidRange(msg) => write!(f, "{}", msg),
            SkipReason::UnsafePath => write!(f, "unsafe filename"),
            SkipReason::ExtractFailed(msg) => write!(f, "extraction failed: {}", msg),
        }
    }
}

/// An entry that will be, or was, written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedEntry {
    pub index: usize,
    pub name: String,
    pub filename: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub name: String,
    pub reason: SkipReason,
}

/// Decide for every entry in use whether it is extracted or skipped
pub fn plan_entries(header: &Header) -> (Vec<ExtractedEntry>, Vec<SkippedEntry>) {
    let mut extract = Vec::new();
    let mut skipped = Vec::new();

    for (index, part) in header.entries() {
        let name = part.name.to_string();
        let filename = part.filename.to_string();

        let skip = |reason| SkippedEntry {
            index,
            name: name.clone(),
            reason,
        };

        if part.is_self() {
            skipped.push(skip(SkipReason::SelfReference));
            continue;
        }
        if part.filename == RESERVED_FILENAME {
            skipped.push(skip(SkipReason::Reserved));
            continue;
        }
        if !is_safe_relative_path(&filename) {
            skipped.push(skip(SkipReason::UnsafePath));
            continue;
        }

        match check_entry(part, header.length) {
            Ok((offset, size)) => extract.push(ExtractedEntry {
                index,
                name: name.clone(),
                filename,
                offset,
                size,
            }),
            Err(e) => skipped.push(skip(SkipReason::InvalidRange(e.to_string()))),
        }
    }

    (extract, skipped)
}

/// Outcome of an unpack run
#[derive(Debug, Clone)]
pub struct UnpackReport {
    pub header: Header,
    pub checksum: u32,
    pub extracted: Vec<ExtractedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// Unpacks an image into a destination directory
#[derive(Debug, Clone, Default)]
pub struct Unpacker {
    options: UnpackOptions,
}

impl Unpacker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: UnpackOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify `src` and extract its entries below `dest`
    pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        src: P,
        dest: Q,
    ) -> Result<UnpackReport> {
        let dest = dest.as_ref();
        info!("Unpacking {:?} into {:?}", src.as_ref(), dest);

        let mut image = ImageFile::open(src)?;
        let (header, checksum) = verify_image(&mut image)?;
        info!("Check file... OK");

        fs::create_dir_all(dest)?;

        if self.options.dump_header {
            if let Err(e) = image.extract(0, HEADER_SIZE as u64, &dest.join(HEADER_DUMP_NAME)) {
                warn!("Can't write header dump: {}", e);
            }
        }

        let (planned, mut skipped) = plan_entries(&header);
        for entry in &skipped {
            match entry.reason {
                SkipReason::SelfReference | SkipReason::Reserved => {
                    debug!("Skipping {} ({})", entry.name, entry.reason)
                }
                _ => warn!("Skipping {}: {}", entry.name, entry.reason),
            }
        }

        let mut extracted = Vec::with_capacity(planned.len());
        for entry in planned {
            let path = dest.join(&entry.filename);
            info!(
                "{:<32} {:#010x} {:#010x}  {}",
                entry.name, entry.offset, entry.size, entry.filename
            );
            match image.extract(entry.offset, entry.size, &path) {
                Ok(_) => extracted.push(entry),
                Err(e) => {
                    warn!("Skipping {}: can't extract to {:?}: {}", entry.name, path, e);
                    skipped.push(SkippedEntry {
                        index: entry.index,
                        name: entry.name,
                        reason: SkipReason::ExtractFailed(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Unpacked {} entries, skipped {}",
            extracted.len(),
            skipped.len()
        );

        Ok(UnpackReport {
            header,
            checksum,
            extracted,
            skipped,
        })
    }
}
