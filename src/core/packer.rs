//! Packing a source directory into an RKAF image
//!
//! The pipeline runs in fixed stages:
//!
//! ```text
//! load parameters -> load package list -> open output -> placeholder header
//!   -> stream payloads -> patch header -> append checksum
//! ```
//!
//! A failure at any stage aborts the run. A partially written output file
//! is left in place for the caller to inspect or remove.

use crate::descriptor::{load_package_list, ImageInfo, PackageMapping, ParameterFile};
use crate::error::{RkafError, Result};
use crate::header::{
    align_up, Header, PartitionEntry, MAGIC, MAX_ENTRIES, PARAMETER_NAME, SECTOR_SIZE,
};
use crate::io::{ImageFile, CHECKSUM_SIZE};
use crate::mtdparts::PartitionTable;
use crate::param_block::{ParameterBlock, PARAM_BLOCK_SIZE};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Payloads are stored in chunks of this size, the last one zero padded
pub const PAYLOAD_CHUNK: usize = 2048;

pub const DEFAULT_PARAMETER_FILE: &str = "parameter";
pub const DEFAULT_PACKAGE_FILE: &str = "package-file";

/// Names of the descriptor files inside the source directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackOptions {
    parameter_file: String,
    package_file: String,
}

impl PackOptions {
    pub fn new() -> Self {
        PackOptions {
            parameter_file: DEFAULT_PARAMETER_FILE.to_string(),
            package_file: DEFAULT_PACKAGE_FILE.to_string(),
        }
    }

    /// Set the parameter descriptor file name (default `parameter`)
    pub fn parameter_file<S: Into<String>>(mut self, name: S) -> Self {
        self.parameter_file = name.into();
        self
    }

    /// Set the package list file name (default `package-file`)
    pub fn package_file<S: Into<String>>(mut self, name: S) -> Self {
        self.package_file = name.into();
        self
    }
}

impl Default for PackOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a successful pack
#[derive(Debug, Clone)]
pub struct PackSummary {
    pub header: Header,
    pub checksum: u32,
    pub path: PathBuf,
}

/// Image under construction
///
/// Collects the machine identity, the flash layout and the package list
/// for one pack run, then streams everything into an output file.
#[derive(Debug, Clone, Default)]
pub struct PackImage {
    pub info: ImageInfo,
    pub partitions: PartitionTable,
    pub packages: Vec<PackageMapping>,
}

impl PackImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything collected so far
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Load the machine identity and flash layout
    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let parsed = ParameterFile::load(path)?;
        self.info = parsed.info;
        for partition in parsed.partitions.iter() {
            self.partitions.push(partition.clone())?;
        }
        Ok(())
    }

    /// Load the package list, resolving flash placement by partition name
    pub fn load_packages<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.packages = load_package_list(path, &self.partitions)?;
        Ok(())
    }

    /// Write the image to `dest`, reading payloads relative to `source_dir`
    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source_dir: P,
        dest: Q,
    ) -> Result<PackSummary> {
        let source_dir = source_dir.as_ref();
        let dest = dest.as_ref();

        if self.packages.len() > MAX_ENTRIES {
            return Err(RkafError::TooManyEntries {
                kind: "header entries",
                max: MAX_ENTRIES,
            });
        }

        let mut image = ImageFile::create(dest)?;
        let mut header = Header::new();

        for (i, package) in self.packages.iter().enumerate() {
            let mut entry = PartitionEntry {
                name: package.name,
                filename: package.path,
                nand_addr: package.nand_addr,
                nand_size: package.nand_size,
                ..Default::default()
            };

            if package.is_self() {
                debug!("Entry {} ({}) describes the image itself", i, package.name);
            } else if package.is_reserved() {
                entry.pos = image.position()?;
                debug!("Entry {} ({}) is reserved, no payload", i, package.name);
            } else {
                let source = source_dir.join(&*package.path.to_str_lossy());
                info!("Adding file: {:?}", source);
                import_package(&mut image, &mut entry, &source)?;
            }

            header.parts[i] = entry;
        }

        header.length = image.position()?;

        // SELF covers the whole file, trailing checksum included
        let image_size = u64::from(header.length) + CHECKSUM_SIZE;
        let padded = align_up(image_size, u64::from(SECTOR_SIZE));
        let too_large = || RkafError::ImageTooLarge(format!("image size {:#x}", image_size));
        for (i, package) in self.packages.iter().enumerate().rev() {
            if package.is_self() {
                let part = &mut header.parts[i];
                part.size = u32::try_from(image_size).map_err(|_| too_large())?;
                part.padded_size = u32::try_from(padded).map_err(|_| too_large())?;
            }
        }

        header.magic = MAGIC;
        header.manufacturer = self.info.manufacturer;
        header.model = self.info.model;
        header.id = self.info.id;
        header.num_parts = self.packages.len() as u32;
        header.version = self.info.version.packed();

        image.write_header(&header)?;

        info!("Adding checksum...");
        let checksum = image.checksum(header.length)?;
        image.append_checksum(checksum)?;
        image.sync()?;

        info!(
            "Packed {} entries into {:?} ({} bytes, crc {:#010x})",
            header.num_parts,
            dest,
            u64::from(header.length) + CHECKSUM_SIZE,
            checksum
        );

        Ok(PackSummary {
            header,
            checksum,
            path: dest.to_path_buf(),
        })
    }
}

/// Attach the failing path to an I/O error
fn with_path(err: io::Error, path: &Path) -> RkafError {
    RkafError::Io(io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))
}

/// Fill `buf` from `reader`, returning fewer bytes only at end of stream
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream one source file into the image and record its placement
fn import_package(
    image: &mut ImageFile,
    entry: &mut PartitionEntry,
    source: &Path,
) -> Result<()> {
    entry.pos = image.position()?;
    let mut reader = BufReader::new(File::open(source).map_err(|e| with_path(e, source))?);

    if entry.name == PARAMETER_NAME {
        let block = ParameterBlock::read_from(&mut reader).map_err(|e| with_path(e, source))?;
        image.append(&block.to_bytes())?;
        entry.size = block.recorded_size();
        entry.padded_size = PARAM_BLOCK_SIZE as u32;
        return Ok(());
    }

    let mut buf = [0u8; PAYLOAD_CHUNK];
    loop {
        let read = read_chunk(&mut reader, &mut buf).map_err(|e| with_path(e, source))?;
        if read == 0 {
            break;
        }
        buf[read..].fill(0);
        image.append(&buf)?;

        let too_large = || RkafError::ImageTooLarge(format!("{} exceeds 4GiB", source.display()));
        entry.size = entry.size.checked_add(read as u32).ok_or_else(too_large)?;
        entry.padded_size = entry
            .padded_size
            .checked_add(PAYLOAD_CHUNK as u32)
            .ok_or_else(too_large)?;

        if read < PAYLOAD_CHUNK {
            break;
        }
    }

    debug!(
        "  {} at {:#x}, size {:#x}, padded {:#x}",
        entry.name, entry.pos, entry.size, entry.padded_size
    );
    Ok(())
}

/// Packs a source directory holding `parameter`, `package-file` and the
/// payload files into a single image
#[derive(Debug, Clone)]
pub struct Packer {
    source_dir: PathBuf,
    options: PackOptions,
}

impl Packer {
    pub fn new<P: AsRef<Path>>(source_dir: P) -> Self {
        Packer {
            source_dir: source_dir.as_ref().to_path_buf(),
            options: PackOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PackOptions) -> Self {
        self.options = options;
        self
    }

    /// Collect descriptors into a fresh `PackImage` without writing anything
    pub fn prepare(&self) -> Result<PackImage> {
        let mut image = PackImage::new();
        image.load_parameters(self.source_dir.join(&self.options.parameter_file))?;
        image.load_packages(self.source_dir.join(&self.options.package_file))?;
        Ok(image)
    }

    /// Pack into `dest`
    pub fn pack<P: AsRef<Path>>(&self, dest: P) -> Result<PackSummary> {
        info!("Packing {:?} into {:?}", self.source_dir, dest.as_ref());
        let image = self.prepare()?;
        image.write(&self.source_dir, dest)
    }
}
