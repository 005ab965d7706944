use crate::error::{RkafError, Result};
use crate::fixed_str::FixedStr;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const MAGIC: [u8; 4] = *b"RKAF";

/// Total size of the image header, partition table included
pub const HEADER_SIZE: usize = 4096;

/// Byte offset of the partition table within the header
pub const ENTRIES_OFFSET: usize = 140;

/// Size of one serialized partition entry
pub const ENTRY_SIZE: usize = 112;

/// Number of partition entries the header can hold
pub const MAX_ENTRIES: usize = 35;

/// Entry count written by older generators regardless of table size
pub const LEGACY_ENTRY_COUNT: u32 = 16;

/// Payload granularity on the target storage
pub const SECTOR_SIZE: u32 = 512;

pub const NAME_LEN: usize = 32;
pub const FILENAME_LEN: usize = 60;
pub const MODEL_LEN: usize = 0x22;
pub const ID_LEN: usize = 0x1e;
pub const MANUFACTURER_LEN: usize = 0x38;

/// Filename marking the entry that describes the image itself
pub const SELF_NAME: &str = "SELF";

/// Name prefix of the parameter partition
pub const PARAMETER_NAME: &str = "parameter";

const RESERVED_OFFSET: usize = ENTRIES_OFFSET + MAX_ENTRIES * ENTRY_SIZE;
const RESERVED_LEN: usize = HEADER_SIZE - RESERVED_OFFSET;

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Round `value` up to the next multiple of `align`
pub fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Firmware version packed as `(major << 24) | (minor << 16) | patch`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl FirmwareVersion {
    pub fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn from_packed(value: u32) -> Self {
        Self {
            major: (value >> 24) as u8,
            minor: (value >> 16) as u8,
            patch: value as u16,
        }
    }

    pub fn packed(&self) -> u32 {
        (u32::from(self.major) << 24) | (u32::from(self.minor) << 16) | u32::from(self.patch)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    /// Parse `major.minor.patch` (decimal)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("expected 'number.number.number', got '{}'", s));
        }

        let major = parts[0]
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("invalid major version '{}': {}", parts[0], e))?;
        let minor = parts[1]
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("invalid minor version '{}': {}", parts[1], e))?;
        let patch = parts[2]
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid patch version '{}': {}", parts[2], e))?;

        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// One record of the header's partition table
///
/// Field order on disk: name, filename, nand_size, pos, nand_addr,
/// padded_size, size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionEntry {
    /// Logical partition name
    pub name: FixedStr<NAME_LEN>,

    /// Source file name on pack, destination file name on unpack
    pub filename: FixedStr<FILENAME_LEN>,

    /// Size of the target flash partition
    pub nand_size: u32,

    /// Byte offset of the payload within the image
    pub pos: u32,

    /// Start address of the target flash partition
    pub nand_addr: u32,

    /// Size reserved for the payload in the image
    pub padded_size: u32,

    /// Meaningful payload bytes
    pub size: u32,
}

impl PartitionEntry {
    /// Entry describing the image itself (size resolved after writing)
    pub fn is_self(&self) -> bool {
        self.filename == SELF_NAME || self.name == SELF_NAME
    }

    pub fn is_parameter(&self) -> bool {
        self.name.starts_with(PARAMETER_NAME.as_bytes())
    }

    /// Unused slot, or the end of a sparse table
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() || self.filename.is_empty()
    }

    /// Exclusive end offset of the payload, computed without overflow
    pub fn end(&self) -> u64 {
        u64::from(self.pos) + u64::from(self.size)
    }

    pub fn write_to(&self, bytes: &mut [u8]) {
        bytes[0..32].copy_from_slice(self.name.raw());
        bytes[32..92].copy_from_slice(self.filename.raw());
        put_u32(bytes, 92, self.nand_size);
        put_u32(bytes, 96, self.pos);
        put_u32(bytes, 100, self.nand_addr);
        put_u32(bytes, 104, self.padded_size);
        put_u32(bytes, 108, self.size);
    }

    pub fn read_from(bytes: &[u8]) -> Self {
        PartitionEntry {
            name: FixedStr::from_raw(&bytes[0..32]),
            filename: FixedStr::from_raw(&bytes[32..92]),
            nand_size: le_u32(bytes, 92),
            pos: le_u32(bytes, 96),
            nand_addr: le_u32(bytes, 100),
            padded_size: le_u32(bytes, 104),
            size: le_u32(bytes, 108),
        }
    }
}

/// RKAF image header
///
/// Occupies the first 4KB of the image. Layout:
///
/// ```text
/// 0x000  magic "RKAF"
/// 0x004  length          (offset of the trailing checksum)
/// 0x008  model           [34]
/// 0x02A  id              [30]
/// 0x048  manufacturer    [56]
/// 0x080  unknown1
/// 0x084  version
/// 0x088  num_parts
/// 0x08C  parts           [35 x 112]
/// 0xFDC  reserved        [36]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub length: u32,
    pub model: FixedStr<MODEL_LEN>,
    pub id: FixedStr<ID_LEN>,
    pub manufacturer: FixedStr<MANUFACTURER_LEN>,
    pub unknown1: u32,
    pub version: u32,
    pub num_parts: u32,
    pub parts: [PartitionEntry; MAX_ENTRIES],
    pub reserved: [u8; RESERVED_LEN],
}

impl Header {
    /// Header with the magic set and everything else zeroed
    pub fn new() -> Self {
        Header {
            magic: MAGIC,
            length: 0,
            model: FixedStr::empty(),
            id: FixedStr::empty(),
            manufacturer: FixedStr::empty(),
            unknown1: 0,
            version: 0,
            num_parts: 0,
            parts: [PartitionEntry::default(); MAX_ENTRIES],
            reserved: [0; RESERVED_LEN],
        }
    }

    pub fn validate_magic(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(RkafError::BadMagic {
                expected: MAGIC,
                found: self.magic,
            });
        }
        Ok(())
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        FirmwareVersion::from_packed(self.version)
    }

    /// Number of table slots to walk
    ///
    /// Older generators always wrote 16 here even for larger tables, so
    /// that value means "the whole table".
    pub fn effective_entry_count(&self) -> usize {
        if self.num_parts == LEGACY_ENTRY_COUNT {
            (HEADER_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE
        } else {
            (self.num_parts as usize).min(MAX_ENTRIES)
        }
    }

    /// Entries in use, stopping at the first empty slot
    pub fn entries(&self) -> impl Iterator<Item = (usize, &PartitionEntry)> {
        self.parts[..self.effective_entry_count()]
            .iter()
            .enumerate()
            .take_while(|(_, part)| !part.is_empty())
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];

        bytes[0..4].copy_from_slice(&self.magic);
        put_u32(&mut bytes, 4, self.length);
        bytes[8..42].copy_from_slice(self.model.raw());
        bytes[42..72].copy_from_slice(self.id.raw());
        bytes[72..128].copy_from_slice(self.manufacturer.raw());
        put_u32(&mut bytes, 128, self.unknown1);
        put_u32(&mut bytes, 132, self.version);
        put_u32(&mut bytes, 136, self.num_parts);

        for (i, part) in self.parts.iter().enumerate() {
            let offset = ENTRIES_OFFSET + i * ENTRY_SIZE;
            part.write_to(&mut bytes[offset..offset + ENTRY_SIZE]);
        }

        bytes[RESERVED_OFFSET..].copy_from_slice(&self.reserved);

        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(RkafError::MalformedHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut header = Header::new();
        header.magic.copy_from_slice(&bytes[0..4]);
        header.length = le_u32(bytes, 4);
        header.model = FixedStr::from_raw(&bytes[8..42]);
        header.id = FixedStr::from_raw(&bytes[42..72]);
        header.manufacturer = FixedStr::from_raw(&bytes[72..128]);
        header.unknown1 = le_u32(bytes, 128);
        header.version = le_u32(bytes, 132);
        header.num_parts = le_u32(bytes, 136);

        for (i, part) in header.parts.iter_mut().enumerate() {
            let offset = ENTRIES_OFFSET + i * ENTRY_SIZE;
            *part = PartitionEntry::read_from(&bytes[offset..offset + ENTRY_SIZE]);
        }

        header
            .reserved
            .copy_from_slice(&bytes[RESERVED_OFFSET..HEADER_SIZE]);

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, filename: &str) -> PartitionEntry {
        PartitionEntry {
            name: FixedStr::new("name", name).unwrap(),
            filename: FixedStr::new("filename", filename).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(ENTRIES_OFFSET, 4 + 4 + MODEL_LEN + ID_LEN + MANUFACTURER_LEN + 12);
        assert_eq!(ENTRY_SIZE, NAME_LEN + FILENAME_LEN + 5 * 4);
        assert!(RESERVED_OFFSET <= HEADER_SIZE);
        assert_eq!(RESERVED_LEN, 36);
    }

    #[test]
    fn test_header_serialization() {
        let mut header = Header::new();
        header.length = 0x1234_5678;
        header.model = FixedStr::new("model", "RK3399").unwrap();
        header.id = FixedStr::new("id", "007").unwrap();
        header.manufacturer = FixedStr::new("manufacturer", "rockchip").unwrap();
        header.version = FirmwareVersion::new(8, 1, 3).packed();
        header.num_parts = 2;
        header.parts[0] = entry("boot", "Image/boot.img");
        header.parts[0].pos = 0x1000;
        header.parts[0].size = 0x800;
        header.parts[0].padded_size = 0x800;
        header.parts[1] = entry("backup", "SELF");

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"RKAF");
        assert_eq!(&bytes[4..8], &0x1234_5678u32.to_le_bytes());
        assert_eq!(&bytes[8..14], b"RK3399");
        assert_eq!(&bytes[ENTRIES_OFFSET..ENTRIES_OFFSET + 4], b"boot");
        // pos sits after name, filename and nand_size
        assert_eq!(
            &bytes[ENTRIES_OFFSET + 96..ENTRIES_OFFSET + 100],
            &0x1000u32.to_le_bytes()
        );

        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.firmware_version(), FirmwareVersion::new(8, 1, 3));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let bytes = vec![0u8; HEADER_SIZE - 1];
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(RkafError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = Header::new();
        header.magic = *b"RKFW";
        assert!(matches!(
            header.validate_magic(),
            Err(RkafError::BadMagic { found, .. }) if &found == b"RKFW"
        ));
    }

    #[test]
    fn test_legacy_entry_count() {
        let mut header = Header::new();
        header.num_parts = 16;
        assert_eq!(header.effective_entry_count(), 35);

        header.num_parts = 12;
        assert_eq!(header.effective_entry_count(), 12);

        header.num_parts = 200;
        assert_eq!(header.effective_entry_count(), MAX_ENTRIES);
    }

    #[test]
    fn test_entries_stop_at_empty_slot() {
        let mut header = Header::new();
        header.num_parts = 16;
        header.parts[0] = entry("boot", "boot.img");
        header.parts[1] = entry("kernel", "kernel.img");
        header.parts[3] = entry("orphan", "orphan.img");

        let names: Vec<String> = header.entries().map(|(_, p)| p.name.to_string()).collect();
        assert_eq!(names, vec!["boot", "kernel"]);
    }

    #[test]
    fn test_entry_classification() {
        assert!(entry("backup", "SELF").is_self());
        assert!(entry("SELF", "image.img").is_self());
        assert!(!entry("boot", "boot.img").is_self());
        assert!(entry("parameter", "parameter.txt").is_parameter());
        assert!(entry("parameter_b", "parameter.txt").is_parameter());
        assert!(!entry("param", "parameter.txt").is_parameter());
    }

    #[test]
    fn test_firmware_version_parsing() {
        let v: FirmwareVersion = "1.2.3".parse().unwrap();
        assert_eq!(v.packed(), 0x0102_0003);
        assert_eq!(v.to_string(), "1.2.3");
        assert!("1.2".parse::<FirmwareVersion>().is_err());
        assert!("1.2.x".parse::<FirmwareVersion>().is_err());
        assert!("256.0.0".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 512), 0);
        assert_eq!(align_up(1, 512), 512);
        assert_eq!(align_up(512, 512), 512);
        assert_eq!(align_up(513, 512), 1024);
    }
}
