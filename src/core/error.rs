use thiserror::Error;

#[derive(Error, Debug)]
pub enum RkafError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number in header: expected {expected:?}, found {found:?}")]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Image checksum verification failed: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Malformed descriptor {file}, line {line}: {reason}")]
    MalformedDescriptor {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Value for {field} is too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid partition range for {name}: offset {offset:#x} + size {size:#x} exceeds image length {length:#x}")]
    InvalidPartitionRange {
        name: String,
        offset: u32,
        size: u32,
        length: u32,
    },

    #[error("Too many {kind}: limit is {max}")]
    TooManyEntries { kind: &'static str, max: usize },

    #[error("Image too large: {0}")]
    ImageTooLarge(String),
}

pub type Result<T> = std::result::Result<T, RkafError>;
