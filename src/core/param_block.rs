//! Parameter block codec
//!
//! The `parameter` partition is not stored verbatim. Its payload is
//! wrapped in a fixed 2KB block:
//!
//! ```text
//! [ "PARM" ][ length (u32 LE) ][ payload ... ][ RKCRC(payload) (u32 LE) ][ zero padding ]
//! |<------------------------------- 2048 bytes ------------------------------------->|
//! ```

use crate::checksum::checksum;
use crate::error::{RkafError, Result};
use std::io::{self, Read};
use tracing::warn;

pub const PARAM_MAGIC: [u8; 4] = *b"PARM";

/// Total size of an encoded parameter block
pub const PARAM_BLOCK_SIZE: usize = 2048;

/// Magic plus length field
pub const PARAM_HEADER_SIZE: usize = 8;

pub const PARAM_CHECKSUM_SIZE: usize = 4;

/// Largest payload that fits into one block
pub const MAX_PARAM_PAYLOAD: usize = PARAM_BLOCK_SIZE - PARAM_HEADER_SIZE - PARAM_CHECKSUM_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlock {
    payload: Vec<u8>,
}

impl ParameterBlock {
    /// Wrap `payload`, dropping anything past `MAX_PARAM_PAYLOAD`
    pub fn new(payload: &[u8]) -> Self {
        if payload.len() > MAX_PARAM_PAYLOAD {
            warn!(
                "Parameter payload truncated from {} to {} bytes",
                payload.len(),
                MAX_PARAM_PAYLOAD
            );
        }
        let len = payload.len().min(MAX_PARAM_PAYLOAD);
        ParameterBlock {
            payload: payload[..len].to_vec(),
        }
    }

    /// Read at most `MAX_PARAM_PAYLOAD` bytes from `reader`
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut payload = Vec::with_capacity(MAX_PARAM_PAYLOAD);
        reader
            .by_ref()
            .take(MAX_PARAM_PAYLOAD as u64)
            .read_to_end(&mut payload)?;

        let mut extra = [0u8; 1];
        if reader.read(&mut extra)? > 0 {
            warn!(
                "Parameter file exceeds {} bytes, remainder discarded",
                MAX_PARAM_PAYLOAD
            );
        }

        Ok(ParameterBlock { payload })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u32 {
        checksum(&self.payload)
    }

    /// Meaningful bytes of the encoded block: header, payload and checksum
    pub fn recorded_size(&self) -> u32 {
        (PARAM_HEADER_SIZE + self.payload.len() + PARAM_CHECKSUM_SIZE) as u32
    }

    /// Encode into a zero padded block of `PARAM_BLOCK_SIZE` bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PARAM_BLOCK_SIZE);
        bytes.extend_from_slice(&PARAM_MAGIC);
        bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.checksum().to_le_bytes());
        bytes.resize(PARAM_BLOCK_SIZE, 0);
        bytes
    }

    /// Decode and verify an encoded block
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PARAM_HEADER_SIZE + PARAM_CHECKSUM_SIZE {
            return Err(RkafError::MalformedHeader(format!(
                "parameter block needs at least {} bytes, got {}",
                PARAM_HEADER_SIZE + PARAM_CHECKSUM_SIZE,
                bytes.len()
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        if magic != PARAM_MAGIC {
            return Err(RkafError::BadMagic {
                expected: PARAM_MAGIC,
                found: magic,
            });
        }

        let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let end = PARAM_HEADER_SIZE + len;
        if len > MAX_PARAM_PAYLOAD || end + PARAM_CHECKSUM_SIZE > bytes.len() {
            return Err(RkafError::MalformedHeader(format!(
                "parameter payload length {} does not fit in {} bytes",
                len,
                bytes.len()
            )));
        }

        let block = ParameterBlock {
            payload: bytes[PARAM_HEADER_SIZE..end].to_vec(),
        };
        let stored = u32::from_le_bytes([
            bytes[end],
            bytes[end + 1],
            bytes[end + 2],
            bytes[end + 3],
        ]);
        let computed = block.checksum();
        if stored != computed {
            return Err(RkafError::ChecksumMismatch { stored, computed });
        }

        Ok(block)
    }
}
