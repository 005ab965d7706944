//! RKCRC checksum engine
//!
//! Rockchip images use an MSB-first CRC-32 seeded with zero and without a
//! final xor. The polynomial is `0x04C10DB7`, not the common `0x04C11DB7`;
//! images written by Rockchip's tools only verify against the former. The same engine protects the
//! whole image (trailing 4 bytes) and the payload of the parameter block.

use std::io::{self, ErrorKind, Read};

/// Chunk size used when checksumming a stream
const CHUNK_SIZE: usize = 1024;

/// Running RKCRC accumulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RkCrc(u32);

impl RkCrc {
    pub const POLYNOMIAL: u32 = 0x04C1_0DB7;

    /// Lookup table, entry `i` is the CRC of the single byte `i`.
    pub const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        table[1] = Self::POLYNOMIAL;
        let mut pos = 2;
        while pos < 256 {
            let prev = table[pos >> 1];
            let curr = (prev << 1) ^ if (prev >> 31) & 1 != 0 { Self::POLYNOMIAL } else { 0 };
            table[pos] = curr;
            table[pos + 1] = curr ^ Self::POLYNOMIAL;
            pos += 2;
        }
        table
    };

    pub fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.0;
        for &byte in data {
            crc = (crc << 8) ^ Self::TABLE[((crc >> 24) as u8 ^ byte) as usize];
        }
        self.0 = crc;
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Checksum of an in-memory buffer
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = RkCrc::new();
    crc.update(data);
    crc.value()
}

/// Checksum of the next `len` bytes of `reader`
///
/// Reads in bounded chunks. If the stream ends early the checksum covers
/// whatever was available.
pub fn checksum_stream<R: Read>(reader: &mut R, len: u64) -> io::Result<u32> {
    let mut crc = RkCrc::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut remaining = len;

    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let read = match reader.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        crc.update(&buffer[..read]);
        remaining -= read as u64;
    }

    Ok(crc.value())
}
