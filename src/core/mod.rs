//! RKAF format implementation
//!
//! - [`error`] - Error types for pack/unpack operations
//! - [`checksum`] - RKCRC, the CRC-32 variant guarding the whole image
//! - [`fixed_str`] - Fixed capacity, zero padded string fields
//! - [`header`] - The 4KB image header and its partition table
//! - [`mtdparts`] - Flash layout parsing from the kernel command line
//! - [`param_block`] - The wrapper stored around the `parameter` payload
//! - [`descriptor`] - `parameter` and `package-file` text descriptors
//! - [`io`] - Disk-backed image file access
//! - [`packer`] - Source directory to image
//! - [`unpacker`] - Image to destination directory
//! - [`validation`] - Checksum verification and entry range checks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              RKAF Image File                │
//! ├─────────────────────────────────────────────┤
//! │ 0x0000: Header (4KB)                        │
//! │  - Magic: "RKAF"                            │
//! │  - Length, model, id, manufacturer, version │
//! │  - Partition table (35 x 112 bytes)         │
//! ├─────────────────────────────────────────────┤
//! │ 0x1000+: Payloads                           │
//! │  - One per package, 2KB-chunk padded        │
//! │  - `parameter` wrapped in a PARM block      │
//! ├─────────────────────────────────────────────┤
//! │ length: RKCRC of bytes [0, length)          │
//! └─────────────────────────────────────────────┘
//! ```

pub mod checksum;
pub mod descriptor;
pub mod error;
pub mod fixed_str;
pub mod header;
pub mod io;
pub mod mtdparts;
pub mod packer;
pub mod param_block;
pub mod unpacker;
pub mod validation;

pub use error::{Result, RkafError};
pub use header::{FirmwareVersion, Header, PartitionEntry};
pub use packer::{PackOptions, Packer};
pub use unpacker::{UnpackOptions, UnpackReport, Unpacker};
