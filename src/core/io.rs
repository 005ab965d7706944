//! Disk I/O operations for RKAF images

use crate::checksum::checksum_stream;
use crate::error::{RkafError, Result};
use crate::header::{Header, HEADER_SIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Size of the trailing image checksum
pub const CHECKSUM_SIZE: u64 = 4;

/// Disk-backed RKAF image
pub struct ImageFile {
    file: File,
    path: PathBuf,
}

impl ImageFile {
    /// Create a new image file with a zeroed header placeholder
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&[0u8; HEADER_SIZE])?;

        Ok(ImageFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Open an existing image file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&path)?;

        Ok(ImageFile {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Read the header without checking its magic
    pub fn read_header(&mut self) -> Result<Header> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(HEADER_SIZE);
        (&mut self.file)
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut buffer)?;
        Header::from_bytes(&buffer)
    }

    /// Rewrite the header at offset 0 and return to the end of the file
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    /// Current write position as a 32-bit image offset
    pub fn position(&mut self) -> Result<u32> {
        let pos = self.file.stream_position()?;
        u32::try_from(pos).map_err(|_| {
            RkafError::ImageTooLarge(format!("offset {:#x} exceeds 32 bits", pos))
        })
    }

    /// Append raw bytes at the current position
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    /// Checksum over the first `len` bytes of the file
    pub fn checksum(&mut self, len: u32) -> Result<u32> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(checksum_stream(&mut self.file, u64::from(len))?)
    }

    /// Append the image checksum after the payload region
    pub fn append_checksum(&mut self, crc: u32) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    /// Read the stored checksum located at `length`
    pub fn read_checksum(&mut self, length: u32) -> Result<u32> {
        self.file.seek(SeekFrom::Start(u64::from(length)))?;
        let mut bytes = [0u8; CHECKSUM_SIZE as usize];
        self.file.read_exact(&mut bytes).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                RkafError::MalformedHeader(format!(
                    "declared length {:#x} leaves no room for the checksum",
                    length
                ))
            } else {
                RkafError::Io(e)
            }
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Copy `len` bytes starting at `offset` into a new file at `dest`
    ///
    /// Parent directories are created as needed. Returns the number of
    /// bytes copied, which is short only if the image ends early.
    pub fn extract(&mut self, offset: u64, len: u64, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("  Extract {:?}, offset {:#x}, len {}", dest, offset, len);

        self.file.seek(SeekFrom::Start(offset))?;
        let mut writer = BufWriter::new(File::create(dest)?);
        let copied = io::copy(&mut (&mut self.file).take(len), &mut writer)?;
        writer.flush()?;

        if copied < len {
            warn!(
                "Short read extracting {:?}: expected {} bytes, got {}",
                dest, len, copied
            );
        }

        Ok(copied)
    }

    /// Total size of the file on disk
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_create_writes_placeholder() {
        let temp = NamedTempFile::new().unwrap();
        let mut image = ImageFile::create(temp.path()).unwrap();
        assert_eq!(image.position().unwrap() as usize, HEADER_SIZE);
        assert_eq!(image.len().unwrap(), HEADER_SIZE as u64);

        // placeholder is all zeros, so the magic is missing
        let header = image.read_header().unwrap();
        assert!(header.validate_magic().is_err());
    }

    #[test]
    fn test_write_and_read_header() {
        let temp = NamedTempFile::new().unwrap();
        let mut image = ImageFile::create(temp.path()).unwrap();
        image.append(b"payload").unwrap();

        let mut header = Header::new();
        header.length = 0x1007;
        image.write_header(&header).unwrap();
        assert_eq!(image.position().unwrap(), 0x1007);
        drop(image);

        let mut image = ImageFile::open(temp.path()).unwrap();
        let read = image.read_header().unwrap();
        assert!(read.validate_magic().is_ok());
        assert_eq!(read.length, 0x1007);
    }

    #[test]
    fn test_checksum_round_trip() {
        let temp = NamedTempFile::new().unwrap();
        let mut image = ImageFile::create(temp.path()).unwrap();
        image.append(&[0x5Au8; 100]).unwrap();
        let length = image.position().unwrap();
        let crc = image.checksum(length).unwrap();
        image.append_checksum(crc).unwrap();
        drop(image);

        let bytes = std::fs::read(temp.path()).unwrap();
        assert_eq!(bytes.len(), length as usize + 4);
        assert_eq!(crc, checksum(&bytes[..length as usize]));

        let mut image = ImageFile::open(temp.path()).unwrap();
        assert_eq!(image.read_checksum(length).unwrap(), crc);
    }

    #[test]
    fn test_read_checksum_past_end() {
        let temp = NamedTempFile::new().unwrap();
        ImageFile::create(temp.path()).unwrap();
        let mut image = ImageFile::open(temp.path()).unwrap();
        assert!(matches!(
            image.read_checksum(HEADER_SIZE as u32),
            Err(RkafError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_extract_creates_parent_dirs() {
        let temp = NamedTempFile::new().unwrap();
        let mut image = ImageFile::create(temp.path()).unwrap();
        image.append(b"0123456789").unwrap();

        let out = tempdir().unwrap();
        let dest = out.path().join("Image/sub/part.img");
        let copied = image.extract(HEADER_SIZE as u64 + 2, 5, &dest).unwrap();
        assert_eq!(copied, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"23456");
    }

    #[test]
    fn test_short_header_is_malformed() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"RKAF").unwrap();
        let mut image = ImageFile::open(temp.path()).unwrap();
        assert!(matches!(
            image.read_header(),
            Err(RkafError::MalformedHeader(_))
        ));
    }
}
