//! Corruption detection tests
//!
//! Tests to verify that damaged images are rejected before anything is
//! written, and that a single bad entry does not stop the others.

use rkaf_rs::{
    checksum, pack, unpack, Container, FixedStr, Header, RkafError, SkipReason, HEADER_SIZE,
};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

/// Helper: Pack a small image and return its directory and path
fn packed_image() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("parameter"),
        "MACHINE_MODEL:RK3568\nCMDLINE:mtdparts=rk29xxnand:0x2000@0x4000(boot)\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("package-file"),
        "boot boot.img\nmisc misc.img\n",
    )
    .unwrap();
    fs::write(dir.path().join("boot.img"), vec![0x42u8; 5000]).unwrap();
    fs::write(dir.path().join("misc.img"), b"misc").unwrap();

    let img = dir.path().join("update.img");
    pack(dir.path(), &img).unwrap();
    (dir, img)
}

/// Helper: XOR one byte at `offset`
fn flip_byte(path: &Path, offset: u64) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset as usize] ^= 0xFF;
    fs::write(path, bytes).unwrap();
}

/// Helper: Rewrite the header and recompute the trailing checksum
fn rewrite_header(path: &Path, edit: impl FnOnce(&mut Header)) {
    let mut bytes = fs::read(path).unwrap();
    let mut header = Header::from_bytes(&bytes).unwrap();
    edit(&mut header);
    bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

    let length = header.length as usize;
    let crc = checksum(&bytes[..length]);
    bytes[length..length + 4].copy_from_slice(&crc.to_le_bytes());
    fs::write(path, bytes).unwrap();
}

#[test]
fn test_flipped_checksum_byte() {
    let (_dir, img) = packed_image();
    let len = fs::metadata(&img).unwrap().len();
    flip_byte(&img, len - 1);

    let out = tempdir().unwrap();
    let dest = out.path().join("unpacked");
    let err = unpack(&img, &dest).unwrap_err();
    assert!(matches!(err, RkafError::ChecksumMismatch { .. }));
    assert!(!dest.exists());
}

#[test]
fn test_flipped_payload_byte() {
    let (_dir, img) = packed_image();
    flip_byte(&img, HEADER_SIZE as u64 + 100);

    let out = tempdir().unwrap();
    let dest = out.path().join("unpacked");
    assert!(matches!(
        unpack(&img, &dest),
        Err(RkafError::ChecksumMismatch { .. })
    ));
    assert!(!dest.exists());
}

#[test]
fn test_bad_magic() {
    let (_dir, img) = packed_image();
    let mut file = OpenOptions::new().write(true).open(&img).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(b"RKFW").unwrap();
    drop(file);

    assert!(matches!(
        Container::open(&img),
        Err(RkafError::BadMagic { found, .. }) if &found == b"RKFW"
    ));
}

#[test]
fn test_truncated_header() {
    let dir = tempdir().unwrap();
    let img = dir.path().join("short.img");
    fs::write(&img, b"RKAF\x00\x10\x00\x00").unwrap();

    assert!(matches!(
        unpack(&img, dir.path().join("out")),
        Err(RkafError::MalformedHeader(_))
    ));
}

#[test]
fn test_length_past_end_of_file() {
    let (_dir, img) = packed_image();
    let len = fs::metadata(&img).unwrap().len();

    let mut bytes = fs::read(&img).unwrap();
    bytes[4..8].copy_from_slice(&((len as u32) + 0x1000).to_le_bytes());
    fs::write(&img, bytes).unwrap();

    assert!(matches!(
        Container::open(&img),
        Err(RkafError::MalformedHeader(_))
    ));
}

#[test]
fn test_out_of_range_entry_skipped() {
    let (_dir, img) = packed_image();
    rewrite_header(&img, |header| {
        header.parts[0].size = header.length;
    });

    let out = tempdir().unwrap();
    let report = unpack(&img, out.path()).unwrap();

    assert!(!out.path().join("boot.img").exists());
    assert_eq!(fs::read(out.path().join("misc.img")).unwrap(), b"misc");
    assert_eq!(report.extracted.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "boot");
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::InvalidRange(_)
    ));
}

#[test]
fn test_verify_lists_out_of_range_entry() {
    let (_dir, img) = packed_image();
    rewrite_header(&img, |header| {
        header.parts[1].pos = header.length;
    });

    let container = Container::open(&img).unwrap();
    let skipped = container.skipped_entries();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].name, "misc");
}

#[test]
fn test_escaping_filename_skipped() {
    let (dir, img) = packed_image();
    rewrite_header(&img, |header| {
        header.parts[1].filename = FixedStr::new("filename", "../escaped.img").unwrap();
    });

    let out = dir.path().join("out");
    let report = unpack(&img, &out).unwrap();
    assert!(!dir.path().join("escaped.img").exists());
    assert_eq!(report.skipped[0].reason, SkipReason::UnsafePath);
    assert_eq!(report.extracted.len(), 1);
}
