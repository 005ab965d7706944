//! Text descriptors read from the source directory when packing
//!
//! - `parameter`: `KEY:value` lines carrying the machine identity, the
//!   firmware version and the kernel command line with the flash layout.
//! - `package-file`: `name  path` lines listing the payloads, in image
//!   order.
//!
//! Blank lines and lines starting with `#` are ignored in both.

use crate::error::{RkafError, Result};
use crate::fixed_str::FixedStr;
use crate::header::{
    FirmwareVersion, FILENAME_LEN, ID_LEN, MANUFACTURER_LEN, MODEL_LEN, NAME_LEN,
};
use crate::mtdparts::PartitionTable;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Longest parameter line, terminator included
pub const MAX_PARAMETER_LINE: usize = 2047;

/// Longest package-list line, terminator included
pub const MAX_PACKAGE_LINE: usize = 511;

/// Maximum number of packages in one image
pub const MAX_PACKAGES: usize = 32;

/// Flash address recorded for packages without a matching partition
pub const UNASSIGNED_ADDR: u32 = 0xFFFF_FFFF;

/// Package path standing for the image itself
pub const SELF_PATH: &str = "SELF";

/// Package path for a placeholder entry with no payload
pub const RESERVED_PATH: &str = "RESERVED";

/// Iterate over meaningful lines as `(line_number, trimmed_text)`
///
/// Fails on lines longer than `max_len` bytes, terminator included. Bytes
/// that are not UTF-8 are replaced, so stray encodings in comments or
/// unused keys do not stop parsing.
fn content_lines<'a>(
    bytes: &'a [u8],
    source: &'a str,
    max_len: usize,
) -> impl Iterator<Item = Result<(usize, String)>> + 'a {
    bytes
        .split_inclusive(|&b| b == b'\n')
        .enumerate()
        .filter_map(move |(idx, raw)| {
            let line_no = idx + 1;
            if raw.len() > max_len {
                return Some(Err(RkafError::MalformedDescriptor {
                    file: source.to_string(),
                    line: line_no,
                    reason: format!("line longer than {} bytes", max_len),
                }));
            }
            let text = String::from_utf8_lossy(raw);
            let line = text.trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some(Ok((line_no, line.to_string())))
            }
        })
}

/// Machine identity written into the image header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub version: FirmwareVersion,
    pub model: FixedStr<MODEL_LEN>,
    pub id: FixedStr<ID_LEN>,
    pub manufacturer: FixedStr<MANUFACTURER_LEN>,
}

/// Parsed `parameter` descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterFile {
    pub info: ImageInfo,
    pub partitions: PartitionTable,
}

impl ParameterFile {
    /// Read and parse a parameter descriptor from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Parsing parameters from {:?}", path);
        let bytes = fs::read(path)?;
        Self::parse_bytes(&bytes, &path.display().to_string())
    }

    /// Parse parameter descriptor text, `source` names it in errors
    pub fn parse(text: &str, source: &str) -> Result<Self> {
        Self::parse_bytes(text.as_bytes(), source)
    }

    /// Parse a raw parameter descriptor
    ///
    /// The key is everything before the first `:` and the value everything
    /// after it, both kept as written. Only the line itself is trimmed.
    pub fn parse_bytes(bytes: &[u8], source: &str) -> Result<Self> {
        let mut parsed = ParameterFile::default();

        for line in content_lines(bytes, source, MAX_PARAMETER_LINE) {
            let (line_no, line) = line?;
            let Some((key, value)) = line.split_once(':') else {
                debug!("Line {} has no key separator, skipping", line_no);
                continue;
            };
            parsed.apply_key(key, value, source, line_no)?;
        }

        Ok(parsed)
    }

    fn apply_key(&mut self, key: &str, value: &str, source: &str, line: usize) -> Result<()> {
        debug!("  Parse key: {}", key);
        match key {
            "FIRMWARE_VER" => {
                self.info.version = value.parse::<FirmwareVersion>().map_err(|reason| {
                    RkafError::MalformedDescriptor {
                        file: source.to_string(),
                        line,
                        reason,
                    }
                })?;
                info!("  Firmware version: {}", self.info.version);
            }
            "MACHINE_MODEL" => self.info.model = FixedStr::new("MACHINE_MODEL", value)?,
            "MACHINE_ID" => self.info.id = FixedStr::new("MACHINE_ID", value)?,
            "MANUFACTURER" => {
                self.info.manufacturer = FixedStr::new("MANUFACTURER", value)?;
            }
            "CMDLINE" => {
                for token in value.split(' ').filter(|t| !t.is_empty()) {
                    if let Some(("mtdparts", layout)) = token.split_once('=') {
                        self.partitions.parse_mtdparts(layout)?;
                    }
                }
            }
            _ => warn!("Ignoring unknown parameter key: {}", key),
        }
        Ok(())
    }
}

/// One line of the package list, resolved against the flash layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMapping {
    pub name: FixedStr<NAME_LEN>,
    pub path: FixedStr<FILENAME_LEN>,
    pub nand_addr: u32,
    pub nand_size: u32,
}

impl PackageMapping {
    /// Build a mapping and resolve its flash placement by name
    pub fn resolve(name: &str, path: &str, partitions: &PartitionTable) -> Result<Self> {
        let (nand_addr, nand_size) = match partitions.find(name) {
            Some(part) => (part.start, part.size),
            None => (UNASSIGNED_ADDR, 0),
        };

        Ok(PackageMapping {
            name: FixedStr::new("package name", name)?,
            path: FixedStr::new("package path", path)?,
            nand_addr,
            nand_size,
        })
    }

    pub fn is_self(&self) -> bool {
        self.path == SELF_PATH
    }

    pub fn is_reserved(&self) -> bool {
        self.path == RESERVED_PATH
    }

    pub fn is_assigned(&self) -> bool {
        self.nand_addr != UNASSIGNED_ADDR
    }
}

/// Read and parse a package list from disk
pub fn load_package_list<P: AsRef<Path>>(
    path: P,
    partitions: &PartitionTable,
) -> Result<Vec<PackageMapping>> {
    let path = path.as_ref();
    info!("Parsing packages from {:?}", path);
    let bytes = fs::read(path)?;
    parse_package_bytes(&bytes, &path.display().to_string(), partitions)
}

/// Parse package-list text into mappings, in file order
pub fn parse_package_list(
    text: &str,
    source: &str,
    partitions: &PartitionTable,
) -> Result<Vec<PackageMapping>> {
    parse_package_bytes(text.as_bytes(), source, partitions)
}

/// Parse a raw package list, in file order
pub fn parse_package_bytes(
    bytes: &[u8],
    source: &str,
    partitions: &PartitionTable,
) -> Result<Vec<PackageMapping>> {
    let mut packages = Vec::new();

    for line in content_lines(bytes, source, MAX_PACKAGE_LINE) {
        let (line_no, line) = line?;

        let split = line.find([' ', '\t']).unwrap_or(line.len());
        let name = &line[..split];
        let path = line[split..].trim_start_matches([' ', '\t']);

        if path.is_empty() {
            return Err(RkafError::MalformedDescriptor {
                file: source.to_string(),
                line: line_no,
                reason: format!("package '{}' has no path", name),
            });
        }

        if packages.len() >= MAX_PACKAGES {
            return Err(RkafError::TooManyEntries {
                kind: "packages",
                max: MAX_PACKAGES,
            });
        }

        let package = PackageMapping::resolve(name, path, partitions)?;
        debug!(
            "  Package {}: {} -> {} (addr={:#x}, size={:#x})",
            packages.len(),
            package.name,
            package.path,
            package.nand_addr,
            package.nand_size
        );
        packages.push(package);
    }

    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMETER: &str = "\
# comment line
FIRMWARE_VER: 8.1.0
MACHINE_MODEL: RK3399
MACHINE_ID: 007
MANUFACTURER: RK3399
MAGIC: 0x5041524B
CMDLINE: console=ttyFIQ0 androidboot.baseband=N/A mtdparts=rk29xxnand:0x00002000@0x00002000(uboot),0x00008000@0x00004000(boot),-@0x0000c000(userdata:grow)
";

    #[test]
    fn test_parse_parameter_file() {
        let parsed = ParameterFile::parse(PARAMETER, "parameter").unwrap();
        assert_eq!(parsed.info.version, FirmwareVersion::new(8, 1, 0));
        // values keep the space after the separator
        assert_eq!(parsed.info.model, " RK3399");
        assert_eq!(parsed.info.id, " 007");
        assert_eq!(parsed.info.manufacturer, " RK3399");
        assert_eq!(parsed.partitions.len(), 3);
        assert_eq!(parsed.partitions.find("boot").unwrap().start, 0x4000);
    }

    #[test]
    fn test_invalid_version_reports_line() {
        let err = ParameterFile::parse("\n\nFIRMWARE_VER:1.2\n", "parameter").unwrap_err();
        assert!(matches!(
            err,
            RkafError::MalformedDescriptor { line: 3, .. }
        ));
    }

    #[test]
    fn test_model_too_long() {
        let text = format!("MACHINE_MODEL:{}\n", "m".repeat(MODEL_LEN));
        assert!(matches!(
            ParameterFile::parse(&text, "parameter"),
            Err(RkafError::FieldTooLong { field: "MACHINE_MODEL", .. })
        ));

        let text = format!("MACHINE_MODEL:{}\n", "m".repeat(MODEL_LEN - 1));
        assert!(ParameterFile::parse(&text, "parameter").is_ok());
    }

    #[test]
    fn test_overlong_line_rejected() {
        let text = format!("CMDLINE:{}\n", "x".repeat(MAX_PARAMETER_LINE));
        assert!(matches!(
            ParameterFile::parse(&text, "parameter"),
            Err(RkafError::MalformedDescriptor { line: 1, .. })
        ));
    }

    #[test]
    fn test_last_line_without_terminator() {
        let parsed = ParameterFile::parse("MACHINE_ID:abc", "parameter").unwrap();
        assert_eq!(parsed.info.id, "abc");
    }

    #[test]
    fn test_crlf_lines() {
        let parsed =
            ParameterFile::parse("MACHINE_MODEL:RK3288\r\nMACHINE_ID:1\r\n", "parameter").unwrap();
        assert_eq!(parsed.info.model, "RK3288");
        assert_eq!(parsed.info.id, "1");
    }

    #[test]
    fn test_values_kept_verbatim() {
        let parsed =
            ParameterFile::parse("MACHINE_MODEL:RK3399\nMANUFACTURER:Rock chip  \n", "parameter")
                .unwrap();
        assert_eq!(parsed.info.model, "RK3399");
        assert_eq!(parsed.info.manufacturer, "Rock chip");

        // keys are not trimmed, so this one is unknown
        let parsed = ParameterFile::parse("MACHINE_ID :1\n", "parameter").unwrap();
        assert_eq!(parsed.info.id, "");
    }

    #[test]
    fn test_non_utf8_comment_accepted() {
        let bytes = b"# r\xe9vision \xc4\xe3\xba\xc3\nMACHINE_MODEL:RK3399\nFIRMWARE_VER:1.0.2\n";
        let parsed = ParameterFile::parse_bytes(bytes, "parameter").unwrap();
        assert_eq!(parsed.info.model, "RK3399");
        assert_eq!(parsed.info.version, FirmwareVersion::new(1, 0, 2));

        let packages = parse_package_bytes(
            b"# \xff\xfe\nboot\tImage/boot.img\n",
            "package-file",
            &PartitionTable::new(),
        )
        .unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].path, "Image/boot.img");
    }

    #[test]
    fn test_line_limit_counts_raw_bytes() {
        // 2046 raw bytes plus the newline fit, even though lossy decoding
        // would triple the width of each invalid byte
        let mut line = b"#".to_vec();
        line.extend(std::iter::repeat(0xFFu8).take(MAX_PARAMETER_LINE - 2));
        line.push(b'\n');
        assert!(ParameterFile::parse_bytes(&line, "parameter").is_ok());
    }

    #[test]
    fn test_parse_package_list() {
        let parameter = ParameterFile::parse(PARAMETER, "parameter").unwrap();
        let text = "\
# NAME\tRelative path
package-file\tpackage-file
parameter       Image/parameter.txt
boot            Image/boot.img
misc\tImage/misc.img
backup          SELF
";
        let packages = parse_package_list(text, "package-file", &parameter.partitions).unwrap();
        assert_eq!(packages.len(), 5);

        assert_eq!(packages[0].name, "package-file");
        assert!(!packages[0].is_assigned());
        assert_eq!(packages[0].nand_size, 0);

        // falls back to the built-in parameter partition
        assert_eq!(packages[1].nand_addr, 0);
        assert_eq!(packages[1].nand_size, 0x2000);

        assert_eq!(packages[2].path, "Image/boot.img");
        assert_eq!(packages[2].nand_addr, 0x4000);
        assert_eq!(packages[2].nand_size, 0x8000);

        assert_eq!(packages[3].path, "Image/misc.img");
        assert!(packages[4].is_self());
    }

    #[test]
    fn test_package_without_path() {
        let err = parse_package_list("boot\n", "package-file", &PartitionTable::new()).unwrap_err();
        assert!(matches!(err, RkafError::MalformedDescriptor { line: 1, .. }));
    }

    #[test]
    fn test_package_path_too_long() {
        let text = format!("boot {}\n", "p".repeat(FILENAME_LEN));
        assert!(matches!(
            parse_package_list(&text, "package-file", &PartitionTable::new()),
            Err(RkafError::FieldTooLong { .. })
        ));
    }

    #[test]
    fn test_too_many_packages() {
        let text: String = (0..=MAX_PACKAGES)
            .map(|i| format!("p{} file{}\n", i, i))
            .collect();
        assert!(matches!(
            parse_package_list(&text, "package-file", &PartitionTable::new()),
            Err(RkafError::TooManyEntries { kind: "packages", .. })
        ));
    }
}
