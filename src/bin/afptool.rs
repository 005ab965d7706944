//! afptool
//!
//! Packs and unpacks Rockchip RKAF firmware update images

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rkaf_rs::{Container, PackOptions, Packer, UnpackOptions, Unpacker};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "afptool")]
#[command(about = "Pack and unpack Rockchip RKAF firmware images")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pack a source directory into an image
    Pack {
        /// Directory holding `parameter`, `package-file` and the payloads
        src_dir: PathBuf,

        /// Image file to write
        dst_file: PathBuf,

        /// Parameter descriptor name inside the source directory
        #[arg(long, default_value = "parameter")]
        parameter: String,

        /// Package list name inside the source directory
        #[arg(long, default_value = "package-file")]
        package_file: String,
    },

    /// Verify an image and extract its partitions
    Unpack {
        /// Image file to read
        src_file: PathBuf,

        /// Directory to extract into
        dst_dir: PathBuf,

        /// Do not write the raw `header` dump
        #[arg(long)]
        no_header: bool,
    },

    /// Show the header and partition table of an image
    Info {
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check magic, checksum and entry ranges without extracting
    Verify { file: PathBuf },
}

/// Accept the historical `-pack` / `-unpack` spellings
fn rewrite_legacy_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if i != 1 {
                return arg;
            }
            match arg.to_str() {
                Some("-pack") => OsString::from("pack"),
                Some("-unpack") => OsString::from("unpack"),
                _ => arg,
            }
        })
        .collect()
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Pack {
            src_dir,
            dst_file,
            parameter,
            package_file,
        } => {
            let options = PackOptions::new()
                .parameter_file(parameter)
                .package_file(package_file);
            let summary = Packer::new(&src_dir)
                .with_options(options)
                .pack(&dst_file)
                .with_context(|| format!("packing {:?} into {:?}", src_dir, dst_file))?;
            info!(
                "Pack OK: {} entries, crc {:#010x}",
                summary.header.num_parts, summary.checksum
            );
        }

        Command::Unpack {
            src_file,
            dst_dir,
            no_header,
        } => {
            let report = Unpacker::new()
                .with_options(UnpackOptions::new().dump_header(!no_header))
                .unpack(&src_file, &dst_dir)
                .with_context(|| format!("unpacking {:?} into {:?}", src_file, dst_dir))?;
            info!(
                "Unpack OK: {} extracted, {} skipped",
                report.extracted.len(),
                report.skipped.len()
            );
        }

        Command::Info { file, json } => {
            let container =
                Container::open(&file).with_context(|| format!("reading {:?}", file))?;
            let summary = container.summary();

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            println!("Model:         {}", summary.model);
            println!("ID:            {}", summary.id);
            println!("Manufacturer:  {}", summary.manufacturer);
            println!("Version:       {}", summary.version);
            println!("Length:        {:#010x}", summary.length);
            println!("Checksum:      {:#010x}", summary.checksum);
            println!();
            println!(
                "{:<32} {:<40} {:>10} {:>10} {:>10} {:>10}",
                "NAME", "FILE", "NAND_ADDR", "NAND_SIZE", "POS", "SIZE"
            );
            for entry in &summary.entries {
                println!(
                    "{:<32} {:<40} {:#010x} {:#010x} {:#010x} {:#010x}",
                    entry.name, entry.filename, entry.nand_addr, entry.nand_size, entry.pos,
                    entry.size
                );
            }
        }

        Command::Verify { file } => {
            let container =
                Container::open(&file).with_context(|| format!("verifying {:?}", file))?;
            println!(
                "{:?}: checksum {:#010x} OK, {} entries",
                file,
                container.checksum(),
                container.entries().count()
            );
            for skipped in container.skipped_entries() {
                println!("  would skip {}: {}", skipped.name, skipped.reason);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse_from(rewrite_legacy_args(std::env::args_os()));

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(rewrite_legacy_args(args.iter().map(|a| OsString::from(*a))))
    }

    #[test]
    fn test_legacy_pack_spelling() {
        let args = parse(&["afptool", "-pack", "src", "update.img"]);
        assert!(matches!(
            args.command,
            Command::Pack { ref src_dir, .. } if src_dir == &PathBuf::from("src")
        ));
    }

    #[test]
    fn test_legacy_unpack_spelling() {
        let args = parse(&["afptool", "-unpack", "update.img", "out"]);
        assert!(matches!(
            args.command,
            Command::Unpack { no_header: false, .. }
        ));
    }

    #[test]
    fn test_info_json_flag() {
        let args = parse(&["afptool", "info", "update.img", "--json"]);
        assert!(matches!(args.command, Command::Info { json: true, .. }));
    }
}
