#![no_main]
use libfuzzer_sys::fuzz_target;
use rkaf_rs::core::descriptor::parse_package_bytes;
use rkaf_rs::ParameterFile;

fuzz_target!(|data: &[u8]| {
    if let Ok(parsed) = ParameterFile::parse_bytes(data, "parameter") {
        let _ = parse_package_bytes(data, "package-file", &parsed.partitions);
    }
});
