#![no_main]
use libfuzzer_sys::fuzz_target;
use rkaf_rs::core::mtdparts::{parse_hex_prefix, MAX_PARTITIONS};
use rkaf_rs::PartitionTable;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = std::str::from_utf8(data) else {
        return;
    };

    let (_, rest) = parse_hex_prefix(value);
    assert!(rest.len() <= value.len());

    let mut table = PartitionTable::new();
    let _ = table.parse_mtdparts(value);
    assert!(table.len() <= MAX_PARTITIONS);
    for part in table.iter() {
        assert!(part.name.len() < 32);
    }
});
