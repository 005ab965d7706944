#![no_main]
use libfuzzer_sys::fuzz_target;
use rkaf_rs::core::unpacker::plan_entries;
use rkaf_rs::core::validation::extraction_range;
use rkaf_rs::{Header, HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    let header = match Header::from_bytes(data) {
        Ok(h) => h,
        Err(_) => {
            assert!(data.len() < HEADER_SIZE);
            return;
        }
    };

    // Re-encoding must reproduce the header bytes exactly
    assert_eq!(header.to_bytes().as_slice(), &data[..HEADER_SIZE]);

    for (_, part) in header.entries() {
        let _ = extraction_range(part);
    }

    let (extract, _) = plan_entries(&header);
    for entry in extract {
        assert!(entry.offset + entry.size <= u64::from(header.length));
    }
});
