#![no_main]

use libfuzzer_sys::fuzz_target;
use opcodex_encoding::table::MAX_INSTRUCTION_LENGTH;
use opcodex_encoding::{CodeSegmentType, OpcodeTable};

const SAMPLE_TABLE: &str =
    include_str!("../../crates/opcodex-encoding/tests/fixtures/insns_sample.dat");

fuzz_target!(|data: &[u8]| {
    let (table, _) = OpcodeTable::from_insns(SAMPLE_TABLE);

    for mode in [CodeSegmentType::Ia16, CodeSegmentType::Ia32, CodeSegmentType::X64] {
        if let Ok(decoded) = table.decode(data, mode) {
            assert!(decoded.length <= MAX_INSTRUCTION_LENGTH);
            assert!(decoded.length <= data.len());
        }

        // Decoding a block skips a byte on every failure, so it always ends
        let _ = table.decode_all(data, mode);
    }
});
