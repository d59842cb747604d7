#![no_main]

use libfuzzer_sys::fuzz_target;
use opcodex_encoding::nasm::InsnsEntry;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(entry) = InsnsEntry::parse_line(line) {
        let _ = entry.to_opcode_encodings();
    }
});
