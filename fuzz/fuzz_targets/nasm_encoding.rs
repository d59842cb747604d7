#![no_main]

use libfuzzer_sys::fuzz_target;
use opcodex_encoding::nasm::{parse_encoding, CompileContext, OperandKind};
use opcodex_encoding::{ConditionCode, VexEncoding};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Errors are fine, panics are not
    let _ = VexEncoding::parse(text);

    let Ok(parsed) = parse_encoding(text) else {
        return;
    };
    let ctx = CompileContext::default()
        .with_rm_hint(OperandKind::Memory)
        .with_condition_code(ConditionCode::NotEqual);
    for long_mode in [None, Some(false), Some(true)] {
        if let Ok(encoding) = parsed.to_opcode_encoding(&ctx.with_long_mode(long_mode)) {
            // Rendering must not panic either
            let _ = encoding.to_string();
        }
    }
});
