//! Property-based tests for the encoding model.
//!
//! These tests verify invariants that should hold for all inputs:
//! - Bit pattern normalization is idempotent
//! - Constant patterns evaluate to their literal value
//! - Encodings survive a trip through their text forms
//! - Prefix list insertion and removal are inverses
//! - Table decoding never panics and respects the length limit

use proptest::prelude::*;

use opcodex_encoding::bits::{self, BitsValue};
use opcodex_encoding::nasm::{compile_encoding, CompileContext};
use opcodex_encoding::table::MAX_INSTRUCTION_LENGTH;
use opcodex_encoding::{
    AddressSize, AddressingForm, CodeSegmentType, EncodingError, ImmediateSizeEncoding,
    ImmediateVariableSize, LegacyPrefix, LegacyPrefixList, OpcodeEncoding, OpcodeEncodingFields,
    OpcodeMap, OpcodeTable, OperandSizeEncoding, SimdPrefix, VectorSize, VexEncoding, VexFields,
    VexRegOperand, VexType,
};

// =============================================================================
// Strategies
// =============================================================================

fn legacy_prefix() -> impl Strategy<Value = LegacyPrefix> {
    prop::sample::select(vec![
        0xF0u8, 0xF2, 0xF3, 0x2E, 0x36, 0x3E, 0x26, 0x64, 0x65, 0x66, 0x67,
    ])
    .prop_filter_map("legacy prefix byte", LegacyPrefix::from_byte)
}

fn simd_prefix() -> impl Strategy<Value = SimdPrefix> {
    prop::sample::select(vec![
        SimdPrefix::None,
        SimdPrefix::Prefix66,
        SimdPrefix::PrefixF3,
        SimdPrefix::PrefixF2,
    ])
}

fn vector_size() -> impl Strategy<Value = Option<VectorSize>> {
    prop::option::of(prop::sample::select(vec![
        VectorSize::V128,
        VectorSize::V256,
        VectorSize::V512,
    ]))
}

fn vex_fields() -> impl Strategy<Value = VexFields> {
    (
        prop::sample::select(vec![VexType::Vex, VexType::Xop, VexType::Evex]),
        prop::option::of(prop::sample::select(vec![
            VexRegOperand::Source,
            VexRegOperand::SecondSource,
            VexRegOperand::Dest,
        ])),
        vector_size(),
        simd_prefix(),
        0usize..3,
        prop::option::of(any::<bool>()),
    )
        .prop_map(|(vex_type, reg_operand, vector_size, simd_prefix, map, w)| {
            let map = match vex_type {
                VexType::Xop => [OpcodeMap::Xop8, OpcodeMap::Xop9, OpcodeMap::Xop10][map],
                _ => [OpcodeMap::Escape0F, OpcodeMap::Escape0F38, OpcodeMap::Escape0F3A][map],
            };
            let vector_size = match (vex_type, vector_size) {
                (VexType::Evex, size) => size,
                (_, Some(VectorSize::V512)) => Some(VectorSize::V256),
                (_, size) => size,
            };
            VexFields {
                vex_type,
                reg_operand,
                vector_size,
                simd_prefix,
                map,
                w,
            }
        })
}

fn addressing_form() -> impl Strategy<Value = AddressingForm> {
    prop_oneof![
        Just(AddressingForm::None),
        Just(AddressingForm::MainByteReg),
        Just(AddressingForm::Any),
        (0u8..8).prop_map(AddressingForm::FixedRegAnyRm),
        (0u8..8).prop_map(AddressingForm::FixedRegDirectRm),
        (0xC0u8..=0xFF).prop_map(AddressingForm::FixedValue),
    ]
}

fn immediate_size() -> impl Strategy<Value = ImmediateSizeEncoding> {
    (
        0u8..=8,
        prop::option::of(prop::sample::select(vec![
            ImmediateVariableSize::WordOrDword,
            ImmediateVariableSize::WordDwordOrQword,
        ])),
    )
        .prop_map(|(fixed_bytes, variable)| ImmediateSizeEncoding {
            fixed_bytes,
            variable,
        })
}

/// Field sets that satisfy the construction invariants by construction.
fn encoding_fields() -> impl Strategy<Value = OpcodeEncodingFields> {
    (
        prop::option::of(vex_fields()),
        prop::option::of(any::<bool>()),
        prop::option::of(prop::sample::select(vec![
            AddressSize::A16,
            AddressSize::A32,
            AddressSize::A64,
        ])),
        prop::sample::select(vec![
            OperandSizeEncoding::Any,
            OperandSizeEncoding::Word,
            OperandSizeEncoding::Dword,
            OperandSizeEncoding::NoPromotion,
            OperandSizeEncoding::Promotion,
        ]),
        prop::option::of(simd_prefix()),
        0usize..4,
        any::<u8>(),
        addressing_form(),
        immediate_size(),
        prop::option::of(any::<u8>()),
    )
        .prop_map(
            |(vex, x64, address_size, operand_size, simd, map, main_byte, form, imm, ext)| {
                let mut f = OpcodeEncodingFields {
                    x64,
                    address_size,
                    operand_size,
                    simd_prefix: simd,
                    map: [
                        OpcodeMap::Default,
                        OpcodeMap::Escape0F,
                        OpcodeMap::Escape0F38,
                        OpcodeMap::Escape0F3A,
                    ][map],
                    main_byte,
                    addressing_form: form,
                    immediate_size: imm,
                    imm8_ext: ext,
                    ..Default::default()
                };
                match f.address_size {
                    Some(AddressSize::A64) => f.x64 = Some(true),
                    Some(AddressSize::A16) => f.x64 = Some(false),
                    _ => {}
                }
                if let Some(vex) = vex {
                    f.vex_type = Some(vex.vex_type);
                    f.vector_size = vex.vector_size;
                    f.simd_prefix = Some(vex.simd_prefix);
                    f.map = vex.map;
                    f.operand_size = OperandSizeEncoding::from_promotion(vex.w);
                } else if f.operand_size == OperandSizeEncoding::Promotion && f.x64 != Some(true) {
                    f.operand_size = OperandSizeEncoding::NoPromotion;
                }
                if f.addressing_form == AddressingForm::MainByteReg {
                    f.main_byte &= 0xF8;
                }
                if f.imm8_ext.is_some() {
                    f.immediate_size = ImmediateSizeEncoding::fixed(1);
                }
                f
            },
        )
}

/// True when the text form reads back into the same fields.
///
/// Main bytes that spell a SIMD prefix or an escape are read back as such,
/// and a bare trailing byte from `c0` up reads back as a fixed ModRM.
fn has_unambiguous_text(f: &OpcodeEncodingFields) -> bool {
    if f.vex_type.is_none() {
        match f.map {
            OpcodeMap::Default if matches!(f.main_byte, 0x0F | 0x66 | 0xF2 | 0xF3) => {
                return false
            }
            OpcodeMap::Escape0F if matches!(f.main_byte, 0x38 | 0x3A) => return false,
            _ => {}
        }
    }
    !(f.addressing_form == AddressingForm::None && f.imm8_ext.map_or(false, |b| b >= 0xC0))
}

// =============================================================================
// Bit patterns
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Normalizing a normalized pattern changes nothing.
    #[test]
    fn normalize_is_idempotent(pattern in "[01a-e_]{1,24}") {
        if let Ok(once) = bits::normalize(&pattern) {
            let twice = bits::normalize(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(!once.contains('_'));
        }
    }

    /// Constant patterns evaluate to their literal value.
    #[test]
    fn constant_evaluation_matches_literal(pattern in "[01][01_]{0,40}") {
        let constant = bits::try_as_constant(&pattern).unwrap();
        let evaluated = bits::evaluate(&pattern, |_| None).unwrap();
        prop_assert_eq!(constant, evaluated);
        prop_assert_eq!(evaluated.len() as usize, pattern.chars().filter(|&c| c != '_').count());
    }

    /// Variable runs are replaced by their bound value.
    #[test]
    fn variable_substitution(width in 1u8..16, value in any::<u64>()) {
        let value = value & ((1u64 << width) - 1);
        let pattern = format!("1_{}_0", "a".repeat(width as usize));
        let bound = BitsValue::new(value, width).unwrap();
        let result = bits::evaluate(&pattern, |c| (c == 'a').then_some(bound)).unwrap();
        prop_assert_eq!(result.len(), width + 2);
        prop_assert_eq!(result.bits(), (1u64 << (width + 1)) | (value << 1));
    }

    /// A bound value of the wrong width is rejected.
    #[test]
    fn width_mismatch_is_rejected(width in 0u8..8) {
        prop_assume!(width != 3);
        let bound = BitsValue::new(0, width).unwrap();
        let result = bits::evaluate("1aaa0", |_| Some(bound));
        prop_assert!(matches!(result, Err(EncodingError::InvalidOperation(_))));
    }
}

// =============================================================================
// Encodings
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// VEX descriptors survive packing and their dotted text form.
    #[test]
    fn vex_roundtrip(fields in vex_fields()) {
        let vex = VexEncoding::new(fields).unwrap();
        prop_assert_eq!(VexEncoding::from_bits(vex.to_bits()).unwrap(), vex);
        prop_assert_eq!(VexEncoding::parse(&vex.to_string()).unwrap(), vex);
        prop_assert_eq!(vex.fields(), fields);
    }

    /// Opcode encodings survive rendering and recompiling.
    #[test]
    fn opcode_encoding_text_roundtrip(fields in encoding_fields()) {
        prop_assume!(has_unambiguous_text(&fields));
        let encoding = OpcodeEncoding::new(fields).unwrap();
        let text = encoding.to_string();
        let reparsed = compile_encoding(&text, &CompileContext::default()).unwrap();
        prop_assert_eq!(reparsed, encoding, "{}", text);
    }

    /// Opcode encodings survive serde.
    #[test]
    fn opcode_encoding_json_roundtrip(fields in encoding_fields()) {
        let encoding = OpcodeEncoding::new(fields).unwrap();
        let json = serde_json::to_string(&encoding).unwrap();
        let back: OpcodeEncoding = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, encoding);
    }
}

// =============================================================================
// Legacy prefix list
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Inserting then removing at the same index restores the list.
    #[test]
    fn prefix_insert_remove_inverse(
        prefixes in prop::collection::vec(legacy_prefix(), 0..LegacyPrefixList::CAPACITY),
        prefix in legacy_prefix(),
        index in any::<prop::sample::Index>(),
    ) {
        let list = LegacyPrefixList::from_slice(&prefixes).unwrap();
        let index = index.index(list.len() + 1);
        let inserted = list.insert(index, prefix).unwrap();
        prop_assert_eq!(inserted.len(), list.len() + 1);
        prop_assert_eq!(inserted.get(index), Some(prefix));
        prop_assert_eq!(inserted.remove_at(index).unwrap(), list);
    }

    /// The packed list preserves encounter order.
    #[test]
    fn prefix_list_preserves_order(
        prefixes in prop::collection::vec(legacy_prefix(), 0..=LegacyPrefixList::CAPACITY),
    ) {
        let list = LegacyPrefixList::from_slice(&prefixes).unwrap();
        prop_assert_eq!(list.iter().collect::<Vec<_>>(), prefixes);
    }
}

// =============================================================================
// Table decoding
// =============================================================================

const SAMPLE_TABLE: &str = include_str!("fixtures/insns_sample.dat");

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5000))]

    /// Decoding arbitrary bytes should never panic.
    #[test]
    fn decode_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..24),
        mode in prop::sample::select(vec![
            CodeSegmentType::Ia16,
            CodeSegmentType::Ia32,
            CodeSegmentType::X64,
        ]),
    ) {
        let (table, _) = OpcodeTable::from_insns(SAMPLE_TABLE);
        if let Ok(decoded) = table.decode(&bytes, mode) {
            prop_assert!(decoded.length >= 1);
            prop_assert!(decoded.length <= MAX_INSTRUCTION_LENGTH);
            prop_assert!(decoded.length <= bytes.len());
            prop_assert!(!decoded.mnemonic.is_empty());
        }
    }
}
