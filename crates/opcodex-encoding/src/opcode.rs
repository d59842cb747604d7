//! Opcode encoding descriptors and instruction matching.
//!
//! An [`OpcodeEncoding`] describes the byte-level shape of one opcode
//! variant: required mode and sizes, prefix scheme, opcode map, main byte,
//! ModR/M form and immediates. Matching a decoded instruction against it is
//! a two step process, mirroring how a decoder consumes bytes:
//!
//! 1. [`OpcodeEncoding::is_match_up_to_main_byte`] once the prefixes and
//!    main byte are known.
//! 2. [`OpcodeEncoding::is_match`] once the ModR/M byte and any 8-bit
//!    immediate have been read.

use crate::error::{EncodingError, Result};
use crate::modrm::ModRm;
use crate::prefix::InstructionPrefixes;
use crate::types::{
    AddressSize, CodeSegmentType, IntegerSize, OpcodeMap, SimdPrefix, VectorSize, VexType,
};
use crate::vex::{VexEncoding, VexFields};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How the operand size prefixes must look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperandSizeEncoding {
    /// 66, REX.W and VEX.W are all fair game.
    #[default]
    Any,
    /// 16-bit operand size, without REX.W.
    Word,
    /// 32-bit operand size, without REX.W.
    Dword,
    /// No REX.W, or VEX.W0. A set W bit fails the match.
    NoPromotion,
    /// REX.W, or VEX.W1.
    Promotion,
}

impl OperandSizeEncoding {
    /// The W bit implied by this rule, `None` if unconstrained.
    pub fn promotion(self) -> Option<bool> {
        match self {
            Self::Any => None,
            Self::Promotion => Some(true),
            Self::Word | Self::Dword | Self::NoPromotion => Some(false),
        }
    }

    pub fn from_promotion(promotion: Option<bool>) -> Self {
        match promotion {
            None => Self::Any,
            Some(true) => Self::Promotion,
            Some(false) => Self::NoPromotion,
        }
    }

    /// Word and Dword select through 66, which VEX-family prefixes replace.
    pub fn is_vex_compatible(self) -> bool {
        !matches!(self, Self::Word | Self::Dword)
    }

    fn is_match(self, prefixes: &InstructionPrefixes) -> bool {
        match self {
            Self::Any => true,
            Self::Word => prefixes.integer_operand_size() == IntegerSize::Word,
            Self::Dword => prefixes.integer_operand_size() == IntegerSize::Dword,
            Self::NoPromotion => !prefixes.is_promoted(),
            Self::Promotion => prefixes.is_promoted(),
        }
    }
}

/// Whether and how a ModR/M byte follows the main opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressingForm {
    /// No ModR/M byte.
    #[default]
    None,
    /// No ModR/M byte; a register is encoded in the low 3 bits of the main byte.
    MainByteReg,
    /// ModR/M with any value (`/r`).
    Any,
    /// ModR/M.reg fixed, any r/m (`/n`).
    FixedRegAnyRm(u8),
    /// ModR/M.reg fixed, register r/m only (`c0+r` style).
    FixedRegDirectRm(u8),
    /// ModR/M.reg fixed, memory r/m only.
    FixedRegMemRm(u8),
    /// Entire ModR/M byte fixed (`d9 f2`).
    FixedValue(u8),
}

impl AddressingForm {
    pub fn has_modrm(self) -> bool {
        !matches!(self, Self::None | Self::MainByteReg)
    }

    /// Bits of the main byte that identify the opcode.
    pub fn main_byte_mask(self) -> u8 {
        match self {
            Self::MainByteReg => 0xF8,
            _ => 0xFF,
        }
    }

    /// The fixed ModR/M.reg value, if any.
    pub fn fixed_reg(self) -> Option<u8> {
        match self {
            Self::FixedRegAnyRm(reg) | Self::FixedRegDirectRm(reg) | Self::FixedRegMemRm(reg) => {
                Some(reg)
            }
            Self::FixedValue(byte) => Some(ModRm::from_byte(byte).reg),
            _ => None,
        }
    }

    /// Checks a decoded (or absent) ModR/M byte against this form.
    pub fn is_valid(self, modrm: Option<ModRm>) -> bool {
        match (self, modrm) {
            (Self::None | Self::MainByteReg, None) => true,
            (Self::None | Self::MainByteReg, Some(_)) => false,
            (_, None) => false,
            (Self::Any, Some(_)) => true,
            (Self::FixedRegAnyRm(reg), Some(m)) => m.reg == reg,
            (Self::FixedRegDirectRm(reg), Some(m)) => m.reg == reg && m.is_direct(),
            (Self::FixedRegMemRm(reg), Some(m)) => m.reg == reg && !m.is_direct(),
            (Self::FixedValue(byte), Some(m)) => m.to_byte() == byte,
        }
    }
}

impl fmt::Display for AddressingForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::MainByteReg => write!(f, "+r"),
            Self::Any => write!(f, "/r"),
            Self::FixedRegAnyRm(reg) | Self::FixedRegMemRm(reg) => write!(f, "/{}", reg),
            Self::FixedRegDirectRm(reg) => write!(f, "{:02x}+r", 0xC0 | (reg << 3)),
            Self::FixedValue(byte) => write!(f, "{:02x}", byte),
        }
    }
}

/// Immediate whose size depends on the prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImmediateVariableSize {
    /// 2 bytes under 16-bit operand size, else 4 (`iwd`, `rel`).
    WordOrDword,
    /// 2, 4 or 8 bytes following the address size (`iwdq`).
    WordDwordOrQword,
}

impl ImmediateVariableSize {
    pub fn in_bytes(self, operand_size: IntegerSize, address_size: AddressSize) -> usize {
        match self {
            Self::WordOrDword if operand_size == IntegerSize::Word => 2,
            Self::WordOrDword => 4,
            Self::WordDwordOrQword => address_size.in_bytes(),
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::WordOrDword => "iwd",
            Self::WordDwordOrQword => "iwdq",
        }
    }
}

/// Total immediate size: a fixed byte count plus an optional variable part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImmediateSizeEncoding {
    pub fixed_bytes: u8,
    pub variable: Option<ImmediateVariableSize>,
}

impl ImmediateSizeEncoding {
    pub const NONE: ImmediateSizeEncoding = ImmediateSizeEncoding {
        fixed_bytes: 0,
        variable: None,
    };

    pub fn fixed(bytes: u8) -> Self {
        Self {
            fixed_bytes: bytes,
            variable: None,
        }
    }

    /// Size in bytes when it does not depend on the prefixes.
    pub fn fixed_in_bytes(self) -> Option<usize> {
        match self.variable {
            None => Some(self.fixed_bytes as usize),
            Some(_) => None,
        }
    }

    pub fn is_zero(self) -> bool {
        self.fixed_bytes == 0 && self.variable.is_none()
    }

    /// Size in bytes under the given effective sizes.
    pub fn in_bytes(self, operand_size: IntegerSize, address_size: AddressSize) -> usize {
        self.fixed_bytes as usize
            + self
                .variable
                .map_or(0, |v| v.in_bytes(operand_size, address_size))
    }
}

impl fmt::Display for ImmediateSizeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remaining = self.fixed_bytes;
        let mut first = true;
        for (size, token) in [(8, "iq"), (4, "id"), (2, "iw"), (1, "ib")] {
            while remaining >= size {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}", token)?;
                remaining -= size;
                first = false;
            }
        }
        if let Some(variable) = self.variable {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", variable.token())?;
        }
        Ok(())
    }
}

/// Plain field set used to build an [`OpcodeEncoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OpcodeEncodingFields {
    /// `Some(true)` for 64-bit mode only, `Some(false)` for outside it.
    pub x64: Option<bool>,
    pub address_size: Option<AddressSize>,
    pub operand_size: OperandSizeEncoding,
    /// `None` for legacy encodings.
    pub vex_type: Option<VexType>,
    pub vector_size: Option<VectorSize>,
    pub simd_prefix: Option<SimdPrefix>,
    pub map: OpcodeMap,
    pub main_byte: u8,
    pub addressing_form: AddressingForm,
    pub immediate_size: ImmediateSizeEncoding,
    /// Fixed 8-bit immediate that is part of the opcode (AAD's `0a`).
    pub imm8_ext: Option<u8>,
}

/// A validated opcode encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "OpcodeEncodingFields", into = "OpcodeEncodingFields")]
pub struct OpcodeEncoding {
    fields: OpcodeEncodingFields,
}

impl OpcodeEncoding {
    /// Validates the fields. Inconsistent combinations are rejected, never
    /// repaired.
    pub fn new(fields: OpcodeEncodingFields) -> Result<Self> {
        use EncodingError::ConstructionInvariant as Invariant;

        if fields.address_size == Some(AddressSize::A64) && fields.x64 != Some(true) {
            return Err(Invariant("64-bit addressing implies 64-bit mode"));
        }
        if fields.address_size == Some(AddressSize::A16) && fields.x64 != Some(false) {
            return Err(Invariant("16-bit addressing implies a non 64-bit mode"));
        }
        if fields.operand_size == OperandSizeEncoding::Promotion
            && fields.vex_type.is_none()
            && fields.x64 != Some(true)
        {
            return Err(Invariant("REX.W implies 64-bit mode"));
        }
        if !fields.operand_size.is_vex_compatible() && fields.vex_type.is_some() {
            return Err(Invariant("word/dword operand size implies a legacy encoding"));
        }
        if fields.vex_type.is_some() && fields.simd_prefix.is_none() {
            return Err(Invariant("VEX-family encodings imply a SIMD prefix"));
        }
        if fields.vex_type.is_none() && fields.vector_size.is_some() {
            return Err(Invariant("vector size implies a VEX-family encoding"));
        }
        if fields.vex_type.is_none() && fields.map.is_xop() {
            return Err(Invariant("XOP maps imply an XOP encoding"));
        }
        if fields.addressing_form == AddressingForm::MainByteReg && fields.main_byte & 0x7 != 0 {
            return Err(Invariant("main byte embedded register implies a multiple of 8"));
        }
        if let Some(reg) = fields.addressing_form.fixed_reg() {
            if reg > 7 {
                return Err(EncodingError::argument_range("modrm reg", reg));
            }
        }
        if let AddressingForm::FixedValue(byte) = fields.addressing_form {
            if !ModRm::from_byte(byte).is_direct() {
                return Err(Invariant("fixed ModRM byte implies a register form"));
            }
        }
        if fields.imm8_ext.is_some() && fields.immediate_size.fixed_in_bytes() != Some(1) {
            return Err(Invariant("imm8 opcode extension implies an 8-bit immediate"));
        }

        let encoding = Self { fields };
        if fields.vex_type.is_some() {
            encoding.to_vex_encoding()?;
        }
        Ok(encoding)
    }

    pub fn fields(&self) -> &OpcodeEncodingFields {
        &self.fields
    }

    pub fn x64(&self) -> Option<bool> {
        self.fields.x64
    }

    pub fn address_size(&self) -> Option<AddressSize> {
        self.fields.address_size
    }

    pub fn operand_size(&self) -> OperandSizeEncoding {
        self.fields.operand_size
    }

    pub fn vex_type(&self) -> Option<VexType> {
        self.fields.vex_type
    }

    pub fn vector_size(&self) -> Option<VectorSize> {
        self.fields.vector_size
    }

    pub fn simd_prefix(&self) -> Option<SimdPrefix> {
        self.fields.simd_prefix
    }

    pub fn map(&self) -> OpcodeMap {
        self.fields.map
    }

    pub fn main_byte(&self) -> u8 {
        self.fields.main_byte
    }

    pub fn addressing_form(&self) -> AddressingForm {
        self.fields.addressing_form
    }

    pub fn immediate_size(&self) -> ImmediateSizeEncoding {
        self.fields.immediate_size
    }

    pub fn imm8_ext(&self) -> Option<u8> {
        self.fields.imm8_ext
    }

    pub fn main_byte_mask(&self) -> u8 {
        self.fields.addressing_form.main_byte_mask()
    }

    pub fn has_modrm(&self) -> bool {
        self.fields.addressing_form.has_modrm()
    }

    pub fn is_valid_in_code_segment(&self, code_segment: CodeSegmentType) -> bool {
        match self.fields.x64 {
            None => true,
            Some(x64) => x64 == code_segment.is_long_mode(),
        }
    }

    /// Checks everything up to and including the main opcode byte.
    pub fn is_match_up_to_main_byte(&self, prefixes: &InstructionPrefixes, main_byte: u8) -> bool {
        let f = &self.fields;

        if !self.is_valid_in_code_segment(prefixes.code_segment) {
            return false;
        }
        if let Some(address_size) = f.address_size {
            if prefixes.effective_address_size() != address_size {
                return false;
            }
        }
        if prefixes.vex_type() != f.vex_type {
            return false;
        }
        if let Some(vector_size) = f.vector_size {
            if prefixes.vector_size() != Some(vector_size) {
                return false;
            }
        }
        if !f.operand_size.is_match(prefixes) {
            return false;
        }
        if let Some(simd_prefix) = f.simd_prefix {
            if prefixes.potential_simd_prefix() != simd_prefix {
                return false;
            }
        }
        if prefixes.map != f.map {
            return false;
        }

        main_byte & self.main_byte_mask() == f.main_byte
    }

    /// Full match once the ModR/M byte and 8-bit immediate are known.
    ///
    /// `imm8` must be present exactly when the immediate is one byte wide.
    pub fn is_match(
        &self,
        prefixes: &InstructionPrefixes,
        main_byte: u8,
        modrm: Option<ModRm>,
        imm8: Option<u8>,
    ) -> bool {
        if !self.is_match_up_to_main_byte(prefixes, main_byte) {
            return false;
        }
        if !self.fields.addressing_form.is_valid(modrm) {
            return false;
        }
        if imm8.is_some() != (self.fields.immediate_size.fixed_in_bytes() == Some(1)) {
            return false;
        }
        match self.fields.imm8_ext {
            Some(ext) => imm8 == Some(ext),
            None => true,
        }
    }

    /// Projects the VEX-family part of the encoding.
    ///
    /// The register operand role is not stored here and comes back unset.
    pub fn to_vex_encoding(&self) -> Result<VexEncoding> {
        let f = &self.fields;
        let vex_type = f.vex_type.ok_or_else(|| {
            EncodingError::invalid_operation("legacy encoding has no VEX-family form")
        })?;
        VexEncoding::new(VexFields {
            vex_type,
            reg_operand: None,
            vector_size: f.vector_size,
            simd_prefix: f.simd_prefix.unwrap_or(SimdPrefix::None),
            map: f.map,
            w: f.operand_size.promotion(),
        })
    }

    fn fmt_legacy_prefixes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = &self.fields;
        match fields.operand_size {
            OperandSizeEncoding::Word => write!(f, "o16 ")?,
            OperandSizeEncoding::Dword => write!(f, "o32 ")?,
            _ => {}
        }
        if let Some(simd_prefix) = fields.simd_prefix {
            write!(f, "{} ", simd_prefix.token())?;
        }
        match fields.operand_size {
            OperandSizeEncoding::Promotion => write!(f, "rex.w ")?,
            OperandSizeEncoding::NoPromotion => write!(f, "norexw ")?,
            _ => {}
        }
        match fields.map {
            OpcodeMap::Escape0F => write!(f, "0f "),
            OpcodeMap::Escape0F38 => write!(f, "0f 38 "),
            OpcodeMap::Escape0F3A => write!(f, "0f 3a "),
            _ => Ok(()),
        }
    }
}

impl TryFrom<OpcodeEncodingFields> for OpcodeEncoding {
    type Error = EncodingError;

    fn try_from(fields: OpcodeEncodingFields) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<OpcodeEncoding> for OpcodeEncodingFields {
    fn from(encoding: OpcodeEncoding) -> Self {
        encoding.fields
    }
}

impl fmt::Debug for OpcodeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpcodeEncoding({})", self)
    }
}

impl fmt::Display for OpcodeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = &self.fields;

        match fields.x64 {
            Some(true) => write!(f, "x64 ")?,
            Some(false) => write!(f, "ia32 ")?,
            None => {}
        }
        if let Some(address_size) = fields.address_size {
            write!(f, "a{} ", address_size.in_bits())?;
        }

        match self.to_vex_encoding() {
            Ok(vex) => write!(f, "{} ", vex)?,
            Err(_) => self.fmt_legacy_prefixes(f)?,
        }

        write!(f, "{:02x}", fields.main_byte)?;
        match fields.addressing_form {
            AddressingForm::None => {}
            AddressingForm::MainByteReg => write!(f, "+r")?,
            form => write!(f, " {}", form)?,
        }

        if let Some(ext) = fields.imm8_ext {
            write!(f, " {:02x}", ext)?;
        } else if !fields.immediate_size.is_zero() {
            write!(f, " {}", fields.immediate_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix::{LegacyPrefix, LegacyPrefixList};

    fn encoding(fields: OpcodeEncodingFields) -> OpcodeEncoding {
        OpcodeEncoding::new(fields).unwrap()
    }

    fn parse_prefixes(bytes: &[u8], mode: CodeSegmentType) -> (InstructionPrefixes, usize) {
        InstructionPrefixes::parse(bytes, mode).unwrap()
    }

    fn invariant(fields: OpcodeEncodingFields) -> bool {
        matches!(
            OpcodeEncoding::new(fields),
            Err(EncodingError::ConstructionInvariant(_))
        )
    }

    #[test]
    fn test_invariants() {
        assert!(invariant(OpcodeEncodingFields {
            address_size: Some(AddressSize::A64),
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            address_size: Some(AddressSize::A16),
            x64: Some(true),
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            operand_size: OperandSizeEncoding::Promotion,
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            operand_size: OperandSizeEncoding::Word,
            vex_type: Some(VexType::Vex),
            simd_prefix: Some(SimdPrefix::None),
            map: OpcodeMap::Escape0F,
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            vex_type: Some(VexType::Vex),
            map: OpcodeMap::Escape0F,
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            vector_size: Some(VectorSize::V128),
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            main_byte: 0x49,
            addressing_form: AddressingForm::MainByteReg,
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            main_byte: 0xD5,
            imm8_ext: Some(0x0A),
            immediate_size: ImmediateSizeEncoding::fixed(2),
            ..Default::default()
        }));
        assert!(invariant(OpcodeEncodingFields {
            vex_type: Some(VexType::Vex),
            simd_prefix: Some(SimdPrefix::None),
            map: OpcodeMap::Default,
            ..Default::default()
        }));
    }

    #[test]
    fn test_promotion_allowed_with_vex_outside_long_mode() {
        let e = encoding(OpcodeEncodingFields {
            operand_size: OperandSizeEncoding::Promotion,
            vex_type: Some(VexType::Vex),
            simd_prefix: Some(SimdPrefix::Prefix66),
            map: OpcodeMap::Escape0F38,
            main_byte: 0x98,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        assert_eq!(e.to_vex_encoding().unwrap().w(), Some(true));
    }

    #[test]
    fn test_to_vex_encoding_rejects_legacy() {
        let e = encoding(OpcodeEncodingFields::default());
        assert!(matches!(
            e.to_vex_encoding(),
            Err(EncodingError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_match_main_byte_reg() {
        // dec ecx (32-bit only)
        let dec = encoding(OpcodeEncodingFields {
            x64: Some(false),
            main_byte: 0x48,
            addressing_form: AddressingForm::MainByteReg,
            operand_size: OperandSizeEncoding::Dword,
            ..Default::default()
        });
        let prefixes = InstructionPrefixes::new(CodeSegmentType::Ia32);
        assert!(dec.is_match(&prefixes, 0x49, None, None));
        assert!(!dec.is_match(&prefixes, 0x50, None, None));
        assert!(!dec.is_match_up_to_main_byte(&InstructionPrefixes::new(CodeSegmentType::X64), 0x49));

        let mut o16 = prefixes;
        o16.legacy = LegacyPrefixList::from_slice(&[LegacyPrefix::OperandSize]).unwrap();
        assert!(!dec.is_match(&o16, 0x49, None, None));
    }

    #[test]
    fn test_match_modrm_forms() {
        let neg = encoding(OpcodeEncodingFields {
            main_byte: 0xF6,
            addressing_form: AddressingForm::FixedRegAnyRm(3),
            ..Default::default()
        });
        let prefixes = InstructionPrefixes::new(CodeSegmentType::X64);
        assert!(neg.is_match(&prefixes, 0xF6, Some(ModRm::from_byte(0xD8)), None));
        assert!(neg.is_match(&prefixes, 0xF6, Some(ModRm::from_byte(0x18)), None));
        assert!(!neg.is_match(&prefixes, 0xF6, Some(ModRm::from_byte(0xD0)), None));
        assert!(!neg.is_match(&prefixes, 0xF6, None, None));

        let fadd_mem = AddressingForm::FixedRegMemRm(0);
        assert!(fadd_mem.is_valid(Some(ModRm::from_byte(0x00))));
        assert!(!fadd_mem.is_valid(Some(ModRm::from_byte(0xC1))));
        let fadd_reg = AddressingForm::FixedRegDirectRm(0);
        assert!(fadd_reg.is_valid(Some(ModRm::from_byte(0xC1))));
        assert!(!fadd_reg.is_valid(Some(ModRm::from_byte(0x01))));
        assert!(AddressingForm::FixedValue(0xF2).is_valid(Some(ModRm::from_byte(0xF2))));
    }

    #[test]
    fn test_match_imm8_ext() {
        let aad = encoding(OpcodeEncodingFields {
            x64: Some(false),
            main_byte: 0xD5,
            immediate_size: ImmediateSizeEncoding::fixed(1),
            imm8_ext: Some(0x0A),
            ..Default::default()
        });
        let prefixes = InstructionPrefixes::new(CodeSegmentType::Ia32);
        assert!(aad.is_match(&prefixes, 0xD5, None, Some(0x0A)));
        assert!(!aad.is_match(&prefixes, 0xD5, None, Some(0x08)));
        assert!(!aad.is_match(&prefixes, 0xD5, None, None));
    }

    #[test]
    fn test_match_simd_prefix_last_wins() {
        let movss = encoding(OpcodeEncodingFields {
            simd_prefix: Some(SimdPrefix::PrefixF3),
            map: OpcodeMap::Escape0F,
            main_byte: 0x10,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        let (prefixes, len) = parse_prefixes(&[0x66, 0xF3, 0x0F, 0x10, 0xC1], CodeSegmentType::X64);
        assert_eq!(len, 3);
        assert!(movss.is_match(&prefixes, 0x10, Some(ModRm::from_byte(0xC1)), None));
    }

    #[test]
    fn test_match_vex() {
        let vfmadd = encoding(OpcodeEncodingFields {
            operand_size: OperandSizeEncoding::Promotion,
            vex_type: Some(VexType::Vex),
            vector_size: Some(VectorSize::V256),
            simd_prefix: Some(SimdPrefix::Prefix66),
            map: OpcodeMap::Escape0F38,
            main_byte: 0x98,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        let (prefixes, _) = parse_prefixes(&[0xC4, 0xE2, 0xF5, 0x98, 0x00], CodeSegmentType::X64);
        assert!(vfmadd.is_match(&prefixes, 0x98, Some(ModRm::from_byte(0x00)), None));

        // W0 variant of the same bytes
        let (prefixes, _) = parse_prefixes(&[0xC4, 0xE2, 0x75, 0x98, 0x00], CodeSegmentType::X64);
        assert!(!vfmadd.is_match(&prefixes, 0x98, Some(ModRm::from_byte(0x00)), None));

        // Legacy prefixes never match a VEX encoding.
        let (prefixes, _) = parse_prefixes(&[0x66, 0x0F, 0x38, 0x98], CodeSegmentType::X64);
        assert!(!vfmadd.is_match_up_to_main_byte(&prefixes, 0x98));
    }

    #[test]
    fn test_no_promotion_rejects_w1() {
        // vex.256.66.0f38.w0, as vpermps
        let vpermps = encoding(OpcodeEncodingFields {
            operand_size: OperandSizeEncoding::NoPromotion,
            vex_type: Some(VexType::Vex),
            vector_size: Some(VectorSize::V256),
            simd_prefix: Some(SimdPrefix::Prefix66),
            map: OpcodeMap::Escape0F38,
            main_byte: 0x16,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        let modrm = Some(ModRm::from_byte(0xC1));
        let (w0, _) = parse_prefixes(&[0xC4, 0xE2, 0x75, 0x16, 0xC1], CodeSegmentType::X64);
        assert!(vpermps.is_match(&w0, 0x16, modrm, None));
        let (w1, _) = parse_prefixes(&[0xC4, 0xE2, 0xF5, 0x16, 0xC1], CodeSegmentType::X64);
        assert!(!vpermps.is_match(&w1, 0x16, modrm, None));

        // norexw: a REX.W prefix selects a different row
        let mov = encoding(OpcodeEncodingFields {
            x64: Some(true),
            operand_size: OperandSizeEncoding::NoPromotion,
            main_byte: 0x89,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        let modrm = Some(ModRm::from_byte(0xC8));
        let (rex, _) = parse_prefixes(&[0x41, 0x89, 0xC8], CodeSegmentType::X64);
        assert!(mov.is_match(&rex, 0x89, modrm, None));
        let (rex_w, _) = parse_prefixes(&[0x48, 0x89, 0xC8], CodeSegmentType::X64);
        assert!(!mov.is_match(&rex_w, 0x89, modrm, None));
    }

    #[test]
    fn test_match_address_size() {
        let movabs = encoding(OpcodeEncodingFields {
            x64: Some(true),
            address_size: Some(AddressSize::A64),
            main_byte: 0xA1,
            immediate_size: ImmediateSizeEncoding::fixed(8),
            ..Default::default()
        });
        let prefixes = InstructionPrefixes::new(CodeSegmentType::X64);
        assert!(movabs.is_match(&prefixes, 0xA1, None, None));
        let (prefixes, _) = parse_prefixes(&[0x67, 0xA1], CodeSegmentType::X64);
        assert!(!movabs.is_match(&prefixes, 0xA1, None, None));
    }

    #[test]
    fn test_immediate_size() {
        let imm = ImmediateSizeEncoding {
            fixed_bytes: 3,
            variable: Some(ImmediateVariableSize::WordOrDword),
        };
        assert_eq!(imm.to_string(), "iw ib iwd");
        assert_eq!(imm.fixed_in_bytes(), None);
        assert_eq!(imm.in_bytes(IntegerSize::Word, AddressSize::A32), 5);
        assert_eq!(imm.in_bytes(IntegerSize::Qword, AddressSize::A64), 7);
        assert_eq!(ImmediateSizeEncoding::fixed(12).to_string(), "iq id");

        let moffs = ImmediateSizeEncoding {
            fixed_bytes: 0,
            variable: Some(ImmediateVariableSize::WordDwordOrQword),
        };
        assert_eq!(moffs.in_bytes(IntegerSize::Dword, AddressSize::A64), 8);
        assert_eq!(moffs.to_string(), "iwdq");
    }

    #[test]
    fn test_display() {
        let e = encoding(OpcodeEncodingFields {
            x64: Some(true),
            operand_size: OperandSizeEncoding::Promotion,
            main_byte: 0xB8,
            addressing_form: AddressingForm::MainByteReg,
            immediate_size: ImmediateSizeEncoding::fixed(8),
            ..Default::default()
        });
        assert_eq!(e.to_string(), "x64 rex.w b8+r iq");

        let e = encoding(OpcodeEncodingFields {
            simd_prefix: Some(SimdPrefix::Prefix66),
            map: OpcodeMap::Escape0F3A,
            main_byte: 0xCC,
            addressing_form: AddressingForm::Any,
            immediate_size: ImmediateSizeEncoding::fixed(1),
            ..Default::default()
        });
        assert_eq!(e.to_string(), "66 0f 3a cc /r ib");

        let e = encoding(OpcodeEncodingFields {
            vex_type: Some(VexType::Vex),
            vector_size: Some(VectorSize::V128),
            simd_prefix: Some(SimdPrefix::None),
            map: OpcodeMap::Escape0F,
            main_byte: 0x10,
            addressing_form: AddressingForm::Any,
            ..Default::default()
        });
        assert_eq!(e.to_string(), "vex.128.0f.wig 10 /r");

        let e = encoding(OpcodeEncodingFields {
            main_byte: 0xD8,
            addressing_form: AddressingForm::FixedRegDirectRm(1),
            ..Default::default()
        });
        assert_eq!(e.to_string(), "d8 c8+r");
    }

    #[test]
    fn test_serde_validates() {
        let e = encoding(OpcodeEncodingFields {
            main_byte: 0x04,
            immediate_size: ImmediateSizeEncoding::fixed(1),
            ..Default::default()
        });
        let json = serde_json::to_string(&e).unwrap();
        let back: OpcodeEncoding = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);

        let mut bad = serde_json::to_value(e).unwrap();
        bad["imm8_ext"] = serde_json::json!(10);
        bad["immediate_size"]["fixed_bytes"] = serde_json::json!(2);
        assert!(serde_json::from_value::<OpcodeEncoding>(bad).is_err());
    }
}
