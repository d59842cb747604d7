//! Compiling encoding tokens into an [`OpcodeEncoding`].

use super::insns::OperandKind;
use super::token::{NasmEncodingToken as T, NasmMiscFlag, ParsedEncoding};
use crate::error::{EncodingError, Result};
use crate::opcode::{
    AddressingForm, ImmediateVariableSize, OpcodeEncoding, OpcodeEncodingFields,
    OperandSizeEncoding,
};
use crate::types::{AddressSize, ConditionCode, OpcodeMap, SimdPrefix};

/// What the token sequence alone cannot tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompileContext {
    /// `Some(true)` for 64-bit only rows, `Some(false)` for rows invalid there.
    pub long_mode: Option<bool>,
    /// Kind of the operand in ModR/M.rm, to tell `/n` memory forms from
    /// register forms.
    pub rm_hint: Option<OperandKind>,
    /// Condition code substituted into a `+c` byte.
    pub condition_code: Option<ConditionCode>,
}

impl CompileContext {
    pub fn with_long_mode(mut self, long_mode: Option<bool>) -> Self {
        self.long_mode = long_mode;
        self
    }

    pub fn with_rm_hint(mut self, rm_hint: OperandKind) -> Self {
        self.rm_hint = Some(rm_hint);
        self
    }

    pub fn with_condition_code(mut self, condition_code: ConditionCode) -> Self {
        self.condition_code = Some(condition_code);
        self
    }
}

struct Compiler<'a> {
    text: &'a ParsedEncoding,
    fields: OpcodeEncodingFields,
    main_byte_seen: bool,
    modrm_seen: bool,
}

impl<'a> Compiler<'a> {
    fn error(&self, message: impl Into<String>) -> EncodingError {
        EncodingError::format(message, self.text.to_string())
    }

    fn set_mode(&mut self, x64: bool) -> Result<()> {
        match self.fields.x64 {
            Some(current) if current != x64 => Err(self.error("conflicting mode requirements")),
            _ => {
                self.fields.x64 = Some(x64);
                Ok(())
            }
        }
    }

    fn set_simd_prefix(&mut self, prefix: SimdPrefix) -> Result<()> {
        if self.fields.vex_type.is_some() || self.main_byte_seen {
            return Err(self.error("SIMD prefix out of place"));
        }
        if self.fields.simd_prefix.replace(prefix).is_some() {
            return Err(self.error("duplicate SIMD prefix"));
        }
        Ok(())
    }

    fn set_map(&mut self, map: OpcodeMap) -> Result<()> {
        if self.main_byte_seen || self.fields.vex_type.is_some() {
            return Err(self.error("opcode escape out of place"));
        }
        self.fields.map = map;
        Ok(())
    }

    fn set_main_byte(&mut self, byte: u8) {
        self.fields.main_byte = byte;
        self.main_byte_seen = true;
    }

    fn set_addressing_form(&mut self, form: AddressingForm) -> Result<()> {
        if !self.main_byte_seen {
            return Err(self.error("ModRM before the main opcode byte"));
        }
        if self.modrm_seen {
            return Err(self.error("duplicate ModRM"));
        }
        self.fields.addressing_form = form;
        self.modrm_seen = true;
        Ok(())
    }

    fn add_immediate(&mut self, bytes: u8) -> Result<()> {
        let total = self.fields.immediate_size.fixed_bytes + bytes;
        if total > 8 {
            return Err(self.error("immediate too large"));
        }
        self.fields.immediate_size.fixed_bytes = total;
        Ok(())
    }

    fn set_variable_immediate(&mut self, size: ImmediateVariableSize) -> Result<()> {
        if self.fields.immediate_size.variable.replace(size).is_some() {
            return Err(self.error("multiple variable-size immediates"));
        }
        Ok(())
    }

    fn byte(&mut self, byte: u8) -> Result<()> {
        if !self.main_byte_seen {
            let legacy = self.fields.vex_type.is_none();
            match (byte, self.fields.map) {
                (0x66, OpcodeMap::Default) if legacy => {
                    return self.set_simd_prefix(SimdPrefix::Prefix66)
                }
                (0xF2, OpcodeMap::Default) if legacy => {
                    return self.set_simd_prefix(SimdPrefix::PrefixF2)
                }
                (0xF3, OpcodeMap::Default) if legacy => {
                    return self.set_simd_prefix(SimdPrefix::PrefixF3)
                }
                (0x0F, OpcodeMap::Default) if legacy => return self.set_map(OpcodeMap::Escape0F),
                (0x38, OpcodeMap::Escape0F) if legacy => {
                    return self.set_map(OpcodeMap::Escape0F38)
                }
                (0x3A, OpcodeMap::Escape0F) if legacy => {
                    return self.set_map(OpcodeMap::Escape0F3A)
                }
                _ => {}
            }
            self.set_main_byte(byte);
            return Ok(());
        }

        // A register-form byte right after the opcode is a fixed ModRM.
        if !self.modrm_seen && byte >= 0xC0 {
            return self.set_addressing_form(AddressingForm::FixedValue(byte));
        }
        if self.fields.imm8_ext.is_some() {
            return Err(self.error("unexpected trailing byte"));
        }
        self.fields.imm8_ext = Some(byte);
        self.add_immediate(1)
    }

    fn token(&mut self, token: T, ctx: &CompileContext) -> Result<()> {
        match token {
            T::Byte(byte) => self.byte(byte)?,
            T::BytePlusRegister(byte) if !self.main_byte_seen => {
                self.set_main_byte(byte);
                self.fields.addressing_form = AddressingForm::MainByteReg;
                self.modrm_seen = true;
            }
            T::BytePlusRegister(byte) => {
                if byte < 0xC0 || byte & 0x7 != 0 {
                    return Err(self.error("register ModRM must be a multiple of 8 from c0"));
                }
                self.set_addressing_form(AddressingForm::FixedRegDirectRm((byte >> 3) & 0x7))?;
            }
            T::BytePlusConditionCode(byte) => {
                if self.main_byte_seen || byte & 0x0F != 0 {
                    return Err(self.error("misplaced condition code byte"));
                }
                let cc = ctx.condition_code.ok_or_else(|| {
                    EncodingError::invalid_operation(
                        "condition code byte requires a condition code",
                    )
                })?;
                self.set_main_byte(byte | cc.bits());
            }
            T::ModRmFixedReg(reg) => {
                let form = match ctx.rm_hint {
                    Some(OperandKind::Memory) => AddressingForm::FixedRegMemRm(reg),
                    Some(OperandKind::Register) => AddressingForm::FixedRegDirectRm(reg),
                    _ => AddressingForm::FixedRegAnyRm(reg),
                };
                self.set_addressing_form(form)?;
            }
            T::ModRm => self.set_addressing_form(AddressingForm::Any)?,
            T::Vex => {
                if self.main_byte_seen {
                    return Err(self.error("VEX prefix after the main opcode byte"));
                }
            }
            T::Iwd | T::Rel => self.set_variable_immediate(ImmediateVariableSize::WordOrDword)?,
            T::Iwdq => self.set_variable_immediate(ImmediateVariableSize::WordDwordOrQword)?,
            T::Is4 | T::Ib | T::IbSigned | T::IbUnsigned | T::Rel8 | T::Iw | T::Seg | T::Id
            | T::IdSigned | T::Iq => self.add_immediate(token.immediate_bytes())?,
            T::O16 => self.fields.operand_size = OperandSizeEncoding::Word,
            T::O32 => self.fields.operand_size = OperandSizeEncoding::Dword,
            T::O64 => {
                self.fields.operand_size = OperandSizeEncoding::Promotion;
                self.set_mode(true)?;
            }
            T::O64NoW => self.set_mode(true)?,
            T::RexW => self.fields.operand_size = OperandSizeEncoding::Promotion,
            T::NoRexW => self.fields.operand_size = OperandSizeEncoding::NoPromotion,
            T::A16 => {
                self.fields.address_size = Some(AddressSize::A16);
                self.set_mode(false)?;
            }
            T::A32 => self.fields.address_size = Some(AddressSize::A32),
            T::A64 => {
                self.fields.address_size = Some(AddressSize::A64);
                self.set_mode(true)?;
            }
            T::OperandDefault | T::AddressDefault => {}
            T::NoSimdPrefix => self.set_simd_prefix(SimdPrefix::None)?,
            T::X64 => self.set_mode(true)?,
            T::Ia32 => self.set_mode(false)?,
            T::Escape0F38 => self.set_map(OpcodeMap::Escape0F38)?,
            T::Escape0F3A => self.set_map(OpcodeMap::Escape0F3A)?,
            T::Misc(NasmMiscFlag::F2i) => self.set_simd_prefix(SimdPrefix::PrefixF2)?,
            T::Misc(NasmMiscFlag::F3i) => self.set_simd_prefix(SimdPrefix::PrefixF3)?,
            T::Misc(_) => {}
        }
        Ok(())
    }
}

impl ParsedEncoding {
    /// Builds the opcode encoding described by the tokens, left to right.
    pub fn to_opcode_encoding(&self, ctx: &CompileContext) -> Result<OpcodeEncoding> {
        let mut compiler = Compiler {
            text: self,
            fields: OpcodeEncodingFields {
                x64: ctx.long_mode,
                ..Default::default()
            },
            main_byte_seen: false,
            modrm_seen: false,
        };

        if let Some(vex) = self.vex {
            let fields = &mut compiler.fields;
            fields.vex_type = Some(vex.vex_type());
            fields.vector_size = vex.vector_size();
            fields.simd_prefix = Some(vex.simd_prefix());
            fields.map = vex.map();
            fields.operand_size = OperandSizeEncoding::from_promotion(vex.w());
        }

        for &token in &self.tokens {
            compiler.token(token, ctx)?;
        }

        if !compiler.main_byte_seen {
            return Err(compiler.error("encoding has no main opcode byte"));
        }
        OpcodeEncoding::new(compiler.fields)
    }
}

/// Tokenizes and compiles an encoding string in one step.
pub fn compile_encoding(text: &str, ctx: &CompileContext) -> Result<OpcodeEncoding> {
    super::token::parse_encoding(text)?.to_opcode_encoding(ctx)
}
