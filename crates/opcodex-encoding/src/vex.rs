//! VEX, XOP and EVEX encoding descriptors.
//!
//! A [`VexEncoding`] is the part of an opcode's encoding that lives in the
//! VEX-family prefix, written in Intel's dotted notation:
//!
//! ```text
//! vex.nds.256.66.0f38.w1
//! evex.dds.512.f2.0f3a.wig
//! xop.m8.w0.nds.l0.p0
//! ```

use crate::error::{EncodingError, Result};
use crate::prefix::XexPrefix;
use crate::types::{OpcodeMap, SimdPrefix, VectorSize, VexType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of the register named by the `vvvv` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VexRegOperand {
    /// `nds`: first source operand.
    Source,
    /// `dds`: second source operand.
    SecondSource,
    /// `ndd`: destination operand.
    Dest,
}

impl VexRegOperand {
    fn code(self) -> u16 {
        match self {
            Self::Source => 1,
            Self::SecondSource => 2,
            Self::Dest => 3,
        }
    }

    fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Source),
            2 => Some(Self::SecondSource),
            3 => Some(Self::Dest),
            _ => None,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Self::Source => "nds",
            Self::SecondSource => "dds",
            Self::Dest => "ndd",
        }
    }
}

/// Unpacked fields of a [`VexEncoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VexFields {
    pub vex_type: VexType,
    /// `None` means the `vvvv` field is unused.
    pub reg_operand: Option<VexRegOperand>,
    /// `None` means the L bit is ignored (`lig`).
    pub vector_size: Option<VectorSize>,
    pub simd_prefix: SimdPrefix,
    pub map: OpcodeMap,
    /// `None` means the W bit is ignored (`wig`).
    pub w: Option<bool>,
}

impl VexFields {
    /// Fields for a plain VEX encoding in `map` with everything else unset.
    pub fn new(vex_type: VexType, map: OpcodeMap) -> Self {
        Self {
            vex_type,
            reg_operand: None,
            vector_size: None,
            simd_prefix: SimdPrefix::None,
            map,
            w: None,
        }
    }
}

const TYPE_SHIFT: u16 = 0;
const REG_OPERAND_SHIFT: u16 = TYPE_SHIFT + 2;
const VECTOR_SIZE_SHIFT: u16 = REG_OPERAND_SHIFT + 2;
const SIMD_PREFIX_SHIFT: u16 = VECTOR_SIZE_SHIFT + 2;
const MAP_SHIFT: u16 = SIMD_PREFIX_SHIFT + 2;
const W_SHIFT: u16 = MAP_SHIFT + 4;

/// A validated VEX-family encoding packed into 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VexEncoding {
    bits: u16,
}

impl VexEncoding {
    /// Validates and packs the fields.
    pub fn new(fields: VexFields) -> Result<Self> {
        if fields.map == OpcodeMap::Default {
            return Err(EncodingError::ConstructionInvariant(
                "VEX-family encodings cannot use the default opcode map",
            ));
        }
        if (fields.vex_type == VexType::Xop) != fields.map.is_xop() {
            return Err(EncodingError::ConstructionInvariant(
                "XOP maps are only reachable through an XOP prefix",
            ));
        }
        if fields.vector_size == Some(VectorSize::V512) && fields.vex_type != VexType::Evex {
            return Err(EncodingError::ConstructionInvariant(
                "512-bit vectors require EVEX",
            ));
        }

        let type_code: u16 = match fields.vex_type {
            VexType::Vex => 0,
            VexType::Xop => 1,
            VexType::Evex => 2,
        };
        let reg_code = fields.reg_operand.map_or(0, VexRegOperand::code);
        let size_code = fields.vector_size.map_or(0, |s| u16::from(s.l()) + 1);
        let w_code: u16 = match fields.w {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        };

        Ok(Self {
            bits: (type_code << TYPE_SHIFT)
                | (reg_code << REG_OPERAND_SHIFT)
                | (size_code << VECTOR_SIZE_SHIFT)
                | (u16::from(fields.simd_prefix.pp()) << SIMD_PREFIX_SHIFT)
                | (u16::from(fields.map.index()) << MAP_SHIFT)
                | (w_code << W_SHIFT),
        })
    }

    /// Unpacks a value produced by [`VexEncoding::to_bits`].
    pub fn from_bits(bits: u16) -> Result<Self> {
        let invalid = || EncodingError::argument_range("vex encoding", bits);

        let vex_type = match (bits >> TYPE_SHIFT) & 3 {
            0 => VexType::Vex,
            1 => VexType::Xop,
            2 => VexType::Evex,
            _ => return Err(invalid()),
        };
        let reg_operand = VexRegOperand::from_code((bits >> REG_OPERAND_SHIFT) & 3);
        let vector_size = match (bits >> VECTOR_SIZE_SHIFT) & 3 {
            0 => None,
            code => VectorSize::from_l(code as u8 - 1),
        };
        let simd_prefix = SimdPrefix::from_pp(((bits >> SIMD_PREFIX_SHIFT) & 3) as u8);
        let map = OpcodeMap::from_index(((bits >> MAP_SHIFT) & 0xF) as u8).ok_or_else(invalid)?;
        let w = match (bits >> W_SHIFT) & 3 {
            0 => None,
            1 => Some(false),
            2 => Some(true),
            _ => return Err(invalid()),
        };
        if bits >> (W_SHIFT + 2) != 0 {
            return Err(invalid());
        }

        Self::new(VexFields {
            vex_type,
            reg_operand,
            vector_size,
            simd_prefix,
            map,
            w,
        })
    }

    /// Builds the descriptor implied by a decoded VEX-family prefix.
    ///
    /// The register operand role cannot be observed in the prefix bytes and
    /// is left unset.
    pub fn from_xex(xex: &XexPrefix) -> Result<Self> {
        Self::new(VexFields {
            vex_type: xex.vex_type,
            reg_operand: None,
            vector_size: Some(xex.vector_size),
            simd_prefix: xex.simd_prefix,
            map: xex.map,
            w: Some(xex.w),
        })
    }

    /// Returns the packed representation.
    pub fn to_bits(self) -> u16 {
        self.bits
    }

    pub fn fields(self) -> VexFields {
        VexFields {
            vex_type: self.vex_type(),
            reg_operand: self.reg_operand(),
            vector_size: self.vector_size(),
            simd_prefix: self.simd_prefix(),
            map: self.map(),
            w: self.w(),
        }
    }

    pub fn vex_type(self) -> VexType {
        match (self.bits >> TYPE_SHIFT) & 3 {
            0 => VexType::Vex,
            1 => VexType::Xop,
            _ => VexType::Evex,
        }
    }

    pub fn reg_operand(self) -> Option<VexRegOperand> {
        VexRegOperand::from_code((self.bits >> REG_OPERAND_SHIFT) & 3)
    }

    pub fn vector_size(self) -> Option<VectorSize> {
        match (self.bits >> VECTOR_SIZE_SHIFT) & 3 {
            0 => None,
            code => VectorSize::from_l(code as u8 - 1),
        }
    }

    pub fn simd_prefix(self) -> SimdPrefix {
        SimdPrefix::from_pp(((self.bits >> SIMD_PREFIX_SHIFT) & 3) as u8)
    }

    pub fn map(self) -> OpcodeMap {
        OpcodeMap::from_index(((self.bits >> MAP_SHIFT) & 0xF) as u8).unwrap_or_default()
    }

    /// The W bit, or `None` when ignored.
    pub fn w(self) -> Option<bool> {
        match (self.bits >> W_SHIFT) & 3 {
            1 => Some(false),
            2 => Some(true),
            _ => None,
        }
    }

    /// Renders the canonical dotted notation.
    ///
    /// Field order: keyword, register role, vector size, SIMD prefix, map, W.
    pub fn to_intel_style_string(self) -> String {
        let mut s = String::with_capacity(24);
        s.push_str(self.vex_type().keyword());
        if let Some(role) = self.reg_operand() {
            s.push('.');
            s.push_str(role.token());
        }
        s.push_str(match self.vector_size() {
            None => ".lig",
            Some(VectorSize::V128) => ".128",
            Some(VectorSize::V256) => ".256",
            Some(VectorSize::V512) => ".512",
        });
        if let Some(byte) = self.simd_prefix().byte() {
            s.push_str(&format!(".{:02x}", byte));
        }
        if let Some(name) = self.map().vex_name() {
            s.push('.');
            s.push_str(name);
        }
        s.push_str(match self.w() {
            None => ".wig",
            Some(false) => ".w0",
            Some(true) => ".w1",
        });
        s
    }

    /// Parses dotted notation.
    ///
    /// Keywords are case-insensitive. Fields after the leading `vex`, `xop`
    /// or `evex` may come in any order but each kind at most once; the map
    /// is required.
    pub fn parse(text: &str) -> Result<Self> {
        let lower = text.to_ascii_lowercase();
        let mut parts = lower.split('.');

        let vex_type = match parts.next() {
            Some("vex") => VexType::Vex,
            Some("xop") => VexType::Xop,
            Some("evex") => VexType::Evex,
            _ => return Err(EncodingError::format("expected vex, xop or evex", text)),
        };

        let mut reg_operand = None;
        let mut vector_size: Option<Option<VectorSize>> = None;
        let mut simd_prefix = None;
        let mut map = None;
        let mut w: Option<Option<bool>> = None;

        for part in parts {
            let duplicate = match part {
                "nds" | "ndd" | "dds" => {
                    let role = match part {
                        "nds" => VexRegOperand::Source,
                        "ndd" => VexRegOperand::Dest,
                        _ => VexRegOperand::SecondSource,
                    };
                    reg_operand.replace(role).is_some()
                }
                "lig" => vector_size.replace(None).is_some(),
                "128" | "l0" | "lz" => vector_size.replace(Some(VectorSize::V128)).is_some(),
                "256" | "l1" => vector_size.replace(Some(VectorSize::V256)).is_some(),
                "512" | "l2" => vector_size.replace(Some(VectorSize::V512)).is_some(),
                "np" | "p0" => simd_prefix.replace(SimdPrefix::None).is_some(),
                "66" => simd_prefix.replace(SimdPrefix::Prefix66).is_some(),
                "f3" => simd_prefix.replace(SimdPrefix::PrefixF3).is_some(),
                "f2" => simd_prefix.replace(SimdPrefix::PrefixF2).is_some(),
                "0f" => map.replace(OpcodeMap::Escape0F).is_some(),
                "0f38" => map.replace(OpcodeMap::Escape0F38).is_some(),
                "0f3a" => map.replace(OpcodeMap::Escape0F3A).is_some(),
                "m8" | "map8" => map.replace(OpcodeMap::Xop8).is_some(),
                "m9" | "map9" => map.replace(OpcodeMap::Xop9).is_some(),
                "m10" | "map10" => map.replace(OpcodeMap::Xop10).is_some(),
                "wig" => w.replace(None).is_some(),
                "w0" => w.replace(Some(false)).is_some(),
                "w1" => w.replace(Some(true)).is_some(),
                "" => return Err(EncodingError::format("empty vex field", text)),
                _ => {
                    return Err(EncodingError::format(
                        format!("unknown vex field '{}'", part),
                        text,
                    ))
                }
            };
            if duplicate {
                return Err(EncodingError::format(
                    format!("duplicate vex field '{}'", part),
                    text,
                ));
            }
        }

        let map = map.ok_or_else(|| EncodingError::format("vex encoding without opcode map", text))?;

        Self::new(VexFields {
            vex_type,
            reg_operand,
            vector_size: vector_size.flatten(),
            simd_prefix: simd_prefix.unwrap_or(SimdPrefix::None),
            map,
            w: w.flatten(),
        })
    }
}

impl fmt::Display for VexEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_intel_style_string())
    }
}

impl fmt::Debug for VexEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VexEncoding({})", self.to_intel_style_string())
    }
}

impl std::str::FromStr for VexEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<u16> for VexEncoding {
    type Error = EncodingError;

    fn try_from(bits: u16) -> Result<Self> {
        Self::from_bits(bits)
    }
}

impl From<VexEncoding> for u16 {
    fn from(encoding: VexEncoding) -> Self {
        encoding.bits
    }
}
