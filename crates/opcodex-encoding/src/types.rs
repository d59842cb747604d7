//! Shared x86 enumerations used by the encoding model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode of the code segment an instruction executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeSegmentType {
    /// 16-bit protected or real mode.
    Ia16,
    /// 32-bit protected mode.
    Ia32,
    /// 64-bit long mode.
    X64,
}

impl CodeSegmentType {
    /// Parses a mode name as accepted on the command line.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ia16" | "16" | "real" => Some(Self::Ia16),
            "ia32" | "32" | "x86" => Some(Self::Ia32),
            "x64" | "64" | "long" | "x86_64" => Some(Self::X64),
            _ => None,
        }
    }

    /// Returns true for 64-bit long mode.
    pub fn is_long_mode(self) -> bool {
        self == Self::X64
    }

    /// Address size used when no 0x67 prefix is present.
    pub fn default_address_size(self) -> AddressSize {
        match self {
            Self::Ia16 => AddressSize::A16,
            Self::Ia32 => AddressSize::A32,
            Self::X64 => AddressSize::A64,
        }
    }

    /// Integer operand size used when no 0x66 prefix or promotion is present.
    pub fn default_operand_size(self) -> IntegerSize {
        match self {
            Self::Ia16 => IntegerSize::Word,
            Self::Ia32 | Self::X64 => IntegerSize::Dword,
        }
    }
}

impl fmt::Display for CodeSegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ia16 => write!(f, "ia16"),
            Self::Ia32 => write!(f, "ia32"),
            Self::X64 => write!(f, "x64"),
        }
    }
}

/// Effective address size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressSize {
    A16,
    A32,
    A64,
}

impl AddressSize {
    /// Returns the size in bits.
    pub fn in_bits(self) -> u32 {
        match self {
            Self::A16 => 16,
            Self::A32 => 32,
            Self::A64 => 64,
        }
    }

    /// Returns the size in bytes.
    pub fn in_bytes(self) -> usize {
        self.in_bits() as usize / 8
    }
}

/// Integer operand size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntegerSize {
    Byte,
    Word,
    Dword,
    Qword,
}

impl IntegerSize {
    /// Returns the size in bytes.
    pub fn in_bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Dword => 4,
            Self::Qword => 8,
        }
    }
}

/// Opcode map selected by escape bytes or a VEX-family map field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OpcodeMap {
    /// One-byte opcode space.
    #[default]
    Default,
    /// 0F
    Escape0F,
    /// 0F 38
    Escape0F38,
    /// 0F 3A
    Escape0F3A,
    /// XOP map 8
    Xop8,
    /// XOP map 9
    Xop9,
    /// XOP map 10
    Xop10,
}

impl OpcodeMap {
    pub(crate) const ALL: [OpcodeMap; 7] = [
        Self::Default,
        Self::Escape0F,
        Self::Escape0F38,
        Self::Escape0F3A,
        Self::Xop8,
        Self::Xop9,
        Self::Xop10,
    ];

    /// Returns true for the AMD XOP maps.
    pub fn is_xop(self) -> bool {
        matches!(self, Self::Xop8 | Self::Xop9 | Self::Xop10)
    }

    /// Map selected by a VEX3/EVEX `mmmmm` field.
    pub fn from_vex_map_select(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Escape0F),
            2 => Some(Self::Escape0F38),
            3 => Some(Self::Escape0F3A),
            _ => None,
        }
    }

    /// Map selected by an XOP `mmmmm` field.
    pub fn from_xop_map_select(value: u8) -> Option<Self> {
        match value {
            8 => Some(Self::Xop8),
            9 => Some(Self::Xop9),
            10 => Some(Self::Xop10),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Escape0F => 1,
            Self::Escape0F38 => 2,
            Self::Escape0F3A => 3,
            Self::Xop8 => 4,
            Self::Xop9 => 5,
            Self::Xop10 => 6,
        }
    }

    pub(crate) fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Dotted-notation name used in VEX descriptor text.
    pub fn vex_name(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Escape0F => Some("0f"),
            Self::Escape0F38 => Some("0f38"),
            Self::Escape0F3A => Some("0f3a"),
            Self::Xop8 => Some("m8"),
            Self::Xop9 => Some("m9"),
            Self::Xop10 => Some("m10"),
        }
    }
}

/// SIMD prefix, from a legacy prefix byte or a VEX-family `pp` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimdPrefix {
    None,
    Prefix66,
    PrefixF3,
    PrefixF2,
}

impl SimdPrefix {
    /// Decodes a VEX-family `pp` field.
    pub fn from_pp(pp: u8) -> Self {
        match pp & 0x3 {
            0 => Self::None,
            1 => Self::Prefix66,
            2 => Self::PrefixF3,
            _ => Self::PrefixF2,
        }
    }

    /// Returns the VEX-family `pp` field value.
    pub fn pp(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Prefix66 => 1,
            Self::PrefixF3 => 2,
            Self::PrefixF2 => 3,
        }
    }

    /// Returns the legacy prefix byte, if any.
    pub fn byte(self) -> Option<u8> {
        match self {
            Self::None => None,
            Self::Prefix66 => Some(0x66),
            Self::PrefixF3 => Some(0xF3),
            Self::PrefixF2 => Some(0xF2),
        }
    }

    /// Lowercase token (`np`, `66`, `f3`, `f2`).
    pub fn token(self) -> &'static str {
        match self {
            Self::None => "np",
            Self::Prefix66 => "66",
            Self::PrefixF3 => "f3",
            Self::PrefixF2 => "f2",
        }
    }
}

/// AVX vector length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VectorSize {
    V128,
    V256,
    V512,
}

impl VectorSize {
    /// Decodes a VEX.L or EVEX.L'L field.
    pub fn from_l(l: u8) -> Option<Self> {
        match l {
            0 => Some(Self::V128),
            1 => Some(Self::V256),
            2 => Some(Self::V512),
            _ => None,
        }
    }

    /// Returns the L field value.
    pub fn l(self) -> u8 {
        match self {
            Self::V128 => 0,
            Self::V256 => 1,
            Self::V512 => 2,
        }
    }

    /// Returns the size in bits.
    pub fn in_bits(self) -> u32 {
        128 << self.l()
    }
}

/// Non-legacy prefix scheme carrying the opcode map and SIMD prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VexType {
    Vex,
    Xop,
    Evex,
}

impl VexType {
    /// Lowercase keyword (`vex`, `xop`, `evex`).
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Vex => "vex",
            Self::Xop => "xop",
            Self::Evex => "evex",
        }
    }
}

/// Condition code embedded in the low nibble of Jcc/SETcc/CMOVcc opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionCode {
    Overflow,
    NotOverflow,
    Below,
    AboveOrEqual,
    Equal,
    NotEqual,
    BelowOrEqual,
    Above,
    Sign,
    NotSign,
    Parity,
    NotParity,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
}

impl ConditionCode {
    /// Number of condition codes.
    pub const COUNT: usize = 16;

    /// All condition codes in encoding order.
    pub const ALL: [ConditionCode; 16] = [
        Self::Overflow,
        Self::NotOverflow,
        Self::Below,
        Self::AboveOrEqual,
        Self::Equal,
        Self::NotEqual,
        Self::BelowOrEqual,
        Self::Above,
        Self::Sign,
        Self::NotSign,
        Self::Parity,
        Self::NotParity,
        Self::Less,
        Self::GreaterOrEqual,
        Self::LessOrEqual,
        Self::Greater,
    ];

    /// Returns the condition code for a 4-bit encoding.
    pub fn from_bits(bits: u8) -> Self {
        Self::ALL[(bits & 0xF) as usize]
    }

    /// Returns the 4-bit encoding.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Returns the condition with the opposite meaning.
    pub fn negate(self) -> Self {
        Self::from_bits(self.bits() ^ 1)
    }

    /// Mnemonic suffix (`o`, `no`, `b`, ...).
    pub fn suffix(self) -> &'static str {
        const SUFFIXES: [&str; 16] = [
            "o", "no", "b", "ae", "e", "ne", "be", "a", "s", "ns", "p", "np", "l", "ge", "le", "g",
        ];
        SUFFIXES[self as usize]
    }
}
