//! Tokenizer for the encoding column of NASM's `insns.dat`.
//!
//! ```text
//! [mi:    o32 81 /0 id]
//! [rvm:   vex.nds.256.66.0f38.w1 98 /r]
//! ```
//!
//! The text between the brackets, after the operand fields, is split on
//! whitespace and each piece becomes one [`NasmEncodingToken`].

use crate::error::{EncodingError, Result};
use crate::vex::VexEncoding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding markers with no effect on the opcode shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NasmMiscFlag {
    Hle,
    HleXr,
    HleNl,
    NoHi,
    NoRep,
    Repe,
    Wait,
    Jmp8,
    Jcc8,
    JLen,
    MustRep,
    MustRepNe,
    VsibX,
    VsibY,
    VsibZ,
    /// F2 prefix that is not a REP.
    F2i,
    /// F3 prefix that is not a REP.
    F3i,
    Resb,
    NoF3,
    NoRexB,
    NoRexX,
    NoRexR,
}

impl NasmMiscFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hle => "hle",
            Self::HleXr => "hlexr",
            Self::HleNl => "hlenl",
            Self::NoHi => "nohi",
            Self::NoRep => "norep",
            Self::Repe => "repe",
            Self::Wait => "wait",
            Self::Jmp8 => "jmp8",
            Self::Jcc8 => "jcc8",
            Self::JLen => "jlen",
            Self::MustRep => "mustrep",
            Self::MustRepNe => "mustrepne",
            Self::VsibX => "vsibx",
            Self::VsibY => "vsiby",
            Self::VsibZ => "vsibz",
            Self::F2i => "f2i",
            Self::F3i => "f3i",
            Self::Resb => "resb",
            Self::NoF3 => "nof3",
            Self::NoRexB => "norexb",
            Self::NoRexX => "norexx",
            Self::NoRexR => "norexr",
        }
    }
}

/// One token of an encoding string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NasmEncodingToken {
    /// Literal byte (`0f`, `37`).
    Byte(u8),
    /// Byte with a register in the low 3 bits (`48+r`).
    BytePlusRegister(u8),
    /// Byte with a condition code in the low 4 bits (`70+c`).
    BytePlusConditionCode(u8),
    /// ModR/M with a fixed reg field (`/3`).
    ModRmFixedReg(u8),
    /// ModR/M with both fields used (`/r`).
    ModRm,
    /// Placeholder for the VEX, XOP or EVEX prefix.
    Vex,
    /// Register selector in an 8-bit immediate (`/is4`).
    Is4,

    Ib,
    /// `ib,s`
    IbSigned,
    /// `ib,u`
    IbUnsigned,
    Iw,
    /// Word or dword immediate, by operand size.
    Iwd,
    Id,
    /// `id,s`
    IdSigned,
    /// Word, dword or qword immediate, by address size.
    Iwdq,
    Iq,
    Rel8,
    /// Word or dword relative offset.
    Rel,
    /// Far pointer segment selector.
    Seg,

    O16,
    O32,
    O64,
    /// 64-bit operand size without REX.W.
    O64NoW,
    OperandDefault,
    A16,
    A32,
    A64,
    AddressDefault,
    /// No SIMD prefix allowed.
    NoSimdPrefix,
    RexW,
    NoRexW,
    /// 64-bit mode only.
    X64,
    /// Outside 64-bit mode only.
    Ia32,
    Escape0F38,
    Escape0F3A,

    Misc(NasmMiscFlag),
}

use NasmEncodingToken as T;

static KEYWORDS: &[(&str, NasmEncodingToken)] = &[
    ("/r", T::ModRm),
    ("/is4", T::Is4),
    ("ib", T::Ib),
    ("ib,s", T::IbSigned),
    ("ib,u", T::IbUnsigned),
    ("iw", T::Iw),
    ("iwd", T::Iwd),
    ("id", T::Id),
    ("id,s", T::IdSigned),
    ("iwdq", T::Iwdq),
    ("iq", T::Iq),
    ("rel8", T::Rel8),
    ("rel", T::Rel),
    ("seg", T::Seg),
    ("o16", T::O16),
    ("o32", T::O32),
    ("o64", T::O64),
    ("o64nw", T::O64NoW),
    ("odf", T::OperandDefault),
    ("a16", T::A16),
    ("a32", T::A32),
    ("a64", T::A64),
    ("adf", T::AddressDefault),
    ("np", T::NoSimdPrefix),
    ("rex.w", T::RexW),
    ("norexw", T::NoRexW),
    ("x64", T::X64),
    ("ia32", T::Ia32),
    ("0f38", T::Escape0F38),
    ("0f3a", T::Escape0F3A),
    ("hle", T::Misc(NasmMiscFlag::Hle)),
    ("hlexr", T::Misc(NasmMiscFlag::HleXr)),
    ("hlenl", T::Misc(NasmMiscFlag::HleNl)),
    ("nohi", T::Misc(NasmMiscFlag::NoHi)),
    ("norep", T::Misc(NasmMiscFlag::NoRep)),
    ("repe", T::Misc(NasmMiscFlag::Repe)),
    ("wait", T::Misc(NasmMiscFlag::Wait)),
    ("jmp8", T::Misc(NasmMiscFlag::Jmp8)),
    ("jcc8", T::Misc(NasmMiscFlag::Jcc8)),
    ("jlen", T::Misc(NasmMiscFlag::JLen)),
    ("mustrep", T::Misc(NasmMiscFlag::MustRep)),
    ("mustrepne", T::Misc(NasmMiscFlag::MustRepNe)),
    ("vsibx", T::Misc(NasmMiscFlag::VsibX)),
    ("vsiby", T::Misc(NasmMiscFlag::VsibY)),
    ("vsibz", T::Misc(NasmMiscFlag::VsibZ)),
    ("f2i", T::Misc(NasmMiscFlag::F2i)),
    ("f3i", T::Misc(NasmMiscFlag::F3i)),
    ("resb", T::Misc(NasmMiscFlag::Resb)),
    ("nof3", T::Misc(NasmMiscFlag::NoF3)),
    ("norexb", T::Misc(NasmMiscFlag::NoRexB)),
    ("norexx", T::Misc(NasmMiscFlag::NoRexX)),
    ("norexr", T::Misc(NasmMiscFlag::NoRexR)),
];

impl NasmEncodingToken {
    /// Looks up a keyword token. Case-insensitive.
    pub fn from_keyword(text: &str) -> Option<Self> {
        let lower = text.to_ascii_lowercase();
        KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == lower)
            .map(|&(_, token)| token)
    }

    /// Number of fixed immediate bytes the token adds.
    pub fn immediate_bytes(self) -> u8 {
        match self {
            T::Ib | T::IbSigned | T::IbUnsigned | T::Rel8 | T::Is4 => 1,
            T::Iw | T::Seg => 2,
            T::Id | T::IdSigned => 4,
            T::Iq => 8,
            _ => 0,
        }
    }
}

impl fmt::Display for NasmEncodingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            T::Byte(b) => write!(f, "{:02x}", b),
            T::BytePlusRegister(b) => write!(f, "{:02x}+r", b),
            T::BytePlusConditionCode(b) => write!(f, "{:02x}+c", b),
            T::ModRmFixedReg(n) => write!(f, "/{}", n),
            T::Vex => write!(f, "vex"),
            T::Misc(flag) => f.write_str(flag.as_str()),
            token => {
                let keyword = KEYWORDS
                    .iter()
                    .find(|(_, t)| t == token)
                    .map_or("?", |&(keyword, _)| keyword);
                f.write_str(keyword)
            }
        }
    }
}

/// Tokens of one encoding string plus its VEX-family descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParsedEncoding {
    pub tokens: Vec<NasmEncodingToken>,
    /// Set exactly when `tokens` contains [`NasmEncodingToken::Vex`].
    pub vex: Option<VexEncoding>,
}

impl fmt::Display for ParsedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match (token, self.vex) {
                (T::Vex, Some(vex)) => write!(f, "{}", vex)?,
                _ => write!(f, "{}", token)?,
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ParsedEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self> {
        parse_encoding(s)
    }
}

fn parse_byte(text: &str) -> Option<NasmEncodingToken> {
    let hex = text.get(..2)?;
    let suffix = text.get(2..)?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let byte = u8::from_str_radix(hex, 16).ok()?;
    match suffix.to_ascii_lowercase().as_str() {
        "" => Some(T::Byte(byte)),
        "+r" => Some(T::BytePlusRegister(byte)),
        "+c" => Some(T::BytePlusConditionCode(byte)),
        _ => None,
    }
}

fn parse_fixed_reg(text: &str) -> Option<NasmEncodingToken> {
    match text.as_bytes() {
        [b'/', digit @ b'0'..=b'7'] => Some(T::ModRmFixedReg(digit - b'0')),
        _ => None,
    }
}

fn is_vex_token(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["vex.", "xop.", "evex."]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Splits an encoding string into tokens.
///
/// Fails on an unknown token, a second VEX-family token, or empty input.
pub fn parse_encoding(text: &str) -> Result<ParsedEncoding> {
    let mut tokens = Vec::with_capacity(5);
    let mut vex = None;

    for part in text.split_whitespace() {
        if let Some(token) = NasmEncodingToken::from_keyword(part) {
            tokens.push(token);
        } else if let Some(token) = parse_byte(part).or_else(|| parse_fixed_reg(part)) {
            tokens.push(token);
        } else if is_vex_token(part) {
            if vex.is_some() {
                return Err(EncodingError::format("multiple VEX prefixes", text));
            }
            vex = Some(VexEncoding::parse(part)?);
            tokens.push(T::Vex);
        } else {
            return Err(EncodingError::format(
                format!("unexpected NASM encoding token '{}'", part),
                text,
            ));
        }
    }

    if tokens.is_empty() {
        return Err(EncodingError::format("empty encoding", text));
    }
    Ok(ParsedEncoding { tokens, vex })
}
