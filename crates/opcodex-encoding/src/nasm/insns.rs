//! Rows of NASM's `insns.dat` instruction table.
//!
//! A row has four whitespace-separated columns:
//!
//! ```text
//! ADD     rm8,reg8        [mr:    hle 00 /r]      8086,SM,LOCK
//! ```
//!
//! The mnemonic, the operand list, the code string (operand fields, optional
//! EVEX tuple type and encoding tokens) and the CPU/feature flags.

use super::compile::CompileContext;
use super::token::{parse_encoding, NasmEncodingToken, ParsedEncoding};
use crate::error::{EncodingError, Result};
use crate::opcode::OpcodeEncoding;
use crate::types::ConditionCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mnemonics of data and reservation directives.
pub const PSEUDO_INSTRUCTION_MNEMONICS: &[&str] = &[
    "DB", "DW", "DD", "DQ", "DT", "DO", "DY", "DZ", "RESB", "RESW", "RESD", "RESQ", "REST", "RESO",
    "RESY", "RESZ",
];

/// Where an operand is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandField {
    /// ModRM.reg (`r`)
    ModReg,
    /// ModRM.rm or SIB base (`m`)
    BaseReg,
    /// SIB index (`x`)
    IndexReg,
    /// First immediate (`i`)
    Immediate,
    /// Second immediate (`j`)
    SecondImmediate,
    /// VEX.vvvv (`v`)
    NonDestructiveReg,
    /// Register in the high nibble of an imm8 (`s`)
    Is4,
}

impl OperandField {
    /// Parses a code string field letter. `-` means the operand is implicit.
    pub fn from_letter(c: char) -> Result<Option<Self>> {
        Ok(Some(match c {
            '-' => return Ok(None),
            'r' => Self::ModReg,
            'm' => Self::BaseReg,
            'x' => Self::IndexReg,
            'i' => Self::Immediate,
            'j' => Self::SecondImmediate,
            'v' => Self::NonDestructiveReg,
            's' => Self::Is4,
            _ => {
                return Err(EncodingError::format(
                    "unknown operand field",
                    c.to_string(),
                ))
            }
        }))
    }

    pub fn letter(self) -> char {
        match self {
            Self::ModReg => 'r',
            Self::BaseReg => 'm',
            Self::IndexReg => 'x',
            Self::Immediate => 'i',
            Self::SecondImmediate => 'j',
            Self::NonDestructiveReg => 'v',
            Self::Is4 => 's',
        }
    }
}

/// Coarse operand class derived from the NASM operand type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    Register,
    RegisterOrMemory,
    Memory,
    Immediate,
    Other,
}

impl OperandKind {
    /// Classifies a lowercase NASM operand type such as `rm32`, `xmmreg` or
    /// `imm8`.
    pub fn classify(type_name: &str) -> Self {
        let name = type_name.to_ascii_lowercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));

        if starts(&["imm", "sbyte", "udword", "sdword", "unity"]) {
            Self::Immediate
        } else if starts(&["mem", "xmem", "ymem", "zmem"]) {
            Self::Memory
        } else if name.contains("rm") {
            Self::RegisterOrMemory
        } else if name.contains("reg") || starts(&["fpu", "xmm0", "reg_"]) {
            Self::Register
        } else {
            Self::Other
        }
    }
}

/// One operand of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NasmOperand {
    pub field: Option<OperandField>,
    /// Lowercase type name without flags, e.g. `rm32`.
    pub type_name: String,
    pub kind: OperandKind,
    /// Trailing `*`: the operand may be omitted in the syntax.
    pub relaxed: bool,
    /// Followed by a `:` separator (far pointers, `CALL 42:666`).
    pub colon: bool,
    /// `|`-separated modifiers such as `near` or `mask`.
    pub flags: Vec<String>,
}

impl fmt::Display for NasmOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name)?;
        for flag in &self.flags {
            write!(f, "|{}", flag)?;
        }
        if self.relaxed {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// EVEX compressed displacement tuple type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvexTupleType {
    Fv,
    Hv,
    Fvm,
    T1s8,
    T1s16,
    T1s,
    T1f32,
    T1f64,
    T2,
    T4,
    T8,
    Hvm,
    Qvm,
    Ovm,
    M128,
    Dup,
}

impl EvexTupleType {
    const NAMES: [(&'static str, EvexTupleType); 16] = [
        ("fv", Self::Fv),
        ("hv", Self::Hv),
        ("fvm", Self::Fvm),
        ("t1s8", Self::T1s8),
        ("t1s16", Self::T1s16),
        ("t1s", Self::T1s),
        ("t1f32", Self::T1f32),
        ("t1f64", Self::T1f64),
        ("t2", Self::T2),
        ("t4", Self::T4),
        ("t8", Self::T8),
        ("hvm", Self::Hvm),
        ("qvm", Self::Qvm),
        ("ovm", Self::Ovm),
        ("m128", Self::M128),
        ("dup", Self::Dup),
    ];

    pub fn parse(text: &str) -> Result<Self> {
        let lower = text.to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|&(_, t)| t)
            .ok_or_else(|| EncodingError::format("unknown EVEX tuple type", text))
    }

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|&&(_, t)| t == self)
            .map_or("?", |&(name, _)| name)
    }
}

/// A parsed `insns.dat` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsnsEntry {
    pub mnemonic: String,
    pub operands: Vec<NasmOperand>,
    /// `None` when the code string column is `ignore`.
    pub encoding: Option<ParsedEncoding>,
    pub tuple_type: Option<EvexTupleType>,
    pub flags: Vec<String>,
}

/// Returns true for blank and comment-only lines.
pub fn is_ignored_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with(';')
}

/// Splits a row into columns. Bracketed code strings may contain spaces.
fn split_columns(line: &str) -> Result<Vec<&str>> {
    let mut columns = Vec::with_capacity(4);
    let mut rest = line.trim_start();

    while !rest.is_empty() {
        let end = if rest.starts_with('[') {
            rest.find(']')
                .map(|i| i + 1)
                .ok_or_else(|| EncodingError::format("unterminated code string", line))?
        } else {
            rest.find(char::is_whitespace).unwrap_or(rest.len())
        };
        columns.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Ok(columns)
}

fn is_valid_mnemonic(mnemonic: &str) -> bool {
    let base = mnemonic.strip_suffix("cc").unwrap_or(mnemonic);
    !base.is_empty()
        && base
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

struct CodeString<'a> {
    fields: &'a str,
    tuple_type: Option<&'a str>,
    encoding: &'a str,
}

fn split_code_string(column: &str) -> Result<CodeString<'_>> {
    let inner = column
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| EncodingError::format("invalid code string column", column))?;

    let parts: Vec<&str> = inner.split(':').collect();
    let (fields, tuple_type, encoding) = match parts.as_slice() {
        [encoding] => ("", None, *encoding),
        [fields, encoding] => (*fields, None, *encoding),
        [fields, tuple, encoding] => (*fields, Some(*tuple), *encoding),
        _ => return Err(EncodingError::format("invalid code string column", column)),
    };

    let fields_ok = fields
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b == b'-' || b == b'+');
    let tuple_ok = tuple_type.map_or(true, |t| {
        !t.is_empty()
            && t.bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    });
    let encoding = encoding.trim();
    if !fields_ok || !tuple_ok || encoding.is_empty() || (parts.len() > 1 && fields.is_empty()) {
        return Err(EncodingError::format("invalid code string column", column));
    }

    Ok(CodeString {
        fields,
        tuple_type,
        encoding,
    })
}

fn parse_operand(text: &str, field: Option<OperandField>, colon: bool) -> Result<NasmOperand> {
    let (text, relaxed) = match text.strip_suffix('*') {
        Some(stripped) => (stripped, true),
        None => (text, false),
    };
    let mut parts = text.split('|');
    let type_name = parts.next().unwrap_or_default().to_ascii_lowercase();
    if type_name.is_empty() {
        return Err(EncodingError::format("empty operand type", text));
    }

    Ok(NasmOperand {
        field,
        kind: OperandKind::classify(&type_name),
        type_name,
        relaxed,
        colon,
        flags: parts.map(str::to_ascii_lowercase).collect(),
    })
}

fn parse_operands(column: &str, fields: &str) -> Result<Vec<NasmOperand>> {
    if column == "void" || column == "ignore" || fields.is_empty() {
        return Ok(Vec::new());
    }

    let mut texts: Vec<String> = column.split([',', ':']).map(str::to_string).collect();
    let mut separators: Vec<char> = column.chars().filter(|&c| c == ',' || c == ':').collect();
    let mut fields = fields.to_string();

    // IMUL reg32,imm8 [r+mi: o32 6b /r ib,s]: the register doubles as r/m.
    if fields == "r+mi" {
        if texts.len() != 2 {
            return Err(EncodingError::format("operand count mismatch", column));
        }
        fields = "rmi".to_string();
        let rm = texts[0].replace("reg", "rm");
        texts.insert(1, rm);
        separators.insert(0, ',');
    }

    if texts.len() != fields.chars().count() {
        return Err(EncodingError::format(
            "not all operands have an associated field",
            column,
        ));
    }

    texts
        .iter()
        .zip(fields.chars())
        .enumerate()
        .map(|(i, (text, letter))| {
            let colon = separators.get(i) == Some(&':');
            parse_operand(text, OperandField::from_letter(letter)?, colon)
        })
        .collect()
}

impl InsnsEntry {
    /// Parses one non-ignored row.
    pub fn parse_line(line: &str) -> Result<Self> {
        let columns = split_columns(line)?;
        let [mnemonic, operands, code, flags] = columns.as_slice() else {
            return Err(EncodingError::format(
                format!("expected 4 columns, found {}", columns.len()),
                line,
            ));
        };

        if !is_valid_mnemonic(mnemonic) {
            return Err(EncodingError::format("invalid mnemonic", *mnemonic));
        }

        let (fields, encoding, tuple_type) = if *code == "ignore" {
            ("", None, None)
        } else {
            let code = split_code_string(code)?;
            let tuple_type = code.tuple_type.map(EvexTupleType::parse).transpose()?;
            (code.fields, Some(parse_encoding(code.encoding)?), tuple_type)
        };

        let flags = if *flags == "ignore" {
            Vec::new()
        } else {
            flags.split(',').map(str::to_string).collect()
        };

        Ok(Self {
            mnemonic: mnemonic.to_string(),
            operands: parse_operands(operands, fields)?,
            encoding,
            tuple_type,
            flags,
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    /// True for data directives and rows without an encoding.
    pub fn is_pseudo_instruction(&self) -> bool {
        self.encoding.is_none() || PSEUDO_INSTRUCTION_MNEMONICS.contains(&self.mnemonic.as_str())
    }

    /// Mode restriction from the flags: `LONG`/`X64` rows exist only in
    /// 64-bit mode, `NOLONG` rows never do.
    pub fn long_mode(&self) -> Option<bool> {
        if self.has_flag("NOLONG") {
            Some(false)
        } else if self.has_flag("LONG") || self.has_flag("X64") {
            Some(true)
        } else {
            None
        }
    }

    /// Kind of the operand encoded in ModRM.rm, if any.
    pub fn rm_operand_kind(&self) -> Option<OperandKind> {
        self.operands
            .iter()
            .find(|o| o.field == Some(OperandField::BaseReg))
            .map(|o| o.kind)
    }

    fn has_condition_code(&self) -> bool {
        self.encoding.as_ref().map_or(false, |e| {
            e.tokens
                .iter()
                .any(|t| matches!(t, NasmEncodingToken::BytePlusConditionCode(_)))
        })
    }

    /// Compiles the row into `(mnemonic, encoding)` pairs.
    ///
    /// `+c` rows expand to one pair per condition code, with the `cc` in the
    /// mnemonic replaced by the condition suffix. Mnemonics are lowercased.
    pub fn to_opcode_encodings(&self) -> Result<Vec<(String, OpcodeEncoding)>> {
        let encoding = self.encoding.as_ref().ok_or_else(|| {
            EncodingError::invalid_operation(format!("{} has no encoding", self.mnemonic))
        })?;

        let mut ctx = CompileContext::default().with_long_mode(self.long_mode());
        if let Some(kind) = self.rm_operand_kind() {
            ctx = ctx.with_rm_hint(kind);
        }

        let mnemonic = self.mnemonic.to_ascii_lowercase();
        if !self.has_condition_code() {
            return Ok(vec![(mnemonic, encoding.to_opcode_encoding(&ctx)?)]);
        }

        let base = mnemonic.strip_suffix("cc").unwrap_or(&mnemonic);
        ConditionCode::ALL
            .iter()
            .map(|&cc| {
                let opcode = encoding.to_opcode_encoding(&ctx.with_condition_code(cc))?;
                Ok((format!("{}{}", base, cc.suffix()), opcode))
            })
            .collect()
    }
}

impl std::str::FromStr for InsnsEntry {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_line(s)
    }
}

/// Parses every row of an `insns.dat` text, skipping blank and comment
/// lines. Yields 1-based line numbers with each result.
pub fn read_entries(text: &str) -> impl Iterator<Item = (usize, Result<InsnsEntry>)> + '_ {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !is_ignored_line(line))
        .map(|(i, line)| (i + 1, InsnsEntry::parse_line(line)))
}
