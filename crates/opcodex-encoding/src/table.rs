//! Opcode table and the byte-level decode loop.

use crate::error::{DecodeError, EncodingError, RowError};
use crate::modrm::{addressing_length, ModRm};
use crate::nasm::insns::{read_entries, InsnsEntry};
use crate::opcode::OpcodeEncoding;
use crate::prefix::InstructionPrefixes;
use crate::types::CodeSegmentType;
use serde::{Deserialize, Serialize};

/// Architectural limit on instruction length.
pub const MAX_INSTRUCTION_LENGTH: usize = 15;

/// A mnemonic and one of its encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub mnemonic: String,
    pub encoding: OpcodeEncoding,
}

/// Result of decoding one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    pub mnemonic: String,
    pub encoding: OpcodeEncoding,
    pub prefixes: InstructionPrefixes,
    pub main_byte: u8,
    pub modrm: Option<ModRm>,
    pub imm8: Option<u8>,
    /// Number of bytes consumed.
    pub length: usize,
}

/// Ordered list of candidate encodings. Earlier entries win ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeTable {
    entries: Vec<TableEntry>,
}

/// A candidate that survived the full match.
struct Survivor<'a> {
    entry: &'a TableEntry,
    modrm: Option<ModRm>,
    imm8: Option<u8>,
    length: usize,
}

enum Probe<'a> {
    Match(Survivor<'a>),
    Mismatch,
    NeedsBytes(usize),
}

impl OpcodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mnemonic: impl Into<String>, encoding: OpcodeEncoding) {
        self.entries.push(TableEntry {
            mnemonic: mnemonic.into(),
            encoding,
        });
    }

    /// Adds every encoding of a row. Pseudo-instructions add nothing.
    /// Returns the number of entries added.
    pub fn push_entry(&mut self, entry: &InsnsEntry) -> Result<usize, EncodingError> {
        if entry.is_pseudo_instruction() {
            return Ok(0);
        }
        let encodings = entry.to_opcode_encodings()?;
        let count = encodings.len();
        for (mnemonic, encoding) in encodings {
            self.push(mnemonic, encoding);
        }
        Ok(count)
    }

    /// Builds a table from `insns.dat` text, keeping every row that parses
    /// and compiles. Failed rows are returned alongside.
    pub fn from_insns(text: &str) -> (Self, Vec<RowError>) {
        let mut table = Self::new();
        let mut errors = Vec::new();
        for (line, result) in read_entries(text) {
            if let Err(error) = result.and_then(|entry| table.push_entry(&entry)) {
                errors.push(RowError { line, error });
            }
        }
        (table, errors)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.iter()
    }

    /// Entries whose encoding matches up to the main opcode byte.
    pub fn candidates<'a>(
        &'a self,
        prefixes: &'a InstructionPrefixes,
        main_byte: u8,
    ) -> impl Iterator<Item = &'a TableEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.encoding.is_match_up_to_main_byte(prefixes, main_byte))
    }

    /// Decodes the instruction at the start of `bytes`.
    ///
    /// Every candidate reads its own ModRM and immediates. Survivors that
    /// disagree on length are `Ambiguous`; otherwise the earliest row in
    /// table order wins, even if later rows name another mnemonic (the
    /// `d5 0a` bytes match both `d5 0a` and `d5 ib`).
    pub fn decode(
        &self,
        bytes: &[u8],
        code_segment: CodeSegmentType,
    ) -> Result<DecodedInstruction, DecodeError> {
        let (prefixes, offset) = InstructionPrefixes::parse(bytes, code_segment)?;
        let main_byte = *bytes
            .get(offset)
            .ok_or_else(|| DecodeError::truncated(offset + 1, bytes.len()))?;
        let opcode_end = offset + 1;

        let mut survivors = Vec::new();
        let mut needed: Option<usize> = None;
        for entry in self.candidates(&prefixes, main_byte) {
            match Self::probe(entry, &prefixes, main_byte, bytes, opcode_end) {
                Probe::Match(survivor) => survivors.push(survivor),
                Probe::Mismatch => {}
                Probe::NeedsBytes(n) => needed = Some(needed.map_or(n, |m| m.max(n))),
            }
        }

        let Some(first) = survivors.first() else {
            return Err(match needed {
                Some(needed) => DecodeError::truncated(needed, bytes.len()),
                None => DecodeError::NoMatch {
                    bytes: bytes[..opcode_end.min(bytes.len())].to_vec(),
                },
            });
        };

        if survivors.iter().any(|s| s.length != first.length) {
            return Err(DecodeError::Ambiguous {
                candidates: survivors.iter().map(|s| s.entry.mnemonic.clone()).collect(),
            });
        }
        if first.length > MAX_INSTRUCTION_LENGTH {
            return Err(DecodeError::TooLong {
                length: first.length,
            });
        }
        if first.length > bytes.len() {
            return Err(DecodeError::truncated(first.length, bytes.len()));
        }

        Ok(DecodedInstruction {
            mnemonic: first.entry.mnemonic.clone(),
            encoding: first.entry.encoding,
            prefixes,
            main_byte,
            modrm: first.modrm,
            imm8: first.imm8,
            length: first.length,
        })
    }

    /// Decodes a run of instructions, skipping one byte after a failure.
    pub fn decode_all(
        &self,
        bytes: &[u8],
        code_segment: CodeSegmentType,
    ) -> Vec<(usize, Result<DecodedInstruction, DecodeError>)> {
        let mut results = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let result = self.decode(&bytes[offset..], code_segment);
            let size = result.as_ref().map_or(1, |d| d.length);
            results.push((offset, result));
            offset += size;
        }

        results
    }

    // Reads the ModR/M, addressing bytes and immediate the candidate expects
    // and runs the full match.
    fn probe<'a>(
        entry: &'a TableEntry,
        prefixes: &InstructionPrefixes,
        main_byte: u8,
        bytes: &[u8],
        opcode_end: usize,
    ) -> Probe<'a> {
        let encoding = &entry.encoding;
        let address_size = prefixes.effective_address_size();
        let mut length = opcode_end;

        let modrm = if encoding.has_modrm() {
            let Some(&byte) = bytes.get(length) else {
                return Probe::NeedsBytes(length + 1);
            };
            let modrm = ModRm::from_byte(byte);
            length += 1;
            match addressing_length(modrm, address_size, &bytes[length..]) {
                Some(n) => length += n,
                None => return Probe::NeedsBytes(length + 1),
            }
            Some(modrm)
        } else {
            None
        };

        let immediate = encoding.immediate_size();
        let imm8 = if immediate.fixed_in_bytes() == Some(1) {
            match bytes.get(length) {
                Some(&byte) => Some(byte),
                None => return Probe::NeedsBytes(length + 1),
            }
        } else {
            None
        };

        if !encoding.is_match(prefixes, main_byte, modrm, imm8) {
            return Probe::Mismatch;
        }

        length += immediate.in_bytes(prefixes.integer_operand_size(), address_size);
        Probe::Match(Survivor {
            entry,
            modrm,
            imm8,
            length,
        })
    }
}
