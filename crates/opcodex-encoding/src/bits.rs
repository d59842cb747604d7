//! XED-style bit patterns.
//!
//! A pattern is a string of `0`, `1` and lowercase letters. Letters name
//! variable bit runs; `_` is a grouping separator with no meaning.
//!
//! ```text
//! 11_rrr_bbb   mod=11, reg=rrr, rm=bbb
//! 0x0f         not a pattern (use 00001111)
//! ```

use crate::error::{EncodingError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Maximum number of bits a pattern can evaluate to.
pub const MAX_BITS: u8 = 64;

/// A fixed-width unsigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitsValue {
    bits: u64,
    length: u8,
}

impl BitsValue {
    /// The zero-width value.
    pub const EMPTY: BitsValue = BitsValue { bits: 0, length: 0 };

    /// Creates a value of `length` bits. Fails if `bits` does not fit.
    pub fn new(bits: u64, length: u8) -> Result<Self> {
        if length > MAX_BITS {
            return Err(EncodingError::argument_range("length", length));
        }
        if length < MAX_BITS && bits >> length != 0 {
            return Err(EncodingError::argument_range("bits", bits as i64));
        }
        Ok(Self { bits, length })
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Returns the width in bits.
    pub fn len(&self) -> u8 {
        self.length
    }

    /// Returns true for the zero-width value.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl fmt::Display for BitsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.length == 0 {
            return write!(f, "0b");
        }
        write!(f, "0b{:0width$b}", self.bits, width = self.length as usize)
    }
}

/// A maximal run of one character in a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRun {
    /// The repeated character.
    pub ch: char,
    /// Index of the first character of the run.
    pub start: usize,
    /// Number of characters in the run.
    pub len: usize,
}

impl BitRun {
    /// Index one past the last character of the run.
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// Returns true for a run of `0` or `1`.
    pub fn is_constant(&self) -> bool {
        is_bit(self.ch)
    }

    /// Returns true for a letter run.
    pub fn is_variable(&self) -> bool {
        !self.is_constant()
    }
}

fn is_bit(c: char) -> bool {
    c == '0' || c == '1'
}

fn is_pattern_char(c: char) -> bool {
    is_bit(c) || c.is_ascii_lowercase()
}

/// Strips `_` separators and validates the pattern.
///
/// Borrows the input when it contains no separator. A letter that shows up
/// in two separate runs is a format error.
pub fn normalize(pattern: &str) -> Result<Cow<'_, str>> {
    if pattern.is_empty() {
        return Err(EncodingError::format("empty bit pattern", pattern));
    }

    let mut seen = [false; 26];
    let mut prev: Option<char> = None;
    for c in pattern.chars().filter(|&c| c != '_') {
        if c.is_ascii_lowercase() {
            let slot = &mut seen[(c as u8 - b'a') as usize];
            if *slot && prev != Some(c) {
                return Err(EncodingError::format(
                    "duplicate bit pattern variable",
                    pattern,
                ));
            }
            *slot = true;
        } else if !is_bit(c) {
            return Err(EncodingError::format("invalid bit pattern character", pattern));
        }
        prev = Some(c);
    }

    if prev.is_none() {
        return Err(EncodingError::format("empty bit pattern", pattern));
    }

    if pattern.contains('_') {
        Ok(Cow::Owned(pattern.chars().filter(|&c| c != '_').collect()))
    } else {
        Ok(Cow::Borrowed(pattern))
    }
}

/// Returns the value of a pattern made only of `0`, `1` and `_`.
pub fn try_as_constant(pattern: &str) -> Option<BitsValue> {
    let mut bits = 0u64;
    let mut length = 0u8;
    for c in pattern.chars() {
        match c {
            '0' | '1' => {
                if length == MAX_BITS {
                    return None;
                }
                bits = (bits << 1) | u64::from(c == '1');
                length += 1;
            }
            '_' => continue,
            _ => return None,
        }
    }
    Some(BitsValue { bits, length })
}

/// Returns true if the pattern has no variable runs.
pub fn is_constant(pattern: &str) -> bool {
    try_as_constant(pattern).is_some()
}

/// Returns the run of identical characters starting at `index`.
pub fn run_at(pattern: &str, index: usize) -> Result<BitRun> {
    let bytes = pattern.as_bytes();
    let Some(&first) = bytes.get(index) else {
        return Err(EncodingError::argument_range("index", index as i64));
    };
    let ch = first as char;
    if !is_pattern_char(ch) {
        return Err(EncodingError::format("invalid bit pattern character", pattern));
    }

    let len = bytes[index..].iter().take_while(|&&b| b == first).count();
    Ok(BitRun {
        ch,
        start: index,
        len,
    })
}

/// Iterates over the runs of an already normalized pattern.
pub fn runs(normalized: &str) -> impl Iterator<Item = Result<BitRun>> + '_ {
    let mut index = 0;
    std::iter::from_fn(move || {
        if index >= normalized.len() {
            return None;
        }
        let run = run_at(normalized, index);
        match &run {
            Ok(r) => index = r.end(),
            Err(_) => index = normalized.len(),
        }
        Some(run)
    })
}

/// Folds a pattern into a value, most significant run first.
///
/// `resolve` supplies the bits for each variable letter. Its result must be
/// exactly as wide as the run it replaces.
pub fn evaluate<F>(pattern: &str, mut resolve: F) -> Result<BitsValue>
where
    F: FnMut(char) -> Option<BitsValue>,
{
    let normalized = normalize(pattern)?;
    let mut bits = 0u64;
    let mut length = 0usize;

    for run in runs(&normalized) {
        let run = run?;
        if length + run.len > MAX_BITS as usize {
            return Err(EncodingError::invalid_operation(format!(
                "bit pattern wider than {} bits",
                MAX_BITS
            )));
        }

        let value = if run.is_constant() {
            let ones = if run.ch == '1' { u64::MAX } else { 0 };
            mask(run.len) & ones
        } else {
            let value = resolve(run.ch).ok_or_else(|| {
                EncodingError::invalid_operation(format!("unbound bit variable '{}'", run.ch))
            })?;
            if value.len() as usize != run.len {
                return Err(EncodingError::invalid_operation(format!(
                    "mismatched bit variable size for '{}': expected {}, got {}",
                    run.ch,
                    run.len,
                    value.len()
                )));
            }
            value.bits()
        };

        bits = shl(bits, run.len) | value;
        length += run.len;
    }

    Ok(BitsValue {
        bits,
        length: length as u8,
    })
}

fn mask(len: usize) -> u64 {
    if len >= 64 {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

fn shl(bits: u64, len: usize) -> u64 {
    if len >= 64 {
        0
    } else {
        bits << len
    }
}

/// Formats a pattern for display.
///
/// Byte-wide constants become `0xhh`, other constants `0b...`. Variable
/// patterns get a `_` at every run boundary.
pub fn prettify(pattern: &str) -> String {
    let stripped: String = pattern.chars().filter(|&c| c != '_').collect();
    if let Some(value) = try_as_constant(&stripped) {
        if value.len() == 8 {
            return format!("0x{:02x}", value.bits());
        }
        return format!("0b{}", stripped);
    }

    let mut out = String::with_capacity(stripped.len() + stripped.len() / 4);
    let mut prev: Option<char> = None;
    for c in stripped.chars() {
        if let Some(p) = prev {
            let boundary = if is_bit(p) { !is_bit(c) } else { c != p };
            if boundary {
                out.push('_');
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}
