//! Legacy prefix lists and decode-time prefix state.

use crate::error::{DecodeError, EncodingError, Result};
use crate::types::{
    AddressSize, CodeSegmentType, IntegerSize, OpcodeMap, SimdPrefix, VectorSize, VexType,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the eleven legacy prefix bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegacyPrefix {
    /// LOCK (0xF0)
    Lock,
    /// REPNE/REPNZ (0xF2)
    RepeatNotEqual,
    /// REP/REPE/REPZ (0xF3)
    RepeatEqual,
    /// CS segment override (0x2E)
    Cs,
    /// SS segment override (0x36)
    Ss,
    /// DS segment override (0x3E)
    Ds,
    /// ES segment override (0x26)
    Es,
    /// FS segment override (0x64)
    Fs,
    /// GS segment override (0x65)
    Gs,
    /// Operand size override (0x66)
    OperandSize,
    /// Address size override (0x67)
    AddressSize,
}

impl LegacyPrefix {
    /// Number of distinct legacy prefixes.
    pub const COUNT: u32 = 11;

    const ALL: [LegacyPrefix; 11] = [
        Self::Lock,
        Self::RepeatNotEqual,
        Self::RepeatEqual,
        Self::Cs,
        Self::Ss,
        Self::Ds,
        Self::Es,
        Self::Fs,
        Self::Gs,
        Self::OperandSize,
        Self::AddressSize,
    ];

    /// Parses a prefix byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0xF0 => Some(Self::Lock),
            0xF2 => Some(Self::RepeatNotEqual),
            0xF3 => Some(Self::RepeatEqual),
            0x2E => Some(Self::Cs),
            0x36 => Some(Self::Ss),
            0x3E => Some(Self::Ds),
            0x26 => Some(Self::Es),
            0x64 => Some(Self::Fs),
            0x65 => Some(Self::Gs),
            0x66 => Some(Self::OperandSize),
            0x67 => Some(Self::AddressSize),
            _ => None,
        }
    }

    /// Returns the prefix byte.
    pub fn byte(self) -> u8 {
        match self {
            Self::Lock => 0xF0,
            Self::RepeatNotEqual => 0xF2,
            Self::RepeatEqual => 0xF3,
            Self::Cs => 0x2E,
            Self::Ss => 0x36,
            Self::Ds => 0x3E,
            Self::Es => 0x26,
            Self::Fs => 0x64,
            Self::Gs => 0x65,
            Self::OperandSize => 0x66,
            Self::AddressSize => 0x67,
        }
    }

    /// Returns the prefix group.
    pub fn group(self) -> LegacyPrefixGroup {
        match self {
            Self::Lock | Self::RepeatNotEqual | Self::RepeatEqual => LegacyPrefixGroup::LockAndRepeat,
            Self::Cs | Self::Ss | Self::Ds | Self::Es | Self::Fs | Self::Gs => {
                LegacyPrefixGroup::SegmentOverride
            }
            Self::OperandSize => LegacyPrefixGroup::OperandSizeOverride,
            Self::AddressSize => LegacyPrefixGroup::AddressSizeOverride,
        }
    }

    /// Returns the SIMD prefix this byte selects when used as one.
    pub fn as_simd_prefix(self) -> Option<SimdPrefix> {
        match self {
            Self::OperandSize => Some(SimdPrefix::Prefix66),
            Self::RepeatNotEqual => Some(SimdPrefix::PrefixF2),
            Self::RepeatEqual => Some(SimdPrefix::PrefixF3),
            _ => None,
        }
    }

    fn index(self) -> u32 {
        self as u32
    }

    fn from_index(index: u32) -> Self {
        Self::ALL[(index % Self::COUNT) as usize]
    }
}

impl fmt::Display for LegacyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lock => "lock",
            Self::RepeatNotEqual => "repne",
            Self::RepeatEqual => "rep",
            Self::Cs => "cs",
            Self::Ss => "ss",
            Self::Ds => "ds",
            Self::Es => "es",
            Self::Fs => "fs",
            Self::Gs => "gs",
            Self::OperandSize => "66",
            Self::AddressSize => "67",
        };
        f.write_str(s)
    }
}

/// The four architectural prefix groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegacyPrefixGroup {
    LockAndRepeat,
    SegmentOverride,
    OperandSizeOverride,
    AddressSizeOverride,
}

/// Segment override registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    CS,
    SS,
    DS,
    ES,
    FS,
    GS,
}

const RADIX: u32 = LegacyPrefix::COUNT;
const COUNT_SHIFT: u32 = 29;
const COUNT_UNIT: u32 = 1 << COUNT_SHIFT;
const ITEMS_MASK: u32 = COUNT_UNIT - 1;

const RADIX_POWERS: [u32; LegacyPrefixList::CAPACITY] = [
    1,
    RADIX,
    RADIX * RADIX,
    RADIX * RADIX * RADIX,
    RADIX * RADIX * RADIX * RADIX,
    RADIX * RADIX * RADIX * RADIX * RADIX,
    RADIX * RADIX * RADIX * RADIX * RADIX * RADIX,
];

/// An ordered list of legacy prefixes packed into one `u32`.
///
/// Repeats and several prefixes from one group are allowed (`66 66 90` is
/// a real NOP encoding). The top three bits hold the count; the rest hold
/// the prefixes as base-11 digits, index 0 least significant.
///
/// Every mutator returns a new list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<LegacyPrefix>", into = "Vec<LegacyPrefix>")]
pub struct LegacyPrefixList(u32);

impl LegacyPrefixList {
    /// Maximum number of prefixes a list can hold.
    pub const CAPACITY: usize = 7;

    /// The empty list.
    pub const EMPTY: LegacyPrefixList = LegacyPrefixList(0);

    /// Builds a list from a slice of prefixes.
    pub fn from_slice(prefixes: &[LegacyPrefix]) -> Result<Self> {
        prefixes
            .iter()
            .try_fold(Self::EMPTY, |list, &prefix| list.push(prefix))
    }

    /// Returns the packed representation.
    pub fn to_bits(self) -> u32 {
        self.0
    }

    fn items(self) -> u32 {
        self.0 & ITEMS_MASK
    }

    fn count_bits(self) -> u32 {
        self.0 & !ITEMS_MASK
    }

    /// Number of prefixes in the list.
    pub fn len(self) -> usize {
        (self.0 >> COUNT_SHIFT) as usize
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Returns the prefix at `index`.
    pub fn get(self, index: usize) -> Option<LegacyPrefix> {
        if index >= self.len() {
            return None;
        }
        Some(LegacyPrefix::from_index(self.items() / RADIX_POWERS[index]))
    }

    /// Iterates over the prefixes in order.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = LegacyPrefix> + ExactSizeIterator {
        (0..self.len()).map(move |i| LegacyPrefix::from_index(self.items() / RADIX_POWERS[i]))
    }

    pub fn contains(self, prefix: LegacyPrefix) -> bool {
        self.index_of(prefix).is_some()
    }

    /// Index of the first occurrence of `prefix`.
    pub fn index_of(self, prefix: LegacyPrefix) -> Option<usize> {
        self.iter().position(|p| p == prefix)
    }

    /// Last prefix of `group`, scanning from the end.
    pub fn last_from_group(self, group: LegacyPrefixGroup) -> Option<LegacyPrefix> {
        self.iter().rev().find(|p| p.group() == group)
    }

    pub fn contains_from_group(self, group: LegacyPrefixGroup) -> bool {
        self.last_from_group(group).is_some()
    }

    pub fn has_lock(self) -> bool {
        self.contains(LegacyPrefix::Lock)
    }

    pub fn has_operand_size_override(self) -> bool {
        self.contains(LegacyPrefix::OperandSize)
    }

    pub fn has_address_size_override(self) -> bool {
        self.contains(LegacyPrefix::AddressSize)
    }

    /// Effective segment override; the last one wins.
    pub fn segment_override(self) -> Option<Segment> {
        match self.last_from_group(LegacyPrefixGroup::SegmentOverride)? {
            LegacyPrefix::Cs => Some(Segment::CS),
            LegacyPrefix::Ss => Some(Segment::SS),
            LegacyPrefix::Ds => Some(Segment::DS),
            LegacyPrefix::Es => Some(Segment::ES),
            LegacyPrefix::Fs => Some(Segment::FS),
            LegacyPrefix::Gs => Some(Segment::GS),
            _ => None,
        }
    }

    /// The SIMD prefix the list would select, if the opcode takes one.
    ///
    /// The last of `66`, `F2` and `F3` wins, even when they come from
    /// different groups.
    pub fn potential_simd_prefix(self) -> SimdPrefix {
        self.iter()
            .rev()
            .find_map(LegacyPrefix::as_simd_prefix)
            .unwrap_or(SimdPrefix::None)
    }

    /// Returns a list with `prefix` inserted at `index`.
    pub fn insert(self, index: usize, prefix: LegacyPrefix) -> Result<Self> {
        if index > self.len() {
            return Err(EncodingError::argument_range("index", index as i64));
        }
        if self.len() == Self::CAPACITY {
            return Err(EncodingError::invalid_operation(
                "legacy prefix list is at capacity",
            ));
        }

        let power = RADIX_POWERS[index];
        let next_power = power * RADIX;
        let items = self.items();
        let items = items / power * next_power + prefix.index() * power + items % power;
        Ok(Self((self.count_bits() + COUNT_UNIT) | items))
    }

    /// Returns a list with `prefix` appended.
    pub fn push(self, prefix: LegacyPrefix) -> Result<Self> {
        self.insert(self.len(), prefix)
    }

    /// Returns a list without the prefix at `index`.
    pub fn remove_at(self, index: usize) -> Result<Self> {
        if self.is_empty() {
            return Err(EncodingError::invalid_operation(
                "cannot remove from an empty legacy prefix list",
            ));
        }
        if index >= self.len() {
            return Err(EncodingError::argument_range("index", index as i64));
        }

        let power = RADIX_POWERS[index];
        let next_power = power * RADIX;
        let items = self.items();
        let items = items / next_power * power + items % power;
        Ok(Self((self.count_bits() - COUNT_UNIT) | items))
    }

    /// Returns a list without the first occurrence of `prefix`.
    pub fn remove(self, prefix: LegacyPrefix) -> Self {
        match self.index_of(prefix) {
            Some(index) => self.remove_at(index).unwrap_or(self),
            None => self,
        }
    }

    /// Returns a list with the prefix at `index` replaced.
    pub fn set_at(self, index: usize, prefix: LegacyPrefix) -> Result<Self> {
        if index >= self.len() {
            return Err(EncodingError::argument_range("index", index as i64));
        }

        let power = RADIX_POWERS[index];
        let next_power = power * RADIX;
        let items = self.items();
        let items = items / next_power * next_power + prefix.index() * power + items % power;
        Ok(Self(self.count_bits() | items))
    }
}

impl fmt::Debug for LegacyPrefixList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl fmt::Display for LegacyPrefixList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, prefix) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", prefix)?;
        }
        write!(f, "]")
    }
}

impl TryFrom<Vec<LegacyPrefix>> for LegacyPrefixList {
    type Error = EncodingError;

    fn try_from(prefixes: Vec<LegacyPrefix>) -> Result<Self> {
        Self::from_slice(&prefixes)
    }
}

impl From<LegacyPrefixList> for Vec<LegacyPrefix> {
    fn from(list: LegacyPrefixList) -> Self {
        list.iter().collect()
    }
}

/// REX prefix fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rex {
    /// REX.W - 64-bit operand size
    pub w: bool,
    /// REX.R - extends ModR/M reg field
    pub r: bool,
    /// REX.X - extends SIB index field
    pub x: bool,
    /// REX.B - extends ModR/M r/m, SIB base, or opcode reg
    pub b: bool,
}

impl Rex {
    /// Parse a REX byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            w: byte & 0x08 != 0,
            r: byte & 0x04 != 0,
            x: byte & 0x02 != 0,
            b: byte & 0x01 != 0,
        }
    }

    /// Returns true if this REX prefix is "empty" (0x40).
    pub fn is_empty(&self) -> bool {
        !self.w && !self.r && !self.x && !self.b
    }
}

/// Raw fields of a VEX, XOP or EVEX prefix.
///
/// Inverted fields (R, X, B, vvvv) are stored un-inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct XexPrefix {
    pub vex_type: VexType,
    pub vector_size: VectorSize,
    pub simd_prefix: SimdPrefix,
    pub map: OpcodeMap,
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
    pub vvvv: u8,
}

impl XexPrefix {
    /// Parse a 2-byte VEX prefix (C5 RvvvvLpp).
    pub fn from_vex2(byte1: u8) -> Self {
        Self {
            vex_type: VexType::Vex,
            vector_size: if byte1 & 0x04 != 0 {
                VectorSize::V256
            } else {
                VectorSize::V128
            },
            simd_prefix: SimdPrefix::from_pp(byte1),
            map: OpcodeMap::Escape0F,
            w: false,
            r: byte1 & 0x80 == 0,
            x: false,
            b: false,
            vvvv: (!byte1 >> 3) & 0x0F,
        }
    }

    /// Parse a 3-byte VEX prefix (C4 RXBmmmmm WvvvvLpp).
    pub fn from_vex3(byte1: u8, byte2: u8) -> Option<Self> {
        let map = OpcodeMap::from_vex_map_select(byte1 & 0x1F)?;
        Some(Self::from_three_byte_form(VexType::Vex, map, byte1, byte2))
    }

    /// Parse an XOP prefix (8F RXBmmmmm WvvvvLpp).
    pub fn from_xop(byte1: u8, byte2: u8) -> Option<Self> {
        let map = OpcodeMap::from_xop_map_select(byte1 & 0x1F)?;
        Some(Self::from_three_byte_form(VexType::Xop, map, byte1, byte2))
    }

    fn from_three_byte_form(vex_type: VexType, map: OpcodeMap, byte1: u8, byte2: u8) -> Self {
        Self {
            vex_type,
            vector_size: if byte2 & 0x04 != 0 {
                VectorSize::V256
            } else {
                VectorSize::V128
            },
            simd_prefix: SimdPrefix::from_pp(byte2),
            map,
            w: byte2 & 0x80 != 0,
            r: byte1 & 0x80 == 0,
            x: byte1 & 0x40 == 0,
            b: byte1 & 0x20 == 0,
            vvvv: (!byte2 >> 3) & 0x0F,
        }
    }

    /// Parse an EVEX prefix (62 RXBR'0mmm Wvvvv1pp zL'LbV'aaa).
    pub fn from_evex(p0: u8, p1: u8, p2: u8) -> Option<Self> {
        if p1 & 0x04 == 0 {
            return None;
        }
        let map = OpcodeMap::from_vex_map_select(p0 & 0x07)?;
        let vector_size = VectorSize::from_l((p2 >> 5) & 0x03)?;
        Some(Self {
            vex_type: VexType::Evex,
            vector_size,
            simd_prefix: SimdPrefix::from_pp(p1),
            map,
            w: p1 & 0x80 != 0,
            r: p0 & 0x80 == 0,
            x: p0 & 0x40 == 0,
            b: p0 & 0x20 == 0,
            vvvv: (!p1 >> 3) & 0x0F,
        })
    }
}

/// The prefix that follows the legacy prefixes, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NonLegacyPrefix {
    Rex(Rex),
    Xex(XexPrefix),
}

/// Everything decoded before the main opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstructionPrefixes {
    /// Mode the instruction is decoded in.
    pub code_segment: CodeSegmentType,
    /// Legacy prefixes in encounter order.
    pub legacy: LegacyPrefixList,
    /// REX or VEX-family prefix.
    pub non_legacy: Option<NonLegacyPrefix>,
    /// Opcode map, from escape bytes or the VEX-family map field.
    pub map: OpcodeMap,
}

impl InstructionPrefixes {
    /// Prefix state with no prefixes at all.
    pub fn new(code_segment: CodeSegmentType) -> Self {
        Self {
            code_segment,
            legacy: LegacyPrefixList::EMPTY,
            non_legacy: None,
            map: OpcodeMap::Default,
        }
    }

    /// Returns the REX prefix, if present.
    pub fn rex(&self) -> Option<Rex> {
        match self.non_legacy {
            Some(NonLegacyPrefix::Rex(rex)) => Some(rex),
            _ => None,
        }
    }

    /// Returns the VEX-family prefix, if present.
    pub fn xex(&self) -> Option<XexPrefix> {
        match self.non_legacy {
            Some(NonLegacyPrefix::Xex(xex)) => Some(xex),
            _ => None,
        }
    }

    pub fn vex_type(&self) -> Option<VexType> {
        self.xex().map(|x| x.vex_type)
    }

    pub fn vector_size(&self) -> Option<VectorSize> {
        self.xex().map(|x| x.vector_size)
    }

    /// True when REX.W or the VEX-family W bit is set.
    pub fn is_promoted(&self) -> bool {
        match self.non_legacy {
            Some(NonLegacyPrefix::Rex(rex)) => rex.w,
            Some(NonLegacyPrefix::Xex(xex)) => xex.w,
            None => false,
        }
    }

    /// Address size after applying any 0x67 prefix.
    pub fn effective_address_size(&self) -> AddressSize {
        let toggled = self.legacy.has_address_size_override();
        match (self.code_segment, toggled) {
            (CodeSegmentType::Ia16, false) | (CodeSegmentType::Ia32, true) => AddressSize::A16,
            (CodeSegmentType::Ia16, true) | (CodeSegmentType::Ia32, false) => AddressSize::A32,
            (CodeSegmentType::X64, true) => AddressSize::A32,
            (CodeSegmentType::X64, false) => AddressSize::A64,
        }
    }

    /// Integer operand size after applying 0x66 and promotion.
    pub fn integer_operand_size(&self) -> IntegerSize {
        if self.code_segment.is_long_mode() && self.is_promoted() {
            return IntegerSize::Qword;
        }
        let default_word = self.code_segment.default_operand_size() == IntegerSize::Word;
        if default_word != self.legacy.has_operand_size_override() {
            IntegerSize::Word
        } else {
            IntegerSize::Dword
        }
    }

    /// SIMD prefix from the VEX-family `pp` field, else from the legacy list.
    pub fn potential_simd_prefix(&self) -> SimdPrefix {
        match self.xex() {
            Some(xex) => xex.simd_prefix,
            None => self.legacy.potential_simd_prefix(),
        }
    }

    /// Parse prefixes and escape bytes from the start of an instruction.
    /// Returns the prefixes and the number of bytes consumed.
    pub fn parse(
        bytes: &[u8],
        code_segment: CodeSegmentType,
    ) -> std::result::Result<(Self, usize), DecodeError> {
        let mut prefixes = Self::new(code_segment);
        let mut offset = 0;

        let mut byte = loop {
            let Some(&byte) = bytes.get(offset) else {
                return Err(DecodeError::truncated(offset + 1, bytes.len()));
            };
            match LegacyPrefix::from_byte(byte) {
                Some(prefix) => {
                    prefixes.legacy = prefixes
                        .legacy
                        .push(prefix)
                        .map_err(|_| DecodeError::TooLong { length: offset + 1 })?;
                    offset += 1;
                }
                None => break byte,
            }
        };

        let long_mode = code_segment.is_long_mode();
        match byte {
            0x40..=0x4F if long_mode => {
                prefixes.non_legacy = Some(NonLegacyPrefix::Rex(Rex::from_byte(byte)));
                offset += 1;
                byte = *bytes
                    .get(offset)
                    .ok_or_else(|| DecodeError::truncated(offset + 1, bytes.len()))?;
                if LegacyPrefix::from_byte(byte).is_some() || (0x40..=0x4F).contains(&byte) {
                    return Err(DecodeError::invalid_prefix(
                        offset,
                        "REX must immediately precede the opcode",
                    ));
                }
            }
            0xC4 | 0xC5 | 0x62 | 0x8F => {
                if let Some(size) = Self::parse_xex(bytes, offset, long_mode, &mut prefixes)? {
                    return Ok((prefixes, offset + size));
                }
            }
            _ => {}
        }

        if byte == 0x0F {
            offset += 1;
            prefixes.map = match bytes.get(offset) {
                Some(0x38) => {
                    offset += 1;
                    OpcodeMap::Escape0F38
                }
                Some(0x3A) => {
                    offset += 1;
                    OpcodeMap::Escape0F3A
                }
                _ => OpcodeMap::Escape0F,
            };
        }

        Ok((prefixes, offset))
    }

    // Returns the prefix size when the lead byte at `offset` starts a
    // VEX-family prefix, or None when it is an ordinary opcode.
    fn parse_xex(
        bytes: &[u8],
        offset: usize,
        long_mode: bool,
        prefixes: &mut Self,
    ) -> std::result::Result<Option<usize>, DecodeError> {
        let lead = bytes[offset];
        let Some(&b1) = bytes.get(offset + 1) else {
            return Err(DecodeError::truncated(offset + 2, bytes.len()));
        };

        let is_xex = match lead {
            0x8F => (b1 & 0x1F) >= 8,
            // LES/LDS/BOUND outside long mode unless ModRM.mod == 11
            _ => long_mode || b1 >= 0xC0,
        };
        if !is_xex {
            return Ok(None);
        }

        let conflicting = prefixes.legacy.iter().any(|p| {
            matches!(
                p,
                LegacyPrefix::Lock
                    | LegacyPrefix::RepeatNotEqual
                    | LegacyPrefix::RepeatEqual
                    | LegacyPrefix::OperandSize
            )
        });
        if conflicting {
            return Err(DecodeError::invalid_prefix(
                offset,
                "VEX-family prefix after lock, 66, f2 or f3",
            ));
        }

        let size = match lead {
            0xC5 => 2,
            0x62 => 4,
            _ => 3,
        };
        if bytes.len() < offset + size {
            return Err(DecodeError::truncated(offset + size, bytes.len()));
        }
        let payload = &bytes[offset + 1..offset + size];

        let xex = match lead {
            0xC5 => Some(XexPrefix::from_vex2(payload[0])),
            0xC4 => XexPrefix::from_vex3(payload[0], payload[1]),
            0x8F => XexPrefix::from_xop(payload[0], payload[1]),
            _ => XexPrefix::from_evex(payload[0], payload[1], payload[2]),
        };
        let xex = xex.ok_or_else(|| {
            DecodeError::invalid_prefix(offset, format!("malformed {:02x} prefix", lead))
        })?;

        prefixes.map = xex.map;
        prefixes.non_legacy = Some(NonLegacyPrefix::Xex(xex));
        Ok(Some(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LegacyPrefix::*;

    fn list(prefixes: &[LegacyPrefix]) -> LegacyPrefixList {
        LegacyPrefixList::from_slice(prefixes).unwrap()
    }

    #[test]
    fn test_list_basic() {
        let l = list(&[OperandSize, OperandSize, Lock]);
        assert_eq!(l.len(), 3);
        assert_eq!(l.get(0), Some(OperandSize));
        assert_eq!(l.get(2), Some(Lock));
        assert_eq!(l.get(3), None);
        assert!(l.has_lock());
        assert_eq!(l.to_string(), "[66, 66, lock]");
    }

    #[test]
    fn test_potential_simd_prefix_last_wins() {
        assert_eq!(
            list(&[OperandSize, RepeatEqual]).potential_simd_prefix(),
            SimdPrefix::PrefixF3
        );
        assert_eq!(
            list(&[RepeatNotEqual, Fs, OperandSize]).potential_simd_prefix(),
            SimdPrefix::Prefix66
        );
        assert_eq!(list(&[Lock, Gs]).potential_simd_prefix(), SimdPrefix::None);
    }

    #[test]
    fn test_segment_override_last_wins() {
        let l = list(&[Es, OperandSize, Fs]);
        assert_eq!(l.segment_override(), Some(Segment::FS));
        assert_eq!(LegacyPrefixList::EMPTY.segment_override(), None);
    }

    #[test]
    fn test_insert_shifts_up() {
        let l = list(&[Lock, AddressSize]);
        let l = l.insert(1, Gs).unwrap();
        assert_eq!(l.iter().collect::<Vec<_>>(), vec![Lock, Gs, AddressSize]);
        let l = l.insert(0, RepeatEqual).unwrap();
        assert_eq!(l.get(0), Some(RepeatEqual));
        assert_eq!(l.get(3), Some(AddressSize));
    }

    #[test]
    fn test_insert_remove_inverse() {
        let original = list(&[Cs, OperandSize, RepeatNotEqual]);
        for index in 0..=original.len() {
            let inserted = original.insert(index, AddressSize).unwrap();
            assert_eq!(inserted.remove_at(index).unwrap(), original);
        }
    }

    #[test]
    fn test_capacity() {
        let full = list(&[AddressSize; LegacyPrefixList::CAPACITY]);
        assert_eq!(full.len(), LegacyPrefixList::CAPACITY);
        assert!(full.iter().all(|p| p == AddressSize));
        let err = full.push(Lock).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidOperation(_)));
    }

    #[test]
    fn test_range_errors() {
        let l = list(&[Lock]);
        assert!(matches!(
            l.insert(2, Lock).unwrap_err(),
            EncodingError::ArgumentRange { .. }
        ));
        assert!(matches!(
            l.set_at(1, Lock).unwrap_err(),
            EncodingError::ArgumentRange { .. }
        ));
        assert!(matches!(
            LegacyPrefixList::EMPTY.remove_at(0).unwrap_err(),
            EncodingError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_set_at_keeps_length() {
        let l = list(&[Lock, Cs, Ds]).set_at(1, Ss).unwrap();
        assert_eq!(l.iter().collect::<Vec<_>>(), vec![Lock, Ss, Ds]);
        assert_eq!(l.remove(Lock).iter().collect::<Vec<_>>(), vec![Ss, Ds]);
        assert_eq!(l.remove(Gs), l);
    }

    #[test]
    fn test_parse_legacy_and_rex() {
        let (p, len) = InstructionPrefixes::parse(&[0xF3, 0x48, 0x0F, 0xB8], CodeSegmentType::X64)
            .unwrap();
        assert_eq!(len, 3);
        assert_eq!(p.legacy.to_string(), "[rep]");
        assert!(p.is_promoted());
        assert_eq!(p.map, OpcodeMap::Escape0F);
        assert_eq!(p.integer_operand_size(), IntegerSize::Qword);
    }

    #[test]
    fn test_parse_rex_is_opcode_outside_long_mode() {
        let (p, len) = InstructionPrefixes::parse(&[0x48], CodeSegmentType::Ia32).unwrap();
        assert_eq!(len, 0);
        assert!(p.non_legacy.is_none());
    }

    #[test]
    fn test_parse_rex_before_legacy_rejected() {
        let err = InstructionPrefixes::parse(&[0x48, 0x66, 0x90], CodeSegmentType::X64)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPrefix { offset: 1, .. }));
    }

    #[test]
    fn test_parse_vex2() {
        // vmovups xmm0, [rax]
        let (p, len) =
            InstructionPrefixes::parse(&[0xC5, 0xF8, 0x10, 0x00], CodeSegmentType::X64).unwrap();
        assert_eq!(len, 2);
        let xex = p.xex().unwrap();
        assert_eq!(xex.vex_type, VexType::Vex);
        assert_eq!(xex.vector_size, VectorSize::V128);
        assert_eq!(xex.vvvv, 0);
        assert_eq!(p.map, OpcodeMap::Escape0F);
        assert_eq!(p.potential_simd_prefix(), SimdPrefix::None);
    }

    #[test]
    fn test_parse_vex3() {
        // vfmadd132pd ymm0, ymm1, [rax]: C4 E2 F5 98 00
        let (p, len) = InstructionPrefixes::parse(
            &[0xC4, 0xE2, 0xF5, 0x98, 0x00],
            CodeSegmentType::X64,
        )
        .unwrap();
        assert_eq!(len, 3);
        let xex = p.xex().unwrap();
        assert!(xex.w);
        assert_eq!(xex.vector_size, VectorSize::V256);
        assert_eq!(xex.simd_prefix, SimdPrefix::Prefix66);
        assert_eq!(xex.vvvv, 1);
        assert_eq!(p.map, OpcodeMap::Escape0F38);
    }

    #[test]
    fn test_parse_lds_in_32bit_mode() {
        // lds eax, [eax] has ModRM.mod != 11
        let (p, len) =
            InstructionPrefixes::parse(&[0xC5, 0x00], CodeSegmentType::Ia32).unwrap();
        assert_eq!(len, 0);
        assert!(p.xex().is_none());
    }

    #[test]
    fn test_parse_xop_and_pop() {
        let (p, len) = InstructionPrefixes::parse(
            &[0x8F, 0xE8, 0x78, 0xA2, 0xC0, 0x10],
            CodeSegmentType::X64,
        )
        .unwrap();
        assert_eq!(len, 3);
        assert_eq!(p.vex_type(), Some(VexType::Xop));
        assert_eq!(p.map, OpcodeMap::Xop8);

        // pop qword [rax]
        let (p, len) = InstructionPrefixes::parse(&[0x8F, 0x00], CodeSegmentType::X64).unwrap();
        assert_eq!(len, 0);
        assert!(p.xex().is_none());
    }

    #[test]
    fn test_parse_evex() {
        // vaddps zmm0, zmm1, zmm2: 62 F1 74 48 58 C2
        let (p, len) = InstructionPrefixes::parse(
            &[0x62, 0xF1, 0x74, 0x48, 0x58, 0xC2],
            CodeSegmentType::X64,
        )
        .unwrap();
        assert_eq!(len, 4);
        let xex = p.xex().unwrap();
        assert_eq!(xex.vex_type, VexType::Evex);
        assert_eq!(xex.vector_size, VectorSize::V512);
        assert_eq!(xex.vvvv, 1);
    }

    #[test]
    fn test_parse_vex_after_66_rejected() {
        let err = InstructionPrefixes::parse(&[0x66, 0xC5, 0xF8, 0x10], CodeSegmentType::X64)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPrefix { offset: 1, .. }));
    }

    #[test]
    fn test_parse_too_many_prefixes() {
        let bytes = [0x66; 10];
        let err = InstructionPrefixes::parse(&bytes, CodeSegmentType::X64).unwrap_err();
        assert_eq!(err, DecodeError::TooLong { length: 8 });
    }

    #[test]
    fn test_parse_truncated() {
        let err = InstructionPrefixes::parse(&[0x66], CodeSegmentType::X64).unwrap_err();
        assert_eq!(err, DecodeError::truncated(2, 1));
    }

    #[test]
    fn test_effective_sizes() {
        let mut p = InstructionPrefixes::new(CodeSegmentType::Ia32);
        assert_eq!(p.effective_address_size(), crate::types::AddressSize::A32);
        assert_eq!(p.integer_operand_size(), IntegerSize::Dword);
        p.legacy = list(&[OperandSize, AddressSize]);
        assert_eq!(p.effective_address_size(), crate::types::AddressSize::A16);
        assert_eq!(p.integer_operand_size(), IntegerSize::Word);

        let mut p = InstructionPrefixes::new(CodeSegmentType::Ia16);
        p.legacy = list(&[OperandSize]);
        assert_eq!(p.integer_operand_size(), IntegerSize::Dword);

        let mut p = InstructionPrefixes::new(CodeSegmentType::X64);
        p.legacy = list(&[AddressSize]);
        assert_eq!(p.effective_address_size(), crate::types::AddressSize::A32);
    }
}
