//! ModR/M and SIB byte decoding.

use crate::types::AddressSize;
use serde::{Deserialize, Serialize};

/// Raw ModR/M byte fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModRm {
    /// Mod field (2 bits)
    pub mod_: u8,
    /// Reg field (3 bits)
    pub reg: u8,
    /// R/M field (3 bits)
    pub rm: u8,
}

impl ModRm {
    /// Split a ModR/M byte into its fields.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            mod_: (byte >> 6) & 0x3,
            reg: (byte >> 3) & 0x7,
            rm: byte & 0x7,
        }
    }

    /// Reassemble the byte.
    pub fn to_byte(self) -> u8 {
        (self.mod_ << 6) | ((self.reg & 0x7) << 3) | (self.rm & 0x7)
    }

    /// Returns true if this ModR/M encodes a register operand (mod=11).
    pub fn is_direct(self) -> bool {
        self.mod_ == 0b11
    }

    /// Returns true if this ModR/M requires a SIB byte.
    pub fn needs_sib(self, address_size: AddressSize) -> bool {
        address_size != AddressSize::A16 && self.mod_ != 0b11 && self.rm == 0b100
    }

    /// Displacement size in bytes, not counting a SIB-implied disp32.
    pub fn displacement_size(self, address_size: AddressSize) -> usize {
        match (address_size, self.mod_) {
            (_, 0b11) => 0,
            (_, 0b01) => 1,
            (AddressSize::A16, 0b10) => 2,
            (AddressSize::A16, _) if self.rm == 0b110 => 2,
            (AddressSize::A16, _) => 0,
            (_, 0b10) => 4,
            (_, _) if self.rm == 0b101 => 4,
            _ => 0,
        }
    }
}

/// Decoded SIB byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sib {
    /// Scale (2 bits) - actual scale is 1 << scale
    pub scale: u8,
    /// Index register (3 bits)
    pub index: u8,
    /// Base register (3 bits)
    pub base: u8,
}

impl Sib {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            scale: (byte >> 6) & 0x3,
            index: (byte >> 3) & 0x7,
            base: byte & 0x7,
        }
    }

    /// Returns the actual scale factor (1, 2, 4, or 8).
    pub fn scale_factor(self) -> u8 {
        1 << self.scale
    }
}

/// Number of bytes following the ModR/M byte for its SIB and displacement.
///
/// `rest` starts right after the ModR/M byte. Returns `None` when a needed
/// SIB byte is missing.
pub fn addressing_length(modrm: ModRm, address_size: AddressSize, rest: &[u8]) -> Option<usize> {
    let mut length = modrm.displacement_size(address_size);
    if modrm.needs_sib(address_size) {
        let sib = Sib::from_byte(*rest.first()?);
        // [disp32 + index*scale]
        if modrm.mod_ == 0b00 && sib.base == 0b101 {
            length = 4;
        }
        length += 1;
    }
    Some(length)
}
