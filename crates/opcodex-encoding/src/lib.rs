//! # opcodex-encoding
//!
//! Model of x86/x64 opcode encodings.
//!
//! This crate provides:
//! - XED-style bit patterns ([`bits`])
//! - VEX/XOP/EVEX encoding descriptors ([`vex`])
//! - opcode encoding descriptors and their matching rules ([`opcode`])
//! - the legacy prefix list and decode-time prefix state ([`prefix`])
//! - NASM `insns.dat` parsing ([`nasm`])
//! - a candidate table that decodes raw bytes ([`table`])
//!
//! ```
//! use opcodex_encoding::nasm::{compile_encoding, CompileContext};
//!
//! let encoding = compile_encoding("66 0f 3a cc /r ib", &CompileContext::default()).unwrap();
//! assert_eq!(encoding.main_byte(), 0xCC);
//! assert_eq!(encoding.to_string(), "66 0f 3a cc /r ib");
//! ```

pub mod bits;
pub mod error;
pub mod modrm;
pub mod nasm;
pub mod opcode;
pub mod prefix;
pub mod table;
pub mod types;
pub mod vex;

pub use bits::BitsValue;
pub use error::{DecodeError, EncodingError, Result, RowError};
pub use modrm::{ModRm, Sib};
pub use opcode::{
    AddressingForm, ImmediateSizeEncoding, ImmediateVariableSize, OpcodeEncoding,
    OpcodeEncodingFields, OperandSizeEncoding,
};
pub use prefix::{InstructionPrefixes, LegacyPrefix, LegacyPrefixGroup, LegacyPrefixList};
pub use table::{DecodedInstruction, OpcodeTable, TableEntry};
pub use types::{
    AddressSize, CodeSegmentType, ConditionCode, IntegerSize, OpcodeMap, SimdPrefix, VectorSize,
    VexType,
};
pub use vex::{VexEncoding, VexFields, VexRegOperand};
