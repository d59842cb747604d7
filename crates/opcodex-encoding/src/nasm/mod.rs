//! NASM instruction table support.
//!
//! - [`token`]: splitting the encoding column into tokens
//! - [`compile`]: turning tokens into an [`OpcodeEncoding`](crate::OpcodeEncoding)
//! - [`insns`]: whole `insns.dat` rows

pub mod compile;
pub mod insns;
pub mod token;

pub use compile::{compile_encoding, CompileContext};
pub use insns::{
    is_ignored_line, read_entries, EvexTupleType, InsnsEntry, NasmOperand, OperandField,
    OperandKind,
};
pub use token::{parse_encoding, NasmEncodingToken, NasmMiscFlag, ParsedEncoding};
