//! Target bytecode: the instruction set, chunks, operand kinds and the verifier.

pub mod chunk;
pub mod kind;
pub mod opcodes;
pub mod verifier;

pub use chunk::{BytecodeChunk, ChunkBuilder, ChunkError, CodeInfo, ExceptionEntry, JumpTable, Label};
pub use kind::ValueKind;
pub use opcodes::Opcode;
pub use verifier::{verify, VerifyError, VerifyErrorKind};
