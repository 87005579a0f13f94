//! Source-side data: dialect versions, instructions and extractor records.

pub mod builder;
pub mod instruction;
pub mod record;
pub mod version;

pub use builder::FunctionBuilder;
pub use instruction::{Instruction, RawInstruction};
pub use record::{
    Annotation, AnnotationMetadata, ClassRecord, CodeKind, Constant, ExceptionTableEntry, FunctionRecord,
};
pub use version::DialectVersion;
