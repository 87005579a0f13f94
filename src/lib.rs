//! PyTron - Python Bytecode Translator
//!
//! This library translates disassembled CPython code objects (dialects 3.9
//! through 3.12) into a typed, stack-based target bytecode, verifies the
//! result, and runs it on a managed VM.
//!
//! # Architecture
//!
//! The pipeline consists of these stages:
//!
//! 1. **Source records** (`source` module)
//!    - `FunctionRecord` / `ClassRecord` as produced by an extractor (TOML)
//!    - Dialect versions and raw instruction decoding
//!
//! 2. **Decoding** (`decode` and `opcodes` modules)
//!    - Per-dialect opcode tables with floor lookup
//!    - Jump targets resolved to instruction indices
//!
//! 3. **Translation** (`translator` module)
//!    - Stack-metadata dataflow to a fixed point
//!    - Emission of typed target code, handler prologues and generator dispatch
//!    - Classes, interface proxies and the artifact cache
//!
//! 4. **Target** (`target` module)
//!    - `BytecodeChunk`, `ChunkBuilder` and the structural verifier
//!
//! 5. **Execution** (`vm` and `runtime` modules)
//!    - `BytecodeVM` with exception tables, closures and generators
//!    - Host hooks for imports, output and value marshalling
//!
//! # Example
//!
//! ```rust
//! use pytron::config::TranslatorConfig;
//! use pytron::runtime::Value;
//! use pytron::source::{DialectVersion, FunctionBuilder};
//! use pytron::translator::Translator;
//! use pytron::vm::BytecodeVM;
//!
//! let record = FunctionBuilder::new("add", DialectVersion::V3_11)
//!     .args(&["a", "b"])
//!     .op("RESUME", 0)
//!     .op("LOAD_FAST", 0)
//!     .op("LOAD_FAST", 1)
//!     .op("BINARY_OP", 0)
//!     .op("RETURN_VALUE", 0)
//!     .build();
//!
//! let translator = Translator::new(TranslatorConfig::default());
//! let artifact = translator.translate(&record, DialectVersion::V3_11).unwrap();
//!
//! let mut vm = BytecodeVM::new(translator.registry().clone());
//! let result = vm.call_function(&artifact, vec![Value::Int(2), Value::Int(40)]).unwrap();
//! assert_eq!(result, Value::Int(42));
//! ```

pub mod config;
pub mod decode;
pub mod opcodes;
pub mod runtime;
pub mod source;
pub mod target;
pub mod translator;
pub mod types;
pub mod vm;

pub use config::{Config, TranslatorConfig};
pub use runtime::{Host, StdHost, Value};
pub use source::{ClassRecord, DialectVersion, FunctionBuilder, FunctionRecord};
pub use target::{verify, BytecodeChunk};
pub use translator::{
    Artifact, ArtifactSet, ClassArtifact, FunctionArtifact, TranslateError, TranslateOutcome, TranslateResult,
    Translator,
};
pub use types::TypeRegistry;
pub use vm::{BytecodeVM, VmConfig, VmError, VmResult};
