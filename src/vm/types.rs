//! Type definitions for the bytecode VM.
//!
//! - VmError: source-language exceptions and internal execution failures
//! - CallFrame: one activation of a translated function
//! - FrameExit: how an activation hands control back
//! - ClassObject: the runtime side of a translated class
//! - VmConfig: VM configuration options

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::config::{env_flag, env_override};
use crate::runtime::{ExceptionObject, GeneratorObject, Namespace, Value};
use crate::target::{BytecodeChunk, Opcode, ValueKind};
use crate::translator::MethodKind;
use crate::types::{builtin, TypeId};

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
///
/// Only `Exception` is visible to handlers in translated code; every other
/// variant means a chunk broke an invariant the verifier should have caught.
#[derive(Debug, Clone)]
pub enum VmError {
    /// A source-language exception in flight
    Exception(Value),
    /// Stack underflow
    StackUnderflow,
    /// Invalid opcode byte
    InvalidOpcode(u8),
    /// Operand outside what the opcode accepts
    InvalidOperand { opcode: Opcode, operand: u32 },
    /// A `Cast` or typed instruction met a value of the wrong kind
    CastFailed { expected: ValueKind, found: &'static str },
    /// Instruction pointer out of bounds
    IpOutOfBounds,
    /// Value stack overflow
    ValueStackOverflow,
    /// Halt instruction executed
    Halted,
    /// Runtime error with message
    Runtime(String),
}

impl VmError {
    /// A builtin exception carrying `message`
    pub fn raise(ty: TypeId, message: impl Into<String>) -> Self {
        Self::raise_with(ty, vec![Value::from(message.into())])
    }

    /// A builtin exception with arbitrary arguments
    pub fn raise_with(ty: TypeId, args: Vec<Value>) -> Self {
        let name = builtin::builtin_name(ty).unwrap_or("Exception");
        Self::Exception(Value::Exception(Arc::new(ExceptionObject::new(ty, name, args))))
    }

    /// The exception value if this is a source-language exception
    pub fn exception(&self) -> Option<&Value> {
        match self {
            Self::Exception(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this is an exception of exactly type `ty`
    #[cfg(test)]
    pub(crate) fn is_exception_type(&self, ty: TypeId) -> bool {
        matches!(self, Self::Exception(Value::Exception(e)) if e.ty == ty)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(Value::Exception(e)) => {
                let message = e.message();
                if message.is_empty() {
                    write!(f, "{}", e.type_name)
                } else {
                    write!(f, "{}: {}", e.type_name, message)
                }
            }
            Self::Exception(other) => write!(f, "exception: {}", other.repr()),
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::InvalidOpcode(b) => write!(f, "Invalid opcode: 0x{:02x}", b),
            Self::InvalidOperand { opcode, operand } => write!(f, "Invalid operand {} for {}", operand, opcode),
            Self::CastFailed { expected, found } => write!(f, "Cast failed: expected {}, got {}", expected, found),
            Self::IpOutOfBounds => write!(f, "Instruction pointer out of bounds"),
            Self::ValueStackOverflow => write!(f, "Value stack overflow"),
            Self::Halted => write!(f, "Execution halted"),
            Self::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for VmError {}

/// One activation of a translated chunk
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub chunk: Arc<BytecodeChunk>,
    /// Next instruction to execute
    pub ip: usize,
    /// Start of the instruction being executed, where handlers are looked up
    pub op_ip: usize,
    /// Base pointer into the value stack
    pub base_ptr: usize,
    pub locals: Vec<Option<Value>>,
    /// Own cells followed by captured free variables
    pub cells: Vec<Value>,
    pub globals: Arc<Namespace>,
    pub generator: Option<Arc<Mutex<GeneratorObject>>>,
    /// Height of the handled-exception stack on entry
    pub handled_base: usize,
}

impl CallFrame {
    pub fn new(chunk: Arc<BytecodeChunk>, globals: Arc<Namespace>) -> Self {
        let locals = vec![None; chunk.info().local_count()];
        Self {
            chunk,
            ip: 0,
            op_ip: 0,
            base_ptr: 0,
            locals,
            cells: Vec::new(),
            globals,
            generator: None,
            handled_base: 0,
        }
    }
}

/// How a frame hands control back to its caller
#[derive(Debug, Clone)]
pub enum FrameExit {
    Return(Value),
    /// A generator frame suspended on `GenYield`
    Yield(Value),
}

/// Runtime class: attribute namespace plus how each method binds
#[derive(Debug)]
pub struct ClassObject {
    pub type_id: TypeId,
    pub name: Arc<str>,
    pub attrs: Namespace,
    pub method_kinds: HashMap<Arc<str>, MethodKind>,
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Nested calls allowed before `RecursionError`
    pub max_call_depth: usize,
    /// Maximum value stack size
    pub max_value_stack: usize,
    /// Trace every executed instruction
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { max_call_depth: 200, max_value_stack: 65536, trace: false }
    }
}

impl VmConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub(crate) fn apply_env(&mut self) {
        env_override("PYTRON_MAX_CALL_DEPTH", &mut self.max_call_depth);
        env_override("PYTRON_MAX_VALUE_STACK", &mut self.max_value_stack);
        env_flag("PYTRON_VM_TRACE", &mut self.trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_display_uses_type_and_message() {
        let err = VmError::raise(builtin::ZERO_DIVISION_ERROR, "division by zero");
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        assert!(err.is_exception_type(builtin::ZERO_DIVISION_ERROR));
        assert_eq!(VmError::raise_with(builtin::STOP_ITERATION, vec![]).to_string(), "StopIteration");
        assert!(VmError::StackUnderflow.exception().is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_call_depth, 200);
        assert!(!config.trace);
    }
}
