//! Translation errors.

use std::fmt;
use std::sync::Arc;

use crate::decode::DecodeError;
use crate::source::Instruction;
use crate::target::verifier::VerifyError;
use crate::target::ChunkError;
use crate::types::TypeResolutionError;

/// Inconsistencies found while propagating stack metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataflowError {
    /// An instruction consumed more values than the stack holds
    StackUnderflow { offset: usize, needed: usize, depth: usize },
    /// Two paths reach an instruction with different stack depths
    StackDepthMismatch { offset: usize, expected: usize, found: usize, producers: Vec<usize> },
    /// Two paths reach an instruction with different block stacks
    BlockStackMismatch { offset: usize },
    UnresolvableJumpTarget { offset: usize, target: usize },
    /// A node returned a different number of states than successors
    SuccessorMismatch { offset: usize, successors: usize, states: usize },
    /// An exception edge declares a depth above the raising instruction's stack
    HandlerDepth { offset: usize, handler: usize, depth: usize, available: usize },
    /// An operand names a slot or entry that does not exist
    InvalidOperand { offset: usize, opname: Arc<str>, arg: u32 },
    NoConvergence { iterations: usize },
}

impl DataflowError {
    pub fn invalid_operand(instruction: &Instruction) -> Self {
        Self::InvalidOperand {
            offset: instruction.offset(),
            opname: Arc::from(instruction.opname()),
            arg: instruction.arg(),
        }
    }

    /// Attach the instruction offset to errors raised below the node level
    pub fn at(self, at: usize) -> Self {
        match self {
            Self::StackUnderflow { needed, depth, .. } => Self::StackUnderflow { offset: at, needed, depth },
            other => other,
        }
    }
}

impl fmt::Display for DataflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackUnderflow { offset, needed, depth } => {
                write!(f, "stack underflow at {}: needs {} values, stack holds {}", offset, needed, depth)
            }
            Self::StackDepthMismatch { offset, expected, found, producers } => write!(
                f,
                "stack depth mismatch at {}: expected {}, found {} (producers {:?})",
                offset, expected, found, producers
            ),
            Self::BlockStackMismatch { offset } => write!(f, "block stack mismatch at {}", offset),
            Self::UnresolvableJumpTarget { offset, target } => {
                write!(f, "instruction {} jumps to {} which does not exist", offset, target)
            }
            Self::SuccessorMismatch { offset, successors, states } => write!(
                f,
                "instruction {} has {} successors but produced {} states",
                offset, successors, states
            ),
            Self::HandlerDepth { offset, handler, depth, available } => write!(
                f,
                "handler {} for instruction {} expects depth {} but only {} values are live",
                handler, offset, depth, available
            ),
            Self::InvalidOperand { offset, opname, arg } => {
                write!(f, "invalid operand {} for {} at {}", arg, opname, offset)
            }
            Self::NoConvergence { iterations } => {
                write!(f, "dataflow did not converge after {} iterations", iterations)
            }
        }
    }
}

impl std::error::Error for DataflowError {}

/// Failures while emitting target code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmissionError {
    Chunk(ChunkError),
    /// The emitted chunk failed verification, which the dataflow should have ruled out
    ImpossibleState(VerifyError),
    /// Class annotations could not be rendered for the side table
    Annotations(String),
    /// A construct that decodes but cannot be lowered
    Unsupported { offset: usize, opname: Arc<str>, detail: String },
}

impl EmissionError {
    pub fn unsupported(instruction: &Instruction, detail: impl Into<String>) -> Self {
        Self::Unsupported {
            offset: instruction.offset(),
            opname: Arc::from(instruction.opname()),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for EmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk(e) => write!(f, "chunk assembly failed: {}", e),
            Self::ImpossibleState(e) => write!(f, "emitted code failed verification: {}", e),
            Self::Annotations(e) => write!(f, "cannot render annotations: {}", e),
            Self::Unsupported { offset, opname, detail } => {
                write!(f, "cannot lower {} at {}: {}", opname, offset, detail)
            }
        }
    }
}

impl std::error::Error for EmissionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    Decode(DecodeError),
    Dataflow(DataflowError),
    TypeResolution(TypeResolutionError),
    Emission(EmissionError),
}

impl TranslateError {
    /// Short category name used in logs and fallback reasons
    pub fn category(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Dataflow(_) => "dataflow",
            Self::TypeResolution(_) => "type",
            Self::Emission(_) => "emission",
        }
    }
}

impl fmt::Display for TranslateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {}", e),
            Self::Dataflow(e) => write!(f, "dataflow error: {}", e),
            Self::TypeResolution(e) => write!(f, "type error: {}", e),
            Self::Emission(e) => write!(f, "emission error: {}", e),
        }
    }
}

impl std::error::Error for TranslateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Dataflow(e) => Some(e),
            Self::TypeResolution(e) => Some(e),
            Self::Emission(e) => Some(e),
        }
    }
}

impl From<DecodeError> for TranslateError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<DataflowError> for TranslateError {
    fn from(e: DataflowError) -> Self {
        Self::Dataflow(e)
    }
}

impl From<TypeResolutionError> for TranslateError {
    fn from(e: TypeResolutionError) -> Self {
        Self::TypeResolution(e)
    }
}

impl From<EmissionError> for TranslateError {
    fn from(e: EmissionError) -> Self {
        Self::Emission(e)
    }
}

impl From<ChunkError> for TranslateError {
    fn from(e: ChunkError) -> Self {
        Self::Emission(EmissionError::Chunk(e))
    }
}

impl From<VerifyError> for TranslateError {
    fn from(e: VerifyError) -> Self {
        Self::Emission(EmissionError::ImpossibleState(e))
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;
