//! Instructions without a runtime effect, and 3.12 intrinsic calls.

use super::collection::ListToTuple;
use super::dunder::UnaryOperation;
use super::string::PrintExpr;
use super::{single, Opcode, Successors};
use crate::source::Instruction;
use crate::target::Opcode as TargetOp;
use crate::translator::error::{EmissionError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::NONE;
use crate::types::operators::UnaryOperator;

/// `NOP`, `CACHE`, `EXTENDED_ARG`, `RESUME`, `MAKE_CELL`, `COPY_FREE_VARS` and `PRECALL`
///
/// Cells are created by the VM when the frame is set up, so the cell opcodes
/// have nothing left to do. A pending `KW_NAMES` survives `PRECALL`.
#[derive(Debug)]
pub struct Nop {
    instruction: Instruction,
}

impl Nop {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for Nop {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.clone())
    }

    fn emit(&self, _meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

const INTRINSIC_PRINT: u32 = 1;
const INTRINSIC_UNARY_POSITIVE: u32 = 5;
const INTRINSIC_LIST_TO_TUPLE: u32 = 6;

/// `CALL_INTRINSIC_1` (3.12)
#[derive(Debug)]
pub struct CallIntrinsic1 {
    instruction: Instruction,
    inner: Option<Box<dyn Opcode>>,
}

impl CallIntrinsic1 {
    pub fn new(instruction: Instruction) -> Self {
        let inner: Option<Box<dyn Opcode>> = match instruction.arg() {
            INTRINSIC_PRINT => Some(Box::new(PrintExpr::new(instruction.clone()))),
            INTRINSIC_UNARY_POSITIVE => {
                Some(Box::new(UnaryOperation::with_operator(instruction.clone(), UnaryOperator::Positive)))
            }
            INTRINSIC_LIST_TO_TUPLE => Some(Box::new(ListToTuple::new(instruction.clone()))),
            _ => None,
        };
        Self { instruction, inner }
    }

    fn inner(&self) -> TranslateResult<&dyn Opcode> {
        self.inner.as_deref().ok_or_else(|| {
            EmissionError::unsupported(&self.instruction, format!("intrinsic {}", self.instruction.arg())).into()
        })
    }

    fn is_print(&self) -> bool {
        self.instruction.arg() == INTRINSIC_PRINT
    }
}

impl Opcode for CallIntrinsic1 {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let mut successors = self.inner()?.stack_effect(meta, state)?;
        // the print intrinsic returns None in place of its argument
        if self.is_print() {
            for next in successors.iter_mut() {
                *next = next.push(ValueSourceInfo::of(NONE, self.offset()));
            }
        }
        Ok(successors)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        self.inner()?.emit(meta, state)?;
        if self.is_print() {
            meta.builder.emit(TargetOp::PushNone);
        }
        Ok(())
    }

    fn can_raise(&self) -> bool {
        self.inner.as_ref().map_or(true, |inner| inner.can_raise())
    }
}
