//! f-string assembly and interactive printing.

use super::{single, Opcode, Successors};
use crate::source::Instruction;
use crate::target::Opcode as TargetOp;
use crate::translator::error::{DataflowError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::STR;

/// Set when a format spec sits above the value
const FVS_HAVE_SPEC: u32 = 0x04;

/// `FORMAT_VALUE`: low two bits select the conversion (none, str, repr, ascii)
#[derive(Debug)]
pub struct FormatValue {
    instruction: Instruction,
}

impl FormatValue {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn flags(&self) -> Result<u8, DataflowError> {
        let arg = self.instruction.arg();
        if arg > 0x07 {
            return Err(DataflowError::invalid_operand(&self.instruction));
        }
        Ok(arg as u8)
    }
}

impl Opcode for FormatValue {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let consumed = if u32::from(self.flags()?) & FVS_HAVE_SPEC != 0 { 2 } else { 1 };
        single(state.pop_n(consumed)?.push(ValueSourceInfo::of(STR, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::FormatValue, self.flags()?);
        Ok(())
    }
}

/// `BUILD_STRING`: concatenates `arg` strings
#[derive(Debug)]
pub struct BuildString {
    instruction: Instruction,
}

impl BuildString {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn count(&self) -> Result<u16, DataflowError> {
        u16::try_from(self.instruction.arg()).map_err(|_| DataflowError::invalid_operand(&self.instruction))
    }
}

impl Opcode for BuildString {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(self.count()? as usize)?.push(ValueSourceInfo::of(STR, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_u16(TargetOp::BuildString, self.count()?);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `PRINT_EXPR`
#[derive(Debug)]
pub struct PrintExpr {
    instruction: Instruction,
}

impl PrintExpr {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for PrintExpr {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop()?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::PrintExpr);
        Ok(())
    }
}
