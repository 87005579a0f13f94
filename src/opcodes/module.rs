//! Imports, resolved through the host at run time.

use super::{single, Opcode, Successors};
use crate::source::Instruction;
use crate::target::Opcode as TargetOp;
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::{MODULE, OBJECT};

/// `IMPORT_NAME`: `[level, fromlist] -> [module]`
#[derive(Debug)]
pub struct ImportName {
    instruction: Instruction,
}

impl ImportName {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ImportName {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(state.pop_n(2)?.push(ValueSourceInfo::of(MODULE, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::ImportName, name)?;
        Ok(())
    }
}

/// `IMPORT_FROM`: keeps the module and pushes one of its attributes
#[derive(Debug)]
pub struct ImportFrom {
    instruction: Instruction,
}

impl ImportFrom {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ImportFrom {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        state.peek(0)?;
        single(state.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::ImportFrom, name)?;
        Ok(())
    }
}
