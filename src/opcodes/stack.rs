//! Stack manipulation.

use super::{single, Opcode, Successors};
use crate::source::Instruction;
use crate::target::Opcode as TargetOp;
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};

/// `POP_TOP`, and `END_FOR` from 3.12 which drops the exhausted iterator and its placeholder
#[derive(Debug)]
pub struct PopTop {
    instruction: Instruction,
    count: usize,
}

impl PopTop {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction, count: 1 }
    }

    pub fn end_for(instruction: Instruction) -> Self {
        Self { instruction, count: 2 }
    }
}

impl Opcode for PopTop {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(self.count)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        match self.count {
            1 => meta.builder.emit(TargetOp::Pop),
            n => meta.builder.emit_byte(TargetOp::PopN, n as u8),
        }
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `ROT_TWO`, `ROT_THREE`, `ROT_FOUR` and `ROT_N`: TOS moves down `n - 1` positions
#[derive(Debug)]
pub struct Rotate {
    instruction: Instruction,
    n: usize,
}

impl Rotate {
    pub fn new(instruction: Instruction, n: usize) -> Self {
        Self { instruction, n }
    }

    /// `ROT_N`, whose count is the argument
    pub fn from_arg(instruction: Instruction) -> Self {
        let n = instruction.arg() as usize;
        Self { instruction, n }
    }
}

impl Opcode for Rotate {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.rotate(self.n)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        match self.n {
            0 | 1 => {}
            2 => meta.builder.emit(TargetOp::Swap),
            3 => meta.builder.emit(TargetOp::Rot3),
            n => meta.builder.emit_byte(TargetOp::RotN, n as u8),
        }
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `DUP_TOP`, and `COPY n` from 3.11: push a copy of the value `depth` below TOS
#[derive(Debug)]
pub struct CopyItem {
    instruction: Instruction,
    depth: usize,
}

impl CopyItem {
    pub fn top(instruction: Instruction) -> Self {
        Self { instruction, depth: 0 }
    }

    /// `COPY n` copies `STACK[-n]`
    pub fn from_arg(instruction: Instruction) -> Self {
        let depth = (instruction.arg() as usize).saturating_sub(1);
        Self { instruction, depth }
    }
}

impl Opcode for CopyItem {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let copied = state.peek(self.depth)?.clone();
        single(state.push(copied))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        match self.depth {
            0 => meta.builder.emit(TargetOp::Dup),
            1 => meta.builder.emit(TargetOp::Over),
            n => meta.builder.emit_byte(TargetOp::Pick, n as u8),
        }
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `DUP_TOP_TWO`
#[derive(Debug)]
pub struct DupTopTwo {
    instruction: Instruction,
}

impl DupTopTwo {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DupTopTwo {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let top = state.top(2)?.to_vec();
        single(state.push_all(top))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::Over);
        meta.builder.emit(TargetOp::Over);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `SWAP n` (3.11+): exchange TOS with `STACK[-n]`
#[derive(Debug)]
pub struct Swap {
    instruction: Instruction,
}

impl Swap {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn distance(&self) -> usize {
        (self.instruction.arg() as usize).saturating_sub(1)
    }
}

impl Opcode for Swap {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.swap(self.distance())?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        match self.distance() {
            0 => {}
            1 => meta.builder.emit(TargetOp::Swap),
            n => meta.builder.emit_byte(TargetOp::SwapN, n as u8),
        }
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `PUSH_NULL`: the call-protocol sentinel
#[derive(Debug)]
pub struct PushNull {
    instruction: Instruction,
}

impl PushNull {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for PushNull {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.push(ValueSourceInfo::null(self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::PushNull);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}
