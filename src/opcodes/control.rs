//! Jumps, branches, iteration and returns.

use smallvec::{smallvec, SmallVec};

use super::{single, target_of, Opcode, Successors};
use crate::source::Instruction;
use crate::target::{Opcode as TargetOp, ValueKind};
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::{GENERATOR, ITERATOR, NONE, OBJECT};
use crate::types::registry::kind_of;
use crate::types::TypeId;

/// Emit `Truthy` unless the value is already known to be a bool
fn emit_truth(meta: &mut FunctionMetadata<'_>, ty: TypeId) {
    if kind_of(ty) != ValueKind::Bool {
        meta.builder.emit(TargetOp::Truthy);
    }
}

fn emit_return(meta: &mut FunctionMetadata<'_>) {
    if meta.is_generator() {
        meta.builder.emit(TargetOp::GenReturn);
    } else {
        meta.builder.emit(TargetOp::Return);
    }
}

/// `RETURN_VALUE`
#[derive(Debug)]
pub struct ReturnValue {
    instruction: Instruction,
}

impl ReturnValue {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ReturnValue {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        SmallVec::new()
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        state.peek(0)?;
        Ok(SmallVec::new())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        emit_return(meta);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `RETURN_CONST` (3.12)
#[derive(Debug)]
pub struct ReturnConst {
    instruction: Instruction,
}

impl ReturnConst {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ReturnConst {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        SmallVec::new()
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<Successors> {
        meta.constant(&self.instruction, self.instruction.arg() as usize)?;
        Ok(SmallVec::new())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.emit_constant(&self.instruction, self.instruction.arg() as usize)?;
        emit_return(meta);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `JUMP_FORWARD`, `JUMP_BACKWARD`, `JUMP_ABSOLUTE` and `JUMP_BACKWARD_NO_INTERRUPT`
#[derive(Debug)]
pub struct Jump {
    instruction: Instruction,
}

impl Jump {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for Jump {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.clone())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let label = meta.label(self.offset(), target_of(&self.instruction))?;
        meta.builder.emit_jump(TargetOp::Jump, label);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCondition {
    IfTrue,
    IfFalse,
    IfNone,
    IfNotNone,
}

/// The `POP_JUMP_*` family across dialects
#[derive(Debug)]
pub struct PopJumpIf {
    instruction: Instruction,
    condition: JumpCondition,
}

impl PopJumpIf {
    pub fn new(instruction: Instruction, condition: JumpCondition) -> Self {
        Self { instruction, condition }
    }
}

impl Opcode for PopJumpIf {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let popped = state.pop()?;
        Ok(smallvec![popped.clone(), popped])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let label = meta.label(self.offset(), target_of(&self.instruction))?;
        let ty = state.peek(0)?.ty;
        let op = match self.condition {
            JumpCondition::IfTrue => {
                emit_truth(meta, ty);
                TargetOp::JumpIfTrue
            }
            JumpCondition::IfFalse => {
                emit_truth(meta, ty);
                TargetOp::JumpIfFalse
            }
            JumpCondition::IfNone => TargetOp::JumpIfNone,
            JumpCondition::IfNotNone => TargetOp::JumpIfNotNone,
        };
        meta.builder.emit_jump(op, label);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        matches!(self.condition, JumpCondition::IfTrue | JumpCondition::IfFalse)
    }
}

/// `JUMP_IF_TRUE_OR_POP` and `JUMP_IF_FALSE_OR_POP`: keep the value when jumping
#[derive(Debug)]
pub struct JumpIfOrPop {
    instruction: Instruction,
    jump_if: bool,
}

impl JumpIfOrPop {
    pub fn new(instruction: Instruction, jump_if: bool) -> Self {
        Self { instruction, jump_if }
    }
}

impl Opcode for JumpIfOrPop {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        Ok(smallvec![state.pop()?, state.clone()])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let label = meta.label(self.offset(), target_of(&self.instruction))?;
        let ty = state.peek(0)?.ty;
        meta.builder.emit(TargetOp::Dup);
        emit_truth(meta, ty);
        let op = if self.jump_if { TargetOp::JumpIfTrue } else { TargetOp::JumpIfFalse };
        meta.builder.emit_jump(op, label);
        meta.builder.emit(TargetOp::Pop);
        Ok(())
    }
}

/// `GET_ITER`
#[derive(Debug)]
pub struct GetIter {
    instruction: Instruction,
}

impl GetIter {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for GetIter {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let ty = if state.peek(0)?.ty == GENERATOR { GENERATOR } else { ITERATOR };
        single(state.pop()?.push(ValueSourceInfo::of(ty, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::GetIter);
        Ok(())
    }
}

/// `FOR_ITER`
///
/// Before 3.12 exhaustion pops the iterator and jumps past the loop. From
/// 3.12 the jump lands on `END_FOR`, which expects the iterator and a
/// placeholder value; the target `ForIter` always pops the iterator, so the
/// exit goes through a trampoline that pushes two stand-ins.
#[derive(Debug)]
pub struct ForIter {
    instruction: Instruction,
    exits_to_end_for: bool,
}

impl ForIter {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction, exits_to_end_for: false }
    }

    pub fn with_end_for(instruction: Instruction) -> Self {
        Self { instruction, exits_to_end_for: true }
    }
}

impl Opcode for ForIter {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let iterator = state.peek(0)?.clone();
        let next = state.push(ValueSourceInfo::of(OBJECT, self.offset()));
        let exit = if self.exits_to_end_for {
            state.pop()?.push(iterator).push(ValueSourceInfo::of(NONE, self.offset()))
        } else {
            state.pop()?
        };
        Ok(smallvec![next, exit])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let exit = meta.label(self.offset(), target_of(&self.instruction))?;
        if !self.exits_to_end_for {
            meta.builder.emit_jump(TargetOp::ForIter, exit);
            return Ok(());
        }
        let trampoline = meta.builder.new_label();
        meta.builder.emit_jump(TargetOp::ForIter, trampoline);
        meta.defer(move |m| {
            m.builder.place_label(trampoline)?;
            m.builder.emit(TargetOp::PushNone);
            m.builder.emit(TargetOp::PushNone);
            m.builder.emit_jump(TargetOp::Jump, exit);
            Ok(())
        });
        Ok(())
    }
}
