//! Yields, delegation and generator entry.

use smallvec::{smallvec, SmallVec};

use super::{single, target_of, Opcode, Successors};
use crate::source::{DialectVersion, Instruction};
use crate::target::Opcode as TargetOp;
use crate::translator::error::{EmissionError, TranslateResult};
use crate::translator::lowering::emit_yield;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::{NONE, OBJECT};

fn require_generator(meta: &FunctionMetadata<'_>, instruction: &Instruction) -> TranslateResult<()> {
    if meta.is_generator() {
        Ok(())
    } else {
        Err(EmissionError::unsupported(instruction, "yield outside a generator").into())
    }
}

/// `GEN_START` (3.10): drops the value sent into a fresh generator
#[derive(Debug)]
pub struct GenStart {
    instruction: Instruction,
}

impl GenStart {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for GenStart {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop()?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::Pop);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `RETURN_GENERATOR` (3.11+): the generator object already exists, push a stand-in
#[derive(Debug)]
pub struct ReturnGenerator {
    instruction: Instruction,
}

impl ReturnGenerator {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ReturnGenerator {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.push(ValueSourceInfo::of(NONE, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::PushNone);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `YIELD_VALUE`: suspend with TOS, resume with the sent value
#[derive(Debug)]
pub struct YieldValue {
    instruction: Instruction,
}

impl YieldValue {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for YieldValue {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        require_generator(meta, &self.instruction)?;
        single(state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        state.peek(0)?;
        emit_yield(meta, state.stack())
    }
}

/// `GET_YIELD_FROM_ITER`
#[derive(Debug)]
pub struct GetYieldFromIter {
    instruction: Instruction,
}

impl GetYieldFromIter {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for GetYieldFromIter {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::GetYieldFromIter);
        Ok(())
    }
}

/// `YIELD_FROM` (3.9/3.10): `[receiver, value] -> [result]`, re-yielding every inner value
#[derive(Debug)]
pub struct YieldFrom {
    instruction: Instruction,
}

impl YieldFrom {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for YieldFrom {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        require_generator(meta, &self.instruction)?;
        single(state.pop_n(2)?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let suspended = state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset()));
        let head = meta.builder.new_label();
        let done = meta.builder.new_label();
        meta.builder.place_label(head)?;
        meta.builder.emit_jump(TargetOp::SendOrJump, done);
        emit_yield(meta, suspended.stack())?;
        meta.builder.emit_jump(TargetOp::Jump, head);
        meta.builder.place_label(done)?;
        meta.builder.emit(TargetOp::Swap);
        meta.builder.emit(TargetOp::Pop);
        Ok(())
    }
}

/// `SEND` (3.11+)
///
/// Falls through with the yielded value above the receiver. When the
/// receiver returns, 3.11 replaces it with the result while 3.12 keeps it for
/// `END_SEND`.
#[derive(Debug)]
pub struct Send {
    instruction: Instruction,
}

impl Send {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn keeps_receiver(version: DialectVersion) -> bool {
        version >= DialectVersion::V3_12
    }
}

impl Opcode for Send {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        require_generator(meta, &self.instruction)?;
        let yielded = state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset()));
        let returned = if Self::keeps_receiver(meta.version) {
            yielded.clone()
        } else {
            state.pop_n(2)?.push(ValueSourceInfo::of(OBJECT, self.offset()))
        };
        Ok(smallvec![yielded, returned])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let target = meta.label(self.offset(), target_of(&self.instruction))?;
        if Self::keeps_receiver(meta.version) {
            meta.builder.emit_jump(TargetOp::SendOrJump, target);
            return Ok(());
        }
        let trampoline = meta.builder.new_label();
        meta.builder.emit_jump(TargetOp::SendOrJump, trampoline);
        meta.defer(move |m| {
            m.builder.place_label(trampoline)?;
            m.builder.emit(TargetOp::Swap);
            m.builder.emit(TargetOp::Pop);
            m.builder.emit_jump(TargetOp::Jump, target);
            Ok(())
        });
        Ok(())
    }
}

/// `END_SEND` (3.12): `[receiver, result] -> [result]`
#[derive(Debug)]
pub struct EndSend {
    instruction: Instruction,
}

impl EndSend {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for EndSend {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let result = state.peek(0)?.clone();
        single(state.pop_n(2)?.push(result))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::Swap);
        meta.builder.emit(TargetOp::Pop);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}
