//! Handler setup, raising, matching and `with` blocks.
//!
//! Handlers are entered through prologues emitted by the lowering pass; the
//! nodes here only shape the stack the source handler code expects.

use smallvec::{smallvec, SmallVec};

use super::{single, target_of, Opcode, Successors};
use crate::runtime::Value;
use crate::source::{DialectVersion, Instruction};
use crate::target::Opcode as TargetOp;
use crate::translator::error::{DataflowError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{Block, BlockKind, MethodHint, StackMetadata, ValueSourceInfo};
use crate::types::builtin::{ASSERTION_ERROR, BOOL, OBJECT, TYPE};

/// Both successors of a block-opening instruction: the body, and the handler as if raised at once
fn open_block(state: StackMetadata, kind: BlockKind, handler: usize, producer: usize) -> (StackMetadata, StackMetadata) {
    let depth = state.depth();
    let body = state.push_block(Block { kind, handler, depth });
    let entry = body.legacy_handler_entry(body.blocks().len() - 1, producer);
    (body, entry)
}

/// `SETUP_FINALLY` (3.9/3.10)
#[derive(Debug)]
pub struct SetupFinally {
    instruction: Instruction,
}

impl SetupFinally {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for SetupFinally {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let (body, entry) = open_block(state.clone(), BlockKind::Finally, target_of(&self.instruction), self.offset());
        Ok(smallvec![body, entry])
    }

    fn emit(&self, _meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `[manager] -> [exit, manager.__enter__()]`
fn emit_enter(meta: &mut FunctionMetadata<'_>) -> TranslateResult<()> {
    meta.builder.emit(TargetOp::Dup);
    meta.builder.emit_name(TargetOp::LoadAttr, "__exit__")?;
    meta.builder.emit(TargetOp::Swap);
    meta.builder.emit_name(TargetOp::LoadAttr, "__enter__")?;
    meta.builder.emit_byte(TargetOp::Call, 0);
    Ok(())
}

fn entered(state: &StackMetadata, producer: usize) -> Result<StackMetadata, DataflowError> {
    Ok(state
        .pop()?
        .push(ValueSourceInfo::of(OBJECT, producer))
        .push(ValueSourceInfo::of(OBJECT, producer)))
}

/// `SETUP_WITH` (3.9/3.10): enters the manager, then protects the body
#[derive(Debug)]
pub struct SetupWith {
    instruction: Instruction,
}

impl SetupWith {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for SetupWith {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let with_exit = state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset()));
        let (body, entry) = open_block(with_exit, BlockKind::With, target_of(&self.instruction), self.offset());
        Ok(smallvec![body.push(ValueSourceInfo::of(OBJECT, self.offset())), entry])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        emit_enter(meta)
    }
}

/// `BEFORE_WITH` (3.11+)
#[derive(Debug)]
pub struct BeforeWith {
    instruction: Instruction,
}

impl BeforeWith {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for BeforeWith {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(entered(state, self.offset())?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        emit_enter(meta)
    }
}

/// `POP_BLOCK` (3.9/3.10)
#[derive(Debug)]
pub struct PopBlock {
    instruction: Instruction,
}

impl PopBlock {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for PopBlock {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        if state.blocks().is_empty() {
            return Err(DataflowError::invalid_operand(&self.instruction).into());
        }
        single(state.pop_block())
    }

    fn emit(&self, _meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `PUSH_EXC_INFO` (3.11+): `[exc] -> [previous, exc]`, marking `exc` as handled
#[derive(Debug)]
pub struct PushExcInfo {
    instruction: Instruction,
}

impl PushExcInfo {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for PushExcInfo {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let exc = state.peek(0)?.clone();
        single(state.pop()?.push(ValueSourceInfo::of(OBJECT, self.offset())).push(exc))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::PushNone);
        meta.builder.emit(TargetOp::Swap);
        meta.builder.emit(TargetOp::EnterHandler);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `POP_EXCEPT`: leave the innermost handler
#[derive(Debug)]
pub struct PopExcept {
    instruction: Instruction,
}

impl PopExcept {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for PopExcept {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        if meta.version.has_block_stack() {
            match state.blocks().last() {
                Some(block) if block.kind == BlockKind::ExceptHandler => single(state.pop_n(3)?.pop_block()),
                _ => Err(DataflowError::invalid_operand(&self.instruction).into()),
            }
        } else {
            single(state.pop()?)
        }
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        if meta.version.has_block_stack() {
            meta.builder.emit_byte(TargetOp::PopN, 3);
        } else {
            meta.builder.emit(TargetOp::Pop);
        }
        meta.builder.emit(TargetOp::ExitHandler);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `RERAISE`
#[derive(Debug)]
pub struct Reraise {
    instruction: Instruction,
}

impl Reraise {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for Reraise {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        SmallVec::new()
    }

    /// 3.9/3.10 pop the `[tb, value, type]` triple; later dialects pop the
    /// exception and only read the `lasti` slot that a non-zero arg points at
    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        if meta.version.has_block_stack() {
            state.pop_n(3)?;
        } else {
            state.peek(self.instruction.arg() as usize)?;
        }
        Ok(SmallVec::new())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        if meta.version.has_block_stack() {
            meta.builder.emit(TargetOp::Pop);
            meta.builder.emit(TargetOp::Swap);
            meta.builder.emit(TargetOp::Pop);
        }
        meta.builder.emit(TargetOp::Reraise);
        Ok(())
    }
}

/// `RAISE_VARARGS`
#[derive(Debug)]
pub struct RaiseVarargs {
    instruction: Instruction,
}

impl RaiseVarargs {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn count(&self) -> Result<u8, DataflowError> {
        match self.instruction.arg() {
            n @ 0..=2 => Ok(n as u8),
            _ => Err(DataflowError::invalid_operand(&self.instruction)),
        }
    }
}

impl Opcode for RaiseVarargs {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        SmallVec::new()
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        state.pop_n(self.count()? as usize)?;
        Ok(SmallVec::new())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::Raise, self.count()?);
        Ok(())
    }
}

/// `JUMP_IF_NOT_EXC_MATCH` (3.9/3.10): pops the raised type and the handler's type
#[derive(Debug)]
pub struct JumpIfNotExcMatch {
    instruction: Instruction,
}

impl JumpIfNotExcMatch {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for JumpIfNotExcMatch {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1, target_of(&self.instruction)]
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let next = state.pop_n(2)?;
        Ok(smallvec![next.clone(), next])
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let label = meta.label(self.offset(), target_of(&self.instruction))?;
        meta.builder.emit(TargetOp::ExcMatch);
        meta.builder.emit_jump(TargetOp::JumpIfFalse, label);
        Ok(())
    }
}

/// `CHECK_EXC_MATCH` (3.11+): `[exc, type] -> [exc, matched]`
#[derive(Debug)]
pub struct CheckExcMatch {
    instruction: Instruction,
}

impl CheckExcMatch {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for CheckExcMatch {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop()?.push(ValueSourceInfo::of(BOOL, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::Over);
        meta.builder.emit(TargetOp::Swap);
        meta.builder.emit(TargetOp::ExcMatch);
        Ok(())
    }
}

/// `LOAD_ASSERTION_ERROR`
#[derive(Debug)]
pub struct LoadAssertionError {
    instruction: Instruction,
}

impl LoadAssertionError {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadAssertionError {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let class = ValueSourceInfo::of(TYPE, self.offset()).with_hint(MethodHint::Class(ASSERTION_ERROR));
        single(state.push(class))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_constant(Value::Type(ASSERTION_ERROR))?;
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `WITH_EXCEPT_START`: call the saved `__exit__` with the active exception
#[derive(Debug)]
pub struct WithExceptStart {
    instruction: Instruction,
}

impl WithExceptStart {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    /// Distance from TOS to the saved `__exit__`
    fn exit_depth(version: DialectVersion) -> usize {
        if version.has_block_stack() {
            6
        } else {
            3
        }
    }
}

impl Opcode for WithExceptStart {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        state.peek(Self::exit_depth(meta.version))?;
        single(state.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let builder = &mut meta.builder;
        if meta.version.has_block_stack() {
            // [exit, prev x3, tb, value, type]
            builder.emit_byte(TargetOp::Pick, 6);
            builder.emit_byte(TargetOp::Pick, 1);
            builder.emit_byte(TargetOp::Pick, 3);
            builder.emit_byte(TargetOp::Pick, 5);
        } else {
            // [exit, lasti, prev, exc]
            builder.emit_byte(TargetOp::Pick, 3);
            builder.emit_byte(TargetOp::Pick, 1);
            builder.emit(TargetOp::TypeOf);
            builder.emit_byte(TargetOp::Pick, 2);
            builder.emit(TargetOp::PushNone);
        }
        builder.emit_byte(TargetOp::Call, 3);
        Ok(())
    }
}
