//! Constants, locals, cells and globals.

use super::{single, Opcode, Successors};
use crate::source::{DialectVersion, Instruction};
use crate::target::Opcode as TargetOp;
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{MethodHint, StackMetadata, ValueSourceInfo};
use crate::types::builtin::{CELL, OBJECT, TYPE};

/// `LOAD_CONST`
#[derive(Debug)]
pub struct LoadConst {
    instruction: Instruction,
}

impl LoadConst {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadConst {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let ty = meta.constant_type(&self.instruction, self.instruction.arg() as usize)?;
        single(state.push(ValueSourceInfo::of(ty, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.emit_constant(&self.instruction, self.instruction.arg() as usize)
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// Whether a fast-local operand names a cell, as `LOAD_FAST` does for closures from 3.12
fn addresses_cell(meta: &FunctionMetadata<'_>, instruction: &Instruction) -> bool {
    if meta.version < DialectVersion::V3_12 {
        return false;
    }
    let record = meta.record;
    record
        .localsplus_names()
        .get(instruction.arg() as usize)
        .is_some_and(|name| record.cellvars.iter().chain(&record.freevars).any(|c| c == name))
}

/// `LOAD_FAST` and `LOAD_FAST_CHECK`
#[derive(Debug)]
pub struct LoadFast {
    instruction: Instruction,
}

impl LoadFast {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn loaded(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<ValueSourceInfo> {
        if addresses_cell(meta, &self.instruction) {
            meta.cell_slot(&self.instruction)?;
            return Ok(ValueSourceInfo::of(CELL, self.offset()));
        }
        let slot = meta.local_slot(&self.instruction)?;
        Ok(state
            .local(slot as usize)
            .cloned()
            .unwrap_or_else(|| ValueSourceInfo::of(OBJECT, self.offset())))
    }
}

impl Opcode for LoadFast {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.push(self.loaded(meta, state)?))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        if addresses_cell(meta, &self.instruction) {
            let slot = meta.cell_slot(&self.instruction)?;
            meta.builder.emit_u16(TargetOp::LoadCell, slot);
            return Ok(());
        }
        let slot = meta.local_slot(&self.instruction)?;
        let ty = self.loaded(meta, state)?.ty;
        meta.builder.emit_u16(TargetOp::LoadLocal, slot);
        meta.emit_cast_for(ty);
        Ok(())
    }
}

/// `LOAD_FAST_AND_CLEAR` (3.12): push the local, or null when unbound, and unbind it
#[derive(Debug)]
pub struct LoadFastAndClear {
    instruction: Instruction,
}

impl LoadFastAndClear {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadFastAndClear {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let slot = meta.local_slot(&self.instruction)? as usize;
        let value = state
            .local(slot)
            .cloned()
            .unwrap_or_else(|| ValueSourceInfo::of(OBJECT, self.offset()));
        single(state.push(value).set_local(slot, None))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.local_slot(&self.instruction)?;
        let ty = state.local(slot as usize).map_or(OBJECT, |v| v.ty);
        meta.builder.emit_u16(TargetOp::TakeLocal, slot);
        meta.emit_cast_for(ty);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `STORE_FAST`
#[derive(Debug)]
pub struct StoreFast {
    instruction: Instruction,
}

impl StoreFast {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreFast {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let slot = meta.local_slot(&self.instruction)? as usize;
        let value = state.peek(0)?.clone();
        single(state.pop()?.set_local(slot, Some(value)))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.local_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::StoreLocal, slot);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `DELETE_FAST`
#[derive(Debug)]
pub struct DeleteFast {
    instruction: Instruction,
}

impl DeleteFast {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DeleteFast {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let slot = meta.local_slot(&self.instruction)? as usize;
        single(state.set_local(slot, None))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.local_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::DeleteLocal, slot);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `LOAD_GLOBAL` and `LOAD_NAME`
///
/// From 3.11 the low bit of the argument requests a null sentinel below the
/// value and the name index is the rest.
#[derive(Debug)]
pub struct LoadGlobal {
    instruction: Instruction,
    push_null: bool,
    name_index: usize,
}

impl LoadGlobal {
    pub fn new(instruction: Instruction) -> Self {
        let name_index = instruction.arg() as usize;
        Self { instruction, push_null: false, name_index }
    }

    /// 3.11+ `LOAD_GLOBAL`
    pub fn with_null_bit(instruction: Instruction) -> Self {
        let push_null = instruction.arg() & 1 == 1;
        let name_index = (instruction.arg() >> 1) as usize;
        Self { instruction, push_null, name_index }
    }
}

impl Opcode for LoadGlobal {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let name = meta.name(&self.instruction, self.name_index)?;
        let value = match meta.registry.lookup_name(name) {
            Some(class) => ValueSourceInfo::of(TYPE, self.offset()).with_hint(MethodHint::Class(class)),
            None => ValueSourceInfo::of(OBJECT, self.offset()),
        };
        let state = if self.push_null { state.push(ValueSourceInfo::null(self.offset())) } else { state.clone() };
        single(state.push(value))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.name_index)?;
        if self.push_null {
            meta.builder.emit(TargetOp::PushNull);
        }
        meta.builder.emit_name(TargetOp::LoadGlobal, name)?;
        Ok(())
    }
}

/// `STORE_GLOBAL` and `STORE_NAME`
#[derive(Debug)]
pub struct StoreGlobal {
    instruction: Instruction,
}

impl StoreGlobal {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreGlobal {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(state.pop()?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::StoreGlobal, name)?;
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `DELETE_GLOBAL` and `DELETE_NAME`
#[derive(Debug)]
pub struct DeleteGlobal {
    instruction: Instruction,
}

impl DeleteGlobal {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DeleteGlobal {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(state.clone())
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::DeleteGlobal, name)?;
        Ok(())
    }
}

/// `LOAD_CLOSURE`: push the cell object itself
#[derive(Debug)]
pub struct LoadClosure {
    instruction: Instruction,
}

impl LoadClosure {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadClosure {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.cell_slot(&self.instruction)?;
        single(state.push(ValueSourceInfo::of(CELL, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.cell_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::LoadCell, slot);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `LOAD_DEREF`
///
/// Cells are shared with nested functions, so their content is never
/// assumed to keep a stored type.
#[derive(Debug)]
pub struct LoadDeref {
    instruction: Instruction,
}

impl LoadDeref {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadDeref {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.cell_slot(&self.instruction)?;
        single(state.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.cell_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::LoadDeref, slot);
        Ok(())
    }
}

/// `STORE_DEREF`
#[derive(Debug)]
pub struct StoreDeref {
    instruction: Instruction,
}

impl StoreDeref {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreDeref {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let slot = meta.cell_slot(&self.instruction)? as usize;
        let value = state.peek(0)?.clone();
        single(state.pop()?.set_cell(slot, value))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.cell_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::StoreDeref, slot);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `DELETE_DEREF`
#[derive(Debug)]
pub struct DeleteDeref {
    instruction: Instruction,
}

impl DeleteDeref {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DeleteDeref {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let slot = meta.cell_slot(&self.instruction)? as usize;
        single(state.set_cell(slot, ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let slot = meta.cell_slot(&self.instruction)?;
        meta.builder.emit_u16(TargetOp::DeleteDeref, slot);
        Ok(())
    }
}
