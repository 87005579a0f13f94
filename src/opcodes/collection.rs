//! Collection literals, comprehension helpers and unpacking.

use super::{single, Opcode, Successors};
use crate::source::Instruction;
use crate::target::Opcode as TargetOp;
use crate::translator::error::{DataflowError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::{DICT, LIST, OBJECT, SET, SLICE, TUPLE};
use crate::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Tuple,
    List,
    Set,
    /// `n` key/value pairs
    Map,
    /// `n` values and a tuple of keys
    ConstKeyMap,
}

impl CollectionKind {
    fn consumed(self, n: usize) -> usize {
        match self {
            Self::Tuple | Self::List | Self::Set => n,
            Self::Map => 2 * n,
            Self::ConstKeyMap => n + 1,
        }
    }

    fn result_type(self) -> TypeId {
        match self {
            Self::Tuple => TUPLE,
            Self::List => LIST,
            Self::Set => SET,
            Self::Map | Self::ConstKeyMap => DICT,
        }
    }

    fn target(self) -> TargetOp {
        match self {
            Self::Tuple => TargetOp::BuildTuple,
            Self::List => TargetOp::BuildList,
            Self::Set => TargetOp::BuildSet,
            Self::Map => TargetOp::BuildMap,
            Self::ConstKeyMap => TargetOp::BuildConstKeyMap,
        }
    }
}

/// `BUILD_TUPLE`, `BUILD_LIST`, `BUILD_SET`, `BUILD_MAP` and `BUILD_CONST_KEY_MAP`
#[derive(Debug)]
pub struct BuildCollection {
    instruction: Instruction,
    kind: CollectionKind,
}

impl BuildCollection {
    pub fn new(instruction: Instruction, kind: CollectionKind) -> Self {
        Self { instruction, kind }
    }

    fn count(&self) -> Result<u16, DataflowError> {
        u16::try_from(self.instruction.arg()).map_err(|_| DataflowError::invalid_operand(&self.instruction))
    }
}

impl Opcode for BuildCollection {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let consumed = self.kind.consumed(self.count()? as usize);
        single(state.pop_n(consumed)?.push(ValueSourceInfo::of(self.kind.result_type(), self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_u16(self.kind.target(), self.count()?);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        // hashing keys may fail
        !matches!(self.kind, CollectionKind::Tuple | CollectionKind::List)
    }
}

/// `BUILD_SLICE`
#[derive(Debug)]
pub struct BuildSlice {
    instruction: Instruction,
}

impl BuildSlice {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn count(&self) -> Result<u8, DataflowError> {
        match self.instruction.arg() {
            2 => Ok(2),
            3 => Ok(3),
            _ => Err(DataflowError::invalid_operand(&self.instruction)),
        }
    }
}

impl Opcode for BuildSlice {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let n = self.count()? as usize;
        single(state.pop_n(n)?.push(ValueSourceInfo::of(SLICE, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::BuildSlice, self.count()?);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    ListAppend,
    SetAdd,
    /// Pops a key and a value
    MapAdd,
    ListExtend,
    SetUpdate,
    /// `DICT_UPDATE` and `DICT_MERGE`
    DictUpdate,
}

impl UpdateKind {
    fn target(self) -> TargetOp {
        match self {
            Self::ListAppend => TargetOp::ListAppend,
            Self::SetAdd => TargetOp::SetAdd,
            Self::MapAdd => TargetOp::MapAdd,
            Self::ListExtend => TargetOp::ListExtend,
            Self::SetUpdate => TargetOp::SetUpdate,
            Self::DictUpdate => TargetOp::DictUpdate,
        }
    }
}

/// In-place additions to a collection `arg` slots below the consumed operands
#[derive(Debug)]
pub struct UpdateCollection {
    instruction: Instruction,
    kind: UpdateKind,
}

impl UpdateCollection {
    pub fn new(instruction: Instruction, kind: UpdateKind) -> Self {
        Self { instruction, kind }
    }

    fn consumed(&self) -> usize {
        if self.kind == UpdateKind::MapAdd {
            2
        } else {
            1
        }
    }

    fn distance(&self) -> Result<u16, DataflowError> {
        u16::try_from(self.instruction.arg())
            .ok()
            .filter(|&d| d >= 1)
            .ok_or_else(|| DataflowError::invalid_operand(&self.instruction))
    }
}

impl Opcode for UpdateCollection {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let remaining = state.pop_n(self.consumed())?;
        remaining.peek(self.distance()? as usize - 1)?;
        single(remaining)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_u16(self.kind.target(), self.distance()?);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        self.kind != UpdateKind::ListAppend
    }
}

/// `LIST_TO_TUPLE`
#[derive(Debug)]
pub struct ListToTuple {
    instruction: Instruction,
}

impl ListToTuple {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ListToTuple {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop()?.push(ValueSourceInfo::of(TUPLE, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::ListToTuple);
        Ok(())
    }
}

/// `UNPACK_SEQUENCE`: the first item ends on top
#[derive(Debug)]
pub struct UnpackSequence {
    instruction: Instruction,
}

impl UnpackSequence {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn count(&self) -> Result<u16, DataflowError> {
        u16::try_from(self.instruction.arg()).map_err(|_| DataflowError::invalid_operand(&self.instruction))
    }
}

impl Opcode for UnpackSequence {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let n = self.count()? as usize;
        let items = (0..n).map(|_| ValueSourceInfo::of(OBJECT, self.offset()));
        single(state.pop()?.push_all(items))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_u16(TargetOp::UnpackSequence, self.count()?);
        Ok(())
    }
}

/// `UNPACK_EX`: low byte counts targets before the starred one, high byte those after
#[derive(Debug)]
pub struct UnpackEx {
    instruction: Instruction,
}

impl UnpackEx {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn split(&self) -> Result<(usize, usize), DataflowError> {
        let arg = self.instruction.arg();
        if arg > u16::MAX as u32 {
            return Err(DataflowError::invalid_operand(&self.instruction));
        }
        Ok(((arg & 0xFF) as usize, ((arg >> 8) & 0xFF) as usize))
    }
}

impl Opcode for UnpackEx {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let (before, after) = self.split()?;
        let mut items = Vec::with_capacity(before + after + 1);
        items.extend((0..after).map(|_| ValueSourceInfo::of(OBJECT, self.offset())));
        items.push(ValueSourceInfo::of(LIST, self.offset()));
        items.extend((0..before).map(|_| ValueSourceInfo::of(OBJECT, self.offset())));
        single(state.pop()?.push_all(items))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        self.split()?;
        meta.builder.emit_u16(TargetOp::UnpackEx, self.instruction.arg() as u16);
        Ok(())
    }
}
