//! Operators, comparisons and subscripts.
//!
//! Operator nodes consult the type resolver. A resolved intrinsic becomes a
//! typed target instruction; any other resolved overload becomes a runtime
//! dispatch followed by a cast to the declared return kind; a reflected
//! overload swaps the operands and invokes the right operand's dunder.

use super::{single, Opcode, Successors};
use crate::source::{DialectVersion, Instruction};
use crate::target::{Opcode as TargetOp, ValueKind};
use crate::translator::error::{DataflowError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{StackMetadata, ValueSourceInfo};
use crate::types::builtin::{BOOL, OBJECT};
use crate::types::registry::kind_of;
use crate::types::{
    resolve_binary, resolve_compare, resolve_unary, BinaryOperator, BinaryResolution, CompareOperator, Emission,
    UnaryOperator, UnaryResolution,
};

fn emit_resolution(
    meta: &mut FunctionMetadata<'_>,
    resolution: &BinaryResolution,
    dynamic: TargetOp,
    operator: u8,
) -> TranslateResult<()> {
    match resolution {
        BinaryResolution::Forward(sig) => match sig.emission {
            Emission::Intrinsic(op) => meta.builder.emit(op),
            Emission::Virtual | Emission::Runtime => {
                meta.builder.emit_byte(dynamic, operator);
                meta.emit_cast_for(sig.ret);
            }
        },
        BinaryResolution::Reflected(sig) => {
            meta.builder.emit(TargetOp::Swap);
            meta.builder.emit_name(TargetOp::InvokeDunder, &sig.name)?;
            meta.emit_cast_for(sig.ret);
        }
        BinaryResolution::Dynamic => meta.builder.emit_byte(dynamic, operator),
    }
    Ok(())
}

/// `BINARY_OP` (3.11+) and the legacy `BINARY_*` / `INPLACE_*` opcodes
#[derive(Debug)]
pub struct BinaryOperation {
    instruction: Instruction,
    operator: Option<(BinaryOperator, bool)>,
}

impl BinaryOperation {
    pub fn from_arg(instruction: Instruction) -> Self {
        let operator = BinaryOperator::from_binary_op_arg(instruction.arg());
        Self { instruction, operator }
    }

    pub fn from_opname(instruction: Instruction) -> Self {
        let operator = BinaryOperator::from_legacy_opname(instruction.opname());
        Self { instruction, operator }
    }

    fn operator(&self) -> Result<(BinaryOperator, bool), DataflowError> {
        self.operator.ok_or_else(|| DataflowError::invalid_operand(&self.instruction))
    }

    /// In-place forms resolve statically only on immutable value types
    fn resolve(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<BinaryResolution> {
        let (op, inplace) = self.operator()?;
        let left = state.peek(1)?.ty;
        let right = state.peek(0)?.ty;
        if inplace && kind_of(left) == ValueKind::Any {
            return Ok(BinaryResolution::Dynamic);
        }
        Ok(resolve_binary(meta.registry, op, left, right))
    }
}

impl Opcode for BinaryOperation {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let ty = self.resolve(meta, state)?.result_type();
        single(state.pop_n(2)?.push(ValueSourceInfo::of(ty, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let (op, inplace) = self.operator()?;
        let resolution = self.resolve(meta, state)?;
        let dynamic = if inplace { TargetOp::InplaceOp } else { TargetOp::BinaryOp };
        emit_resolution(meta, &resolution, dynamic, op.to_byte())
    }
}

/// `COMPARE_OP`
#[derive(Debug)]
pub struct Compare {
    instruction: Instruction,
}

impl Compare {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn operator(&self, version: DialectVersion) -> Result<CompareOperator, DataflowError> {
        CompareOperator::from_arg(self.instruction.arg(), version >= DialectVersion::V3_12)
            .ok_or_else(|| DataflowError::invalid_operand(&self.instruction))
    }

    fn resolve(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<BinaryResolution> {
        let op = self.operator(meta.version)?;
        Ok(resolve_compare(meta.registry, op, state.peek(1)?.ty, state.peek(0)?.ty))
    }
}

impl Opcode for Compare {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let ty = self.resolve(meta, state)?.result_type();
        single(state.pop_n(2)?.push(ValueSourceInfo::of(ty, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let op = self.operator(meta.version)?;
        let resolution = self.resolve(meta, state)?;
        emit_resolution(meta, &resolution, TargetOp::CompareOp, op.to_byte())
    }
}

/// `UNARY_POSITIVE`, `UNARY_NEGATIVE`, `UNARY_INVERT` and `UNARY_NOT`
#[derive(Debug)]
pub struct UnaryOperation {
    instruction: Instruction,
    operator: Option<UnaryOperator>,
}

impl UnaryOperation {
    pub fn new(instruction: Instruction) -> Self {
        let operator = UnaryOperator::from_opname(instruction.opname());
        Self { instruction, operator }
    }

    /// A unary node for an explicit operator, as used by intrinsic calls
    pub fn with_operator(instruction: Instruction, operator: UnaryOperator) -> Self {
        Self { instruction, operator: Some(operator) }
    }

    fn resolve(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<(UnaryOperator, UnaryResolution)> {
        let op = self.operator.ok_or_else(|| DataflowError::invalid_operand(&self.instruction))?;
        Ok((op, resolve_unary(meta.registry, op, state.peek(0)?.ty)))
    }
}

impl Opcode for UnaryOperation {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let (_, resolution) = self.resolve(meta, state)?;
        single(state.pop()?.push(ValueSourceInfo::of(resolution.result_type(), self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let (op, resolution) = self.resolve(meta, state)?;
        match resolution {
            UnaryResolution::Forward(sig) => match sig.emission {
                Emission::Intrinsic(target) => meta.builder.emit(target),
                Emission::Virtual | Emission::Runtime => {
                    meta.builder.emit_byte(TargetOp::UnaryOp, op.to_byte());
                    meta.emit_cast_for(sig.ret);
                }
            },
            UnaryResolution::Truth => {
                if state.peek(0)?.ty != BOOL {
                    meta.builder.emit(TargetOp::Truthy);
                }
                meta.builder.emit(TargetOp::Not);
            }
            UnaryResolution::Dynamic => meta.builder.emit_byte(TargetOp::UnaryOp, op.to_byte()),
        }
        Ok(())
    }
}

/// `IS_OP`
#[derive(Debug)]
pub struct IsOp {
    instruction: Instruction,
}

impl IsOp {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for IsOp {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(2)?.push(ValueSourceInfo::of(BOOL, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::IsOp, (self.instruction.arg() & 1) as u8);
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}

/// `CONTAINS_OP`
#[derive(Debug)]
pub struct ContainsOp {
    instruction: Instruction,
}

impl ContainsOp {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for ContainsOp {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(2)?.push(ValueSourceInfo::of(BOOL, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::ContainsOp, (self.instruction.arg() & 1) as u8);
        Ok(())
    }
}

/// `BINARY_SUBSCR`
#[derive(Debug)]
pub struct Subscript {
    instruction: Instruction,
}

impl Subscript {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for Subscript {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(2)?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::GetItem);
        Ok(())
    }
}

/// `STORE_SUBSCR`: `container[key] = value` with `[value, container, key]` on the stack
#[derive(Debug)]
pub struct StoreSubscript {
    instruction: Instruction,
}

impl StoreSubscript {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreSubscript {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(3)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::SetItem);
        Ok(())
    }
}

/// `DELETE_SUBSCR`
#[derive(Debug)]
pub struct DeleteSubscript {
    instruction: Instruction,
}

impl DeleteSubscript {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DeleteSubscript {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(2)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit(TargetOp::DelItem);
        Ok(())
    }
}

/// `BINARY_SLICE` (3.12): `container[start:end]`
#[derive(Debug)]
pub struct BinarySlice {
    instruction: Instruction,
}

impl BinarySlice {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for BinarySlice {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(3)?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::BuildSlice, 2);
        meta.builder.emit(TargetOp::GetItem);
        Ok(())
    }
}

/// `STORE_SLICE` (3.12): `container[start:end] = value`
#[derive(Debug)]
pub struct StoreSlice {
    instruction: Instruction,
}

impl StoreSlice {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreSlice {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, _meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        single(state.pop_n(4)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::BuildSlice, 2);
        meta.builder.emit(TargetOp::SetItem);
        Ok(())
    }
}
