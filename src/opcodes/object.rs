//! Attribute access.
//!
//! Loads from a receiver whose type declares the attribute as a field get
//! the field's type, checked with a cast after the load.

use super::function::{emit_method_load, method_hint, method_load_effect};
use super::{single, Opcode, Successors};
use crate::source::{DialectVersion, Instruction};
use crate::target::Opcode as TargetOp;
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{MethodHint, StackMetadata, ValueSourceInfo};
use crate::types::builtin::{OBJECT, TYPE};
use crate::types::TypeId;

/// Static type of `receiver.name`, if a declared field provides one
fn field_type(meta: &FunctionMetadata<'_>, receiver: &ValueSourceInfo, name: &str) -> Option<TypeId> {
    let owner = match (&receiver.hint, receiver.ty) {
        (Some(MethodHint::Class(class)), TYPE) => *class,
        (_, OBJECT) => return None,
        (_, ty) => ty,
    };
    let field = meta.registry.field(owner, name)?;
    (field.is_static || receiver.ty != TYPE).then_some(field.ty)
}

/// `LOAD_ATTR`; from 3.12 the low bit requests a method load
#[derive(Debug)]
pub struct LoadAttr {
    instruction: Instruction,
}

impl LoadAttr {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    /// Name index and method bit for this dialect
    fn operand(&self, version: DialectVersion) -> (usize, bool) {
        let arg = self.instruction.arg();
        if version >= DialectVersion::V3_12 {
            ((arg >> 1) as usize, arg & 1 == 1)
        } else {
            (arg as usize, false)
        }
    }
}

impl Opcode for LoadAttr {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let (index, method) = self.operand(meta.version);
        let name = meta.name(&self.instruction, index)?;
        if method {
            return single(method_load_effect(meta, state, name, self.offset())?);
        }
        let receiver = state.peek(0)?;
        let value = match field_type(meta, receiver, name) {
            Some(ty) => ValueSourceInfo::of(ty, self.offset()),
            None => {
                let mut value = ValueSourceInfo::of(OBJECT, self.offset());
                value.hint = method_hint(meta, receiver.ty, name);
                value
            }
        };
        single(state.pop()?.push(value))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let (index, method) = self.operand(meta.version);
        let name = meta.name(&self.instruction, index)?;
        if method {
            return emit_method_load(meta, name);
        }
        let field = field_type(meta, state.peek(0)?, name);
        meta.builder.emit_name(TargetOp::LoadAttr, name)?;
        if let Some(ty) = field {
            meta.emit_cast_for(ty);
        }
        Ok(())
    }
}

/// `STORE_ATTR`: `[value, receiver] -> []`
#[derive(Debug)]
pub struct StoreAttr {
    instruction: Instruction,
}

impl StoreAttr {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for StoreAttr {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(state.pop_n(2)?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::StoreAttr, name)?;
        Ok(())
    }
}

/// `DELETE_ATTR`
#[derive(Debug)]
pub struct DeleteAttr {
    instruction: Instruction,
}

impl DeleteAttr {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for DeleteAttr {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(state.pop()?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        meta.builder.emit_name(TargetOp::DeleteAttr, name)?;
        Ok(())
    }
}
