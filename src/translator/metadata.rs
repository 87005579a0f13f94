//! Per-function translation context.
//!
//! `FunctionMetadata` carries everything an opcode node needs while it is
//! analysed and emitted: the source record, the dialect, the type registry,
//! the chunk under construction, one label per source instruction, and the
//! blocks deferred until the main emission pass is done.

use std::sync::Arc;

use super::error::{DataflowError, TranslateResult};
use super::stack::{StackMetadata, ValueSourceInfo};
use crate::runtime::Value;
use crate::source::{Constant, DialectVersion, FunctionRecord, Instruction};
use crate::target::{ChunkBuilder, Label, Opcode as TargetOp, ValueKind};
use crate::types::builtin::{DICT, NONE, OBJECT, TUPLE};
use crate::types::registry::kind_of;
use crate::types::{TypeId, TypeRegistry};

/// A block emitted after the main pass, such as a handler prologue or trampoline
pub type Deferred<'a> = Box<dyn FnOnce(&mut FunctionMetadata<'a>) -> TranslateResult<()> + 'a>;

pub struct FunctionMetadata<'a> {
    pub record: &'a FunctionRecord,
    pub version: DialectVersion,
    pub registry: &'a TypeRegistry,
    /// Enclosing class when translating a method
    pub class_type: Option<TypeId>,
    pub builder: ChunkBuilder,
    constants: Vec<Value>,
    labels: Vec<Label>,
    resume_points: Vec<Label>,
    temp_count: usize,
    state_slots: usize,
    deferred: Vec<Deferred<'a>>,
}

impl<'a> FunctionMetadata<'a> {
    /// `constants` must be index-aligned with `record.constants`
    pub fn new(
        record: &'a FunctionRecord,
        version: DialectVersion,
        registry: &'a TypeRegistry,
        class_type: Option<TypeId>,
        constants: Vec<Value>,
        instruction_count: usize,
    ) -> Self {
        let mut builder = ChunkBuilder::new(record.name.as_str());
        {
            let info = builder.info_mut();
            info.qualname = Arc::from(record.qualname());
            info.arg_count = record.argcount;
            info.kwonly_count = record.kwonlyargcount;
            info.has_varargs = record.varargs;
            info.has_varkw = record.varkeywords;
            info.local_names = record.varnames.iter().map(|n| Arc::from(n.as_str())).collect();
            info.cell_names = record.cellvars.iter().map(|n| Arc::from(n.as_str())).collect();
            info.free_names = record.freevars.iter().map(|n| Arc::from(n.as_str())).collect();
            info.cell_args = record
                .cellvars
                .iter()
                .enumerate()
                .filter_map(|(cell, name)| {
                    let local = record.varnames.iter().position(|v| v == name)?;
                    (local < record.param_count()).then_some((cell as u16, local as u16))
                })
                .collect();
            info.is_generator = record.is_generator();
            info.first_line = record.first_line;
        }
        builder.set_line(record.first_line);
        let labels = (0..instruction_count).map(|_| builder.new_label()).collect();

        Self {
            record,
            version,
            registry,
            class_type,
            builder,
            constants,
            labels,
            resume_points: Vec::new(),
            temp_count: 0,
            state_slots: 0,
            deferred: Vec::new(),
        }
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.record.is_generator()
    }

    /// Declared type of parameter `index`
    pub fn parameter_type(&self, index: usize) -> TypeId {
        let record = self.record;
        if Some(index) == record.varargs_index() {
            return TUPLE;
        }
        if Some(index) == record.varkeywords_index() {
            return DICT;
        }
        let name = &record.varnames[index];
        if let Some(annotation) = record.annotations.get(name) {
            return self.registry.resolve_annotation(annotation);
        }
        match self.class_type {
            Some(class) if index == 0 && record.argcount > 0 => class,
            _ => OBJECT,
        }
    }

    /// Declared return type, `object` when unannotated
    pub fn return_type(&self) -> TypeId {
        self.record
            .annotations
            .get("return")
            .map_or(OBJECT, |annotation| self.registry.resolve_annotation(annotation))
    }

    /// State before the first instruction
    pub fn entry_state(&self) -> StackMetadata {
        let params = self.record.param_count();
        let locals = (0..self.record.varnames.len())
            .map(|i| (i < params).then(|| ValueSourceInfo::typed(self.parameter_type(i))))
            .collect();
        let cells = (0..self.record.cellvars.len() + self.record.freevars.len())
            .map(|_| ValueSourceInfo::typed(OBJECT))
            .collect();
        let state = StackMetadata::new(locals, cells);
        if self.is_generator() && self.version == DialectVersion::V3_10 {
            state.push(ValueSourceInfo::typed(NONE))
        } else {
            state
        }
    }

    /// Local slot addressed by a fast-local instruction
    pub fn local_slot(&self, instruction: &Instruction) -> Result<u16, DataflowError> {
        let arg = instruction.arg() as usize;
        if arg < self.record.varnames.len() {
            Ok(arg as u16)
        } else {
            Err(DataflowError::invalid_operand(instruction))
        }
    }

    /// Cell slot addressed by a deref instruction: own cells first, then free variables
    pub fn cell_slot(&self, instruction: &Instruction) -> Result<u16, DataflowError> {
        let arg = instruction.arg() as usize;
        let record = self.record;
        let slot = if self.version >= DialectVersion::V3_11 {
            let names = record.localsplus_names();
            let name = names.get(arg).ok_or_else(|| DataflowError::invalid_operand(instruction))?;
            record
                .cellvars
                .iter()
                .position(|c| c == name)
                .or_else(|| record.freevars.iter().position(|f| f == name).map(|i| record.cellvars.len() + i))
        } else {
            (arg < record.cellvars.len() + record.freevars.len()).then_some(arg)
        };
        slot.map(|s| s as u16).ok_or_else(|| DataflowError::invalid_operand(instruction))
    }

    pub fn name(&self, instruction: &Instruction, index: usize) -> Result<&'a str, DataflowError> {
        self.record
            .names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| DataflowError::invalid_operand(instruction))
    }

    pub fn constant(&self, instruction: &Instruction, index: usize) -> Result<&Value, DataflowError> {
        self.constants.get(index).ok_or_else(|| DataflowError::invalid_operand(instruction))
    }

    /// Static type of a constant
    pub fn constant_type(&self, instruction: &Instruction, index: usize) -> Result<TypeId, DataflowError> {
        if let Some(Constant::Opaque(_)) = self.record.constants.get(index) {
            return Ok(OBJECT);
        }
        Ok(self.constant(instruction, index)?.type_id())
    }

    /// Emit a load of source constant `index`
    pub fn emit_constant(&mut self, instruction: &Instruction, index: usize) -> TranslateResult<()> {
        if let Some(Constant::Opaque(description)) = self.record.constants.get(index) {
            let slot = self.builder.add_constant(Value::from(description.as_str()))?;
            self.builder.emit_u16(TargetOp::LoadFallback, slot);
            return Ok(());
        }
        let value = self.constant(instruction, index)?.clone();
        self.builder.emit_constant(value)?;
        Ok(())
    }

    /// Emit a kind check when `ty` has a precise kind
    pub fn emit_cast_for(&mut self, ty: TypeId) {
        let kind = kind_of(ty);
        if kind != ValueKind::Any {
            self.builder.emit_cast(kind);
        }
    }

    /// Label bound to the first target instruction of source instruction `target`
    pub fn label(&self, from: usize, target: usize) -> Result<Label, DataflowError> {
        self.labels
            .get(target)
            .copied()
            .ok_or(DataflowError::UnresolvableJumpTarget { offset: from, target })
    }

    /// Fresh scratch local, invisible to the source
    pub fn alloc_temp(&mut self) -> u16 {
        let info = self.builder.info_mut();
        let slot = info.local_names.len() as u16;
        info.local_names.push(Arc::from(format!("$tmp{}", self.temp_count)));
        self.temp_count += 1;
        slot
    }

    /// Queue a block to emit after the main pass
    pub fn defer(&mut self, block: impl FnOnce(&mut FunctionMetadata<'a>) -> TranslateResult<()> + 'a) {
        self.deferred.push(Box::new(block));
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Deferred<'a>> {
        std::mem::take(&mut self.deferred)
    }

    /// Register a generator resume point, returning its resume index
    pub fn add_resume_point(&mut self, label: Label) -> u16 {
        self.resume_points.push(label);
        self.resume_points.len() as u16
    }

    pub fn resume_points(&self) -> &[Label] {
        &self.resume_points
    }

    /// Ensure the generator has at least `slots` state slots
    pub fn reserve_state_slots(&mut self, slots: usize) {
        self.state_slots = self.state_slots.max(slots);
    }

    pub fn state_slots(&self) -> usize {
        self.state_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FunctionBuilder;
    use crate::types::builtin::{INT, STR};

    #[test]
    fn test_entry_state_uses_annotations() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .args(&["a", "b"])
            .varargs("rest")
            .locals(&["tmp"])
            .annotate("a", "int")
            .annotate("return", "str")
            .build();
        let registry = TypeRegistry::new();
        let meta = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, None, vec![], 0);
        let entry = meta.entry_state();
        assert_eq!(entry.local(0).map(|v| v.ty), Some(INT));
        assert_eq!(entry.local(1).map(|v| v.ty), Some(OBJECT));
        assert_eq!(entry.local(2).map(|v| v.ty), Some(TUPLE));
        assert!(entry.local(3).is_none());
        assert_eq!(meta.return_type(), STR);
    }

    #[test]
    fn test_self_gets_class_type() {
        let record = FunctionBuilder::new("m", DialectVersion::V3_11).args(&["self", "x"]).build();
        let registry = TypeRegistry::new();
        let class = registry.register_class("Point", &[]).expect("register");
        let meta = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, Some(class), vec![], 0);
        assert_eq!(meta.parameter_type(0), class);
        assert_eq!(meta.parameter_type(1), OBJECT);
    }

    #[test]
    fn test_cell_slots_by_dialect() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .args(&["x"])
            .cellvars(&["x", "c"])
            .freevars(&["outer"])
            .build();
        let registry = TypeRegistry::new();
        let modern = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, None, vec![], 0);
        // localsplus: x, c, outer
        assert_eq!(modern.cell_slot(&Instruction::new("LOAD_DEREF", 0, 0)), Ok(0));
        assert_eq!(modern.cell_slot(&Instruction::new("LOAD_DEREF", 0, 1)), Ok(1));
        assert_eq!(modern.cell_slot(&Instruction::new("LOAD_DEREF", 0, 2)), Ok(2));
        assert!(modern.cell_slot(&Instruction::new("LOAD_DEREF", 0, 3)).is_err());
        assert_eq!(modern.builder.info().cell_args, vec![(0, 0)]);

        let legacy = FunctionMetadata::new(&record, DialectVersion::V3_10, &registry, None, vec![], 0);
        assert_eq!(legacy.cell_slot(&Instruction::new("LOAD_DEREF", 0, 2)), Ok(2));
    }

    #[test]
    fn test_temps_extend_local_names() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11).args(&["x"]).build();
        let registry = TypeRegistry::new();
        let mut meta = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, None, vec![], 0);
        assert_eq!(meta.alloc_temp(), 1);
        assert_eq!(meta.alloc_temp(), 2);
        assert_eq!(meta.builder.info().local_count(), 3);
    }
}
