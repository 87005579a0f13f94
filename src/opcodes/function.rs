//! Function creation and the call protocol.
//!
//! Calls are normalised to one shape: a null sentinel below the callable
//! whenever the dialect pushes one. `LOAD_METHOD` becomes an attribute load
//! producing a bound method with a null below it, so `CALL_METHOD` and the
//! 3.11+ `CALL` both lower to `Call` followed by dropping the sentinel. A slot
//! the dataflow does not know to be null is called with the value above it
//! as receiver.

use smallvec::SmallVec;

use super::{single, Opcode, Successors};
use crate::source::{Constant, DialectVersion, Instruction};
use crate::target::Opcode as TargetOp;
use crate::translator::error::{DataflowError, TranslateResult};
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::{MethodHint, StackMetadata, ValueSourceInfo};
use crate::types::builtin::{FUNCTION, OBJECT};
use crate::types::TypeId;

const FLAG_DEFAULTS: u32 = 0x01;
const FLAG_KWDEFAULTS: u32 = 0x02;
const FLAG_ANNOTATIONS: u32 = 0x04;
const FLAG_CLOSURE: u32 = 0x08;

/// Hint for an attribute of a receiver whose type declares a method of that name
pub(crate) fn method_hint(meta: &FunctionMetadata<'_>, receiver: TypeId, name: &str) -> Option<MethodHint> {
    if receiver == OBJECT {
        return None;
    }
    meta.registry
        .lookup_method(receiver, name)
        .map(|_| MethodHint::Method { owner: receiver, name: name.into() })
}

/// Static result type of calling `callable` with `args`
pub(crate) fn call_result(meta: &FunctionMetadata<'_>, callable: &ValueSourceInfo, args: &[ValueSourceInfo]) -> TypeId {
    match &callable.hint {
        Some(MethodHint::Method { owner, name }) => {
            let arg_types: SmallVec<[TypeId; 4]> = args.iter().map(|a| a.ty).collect();
            meta.registry
                .lookup_method(*owner, name)
                .and_then(|set| set.resolve(meta.registry, &arg_types).map(|sig| sig.ret))
                .unwrap_or(OBJECT)
        }
        Some(MethodHint::Class(class)) => *class,
        Some(MethodHint::Null) | None => OBJECT,
    }
}

/// Attribute load that leaves `[null, bound]` on the stack
pub(crate) fn emit_method_load(meta: &mut FunctionMetadata<'_>, name: &str) -> TranslateResult<()> {
    meta.builder.emit_name(TargetOp::LoadAttr, name)?;
    meta.builder.emit(TargetOp::PushNull);
    meta.builder.emit(TargetOp::Swap);
    Ok(())
}

/// State after loading method `name` from the receiver on top
pub(crate) fn method_load_effect(
    meta: &FunctionMetadata<'_>,
    state: &StackMetadata,
    name: &str,
    producer: usize,
) -> TranslateResult<StackMetadata> {
    let receiver = state.peek(0)?.ty;
    let mut bound = ValueSourceInfo::of(OBJECT, producer);
    bound.hint = method_hint(meta, receiver, name);
    Ok(state.pop()?.push(ValueSourceInfo::null(producer)).push(bound))
}

/// `MAKE_FUNCTION`
#[derive(Debug)]
pub struct MakeFunction {
    instruction: Instruction,
}

impl MakeFunction {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn flags(&self) -> u32 {
        self.instruction.arg() & (FLAG_DEFAULTS | FLAG_KWDEFAULTS | FLAG_ANNOTATIONS | FLAG_CLOSURE)
    }

    /// Before 3.11 the qualified name sits above the code object
    fn pops_qualname(version: DialectVersion) -> bool {
        version < DialectVersion::V3_11
    }
}

impl Opcode for MakeFunction {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        if self.instruction.arg() & !0x0F != 0 {
            return Err(DataflowError::invalid_operand(&self.instruction).into());
        }
        let consumed = self.flags().count_ones() as usize + 1 + usize::from(Self::pops_qualname(meta.version));
        single(state.pop_n(consumed)?.push(ValueSourceInfo::of(FUNCTION, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        if Self::pops_qualname(meta.version) {
            meta.builder.emit(TargetOp::Pop);
        }
        meta.builder.emit_byte(TargetOp::MakeFunction, self.flags() as u8);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallForm {
    /// `CALL_FUNCTION`: `[callable, args...]`
    Function,
    /// `CALL_FUNCTION_KW`: `[callable, args..., kwnames]`
    FunctionKw,
    /// `CALL_METHOD` and `CALL`: `[null, callable, args...]`, keyword names from `KW_NAMES`
    Method,
}

/// The positional call family
#[derive(Debug)]
pub struct Call {
    instruction: Instruction,
    form: CallForm,
}

impl Call {
    pub fn new(instruction: Instruction, form: CallForm) -> Self {
        Self { instruction, form }
    }

    fn argc(&self) -> Result<u8, DataflowError> {
        u8::try_from(self.instruction.arg()).map_err(|_| DataflowError::invalid_operand(&self.instruction))
    }

    /// Values consumed from the source stack, including callable and sentinel
    fn consumed(&self, argc: usize) -> usize {
        match self.form {
            CallForm::Function => argc + 1,
            CallForm::FunctionKw | CallForm::Method => argc + 2,
        }
    }

    /// A method-form call whose slot holds a callable rather than the sentinel
    ///
    /// The slot is then called with the value above it as its first argument,
    /// as the 3.11+ `with` exit does with the saved `__exit__`.
    fn calls_slot(&self, state: &StackMetadata) -> TranslateResult<bool> {
        if self.form != CallForm::Method {
            return Ok(false);
        }
        let argc = self.argc()? as usize;
        Ok(!state.peek(argc + 1)?.is_null())
    }

    fn result(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<TypeId> {
        let argc = self.argc()? as usize;
        let keyword = match self.form {
            CallForm::Function => false,
            CallForm::FunctionKw => true,
            CallForm::Method => state.kw_names().is_some(),
        };
        if keyword || self.calls_slot(state)? {
            return Ok(OBJECT);
        }
        let callable = state.peek(argc)?;
        let args = state.top(argc)?;
        Ok(call_result(meta, callable, args))
    }
}

impl Opcode for Call {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let argc = self.argc()? as usize;
        let ty = self.result(meta, state)?;
        let next = state
            .pop_n(self.consumed(argc))?
            .push(ValueSourceInfo::of(ty, self.offset()))
            .with_kw_names(None);
        single(next)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()> {
        let argc = self.argc()?;
        let ty = self.result(meta, state)?;
        match self.form {
            CallForm::Function => meta.builder.emit_byte(TargetOp::Call, argc),
            CallForm::FunctionKw => meta.builder.emit_byte(TargetOp::CallKw, argc),
            CallForm::Method => {
                let calls_slot = self.calls_slot(state)?;
                let positional = if calls_slot {
                    argc.checked_add(1).ok_or_else(|| DataflowError::invalid_operand(&self.instruction))?
                } else {
                    argc
                };
                match state.kw_names() {
                    Some(index) => {
                        meta.emit_constant(&self.instruction, index as usize)?;
                        meta.builder.emit_byte(TargetOp::CallKw, positional);
                    }
                    None => meta.builder.emit_byte(TargetOp::Call, positional),
                }
                if !calls_slot {
                    meta.builder.emit(TargetOp::Swap);
                    meta.builder.emit(TargetOp::Pop);
                }
            }
        }
        meta.emit_cast_for(ty);
        Ok(())
    }
}

/// `CALL_FUNCTION_EX`: positional tuple and optional keyword dict
#[derive(Debug)]
pub struct CallFunctionEx {
    instruction: Instruction,
}

impl CallFunctionEx {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }

    fn has_kwargs(&self) -> bool {
        self.instruction.arg() & 1 == 1
    }

    fn has_null(version: DialectVersion) -> bool {
        version >= DialectVersion::V3_11
    }
}

impl Opcode for CallFunctionEx {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let consumed = 2 + usize::from(self.has_kwargs()) + usize::from(Self::has_null(meta.version));
        single(state.pop_n(consumed)?.push(ValueSourceInfo::of(OBJECT, self.offset())))
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        meta.builder.emit_byte(TargetOp::CallEx, u8::from(self.has_kwargs()));
        if Self::has_null(meta.version) {
            meta.builder.emit(TargetOp::Swap);
            meta.builder.emit(TargetOp::Pop);
        }
        Ok(())
    }
}

/// `LOAD_METHOD`
#[derive(Debug)]
pub struct LoadMethod {
    instruction: Instruction,
}

impl LoadMethod {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for LoadMethod {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        single(method_load_effect(meta, state, name, self.offset())?)
    }

    fn emit(&self, meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        let name = meta.name(&self.instruction, self.instruction.arg() as usize)?;
        emit_method_load(meta, name)
    }
}

/// `KW_NAMES` (3.11/3.12): records the keyword tuple for the next `CALL`
#[derive(Debug)]
pub struct KwNames {
    instruction: Instruction,
}

impl KwNames {
    pub fn new(instruction: Instruction) -> Self {
        Self { instruction }
    }
}

impl Opcode for KwNames {
    fn instruction(&self) -> &Instruction {
        &self.instruction
    }

    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors> {
        let index = self.instruction.arg() as usize;
        match meta.record.constants.get(index) {
            Some(Constant::Tuple(_)) => single(state.with_kw_names(Some(self.instruction.arg()))),
            _ => Err(DataflowError::invalid_operand(&self.instruction).into()),
        }
    }

    fn emit(&self, _meta: &mut FunctionMetadata<'_>, _state: &StackMetadata) -> TranslateResult<()> {
        Ok(())
    }

    fn can_raise(&self) -> bool {
        false
    }
}
