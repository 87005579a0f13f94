//! Control flow operations for the bytecode VM.
//!
//! Jumps are relative to the end of the instruction. This module also holds
//! the iteration protocol behind `ForIter` and `SendOrJump`, and the raise
//! and handler bookkeeping used by exception tables.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::arithmetic::kind_name;
use super::generators::{GeneratorOutcome, Resume};
use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::{IteratorState, Value};
use crate::target::ValueKind;
use crate::types::builtin::{BASE_EXCEPTION, RUNTIME_ERROR, STOP_ITERATION, TYPE_ERROR};

fn iterator(state: IteratorState) -> Value {
    Value::Iterator(Arc::new(Mutex::new(state)))
}

fn chars(s: &str) -> Arc<[Value]> {
    s.chars().map(|c| Value::from(c.to_string())).collect()
}

impl BytecodeVM {
    // === Jumps ===

    /// Move `offset` bytes from the end of the current instruction
    pub(super) fn jump_by(&mut self, offset: i16) -> VmResult<()> {
        let target = self.frame.ip as isize + isize::from(offset);
        if target < 0 || target as usize >= self.frame.chunk.len() {
            return Err(VmError::IpOutOfBounds);
        }
        self.frame.ip = target as usize;
        Ok(())
    }

    pub(super) fn op_jump(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        self.jump_by(offset)
    }

    /// Pop a bool and jump when it equals `when`
    pub(super) fn op_jump_if(&mut self, when: bool) -> VmResult<()> {
        let offset = self.read_i16()?;
        match self.pop()? {
            Value::Bool(b) if b == when => self.jump_by(offset),
            Value::Bool(_) => Ok(()),
            other => Err(VmError::CastFailed { expected: ValueKind::Bool, found: kind_name(&other) }),
        }
    }

    /// Pop a value and jump when its noneness equals `when_none`
    pub(super) fn op_jump_if_none(&mut self, when_none: bool) -> VmResult<()> {
        let offset = self.read_i16()?;
        if self.pop()?.is_none() == when_none {
            self.jump_by(offset)?;
        }
        Ok(())
    }

    /// Push the next item, or pop the exhausted iterator and jump
    pub(super) fn op_for_iter(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        let iterator = self.peek()?.clone();
        match self.next_item(&iterator)? {
            Some(item) => self.push(item),
            None => {
                self.pop()?;
                self.jump_by(offset)?;
            }
        }
        Ok(())
    }

    pub(super) fn op_jump_table(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let key = self.pop_int()?;
        let target = match self.frame.chunk.get_jump_table(index) {
            Some(table) => table.target(key),
            None => return Err(self.invalid_operand(u32::from(index))),
        };
        if target >= self.frame.chunk.len() {
            return Err(VmError::IpOutOfBounds);
        }
        trace!(target: "pytron::vm::step", ip = self.frame.op_ip, key, target, "jump table");
        self.frame.ip = target;
        Ok(())
    }

    /// `[recv, v]`: send `v` into `recv`; a yielded value falls through, a return value jumps
    pub(super) fn op_send_or_jump(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        let value = self.pop()?;
        let receiver = self.peek()?.clone();
        let outcome = match &receiver {
            Value::Generator(generator) => self.generator_resume(generator, Resume::Send(value))?,
            _ if value.is_none() => match self.next_item(&receiver)? {
                Some(item) => GeneratorOutcome::Yielded(item),
                None => GeneratorOutcome::Returned(Value::None),
            },
            _ => match self.call_method(&receiver, "send", vec![value]) {
                Ok(item) => GeneratorOutcome::Yielded(item),
                Err(err) => match self.stop_iteration_value(&err) {
                    Some(result) => GeneratorOutcome::Returned(result),
                    None => return Err(err),
                },
            },
        };
        match outcome {
            GeneratorOutcome::Yielded(item) => self.push(item),
            GeneratorOutcome::Returned(result) => {
                self.push(result);
                self.jump_by(offset)?;
            }
        }
        Ok(())
    }

    // === Iteration Protocol ===

    pub(super) fn op_get_iter(&mut self) -> VmResult<()> {
        let iterable = self.pop()?;
        let iterator = self.iterate(&iterable)?;
        self.push(iterator);
        Ok(())
    }

    /// Generators delegate directly; anything else is iterated
    pub(super) fn op_get_yield_from_iter(&mut self) -> VmResult<()> {
        let iterable = self.pop()?;
        let iterator = match iterable {
            Value::Generator(_) => iterable,
            other => self.iterate(&other)?,
        };
        self.push(iterator);
        Ok(())
    }

    /// `iter(value)`
    pub fn iterate(&mut self, value: &Value) -> VmResult<Value> {
        Ok(match value {
            Value::List(list) => iterator(IteratorState::List { list: list.clone(), pos: 0 }),
            Value::Tuple(items) => iterator(IteratorState::Items { items: items.clone(), pos: 0 }),
            Value::Str(s) => iterator(IteratorState::Items { items: chars(s), pos: 0 }),
            Value::Dict(table) | Value::Set(table) => {
                iterator(IteratorState::Items { items: table.read().keys().into(), pos: 0 })
            }
            Value::Iterator(_) | Value::Generator(_) => value.clone(),
            _ => match self.call_dunder(value, "__iter__", Vec::new())? {
                Some(iterator) => iterator,
                None => {
                    return Err(VmError::raise(
                        TYPE_ERROR,
                        format!("'{}' object is not iterable", self.type_name(value)),
                    ))
                }
            },
        })
    }

    /// Advance an iterator, `None` once it is exhausted
    pub fn next_item(&mut self, iterator: &Value) -> VmResult<Option<Value>> {
        match iterator {
            Value::Iterator(state) => {
                let mut state = state.lock();
                let next = match &mut *state {
                    IteratorState::List { list, pos } => {
                        let items = list.read();
                        let item = items.get(*pos).cloned();
                        *pos += 1;
                        item
                    }
                    IteratorState::Items { items, pos } => {
                        let item = items.get(*pos).cloned();
                        *pos += 1;
                        item
                    }
                    IteratorState::Range { next, stop, step } => {
                        if (*step > 0 && *next < *stop) || (*step < 0 && *next > *stop) {
                            let item = *next;
                            *next = next.checked_add(*step).unwrap_or(*stop);
                            Some(Value::Int(item))
                        } else {
                            None
                        }
                    }
                    IteratorState::Done => None,
                };
                if next.is_none() {
                    *state = IteratorState::Done;
                }
                Ok(next)
            }
            Value::Generator(generator) => match self.generator_resume(generator, Resume::Send(Value::None))? {
                GeneratorOutcome::Yielded(item) => Ok(Some(item)),
                GeneratorOutcome::Returned(_) => Ok(None),
            },
            _ => match self.call_dunder_result(iterator, "__next__", Vec::new()) {
                Some(Ok(item)) => Ok(Some(item)),
                Some(Err(err)) if self.stop_iteration_value(&err).is_some() => Ok(None),
                Some(Err(err)) => Err(err),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'{}' object is not an iterator", self.type_name(iterator)),
                )),
            },
        }
    }

    /// Every item of an iterable
    pub fn collect_items(&mut self, iterable: &Value) -> VmResult<Vec<Value>> {
        match iterable {
            Value::List(list) => Ok(list.read().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(chars(s).to_vec()),
            Value::Dict(table) | Value::Set(table) => Ok(table.read().keys()),
            _ => {
                let iterator = self.iterate(iterable)?;
                let mut items = Vec::new();
                while let Some(item) = self.next_item(&iterator)? {
                    items.push(item);
                }
                Ok(items)
            }
        }
    }

    /// The return value carried by a `StopIteration`, `None` for other errors
    pub(super) fn stop_iteration_value(&self, err: &VmError) -> Option<Value> {
        match err {
            VmError::Exception(Value::Exception(exc)) if self.registry.is_subclass(exc.ty, STOP_ITERATION) => {
                Some(exc.args.first().cloned().unwrap_or(Value::None))
            }
            _ => None,
        }
    }

    // === Exceptions ===

    /// The exception a `Raise n` instruction throws
    pub(super) fn op_raise(&mut self) -> VmResult<VmError> {
        let count = self.read_u8()?;
        match count {
            0 => Ok(match self.handled.last() {
                Some(exc) => VmError::Exception(exc.clone()),
                None => VmError::raise(RUNTIME_ERROR, "No active exception to reraise"),
            }),
            1 => {
                let exc = self.pop()?;
                Ok(VmError::Exception(self.normalize_exception(exc)?))
            }
            2 => {
                let cause = self.pop()?;
                let exc = self.pop()?;
                let exc = self.normalize_exception(exc)?;
                let cause = if cause.is_none() { None } else { Some(self.normalize_exception(cause)?) };
                if let Value::Exception(object) = &exc {
                    *object.cause.write() = cause;
                }
                Ok(VmError::Exception(exc))
            }
            other => Err(self.invalid_operand(u32::from(other))),
        }
    }

    /// An exception instance from a raised value: classes are instantiated
    pub(super) fn normalize_exception(&mut self, value: Value) -> VmResult<Value> {
        match value {
            Value::Exception(_) => Ok(value),
            Value::Type(ty) if self.registry.is_subclass(ty, BASE_EXCEPTION) => {
                self.instantiate(ty, Vec::new(), Vec::new())
            }
            _ => Err(VmError::raise(TYPE_ERROR, "exceptions must derive from BaseException")),
        }
    }

    /// Mark TOS as the exception being handled, leaving it on the stack
    pub(super) fn op_enter_handler(&mut self) -> VmResult<()> {
        let exc = self.peek()?.clone();
        self.handled.push(exc);
        Ok(())
    }

    pub(super) fn op_exit_handler(&mut self) {
        if self.handled.len() > self.frame.handled_base {
            self.handled.pop();
        }
    }
}
