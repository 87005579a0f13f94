//! Generator execution for the bytecode VM.
//!
//! A generator runs as a fresh frame on every resumption. The chunk's header
//! dispatches on the saved resume index, restores locals and spilled stack
//! values, then checks for a pending `throw` before pushing the sent value.
//! The generator's mutex is never held while its frame runs, so a generator
//! that resumes itself fails with `ValueError` instead of deadlocking.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::types::{CallFrame, FrameExit, VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::{ExceptionObject, GeneratorObject, Value};
use crate::types::builtin::{GENERATOR_EXIT, RUNTIME_ERROR, STOP_ITERATION, TYPE_ERROR, VALUE_ERROR};

/// How a suspended generator is resumed
#[derive(Debug, Clone)]
pub(super) enum Resume {
    Send(Value),
    Throw(Value),
}

/// Result of one resumption
#[derive(Debug, Clone)]
pub(super) enum GeneratorOutcome {
    Yielded(Value),
    Returned(Value),
}

fn stop_iteration(result: Value) -> VmError {
    let args = if result.is_none() { Vec::new() } else { vec![result] };
    VmError::raise_with(STOP_ITERATION, args)
}

impl BytecodeVM {
    /// Run `generator` until its next yield or return
    pub(super) fn generator_resume(
        &mut self,
        generator: &Arc<Mutex<GeneratorObject>>,
        resume: Resume,
    ) -> VmResult<GeneratorOutcome> {
        let frame = {
            let mut state = generator.lock();
            if state.running {
                return Err(VmError::raise(VALUE_ERROR, "generator already executing"));
            }
            if state.finished {
                return match resume {
                    Resume::Send(_) => Ok(GeneratorOutcome::Returned(Value::None)),
                    Resume::Throw(exc) => Err(VmError::Exception(exc)),
                };
            }
            if !state.started {
                match &resume {
                    Resume::Send(value) if !value.is_none() => {
                        return Err(VmError::raise(
                            TYPE_ERROR,
                            "can't send non-None value to a just-started generator",
                        ))
                    }
                    Resume::Throw(exc) => {
                        state.finished = true;
                        return Err(VmError::Exception(exc.clone()));
                    }
                    Resume::Send(_) => {}
                }
            }
            state.started = true;
            state.running = true;
            match resume {
                Resume::Send(value) => {
                    state.sent = Some(value);
                    state.pending_throw = None;
                }
                Resume::Throw(exc) => {
                    state.sent = None;
                    state.pending_throw = Some(exc);
                }
            }
            let mut frame = CallFrame::new(state.closure.chunk.clone(), state.closure.globals.clone());
            frame.cells = state.cells.clone();
            frame.generator = Some(generator.clone());
            trace!(
                target: "pytron::vm::generator",
                generator = %state.closure.qualname(),
                resume_index = state.resume_index,
                "resume"
            );
            frame
        };

        let result = self.execute(frame);

        let mut state = generator.lock();
        state.running = false;
        match result {
            Ok(FrameExit::Yield(value)) => Ok(GeneratorOutcome::Yielded(value)),
            Ok(FrameExit::Return(value)) => {
                state.finished = true;
                debug!(target: "pytron::vm::generator", generator = %state.closure.qualname(), "finished");
                Ok(GeneratorOutcome::Returned(value))
            }
            Err(err) => {
                state.finished = true;
                drop(state);
                if self.stop_iteration_value(&err).is_some() {
                    return Err(VmError::raise(RUNTIME_ERROR, "generator raised StopIteration"));
                }
                Err(err)
            }
        }
    }

    /// `generator.send(value)`: the yielded value, or `StopIteration` carrying the return value
    pub fn generator_send(&mut self, generator: &Arc<Mutex<GeneratorObject>>, value: Value) -> VmResult<Value> {
        match self.generator_resume(generator, Resume::Send(value))? {
            GeneratorOutcome::Yielded(item) => Ok(item),
            GeneratorOutcome::Returned(result) => Err(stop_iteration(result)),
        }
    }

    /// `generator.throw(exc)`: raise `exc` at the suspension point
    pub fn generator_throw(&mut self, generator: &Arc<Mutex<GeneratorObject>>, exc: Value) -> VmResult<Value> {
        let exc = self.normalize_exception(exc)?;
        match self.generator_resume(generator, Resume::Throw(exc))? {
            GeneratorOutcome::Yielded(item) => Ok(item),
            GeneratorOutcome::Returned(result) => Err(stop_iteration(result)),
        }
    }

    /// `generator.close()`: throw `GeneratorExit` and expect the generator to finish
    pub fn generator_close(&mut self, generator: &Arc<Mutex<GeneratorObject>>) -> VmResult<()> {
        {
            let mut state = generator.lock();
            if !state.started || state.finished {
                state.finished = true;
                return Ok(());
            }
        }
        let exit = Value::Exception(Arc::new(ExceptionObject::new(GENERATOR_EXIT, "GeneratorExit", Vec::new())));
        match self.generator_resume(generator, Resume::Throw(exit)) {
            Ok(GeneratorOutcome::Yielded(_)) => Err(VmError::raise(RUNTIME_ERROR, "generator ignored GeneratorExit")),
            Ok(GeneratorOutcome::Returned(_)) => Ok(()),
            Err(VmError::Exception(exc)) if self.registry.is_subclass(exc.type_id(), GENERATOR_EXIT) => {
                debug!(target: "pytron::vm::generator", "closed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // === Generator Instructions ===

    fn current_generator(&self) -> VmResult<Arc<Mutex<GeneratorObject>>> {
        self.frame
            .generator
            .clone()
            .ok_or_else(|| VmError::Runtime("generator instruction outside a generator frame".into()))
    }

    pub(super) fn op_gen_resume_index(&mut self) -> VmResult<()> {
        let index = self.current_generator()?.lock().resume_index;
        self.push(Value::Int(index));
        Ok(())
    }

    pub(super) fn op_gen_set_resume(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        self.current_generator()?.lock().resume_index = i64::from(index);
        Ok(())
    }

    pub(super) fn op_gen_save_locals(&mut self) -> VmResult<()> {
        let generator = self.current_generator()?;
        generator.lock().saved_locals = self.frame.locals.clone();
        Ok(())
    }

    pub(super) fn op_gen_restore_locals(&mut self) -> VmResult<()> {
        let generator = self.current_generator()?;
        let mut locals = generator.lock().saved_locals.clone();
        locals.resize(self.frame.chunk.info().local_count(), None);
        self.frame.locals = locals;
        Ok(())
    }

    pub(super) fn op_gen_store_state(&mut self) -> VmResult<()> {
        let slot = usize::from(self.read_u16()?);
        let value = self.pop()?;
        let generator = self.current_generator()?;
        let mut state = generator.lock();
        if state.state.len() <= slot {
            state.state.resize(slot + 1, Value::None);
        }
        state.state[slot] = value;
        Ok(())
    }

    pub(super) fn op_gen_load_state(&mut self) -> VmResult<()> {
        let slot = self.read_u16()?;
        let value = self.current_generator()?.lock().state.get(usize::from(slot)).cloned();
        match value {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(self.invalid_operand(u32::from(slot))),
        }
    }

    /// Raise the exception passed to `throw`, if any
    pub(super) fn op_gen_check_throw(&mut self) -> VmResult<()> {
        let pending = self.current_generator()?.lock().pending_throw.take();
        match pending {
            Some(exc) => Err(VmError::Exception(exc)),
            None => Ok(()),
        }
    }

    pub(super) fn op_gen_sent(&mut self) -> VmResult<()> {
        let sent = self.current_generator()?.lock().sent.take();
        self.push(sent.unwrap_or(Value::None));
        Ok(())
    }
}
