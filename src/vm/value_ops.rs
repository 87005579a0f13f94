//! Value and variable operations for the bytecode VM.
//!
//! Constants, locals, cells and the global lookup chain.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::Value;
use crate::types::builtin::{NAME_ERROR, RUNTIME_ERROR, UNBOUND_LOCAL_ERROR};

impl BytecodeVM {
    // === Constants ===

    pub(super) fn op_push_small_int(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as i8;
        self.push(Value::Int(i64::from(n)));
        Ok(())
    }

    pub(super) fn op_push_constant(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let value = self
            .frame
            .chunk
            .get_constant(index)
            .cloned()
            .ok_or_else(|| self.invalid_operand(u32::from(index)))?;
        self.push(value);
        Ok(())
    }

    /// Ask the host for the object behind an opaque constant
    pub(super) fn op_load_fallback(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let description = match self.frame.chunk.get_constant(index) {
            Some(value) => value.to_string(),
            None => return Err(self.invalid_operand(u32::from(index))),
        };
        trace!(target: "pytron::vm::step", ip = self.frame.op_ip, %description, "load fallback");
        let value = self.host.fallback_object(&description).ok_or_else(|| {
            VmError::raise(RUNTIME_ERROR, format!("no host object for constant {}", description))
        })?;
        self.push(value);
        Ok(())
    }

    // === Locals ===

    fn local_slot(&mut self) -> VmResult<usize> {
        let index = self.read_u16()?;
        if usize::from(index) >= self.frame.locals.len() {
            return Err(self.invalid_operand(u32::from(index)));
        }
        Ok(usize::from(index))
    }

    pub(super) fn op_load_local(&mut self) -> VmResult<()> {
        let slot = self.local_slot()?;
        match &self.frame.locals[slot] {
            Some(value) => {
                let value = value.clone();
                self.push(value);
                Ok(())
            }
            None => {
                let name = self.frame.chunk.info().local_names[slot].clone();
                Err(VmError::raise(
                    UNBOUND_LOCAL_ERROR,
                    format!("cannot access local variable '{}' where it is not associated with a value", name),
                ))
            }
        }
    }

    pub(super) fn op_store_local(&mut self) -> VmResult<()> {
        let slot = self.local_slot()?;
        let value = self.pop()?;
        self.frame.locals[slot] = Some(value);
        Ok(())
    }

    pub(super) fn op_delete_local(&mut self) -> VmResult<()> {
        let slot = self.local_slot()?;
        self.frame.locals[slot] = None;
        Ok(())
    }

    /// Move a local onto the stack, leaving the slot unbound; unbound pushes null
    pub(super) fn op_take_local(&mut self) -> VmResult<()> {
        let slot = self.local_slot()?;
        let value = self.frame.locals[slot].take().unwrap_or(Value::Null);
        self.push(value);
        Ok(())
    }

    // === Cells ===

    fn cell_at(&mut self) -> VmResult<Arc<RwLock<Option<Value>>>> {
        let index = self.read_u16()?;
        match self.frame.cells.get(usize::from(index)) {
            Some(Value::Cell(cell)) => Ok(cell.clone()),
            _ => Err(self.invalid_operand(u32::from(index))),
        }
    }

    fn cell_name(&self, index: usize) -> Arc<str> {
        let info = self.frame.chunk.info();
        info.cell_names
            .iter()
            .chain(info.free_names.iter())
            .nth(index)
            .cloned()
            .unwrap_or_else(|| Arc::from("<cell>"))
    }

    /// Push the cell object itself, for closure construction
    pub(super) fn op_load_cell(&mut self) -> VmResult<()> {
        let cell = self.cell_at()?;
        self.push(Value::Cell(cell));
        Ok(())
    }

    pub(super) fn op_load_deref(&mut self) -> VmResult<()> {
        let index = self.frame.chunk.read_u16(self.frame.ip).map(usize::from).unwrap_or_default();
        let cell = self.cell_at()?;
        let content = cell.read().clone();
        match content {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(VmError::raise(
                NAME_ERROR,
                format!(
                    "cannot access free variable '{}' where it is not associated with a value in enclosing scope",
                    self.cell_name(index)
                ),
            )),
        }
    }

    pub(super) fn op_store_deref(&mut self) -> VmResult<()> {
        let cell = self.cell_at()?;
        let value = self.pop()?;
        *cell.write() = Some(value);
        Ok(())
    }

    pub(super) fn op_delete_deref(&mut self) -> VmResult<()> {
        let cell = self.cell_at()?;
        *cell.write() = None;
        Ok(())
    }

    // === Globals ===

    /// Module globals, then builtins, then whatever the host resolves
    pub(super) fn lookup_global(&self, name: &str) -> Option<Value> {
        self.frame
            .globals
            .get(name)
            .or_else(|| self.builtins.get(name))
            .or_else(|| self.host.resolve_global(name))
    }

    pub(super) fn op_load_global(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let value = self
            .lookup_global(&name)
            .ok_or_else(|| VmError::raise(NAME_ERROR, format!("name '{}' is not defined", name)))?;
        self.push(value);
        Ok(())
    }

    pub(super) fn op_store_global(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let value = self.pop()?;
        self.frame.globals.set(name, value);
        Ok(())
    }

    pub(super) fn op_delete_global(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        match self.frame.globals.remove(&name) {
            Some(_) => Ok(()),
            None => Err(VmError::raise(NAME_ERROR, format!("name '{}' is not defined", name))),
        }
    }
}
