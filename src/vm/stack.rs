//! Stack operations for the bytecode VM.
//!
//! Push, pop and peek are bounded by the current frame's base pointer, so a
//! frame can never consume its caller's operands. The `op_*` methods cover
//! the shuffle instructions: dup, swap, rot3, over and their n-ary forms.

use tracing::trace;

use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::Value;

impl BytecodeVM {
    // === Stack Operations ===

    #[inline]
    pub(super) fn push(&mut self, value: Value) {
        self.value_stack.push(value);
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Value> {
        if self.value_stack.len() <= self.frame.base_ptr {
            return Err(VmError::StackUnderflow);
        }
        self.value_stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop `n` values, returned bottom first
    pub(super) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let len = self.value_stack.len();
        if n > len - self.frame.base_ptr.min(len) {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.value_stack.split_off(len - n))
    }

    #[inline]
    pub(super) fn peek(&self) -> VmResult<&Value> {
        self.peek_n(0)
    }

    #[inline]
    pub(super) fn peek_n(&self, n: usize) -> VmResult<&Value> {
        let len = self.value_stack.len();
        if n >= len.saturating_sub(self.frame.base_ptr) {
            return Err(VmError::StackUnderflow);
        }
        Ok(&self.value_stack[len - 1 - n])
    }

    /// Number of operands owned by the current frame
    #[inline]
    pub(super) fn frame_depth(&self) -> usize {
        self.value_stack.len().saturating_sub(self.frame.base_ptr)
    }

    fn require(&self, n: usize) -> VmResult<usize> {
        if self.frame_depth() < n {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.value_stack.len())
    }

    pub(super) fn op_dup(&mut self) -> VmResult<()> {
        trace!(target: "pytron::vm::stack", ip = self.frame.op_ip, "dup");
        let value = self.peek()?.clone();
        self.push(value);
        Ok(())
    }

    pub(super) fn op_swap(&mut self) -> VmResult<()> {
        trace!(target: "pytron::vm::stack", ip = self.frame.op_ip, "swap");
        let len = self.require(2)?;
        self.value_stack.swap(len - 1, len - 2);
        Ok(())
    }

    pub(super) fn op_rot3(&mut self) -> VmResult<()> {
        trace!(target: "pytron::vm::stack", ip = self.frame.op_ip, "rot3");
        let len = self.require(3)?;
        // [a, b, c] -> [c, a, b]
        self.value_stack[len - 3..].rotate_right(1);
        Ok(())
    }

    pub(super) fn op_over(&mut self) -> VmResult<()> {
        trace!(target: "pytron::vm::stack", ip = self.frame.op_ip, "over");
        let value = self.peek_n(1)?.clone();
        self.push(value);
        Ok(())
    }

    pub(super) fn op_pop_n(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        trace!(target: "pytron::vm::stack", ip = self.frame.op_ip, n, "pop_n");
        let len = self.require(n)?;
        self.value_stack.truncate(len - n);
        Ok(())
    }

    /// Copy the value `n` below the top
    pub(super) fn op_pick(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let value = self.peek_n(n)?.clone();
        self.push(value);
        Ok(())
    }

    /// Exchange the top with the value `n` below it
    pub(super) fn op_swap_n(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let len = self.require(n + 1)?;
        self.value_stack.swap(len - 1, len - 1 - n);
        Ok(())
    }

    /// Move the top below the next `n - 1` values
    pub(super) fn op_rot_n(&mut self) -> VmResult<()> {
        let n = self.read_u8()? as usize;
        let len = self.require(n)?;
        self.value_stack[len - n..].rotate_right(1);
        Ok(())
    }
}
