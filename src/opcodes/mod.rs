//! Source opcode nodes.
//!
//! Every decoded instruction becomes a node implementing [`Opcode`]. A node
//! answers three questions for the translator: where control goes next, how
//! the abstract stack changes on each of those edges, and which target
//! instructions implement it. Nodes are grouped by family:
//!
//! - `stack`: pops, duplication, rotation
//! - `variable`: constants, locals, cells, globals
//! - `control`: jumps, branches, iteration, returns
//! - `dunder`: operators, comparisons, subscripts
//! - `collection`: literals, unpacking, comprehension helpers
//! - `function`: function creation and the call protocol
//! - `exception`: handler setup, raising, matching, `with`
//! - `generator`: yields, delegation, generator entry
//! - `string`: formatting
//! - `module`: imports
//! - `object`: attribute access
//! - `meta`: no-ops and intrinsics

use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::source::Instruction;
use crate::translator::error::TranslateResult;
use crate::translator::metadata::FunctionMetadata;
use crate::translator::stack::StackMetadata;

pub mod collection;
pub mod control;
pub mod dunder;
pub mod exception;
pub mod function;
pub mod generator;
pub mod meta;
pub mod module;
pub mod object;
pub mod stack;
pub mod string;
pub mod variable;

/// States along each successor edge, in `successors()` order
pub type Successors = SmallVec<[StackMetadata; 2]>;

/// A decoded source instruction with its translation rules
pub trait Opcode: fmt::Debug {
    fn instruction(&self) -> &Instruction;

    #[inline]
    fn offset(&self) -> usize {
        self.instruction().offset()
    }

    /// Instructions control may reach next; falls through by default
    fn successors(&self) -> SmallVec<[usize; 2]> {
        smallvec![self.offset() + 1]
    }

    /// State along each successor edge given the state before this instruction
    fn stack_effect(&self, meta: &FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<Successors>;

    /// Emit the target instructions implementing this node
    fn emit(&self, meta: &mut FunctionMetadata<'_>, state: &StackMetadata) -> TranslateResult<()>;

    /// Whether an exception may be raised while this node executes
    fn can_raise(&self) -> bool {
        true
    }
}

/// Builds a node from its decoded instruction
pub type OpcodeFactory = fn(Instruction) -> Box<dyn Opcode>;

#[inline]
pub(crate) fn single(state: StackMetadata) -> TranslateResult<Successors> {
    Ok(smallvec![state])
}

/// Resolved jump target; a missing target surfaces as an unresolvable jump in the dataflow
#[inline]
pub(crate) fn target_of(instruction: &Instruction) -> usize {
    instruction.jump_target().unwrap_or(usize::MAX)
}
