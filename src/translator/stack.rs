//! Abstract state propagated by the dataflow pass.
//!
//! A `StackMetadata` is an immutable snapshot of the operand stack, the
//! locals, the cells and (for 3.9/3.10) the block stack before one
//! instruction. Every update returns a new snapshot.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use super::error::DataflowError;
use crate::target::ValueKind;
use crate::types::builtin::{BASE_EXCEPTION, INT, OBJECT, TRACEBACK, TYPE};
use crate::types::registry::kind_of;
use crate::types::{TypeId, TypeRegistry};

/// Producers kept per value; older entries are dropped past this bound
pub const MAX_PRODUCERS: usize = 8;

/// What the dataflow knows about a value beyond its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodHint {
    /// A method looked up on a receiver of type `owner`
    Method { owner: TypeId, name: Arc<str> },
    /// A class object; calling it constructs an instance
    Class(TypeId),
    /// The call-protocol sentinel below a callable
    Null,
}

/// Type and provenance of one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSourceInfo {
    pub ty: TypeId,
    /// Instruction offsets that may have produced the value, sorted
    pub producers: SmallVec<[usize; 2]>,
    pub hint: Option<MethodHint>,
}

impl ValueSourceInfo {
    pub fn of(ty: TypeId, producer: usize) -> Self {
        Self { ty, producers: smallvec![producer], hint: None }
    }

    /// A value with no producing instruction, such as a parameter
    pub fn typed(ty: TypeId) -> Self {
        Self { ty, producers: SmallVec::new(), hint: None }
    }

    /// The null sentinel pushed before a plain call
    pub fn null(producer: usize) -> Self {
        Self::of(OBJECT, producer).with_hint(MethodHint::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.hint, Some(MethodHint::Null))
    }

    pub fn with_hint(mut self, hint: MethodHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// The most recent producer
    pub fn producer(&self) -> Option<usize> {
        self.producers.last().copied()
    }

    pub fn alternative_sources(&self) -> &[usize] {
        &self.producers
    }

    #[inline]
    pub fn kind(&self) -> ValueKind {
        kind_of(self.ty)
    }

    /// Join of two values; types unify, producers union, hints survive only when equal
    pub fn join(&self, other: &Self, registry: &TypeRegistry) -> Self {
        let ty = registry.unify(self.ty, other.ty);
        let mut producers = self.producers.clone();
        for &p in &other.producers {
            if let Err(at) = producers.binary_search(&p) {
                producers.insert(at, p);
            }
        }
        while producers.len() > MAX_PRODUCERS {
            producers.remove(0);
        }
        let hint = if self.hint == other.hint { self.hint.clone() } else { None };
        Self { ty, producers, hint }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Finally,
    With,
    /// Pushed on handler entry, popped by `POP_EXCEPT`
    ExceptHandler,
}

/// One entry of the 3.9/3.10 block stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    /// Stack depth restored when the handler is entered
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackMetadata {
    stack: Vec<ValueSourceInfo>,
    locals: Vec<Option<ValueSourceInfo>>,
    cells: Vec<ValueSourceInfo>,
    blocks: Vec<Block>,
    /// Constant index of a pending `KW_NAMES` tuple
    kw_names: Option<u32>,
}

fn underflow(needed: usize, depth: usize) -> DataflowError {
    DataflowError::StackUnderflow { offset: 0, needed, depth }
}

impl StackMetadata {
    pub fn new(locals: Vec<Option<ValueSourceInfo>>, cells: Vec<ValueSourceInfo>) -> Self {
        Self { stack: Vec::new(), locals, cells, blocks: Vec::new(), kw_names: None }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn stack(&self) -> &[ValueSourceInfo] {
        &self.stack
    }

    pub fn locals(&self) -> &[Option<ValueSourceInfo>] {
        &self.locals
    }

    pub fn cells(&self) -> &[ValueSourceInfo] {
        &self.cells
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn kw_names(&self) -> Option<u32> {
        self.kw_names
    }

    /// The value `n` below the top; `peek(0)` is TOS
    pub fn peek(&self, n: usize) -> Result<&ValueSourceInfo, DataflowError> {
        let depth = self.stack.len();
        if n >= depth {
            return Err(underflow(n + 1, depth));
        }
        Ok(&self.stack[depth - 1 - n])
    }

    /// The top `n` values, bottom first
    pub fn top(&self, n: usize) -> Result<&[ValueSourceInfo], DataflowError> {
        let depth = self.stack.len();
        if n > depth {
            return Err(underflow(n, depth));
        }
        Ok(&self.stack[depth - n..])
    }

    pub fn push(&self, value: ValueSourceInfo) -> Self {
        let mut next = self.clone();
        next.stack.push(value);
        next
    }

    pub fn push_all(&self, values: impl IntoIterator<Item = ValueSourceInfo>) -> Self {
        let mut next = self.clone();
        next.stack.extend(values);
        next
    }

    pub fn pop(&self) -> Result<Self, DataflowError> {
        self.pop_n(1)
    }

    pub fn pop_n(&self, n: usize) -> Result<Self, DataflowError> {
        let depth = self.stack.len();
        if n > depth {
            return Err(underflow(n, depth));
        }
        let mut next = self.clone();
        next.stack.truncate(depth - n);
        Ok(next)
    }

    /// Replace the top `n` values with `values`
    pub fn replace_top(&self, n: usize, values: impl IntoIterator<Item = ValueSourceInfo>) -> Result<Self, DataflowError> {
        let mut next = self.pop_n(n)?;
        next.stack.extend(values);
        Ok(next)
    }

    /// Move TOS down `n - 1` positions
    pub fn rotate(&self, n: usize) -> Result<Self, DataflowError> {
        let depth = self.stack.len();
        if n > depth {
            return Err(underflow(n, depth));
        }
        let mut next = self.clone();
        if n > 1 {
            next.stack[depth - n..].rotate_right(1);
        }
        Ok(next)
    }

    /// Swap TOS with the value `n` below it
    pub fn swap(&self, n: usize) -> Result<Self, DataflowError> {
        let depth = self.stack.len();
        if n >= depth {
            return Err(underflow(n + 1, depth));
        }
        let mut next = self.clone();
        next.stack.swap(depth - 1, depth - 1 - n);
        Ok(next)
    }

    pub fn truncate(&self, depth: usize) -> Self {
        let mut next = self.clone();
        next.stack.truncate(depth);
        next
    }

    pub fn local(&self, index: usize) -> Option<&ValueSourceInfo> {
        self.locals.get(index).and_then(Option::as_ref)
    }

    pub fn set_local(&self, index: usize, value: Option<ValueSourceInfo>) -> Self {
        let mut next = self.clone();
        if index >= next.locals.len() {
            next.locals.resize(index + 1, None);
        }
        next.locals[index] = value;
        next
    }

    pub fn cell(&self, index: usize) -> Option<&ValueSourceInfo> {
        self.cells.get(index)
    }

    pub fn set_cell(&self, index: usize, value: ValueSourceInfo) -> Self {
        let mut next = self.clone();
        if index >= next.cells.len() {
            next.cells.resize(index + 1, ValueSourceInfo::typed(OBJECT));
        }
        next.cells[index] = value;
        next
    }

    pub fn push_block(&self, block: Block) -> Self {
        let mut next = self.clone();
        next.blocks.push(block);
        next
    }

    pub fn pop_block(&self) -> Self {
        let mut next = self.clone();
        next.blocks.pop();
        next
    }

    /// The innermost block that catches exceptions, skipping active handlers
    pub fn covering_block(&self) -> Option<(usize, Block)> {
        self.blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| b.kind != BlockKind::ExceptHandler)
            .map(|(i, b)| (i, *b))
    }

    pub fn with_kw_names(&self, kw_names: Option<u32>) -> Self {
        let mut next = self.clone();
        next.kw_names = kw_names;
        next
    }

    /// Entry state of a 3.9/3.10 handler reached from this state through block `index`
    ///
    /// The stack is cut to the block's depth and six exception-state values
    /// are pushed: the previous traceback, value and type, then the new ones.
    pub fn legacy_handler_entry(&self, index: usize, producer: usize) -> Self {
        let block = self.blocks[index];
        let mut next = self.truncate(block.depth);
        next.blocks.truncate(index);
        next.blocks.push(Block { kind: BlockKind::ExceptHandler, handler: block.handler, depth: block.depth });
        next.kw_names = None;
        next.stack.extend([
            ValueSourceInfo::of(OBJECT, producer),
            ValueSourceInfo::of(OBJECT, producer),
            ValueSourceInfo::of(OBJECT, producer),
            ValueSourceInfo::of(TRACEBACK, producer),
            ValueSourceInfo::of(BASE_EXCEPTION, producer),
            ValueSourceInfo::of(TYPE, producer),
        ]);
        next
    }

    /// Entry state of a 3.11+ exception-table handler
    pub fn table_handler_entry(&self, depth: usize, lasti: bool, producer: usize) -> Self {
        let mut next = self.truncate(depth);
        next.kw_names = None;
        if lasti {
            next.stack.push(ValueSourceInfo::of(INT, producer));
        }
        next.stack.push(ValueSourceInfo::of(BASE_EXCEPTION, producer));
        next
    }

    /// Join with a state reaching the same instruction
    ///
    /// Returns the merged state and whether any type or hint changed;
    /// provenance changes alone do not count.
    pub fn merge(&self, other: &Self, registry: &TypeRegistry, at: usize) -> Result<(Self, bool), DataflowError> {
        if self.stack.len() != other.stack.len() {
            let mut producers: Vec<usize> = self
                .stack
                .iter()
                .chain(other.stack.iter())
                .flat_map(|v| v.producers.iter().copied())
                .collect();
            producers.sort_unstable();
            producers.dedup();
            return Err(DataflowError::StackDepthMismatch {
                offset: at,
                expected: self.stack.len(),
                found: other.stack.len(),
                producers,
            });
        }
        if self.blocks != other.blocks {
            return Err(DataflowError::BlockStackMismatch { offset: at });
        }

        let mut changed = false;
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(a, b)| {
                let joined = a.join(b, registry);
                changed |= joined.ty != a.ty || joined.hint != a.hint;
                joined
            })
            .collect();

        let len = self.locals.len().max(other.locals.len());
        let mut locals = Vec::with_capacity(len);
        for i in 0..len {
            let ours = self.locals.get(i).cloned().flatten();
            let theirs = other.locals.get(i).cloned().flatten();
            let joined = match (&ours, &theirs) {
                (Some(a), Some(b)) => Some(a.join(b, registry)),
                _ => None,
            };
            changed |= ours.as_ref().map(|v| (v.ty, &v.hint)) != joined.as_ref().map(|v| (v.ty, &v.hint));
            locals.push(joined);
        }

        let cells = self
            .cells
            .iter()
            .zip(&other.cells)
            .map(|(a, b)| {
                let joined = a.join(b, registry);
                changed |= joined.ty != a.ty;
                joined
            })
            .collect();

        let kw_names = if self.kw_names == other.kw_names { self.kw_names } else { None };
        changed |= kw_names != self.kw_names;

        Ok((Self { stack, locals, cells, blocks: self.blocks.clone(), kw_names }, changed))
    }

    /// Verifier kinds of the bottom `depth` stack values
    pub fn frame_kinds(&self, depth: usize) -> Vec<ValueKind> {
        self.stack.iter().take(depth).map(ValueSourceInfo::kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin::{BOOL, FLOAT, NONE, STR};

    #[test]
    fn test_push_pop_is_persistent() {
        let base = StackMetadata::default();
        let one = base.push(ValueSourceInfo::of(INT, 0));
        let two = one.push(ValueSourceInfo::of(STR, 1));
        assert_eq!(base.depth(), 0);
        assert_eq!(two.depth(), 2);
        assert_eq!(two.peek(0).expect("tos").ty, STR);
        assert_eq!(two.pop().expect("pop").depth(), 1);
        assert!(matches!(one.pop_n(2), Err(DataflowError::StackUnderflow { needed: 2, depth: 1, .. })));
    }

    #[test]
    fn test_rotate_and_swap() {
        let state = StackMetadata::default().push_all([
            ValueSourceInfo::of(INT, 0),
            ValueSourceInfo::of(STR, 1),
            ValueSourceInfo::of(FLOAT, 2),
        ]);
        let rotated = state.rotate(3).expect("rotate");
        let tys: Vec<_> = rotated.stack().iter().map(|v| v.ty).collect();
        assert_eq!(tys, vec![FLOAT, INT, STR]);
        let swapped = state.swap(2).expect("swap");
        let tys: Vec<_> = swapped.stack().iter().map(|v| v.ty).collect();
        assert_eq!(tys, vec![FLOAT, STR, INT]);
    }

    #[test]
    fn test_merge_joins_types_and_unions_producers() {
        let registry = TypeRegistry::new();
        let a = StackMetadata::default().push(ValueSourceInfo::of(BOOL, 3));
        let b = StackMetadata::default().push(ValueSourceInfo::of(INT, 7));
        let (merged, changed) = a.merge(&b, &registry, 9).expect("merge");
        assert!(changed);
        assert_eq!(merged.peek(0).expect("tos").ty, INT);
        assert_eq!(merged.peek(0).expect("tos").alternative_sources(), &[3, 7]);

        let (again, changed) = merged.merge(&a, &registry, 9).expect("merge");
        assert!(!changed);
        assert_eq!(again, merged);
    }

    #[test]
    fn test_losing_a_hint_counts_as_change() {
        let registry = TypeRegistry::new();
        let null = StackMetadata::default().push(ValueSourceInfo::null(1));
        let plain = StackMetadata::default().push(ValueSourceInfo::of(OBJECT, 2));
        let (merged, changed) = null.merge(&plain, &registry, 5).expect("merge");
        assert!(changed);
        assert!(!merged.peek(0).expect("tos").is_null());
        let (_, changed) = null.merge(&null, &registry, 5).expect("merge");
        assert!(!changed);
    }

    #[test]
    fn test_merge_depth_mismatch() {
        let registry = TypeRegistry::new();
        let a = StackMetadata::default().push(ValueSourceInfo::of(INT, 1));
        let b = StackMetadata::default();
        assert!(matches!(
            a.merge(&b, &registry, 4),
            Err(DataflowError::StackDepthMismatch { offset: 4, expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_unbound_local_absorbs() {
        let registry = TypeRegistry::new();
        let a = StackMetadata::new(vec![Some(ValueSourceInfo::of(INT, 0))], vec![]);
        let b = StackMetadata::new(vec![None], vec![]);
        let (merged, changed) = a.merge(&b, &registry, 2).expect("merge");
        assert!(changed);
        assert!(merged.local(0).is_none());
        let c = StackMetadata::new(vec![Some(ValueSourceInfo::of(NONE, 1))], vec![]);
        let (merged, _) = a.merge(&c, &registry, 2).expect("merge");
        assert_eq!(merged.local(0).map(|v| v.ty), Some(OBJECT));
    }

    #[test]
    fn test_producers_are_capped() {
        let registry = TypeRegistry::new();
        let mut value = ValueSourceInfo::of(INT, 0);
        for p in 1..20 {
            value = value.join(&ValueSourceInfo::of(INT, p), &registry);
        }
        assert_eq!(value.producers.len(), MAX_PRODUCERS);
        assert_eq!(value.producer(), Some(19));
    }

    #[test]
    fn test_handler_entries() {
        let state = StackMetadata::default()
            .push(ValueSourceInfo::of(INT, 0))
            .push_block(Block { kind: BlockKind::Finally, handler: 10, depth: 1 })
            .push(ValueSourceInfo::of(STR, 1));
        let (index, block) = state.covering_block().expect("block");
        let legacy = state.legacy_handler_entry(index, 2);
        assert_eq!(block.handler, 10);
        assert_eq!(legacy.depth(), 7);
        assert_eq!(legacy.blocks()[0].kind, BlockKind::ExceptHandler);
        assert!(legacy.covering_block().is_none());

        let table = state.table_handler_entry(1, true, 2);
        assert_eq!(table.depth(), 3);
        assert_eq!(table.peek(1).expect("lasti").ty, INT);
        assert_eq!(table.frame_kinds(1), vec![ValueKind::Int]);
    }
}
