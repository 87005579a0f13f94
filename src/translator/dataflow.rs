//! Worklist fixed point over instruction offsets.
//!
//! Each reachable offset gets the join of every state flowing into it, along
//! normal successor edges and along exception edges from raising
//! instructions to their covering handler.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::error::{DataflowError, TranslateError, TranslateResult};
use super::metadata::FunctionMetadata;
use super::stack::StackMetadata;
use crate::opcodes::Opcode;
use crate::source::ExceptionTableEntry;

/// Handler covering one raising instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEdge {
    /// Source offset of the handler
    pub handler: usize,
    /// Stack values kept below the exception state
    pub depth: usize,
    /// Whether a 3.11+ handler expects the raising offset below the exception
    pub lasti: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataflowResult {
    /// State before each offset, `None` when unreachable
    pub states: Vec<Option<StackMetadata>>,
    /// Covering handler of each reachable raising offset
    pub handlers: Vec<Option<HandlerEdge>>,
    pub iterations: usize,
}

impl DataflowResult {
    pub fn state(&self, offset: usize) -> Option<&StackMetadata> {
        self.states.get(offset).and_then(Option::as_ref)
    }

    pub fn handler(&self, offset: usize) -> Option<HandlerEdge> {
        self.handlers.get(offset).copied().flatten()
    }

    pub fn is_reachable(&self, offset: usize) -> bool {
        self.state(offset).is_some()
    }

    pub fn reachable_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_some()).count()
    }
}

fn table_entry(entries: &[ExceptionTableEntry], offset: usize) -> Option<&ExceptionTableEntry> {
    entries.iter().find(|e| e.start <= offset && offset < e.end)
}

/// Covering handler of `offset` and the state along the exception edge
fn exception_edge(
    meta: &FunctionMetadata<'_>,
    offset: usize,
    state: &StackMetadata,
) -> Result<Option<(HandlerEdge, StackMetadata)>, DataflowError> {
    if meta.version.has_exception_table() {
        let Some(entry) = table_entry(&meta.record.exception_table, offset) else {
            return Ok(None);
        };
        let depth = entry.depth as usize;
        if depth > state.depth() {
            return Err(DataflowError::HandlerDepth {
                offset,
                handler: entry.target,
                depth,
                available: state.depth(),
            });
        }
        let edge = HandlerEdge { handler: entry.target, depth, lasti: entry.lasti };
        return Ok(Some((edge, state.table_handler_entry(depth, entry.lasti, offset))));
    }

    let Some((index, block)) = state.covering_block() else {
        return Ok(None);
    };
    if block.depth > state.depth() {
        return Err(DataflowError::HandlerDepth {
            offset,
            handler: block.handler,
            depth: block.depth,
            available: state.depth(),
        });
    }
    let edge = HandlerEdge { handler: block.handler, depth: block.depth, lasti: false };
    Ok(Some((edge, state.legacy_handler_entry(index, offset))))
}

fn locate(error: TranslateError, offset: usize) -> TranslateError {
    match error {
        TranslateError::Dataflow(e) => TranslateError::Dataflow(e.at(offset)),
        other => other,
    }
}

struct Worklist {
    queue: VecDeque<usize>,
    queued: Vec<bool>,
}

impl Worklist {
    fn new(len: usize) -> Self {
        Self { queue: VecDeque::new(), queued: vec![false; len] }
    }

    fn push(&mut self, offset: usize) {
        if !self.queued[offset] {
            self.queued[offset] = true;
            self.queue.push_back(offset);
        }
    }

    fn pop(&mut self) -> Option<usize> {
        let offset = self.queue.pop_front()?;
        self.queued[offset] = false;
        Some(offset)
    }
}

/// Merge `incoming` into the state at `target`, queueing it when a type changed
fn propagate(
    meta: &FunctionMetadata<'_>,
    states: &mut [Option<StackMetadata>],
    worklist: &mut Worklist,
    from: usize,
    target: usize,
    incoming: StackMetadata,
) -> Result<(), DataflowError> {
    let slot = states
        .get_mut(target)
        .ok_or(DataflowError::UnresolvableJumpTarget { offset: from, target })?;
    match slot {
        None => {
            *slot = Some(incoming);
            worklist.push(target);
        }
        Some(existing) => {
            let (merged, changed) = existing.merge(&incoming, meta.registry, target)?;
            *existing = merged;
            if changed {
                worklist.push(target);
            }
        }
    }
    Ok(())
}

fn run(
    meta: &FunctionMetadata<'_>,
    nodes: &[Box<dyn Opcode>],
    mut states: Vec<Option<StackMetadata>>,
    mut worklist: Worklist,
    max_iterations: usize,
) -> TranslateResult<DataflowResult> {
    let mut iterations = 0;
    while let Some(offset) = worklist.pop() {
        iterations += 1;
        if iterations > max_iterations {
            return Err(DataflowError::NoConvergence { iterations: max_iterations }.into());
        }
        let Some(state) = states[offset].clone() else {
            continue;
        };
        let node = &nodes[offset];
        let successors = node.successors();
        let effects = node.stack_effect(meta, &state).map_err(|e| locate(e, offset))?;
        if successors.len() != effects.len() {
            return Err(DataflowError::SuccessorMismatch {
                offset,
                successors: successors.len(),
                states: effects.len(),
            }
            .into());
        }
        trace!(target: "pytron::dataflow", offset, opname = node.instruction().opname(), depth = state.depth(), "visit");
        for (target, next) in successors.into_iter().zip(effects) {
            propagate(meta, &mut states, &mut worklist, offset, target, next)?;
        }
        if node.can_raise() {
            if let Some((edge, entry)) = exception_edge(meta, offset, &state)? {
                propagate(meta, &mut states, &mut worklist, offset, edge.handler, entry)?;
            }
        }
    }

    let mut handlers = vec![None; nodes.len()];
    for (offset, node) in nodes.iter().enumerate() {
        if !node.can_raise() {
            continue;
        }
        if let Some(state) = &states[offset] {
            handlers[offset] = exception_edge(meta, offset, state)?.map(|(edge, _)| edge);
        }
    }

    let result = DataflowResult { states, handlers, iterations };
    debug!(
        target: "pytron::dataflow",
        function = meta.record.qualname(),
        iterations,
        reachable = result.reachable_count(),
        "dataflow converged"
    );
    Ok(result)
}

/// Compute the state before every reachable offset
pub fn analyze(
    meta: &FunctionMetadata<'_>,
    nodes: &[Box<dyn Opcode>],
    max_iterations: usize,
) -> TranslateResult<DataflowResult> {
    let mut states = vec![None; nodes.len()];
    let mut worklist = Worklist::new(nodes.len());
    if !nodes.is_empty() {
        states[0] = Some(meta.entry_state());
        worklist.push(0);
    }
    run(meta, nodes, states, worklist, max_iterations)
}

/// Re-run the fixed point starting from a previous result
///
/// Starting from a fixed point yields the same states.
pub fn analyze_from(
    meta: &FunctionMetadata<'_>,
    nodes: &[Box<dyn Opcode>],
    seed: &DataflowResult,
    max_iterations: usize,
) -> TranslateResult<DataflowResult> {
    let mut states = seed.states.clone();
    states.resize(nodes.len(), None);
    let mut worklist = Worklist::new(nodes.len());
    for (offset, state) in states.iter().enumerate() {
        if state.is_some() {
            worklist.push(offset);
        }
    }
    run(meta, nodes, states, worklist, max_iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{build_nodes, decode};
    use crate::runtime::Value;
    use crate::source::{DialectVersion, FunctionBuilder, FunctionRecord};
    use crate::translator::stack::BlockKind;
    use crate::types::builtin::{BASE_EXCEPTION, INT, TYPE};
    use crate::types::TypeRegistry;

    fn nodes(record: &FunctionRecord, version: DialectVersion) -> Vec<Box<dyn Opcode>> {
        let decoded = decode(&record.instructions, version).expect("decodes");
        build_nodes(&decoded, version).expect("builds")
    }

    fn run_analysis(
        record: &FunctionRecord,
        version: DialectVersion,
        constants: Vec<Value>,
    ) -> TranslateResult<DataflowResult> {
        let registry = TypeRegistry::new();
        let nodes = nodes(record, version);
        let meta = FunctionMetadata::new(record, version, &registry, None, constants, nodes.len());
        analyze(&meta, &nodes, 1_000)
    }

    fn counting_loop() -> FunctionRecord {
        FunctionBuilder::new("count", DialectVersion::V3_11)
            .locals(&["i"])
            .op("LOAD_CONST", 0)
            .op("STORE_FAST", 0)
            .op("LOAD_FAST", 0)
            .op("LOAD_CONST", 1)
            .op("COMPARE_OP", 0)
            .op("POP_JUMP_FORWARD_IF_FALSE", 5)
            .op("LOAD_FAST", 0)
            .op("LOAD_CONST", 2)
            .op("BINARY_OP", 13)
            .op("STORE_FAST", 0)
            .op("JUMP_BACKWARD", 9)
            .op("LOAD_FAST", 0)
            .op("RETURN_VALUE", 0)
            .build()
    }

    fn loop_constants() -> Vec<Value> {
        vec![Value::Int(0), Value::Int(10), Value::Int(1)]
    }

    #[test]
    fn test_loop_converges_with_int_local() {
        let result = run_analysis(&counting_loop(), DialectVersion::V3_11, loop_constants()).expect("converges");
        assert_eq!(result.reachable_count(), 13);
        let head = result.state(2).expect("loop head");
        assert_eq!(head.local(0).map(|v| v.ty), Some(INT));
        assert_eq!(head.depth(), 0);
        assert_eq!(result.state(12).expect("return").peek(0).expect("tos").ty, INT);
    }

    #[test]
    fn test_analyze_from_fixed_point_is_identical() {
        let record = counting_loop();
        let registry = TypeRegistry::new();
        let nodes = nodes(&record, DialectVersion::V3_11);
        let meta = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, None, loop_constants(), nodes.len());
        let first = analyze(&meta, &nodes, 1_000).expect("converges");
        let second = analyze_from(&meta, &nodes, &first, 1_000).expect("converges");
        assert_eq!(first.states, second.states);
        assert_eq!(first.handlers, second.handlers);
    }

    #[test]
    fn test_depth_mismatch_is_fatal() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .args(&["x"])
            .op("LOAD_FAST", 0)
            .op("POP_JUMP_FORWARD_IF_FALSE", 1)
            .op("LOAD_CONST", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .build();
        let error = run_analysis(&record, DialectVersion::V3_11, vec![Value::None]).expect_err("mismatch");
        assert!(matches!(
            error,
            TranslateError::Dataflow(DataflowError::StackDepthMismatch { offset: 3, expected: 0, found: 1, .. })
        ));
    }

    #[test]
    fn test_iteration_cap() {
        let registry = TypeRegistry::new();
        let record = counting_loop();
        let nodes = nodes(&record, DialectVersion::V3_11);
        let meta = FunctionMetadata::new(&record, DialectVersion::V3_11, &registry, None, loop_constants(), nodes.len());
        assert!(matches!(
            analyze(&meta, &nodes, 3),
            Err(TranslateError::Dataflow(DataflowError::NoConvergence { iterations: 3 }))
        ));
    }

    #[test]
    fn test_falling_off_the_end() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11).op("NOP", 0).build();
        assert!(matches!(
            run_analysis(&record, DialectVersion::V3_11, vec![]),
            Err(TranslateError::Dataflow(DataflowError::UnresolvableJumpTarget { offset: 0, target: 1 }))
        ));
    }

    #[test]
    fn test_underflow_carries_offset() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11).op("NOP", 0).op("POP_TOP", 0).build();
        assert!(matches!(
            run_analysis(&record, DialectVersion::V3_11, vec![]),
            Err(TranslateError::Dataflow(DataflowError::StackUnderflow { offset: 1, .. }))
        ));
    }

    #[test]
    fn test_exception_table_edge() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .names(&["g"])
            .op("NOP", 0)
            .op("LOAD_GLOBAL", 0)
            .op("POP_TOP", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .op("POP_TOP", 0)
            .op("POP_TOP", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .handler(1, 3, 5, 0, true)
            .build();
        let result = run_analysis(&record, DialectVersion::V3_11, vec![Value::None]).expect("converges");
        let handler = result.state(5).expect("handler reachable");
        assert_eq!(handler.depth(), 2);
        assert_eq!(handler.peek(0).expect("exc").ty, BASE_EXCEPTION);
        assert_eq!(handler.peek(1).expect("lasti").ty, INT);
        assert_eq!(result.handler(1), Some(HandlerEdge { handler: 5, depth: 0, lasti: true }));
        // POP_TOP cannot raise
        assert_eq!(result.handler(2), None);
    }

    #[test]
    fn test_block_stack_edge() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_9)
            .names(&["g"])
            .op("SETUP_FINALLY", 10)
            .op("LOAD_GLOBAL", 0)
            .op("POP_TOP", 0)
            .op("POP_BLOCK", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .op("POP_TOP", 0)
            .op("POP_TOP", 0)
            .op("POP_TOP", 0)
            .op("POP_EXCEPT", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .build();
        let result = run_analysis(&record, DialectVersion::V3_9, vec![Value::None]).expect("converges");
        let handler = result.state(6).expect("handler reachable");
        assert_eq!(handler.depth(), 6);
        assert_eq!(handler.peek(0).expect("type").ty, TYPE);
        assert_eq!(handler.blocks().len(), 1);
        assert_eq!(handler.blocks()[0].kind, BlockKind::ExceptHandler);
        assert!(result.state(10).expect("after handler").blocks().is_empty());
        assert_eq!(result.handler(1).map(|h| h.handler), Some(6));
    }
}
