//! Emission of a whole function from its dataflow result.
//!
//! The main pass walks source offsets in order, binding each offset's label
//! and letting the node emit its code. Code that does not belong inline (3.12
//! loop exits, 3.11 send trampolines) is deferred by the nodes and appended
//! afterwards, followed by one prologue per exception handler. Generators
//! additionally get a dispatch header that jumps to the start or to the
//! resume block of the last suspension.

use std::collections::BTreeMap;

use tracing::debug;

use super::dataflow::{DataflowResult, HandlerEdge};
use super::error::{EmissionError, TranslateResult};
use super::metadata::FunctionMetadata;
use super::stack::ValueSourceInfo;
use crate::opcodes::Opcode;
use crate::runtime::Value;
use crate::source::DialectVersion;
use crate::target::{Label, Opcode as TargetOp};
use crate::types::builtin::RUNTIME_ERROR;

/// A raising region of target code and the handler covering it
struct Range {
    start: usize,
    end: usize,
    handler: usize,
}

struct GeneratorHeader {
    table: u16,
    start: Label,
}

fn emit_generator_header(meta: &mut FunctionMetadata<'_>) -> TranslateResult<GeneratorHeader> {
    let table = meta.builder.reserve_jump_table();
    meta.builder.emit(TargetOp::GenResumeIndex);
    meta.builder.emit_u16(TargetOp::JumpTable, table);
    let start = meta.builder.new_label();
    meta.builder.place_label(start)?;
    meta.builder.emit(TargetOp::GenRestoreLocals);
    // 3.10 generators begin with the value sent by the first resumption
    if meta.version == DialectVersion::V3_10 {
        meta.builder.emit(TargetOp::PushNone);
    }
    Ok(GeneratorHeader { table, start })
}

fn finish_generator_header(meta: &mut FunctionMetadata<'_>, header: GeneratorHeader) -> TranslateResult<()> {
    let invalid = meta.builder.new_label();
    meta.builder.place_label(invalid)?;
    meta.builder.emit_constant(Value::Type(RUNTIME_ERROR))?;
    meta.builder.emit_byte(TargetOp::Raise, 1);

    let mut entries = vec![(0, header.start)];
    entries.extend(meta.resume_points().iter().enumerate().map(|(k, &label)| (k as i64 + 1, label)));
    meta.builder.define_jump_table(header.table, entries, invalid);
    let slots = u16::try_from(meta.state_slots())
        .map_err(|_| EmissionError::Unsupported { offset: 0, opname: "YIELD_VALUE".into(), detail: "too many live values".into() })?;
    meta.builder.info_mut().state_slots = slots;
    Ok(())
}

/// Suspend with the top of `stack` and resume with the sent value on top
///
/// Everything below the yielded value is spilled into generator state slots
/// and reloaded, with a kind check where the value's kind is known, when the
/// generator is resumed.
pub(crate) fn emit_yield(meta: &mut FunctionMetadata<'_>, stack: &[ValueSourceInfo]) -> TranslateResult<()> {
    let Some((_, saved)) = stack.split_last() else {
        return Ok(());
    };
    let live = saved.len();
    let top = u16::try_from(live).map_err(|_| EmissionError::Unsupported {
        offset: 0,
        opname: "YIELD_VALUE".into(),
        detail: "too many live values".into(),
    })?;
    meta.reserve_state_slots(live + 1);

    meta.builder.emit_u16(TargetOp::GenStoreState, top);
    for slot in (0..top).rev() {
        meta.builder.emit_u16(TargetOp::GenStoreState, slot);
    }
    meta.builder.emit(TargetOp::GenSaveLocals);
    let resume = meta.builder.new_label();
    let index = meta.add_resume_point(resume);
    meta.builder.emit_u16(TargetOp::GenSetResume, index);
    meta.builder.emit_u16(TargetOp::GenLoadState, top);
    meta.builder.emit(TargetOp::GenYield);

    meta.builder.place_label(resume)?;
    meta.builder.emit(TargetOp::GenRestoreLocals);
    for (slot, value) in saved.iter().enumerate() {
        meta.builder.emit_u16(TargetOp::GenLoadState, slot as u16);
        meta.emit_cast_for(value.ty);
    }
    meta.builder.emit(TargetOp::GenCheckThrow);
    meta.builder.emit(TargetOp::GenSent);
    Ok(())
}

/// Rebuild the dialect's handler entry layout from `[prefix..., exc]`, then enter the handler
fn emit_prologue(meta: &mut FunctionMetadata<'_>, label: Label, edge: HandlerEdge) -> TranslateResult<()> {
    let target = meta.label(edge.handler, edge.handler)?;
    meta.builder.place_label(label)?;
    if meta.version.has_block_stack() {
        let temp = meta.alloc_temp();
        meta.builder.emit(TargetOp::EnterHandler);
        meta.builder.emit_u16(TargetOp::StoreLocal, temp);
        // previous state as None, 0, None, then the new traceback
        meta.builder.emit(TargetOp::PushNone);
        meta.builder.emit_byte(TargetOp::PushSmallInt, 0);
        meta.builder.emit(TargetOp::PushNone);
        meta.builder.emit(TargetOp::PushNone);
        meta.builder.emit_u16(TargetOp::LoadLocal, temp);
        meta.builder.emit_u16(TargetOp::LoadLocal, temp);
        meta.builder.emit(TargetOp::TypeOf);
    } else if edge.lasti {
        let temp = meta.alloc_temp();
        meta.builder.emit_u16(TargetOp::StoreLocal, temp);
        meta.builder.emit_byte(TargetOp::PushSmallInt, 0);
        meta.builder.emit_u16(TargetOp::LoadLocal, temp);
    }
    meta.builder.emit_jump(TargetOp::Jump, target);
    Ok(())
}

/// Emit every reachable node, deferred blocks, handler prologues and exception ranges
pub fn emit_function<'a>(
    meta: &mut FunctionMetadata<'a>,
    nodes: &[Box<dyn Opcode>],
    flow: &DataflowResult,
) -> TranslateResult<()> {
    let header = if meta.is_generator() { Some(emit_generator_header(meta)?) } else { None };

    let mut ranges: Vec<Range> = Vec::new();
    let mut handlers: BTreeMap<usize, HandlerEdge> = BTreeMap::new();
    for (offset, node) in nodes.iter().enumerate() {
        let label = meta.label(offset, offset)?;
        meta.builder.place_label(label)?;
        let Some(state) = flow.state(offset) else {
            continue;
        };
        if let Some(line) = node.instruction().line() {
            meta.builder.set_line(line);
        }
        let start = meta.builder.current_offset();
        node.emit(meta, state)?;
        let end = meta.builder.current_offset();
        if let Some(edge) = flow.handler(offset) {
            handlers.insert(edge.handler, edge);
            ranges.push(Range { start, end, handler: edge.handler });
        }
    }

    // deferred blocks may defer further blocks
    loop {
        let deferred = meta.take_deferred();
        if deferred.is_empty() {
            break;
        }
        for block in deferred {
            block(meta)?;
        }
    }

    let mut prologues = BTreeMap::new();
    for (&handler, &edge) in &handlers {
        let label = meta.builder.new_label();
        emit_prologue(meta, label, edge)?;
        prologues.insert(handler, label);
    }
    for range in &ranges {
        let edge = handlers[&range.handler];
        let frame_kinds = flow
            .state(range.handler)
            .map(|state| state.frame_kinds(edge.depth))
            .unwrap_or_default();
        meta.builder.add_exception_range(
            range.start,
            range.end,
            prologues[&range.handler],
            edge.depth as u16,
            frame_kinds,
        );
    }

    if let Some(header) = header {
        finish_generator_header(meta, header)?;
    }

    debug!(
        target: "pytron::emit",
        function = meta.record.qualname(),
        bytes = meta.builder.current_offset(),
        handlers = handlers.len(),
        resume_points = meta.resume_points().len(),
        "emitted function body"
    );
    Ok(())
}
