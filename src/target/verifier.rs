//! Structural verification of emitted chunks.
//!
//! The verifier abstractly interprets a chunk over operand kinds. Every
//! reachable instruction gets one entry stack; at joins the depths must agree
//! and the kinds are joined. Typed instructions must see operands whose kinds
//! are assignable to what they require, and a raising instruction covered by
//! an exception range must leave a stack prefix that matches the range's frame.
//!
//! A chunk that passes cannot underflow the operand stack, jump into the middle
//! of an instruction, or index outside its tables.

use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use super::chunk::BytecodeChunk;
use super::kind::ValueKind;
use super::opcodes::Opcode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyErrorKind {
    UnknownOpcode(u8),
    TruncatedInstruction,
    /// Jump or handler target not on an instruction boundary
    InvalidTarget(usize),
    MissingJumpTable(u16),
    ConstantOutOfRange(u16),
    NameOutOfRange(u16),
    LocalOutOfRange(u16),
    CellOutOfRange(u16),
    StateSlotOutOfRange(u16),
    InvalidOperand(u16),
    StackUnderflow { needed: usize, depth: usize },
    DepthMismatch { expected: usize, found: usize },
    KindMismatch { expected: ValueKind, found: ValueKind },
    FallsOffEnd,
    HandlerDepth { depth: usize, available: usize },
    HandlerFrame { slot: usize, expected: ValueKind, found: ValueKind },
}

/// Verification failure at a target offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub offset: usize,
    pub kind: VerifyErrorKind,
}

impl VerifyError {
    fn new(offset: usize, kind: VerifyErrorKind) -> Self {
        Self { offset, kind }
    }
}

impl fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(byte) => write!(f, "unknown opcode 0x{:02x}", byte),
            Self::TruncatedInstruction => write!(f, "instruction operand runs past the end of the code"),
            Self::InvalidTarget(target) => write!(f, "target {:04x} is not an instruction boundary", target),
            Self::MissingJumpTable(idx) => write!(f, "jump table {} does not exist", idx),
            Self::ConstantOutOfRange(idx) => write!(f, "constant index {} out of range", idx),
            Self::NameOutOfRange(idx) => write!(f, "name index {} out of range", idx),
            Self::LocalOutOfRange(idx) => write!(f, "local slot {} out of range", idx),
            Self::CellOutOfRange(idx) => write!(f, "cell slot {} out of range", idx),
            Self::StateSlotOutOfRange(idx) => write!(f, "generator state slot {} out of range", idx),
            Self::InvalidOperand(value) => write!(f, "invalid operand {}", value),
            Self::StackUnderflow { needed, depth } => {
                write!(f, "stack underflow: needs {} values, depth is {}", needed, depth)
            }
            Self::DepthMismatch { expected, found } => {
                write!(f, "stack depth mismatch at join: {} vs {}", expected, found)
            }
            Self::KindMismatch { expected, found } => write!(f, "expected {} operand, found {}", expected, found),
            Self::FallsOffEnd => write!(f, "execution falls off the end of the code"),
            Self::HandlerDepth { depth, available } => {
                write!(f, "handler expects depth {}, only {} available", depth, available)
            }
            Self::HandlerFrame { slot, expected, found } => {
                write!(f, "handler frame slot {} expects {}, found {}", slot, expected, found)
            }
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}: {}", self.offset, self.kind)
    }
}

impl std::error::Error for VerifyError {}

type KindStack = Vec<ValueKind>;

/// Abstract interpreter state for one chunk
struct Verifier<'c> {
    chunk: &'c BytecodeChunk,
    boundaries: Vec<bool>,
    states: Vec<Option<KindStack>>,
    worklist: VecDeque<usize>,
}

/// Effect of one instruction on its entry stack
struct Step {
    /// Fall-through stack, absent for terminators
    next: Option<KindStack>,
    /// (target, stack) pairs for every branch
    branches: Vec<(usize, KindStack)>,
}

impl Step {
    fn fall(stack: KindStack) -> Self {
        Self { next: Some(stack), branches: Vec::new() }
    }

    fn stop() -> Self {
        Self { next: None, branches: Vec::new() }
    }
}

struct Frame<'s> {
    offset: usize,
    stack: &'s mut KindStack,
}

impl Frame<'_> {
    fn err(&self, kind: VerifyErrorKind) -> VerifyError {
        VerifyError::new(self.offset, kind)
    }

    fn require(&self, needed: usize) -> Result<(), VerifyError> {
        if self.stack.len() < needed {
            return Err(self.err(VerifyErrorKind::StackUnderflow { needed, depth: self.stack.len() }));
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<ValueKind, VerifyError> {
        self.require(1)?;
        Ok(self.stack.pop().unwrap_or(ValueKind::Any))
    }

    fn pop_n(&mut self, n: usize) -> Result<(), VerifyError> {
        self.require(n)?;
        let len = self.stack.len();
        self.stack.truncate(len - n);
        Ok(())
    }

    fn pop_kind(&mut self, expected: ValueKind) -> Result<(), VerifyError> {
        let found = self.pop()?;
        if !found.is_assignable_to(expected) {
            return Err(self.err(VerifyErrorKind::KindMismatch { expected, found }));
        }
        Ok(())
    }

    fn peek(&self, depth: usize) -> Result<ValueKind, VerifyError> {
        self.require(depth + 1)?;
        Ok(self.stack[self.stack.len() - 1 - depth])
    }

    fn push(&mut self, kind: ValueKind) {
        self.stack.push(kind);
    }

    fn push_n(&mut self, n: usize, kind: ValueKind) {
        self.stack.extend(std::iter::repeat(kind).take(n));
    }
}

impl<'c> Verifier<'c> {
    fn new(chunk: &'c BytecodeChunk) -> Self {
        Self {
            chunk,
            boundaries: vec![false; chunk.len() + 1],
            states: vec![None; chunk.len()],
            worklist: VecDeque::new(),
        }
    }

    /// Mark instruction boundaries, rejecting unknown bytes and truncated operands
    fn scan(&mut self) -> Result<(), VerifyError> {
        let mut offset = 0;
        while offset < self.chunk.len() {
            self.boundaries[offset] = true;
            let byte = self.chunk.read_byte(offset).unwrap_or(0xFF);
            let op = Opcode::from_byte(byte)
                .ok_or_else(|| VerifyError::new(offset, VerifyErrorKind::UnknownOpcode(byte)))?;
            let next = offset + 1 + op.immediate_size();
            if next > self.chunk.len() {
                return Err(VerifyError::new(offset, VerifyErrorKind::TruncatedInstruction));
            }
            offset = next;
        }
        Ok(())
    }

    fn check_target(&self, from: usize, target: usize) -> Result<(), VerifyError> {
        if target >= self.chunk.len() || !self.boundaries[target] {
            return Err(VerifyError::new(from, VerifyErrorKind::InvalidTarget(target)));
        }
        Ok(())
    }

    /// Merge `stack` into the entry state of `target`
    fn flow(&mut self, from: usize, target: usize, stack: KindStack) -> Result<(), VerifyError> {
        self.check_target(from, target)?;
        let changed = match &mut self.states[target] {
            slot @ None => {
                *slot = Some(stack);
                true
            }
            Some(existing) => {
                if existing.len() != stack.len() {
                    return Err(VerifyError::new(
                        target,
                        VerifyErrorKind::DepthMismatch { expected: existing.len(), found: stack.len() },
                    ));
                }
                let mut changed = false;
                for (old, new) in existing.iter_mut().zip(stack) {
                    let joined = old.join(new);
                    if joined != *old {
                        *old = joined;
                        changed = true;
                    }
                }
                changed
            }
        };
        if changed {
            self.worklist.push_back(target);
        }
        Ok(())
    }

    fn jump_target(&self, offset: usize) -> Result<usize, VerifyError> {
        let delta = self
            .chunk
            .read_i16(offset + 1)
            .ok_or_else(|| VerifyError::new(offset, VerifyErrorKind::TruncatedInstruction))?;
        let target = (offset + 3) as isize + delta as isize;
        usize::try_from(target).map_err(|_| VerifyError::new(offset, VerifyErrorKind::InvalidTarget(0)))
    }

    fn u16_operand(&self, offset: usize) -> Result<u16, VerifyError> {
        self.chunk
            .read_u16(offset + 1)
            .ok_or_else(|| VerifyError::new(offset, VerifyErrorKind::TruncatedInstruction))
    }

    fn byte_operand(&self, offset: usize) -> Result<u8, VerifyError> {
        self.chunk
            .read_byte(offset + 1)
            .ok_or_else(|| VerifyError::new(offset, VerifyErrorKind::TruncatedInstruction))
    }

    fn check_index(&self, offset: usize, index: u16, bound: usize, kind: fn(u16) -> VerifyErrorKind) -> Result<(), VerifyError> {
        if index as usize >= bound {
            return Err(VerifyError::new(offset, kind(index)));
        }
        Ok(())
    }

    /// Apply the instruction at `offset` to `stack`
    fn step(&self, offset: usize, op: Opcode, stack: &mut KindStack) -> Result<Step, VerifyError> {
        use ValueKind::*;

        let info = self.chunk.info();
        let mut f = Frame { offset, stack };
        let byte = || self.byte_operand(offset);
        let wide = || self.u16_operand(offset);

        match op {
            Opcode::Nop | Opcode::GenSaveLocals | Opcode::GenRestoreLocals | Opcode::GenCheckThrow | Opcode::ExitHandler => {}
            Opcode::Pop => {
                f.pop()?;
            }
            Opcode::Dup => {
                let top = f.peek(0)?;
                f.push(top);
            }
            Opcode::Swap => {
                f.require(2)?;
                let len = f.stack.len();
                f.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot3 => {
                f.require(3)?;
                let len = f.stack.len();
                f.stack[len - 3..].rotate_right(1);
            }
            Opcode::Over => {
                let second = f.peek(1)?;
                f.push(second);
            }
            Opcode::PopN => f.pop_n(byte()? as usize)?,
            Opcode::Pick => {
                let copied = f.peek(byte()? as usize)?;
                f.push(copied);
            }
            Opcode::SwapN => {
                let n = byte()? as usize;
                f.require(n + 1)?;
                let len = f.stack.len();
                f.stack.swap(len - 1, len - 1 - n);
            }
            Opcode::RotN => {
                let n = byte()? as usize;
                f.require(n)?;
                let len = f.stack.len();
                f.stack[len - n..].rotate_right(1);
            }

            Opcode::PushNone => f.push(None),
            Opcode::PushTrue | Opcode::PushFalse => f.push(Bool),
            Opcode::PushNull => f.push(Any),
            Opcode::PushSmallInt => {
                byte()?;
                f.push(Int);
            }
            Opcode::PushConstant => {
                let idx = wide()?;
                let value = self
                    .chunk
                    .get_constant(idx)
                    .ok_or_else(|| f.err(VerifyErrorKind::ConstantOutOfRange(idx)))?;
                f.push(value.kind());
            }
            Opcode::LoadFallback => {
                let idx = wide()?;
                self.check_index(offset, idx, self.chunk.constants().len(), VerifyErrorKind::ConstantOutOfRange)?;
                f.push(Any);
            }

            Opcode::LoadLocal | Opcode::TakeLocal => {
                self.check_index(offset, wide()?, info.local_count(), VerifyErrorKind::LocalOutOfRange)?;
                f.push(Any);
            }
            Opcode::StoreLocal => {
                self.check_index(offset, wide()?, info.local_count(), VerifyErrorKind::LocalOutOfRange)?;
                f.pop()?;
            }
            Opcode::DeleteLocal => {
                self.check_index(offset, wide()?, info.local_count(), VerifyErrorKind::LocalOutOfRange)?;
            }
            Opcode::LoadCell | Opcode::LoadDeref => {
                self.check_index(offset, wide()?, info.cell_count(), VerifyErrorKind::CellOutOfRange)?;
                f.push(Any);
            }
            Opcode::StoreDeref => {
                self.check_index(offset, wide()?, info.cell_count(), VerifyErrorKind::CellOutOfRange)?;
                f.pop()?;
            }
            Opcode::DeleteDeref => {
                self.check_index(offset, wide()?, info.cell_count(), VerifyErrorKind::CellOutOfRange)?;
            }
            Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::DeleteGlobal => {
                self.check_index(offset, wide()?, self.chunk.names().len(), VerifyErrorKind::NameOutOfRange)?;
                match op {
                    Opcode::LoadGlobal => f.push(Any),
                    Opcode::StoreGlobal => {
                        f.pop()?;
                    }
                    _ => {}
                }
            }

            Opcode::Jump => {
                let target = self.jump_target(offset)?;
                return Ok(Step { next: Option::None, branches: vec![(target, f.stack.clone())] });
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let target = self.jump_target(offset)?;
                f.pop_kind(Bool)?;
                return Ok(Step { next: Some(f.stack.clone()), branches: vec![(target, f.stack.clone())] });
            }
            Opcode::JumpIfNone | Opcode::JumpIfNotNone => {
                let target = self.jump_target(offset)?;
                f.pop()?;
                return Ok(Step { next: Some(f.stack.clone()), branches: vec![(target, f.stack.clone())] });
            }
            Opcode::ForIter => {
                let target = self.jump_target(offset)?;
                f.require(1)?;
                let mut exhausted = f.stack.clone();
                exhausted.pop();
                f.push(Any);
                return Ok(Step { next: Some(f.stack.clone()), branches: vec![(target, exhausted)] });
            }
            Opcode::SendOrJump => {
                let target = self.jump_target(offset)?;
                f.require(2)?;
                f.pop()?;
                f.push(Any);
                return Ok(Step { next: Some(f.stack.clone()), branches: vec![(target, f.stack.clone())] });
            }
            Opcode::JumpTable => {
                let idx = wide()?;
                let table = self
                    .chunk
                    .get_jump_table(idx)
                    .ok_or_else(|| f.err(VerifyErrorKind::MissingJumpTable(idx)))?;
                f.pop_kind(Int)?;
                let branches = table
                    .entries
                    .iter()
                    .map(|&(_, target)| target)
                    .chain(std::iter::once(table.default_offset))
                    .map(|target| (target, f.stack.clone()))
                    .collect();
                return Ok(Step { next: Option::None, branches });
            }
            Opcode::Return | Opcode::GenYield | Opcode::GenReturn | Opcode::Reraise => {
                f.pop()?;
                return Ok(Step::stop());
            }
            Opcode::Raise => {
                let count = byte()?;
                if count > 2 {
                    return Err(f.err(VerifyErrorKind::InvalidOperand(count as u16)));
                }
                f.pop_n(count as usize)?;
                return Ok(Step::stop());
            }
            Opcode::Halt => return Ok(Step::stop()),
            Opcode::Cast => {
                let raw = byte()?;
                let kind = ValueKind::from_byte(raw).ok_or_else(|| f.err(VerifyErrorKind::InvalidOperand(raw as u16)))?;
                f.pop()?;
                f.push(kind);
            }
            Opcode::Truthy => {
                f.pop()?;
                f.push(Bool);
            }

            Opcode::AddInt | Opcode::SubInt | Opcode::MulInt | Opcode::FloorDivInt | Opcode::ModInt => {
                f.pop_kind(Int)?;
                f.pop_kind(Int)?;
                f.push(Int);
            }
            Opcode::NegInt => {
                f.pop_kind(Int)?;
                f.push(Int);
            }
            Opcode::AddFloat | Opcode::SubFloat | Opcode::MulFloat | Opcode::TrueDivFloat => {
                f.pop_kind(Float)?;
                f.pop_kind(Float)?;
                f.push(Float);
            }
            Opcode::NegFloat => {
                f.pop_kind(Float)?;
                f.push(Float);
            }
            Opcode::ConcatStr => {
                f.pop_kind(Str)?;
                f.pop_kind(Str)?;
                f.push(Str);
            }
            Opcode::LtInt | Opcode::LeInt | Opcode::GtInt | Opcode::GeInt | Opcode::EqInt | Opcode::NeInt => {
                f.pop_kind(Int)?;
                f.pop_kind(Int)?;
                f.push(Bool);
            }
            Opcode::Not => {
                f.pop_kind(Bool)?;
                f.push(Bool);
            }

            Opcode::BinaryOp | Opcode::InplaceOp | Opcode::CompareOp => {
                byte()?;
                f.pop_n(2)?;
                f.push(Any);
            }
            Opcode::UnaryOp => {
                byte()?;
                f.pop()?;
                f.push(Any);
            }
            Opcode::IsOp | Opcode::ContainsOp => {
                byte()?;
                f.pop_n(2)?;
                f.push(Bool);
            }
            Opcode::ExcMatch => {
                f.pop_n(2)?;
                f.push(Bool);
            }
            Opcode::GetItem => {
                f.pop_n(2)?;
                f.push(Any);
            }
            Opcode::SetItem => f.pop_n(3)?,
            Opcode::DelItem => f.pop_n(2)?,
            Opcode::InvokeDunder => {
                self.check_index(offset, wide()?, self.chunk.names().len(), VerifyErrorKind::NameOutOfRange)?;
                f.pop_n(2)?;
                f.push(Any);
            }
            Opcode::TypeOf | Opcode::GetIter | Opcode::ListToTuple | Opcode::GetYieldFromIter => {
                f.pop()?;
                f.push(Any);
            }

            Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => {
                f.pop_n(wide()? as usize)?;
                f.push(Any);
            }
            Opcode::BuildMap => {
                f.pop_n(2 * wide()? as usize)?;
                f.push(Any);
            }
            Opcode::BuildConstKeyMap => {
                f.pop_n(wide()? as usize + 1)?;
                f.push(Any);
            }
            Opcode::BuildSlice => {
                let count = byte()?;
                if !(2..=3).contains(&count) {
                    return Err(f.err(VerifyErrorKind::InvalidOperand(count as u16)));
                }
                f.pop_n(count as usize)?;
                f.push(Any);
            }
            Opcode::ListAppend | Opcode::SetAdd | Opcode::ListExtend | Opcode::SetUpdate | Opcode::DictUpdate | Opcode::MapAdd => {
                let distance = wide()?;
                if distance == 0 {
                    return Err(f.err(VerifyErrorKind::InvalidOperand(0)));
                }
                f.pop_n(if op == Opcode::MapAdd { 2 } else { 1 })?;
                f.peek(distance as usize - 1)?;
            }
            Opcode::UnpackSequence => {
                let count = wide()?;
                f.pop()?;
                f.push_n(count as usize, Any);
            }
            Opcode::UnpackEx => {
                let split = wide()?;
                f.pop()?;
                f.push_n((split & 0xFF) as usize + (split >> 8) as usize + 1, Any);
            }

            Opcode::MakeFunction => {
                let flags = byte()?;
                if flags & !0x0F != 0 {
                    return Err(f.err(VerifyErrorKind::InvalidOperand(flags as u16)));
                }
                f.pop_n(1 + flags.count_ones() as usize)?;
                f.push(Any);
            }
            Opcode::Call => {
                f.pop_n(byte()? as usize + 1)?;
                f.push(Any);
            }
            Opcode::CallKw => {
                f.pop_n(byte()? as usize + 2)?;
                f.push(Any);
            }
            Opcode::CallEx => {
                f.pop_n(2 + usize::from(byte()? & 1 == 1))?;
                f.push(Any);
            }
            Opcode::LoadAttr | Opcode::StoreAttr | Opcode::DeleteAttr | Opcode::ImportName | Opcode::ImportFrom => {
                self.check_index(offset, wide()?, self.chunk.names().len(), VerifyErrorKind::NameOutOfRange)?;
                match op {
                    Opcode::LoadAttr => {
                        f.pop()?;
                        f.push(Any);
                    }
                    Opcode::StoreAttr => f.pop_n(2)?,
                    Opcode::DeleteAttr => f.pop_n(1)?,
                    Opcode::ImportName => {
                        f.pop_n(2)?;
                        f.push(Any);
                    }
                    _ => {
                        f.require(1)?;
                        f.push(Any);
                    }
                }
            }

            Opcode::FormatValue => {
                let flags = byte()?;
                f.pop_n(1 + usize::from(flags & 0x04 != 0))?;
                f.push(Str);
            }
            Opcode::BuildString => {
                f.pop_n(wide()? as usize)?;
                f.push(Str);
            }
            Opcode::PrintExpr => {
                f.pop()?;
            }

            Opcode::EnterHandler => f.require(1)?,

            Opcode::GenResumeIndex => f.push(Int),
            Opcode::GenSetResume => {
                wide()?;
            }
            Opcode::GenStoreState => {
                self.check_index(offset, wide()?, info.state_slots as usize, VerifyErrorKind::StateSlotOutOfRange)?;
                f.pop()?;
            }
            Opcode::GenLoadState => {
                self.check_index(offset, wide()?, info.state_slots as usize, VerifyErrorKind::StateSlotOutOfRange)?;
                f.push(Any);
            }
            Opcode::GenSent => f.push(Any),
        }
        Ok(Step::fall(f.stack.clone()))
    }

    /// Route the exception edge of a raising instruction to its handler
    fn raise_edge(&mut self, offset: usize, stack: &KindStack) -> Result<(), VerifyError> {
        let Some(entry) = self.chunk.find_handler(offset) else {
            return Ok(());
        };
        let depth = entry.depth as usize;
        if stack.len() < depth {
            return Err(VerifyError::new(offset, VerifyErrorKind::HandlerDepth { depth, available: stack.len() }));
        }
        for (slot, (&found, &expected)) in stack.iter().zip(&entry.frame_kinds).enumerate() {
            if !found.is_assignable_to(expected) {
                return Err(VerifyError::new(offset, VerifyErrorKind::HandlerFrame { slot, expected, found }));
            }
        }
        let mut handler_stack: KindStack = stack[..depth].to_vec();
        for (slot, expected) in entry.frame_kinds.iter().enumerate().take(depth) {
            handler_stack[slot] = *expected;
        }
        handler_stack.push(ValueKind::Any);
        let handler = entry.handler;
        self.flow(offset, handler, handler_stack)
    }

    fn run(mut self) -> Result<usize, VerifyError> {
        self.scan()?;
        if self.chunk.is_empty() {
            return Ok(0);
        }
        self.flow(0, 0, Vec::new())?;
        let mut visits = 0;
        while let Some(offset) = self.worklist.pop_front() {
            visits += 1;
            let Some(mut stack) = self.states[offset].clone() else {
                continue;
            };
            let byte = self.chunk.read_byte(offset).unwrap_or(0xFF);
            let op = Opcode::from_byte(byte)
                .ok_or_else(|| VerifyError::new(offset, VerifyErrorKind::UnknownOpcode(byte)))?;

            if op.can_raise() {
                let entry = stack.clone();
                self.raise_edge(offset, &entry)?;
            }

            let step = self.step(offset, op, &mut stack)?;
            if let Some(next) = step.next {
                let following = offset + 1 + op.immediate_size();
                if following >= self.chunk.len() {
                    return Err(VerifyError::new(offset, VerifyErrorKind::FallsOffEnd));
                }
                self.flow(offset, following, next)?;
            }
            for (target, branch) in step.branches {
                self.flow(offset, target, branch)?;
            }
        }
        Ok(visits)
    }
}

/// Verify `chunk`, returning the first structural error found
pub fn verify(chunk: &BytecodeChunk) -> Result<(), VerifyError> {
    let visits = Verifier::new(chunk).run()?;
    trace!(target: "pytron::verify", chunk = chunk.name(), visits, "chunk verified");
    Ok(())
}
