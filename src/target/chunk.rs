//! Bytecode chunk representation
//!
//! A BytecodeChunk contains the emitted target bytecode along with its
//! constant pool, name table, line mapping, jump tables, exception table and
//! the code-object shape the VM needs to bind arguments and build frames.
//!
//! Chunks are immutable after `ChunkBuilder::build` and shared through `Arc`.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use super::kind::ValueKind;
use super::opcodes::Opcode;
use crate::runtime::Value;

/// Errors raised while assembling a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Constant pool exceeded u16 indexing
    TooManyConstants,
    /// Name table exceeded u16 indexing
    TooManyNames,
    /// A label was referenced but never placed
    UnboundLabel(u32),
    /// A label was placed twice
    LabelRebound(u32),
    /// Relative jump does not fit in an i16
    JumpOutOfRange { from: usize, to: usize },
    /// A reserved jump table was never defined
    UndefinedJumpTable(u16),
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyConstants => write!(f, "Too many constants in chunk (max {})", u16::MAX),
            Self::TooManyNames => write!(f, "Too many names in chunk (max {})", u16::MAX),
            Self::UnboundLabel(id) => write!(f, "Label L{} referenced but never placed", id),
            Self::LabelRebound(id) => write!(f, "Label L{} placed twice", id),
            Self::JumpOutOfRange { from, to } => {
                write!(f, "Jump from {:04x} to {:04x} exceeds 16-bit range", from, to)
            }
            Self::UndefinedJumpTable(idx) => write!(f, "Jump table {} reserved but never defined", idx),
        }
    }
}

impl std::error::Error for ChunkError {}

/// Code-object shape of a chunk: naming, argument layout and frame sizes
#[derive(Debug, Clone)]
pub struct CodeInfo {
    pub name: Arc<str>,
    pub qualname: Arc<str>,
    /// Positional parameters (positional-only included)
    pub arg_count: u16,
    pub kwonly_count: u16,
    pub has_varargs: bool,
    pub has_varkw: bool,
    /// Local slot names; parameters come first in declaration order
    pub local_names: Vec<Arc<str>>,
    /// Cells created by this frame
    pub cell_names: Vec<Arc<str>>,
    /// Cells captured from the enclosing closure
    pub free_names: Vec<Arc<str>>,
    /// (cell slot, local slot) pairs for parameters that live in cells
    pub cell_args: Vec<(u16, u16)>,
    pub is_generator: bool,
    /// Number of generator state slots used to spill the operand stack
    pub state_slots: u16,
    pub first_line: u32,
}

impl CodeInfo {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        let name = name.into();
        Self {
            qualname: name.clone(),
            name,
            arg_count: 0,
            kwonly_count: 0,
            has_varargs: false,
            has_varkw: false,
            local_names: Vec::new(),
            cell_names: Vec::new(),
            free_names: Vec::new(),
            cell_args: Vec::new(),
            is_generator: false,
            state_slots: 0,
            first_line: 1,
        }
    }

    /// Number of local slots
    #[inline]
    pub fn local_count(&self) -> usize {
        self.local_names.len()
    }

    /// Total number of cell slots (own cells then free variables)
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cell_names.len() + self.free_names.len()
    }

    /// Number of leading locals bound by the call protocol
    pub fn param_count(&self) -> usize {
        self.arg_count as usize
            + self.kwonly_count as usize
            + usize::from(self.has_varargs)
            + usize::from(self.has_varkw)
    }
}

/// A jump table for multi-way branching
#[derive(Debug, Clone)]
pub struct JumpTable {
    /// Entries: (key, target_offset)
    pub entries: Vec<(i64, usize)>,
    /// Default target if no key matches
    pub default_offset: usize,
}

impl JumpTable {
    pub fn target(&self, key: i64) -> usize {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map_or(self.default_offset, |&(_, target)| target)
    }
}

/// A protected range of the exception table
///
/// When a raising instruction in `[start, end)` throws, the VM truncates the
/// operand stack to `depth`, pushes the exception and jumps to `handler`. The
/// stack below `depth` is declared by `frame_kinds` so the verifier can check
/// every raising site against the handler's entry frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
    pub depth: u16,
    pub frame_kinds: Vec<ValueKind>,
}

/// A compiled bytecode chunk
#[derive(Debug, Clone)]
pub struct BytecodeChunk {
    /// The bytecode instructions
    code: Vec<u8>,

    /// Constant pool for values that can't be encoded inline
    constants: Vec<Value>,

    /// Names referenced by global, attribute and import instructions
    names: Vec<Arc<str>>,

    /// Source line information: (byte_offset, line_number)
    /// Sorted by byte_offset for binary search
    line_info: Vec<(usize, u32)>,

    /// Jump tables for multi-way branches
    jump_tables: Vec<JumpTable>,

    /// Protected ranges, sorted by start offset
    exception_table: Vec<ExceptionEntry>,

    info: CodeInfo,
}

impl BytecodeChunk {
    /// Create a builder for constructing a chunk
    pub fn builder(name: impl Into<Arc<str>>) -> ChunkBuilder {
        ChunkBuilder::new(name)
    }

    /// A chunk with no code, used for the VM's idle frame
    pub fn empty(name: impl Into<Arc<str>>) -> Self {
        Self {
            code: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            line_info: Vec::new(),
            jump_tables: Vec::new(),
            exception_table: Vec::new(),
            info: CodeInfo::new(name),
        }
    }

    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[inline]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    #[inline]
    pub fn read_opcode(&self, offset: usize) -> Option<Opcode> {
        self.code.get(offset).and_then(|&b| Opcode::from_byte(b))
    }

    /// Read a u16 from the bytecode (big-endian)
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        if offset + 1 < self.code.len() {
            Some(u16::from_be_bytes([self.code[offset], self.code[offset + 1]]))
        } else {
            None
        }
    }

    /// Read a signed i16 from the bytecode (big-endian)
    #[inline]
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|u| u as i16)
    }

    #[inline]
    pub fn get_constant(&self, index: u16) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    #[inline]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[inline]
    pub fn get_name(&self, index: u16) -> Option<&Arc<str>> {
        self.names.get(index as usize)
    }

    #[inline]
    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }

    #[inline]
    pub fn get_jump_table(&self, index: u16) -> Option<&JumpTable> {
        self.jump_tables.get(index as usize)
    }

    #[inline]
    pub fn jump_tables(&self) -> &[JumpTable] {
        &self.jump_tables
    }

    #[inline]
    pub fn exception_table(&self) -> &[ExceptionEntry] {
        &self.exception_table
    }

    /// Find the protected range covering the instruction at `offset`
    pub fn find_handler(&self, offset: usize) -> Option<&ExceptionEntry> {
        self.exception_table
            .iter()
            .find(|entry| entry.start <= offset && offset < entry.end)
    }

    #[inline]
    pub fn info(&self) -> &CodeInfo {
        &self.info
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Get the source line for a bytecode offset
    pub fn get_line(&self, offset: usize) -> Option<u32> {
        match self.line_info.binary_search_by_key(&offset, |&(o, _)| o) {
            Ok(idx) => Some(self.line_info[idx].1),
            Err(idx) if idx > 0 => Some(self.line_info[idx - 1].1),
            _ => None,
        }
    }

    /// Disassemble the chunk to a string
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== {} ===\n", self.info.qualname));
        output.push_str(&format!(
            "locals: {}, cells: {}, args: {}, generator: {}\n",
            self.info.local_count(),
            self.info.cell_count(),
            self.info.arg_count,
            self.info.is_generator
        ));
        output.push_str(&format!("constants: {}, names: [{}]\n", self.constants.len(), self.names.iter().join(", ")));

        let mut offset = 0;
        while offset < self.code.len() {
            let line = self.get_line(offset).map_or(String::new(), |l| format!("{:4} ", l));
            let (disasm, next_offset) = self.disassemble_instruction(offset);
            output.push_str(&format!("{:04x} {} {}\n", offset, line, disasm));
            offset = next_offset;
        }

        for (idx, table) in self.jump_tables.iter().enumerate() {
            output.push_str(&format!(
                "table {}: [{}] default -> {:04x}\n",
                idx,
                table.entries.iter().map(|(k, t)| format!("{} -> {:04x}", k, t)).join(", "),
                table.default_offset
            ));
        }
        for entry in &self.exception_table {
            output.push_str(&format!(
                "except {:04x}..{:04x} -> {:04x} depth={} frame=[{}]\n",
                entry.start,
                entry.end,
                entry.handler,
                entry.depth,
                entry.frame_kinds.iter().join(", ")
            ));
        }

        output
    }

    /// Disassemble a single instruction, returns (string, next_offset)
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let Some(opcode) = self.read_opcode(offset) else {
            return (format!("??? (0x{:02x})", self.code.get(offset).copied().unwrap_or(0)), offset + 1);
        };

        let mnemonic = opcode.mnemonic();
        let imm_size = opcode.immediate_size();
        let next_offset = offset + 1 + imm_size;

        let operand_str = match imm_size {
            0 => String::new(),
            1 => {
                let byte = self.code.get(offset + 1).copied().unwrap_or(0);
                match opcode {
                    Opcode::PushSmallInt => format!(" {}", byte as i8),
                    Opcode::Cast => {
                        let kind = ValueKind::from_byte(byte).map_or("???", ValueKind::name);
                        format!(" {}", kind)
                    }
                    _ => format!(" {}", byte),
                }
            }
            2 => {
                let value = self.read_u16(offset + 1).unwrap_or(0);
                if opcode.is_jump() {
                    let target = (offset as isize + 3 + (value as i16) as isize) as usize;
                    format!(" -> {:04x}", target)
                } else {
                    match opcode {
                        Opcode::PushConstant | Opcode::LoadFallback => {
                            let const_str = self
                                .constants
                                .get(value as usize)
                                .map(|c| c.repr())
                                .unwrap_or_else(|| "???".to_string());
                            format!(" #{} ({})", value, const_str)
                        }
                        Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::DeleteGlobal
                        | Opcode::LoadAttr | Opcode::StoreAttr | Opcode::DeleteAttr
                        | Opcode::ImportName | Opcode::ImportFrom | Opcode::InvokeDunder => {
                            let name = self.names.get(value as usize).map_or("???", |n| n.as_ref());
                            format!(" #{} ({})", value, name)
                        }
                        Opcode::LoadLocal | Opcode::StoreLocal | Opcode::DeleteLocal | Opcode::TakeLocal => {
                            let name = self.info.local_names.get(value as usize).map_or("???", |n| n.as_ref());
                            format!(" {} ({})", value, name)
                        }
                        _ => format!(" {}", value),
                    }
                }
            }
            _ => String::new(),
        };

        (format!("{}{}", mnemonic, operand_str), next_offset)
    }
}

/// Forward-referenceable position in the code being built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
struct PendingTable {
    entries: Vec<(i64, Label)>,
    default: Label,
}

#[derive(Debug)]
struct PendingEntry {
    start: usize,
    end: usize,
    handler: Label,
    depth: u16,
    frame_kinds: Vec<ValueKind>,
}

/// Builder for constructing BytecodeChunks
///
/// Jumps are emitted against labels; `build` resolves every fixup and fails
/// on labels that were never placed.
#[derive(Debug)]
pub struct ChunkBuilder {
    code: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<Arc<str>>,
    line_info: Vec<(usize, u32)>,
    labels: Vec<Option<usize>>,
    /// (operand offset, label) pairs patched at build time
    fixups: Vec<(usize, Label)>,
    jump_tables: Vec<Option<PendingTable>>,
    exception_entries: Vec<PendingEntry>,
    info: CodeInfo,
    current_line: u32,
}

impl ChunkBuilder {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            code: Vec::with_capacity(256),
            constants: Vec::new(),
            names: Vec::new(),
            line_info: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            jump_tables: Vec::new(),
            exception_entries: Vec::new(),
            info: CodeInfo::new(name),
            current_line: 1,
        }
    }

    /// Code-object shape recorded into the built chunk
    #[inline]
    pub fn info_mut(&mut self) -> &mut CodeInfo {
        &mut self.info
    }

    #[inline]
    pub fn info(&self) -> &CodeInfo {
        &self.info
    }

    /// Set the current source line for subsequent instructions
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    /// Get the current bytecode offset
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a single opcode
    pub fn emit(&mut self, opcode: Opcode) {
        self.emit_line_info();
        self.code.push(opcode.to_byte());
    }

    /// Emit an opcode with a 1-byte operand
    pub fn emit_byte(&mut self, opcode: Opcode, operand: u8) {
        self.emit_line_info();
        self.code.push(opcode.to_byte());
        self.code.push(operand);
    }

    /// Emit an opcode with a 2-byte operand (big-endian)
    pub fn emit_u16(&mut self, opcode: Opcode, operand: u16) {
        self.emit_line_info();
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    /// Emit a kind check on TOS
    pub fn emit_cast(&mut self, kind: ValueKind) {
        self.emit_byte(Opcode::Cast, kind.to_byte());
    }

    /// Add a constant to the pool, returns its index
    pub fn add_constant(&mut self, value: Value) -> Result<u16, ChunkError> {
        if let Some(i) = self.constants.iter().position(|existing| existing.is_same_constant(&value)) {
            return Ok(i as u16);
        }
        let index = self.constants.len();
        if index > u16::MAX as usize {
            return Err(ChunkError::TooManyConstants);
        }
        self.constants.push(value);
        Ok(index as u16)
    }

    /// Emit a constant load, using the inline form for small integers
    pub fn emit_constant(&mut self, value: Value) -> Result<(), ChunkError> {
        match value {
            Value::None => self.emit(Opcode::PushNone),
            Value::Bool(true) => self.emit(Opcode::PushTrue),
            Value::Bool(false) => self.emit(Opcode::PushFalse),
            Value::Int(n) if (i8::MIN as i64..=i8::MAX as i64).contains(&n) => {
                self.emit_byte(Opcode::PushSmallInt, n as i8 as u8)
            }
            other => {
                let index = self.add_constant(other)?;
                self.emit_u16(Opcode::PushConstant, index);
            }
        }
        Ok(())
    }

    /// Intern a name, returns its index
    pub fn add_name(&mut self, name: &str) -> Result<u16, ChunkError> {
        if let Some(i) = self.names.iter().position(|n| n.as_ref() == name) {
            return Ok(i as u16);
        }
        let index = self.names.len();
        if index > u16::MAX as usize {
            return Err(ChunkError::TooManyNames);
        }
        self.names.push(Arc::from(name));
        Ok(index as u16)
    }

    /// Emit an opcode whose operand is a name index
    pub fn emit_name(&mut self, opcode: Opcode, name: &str) -> Result<(), ChunkError> {
        let index = self.add_name(name)?;
        self.emit_u16(opcode, index);
        Ok(())
    }

    /// Create a new unplaced label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    /// Bind a label to the current position
    pub fn place_label(&mut self, label: Label) -> Result<(), ChunkError> {
        let slot = &mut self.labels[label.0 as usize];
        if slot.is_some() {
            return Err(ChunkError::LabelRebound(label.0));
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// Offset of a placed label
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Emit a jump-family opcode targeting a label
    pub fn emit_jump(&mut self, opcode: Opcode, label: Label) {
        debug_assert!(opcode.is_jump());
        self.emit_line_info();
        self.code.push(opcode.to_byte());
        self.fixups.push((self.code.len(), label));
        // Placeholder for jump offset
        self.code.extend_from_slice(&[0xFF, 0xFF]);
    }

    /// Reserve a jump table index whose entries are defined later
    pub fn reserve_jump_table(&mut self) -> u16 {
        self.jump_tables.push(None);
        (self.jump_tables.len() - 1) as u16
    }

    /// Define the entries of a reserved jump table
    pub fn define_jump_table(&mut self, index: u16, entries: Vec<(i64, Label)>, default: Label) {
        if let Some(slot) = self.jump_tables.get_mut(index as usize) {
            *slot = Some(PendingTable { entries, default });
        }
    }

    /// Protect `[start, end)` with a handler, merging with the previous range when contiguous
    pub fn add_exception_range(
        &mut self,
        start: usize,
        end: usize,
        handler: Label,
        depth: u16,
        frame_kinds: Vec<ValueKind>,
    ) {
        if start >= end {
            return;
        }
        if let Some(last) = self.exception_entries.last_mut() {
            if last.end == start && last.handler == handler && last.depth == depth && last.frame_kinds == frame_kinds {
                last.end = end;
                return;
            }
        }
        self.exception_entries.push(PendingEntry { start, end, handler, depth, frame_kinds });
    }

    /// Record line info for current position
    fn emit_line_info(&mut self) {
        let offset = self.code.len();
        if self.line_info.is_empty() || self.line_info.last().map(|&(_, l)| l) != Some(self.current_line) {
            self.line_info.push((offset, self.current_line));
        }
    }

    fn resolve(&self, label: Label) -> Result<usize, ChunkError> {
        self.label_offset(label).ok_or(ChunkError::UnboundLabel(label.0))
    }

    /// Build the final chunk, resolving labels
    pub fn build(mut self) -> Result<BytecodeChunk, ChunkError> {
        for &(operand, label) in &self.fixups {
            let target = self.resolve(label)?;
            let jump_from = operand + 2;
            let delta = target as isize - jump_from as isize;
            let delta = i16::try_from(delta).map_err(|_| ChunkError::JumpOutOfRange { from: operand - 1, to: target })?;
            let bytes = delta.to_be_bytes();
            self.code[operand] = bytes[0];
            self.code[operand + 1] = bytes[1];
        }

        let mut jump_tables = Vec::with_capacity(self.jump_tables.len());
        for (idx, table) in self.jump_tables.iter().enumerate() {
            let table = table.as_ref().ok_or(ChunkError::UndefinedJumpTable(idx as u16))?;
            let entries = table
                .entries
                .iter()
                .map(|&(key, label)| self.resolve(label).map(|target| (key, target)))
                .collect::<Result<Vec<_>, _>>()?;
            jump_tables.push(JumpTable { entries, default_offset: self.resolve(table.default)? });
        }

        let mut exception_table = self
            .exception_entries
            .iter()
            .map(|entry| {
                Ok(ExceptionEntry {
                    start: entry.start,
                    end: entry.end,
                    handler: self.resolve(entry.handler)?,
                    depth: entry.depth,
                    frame_kinds: entry.frame_kinds.clone(),
                })
            })
            .collect::<Result<Vec<_>, ChunkError>>()?;
        exception_table.sort_by_key(|entry| entry.start);

        Ok(BytecodeChunk {
            code: self.code,
            constants: self.constants,
            names: self.names,
            line_info: self.line_info,
            jump_tables,
            exception_table,
            info: self.info,
        })
    }

    /// Build and wrap in Arc
    pub fn build_arc(self) -> Result<Arc<BytecodeChunk>, ChunkError> {
        self.build().map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_builder_basic() {
        let mut builder = ChunkBuilder::new("test");
        builder.emit(Opcode::PushNone);
        builder.emit(Opcode::Return);
        let chunk = builder.build().expect("chunk should build");

        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk.read_opcode(0), Some(Opcode::PushNone));
        assert_eq!(chunk.read_opcode(1), Some(Opcode::Return));
    }

    #[test]
    fn test_chunk_constants() {
        let mut builder = ChunkBuilder::new("test");
        let idx1 = builder.add_constant(Value::Int(1000)).expect("constant");
        let idx2 = builder.add_constant(Value::from("hello")).expect("constant");
        let idx3 = builder.add_constant(Value::Int(1000)).expect("constant");

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
    }

    #[test]
    fn test_constant_dedup_keeps_bool_and_int_apart() {
        let mut builder = ChunkBuilder::new("test");
        let one = builder.add_constant(Value::Int(1)).expect("constant");
        let truth = builder.add_constant(Value::Bool(true)).expect("constant");
        assert_ne!(one, truth);
    }

    #[test]
    fn test_small_int_inlined() {
        let mut builder = ChunkBuilder::new("test");
        builder.emit_constant(Value::Int(-3)).expect("emit");
        builder.emit_constant(Value::Int(300)).expect("emit");
        let chunk = builder.build().expect("chunk should build");

        assert_eq!(chunk.read_opcode(0), Some(Opcode::PushSmallInt));
        assert_eq!(chunk.read_byte(1).map(|b| b as i8), Some(-3));
        assert_eq!(chunk.read_opcode(2), Some(Opcode::PushConstant));
        assert_eq!(chunk.constants().len(), 1);
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let mut builder = ChunkBuilder::new("test");
        let top = builder.new_label();
        let end = builder.new_label();
        builder.place_label(top).expect("place");
        builder.emit(Opcode::PushTrue);
        builder.emit_jump(Opcode::JumpIfTrue, end);
        builder.emit_jump(Opcode::Jump, top);
        builder.place_label(end).expect("place");
        builder.emit(Opcode::PushNone);
        builder.emit(Opcode::Return);

        let chunk = builder.build().expect("chunk should build");
        // JumpIfTrue at 1, operand ends at 4, end label at 7
        assert_eq!(chunk.read_i16(2), Some(3));
        // Jump at 4, operand ends at 7, top label at 0
        assert_eq!(chunk.read_i16(5), Some(-7));
    }

    #[test]
    fn test_unbound_label_is_an_error() {
        let mut builder = ChunkBuilder::new("test");
        let nowhere = builder.new_label();
        builder.emit_jump(Opcode::Jump, nowhere);
        assert_eq!(builder.build().unwrap_err(), ChunkError::UnboundLabel(0));
    }

    #[test]
    fn test_jump_table_resolution() {
        let mut builder = ChunkBuilder::new("test");
        let table = builder.reserve_jump_table();
        let a = builder.new_label();
        let b = builder.new_label();
        builder.emit(Opcode::PushNone);
        builder.emit_u16(Opcode::JumpTable, table);
        builder.place_label(a).expect("place");
        builder.emit(Opcode::Return);
        builder.place_label(b).expect("place");
        builder.emit(Opcode::Halt);
        builder.define_jump_table(table, vec![(0, a)], b);

        let chunk = builder.build().expect("chunk should build");
        let table = chunk.get_jump_table(table).expect("table");
        assert_eq!(table.target(0), 4);
        assert_eq!(table.target(7), 5);
    }

    #[test]
    fn test_exception_ranges_coalesce() {
        let mut builder = ChunkBuilder::new("test");
        let handler = builder.new_label();
        builder.add_exception_range(0, 3, handler, 0, vec![]);
        builder.add_exception_range(3, 5, handler, 0, vec![]);
        builder.add_exception_range(7, 9, handler, 0, vec![]);
        builder.emit_u16(Opcode::LoadLocal, 0);
        builder.place_label(handler).expect("place");
        builder.emit(Opcode::Return);

        let chunk = builder.build().expect("chunk should build");
        assert_eq!(chunk.exception_table().len(), 2);
        assert_eq!(chunk.exception_table()[0].end, 5);
        assert_eq!(chunk.find_handler(4).map(|e| e.handler), Some(3));
        assert!(chunk.find_handler(6).is_none());
    }

    #[test]
    fn test_chunk_line_info() {
        let mut builder = ChunkBuilder::new("test");
        builder.set_line(1);
        builder.emit(Opcode::PushNone);
        builder.set_line(2);
        builder.emit(Opcode::PushTrue);
        builder.emit(Opcode::Pop);
        builder.set_line(3);
        builder.emit(Opcode::Return);
        let chunk = builder.build().expect("chunk should build");

        assert_eq!(chunk.get_line(0), Some(1));
        assert_eq!(chunk.get_line(1), Some(2));
        assert_eq!(chunk.get_line(2), Some(2));
        assert_eq!(chunk.get_line(3), Some(3));
    }

    #[test]
    fn test_disassemble() {
        let mut builder = ChunkBuilder::new("test_chunk");
        builder.emit_byte(Opcode::PushSmallInt, 42);
        builder.emit_name(Opcode::LoadGlobal, "print").expect("name");
        builder.emit_cast(ValueKind::Int);
        builder.emit(Opcode::Return);
        let chunk = builder.build().expect("chunk should build");

        let disasm = chunk.disassemble();
        assert!(disasm.contains("=== test_chunk ==="));
        assert!(disasm.contains("push_small_int 42"));
        assert!(disasm.contains("load_global #0 (print)"));
        assert!(disasm.contains("cast int"));
        assert!(disasm.contains("return"));
    }
}
