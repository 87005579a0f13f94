//! Fluent construction of records, used by tests, benches and the CLI.

use super::instruction::RawInstruction;
use super::record::{CodeKind, Constant, ExceptionTableEntry, FunctionRecord};
use super::version::DialectVersion;

/// Builder for `FunctionRecord`
///
/// ```
/// use pytron::source::{Constant, DialectVersion, FunctionBuilder};
///
/// let record = FunctionBuilder::new("add", DialectVersion::V3_11)
///     .args(&["a", "b"])
///     .op("LOAD_FAST", 0)
///     .op("LOAD_FAST", 1)
///     .op("BINARY_OP", 0)
///     .op("RETURN_VALUE", 0)
///     .build();
/// assert_eq!(record.argcount, 2);
/// ```
#[derive(Debug, Clone)]
pub struct FunctionBuilder {
    record: FunctionRecord,
    line: Option<u32>,
}

impl FunctionBuilder {
    pub fn new(name: &str, version: DialectVersion) -> Self {
        let mut record = FunctionRecord::new(name);
        record.version = Some(version);
        Self { record, line: None }
    }

    pub fn qualified_name(mut self, qualname: &str) -> Self {
        self.record.qualified_name = Some(qualname.to_string());
        self
    }

    /// Positional parameters, appended to the varnames
    pub fn args(mut self, names: &[&str]) -> Self {
        self.record.varnames.extend(names.iter().map(|n| n.to_string()));
        self.record.argcount += names.len() as u16;
        self
    }

    pub fn kwonly(mut self, names: &[&str]) -> Self {
        self.record.varnames.extend(names.iter().map(|n| n.to_string()));
        self.record.kwonlyargcount += names.len() as u16;
        self
    }

    pub fn varargs(mut self, name: &str) -> Self {
        self.record.varnames.push(name.to_string());
        self.record.varargs = true;
        self
    }

    pub fn varkeywords(mut self, name: &str) -> Self {
        self.record.varnames.push(name.to_string());
        self.record.varkeywords = true;
        self
    }

    /// Non-parameter locals
    pub fn locals(mut self, names: &[&str]) -> Self {
        self.record.varnames.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn cellvars(mut self, names: &[&str]) -> Self {
        self.record.cellvars = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn freevars(mut self, names: &[&str]) -> Self {
        self.record.freevars = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn names(mut self, names: &[&str]) -> Self {
        self.record.names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn constants(mut self, constants: Vec<Constant>) -> Self {
        self.record.constants = constants;
        self
    }

    pub fn annotate(mut self, name: &str, type_name: &str) -> Self {
        self.record.annotations.insert(name.to_string(), type_name.to_string());
        self
    }

    pub fn generator(mut self) -> Self {
        self.record.kind = CodeKind::Generator;
        self
    }

    /// Line attached to subsequent instructions
    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn op(mut self, opname: &str, arg: u32) -> Self {
        self.record.instructions.push(RawInstruction { opname: opname.to_string(), arg, line: self.line });
        self
    }

    /// Add a 3.11+ exception-table row
    pub fn handler(mut self, start: usize, end: usize, target: usize, depth: u16, lasti: bool) -> Self {
        self.record.exception_table.push(ExceptionTableEntry { start, end, target, depth, lasti });
        self
    }

    pub fn build(self) -> FunctionRecord {
        self.record
    }
}
