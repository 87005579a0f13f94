//! Version dispatch table.
//!
//! Each opcode name owns two independent `BTreeMap`s keyed by the first
//! dialect an entry applies to: one for the node factory, one for the jump
//! rule. Lookups take the floor entry for the requested version; a `None`
//! factory marks the opcode as removed from that version on.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use super::jump::JumpRule;
use super::{families, DecodeError, DecodeResult};
use crate::opcodes::OpcodeFactory;
use crate::source::DialectVersion;

/// The resolved entry for one opcode in one dialect
#[derive(Clone, Copy)]
pub struct OpcodeEntry {
    pub factory: OpcodeFactory,
    pub jump: JumpRule,
}

#[derive(Default)]
struct Descriptor {
    factories: BTreeMap<DialectVersion, Option<OpcodeFactory>>,
    jumps: BTreeMap<DialectVersion, JumpRule>,
}

#[derive(Default)]
pub struct DispatchTable {
    descriptors: HashMap<&'static str, Descriptor>,
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder { table: DispatchTable::default() }
    }

    /// Floor lookup of an opcode's factory and jump rule
    pub fn lookup(&self, opname: &str, version: DialectVersion, offset: usize) -> DecodeResult<OpcodeEntry> {
        let descriptor = self
            .descriptors
            .get(opname)
            .ok_or_else(|| DecodeError::UnknownOpcode { opname: opname.to_string(), offset })?;
        let factory = descriptor
            .factories
            .range(..=version)
            .next_back()
            .and_then(|(_, factory)| *factory)
            .ok_or_else(|| DecodeError::UnsupportedOpcode { opname: opname.to_string(), version, offset })?;
        Ok(OpcodeEntry { factory, jump: self.jump_rule(opname, version) })
    }

    /// Jump rule in effect for an opcode, `JumpRule::None` when it never jumps
    pub fn jump_rule(&self, opname: &str, version: DialectVersion) -> JumpRule {
        self.descriptors
            .get(opname)
            .and_then(|d| d.jumps.range(..=version).next_back())
            .map_or(JumpRule::None, |(_, rule)| *rule)
    }

    pub fn contains(&self, opname: &str) -> bool {
        self.descriptors.contains_key(opname)
    }

    pub fn opnames(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.keys().copied()
    }

    /// Whether the opcode decodes in the given dialect
    pub fn supports(&self, opname: &str, version: DialectVersion) -> bool {
        self.lookup(opname, version, 0).is_ok()
    }
}

pub struct DispatchTableBuilder {
    table: DispatchTable,
}

impl DispatchTableBuilder {
    /// Start (or continue) the registration of an opcode name
    pub fn op(&mut self, opname: &'static str) -> Registration<'_> {
        Registration { descriptor: self.table.descriptors.entry(opname).or_default() }
    }

    /// Register an opcode valid in every dialect with no jump
    pub fn simple(&mut self, opname: &'static str, factory: OpcodeFactory) {
        self.op(opname).since(DialectVersion::MIN, factory);
    }

    pub fn build(self) -> DispatchTable {
        self.table
    }
}

pub struct Registration<'a> {
    descriptor: &'a mut Descriptor,
}

impl Registration<'_> {
    pub fn since(self, version: DialectVersion, factory: OpcodeFactory) -> Self {
        self.descriptor.factories.insert(version, Some(factory));
        self
    }

    pub fn removed_in(self, version: DialectVersion) -> Self {
        self.descriptor.factories.insert(version, None);
        self
    }

    pub fn jump(self, version: DialectVersion, rule: JumpRule) -> Self {
        self.descriptor.jumps.insert(version, rule);
        self
    }
}

/// The process-wide dispatch table
pub fn dispatch_table() -> &'static DispatchTable {
    static TABLE: OnceLock<DispatchTable> = OnceLock::new();
    TABLE.get_or_init(families::build)
}
