//! Function signatures and overload resolution.

use std::sync::Arc;

use super::registry::TypeRegistry;
use super::TypeId;
use crate::target::Opcode as TargetOp;

/// How a resolved call is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// A single typed target opcode
    Intrinsic(TargetOp),
    /// Runtime dispatch through the dunder protocol
    Virtual,
    /// A method call on a runtime object
    Runtime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: Arc<str>,
    /// Parameter types, receiver excluded
    pub params: Vec<TypeId>,
    pub varargs: bool,
    pub ret: TypeId,
    pub emission: Emission,
}

impl FunctionSignature {
    pub fn new(name: impl Into<Arc<str>>, params: Vec<TypeId>, ret: TypeId, emission: Emission) -> Self {
        Self { name: name.into(), params, varargs: false, ret, emission }
    }

    pub fn with_varargs(mut self) -> Self {
        self.varargs = true;
        self
    }

    /// Whether every argument is assignable to its parameter
    pub fn is_applicable(&self, registry: &TypeRegistry, args: &[TypeId]) -> bool {
        if args.len() < self.params.len() || (!self.varargs && args.len() != self.params.len()) {
            return false;
        }
        self.params.iter().zip(args).all(|(&param, &arg)| registry.is_subclass(arg, param))
    }

    /// Whether every parameter of `self` is a subtype of the matching one in `other`
    pub fn is_more_specific_than(&self, registry: &TypeRegistry, other: &FunctionSignature) -> bool {
        self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(&a, &b)| registry.is_subclass(a, b))
    }
}

/// All overloads of one method name visible from a type
///
/// Overloads are ordered by declaring type, most specific type first.
#[derive(Debug, Clone)]
pub struct OverloadSet {
    pub name: Arc<str>,
    pub owner: TypeId,
    pub overloads: Vec<(TypeId, FunctionSignature)>,
}

impl OverloadSet {
    /// Pick the most specific applicable overload
    ///
    /// Among applicable candidates the first one that is at least as specific
    /// as every other wins; declaration order breaks ties.
    pub fn resolve(&self, registry: &TypeRegistry, args: &[TypeId]) -> Option<&FunctionSignature> {
        let applicable: Vec<&FunctionSignature> = self
            .overloads
            .iter()
            .map(|(_, sig)| sig)
            .filter(|sig| sig.is_applicable(registry, args))
            .collect();
        applicable
            .iter()
            .find(|candidate| applicable.iter().all(|other| candidate.is_more_specific_than(registry, other)))
            .or_else(|| applicable.first())
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.overloads.is_empty()
    }
}
