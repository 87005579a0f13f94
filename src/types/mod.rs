//! Type lattice and dispatch resolution.
//!
//! - `builtin`: the builtin type ids and their declared method tables
//! - `registry`: the `TypeRegistry` DAG with subclass tests and `unify`
//! - `signature`: function signatures, emission strategies and overload sets
//! - `operators`: source operator tables and their dunder names
//! - `resolve`: binary/unary/comparison resolution with reflected fallback

use std::fmt;
use std::sync::Arc;

pub mod builtin;
pub mod operators;
pub mod registry;
pub mod resolve;
pub mod signature;

pub use operators::{BinaryOperator, CompareOperator, UnaryOperator};
pub use registry::{FieldDescriptor, PyType, TypeKind, TypeRegistry};
pub use resolve::{resolve_binary, resolve_compare, resolve_unary, BinaryResolution, UnaryResolution};
pub use signature::{Emission, FunctionSignature, OverloadSet};

/// Index of a type in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match builtin::builtin_name(*self) {
            Some(name) => f.write_str(name),
            None => write!(f, "#{}", self.0),
        }
    }
}

/// Errors raised while registering or resolving types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeResolutionError {
    /// A field redeclaration narrows or changes an inherited field's type
    IncompatibleField { owner: Arc<str>, field: Arc<str>, existing: Arc<str>, new: Arc<str> },
    /// A required method has no implementation on the type
    MissingMethod { owner: Arc<str>, method: Arc<str> },
    /// A type name could not be resolved
    UnknownType(Arc<str>),
    /// A class declares a base that cannot be subclassed
    InvalidBase { class: Arc<str>, base: Arc<str> },
}

impl fmt::Display for TypeResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleField { owner, field, existing, new } => write!(
                f,
                "Field {}.{} declared as {} is incompatible with inherited type {}",
                owner, field, new, existing
            ),
            Self::MissingMethod { owner, method } => write!(f, "Type {} has no method {}", owner, method),
            Self::UnknownType(name) => write!(f, "Unknown type: {}", name),
            Self::InvalidBase { class, base } => write!(f, "Class {} cannot subclass {}", class, base),
        }
    }
}

impl std::error::Error for TypeResolutionError {}
