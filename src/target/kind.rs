//! Operand kinds tracked by the verifier.
//!
//! Kinds form a small lattice: `Any` on top, `Bool` below `Int`, every other
//! kind directly below `Any`. A `Cast` narrows `Any` to a precise kind and is
//! checked at runtime.

use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Any = 0,
    Int = 1,
    Float = 2,
    Str = 3,
    None = 4,
    Bool = 5,
}

impl ValueKind {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Any),
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Str),
            4 => Some(Self::None),
            5 => Some(Self::Bool),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether a value of kind `self` may flow where `expected` is required
    #[inline]
    pub fn is_assignable_to(self, expected: ValueKind) -> bool {
        expected == ValueKind::Any || self == expected || (self == ValueKind::Bool && expected == ValueKind::Int)
    }

    /// Least upper bound of two kinds
    pub fn join(self, other: ValueKind) -> ValueKind {
        if self == other {
            self
        } else if self.is_assignable_to(other) {
            other
        } else if other.is_assignable_to(self) {
            self
        } else {
            ValueKind::Any
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::None => "none",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
