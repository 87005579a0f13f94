//! Source-language operators and their dunder protocol names.

use std::fmt;

/// Binary operators in `BINARY_OP` argument order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add = 0,
    And = 1,
    FloorDivide = 2,
    LShift = 3,
    MatMul = 4,
    Multiply = 5,
    Remainder = 6,
    Or = 7,
    Power = 8,
    RShift = 9,
    Subtract = 10,
    TrueDivide = 11,
    Xor = 12,
}

const BINARY_OPERATORS: [BinaryOperator; 13] = [
    BinaryOperator::Add,
    BinaryOperator::And,
    BinaryOperator::FloorDivide,
    BinaryOperator::LShift,
    BinaryOperator::MatMul,
    BinaryOperator::Multiply,
    BinaryOperator::Remainder,
    BinaryOperator::Or,
    BinaryOperator::Power,
    BinaryOperator::RShift,
    BinaryOperator::Subtract,
    BinaryOperator::TrueDivide,
    BinaryOperator::Xor,
];

impl BinaryOperator {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        BINARY_OPERATORS.get(byte as usize).copied()
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Decode a 3.11+ `BINARY_OP` argument into (operator, in-place)
    pub fn from_binary_op_arg(arg: u32) -> Option<(Self, bool)> {
        match arg {
            0..=12 => Self::from_byte(arg as u8).map(|op| (op, false)),
            13..=25 => Self::from_byte((arg - 13) as u8).map(|op| (op, true)),
            _ => None,
        }
    }

    /// Decode a pre-3.11 `BINARY_*` / `INPLACE_*` opcode name into (operator, in-place)
    pub fn from_legacy_opname(opname: &str) -> Option<(Self, bool)> {
        let (suffix, inplace) = if let Some(rest) = opname.strip_prefix("BINARY_") {
            (rest, false)
        } else if let Some(rest) = opname.strip_prefix("INPLACE_") {
            (rest, true)
        } else {
            return None;
        };
        let op = match suffix {
            "ADD" => Self::Add,
            "AND" => Self::And,
            "FLOOR_DIVIDE" => Self::FloorDivide,
            "LSHIFT" => Self::LShift,
            "MATRIX_MULTIPLY" => Self::MatMul,
            "MULTIPLY" => Self::Multiply,
            "MODULO" => Self::Remainder,
            "OR" => Self::Or,
            "POWER" => Self::Power,
            "RSHIFT" => Self::RShift,
            "SUBTRACT" => Self::Subtract,
            "TRUE_DIVIDE" => Self::TrueDivide,
            "XOR" => Self::Xor,
            _ => return None,
        };
        Some((op, inplace))
    }

    pub fn dunder(self) -> &'static str {
        match self {
            Self::Add => "__add__",
            Self::And => "__and__",
            Self::FloorDivide => "__floordiv__",
            Self::LShift => "__lshift__",
            Self::MatMul => "__matmul__",
            Self::Multiply => "__mul__",
            Self::Remainder => "__mod__",
            Self::Or => "__or__",
            Self::Power => "__pow__",
            Self::RShift => "__rshift__",
            Self::Subtract => "__sub__",
            Self::TrueDivide => "__truediv__",
            Self::Xor => "__xor__",
        }
    }

    pub fn reflected_dunder(self) -> &'static str {
        match self {
            Self::Add => "__radd__",
            Self::And => "__rand__",
            Self::FloorDivide => "__rfloordiv__",
            Self::LShift => "__rlshift__",
            Self::MatMul => "__rmatmul__",
            Self::Multiply => "__rmul__",
            Self::Remainder => "__rmod__",
            Self::Or => "__ror__",
            Self::Power => "__rpow__",
            Self::RShift => "__rrshift__",
            Self::Subtract => "__rsub__",
            Self::TrueDivide => "__rtruediv__",
            Self::Xor => "__rxor__",
        }
    }

    pub fn inplace_dunder(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::And => "__iand__",
            Self::FloorDivide => "__ifloordiv__",
            Self::LShift => "__ilshift__",
            Self::MatMul => "__imatmul__",
            Self::Multiply => "__imul__",
            Self::Remainder => "__imod__",
            Self::Or => "__ior__",
            Self::Power => "__ipow__",
            Self::RShift => "__irshift__",
            Self::Subtract => "__isub__",
            Self::TrueDivide => "__itruediv__",
            Self::Xor => "__ixor__",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::And => "&",
            Self::FloorDivide => "//",
            Self::LShift => "<<",
            Self::MatMul => "@",
            Self::Multiply => "*",
            Self::Remainder => "%",
            Self::Or => "|",
            Self::Power => "**",
            Self::RShift => ">>",
            Self::Subtract => "-",
            Self::TrueDivide => "/",
            Self::Xor => "^",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Rich comparison operators in `COMPARE_OP` order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOperator {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
}

impl CompareOperator {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Lt),
            1 => Some(Self::Le),
            2 => Some(Self::Eq),
            3 => Some(Self::Ne),
            4 => Some(Self::Gt),
            5 => Some(Self::Ge),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Decode a `COMPARE_OP` argument; from 3.12 the operator sits in the high bits
    pub fn from_arg(arg: u32, shifted: bool) -> Option<Self> {
        let index = if shifted { arg >> 4 } else { arg };
        u8::try_from(index).ok().and_then(Self::from_byte)
    }

    pub fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// Operator to try on the right operand when the left declines
    pub fn mirrored(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Positive = 0,
    Negative = 1,
    Invert = 2,
    Not = 3,
}

impl UnaryOperator {
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Positive),
            1 => Some(Self::Negative),
            2 => Some(Self::Invert),
            3 => Some(Self::Not),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_opname(opname: &str) -> Option<Self> {
        match opname {
            "UNARY_POSITIVE" => Some(Self::Positive),
            "UNARY_NEGATIVE" => Some(Self::Negative),
            "UNARY_INVERT" => Some(Self::Invert),
            "UNARY_NOT" => Some(Self::Not),
            _ => None,
        }
    }

    /// Dunder implementing the operator; `not` goes through truthiness instead
    pub fn dunder(self) -> Option<&'static str> {
        match self {
            Self::Positive => Some("__pos__"),
            Self::Negative => Some("__neg__"),
            Self::Invert => Some("__invert__"),
            Self::Not => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_op_arg_decoding() {
        assert_eq!(BinaryOperator::from_binary_op_arg(0), Some((BinaryOperator::Add, false)));
        assert_eq!(BinaryOperator::from_binary_op_arg(10), Some((BinaryOperator::Subtract, false)));
        assert_eq!(BinaryOperator::from_binary_op_arg(23), Some((BinaryOperator::Subtract, true)));
        assert_eq!(BinaryOperator::from_binary_op_arg(25), Some((BinaryOperator::Xor, true)));
        assert_eq!(BinaryOperator::from_binary_op_arg(26), None);
    }

    #[test]
    fn test_legacy_opnames() {
        assert_eq!(BinaryOperator::from_legacy_opname("BINARY_MODULO"), Some((BinaryOperator::Remainder, false)));
        assert_eq!(BinaryOperator::from_legacy_opname("INPLACE_ADD"), Some((BinaryOperator::Add, true)));
        assert_eq!(BinaryOperator::from_legacy_opname("BINARY_SUBSCR"), None);
    }

    #[test]
    fn test_compare_decoding_and_mirroring() {
        assert_eq!(CompareOperator::from_arg(4, false), Some(CompareOperator::Gt));
        assert_eq!(CompareOperator::from_arg(2 << 4 | 0b1010, true), Some(CompareOperator::Eq));
        assert_eq!(CompareOperator::Lt.mirrored(), CompareOperator::Gt);
        assert_eq!(CompareOperator::Ne.mirrored(), CompareOperator::Ne);
    }
}
