//! Arithmetic operations for the bytecode VM.
//!
//! Typed instructions (`AddInt`, `MulFloat`, ...) work on operands the
//! verifier already proved to be of the right kind; integers are 64 bit and
//! overflow raises `OverflowError`. `BinaryOp`, `InplaceOp`, `UnaryOp` and
//! `InvokeDunder` implement the dynamic operator protocol: builtin rules
//! first, then the left operand's dunder, then the right operand's reflected
//! dunder.

use std::sync::Arc;

use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::{Table, Value};
use crate::target::{Opcode, ValueKind};
use crate::types::builtin::{self, ATTRIBUTE_ERROR, OVERFLOW_ERROR, TYPE_ERROR, VALUE_ERROR, ZERO_DIVISION_ERROR};
use crate::types::{BinaryOperator, CompareOperator, UnaryOperator};

const BINARY_OPERATOR_COUNT: u8 = 13;
const COMPARE_OPERATOR_COUNT: u8 = 6;

fn overflow() -> VmError {
    VmError::raise(OVERFLOW_ERROR, "integer result does not fit in 64 bits")
}

fn int_zero_division() -> VmError {
    VmError::raise(ZERO_DIVISION_ERROR, "integer division or modulo by zero")
}

/// Floor division with the sign of the divisor, as the source language defines it
pub(super) fn floor_div(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(int_zero_division());
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Remainder with the sign of the divisor
pub(super) fn floor_mod(a: i64, b: i64) -> VmResult<i64> {
    if b == 0 {
        return Err(int_zero_division());
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

fn shift_left(a: i64, b: i64) -> VmResult<i64> {
    if b < 0 {
        return Err(VmError::raise(VALUE_ERROR, "negative shift count"));
    }
    if a == 0 {
        return Ok(0);
    }
    if b >= 63 {
        return Err(overflow());
    }
    let shifted = a << b;
    if shifted >> b != a {
        return Err(overflow());
    }
    Ok(shifted)
}

fn shift_right(a: i64, b: i64) -> VmResult<i64> {
    if b < 0 {
        return Err(VmError::raise(VALUE_ERROR, "negative shift count"));
    }
    Ok(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
}

fn int_binary(op: BinaryOperator, a: i64, b: i64) -> VmResult<Option<Value>> {
    let result = match op {
        BinaryOperator::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOperator::Subtract => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOperator::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOperator::FloorDivide => floor_div(a, b)?,
        BinaryOperator::Remainder => floor_mod(a, b)?,
        BinaryOperator::TrueDivide => {
            if b == 0 {
                return Err(VmError::raise(ZERO_DIVISION_ERROR, "division by zero"));
            }
            return Ok(Some(Value::Float(a as f64 / b as f64)));
        }
        BinaryOperator::Power => {
            if b < 0 {
                return Ok(Some(Value::Float((a as f64).powf(b as f64))));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinaryOperator::LShift => shift_left(a, b)?,
        BinaryOperator::RShift => shift_right(a, b)?,
        BinaryOperator::And => a & b,
        BinaryOperator::Or => a | b,
        BinaryOperator::Xor => a ^ b,
        BinaryOperator::MatMul => return Ok(None),
    };
    Ok(Some(Value::Int(result)))
}

fn float_binary(op: BinaryOperator, a: f64, b: f64) -> VmResult<Option<Value>> {
    let result = match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::TrueDivide => {
            if b == 0.0 {
                return Err(VmError::raise(ZERO_DIVISION_ERROR, "float division by zero"));
            }
            a / b
        }
        BinaryOperator::FloorDivide => {
            if b == 0.0 {
                return Err(VmError::raise(ZERO_DIVISION_ERROR, "float floor division by zero"));
            }
            (a / b).floor()
        }
        BinaryOperator::Remainder => {
            if b == 0.0 {
                return Err(VmError::raise(ZERO_DIVISION_ERROR, "float modulo"));
            }
            float_mod(a, b)
        }
        BinaryOperator::Power => a.powf(b),
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(result)))
}

fn repeat<T: Clone>(items: &[T], count: i64) -> Vec<T> {
    let count = usize::try_from(count).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len().saturating_mul(count));
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    out
}

fn set_binary(op: BinaryOperator, a: &Table, b: &Table) -> Option<Table> {
    let mut out = Table::new();
    let mut keep = |key: &Value| {
        if let Some(hash) = key.hash_key() {
            out.insert(hash, key.clone(), Value::None);
        }
    };
    let in_b = |key: &Value| key.hash_key().is_some_and(|h| b.contains(&h));
    let in_a = |key: &Value| key.hash_key().is_some_and(|h| a.contains(&h));
    match op {
        BinaryOperator::Or => {
            a.items().iter().chain(b.items()).for_each(|(k, _)| keep(k));
        }
        BinaryOperator::And => a.items().iter().filter(|(k, _)| in_b(k)).for_each(|(k, _)| keep(k)),
        BinaryOperator::Subtract => a.items().iter().filter(|(k, _)| !in_b(k)).for_each(|(k, _)| keep(k)),
        BinaryOperator::Xor => {
            a.items().iter().filter(|(k, _)| !in_b(k)).for_each(|(k, _)| keep(k));
            b.items().iter().filter(|(k, _)| !in_a(k)).for_each(|(k, _)| keep(k));
        }
        _ => return None,
    }
    Some(out)
}

/// Operator semantics of the builtin value types, `None` when they do not apply
fn builtin_binary(op: BinaryOperator, left: &Value, right: &Value) -> VmResult<Option<Value>> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) if matches!(op, BinaryOperator::And | BinaryOperator::Or | BinaryOperator::Xor) => {
            let result = match op {
                BinaryOperator::And => *a & *b,
                BinaryOperator::Or => *a | *b,
                _ => *a ^ *b,
            };
            Ok(Some(Value::Bool(result)))
        }
        (Value::Float(_), _) | (_, Value::Float(_)) => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => float_binary(op, a, b),
            _ => Ok(None),
        },
        (Value::Str(a), Value::Str(b)) if op == BinaryOperator::Add => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Some(Value::from(s)))
        }
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinaryOperator::Multiply && n.as_int().is_some() => {
            let count = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            Ok(Some(Value::from(s.repeat(count))))
        }
        (Value::List(a), Value::List(b)) if op == BinaryOperator::Add => {
            let mut items = a.read().clone();
            items.extend(b.read().iter().cloned());
            Ok(Some(Value::list(items)))
        }
        (Value::List(items), n) | (n, Value::List(items)) if op == BinaryOperator::Multiply && n.as_int().is_some() => {
            let items = items.read();
            Ok(Some(Value::list(repeat(items.as_slice(), n.as_int().unwrap_or(0)))))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinaryOperator::Add => {
            Ok(Some(Value::tuple(a.iter().chain(b.iter()).cloned().collect())))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items)) if op == BinaryOperator::Multiply && n.as_int().is_some() => {
            Ok(Some(Value::tuple(repeat(&items[..], n.as_int().unwrap_or(0)))))
        }
        (Value::Dict(a), Value::Dict(b)) if op == BinaryOperator::Or => {
            let mut merged = a.read().clone();
            for (k, v) in b.read().items() {
                if let Some(hash) = k.hash_key() {
                    merged.insert(hash, k.clone(), v.clone());
                }
            }
            Ok(Some(Value::dict(merged)))
        }
        (Value::Set(a), Value::Set(b)) => {
            let result = if Arc::ptr_eq(a, b) {
                let table = a.read();
                set_binary(op, &table, &table)
            } else {
                set_binary(op, &a.read(), &b.read())
            };
            Ok(result.map(Value::set))
        }
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => int_binary(op, a, b),
            _ => Ok(None),
        },
    }
}

/// Name of a builtin type for a kind error
pub(super) fn kind_name(value: &Value) -> &'static str {
    builtin::builtin_name(value.type_id()).unwrap_or("object")
}

impl BytecodeVM {
    // === Typed operand access ===

    pub(super) fn pop_int(&mut self) -> VmResult<i64> {
        let value = self.pop()?;
        value.as_int().ok_or(VmError::CastFailed { expected: ValueKind::Int, found: kind_name(&value) })
    }

    pub(super) fn pop_float(&mut self) -> VmResult<f64> {
        match self.pop()? {
            Value::Float(f) => Ok(f),
            other => Err(VmError::CastFailed { expected: ValueKind::Float, found: kind_name(&other) }),
        }
    }

    fn pop_str(&mut self) -> VmResult<Arc<str>> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(VmError::CastFailed { expected: ValueKind::Str, found: kind_name(&other) }),
        }
    }

    // === Typed Arithmetic ===

    pub(super) fn op_int_arith(&mut self, opcode: Opcode) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = match opcode {
            Opcode::AddInt => a.checked_add(b).ok_or_else(overflow)?,
            Opcode::SubInt => a.checked_sub(b).ok_or_else(overflow)?,
            Opcode::MulInt => a.checked_mul(b).ok_or_else(overflow)?,
            Opcode::FloorDivInt => floor_div(a, b)?,
            Opcode::ModInt => floor_mod(a, b)?,
            other => return Err(VmError::InvalidOpcode(other as u8)),
        };
        self.push(Value::Int(result));
        Ok(())
    }

    pub(super) fn op_neg_int(&mut self) -> VmResult<()> {
        let a = self.pop_int()?;
        self.push(Value::Int(a.checked_neg().ok_or_else(overflow)?));
        Ok(())
    }

    pub(super) fn op_float_arith(&mut self, opcode: Opcode) -> VmResult<()> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        let result = match opcode {
            Opcode::AddFloat => a + b,
            Opcode::SubFloat => a - b,
            Opcode::MulFloat => a * b,
            Opcode::TrueDivFloat => {
                if b == 0.0 {
                    return Err(VmError::raise(ZERO_DIVISION_ERROR, "float division by zero"));
                }
                a / b
            }
            other => return Err(VmError::InvalidOpcode(other as u8)),
        };
        self.push(Value::Float(result));
        Ok(())
    }

    pub(super) fn op_neg_float(&mut self) -> VmResult<()> {
        let a = self.pop_float()?;
        self.push(Value::Float(-a));
        Ok(())
    }

    pub(super) fn op_concat_str(&mut self) -> VmResult<()> {
        let b = self.pop_str()?;
        let a = self.pop_str()?;
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(&a);
        s.push_str(&b);
        self.push(Value::from(s));
        Ok(())
    }

    // === Dynamic Dispatch ===

    pub(super) fn op_binary(&mut self) -> VmResult<()> {
        let byte = self.read_u8()?;
        let op = BinaryOperator::from_byte(byte).ok_or_else(|| self.invalid_operand(u32::from(byte)))?;
        let right = self.pop()?;
        let left = self.pop()?;
        let result = self.binary_op(op, left, right)?;
        self.push(result);
        Ok(())
    }

    pub(super) fn op_inplace(&mut self) -> VmResult<()> {
        let byte = self.read_u8()?;
        let op = BinaryOperator::from_byte(byte).ok_or_else(|| self.invalid_operand(u32::from(byte)))?;
        let right = self.pop()?;
        let left = self.pop()?;
        let result = self.inplace_op(op, left, right)?;
        self.push(result);
        Ok(())
    }

    pub(super) fn op_unary(&mut self) -> VmResult<()> {
        let byte = self.read_u8()?;
        let op = UnaryOperator::from_byte(byte).ok_or_else(|| self.invalid_operand(u32::from(byte)))?;
        let operand = self.pop()?;
        let result = self.unary_op(op, operand)?;
        self.push(result);
        Ok(())
    }

    /// `receiver.name(arg)` with the receiver below the argument
    pub(super) fn op_invoke_dunder(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let arg = self.pop()?;
        let receiver = self.pop()?;
        let result = self.invoke_dunder(receiver, &name, arg)?;
        self.push(result);
        Ok(())
    }

    /// `left op right` under the full operator protocol
    pub fn binary_op(&mut self, op: BinaryOperator, left: Value, right: Value) -> VmResult<Value> {
        if let Some(result) = builtin_binary(op, &left, &right)? {
            return Ok(result);
        }
        if let Some(result) = self.call_dunder(&left, op.dunder(), vec![right.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if left.type_id() != right.type_id() {
            if let Some(result) = self.call_dunder(&right, op.reflected_dunder(), vec![left.clone()])? {
                if !matches!(result, Value::NotImplemented) {
                    return Ok(result);
                }
            }
        }
        Err(VmError::raise(
            TYPE_ERROR,
            format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                self.type_name(&left),
                self.type_name(&right)
            ),
        ))
    }

    /// Augmented assignment: mutable builtins update in place
    pub(super) fn inplace_op(&mut self, op: BinaryOperator, left: Value, right: Value) -> VmResult<Value> {
        match (&left, op) {
            (Value::List(list), BinaryOperator::Add) => {
                let items = self.collect_items(&right)?;
                list.write().extend(items);
                return Ok(left);
            }
            (Value::List(list), BinaryOperator::Multiply) => {
                if let Some(count) = right.as_int() {
                    let repeated = repeat(list.read().as_slice(), count);
                    *list.write() = repeated;
                    return Ok(left);
                }
            }
            (Value::Dict(_), BinaryOperator::Or) if matches!(right, Value::Dict(_)) => {
                self.merge_mapping(&left, &right)?;
                return Ok(left);
            }
            (Value::Set(set), BinaryOperator::Or | BinaryOperator::And | BinaryOperator::Subtract | BinaryOperator::Xor) => {
                if let Value::Set(other) = &right {
                    let updated = if Arc::ptr_eq(set, other) {
                        let table = set.read();
                        set_binary(op, &table, &table)
                    } else {
                        set_binary(op, &set.read(), &other.read())
                    };
                    if let Some(table) = updated {
                        *set.write() = table;
                        return Ok(left);
                    }
                }
            }
            _ => {}
        }
        if let Some(result) = self.call_dunder(&left, op.inplace_dunder(), vec![right.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        self.binary_op(op, left, right)
    }

    pub(super) fn unary_op(&mut self, op: UnaryOperator, operand: Value) -> VmResult<Value> {
        let builtin = match (op, &operand) {
            (UnaryOperator::Not, _) => return Ok(Value::Bool(!self.truthy(&operand)?)),
            (UnaryOperator::Negative, Value::Float(f)) => Some(Value::Float(-f)),
            (UnaryOperator::Positive, Value::Float(f)) => Some(Value::Float(*f)),
            (UnaryOperator::Negative, v) => v.as_int().map(|n| n.checked_neg().map(Value::Int).ok_or_else(overflow)).transpose()?,
            (UnaryOperator::Positive, v) => v.as_int().map(Value::Int),
            (UnaryOperator::Invert, v) => v.as_int().map(|n| Value::Int(!n)),
        };
        if let Some(value) = builtin {
            return Ok(value);
        }
        if let Some(dunder) = op.dunder() {
            if let Some(result) = self.call_dunder(&operand, dunder, Vec::new())? {
                return Ok(result);
            }
        }
        let symbol = match op {
            UnaryOperator::Positive => "+",
            UnaryOperator::Negative => "-",
            UnaryOperator::Invert => "~",
            UnaryOperator::Not => "not",
        };
        Err(VmError::raise(TYPE_ERROR, format!("bad operand type for unary {}: '{}'", symbol, self.type_name(&operand))))
    }

    /// Call dunder `name` on `receiver`, mapping protocol names onto builtin semantics
    pub(super) fn invoke_dunder(&mut self, receiver: Value, name: &str, arg: Value) -> VmResult<Value> {
        if let Some(result) = self.call_dunder(&receiver, name, vec![arg.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        for op in (0..BINARY_OPERATOR_COUNT).filter_map(BinaryOperator::from_byte) {
            if op.reflected_dunder() == name {
                return self.binary_op(op, arg, receiver);
            }
            if op.dunder() == name {
                return self.binary_op(op, receiver, arg);
            }
            if op.inplace_dunder() == name {
                return self.inplace_op(op, receiver, arg);
            }
        }
        for op in (0..COMPARE_OPERATOR_COUNT).filter_map(CompareOperator::from_byte) {
            if op.dunder() == name {
                return self.compare(op, receiver, arg);
            }
        }
        match name {
            "__contains__" => Ok(Value::Bool(self.contains(&receiver, &arg)?)),
            "__getitem__" => self.get_item(receiver, arg),
            _ => Err(VmError::raise(
                ATTRIBUTE_ERROR,
                format!("'{}' object has no attribute '{}'", self.type_name(&receiver), name),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_semantics_follow_divisor_sign() {
        assert_eq!(floor_div(7, 2).ok(), Some(3));
        assert_eq!(floor_div(-7, 2).ok(), Some(-4));
        assert_eq!(floor_mod(-7, 2).ok(), Some(1));
        assert_eq!(floor_mod(7, -2).ok(), Some(-1));
        assert!(floor_div(1, 0).is_err());
        assert!(floor_div(i64::MIN, -1).is_err());
        assert_eq!(float_mod(-7.0, 2.0), 1.0);
    }

    #[test]
    fn test_shifts_detect_overflow() {
        assert_eq!(shift_left(1, 62).ok(), Some(1 << 62));
        assert!(shift_left(1, 63).is_err());
        assert!(shift_left(3, 62).is_err());
        assert_eq!(shift_right(-8, 100).ok(), Some(-1));
        assert!(shift_right(1, -1).is_err());
    }

    #[test]
    fn test_builtin_sequences_and_sets() {
        let joined = builtin_binary(BinaryOperator::Add, &Value::from("ab"), &Value::from("c")).ok().flatten();
        assert_eq!(joined, Some(Value::from("abc")));
        let repeated = builtin_binary(BinaryOperator::Multiply, &Value::Int(2), &Value::list(vec![Value::Int(1)]))
            .ok()
            .flatten();
        assert_eq!(repeated, Some(Value::list(vec![Value::Int(1), Value::Int(1)])));
        let bits = builtin_binary(BinaryOperator::And, &Value::Bool(true), &Value::Bool(false)).ok().flatten();
        assert!(matches!(bits, Some(Value::Bool(false))));
        let none = builtin_binary(BinaryOperator::Subtract, &Value::from("a"), &Value::Int(1)).ok().flatten();
        assert!(none.is_none());
    }
}
