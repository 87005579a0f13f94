//! Comparison and truth-value operations for the bytecode VM.
//!
//! Typed integer comparisons, the dynamic `CompareOp` protocol, identity,
//! membership, kind casts and exception matching.

use std::cmp::Ordering;

use super::arithmetic::kind_name;
use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::Value;
use crate::target::{Opcode, ValueKind};
use crate::types::builtin::{BASE_EXCEPTION, TYPE_ERROR};
use crate::types::CompareOperator;

fn ordering_satisfies(op: CompareOperator, ordering: Ordering) -> bool {
    match op {
        CompareOperator::Lt => ordering == Ordering::Less,
        CompareOperator::Le => ordering != Ordering::Greater,
        CompareOperator::Eq => ordering == Ordering::Equal,
        CompareOperator::Ne => ordering != Ordering::Equal,
        CompareOperator::Gt => ordering == Ordering::Greater,
        CompareOperator::Ge => ordering != Ordering::Less,
    }
}

impl BytecodeVM {
    pub(super) fn op_int_compare(&mut self, opcode: Opcode) -> VmResult<()> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = match opcode {
            Opcode::LtInt => a < b,
            Opcode::LeInt => a <= b,
            Opcode::GtInt => a > b,
            Opcode::GeInt => a >= b,
            Opcode::EqInt => a == b,
            Opcode::NeInt => a != b,
            other => return Err(VmError::InvalidOpcode(other as u8)),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    pub(super) fn op_not(&mut self) -> VmResult<()> {
        match self.pop()? {
            Value::Bool(b) => {
                self.push(Value::Bool(!b));
                Ok(())
            }
            other => Err(VmError::CastFailed { expected: ValueKind::Bool, found: kind_name(&other) }),
        }
    }

    /// Check TOS against a kind; null passes so unbound markers survive casts
    pub(super) fn op_cast(&mut self) -> VmResult<()> {
        let byte = self.read_u8()?;
        let expected = ValueKind::from_byte(byte).ok_or_else(|| self.invalid_operand(u32::from(byte)))?;
        let value = self.peek()?;
        if value.is_null() || value.kind().is_assignable_to(expected) {
            Ok(())
        } else {
            Err(VmError::CastFailed { expected, found: kind_name(value) })
        }
    }

    pub(super) fn op_truthy(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let result = self.truthy(&value)?;
        self.push(Value::Bool(result));
        Ok(())
    }

    pub(super) fn op_compare(&mut self) -> VmResult<()> {
        let byte = self.read_u8()?;
        let op = CompareOperator::from_byte(byte).ok_or_else(|| self.invalid_operand(u32::from(byte)))?;
        let right = self.pop()?;
        let left = self.pop()?;
        let result = self.compare(op, left, right)?;
        self.push(result);
        Ok(())
    }

    pub(super) fn op_is(&mut self) -> VmResult<()> {
        let invert = self.read_u8()? != 0;
        let right = self.pop()?;
        let left = self.pop()?;
        self.push(Value::Bool(left.is_identical(&right) != invert));
        Ok(())
    }

    /// `left in right`, inverted for `not in`
    pub(super) fn op_contains(&mut self) -> VmResult<()> {
        let invert = self.read_u8()? != 0;
        let container = self.pop()?;
        let item = self.pop()?;
        let found = self.contains(&container, &item)?;
        self.push(Value::Bool(found != invert));
        Ok(())
    }

    pub(super) fn op_type_of(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        self.push(Value::Type(value.type_id()));
        Ok(())
    }

    /// `[exc, spec]` -> whether `exc` is an instance of `spec` (a class or tuple of classes)
    pub(super) fn op_exc_match(&mut self) -> VmResult<()> {
        let spec = self.pop()?;
        let exc = self.pop()?;
        let matched = self.exception_matches(&exc, &spec)?;
        self.push(Value::Bool(matched));
        Ok(())
    }

    pub(super) fn exception_matches(&self, exc: &Value, spec: &Value) -> VmResult<bool> {
        match spec {
            Value::Type(ty) if self.registry.is_subclass(*ty, BASE_EXCEPTION) => {
                Ok(self.registry.is_subclass(exc.type_id(), *ty))
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.exception_matches(exc, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(VmError::raise(
                TYPE_ERROR,
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    // === Protocols ===

    /// Truth value: builtin rules, then `__bool__`, then `__len__`
    pub fn truthy(&mut self, value: &Value) -> VmResult<bool> {
        if let Some(b) = value.builtin_truthy() {
            return Ok(b);
        }
        if let Some(result) = self.call_dunder(value, "__bool__", Vec::new())? {
            return match result {
                Value::Bool(b) => Ok(b),
                other => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("__bool__ should return bool, returned {}", self.type_name(&other)),
                )),
            };
        }
        if let Some(result) = self.call_dunder(value, "__len__", Vec::new())? {
            return Ok(result.as_int().is_some_and(|n| n != 0));
        }
        Ok(true)
    }

    /// Ordering of builtin values, `None` when they are not comparable
    fn builtin_ordering(&mut self, left: &Value, right: &Value) -> VmResult<Option<Ordering>> {
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::Float(_), _) | (_, Value::Float(_)) => match (left.as_float(), right.as_float()) {
                (Some(a), Some(b)) => Ok(a.partial_cmp(&b)),
                _ => Ok(None),
            },
            (Value::Tuple(a), Value::Tuple(b)) => self.sequence_ordering(&a[..], &b[..]),
            (Value::List(a), Value::List(b)) => {
                let a = a.read().clone();
                let b = b.read().clone();
                self.sequence_ordering(&a, &b)
            }
            _ => match (left.as_int(), right.as_int()) {
                (Some(a), Some(b)) => Ok(Some(a.cmp(&b))),
                _ => Ok(None),
            },
        }
    }

    /// Equality of builtin values, element-wise for sequences
    fn builtin_equal(&mut self, left: &Value, right: &Value) -> VmResult<bool> {
        let (a, b) = match (left, right) {
            (Value::Tuple(a), Value::Tuple(b)) => (a.to_vec(), b.to_vec()),
            (Value::List(a), Value::List(b)) => (a.read().clone(), b.read().clone()),
            _ => return Ok(left.builtin_eq(right)),
        };
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b.iter()) {
            if !self.values_equal(x, y)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Lexicographic ordering: first unequal element decides, then length
    fn sequence_ordering(&mut self, a: &[Value], b: &[Value]) -> VmResult<Option<Ordering>> {
        for (x, y) in a.iter().zip(b.iter()) {
            if self.values_equal(x, y)? {
                continue;
            }
            return Ok(if self.less_than(x, y)? {
                Some(Ordering::Less)
            } else if self.less_than(y, x)? {
                Some(Ordering::Greater)
            } else {
                None
            });
        }
        Ok(Some(a.len().cmp(&b.len())))
    }

    /// `left op right` under the comparison protocol
    pub fn compare(&mut self, op: CompareOperator, left: Value, right: Value) -> VmResult<Value> {
        if matches!(op, CompareOperator::Eq | CompareOperator::Ne) && !self.has_class(&left) && !self.has_class(&right) {
            let equal = self.builtin_equal(&left, &right)?;
            return Ok(Value::Bool(equal == (op == CompareOperator::Eq)));
        }
        if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
            if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
                let result = match op {
                    CompareOperator::Lt => a < b,
                    CompareOperator::Le => a <= b,
                    CompareOperator::Gt => a > b,
                    CompareOperator::Ge => a >= b,
                    CompareOperator::Eq => a == b,
                    CompareOperator::Ne => a != b,
                };
                return Ok(Value::Bool(result));
            }
        }
        if let Some(ordering) = self.builtin_ordering(&left, &right)? {
            return Ok(Value::Bool(ordering_satisfies(op, ordering)));
        }
        if let (Value::Set(a), Value::Set(b)) = (&left, &right) {
            let (a, b) = (a.read().clone(), b.read().clone());
            let a_in_b = a.items().iter().all(|(k, _)| k.hash_key().is_some_and(|h| b.contains(&h)));
            let b_in_a = b.items().iter().all(|(k, _)| k.hash_key().is_some_and(|h| a.contains(&h)));
            let result = match op {
                CompareOperator::Le => a_in_b,
                CompareOperator::Lt => a_in_b && a.len() < b.len(),
                CompareOperator::Ge => b_in_a,
                CompareOperator::Gt => b_in_a && a.len() > b.len(),
                CompareOperator::Eq => a_in_b && b_in_a,
                CompareOperator::Ne => !(a_in_b && b_in_a),
            };
            return Ok(Value::Bool(result));
        }
        if let Some(result) = self.call_dunder(&left, op.dunder(), vec![right.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(result) = self.call_dunder(&right, op.mirrored().dunder(), vec![left.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        match op {
            CompareOperator::Eq => Ok(Value::Bool(left.builtin_eq(&right))),
            CompareOperator::Ne => Ok(Value::Bool(!left.builtin_eq(&right))),
            _ => Err(VmError::raise(
                TYPE_ERROR,
                format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    self.type_name(&left),
                    self.type_name(&right)
                ),
            )),
        }
    }

    /// Source-language `a < b` as a Rust bool
    pub fn less_than(&mut self, a: &Value, b: &Value) -> VmResult<bool> {
        let result = self.compare(CompareOperator::Lt, a.clone(), b.clone())?;
        self.truthy(&result)
    }

    /// Source-language `a == b` as a Rust bool
    pub fn values_equal(&mut self, a: &Value, b: &Value) -> VmResult<bool> {
        if a.is_identical(b) {
            return Ok(true);
        }
        let result = self.compare(CompareOperator::Eq, a.clone(), b.clone())?;
        self.truthy(&result)
    }

    /// Membership test `item in container`
    pub fn contains(&mut self, container: &Value, item: &Value) -> VmResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'in <string>' requires string as left operand, not {}", self.type_name(other)),
                )),
            },
            Value::Dict(table) | Value::Set(table) => {
                let key = self.hash_key_of(item)?;
                Ok(table.read().contains(&key))
            }
            Value::List(items) => {
                let items = items.read().clone();
                self.any_equal(&items, item)
            }
            Value::Tuple(items) => {
                let items = items.clone();
                self.any_equal(&items, item)
            }
            _ => {
                if let Some(result) = self.call_dunder(container, "__contains__", vec![item.clone()])? {
                    return self.truthy(&result);
                }
                let iterator = self.iterate(container)?;
                while let Some(candidate) = self.next_item(&iterator)? {
                    if self.values_equal(&candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> VmResult<bool> {
        for candidate in items {
            if self.values_equal(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_satisfies() {
        assert!(ordering_satisfies(CompareOperator::Le, Ordering::Equal));
        assert!(!ordering_satisfies(CompareOperator::Lt, Ordering::Equal));
        assert!(ordering_satisfies(CompareOperator::Ne, Ordering::Greater));
        assert!(ordering_satisfies(CompareOperator::Ge, Ordering::Greater));
    }
}
