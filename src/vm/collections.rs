//! Collection operations for the bytecode VM.
//!
//! Container construction, the comprehension update instructions, sequence
//! unpacking and subscripts. Update instructions address their target by
//! distance from the top after popping their operands.

use std::sync::Arc;

use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::{HashKey, SliceValue, Table, Value};
use crate::types::builtin::{INDEX_ERROR, KEY_ERROR, TYPE_ERROR, VALUE_ERROR};

/// Resolve a possibly negative index against `len`
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Clamp a slice bound the way sequence slicing does
fn adjust_bound(bound: i64, len: i64, step: i64) -> i64 {
    if bound < 0 {
        let bound = bound + len;
        if bound < 0 {
            if step < 0 { -1 } else { 0 }
        } else {
            bound
        }
    } else if bound >= len {
        if step < 0 { len - 1 } else { len }
    } else {
        bound
    }
}

fn slice_positions(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        positions.push(i as usize);
        i += step;
    }
    positions
}

impl BytecodeVM {
    // === Construction ===

    pub(super) fn op_build_tuple(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let items = self.pop_n(n)?;
        self.push(Value::tuple(items));
        Ok(())
    }

    pub(super) fn op_build_list(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let items = self.pop_n(n)?;
        self.push(Value::list(items));
        Ok(())
    }

    pub(super) fn op_build_set(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let items = self.pop_n(n)?;
        let mut table = Table::new();
        for item in items {
            let hash = self.hash_key_of(&item)?;
            table.insert(hash, item, Value::None);
        }
        self.push(Value::set(table));
        Ok(())
    }

    /// `[k1, v1, ..., kn, vn]` -> dict
    pub(super) fn op_build_map(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let items = self.pop_n(n * 2)?;
        let mut table = Table::new();
        let mut items = items.into_iter();
        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let hash = self.hash_key_of(&key)?;
            table.insert(hash, key, value);
        }
        self.push(Value::dict(table));
        Ok(())
    }

    /// `[v1, ..., vn, keys]` -> dict
    pub(super) fn op_build_const_key_map(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let keys = match self.pop()? {
            Value::Tuple(keys) if keys.len() == n => keys,
            _ => return Err(self.invalid_operand(n as u32)),
        };
        let values = self.pop_n(n)?;
        let mut table = Table::new();
        for (key, value) in keys.iter().zip(values) {
            let hash = self.hash_key_of(key)?;
            table.insert(hash, key.clone(), value);
        }
        self.push(Value::dict(table));
        Ok(())
    }

    pub(super) fn op_build_slice(&mut self) -> VmResult<()> {
        let n = self.read_u8()?;
        let step = match n {
            2 => Value::None,
            3 => self.pop()?,
            other => return Err(self.invalid_operand(u32::from(other))),
        };
        let stop = self.pop()?;
        let start = self.pop()?;
        self.push(Value::Slice(Arc::new(SliceValue { start, stop, step })));
        Ok(())
    }

    pub(super) fn op_list_to_tuple(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let items = self.collect_items(&value)?;
        self.push(Value::tuple(items));
        Ok(())
    }

    // === Updates ===

    /// Distance operand and the target it names, read after the operands are popped
    fn update_target(&mut self, distance: u16) -> VmResult<Value> {
        let distance = usize::from(distance);
        if distance == 0 {
            return Err(self.invalid_operand(0));
        }
        Ok(self.peek_n(distance - 1)?.clone())
    }

    pub(super) fn op_list_append(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let value = self.pop()?;
        match self.update_target(distance)? {
            Value::List(list) => {
                list.write().push(value);
                Ok(())
            }
            _ => Err(self.invalid_operand(u32::from(distance))),
        }
    }

    pub(super) fn op_set_add(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let value = self.pop()?;
        match self.update_target(distance)? {
            Value::Set(set) => {
                let hash = self.hash_key_of(&value)?;
                set.write().insert(hash, value, Value::None);
                Ok(())
            }
            _ => Err(self.invalid_operand(u32::from(distance))),
        }
    }

    /// `[..., key, value]`
    pub(super) fn op_map_add(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let value = self.pop()?;
        let key = self.pop()?;
        match self.update_target(distance)? {
            Value::Dict(dict) => {
                let hash = self.hash_key_of(&key)?;
                dict.write().insert(hash, key, value);
                Ok(())
            }
            _ => Err(self.invalid_operand(u32::from(distance))),
        }
    }

    pub(super) fn op_list_extend(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let iterable = self.pop()?;
        match self.update_target(distance)? {
            Value::List(list) => {
                let items = self.collect_items(&iterable)?;
                list.write().extend(items);
                Ok(())
            }
            _ => Err(self.invalid_operand(u32::from(distance))),
        }
    }

    pub(super) fn op_set_update(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let iterable = self.pop()?;
        match self.update_target(distance)? {
            Value::Set(set) => {
                for item in self.collect_items(&iterable)? {
                    let hash = self.hash_key_of(&item)?;
                    set.write().insert(hash, item, Value::None);
                }
                Ok(())
            }
            _ => Err(self.invalid_operand(u32::from(distance))),
        }
    }

    pub(super) fn op_dict_update(&mut self) -> VmResult<()> {
        let distance = self.read_u16()?;
        let mapping = self.pop()?;
        let target = self.update_target(distance)?;
        if !matches!(mapping, Value::Dict(_)) && self.lookup_attr(&mapping, "keys")?.is_none() {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!("'{}' object is not a mapping", self.type_name(&mapping)),
            ));
        }
        self.merge_mapping(&target, &mapping)
    }

    /// Copy every entry of `source` into dict `target`
    ///
    /// Mappings contribute their keys; other iterables must yield pairs.
    pub fn merge_mapping(&mut self, target: &Value, source: &Value) -> VmResult<()> {
        let Value::Dict(table) = target else {
            return Err(VmError::raise(TYPE_ERROR, format!("'{}' object is not a dict", self.type_name(target))));
        };
        let pairs: Vec<(Value, Value)> = match source {
            Value::Dict(other) => other.read().items().to_vec(),
            _ => match self.lookup_attr(source, "keys")? {
                Some(keys) => {
                    let keys = self.call_value(keys, Vec::new(), Vec::new())?;
                    let mut pairs = Vec::new();
                    for key in self.collect_items(&keys)? {
                        let value = self.get_item(source.clone(), key.clone())?;
                        pairs.push((key, value));
                    }
                    pairs
                }
                None => {
                    let mut pairs = Vec::new();
                    for (i, item) in self.collect_items(source)?.into_iter().enumerate() {
                        let pair = self.collect_items(&item)?;
                        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
                            VmError::raise(
                                VALUE_ERROR,
                                format!(
                                    "dictionary update sequence element #{} has length {}; 2 is required",
                                    i,
                                    pair.len()
                                ),
                            )
                        })?;
                        pairs.push((key, value));
                    }
                    pairs
                }
            },
        };
        for (key, value) in pairs {
            let hash = self.hash_key_of(&key)?;
            table.write().insert(hash, key, value);
        }
        Ok(())
    }

    // === Unpacking ===

    /// Pop a sequence of exactly `n` items and push them with the first on top
    pub(super) fn op_unpack_sequence(&mut self) -> VmResult<()> {
        let n = usize::from(self.read_u16()?);
        let sequence = self.pop()?;
        let items = self.collect_items(&sequence)?;
        if items.len() < n {
            return Err(VmError::raise(
                VALUE_ERROR,
                format!("not enough values to unpack (expected {}, got {})", n, items.len()),
            ));
        }
        if items.len() > n {
            return Err(VmError::raise(
                VALUE_ERROR,
                format!("too many values to unpack (expected {}, got {})", n, items.len()),
            ));
        }
        self.value_stack.extend(items.into_iter().rev());
        Ok(())
    }

    /// Starred unpacking: `lo` leading items, a list of the rest, `hi` trailing items
    pub(super) fn op_unpack_ex(&mut self) -> VmResult<()> {
        let split = self.read_u16()?;
        let (lo, hi) = (usize::from(split & 0xFF), usize::from(split >> 8));
        let sequence = self.pop()?;
        let mut items = self.collect_items(&sequence)?;
        if items.len() < lo + hi {
            return Err(VmError::raise(
                VALUE_ERROR,
                format!("not enough values to unpack (expected at least {}, got {})", lo + hi, items.len()),
            ));
        }
        let trailing = items.split_off(items.len() - hi);
        let middle = items.split_off(lo);
        self.value_stack.extend(trailing.into_iter().rev());
        self.push(Value::list(middle));
        self.value_stack.extend(items.into_iter().rev());
        Ok(())
    }

    // === Subscripts ===

    pub(super) fn op_get_item(&mut self) -> VmResult<()> {
        let key = self.pop()?;
        let container = self.pop()?;
        let value = self.get_item(container, key)?;
        self.push(value);
        Ok(())
    }

    /// `[value, container, key]`
    pub(super) fn op_set_item(&mut self) -> VmResult<()> {
        let key = self.pop()?;
        let container = self.pop()?;
        let value = self.pop()?;
        self.set_item(container, key, value)
    }

    pub(super) fn op_del_item(&mut self) -> VmResult<()> {
        let key = self.pop()?;
        let container = self.pop()?;
        self.del_item(container, key)
    }

    /// Start, stop and step of `slice` applied to a sequence of `len` items
    fn slice_bounds(&self, slice: &SliceValue, len: usize) -> VmResult<(i64, i64, i64)> {
        let len = len as i64;
        let bound = |value: &Value, what: &str| -> VmResult<Option<i64>> {
            match value {
                Value::None => Ok(None),
                other => other.as_int().map(Some).ok_or_else(|| {
                    VmError::raise(
                        TYPE_ERROR,
                        format!("slice {} must be an integer or None, not {}", what, self.type_name(other)),
                    )
                }),
            }
        };
        let step = bound(&slice.step, "step")?.unwrap_or(1);
        if step == 0 {
            return Err(VmError::raise(VALUE_ERROR, "slice step cannot be zero"));
        }
        let start = match bound(&slice.start, "start")? {
            Some(s) => adjust_bound(s, len, step),
            None if step < 0 => len - 1,
            None => 0,
        };
        let stop = match bound(&slice.stop, "stop")? {
            Some(s) => adjust_bound(s, len, step),
            None if step < 0 => -1,
            None => len,
        };
        Ok((start, stop, step))
    }

    fn slice_items(&self, items: &[Value], slice: &SliceValue) -> VmResult<Vec<Value>> {
        let (start, stop, step) = self.slice_bounds(slice, items.len())?;
        Ok(slice_positions(start, stop, step).into_iter().map(|i| items[i].clone()).collect())
    }

    fn sequence_index(&self, key: &Value, what: &str) -> VmResult<i64> {
        key.as_int().ok_or_else(|| {
            VmError::raise(
                TYPE_ERROR,
                format!("{} must be integers or slices, not {}", what, self.type_name(key)),
            )
        })
    }

    /// `container[key]`
    pub(super) fn get_item(&mut self, container: Value, key: Value) -> VmResult<Value> {
        match (&container, &key) {
            (Value::List(list), Value::Slice(slice)) => {
                let items = list.read().clone();
                Ok(Value::list(self.slice_items(&items, slice)?))
            }
            (Value::Tuple(items), Value::Slice(slice)) => Ok(Value::tuple(self.slice_items(items, slice)?)),
            (Value::Str(s), Value::Slice(slice)) => {
                let chars: Vec<Value> = s.chars().map(|c| Value::from(c.to_string())).collect();
                let picked = self.slice_items(&chars, slice)?;
                Ok(Value::from(picked.iter().map(|c| c.to_string()).collect::<String>()))
            }
            (Value::List(list), _) => {
                let index = self.sequence_index(&key, "list indices")?;
                let list = list.read();
                normalize_index(index, list.len())
                    .map(|i| list[i].clone())
                    .ok_or_else(|| VmError::raise(INDEX_ERROR, "list index out of range"))
            }
            (Value::Tuple(items), _) => {
                let index = self.sequence_index(&key, "tuple indices")?;
                normalize_index(index, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(|| VmError::raise(INDEX_ERROR, "tuple index out of range"))
            }
            (Value::Str(s), _) => {
                let index = self.sequence_index(&key, "string indices")?;
                let count = s.chars().count();
                normalize_index(index, count)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| VmError::raise(INDEX_ERROR, "string index out of range"))
            }
            (Value::Dict(table), _) => {
                let hash = self.hash_key_of(&key)?;
                let found = table.read().get(&hash).cloned();
                found.ok_or_else(|| VmError::raise_with(KEY_ERROR, vec![key.clone()]))
            }
            // class subscription in annotations, such as `list[int]`
            (Value::Type(_), _) => Ok(container.clone()),
            _ => match self.call_dunder(&container, "__getitem__", vec![key.clone()])? {
                Some(value) => Ok(value),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'{}' object is not subscriptable", self.type_name(&container)),
                )),
            },
        }
    }

    /// `container[key] = value`
    pub(super) fn set_item(&mut self, container: Value, key: Value, value: Value) -> VmResult<()> {
        match (&container, &key) {
            (Value::List(list), Value::Slice(slice)) => {
                let replacement = self.collect_items(&value)?;
                let len = list.read().len();
                let (start, stop, step) = self.slice_bounds(slice, len)?;
                let mut list = list.write();
                if step == 1 {
                    let stop = stop.max(start) as usize;
                    list.splice(start as usize..stop, replacement);
                    return Ok(());
                }
                let positions = slice_positions(start, stop, step);
                if positions.len() != replacement.len() {
                    return Err(VmError::raise(
                        VALUE_ERROR,
                        format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            replacement.len(),
                            positions.len()
                        ),
                    ));
                }
                for (i, item) in positions.into_iter().zip(replacement) {
                    list[i] = item;
                }
                Ok(())
            }
            (Value::List(list), _) => {
                let index = self.sequence_index(&key, "list indices")?;
                let mut list = list.write();
                let i = normalize_index(index, list.len())
                    .ok_or_else(|| VmError::raise(INDEX_ERROR, "list assignment index out of range"))?;
                list[i] = value;
                Ok(())
            }
            (Value::Dict(table), _) => {
                let hash = self.hash_key_of(&key)?;
                table.write().insert(hash, key.clone(), value);
                Ok(())
            }
            _ => match self.call_dunder(&container, "__setitem__", vec![key.clone(), value])? {
                Some(_) => Ok(()),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'{}' object does not support item assignment", self.type_name(&container)),
                )),
            },
        }
    }

    /// `del container[key]`
    pub(super) fn del_item(&mut self, container: Value, key: Value) -> VmResult<()> {
        match (&container, &key) {
            (Value::List(list), Value::Slice(slice)) => {
                let len = list.read().len();
                let (start, stop, step) = self.slice_bounds(slice, len)?;
                let mut positions = slice_positions(start, stop, step);
                positions.sort_unstable();
                let mut list = list.write();
                for i in positions.into_iter().rev() {
                    list.remove(i);
                }
                Ok(())
            }
            (Value::List(list), _) => {
                let index = self.sequence_index(&key, "list indices")?;
                let mut list = list.write();
                let i = normalize_index(index, list.len())
                    .ok_or_else(|| VmError::raise(INDEX_ERROR, "list assignment index out of range"))?;
                list.remove(i);
                Ok(())
            }
            (Value::Dict(table), _) => {
                let hash = self.hash_key_of(&key)?;
                let removed = table.write().remove(&hash);
                removed.map(|_| ()).ok_or_else(|| VmError::raise_with(KEY_ERROR, vec![key.clone()]))
            }
            _ => match self.call_dunder(&container, "__delitem__", vec![key.clone()])? {
                Some(_) => Ok(()),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'{}' object doesn't support item deletion", self.type_name(&container)),
                )),
            },
        }
    }

    // === Protocol helpers ===

    /// `len(value)`
    pub fn len_of(&mut self, value: &Value) -> VmResult<i64> {
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::Tuple(items) => items.len(),
            Value::List(items) => items.read().len(),
            Value::Dict(table) | Value::Set(table) => table.read().len(),
            _ => {
                return match self.call_dunder(value, "__len__", Vec::new())? {
                    Some(Value::Int(n)) if n >= 0 => Ok(n),
                    Some(Value::Int(_)) => Err(VmError::raise(VALUE_ERROR, "__len__() should return >= 0")),
                    Some(other) => Err(VmError::raise(
                        TYPE_ERROR,
                        format!("'{}' object cannot be interpreted as an integer", self.type_name(&other)),
                    )),
                    None => Err(VmError::raise(
                        TYPE_ERROR,
                        format!("object of type '{}' has no len()", self.type_name(value)),
                    )),
                }
            }
        };
        Ok(len as i64)
    }

    /// Dict/set key of `value`, `TypeError` when it is unhashable
    pub fn hash_key_of(&self, value: &Value) -> VmResult<HashKey> {
        value
            .hash_key()
            .ok_or_else(|| VmError::raise(TYPE_ERROR, format!("unhashable type: '{}'", self.type_name(value))))
    }
}
