//! Builtin functions and the methods of builtin values.
//!
//! Builtins are plain `fn` pointers registered by name, in the manner of a
//! native function registry: the VM calls them with the positional and
//! keyword arguments of the call site, receiver first for methods.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use super::value::{BuiltinFn, BuiltinFunction, IteratorState, Namespace, Table, Value};
use crate::types::builtin::{self, BUILTIN_COUNT, INDEX_ERROR, KEY_ERROR, STOP_ITERATION, TYPE_ERROR, VALUE_ERROR};
use crate::types::{BinaryOperator, CompareOperator, TypeId};
use crate::vm::{BytecodeVM, VmError, VmResult};

type Kwargs = Vec<(Arc<str>, Value)>;

const FUNCTIONS: &[(&str, BuiltinFn)] = &[
    ("print", builtin_print),
    ("len", builtin_len),
    ("range", builtin_range),
    ("isinstance", builtin_isinstance),
    ("issubclass", builtin_issubclass),
    ("iter", builtin_iter),
    ("next", builtin_next),
    ("repr", builtin_repr),
    ("abs", builtin_abs),
    ("min", builtin_min),
    ("max", builtin_max),
    ("sum", builtin_sum),
    ("getattr", builtin_getattr),
    ("setattr", builtin_setattr),
    ("hasattr", builtin_hasattr),
    ("sorted", builtin_sorted),
    ("enumerate", builtin_enumerate),
    ("zip", builtin_zip),
    ("any", builtin_any),
    ("all", builtin_all),
    ("callable", builtin_callable),
];

/// The namespace consulted after a module's globals
pub fn builtins_namespace() -> Namespace {
    let namespace = Namespace::new();
    for &(name, func) in FUNCTIONS {
        namespace.set(name, Value::Builtin(Arc::new(BuiltinFunction { name, func })));
    }
    for id in 0..BUILTIN_COUNT {
        let id = TypeId(id);
        if let Some(name) = builtin::builtin_name(id) {
            namespace.set(name, Value::Type(id));
        }
    }
    namespace.set("NotImplemented", Value::NotImplemented);
    namespace.set("Ellipsis", Value::Ellipsis);
    namespace
}

/// Bound builtin method `name` of a builtin receiver
pub fn builtin_method(receiver: &Value, name: &str) -> Option<Value> {
    let (name, func): (&'static str, BuiltinFn) = match (receiver, name) {
        (Value::List(_), "append") => ("append", list_append),
        (Value::List(_), "extend") => ("extend", list_extend),
        (Value::List(_), "pop") => ("pop", list_pop),
        (Value::List(_), "insert") => ("insert", list_insert),
        (Value::List(_), "remove") => ("remove", list_remove),
        (Value::List(_), "index") => ("index", list_index),
        (Value::List(_), "count") => ("count", list_count),
        (Value::List(_), "copy") => ("copy", list_copy),
        (Value::List(_), "clear") => ("clear", list_clear),
        (Value::List(_), "reverse") => ("reverse", list_reverse),
        (Value::List(_), "sort") => ("sort", list_sort),
        (Value::Dict(_), "get") => ("get", dict_get),
        (Value::Dict(_), "keys") => ("keys", dict_keys),
        (Value::Dict(_), "values") => ("values", dict_values),
        (Value::Dict(_), "items") => ("items", dict_items),
        (Value::Dict(_), "pop") => ("pop", dict_pop),
        (Value::Dict(_), "setdefault") => ("setdefault", dict_setdefault),
        (Value::Dict(_), "update") => ("update", dict_update),
        (Value::Dict(_), "copy") => ("copy", dict_copy),
        (Value::Set(_), "add") => ("add", set_add),
        (Value::Set(_), "discard") => ("discard", set_discard),
        (Value::Set(_), "remove") => ("remove", set_remove),
        (Value::Str(_), "join") => ("join", str_join),
        (Value::Str(_), "upper") => ("upper", str_upper),
        (Value::Str(_), "lower") => ("lower", str_lower),
        (Value::Str(_), "split") => ("split", str_split),
        (Value::Str(_), "strip") => ("strip", str_strip),
        (Value::Str(_), "replace") => ("replace", str_replace),
        (Value::Str(_), "startswith") => ("startswith", str_startswith),
        (Value::Str(_), "endswith") => ("endswith", str_endswith),
        (Value::Str(_), "find") => ("find", str_find),
        (Value::Str(_), "isdigit") => ("isdigit", str_isdigit),
        (Value::Int(_), "bit_length") => ("bit_length", int_bit_length),
        (Value::Float(_), "is_integer") => ("is_integer", float_is_integer),
        (Value::Generator(_), "send") => ("send", generator_send),
        (Value::Generator(_), "throw") => ("throw", generator_throw),
        (Value::Generator(_), "close") => ("close", generator_close),
        (Value::Generator(_), "__next__") => ("__next__", generator_next),
        _ => return None,
    };
    let function = Value::Builtin(Arc::new(BuiltinFunction { name, func }));
    Some(Value::BoundMethod(Arc::new(super::value::BoundMethod { receiver: receiver.clone(), function })))
}

// === Argument helpers ===

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> VmResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
        return Err(VmError::raise(
            TYPE_ERROR,
            format!("{}() takes {} arguments ({} given)", name, expected, args.len()),
        ));
    }
    Ok(())
}

fn kwarg(kwargs: &Kwargs, name: &str) -> Option<Value> {
    kwargs.iter().find(|(k, _)| k.as_ref() == name).map(|(_, v)| v.clone())
}

fn int_arg(vm: &BytecodeVM, value: &Value) -> VmResult<i64> {
    value
        .as_int()
        .ok_or_else(|| VmError::raise(TYPE_ERROR, format!("'{}' object cannot be interpreted as an integer", vm.type_name(value))))
}

fn str_arg<'v>(vm: &BytecodeVM, value: &'v Value) -> VmResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| VmError::raise(TYPE_ERROR, format!("expected str, got '{}'", vm.type_name(value))))
}

fn list_of(value: &Value) -> VmResult<Arc<RwLock<Vec<Value>>>> {
    match value {
        Value::List(list) => Ok(list.clone()),
        _ => Err(VmError::Runtime("list method bound to a non-list".into())),
    }
}

fn table_of(value: &Value) -> VmResult<Arc<RwLock<Table>>> {
    match value {
        Value::Dict(table) | Value::Set(table) => Ok(table.clone()),
        _ => Err(VmError::Runtime("mapping method bound to a non-mapping".into())),
    }
}

/// Resolve a possibly negative index against `len`
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Sort `items` in place by `key`, comparing with the source-language `<`
pub(crate) fn sort_values(vm: &mut BytecodeVM, items: &mut Vec<Value>, key: Option<Value>, reverse: bool) -> VmResult<()> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items.drain(..) {
        let k = match &key {
            Some(f) if !f.is_none() => vm.call_value(f.clone(), vec![item.clone()], Vec::new())?,
            _ => item.clone(),
        };
        keyed.push((k, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        let ordering = vm.less_than(a, b).and_then(|less| {
            if less {
                Ok(Ordering::Less)
            } else if vm.less_than(b, a)? {
                Ok(Ordering::Greater)
            } else {
                Ok(Ordering::Equal)
            }
        });
        ordering.unwrap_or_else(|e| {
            failure = Some(e);
            Ordering::Equal
        })
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if reverse {
        keyed.reverse();
    }
    items.extend(keyed.into_iter().map(|(_, item)| item));
    Ok(())
}

// === Functions ===

fn builtin_print(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    let sep = kwarg(&kwargs, "sep").filter(|v| !v.is_none()).map_or_else(|| " ".to_string(), |v| v.to_string());
    let end = kwarg(&kwargs, "end").filter(|v| !v.is_none()).map_or_else(|| "\n".to_string(), |v| v.to_string());
    let mut parts = Vec::with_capacity(args.len());
    for arg in &args {
        parts.push(vm.str_of(arg)?);
    }
    let mut line = parts.join(&sep);
    line.push_str(&end);
    vm.host().print(&line);
    Ok(Value::None)
}

fn builtin_len(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("len", &args, 1, 1)?;
    Ok(Value::Int(vm.len_of(&args[0])?))
}

fn builtin_range(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("range", &args, 1, 3)?;
    let ints = args.iter().map(|a| int_arg(vm, a)).collect::<VmResult<Vec<_>>>()?;
    let (start, stop, step) = match *ints.as_slice() {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => return Err(VmError::raise(TYPE_ERROR, "range expected at most 3 arguments")),
    };
    if step == 0 {
        return Err(VmError::raise(VALUE_ERROR, "range() arg 3 must not be zero"));
    }
    Ok(Value::Iterator(Arc::new(parking_lot::Mutex::new(IteratorState::Range { next: start, stop, step }))))
}

fn class_list(vm: &BytecodeVM, name: &str, spec: &Value, out: &mut Vec<TypeId>) -> VmResult<()> {
    match spec {
        Value::Type(id) => out.push(*id),
        Value::Tuple(items) => {
            for item in items.iter() {
                class_list(vm, name, item, out)?;
            }
        }
        other => {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!("{}() arg 2 must be a type or tuple of types, not {}", name, vm.type_name(other)),
            ))
        }
    }
    Ok(())
}

fn builtin_isinstance(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("isinstance", &args, 2, 2)?;
    let ty = args[0].type_id();
    let mut classes = Vec::new();
    class_list(vm, "isinstance", &args[1], &mut classes)?;
    Ok(Value::Bool(classes.iter().any(|&c| vm.registry().is_subclass(ty, c))))
}

fn builtin_issubclass(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("issubclass", &args, 2, 2)?;
    let Value::Type(sub) = args[0] else {
        return Err(VmError::raise(TYPE_ERROR, "issubclass() arg 1 must be a class"));
    };
    let mut classes = Vec::new();
    class_list(vm, "issubclass", &args[1], &mut classes)?;
    Ok(Value::Bool(classes.iter().any(|&c| vm.registry().is_subclass(sub, c))))
}

fn builtin_iter(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("iter", &args, 1, 1)?;
    vm.iterate(&args[0])
}

fn builtin_next(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("next", &args, 1, 2)?;
    match vm.next_item(&args[0])? {
        Some(item) => Ok(item),
        None => match args.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(VmError::raise_with(STOP_ITERATION, Vec::new())),
        },
    }
}

fn builtin_repr(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("repr", &args, 1, 1)?;
    Ok(Value::from(vm.repr_of(&args[0])?))
}

fn builtin_abs(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("abs", &args, 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(n) => n
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| VmError::raise(builtin::OVERFLOW_ERROR, "integer overflow in abs()")),
            None => Err(VmError::raise(TYPE_ERROR, format!("bad operand type for abs(): '{}'", vm.type_name(other)))),
        },
    }
}

fn extremum(vm: &mut BytecodeVM, name: &str, args: Vec<Value>, kwargs: Kwargs, want: CompareOperator) -> VmResult<Value> {
    if args.is_empty() {
        return Err(VmError::raise(TYPE_ERROR, format!("{} expected at least 1 argument, got 0", name)));
    }
    let items = if args.len() == 1 { vm.collect_items(&args[0])? } else { args };
    let key = kwarg(&kwargs, "key").filter(|k| !k.is_none());
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => vm.call_value(f.clone(), vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let better = match &best {
            None => true,
            Some((best_key, _)) => {
                let result = vm.compare(want, k.clone(), best_key.clone())?;
                vm.truthy(&result)?
            }
        };
        if better {
            best = Some((k, item));
        }
    }
    match best {
        Some((_, item)) => Ok(item),
        None => kwarg(&kwargs, "default")
            .ok_or_else(|| VmError::raise(VALUE_ERROR, format!("{}() arg is an empty sequence", name))),
    }
}

fn builtin_min(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    extremum(vm, "min", args, kwargs, CompareOperator::Lt)
}

fn builtin_max(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    extremum(vm, "max", args, kwargs, CompareOperator::Gt)
}

fn builtin_sum(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    arity("sum", &args, 1, 2)?;
    let mut total = args.get(1).cloned().or_else(|| kwarg(&kwargs, "start")).unwrap_or(Value::Int(0));
    for item in vm.collect_items(&args[0])? {
        total = vm.binary_op(BinaryOperator::Add, total, item)?;
    }
    Ok(total)
}

fn builtin_getattr(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("getattr", &args, 2, 3)?;
    let name = str_arg(vm, &args[1])?.to_string();
    match vm.lookup_attr(&args[0], &name)? {
        Some(value) => Ok(value),
        None => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => vm.load_attr(&args[0], &name),
        },
    }
}

fn builtin_setattr(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("setattr", &args, 3, 3)?;
    let name = str_arg(vm, &args[1])?.to_string();
    vm.store_attr(&args[0], &name, args[2].clone())?;
    Ok(Value::None)
}

fn builtin_hasattr(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("hasattr", &args, 2, 2)?;
    let name = str_arg(vm, &args[1])?.to_string();
    Ok(Value::Bool(vm.lookup_attr(&args[0], &name)?.is_some()))
}

fn builtin_sorted(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    arity("sorted", &args, 1, 1)?;
    let mut items = vm.collect_items(&args[0])?;
    let reverse = match kwarg(&kwargs, "reverse") {
        Some(flag) => vm.truthy(&flag)?,
        None => false,
    };
    sort_values(vm, &mut items, kwarg(&kwargs, "key"), reverse)?;
    Ok(Value::list(items))
}

fn builtin_enumerate(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    arity("enumerate", &args, 1, 2)?;
    let start = match args.get(1).cloned().or_else(|| kwarg(&kwargs, "start")) {
        Some(v) => int_arg(vm, &v)?,
        None => 0,
    };
    let pairs: Vec<Value> = vm
        .collect_items(&args[0])?
        .into_iter()
        .zip(start..)
        .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
        .collect();
    Ok(Value::Iterator(Arc::new(parking_lot::Mutex::new(IteratorState::Items { items: pairs.into(), pos: 0 }))))
}

fn builtin_zip(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    let columns = args.iter().map(|a| vm.collect_items(a)).collect::<VmResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let tuples: Vec<Value> = (0..rows).map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect())).collect();
    Ok(Value::Iterator(Arc::new(parking_lot::Mutex::new(IteratorState::Items { items: tuples.into(), pos: 0 }))))
}

fn builtin_any(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("any", &args, 1, 1)?;
    for item in vm.collect_items(&args[0])? {
        if vm.truthy(&item)? {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_all(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("all", &args, 1, 1)?;
    for item in vm.collect_items(&args[0])? {
        if !vm.truthy(&item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn builtin_callable(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("callable", &args, 1, 1)?;
    let callable = match &args[0] {
        Value::Function(_) | Value::BoundMethod(_) | Value::Builtin(_) | Value::Type(_) => true,
        Value::Instance(_) => vm.lookup_attr(&args[0], "__call__")?.is_some(),
        _ => false,
    };
    Ok(Value::Bool(callable))
}

// === list ===

fn list_append(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("append", &args, 2, 2)?;
    list_of(&args[0])?.write().push(args[1].clone());
    Ok(Value::None)
}

fn list_extend(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("extend", &args, 2, 2)?;
    let items = vm.collect_items(&args[1])?;
    list_of(&args[0])?.write().extend(items);
    Ok(Value::None)
}

fn list_pop(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("pop", &args, 1, 2)?;
    let list = list_of(&args[0])?;
    let mut items = list.write();
    if items.is_empty() {
        return Err(VmError::raise(INDEX_ERROR, "pop from empty list"));
    }
    let index = match args.get(1) {
        Some(i) => normalize_index(int_arg(vm, i)?, items.len())
            .ok_or_else(|| VmError::raise(INDEX_ERROR, "pop index out of range"))?,
        None => items.len() - 1,
    };
    Ok(items.remove(index))
}

fn list_insert(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("insert", &args, 3, 3)?;
    let list = list_of(&args[0])?;
    let mut items = list.write();
    let len = items.len() as i64;
    let index = int_arg(vm, &args[1])?;
    let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(index as usize, args[2].clone());
    Ok(Value::None)
}

fn position(vm: &mut BytecodeVM, items: &[Value], needle: &Value) -> VmResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if vm.values_equal(item, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn list_remove(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("remove", &args, 2, 2)?;
    let list = list_of(&args[0])?;
    let snapshot = list.read().clone();
    match position(vm, &snapshot, &args[1])? {
        Some(i) => {
            list.write().remove(i);
            Ok(Value::None)
        }
        None => Err(VmError::raise(VALUE_ERROR, "list.remove(x): x not in list")),
    }
}

fn list_index(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("index", &args, 2, 2)?;
    let snapshot = list_of(&args[0])?.read().clone();
    match position(vm, &snapshot, &args[1])? {
        Some(i) => Ok(Value::Int(i as i64)),
        None => Err(VmError::raise(VALUE_ERROR, format!("{} is not in list", vm.repr_of(&args[1])?))),
    }
}

fn list_count(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("count", &args, 2, 2)?;
    let snapshot = list_of(&args[0])?.read().clone();
    let mut count = 0;
    for item in &snapshot {
        if vm.values_equal(item, &args[1])? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_copy(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("copy", &args, 1, 1)?;
    Ok(Value::list(list_of(&args[0])?.read().clone()))
}

fn list_clear(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("clear", &args, 1, 1)?;
    list_of(&args[0])?.write().clear();
    Ok(Value::None)
}

fn list_reverse(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("reverse", &args, 1, 1)?;
    list_of(&args[0])?.write().reverse();
    Ok(Value::None)
}

fn list_sort(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    arity("sort", &args, 1, 1)?;
    let list = list_of(&args[0])?;
    let mut items = list.read().clone();
    let reverse = match kwarg(&kwargs, "reverse") {
        Some(flag) => vm.truthy(&flag)?,
        None => false,
    };
    sort_values(vm, &mut items, kwarg(&kwargs, "key"), reverse)?;
    *list.write() = items;
    Ok(Value::None)
}

// === dict ===

fn dict_get(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("get", &args, 2, 3)?;
    let key = vm.hash_key_of(&args[1])?;
    let found = table_of(&args[0])?.read().get(&key).cloned();
    Ok(found.or_else(|| args.get(2).cloned()).unwrap_or(Value::None))
}

fn dict_keys(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("keys", &args, 1, 1)?;
    Ok(Value::list(table_of(&args[0])?.read().keys()))
}

fn dict_values(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("values", &args, 1, 1)?;
    Ok(Value::list(table_of(&args[0])?.read().values()))
}

fn dict_items(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("items", &args, 1, 1)?;
    let table = table_of(&args[0])?;
    let items = table.read().items().iter().map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()])).collect();
    Ok(Value::list(items))
}

fn dict_pop(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("pop", &args, 2, 3)?;
    let key = vm.hash_key_of(&args[1])?;
    let removed = table_of(&args[0])?.write().remove(&key);
    match (removed, args.get(2)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(VmError::raise_with(KEY_ERROR, vec![args[1].clone()])),
    }
}

fn dict_setdefault(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("setdefault", &args, 2, 3)?;
    let key = vm.hash_key_of(&args[1])?;
    let table = table_of(&args[0])?;
    let mut table = table.write();
    if let Some(existing) = table.get(&key) {
        return Ok(existing.clone());
    }
    let default = args.get(2).cloned().unwrap_or(Value::None);
    table.insert(key, args[1].clone(), default.clone());
    Ok(default)
}

fn dict_update(vm: &mut BytecodeVM, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
    arity("update", &args, 1, 2)?;
    if let Some(other) = args.get(1) {
        vm.merge_mapping(&args[0], other)?;
    }
    let table = table_of(&args[0])?;
    let mut table = table.write();
    for (name, value) in kwargs {
        let key = Value::Str(name.clone());
        table.insert(super::value::HashKey::Str(name), key, value);
    }
    Ok(Value::None)
}

fn dict_copy(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("copy", &args, 1, 1)?;
    Ok(Value::dict(table_of(&args[0])?.read().clone()))
}

// === set ===

fn set_add(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("add", &args, 2, 2)?;
    let key = vm.hash_key_of(&args[1])?;
    table_of(&args[0])?.write().insert(key, args[1].clone(), Value::None);
    Ok(Value::None)
}

fn set_discard(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("discard", &args, 2, 2)?;
    let key = vm.hash_key_of(&args[1])?;
    table_of(&args[0])?.write().remove(&key);
    Ok(Value::None)
}

fn set_remove(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("remove", &args, 2, 2)?;
    let key = vm.hash_key_of(&args[1])?;
    match table_of(&args[0])?.write().remove(&key) {
        Some(_) => Ok(Value::None),
        None => Err(VmError::raise_with(KEY_ERROR, vec![args[1].clone()])),
    }
}

// === str ===

fn receiver_str(args: &[Value]) -> VmResult<Arc<str>> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(VmError::Runtime("str method bound to a non-str".into())),
    }
}

fn str_join(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("join", &args, 2, 2)?;
    let sep = receiver_str(&args)?;
    let parts = vm
        .collect_items(&args[1])?
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                VmError::raise(TYPE_ERROR, format!("sequence item: expected str instance, {} found", vm.type_name(item)))
            })
        })
        .collect::<VmResult<Vec<_>>>()?;
    Ok(Value::from(parts.join(&sep)))
}

fn str_upper(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    Ok(Value::from(receiver_str(&args)?.to_uppercase()))
}

fn str_lower(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    Ok(Value::from(receiver_str(&args)?.to_lowercase()))
}

fn str_split(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("split", &args, 1, 2)?;
    let s = receiver_str(&args)?;
    let parts: Vec<Value> = match args.get(1).filter(|v| !v.is_none()) {
        Some(sep) => {
            let sep = str_arg(vm, sep)?;
            if sep.is_empty() {
                return Err(VmError::raise(VALUE_ERROR, "empty separator"));
            }
            s.split(sep).map(Value::from).collect()
        }
        None => s.split_whitespace().map(Value::from).collect(),
    };
    Ok(Value::list(parts))
}

fn str_strip(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("strip", &args, 1, 2)?;
    let s = receiver_str(&args)?;
    let stripped = match args.get(1).filter(|v| !v.is_none()) {
        Some(chars) => {
            let chars = str_arg(vm, chars)?;
            s.trim_matches(|c| chars.contains(c)).to_string()
        }
        None => s.trim().to_string(),
    };
    Ok(Value::from(stripped))
}

fn str_replace(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("replace", &args, 3, 3)?;
    let s = receiver_str(&args)?;
    Ok(Value::from(s.replace(str_arg(vm, &args[1])?, str_arg(vm, &args[2])?)))
}

fn str_startswith(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("startswith", &args, 2, 2)?;
    Ok(Value::Bool(receiver_str(&args)?.starts_with(str_arg(vm, &args[1])?)))
}

fn str_endswith(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("endswith", &args, 2, 2)?;
    Ok(Value::Bool(receiver_str(&args)?.ends_with(str_arg(vm, &args[1])?)))
}

fn str_find(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("find", &args, 2, 2)?;
    let s = receiver_str(&args)?;
    let found = s.find(str_arg(vm, &args[1])?).map_or(-1, |byte| s[..byte].chars().count() as i64);
    Ok(Value::Int(found))
}

fn str_isdigit(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    let s = receiver_str(&args)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
}

// === numbers ===

fn int_bit_length(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    let n = args.first().and_then(Value::as_int).unwrap_or(0);
    Ok(Value::Int(i64::from(64 - n.unsigned_abs().leading_zeros())))
}

fn float_is_integer(_vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    let f = args.first().and_then(Value::as_float).unwrap_or(f64::NAN);
    Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
}

// === generators ===

fn generator_of(args: &[Value]) -> VmResult<Arc<parking_lot::Mutex<super::value::GeneratorObject>>> {
    match args.first() {
        Some(Value::Generator(g)) => Ok(g.clone()),
        _ => Err(VmError::Runtime("generator method bound to a non-generator".into())),
    }
}

fn generator_send(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("send", &args, 2, 2)?;
    let generator = generator_of(&args)?;
    vm.generator_send(&generator, args[1].clone())
}

fn generator_throw(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("throw", &args, 2, 2)?;
    let generator = generator_of(&args)?;
    vm.generator_throw(&generator, args[1].clone())
}

fn generator_close(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("close", &args, 1, 1)?;
    let generator = generator_of(&args)?;
    vm.generator_close(&generator)?;
    Ok(Value::None)
}

fn generator_next(vm: &mut BytecodeVM, args: Vec<Value>, _kwargs: Kwargs) -> VmResult<Value> {
    arity("__next__", &args, 1, 1)?;
    let generator = generator_of(&args)?;
    vm.generator_send(&generator, Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_has_functions_and_types() {
        let namespace = builtins_namespace();
        assert!(matches!(namespace.get("len"), Some(Value::Builtin(_))));
        assert!(matches!(namespace.get("int"), Some(Value::Type(builtin::INT))));
        assert!(matches!(namespace.get("ValueError"), Some(Value::Type(builtin::VALUE_ERROR))));
        assert!(namespace.get("NotImplemented").is_some_and(|v| matches!(v, Value::NotImplemented)));
    }

    #[test]
    fn test_methods_are_bound_to_their_receiver() {
        let list = Value::list(vec![]);
        let Some(Value::BoundMethod(method)) = builtin_method(&list, "append") else {
            panic!("list.append should exist");
        };
        assert!(method.receiver.is_identical(&list));
        assert!(builtin_method(&list, "upper").is_none());
        assert!(builtin_method(&Value::from("x"), "upper").is_some());
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
