//! Function creation, calls and argument binding.
//!
//! Every call funnels through [`BytecodeVM::call_value`]: closures bind their
//! arguments into a fresh frame, bound methods prepend their receiver,
//! builtins receive the argument vectors as they are, and types construct
//! instances. Calling a generator function only creates the generator.

use std::sync::Arc;

use tracing::trace;

use super::types::{CallFrame, FrameExit, VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::{BoundMethod, Closure, ExceptionObject, GeneratorObject, Instance, SliceValue, Table, Value};
use crate::translator::MethodKind;
use crate::types::builtin::{
    self, BASE_EXCEPTION, BOOL, DICT, FLOAT, INT, LIST, OBJECT, OVERFLOW_ERROR, SET, SLICE, STR, TUPLE, TYPE,
    TYPE_ERROR, VALUE_ERROR,
};
use crate::types::TypeId;

type Kwargs = Vec<(Arc<str>, Value)>;

const FLAG_DEFAULTS: u8 = 0x01;
const FLAG_KWDEFAULTS: u8 = 0x02;
const FLAG_ANNOTATIONS: u8 = 0x04;
const FLAG_CLOSURE: u8 = 0x08;

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`
fn quoted_names(names: &[Arc<str>]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

fn parse_int(text: &str, base: u32) -> Option<i64> {
    let cleaned: String = text.trim().chars().filter(|&c| c != '_').collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let digits = match base {
        16 => digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")).unwrap_or(digits),
        8 => digits.strip_prefix("0o").or_else(|| digits.strip_prefix("0O")).unwrap_or(digits),
        2 => digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")).unwrap_or(digits),
        _ => digits,
    };
    let magnitude = i64::from_str_radix(digits, base).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

impl BytecodeVM {
    // === Function Creation ===

    /// `[defaults?, kwdefaults?, annotations?, closure?, code] -> [function]`
    pub(super) fn op_make_function(&mut self) -> VmResult<()> {
        let flags = self.read_u8()?;
        let chunk = match self.pop()? {
            Value::Code(chunk) => chunk,
            _ => return Err(self.invalid_operand(u32::from(flags))),
        };
        let mut closure = Closure::new(chunk, self.frame.globals.clone());
        if flags & FLAG_CLOSURE != 0 {
            let cells = self.pop()?;
            closure.cells = self.collect_items(&cells)?;
        }
        if flags & FLAG_ANNOTATIONS != 0 {
            self.pop()?;
        }
        if flags & FLAG_KWDEFAULTS != 0 {
            let kwdefaults = self.pop()?;
            closure.kwdefaults = self.keyword_pairs(&kwdefaults)?;
        }
        if flags & FLAG_DEFAULTS != 0 {
            let defaults = self.pop()?;
            closure.defaults = self.collect_items(&defaults)?;
        }
        self.push(Value::Function(Arc::new(closure)));
        Ok(())
    }

    /// String-keyed entries of a dict
    fn keyword_pairs(&self, mapping: &Value) -> VmResult<Kwargs> {
        let Value::Dict(table) = mapping else {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!("argument after ** must be a mapping, not {}", self.type_name(mapping)),
            ));
        };
        let table = table.read();
        table
            .items()
            .iter()
            .map(|(key, value)| match key {
                Value::Str(name) => Ok((name.clone(), value.clone())),
                _ => Err(VmError::raise(TYPE_ERROR, "keywords must be strings")),
            })
            .collect()
    }

    // === Call Instructions ===

    /// `[callable, args...] -> [result]`
    pub(super) fn op_call(&mut self) -> VmResult<()> {
        let argc = usize::from(self.read_u8()?);
        let args = self.pop_n(argc)?;
        let callable = self.pop()?;
        let result = self.call_value(callable, args, Vec::new())?;
        self.push(result);
        Ok(())
    }

    /// `[callable, args..., kwnames] -> [result]`; the last `len(kwnames)` args are keywords
    pub(super) fn op_call_kw(&mut self) -> VmResult<()> {
        let argc = usize::from(self.read_u8()?);
        let names = match self.pop()? {
            Value::Tuple(names) if names.len() <= argc => names,
            _ => return Err(self.invalid_operand(argc as u32)),
        };
        let mut args = self.pop_n(argc)?;
        let values = args.split_off(argc - names.len());
        let mut kwargs = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            match name {
                Value::Str(name) => kwargs.push((name.clone(), value)),
                _ => return Err(self.invalid_operand(argc as u32)),
            }
        }
        let callable = self.pop()?;
        let result = self.call_value(callable, args, kwargs)?;
        self.push(result);
        Ok(())
    }

    /// `[callable, args, kwargs?] -> [result]`
    pub(super) fn op_call_ex(&mut self) -> VmResult<()> {
        let flags = self.read_u8()?;
        let kwargs = if flags & 1 != 0 {
            let mapping = self.pop()?;
            self.keyword_pairs(&mapping)?
        } else {
            Vec::new()
        };
        let args = self.pop()?;
        let args = self.collect_items(&args)?;
        let callable = self.pop()?;
        let result = self.call_value(callable, args, kwargs)?;
        self.push(result);
        Ok(())
    }

    // === Call Protocol ===

    /// Call any callable value
    pub fn call_value(&mut self, callable: Value, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
        match callable {
            Value::Function(closure) => self.call_closure(&closure, args, kwargs),
            Value::BoundMethod(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                self.call_value(method.function.clone(), full, kwargs)
            }
            Value::Builtin(builtin) => (builtin.func)(self, args, kwargs),
            Value::Type(ty) => self.instantiate(ty, args, kwargs),
            other => match self.class_attr(&other, "__call__") {
                Some(method) => self.call_value(method, args, kwargs),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("'{}' object is not callable", self.type_name(&other)),
                )),
            },
        }
    }

    /// Bind arguments and run a closure, or create its generator
    pub(super) fn call_closure(&mut self, closure: &Arc<Closure>, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
        let locals = self.bind_arguments(closure, args, kwargs)?;
        let info = closure.chunk.info();
        let mut cells: Vec<Value> = Vec::with_capacity(info.cell_count());
        cells.extend(info.cell_names.iter().map(|_| Value::cell(None)));
        for &(cell, local) in &info.cell_args {
            if let (Some(Value::Cell(cell)), Some(value)) = (cells.get(usize::from(cell)), locals.get(usize::from(local)))
            {
                *cell.write() = value.clone();
            }
        }
        cells.extend(closure.cells.iter().cloned());

        trace!(
            target: "pytron::vm::call",
            function = %closure.qualname(),
            depth = self.call_stack.len(),
            generator = info.is_generator,
            "call"
        );

        if info.is_generator {
            let generator = GeneratorObject::new(closure.clone(), cells, locals);
            return Ok(Value::Generator(Arc::new(parking_lot::Mutex::new(generator))));
        }

        let mut frame = CallFrame::new(closure.chunk.clone(), closure.globals.clone());
        frame.locals = locals;
        frame.cells = cells;
        match self.execute(frame)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(VmError::Runtime(format!("{} yielded outside a generator", closure.qualname()))),
        }
    }

    /// Local slots for a call: positionals, keyword-only parameters, then `*args` and `**kwargs`
    fn bind_arguments(&mut self, closure: &Closure, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Vec<Option<Value>>> {
        let info = closure.chunk.info();
        let fname = info.qualname.clone();
        let argc = usize::from(info.arg_count);
        let kwonly = usize::from(info.kwonly_count);
        let mut locals: Vec<Option<Value>> = vec![None; info.local_count().max(info.param_count())];

        let given = args.len();
        let mut args = args.into_iter();
        for slot in locals.iter_mut().take(argc.min(given)) {
            *slot = args.next();
        }
        let extra: Vec<Value> = args.collect();
        if info.has_varargs {
            locals[argc + kwonly] = Some(Value::tuple(extra));
        } else if !extra.is_empty() {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!(
                    "{}() takes {} but {} {} given",
                    fname,
                    plural(argc, "positional argument"),
                    given,
                    if given == 1 { "was" } else { "were" }
                ),
            ));
        }

        let mut varkw = Table::new();
        for (name, value) in kwargs {
            let slot = info.local_names[..argc + kwonly].iter().position(|n| *n == name);
            match slot {
                Some(slot) if locals[slot].is_some() => {
                    return Err(VmError::raise(
                        TYPE_ERROR,
                        format!("{}() got multiple values for argument '{}'", fname, name),
                    ))
                }
                Some(slot) => locals[slot] = Some(value),
                None if info.has_varkw => {
                    let key = Value::Str(name);
                    let hash = self.hash_key_of(&key)?;
                    varkw.insert(hash, key, value);
                }
                None => {
                    return Err(VmError::raise(
                        TYPE_ERROR,
                        format!("{}() got an unexpected keyword argument '{}'", fname, name),
                    ))
                }
            }
        }
        if info.has_varkw {
            locals[argc + kwonly + usize::from(info.has_varargs)] = Some(Value::dict(varkw));
        }

        let first_default = argc.saturating_sub(closure.defaults.len());
        let mut missing = Vec::new();
        for slot in 0..argc {
            if locals[slot].is_none() {
                match closure.defaults.get(slot.wrapping_sub(first_default)) {
                    Some(default) if slot >= first_default => locals[slot] = Some(default.clone()),
                    _ => missing.push(info.local_names[slot].clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!(
                    "{}() missing {}: {}",
                    fname,
                    plural(missing.len(), "required positional argument"),
                    quoted_names(&missing)
                ),
            ));
        }

        for slot in argc..argc + kwonly {
            if locals[slot].is_none() {
                let name = &info.local_names[slot];
                match closure.kwdefaults.iter().find(|(k, _)| k == name) {
                    Some((_, default)) => locals[slot] = Some(default.clone()),
                    None => missing.push(name.clone()),
                }
            }
        }
        if !missing.is_empty() {
            return Err(VmError::raise(
                TYPE_ERROR,
                format!(
                    "{}() missing {}: {}",
                    fname,
                    plural(missing.len(), "required keyword-only argument"),
                    quoted_names(&missing)
                ),
            ));
        }
        Ok(locals)
    }

    // === Construction ===

    /// Call a type: builtin conversions, exceptions, or a translated class
    pub(super) fn instantiate(&mut self, ty: TypeId, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
        if ty.0 < builtin::BUILTIN_COUNT {
            return self.construct_builtin(ty, args, kwargs);
        }
        let value = if self.registry.is_subclass(ty, BASE_EXCEPTION) {
            Value::Exception(Arc::new(ExceptionObject::new(ty, self.class_name(ty), args.clone())))
        } else {
            Value::Instance(Arc::new(Instance::new(ty)))
        };
        match self.class_attr(&value, "__init__") {
            Some(init) => {
                let result = self.call_value(init, args, kwargs)?;
                if !result.is_none() {
                    return Err(VmError::raise(
                        TYPE_ERROR,
                        format!("__init__() should return None, not '{}'", self.type_name(&result)),
                    ));
                }
            }
            None if matches!(value, Value::Instance(_)) && !(args.is_empty() && kwargs.is_empty()) => {
                return Err(VmError::raise(TYPE_ERROR, format!("{}() takes no arguments", self.class_name(ty))));
            }
            None => {}
        }
        Ok(value)
    }

    fn construct_builtin(&mut self, ty: TypeId, args: Vec<Value>, kwargs: Kwargs) -> VmResult<Value> {
        let name = builtin::builtin_name(ty).unwrap_or("object");
        if builtin::is_builtin_exception(ty) {
            return Ok(Value::Exception(Arc::new(ExceptionObject::new(ty, name, args))));
        }
        if ty == DICT {
            let dict = Value::dict(Table::new());
            if let Some(source) = args.first() {
                self.merge_mapping(&dict, source)?;
            }
            for (key, value) in kwargs {
                self.set_item(dict.clone(), Value::Str(key), value)?;
            }
            return Ok(dict);
        }
        if !kwargs.is_empty() {
            return Err(VmError::raise(TYPE_ERROR, format!("{}() takes no keyword arguments", name)));
        }
        let arg = args.first().cloned();
        Ok(match (ty, arg) {
            (INT, None) => Value::Int(0),
            (INT, Some(value)) => self.to_int(&value, args.get(1))?,
            (FLOAT, None) => Value::Float(0.0),
            (FLOAT, Some(value)) => self.to_float(&value)?,
            (STR, None) => Value::from(""),
            (STR, Some(value)) => Value::from(self.str_of(&value)?),
            (BOOL, None) => Value::Bool(false),
            (BOOL, Some(value)) => Value::Bool(self.truthy(&value)?),
            (TUPLE, None) => Value::tuple(Vec::new()),
            (TUPLE, Some(Value::Tuple(items))) => Value::Tuple(items),
            (TUPLE, Some(value)) => Value::tuple(self.collect_items(&value)?),
            (LIST, None) => Value::list(Vec::new()),
            (LIST, Some(value)) => Value::list(self.collect_items(&value)?),
            (SET, value) => {
                let mut table = Table::new();
                if let Some(value) = value {
                    for item in self.collect_items(&value)? {
                        let hash = self.hash_key_of(&item)?;
                        table.insert(hash, item, Value::None);
                    }
                }
                Value::set(table)
            }
            (TYPE, Some(value)) if args.len() == 1 => Value::Type(value.type_id()),
            (SLICE, Some(_)) => {
                let (start, stop, step) = match args.as_slice() {
                    [stop] => (Value::None, stop.clone(), Value::None),
                    [start, stop] => (start.clone(), stop.clone(), Value::None),
                    [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
                    _ => return Err(VmError::raise(TYPE_ERROR, "slice expected at most 3 arguments")),
                };
                Value::Slice(Arc::new(SliceValue { start, stop, step }))
            }
            (OBJECT, None) => Value::Instance(Arc::new(Instance::new(OBJECT))),
            _ => return Err(VmError::raise(TYPE_ERROR, format!("cannot create '{}' instances", name))),
        })
    }

    fn to_int(&mut self, value: &Value, base: Option<&Value>) -> VmResult<Value> {
        if let Some(base) = base {
            let base = base.as_int().filter(|b| (2..=36).contains(b)).ok_or_else(|| {
                VmError::raise(VALUE_ERROR, "int() base must be >= 2 and <= 36, or 0")
            })?;
            let Value::Str(text) = value else {
                return Err(VmError::raise(TYPE_ERROR, "int() can't convert non-string with explicit base"));
            };
            return parse_int(text, base as u32).map(Value::Int).ok_or_else(|| {
                VmError::raise(
                    VALUE_ERROR,
                    format!("invalid literal for int() with base {}: {}", base, value.repr()),
                )
            });
        }
        match value {
            Value::Int(_) => Ok(value.clone()),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Float(f) if f.is_nan() => Err(VmError::raise(VALUE_ERROR, "cannot convert float NaN to integer")),
            Value::Float(f) if f.is_infinite() => {
                Err(VmError::raise(OVERFLOW_ERROR, "cannot convert float infinity to integer"))
            }
            Value::Float(f) => {
                let truncated = f.trunc();
                if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
                    return Err(VmError::raise(OVERFLOW_ERROR, "int too large to convert"));
                }
                Ok(Value::Int(truncated as i64))
            }
            Value::Str(text) => parse_int(text, 10).map(Value::Int).ok_or_else(|| {
                VmError::raise(VALUE_ERROR, format!("invalid literal for int() with base 10: {}", value.repr()))
            }),
            _ => match self.call_dunder(value, "__int__", Vec::new())? {
                Some(result) => Ok(result),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        self.type_name(value)
                    ),
                )),
            },
        }
    }

    fn to_float(&mut self, value: &Value) -> VmResult<Value> {
        if let Some(f) = value.as_float() {
            return Ok(Value::Float(f));
        }
        match value {
            Value::Str(text) => {
                let cleaned: String = text.trim().chars().filter(|&c| c != '_').collect();
                cleaned.parse::<f64>().map(Value::Float).map_err(|_| {
                    VmError::raise(VALUE_ERROR, format!("could not convert string to float: {}", value.repr()))
                })
            }
            _ => match self.call_dunder(value, "__float__", Vec::new())? {
                Some(result) => Ok(result),
                None => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("float() argument must be a string or a real number, not '{}'", self.type_name(value)),
                )),
            },
        }
    }

    // === Dunder Dispatch ===

    /// Attribute `name` of the receiver's class, bound to the receiver
    ///
    /// Only translated classes are searched; builtin values have no class
    /// namespace here. Instance fields never shadow these lookups.
    pub(super) fn class_attr(&self, receiver: &Value, name: &str) -> Option<Value> {
        if !self.has_class(receiver) {
            return None;
        }
        let (attr, kind) = self.find_class_attr(receiver.type_id(), name)?;
        Some(self.bind(receiver, attr, kind))
    }

    /// Bind a class attribute for access through `receiver`
    ///
    /// A type receiver leaves instance methods unbound.
    pub(super) fn bind(&self, receiver: &Value, attr: Value, kind: Option<MethodKind>) -> Value {
        let bound = |receiver: Value, function: Value| Value::BoundMethod(Arc::new(BoundMethod { receiver, function }));
        let is_function = matches!(attr, Value::Function(_));
        match (kind, receiver) {
            (Some(MethodKind::Static), _) => attr,
            (Some(MethodKind::Class), Value::Type(_)) => bound(receiver.clone(), attr),
            (Some(MethodKind::Class), _) => bound(Value::Type(receiver.type_id()), attr),
            (_, Value::Type(_)) => attr,
            _ if is_function => bound(receiver.clone(), attr),
            _ => attr,
        }
    }

    /// Call dunder `name` on a translated-class receiver; `None` when the class lacks it
    pub(super) fn call_dunder_result(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> Option<VmResult<Value>> {
        let method = self.class_attr(receiver, name)?;
        Some(self.call_value(method, args, Vec::new()))
    }

    pub(super) fn call_dunder(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        self.call_dunder_result(receiver, name, args).transpose()
    }

    /// `receiver.name(*args)`
    pub(super) fn call_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let method = self.load_attr(receiver, name)?;
        self.call_value(method, args, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_names() {
        let names: Vec<Arc<str>> = vec![Arc::from("a"), Arc::from("b"), Arc::from("c")];
        assert_eq!(quoted_names(&names[..1]), "'a'");
        assert_eq!(quoted_names(&names[..2]), "'a' and 'b'");
        assert_eq!(quoted_names(&names), "'a', 'b', and 'c'");
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-1_000", 10), Some(-1000));
        assert_eq!(parse_int("0xff", 16), Some(255));
        assert_eq!(parse_int("12a", 10), None);
    }
}
