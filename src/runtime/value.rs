//! Runtime values of the managed VM.
//!
//! Scalars are stored inline; containers and objects are reference counted
//! so copies on the operand stack alias the same object, as the source
//! language expects. Mutable containers use `parking_lot` locks because
//! generator frames and host callbacks may touch them from other threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::{Mutex, RwLock};

use crate::target::{BytecodeChunk, ValueKind};
use crate::types::{builtin, TypeId};
use crate::vm::{BytecodeVM, VmResult};

/// Native function signature: positional args (receiver first for methods) and keyword args
pub type BuiltinFn = fn(&mut BytecodeVM, Vec<Value>, Vec<(Arc<str>, Value)>) -> VmResult<Value>;

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// Call-protocol placeholder and "unbound" marker on the operand stack
    Null,
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(Arc<RwLock<Vec<Value>>>),
    Dict(Arc<RwLock<Table>>),
    Set(Arc<RwLock<Table>>),
    Slice(Arc<SliceValue>),
    Cell(Arc<RwLock<Option<Value>>>),
    Code(Arc<BytecodeChunk>),
    Function(Arc<Closure>),
    BoundMethod(Arc<BoundMethod>),
    Builtin(Arc<BuiltinFunction>),
    Iterator(Arc<Mutex<IteratorState>>),
    Generator(Arc<Mutex<GeneratorObject>>),
    Exception(Arc<ExceptionObject>),
    Type(TypeId),
    Instance(Arc<Instance>),
    Module(Arc<ModuleObject>),
    Host(Arc<HostObject>),
}

/// Shared name -> value mapping used for globals, modules and class bodies
#[derive(Debug, Default)]
pub struct Namespace {
    entries: RwLock<HashMap<Arc<str>, Value>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<Arc<str>>, value: Value) {
        self.entries.write().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.entries.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<Arc<str>> {
        self.entries.read().keys().cloned().collect()
    }
}

/// A function value: translated code plus everything captured at creation
#[derive(Debug)]
pub struct Closure {
    pub chunk: Arc<BytecodeChunk>,
    pub globals: Arc<Namespace>,
    /// Defaults for the trailing positional parameters
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(Arc<str>, Value)>,
    /// Captured cells, one per free variable
    pub cells: Vec<Value>,
}

impl Closure {
    pub fn new(chunk: Arc<BytecodeChunk>, globals: Arc<Namespace>) -> Self {
        Self { chunk, globals, defaults: Vec::new(), kwdefaults: Vec::new(), cells: Vec::new() }
    }

    pub fn qualname(&self) -> &str {
        &self.chunk.info().qualname
    }
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in {}>", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct SliceValue {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

#[derive(Debug)]
pub enum IteratorState {
    List { list: Arc<RwLock<Vec<Value>>>, pos: usize },
    Items { items: Arc<[Value]>, pos: usize },
    Range { next: i64, stop: i64, step: i64 },
    Done,
}

/// Suspended state of a translated generator function
#[derive(Debug)]
pub struct GeneratorObject {
    pub closure: Arc<Closure>,
    pub cells: Vec<Value>,
    pub saved_locals: Vec<Option<Value>>,
    /// Spilled operand stack across a suspension
    pub state: Vec<Value>,
    pub resume_index: i64,
    pub started: bool,
    pub finished: bool,
    pub running: bool,
    pub pending_throw: Option<Value>,
    pub sent: Option<Value>,
}

impl GeneratorObject {
    pub fn new(closure: Arc<Closure>, cells: Vec<Value>, locals: Vec<Option<Value>>) -> Self {
        let slots = closure.chunk.info().state_slots as usize;
        Self {
            closure,
            cells,
            saved_locals: locals,
            state: vec![Value::None; slots],
            resume_index: 0,
            started: false,
            finished: false,
            running: false,
            pending_throw: None,
            sent: None,
        }
    }
}

#[derive(Debug)]
pub struct ExceptionObject {
    pub ty: TypeId,
    pub type_name: Arc<str>,
    pub args: Vec<Value>,
    pub attrs: RwLock<HashMap<Arc<str>, Value>>,
    pub cause: RwLock<Option<Value>>,
}

impl ExceptionObject {
    pub fn new(ty: TypeId, type_name: impl Into<Arc<str>>, args: Vec<Value>) -> Self {
        Self {
            ty,
            type_name: type_name.into(),
            args,
            attrs: RwLock::new(HashMap::new()),
            cause: RwLock::new(None),
        }
    }

    /// The `str()` of the exception: its single argument, or the argument tuple
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] => single.to_string(),
            many => Value::Tuple(many.to_vec().into()).repr(),
        }
    }
}

#[derive(Debug)]
pub struct Instance {
    pub ty: TypeId,
    pub fields: RwLock<HashMap<Arc<str>, Value>>,
}

impl Instance {
    pub fn new(ty: TypeId) -> Self {
        Self { ty, fields: RwLock::new(HashMap::new()) }
    }
}

#[derive(Debug)]
pub struct ModuleObject {
    pub name: Arc<str>,
    pub attrs: Namespace,
}

/// Opaque object owned by the host
#[derive(Debug)]
pub struct HostObject {
    pub handle: u64,
    pub repr: String,
}

/// Hashable projection of a value used as a dict/set key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Ellipsis,
    Int(i64),
    Float(u64),
    Str(Arc<str>),
    Tuple(Vec<HashKey>),
    Type(TypeId),
    Identity(usize),
}

/// Insertion-ordered hash table backing dicts and sets
#[derive(Debug, Default, Clone)]
pub struct Table {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn insert(&mut self, hash: HashKey, key: Value, value: Value) {
        match self.index.get(&hash) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(hash, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &HashKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> &[(Value, Value)] {
        &self.entries
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn dict(table: Table) -> Self {
        Value::Dict(Arc::new(RwLock::new(table)))
    }

    pub fn set(table: Table) -> Self {
        Value::Set(Arc::new(RwLock::new(table)))
    }

    pub fn cell(content: Option<Value>) -> Self {
        Value::Cell(Arc::new(RwLock::new(content)))
    }

    /// Type of the value in the registry's lattice
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null => builtin::OBJECT,
            Value::None => builtin::NONE,
            Value::NotImplemented => builtin::NOT_IMPLEMENTED,
            Value::Ellipsis => builtin::ELLIPSIS,
            Value::Bool(_) => builtin::BOOL,
            Value::Int(_) => builtin::INT,
            Value::Float(_) => builtin::FLOAT,
            Value::Str(_) => builtin::STR,
            Value::Tuple(_) => builtin::TUPLE,
            Value::List(_) => builtin::LIST,
            Value::Dict(_) => builtin::DICT,
            Value::Set(_) => builtin::SET,
            Value::Slice(_) => builtin::SLICE,
            Value::Cell(_) => builtin::CELL,
            Value::Code(_) => builtin::CODE,
            Value::Function(_) | Value::BoundMethod(_) | Value::Builtin(_) => builtin::FUNCTION,
            Value::Iterator(_) => builtin::ITERATOR,
            Value::Generator(_) => builtin::GENERATOR,
            Value::Exception(e) => e.ty,
            Value::Type(_) => builtin::TYPE,
            Value::Instance(i) => i.ty,
            Value::Module(_) => builtin::MODULE,
            Value::Host(_) => builtin::OBJECT,
        }
    }

    /// Verifier kind of the value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Bool(_) => ValueKind::Bool,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::None => ValueKind::None,
            _ => ValueKind::Any,
        }
    }

    /// Integer view of ints and bools
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of numbers
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truth value for builtin types; `None` when a dunder must decide
    pub fn builtin_truthy(&self) -> Option<bool> {
        Some(match self {
            Value::None | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(items) => !items.read().is_empty(),
            Value::Dict(table) | Value::Set(table) => !table.read().is_empty(),
            Value::Instance(_) => return None,
            _ => true,
        })
    }

    /// Hash key for dict and set membership, `None` for unhashable values
    pub fn hash_key(&self) -> Option<HashKey> {
        Some(match self {
            Value::None => HashKey::None,
            Value::Ellipsis => HashKey::Ellipsis,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(n) => HashKey::Int(*n),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(items.iter().map(Value::hash_key).collect::<Option<Vec<_>>>()?),
            Value::Type(id) => HashKey::Type(*id),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => return None,
            other => HashKey::Identity(other.identity()),
        })
    }

    /// Address used for `is` on reference values
    pub fn identity(&self) -> usize {
        match self {
            Value::Tuple(v) => v.as_ptr() as usize,
            Value::List(v) => Arc::as_ptr(v) as usize,
            Value::Dict(v) | Value::Set(v) => Arc::as_ptr(v) as usize,
            Value::Slice(v) => Arc::as_ptr(v) as usize,
            Value::Cell(v) => Arc::as_ptr(v) as usize,
            Value::Code(v) => Arc::as_ptr(v) as usize,
            Value::Function(v) => Arc::as_ptr(v) as usize,
            Value::BoundMethod(v) => Arc::as_ptr(v) as usize,
            Value::Builtin(v) => Arc::as_ptr(v) as usize,
            Value::Iterator(v) => Arc::as_ptr(v) as usize,
            Value::Generator(v) => Arc::as_ptr(v) as usize,
            Value::Exception(v) => Arc::as_ptr(v) as usize,
            Value::Instance(v) => Arc::as_ptr(v) as usize,
            Value::Module(v) => Arc::as_ptr(v) as usize,
            Value::Host(v) => Arc::as_ptr(v) as usize,
            Value::Str(s) => s.as_ptr() as usize,
            _ => 0,
        }
    }

    /// Identity comparison (`is`)
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null)
            | (Value::None, Value::None)
            | (Value::NotImplemented, Value::NotImplemented)
            | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b) && a.identity() == b.identity(),
        }
    }

    /// Strict constant-pool equality: same variant and same payload
    pub fn is_same_constant(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::None, Value::None) | (Value::Ellipsis, Value::Ellipsis) => true,
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.is_same_constant(y))
            }
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Equality of builtin values; objects compare by identity
    pub fn builtin_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (a, b) if a.as_int().is_some() && b.as_int().is_some() => a.as_int() == b.as_int(),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.builtin_eq(y))
            }
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.builtin_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.items().iter().all(|(k, v)| {
                        k.hash_key().and_then(|h| b.get(&h).map(|w| v.builtin_eq(w))).unwrap_or(false)
                    })
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.items().iter().all(|(k, _)| k.hash_key().is_some_and(|h| b.contains(&h)))
            }
            (a, b) => a.is_identical(b),
        }
    }

    /// Source-language `repr()` for builtin values
    pub fn repr(&self) -> String {
        match self {
            Value::Null => "<NULL>".to_string(),
            Value::None => "None".to_string(),
            Value::NotImplemented => "NotImplemented".to_string(),
            Value::Ellipsis => "Ellipsis".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", items.iter().map(Value::repr).join(", ")),
            Value::List(items) => format!("[{}]", items.read().iter().map(Value::repr).join(", ")),
            Value::Dict(table) => format!(
                "{{{}}}",
                table.read().items().iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).join(", ")
            ),
            Value::Set(table) => {
                let table = table.read();
                if table.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", table.items().iter().map(|(k, _)| k.repr()).join(", "))
                }
            }
            Value::Slice(s) => format!("slice({}, {}, {})", s.start.repr(), s.stop.repr(), s.step.repr()),
            Value::Cell(_) => "<cell>".to_string(),
            Value::Code(chunk) => format!("<code object {}>", chunk.info().qualname),
            Value::Function(f) => format!("<function {}>", f.qualname()),
            Value::BoundMethod(m) => format!("<bound method {}>", m.function.repr()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
            Value::Iterator(_) => "<iterator>".to_string(),
            Value::Generator(g) => format!("<generator object {}>", g.lock().closure.qualname()),
            Value::Exception(e) => format!("{}({})", e.type_name, e.args.iter().map(Value::repr).join(", ")),
            Value::Type(id) => format!("<class '{}'>", builtin::builtin_name(*id).unwrap_or("object")),
            Value::Instance(i) => format!("<object of type #{}>", i.ty.0),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Host(h) => h.repr.clone(),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for Value {
    /// Source-language `str()`: strings print raw, exceptions print their message
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Exception(e) => f.write_str(&e.message()),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
            _ => self.builtin_eq(other),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_source_language() {
        assert_eq!(Value::None.repr(), "None");
        assert_eq!(Value::Bool(true).repr(), "True");
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::from("a'b").repr(), "'a\\'b'");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::list(vec![Value::Int(1), Value::from("x")]).repr(), "[1, 'x']");
        assert_eq!(Value::set(Table::new()).repr(), "set()");
    }

    #[test]
    fn test_numeric_keys_unify() {
        assert_eq!(Value::Int(1).hash_key(), Value::Bool(true).hash_key());
        assert_eq!(Value::Int(2).hash_key(), Value::Float(2.0).hash_key());
        assert!(Value::list(vec![]).hash_key().is_none());
    }

    #[test]
    fn test_table_preserves_insertion_order() {
        let mut table = Table::new();
        for (k, v) in [("b", 1), ("a", 2), ("c", 3)] {
            let key = Value::from(k);
            table.insert(key.hash_key().expect("hashable"), key, Value::Int(v));
        }
        table.remove(&HashKey::Str(Arc::from("a")));
        let keys: Vec<String> = table.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(table.get(&HashKey::Str(Arc::from("c"))), Some(&Value::Int(3)));
    }

    #[test]
    fn test_equality_and_identity() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        assert!(list.is_identical(&alias));
        assert!(!list.is_identical(&Value::list(vec![Value::Int(1)])));
        assert_eq!(list, Value::list(vec![Value::Int(1)]));
        assert!(Value::Int(1).builtin_eq(&Value::Float(1.0)));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }
}
