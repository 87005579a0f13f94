//! Runtime support for translated code.
//!
//! - `value`: the value set the VM operates on
//! - `host`: the embedder boundary and escaped-object tracking
//! - `marshal`: copying values across that boundary
//! - `builtins`: the builtin namespace and the methods of builtin values

pub mod builtins;
pub mod host;
pub mod marshal;
pub mod value;

pub use host::{EscapedObjects, Host, StdHost};
pub use marshal::{from_host, to_host, HostValue, MarshalError};
pub use value::{
    BoundMethod, BuiltinFn, BuiltinFunction, Closure, ExceptionObject, GeneratorObject, HashKey, HostObject, Instance,
    IteratorState, ModuleObject, Namespace, SliceValue, Table, Value,
};
