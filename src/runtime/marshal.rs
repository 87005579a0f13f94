//! Conversion between VM values and the host's value representation.
//!
//! Data crosses by copy: scalars and containers are rebuilt on the other
//! side. Instances cross as handles registered in [`EscapedObjects`], so the
//! host can hand them back without keeping them alive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::host::EscapedObjects;
use super::value::{HostObject, Table, Value};

/// A value as the host sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<HostValue>),
    Tuple(Vec<HostValue>),
    Map(Vec<(HostValue, HostValue)>),
    /// Handle of an instance registered as escaped
    Object(u64),
    /// Handle of an object the host owns
    Opaque(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// The value has no host representation
    Unsupported(&'static str),
    /// The handle names an instance that no longer exists
    StaleHandle(u64),
    /// A map key the VM cannot hash
    UnhashableKey,
}

impl fmt::Display for MarshalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "cannot pass {} to the host", what),
            Self::StaleHandle(handle) => write!(f, "object handle {} is no longer alive", handle),
            Self::UnhashableKey => write!(f, "unhashable map key"),
        }
    }
}

impl std::error::Error for MarshalError {}

/// Copy a VM value out to the host
pub fn to_host(value: &Value, escaped: &EscapedObjects) -> Result<HostValue, MarshalError> {
    let all = |items: &[Value]| items.iter().map(|v| to_host(v, escaped)).collect::<Result<Vec<_>, _>>();
    Ok(match value {
        Value::None => HostValue::None,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Int(n) => HostValue::Int(*n),
        Value::Float(f) => HostValue::Float(*f),
        Value::Str(s) => HostValue::Str(s.to_string()),
        Value::Tuple(items) => HostValue::Tuple(all(items)?),
        Value::List(items) => HostValue::List(all(&items.read())?),
        Value::Set(table) => HostValue::List(all(&table.read().keys())?),
        Value::Dict(table) => HostValue::Map(
            table
                .read()
                .items()
                .iter()
                .map(|(k, v)| Ok((to_host(k, escaped)?, to_host(v, escaped)?)))
                .collect::<Result<Vec<_>, MarshalError>>()?,
        ),
        Value::Instance(instance) => HostValue::Object(escaped.register(instance)),
        Value::Host(object) => HostValue::Opaque(object.handle),
        Value::Function(_) | Value::BoundMethod(_) | Value::Builtin(_) => return Err(MarshalError::Unsupported("a function")),
        Value::Generator(_) | Value::Iterator(_) => return Err(MarshalError::Unsupported("an iterator")),
        Value::Exception(_) => return Err(MarshalError::Unsupported("an exception")),
        _ => return Err(MarshalError::Unsupported("an internal value")),
    })
}

/// Rebuild a host value inside the VM
pub fn from_host(value: HostValue, escaped: &EscapedObjects) -> Result<Value, MarshalError> {
    Ok(match value {
        HostValue::None => Value::None,
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Int(n) => Value::Int(n),
        HostValue::Float(f) => Value::Float(f),
        HostValue::Str(s) => Value::from(s),
        HostValue::List(items) => Value::list(from_all(items, escaped)?),
        HostValue::Tuple(items) => Value::tuple(from_all(items, escaped)?),
        HostValue::Map(pairs) => {
            let mut table = Table::new();
            for (k, v) in pairs {
                let key = from_host(k, escaped)?;
                let hash = key.hash_key().ok_or(MarshalError::UnhashableKey)?;
                table.insert(hash, key, from_host(v, escaped)?);
            }
            Value::dict(table)
        }
        HostValue::Object(handle) => Value::Instance(escaped.get(handle).ok_or(MarshalError::StaleHandle(handle))?),
        HostValue::Opaque(handle) => Value::Host(Arc::new(HostObject { handle, repr: format!("<host object {}>", handle) })),
    })
}

fn from_all(items: Vec<HostValue>, escaped: &EscapedObjects) -> Result<Vec<Value>, MarshalError> {
    items.into_iter().map(|v| from_host(v, escaped)).collect()
}
