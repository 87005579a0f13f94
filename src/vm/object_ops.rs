//! Attributes, imports and string formatting for the bytecode VM.
//!
//! Attribute lookup checks instance state first, then the class chain of
//! loaded translated classes, then the methods of builtin values. Dunder
//! lookups skip instance state entirely (see `calls`).

use std::sync::Arc;

use tracing::debug;

use super::types::{VmError, VmResult};
use super::BytecodeVM;
use crate::runtime::builtins::builtin_method;
use crate::runtime::Value;
use crate::translator::MethodKind;
use crate::types::builtin::{self, ATTRIBUTE_ERROR, IMPORT_ERROR, TYPE_ERROR, VALUE_ERROR};
use crate::types::TypeId;

const FORMAT_CONVERSION_MASK: u8 = 0x03;
const FORMAT_HAVE_SPEC: u8 = 0x04;

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`
#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');
        let mut parsed = FormatSpec {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        };
        let mut i = 0;
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
            parsed.sign = c;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if parsed.align.is_none() {
                parsed.fill = '0';
                parsed.align = Some('=');
            }
            i += 1;
        }
        let digits = |from: usize| chars[from..].iter().take_while(|c| c.is_ascii_digit()).count();
        let width = digits(i);
        if width > 0 {
            parsed.width = chars[i..i + width].iter().collect::<String>().parse().ok()?;
            i += width;
        }
        if let Some(&c @ (',' | '_')) = chars.get(i) {
            parsed.grouping = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            let precision = digits(i + 1);
            if precision == 0 {
                return None;
            }
            parsed.precision = Some(chars[i + 1..i + 1 + precision].iter().collect::<String>().parse().ok()?);
            i += 1 + precision;
        }
        match &chars[i..] {
            [] => {}
            [c] if "bcdeEfFgGnosxX%".contains(*c) => parsed.ty = Some(*c),
            _ => return None,
        }
        Some(parsed)
    }

    fn sign_of(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }

    /// Pad `prefix + body` to the field width; `=` puts the padding between them
    fn pad(&self, prefix: &str, body: &str, default_align: char) -> String {
        let len = prefix.chars().count() + body.chars().count();
        if self.width <= len {
            return format!("{}{}", prefix, body);
        }
        let padding = self.width - len;
        let fill = |n: usize| std::iter::repeat(self.fill).take(n).collect::<String>();
        match self.align.unwrap_or(default_align) {
            '<' => format!("{}{}{}", prefix, body, fill(padding)),
            '^' => format!("{}{}{}{}", fill(padding / 2), prefix, body, fill(padding - padding / 2)),
            '=' => format!("{}{}{}", prefix, fill(padding), body),
            _ => format!("{}{}{}", fill(padding), prefix, body),
        }
    }
}

/// Insert `separator` every `every` digits from the right
fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let count = digits.chars().count();
    let mut grouped = String::with_capacity(digits.len() + count / every);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            grouped.push(separator);
        }
        grouped.push(c);
    }
    grouped
}

/// Mantissa and exponent of `{:.p$e}` output
fn split_exponent(text: &str) -> (&str, i32) {
    match text.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn scientific(magnitude: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, magnitude);
    let (mantissa, exp) = split_exponent(&text);
    format!("{}{}{:+03}", mantissa, if upper { 'E' } else { 'e' }, exp)
}

/// `g` presentation: fixed or scientific by exponent, trailing zeros removed
fn general(magnitude: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    let exp = if magnitude == 0.0 {
        0
    } else {
        split_exponent(&format!("{:.*e}", precision - 1, magnitude)).1
    };
    if (-4..precision as i32).contains(&exp) {
        let text = format!("{:.*}", (precision as i32 - 1 - exp) as usize, magnitude);
        if alternate { text } else { strip_zeros(&text).to_string() }
    } else {
        let text = format!("{:.*e}", precision - 1, magnitude);
        let (mantissa, exp) = split_exponent(&text);
        let mantissa = if alternate { mantissa } else { strip_zeros(mantissa) };
        format!("{}{}{:+03}", mantissa, if upper { 'E' } else { 'e' }, exp)
    }
}

fn format_float(f: f64, spec: &FormatSpec) -> Option<String> {
    let upper = matches!(spec.ty, Some('E' | 'F' | 'G'));
    let body = if !f.is_finite() {
        let text = if f.is_nan() { "nan" } else { "inf" };
        if upper { text.to_uppercase() } else { text.to_string() }
    } else {
        let magnitude = f.abs();
        match spec.ty {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G' | 'n') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(precision) => {
                    let text = general(magnitude, precision, spec.alternate, false);
                    if text.contains(['.', 'e']) { text } else { format!("{}.0", text) }
                }
                None => Value::Float(magnitude).repr(),
            },
            Some(_) => return None,
        }
    };
    let body = match spec.grouping {
        Some(separator) if f.is_finite() => {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            let (integer, rest) = body.split_at(split);
            format!("{}{}", group_digits(integer, separator, 3), rest)
        }
        _ => body,
    };
    let negative = f.is_sign_negative() && !f.is_nan();
    Some(spec.pad(spec.sign_of(negative), &body, '>'))
}

fn format_int(n: i64, spec: &FormatSpec) -> Option<String> {
    let magnitude = n.unsigned_abs();
    let (digits, prefix, every) = match spec.ty {
        None | Some('d' | 'n') => (magnitude.to_string(), "", 3),
        Some('b') => (format!("{:b}", magnitude), "0b", 4),
        Some('o') => (format!("{:o}", magnitude), "0o", 4),
        Some('x') => (format!("{:x}", magnitude), "0x", 4),
        Some('X') => (format!("{:X}", magnitude), "0X", 4),
        Some('c') => {
            let c = char::from_u32(u32::try_from(n).ok()?)?;
            return Some(spec.pad("", &c.to_string(), '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return format_float(n as f64, spec),
        Some(_) => return None,
    };
    if spec.precision.is_some() {
        return None;
    }
    let digits = match spec.grouping {
        Some(separator) => group_digits(&digits, separator, every),
        None => digits,
    };
    let prefix = format!("{}{}", spec.sign_of(n < 0), if spec.alternate { prefix } else { "" });
    Some(spec.pad(&prefix, &digits, '>'))
}

fn format_str(s: &str, spec: &FormatSpec) -> Option<String> {
    if !matches!(spec.ty, None | Some('s')) || spec.sign != '-' || spec.align == Some('=') {
        return None;
    }
    let text: String = match spec.precision {
        Some(precision) => s.chars().take(precision).collect(),
        None => s.to_string(),
    };
    Some(spec.pad("", &text, '<'))
}

/// `ascii()`: escape every non-ASCII character of a repr
fn ascii_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c as u32 {
            _ if c.is_ascii() => escaped.push(c),
            code @ 0..=0xFF => escaped.push_str(&format!("\\x{:02x}", code)),
            code @ 0..=0xFFFF => escaped.push_str(&format!("\\u{:04x}", code)),
            code => escaped.push_str(&format!("\\U{:08x}", code)),
        }
    }
    escaped
}

impl BytecodeVM {
    // === Type Names ===

    /// Short class name of a type id
    pub(super) fn class_name(&self, ty: TypeId) -> Arc<str> {
        if let Some(class) = self.classes.get(&ty) {
            return class.name.clone();
        }
        if let Some(name) = builtin::builtin_name(ty) {
            return Arc::from(name);
        }
        let name = self.registry.name_of(ty);
        match name.rsplit_once('.') {
            Some((_, short)) => Arc::from(short),
            None => name,
        }
    }

    /// `type(value).__name__`
    pub fn type_name(&self, value: &Value) -> Arc<str> {
        match value {
            Value::Builtin(_) => Arc::from("builtin_function_or_method"),
            Value::BoundMethod(_) => Arc::from("method"),
            other => self.class_name(other.type_id()),
        }
    }

    /// Whether the value's class chain includes a loaded translated class
    pub(super) fn has_class(&self, value: &Value) -> bool {
        match value {
            Value::Instance(_) | Value::Exception(_) if !self.classes.is_empty() => {
                let ty = value.type_id();
                self.classes.contains_key(&ty)
                    || self.registry.assignable_types(ty).iter().any(|t| self.classes.contains_key(t))
            }
            _ => false,
        }
    }

    /// Class attribute `name` along the class chain of `ty`, with its method kind
    pub(super) fn find_class_attr(&self, ty: TypeId, name: &str) -> Option<(Value, Option<MethodKind>)> {
        if self.classes.is_empty() {
            return None;
        }
        self.registry.assignable_types(ty).into_iter().find_map(|t| {
            let class = self.classes.get(&t)?;
            let attr = class.attrs.get(name)?;
            Some((attr, class.method_kinds.get(name).copied()))
        })
    }

    // === Attributes ===

    /// Attribute `name` of `object`, `None` when it has none
    pub fn lookup_attr(&mut self, object: &Value, name: &str) -> VmResult<Option<Value>> {
        if name == "__class__" {
            return Ok(Some(Value::Type(object.type_id())));
        }
        let found = match object {
            Value::Instance(instance) => {
                let field = instance.fields.read().get(name).cloned();
                field.or_else(|| self.class_attr(object, name))
            }
            Value::Exception(exc) => match name {
                "args" => Some(Value::tuple(exc.args.clone())),
                "__cause__" => Some(exc.cause.read().clone().unwrap_or(Value::None)),
                _ => {
                    let attr = exc.attrs.read().get(name).cloned();
                    attr.or_else(|| self.class_attr(object, name))
                }
            },
            Value::Type(ty) => match name {
                "__name__" => Some(Value::Str(self.class_name(*ty))),
                "__qualname__" => Some(Value::Str(self.registry.name_of(*ty))),
                _ => self.find_class_attr(*ty, name).map(|(attr, kind)| self.bind(object, attr, kind)),
            },
            Value::Module(module) => match name {
                "__name__" => Some(Value::Str(module.name.clone())),
                _ => module.attrs.get(name),
            },
            Value::Host(host_object) => self.host.get_attr(host_object, name),
            Value::Function(function) => match name {
                "__name__" => Some(Value::Str(function.chunk.info().name.clone())),
                "__qualname__" => Some(Value::Str(function.chunk.info().qualname.clone())),
                _ => None,
            },
            _ => builtin_method(object, name),
        };
        if found.is_some() || !self.has_class(object) {
            return Ok(found);
        }
        match self.call_dunder_result(object, "__getattr__", vec![Value::from(name)]) {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(VmError::Exception(Value::Exception(exc)))) if self.registry.is_subclass(exc.ty, ATTRIBUTE_ERROR) => {
                Ok(None)
            }
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// `object.name`, raising `AttributeError` when missing
    pub fn load_attr(&mut self, object: &Value, name: &str) -> VmResult<Value> {
        match self.lookup_attr(object, name)? {
            Some(value) => Ok(value),
            None => Err(self.missing_attr(object, name)),
        }
    }

    fn missing_attr(&self, object: &Value, name: &str) -> VmError {
        let message = match object {
            Value::Module(module) => format!("module '{}' has no attribute '{}'", module.name, name),
            Value::Type(ty) => format!("type object '{}' has no attribute '{}'", self.class_name(*ty), name),
            _ => format!("'{}' object has no attribute '{}'", self.type_name(object), name),
        };
        VmError::raise(ATTRIBUTE_ERROR, message)
    }

    /// `object.name = value`
    pub fn store_attr(&mut self, object: &Value, name: &str, value: Value) -> VmResult<()> {
        match object {
            Value::Instance(instance) => {
                instance.fields.write().insert(Arc::from(name), value);
            }
            Value::Exception(exc) if name == "__cause__" => {
                *exc.cause.write() = (!value.is_none()).then_some(value);
            }
            Value::Exception(exc) => {
                exc.attrs.write().insert(Arc::from(name), value);
            }
            Value::Type(ty) => match self.classes.get(ty) {
                Some(class) => class.attrs.set(name, value),
                None => {
                    return Err(VmError::raise(
                        TYPE_ERROR,
                        format!("cannot set '{}' attribute of immutable type '{}'", name, self.class_name(*ty)),
                    ))
                }
            },
            Value::Module(module) => module.attrs.set(name, value),
            _ => return Err(self.missing_attr(object, name)),
        }
        Ok(())
    }

    fn delete_attr(&mut self, object: &Value, name: &str) -> VmResult<()> {
        let removed = match object {
            Value::Instance(instance) => instance.fields.write().remove(name).is_some(),
            Value::Exception(exc) => exc.attrs.write().remove(name).is_some(),
            Value::Type(ty) => self.classes.get(ty).is_some_and(|class| class.attrs.remove(name).is_some()),
            Value::Module(module) => module.attrs.remove(name).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(self.missing_attr(object, name))
        }
    }

    pub(super) fn op_load_attr(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let object = self.pop()?;
        let value = self.load_attr(&object, &name)?;
        self.push(value);
        Ok(())
    }

    /// `[value, object]`
    pub(super) fn op_store_attr(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let object = self.pop()?;
        let value = self.pop()?;
        self.store_attr(&object, &name, value)
    }

    pub(super) fn op_delete_attr(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let object = self.pop()?;
        self.delete_attr(&object, &name)
    }

    // === Imports ===

    /// `[level, fromlist] -> [module]`
    ///
    /// Without a from-list a dotted import binds its top-level package.
    pub(super) fn op_import_name(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let fromlist = self.pop()?;
        let level = self.pop()?.as_int().unwrap_or(0);
        let module = self
            .host
            .import_module(&name, level)
            .ok_or_else(|| VmError::raise(IMPORT_ERROR, format!("No module named '{}'", name)))?;
        let binds_top = match &fromlist {
            Value::None => true,
            Value::Tuple(items) => items.is_empty(),
            _ => false,
        };
        let module = match name.split_once('.') {
            Some((top, _)) if binds_top => self.host.import_module(top, level).unwrap_or(module),
            _ => module,
        };
        debug!(target: "pytron::vm::call", module = %name, level, "import");
        self.push(module);
        Ok(())
    }

    /// `[module] -> [module, attr]`
    pub(super) fn op_import_from(&mut self) -> VmResult<()> {
        let name = self.read_name()?;
        let module = self.peek()?.clone();
        let value = match self.lookup_attr(&module, &name)? {
            Some(value) => value,
            None => {
                let submodule = match &module {
                    Value::Module(m) => self.host.import_module(&format!("{}.{}", m.name, name), 0),
                    _ => None,
                };
                submodule.ok_or_else(|| {
                    let from = match &module {
                        Value::Module(m) => m.name.to_string(),
                        other => other.repr(),
                    };
                    VmError::raise(IMPORT_ERROR, format!("cannot import name '{}' from '{}'", name, from))
                })?
            }
        };
        self.push(value);
        Ok(())
    }

    // === Strings ===

    /// `repr(value)`
    pub fn repr_of(&mut self, value: &Value) -> VmResult<String> {
        if self.has_class(value) {
            if let Some(result) = self.call_dunder(value, "__repr__", Vec::new())? {
                return match result {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Err(VmError::raise(
                        TYPE_ERROR,
                        format!("__repr__ returned non-string (type {})", self.type_name(&other)),
                    )),
                };
            }
            return Ok(match value {
                Value::Exception(exc) => {
                    let args = exc.args.clone();
                    let parts: Vec<String> = args.iter().map(|a| self.repr_of(a)).collect::<VmResult<_>>()?;
                    format!("{}({})", self.type_name(value), parts.join(", "))
                }
                _ => format!("<{} object>", self.type_name(value)),
            });
        }
        Ok(match value {
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|v| self.repr_of(v)).collect::<VmResult<_>>()?;
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::List(list) => {
                let items = list.read().clone();
                let parts: Vec<String> = items.iter().map(|v| self.repr_of(v)).collect::<VmResult<_>>()?;
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(table) => {
                let items = table.read().items().to_vec();
                let mut parts = Vec::with_capacity(items.len());
                for (key, item) in &items {
                    parts.push(format!("{}: {}", self.repr_of(key)?, self.repr_of(item)?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(table) => {
                let keys = table.read().keys();
                if keys.is_empty() {
                    "set()".to_string()
                } else {
                    let parts: Vec<String> = keys.iter().map(|v| self.repr_of(v)).collect::<VmResult<_>>()?;
                    format!("{{{}}}", parts.join(", "))
                }
            }
            Value::Type(ty) => format!("<class '{}'>", self.class_name(*ty)),
            Value::Instance(_) => format!("<{} object>", self.type_name(value)),
            other => other.repr(),
        })
    }

    /// `str(value)`
    pub fn str_of(&mut self, value: &Value) -> VmResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            _ if self.has_class(value) => {
                if let Some(result) = self.call_dunder(value, "__str__", Vec::new())? {
                    return match result {
                        Value::Str(s) => Ok(s.to_string()),
                        other => Err(VmError::raise(
                            TYPE_ERROR,
                            format!("__str__ returned non-string (type {})", self.type_name(&other)),
                        )),
                    };
                }
                match value {
                    Value::Exception(exc) => match exc.args.as_slice() {
                        [] => Ok(String::new()),
                        [single] => {
                            let single = single.clone();
                            self.str_of(&single)
                        }
                        _ => self.repr_of(&Value::tuple(exc.args.clone())),
                    },
                    _ => self.repr_of(value),
                }
            }
            Value::Exception(exc) => Ok(exc.message()),
            _ => self.repr_of(value),
        }
    }

    /// `format(value, spec)`
    fn format_with_spec(&mut self, value: &Value, spec: &str) -> VmResult<String> {
        if let Some(result) = self.call_dunder(value, "__format__", vec![Value::from(spec)])? {
            return match result {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(VmError::raise(
                    TYPE_ERROR,
                    format!("__format__ must return a str, not {}", self.type_name(&other)),
                )),
            };
        }
        if spec.is_empty() {
            return self.str_of(value);
        }
        let type_name = self.type_name(value);
        let parsed = FormatSpec::parse(spec).ok_or_else(|| {
            VmError::raise(VALUE_ERROR, format!("Invalid format specifier '{}' for object of type '{}'", spec, type_name))
        })?;
        let formatted = match value {
            Value::Int(_) | Value::Bool(_) => value.as_int().and_then(|n| format_int(n, &parsed)),
            Value::Float(f) => format_float(*f, &parsed),
            Value::Str(s) => format_str(s, &parsed),
            _ => {
                return Err(VmError::raise(
                    TYPE_ERROR,
                    format!("unsupported format string passed to {}.__format__", type_name),
                ))
            }
        };
        formatted.ok_or_else(|| match parsed.ty {
            Some(code) => VmError::raise(
                VALUE_ERROR,
                format!("Unknown format code '{}' for object of type '{}'", code, type_name),
            ),
            None => VmError::raise(
                VALUE_ERROR,
                format!("Invalid format specifier '{}' for object of type '{}'", spec, type_name),
            ),
        })
    }

    /// `[value, spec?] -> [str]`; the low bits select `!s`, `!r` or `!a`
    pub(super) fn op_format_value(&mut self) -> VmResult<()> {
        let flags = self.read_u8()?;
        let spec = if flags & FORMAT_HAVE_SPEC != 0 {
            match self.pop()? {
                Value::Str(spec) => spec,
                other => return Err(VmError::raise(TYPE_ERROR, format!("format spec must be str, not {}", self.type_name(&other)))),
            }
        } else {
            Arc::from("")
        };
        let value = self.pop()?;
        let value = match flags & FORMAT_CONVERSION_MASK {
            0 => value,
            1 => Value::from(self.str_of(&value)?),
            2 => Value::from(self.repr_of(&value)?),
            _ => Value::from(ascii_escape(&self.repr_of(&value)?)),
        };
        let text = self.format_with_spec(&value, &spec)?;
        self.push(Value::from(text));
        Ok(())
    }

    pub(super) fn op_build_string(&mut self) -> VmResult<()> {
        let count = usize::from(self.read_u16()?);
        let parts = self.pop_n(count)?;
        let mut text = String::new();
        for part in &parts {
            match part {
                Value::Str(s) => text.push_str(s),
                other => text.push_str(&self.str_of(other)?),
            }
        }
        self.push(Value::from(text));
        Ok(())
    }

    /// Interactive echo of an expression statement
    pub(super) fn op_print_expr(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        if !value.is_none() {
            let text = self.repr_of(&value)?;
            self.host.print(&format!("{}\n", text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt_int(n: i64, spec: &str) -> Option<String> {
        format_int(n, &FormatSpec::parse(spec)?)
    }

    fn fmt_float(f: f64, spec: &str) -> Option<String> {
        format_float(f, &FormatSpec::parse(spec)?)
    }

    #[test]
    fn test_parse_spec() {
        let spec = FormatSpec::parse("*^+#012,.3f").expect("valid spec");
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.sign, '+');
        assert!(spec.alternate);
        assert_eq!(spec.width, 12);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.ty, Some('f'));
        assert!(FormatSpec::parse(".f").is_none());
        assert!(FormatSpec::parse("5q").is_none());
    }

    #[test]
    fn test_format_int() {
        assert_eq!(fmt_int(42, "5").as_deref(), Some("   42"));
        assert_eq!(fmt_int(42, "<5").as_deref(), Some("42   "));
        assert_eq!(fmt_int(-42, "05").as_deref(), Some("-0042"));
        assert_eq!(fmt_int(255, "#x").as_deref(), Some("0xff"));
        assert_eq!(fmt_int(1234567, ",").as_deref(), Some("1,234,567"));
        assert_eq!(fmt_int(5, "+").as_deref(), Some("+5"));
        assert_eq!(fmt_int(65, "c").as_deref(), Some("A"));
        assert!(fmt_int(1, "s").is_none());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(fmt_float(3.14159, ".2f").as_deref(), Some("3.14"));
        assert_eq!(fmt_float(1234.5, ",.1f").as_deref(), Some("1,234.5"));
        assert_eq!(fmt_float(0.5, ".0%").as_deref(), Some("50%"));
        assert_eq!(fmt_float(12345.678, ".3e").as_deref(), Some("1.235e+04"));
        assert_eq!(fmt_float(0.0001234, "g").as_deref(), Some("0.0001234"));
        assert_eq!(fmt_float(1e20, "g").as_deref(), Some("1e+20"));
        assert_eq!(fmt_float(1.0, ".3").as_deref(), Some("1.0"));
        assert_eq!(fmt_float(-2.5, "8.2f").as_deref(), Some("   -2.50"));
    }

    #[test]
    fn test_format_str() {
        let spec = FormatSpec::parse("^7.3").expect("valid spec");
        assert_eq!(format_str("abcdef", &spec).as_deref(), Some("  abc  "));
        assert!(format_str("a", &FormatSpec::parse("d").expect("valid spec")).is_none());
    }

    #[test]
    fn test_ascii_escape() {
        assert_eq!(ascii_escape("'é'"), "'\\xe9'");
        assert_eq!(ascii_escape("'€'"), "'\\u20ac'");
    }
}
