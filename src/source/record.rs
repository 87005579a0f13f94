//! Function and class records handed over by the extractor.
//!
//! Records are plain serde structures, so they can be written by hand as
//! TOML for tests and the CLI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::instruction::RawInstruction;
use super::version::DialectVersion;
use crate::decode::{decode_code_units, DecodeResult};

/// A literal from the source constant pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Constant>),
    Code(Box<FunctionRecord>),
    Ellipsis,
    /// A value the extractor could not express; resolved through the host fallback
    Opaque(String),
}

impl Constant {
    /// Short literal rendering used as an instruction's argument repr
    pub fn repr(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => format!("'{}'", s),
            Self::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Constant::repr).collect();
                if inner.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Self::Code(record) => format!("<code {}>", record.qualname()),
            Self::Ellipsis => "Ellipsis".to_string(),
            Self::Opaque(desc) => format!("<opaque {}>", desc),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    #[default]
    Function,
    Generator,
    Coroutine,
}

/// A 3.11+ exception-table row, in instruction indices with `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionTableEntry {
    pub start: usize,
    pub end: usize,
    pub target: usize,
    pub depth: u16,
    #[serde(default)]
    pub lasti: bool,
}

/// One function's disassembled code object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    #[serde(default)]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub version: Option<DialectVersion>,
    #[serde(default)]
    pub instructions: Vec<RawInstruction>,
    /// Raw two-byte code units, used when `instructions` is empty
    #[serde(default)]
    pub code: Option<Vec<u8>>,
    /// Opcode names indexed by opcode byte, required with `code`
    #[serde(default)]
    pub opnames: Vec<String>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub varnames: Vec<String>,
    #[serde(default)]
    pub cellvars: Vec<String>,
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub argcount: u16,
    #[serde(default)]
    pub kwonlyargcount: u16,
    #[serde(default)]
    pub varargs: bool,
    #[serde(default)]
    pub varkeywords: bool,
    #[serde(default)]
    pub kind: CodeKind,
    /// Parameter name to type name, plus `return`
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub exception_table: Vec<ExceptionTableEntry>,
    #[serde(default = "default_first_line")]
    pub first_line: u32,
}

fn default_first_line() -> u32 {
    1
}

impl FunctionRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            qualified_name: None,
            version: None,
            instructions: Vec::new(),
            code: None,
            opnames: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            argcount: 0,
            kwonlyargcount: 0,
            varargs: false,
            varkeywords: false,
            kind: CodeKind::Function,
            annotations: BTreeMap::new(),
            exception_table: Vec::new(),
            first_line: 1,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn qualname(&self) -> &str {
        self.qualified_name.as_deref().unwrap_or(&self.name)
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.kind == CodeKind::Generator
    }

    /// Number of leading varnames bound by the call protocol
    pub fn param_count(&self) -> usize {
        self.argcount as usize
            + self.kwonlyargcount as usize
            + usize::from(self.varargs)
            + usize::from(self.varkeywords)
    }

    /// Index of the `*args` parameter
    pub fn varargs_index(&self) -> Option<usize> {
        self.varargs.then(|| (self.argcount + self.kwonlyargcount) as usize)
    }

    /// Index of the `**kwargs` parameter
    pub fn varkeywords_index(&self) -> Option<usize> {
        self.varkeywords
            .then(|| (self.argcount + self.kwonlyargcount) as usize + usize::from(self.varargs))
    }

    /// Instructions to decode: the explicit list, or the raw code units
    pub fn raw_instructions(&self) -> DecodeResult<Vec<RawInstruction>> {
        match &self.code {
            Some(code) if self.instructions.is_empty() => decode_code_units(code, &self.opnames),
            _ => Ok(self.instructions.clone()),
        }
    }

    /// Cell-or-free variable names in 3.11+ localsplus order, skipping cells that alias a parameter slot
    pub fn localsplus_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.varnames.iter().map(String::as_str).collect();
        for cell in &self.cellvars {
            if !self.varnames.contains(cell) {
                names.push(cell);
            }
        }
        names.extend(self.freevars.iter().map(String::as_str));
        names
    }
}

/// A value nested inside a class annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnnotationMetadata {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    /// A type referenced by name
    Type(String),
    Enum { type_name: String, variant: String },
    Array(Vec<AnnotationMetadata>),
    Nested(Annotation),
}

/// An annotation attached to a class, passed through to the artifact verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(default)]
    pub values: BTreeMap<String, AnnotationMetadata>,
}

/// One class with its methods and attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub qualified_name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Field name to type name
    #[serde(default)]
    pub field_types: BTreeMap<String, String>,
    #[serde(default)]
    pub superclasses: Vec<String>,
    #[serde(default)]
    pub methods: Vec<FunctionRecord>,
    #[serde(default)]
    pub static_methods: Vec<FunctionRecord>,
    #[serde(default)]
    pub class_methods: Vec<FunctionRecord>,
    #[serde(default)]
    pub static_attributes: BTreeMap<String, Constant>,
    #[serde(default)]
    pub version: Option<DialectVersion>,
}

impl ClassRecord {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            module: String::new(),
            annotations: Vec::new(),
            field_types: BTreeMap::new(),
            superclasses: Vec::new(),
            methods: Vec::new(),
            static_methods: Vec::new(),
            class_methods: Vec::new(),
            static_attributes: BTreeMap::new(),
            version: None,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Unqualified class name
    pub fn class_name(&self) -> &str {
        self.qualified_name.rsplit('.').next().unwrap_or(&self.qualified_name)
    }

    /// Base name used for generated artifacts
    pub fn artifact_base_name(&self) -> String {
        if self.module.is_empty() {
            self.qualified_name.clone()
        } else {
            format!("{}.{}", self.module, self.qualified_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_record_from_toml() {
        let text = r#"
            name = "add"
            version = "3.11"
            varnames = ["a", "b"]
            argcount = 2
            constants = [{ kind = "none" }, { kind = "int", value = 3 }, { kind = "tuple", value = [{ kind = "str", value = "x" }] }]

            [annotations]
            a = "int"
            return = "int"

            [[instructions]]
            opname = "LOAD_FAST"
            arg = 0

            [[instructions]]
            opname = "RETURN_VALUE"
        "#;
        let record = FunctionRecord::from_toml_str(text).expect("record should parse");
        assert_eq!(record.version, Some(DialectVersion::V3_11));
        assert_eq!(record.constants[1], Constant::Int(3));
        assert_eq!(record.constants[2].repr(), "('x',)");
        assert_eq!(record.instructions[1].arg, 0);
        assert_eq!(record.param_count(), 2);
        assert_eq!(record.qualname(), "add");
    }

    #[test]
    fn test_localsplus_skips_parameter_cells() {
        let mut record = FunctionRecord::new("f");
        record.varnames = vec!["x".into(), "y".into()];
        record.argcount = 1;
        record.cellvars = vec!["x".into(), "c".into()];
        record.freevars = vec!["outer".into()];
        assert_eq!(record.localsplus_names(), vec!["x", "y", "c", "outer"]);
    }

    #[test]
    fn test_class_record_annotations() {
        let text = r#"
            qualified_name = "Point"
            module = "geo"
            superclasses = ["Base"]

            [field_types]
            x = "int"

            [[annotations]]
            name = "Entity"
            values = { table = { kind = "str", value = "points" }, tags = { kind = "array", value = [{ kind = "int", value = 1 }] } }
        "#;
        let record = ClassRecord::from_toml_str(text).expect("class should parse");
        assert_eq!(record.artifact_base_name(), "geo.Point");
        assert_eq!(record.annotations[0].values["table"], AnnotationMetadata::Str("points".into()));
    }
}
