//! Decoded source instructions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// An undecoded instruction as supplied by the extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    pub opname: String,
    #[serde(default)]
    pub arg: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl RawInstruction {
    pub fn new(opname: impl Into<String>, arg: u32) -> Self {
        Self { opname: opname.into(), arg, line: None }
    }
}

/// An immutable decoded instruction
///
/// `offset` is the instruction index; the byte offset is `offset * 2`.
/// Refinements go through the `with_*` methods, which return modified copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    opname: Arc<str>,
    offset: usize,
    arg: u32,
    arg_repr: Option<Arc<str>>,
    line: Option<u32>,
    is_jump_target: bool,
    jump_target: Option<usize>,
}

impl Instruction {
    pub fn new(opname: impl Into<Arc<str>>, offset: usize, arg: u32) -> Self {
        Self {
            opname: opname.into(),
            offset,
            arg,
            arg_repr: None,
            line: None,
            is_jump_target: false,
            jump_target: None,
        }
    }

    #[inline]
    pub fn opname(&self) -> &str {
        &self.opname
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.offset * 2
    }

    #[inline]
    pub fn arg(&self) -> u32 {
        self.arg
    }

    #[inline]
    pub fn arg_repr(&self) -> Option<&str> {
        self.arg_repr.as_deref()
    }

    #[inline]
    pub fn line(&self) -> Option<u32> {
        self.line
    }

    #[inline]
    pub fn is_jump_target(&self) -> bool {
        self.is_jump_target
    }

    #[inline]
    pub fn jump_target(&self) -> Option<usize> {
        self.jump_target
    }

    pub fn with_arg(&self, arg: u32) -> Self {
        Self { arg, ..self.clone() }
    }

    pub fn with_arg_repr(&self, repr: impl Into<Arc<str>>) -> Self {
        Self { arg_repr: Some(repr.into()), ..self.clone() }
    }

    pub fn with_line(&self, line: Option<u32>) -> Self {
        Self { line, ..self.clone() }
    }

    pub fn with_jump_target(&self, target: usize) -> Self {
        Self { jump_target: Some(target), ..self.clone() }
    }

    pub fn with_is_jump_target(&self, is_jump_target: bool) -> Self {
        Self { is_jump_target, ..self.clone() }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_jump_target { ">>" } else { "  " };
        write!(f, "{} {:4} {:<24} {}", marker, self.byte_offset(), self.opname, self.arg)?;
        if let Some(repr) = &self.arg_repr {
            write!(f, " ({})", repr)?;
        }
        if let Some(target) = self.jump_target {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_methods_copy() {
        let base = Instruction::new("JUMP_FORWARD", 3, 2);
        let resolved = base.with_jump_target(6).with_line(Some(10));
        assert_eq!(base.jump_target(), None);
        assert_eq!(resolved.jump_target(), Some(6));
        assert_eq!(resolved.line(), Some(10));
        assert_eq!(resolved.byte_offset(), 6);
        assert!(resolved.to_string().contains("-> 6"));
    }
}
