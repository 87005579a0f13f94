//! Decoding raw source instructions into typed opcode nodes.
//!
//! Decoding folds `EXTENDED_ARG` prefixes, resolves jump targets through the
//! version dispatch table, marks jump targets, and finally turns every
//! instruction into an opcode node via the same table.

pub mod families;
pub mod jump;
pub mod table;

use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

pub use jump::JumpRule;
pub use table::{dispatch_table, DispatchTable, OpcodeEntry};

use crate::opcodes::Opcode;
use crate::source::{DialectVersion, Instruction, RawInstruction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The opcode name is not known in any dialect
    UnknownOpcode { opname: String, offset: usize },
    /// The opcode is known but has no node in this dialect
    UnsupportedOpcode { opname: String, version: DialectVersion, offset: usize },
    UnsupportedVersion(DialectVersion),
    MalformedVersion(String),
    MalformedCode(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownOpcode { opname, offset } => {
                write!(f, "unknown opcode {} at instruction {}", opname, offset)
            }
            DecodeError::UnsupportedOpcode { opname, version, offset } => {
                write!(f, "opcode {} is not supported in {} (instruction {})", opname, version, offset)
            }
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported dialect version {}", v),
            DecodeError::MalformedVersion(s) => write!(f, "malformed dialect version '{}'", s),
            DecodeError::MalformedCode(msg) => write!(f, "malformed code: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Decode raw instructions for a dialect
///
/// `EXTENDED_ARG` entries are kept in place so offsets stay aligned; their
/// bits are folded into the following instruction's argument.
pub fn decode(raw: &[RawInstruction], version: DialectVersion) -> DecodeResult<Vec<Instruction>> {
    if !version.is_supported() {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let table = dispatch_table();
    let mut extended: u32 = 0;
    let mut decoded = Vec::with_capacity(raw.len());
    let mut targets = BTreeSet::new();

    for (offset, raw) in raw.iter().enumerate() {
        let entry = table.lookup(&raw.opname, version, offset)?;
        if raw.opname == "EXTENDED_ARG" {
            extended = (extended | raw.arg) << 8;
            decoded.push(Instruction::new(raw.opname.as_str(), offset, raw.arg).with_line(raw.line));
            continue;
        }
        let arg = extended | raw.arg;
        extended = 0;

        let mut instruction = Instruction::new(raw.opname.as_str(), offset, arg).with_line(raw.line);
        if let Some(target) = entry.jump.resolve(offset, arg, version) {
            let target = usize::try_from(target).map_err(|_| {
                DecodeError::MalformedCode(format!(
                    "{} at instruction {} jumps to negative index {}",
                    raw.opname, offset, target
                ))
            })?;
            targets.insert(target);
            instruction = instruction.with_jump_target(target);
        }
        decoded.push(instruction);
    }

    for target in targets {
        if let Some(instruction) = decoded.get_mut(target) {
            *instruction = instruction.with_is_jump_target(true);
        }
    }

    debug!(target: "pytron::decode", count = decoded.len(), %version, "decoded instructions");
    Ok(decoded)
}

/// Turn decoded instructions into opcode nodes
pub fn build_nodes(instructions: &[Instruction], version: DialectVersion) -> DecodeResult<Vec<Box<dyn Opcode>>> {
    let table = dispatch_table();
    instructions
        .iter()
        .map(|instruction| {
            let entry = table.lookup(instruction.opname(), version, instruction.offset())?;
            Ok((entry.factory)(instruction.clone()))
        })
        .collect()
}

/// Split raw two-byte code units into raw instructions
pub fn decode_code_units(code: &[u8], opnames: &[String]) -> DecodeResult<Vec<RawInstruction>> {
    if code.len() % 2 != 0 {
        return Err(DecodeError::MalformedCode(format!("odd code length {}", code.len())));
    }
    code.chunks_exact(2)
        .enumerate()
        .map(|(index, unit)| {
            let opname = opnames
                .get(unit[0] as usize)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    DecodeError::MalformedCode(format!("opcode byte {} at unit {} has no name", unit[0], index))
                })?;
            Ok(RawInstruction::new(opname.as_str(), u32::from(unit[1])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ops: &[(&str, u32)]) -> Vec<RawInstruction> {
        ops.iter().map(|(name, arg)| RawInstruction::new(*name, *arg)).collect()
    }

    #[test]
    fn test_extended_arg_folds_into_next() {
        let code = raw(&[("EXTENDED_ARG", 1), ("LOAD_CONST", 2), ("RETURN_VALUE", 0)]);
        let decoded = decode(&code, DialectVersion::V3_11).expect("decodes");
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].arg(), 258);
        assert_eq!(decoded[2].arg(), 0);
    }

    #[test]
    fn test_jump_targets_are_marked() {
        let code = raw(&[
            ("LOAD_FAST", 0),
            ("POP_JUMP_IF_FALSE", 8),
            ("LOAD_CONST", 0),
            ("RETURN_VALUE", 0),
            ("LOAD_CONST", 1),
            ("RETURN_VALUE", 0),
        ]);
        let decoded = decode(&code, DialectVersion::V3_9).expect("decodes");
        assert_eq!(decoded[1].jump_target(), Some(4));
        assert!(decoded[4].is_jump_target());
        assert!(!decoded[2].is_jump_target());
    }

    #[test]
    fn test_negative_jump_is_malformed() {
        let code = raw(&[("JUMP_BACKWARD", 5)]);
        assert!(matches!(decode(&code, DialectVersion::V3_11), Err(DecodeError::MalformedCode(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let code = raw(&[("NOP", 0)]);
        assert_eq!(
            decode(&code, DialectVersion::new(3, 8)),
            Err(DecodeError::UnsupportedVersion(DialectVersion::new(3, 8)))
        );
    }

    #[test]
    fn test_code_units() {
        let mut opnames = vec![String::new(); 256];
        opnames[100] = "LOAD_CONST".into();
        opnames[83] = "RETURN_VALUE".into();
        let units = decode_code_units(&[100, 0, 83, 0], &opnames).expect("decodes");
        assert_eq!(units[0], RawInstruction::new("LOAD_CONST", 0));
        assert_eq!(units[1].opname, "RETURN_VALUE");
        assert!(decode_code_units(&[100], &opnames).is_err());
        assert!(decode_code_units(&[1, 0], &opnames).is_err());
    }

    #[test]
    fn test_every_node_keeps_its_instruction() {
        let code = raw(&[("RESUME", 0), ("LOAD_CONST", 0), ("RETURN_VALUE", 0)]);
        let decoded = decode(&code, DialectVersion::V3_11).expect("decodes");
        let nodes = build_nodes(&decoded, DialectVersion::V3_11).expect("builds");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].instruction().opname(), "LOAD_CONST");
        assert_eq!(nodes[2].successors().len(), 0);
    }
}
