//! Source dialect versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::decode::DecodeError;

/// A source bytecode dialect, ordered by release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DialectVersion {
    pub major: u8,
    pub minor: u8,
}

impl DialectVersion {
    pub const V3_9: Self = Self::new(3, 9);
    pub const V3_10: Self = Self::new(3, 10);
    pub const V3_11: Self = Self::new(3, 11);
    pub const V3_12: Self = Self::new(3, 12);

    /// Oldest dialect with a dispatch entry; floor lookups start here
    pub const MIN: Self = Self::V3_9;

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_supported(self) -> bool {
        self >= Self::V3_9 && self <= Self::V3_12
    }

    /// Jump arguments count bytes instead of instructions
    #[inline]
    pub fn uses_byte_jumps(self) -> bool {
        self < Self::V3_10
    }

    /// Handlers are set up by block-stack instructions instead of an exception table
    #[inline]
    pub fn has_block_stack(self) -> bool {
        self < Self::V3_11
    }

    #[inline]
    pub fn has_exception_table(self) -> bool {
        self >= Self::V3_11
    }
}

impl fmt::Display for DialectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for DialectVersion {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DecodeError::MalformedVersion(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(malformed)?;
        let major = major.parse().map_err(|_| malformed())?;
        let minor = minor.parse().map_err(|_| malformed())?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for DialectVersion {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DialectVersion> for String {
    fn from(version: DialectVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_order() {
        let v: DialectVersion = "3.10".parse().expect("valid version");
        assert_eq!(v, DialectVersion::V3_10);
        assert!(DialectVersion::V3_9 < DialectVersion::V3_10);
        assert!(DialectVersion::V3_12 > DialectVersion::V3_11);
        assert!("3".parse::<DialectVersion>().is_err());
        assert_eq!(DialectVersion::V3_11.to_string(), "3.11");
    }

    #[test]
    fn test_dialect_features() {
        assert!(DialectVersion::V3_9.uses_byte_jumps());
        assert!(!DialectVersion::V3_10.uses_byte_jumps());
        assert!(DialectVersion::V3_10.has_block_stack());
        assert!(DialectVersion::V3_11.has_exception_table());
        assert!(!DialectVersion::new(3, 8).is_supported());
        assert!(!DialectVersion::new(3, 13).is_supported());
    }
}
