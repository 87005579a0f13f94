//! Jump-target resolution rules.
//!
//! Before 3.10 jump arguments count bytes, so they are halved to get an
//! instruction index. From 3.10 they count instructions directly.

use crate::source::DialectVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpRule {
    /// Not a jump
    None,
    /// Target is the argument itself
    Absolute,
    /// Target is counted forward from the next instruction
    Relative,
    /// Target is counted backward from the next instruction
    BackwardRelative,
}

impl JumpRule {
    /// Resolve the target instruction index; negative results mean a malformed jump
    pub fn resolve(self, offset: usize, arg: u32, version: DialectVersion) -> Option<i64> {
        let arg = if version.uses_byte_jumps() { i64::from(arg >> 1) } else { i64::from(arg) };
        let next = offset as i64 + 1;
        match self {
            Self::None => None,
            Self::Absolute => Some(arg),
            Self::Relative => Some(next + arg),
            Self::BackwardRelative => Some(next - arg),
        }
    }

    /// Argument that makes `resolve` produce `target`, if representable
    pub fn encode(self, offset: usize, target: usize, version: DialectVersion) -> Option<u32> {
        let next = offset as i64 + 1;
        let target = target as i64;
        let raw = match self {
            Self::None => return None,
            Self::Absolute => target,
            Self::Relative => target - next,
            Self::BackwardRelative => next - target,
        };
        let raw = u32::try_from(raw).ok()?;
        if version.uses_byte_jumps() {
            raw.checked_mul(2)
        } else {
            Some(raw)
        }
    }

    #[inline]
    pub fn is_jump(self) -> bool {
        self != Self::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_310_arguments_are_byte_offsets() {
        let v = DialectVersion::V3_9;
        assert_eq!(JumpRule::Absolute.resolve(4, 18, v), Some(9));
        assert_eq!(JumpRule::Relative.resolve(0, 18, v), Some(10));
        assert_eq!(JumpRule::None.resolve(0, 18, v), None);
    }

    #[test]
    fn test_post_310_arguments_are_indices() {
        let v = DialectVersion::V3_11;
        assert_eq!(JumpRule::Absolute.resolve(4, 18, v), Some(18));
        assert_eq!(JumpRule::Relative.resolve(9, 4, v), Some(14));
        assert_eq!(JumpRule::BackwardRelative.resolve(10, 4, v), Some(7));
        assert_eq!(JumpRule::BackwardRelative.resolve(0, 4, v), Some(-3));
    }
}
