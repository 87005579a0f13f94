//! Static resolution of operators against the type lattice.
//!
//! A resolution decides how the translator emits an operator: a typed target
//! opcode, a forward dunder dispatch with a known result type, a reflected
//! dispatch on the right operand, or a fully dynamic `BinaryOp`.

use super::builtin::{BOOL, OBJECT};
use super::operators::{BinaryOperator, CompareOperator, UnaryOperator};
use super::registry::{TypeKind, TypeRegistry};
use super::signature::FunctionSignature;
use super::TypeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryResolution {
    /// The left operand's forward dunder applies to the right operand
    Forward(FunctionSignature),
    /// The right operand's reflected dunder applies to the left operand
    Reflected(FunctionSignature),
    Dynamic,
}

impl BinaryResolution {
    pub fn result_type(&self) -> TypeId {
        match self {
            Self::Forward(sig) | Self::Reflected(sig) => sig.ret,
            Self::Dynamic => OBJECT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnaryResolution {
    Forward(FunctionSignature),
    /// `not`, always a truthiness test
    Truth,
    Dynamic,
}

impl UnaryResolution {
    pub fn result_type(&self) -> TypeId {
        match self {
            Self::Forward(sig) => sig.ret,
            Self::Truth => BOOL,
            Self::Dynamic => OBJECT,
        }
    }
}

pub fn resolve_binary(registry: &TypeRegistry, op: BinaryOperator, left: TypeId, right: TypeId) -> BinaryResolution {
    resolve_pair(registry, op.dunder(), op.reflected_dunder(), left, right)
}

pub fn resolve_compare(registry: &TypeRegistry, op: CompareOperator, left: TypeId, right: TypeId) -> BinaryResolution {
    resolve_pair(registry, op.dunder(), op.mirrored().dunder(), left, right)
}

pub fn resolve_unary(registry: &TypeRegistry, op: UnaryOperator, operand: TypeId) -> UnaryResolution {
    let Some(dunder) = op.dunder() else {
        return UnaryResolution::Truth;
    };
    registry
        .lookup_method(operand, dunder)
        .and_then(|set| set.resolve(registry, &[]).cloned())
        .map_or(UnaryResolution::Dynamic, UnaryResolution::Forward)
}

fn resolve_pair(
    registry: &TypeRegistry,
    forward: &str,
    reflected: &str,
    left: TypeId,
    right: TypeId,
) -> BinaryResolution {
    if left == OBJECT {
        return BinaryResolution::Dynamic;
    }
    if let Some(sig) = registry.lookup_method(left, forward).and_then(|set| set.resolve(registry, &[right]).cloned()) {
        return BinaryResolution::Forward(sig);
    }
    let left_is_builtin = registry
        .get(left)
        .is_some_and(|ty| matches!(ty.kind, TypeKind::Builtin | TypeKind::BuiltinValue));
    if left_is_builtin && right != OBJECT && right != left {
        if let Some(sig) = registry.lookup_method(right, reflected).and_then(|set| set.resolve(registry, &[left]).cloned()) {
            return BinaryResolution::Reflected(sig);
        }
    }
    BinaryResolution::Dynamic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Opcode as TargetOp;
    use crate::types::builtin::{FLOAT, INT, STR};
    use crate::types::signature::Emission;

    #[test]
    fn test_int_addition_is_intrinsic() {
        let registry = TypeRegistry::new();
        let resolution = resolve_binary(&registry, BinaryOperator::Add, INT, INT);
        assert!(matches!(resolution, BinaryResolution::Forward(ref sig) if sig.emission == Emission::Intrinsic(TargetOp::AddInt)));
        assert_eq!(resolution.result_type(), INT);
    }

    #[test]
    fn test_mixed_numeric_is_virtual() {
        let registry = TypeRegistry::new();
        let resolution = resolve_binary(&registry, BinaryOperator::Add, INT, FLOAT);
        assert!(matches!(resolution, BinaryResolution::Forward(ref sig) if sig.emission == Emission::Virtual));
        assert_eq!(resolution.result_type(), FLOAT);
    }

    #[test]
    fn test_reflected_dunder_on_user_type() {
        let registry = TypeRegistry::new();
        let num = registry.register_class("Num", &[]).expect("register");
        registry
            .add_method(num, FunctionSignature::new("__rsub__", vec![OBJECT], INT, Emission::Virtual))
            .expect("method");
        let resolution = resolve_binary(&registry, BinaryOperator::Subtract, INT, num);
        assert!(matches!(resolution, BinaryResolution::Reflected(ref sig) if sig.name.as_ref() == "__rsub__"));
        assert_eq!(resolution.result_type(), INT);
    }

    #[test]
    fn test_unknown_operands_are_dynamic() {
        let registry = TypeRegistry::new();
        assert_eq!(resolve_binary(&registry, BinaryOperator::Add, OBJECT, INT), BinaryResolution::Dynamic);
        assert_eq!(resolve_binary(&registry, BinaryOperator::Subtract, STR, INT), BinaryResolution::Dynamic);
    }

    #[test]
    fn test_comparison_and_unary() {
        let registry = TypeRegistry::new();
        let lt = resolve_compare(&registry, CompareOperator::Lt, INT, INT);
        assert!(matches!(lt, BinaryResolution::Forward(ref sig) if sig.emission == Emission::Intrinsic(TargetOp::LtInt)));
        assert_eq!(resolve_unary(&registry, UnaryOperator::Not, STR), UnaryResolution::Truth);
        assert_eq!(resolve_unary(&registry, UnaryOperator::Negative, INT).result_type(), INT);
        assert_eq!(resolve_unary(&registry, UnaryOperator::Negative, STR), UnaryResolution::Dynamic);
    }
}
