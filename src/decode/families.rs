//! Registration of every opcode family into the dispatch table.
//!
//! Each opcode is registered with the dialect it first appears in and, where
//! it changes or disappears, the dialects where that happens.

use super::jump::JumpRule;
use super::table::{DispatchTable, DispatchTableBuilder};
use crate::opcodes::collection::{
    BuildCollection, BuildSlice, CollectionKind, ListToTuple, UnpackEx, UnpackSequence, UpdateCollection, UpdateKind,
};
use crate::opcodes::control::{ForIter, GetIter, Jump, JumpCondition, JumpIfOrPop, PopJumpIf, ReturnConst, ReturnValue};
use crate::opcodes::dunder::{
    BinaryOperation, BinarySlice, Compare, ContainsOp, DeleteSubscript, IsOp, StoreSlice, StoreSubscript, Subscript,
    UnaryOperation,
};
use crate::opcodes::exception::{
    BeforeWith, CheckExcMatch, JumpIfNotExcMatch, LoadAssertionError, PopBlock, PopExcept, PushExcInfo,
    RaiseVarargs, Reraise, SetupFinally, SetupWith, WithExceptStart,
};
use crate::opcodes::function::{Call, CallForm, CallFunctionEx, KwNames, LoadMethod, MakeFunction};
use crate::opcodes::generator::{EndSend, GenStart, GetYieldFromIter, ReturnGenerator, Send, YieldFrom, YieldValue};
use crate::opcodes::meta::{CallIntrinsic1, Nop};
use crate::opcodes::module::{ImportFrom, ImportName};
use crate::opcodes::object::{DeleteAttr, LoadAttr, StoreAttr};
use crate::opcodes::stack::{CopyItem, DupTopTwo, PopTop, PushNull, Rotate, Swap};
use crate::opcodes::string::{BuildString, FormatValue, PrintExpr};
use crate::opcodes::variable::{
    DeleteDeref, DeleteFast, DeleteGlobal, LoadClosure, LoadConst, LoadDeref, LoadFast, LoadFastAndClear, LoadGlobal,
    StoreDeref, StoreFast, StoreGlobal,
};
use crate::opcodes::{Opcode, OpcodeFactory};
use crate::source::{DialectVersion as V, Instruction};

macro_rules! node {
    (|$i:ident| $body:expr) => {
        (|$i: Instruction| -> Box<dyn Opcode> { Box::new($body) }) as OpcodeFactory
    };
    ($ctor:path) => {
        (|i: Instruction| -> Box<dyn Opcode> { Box::new($ctor(i)) }) as OpcodeFactory
    };
}

/// Opcodes that decode but have no lowering in any dialect
const UNSUPPORTED: &[&str] = &[
    "LOAD_BUILD_CLASS",
    "SETUP_ANNOTATIONS",
    "IMPORT_STAR",
    "LOAD_CLASSDEREF",
    "CLEANUP_THROW",
    "GET_AWAITABLE",
    "GET_AITER",
    "GET_ANEXT",
    "BEFORE_ASYNC_WITH",
    "SETUP_ASYNC_WITH",
    "END_ASYNC_FOR",
    "ASYNC_GEN_WRAP",
];

/// 3.9/3.10 operator opcodes, replaced by `BINARY_OP`
const LEGACY_BINARY: &[&str] = &[
    "BINARY_ADD",
    "INPLACE_ADD",
    "BINARY_SUBTRACT",
    "INPLACE_SUBTRACT",
    "BINARY_MULTIPLY",
    "INPLACE_MULTIPLY",
    "BINARY_MATRIX_MULTIPLY",
    "INPLACE_MATRIX_MULTIPLY",
    "BINARY_TRUE_DIVIDE",
    "INPLACE_TRUE_DIVIDE",
    "BINARY_FLOOR_DIVIDE",
    "INPLACE_FLOOR_DIVIDE",
    "BINARY_MODULO",
    "INPLACE_MODULO",
    "BINARY_POWER",
    "INPLACE_POWER",
    "BINARY_LSHIFT",
    "INPLACE_LSHIFT",
    "BINARY_RSHIFT",
    "INPLACE_RSHIFT",
    "BINARY_AND",
    "INPLACE_AND",
    "BINARY_OR",
    "INPLACE_OR",
    "BINARY_XOR",
    "INPLACE_XOR",
];

/// Register an opcode that first appears in `version`
fn added(b: &mut DispatchTableBuilder, opname: &'static str, version: V, factory: OpcodeFactory) {
    b.op(opname).removed_in(V::MIN).since(version, factory);
}

/// Register an opcode present from the oldest dialect until `version`
fn until(b: &mut DispatchTableBuilder, opname: &'static str, version: V, factory: OpcodeFactory) {
    b.op(opname).since(V::MIN, factory).removed_in(version);
}

fn stack(b: &mut DispatchTableBuilder) {
    b.simple("POP_TOP", node!(PopTop::new));
    until(b, "ROT_TWO", V::V3_11, node!(|i| Rotate::new(i, 2)));
    until(b, "ROT_THREE", V::V3_11, node!(|i| Rotate::new(i, 3)));
    until(b, "ROT_FOUR", V::V3_11, node!(|i| Rotate::new(i, 4)));
    b.op("ROT_N")
        .removed_in(V::MIN)
        .since(V::V3_10, node!(Rotate::from_arg))
        .removed_in(V::V3_11);
    until(b, "DUP_TOP", V::V3_11, node!(CopyItem::top));
    until(b, "DUP_TOP_TWO", V::V3_11, node!(DupTopTwo::new));
    added(b, "COPY", V::V3_11, node!(CopyItem::from_arg));
    added(b, "SWAP", V::V3_11, node!(Swap::new));
    added(b, "PUSH_NULL", V::V3_11, node!(PushNull::new));
    added(b, "END_FOR", V::V3_12, node!(PopTop::end_for));
}

fn variable(b: &mut DispatchTableBuilder) {
    b.simple("LOAD_CONST", node!(LoadConst::new));
    b.simple("LOAD_FAST", node!(LoadFast::new));
    added(b, "LOAD_FAST_CHECK", V::V3_12, node!(LoadFast::new));
    added(b, "LOAD_FAST_AND_CLEAR", V::V3_12, node!(LoadFastAndClear::new));
    b.simple("STORE_FAST", node!(StoreFast::new));
    b.simple("DELETE_FAST", node!(DeleteFast::new));
    b.op("LOAD_GLOBAL")
        .since(V::MIN, node!(LoadGlobal::new))
        .since(V::V3_11, node!(LoadGlobal::with_null_bit));
    b.simple("STORE_GLOBAL", node!(StoreGlobal::new));
    b.simple("DELETE_GLOBAL", node!(DeleteGlobal::new));
    b.simple("LOAD_NAME", node!(LoadGlobal::new));
    b.simple("STORE_NAME", node!(StoreGlobal::new));
    b.simple("DELETE_NAME", node!(DeleteGlobal::new));
    b.simple("LOAD_CLOSURE", node!(LoadClosure::new));
    b.simple("LOAD_DEREF", node!(LoadDeref::new));
    b.simple("STORE_DEREF", node!(StoreDeref::new));
    b.simple("DELETE_DEREF", node!(DeleteDeref::new));
}

fn control(b: &mut DispatchTableBuilder) {
    b.simple("RETURN_VALUE", node!(ReturnValue::new));
    added(b, "RETURN_CONST", V::V3_12, node!(ReturnConst::new));

    b.op("JUMP_FORWARD").since(V::MIN, node!(Jump::new)).jump(V::MIN, JumpRule::Relative);
    until(b, "JUMP_ABSOLUTE", V::V3_11, node!(Jump::new));
    b.op("JUMP_ABSOLUTE").jump(V::MIN, JumpRule::Absolute);
    for name in ["JUMP_BACKWARD", "JUMP_BACKWARD_NO_INTERRUPT"] {
        added(b, name, V::V3_11, node!(Jump::new));
        b.op(name).jump(V::V3_11, JumpRule::BackwardRelative);
    }

    b.op("POP_JUMP_IF_TRUE")
        .since(V::MIN, node!(|i| PopJumpIf::new(i, JumpCondition::IfTrue)))
        .removed_in(V::V3_11)
        .since(V::V3_12, node!(|i| PopJumpIf::new(i, JumpCondition::IfTrue)))
        .jump(V::MIN, JumpRule::Absolute)
        .jump(V::V3_12, JumpRule::Relative);
    b.op("POP_JUMP_IF_FALSE")
        .since(V::MIN, node!(|i| PopJumpIf::new(i, JumpCondition::IfFalse)))
        .removed_in(V::V3_11)
        .since(V::V3_12, node!(|i| PopJumpIf::new(i, JumpCondition::IfFalse)))
        .jump(V::MIN, JumpRule::Absolute)
        .jump(V::V3_12, JumpRule::Relative);
    added(b, "POP_JUMP_IF_NONE", V::V3_12, node!(|i| PopJumpIf::new(i, JumpCondition::IfNone)));
    added(b, "POP_JUMP_IF_NOT_NONE", V::V3_12, node!(|i| PopJumpIf::new(i, JumpCondition::IfNotNone)));
    b.op("POP_JUMP_IF_NONE").jump(V::V3_12, JumpRule::Relative);
    b.op("POP_JUMP_IF_NOT_NONE").jump(V::V3_12, JumpRule::Relative);

    // 3.11 splits every conditional jump by direction
    let directional: [(&'static str, &'static str, OpcodeFactory); 4] = [
        ("POP_JUMP_FORWARD_IF_TRUE", "POP_JUMP_BACKWARD_IF_TRUE", node!(|i| PopJumpIf::new(i, JumpCondition::IfTrue))),
        (
            "POP_JUMP_FORWARD_IF_FALSE",
            "POP_JUMP_BACKWARD_IF_FALSE",
            node!(|i| PopJumpIf::new(i, JumpCondition::IfFalse)),
        ),
        ("POP_JUMP_FORWARD_IF_NONE", "POP_JUMP_BACKWARD_IF_NONE", node!(|i| PopJumpIf::new(i, JumpCondition::IfNone))),
        (
            "POP_JUMP_FORWARD_IF_NOT_NONE",
            "POP_JUMP_BACKWARD_IF_NOT_NONE",
            node!(|i| PopJumpIf::new(i, JumpCondition::IfNotNone)),
        ),
    ];
    for (forward, backward, factory) in directional {
        b.op(forward)
            .removed_in(V::MIN)
            .since(V::V3_11, factory)
            .removed_in(V::V3_12)
            .jump(V::V3_11, JumpRule::Relative);
        b.op(backward)
            .removed_in(V::MIN)
            .since(V::V3_11, factory)
            .removed_in(V::V3_12)
            .jump(V::V3_11, JumpRule::BackwardRelative);
    }

    b.op("JUMP_IF_TRUE_OR_POP")
        .since(V::MIN, node!(|i| JumpIfOrPop::new(i, true)))
        .removed_in(V::V3_12)
        .jump(V::MIN, JumpRule::Absolute)
        .jump(V::V3_11, JumpRule::Relative);
    b.op("JUMP_IF_FALSE_OR_POP")
        .since(V::MIN, node!(|i| JumpIfOrPop::new(i, false)))
        .removed_in(V::V3_12)
        .jump(V::MIN, JumpRule::Absolute)
        .jump(V::V3_11, JumpRule::Relative);

    b.simple("GET_ITER", node!(GetIter::new));
    b.op("FOR_ITER")
        .since(V::MIN, node!(ForIter::new))
        .since(V::V3_12, node!(ForIter::with_end_for))
        .jump(V::MIN, JumpRule::Relative);
}

fn dunder(b: &mut DispatchTableBuilder) {
    until(b, "UNARY_POSITIVE", V::V3_12, node!(UnaryOperation::new));
    b.simple("UNARY_NEGATIVE", node!(UnaryOperation::new));
    b.simple("UNARY_NOT", node!(UnaryOperation::new));
    b.simple("UNARY_INVERT", node!(UnaryOperation::new));

    for &name in LEGACY_BINARY {
        until(b, name, V::V3_11, node!(BinaryOperation::from_opname));
    }
    added(b, "BINARY_OP", V::V3_11, node!(BinaryOperation::from_arg));
    b.simple("COMPARE_OP", node!(Compare::new));
    b.simple("IS_OP", node!(IsOp::new));
    b.simple("CONTAINS_OP", node!(ContainsOp::new));
    b.simple("BINARY_SUBSCR", node!(Subscript::new));
    b.simple("STORE_SUBSCR", node!(StoreSubscript::new));
    b.simple("DELETE_SUBSCR", node!(DeleteSubscript::new));
    added(b, "BINARY_SLICE", V::V3_12, node!(BinarySlice::new));
    added(b, "STORE_SLICE", V::V3_12, node!(StoreSlice::new));
}

fn collection(b: &mut DispatchTableBuilder) {
    b.simple("BUILD_TUPLE", node!(|i| BuildCollection::new(i, CollectionKind::Tuple)));
    b.simple("BUILD_LIST", node!(|i| BuildCollection::new(i, CollectionKind::List)));
    b.simple("BUILD_SET", node!(|i| BuildCollection::new(i, CollectionKind::Set)));
    b.simple("BUILD_MAP", node!(|i| BuildCollection::new(i, CollectionKind::Map)));
    b.simple("BUILD_CONST_KEY_MAP", node!(|i| BuildCollection::new(i, CollectionKind::ConstKeyMap)));
    b.simple("BUILD_SLICE", node!(BuildSlice::new));
    b.simple("LIST_APPEND", node!(|i| UpdateCollection::new(i, UpdateKind::ListAppend)));
    b.simple("SET_ADD", node!(|i| UpdateCollection::new(i, UpdateKind::SetAdd)));
    b.simple("MAP_ADD", node!(|i| UpdateCollection::new(i, UpdateKind::MapAdd)));
    b.simple("LIST_EXTEND", node!(|i| UpdateCollection::new(i, UpdateKind::ListExtend)));
    b.simple("SET_UPDATE", node!(|i| UpdateCollection::new(i, UpdateKind::SetUpdate)));
    b.simple("DICT_UPDATE", node!(|i| UpdateCollection::new(i, UpdateKind::DictUpdate)));
    b.simple("DICT_MERGE", node!(|i| UpdateCollection::new(i, UpdateKind::DictUpdate)));
    until(b, "LIST_TO_TUPLE", V::V3_12, node!(ListToTuple::new));
    b.simple("UNPACK_SEQUENCE", node!(UnpackSequence::new));
    b.simple("UNPACK_EX", node!(UnpackEx::new));
}

fn function(b: &mut DispatchTableBuilder) {
    b.simple("MAKE_FUNCTION", node!(MakeFunction::new));
    until(b, "CALL_FUNCTION", V::V3_11, node!(|i| Call::new(i, CallForm::Function)));
    until(b, "CALL_FUNCTION_KW", V::V3_11, node!(|i| Call::new(i, CallForm::FunctionKw)));
    until(b, "CALL_METHOD", V::V3_11, node!(|i| Call::new(i, CallForm::Method)));
    added(b, "CALL", V::V3_11, node!(|i| Call::new(i, CallForm::Method)));
    b.simple("CALL_FUNCTION_EX", node!(CallFunctionEx::new));
    until(b, "LOAD_METHOD", V::V3_12, node!(LoadMethod::new));
    added(b, "KW_NAMES", V::V3_11, node!(KwNames::new));
    b.op("PRECALL").removed_in(V::MIN).since(V::V3_11, node!(Nop::new)).removed_in(V::V3_12);
}

fn exception(b: &mut DispatchTableBuilder) {
    until(b, "SETUP_FINALLY", V::V3_11, node!(SetupFinally::new));
    b.op("SETUP_FINALLY").jump(V::MIN, JumpRule::Relative);
    until(b, "SETUP_WITH", V::V3_11, node!(SetupWith::new));
    b.op("SETUP_WITH").jump(V::MIN, JumpRule::Relative);
    added(b, "BEFORE_WITH", V::V3_11, node!(BeforeWith::new));
    until(b, "POP_BLOCK", V::V3_11, node!(PopBlock::new));
    b.simple("POP_EXCEPT", node!(PopExcept::new));
    b.simple("RERAISE", node!(Reraise::new));
    b.simple("RAISE_VARARGS", node!(RaiseVarargs::new));
    until(b, "JUMP_IF_NOT_EXC_MATCH", V::V3_11, node!(JumpIfNotExcMatch::new));
    b.op("JUMP_IF_NOT_EXC_MATCH").jump(V::MIN, JumpRule::Absolute);
    added(b, "CHECK_EXC_MATCH", V::V3_11, node!(CheckExcMatch::new));
    added(b, "PUSH_EXC_INFO", V::V3_11, node!(PushExcInfo::new));
    b.simple("LOAD_ASSERTION_ERROR", node!(LoadAssertionError::new));
    b.simple("WITH_EXCEPT_START", node!(WithExceptStart::new));
}

fn generator(b: &mut DispatchTableBuilder) {
    b.op("GEN_START").removed_in(V::MIN).since(V::V3_10, node!(GenStart::new)).removed_in(V::V3_11);
    added(b, "RETURN_GENERATOR", V::V3_11, node!(ReturnGenerator::new));
    b.simple("YIELD_VALUE", node!(YieldValue::new));
    until(b, "YIELD_FROM", V::V3_11, node!(YieldFrom::new));
    b.simple("GET_YIELD_FROM_ITER", node!(GetYieldFromIter::new));
    added(b, "SEND", V::V3_11, node!(Send::new));
    b.op("SEND").jump(V::V3_11, JumpRule::Relative);
    added(b, "END_SEND", V::V3_12, node!(EndSend::new));
}

fn string(b: &mut DispatchTableBuilder) {
    b.simple("FORMAT_VALUE", node!(FormatValue::new));
    b.simple("BUILD_STRING", node!(BuildString::new));
    until(b, "PRINT_EXPR", V::V3_12, node!(PrintExpr::new));
}

fn module(b: &mut DispatchTableBuilder) {
    b.simple("IMPORT_NAME", node!(ImportName::new));
    b.simple("IMPORT_FROM", node!(ImportFrom::new));
}

fn object(b: &mut DispatchTableBuilder) {
    b.simple("LOAD_ATTR", node!(LoadAttr::new));
    b.simple("STORE_ATTR", node!(StoreAttr::new));
    b.simple("DELETE_ATTR", node!(DeleteAttr::new));
}

fn meta(b: &mut DispatchTableBuilder) {
    b.simple("NOP", node!(Nop::new));
    b.simple("EXTENDED_ARG", node!(Nop::new));
    for name in ["CACHE", "RESUME", "MAKE_CELL", "COPY_FREE_VARS"] {
        added(b, name, V::V3_11, node!(Nop::new));
    }
    added(b, "CALL_INTRINSIC_1", V::V3_12, node!(CallIntrinsic1::new));
}

/// Build the table for every supported dialect
pub fn build() -> DispatchTable {
    let mut b = DispatchTable::builder();
    stack(&mut b);
    variable(&mut b);
    control(&mut b);
    dunder(&mut b);
    collection(&mut b);
    function(&mut b);
    exception(&mut b);
    generator(&mut b);
    string(&mut b);
    module(&mut b);
    object(&mut b);
    meta(&mut b);
    for &name in UNSUPPORTED {
        b.op(name).removed_in(V::MIN);
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSIONS: [V; 4] = [V::V3_9, V::V3_10, V::V3_11, V::V3_12];

    #[test]
    fn test_every_jump_rule_round_trips() {
        let table = build();
        for opname in table.opnames() {
            for version in VERSIONS {
                let rule = table.jump_rule(opname, version);
                if !rule.is_jump() || !table.supports(opname, version) {
                    continue;
                }
                let offset = 20;
                let targets: &[usize] = match rule {
                    JumpRule::BackwardRelative => &[0, 7, 21],
                    JumpRule::Relative => &[21, 40],
                    _ => &[0, 21, 40],
                };
                for &target in targets {
                    let arg = rule.encode(offset, target, version).expect("encodable");
                    assert_eq!(
                        rule.resolve(offset, arg, version),
                        Some(target as i64),
                        "{} in {} to {}",
                        opname,
                        version,
                        target
                    );
                }
            }
        }
    }

    #[test]
    fn test_legacy_binary_ops_end_at_311() {
        let table = build();
        assert!(table.supports("BINARY_ADD", V::V3_10));
        assert!(table.supports("INPLACE_XOR", V::V3_9));
        assert!(!table.supports("BINARY_ADD", V::V3_11));
        assert!(table.supports("BINARY_OP", V::V3_11));
        assert!(!table.supports("BINARY_OP", V::V3_10));
    }

    #[test]
    fn test_call_protocol_by_dialect() {
        let table = build();
        assert!(table.supports("CALL_METHOD", V::V3_10));
        assert!(!table.supports("CALL_METHOD", V::V3_11));
        assert!(table.supports("LOAD_METHOD", V::V3_11));
        assert!(!table.supports("LOAD_METHOD", V::V3_12));
        assert!(table.supports("PRECALL", V::V3_11));
        assert!(!table.supports("PRECALL", V::V3_12));
        assert!(table.supports("KW_NAMES", V::V3_12));
    }

    #[test]
    fn test_directional_jumps_only_in_311() {
        let table = build();
        assert!(table.supports("POP_JUMP_BACKWARD_IF_TRUE", V::V3_11));
        assert!(!table.supports("POP_JUMP_BACKWARD_IF_TRUE", V::V3_12));
        assert_eq!(table.jump_rule("POP_JUMP_BACKWARD_IF_NONE", V::V3_11), JumpRule::BackwardRelative);
        assert_eq!(table.jump_rule("JUMP_IF_TRUE_OR_POP", V::V3_11), JumpRule::Relative);
    }

    #[test]
    fn test_unsupported_constructs_are_known() {
        let table = build();
        for name in UNSUPPORTED {
            assert!(table.contains(name));
            for version in VERSIONS {
                assert!(!table.supports(name, version));
            }
        }
    }
}
