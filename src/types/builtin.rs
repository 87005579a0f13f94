//! Builtin types and their declared method tables.
//!
//! Builtin ids are fixed so translated chunks, the VM and the registry agree
//! on them without a lookup. Method tables only declare what the resolver
//! needs to type an expression; the VM implements the behavior.

use super::signature::{Emission, FunctionSignature};
use super::TypeId;
use crate::target::Opcode as TargetOp;

pub const OBJECT: TypeId = TypeId(0);
pub const TYPE: TypeId = TypeId(1);
pub const NONE: TypeId = TypeId(2);
pub const INT: TypeId = TypeId(3);
pub const BOOL: TypeId = TypeId(4);
pub const FLOAT: TypeId = TypeId(5);
pub const STR: TypeId = TypeId(6);
pub const TUPLE: TypeId = TypeId(7);
pub const LIST: TypeId = TypeId(8);
pub const DICT: TypeId = TypeId(9);
pub const SET: TypeId = TypeId(10);
pub const SLICE: TypeId = TypeId(11);
pub const FUNCTION: TypeId = TypeId(12);
pub const CODE: TypeId = TypeId(13);
pub const CELL: TypeId = TypeId(14);
pub const ITERATOR: TypeId = TypeId(15);
pub const GENERATOR: TypeId = TypeId(16);
pub const MODULE: TypeId = TypeId(17);
pub const ELLIPSIS: TypeId = TypeId(18);
pub const NOT_IMPLEMENTED: TypeId = TypeId(19);
pub const TRACEBACK: TypeId = TypeId(20);
pub const BASE_EXCEPTION: TypeId = TypeId(21);
pub const EXCEPTION: TypeId = TypeId(22);
pub const ARITHMETIC_ERROR: TypeId = TypeId(23);
pub const ZERO_DIVISION_ERROR: TypeId = TypeId(24);
pub const OVERFLOW_ERROR: TypeId = TypeId(25);
pub const TYPE_ERROR: TypeId = TypeId(26);
pub const VALUE_ERROR: TypeId = TypeId(27);
pub const NAME_ERROR: TypeId = TypeId(28);
pub const UNBOUND_LOCAL_ERROR: TypeId = TypeId(29);
pub const ATTRIBUTE_ERROR: TypeId = TypeId(30);
pub const LOOKUP_ERROR: TypeId = TypeId(31);
pub const INDEX_ERROR: TypeId = TypeId(32);
pub const KEY_ERROR: TypeId = TypeId(33);
pub const RUNTIME_ERROR: TypeId = TypeId(34);
pub const RECURSION_ERROR: TypeId = TypeId(35);
pub const NOT_IMPLEMENTED_ERROR: TypeId = TypeId(36);
pub const STOP_ITERATION: TypeId = TypeId(37);
pub const GENERATOR_EXIT: TypeId = TypeId(38);
pub const ASSERTION_ERROR: TypeId = TypeId(39);
pub const IMPORT_ERROR: TypeId = TypeId(40);

/// (id, name, parents, subclassable)
pub(super) const BUILTIN_TYPES: &[(TypeId, &str, &[TypeId], bool)] = &[
    (OBJECT, "object", &[], true),
    (TYPE, "type", &[OBJECT], false),
    (NONE, "NoneType", &[OBJECT], false),
    (INT, "int", &[OBJECT], false),
    (BOOL, "bool", &[INT], false),
    (FLOAT, "float", &[OBJECT], false),
    (STR, "str", &[OBJECT], false),
    (TUPLE, "tuple", &[OBJECT], true),
    (LIST, "list", &[OBJECT], true),
    (DICT, "dict", &[OBJECT], true),
    (SET, "set", &[OBJECT], true),
    (SLICE, "slice", &[OBJECT], false),
    (FUNCTION, "function", &[OBJECT], false),
    (CODE, "code", &[OBJECT], false),
    (CELL, "cell", &[OBJECT], false),
    (ITERATOR, "iterator", &[OBJECT], false),
    (GENERATOR, "generator", &[ITERATOR], false),
    (MODULE, "module", &[OBJECT], false),
    (ELLIPSIS, "ellipsis", &[OBJECT], false),
    (NOT_IMPLEMENTED, "NotImplementedType", &[OBJECT], false),
    (TRACEBACK, "traceback", &[OBJECT], false),
    (BASE_EXCEPTION, "BaseException", &[OBJECT], true),
    (EXCEPTION, "Exception", &[BASE_EXCEPTION], true),
    (ARITHMETIC_ERROR, "ArithmeticError", &[EXCEPTION], true),
    (ZERO_DIVISION_ERROR, "ZeroDivisionError", &[ARITHMETIC_ERROR], true),
    (OVERFLOW_ERROR, "OverflowError", &[ARITHMETIC_ERROR], true),
    (TYPE_ERROR, "TypeError", &[EXCEPTION], true),
    (VALUE_ERROR, "ValueError", &[EXCEPTION], true),
    (NAME_ERROR, "NameError", &[EXCEPTION], true),
    (UNBOUND_LOCAL_ERROR, "UnboundLocalError", &[NAME_ERROR], true),
    (ATTRIBUTE_ERROR, "AttributeError", &[EXCEPTION], true),
    (LOOKUP_ERROR, "LookupError", &[EXCEPTION], true),
    (INDEX_ERROR, "IndexError", &[LOOKUP_ERROR], true),
    (KEY_ERROR, "KeyError", &[LOOKUP_ERROR], true),
    (RUNTIME_ERROR, "RuntimeError", &[EXCEPTION], true),
    (RECURSION_ERROR, "RecursionError", &[RUNTIME_ERROR], true),
    (NOT_IMPLEMENTED_ERROR, "NotImplementedError", &[RUNTIME_ERROR], true),
    (STOP_ITERATION, "StopIteration", &[EXCEPTION], true),
    (GENERATOR_EXIT, "GeneratorExit", &[BASE_EXCEPTION], true),
    (ASSERTION_ERROR, "AssertionError", &[EXCEPTION], true),
    (IMPORT_ERROR, "ImportError", &[EXCEPTION], true),
];

/// Number of builtin types; user types are allocated after them
pub const BUILTIN_COUNT: u32 = 41;

/// Name of a builtin type id
pub fn builtin_name(id: TypeId) -> Option<&'static str> {
    BUILTIN_TYPES.get(id.index()).map(|&(_, name, _, _)| name)
}

/// Builtin type by its source-level name
pub fn builtin_by_name(name: &str) -> Option<TypeId> {
    let name = match name {
        "None" => "NoneType",
        "builtins.int" => "int",
        other => other,
    };
    BUILTIN_TYPES.iter().find(|&&(_, n, _, _)| n == name).map(|&(id, _, _, _)| id)
}

/// Whether the builtin id names an exception class
pub fn is_builtin_exception(id: TypeId) -> bool {
    id.0 >= BASE_EXCEPTION.0 && id.0 < BUILTIN_COUNT
}

fn sig(name: &str, params: &[TypeId], ret: TypeId, emission: Emission) -> FunctionSignature {
    FunctionSignature::new(name, params.to_vec(), ret, emission)
}

fn intrinsic(name: &str, params: &[TypeId], ret: TypeId, op: TargetOp) -> FunctionSignature {
    sig(name, params, ret, Emission::Intrinsic(op))
}

fn virt(name: &str, params: &[TypeId], ret: TypeId) -> FunctionSignature {
    sig(name, params, ret, Emission::Virtual)
}

fn runtime(name: &str, params: &[TypeId], ret: TypeId) -> FunctionSignature {
    sig(name, params, ret, Emission::Runtime)
}

/// Declared methods of a builtin type
pub(super) fn builtin_methods(id: TypeId) -> Vec<FunctionSignature> {
    match id {
        INT => {
            let mut methods = vec![
                intrinsic("__add__", &[INT], INT, TargetOp::AddInt),
                intrinsic("__sub__", &[INT], INT, TargetOp::SubInt),
                intrinsic("__mul__", &[INT], INT, TargetOp::MulInt),
                intrinsic("__floordiv__", &[INT], INT, TargetOp::FloorDivInt),
                intrinsic("__mod__", &[INT], INT, TargetOp::ModInt),
                virt("__add__", &[FLOAT], FLOAT),
                virt("__sub__", &[FLOAT], FLOAT),
                virt("__mul__", &[FLOAT], FLOAT),
                virt("__truediv__", &[INT], FLOAT),
                virt("__truediv__", &[FLOAT], FLOAT),
                virt("__pow__", &[INT], OBJECT),
                virt("__and__", &[INT], INT),
                virt("__or__", &[INT], INT),
                virt("__xor__", &[INT], INT),
                virt("__lshift__", &[INT], INT),
                virt("__rshift__", &[INT], INT),
                intrinsic("__lt__", &[INT], BOOL, TargetOp::LtInt),
                intrinsic("__le__", &[INT], BOOL, TargetOp::LeInt),
                intrinsic("__gt__", &[INT], BOOL, TargetOp::GtInt),
                intrinsic("__ge__", &[INT], BOOL, TargetOp::GeInt),
                intrinsic("__eq__", &[INT], BOOL, TargetOp::EqInt),
                intrinsic("__ne__", &[INT], BOOL, TargetOp::NeInt),
                intrinsic("__neg__", &[], INT, TargetOp::NegInt),
                virt("__pos__", &[], INT),
                virt("__invert__", &[], INT),
                runtime("bit_length", &[], INT),
            ];
            for cmp in ["__lt__", "__le__", "__gt__", "__ge__", "__eq__", "__ne__"] {
                methods.push(virt(cmp, &[FLOAT], BOOL));
            }
            methods
        }
        BOOL => vec![
            virt("__and__", &[BOOL], BOOL),
            virt("__or__", &[BOOL], BOOL),
            virt("__xor__", &[BOOL], BOOL),
        ],
        FLOAT => {
            let mut methods = vec![
                intrinsic("__add__", &[FLOAT], FLOAT, TargetOp::AddFloat),
                intrinsic("__sub__", &[FLOAT], FLOAT, TargetOp::SubFloat),
                intrinsic("__mul__", &[FLOAT], FLOAT, TargetOp::MulFloat),
                intrinsic("__truediv__", &[FLOAT], FLOAT, TargetOp::TrueDivFloat),
                intrinsic("__neg__", &[], FLOAT, TargetOp::NegFloat),
                virt("__pos__", &[], FLOAT),
                runtime("is_integer", &[], BOOL),
            ];
            for name in ["__add__", "__sub__", "__mul__", "__truediv__", "__floordiv__", "__mod__"] {
                methods.push(virt(name, &[INT], FLOAT));
            }
            for name in ["__floordiv__", "__mod__", "__pow__"] {
                methods.push(virt(name, &[FLOAT], FLOAT));
            }
            for name in ["__radd__", "__rsub__", "__rmul__", "__rtruediv__"] {
                methods.push(virt(name, &[INT], FLOAT));
            }
            for cmp in ["__lt__", "__le__", "__gt__", "__ge__", "__eq__", "__ne__"] {
                methods.push(virt(cmp, &[FLOAT], BOOL));
                methods.push(virt(cmp, &[INT], BOOL));
            }
            methods
        }
        STR => {
            let mut methods = vec![
                intrinsic("__add__", &[STR], STR, TargetOp::ConcatStr),
                virt("__mul__", &[INT], STR),
                virt("__mod__", &[OBJECT], STR),
                runtime("upper", &[], STR),
                runtime("lower", &[], STR),
                runtime("strip", &[], STR),
                runtime("join", &[OBJECT], STR),
                runtime("split", &[], LIST),
                runtime("split", &[STR], LIST),
                runtime("startswith", &[STR], BOOL),
                runtime("endswith", &[STR], BOOL),
                runtime("replace", &[STR, STR], STR),
                runtime("find", &[STR], INT),
                FunctionSignature::new("format", vec![], STR, Emission::Runtime).with_varargs(),
            ];
            for cmp in ["__lt__", "__le__", "__gt__", "__ge__", "__eq__", "__ne__"] {
                methods.push(virt(cmp, &[STR], BOOL));
            }
            methods
        }
        LIST => vec![
            virt("__add__", &[LIST], LIST),
            virt("__mul__", &[INT], LIST),
            runtime("append", &[OBJECT], NONE),
            runtime("extend", &[OBJECT], NONE),
            runtime("insert", &[INT, OBJECT], NONE),
            runtime("pop", &[], OBJECT),
            runtime("pop", &[INT], OBJECT),
            runtime("index", &[OBJECT], INT),
            runtime("count", &[OBJECT], INT),
            runtime("reverse", &[], NONE),
            runtime("copy", &[], LIST),
            runtime("clear", &[], NONE),
        ],
        TUPLE => vec![
            virt("__add__", &[TUPLE], TUPLE),
            runtime("index", &[OBJECT], INT),
            runtime("count", &[OBJECT], INT),
        ],
        DICT => vec![
            runtime("get", &[OBJECT], OBJECT),
            runtime("get", &[OBJECT, OBJECT], OBJECT),
            runtime("keys", &[], LIST),
            runtime("values", &[], LIST),
            runtime("items", &[], LIST),
            runtime("pop", &[OBJECT], OBJECT),
            runtime("setdefault", &[OBJECT, OBJECT], OBJECT),
            runtime("update", &[OBJECT], NONE),
            runtime("copy", &[], DICT),
            runtime("clear", &[], NONE),
        ],
        SET => vec![
            runtime("add", &[OBJECT], NONE),
            runtime("discard", &[OBJECT], NONE),
            runtime("remove", &[OBJECT], NONE),
            virt("__or__", &[SET], SET),
            virt("__and__", &[SET], SET),
            virt("__sub__", &[SET], SET),
        ],
        GENERATOR => vec![
            runtime("send", &[OBJECT], OBJECT),
            runtime("throw", &[OBJECT], OBJECT),
            runtime("close", &[], NONE),
        ],
        _ => Vec::new(),
    }
}
