//! End-to-end tests: source records in every dialect, translated and run
//!
//! Instruction sequences follow what CPython emits for the quoted source,
//! with inline caches left out and jump arguments in each dialect's units.

mod common;

use common::{call, call_ints, capturing_vm, drain, ints, translate, translate_with, translator};
use std::sync::Arc;

use pytron::runtime::{Closure, Value};
use pytron::source::{Constant, DialectVersion, FunctionBuilder, FunctionRecord};
use pytron::target::{verify, Opcode};
use pytron::translator::{TranslateOutcome, Translator};
use pytron::types::builtin::{KEY_ERROR, STOP_ITERATION, VALUE_ERROR};
use pytron::vm::{BytecodeVM, VmError};

fn opcodes(record: &FunctionRecord) -> Vec<Opcode> {
    let artifact = translate(record);
    let chunk = &artifact.chunk;
    let mut ops = Vec::new();
    let mut offset = 0;
    while let Some(op) = chunk.read_opcode(offset) {
        ops.push(op);
        offset += 1 + op.immediate_size();
    }
    ops
}

/// def add(a: int, b: int) -> int: return a + b
fn typed_add() -> FunctionRecord {
    FunctionBuilder::new("add", DialectVersion::V3_11)
        .args(&["a", "b"])
        .annotate("a", "int")
        .annotate("b", "int")
        .annotate("return", "int")
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_typed_add_uses_int_instruction() {
    let record = typed_add();
    assert!(opcodes(&record).contains(&Opcode::AddInt));
    assert_eq!(call_ints(&record, &[40, 2]).expect("runs"), Value::Int(42));
}

#[test]
fn test_untyped_add_dispatches_at_runtime() {
    let record = FunctionBuilder::new("add", DialectVersion::V3_11)
        .args(&["a", "b"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 0)
        .op("RETURN_VALUE", 0)
        .build();
    assert!(opcodes(&record).contains(&Opcode::BinaryOp));
    let joined = call(&record, vec![Value::from("py"), Value::from("tron")]).expect("str + str");
    assert_eq!(joined, Value::from("pytron"));
    let err = call(&record, vec![Value::from("py"), Value::Int(1)]).expect_err("str + int");
    assert_eq!(err.to_string(), "TypeError: unsupported operand type(s) for +: 'str' and 'int'");
}

/// 3.9, byte-offset jumps:
///
/// def total(n):
///     s = 0
///     for i in range(n):
///         s += i
///     return s
fn total_39() -> FunctionRecord {
    FunctionBuilder::new("total", DialectVersion::V3_9)
        .args(&["n"])
        .locals(&["s", "i"])
        .names(&["range"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_GLOBAL", 0)
        .op("LOAD_FAST", 0)
        .op("CALL_FUNCTION", 1)
        .op("GET_ITER", 0)
        .op("FOR_ITER", 12)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 2)
        .op("INPLACE_ADD", 0)
        .op("STORE_FAST", 1)
        .op("JUMP_ABSOLUTE", 12)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_for_loop_in_39() {
    let record = total_39();
    assert_eq!(call_ints(&record, &[5]).expect("runs"), Value::Int(10));
    assert_eq!(call_ints(&record, &[0]).expect("runs"), Value::Int(0));
}

/// 3.10, instruction-index jumps:
///
/// def sign(x):
///     if x < 0:
///         return -1
///     return 1
#[test]
fn test_conditional_in_310() {
    let record = FunctionBuilder::new("sign", DialectVersion::V3_10)
        .args(&["x"])
        .constants(vec![Constant::None, Constant::Int(0), Constant::Int(-1), Constant::Int(1)])
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_IF_FALSE", 6)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .op("LOAD_CONST", 3)
        .op("RETURN_VALUE", 0)
        .build();
    assert_eq!(call_ints(&record, &[-3]).expect("runs"), Value::Int(-1));
    assert_eq!(call_ints(&record, &[3]).expect("runs"), Value::Int(1));
}

/// 3.12, relative forward jumps and `RETURN_CONST`:
///
/// def clamp(x):
///     if x > 10:
///         return 10
///     return x
#[test]
fn test_conditional_in_312() {
    let record = FunctionBuilder::new("clamp", DialectVersion::V3_12)
        .args(&["x"])
        .constants(vec![Constant::None, Constant::Int(10)])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 68)
        .op("POP_JUMP_IF_FALSE", 1)
        .op("RETURN_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    assert_eq!(call_ints(&record, &[50]).expect("runs"), Value::Int(10));
    assert_eq!(call_ints(&record, &[3]).expect("runs"), Value::Int(3));
}

/// 3.11, exception table:
///
/// def safe_div(a, b):
///     try:
///         return a // b
///     except ZeroDivisionError:
///         return -1
fn safe_div_311() -> FunctionRecord {
    FunctionBuilder::new("safe_div", DialectVersion::V3_11)
        .args(&["a", "b"])
        .names(&["ZeroDivisionError"])
        .constants(vec![Constant::None, Constant::Int(-1)])
        .op("RESUME", 0)
        .op("NOP", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 2)
        .op("RETURN_VALUE", 0)
        .op("PUSH_EXC_INFO", 0)
        .op("LOAD_GLOBAL", 0)
        .op("CHECK_EXC_MATCH", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 4)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .op("RERAISE", 0)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .handler(1, 6, 6, 0, false)
        .handler(6, 11, 15, 1, true)
        .handler(14, 15, 15, 1, true)
        .build()
}

#[test]
fn test_try_except_in_311() {
    let record = safe_div_311();
    assert_eq!(call_ints(&record, &[7, 2]).expect("runs"), Value::Int(3));
    assert_eq!(call_ints(&record, &[1, 0]).expect("handled"), Value::Int(-1));
    let err = call(&record, vec![Value::Int(1), Value::from("x")]).expect_err("TypeError is not caught");
    assert!(err.to_string().starts_with("TypeError"));
}

#[test]
fn test_handler_ranges_are_emitted() {
    let artifact = translate(&safe_div_311());
    let table = artifact.chunk.exception_table();
    assert!(!table.is_empty());
    assert!(table.iter().all(|entry| entry.start < entry.end));
    verify(&artifact.chunk).expect("translated chunks verify");
}

/// 3.11 generator:
///
/// def count(n):
///     i = 0
///     while i < n:
///         yield i
///         i += 1
fn count_311() -> FunctionRecord {
    FunctionBuilder::new("count", DialectVersion::V3_11)
        .generator()
        .args(&["n"])
        .locals(&["i"])
        .constants(vec![Constant::None, Constant::Int(0), Constant::Int(1)])
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 12)
        .op("LOAD_FAST", 1)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("POP_TOP", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_CONST", 2)
        .op("BINARY_OP", 13)
        .op("STORE_FAST", 1)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_BACKWARD_IF_TRUE", 12)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_generator_in_311() {
    let translator = translator();
    let artifact = translate_with(&translator, &count_311());
    assert!(artifact.chunk.info().is_generator);

    let mut vm = BytecodeVM::new(translator.registry().clone());
    let generator = vm.call_function(&artifact, ints(&[3])).expect("creates a generator");
    assert_eq!(drain(&mut vm, &generator), ints(&[0, 1, 2]));

    let empty = vm.call_function(&artifact, ints(&[0])).expect("creates a generator");
    assert!(drain(&mut vm, &empty).is_empty());
}

#[test]
fn test_generator_locals_survive_suspension() {
    let translator = translator();
    let artifact = translate_with(&translator, &count_311());
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let first = vm.call_function(&artifact, ints(&[2])).expect("creates a generator");
    let second = vm.call_function(&artifact, ints(&[2])).expect("creates a generator");

    // interleaved generators keep separate state
    assert_eq!(vm.next_item(&first).expect("resumes"), Some(Value::Int(0)));
    assert_eq!(vm.next_item(&second).expect("resumes"), Some(Value::Int(0)));
    assert_eq!(vm.next_item(&first).expect("resumes"), Some(Value::Int(1)));
    assert_eq!(vm.next_item(&first).expect("finishes"), None);
    assert_eq!(vm.next_item(&second).expect("resumes"), Some(Value::Int(1)));
}

/// 3.11 closure over a cell that changes after capture:
///
/// def outer():
///     x = 1
///     def inner():
///         return x
///     x = 2
///     return inner()
#[test]
fn test_closure_in_311() {
    let inner = FunctionBuilder::new("inner", DialectVersion::V3_11)
        .qualified_name("outer.<locals>.inner")
        .freevars(&["x"])
        .constants(vec![Constant::None])
        .op("COPY_FREE_VARS", 1)
        .op("RESUME", 0)
        .op("LOAD_DEREF", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let outer = FunctionBuilder::new("outer", DialectVersion::V3_11)
        .locals(&["inner"])
        .cellvars(&["x"])
        .constants(vec![Constant::None, Constant::Int(1), Constant::Code(Box::new(inner)), Constant::Int(2)])
        .op("MAKE_CELL", 1)
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_DEREF", 1)
        .op("LOAD_CLOSURE", 1)
        .op("BUILD_TUPLE", 1)
        .op("LOAD_CONST", 2)
        .op("MAKE_FUNCTION", 8)
        .op("STORE_FAST", 0)
        .op("LOAD_CONST", 3)
        .op("STORE_DEREF", 1)
        .op("PUSH_NULL", 0)
        .op("LOAD_FAST", 0)
        .op("PRECALL", 0)
        .op("CALL", 0)
        .op("RETURN_VALUE", 0)
        .build();
    assert_eq!(call(&outer, Vec::new()).expect("runs"), Value::Int(2));
}

/// 3.11 module code with a keyword call:
///
/// def f(a, b=5):
///     return a - b
/// f(a=10)
#[test]
fn test_keyword_call_with_defaults_in_311() {
    let f = FunctionBuilder::new("f", DialectVersion::V3_11)
        .args(&["a", "b"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 10)
        .op("RETURN_VALUE", 0)
        .build();
    let module = FunctionBuilder::new("<module>", DialectVersion::V3_11)
        .names(&["f"])
        .constants(vec![
            Constant::Tuple(vec![Constant::Int(5)]),
            Constant::Code(Box::new(f)),
            Constant::Int(10),
            Constant::Tuple(vec![Constant::Str("a".into())]),
        ])
        .op("RESUME", 0)
        .op("LOAD_CONST", 0)
        .op("LOAD_CONST", 1)
        .op("MAKE_FUNCTION", 1)
        .op("STORE_NAME", 0)
        .op("PUSH_NULL", 0)
        .op("LOAD_NAME", 0)
        .op("LOAD_CONST", 2)
        .op("KW_NAMES", 3)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("RETURN_VALUE", 0)
        .build();

    let translator = translator();
    let artifact = translate_with(&translator, &module);
    let mut vm = BytecodeVM::new(translator.registry().clone());
    assert_eq!(vm.run(artifact.chunk.clone()).expect("runs"), Value::Int(5));
    assert!(matches!(vm.globals().get("f"), Some(Value::Function(_))));
}

/// f"pi={x:.2f}"
#[test]
fn test_format_spec_in_311() {
    let record = FunctionBuilder::new("show", DialectVersion::V3_11)
        .args(&["x"])
        .constants(vec![Constant::None, Constant::Str("pi=".into()), Constant::Str(".2f".into())])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 2)
        .op("FORMAT_VALUE", 4)
        .op("BUILD_STRING", 2)
        .op("RETURN_VALUE", 0)
        .build();
    assert_eq!(call(&record, vec![Value::Float(2.5)]).expect("runs"), Value::from("pi=2.50"));
    let err = call(&record, vec![Value::from("abc")]).expect_err("str has no 'f' format");
    assert!(err.to_string().starts_with("ValueError"));
}

/// print("hi", 3) through the host
#[test]
fn test_print_goes_to_host_in_311() {
    let record = FunctionBuilder::new("greet", DialectVersion::V3_11)
        .names(&["print"])
        .constants(vec![Constant::None, Constant::Str("hi".into()), Constant::Int(3)])
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 1)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 2)
        .op("PRECALL", 2)
        .op("CALL", 2)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let translator = translator();
    let artifact = translate_with(&translator, &record);
    let (mut vm, host) = capturing_vm(&translator);
    assert_eq!(vm.call_function(&artifact, Vec::new()).expect("runs"), Value::None);
    assert_eq!(host.output(), "hi 3\n");
}

/// 3.9 legacy handler:
///
/// def first(xs):
///     try:
///         return xs[0]
///     except IndexError:
///         return None
#[test]
fn test_block_stack_handler_in_39() {
    let record = FunctionBuilder::new("first", DialectVersion::V3_9)
        .args(&["xs"])
        .names(&["IndexError"])
        .constants(vec![Constant::None, Constant::Int(0)])
        // 0
        .op("SETUP_FINALLY", 10)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_SUBSCR", 0)
        .op("POP_BLOCK", 0)
        .op("RETURN_VALUE", 0)
        // 6: handler
        .op("DUP_TOP", 0)
        .op("LOAD_GLOBAL", 0)
        .op("JUMP_IF_NOT_EXC_MATCH", 30)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        // 15
        .op("RERAISE", 0)
        .build();
    let list = Value::list(ints(&[7, 8]));
    assert_eq!(call(&record, vec![list]).expect("runs"), Value::Int(7));
    assert_eq!(call(&record, vec![Value::list(Vec::new())]).expect("handled"), Value::None);
    let err = call(&record, vec![Value::Int(3)]).expect_err("int is not subscriptable");
    assert!(err.to_string().starts_with("TypeError"));
}

#[test]
fn test_unsupported_construct_falls_back() {
    let record = FunctionBuilder::new("<module>", DialectVersion::V3_11)
        .op("RESUME", 0)
        .op("LOAD_BUILD_CLASS", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let outcome = translator().translate_or_fallback(&record, DialectVersion::V3_11).expect("fallback is not an error");
    assert!(!outcome.is_translated());
    assert!(matches!(outcome, TranslateOutcome::Fallback { ref reason } if reason.contains("LOAD_BUILD_CLASS")));
}

#[test]
fn test_unpack_and_build_in_310() {
    // def swap(pair): a, b = pair; return (b, a)
    let record = FunctionBuilder::new("swap", DialectVersion::V3_10)
        .args(&["pair"])
        .locals(&["a", "b"])
        .constants(vec![Constant::None])
        .op("LOAD_FAST", 0)
        .op("UNPACK_SEQUENCE", 2)
        .op("STORE_FAST", 1)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 2)
        .op("LOAD_FAST", 1)
        .op("BUILD_TUPLE", 2)
        .op("RETURN_VALUE", 0)
        .build();
    let pair = Value::tuple(ints(&[1, 2]));
    assert_eq!(call(&record, vec![pair]).expect("runs"), Value::tuple(ints(&[2, 1])));
    let err = call(&record, vec![Value::tuple(ints(&[1, 2, 3]))]).expect_err("three values");
    assert_eq!(err.to_string(), "ValueError: too many values to unpack (expected 2, got 3)");
}

#[test]
fn test_recursion_in_311() {
    // def fact(n): return 1 if n <= 1 else n * fact(n - 1)
    let record = FunctionBuilder::new("fact", DialectVersion::V3_11)
        .args(&["n"])
        .names(&["fact"])
        .constants(vec![Constant::None, Constant::Int(1)])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 1)
        .op("POP_JUMP_FORWARD_IF_FALSE", 2)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_GLOBAL", 1)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_OP", 10)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("BINARY_OP", 5)
        .op("RETURN_VALUE", 0)
        .build();
    let translator = translator();
    let artifact = translate_with(&translator, &record);
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let closure = Closure::new(artifact.chunk.clone(), vm.globals().clone());
    vm.globals().set("fact", Value::Function(Arc::new(closure)));
    assert_eq!(vm.call_function(&artifact, ints(&[5])).expect("runs"), Value::Int(120));
}

/// 3.11:
///
/// def guarded(x, log):
///     try:
///         return 10 // x
///     finally:
///         log.append(1)
fn guarded_311() -> FunctionRecord {
    FunctionBuilder::new("guarded", DialectVersion::V3_11)
        .args(&["x", "log"])
        .names(&["append"])
        .constants(vec![Constant::None, Constant::Int(10), Constant::Int(1)])
        .op("RESUME", 0)
        .op("NOP", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("BINARY_OP", 2)
        .op("LOAD_FAST", 1)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 2)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("POP_TOP", 0)
        .op("RETURN_VALUE", 0)
        .op("PUSH_EXC_INFO", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 2)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("POP_TOP", 0)
        .op("RERAISE", 0)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .handler(1, 5, 12, 0, false)
        .handler(12, 20, 20, 1, true)
        .build()
}

#[test]
fn test_finally_runs_once_on_each_exit() {
    let record = guarded_311();

    let log = Value::list(Vec::new());
    assert_eq!(call(&record, vec![Value::Int(2), log.clone()]).expect("runs"), Value::Int(5));
    assert_eq!(log.repr(), "[1]");

    let log = Value::list(Vec::new());
    let err = call(&record, vec![Value::Int(0), log.clone()]).expect_err("re-raised");
    assert!(err.to_string().starts_with("ZeroDivisionError"), "{}", err);
    assert_eq!(log.repr(), "[1]");
}

/// def less(a, b): return a < b
fn less(annotated: bool) -> FunctionRecord {
    let mut builder = FunctionBuilder::new("less", DialectVersion::V3_11).args(&["a", "b"]);
    if annotated {
        builder = builder.annotate("a", "int").annotate("b", "int");
    }
    builder
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_FAST", 1)
        .op("COMPARE_OP", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_less_than_on_both_paths() {
    for annotated in [true, false] {
        let record = less(annotated);
        let expected_op = if annotated { Opcode::LtInt } else { Opcode::CompareOp };
        assert!(opcodes(&record).contains(&expected_op));
        assert_eq!(call_ints(&record, &[1, 2]).expect("runs"), Value::Bool(true));
        assert_eq!(call_ints(&record, &[2, 1]).expect("runs"), Value::Bool(false));
        assert_eq!(call_ints(&record, &[1, 1]).expect("runs"), Value::Bool(false));
    }
}

#[test]
fn test_constant_add_runs() {
    // def three(): return 1 + 2
    let record = FunctionBuilder::new("three", DialectVersion::V3_11)
        .constants(vec![Constant::None, Constant::Int(1), Constant::Int(2)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_CONST", 2)
        .op("BINARY_OP", 0)
        .op("RETURN_VALUE", 0)
        .build();
    assert!(opcodes(&record).contains(&Opcode::AddInt));
    assert_eq!(call_ints(&record, &[]).expect("runs"), Value::Int(3));
}

/// 3.12, `FOR_ITER` exits onto `END_FOR`:
///
/// def total(n):
///     s = 0
///     for i in range(n):
///         s += i
///     return s
#[test]
fn test_for_loop_in_312() {
    let record = FunctionBuilder::new("total", DialectVersion::V3_12)
        .args(&["n"])
        .locals(&["s", "i"])
        .names(&["range"])
        .constants(vec![Constant::None, Constant::Int(0)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("STORE_FAST", 1)
        .op("LOAD_GLOBAL", 1)
        .op("LOAD_FAST", 0)
        .op("CALL", 1)
        .op("GET_ITER", 0)
        .op("FOR_ITER", 6)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 2)
        .op("BINARY_OP", 13)
        .op("STORE_FAST", 1)
        .op("JUMP_BACKWARD", 7)
        .op("END_FOR", 0)
        .op("LOAD_FAST", 1)
        .op("RETURN_VALUE", 0)
        .build();
    verify(&translate(&record).chunk).expect("translated chunks verify");
    assert_eq!(call_ints(&record, &[5]).expect("runs"), Value::Int(10));
    assert_eq!(call_ints(&record, &[0]).expect("runs"), Value::Int(0));
}

/// The value carried by a `StopIteration`, `None` when it has no argument
fn stop_value(err: &VmError) -> Value {
    match err.exception() {
        Some(Value::Exception(exc)) if exc.ty == STOP_ITERATION => exc.args.first().cloned().unwrap_or(Value::None),
        _ => panic!("expected StopIteration, got {}", err),
    }
}

/// Translate `record` into `vm`'s globals under its own name
fn define(translator: &Translator, vm: &BytecodeVM, record: &FunctionRecord) {
    let artifact = translate_with(translator, record);
    let closure = Closure::new(artifact.chunk.clone(), vm.globals().clone());
    vm.globals().set(record.name.as_str(), Value::Function(Arc::new(closure)));
}

/// Drive a delegating generator: `outer` runs `r = yield from inner()` and returns `r`
fn check_delegation(inner: &FunctionRecord, outer: &FunctionRecord) {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    define(&translator, &vm, inner);
    let artifact = translate_with(&translator, outer);
    let generator = vm.call_function(&artifact, Vec::new()).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator, got {:?}", generator);
    };

    assert_eq!(vm.generator_send(state, Value::None).expect("first value"), Value::Int(1));
    // the sent value reaches the inner generator
    assert_eq!(vm.generator_send(state, Value::Int(5)).expect("echo"), Value::Int(5));
    let err = vm.generator_send(state, Value::None).expect_err("outer returns");
    assert_eq!(stop_value(&err), Value::Int(7));
}

/// 3.9:
///
/// def inner():
///     x = yield 1
///     yield x
///     return 7
///
/// def outer():
///     r = yield from inner()
///     return r
#[test]
fn test_yield_from_in_39() {
    let inner = FunctionBuilder::new("inner", DialectVersion::V3_9)
        .generator()
        .locals(&["x"])
        .constants(vec![Constant::None, Constant::Int(1), Constant::Int(7)])
        .op("LOAD_CONST", 1)
        .op("YIELD_VALUE", 0)
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("YIELD_VALUE", 0)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .build();
    let outer = FunctionBuilder::new("outer", DialectVersion::V3_9)
        .generator()
        .locals(&["r"])
        .names(&["inner"])
        .constants(vec![Constant::None])
        .op("LOAD_GLOBAL", 0)
        .op("CALL_FUNCTION", 0)
        .op("GET_YIELD_FROM_ITER", 0)
        .op("LOAD_CONST", 0)
        .op("YIELD_FROM", 0)
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    check_delegation(&inner, &outer);
}

/// The same pair in 3.11, where delegation is a `SEND` loop
#[test]
fn test_send_delegation_in_311() {
    let inner = FunctionBuilder::new("inner", DialectVersion::V3_11)
        .generator()
        .locals(&["x"])
        .constants(vec![Constant::None, Constant::Int(1), Constant::Int(7)])
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 2)
        .op("RETURN_VALUE", 0)
        .build();
    let outer = FunctionBuilder::new("outer", DialectVersion::V3_11)
        .generator()
        .locals(&["r"])
        .names(&["inner"])
        .constants(vec![Constant::None])
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 1)
        .op("PRECALL", 0)
        .op("CALL", 0)
        .op("GET_YIELD_FROM_ITER", 0)
        .op("LOAD_CONST", 0)
        // 8
        .op("SEND", 3)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 2)
        .op("JUMP_BACKWARD_NO_INTERRUPT", 4)
        // 12
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    check_delegation(&inner, &outer);
}

/// 3.11:
///
/// def g():
///     try:
///         yield 1
///     except ValueError:
///         yield 2
fn catching_generator_311() -> FunctionRecord {
    FunctionBuilder::new("g", DialectVersion::V3_11)
        .generator()
        .names(&["ValueError"])
        .constants(vec![Constant::None, Constant::Int(1), Constant::Int(2)])
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("NOP", 0)
        .op("LOAD_CONST", 1)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        // 10
        .op("PUSH_EXC_INFO", 0)
        .op("LOAD_GLOBAL", 0)
        .op("CHECK_EXC_MATCH", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 8)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 2)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        // 22
        .op("RERAISE", 0)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .handler(4, 8, 10, 0, false)
        .handler(10, 19, 23, 1, true)
        .handler(22, 23, 23, 1, true)
        .build()
}

#[test]
fn test_throw_is_caught_by_generator_handler() {
    let translator = translator();
    let artifact = translate_with(&translator, &catching_generator_311());
    let mut vm = BytecodeVM::new(translator.registry().clone());

    let generator = vm.call_function(&artifact, Vec::new()).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator");
    };
    assert_eq!(vm.generator_send(state, Value::None).expect("first value"), Value::Int(1));
    assert_eq!(vm.generator_throw(state, Value::Type(VALUE_ERROR)).expect("handled"), Value::Int(2));
    let err = vm.generator_send(state, Value::None).expect_err("finished");
    assert_eq!(stop_value(&err), Value::None);

    let generator = vm.call_function(&artifact, Vec::new()).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator");
    };
    vm.generator_send(state, Value::None).expect("first value");
    let err = vm.generator_throw(state, Value::Type(KEY_ERROR)).expect_err("not a ValueError");
    assert!(err.to_string().starts_with("KeyError"), "{}", err);
}

#[test]
fn test_close_while_suspended_in_handler() {
    let translator = translator();
    let artifact = translate_with(&translator, &catching_generator_311());
    let mut vm = BytecodeVM::new(translator.registry().clone());

    let generator = vm.call_function(&artifact, Vec::new()).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator");
    };
    vm.generator_send(state, Value::None).expect("first value");
    assert_eq!(vm.generator_throw(state, Value::Type(VALUE_ERROR)).expect("handled"), Value::Int(2));
    vm.generator_close(state).expect("GeneratorExit propagates out of the handler");
    let err = vm.generator_send(state, Value::None).expect_err("closed");
    assert_eq!(stop_value(&err), Value::None);
}

/// 3.11:
///
/// def logged(log):
///     try:
///         yield 1
///     finally:
///         log.append(1)
#[test]
fn test_close_runs_finally_once() {
    let record = FunctionBuilder::new("logged", DialectVersion::V3_11)
        .generator()
        .args(&["log"])
        .names(&["append"])
        .constants(vec![Constant::None, Constant::Int(1)])
        .op("RETURN_GENERATOR", 0)
        .op("POP_TOP", 0)
        .op("RESUME", 0)
        .op("NOP", 0)
        .op("LOAD_CONST", 1)
        .op("YIELD_VALUE", 0)
        .op("RESUME", 1)
        .op("POP_TOP", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 1)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        // 16
        .op("PUSH_EXC_INFO", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 1)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("POP_TOP", 0)
        .op("RERAISE", 0)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .handler(4, 8, 16, 0, false)
        .handler(16, 24, 24, 1, true)
        .build();
    let translator = translator();
    let artifact = translate_with(&translator, &record);
    let mut vm = BytecodeVM::new(translator.registry().clone());

    let log = Value::list(Vec::new());
    let generator = vm.call_function(&artifact, vec![log.clone()]).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator");
    };
    vm.generator_send(state, Value::None).expect("first value");
    vm.generator_close(state).expect("closes");
    assert_eq!(log.repr(), "[1]");

    let log = Value::list(Vec::new());
    let generator = vm.call_function(&artifact, vec![log.clone()]).expect("creates a generator");
    assert_eq!(drain(&mut vm, &generator), ints(&[1]));
    assert_eq!(log.repr(), "[1]");
}

/// 3.10, `GEN_START` and a return value carried by `StopIteration`:
///
/// def doubler():
///     x = yield 1
///     return x * 2
#[test]
fn test_send_returns_stop_iteration_value_in_310() {
    let record = FunctionBuilder::new("doubler", DialectVersion::V3_10)
        .generator()
        .locals(&["x"])
        .constants(vec![Constant::None, Constant::Int(1), Constant::Int(2)])
        .op("GEN_START", 0)
        .op("LOAD_CONST", 1)
        .op("YIELD_VALUE", 0)
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 2)
        .op("BINARY_MULTIPLY", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let translator = translator();
    let artifact = translate_with(&translator, &record);
    let mut vm = BytecodeVM::new(translator.registry().clone());

    let generator = vm.call_function(&artifact, Vec::new()).expect("creates a generator");
    let Value::Generator(state) = &generator else {
        panic!("expected a generator");
    };
    assert_eq!(vm.generator_send(state, Value::None).expect("first value"), Value::Int(1));
    let err = vm.generator_send(state, Value::Int(21)).expect_err("returns");
    assert_eq!(stop_value(&err), Value::Int(42));
}

/// 3.9, byte-offset block setup:
///
/// def guarded(x, log):
///     try:
///         return 10 // x
///     finally:
///         log.append(1)
#[test]
fn test_finally_runs_once_in_39() {
    let record = FunctionBuilder::new("guarded", DialectVersion::V3_9)
        .args(&["x", "log"])
        .names(&["append"])
        .constants(vec![Constant::None, Constant::Int(10), Constant::Int(1)])
        .op("SETUP_FINALLY", 20)
        .op("LOAD_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("BINARY_FLOOR_DIVIDE", 0)
        .op("POP_BLOCK", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 2)
        .op("CALL_METHOD", 1)
        .op("POP_TOP", 0)
        .op("RETURN_VALUE", 0)
        // 11: handler
        .op("LOAD_FAST", 1)
        .op("LOAD_METHOD", 0)
        .op("LOAD_CONST", 2)
        .op("CALL_METHOD", 1)
        .op("POP_TOP", 0)
        .op("RERAISE", 0)
        .build();

    let log = Value::list(Vec::new());
    assert_eq!(call(&record, vec![Value::Int(2), log.clone()]).expect("runs"), Value::Int(5));
    assert_eq!(log.repr(), "[1]");

    let log = Value::list(Vec::new());
    let err = call(&record, vec![Value::Int(0), log.clone()]).expect_err("re-raised");
    assert!(err.to_string().starts_with("ZeroDivisionError"), "{}", err);
    assert_eq!(log.repr(), "[1]");
}
