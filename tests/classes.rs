//! Classes, exceptions and interface proxies across translation and execution

mod common;

use common::{ints, translator};
use pytron::runtime::Value;
use pytron::source::{ClassRecord, Constant, DialectVersion, FunctionBuilder, FunctionRecord};
use pytron::translator::{InterfaceDescriptor, MethodKind, TranslateError, Translator};
use pytron::types::builtin::{EXCEPTION, INT, ZERO_DIVISION_ERROR};
use pytron::types::{Emission, FunctionSignature};
use pytron::vm::BytecodeVM;

/// def __init__(self, start: int): self.count = start
fn init() -> FunctionRecord {
    FunctionBuilder::new("__init__", DialectVersion::V3_11)
        .qualified_name("Counter.__init__")
        .args(&["self", "start"])
        .annotate("start", "int")
        .names(&["count"])
        .constants(vec![Constant::None])
        .op("RESUME", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

/// def bump(self, by: int) -> int:
///     self.count = self.count + by
///     return self.count
fn bump() -> FunctionRecord {
    FunctionBuilder::new("bump", DialectVersion::V3_11)
        .qualified_name("Counter.bump")
        .args(&["self", "by"])
        .annotate("by", "int")
        .annotate("return", "int")
        .names(&["count"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 0)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 0)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

/// @staticmethod
/// def zero() -> int: return 0
fn zero() -> FunctionRecord {
    FunctionBuilder::new("zero", DialectVersion::V3_11)
        .qualified_name("Counter.zero")
        .annotate("return", "int")
        .constants(vec![Constant::None, Constant::Int(0)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .build()
}

fn counter() -> ClassRecord {
    let mut record = ClassRecord::new("Counter");
    record.module = "demo".into();
    record.version = Some(DialectVersion::V3_11);
    record.field_types.insert("count".into(), "int".into());
    record.methods.push(init());
    record.methods.push(bump());
    record.static_methods.push(zero());
    record.static_attributes.insert("KIND".into(), Constant::Str("counter".into()));
    record
}

/// Translate `record` and load the resulting class into `vm`
fn load(translator: &Translator, vm: &mut BytecodeVM, record: &ClassRecord) -> Value {
    let set = translator.translate_class(record).expect("class translates");
    let class = set.class().expect("class artifact").clone();
    vm.load_class(&class).expect("class loads")
}

#[test]
fn test_instance_methods_update_fields() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &counter());

    let instance = vm.call_value(class, ints(&[5]), Vec::new()).expect("constructs");
    assert!(matches!(instance, Value::Instance(_)));
    let bump = vm.load_attr(&instance, "bump").expect("bound method");
    assert_eq!(vm.call_value(bump.clone(), ints(&[3]), Vec::new()).expect("runs"), Value::Int(8));
    assert_eq!(vm.call_value(bump, ints(&[2]), Vec::new()).expect("runs"), Value::Int(10));
    assert_eq!(vm.load_attr(&instance, "count").expect("field"), Value::Int(10));
}

#[test]
fn test_static_members() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &counter());

    let zero = vm.load_attr(&class, "zero").expect("static method");
    assert_eq!(vm.call_value(zero, Vec::new(), Vec::new()).expect("runs"), Value::Int(0));
    assert_eq!(vm.load_attr(&class, "KIND").expect("static attribute"), Value::from("counter"));
    assert_eq!(vm.load_attr(&class, "__name__").expect("name"), Value::from("Counter"));
}

#[test]
fn test_method_kinds_are_recorded() {
    let set = translator().translate_class(&counter()).expect("class translates");
    let class = set.class().expect("class artifact");
    assert_eq!(class.method("bump").map(|m| m.kind), Some(MethodKind::Instance));
    assert_eq!(class.method("zero").map(|m| m.kind), Some(MethodKind::Static));
    // three method chunks plus the class itself
    assert_eq!(set.len(), 4);
}

#[test]
fn test_subclass_inherits_constructor_and_methods() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    load(&translator, &mut vm, &counter());

    // def double(self) -> int: return self.count * 2
    let double = FunctionBuilder::new("double", DialectVersion::V3_11)
        .qualified_name("Doubler.double")
        .args(&["self"])
        .annotate("return", "int")
        .names(&["count"])
        .constants(vec![Constant::None, Constant::Int(2)])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 0)
        .op("LOAD_CONST", 1)
        .op("BINARY_OP", 5)
        .op("RETURN_VALUE", 0)
        .build();
    let mut record = ClassRecord::new("Doubler");
    record.version = Some(DialectVersion::V3_11);
    record.superclasses.push("Counter".into());
    record.methods.push(double);
    let class = load(&translator, &mut vm, &record);

    let instance = vm.call_value(class, ints(&[4]), Vec::new()).expect("inherited __init__");
    let bump = vm.load_attr(&instance, "bump").expect("inherited method");
    vm.call_value(bump, ints(&[1]), Vec::new()).expect("runs");
    let double = vm.load_attr(&instance, "double").expect("own method");
    assert_eq!(vm.call_value(double, Vec::new(), Vec::new()).expect("runs"), Value::Int(10));
}

#[test]
fn test_constructor_arity_is_checked() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &counter());
    let err = vm.call_value(class, Vec::new(), Vec::new()).expect_err("start is required");
    assert!(err.to_string().contains("missing 1 required positional argument: 'start'"), "{}", err);
}

#[test]
fn test_user_exception_is_raised_and_matched() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let mut record = ClassRecord::new("AppError");
    record.version = Some(DialectVersion::V3_11);
    record.superclasses.push("Exception".into());
    let class = load(&translator, &mut vm, &record);
    let Value::Type(app_error) = class else {
        panic!("expected a type");
    };
    assert!(translator.registry().is_subclass(app_error, EXCEPTION));

    // def fail(): raise AppError("bad")
    let fail = FunctionBuilder::new("fail", DialectVersion::V3_11)
        .names(&["AppError"])
        .constants(vec![Constant::None, Constant::Str("bad".into())])
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 1)
        .op("LOAD_CONST", 1)
        .op("PRECALL", 1)
        .op("CALL", 1)
        .op("RAISE_VARARGS", 1)
        .build();
    let artifact = translator.translate(&fail, DialectVersion::V3_11).expect("translates");
    let err = vm.call_function(&artifact, Vec::new()).expect_err("raises");
    match err.exception() {
        Some(Value::Exception(exc)) => {
            assert_eq!(exc.ty, app_error);
            assert_eq!(exc.message(), "bad");
        }
        other => panic!("expected an AppError, got {:?}", other),
    }
    assert_eq!(err.to_string(), "AppError: bad");
}

#[test]
fn test_proxy_forwards_to_translated_method() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &counter());
    let Value::Type(counter_type) = class.clone() else {
        panic!("expected a type");
    };

    let iface = InterfaceDescriptor::new(
        "Bumpable",
        vec![FunctionSignature::new("bump", vec![INT], INT, Emission::Virtual)],
    );
    let proxy = translator.generate_interface_proxy(&iface, counter_type).expect("proxy");
    assert_eq!(proxy.name.as_ref(), "Bumpable$proxy$Counter");

    let instance = vm.call_value(class, ints(&[1]), Vec::new()).expect("constructs");
    assert_eq!(vm.call_proxy(&proxy, "bump", instance, ints(&[41])).expect("forwards"), Value::Int(42));
    let err = vm.call_proxy(&proxy, "bump", Value::Int(0), ints(&[1])).expect_err("wrong receiver");
    assert!(err.to_string().starts_with("TypeError"));
}

/// class Suppress:
///     def __enter__(self): return 10
///     def __exit__(self, t, v, tb):
///         self.seen = t
///         return True
fn suppress() -> ClassRecord {
    let enter = FunctionBuilder::new("__enter__", DialectVersion::V3_11)
        .qualified_name("Suppress.__enter__")
        .args(&["self"])
        .constants(vec![Constant::None, Constant::Int(10)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .build();
    let exit = FunctionBuilder::new("__exit__", DialectVersion::V3_11)
        .qualified_name("Suppress.__exit__")
        .args(&["self", "t", "v", "tb"])
        .names(&["seen"])
        .constants(vec![Constant::None, Constant::Bool(true)])
        .op("RESUME", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .build();
    let mut record = ClassRecord::new("Suppress");
    record.version = Some(DialectVersion::V3_11);
    record.methods.push(enter);
    record.methods.push(exit);
    record
}

/// def use(cm, x):
///     with cm as v:
///         return v // x
///     return -1
fn use_manager() -> FunctionRecord {
    FunctionBuilder::new("use", DialectVersion::V3_11)
        .args(&["cm", "x"])
        .locals(&["v"])
        .constants(vec![Constant::None, Constant::Int(-1)])
        .op("RESUME", 0)
        .op("LOAD_FAST", 0)
        .op("BEFORE_WITH", 0)
        .op("STORE_FAST", 2)
        .op("LOAD_FAST", 2)
        .op("LOAD_FAST", 1)
        .op("BINARY_OP", 2)
        .op("SWAP", 2)
        .op("LOAD_CONST", 0)
        .op("LOAD_CONST", 0)
        .op("LOAD_CONST", 0)
        .op("PRECALL", 2)
        .op("CALL", 2)
        .op("POP_TOP", 0)
        .op("RETURN_VALUE", 0)
        .op("PUSH_EXC_INFO", 0)
        .op("WITH_EXCEPT_START", 0)
        .op("POP_JUMP_FORWARD_IF_TRUE", 4)
        .op("RERAISE", 2)
        .op("COPY", 3)
        .op("POP_EXCEPT", 0)
        .op("RERAISE", 1)
        .op("POP_TOP", 0)
        .op("POP_EXCEPT", 0)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 1)
        .op("RETURN_VALUE", 0)
        .handler(3, 7, 15, 1, true)
        .handler(15, 19, 19, 3, true)
        .handler(22, 23, 19, 3, true)
        .build()
}

#[test]
fn test_with_statement_calls_exit_on_both_paths() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &suppress());
    let artifact = translator.translate(&use_manager(), DialectVersion::V3_11).expect("translates");

    let manager = vm.call_value(class.clone(), Vec::new(), Vec::new()).expect("constructs");
    let result = vm.call_function(&artifact, vec![manager.clone(), Value::Int(2)]).expect("runs");
    assert_eq!(result, Value::Int(5));
    assert_eq!(vm.load_attr(&manager, "seen").expect("exit ran"), Value::None);

    let manager = vm.call_value(class, Vec::new(), Vec::new()).expect("constructs");
    let result = vm.call_function(&artifact, vec![manager.clone(), Value::Int(0)]).expect("suppressed");
    assert_eq!(result, Value::Int(-1));
    assert_eq!(vm.load_attr(&manager, "seen").expect("exit ran"), Value::Type(ZERO_DIVISION_ERROR));
}

/// class Num:
///     def __init__(self, n: int): self.n = n
///     def __rsub__(self, other: int) -> int: return other - self.n
fn num() -> ClassRecord {
    let init = FunctionBuilder::new("__init__", DialectVersion::V3_11)
        .qualified_name("Num.__init__")
        .args(&["self", "n"])
        .annotate("n", "int")
        .names(&["n"])
        .constants(vec![Constant::None])
        .op("RESUME", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("STORE_ATTR", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let rsub = FunctionBuilder::new("__rsub__", DialectVersion::V3_11)
        .qualified_name("Num.__rsub__")
        .args(&["self", "other"])
        .annotate("other", "int")
        .annotate("return", "int")
        .names(&["n"])
        .op("RESUME", 0)
        .op("LOAD_FAST", 1)
        .op("LOAD_FAST", 0)
        .op("LOAD_ATTR", 0)
        .op("BINARY_OP", 10)
        .op("RETURN_VALUE", 0)
        .build();
    let mut record = ClassRecord::new("Num");
    record.version = Some(DialectVersion::V3_11);
    record.field_types.insert("n".into(), "int".into());
    record.methods.push(init);
    record.methods.push(rsub);
    record
}

/// def ten_minus(n): return 10 - n
fn ten_minus(annotation: Option<&str>) -> FunctionRecord {
    let mut builder = FunctionBuilder::new("ten_minus", DialectVersion::V3_11).args(&["n"]);
    if let Some(annotation) = annotation {
        builder = builder.annotate("n", annotation);
    }
    builder
        .constants(vec![Constant::None, Constant::Int(10)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 1)
        .op("LOAD_FAST", 0)
        .op("BINARY_OP", 10)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_reflected_dunder_runs_on_right_operand() {
    let translator = translator();
    let mut vm = BytecodeVM::new(translator.registry().clone());
    let class = load(&translator, &mut vm, &num());

    let typed = translator.translate(&ten_minus(Some("Num")), DialectVersion::V3_11).expect("translates");
    let listing = typed.chunk.disassemble();
    assert!(listing.contains("invoke_dunder"), "{}", listing);
    assert!(!listing.contains("binary_op"), "{}", listing);

    let dynamic = translator.translate(&ten_minus(None), DialectVersion::V3_11).expect("translates");
    assert!(dynamic.chunk.disassemble().contains("binary_op"));

    for artifact in [&typed, &dynamic] {
        let instance = vm.call_value(class.clone(), ints(&[3]), Vec::new()).expect("constructs");
        assert_eq!(vm.call_function(artifact, vec![instance]).expect("runs"), Value::Int(7));
    }
}

#[test]
fn test_failed_class_leaves_registry_unchanged() {
    let translator = translator();
    let before = translator.registry().len();

    let broken = FunctionBuilder::new("broken", DialectVersion::V3_11)
        .qualified_name("Widget.broken")
        .args(&["self"])
        .op("RESUME", 0)
        .op("NOT_AN_OPCODE", 0)
        .build();
    let mut record = counter();
    record.qualified_name = "Widget".into();
    record.methods.push(broken);
    let err = translator.translate_class(&record).expect_err("unknown opcode");
    assert!(matches!(err, TranslateError::Decode(_)), "{}", err);
    assert_eq!(translator.registry().lookup_name("Widget"), None);
    assert_eq!(translator.registry().len(), before);

    record.methods.pop();
    let set = translator.translate_class(&record).expect("retry translates");
    let class = set.class().expect("class artifact");
    assert_eq!(translator.registry().lookup_name("Widget"), Some(class.type_id));
    assert_eq!(translator.registry().len(), before + 1);
}
