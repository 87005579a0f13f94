//! Properties of the stack-metadata dataflow, checked through the public translator
//!
//! Generated programs use a fixed-seed xorshift so failures are reproducible.

mod common;

use common::{call_ints, translate, translate_with, translator};
use pytron::config::TranslatorConfig;
use pytron::runtime::Value;
use pytron::source::{Constant, DialectVersion, FunctionBuilder, FunctionRecord};
use pytron::target::{verify, Opcode};
use pytron::translator::error::DataflowError;
use pytron::translator::{TranslateError, Translator};

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Add,
    Sub,
    Mul,
}

impl Op {
    fn arg(self) -> u32 {
        match self {
            Op::Add => 0,
            Op::Sub => 10,
            Op::Mul => 5,
        }
    }

    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
        }
    }
}

/// A left-folded expression over small int constants, with its expected value
fn straight_line(rng: &mut XorShift, version: DialectVersion) -> (FunctionRecord, i64) {
    let len = 1 + rng.below(8) as usize;
    let values: Vec<i64> = (0..len).map(|_| rng.below(11) as i64 - 5).collect();
    let ops: Vec<Op> = (1..len).map(|_| [Op::Add, Op::Sub, Op::Mul][rng.below(3) as usize]).collect();

    let mut builder = FunctionBuilder::new("expr", version)
        .constants(values.iter().copied().map(Constant::Int).collect());
    if version >= DialectVersion::V3_11 {
        builder = builder.op("RESUME", 0);
    }
    builder = builder.op("LOAD_CONST", 0);
    let mut expected = values[0];
    for (i, op) in ops.iter().enumerate() {
        builder = builder.op("LOAD_CONST", i as u32 + 1);
        builder = if version >= DialectVersion::V3_11 {
            builder.op("BINARY_OP", op.arg())
        } else {
            let legacy = match op {
                Op::Add => "BINARY_ADD",
                Op::Sub => "BINARY_SUBTRACT",
                Op::Mul => "BINARY_MULTIPLY",
            };
            builder.op(legacy, 0)
        };
        expected = op.apply(expected, values[i + 1]);
    }
    (builder.op("RETURN_VALUE", 0).build(), expected)
}

fn opcodes(chunk: &pytron::target::BytecodeChunk) -> Vec<Opcode> {
    let mut ops = Vec::new();
    let mut offset = 0;
    while let Some(op) = chunk.read_opcode(offset) {
        ops.push(op);
        offset += 1 + op.immediate_size();
    }
    ops
}

#[test]
fn test_generated_int_programs_are_statically_typed() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    for version in [DialectVersion::V3_9, DialectVersion::V3_10, DialectVersion::V3_11, DialectVersion::V3_12] {
        for _ in 0..50 {
            let (record, expected) = straight_line(&mut rng, version);
            let artifact = translate(&record);
            let ops = opcodes(&artifact.chunk);
            assert!(!ops.contains(&Opcode::BinaryOp), "int operands resolve statically in {}: {:?}", version, ops);
            assert_eq!(call_ints(&record, &[]).expect("runs"), Value::Int(expected), "{:?}", record.instructions);
        }
    }
}

#[test]
fn test_translation_is_deterministic() {
    let mut rng = XorShift(42);
    let translator = translator();
    for _ in 0..20 {
        let (record, _) = straight_line(&mut rng, DialectVersion::V3_11);
        let first = translate_with(&translator, &record);
        let second = translate_with(&translator, &record);
        assert_ne!(first.name, second.name);
        assert_eq!(first.chunk.code(), second.chunk.code());
        assert_eq!(first.chunk.constants(), second.chunk.constants());
        assert_eq!(first.iterations, second.iterations);
    }
}

#[test]
fn test_every_artifact_verifies() {
    let mut rng = XorShift(7);
    for _ in 0..30 {
        let (record, _) = straight_line(&mut rng, DialectVersion::V3_12);
        let artifact = translate(&record);
        verify(&artifact.chunk).expect("translated chunks verify");
    }
}

/// i = 0; while i < 10: i += 1; return i
fn counting_loop() -> FunctionRecord {
    FunctionBuilder::new("count", DialectVersion::V3_11)
        .locals(&["i"])
        .constants(vec![Constant::Int(0), Constant::Int(10), Constant::Int(1)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 0)
        .op("STORE_FAST", 0)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 1)
        .op("COMPARE_OP", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 5)
        .op("LOAD_FAST", 0)
        .op("LOAD_CONST", 2)
        .op("BINARY_OP", 13)
        .op("STORE_FAST", 0)
        .op("JUMP_BACKWARD", 9)
        .op("LOAD_FAST", 0)
        .op("RETURN_VALUE", 0)
        .build()
}

#[test]
fn test_loops_converge_and_keep_int_locals() {
    let record = counting_loop();
    let artifact = translate(&record);
    let visits = artifact.iterations;
    assert!(visits >= 13 && visits <= 3 * record.instructions.len(), "{} visits", visits);
    assert!(opcodes(&artifact.chunk).contains(&Opcode::AddInt));
    assert_eq!(call_ints(&record, &[]).expect("runs"), Value::Int(10));
}

#[test]
fn test_iteration_cap_is_reported() {
    let config = TranslatorConfig { max_dataflow_iterations: 3, ..TranslatorConfig::default() };
    let err = Translator::new(config)
        .translate(&counting_loop(), DialectVersion::V3_11)
        .expect_err("three visits are not enough");
    assert_eq!(err, TranslateError::Dataflow(DataflowError::NoConvergence { iterations: 3 }));
    assert_eq!(err.category(), "dataflow");
}

#[test]
fn test_unreachable_code_is_ignored() {
    // the trailing pops would underflow if they were analysed
    let record = FunctionBuilder::new("f", DialectVersion::V3_11)
        .constants(vec![Constant::Int(1)])
        .op("RESUME", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .op("POP_TOP", 0)
        .op("POP_TOP", 0)
        .build();
    let artifact = translate(&record);
    assert!(!opcodes(&artifact.chunk).contains(&Opcode::Pop));
    assert_eq!(call_ints(&record, &[]).expect("runs"), Value::Int(1));
}

#[test]
fn test_depth_mismatch_names_the_merge_point() {
    let record = FunctionBuilder::new("f", DialectVersion::V3_11)
        .args(&["x"])
        .constants(vec![Constant::None])
        .op("LOAD_FAST", 0)
        .op("POP_JUMP_FORWARD_IF_FALSE", 1)
        .op("LOAD_CONST", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .build();
    let err = translator().translate(&record, DialectVersion::V3_11).expect_err("paths disagree");
    match err {
        TranslateError::Dataflow(DataflowError::StackDepthMismatch { offset, expected, found, producers }) => {
            assert_eq!(offset, 3);
            assert_eq!((expected, found), (0, 1));
            assert!(producers.contains(&2), "the extra value comes from instruction 2: {:?}", producers);
        }
        other => panic!("expected a depth mismatch, got {}", other),
    }
}

#[test]
fn test_handler_deeper_than_stack_is_rejected() {
    let record = FunctionBuilder::new("f", DialectVersion::V3_11)
        .names(&["g"])
        .constants(vec![Constant::None])
        .op("RESUME", 0)
        .op("LOAD_GLOBAL", 0)
        .op("RETURN_VALUE", 0)
        .op("POP_TOP", 0)
        .op("LOAD_CONST", 0)
        .op("RETURN_VALUE", 0)
        .handler(1, 2, 3, 2, false)
        .build();
    let err = translator().translate(&record, DialectVersion::V3_11).expect_err("depth 2 with an empty stack");
    assert!(matches!(err, TranslateError::Dataflow(DataflowError::HandlerDepth { offset: 1, depth: 2, .. })));
}
