//! Shared helpers for integration tests
//!
//! Records are assembled with `FunctionBuilder`, translated with a fresh
//! `Translator`, and run on a VM that shares the translator's registry.

#![allow(dead_code)]

use std::sync::Arc;

use pytron::config::TranslatorConfig;
use pytron::runtime::{StdHost, Value};
use pytron::source::{DialectVersion, FunctionRecord};
use pytron::translator::{FunctionArtifact, Translator};
use pytron::vm::{BytecodeVM, VmConfig, VmResult};

/// Translator with the default configuration
pub fn translator() -> Translator {
    Translator::new(TranslatorConfig::default())
}

/// Translate `record` in the dialect it names
pub fn translate_with(translator: &Translator, record: &FunctionRecord) -> FunctionArtifact {
    let version = record.version.unwrap_or(DialectVersion::V3_11);
    match translator.translate(record, version) {
        Ok(artifact) => artifact,
        Err(e) => panic!("{} should translate: {}", record.qualname(), e),
    }
}

pub fn translate(record: &FunctionRecord) -> FunctionArtifact {
    translate_with(&translator(), record)
}

/// Translate `record` and call it with `args`
pub fn call(record: &FunctionRecord, args: Vec<Value>) -> VmResult<Value> {
    let translator = translator();
    let artifact = translate_with(&translator, record);
    let mut vm = BytecodeVM::new(translator.registry().clone());
    vm.call_function(&artifact, args)
}

/// Translate `record` and call it with integer arguments
pub fn call_ints(record: &FunctionRecord, args: &[i64]) -> VmResult<Value> {
    call(record, args.iter().copied().map(Value::Int).collect())
}

/// VM over `translator`'s registry that captures printed output
pub fn capturing_vm(translator: &Translator) -> (BytecodeVM, Arc<StdHost>) {
    let host = Arc::new(StdHost::capturing());
    let vm = BytecodeVM::with_host(translator.registry().clone(), VmConfig::default(), host.clone());
    (vm, host)
}

/// Every item a generator or iterator produces
pub fn drain(vm: &mut BytecodeVM, iterator: &Value) -> Vec<Value> {
    let mut items = Vec::new();
    while let Some(item) = vm.next_item(iterator).expect("iteration should not raise") {
        items.push(item);
    }
    items
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}
