//! The translation pipeline.
//!
//! A `FunctionRecord` goes through five stages:
//!
//! 1. **Decode**: raw instructions become typed opcode nodes for the dialect
//! 2. **Constants**: the constant pool is converted, nested code objects
//!    translated recursively
//! 3. **Dataflow**: stack metadata is propagated to a fixed point
//! 4. **Emission**: every reachable node emits target code, with handler
//!    prologues and generator dispatch added by the lowering pass
//! 5. **Verification**: the built chunk is checked before it is published
//!
//! A failure at any stage leaves no partial artifact behind.

pub mod artifact;
pub mod class;
pub mod dataflow;
pub mod error;
pub mod lowering;
pub mod metadata;
pub mod proxy;
pub mod stack;

use std::sync::Arc;

use tracing::{debug, warn};

pub use artifact::{
    Artifact, ArtifactCache, ArtifactSet, ClassArtifact, FunctionArtifact, MethodArtifact, MethodKind, ProxyArtifact,
};
pub use error::{DataflowError, EmissionError, TranslateError, TranslateResult};
pub use proxy::InterfaceDescriptor;

use self::metadata::FunctionMetadata;
use crate::config::TranslatorConfig;
use crate::decode::{build_nodes, decode, DecodeError};
use crate::runtime::Value;
use crate::source::{Constant, DialectVersion, FunctionRecord};
use crate::target::verify;
use crate::types::{TypeId, TypeRegistry};

/// Result of a translation that may hand the function to the fallback interpreter
#[derive(Debug, Clone)]
pub enum TranslateOutcome {
    Translated(FunctionArtifact),
    /// The function uses a construct the translator does not lower
    Fallback { reason: String },
}

impl TranslateOutcome {
    pub fn is_translated(&self) -> bool {
        matches!(self, Self::Translated(_))
    }
}

/// Translates source records into verified target artifacts
///
/// The registry and the artifact cache are shared, so translators cloned
/// from one another see each other's classes and never hand out the same
/// artifact name twice.
#[derive(Clone)]
pub struct Translator {
    registry: Arc<TypeRegistry>,
    cache: Arc<ArtifactCache>,
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        let cache = Arc::new(ArtifactCache::new(config.artifact_cache_size));
        Self { registry: Arc::new(TypeRegistry::new()), cache, config }
    }

    pub fn with_registry(registry: Arc<TypeRegistry>, config: TranslatorConfig) -> Self {
        let cache = Arc::new(ArtifactCache::new(config.artifact_cache_size));
        Self { registry, cache, config }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    #[inline]
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    #[inline]
    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translate one function
    pub fn translate(&self, record: &FunctionRecord, version: DialectVersion) -> TranslateResult<FunctionArtifact> {
        self.translate_in(record, version, None)
    }

    /// Translate, turning unsupported constructs into a fallback request
    ///
    /// Only decode failures and constructs the emitter refuses to lower fall
    /// back; dataflow and verification failures are still errors.
    pub fn translate_or_fallback(
        &self,
        record: &FunctionRecord,
        version: DialectVersion,
    ) -> TranslateResult<TranslateOutcome> {
        match self.translate(record, version) {
            Ok(artifact) => Ok(TranslateOutcome::Translated(artifact)),
            Err(error @ TranslateError::Decode(DecodeError::UnknownOpcode { .. }))
            | Err(error @ TranslateError::Decode(DecodeError::UnsupportedOpcode { .. }))
            | Err(error @ TranslateError::Emission(EmissionError::Unsupported { .. })) => {
                warn!(
                    target: "pytron::translate",
                    function = record.qualname(),
                    %error,
                    "falling back to the interpreter"
                );
                Ok(TranslateOutcome::Fallback { reason: error.to_string() })
            }
            Err(other) => Err(other),
        }
    }

    /// Translate a function, as a method of `class_type` when given
    pub(crate) fn translate_in(
        &self,
        record: &FunctionRecord,
        version: DialectVersion,
        class_type: Option<TypeId>,
    ) -> TranslateResult<FunctionArtifact> {
        if !version.is_supported() {
            return Err(DecodeError::UnsupportedVersion(version).into());
        }
        let raw = record.raw_instructions()?;
        let instructions = decode(&raw, version)?;
        let nodes = build_nodes(&instructions, version)?;
        let constants = record
            .constants
            .iter()
            .map(|constant| self.constant_value(constant, version, class_type))
            .collect::<TranslateResult<Vec<_>>>()?;

        let mut meta = FunctionMetadata::new(record, version, &self.registry, class_type, constants, nodes.len());
        let flow = dataflow::analyze(&meta, &nodes, self.config.max_dataflow_iterations)?;
        lowering::emit_function(&mut meta, &nodes, &flow)?;
        let chunk = meta.builder.build()?;
        if self.config.verify {
            verify(&chunk)?;
        }

        let name = self.cache.reserve_name(record.qualname());
        debug!(
            target: "pytron::translate",
            function = %name,
            %version,
            instructions = nodes.len(),
            reachable = flow.reachable_count(),
            iterations = flow.iterations,
            bytes = chunk.len(),
            "translated function"
        );
        let artifact = FunctionArtifact { name: Arc::from(name), chunk: Arc::new(chunk), iterations: flow.iterations };
        self.cache.insert(Artifact::Function(Arc::new(artifact.clone())));
        Ok(artifact)
    }

    /// Runtime value of a source constant; code objects are translated in place
    fn constant_value(
        &self,
        constant: &Constant,
        version: DialectVersion,
        class_type: Option<TypeId>,
    ) -> TranslateResult<Value> {
        Ok(match constant {
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::Str(s) => Value::from(s.as_str()),
            Constant::Ellipsis => Value::Ellipsis,
            Constant::Tuple(items) => Value::tuple(
                items
                    .iter()
                    .map(|item| self.constant_value(item, version, class_type))
                    .collect::<TranslateResult<Vec<_>>>()?,
            ),
            Constant::Code(code) => {
                let version = code.version.unwrap_or(version);
                Value::Code(self.translate_in(code, version, class_type)?.chunk)
            }
            // loaded through `LoadFallback`, the pool only keeps its description
            Constant::Opaque(description) => Value::from(description.as_str()),
        })
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new(TranslatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FunctionBuilder;
    use crate::target::Opcode as TargetOp;

    #[test]
    fn test_translate_reserves_unique_names() {
        let translator = Translator::default();
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .op("RESUME", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .constants(vec![Constant::None])
            .build();
        let first = translator.translate(&record, DialectVersion::V3_11).expect("translates");
        let second = translator.translate(&record, DialectVersion::V3_11).expect("translates");
        assert_eq!(first.name.as_ref(), "f");
        assert_eq!(second.name.as_ref(), "f$$2");
        assert!(translator.cache().get("f$$2").is_some());
    }

    #[test]
    fn test_nested_code_constant_is_translated() {
        let inner = FunctionBuilder::new("inner", DialectVersion::V3_11)
            .op("RESUME", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .constants(vec![Constant::Int(7)])
            .build();
        let outer = FunctionBuilder::new("outer", DialectVersion::V3_11)
            .op("RESUME", 0)
            .op("LOAD_CONST", 0)
            .op("MAKE_FUNCTION", 0)
            .op("RETURN_VALUE", 0)
            .constants(vec![Constant::Code(Box::new(inner))])
            .build();
        let artifact = Translator::default().translate(&outer, DialectVersion::V3_11).expect("translates");
        let Some(Value::Code(chunk)) = artifact.chunk.get_constant(0) else {
            panic!("expected a code constant");
        };
        assert_eq!(chunk.name(), "inner");
        assert_eq!(chunk.read_opcode(0), Some(TargetOp::PushSmallInt));
    }

    #[test]
    fn test_unknown_opcode_falls_back() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .op("NOT_A_REAL_OPCODE", 0)
            .build();
        let outcome = Translator::default()
            .translate_or_fallback(&record, DialectVersion::V3_11)
            .expect("fallback is not an error");
        assert!(matches!(outcome, TranslateOutcome::Fallback { ref reason } if reason.contains("NOT_A_REAL_OPCODE")));
    }

    #[test]
    fn test_dataflow_errors_do_not_fall_back() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11)
            .op("RESUME", 0)
            .op("POP_TOP", 0)
            .build();
        let err = Translator::default()
            .translate_or_fallback(&record, DialectVersion::V3_11)
            .expect_err("underflow is fatal");
        assert_eq!(err.category(), "dataflow");
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let record = FunctionBuilder::new("f", DialectVersion::V3_11).build();
        let err = Translator::default()
            .translate(&record, DialectVersion::new(3, 8))
            .expect_err("3.8 is not supported");
        assert!(matches!(err, TranslateError::Decode(DecodeError::UnsupportedVersion(_))));
    }
}
