//! Class translation.
//!
//! A class is registered with the type registry before any of its methods is
//! translated, so method bodies see the class's fields and each other's
//! signatures. Method bodies are then translated independently, in parallel
//! when the configuration allows. If any step after registration fails the
//! type is unregistered again.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use super::artifact::{ArtifactSet, ClassArtifact, FunctionArtifact, MethodArtifact, MethodKind};
use super::error::TranslateResult;
use super::Translator;
use crate::decode::DecodeError;
use crate::runtime::Value;
use crate::source::{ClassRecord, DialectVersion, FunctionRecord};
use crate::types::builtin::TYPE;
use crate::types::{Emission, FunctionSignature, TypeId, TypeResolutionError};

const CONSTRUCTOR: &str = "__init__";

/// One method awaiting translation
struct PendingMethod<'r> {
    record: &'r FunctionRecord,
    kind: MethodKind,
    version: DialectVersion,
}

impl Translator {
    /// Translate a class: register its type, then translate every method
    pub fn translate_class(&self, record: &ClassRecord) -> TranslateResult<ArtifactSet> {
        let registry = &self.registry;
        let bases = record
            .superclasses
            .iter()
            .map(|name| {
                registry
                    .lookup_name(name)
                    .ok_or_else(|| TypeResolutionError::UnknownType(Arc::from(name.as_str())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let type_id = registry.register_class(&record.qualified_name, &bases)?;

        let result = self.translate_registered(record, type_id, bases);
        if let Err(err) = &result {
            debug!(target: "pytron::class", class = %record.qualified_name, error = %err, "class translation failed");
            registry.unregister(type_id);
        }
        result
    }

    /// Everything after registration; a failure here leaves the type to be unregistered
    fn translate_registered(
        &self,
        record: &ClassRecord,
        type_id: TypeId,
        bases: Vec<TypeId>,
    ) -> TranslateResult<ArtifactSet> {
        let registry = &self.registry;
        for (field, type_name) in &record.field_types {
            registry.add_instance_field(type_id, field, registry.resolve_annotation(type_name))?;
        }
        let default_version = record.version.unwrap_or(DialectVersion::V3_11);
        let mut static_attributes = Vec::with_capacity(record.static_attributes.len());
        for (name, constant) in &record.static_attributes {
            let value = self.constant_value(constant, default_version, Some(type_id))?;
            registry.add_static_field(type_id, name, value.type_id())?;
            static_attributes.push((Arc::<str>::from(name.as_str()), value));
        }

        let pending = self.pending_methods(record)?;
        for method in &pending {
            self.declare_method(type_id, method)?;
        }

        let translate = |method: &PendingMethod<'_>| -> TranslateResult<MethodArtifact> {
            let class_type = (method.kind == MethodKind::Instance).then_some(type_id);
            let function = self.translate_in(method.record, method.version, class_type)?;
            Ok(MethodArtifact {
                name: Arc::from(method.record.name.as_str()),
                kind: method.kind,
                function: Arc::new(function),
            })
        };
        let methods = if self.config.parallel_classes {
            pending.par_iter().map(translate).collect::<TranslateResult<Vec<_>>>()?
        } else {
            pending.iter().map(translate).collect::<TranslateResult<Vec<_>>>()?
        };

        let name = self.cache.reserve_name(&record.artifact_base_name());
        let class = Arc::new(ClassArtifact {
            name: Arc::from(name),
            qualified_name: Arc::from(record.qualified_name.as_str()),
            type_id,
            bases,
            methods,
            static_attributes,
            annotations: record.annotations.clone(),
        });
        debug!(
            target: "pytron::class",
            class = %class.name,
            type_id = type_id.0,
            methods = class.methods.len(),
            parallel = self.config.parallel_classes,
            "translated class"
        );

        let mut set = ArtifactSet::new();
        for method in &class.methods {
            set.push_function(method.function.clone());
        }
        set.push_class(class.clone())?;
        self.cache.insert(super::Artifact::Class(class));
        Ok(set)
    }

    fn pending_methods<'r>(&self, record: &'r ClassRecord) -> TranslateResult<Vec<PendingMethod<'r>>> {
        let groups = [
            (&record.methods, MethodKind::Instance),
            (&record.static_methods, MethodKind::Static),
            (&record.class_methods, MethodKind::Class),
        ];
        let mut pending = Vec::new();
        for (records, kind) in groups {
            for method in records {
                let version = method.version.or(record.version).ok_or_else(|| {
                    DecodeError::MalformedVersion(format!("{} has no dialect version", method.qualname()))
                })?;
                pending.push(PendingMethod { record: method, kind, version });
            }
        }
        Ok(pending)
    }

    /// Register the signature of a method so calls on the class resolve statically
    fn declare_method(&self, type_id: TypeId, method: &PendingMethod<'_>) -> TranslateResult<()> {
        let record = method.record;
        let skip = match method.kind {
            MethodKind::Instance | MethodKind::Class => 1,
            MethodKind::Static => 0,
        };
        let params: Vec<TypeId> = record
            .varnames
            .iter()
            .take(record.argcount as usize)
            .skip(skip)
            .map(|name| {
                record
                    .annotations
                    .get(name)
                    .map_or(crate::types::builtin::OBJECT, |a| self.registry.resolve_annotation(a))
            })
            .collect();
        let ret = record
            .annotations
            .get("return")
            .map_or(crate::types::builtin::OBJECT, |a| self.registry.resolve_annotation(a));

        if method.kind == MethodKind::Instance && record.name == CONSTRUCTOR {
            let sig = FunctionSignature::new(CONSTRUCTOR, params, type_id, Emission::Runtime);
            self.registry.set_constructor(type_id, sig)?;
            return Ok(());
        }
        let mut sig = FunctionSignature::new(record.name.as_str(), params, ret, Emission::Runtime);
        if record.varargs {
            sig = sig.with_varargs();
        }
        self.registry.add_method(type_id, sig)?;
        if method.kind == MethodKind::Class {
            self.registry.add_static_field(type_id, &record.name, TYPE)?;
        }
        Ok(())
    }
}

/// The static attributes of a class as runtime values, in declaration order
pub fn static_values(class: &ClassArtifact) -> impl Iterator<Item = (&str, &Value)> {
    class.static_attributes.iter().map(|(name, value)| (name.as_ref(), value))
}

/// The translated function behind `name`, if the class defines it
pub fn method_function<'c>(class: &'c ClassArtifact, name: &str) -> Option<&'c Arc<FunctionArtifact>> {
    class.method(name).map(|m| &m.function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::source::{FunctionBuilder, Constant};
    use crate::translator::TranslateError;
    use crate::types::builtin::{INT, OBJECT};

    fn getter(name: &str, field: &str) -> FunctionRecord {
        FunctionBuilder::new(name, DialectVersion::V3_11)
            .args(&["self"])
            .names(&[field])
            .annotate("return", "int")
            .op("RESUME", 0)
            .op("LOAD_FAST", 0)
            .op("LOAD_ATTR", 0)
            .op("RETURN_VALUE", 0)
            .build()
    }

    fn init(field: &str) -> FunctionRecord {
        FunctionBuilder::new("__init__", DialectVersion::V3_11)
            .args(&["self", "value"])
            .names(&[field])
            .annotate("value", "int")
            .op("RESUME", 0)
            .op("LOAD_FAST", 1)
            .op("LOAD_FAST", 0)
            .op("STORE_ATTR", 0)
            .op("LOAD_CONST", 0)
            .op("RETURN_VALUE", 0)
            .constants(vec![Constant::None])
            .build()
    }

    #[test]
    fn test_class_with_inheritance_and_constructor() {
        for parallel in [true, false] {
            let translator = Translator::new(TranslatorConfig { parallel_classes: parallel, ..Default::default() });
            let mut base = ClassRecord::new("Base");
            base.module = "shapes".into();
            base.field_types.insert("size".into(), "int".into());
            base.methods.push(init("size"));
            base.methods.push(getter("get_size", "size"));
            base.static_attributes.insert("KIND".into(), Constant::Str("base".into()));
            let base_set = translator.translate_class(&base).expect("base translates");
            let base_class = base_set.class().expect("class artifact").clone();
            assert_eq!(base_class.name.as_ref(), "shapes.Base");
            assert!(base_set.side_table.contains_key("get_size"));

            let mut derived = ClassRecord::new("Derived");
            derived.superclasses.push("Base".into());
            derived.methods.push(getter("twice", "size"));
            let derived_set = translator.translate_class(&derived).expect("derived translates");
            let derived_class = derived_set.class().expect("class artifact");

            let registry = translator.registry();
            assert!(registry.is_subclass(derived_class.type_id, base_class.type_id));
            assert_eq!(registry.field(derived_class.type_id, "size").map(|f| f.ty), Some(INT));
            assert!(registry.lookup_method(derived_class.type_id, "get_size").is_some());
            let ctor = registry.get(base_class.type_id).and_then(|t| t.constructor.clone()).expect("constructor");
            assert_eq!(ctor.params, vec![INT]);
            assert_eq!(static_values(&base_class).count(), 1);
            assert!(method_function(&base_class, "__init__").is_some());
        }
    }

    #[test]
    fn test_incompatible_field_is_rejected() {
        let translator = Translator::default();
        let mut base = ClassRecord::new("Holder");
        base.version = Some(DialectVersion::V3_11);
        base.field_types.insert("value".into(), "int".into());
        translator.translate_class(&base).expect("base translates");

        let mut derived = ClassRecord::new("BadHolder");
        derived.superclasses.push("Holder".into());
        derived.field_types.insert("value".into(), "str".into());
        let err = translator.translate_class(&derived).expect_err("str does not refine int");
        assert!(matches!(
            err,
            TranslateError::TypeResolution(TypeResolutionError::IncompatibleField { ref field, .. }) if field.as_ref() == "value"
        ));
    }

    #[test]
    fn test_unknown_base_is_rejected() {
        let mut record = ClassRecord::new("Orphan");
        record.superclasses.push("Missing".into());
        let err = Translator::default().translate_class(&record).expect_err("no such base");
        assert!(matches!(err, TranslateError::TypeResolution(TypeResolutionError::UnknownType(_))));
    }

    #[test]
    fn test_field_load_is_typed_in_methods() {
        let translator = Translator::default();
        let mut record = ClassRecord::new("Counter");
        record.field_types.insert("count".into(), "int".into());
        record.methods.push(getter("value", "count"));
        let set = translator.translate_class(&record).expect("translates");
        let class = set.class().expect("class");
        let method = method_function(class, "value").expect("method");
        let listing = method.chunk.disassemble();
        assert!(listing.contains("cast int"), "field load should be checked: {}", listing);
        assert_eq!(translator.registry().field(class.type_id, "missing").map(|f| f.ty).unwrap_or(OBJECT), OBJECT);
    }
}
