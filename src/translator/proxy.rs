//! Interface proxies.
//!
//! A proxy lets an instance of a concrete class stand in wherever an
//! interface type is expected. Each interface method becomes a small
//! forwarding chunk that looks the method up on the receiver and calls it
//! with the proxy's own arguments. Proxies are structural: the same
//! interface, target and method list always yield the same artifact.

use std::sync::Arc;

use tracing::{debug, trace};

use super::artifact::{ProxyArtifact, ProxyKey};
use super::error::TranslateResult;
use super::Translator;
use crate::target::{BytecodeChunk, ChunkBuilder, Opcode as TargetOp, ValueKind};
use crate::types::registry::{kind_of, TypeKind};
use crate::types::{FunctionSignature, TypeId, TypeResolutionError};

/// An interface to implement: its name and the methods it declares
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    pub name: Arc<str>,
    /// Method signatures, receiver excluded
    pub methods: Vec<FunctionSignature>,
}

impl InterfaceDescriptor {
    pub fn new(name: impl Into<Arc<str>>, methods: Vec<FunctionSignature>) -> Self {
        Self { name: name.into(), methods }
    }
}

impl Translator {
    /// The proxy making instances of `target` usable as `iface`
    ///
    /// Every interface method must be resolvable on `target` with the
    /// interface's parameter types.
    pub fn generate_interface_proxy(
        &self,
        iface: &InterfaceDescriptor,
        target: TypeId,
    ) -> TranslateResult<Arc<ProxyArtifact>> {
        let interface = self.interface_type(iface)?;
        for method in &iface.methods {
            let resolved = self
                .registry
                .lookup_method(target, &method.name)
                .and_then(|set| set.resolve(&self.registry, &method.params).cloned());
            if resolved.is_none() {
                return Err(TypeResolutionError::MissingMethod {
                    owner: self.registry.name_of(target),
                    method: method.name.clone(),
                }
                .into());
            }
        }

        let mut methods: Vec<Arc<str>> = iface.methods.iter().map(|m| m.name.clone()).collect();
        methods.sort();
        methods.dedup();
        let key = ProxyKey { interface, target, methods };
        self.cache.proxy_or_insert_with(key, || {
            let target_name = self.registry.name_of(target);
            let name = self.cache.reserve_name(&format!("{}$proxy${}", iface.name, target_name));
            let methods = iface
                .methods
                .iter()
                .map(|method| Ok((method.name.clone(), self.forwarding_chunk(&name, method)?)))
                .collect::<TranslateResult<Vec<_>>>()?;
            debug!(
                target: "pytron::proxy",
                proxy = %name,
                interface = %iface.name,
                target = %target_name,
                methods = methods.len(),
                "generated interface proxy"
            );
            Ok(ProxyArtifact { name: Arc::from(name), interface, target, methods })
        })
    }

    /// Registered interface type for `iface`, registering it on first use
    fn interface_type(&self, iface: &InterfaceDescriptor) -> TranslateResult<TypeId> {
        if let Some(id) = self.registry.lookup_name(&iface.name) {
            let is_interface = self.registry.get(id).is_some_and(|ty| ty.kind == TypeKind::Interface);
            if !is_interface {
                return Err(TypeResolutionError::InvalidBase { class: iface.name.clone(), base: self.registry.name_of(id) }.into());
            }
            return Ok(id);
        }
        Ok(self.registry.register_interface(&iface.name, iface.methods.clone())?)
    }

    /// `self.<method>(args...)`, cast back to the declared return kind
    fn forwarding_chunk(&self, proxy: &str, method: &FunctionSignature) -> TranslateResult<Arc<BytecodeChunk>> {
        let mut builder = ChunkBuilder::new(method.name.clone());
        let info = builder.info_mut();
        info.qualname = Arc::from(format!("{}.{}", proxy, method.name));
        info.arg_count = 1 + method.params.len() as u16;
        info.has_varargs = method.varargs;
        info.local_names.push(Arc::from("self"));
        info.local_names.extend((0..method.params.len()).map(|i| Arc::from(format!("arg{}", i))));
        if method.varargs {
            info.local_names.push(Arc::from("args"));
        }

        builder.emit_u16(TargetOp::LoadLocal, 0);
        builder.emit_name(TargetOp::LoadAttr, &method.name)?;
        let argc = method.params.len();
        for slot in 1..=argc {
            builder.emit_u16(TargetOp::LoadLocal, slot as u16);
        }
        if method.varargs {
            // positional list then an empty keyword map
            builder.emit_u16(TargetOp::BuildList, argc as u16);
            builder.emit_u16(TargetOp::LoadLocal, (argc + 1) as u16);
            builder.emit_u16(TargetOp::ListExtend, 1);
            builder.emit_u16(TargetOp::BuildMap, 0);
            builder.emit_byte(TargetOp::CallEx, 1);
        } else {
            builder.emit_byte(TargetOp::Call, argc as u8);
        }
        let kind = kind_of(method.ret);
        if kind != ValueKind::Any {
            builder.emit_cast(kind);
        }
        builder.emit(TargetOp::Return);
        let chunk = builder.build_arc()?;
        if self.config.verify {
            crate::target::verify(&chunk)?;
        }
        trace!(target: "pytron::proxy", method = %method.name, bytes = chunk.len(), "forwarding chunk");
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::TranslateError;
    use crate::types::builtin::{INT, OBJECT, STR};
    use crate::types::Emission;

    fn sized(translator: &Translator) -> TypeId {
        let registry = translator.registry();
        let id = registry.register_class("Box", &[]).expect("registers");
        registry.add_method(id, FunctionSignature::new("size", vec![], INT, Emission::Runtime)).expect("adds");
        registry.add_method(id, FunctionSignature::new("label", vec![OBJECT], STR, Emission::Runtime)).expect("adds");
        id
    }

    fn sized_interface() -> InterfaceDescriptor {
        InterfaceDescriptor::new(
            "Sized",
            vec![
                FunctionSignature::new("size", vec![], INT, Emission::Virtual),
                FunctionSignature::new("label", vec![INT], STR, Emission::Virtual),
            ],
        )
    }

    #[test]
    fn test_proxy_forwards_each_method() {
        let translator = Translator::default();
        let target = sized(&translator);
        let proxy = translator.generate_interface_proxy(&sized_interface(), target).expect("proxy");
        assert_eq!(proxy.name.as_ref(), "Sized$proxy$Box");
        assert_eq!(proxy.methods.len(), 2);
        let (_, label) = &proxy.methods[1];
        assert_eq!(label.info().arg_count, 2);
        assert_eq!(label.read_opcode(0), Some(TargetOp::LoadLocal));
        assert!(label.disassemble().contains("cast str"));
        assert!(translator.registry().lookup_name("Sized").is_some());
    }

    #[test]
    fn test_proxies_are_deduplicated() {
        let translator = Translator::default();
        let target = sized(&translator);
        let first = translator.generate_interface_proxy(&sized_interface(), target).expect("proxy");
        let second = translator.generate_interface_proxy(&sized_interface(), target).expect("proxy");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(translator.cache().stats().hits, 1);
    }

    #[test]
    fn test_missing_method_is_rejected() {
        let translator = Translator::default();
        let target = translator.registry().register_class("Empty", &[]).expect("registers");
        let err = translator.generate_interface_proxy(&sized_interface(), target).expect_err("nothing to forward to");
        assert!(matches!(
            err,
            TranslateError::TypeResolution(TypeResolutionError::MissingMethod { ref method, .. }) if method.as_ref() == "size"
        ));
    }

    #[test]
    fn test_parameter_types_must_be_accepted() {
        let translator = Translator::default();
        let registry = translator.registry();
        let target = registry.register_class("Narrow", &[]).expect("registers");
        registry.add_method(target, FunctionSignature::new("size", vec![], INT, Emission::Runtime)).expect("adds");
        registry.add_method(target, FunctionSignature::new("label", vec![STR], STR, Emission::Runtime)).expect("adds");
        let err = translator.generate_interface_proxy(&sized_interface(), target).expect_err("int is not str");
        assert_eq!(err.category(), "type");
    }
}
