//! The type registry: a DAG of `PyType` nodes.
//!
//! The registry is additive apart from `unregister`, which backs out a class
//! whose translation failed. A type's parent list never changes after
//! registration; adding a method or field replaces the type's `Arc` with an
//! updated copy so readers holding the old node are unaffected.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::builtin::{self, BUILTIN_TYPES, OBJECT};
use super::signature::{FunctionSignature, OverloadSet};
use super::{TypeId, TypeResolutionError};
use crate::target::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Builtin type that may be subclassed
    Builtin,
    /// Builtin value type (int, str, ...) that may not be subclassed
    BuiltinValue,
    User,
    Interface,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: Arc<str>,
    pub ty: TypeId,
    pub is_static: bool,
}

/// A node of the type lattice
#[derive(Debug, Clone)]
pub struct PyType {
    pub id: TypeId,
    pub name: Arc<str>,
    pub parents: Vec<TypeId>,
    pub methods: BTreeMap<Arc<str>, Vec<FunctionSignature>>,
    pub fields: BTreeMap<Arc<str>, FieldDescriptor>,
    pub constructor: Option<FunctionSignature>,
    pub kind: TypeKind,
}

impl PyType {
    fn new(id: TypeId, name: Arc<str>, parents: Vec<TypeId>, kind: TypeKind) -> Self {
        Self { id, name, parents, methods: BTreeMap::new(), fields: BTreeMap::new(), constructor: None, kind }
    }

    #[inline]
    pub fn is_subclassable(&self) -> bool {
        self.kind != TypeKind::BuiltinValue
    }

    /// Overloads declared directly on this type
    pub fn declared_methods(&self, name: &str) -> &[FunctionSignature] {
        self.methods.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Registry of every type known to a translation session
#[derive(Debug)]
pub struct TypeRegistry {
    types: RwLock<Vec<Arc<PyType>>>,
    by_name: RwLock<HashMap<Arc<str>, TypeId>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry seeded with the builtin types
    pub fn new() -> Self {
        let mut types = Vec::with_capacity(BUILTIN_TYPES.len() + 16);
        let mut by_name = HashMap::new();
        for &(id, name, parents, subclassable) in BUILTIN_TYPES {
            let kind = if subclassable { TypeKind::Builtin } else { TypeKind::BuiltinValue };
            let mut ty = PyType::new(id, Arc::from(name), parents.to_vec(), kind);
            for sig in builtin::builtin_methods(id) {
                ty.methods.entry(sig.name.clone()).or_default().push(sig);
            }
            by_name.insert(ty.name.clone(), id);
            types.push(Arc::new(ty));
        }
        Self { types: RwLock::new(types), by_name: RwLock::new(by_name) }
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    pub fn get(&self, id: TypeId) -> Option<Arc<PyType>> {
        self.types.read().get(id.index()).cloned()
    }

    pub fn name_of(&self, id: TypeId) -> Arc<str> {
        self.get(id).map_or_else(|| Arc::from(format!("#{}", id.0)), |ty| ty.name.clone())
    }

    pub fn lookup_name(&self, name: &str) -> Option<TypeId> {
        if let Some(&id) = self.by_name.read().get(name) {
            return Some(id);
        }
        builtin::builtin_by_name(name)
    }

    /// Resolve an annotation string to a type, `object` when unknown
    ///
    /// Generic arguments are dropped (`list[int]` is `list`).
    pub fn resolve_annotation(&self, annotation: &str) -> TypeId {
        let base = annotation.split('[').next().unwrap_or(annotation).trim();
        let base = base.strip_prefix("builtins.").unwrap_or(base);
        self.lookup_name(base).unwrap_or(OBJECT)
    }

    /// Register a user class
    pub fn register_class(&self, name: &str, bases: &[TypeId]) -> Result<TypeId, TypeResolutionError> {
        self.register(name, bases, TypeKind::User)
    }

    /// Register an interface type declaring the given methods
    pub fn register_interface(
        &self,
        name: &str,
        methods: Vec<FunctionSignature>,
    ) -> Result<TypeId, TypeResolutionError> {
        let id = self.register(name, &[], TypeKind::Interface)?;
        for sig in methods {
            self.add_method(id, sig)?;
        }
        Ok(id)
    }

    fn register(&self, name: &str, bases: &[TypeId], kind: TypeKind) -> Result<TypeId, TypeResolutionError> {
        let mut types = self.types.write();
        for &base in bases {
            let parent = types.get(base.index()).ok_or_else(|| TypeResolutionError::UnknownType(Arc::from(format!("#{}", base.0))))?;
            if !parent.is_subclassable() {
                return Err(TypeResolutionError::InvalidBase { class: Arc::from(name), base: parent.name.clone() });
            }
        }
        let parents = if bases.is_empty() { vec![OBJECT] } else { bases.to_vec() };
        let id = TypeId(types.len() as u32);
        let name: Arc<str> = Arc::from(name);
        types.push(Arc::new(PyType::new(id, name.clone(), parents, kind)));
        self.by_name.write().insert(name.clone(), id);
        debug!(target: "pytron::class", %name, id = id.0, "registered type");
        Ok(id)
    }

    /// Drop a type registered by a class translation that failed
    ///
    /// The name goes back to the most recent earlier type carrying it. The
    /// slot itself is reclaimed only when no later type was registered.
    pub fn unregister(&self, id: TypeId) {
        let mut types = self.types.write();
        let Some(ty) = types.get(id.index()).cloned() else {
            return;
        };
        if ty.kind != TypeKind::User && ty.kind != TypeKind::Interface {
            return;
        }
        let mut by_name = self.by_name.write();
        if by_name.get(&ty.name) == Some(&id) {
            by_name.remove(&ty.name);
            let earlier = types[..id.index()].iter().rev().find(|other| other.name == ty.name);
            if let Some(other) = earlier {
                by_name.insert(other.name.clone(), other.id);
            }
        }
        if id.index() + 1 == types.len() {
            types.pop();
        }
        debug!(target: "pytron::class", name = %ty.name, id = id.0, "unregistered type");
    }

    fn update<F>(&self, id: TypeId, f: F) -> Result<(), TypeResolutionError>
    where
        F: FnOnce(&mut PyType),
    {
        let mut types = self.types.write();
        let slot = types
            .get_mut(id.index())
            .ok_or_else(|| TypeResolutionError::UnknownType(Arc::from(format!("#{}", id.0))))?;
        let mut updated = PyType::clone(slot);
        f(&mut updated);
        *slot = Arc::new(updated);
        Ok(())
    }

    pub fn add_method(&self, id: TypeId, sig: FunctionSignature) -> Result<(), TypeResolutionError> {
        self.update(id, |ty| ty.methods.entry(sig.name.clone()).or_default().push(sig))
    }

    pub fn set_constructor(&self, id: TypeId, sig: FunctionSignature) -> Result<(), TypeResolutionError> {
        self.update(id, |ty| ty.constructor = Some(sig))
    }

    /// Declare an instance field, rejecting types incompatible with an inherited declaration
    pub fn add_instance_field(&self, id: TypeId, name: &str, ty: TypeId) -> Result<(), TypeResolutionError> {
        if let Some(existing) = self.field(id, name) {
            if !self.is_subclass(ty, existing.ty) {
                return Err(TypeResolutionError::IncompatibleField {
                    owner: self.name_of(id),
                    field: Arc::from(name),
                    existing: self.name_of(existing.ty),
                    new: self.name_of(ty),
                });
            }
        }
        let field = FieldDescriptor { name: Arc::from(name), ty, is_static: false };
        self.update(id, |owner| {
            owner.fields.insert(field.name.clone(), field);
        })
    }

    pub fn add_static_field(&self, id: TypeId, name: &str, ty: TypeId) -> Result<(), TypeResolutionError> {
        let field = FieldDescriptor { name: Arc::from(name), ty, is_static: true };
        self.update(id, |owner| {
            owner.fields.insert(field.name.clone(), field);
        })
    }

    /// Reachability over parent edges
    pub fn is_subclass(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        let types = self.types.read();
        is_subclass_in(&types, sub, sup)
    }

    /// The type followed by every ancestor, breadth first, each once
    pub fn assignable_types(&self, id: TypeId) -> Vec<TypeId> {
        let types = self.types.read();
        ancestors_in(&types, id)
    }

    /// Length of the longest parent chain to `object`
    pub fn depth(&self, id: TypeId) -> usize {
        let types = self.types.read();
        let mut memo = HashMap::new();
        depth_in(&types, id, &mut memo)
    }

    /// Join of two types: the deepest minimal common ancestor
    ///
    /// Ties are broken by the lowest id so the result does not depend on
    /// argument order.
    pub fn unify(&self, a: TypeId, b: TypeId) -> TypeId {
        if a == b {
            return a;
        }
        let types = self.types.read();
        if is_subclass_in(&types, a, b) {
            return b;
        }
        if is_subclass_in(&types, b, a) {
            return a;
        }
        let ours: HashSet<TypeId> = ancestors_in(&types, a).into_iter().collect();
        let common: Vec<TypeId> = ancestors_in(&types, b).into_iter().filter(|t| ours.contains(t)).collect();
        let minimal = common
            .iter()
            .copied()
            .filter(|&c| !common.iter().any(|&d| d != c && is_subclass_in(&types, d, c)));
        let mut memo = HashMap::new();
        minimal
            .map(|c| (depth_in(&types, c, &mut memo), c))
            .max_by(|(da, ca), (db, cb)| da.cmp(db).then(cb.cmp(ca)))
            .map_or(OBJECT, |(_, c)| c)
    }

    /// Every overload of `name` visible from `id`, most specific declaring type first
    pub fn lookup_method(&self, id: TypeId, name: &str) -> Option<OverloadSet> {
        let types = self.types.read();
        let overloads: Vec<_> = ancestors_in(&types, id)
            .into_iter()
            .filter_map(|t| types.get(t.index()))
            .flat_map(|ty| ty.declared_methods(name).iter().map(move |sig| (ty.id, sig.clone())))
            .collect();
        if overloads.is_empty() {
            None
        } else {
            Some(OverloadSet { name: Arc::from(name), owner: id, overloads })
        }
    }

    /// First declaration of a field along the ancestor walk
    pub fn field(&self, id: TypeId, name: &str) -> Option<FieldDescriptor> {
        let types = self.types.read();
        ancestors_in(&types, id)
            .into_iter()
            .filter_map(|t| types.get(t.index()))
            .find_map(|ty| ty.fields.get(name).cloned())
    }

    /// Verifier kind carried by values of a type
    pub fn kind_of(&self, id: TypeId) -> ValueKind {
        kind_of(id)
    }
}

/// Verifier kind of a type id
///
/// Value types cannot be subclassed, so an exact id match is complete.
pub fn kind_of(id: TypeId) -> ValueKind {
    match id {
        builtin::INT => ValueKind::Int,
        builtin::BOOL => ValueKind::Bool,
        builtin::FLOAT => ValueKind::Float,
        builtin::STR => ValueKind::Str,
        builtin::NONE => ValueKind::None,
        _ => ValueKind::Any,
    }
}

fn is_subclass_in(types: &[Arc<PyType>], sub: TypeId, sup: TypeId) -> bool {
    sub == sup || sup == OBJECT || ancestors_in(types, sub).contains(&sup)
}

fn ancestors_in(types: &[Arc<PyType>], id: TypeId) -> Vec<TypeId> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current);
        if let Some(ty) = types.get(current.index()) {
            queue.extend(ty.parents.iter().copied());
        }
    }
    if !seen.contains(&OBJECT) {
        order.push(OBJECT);
    }
    order
}

fn depth_in(types: &[Arc<PyType>], id: TypeId, memo: &mut HashMap<TypeId, usize>) -> usize {
    if let Some(&d) = memo.get(&id) {
        return d;
    }
    // Placeholder guards against a malformed cycle
    memo.insert(id, 0);
    let depth = types.get(id.index()).map_or(0, |ty| {
        ty.parents.iter().map(|&p| depth_in(types, p, memo) + 1).max().unwrap_or(0)
    });
    memo.insert(id, depth);
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin::{BOOL, EXCEPTION, INT, KEY_ERROR, LOOKUP_ERROR, STR, VALUE_ERROR, ZERO_DIVISION_ERROR};
    use crate::types::signature::Emission;

    #[test]
    fn test_builtin_hierarchy() {
        let registry = TypeRegistry::new();
        assert!(registry.is_subclass(BOOL, INT));
        assert!(!registry.is_subclass(INT, BOOL));
        assert!(registry.is_subclass(KEY_ERROR, EXCEPTION));
        assert!(registry.is_subclass(STR, OBJECT));
        assert_eq!(registry.depth(OBJECT), 0);
        assert_eq!(registry.depth(BOOL), 2);
    }

    #[test]
    fn test_unify_properties() {
        let registry = TypeRegistry::new();
        let pairs = [(BOOL, INT), (INT, STR), (KEY_ERROR, ZERO_DIVISION_ERROR), (KEY_ERROR, VALUE_ERROR), (INT, INT)];
        for (a, b) in pairs {
            let ab = registry.unify(a, b);
            assert_eq!(ab, registry.unify(b, a), "unify must commute for {} {}", a, b);
            assert!(registry.is_subclass(a, ab));
            assert!(registry.is_subclass(b, ab));
            assert_eq!(registry.unify(ab, ab), ab);
        }
        assert_eq!(registry.unify(BOOL, INT), INT);
        assert_eq!(registry.unify(INT, STR), OBJECT);
        assert_eq!(registry.unify(KEY_ERROR, ZERO_DIVISION_ERROR), EXCEPTION);
    }

    #[test]
    fn test_unify_diamond_prefers_deepest() {
        let registry = TypeRegistry::new();
        let base = registry.register_class("Base", &[]).expect("register");
        let mid = registry.register_class("Mid", &[base]).expect("register");
        let left = registry.register_class("Left", &[mid]).expect("register");
        let right = registry.register_class("Right", &[mid, LOOKUP_ERROR]).expect("register");
        assert_eq!(registry.unify(left, right), mid);
        assert_eq!(registry.unify(right, left), mid);
    }

    #[test]
    fn test_value_types_cannot_be_subclassed() {
        let registry = TypeRegistry::new();
        let err = registry.register_class("MyInt", &[INT]).unwrap_err();
        assert!(matches!(err, TypeResolutionError::InvalidBase { .. }));
        assert!(registry.register_class("MyError", &[EXCEPTION]).is_ok());
    }

    #[test]
    fn test_incompatible_field_is_rejected() {
        let registry = TypeRegistry::new();
        let parent = registry.register_class("Parent", &[]).expect("register");
        registry.add_instance_field(parent, "value", INT).expect("field");
        let child = registry.register_class("Child", &[parent]).expect("register");
        registry.add_instance_field(child, "value", BOOL).expect("narrowing to a subtype is fine");
        let err = registry.add_instance_field(child, "value", STR).unwrap_err();
        assert!(matches!(err, TypeResolutionError::IncompatibleField { ref field, .. } if field.as_ref() == "value"));
    }

    #[test]
    fn test_lookup_method_walks_ancestors() {
        let registry = TypeRegistry::new();
        let set = registry.lookup_method(BOOL, "__add__").expect("int declares __add__");
        assert_eq!(set.overloads[0].0, INT);
        let sig = set.resolve(&registry, &[BOOL]).expect("applicable");
        assert_eq!(sig.emission, Emission::Intrinsic(crate::target::Opcode::AddInt));
        assert!(registry.lookup_method(INT, "__frobnicate__").is_none());
    }

    #[test]
    fn test_copy_on_write_keeps_old_snapshot() {
        let registry = TypeRegistry::new();
        let class = registry.register_class("Point", &[]).expect("register");
        let before = registry.get(class).expect("registered");
        registry.add_instance_field(class, "x", INT).expect("field");
        assert!(before.fields.is_empty());
        assert_eq!(registry.field(class, "x").map(|f| f.ty), Some(INT));
    }

    #[test]
    fn test_unregister_restores_previous_binding() {
        let registry = TypeRegistry::new();
        let before = registry.len();
        let first = registry.register_class("Shape", &[]).expect("register");
        let second = registry.register_class("Shape", &[]).expect("register");
        assert_eq!(registry.lookup_name("Shape"), Some(second));

        registry.unregister(second);
        assert_eq!(registry.lookup_name("Shape"), Some(first));
        assert_eq!(registry.len(), before + 1);

        registry.unregister(first);
        assert_eq!(registry.lookup_name("Shape"), None);
        assert_eq!(registry.len(), before);

        registry.unregister(INT);
        assert_eq!(registry.lookup_name("int"), Some(INT));
        assert_eq!(registry.len(), before);
    }

    #[test]
    fn test_resolve_annotation() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.resolve_annotation("int"), INT);
        assert_eq!(registry.resolve_annotation("builtins.str"), STR);
        assert_eq!(registry.resolve_annotation("list[int]"), crate::types::builtin::LIST);
        assert_eq!(registry.resolve_annotation("Unknown"), OBJECT);
    }
}
