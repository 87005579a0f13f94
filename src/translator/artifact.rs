//! Translation outputs and the shared artifact cache.
//!
//! Every artifact carries a unique name reserved from the cache; a duplicate
//! base name gets a `$$n` suffix. A `$$` inside a base name is escaped to
//! `$_$` first, so only the suffix ever contains `$$`. Finished artifacts are kept in a bounded
//! LRU so repeated lookups by name stay cheap, and interface proxies are
//! deduplicated by their structural key.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::error::{EmissionError, TranslateResult};
use crate::runtime::Value;
use crate::source::Annotation;
use crate::target::BytecodeChunk;
use crate::types::TypeId;

/// A translated function: its verified chunk plus the shape needed to call it
#[derive(Debug, Clone)]
pub struct FunctionArtifact {
    /// Unique artifact name
    pub name: Arc<str>,
    pub chunk: Arc<BytecodeChunk>,
    /// Dataflow worklist iterations spent on this function
    pub iterations: usize,
}

impl FunctionArtifact {
    #[inline]
    pub fn qualname(&self) -> &str {
        &self.chunk.info().qualname
    }
}

/// How a method is bound when looked up on its class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Instance,
    Static,
    Class,
}

#[derive(Debug, Clone)]
pub struct MethodArtifact {
    pub name: Arc<str>,
    pub kind: MethodKind,
    pub function: Arc<FunctionArtifact>,
}

/// A translated class
#[derive(Debug, Clone)]
pub struct ClassArtifact {
    pub name: Arc<str>,
    pub qualified_name: Arc<str>,
    pub type_id: TypeId,
    pub bases: Vec<TypeId>,
    pub methods: Vec<MethodArtifact>,
    pub static_attributes: Vec<(Arc<str>, Value)>,
    pub annotations: Vec<Annotation>,
}

impl ClassArtifact {
    pub fn method(&self, name: &str) -> Option<&MethodArtifact> {
        self.methods.iter().find(|m| m.name.as_ref() == name)
    }
}

/// Forwarding helpers that let an instance of `target` stand in for `interface`
#[derive(Debug, Clone)]
pub struct ProxyArtifact {
    pub name: Arc<str>,
    pub interface: TypeId,
    pub target: TypeId,
    /// One forwarding chunk per interface method
    pub methods: Vec<(Arc<str>, Arc<BytecodeChunk>)>,
}

#[derive(Debug, Clone)]
pub enum Artifact {
    Function(Arc<FunctionArtifact>),
    Class(Arc<ClassArtifact>),
    Proxy(Arc<ProxyArtifact>),
}

impl Artifact {
    pub fn name(&self) -> &str {
        match self {
            Self::Function(f) => &f.name,
            Self::Class(c) => &c.name,
            Self::Proxy(p) => &p.name,
        }
    }
}

/// Artifacts of one translation unit, with the raw bytes the host loads
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    pub artifacts: Vec<Artifact>,
    /// Artifact name to chunk code; class annotations are stored as TOML
    pub side_table: BTreeMap<String, Vec<u8>>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_function(&mut self, function: Arc<FunctionArtifact>) {
        self.side_table.insert(function.name.to_string(), function.chunk.code().to_vec());
        self.artifacts.push(Artifact::Function(function));
    }

    pub fn push_class(&mut self, class: Arc<ClassArtifact>) -> TranslateResult<()> {
        if !class.annotations.is_empty() {
            let rendered = render_annotations(&class.annotations)?;
            self.side_table.insert(format!("{}.annotations", class.name), rendered.into_bytes());
        }
        self.artifacts.push(Artifact::Class(class));
        Ok(())
    }

    pub fn push_proxy(&mut self, proxy: Arc<ProxyArtifact>) {
        for (method, chunk) in &proxy.methods {
            self.side_table.insert(format!("{}.{}", proxy.name, method), chunk.code().to_vec());
        }
        self.artifacts.push(Artifact::Proxy(proxy));
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name() == name)
    }

    pub fn class(&self) -> Option<&Arc<ClassArtifact>> {
        self.artifacts.iter().find_map(|a| match a {
            Artifact::Class(c) => Some(c),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[derive(Serialize)]
struct AnnotationDocument<'a> {
    annotations: &'a [Annotation],
}

fn render_annotations(annotations: &[Annotation]) -> TranslateResult<String> {
    toml::to_string(&AnnotationDocument { annotations })
        .map_err(|e| EmissionError::Annotations(e.to_string()).into())
}

/// Structural identity of a proxy: the interface, the target and the methods forwarded
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    pub interface: TypeId,
    pub target: TypeId,
    pub methods: Vec<Arc<str>>,
}

/// Cache hit/miss counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Shared registry of artifact names and finished artifacts
pub struct ArtifactCache {
    counters: DashMap<String, AtomicUsize>,
    artifacts: Mutex<LruCache<String, Artifact>>,
    proxies: DashMap<ProxyKey, Arc<ProxyArtifact>>,
    stats: Mutex<ArtifactCacheStats>,
}

impl ArtifactCache {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            counters: DashMap::new(),
            artifacts: Mutex::new(LruCache::new(capacity)),
            proxies: DashMap::new(),
            stats: Mutex::new(ArtifactCacheStats::default()),
        }
    }

    /// Reserve a unique name for `base`: the first use keeps it, later ones get `$$n`
    pub fn reserve_name(&self, base: &str) -> String {
        let base = escape_suffix_marker(base);
        let n = self
            .counters
            .entry(base.clone())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if n == 1 {
            base
        } else {
            format!("{}$${}", base, n)
        }
    }

    pub fn insert(&self, artifact: Artifact) {
        self.artifacts.lock().put(artifact.name().to_string(), artifact);
    }

    pub fn get(&self, name: &str) -> Option<Artifact> {
        let found = self.artifacts.lock().get(name).cloned();
        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// The proxy for `key`, building it with `build` on first request
    pub fn proxy_or_insert_with<F>(&self, key: ProxyKey, build: F) -> TranslateResult<Arc<ProxyArtifact>>
    where
        F: FnOnce() -> TranslateResult<ProxyArtifact>,
    {
        if let Some(existing) = self.proxies.get(&key) {
            self.stats.lock().hits += 1;
            return Ok(existing.clone());
        }
        self.stats.lock().misses += 1;
        let built = Arc::new(build()?);
        // a racing builder may have won; keep whichever landed first
        let stored = self.proxies.entry(key).or_insert(built).clone();
        self.insert(Artifact::Proxy(stored.clone()));
        Ok(stored)
    }

    pub fn stats(&self) -> ArtifactCacheStats {
        let mut stats = *self.stats.lock();
        stats.entries = self.artifacts.lock().len();
        stats
    }

    pub fn clear(&self) {
        self.counters.clear();
        self.artifacts.lock().clear();
        self.proxies.clear();
        *self.stats.lock() = ArtifactCacheStats::default();
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Rewrite every `$$` as `$_$` until none is left
fn escape_suffix_marker(base: &str) -> String {
    let mut escaped = base.to_string();
    while escaped.contains("$$") {
        escaped = escaped.replace("$$", "$_$");
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::AnnotationMetadata;
    use rayon::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_reserve_name_suffixes_duplicates() {
        let cache = ArtifactCache::new(4);
        assert_eq!(cache.reserve_name("mod.f"), "mod.f");
        assert_eq!(cache.reserve_name("mod.f"), "mod.f$$2");
        assert_eq!(cache.reserve_name("mod.g"), "mod.g");
        assert_eq!(cache.reserve_name("mod.f"), "mod.f$$3");
    }

    #[test]
    fn test_base_name_cannot_forge_a_suffix() {
        let cache = ArtifactCache::new(4);
        assert_eq!(cache.reserve_name("f"), "f");
        assert_eq!(cache.reserve_name("f$$2"), "f$_$2");
        assert_eq!(cache.reserve_name("f"), "f$$2");
        assert_eq!(cache.reserve_name("f$_$2"), "f$_$2$$2");
        assert_eq!(cache.reserve_name("g$$$"), "g$_$_$");
    }

    #[test]
    fn test_reserve_name_is_unique_under_concurrency() {
        let cache = ArtifactCache::new(4);
        let names: Vec<String> = (0..64).into_par_iter().map(|_| cache.reserve_name("shared")).collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 64);
        assert!(names.contains(&"shared".to_string()));
        assert!(names.contains(&"shared$$64".to_string()));
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let cache = ArtifactCache::new(1);
        let chunk = BytecodeChunk::builder("f").build_arc().expect("empty chunk");
        for name in ["a", "b"] {
            cache.insert(Artifact::Function(Arc::new(FunctionArtifact {
                name: name.into(),
                chunk: chunk.clone(),
                iterations: 0,
            })));
        }
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_annotations_render_as_toml() {
        let mut values = BTreeMap::new();
        values.insert("retries".to_string(), AnnotationMetadata::Int(3));
        values.insert("target".to_string(), AnnotationMetadata::Type("int".into()));
        let annotations = vec![Annotation { name: "Config".into(), values }];
        let rendered = render_annotations(&annotations).expect("renders");
        assert!(rendered.contains("name = \"Config\""));
        assert!(rendered.contains("retries"));
    }
}
