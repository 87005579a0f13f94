//! The boundary between the VM and the embedding application.
//!
//! Everything the translated code cannot resolve on its own goes through a
//! [`Host`]: unknown globals, imports, printing and the objects standing in
//! for constants the translator could not represent. [`StdHost`] is the
//! default: it prints to stdout and serves modules registered up front.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::value::{HostObject, Instance, ModuleObject, Namespace, Value};

/// Services the VM requests from its embedder
pub trait Host: Send + Sync {
    /// A global that is neither in the module namespace nor a builtin
    fn resolve_global(&self, name: &str) -> Option<Value>;

    /// The module object for an import, `None` when it does not exist
    fn import_module(&self, name: &str, level: i64) -> Option<Value>;

    /// Write program output
    fn print(&self, text: &str);

    /// The object standing in for an opaque constant
    fn fallback_object(&self, description: &str) -> Option<Value>;

    /// Attribute of a host-owned object
    fn get_attr(&self, _object: &HostObject, _name: &str) -> Option<Value> {
        None
    }
}

/// Default host: stdout printing and a table of registered modules
#[derive(Default)]
pub struct StdHost {
    modules: DashMap<Arc<str>, Value>,
    globals: DashMap<Arc<str>, Value>,
    /// When set, output is collected here instead of written to stdout
    captured: Option<Mutex<String>>,
}

impl StdHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that records output instead of printing it
    pub fn capturing() -> Self {
        Self { captured: Some(Mutex::new(String::new())), ..Self::default() }
    }

    /// Register a module importable under `name`
    pub fn register_module(&self, name: &str, attrs: Vec<(&str, Value)>) -> Value {
        let namespace = Namespace::new();
        for (attr, value) in attrs {
            namespace.set(attr, value);
        }
        let module = Value::Module(Arc::new(ModuleObject { name: Arc::from(name), attrs: namespace }));
        self.modules.insert(Arc::from(name), module.clone());
        module
    }

    /// Make `name` resolvable as a global from every module
    pub fn define_global(&self, name: &str, value: Value) {
        self.globals.insert(Arc::from(name), value);
    }

    /// Output recorded so far; empty for a printing host
    pub fn output(&self) -> String {
        self.captured.as_ref().map(|buf| buf.lock().clone()).unwrap_or_default()
    }
}

impl Host for StdHost {
    fn resolve_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(|entry| entry.value().clone())
    }

    fn import_module(&self, name: &str, level: i64) -> Option<Value> {
        if level != 0 {
            warn!(target: "pytron::vm::call", module = name, level, "relative imports resolve by name only");
        }
        self.modules.get(name).map(|entry| entry.value().clone())
    }

    fn print(&self, text: &str) {
        match &self.captured {
            Some(buf) => buf.lock().push_str(text),
            None => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                // output errors are not the program's concern
                let _ = lock.write_all(text.as_bytes());
                let _ = lock.flush();
            }
        }
    }

    fn fallback_object(&self, _description: &str) -> Option<Value> {
        None
    }
}

/// Instances handed to the host, tracked weakly so handles can be resolved back
///
/// Dead entries are pruned lazily once the table grows past its threshold.
pub struct EscapedObjects {
    objects: DashMap<u64, Weak<Instance>>,
    next_handle: AtomicU64,
    prune_threshold: usize,
}

impl EscapedObjects {
    pub const DEFAULT_PRUNE_THRESHOLD: usize = 1024;

    pub fn new() -> Self {
        Self::with_threshold(Self::DEFAULT_PRUNE_THRESHOLD)
    }

    pub fn with_threshold(prune_threshold: usize) -> Self {
        Self { objects: DashMap::new(), next_handle: AtomicU64::new(1), prune_threshold: prune_threshold.max(1) }
    }

    /// Handle for `instance`, reusing the existing one when it already escaped
    pub fn register(&self, instance: &Arc<Instance>) -> u64 {
        let existing = self
            .objects
            .iter()
            .find(|entry| entry.value().upgrade().is_some_and(|live| Arc::ptr_eq(&live, instance)))
            .map(|entry| *entry.key());
        if let Some(handle) = existing {
            return handle;
        }
        if self.objects.len() >= self.prune_threshold {
            self.prune();
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(handle, Arc::downgrade(instance));
        handle
    }

    /// The instance behind `handle` if it is still alive
    pub fn get(&self, handle: u64) -> Option<Arc<Instance>> {
        self.objects.get(&handle).and_then(|entry| entry.value().upgrade())
    }

    /// Drop entries whose instance has been freed
    pub fn prune(&self) -> usize {
        let before = self.objects.len();
        self.objects.retain(|_, weak| weak.strong_count() > 0);
        let removed = before - self.objects.len();
        debug!(target: "pytron::vm::call", removed, remaining = self.objects.len(), "pruned escaped objects");
        removed
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for EscapedObjects {
    fn default() -> Self {
        Self::new()
    }
}
