//! Module registry: a directory of named service APIs
//!
//! Modules are how independently-authored components expose functionality to
//! each other without direct coupling. A calendar component registers an API
//! under `"calendar"`, a task tracker under `"tasks"`, and either side can look
//! the other up by name at call time. The registry stores shared handles, never
//! the components themselves, and lookups of missing modules degrade to `None`
//! with a warning rather than an error.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Error produced when invoking a method on a module API
#[derive(Debug, Error)]
pub enum ModuleCallError {
    /// The module does not expose the requested method. Dispatch helpers treat
    /// this as "skip this module", not as a failure.
    #[error("method '{method}' is not implemented by this module")]
    Unsupported { method: String },

    /// The method ran and reported a failure
    #[error("{0}")]
    Failed(String),
}

/// A named service API that other components can discover and call
///
/// Implementations must be thread-safe: the registry hands the same instance
/// to every caller.
pub trait ModuleApi: Send + Sync {
    /// Names of the methods this module exposes, in declaration order
    fn method_names(&self) -> Vec<String>;

    /// Invoke a method by name with positional JSON arguments
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ModuleCallError>;

    /// Whether this module exposes `method`
    fn implements(&self, method: &str) -> bool {
        self.method_names().iter().any(|name| name == method)
    }
}

/// Callable stored inside a [`MethodMap`]
pub type ModuleMethod = Arc<dyn Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// A [`ModuleApi`] assembled from named closures
///
/// This is the convenient way for plugins to publish an API without writing a
/// dedicated type:
///
/// ```rust
/// use recado::modules::{MethodMap, ModuleApi};
/// use serde_json::json;
///
/// let api = MethodMap::new().with_method("ping", |_args| Ok(json!("pong")));
/// assert!(api.implements("ping"));
/// ```
#[derive(Default)]
pub struct MethodMap {
    methods: Vec<(String, ModuleMethod)>,
}

impl MethodMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method, replacing any earlier method of the same name in place
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        let method: ModuleMethod = Arc::new(method);
        match self.methods.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = method,
            None => self.methods.push((name, method)),
        }
        self
    }
}

impl ModuleApi for MethodMap {
    fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|(name, _)| name.clone()).collect()
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ModuleCallError> {
        let Some((_, callable)) = self.methods.iter().find(|(name, _)| name == method) else {
            return Err(ModuleCallError::Unsupported {
                method: method.to_string(),
            });
        };
        callable(args).map_err(|e| ModuleCallError::Failed(format!("{e:#}")))
    }
}

/// A registered module and its bookkeeping metadata
#[derive(Clone)]
pub struct ModuleEntry {
    /// Unique name the module was registered under
    pub name: String,
    /// Shared handle to the module's API
    pub api: Arc<dyn ModuleApi>,
    /// Owner that registered the module (a plugin id, or the host)
    pub registered_by: Option<String>,
    /// When the registration happened
    pub registered_at: DateTime<Utc>,
}

/// Registry of named module APIs
///
/// Names are unique; registering an existing name overwrites the earlier entry
/// in place (keeping its position in listing order) and logs a warning. All
/// lookup paths degrade gracefully instead of returning errors.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: RwLock<Vec<ModuleEntry>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module API under `name` with no recorded owner
    pub fn register(&self, name: impl Into<String>, api: Arc<dyn ModuleApi>) {
        self.insert(name.into(), api, None);
    }

    /// Register a module API on behalf of an owner (usually a plugin id)
    ///
    /// The owner tag is what teardown sweeps use to find registrations a
    /// plugin left behind.
    pub fn register_owned(
        &self,
        name: impl Into<String>,
        api: Arc<dyn ModuleApi>,
        owner: impl Into<String>,
    ) {
        self.insert(name.into(), api, Some(owner.into()));
    }

    fn insert(&self, name: String, api: Arc<dyn ModuleApi>, registered_by: Option<String>) {
        let entry = ModuleEntry {
            name: name.clone(),
            api,
            registered_by,
            registered_at: Utc::now(),
        };

        let mut entries = self.entries.write().unwrap();
        match entries.iter_mut().find(|existing| existing.name == name) {
            Some(existing) => {
                warn!("Module '{}' is already registered, overwriting", name);
                *existing = entry;
            }
            None => {
                debug!("Registering module '{}'", name);
                entries.push(entry);
            }
        }
    }

    /// Look up a module's API by name
    ///
    /// Returns `None` with a warning when the name is unknown, so callers can
    /// treat optional cross-module integrations as best-effort.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleApi>> {
        let entries = self.entries.read().unwrap();
        match entries.iter().find(|entry| entry.name == name) {
            Some(entry) => Some(Arc::clone(&entry.api)),
            None => {
                warn!("Module '{}' not found", name);
                None
            }
        }
    }

    /// Whether a module is registered under `name`
    pub fn has(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap();
        entries.iter().any(|entry| entry.name == name)
    }

    /// Remove a registration by name
    ///
    /// Returns `false` with a warning when the name is unknown.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.iter().position(|entry| entry.name == name) {
            Some(index) => {
                entries.remove(index);
                debug!("Unregistered module '{}'", name);
                true
            }
            None => {
                warn!("Cannot unregister module '{}': not registered", name);
                false
            }
        }
    }

    /// Registered module names, in registration order
    ///
    /// Overwriting a name keeps its original position.
    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Full entry for a registered module, including bookkeeping metadata
    pub fn entry(&self, name: &str) -> Option<ModuleEntry> {
        let entries = self.entries.read().unwrap();
        entries.iter().find(|entry| entry.name == name).cloned()
    }

    /// Snapshot of all entries in registration order
    ///
    /// Dispatch helpers iterate over this so that concurrent registration
    /// changes cannot perturb an in-flight fan-out.
    pub fn snapshot(&self) -> Vec<ModuleEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Remove every module registered by `owner`, returning how many were removed
    ///
    /// A name the owner registered but that was since overwritten by someone
    /// else carries the new owner's tag and is left alone.
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.registered_by.as_deref() != Some(owner));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Removed {} module(s) registered by '{}'", removed, owner);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}
