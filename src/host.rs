//! Host context: the root object owning the shared runtime registries
//!
//! One `HostContext` per embedding application. Everything else (the plugin
//! manager, scoped plugin APIs, dispatch helpers) borrows from it, so two
//! contexts in one process are fully independent. There is no global state
//! anywhere in this crate.

use std::sync::Arc;

use crate::events::EventBus;
use crate::extensions::ExtensionRegistry;
use crate::modules::ModuleRegistry;

/// Owner tag used for registrations made by the host itself
///
/// Plugin-owned registrations carry the plugin's id instead, which is what
/// teardown sweeps key on.
pub const HOST_OWNER_ID: &str = "host";

/// Shared registries for one embedding application
#[derive(Default)]
pub struct HostContext {
    modules: Arc<ModuleRegistry>,
    events: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The module registry shared by host and plugins
    pub fn modules(&self) -> Arc<ModuleRegistry> {
        Arc::clone(&self.modules)
    }

    /// The event bus shared by host and plugins
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// The extension registry shared by host and plugins
    pub fn extensions(&self) -> Arc<ExtensionRegistry> {
        Arc::clone(&self.extensions)
    }
}
