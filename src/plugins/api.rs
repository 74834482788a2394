//! The per-plugin core API
//!
//! Each plugin receives its own [`CoreApi`] during `init`. Every view inside
//! it is scoped: registrations and subscriptions are tagged with the plugin's
//! id (so teardown can sweep them), and the storage/dialog capabilities are
//! resolved once, against the manifest's permissions, when the API is built.
//! A plugin that never asked for `storage` holds a storage view that rejects
//! every call; there is no runtime permission check to forget.

use std::sync::Arc;

use semver::Version;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::core::{PluginManifest, PERM_DIALOGS, PERM_STORAGE};
use crate::events::{EventBus, SubscriptionHandle};
use crate::extensions::{ExtensionComponent, ExtensionOptions, ExtensionRegistry, ExtensionZone};
use crate::host::HostContext;
use crate::interop::{self, DependencyCheckResult, DispatchResult};
use crate::modules::{ModuleApi, ModuleRegistry};
use crate::services::{
    DeniedDialogs, DeniedStorage, DialogService, StorageError, StorageService,
};

/// Module registry view bound to one plugin
///
/// Registrations made here carry the plugin's id as owner.
#[derive(Clone)]
pub struct ScopedModules {
    registry: Arc<ModuleRegistry>,
    owner: String,
}

impl ScopedModules {
    pub fn register(&self, name: impl Into<String>, api: Arc<dyn ModuleApi>) {
        self.registry.register_owned(name, api, self.owner.clone());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleApi>> {
        self.registry.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }
}

/// Event bus view bound to one plugin
#[derive(Clone)]
pub struct ScopedEvents {
    bus: Arc<EventBus>,
    owner: String,
}

impl ScopedEvents {
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(self.owner.clone(), event_type, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    pub fn publish(&self, event_type: &str, payload: &Value) -> usize {
        self.bus.publish(event_type, payload)
    }
}

/// Extension registry view bound to one plugin
#[derive(Clone)]
pub struct ScopedExtensions {
    registry: Arc<ExtensionRegistry>,
    owner: String,
}

impl ScopedExtensions {
    pub fn register(
        &self,
        zone: ExtensionZone,
        component: Arc<dyn ExtensionComponent>,
        options: ExtensionOptions,
    ) -> Uuid {
        self.registry
            .register_extension(self.owner.clone(), zone, component, options)
    }

    /// Remove one of this plugin's own contributions
    pub fn remove(&self, id: Uuid) -> bool {
        self.registry.remove_extension(&self.owner, id)
    }
}

/// Storage view bound to one plugin's namespace
///
/// Backed by the host's storage service when the `storage` permission was
/// granted, and by [`DeniedStorage`] otherwise.
#[derive(Clone)]
pub struct ScopedStorage {
    service: Arc<dyn StorageService>,
    owner: String,
}

impl ScopedStorage {
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.service.get_item(&self.owner, key).await
    }

    /// Fetch a value, falling back to `default` when the key is absent
    pub async fn get_or(&self, key: &str, default: Value) -> Result<Value, StorageError> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.service.set_item(&self.owner, key, value).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.service.remove_item(&self.owner, key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.service.keys(&self.owner).await
    }
}

/// Dialog view bound to one plugin
#[derive(Clone)]
pub struct ScopedDialogs {
    service: Arc<dyn DialogService>,
    owner: String,
}

impl ScopedDialogs {
    /// Ask the user a yes/no question; `false` when declined or ungranted
    pub async fn confirm(&self, message: &str, title: &str) -> bool {
        self.service.confirm(message, title).await
    }

    pub async fn alert(&self, message: &str, title: &str) {
        self.service.alert(&self.owner, message, title).await;
    }
}

/// The capability surface handed to a plugin's `init`
///
/// Cheap to clone; plugins routinely move clones into event handlers and
/// background tasks.
#[derive(Clone)]
pub struct CoreApi {
    plugin_id: String,
    app_version: Version,
    modules: ScopedModules,
    events: ScopedEvents,
    extensions: ScopedExtensions,
    storage: ScopedStorage,
    dialogs: ScopedDialogs,
}

impl CoreApi {
    /// Id of the plugin this API is scoped to
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Version of the embedding host
    pub fn app_version(&self) -> &Version {
        &self.app_version
    }

    pub fn modules(&self) -> &ScopedModules {
        &self.modules
    }

    pub fn events(&self) -> &ScopedEvents {
        &self.events
    }

    pub fn extensions(&self) -> &ScopedExtensions {
        &self.extensions
    }

    pub fn storage(&self) -> &ScopedStorage {
        &self.storage
    }

    pub fn dialogs(&self) -> &ScopedDialogs {
        &self.dialogs
    }

    /// Invoke `method` on every registered module that implements it
    pub fn execute_across_modules(&self, method: &str, args: &[Value]) -> Vec<DispatchResult> {
        interop::execute_across_modules(Some(&self.modules.registry), method, args)
    }

    /// Check that the named modules are currently registered
    pub fn check_module_dependencies(&self, dependencies: &[String]) -> DependencyCheckResult {
        interop::check_module_dependencies(
            Some(&self.modules.registry),
            &self.plugin_id,
            Some(dependencies),
        )
    }
}

/// Builder assembling a [`CoreApi`] with capabilities resolved up front
///
/// The manager uses this during activation; hosts embedding plugins manually
/// (or tests) can use it directly.
pub struct CoreApiBuilder {
    plugin_id: String,
    app_version: Version,
    modules: Arc<ModuleRegistry>,
    events: Arc<EventBus>,
    extensions: Arc<ExtensionRegistry>,
    storage_granted: bool,
    dialogs_granted: bool,
    storage: Option<Arc<dyn StorageService>>,
    dialogs: Option<Arc<dyn DialogService>>,
}

impl CoreApiBuilder {
    pub fn new(host: &HostContext, manifest: &PluginManifest, app_version: Version) -> Self {
        Self {
            plugin_id: manifest.id.clone(),
            app_version,
            modules: host.modules(),
            events: host.events(),
            extensions: host.extensions(),
            storage_granted: manifest.has_permission(PERM_STORAGE),
            dialogs_granted: manifest.has_permission(PERM_DIALOGS),
            storage: None,
            dialogs: None,
        }
    }

    /// Storage backend to use when the `storage` permission was granted
    pub fn storage(mut self, service: Arc<dyn StorageService>) -> Self {
        self.storage = Some(service);
        self
    }

    /// Dialog service to use when the `dialogs` permission was granted
    pub fn dialogs(mut self, service: Arc<dyn DialogService>) -> Self {
        self.dialogs = Some(service);
        self
    }

    pub fn build(self) -> CoreApi {
        let storage: Arc<dyn StorageService> = match (self.storage_granted, self.storage) {
            (true, Some(service)) => service,
            (true, None) => {
                debug!(
                    "'{}' was granted storage but the host provides none",
                    self.plugin_id
                );
                Arc::new(DeniedStorage)
            }
            (false, _) => Arc::new(DeniedStorage),
        };

        let dialogs: Arc<dyn DialogService> = match (self.dialogs_granted, self.dialogs) {
            (true, Some(service)) => service,
            (true, None) => {
                debug!(
                    "'{}' was granted dialogs but the host provides none",
                    self.plugin_id
                );
                Arc::new(DeniedDialogs)
            }
            (false, _) => Arc::new(DeniedDialogs),
        };

        CoreApi {
            modules: ScopedModules {
                registry: self.modules,
                owner: self.plugin_id.clone(),
            },
            events: ScopedEvents {
                bus: self.events,
                owner: self.plugin_id.clone(),
            },
            extensions: ScopedExtensions {
                registry: self.extensions,
                owner: self.plugin_id.clone(),
            },
            storage: ScopedStorage {
                service: storage,
                owner: self.plugin_id.clone(),
            },
            dialogs: ScopedDialogs {
                service: dialogs,
                owner: self.plugin_id.clone(),
            },
            plugin_id: self.plugin_id,
            app_version: self.app_version,
        }
    }
}
