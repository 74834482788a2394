//! Plugin architecture for Recado
//!
//! This module provides the runtime that lets third-party plugins extend the
//! organizer: manifest validation, a capability-scoped API surface, and a
//! lifecycle managed entirely by the host.
//!
//! # Lifecycle
//!
//! Discovered candidates are validated and registered, activated one at a
//! time, and eventually disabled. A plugin that fails to initialize is
//! quarantined (its partial registrations are swept) without affecting the
//! rest of the system.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use recado::config::RuntimeSettings;
//! use recado::host::HostContext;
//! use recado::plugins::{CoreApi, Plugin, PluginCandidate, PluginManager, PluginManifest};
//! use recado::services::{MemoryStorage, NullDialogs};
//!
//! struct HelloPlugin;
//!
//! #[async_trait::async_trait]
//! impl Plugin for HelloPlugin {
//!     async fn init(&self, core: CoreApi) -> anyhow::Result<()> {
//!         core.events().publish("hello:ready", &serde_json::json!({}));
//!         Ok(())
//!     }
//!
//!     async fn cleanup(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let host = Arc::new(HostContext::new());
//! let manager = PluginManager::new(
//!     Arc::clone(&host),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(NullDialogs),
//!     "1.0.0",
//!     RuntimeSettings::default(),
//! )?;
//!
//! let manifest = PluginManifest::new("hello", "Hello", "0.1.0");
//! manager.register_candidate(PluginCandidate::new(manifest, Arc::new(HelloPlugin)))?;
//! assert_eq!(manager.activate_all().await, 1);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod core;
pub mod manager;


// Re-export main types for convenience
pub use api::{
    CoreApi, CoreApiBuilder, ScopedDialogs, ScopedEvents, ScopedExtensions, ScopedModules,
    ScopedStorage,
};
pub use core::{
    AcceptedPlugin, Plugin, PluginCandidate, PluginError, PluginManifest, PluginResult,
    PluginState, PERM_DIALOGS, PERM_STORAGE,
};
pub use manager::{
    PluginManager, PluginSnapshot, EVENT_PLUGIN_ACTIVATED, EVENT_PLUGIN_DISABLED,
    EVENT_PLUGIN_FAILED,
};
