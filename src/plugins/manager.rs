//! Plugin manager for validating, activating, and tearing down plugins
//!
//! The PluginManager owns the entire plugin lifecycle:
//! - Intake and validation of discovered candidates
//! - Sequential activation with a per-plugin failure boundary
//! - Lifecycle state tracking and announcements on the event bus
//! - Teardown, including the defensive sweep of leftover registrations
//!
//! A plugin failing to initialize is an expected, non-fatal condition: it is
//! marked failed, its traces are swept from the shared registries, and the
//! host keeps running with the remaining plugins.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use semver::Version;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::api::CoreApiBuilder;
use super::core::{
    Plugin, PluginCandidate, PluginError, PluginManifest, PluginResult, PluginState,
};
use crate::config::RuntimeSettings;
use crate::host::HostContext;
use crate::interop;
use crate::services::{DialogService, StorageService};

/// Event published after a plugin reaches `Active`
pub const EVENT_PLUGIN_ACTIVATED: &str = "plugin:activated";
/// Event published after a plugin is marked `Failed`
pub const EVENT_PLUGIN_FAILED: &str = "plugin:failed";
/// Event published after a plugin is disabled
pub const EVENT_PLUGIN_DISABLED: &str = "plugin:disabled";

/// Bookkeeping for one managed plugin
struct PluginRecord {
    manifest: PluginManifest,
    instance: Arc<dyn Plugin>,
    state: PluginState,
    last_error: Option<String>,
    activated_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one managed plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginSnapshot {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Plugin manager coordinating all plugin operations
pub struct PluginManager {
    /// Shared registries of the embedding application
    host: Arc<HostContext>,
    /// Storage backend granted to plugins with the `storage` permission
    storage: Arc<dyn StorageService>,
    /// Dialog service granted to plugins with the `dialogs` permission
    dialogs: Arc<dyn DialogService>,
    /// Host version used for compatibility gating
    app_version: Version,
    /// Runtime settings (activation timeout, announcements)
    settings: RuntimeSettings,
    /// Managed plugins by id
    records: RwLock<HashMap<String, PluginRecord>>,
    /// Plugin ids in registration order; activation and shutdown follow it
    order: RwLock<Vec<String>>,
}

impl PluginManager {
    /// Create a new plugin manager
    ///
    /// Fails only when `app_version` is not valid semver; everything else
    /// about plugins is handled per-plugin later.
    pub fn new(
        host: Arc<HostContext>,
        storage: Arc<dyn StorageService>,
        dialogs: Arc<dyn DialogService>,
        app_version: &str,
        settings: RuntimeSettings,
    ) -> PluginResult<Self> {
        let app_version =
            Version::parse(app_version).map_err(|e| PluginError::InvalidHostVersion {
                version: app_version.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            host,
            storage,
            dialogs,
            app_version,
            settings,
            records: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        })
    }

    /// Validate one discovered candidate and take it under management
    ///
    /// An accepted plugin enters the `Discovered` state. Plugin ids are
    /// unique for the lifetime of the manager: a disabled plugin's id stays
    /// reserved and cannot be re-registered.
    pub fn register_candidate(&self, candidate: PluginCandidate) -> PluginResult<()> {
        let accepted = candidate.validate(&self.app_version)?;
        let id = accepted.manifest.id.clone();

        let mut records = self.records.write().unwrap();
        if records.contains_key(&id) {
            warn!("Plugin id '{}' is already registered", id);
            return Err(PluginError::DuplicateId(id));
        }

        info!("Discovered plugin {}", accepted.manifest.display_name());
        records.insert(
            id.clone(),
            PluginRecord {
                manifest: accepted.manifest,
                instance: accepted.instance,
                state: PluginState::Discovered,
                last_error: None,
                activated_at: None,
            },
        );
        self.order.write().unwrap().push(id);
        Ok(())
    }

    /// Register a batch of candidates, skipping the ones that fail
    ///
    /// Rejections are logged by validation; the return value is how many
    /// candidates were accepted.
    pub fn register_candidates(
        &self,
        candidates: impl IntoIterator<Item = PluginCandidate>,
    ) -> usize {
        candidates
            .into_iter()
            .map(|candidate| self.register_candidate(candidate))
            .filter(Result::is_ok)
            .count()
    }

    /// Activate every discovered plugin, one at a time, in registration order
    ///
    /// A plugin that fails is marked `Failed` and the queue moves on; the
    /// return value is how many plugins reached `Active` during this call.
    pub async fn activate_all(&self) -> usize {
        let pending: Vec<String> = {
            let records = self.records.read().unwrap();
            let order = self.order.read().unwrap();
            order
                .iter()
                .filter(|id| {
                    records
                        .get(*id)
                        .map(|record| record.state == PluginState::Discovered)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        let mut activated = 0;
        for id in pending {
            match self.activate(&id).await {
                Ok(PluginState::Active) => activated += 1,
                Ok(_) => {}
                Err(e) => warn!("Skipping activation of '{}': {}", id, e),
            }
        }
        activated
    }

    /// Activate one discovered plugin
    ///
    /// Runs the plugin's `init` inside the activation failure boundary (error,
    /// panic, or timeout all mark the plugin `Failed` and sweep its partial
    /// registrations) and returns the state the plugin ended up in. A plugin
    /// deactivated while its `init` was still awaited stays `Disabled`: the
    /// late result is discarded, whatever it registered is swept, and no
    /// lifecycle event is announced for it.
    pub async fn activate(&self, id: &str) -> PluginResult<PluginState> {
        let (manifest, instance) = {
            let mut records = self.records.write().unwrap();
            let record = records
                .get_mut(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            if record.state != PluginState::Discovered {
                return Err(PluginError::InvalidTransition {
                    plugin: id.to_string(),
                    from: record.state,
                    to: PluginState::Initializing,
                });
            }
            record.state = PluginState::Initializing;
            (record.manifest.clone(), Arc::clone(&record.instance))
        };

        // Declared module dependencies are advisory: activation order often
        // means a required module appears a moment later.
        if !manifest.requires.is_empty() {
            let modules = self.host.modules();
            let check = interop::check_module_dependencies(
                Some(&modules),
                &manifest.id,
                Some(&manifest.requires),
            );
            if !check.success {
                warn!(
                    "Plugin '{}' declares unavailable modules: {:?}",
                    id, check.missing_dependencies
                );
            }
        }

        let core = CoreApiBuilder::new(&self.host, &manifest, self.app_version.clone())
            .storage(Arc::clone(&self.storage))
            .dialogs(Arc::clone(&self.dialogs))
            .build();

        info!("Activating plugin {}", manifest.display_name());
        let boundary = AssertUnwindSafe(instance.init(core)).catch_unwind();
        let init_result = match self.settings.activation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, boundary).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(anyhow::anyhow!(
                    "init did not complete within {}s",
                    limit.as_secs()
                ))),
            },
            None => boundary.await,
        };

        match init_result {
            Ok(Ok(())) => {
                let state = self.mark_active(id);
                if state == PluginState::Active {
                    info!("Plugin '{}' is active", id);
                    self.announce(EVENT_PLUGIN_ACTIVATED, id);
                } else {
                    self.discard_stale_init(id);
                }
                Ok(state)
            }
            Ok(Err(e)) => Ok(self.fail_activation(id, format!("{e:#}"))),
            Err(_) => Ok(self.fail_activation(id, "init panicked".to_string())),
        }
    }

    /// Promote a plugin from `Initializing` to `Active`
    ///
    /// Returns the state the record ended in. The promotion only applies
    /// while the record is still `Initializing`: a plugin deactivated while
    /// its `init` was awaited has already reached the terminal `Disabled`
    /// state and stays there.
    fn mark_active(&self, id: &str) -> PluginState {
        let mut records = self.records.write().unwrap();
        match records.get_mut(id) {
            Some(record) if record.state == PluginState::Initializing => {
                record.state = PluginState::Active;
                record.last_error = None;
                record.activated_at = Some(Utc::now());
                PluginState::Active
            }
            Some(record) => record.state,
            None => PluginState::Disabled,
        }
    }

    /// Record a failed activation
    ///
    /// Returns the state the record ended in. Like [`Self::mark_active`],
    /// the transition only applies while the record is still `Initializing`;
    /// a failure arriving after the plugin was deactivated is dropped.
    fn fail_activation(&self, id: &str, message: String) -> PluginState {
        let state = {
            let mut records = self.records.write().unwrap();
            match records.get_mut(id) {
                Some(record) if record.state == PluginState::Initializing => {
                    record.state = PluginState::Failed;
                    record.last_error = Some(message.clone());
                    PluginState::Failed
                }
                Some(record) => record.state,
                None => PluginState::Disabled,
            }
        };

        if state != PluginState::Failed {
            debug!("Dropping init failure of deactivated plugin '{}': {}", id, message);
            self.discard_stale_init(id);
            return state;
        }

        error!("Plugin '{}' failed to activate: {}", id, message);
        // init may have registered modules, subscriptions, or extensions
        // before failing; none of them may survive.
        self.sweep(id);
        self.announce(EVENT_PLUGIN_FAILED, id);
        state
    }

    /// Drop what an `init` left behind after its plugin was deactivated
    ///
    /// Deactivation swept the registries while `init` was still running, so
    /// anything registered after that sweep goes now. The record keeps the
    /// state deactivation put it in.
    fn discard_stale_init(&self, id: &str) {
        warn!(
            "Plugin '{}' was deactivated while init was running, discarding its registrations",
            id
        );
        self.sweep(id);
    }

    /// Disable a plugin
    ///
    /// An `Active` plugin gets its `cleanup` called first (errors and panics
    /// are logged and teardown continues). Every plugin then has its leftover
    /// registrations swept and ends in the terminal `Disabled` state.
    /// Disabling an already disabled plugin is a no-op.
    pub async fn deactivate(&self, id: &str) -> PluginResult<()> {
        let (state, instance) = {
            let records = self.records.read().unwrap();
            let record = records
                .get(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            (record.state, Arc::clone(&record.instance))
        };

        if state == PluginState::Disabled {
            debug!("Plugin '{}' is already disabled", id);
            return Ok(());
        }

        if state == PluginState::Active {
            match AssertUnwindSafe(instance.cleanup()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Plugin '{}' cleanup failed, continuing teardown: {e:#}", id)
                }
                Err(_) => error!("Plugin '{}' cleanup panicked, continuing teardown", id),
            }
        }

        self.sweep(id);
        {
            let mut records = self.records.write().unwrap();
            if let Some(record) = records.get_mut(id) {
                record.state = PluginState::Disabled;
            }
        }
        info!("Plugin '{}' disabled", id);
        self.announce(EVENT_PLUGIN_DISABLED, id);
        Ok(())
    }

    /// Disable every plugin in reverse registration order, then reset the bus
    ///
    /// Later plugins often depend on modules registered by earlier ones, so
    /// teardown unwinds the activation order.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let order = self.order.read().unwrap();
            order.iter().rev().cloned().collect()
        };

        info!("Shutting down {} plugin(s)", ids.len());
        for id in ids {
            if let Err(e) = self.deactivate(&id).await {
                warn!("Failed to deactivate '{}' during shutdown: {}", id, e);
            }
        }
        self.host.events().clear_subscriptions(None);
    }

    /// Remove everything a plugin registered in the shared registries
    ///
    /// Runs on every deactivation and activation failure, regardless of how
    /// tidy the plugin's own cleanup was.
    fn sweep(&self, id: &str) {
        let subscriptions = self.host.events().remove_owned_by(id);
        let extensions = self.host.extensions().remove_owned_by(id);
        let modules = self.host.modules().remove_owned_by(id);

        if subscriptions + extensions + modules > 0 {
            info!(
                "Swept leftovers of '{}': {} subscription(s), {} extension(s), {} module(s)",
                id, subscriptions, extensions, modules
            );
        } else {
            debug!("No leftover registrations for '{}'", id);
        }
    }

    fn announce(&self, event_type: &str, id: &str) {
        if self.settings.announce_lifecycle_events {
            self.host.events().publish(event_type, &json!({ "plugin": id }));
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current lifecycle state of a plugin, if it is managed
    pub fn state(&self, id: &str) -> Option<PluginState> {
        let records = self.records.read().unwrap();
        records.get(id).map(|record| record.state)
    }

    /// Most recent failure message recorded for a plugin
    pub fn last_error(&self, id: &str) -> Option<String> {
        let records = self.records.read().unwrap();
        records.get(id).and_then(|record| record.last_error.clone())
    }

    /// When a plugin most recently reached `Active`
    pub fn activated_at(&self, id: &str) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap();
        records.get(id).and_then(|record| record.activated_at)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state(id) == Some(PluginState::Active)
    }

    /// Snapshots of every managed plugin, in registration order
    pub fn list(&self) -> Vec<PluginSnapshot> {
        let records = self.records.read().unwrap();
        let order = self.order.read().unwrap();
        order
            .iter()
            .filter_map(|id| records.get(id))
            .map(|record| PluginSnapshot {
                id: record.manifest.id.clone(),
                name: record.manifest.name.clone(),
                version: record.manifest.version.clone(),
                state: record.state,
                last_error: record.last_error.clone(),
            })
            .collect()
    }

    /// How many managed plugins are currently in `state`
    pub fn count_in_state(&self, state: PluginState) -> usize {
        let records = self.records.read().unwrap();
        records.values().filter(|record| record.state == state).count()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn app_version(&self) -> &Version {
        &self.app_version
    }

    /// The host context this manager was built around
    pub fn host(&self) -> &HostContext {
        &self.host
    }
}
