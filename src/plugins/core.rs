//! Core plugin traits and types
//!
//! This module defines the manifest format, the lifecycle interface every
//! plugin implements, the validation gate candidates pass through before the
//! manager will manage them, and the lifecycle state machine.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::api::CoreApi;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Permission token granting access to the storage collaborator
pub const PERM_STORAGE: &str = "storage";

/// Permission token granting access to the dialog collaborator
pub const PERM_DIALOGS: &str = "dialogs";

/// Plugin-specific error types
#[derive(Debug, Error)]
pub enum PluginError {
    /// Candidate failed validation; `issues` itemizes every problem found
    #[error("Plugin '{plugin}' rejected: {}", .issues.join("; "))]
    Rejected { plugin: String, issues: Vec<String> },

    #[error("Plugin id '{0}' is already registered")]
    DuplicateId(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin '{plugin}' cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("Host version '{version}' is not valid semver: {reason}")]
    InvalidHostVersion { version: String, reason: String },
}

/// Lifecycle states owned by the plugin manager
///
/// Plugins never set their own state; the manager moves them through
/// `Discovered` → `Initializing` → `Active` or `Failed` → `Disabled`.
/// `Disabled` is terminal: a disabled plugin's id stays reserved and the
/// plugin cannot be reactivated within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Validated and registered, not yet activated
    Discovered,
    /// `init` is currently running
    Initializing,
    /// `init` completed successfully
    Active,
    /// `init` failed, timed out, or panicked
    Failed,
    /// Deactivated; terminal
    Disabled,
}

impl PluginState {
    /// Whether the state permits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, PluginState::Disabled)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Discovered => write!(f, "discovered"),
            PluginState::Initializing => write!(f, "initializing"),
            PluginState::Active => write!(f, "active"),
            PluginState::Failed => write!(f, "failed"),
            PluginState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Plugin metadata, typically parsed from a `plugin.json` manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin identifier, stable across versions
    pub id: String,
    /// Human-readable plugin name
    pub name: String,
    /// Plugin version (semantic versioning)
    pub version: String,
    /// Plugin description
    #[serde(default)]
    pub description: String,
    /// Plugin author information
    #[serde(default)]
    pub author: Option<String>,
    /// Minimum host version required
    #[serde(default)]
    pub min_app_version: Option<String>,
    /// Maximum host version supported
    #[serde(default)]
    pub max_app_version: Option<String>,
    /// Permission tokens the plugin requests ([`PERM_STORAGE`], [`PERM_DIALOGS`])
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Names of modules the plugin expects other components to provide
    #[serde(default)]
    pub requires: Vec<String>,
}

impl PluginManifest {
    /// Create a manifest with the minimal required fields
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: None,
            min_app_version: None,
            max_app_version: None,
            permissions: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_permission(mut self, token: impl Into<String>) -> Self {
        self.permissions.push(token.into());
        self
    }

    pub fn with_requirement(mut self, module: impl Into<String>) -> Self {
        self.requires.push(module.into());
        self
    }

    /// Whether the manifest requests a permission token
    pub fn has_permission(&self, token: &str) -> bool {
        self.permissions.iter().any(|granted| granted == token)
    }

    /// Get a display string for the plugin
    pub fn display_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Lifecycle interface every plugin implements
///
/// `init` receives the plugin's own capability-scoped [`CoreApi`]; everything
/// the plugin does to the host goes through it. Both calls run inside the
/// manager's failure boundary, so an error (or panic) here marks the plugin
/// failed without destabilizing the host.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once during activation
    async fn init(&self, core: CoreApi) -> anyhow::Result<()>;

    /// Called during deactivation of a plugin that reached `Active`
    ///
    /// Anything the plugin forgets to release here is removed by the
    /// manager's teardown sweep anyway.
    async fn cleanup(&self) -> anyhow::Result<()>;
}

/// A plugin as delivered by the host's discovery step, before validation
#[derive(Clone)]
pub struct PluginCandidate {
    pub manifest: PluginManifest,
    /// The plugin's entry point; absent when discovery found a manifest but
    /// could not construct the implementation
    pub instance: Option<Arc<dyn Plugin>>,
}

/// A candidate that passed validation
#[derive(Clone)]
pub struct AcceptedPlugin {
    pub manifest: PluginManifest,
    pub instance: Arc<dyn Plugin>,
}

impl PluginCandidate {
    pub fn new(manifest: PluginManifest, instance: Arc<dyn Plugin>) -> Self {
        Self {
            manifest,
            instance: Some(instance),
        }
    }

    /// A manifest-only candidate with no constructed entry point
    pub fn without_instance(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            instance: None,
        }
    }

    /// Validate the candidate against the host version
    ///
    /// Every problem is collected and logged before the candidate is
    /// rejected, so an author fixing a broken manifest sees all issues at
    /// once instead of one per attempt.
    pub fn validate(self, host_version: &Version) -> Result<AcceptedPlugin, PluginError> {
        let mut issues = Vec::new();

        if self.manifest.id.trim().is_empty() {
            issues.push("missing required field 'id'".to_string());
        }
        if self.manifest.name.trim().is_empty() {
            issues.push("missing required field 'name'".to_string());
        }
        if self.manifest.version.trim().is_empty() {
            issues.push("missing required field 'version'".to_string());
        } else if let Err(e) = Version::parse(&self.manifest.version) {
            issues.push(format!("version '{}' is not valid semver: {}", self.manifest.version, e));
        }

        if let Some(ref min) = self.manifest.min_app_version {
            match Version::parse(min) {
                Ok(min) if *host_version < min => {
                    issues.push(format!(
                        "requires host version >= {} (host is {})",
                        min, host_version
                    ));
                }
                Ok(_) => {}
                Err(e) => issues.push(format!("minAppVersion '{}' is not valid semver: {}", min, e)),
            }
        }
        if let Some(ref max) = self.manifest.max_app_version {
            match Version::parse(max) {
                Ok(max) if *host_version > max => {
                    issues.push(format!(
                        "supports host versions up to {} (host is {})",
                        max, host_version
                    ));
                }
                Ok(_) => {}
                Err(e) => issues.push(format!("maxAppVersion '{}' is not valid semver: {}", max, e)),
            }
        }

        if self.instance.is_none() {
            issues.push("no entry point: plugin implementation was not constructed".to_string());
        }

        if issues.is_empty() {
            // instance presence was checked above
            if let Some(instance) = self.instance {
                return Ok(AcceptedPlugin {
                    manifest: self.manifest,
                    instance,
                });
            }
        }

        let plugin = candidate_label(&self.manifest);
        for issue in &issues {
            warn!("Rejecting plugin '{}': {}", plugin, issue);
        }
        Err(PluginError::Rejected { plugin, issues })
    }
}

fn candidate_label(manifest: &PluginManifest) -> String {
    if !manifest.id.trim().is_empty() {
        manifest.id.clone()
    } else if !manifest.name.trim().is_empty() {
        manifest.name.clone()
    } else {
        "<unknown>".to_string()
    }
}
