//! Extension registry: UI contribution points for plugins
//!
//! The host defines a fixed set of zones (day-cell overlays, detail panels,
//! sidebar panels, and so on). Plugins contribute components into zones, the
//! host's renderer queries a zone when it draws, and contributions come back
//! sorted by their requested order. The registry never renders anything
//! itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

/// Order assigned to contributions that do not request one
///
/// Mid-range, so plugins can deliberately sort before (`< 100`) or after
/// (`> 100`) the default block.
pub const DEFAULT_EXTENSION_ORDER: i32 = 100;

// ============================================================================
// Zones
// ============================================================================

/// Named UI injection points defined by the host
///
/// The set is fixed: plugins choose among these, they cannot invent zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionZone {
    /// Overlay inside each day cell of the calendar grid
    DayCellOverlay,
    /// Detail panel for the selected calendar event
    EventDetailPanel,
    /// Entries in the main navigation rail
    MainNavigation,
    /// Full page-level views
    PageView,
    /// Collapsible sidebar panels
    SidebarPanel,
    /// Segments of the status bar
    StatusBar,
}

impl ExtensionZone {
    /// Every zone the host knows about
    pub const ALL: [ExtensionZone; 6] = [
        ExtensionZone::DayCellOverlay,
        ExtensionZone::EventDetailPanel,
        ExtensionZone::MainNavigation,
        ExtensionZone::PageView,
        ExtensionZone::SidebarPanel,
        ExtensionZone::StatusBar,
    ];
}

impl fmt::Display for ExtensionZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtensionZone::DayCellOverlay => "day-cell-overlay",
            ExtensionZone::EventDetailPanel => "event-detail-panel",
            ExtensionZone::MainNavigation => "main-navigation",
            ExtensionZone::PageView => "page-view",
            ExtensionZone::SidebarPanel => "sidebar-panel",
            ExtensionZone::StatusBar => "status-bar",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Components
// ============================================================================

/// A renderer-agnostic description of UI to mount
///
/// The host's renderer interprets the `component` name; `props` and
/// `children` carry whatever that component needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub component: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            props: Map::new(),
            children: Vec::new(),
        }
    }

    /// Plain text node, rendered verbatim
    pub fn text(content: impl Into<String>) -> Self {
        Self::new("text").with_prop("content", Value::String(content.into()))
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: UiNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Context handed to a component when the renderer asks it to render
#[derive(Debug, Clone)]
pub struct ExtensionProps {
    /// Zone being rendered
    pub zone: ExtensionZone,
    /// Static props from registration merged with the renderer's context
    /// props; context wins on key collisions
    pub props: Map<String, Value>,
}

impl ExtensionProps {
    pub fn new(zone: ExtensionZone) -> Self {
        Self {
            zone,
            props: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }
}

/// A UI contribution a plugin can mount into a zone
pub trait ExtensionComponent: Send + Sync {
    fn render(&self, props: &ExtensionProps) -> UiNode;
}

/// Closure adapter for [`ExtensionComponent`]
pub struct FnComponent<F>
where
    F: Fn(&ExtensionProps) -> UiNode + Send + Sync,
{
    render: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&ExtensionProps) -> UiNode + Send + Sync,
{
    pub fn new(render: F) -> Self {
        Self { render }
    }
}

impl<F> ExtensionComponent for FnComponent<F>
where
    F: Fn(&ExtensionProps) -> UiNode + Send + Sync,
{
    fn render(&self, props: &ExtensionProps) -> UiNode {
        (self.render)(props)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Options accepted when registering an extension
#[derive(Clone, Default)]
pub struct ExtensionOptions {
    /// Sort position within the zone; lower renders first. Defaults to
    /// [`DEFAULT_EXTENSION_ORDER`].
    pub order: Option<i32>,
    /// Props baked in at registration time
    pub static_props: Map<String, Value>,
}

impl ExtensionOptions {
    pub fn order(order: i32) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }

    pub fn with_static_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.static_props.insert(key.into(), value.into());
        self
    }
}

/// A contribution as stored by the registry
#[derive(Clone)]
pub struct ExtensionRegistration {
    pub id: Uuid,
    pub owner: String,
    pub zone: ExtensionZone,
    pub component: Arc<dyn ExtensionComponent>,
    pub order: i32,
    /// Monotonic tiebreaker; equal orders keep registration sequence
    pub sequence: u64,
    pub static_props: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
}

/// A contribution as returned to the renderer by [`ExtensionRegistry::query`]
#[derive(Clone)]
pub struct QueriedExtension {
    pub id: Uuid,
    pub owner: String,
    pub component: Arc<dyn ExtensionComponent>,
    pub static_props: Map<String, Value>,
    pub order: i32,
}

impl QueriedExtension {
    /// Render this contribution, merging its static props with the renderer's
    /// context props (context wins on collisions)
    pub fn render(&self, zone: ExtensionZone, context: &Map<String, Value>) -> UiNode {
        let mut props = self.static_props.clone();
        for (key, value) in context {
            props.insert(key.clone(), value.clone());
        }
        self.component.render(&ExtensionProps { zone, props })
    }
}

/// Registry of UI contributions, keyed by zone
///
/// Contributions within a zone are kept sorted by `(order, sequence)`, so a
/// query is a cheap snapshot and ties render in registration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    zones: RwLock<HashMap<ExtensionZone, Vec<ExtensionRegistration>>>,
    sequence: AtomicU64,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component into a zone on behalf of an owner, returning the
    /// registration id used for removal
    pub fn register_extension(
        &self,
        owner: impl Into<String>,
        zone: ExtensionZone,
        component: Arc<dyn ExtensionComponent>,
        options: ExtensionOptions,
    ) -> Uuid {
        let owner = owner.into();
        let registration = ExtensionRegistration {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            zone,
            component,
            order: options.order.unwrap_or(DEFAULT_EXTENSION_ORDER),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            static_props: options.static_props,
            registered_at: Utc::now(),
        };
        let id = registration.id;

        let mut zones = self.zones.write().unwrap();
        let entries = zones.entry(zone).or_default();
        entries.push(registration);
        entries.sort_by_key(|entry| (entry.order, entry.sequence));

        debug!("'{}' registered extension {} in zone '{}'", owner, id, zone);
        id
    }

    /// Remove a contribution by id, enforcing that `owner` registered it
    ///
    /// Returns `false` when the id is unknown (removal is idempotent) or when
    /// the owner does not match (logged, nothing removed).
    pub fn remove_extension(&self, owner: &str, id: Uuid) -> bool {
        let mut zones = self.zones.write().unwrap();
        let located = zones.iter().find_map(|(zone, entries)| {
            entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| (*zone, index))
        });
        let Some((zone, index)) = located else {
            return false;
        };
        let Some(entries) = zones.get_mut(&zone) else {
            return false;
        };

        if entries[index].owner != owner {
            warn!(
                "'{}' cannot remove extension {} owned by '{}'",
                owner, id, entries[index].owner
            );
            return false;
        }

        entries.remove(index);
        if entries.is_empty() {
            zones.remove(&zone);
        }
        true
    }

    /// Contributions for a zone, sorted by `(order, sequence)`
    ///
    /// Pure query: call it as often as the renderer likes.
    pub fn query(&self, zone: ExtensionZone) -> Vec<QueriedExtension> {
        let zones = self.zones.read().unwrap();
        zones
            .get(&zone)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| QueriedExtension {
                        id: entry.id,
                        owner: entry.owner.clone(),
                        component: Arc::clone(&entry.component),
                        static_props: entry.static_props.clone(),
                        order: entry.order,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove every contribution registered by `owner`, across all zones
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut zones = self.zones.write().unwrap();
        let mut removed = 0;
        zones.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.owner != owner);
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            debug!("Removed {} extension(s) owned by '{}'", removed, owner);
        }
        removed
    }

    /// How many contributions a zone currently has
    pub fn count(&self, zone: ExtensionZone) -> usize {
        let zones = self.zones.read().unwrap();
        zones.get(&zone).map(Vec::len).unwrap_or(0)
    }

    /// Total contributions across all zones
    pub fn total(&self) -> usize {
        let zones = self.zones.read().unwrap();
        zones.values().map(Vec::len).sum()
    }
}
