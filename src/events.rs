//! Event bus: decoupled publish/subscribe messaging
//!
//! Components announce things that happened (`"note:created"`,
//! `"calendar:event-updated"`) without knowing who is listening, and
//! subscribers react without knowing who published. Delivery is synchronous
//! and in registration order, and a failing handler never prevents the
//! handlers behind it from running.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Handler invoked for every published event of a subscribed type
pub type EventHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: Uuid,
    owner: String,
    handler: EventHandler,
}

/// Token returned by [`EventBus::subscribe`], used to cancel the subscription
///
/// Unsubscribing through a handle is idempotent: once the subscription is
/// gone, further calls return `false` and change nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: Uuid,
    event_type: String,
}

impl SubscriptionHandle {
    /// The event type this handle subscribes to
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// String-keyed publish/subscribe bus
///
/// Subscriber lists are created lazily on first subscribe and dropped again
/// when their last subscriber leaves, so the bus never accumulates empty
/// channels. Publishing snapshots the subscriber list first: handlers that
/// subscribe or unsubscribe mid-delivery affect the next publish, not the one
/// in flight.
#[derive(Default)]
pub struct EventBus {
    channels: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to every future publish of `event_type`
    ///
    /// The owner tag (a plugin id, or the host) is what teardown sweeps use to
    /// drop subscriptions a plugin left behind.
    pub fn subscribe<F>(
        &self,
        owner: impl Into<String>,
        event_type: impl Into<String>,
        handler: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let owner = owner.into();
        let event_type = event_type.into();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            handler: Arc::new(handler),
        };
        let handle = SubscriptionHandle {
            id: subscription.id,
            event_type: event_type.clone(),
        };

        let mut channels = self.channels.write().unwrap();
        channels.entry(event_type.clone()).or_default().push(subscription);
        debug!("'{}' subscribed to '{}'", owner, event_type);
        handle
    }

    /// Cancel a subscription
    ///
    /// Returns `false` when the subscription was already removed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut channels = self.channels.write().unwrap();
        let Some(subscriptions) = channels.get_mut(&handle.event_type) else {
            return false;
        };

        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != handle.id);
        let removed = subscriptions.len() < before;

        if subscriptions.is_empty() {
            channels.remove(&handle.event_type);
        }
        removed
    }

    /// Deliver `payload` to every subscriber of `event_type`, in registration
    /// order, returning how many handlers were invoked
    ///
    /// Each handler runs inside a failure boundary: an error or panic is
    /// logged against the owning subscriber and fan-out continues.
    pub fn publish(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot = {
            let channels = self.channels.read().unwrap();
            channels.get(event_type).cloned()
        };

        let Some(subscriptions) = snapshot else {
            debug!("No subscribers for '{}'", event_type);
            return 0;
        };

        for subscription in &subscriptions {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscription.handler)(payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        "Handler owned by '{}' failed for '{}': {:#}",
                        subscription.owner, event_type, e
                    );
                }
                Err(_) => {
                    error!(
                        "Handler owned by '{}' panicked for '{}'",
                        subscription.owner, event_type
                    );
                }
            }
        }
        subscriptions.len()
    }

    /// Drop every subscription for one event type, or for all of them
    ///
    /// A full reset belongs in process teardown; everyday cleanup should go
    /// through [`EventBus::unsubscribe`] or [`EventBus::remove_owned_by`].
    pub fn clear_subscriptions(&self, event_type: Option<&str>) {
        let mut channels = self.channels.write().unwrap();
        match event_type {
            Some(event_type) => {
                if channels.remove(event_type).is_some() {
                    debug!("Cleared subscriptions for '{}'", event_type);
                }
            }
            None => {
                let count: usize = channels.values().map(Vec::len).sum();
                channels.clear();
                if count > 0 {
                    warn!("Cleared all {} event subscriptions", count);
                }
            }
        }
    }

    /// Drop every subscription held by `owner`, returning how many were removed
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let mut channels = self.channels.write().unwrap();
        let mut removed = 0;
        channels.retain(|_, subscriptions| {
            let before = subscriptions.len();
            subscriptions.retain(|subscription| subscription.owner != owner);
            removed += before - subscriptions.len();
            !subscriptions.is_empty()
        });
        if removed > 0 {
            debug!("Removed {} subscription(s) owned by '{}'", removed, owner);
        }
        removed
    }

    /// How many subscribers `event_type` currently has
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        let channels = self.channels.read().unwrap();
        channels.get(event_type).map(Vec::len).unwrap_or(0)
    }

    /// Event types with at least one subscriber, sorted for determinism
    pub fn event_types(&self) -> Vec<String> {
        let channels = self.channels.read().unwrap();
        let mut types: Vec<String> = channels.keys().cloned().collect();
        types.sort();
        types
    }
}
