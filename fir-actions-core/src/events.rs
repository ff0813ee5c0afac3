//! Named-event publication for external pub-sub consumers.
//!
//! Events are delivered over a `tokio::sync::broadcast` channel. Publishing
//! never blocks and never fails: an unregistered name, a disabled bus or a
//! channel without receivers simply drops the event.

use crate::action::Action;
use crate::types::BusinessLineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

pub const ACTION_CREATED: &str = "action:created";
pub const ACTION_UPDATED: &str = "action:updated";

const DEFAULT_CAPACITY: usize = 256;

/// A published event: `(instance, business_line, extra)` plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub id: Uuid,
    pub name: String,
    pub action: Action,
    pub business_line: Option<BusinessLineId>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    pub published_at: DateTime<Utc>,
}

/// Registry of event names plus the broadcast channel they go out on.
#[derive(Debug)]
pub struct EventBus {
    enabled: bool,
    registered: BTreeMap<String, String>,
    tx: broadcast::Sender<ActionEvent>,
}

impl EventBus {
    /// A bus with `action:created` and `action:updated` registered.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let mut bus = Self {
            enabled: true,
            registered: BTreeMap::new(),
            tx,
        };
        bus.register(ACTION_CREATED, "Action created");
        bus.register(ACTION_UPDATED, "Action updated");
        bus
    }

    /// A bus that drops everything.
    pub fn disabled() -> Self {
        let mut bus = Self::new(1);
        bus.enabled = false;
        bus
    }

    pub fn register(&mut self, name: impl Into<String>, verbose_name: impl Into<String>) {
        self.registered.insert(name.into(), verbose_name.into());
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.contains_key(name)
    }

    /// Registered `(name, verbose name)` pairs.
    pub fn registered(&self) -> impl Iterator<Item = (&str, &str)> {
        self.registered
            .iter()
            .map(|(name, verbose)| (name.as_str(), verbose.as_str()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.tx.subscribe()
    }

    /// Publish `name` for `action`; returns the number of receivers reached.
    pub fn publish(&self, name: &str, action: &Action, extra: Option<serde_json::Value>) -> usize {
        if !self.enabled || !self.is_registered(name) || self.tx.receiver_count() == 0 {
            return 0;
        }
        let event = ActionEvent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            action: action.clone(),
            business_line: action.business_line,
            extra,
            published_at: Utc::now(),
        };
        let reached = self.tx.send(event).unwrap_or(0);
        debug!(event = name, action_id = action.id.get(), reached, "Published event");
        reached
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
