//! Lifecycle hooks fired after the engine commits a change.
//!
//! Hooks run synchronously once the store has been updated. They cannot veto
//! or fail the change they observe.

use crate::action::{ActionState, ActionTransition};
use crate::block::{BlockState, BlockTransition};
use crate::types::{ActionId, BlockId, EntityRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Events delivered to lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ActionTransition {
        action: ActionId,
        transition: ActionTransition,
        from: ActionState,
        to: ActionState,
        user: String,
    },
    BlockTransition {
        block: BlockId,
        transition: BlockTransition,
        from: BlockState,
        to: BlockState,
        user: String,
    },
    DoneCreating {
        entity: EntityRef,
    },
    DoneUpdating {
        entity: EntityRef,
    },
}

impl LifecycleEvent {
    pub fn event_name(&self) -> &str {
        match self {
            LifecycleEvent::ActionTransition { .. } => "action_transition",
            LifecycleEvent::BlockTransition { .. } => "block_transition",
            LifecycleEvent::DoneCreating { .. } => "done_creating",
            LifecycleEvent::DoneUpdating { .. } => "done_updating",
        }
    }
}

/// Observer of committed changes. Every method defaults to a no-op.
pub trait LifecycleHook: Send + Sync {
    fn on_action_transition(&self, _event: &LifecycleEvent) {}

    fn on_block_transition(&self, _event: &LifecycleEvent) {}

    fn done_creating(&self, _entity: EntityRef) {}

    fn done_updating(&self, _entity: EntityRef) {}
}

/// Logs every lifecycle event at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl LifecycleHook for TracingHook {
    fn on_action_transition(&self, event: &LifecycleEvent) {
        if let LifecycleEvent::ActionTransition {
            action,
            transition,
            to,
            user,
            ..
        } = event
        {
            info!(action_id = action.get(), %transition, state = %to, %user, "Action transitioned");
        }
    }

    fn on_block_transition(&self, event: &LifecycleEvent) {
        if let LifecycleEvent::BlockTransition {
            block,
            transition,
            to,
            user,
            ..
        } = event
        {
            info!(block_id = block.get(), %transition, state = %to, %user, "Block transitioned");
        }
    }

    fn done_creating(&self, entity: EntityRef) {
        info!(%entity, "Done creating");
    }

    fn done_updating(&self, entity: EntityRef) {
        info!(%entity, "Done updating");
    }
}

/// Ordered set of registered hooks.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Deliver `event` to every hook, in registration order.
    pub fn fire(&self, event: &LifecycleEvent) {
        for hook in &self.hooks {
            match event {
                LifecycleEvent::ActionTransition { .. } => hook.on_action_transition(event),
                LifecycleEvent::BlockTransition { .. } => hook.on_block_transition(event),
                LifecycleEvent::DoneCreating { entity } => hook.done_creating(*entity),
                LifecycleEvent::DoneUpdating { entity } => hook.done_updating(*entity),
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
