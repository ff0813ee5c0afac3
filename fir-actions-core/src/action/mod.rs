//! Actions: remediation tasks assigned to business lines during an incident.

pub mod audit;
pub mod machine;
pub mod types;

pub use audit::ActionLog;
pub use machine::{
    ACTION_TRANSITIONS, ActionEdge, ActionTransition, ActionTransitionOutcome,
    ActionTransitionRequest, GuardContext,
};
pub use types::{Action, ActionComment, ActionState, ActionType, NewAction};
