//! Action state machine.
//!
//! Every transition is a row of [`ACTION_TRANSITIONS`]: source states, target
//! state, guarding permission and a verbose label. [`check`] validates a
//! request against the table without touching the action; [`apply`] checks
//! and then mutates, returning the text of the audit comment to record.

use super::types::{Action, ActionState};
use crate::business_line::BusinessLineTree;
use crate::error::TransitionError;
use crate::incident::Incident;
use crate::permissions::{Permission, PermissionOracle, User};
use crate::types::{ActionId, BusinessLineId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Named transitions of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTransition {
    Assign,
    Block,
    Unblock,
    Close,
    ForceClose,
}

impl ActionTransition {
    pub const ALL: [ActionTransition; 5] = [
        ActionTransition::Assign,
        ActionTransition::Block,
        ActionTransition::Unblock,
        ActionTransition::Close,
        ActionTransition::ForceClose,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionTransition::Assign => "assign",
            ActionTransition::Block => "block",
            ActionTransition::Unblock => "unblock",
            ActionTransition::Close => "close",
            ActionTransition::ForceClose => "force_close",
        }
    }

    /// The table row describing this transition.
    pub fn edge(&self) -> &'static ActionEdge {
        let index = match self {
            ActionTransition::Assign => 0,
            ActionTransition::Block => 1,
            ActionTransition::Unblock => 2,
            ActionTransition::Close => 3,
            ActionTransition::ForceClose => 4,
        };
        &ACTION_TRANSITIONS[index]
    }
}

impl fmt::Display for ActionTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ActionTransition {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionTransition::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| TransitionError::not_found("transition", s))
    }
}

/// One row of the action transition table.
#[derive(Debug)]
pub struct ActionEdge {
    pub transition: ActionTransition,
    pub sources: &'static [ActionState],
    pub target: ActionState,
    pub permission: Permission,
    pub verbose: &'static str,
}

impl ActionEdge {
    pub fn accepts(&self, state: ActionState) -> bool {
        self.sources.contains(&state)
    }
}

pub const ACTION_TRANSITIONS: [ActionEdge; 5] = [
    ActionEdge {
        transition: ActionTransition::Assign,
        sources: &[ActionState::Created],
        target: ActionState::Assigned,
        permission: Permission::HandleIncidents,
        verbose: "Assign",
    },
    ActionEdge {
        transition: ActionTransition::Block,
        sources: &[ActionState::Assigned],
        target: ActionState::Blocked,
        permission: Permission::ViewIncidents,
        verbose: "Report block",
    },
    ActionEdge {
        transition: ActionTransition::Unblock,
        sources: &[ActionState::Blocked],
        target: ActionState::Assigned,
        permission: Permission::ViewIncidents,
        verbose: "Unblock",
    },
    ActionEdge {
        transition: ActionTransition::Close,
        sources: &[ActionState::Assigned, ActionState::Blocked],
        target: ActionState::Closed,
        permission: Permission::ViewIncidents,
        verbose: "Close",
    },
    ActionEdge {
        transition: ActionTransition::ForceClose,
        sources: &[ActionState::Created],
        target: ActionState::Closed,
        permission: Permission::HandleIncidents,
        verbose: "Force close",
    },
];

/// Optional inputs of a transition.
///
/// `business_line`, `subject` and `description` only apply to `assign`;
/// other transitions ignore them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionTransitionRequest {
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ActionTransitionRequest {
    pub fn with_comment(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::default()
        }
    }

    /// Reason text to append to the audit entry, if any.
    fn reason(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
    }
}

/// Everything a guard needs to know about the caller.
#[derive(Clone, Copy)]
pub struct GuardContext<'a> {
    pub actor: &'a User,
    pub oracle: &'a dyn PermissionOracle,
    pub business_lines: &'a BusinessLineTree,
}

impl<'a> GuardContext<'a> {
    pub fn new(
        actor: &'a User,
        oracle: &'a dyn PermissionOracle,
        business_lines: &'a BusinessLineTree,
    ) -> Self {
        Self {
            actor,
            oracle,
            business_lines,
        }
    }

    /// Whether the actor holds `permission` on `business_line` (or globally
    /// when no business line is given).
    pub fn allows(&self, permission: Permission, business_line: Option<BusinessLineId>) -> bool {
        let scope = business_line.and_then(|id| self.business_lines.get(id));
        self.oracle.allowed(self.actor, permission, scope)
    }

    pub fn require(
        &self,
        permission: Permission,
        business_line: Option<BusinessLineId>,
        entity: impl fmt::Display,
    ) -> Result<(), TransitionError> {
        if self.allows(permission, business_line) {
            Ok(())
        } else {
            Err(TransitionError::PermissionDenied {
                user: self.actor.username.clone(),
                permission: permission.to_string(),
                entity: entity.to_string(),
            })
        }
    }
}

/// Result of a committed action transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTransitionOutcome {
    pub action: ActionId,
    pub transition: ActionTransition,
    pub from: ActionState,
    pub to: ActionState,
    /// Text of the audit comment to record.
    pub audit: String,
    /// Business line newly linked to the parent incident by `assign`.
    pub linked_business_line: Option<BusinessLineId>,
}

/// Validate `transition` against the table and the guard, without mutating.
///
/// Checks run in order: source state, `assign` preconditions, permission.
pub fn check(
    action: &Action,
    transition: ActionTransition,
    request: &ActionTransitionRequest,
    ctx: &GuardContext<'_>,
) -> Result<&'static ActionEdge, TransitionError> {
    let edge = transition.edge();
    if !edge.accepts(action.state) {
        warn!(
            action_id = action.id.get(),
            transition = transition.name(),
            state = %action.state,
            "Rejected action transition from invalid state"
        );
        return Err(TransitionError::InvalidTransition {
            entity: "action",
            id: action.id.get(),
            transition: transition.name().to_string(),
            state: action.state.to_string(),
        });
    }

    let scope = if transition == ActionTransition::Assign {
        let business_line = request.business_line.or(action.business_line);
        let Some(business_line) = business_line else {
            return Err(TransitionError::validation(
                "business_line",
                "an action must have a business line before it can be assigned",
            ));
        };
        ctx.business_lines.require(business_line)?;
        Some(business_line)
    } else {
        action.business_line
    };

    ctx.require(edge.permission, scope, format!("action {}", action.id))
        .inspect_err(|_| {
            warn!(
                action_id = action.id.get(),
                transition = transition.name(),
                user = %ctx.actor,
                "Denied action transition"
            );
        })?;
    Ok(edge)
}

/// Check and perform `transition` on `action`.
///
/// `incident` must be the action's parent incident when it has one; `assign`
/// adds the action's business line to its concerned business lines. On error
/// neither argument is modified.
pub fn apply(
    action: &mut Action,
    incident: Option<&mut Incident>,
    transition: ActionTransition,
    request: &ActionTransitionRequest,
    ctx: &GuardContext<'_>,
) -> Result<ActionTransitionOutcome, TransitionError> {
    let edge = check(action, transition, request, ctx)?;
    let from = action.state;
    let mut linked_business_line = None;

    let summary = if transition == ActionTransition::Assign {
        if let Some(business_line) = request.business_line {
            action.business_line = Some(business_line);
        }
        if let Some(subject) = &request.subject {
            action.subject = subject.clone();
        }
        if let Some(description) = &request.description {
            action.description = description.clone();
        }
        if let (Some(business_line), Some(incident)) = (action.business_line, incident) {
            if incident.concern(business_line) {
                debug!(
                    incident_id = incident.id.get(),
                    business_line = business_line.get(),
                    "Linked business line to incident"
                );
                linked_business_line = Some(business_line);
            }
        }
        format!(
            "{} assigned this action to {}",
            ctx.actor,
            ctx.business_lines.name_of(action.business_line)
        )
    } else {
        format!("{} changed state to {}", ctx.actor, edge.target.label())
    };

    action.state = edge.target;

    let audit = match request.reason() {
        Some(reason) => format!("{summary}\n\n{reason}"),
        None => summary,
    };

    Ok(ActionTransitionOutcome {
        action: action.id,
        transition,
        from,
        to: edge.target,
        audit,
        linked_business_line,
    })
}

/// Transitions `actor` may currently take on `action`.
pub fn available(action: &Action, ctx: &GuardContext<'_>) -> Vec<&'static ActionEdge> {
    ACTION_TRANSITIONS
        .iter()
        .filter(|edge| edge.accepts(action.state))
        .filter(|edge| {
            let scope = action.business_line;
            if edge.transition == ActionTransition::Assign && scope.is_none() {
                // Assign becomes possible once a business line is chosen.
                return ctx.allows(edge.permission, None)
                    || ctx
                        .business_lines
                        .iter()
                        .any(|bl| ctx.allows(edge.permission, Some(bl.id)));
            }
            ctx.allows(edge.permission, scope)
        })
        .collect()
}
