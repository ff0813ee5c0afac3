//! Block state machine and its cascades into linked actions.
//!
//! A block transition is planned against working copies of the linked
//! actions and incidents. Every cascaded action step goes through the action
//! state machine with the same actor, so it is guarded exactly like a direct
//! call. The caller commits the returned [`BlockTransitionPlan`] only when
//! planning succeeded; a failing step leaves the store untouched.

use super::types::{Block, BlockLocation, BlockState};
use crate::action::machine::{self as action_machine, GuardContext};
use crate::action::{
    Action, ActionState, ActionTransition, ActionTransitionOutcome, ActionTransitionRequest,
    ActionType,
};
use crate::error::TransitionError;
use crate::incident::Incident;
use crate::permissions::Permission;
use crate::types::{ActionId, BlockId, IncidentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Named transitions of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTransition {
    Approve,
    Refuse,
    Enforce,
    Block,
    Unblock,
    ProposeDeletion,
    ApproveDeletion,
    RefuseDeletion,
    Remove,
    Propose,
}

impl BlockTransition {
    pub const ALL: [BlockTransition; 10] = [
        BlockTransition::Approve,
        BlockTransition::Refuse,
        BlockTransition::Enforce,
        BlockTransition::Block,
        BlockTransition::Unblock,
        BlockTransition::ProposeDeletion,
        BlockTransition::ApproveDeletion,
        BlockTransition::RefuseDeletion,
        BlockTransition::Remove,
        BlockTransition::Propose,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BlockTransition::Approve => "approve",
            BlockTransition::Refuse => "refuse",
            BlockTransition::Enforce => "enforce",
            BlockTransition::Block => "block",
            BlockTransition::Unblock => "unblock",
            BlockTransition::ProposeDeletion => "propose_deletion",
            BlockTransition::ApproveDeletion => "approve_deletion",
            BlockTransition::RefuseDeletion => "refuse_deletion",
            BlockTransition::Remove => "remove",
            BlockTransition::Propose => "propose",
        }
    }

    pub fn edge(&self) -> &'static BlockEdge {
        let index = match self {
            BlockTransition::Approve => 0,
            BlockTransition::Refuse => 1,
            BlockTransition::Enforce => 2,
            BlockTransition::Block => 3,
            BlockTransition::Unblock => 4,
            BlockTransition::ProposeDeletion => 5,
            BlockTransition::ApproveDeletion => 6,
            BlockTransition::RefuseDeletion => 7,
            BlockTransition::Remove => 8,
            BlockTransition::Propose => 9,
        };
        &BLOCK_TRANSITIONS[index]
    }
}

impl fmt::Display for BlockTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for BlockTransition {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockTransition::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| TransitionError::not_found("transition", s))
    }
}

/// Side effect of a block transition on its linked actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    None,
    /// Create and assign one countermeasure action per linked incident,
    /// subject "{verb} block B#id on location".
    Countermeasure { verb: &'static str },
    /// Close linked actions currently in one of `states`.
    CloseActions {
        states: &'static [ActionState],
        reason: &'static str,
    },
    /// Apply `transition` to linked actions currently in `from`, forwarding
    /// the block comment.
    Forward {
        transition: ActionTransition,
        from: ActionState,
    },
}

/// One row of the block transition table.
#[derive(Debug)]
pub struct BlockEdge {
    pub transition: BlockTransition,
    pub sources: &'static [BlockState],
    pub target: BlockState,
    pub permission: Permission,
    pub cascade: Cascade,
    pub verbose: &'static str,
}

impl BlockEdge {
    pub fn accepts(&self, state: BlockState) -> bool {
        self.sources.contains(&state)
    }
}

const OPEN_ACTION_STATES: &[ActionState] = &[
    ActionState::Created,
    ActionState::Assigned,
    ActionState::Blocked,
];

pub const BLOCK_TRANSITIONS: [BlockEdge; 10] = [
    BlockEdge {
        transition: BlockTransition::Approve,
        sources: &[BlockState::Proposed, BlockState::Refused, BlockState::Deleted],
        target: BlockState::Approved,
        permission: Permission::CanApproveBlock,
        cascade: Cascade::Countermeasure { verb: "Enforce" },
        verbose: "Approve",
    },
    BlockEdge {
        transition: BlockTransition::Refuse,
        sources: &[BlockState::Proposed, BlockState::Approved],
        target: BlockState::Refused,
        permission: Permission::CanApproveBlock,
        cascade: Cascade::CloseActions {
            states: OPEN_ACTION_STATES,
            reason: "refused",
        },
        verbose: "Refuse",
    },
    BlockEdge {
        transition: BlockTransition::Enforce,
        sources: &[BlockState::Approved, BlockState::Blocked],
        target: BlockState::Enforced,
        permission: Permission::CanEnforceBlock,
        cascade: Cascade::CloseActions {
            states: &[ActionState::Assigned, ActionState::Blocked],
            reason: "enforced",
        },
        verbose: "Enforce",
    },
    BlockEdge {
        transition: BlockTransition::Block,
        sources: &[BlockState::Approved],
        target: BlockState::Blocked,
        permission: Permission::CanEnforceBlock,
        cascade: Cascade::Forward {
            transition: ActionTransition::Block,
            from: ActionState::Assigned,
        },
        verbose: "Report block",
    },
    BlockEdge {
        transition: BlockTransition::Unblock,
        sources: &[BlockState::Blocked],
        target: BlockState::Approved,
        permission: Permission::CanApproveBlock,
        cascade: Cascade::Forward {
            transition: ActionTransition::Unblock,
            from: ActionState::Blocked,
        },
        verbose: "Unblock",
    },
    BlockEdge {
        transition: BlockTransition::ProposeDeletion,
        sources: &[BlockState::Enforced],
        target: BlockState::DeletionProposed,
        permission: Permission::HandleIncidents,
        cascade: Cascade::None,
        verbose: "Propose deletion",
    },
    BlockEdge {
        transition: BlockTransition::ApproveDeletion,
        sources: &[BlockState::Enforced, BlockState::DeletionProposed],
        target: BlockState::DeletionApproved,
        permission: Permission::CanApproveBlock,
        cascade: Cascade::Countermeasure { verb: "Remove" },
        verbose: "Approve deletion",
    },
    BlockEdge {
        transition: BlockTransition::RefuseDeletion,
        sources: &[BlockState::DeletionProposed],
        target: BlockState::Enforced,
        permission: Permission::CanApproveBlock,
        cascade: Cascade::None,
        verbose: "Refuse deletion",
    },
    BlockEdge {
        transition: BlockTransition::Remove,
        sources: &[BlockState::DeletionApproved],
        target: BlockState::Deleted,
        permission: Permission::CanEnforceBlock,
        cascade: Cascade::CloseActions {
            states: OPEN_ACTION_STATES,
            reason: "removed",
        },
        verbose: "Delete",
    },
    BlockEdge {
        transition: BlockTransition::Propose,
        sources: &[BlockState::Deleted],
        target: BlockState::Proposed,
        permission: Permission::ViewIncidents,
        cascade: Cascade::None,
        verbose: "Propose",
    },
];

/// Working copies of the entities a cascade may touch.
#[derive(Debug, Clone, Default)]
pub struct CascadeScene {
    /// Actions currently linked to the block.
    pub actions: BTreeMap<ActionId, Action>,
    /// Incidents currently linked to the block.
    pub incidents: BTreeMap<IncidentId, Incident>,
}

/// Everything a block transition changes, ready to be committed.
#[derive(Debug, Clone)]
pub struct BlockTransitionPlan {
    pub block: BlockId,
    pub transition: BlockTransition,
    pub from: BlockState,
    pub to: BlockState,
    /// Countermeasure actions created by the cascade, already assigned.
    pub created: Vec<Action>,
    /// Linked actions whose state changed.
    pub updated: Vec<Action>,
    /// Incidents whose concerned business lines changed.
    pub incidents: Vec<Incident>,
    /// One outcome per cascaded action transition, in execution order.
    pub action_outcomes: Vec<ActionTransitionOutcome>,
}

/// Validate a block transition against the table and the guard.
pub fn check(
    block: &Block,
    location: &BlockLocation,
    transition: BlockTransition,
    ctx: &GuardContext<'_>,
) -> Result<&'static BlockEdge, TransitionError> {
    let edge = transition.edge();
    if !edge.accepts(block.state) {
        warn!(
            block_id = block.id.get(),
            transition = transition.name(),
            state = %block.state,
            "Rejected block transition from invalid state"
        );
        return Err(TransitionError::InvalidTransition {
            entity: "block",
            id: block.id.get(),
            transition: transition.name().to_string(),
            state: block.state.to_string(),
        });
    }
    ctx.require(
        edge.permission,
        location.business_line,
        format!("block {} at {}", block.id, location.name),
    )?;
    Ok(edge)
}

/// Plan `transition` on `block`, including its cascade.
///
/// `next_action_id` hands out ids for countermeasure actions. Nothing
/// outside the returned plan is modified.
pub fn plan(
    block: &Block,
    location: &BlockLocation,
    transition: BlockTransition,
    comment: Option<&str>,
    ctx: &GuardContext<'_>,
    mut scene: CascadeScene,
    next_action_id: &mut dyn FnMut() -> ActionId,
    now: DateTime<Utc>,
) -> Result<BlockTransitionPlan, TransitionError> {
    let edge = check(block, location, transition, ctx)?;

    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut touched_incidents = Vec::new();
    let mut action_outcomes = Vec::new();

    match edge.cascade {
        Cascade::None => {}
        Cascade::Countermeasure { verb } => {
            // Spans every linked incident, visible to the actor or not.
            for incident_id in &block.incidents {
                let Some(incident) = scene.incidents.get_mut(incident_id) else {
                    return Err(TransitionError::not_found("incident", incident_id));
                };
                let mut action = Action {
                    id: next_action_id(),
                    action_type: ActionType::Countermeasure,
                    subject: format!("{verb} block {} on {}", block.id, location.name),
                    description: block.comment.clone().unwrap_or_default(),
                    state: ActionState::Created,
                    auto_state: true,
                    opened_by: ctx.actor.username.clone(),
                    opened_on: now,
                    business_line: location.business_line,
                    incident: Some(*incident_id),
                };
                let outcome = action_machine::apply(
                    &mut action,
                    Some(incident),
                    ActionTransition::Assign,
                    &ActionTransitionRequest::default(),
                    ctx,
                )?;
                if outcome.linked_business_line.is_some() {
                    touched_incidents.push(*incident_id);
                }
                debug!(
                    block_id = block.id.get(),
                    incident_id = incident_id.get(),
                    subject = %action.subject,
                    "Planned countermeasure action"
                );
                action_outcomes.push(outcome);
                created.push(action);
            }
        }
        Cascade::CloseActions { states, reason } => {
            let request =
                ActionTransitionRequest::with_comment(format!("Block {} {reason}.", block.id));
            for action in scene.actions.values_mut() {
                if !states.contains(&action.state) {
                    continue;
                }
                let closing = if action.state == ActionState::Created {
                    ActionTransition::ForceClose
                } else {
                    ActionTransition::Close
                };
                let outcome = action_machine::apply(action, None, closing, &request, ctx)?;
                action_outcomes.push(outcome);
                updated.push(action.clone());
            }
        }
        Cascade::Forward { transition, from } => {
            let request = ActionTransitionRequest {
                comment: comment.map(str::to_string),
                ..ActionTransitionRequest::default()
            };
            for action in scene.actions.values_mut() {
                if action.state != from {
                    continue;
                }
                let outcome = action_machine::apply(action, None, transition, &request, ctx)?;
                action_outcomes.push(outcome);
                updated.push(action.clone());
            }
        }
    }

    touched_incidents.sort();
    touched_incidents.dedup();
    let incidents = touched_incidents
        .into_iter()
        .filter_map(|id| scene.incidents.remove(&id))
        .collect();

    Ok(BlockTransitionPlan {
        block: block.id,
        transition,
        from: block.state,
        to: edge.target,
        created,
        updated,
        incidents,
        action_outcomes,
    })
}

/// Transitions `actor` may currently take on `block`.
pub fn available(
    block: &Block,
    location: &BlockLocation,
    ctx: &GuardContext<'_>,
) -> Vec<&'static BlockEdge> {
    BLOCK_TRANSITIONS
        .iter()
        .filter(|edge| edge.accepts(block.state))
        .filter(|edge| ctx.allows(edge.permission, location.business_line))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business_line::BusinessLineTree;
    use crate::permissions::{Grant, TreeAuthorization, User};
    use crate::types::{BlockLocationId, BlockTypeId, BusinessLineId};
    use std::collections::BTreeSet;

    struct World {
        tree: BusinessLineTree,
        bl: BusinessLineId,
        location: BlockLocation,
        approver: User,
    }

    fn world() -> World {
        let mut tree = BusinessLineTree::new();
        let bl = tree.add("Network", None).unwrap();
        let location = BlockLocation {
            id: BlockLocationId(1),
            name: "Edge firewall".into(),
            business_line: Some(bl),
            types: BTreeSet::from([BlockTypeId(1)]),
        };
        let approver = User::new("alice")
            .with_grant(Grant::on(Permission::CanApproveBlock, bl))
            .with_grant(Grant::on(Permission::CanEnforceBlock, bl))
            .with_grant(Grant::on(Permission::HandleIncidents, bl))
            .with_grant(Grant::on(Permission::ViewIncidents, bl));
        World {
            tree,
            bl,
            location,
            approver,
        }
    }

    fn block(state: BlockState) -> Block {
        Block {
            id: BlockId(7),
            location: BlockLocationId(1),
            block_type: BlockTypeId(1),
            what: "203.0.113.9".into(),
            comment: Some("C2 server".into()),
            state,
            incidents: BTreeSet::new(),
            actions: BTreeSet::new(),
            created_on: Utc::now(),
        }
    }

    fn incident(id: u64) -> Incident {
        Incident {
            id: IncidentId(id),
            subject: format!("Incident {id}"),
            description: String::new(),
            category: None,
            detection: None,
            plan: None,
            concerned_business_lines: BTreeSet::new(),
            opened_by: "alice".into(),
            opened_on: Utc::now(),
        }
    }

    fn linked_action(id: u64, state: ActionState, bl: BusinessLineId) -> Action {
        Action {
            id: ActionId(id),
            action_type: ActionType::Countermeasure,
            subject: format!("Action {id}"),
            description: String::new(),
            state,
            auto_state: true,
            opened_by: "alice".into(),
            opened_on: Utc::now(),
            business_line: Some(bl),
            incident: Some(IncidentId(1)),
        }
    }

    fn sequence(start: u64) -> impl FnMut() -> ActionId {
        let mut next = start;
        move || {
            next += 1;
            ActionId(next)
        }
    }

    #[test]
    fn test_table_covers_every_transition_once() {
        assert_eq!(BLOCK_TRANSITIONS.len(), BlockTransition::ALL.len());
        for transition in BlockTransition::ALL {
            assert_eq!(transition.edge().transition, transition);
            assert_eq!(
                transition.name().parse::<BlockTransition>().unwrap(),
                transition
            );
        }
    }

    #[test]
    fn test_approve_creates_assigned_countermeasure_per_incident() {
        let w = world();
        let ctx = GuardContext::new(&w.approver, &TreeAuthorization, &w.tree);
        let mut blk = block(BlockState::Proposed);
        blk.incidents = BTreeSet::from([IncidentId(1), IncidentId(2)]);
        let scene = CascadeScene {
            actions: BTreeMap::new(),
            incidents: BTreeMap::from([(IncidentId(1), incident(1)), (IncidentId(2), incident(2))]),
        };

        let mut ids = sequence(10);
        let plan = plan(
            &blk,
            &w.location,
            BlockTransition::Approve,
            None,
            &ctx,
            scene,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.to, BlockState::Approved);
        assert_eq!(plan.created.len(), 2);
        for action in &plan.created {
            assert!(action.auto_state);
            assert_eq!(action.state, ActionState::Assigned);
            assert_eq!(action.action_type, ActionType::Countermeasure);
            assert_eq!(action.subject, "Enforce block B#7 on Edge firewall");
            assert_eq!(action.description, "C2 server");
            assert_eq!(action.business_line, Some(w.bl));
        }
        assert_eq!(plan.created[0].id, ActionId(11));
        assert_eq!(plan.incidents.len(), 2);
        assert!(plan.incidents.iter().all(|inc| inc.concerns(w.bl)));
    }

    #[test]
    fn test_approve_from_enforced_is_invalid() {
        let w = world();
        let ctx = GuardContext::new(&w.approver, &TreeAuthorization, &w.tree);
        let err = check(&block(BlockState::Enforced), &w.location, BlockTransition::Approve, &ctx)
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_refuse_closes_only_open_actions() {
        let w = world();
        let ctx = GuardContext::new(&w.approver, &TreeAuthorization, &w.tree);
        let scene = CascadeScene {
            actions: BTreeMap::from([
                (ActionId(1), linked_action(1, ActionState::Assigned, w.bl)),
                (ActionId(2), linked_action(2, ActionState::Blocked, w.bl)),
                (ActionId(3), linked_action(3, ActionState::Closed, w.bl)),
            ]),
            incidents: BTreeMap::new(),
        };

        let mut ids = sequence(0);
        let plan = plan(
            &block(BlockState::Approved),
            &w.location,
            BlockTransition::Refuse,
            None,
            &ctx,
            scene,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        let closed: Vec<_> = plan.updated.iter().map(|a| a.id).collect();
        assert_eq!(closed, vec![ActionId(1), ActionId(2)]);
        assert!(plan.updated.iter().all(|a| a.state == ActionState::Closed));
        assert!(plan.action_outcomes[0].audit.ends_with("Block B#7 refused."));
    }

    #[test]
    fn test_block_forwards_comment_to_assigned_actions() {
        let w = world();
        let ctx = GuardContext::new(&w.approver, &TreeAuthorization, &w.tree);
        let scene = CascadeScene {
            actions: BTreeMap::from([
                (ActionId(1), linked_action(1, ActionState::Assigned, w.bl)),
                (ActionId(2), linked_action(2, ActionState::Closed, w.bl)),
            ]),
            incidents: BTreeMap::new(),
        };

        let mut ids = sequence(0);
        let plan = plan(
            &block(BlockState::Approved),
            &w.location,
            BlockTransition::Block,
            Some("rule conflicts with VPN range"),
            &ctx,
            scene,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.updated.len(), 1);
        assert_eq!(plan.updated[0].state, ActionState::Blocked);
        assert_eq!(
            plan.action_outcomes[0].audit,
            "alice changed state to Blocked\n\nrule conflicts with VPN range"
        );
    }

    #[test]
    fn test_cascade_step_denial_aborts_plan() {
        let w = world();
        // May approve blocks but cannot handle incidents: the assign step fails.
        let approver_only =
            User::new("carol").with_grant(Grant::on(Permission::CanApproveBlock, w.bl));
        let ctx = GuardContext::new(&approver_only, &TreeAuthorization, &w.tree);
        let mut blk = block(BlockState::Proposed);
        blk.incidents = BTreeSet::from([IncidentId(1)]);
        let scene = CascadeScene {
            actions: BTreeMap::new(),
            incidents: BTreeMap::from([(IncidentId(1), incident(1))]),
        };

        let mut ids = sequence(0);
        let err = plan(
            &blk,
            &w.location,
            BlockTransition::Approve,
            None,
            &ctx,
            scene,
            &mut ids,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::PermissionDenied { .. }));
    }

    #[test]
    fn test_available_transitions_for_enforced_block() {
        let w = world();
        let ctx = GuardContext::new(&w.approver, &TreeAuthorization, &w.tree);
        let labels: Vec<_> = available(&block(BlockState::Enforced), &w.location, &ctx)
            .iter()
            .map(|edge| edge.verbose)
            .collect();
        assert_eq!(labels, vec!["Propose deletion", "Approve deletion"]);
    }
}
