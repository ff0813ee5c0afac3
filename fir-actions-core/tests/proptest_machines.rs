//! Property-based tests for the action and block state machines.

use proptest::prelude::*;

use fir_actions_core::artifacts::{ArtifactKind, extract_all};
use fir_actions_core::{
    ActionState, ActionTransition, ActionTransitionRequest, ActionType, BlockRequest,
    BlockRequestOutcome, BlockState, BlockTransition, BusinessLineId, Engine, IncidentId,
    NewAction, NewIncident, Store, User,
};
use fir_actions_core::{BlockLocationId, BlockTypeId};
use std::collections::BTreeSet;

struct Bench {
    engine: Engine,
    bl: BusinessLineId,
    incident: IncidentId,
    location: BlockLocationId,
    block_type: BlockTypeId,
}

fn bench() -> Bench {
    let engine = Engine::new(Store::new());
    let (bl, location, block_type) = engine
        .administer(|store| {
            let bl = store.business_lines.add("SOC", None).unwrap();
            let fw = store.add_block_type("Firewall rule");
            let location = store
                .add_location("Core router", Some(bl), BTreeSet::from([fw]))
                .unwrap();
            store.put_user(User::superuser("admin"));
            (bl, location, fw)
        })
        .unwrap();
    let incident = engine
        .create_incident(
            NewIncident {
                subject: "Exfiltration".into(),
                concerned_business_lines: BTreeSet::from([bl]),
                ..NewIncident::default()
            },
            "admin",
        )
        .unwrap()
        .incident;
    Bench {
        engine,
        bl,
        incident,
        location,
        block_type,
    }
}

fn action_transition() -> impl Strategy<Value = ActionTransition> {
    (0..ActionTransition::ALL.len()).prop_map(|i| ActionTransition::ALL[i])
}

fn block_transition() -> impl Strategy<Value = BlockTransition> {
    (0..BlockTransition::ALL.len()).prop_map(|i| BlockTransition::ALL[i])
}

// --- Action machine properties ---

proptest! {
    #[test]
    fn action_walk_follows_the_table(
        steps in prop::collection::vec(action_transition(), 1..12),
    ) {
        let b = bench();
        let id = b.engine.create_action(
            NewAction {
                action_type: ActionType::Investigation,
                subject: "Look around".into(),
                description: String::new(),
                business_line: Some(b.bl),
                incident: Some(b.incident),
            },
            "admin",
        ).unwrap();

        let mut state = ActionState::Created;
        let mut comments = 0;
        for transition in steps {
            let accepted = transition.edge().accepts(state);
            let result = b.engine.transition_action(
                id,
                transition,
                &ActionTransitionRequest::default(),
                "admin",
            );
            prop_assert_eq!(result.is_ok(), accepted);
            if accepted {
                state = transition.edge().target;
                comments += 1;
            }
            prop_assert_eq!(b.engine.action(id, "admin").unwrap().state, state);
            prop_assert_eq!(b.engine.action_comments(id, "admin").unwrap().len(), comments);
        }
    }

    #[test]
    fn closed_is_terminal(transition in action_transition()) {
        prop_assert!(!transition.edge().accepts(ActionState::Closed));
    }
}

// --- Block machine properties ---

proptest! {
    #[test]
    fn block_walk_keeps_linked_actions_consistent(
        steps in prop::collection::vec(block_transition(), 1..16),
    ) {
        let b = bench();
        let block = b.engine.request_blocks(
            &BlockRequest {
                incident: b.incident,
                location: b.location,
                block_type: b.block_type,
                what: "192.0.2.44".into(),
                comment: None,
            },
            "admin",
        ).unwrap()[0].block();

        let mut state = BlockState::Proposed;
        for transition in steps {
            let accepted = transition.edge().accepts(state);
            let result = b.engine.transition_block(block, transition, None, "admin");
            prop_assert_eq!(result.is_ok(), accepted);
            if !accepted {
                continue;
            }
            state = transition.edge().target;
            if transition == BlockTransition::Approve {
                prop_assert_eq!(state, BlockState::Approved);
            }

            let stored = b.engine.block(block, "admin").unwrap();
            prop_assert_eq!(stored.state, state);
            for action in &stored.actions {
                let action = b.engine.action(*action, "admin").unwrap();
                prop_assert!(action.auto_state);
                match state {
                    BlockState::Refused | BlockState::Deleted | BlockState::Enforced => {
                        prop_assert!(action.is_closed());
                    }
                    BlockState::Blocked => {
                        prop_assert_ne!(action.state, ActionState::Assigned);
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn table_rows_match_their_transition(transition in block_transition()) {
        let edge = transition.edge();
        prop_assert_eq!(edge.transition, transition);
        prop_assert!(!edge.sources.is_empty());
    }
}

// --- Block requests and artifacts ---

proptest! {
    #[test]
    fn request_yields_one_outcome_per_distinct_target(
        labels in prop::collection::vec("[a-z]{3,10}", 1..6),
        upper in any::<bool>(),
    ) {
        let b = bench();
        let what = labels
            .iter()
            .map(|label| format!("{label}.example.net"))
            .collect::<Vec<_>>()
            .join("\n");
        let request = |what: String| BlockRequest {
            incident: b.incident,
            location: b.location,
            block_type: b.block_type,
            what,
            comment: None,
        };

        let distinct: BTreeSet<_> = labels.iter().collect();
        let first = b.engine.request_blocks(&request(what.clone()), "admin").unwrap();
        prop_assert_eq!(first.len(), distinct.len());
        for outcome in &first {
            prop_assert!(matches!(outcome, BlockRequestOutcome::Created(_)));
        }

        let again = if upper { what.to_uppercase() } else { what };
        let second = b.engine.request_blocks(&request(again), "admin").unwrap();
        for (before, after) in first.iter().zip(&second) {
            prop_assert_eq!(*after, BlockRequestOutcome::Reused(before.block()));
        }

        prop_assert_eq!(b.engine.snapshot().unwrap().blocks.len(), distinct.len());
    }

    #[test]
    fn any_dotted_quad_is_extracted(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
        let ip = format!("{a}.{b}.{c}.{d}");
        let found = extract_all(&format!("blocked {ip} at the edge"));
        prop_assert!(found[&ArtifactKind::Ip].contains(&ip));
        prop_assert!(!found.contains_key(&ArtifactKind::Domain));
    }
}
