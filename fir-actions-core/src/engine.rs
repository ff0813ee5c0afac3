//! Command and query surface over the record store.
//!
//! Every command takes the store lock, checks guards, computes its changes
//! and commits them before releasing the lock. Transitions on the same
//! entity are therefore serialised. Events, hooks and artifact correlation
//! run after the lock is released and cannot fail the command.

use crate::action::machine as action_machine;
use crate::action::{
    Action, ActionComment, ActionEdge, ActionState, ActionTransition, ActionTransitionOutcome,
    ActionTransitionRequest, GuardContext, NewAction,
};
use crate::artifacts::{self, Artifact, ArtifactCorrelator, ArtifactKind, Extraction};
use crate::block::machine as block_machine;
use crate::block::{
    Block, BlockEdge, BlockRequest, BlockRequestOutcome, BlockState, BlockTransition,
    CascadeScene,
};
use crate::config::FirConfig;
use crate::error::{Result, StoreError, TransitionError};
use crate::events::{ACTION_CREATED, ACTION_UPDATED, EventBus};
use crate::fixtures::{Fixture, FixtureReport};
use crate::hooks::{HookRegistry, LifecycleEvent, LifecycleHook};
use crate::incident::{Incident, NewIncident};
use crate::permissions::{Permission, PermissionOracle, TreeAuthorization};
use crate::persistence;
use crate::store::{ActionFilter, BlockFilter, Store};
use crate::types::{ActionId, BlockId, BusinessLineId, EntityRef, IncidentId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Result of [`Engine::create_incident`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentCreated {
    pub incident: IncidentId,
    /// Actions instantiated from templates, in creation order.
    pub actions: Vec<ActionId>,
}

/// Result of [`Engine::transition_block`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTransitionReport {
    pub block: BlockId,
    pub transition: BlockTransition,
    pub from: BlockState,
    pub to: BlockState,
    /// Countermeasure actions created by the cascade.
    pub created: Vec<ActionId>,
    /// Linked actions whose state the cascade changed.
    pub updated: Vec<ActionId>,
}

/// Side effects gathered under the lock, delivered after it is released.
#[derive(Default)]
struct Outbox {
    published: Vec<(&'static str, Action)>,
    lifecycle: Vec<LifecycleEvent>,
    correlations: Vec<(ArtifactKind, String, BlockId)>,
}

impl Outbox {
    fn created(&mut self, entity: EntityRef) {
        self.lifecycle.push(LifecycleEvent::DoneCreating { entity });
    }

    fn updated(&mut self, entity: EntityRef) {
        self.lifecycle.push(LifecycleEvent::DoneUpdating { entity });
    }

    fn action_transition(&mut self, outcome: &ActionTransitionOutcome, user: &str) {
        self.lifecycle.push(LifecycleEvent::ActionTransition {
            action: outcome.action,
            transition: outcome.transition,
            from: outcome.from,
            to: outcome.to,
            user: user.to_string(),
        });
    }

    fn correlate(&mut self, block: BlockId, extraction: &Extraction) {
        for (kind, values) in extraction {
            for value in values {
                self.correlations.push((*kind, value.clone(), block));
            }
        }
    }
}

/// The actions and blocks workflow engine.
pub struct Engine {
    store: Mutex<Store>,
    oracle: Arc<dyn PermissionOracle>,
    hooks: HookRegistry,
    events: EventBus,
    correlators: Vec<Arc<dyn ArtifactCorrelator>>,
    artifact_kinds: Vec<ArtifactKind>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("hooks", &self.hooks)
            .field("events", &self.events)
            .field("correlators", &self.correlators.len())
            .field("artifact_kinds", &self.artifact_kinds)
            .finish()
    }
}

impl Engine {
    /// An engine over `store` with default authorization, all artifact
    /// kinds enabled and the default event bus.
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
            oracle: Arc::new(TreeAuthorization),
            hooks: HookRegistry::new(),
            events: EventBus::default(),
            correlators: Vec::new(),
            artifact_kinds: ArtifactKind::ALL.to_vec(),
        }
    }

    pub fn from_config(store: Store, config: &FirConfig) -> Self {
        let mut engine = Self::new(store);
        engine.events = if config.events.enabled {
            EventBus::new(config.events.channel_capacity)
        } else {
            EventBus::disabled()
        };
        engine.artifact_kinds = if config.artifacts.enabled {
            config.artifacts.kinds.clone()
        } else {
            Vec::new()
        };
        engine
    }

    /// Load the snapshot at `path`, or start empty when there is none.
    pub fn open(path: &Path, config: &FirConfig) -> Result<Self> {
        let store = persistence::read_snapshot::<Store>(path)?.unwrap_or_default();
        info!(path = %path.display(), "Opened engine state");
        Ok(Self::from_config(store, config))
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PermissionOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    pub fn with_correlator(mut self, correlator: Arc<dyn ArtifactCorrelator>) -> Self {
        self.correlators.push(correlator);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Store>, StoreError> {
        self.store.lock().map_err(|_| StoreError::Poisoned)
    }

    fn deliver(&self, outbox: Outbox) {
        for (name, action) in &outbox.published {
            self.events.publish(name, action, None);
        }
        for event in &outbox.lifecycle {
            self.hooks.fire(event);
        }
        for (kind, value, block) in &outbox.correlations {
            for correlator in &self.correlators {
                correlator.after_save(*kind, value, *block);
            }
        }
    }

    // ── Administration ──────────────────────────────────────────────

    /// Run `f` with exclusive access to the store, for reference data
    /// (business lines, users, block locations, templates).
    pub fn administer<R>(&self, f: impl FnOnce(&mut Store) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Apply a fixture. Nothing is changed when any part of it fails.
    pub fn load_fixture(&self, fixture: &Fixture) -> Result<FixtureReport> {
        let mut guard = self.lock()?;
        let mut working = guard.clone();
        let report = fixture.apply(&mut working)?;
        *guard = working;
        info!(
            business_lines = report.business_lines,
            users = report.users,
            locations = report.locations,
            templates = report.templates,
            "Loaded fixture"
        );
        Ok(report)
    }

    /// A copy of the whole store.
    pub fn snapshot(&self) -> Result<Store> {
        Ok(self.lock()?.clone())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let guard = self.lock()?;
        persistence::write_snapshot(path, &*guard)?;
        Ok(())
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Register an incident and instantiate the action templates that
    /// apply to each of its concerned business lines.
    pub fn create_incident(&self, new: NewIncident, actor: &str) -> Result<IncidentCreated> {
        let mut outbox = Outbox::default();
        let created = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let user = store.user(actor)?.clone();

            if new.subject.trim().is_empty() {
                return Err(TransitionError::validation("subject", "must not be empty").into());
            }
            for bl in &new.concerned_business_lines {
                store.business_lines.require(*bl)?;
            }
            let ctx = GuardContext::new(&user, self.oracle.as_ref(), &store.business_lines);
            require_on_incident(
                &ctx,
                Permission::HandleIncidents,
                &new.concerned_business_lines,
                "new incident",
            )?;

            let now = Utc::now();
            let incident = Incident {
                id: store.sequences.next_incident(),
                subject: new.subject,
                description: new.description,
                category: new.category,
                detection: new.detection,
                plan: new.plan,
                concerned_business_lines: new.concerned_business_lines,
                opened_by: user.username.clone(),
                opened_on: now,
            };

            let sequences = &mut store.sequences;
            let actions = store.templates.instantiate(
                &incident,
                &store.business_lines,
                &mut || sequences.next_action(),
                now,
            )?;

            let incident_id = incident.id;
            store.incidents.insert(incident_id, incident);
            outbox.created(EntityRef::Incident(incident_id));

            let mut action_ids = Vec::with_capacity(actions.len());
            for action in actions {
                debug!(
                    incident_id = incident_id.get(),
                    action_id = action.id.get(),
                    subject = %action.subject,
                    "Instantiated action template"
                );
                action_ids.push(action.id);
                outbox.created(EntityRef::Action(action.id));
                outbox.published.push((ACTION_CREATED, action.clone()));
                store.actions.insert(action.id, action);
            }

            info!(
                incident_id = incident_id.get(),
                actions = action_ids.len(),
                user = %user,
                "Created incident"
            );
            IncidentCreated {
                incident: incident_id,
                actions: action_ids,
            }
        };
        self.deliver(outbox);
        Ok(created)
    }

    /// Create an action by hand. The action must name a business line the
    /// actor handles, and the actor must handle its incident.
    pub fn create_action(&self, new: NewAction, actor: &str) -> Result<ActionId> {
        let mut outbox = Outbox::default();
        let id = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let user = store.user(actor)?.clone();

            if new.subject.trim().is_empty() {
                return Err(TransitionError::validation("subject", "must not be empty").into());
            }
            let Some(business_line) = new.business_line else {
                return Err(TransitionError::validation(
                    "business_line",
                    "a business line is required",
                )
                .into());
            };
            store.business_lines.require(business_line)?;
            let ctx = GuardContext::new(&user, self.oracle.as_ref(), &store.business_lines);
            if let Some(incident_id) = new.incident {
                let incident = store.incident(incident_id)?;
                require_on_incident(
                    &ctx,
                    Permission::HandleIncidents,
                    &incident.concerned_business_lines,
                    format!("incident {incident_id}"),
                )?;
            }
            ctx.require(
                Permission::HandleIncidents,
                Some(business_line),
                format!("business line {}", store.business_lines.name_of(Some(business_line))),
            )?;

            let action = Action {
                id: store.sequences.next_action(),
                action_type: new.action_type,
                subject: new.subject,
                description: new.description,
                state: ActionState::Created,
                auto_state: false,
                opened_by: user.username.clone(),
                opened_on: Utc::now(),
                business_line: Some(business_line),
                incident: new.incident,
            };
            let id = action.id;
            info!(action_id = id.get(), user = %user, "Created action");
            outbox.created(EntityRef::Action(id));
            outbox.published.push((ACTION_CREATED, action.clone()));
            store.actions.insert(id, action);
            id
        };
        self.deliver(outbox);
        Ok(id)
    }

    /// Apply `transition` to an action and record its audit comment.
    pub fn transition_action(
        &self,
        id: ActionId,
        transition: ActionTransition,
        request: &ActionTransitionRequest,
        actor: &str,
    ) -> Result<ActionTransitionOutcome> {
        let mut outbox = Outbox::default();
        let outcome = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let user = store.user(actor)?.clone();
            let mut action = store.action(id)?.clone();
            let mut incident = match action.incident {
                Some(incident_id) => Some(store.incident(incident_id)?.clone()),
                None => None,
            };

            let ctx = GuardContext::new(&user, self.oracle.as_ref(), &store.business_lines);
            let outcome = action_machine::apply(
                &mut action,
                incident.as_mut(),
                transition,
                request,
                &ctx,
            )?;

            store
                .comments
                .record(id, &user.username, &outcome.audit, Utc::now());
            if outcome.linked_business_line.is_some() {
                if let Some(incident) = incident {
                    store.incidents.insert(incident.id, incident);
                }
            }
            info!(
                action_id = id.get(),
                transition = transition.name(),
                from = %outcome.from,
                to = %outcome.to,
                user = %user,
                "Action transitioned"
            );
            outbox.action_transition(&outcome, &user.username);
            outbox.updated(EntityRef::Action(id));
            outbox.published.push((ACTION_UPDATED, action.clone()));
            store.actions.insert(id, action);
            outcome
        };
        self.deliver(outbox);
        Ok(outcome)
    }

    /// [`transition_action`](Self::transition_action) by transition name.
    pub fn transition_action_named(
        &self,
        id: ActionId,
        transition: &str,
        request: &ActionTransitionRequest,
        actor: &str,
    ) -> Result<ActionTransitionOutcome> {
        let transition: ActionTransition = transition.parse()?;
        self.transition_action(id, transition, request, actor)
    }

    /// Create or reuse one block per target line of `request` and link each
    /// to the incident.
    ///
    /// A target matching an existing `(where, how, what)` block, ignoring
    /// case, reuses it: a non-empty comment replaces the old one and a
    /// deleted block is proposed again when the actor may do so.
    pub fn request_blocks(
        &self,
        request: &BlockRequest,
        actor: &str,
    ) -> Result<Vec<BlockRequestOutcome>> {
        let mut outbox = Outbox::default();
        let outcomes = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let user = store.user(actor)?.clone();
            let incident = store.incident(request.incident)?.clone();
            let location = store.location(request.location)?.clone();
            let how = store.block_type(request.block_type)?.clone();

            if !location.supports(how.id) {
                return Err(TransitionError::validation(
                    "how",
                    format!("'{}' is not available at '{}'", how.name, location.name),
                )
                .into());
            }
            let targets = request.targets();
            if targets.is_empty() {
                return Err(
                    TransitionError::validation("what", "at least one target is required").into(),
                );
            }

            let ctx = GuardContext::new(&user, self.oracle.as_ref(), &store.business_lines);
            require_on_incident(
                &ctx,
                Permission::HandleIncidents,
                &incident.concerned_business_lines,
                format!("incident {}", incident.id),
            )?;
            ctx.require(
                Permission::ViewIncidents,
                location.business_line,
                format!("block location {}", location.name),
            )?;

            let comment = request
                .comment
                .as_deref()
                .map(str::trim)
                .filter(|comment| !comment.is_empty());
            let now = Utc::now();
            let mut outcomes = Vec::with_capacity(targets.len());

            for what in targets {
                let existing = store.find_block(location.id, how.id, what).map(|b| b.id);
                let outcome = match existing.and_then(|id| store.blocks.get_mut(&id)) {
                    Some(block) => {
                        if let Some(comment) = comment {
                            block.comment = Some(comment.to_string());
                        }
                        if block.state == BlockState::Deleted
                            && block_machine::check(block, &location, BlockTransition::Propose, &ctx)
                                .is_ok()
                        {
                            block.state = BlockState::Proposed;
                            outbox.lifecycle.push(LifecycleEvent::BlockTransition {
                                block: block.id,
                                transition: BlockTransition::Propose,
                                from: BlockState::Deleted,
                                to: BlockState::Proposed,
                                user: user.username.clone(),
                            });
                        }
                        block.incidents.insert(incident.id);
                        BlockRequestOutcome::Reused(block.id)
                    }
                    None => {
                        let id = store.sequences.next_block();
                        store.blocks.insert(
                            id,
                            Block {
                                id,
                                location: location.id,
                                block_type: how.id,
                                what: what.to_string(),
                                comment: comment.map(str::to_string),
                                state: BlockState::Proposed,
                                incidents: BTreeSet::from([incident.id]),
                                actions: BTreeSet::new(),
                                created_on: now,
                            },
                        );
                        BlockRequestOutcome::Created(id)
                    }
                };

                let block_id = outcome.block();
                if !self.artifact_kinds.is_empty() {
                    let target = store
                        .blocks
                        .get(&block_id)
                        .map(|block| block.what.clone())
                        .unwrap_or_default();
                    let extraction = artifacts::extract(&target, &self.artifact_kinds);
                    store.artifacts.record(block_id, &extraction);
                    outbox.correlate(block_id, &extraction);
                }
                info!(
                    block_id = block_id.get(),
                    incident_id = incident.id.get(),
                    reused = matches!(outcome, BlockRequestOutcome::Reused(_)),
                    user = %user,
                    "Requested block"
                );
                outbox.created(EntityRef::Block(block_id));
                outcomes.push(outcome);
            }
            outcomes
        };
        self.deliver(outbox);
        Ok(outcomes)
    }

    /// Apply `transition` to a block, cascading into its linked actions.
    ///
    /// The cascade is planned on copies; if any step fails nothing is
    /// committed.
    pub fn transition_block(
        &self,
        id: BlockId,
        transition: BlockTransition,
        comment: Option<&str>,
        actor: &str,
    ) -> Result<BlockTransitionReport> {
        let mut outbox = Outbox::default();
        let report = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let user = store.user(actor)?.clone();
            let mut block = store.block(id)?.clone();
            let location = store.location(block.location)?.clone();
            let scene = CascadeScene {
                actions: block
                    .actions
                    .iter()
                    .filter_map(|aid| store.actions.get(aid).map(|a| (*aid, a.clone())))
                    .collect(),
                incidents: block
                    .incidents
                    .iter()
                    .filter_map(|iid| store.incidents.get(iid).map(|i| (*iid, i.clone())))
                    .collect(),
            };

            let ctx = GuardContext::new(&user, self.oracle.as_ref(), &store.business_lines);
            let sequences = &mut store.sequences;
            let plan = block_machine::plan(
                &block,
                &location,
                transition,
                comment,
                &ctx,
                scene,
                &mut || sequences.next_action(),
                Utc::now(),
            )?;

            let now = Utc::now();
            for outcome in &plan.action_outcomes {
                store
                    .comments
                    .record(outcome.action, &user.username, &outcome.audit, now);
                outbox.action_transition(outcome, &user.username);
            }
            for action in &plan.created {
                block.actions.insert(action.id);
                outbox.created(EntityRef::Action(action.id));
                outbox.published.push((ACTION_CREATED, action.clone()));
                store.actions.insert(action.id, action.clone());
            }
            for action in &plan.updated {
                outbox.updated(EntityRef::Action(action.id));
                outbox.published.push((ACTION_UPDATED, action.clone()));
                store.actions.insert(action.id, action.clone());
            }
            for incident in &plan.incidents {
                store.incidents.insert(incident.id, incident.clone());
            }
            block.state = plan.to;
            store.blocks.insert(id, block);

            info!(
                block_id = id.get(),
                transition = transition.name(),
                from = %plan.from,
                to = %plan.to,
                created = plan.created.len(),
                updated = plan.updated.len(),
                user = %user,
                "Block transitioned"
            );
            outbox.lifecycle.push(LifecycleEvent::BlockTransition {
                block: id,
                transition,
                from: plan.from,
                to: plan.to,
                user: user.username.clone(),
            });
            outbox.updated(EntityRef::Block(id));

            BlockTransitionReport {
                block: id,
                transition,
                from: plan.from,
                to: plan.to,
                created: plan.created.iter().map(|a| a.id).collect(),
                updated: plan.updated.iter().map(|a| a.id).collect(),
            }
        };
        self.deliver(outbox);
        Ok(report)
    }

    /// [`transition_block`](Self::transition_block) by transition name.
    pub fn transition_block_named(
        &self,
        id: BlockId,
        transition: &str,
        comment: Option<&str>,
        actor: &str,
    ) -> Result<BlockTransitionReport> {
        let transition: BlockTransition = transition.parse()?;
        self.transition_block(id, transition, comment, actor)
    }

    /// Re-extract the artifacts of a block and link any that are missing.
    ///
    /// Correlators are notified once per distinct `(kind, value)`.
    pub fn refresh_artifacts(&self, id: BlockId) -> Result<Extraction> {
        let mut outbox = Outbox::default();
        let extraction = {
            let mut guard = self.lock()?;
            let store = &mut *guard;
            let what = store.block(id)?.what.clone();
            let extraction = artifacts::extract(&what, &self.artifact_kinds);
            store.artifacts.record(id, &extraction);
            outbox.correlate(id, &extraction);
            extraction
        };
        self.deliver(outbox);
        Ok(extraction)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Actions matching `filter` that `viewer` may see, newest first.
    pub fn list_actions(&self, filter: &ActionFilter, viewer: &str) -> Result<Vec<Action>> {
        let guard = self.lock()?;
        let user = guard.user(viewer)?;
        let ctx = GuardContext::new(user, self.oracle.as_ref(), &guard.business_lines);
        let mut actions: Vec<Action> = guard
            .actions
            .values()
            .filter(|action| filter.matches(action))
            .filter(|action| ctx.allows(Permission::ViewIncidents, action.business_line))
            .cloned()
            .collect();
        actions.sort_by(|a, b| b.opened_on.cmp(&a.opened_on).then(b.id.cmp(&a.id)));
        Ok(actions)
    }

    /// Blocks matching `filter` whose location `viewer` may see, newest first.
    pub fn list_blocks(&self, filter: &BlockFilter, viewer: &str) -> Result<Vec<Block>> {
        let guard = self.lock()?;
        let user = guard.user(viewer)?;
        let ctx = GuardContext::new(user, self.oracle.as_ref(), &guard.business_lines);
        let mut blocks: Vec<Block> = guard
            .blocks
            .values()
            .filter(|block| filter.matches(block))
            .filter(|block| {
                guard.locations.get(&block.location).is_some_and(|location| {
                    ctx.allows(Permission::ViewIncidents, location.business_line)
                })
            })
            .cloned()
            .collect();
        blocks.sort_by(|a, b| b.created_on.cmp(&a.created_on).then(b.id.cmp(&a.id)));
        Ok(blocks)
    }

    pub fn action(&self, id: ActionId, viewer: &str) -> Result<Action> {
        let guard = self.lock()?;
        Ok(self.visible_action(&guard, id, viewer)?.clone())
    }

    pub fn block(&self, id: BlockId, viewer: &str) -> Result<Block> {
        let guard = self.lock()?;
        Ok(self.visible_block(&guard, id, viewer)?.clone())
    }

    /// The incident, when `viewer` may see one of its business lines.
    pub fn incident(&self, id: IncidentId, viewer: &str) -> Result<Incident> {
        let guard = self.lock()?;
        let user = guard.user(viewer)?;
        let incident = guard.incident(id)?;
        require_on_incident(
            &GuardContext::new(user, self.oracle.as_ref(), &guard.business_lines),
            Permission::ViewIncidents,
            &incident.concerned_business_lines,
            format!("incident {id}"),
        )?;
        Ok(incident.clone())
    }

    /// Audit trail of an action, oldest first.
    pub fn action_comments(&self, id: ActionId, viewer: &str) -> Result<Vec<ActionComment>> {
        let guard = self.lock()?;
        self.visible_action(&guard, id, viewer)?;
        Ok(guard.comments.for_action(id).into_iter().cloned().collect())
    }

    pub fn last_comment(&self, id: ActionId, viewer: &str) -> Result<Option<ActionComment>> {
        let guard = self.lock()?;
        self.visible_action(&guard, id, viewer)?;
        Ok(guard.comments.last_for(id).cloned())
    }

    /// Transitions `user` may take on the action right now.
    pub fn available_action_transitions(
        &self,
        id: ActionId,
        user: &str,
    ) -> Result<Vec<&'static ActionEdge>> {
        let guard = self.lock()?;
        let user = guard.user(user)?;
        let action = guard.action(id)?;
        let ctx = GuardContext::new(user, self.oracle.as_ref(), &guard.business_lines);
        Ok(action_machine::available(action, &ctx))
    }

    /// Transitions `user` may take on the block right now.
    pub fn available_block_transitions(
        &self,
        id: BlockId,
        user: &str,
    ) -> Result<Vec<&'static BlockEdge>> {
        let guard = self.lock()?;
        let user = guard.user(user)?;
        let block = guard.block(id)?;
        let location = guard.location(block.location)?;
        let ctx = GuardContext::new(user, self.oracle.as_ref(), &guard.business_lines);
        Ok(block_machine::available(block, location, &ctx))
    }

    pub fn block_artifacts(&self, id: BlockId, viewer: &str) -> Result<Vec<Artifact>> {
        let guard = self.lock()?;
        self.visible_block(&guard, id, viewer)?;
        Ok(guard.artifacts.for_block(id).into_iter().cloned().collect())
    }

    /// "{how} on {where}: {what}".
    pub fn describe_block(&self, id: BlockId, viewer: &str) -> Result<String> {
        let guard = self.lock()?;
        let block = self.visible_block(&guard, id, viewer)?;
        Ok(guard.describe_block(block))
    }

    fn visible_action<'s>(
        &self,
        store: &'s Store,
        id: ActionId,
        viewer: &str,
    ) -> std::result::Result<&'s Action, TransitionError> {
        let user = store.user(viewer)?;
        let action = store.action(id)?;
        GuardContext::new(user, self.oracle.as_ref(), &store.business_lines).require(
            Permission::ViewIncidents,
            action.business_line,
            format!("action {id}"),
        )?;
        Ok(action)
    }

    /// A block is visible through its location's business line.
    fn visible_block<'s>(
        &self,
        store: &'s Store,
        id: BlockId,
        viewer: &str,
    ) -> std::result::Result<&'s Block, TransitionError> {
        let user = store.user(viewer)?;
        let block = store.block(id)?;
        let location = store.location(block.location)?;
        GuardContext::new(user, self.oracle.as_ref(), &store.business_lines).require(
            Permission::ViewIncidents,
            location.business_line,
            format!("block {id}"),
        )?;
        Ok(block)
    }
}

/// Allowed on an incident means allowed on any of its concerned business
/// lines, or globally when it has none.
fn allowed_on_incident(
    ctx: &GuardContext<'_>,
    permission: Permission,
    business_lines: &BTreeSet<BusinessLineId>,
) -> bool {
    if business_lines.is_empty() {
        return ctx.allows(permission, None);
    }
    business_lines
        .iter()
        .any(|bl| ctx.allows(permission, Some(*bl)))
}

fn require_on_incident(
    ctx: &GuardContext<'_>,
    permission: Permission,
    business_lines: &BTreeSet<BusinessLineId>,
    entity: impl fmt::Display,
) -> std::result::Result<(), TransitionError> {
    if allowed_on_incident(ctx, permission, business_lines) {
        Ok(())
    } else {
        Err(TransitionError::PermissionDenied {
            user: ctx.actor.username.clone(),
            permission: permission.to_string(),
            entity: entity.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::error::FirError;
    use crate::permissions::{Grant, User};
    use crate::templates::{NewActionList, NewActionTemplate};

    struct Setup {
        engine: Engine,
        retail: BusinessLineId,
    }

    fn setup() -> Setup {
        let engine = Engine::new(Store::new());
        let retail = engine
            .administer(|store| {
                let retail = store.business_lines.add("Retail", None).unwrap();
                store.put_user(
                    User::new("alice")
                        .with_grant(Grant::on(Permission::HandleIncidents, retail))
                        .with_grant(Grant::on(Permission::ViewIncidents, retail)),
                );
                store.put_user(User::new("eve"));
                retail
            })
            .unwrap();
        Setup { engine, retail }
    }

    #[test]
    fn test_create_incident_instantiates_templates() {
        let s = setup();
        s.engine
            .administer(|store| {
                let t = store
                    .templates
                    .add_template(NewActionTemplate {
                        action_type: ActionType::Investigation,
                        subject: "Triage {{ incident.subject }}".into(),
                        description: String::new(),
                        business_line: None,
                    })
                    .unwrap();
                store.templates.add_list(NewActionList {
                    name: "default".into(),
                    actions: vec![t],
                    ..NewActionList::default()
                });
            })
            .unwrap();

        let created = s
            .engine
            .create_incident(
                NewIncident {
                    subject: "Ransomware".into(),
                    concerned_business_lines: BTreeSet::from([s.retail]),
                    ..NewIncident::default()
                },
                "alice",
            )
            .unwrap();

        assert_eq!(created.actions.len(), 1);
        let action = s.engine.action(created.actions[0], "alice").unwrap();
        assert_eq!(action.subject, "Triage Ransomware");
        assert_eq!(action.opened_by, "alice");
    }

    #[test]
    fn test_create_incident_requires_handle_permission() {
        let s = setup();
        let err = s
            .engine
            .create_incident(
                NewIncident {
                    subject: "Ransomware".into(),
                    concerned_business_lines: BTreeSet::from([s.retail]),
                    ..NewIncident::default()
                },
                "eve",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            FirError::Transition(TransitionError::PermissionDenied { .. })
        ));
        assert!(s.engine.snapshot().unwrap().incidents.is_empty());
    }

    #[test]
    fn test_transition_writes_one_comment() {
        let s = setup();
        let id = s
            .engine
            .create_action(
                NewAction {
                    action_type: ActionType::Other,
                    subject: "Call the ISP".into(),
                    description: String::new(),
                    business_line: Some(s.retail),
                    incident: None,
                },
                "alice",
            )
            .unwrap();

        s.engine
            .transition_action_named(
                id,
                "assign",
                &ActionTransitionRequest::with_comment("urgent"),
                "alice",
            )
            .unwrap();

        let comments = s.engine.action_comments(id, "alice").unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].comment, "alice assigned this action to Retail\n\nurgent");
        assert_eq!(comments[0].opened_by, "alice");
    }

    #[test]
    fn test_failed_transition_writes_nothing() {
        let s = setup();
        let id = s
            .engine
            .create_action(
                NewAction {
                    action_type: ActionType::Other,
                    subject: "Call the ISP".into(),
                    description: String::new(),
                    business_line: Some(s.retail),
                    incident: None,
                },
                "alice",
            )
            .unwrap();

        let err = s
            .engine
            .transition_action(
                id,
                ActionTransition::Close,
                &ActionTransitionRequest::default(),
                "alice",
            )
            .unwrap_err();
        assert!(matches!(
            err.transition(),
            Some(TransitionError::InvalidTransition { .. })
        ));
        assert!(s.engine.action_comments(id, "alice").unwrap().is_empty());
        assert_eq!(
            s.engine.action(id, "alice").unwrap().state,
            ActionState::Created
        );
    }

    #[test]
    fn test_unknown_transition_name_is_not_found() {
        let s = setup();
        let err = s
            .engine
            .transition_block_named(BlockId(1), "explode", None, "alice")
            .unwrap_err();
        assert!(matches!(
            err.transition(),
            Some(TransitionError::NotFound {
                kind: "transition",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_actor_is_not_found() {
        let s = setup();
        let err = s
            .engine
            .list_actions(&ActionFilter::default(), "mallory")
            .unwrap_err();
        assert!(matches!(
            err.transition(),
            Some(TransitionError::NotFound { kind: "user", .. })
        ));
    }
}
