//! The record store: every entity the engine reads or writes.
//!
//! The store is plain data. Guards and cascades live in the state machines
//! and the [`Engine`](crate::engine::Engine), which owns the store behind a
//! lock.

use crate::action::{Action, ActionLog, ActionState};
use crate::artifacts::ArtifactIndex;
use crate::block::{Block, BlockLocation, BlockState, BlockType};
use crate::business_line::BusinessLineTree;
use crate::error::TransitionError;
use crate::incident::Incident;
use crate::permissions::User;
use crate::templates::TemplateCatalog;
use crate::types::{
    ActionId, BlockId, BlockLocationId, BlockTypeId, BusinessLineId, IncidentId, Status,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Id sequences. Like database sequences, a value handed out to an aborted
/// operation is not reused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sequences {
    incident: u64,
    action: u64,
    block: u64,
    block_type: u64,
    location: u64,
}

impl Sequences {
    pub fn next_incident(&mut self) -> IncidentId {
        self.incident += 1;
        IncidentId(self.incident)
    }

    pub fn next_action(&mut self) -> ActionId {
        self.action += 1;
        ActionId(self.action)
    }

    pub fn next_block(&mut self) -> BlockId {
        self.block += 1;
        BlockId(self.block)
    }

    fn next_block_type(&mut self) -> BlockTypeId {
        self.block_type += 1;
        BlockTypeId(self.block_type)
    }

    fn next_location(&mut self) -> BlockLocationId {
        self.location += 1;
        BlockLocationId(self.location)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    pub business_lines: BusinessLineTree,
    pub users: BTreeMap<String, User>,
    pub incidents: BTreeMap<IncidentId, Incident>,
    pub actions: BTreeMap<ActionId, Action>,
    pub comments: ActionLog,
    pub templates: TemplateCatalog,
    pub block_types: BTreeMap<BlockTypeId, BlockType>,
    pub locations: BTreeMap<BlockLocationId, BlockLocation>,
    pub blocks: BTreeMap<BlockId, Block>,
    pub artifacts: ArtifactIndex,
    pub sequences: Sequences,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn put_user(&mut self, user: User) {
        self.users.insert(user.username.clone(), user);
    }

    pub fn user(&self, username: &str) -> Result<&User, TransitionError> {
        self.users
            .get(username)
            .ok_or_else(|| TransitionError::not_found("user", username))
    }

    pub fn add_block_type(&mut self, name: impl Into<String>) -> BlockTypeId {
        let id = self.sequences.next_block_type();
        self.block_types.insert(
            id,
            BlockType {
                id,
                name: name.into(),
            },
        );
        id
    }

    /// Add a location; every type in `types` must already exist.
    pub fn add_location(
        &mut self,
        name: impl Into<String>,
        business_line: Option<BusinessLineId>,
        types: BTreeSet<BlockTypeId>,
    ) -> Result<BlockLocationId, TransitionError> {
        if let Some(bl) = business_line {
            self.business_lines.require(bl)?;
        }
        if let Some(missing) = types.iter().find(|t| !self.block_types.contains_key(t)) {
            return Err(TransitionError::not_found("block type", missing));
        }
        let id = self.sequences.next_location();
        self.locations.insert(
            id,
            BlockLocation {
                id,
                name: name.into(),
                business_line,
                types,
            },
        );
        Ok(id)
    }

    pub fn incident(&self, id: IncidentId) -> Result<&Incident, TransitionError> {
        self.incidents
            .get(&id)
            .ok_or_else(|| TransitionError::not_found("incident", id))
    }

    pub fn action(&self, id: ActionId) -> Result<&Action, TransitionError> {
        self.actions
            .get(&id)
            .ok_or_else(|| TransitionError::not_found("action", id))
    }

    pub fn block(&self, id: BlockId) -> Result<&Block, TransitionError> {
        self.blocks
            .get(&id)
            .ok_or_else(|| TransitionError::not_found("block", id))
    }

    pub fn location(&self, id: BlockLocationId) -> Result<&BlockLocation, TransitionError> {
        self.locations
            .get(&id)
            .ok_or_else(|| TransitionError::not_found("block location", id))
    }

    pub fn block_type(&self, id: BlockTypeId) -> Result<&BlockType, TransitionError> {
        self.block_types
            .get(&id)
            .ok_or_else(|| TransitionError::not_found("block type", id))
    }

    pub fn find_location(&self, name: &str) -> Option<&BlockLocation> {
        self.locations
            .values()
            .find(|loc| loc.name.eq_ignore_ascii_case(name))
    }

    pub fn find_block_type(&self, name: &str) -> Option<&BlockType> {
        self.block_types
            .values()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// The block for `(where, how, what)`, matching `what` case-insensitively.
    pub fn find_block(
        &self,
        location: BlockLocationId,
        block_type: BlockTypeId,
        what: &str,
    ) -> Option<&Block> {
        self.blocks.values().find(|block| {
            block.location == location && block.block_type == block_type && block.targets(what)
        })
    }

    /// "{how} on {where}: {what}", falling back to ids for dangling references.
    pub fn describe_block(&self, block: &Block) -> String {
        match (self.block_type(block.block_type), self.location(block.location)) {
            (Ok(how), Ok(location)) => block.describe(how, location),
            _ => format!("{} on {}: {}", block.block_type, block.location, block.what),
        }
    }
}

/// Selection of actions for listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionFilter {
    pub incident: Option<IncidentId>,
    pub status: Option<Status>,
    pub state: Option<ActionState>,
    pub business_line: Option<BusinessLineId>,
}

impl ActionFilter {
    pub fn matches(&self, action: &Action) -> bool {
        self.incident.is_none_or(|id| action.incident == Some(id))
            && self.status.is_none_or(|status| action.status() == status)
            && self.state.is_none_or(|state| action.state == state)
            && self
                .business_line
                .is_none_or(|bl| action.business_line == Some(bl))
    }
}

/// Selection of blocks for listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockFilter {
    pub incident: Option<IncidentId>,
    pub status: Option<Status>,
    pub state: Option<BlockState>,
    pub location: Option<BlockLocationId>,
    pub block_type: Option<BlockTypeId>,
}

impl BlockFilter {
    pub fn matches(&self, block: &Block) -> bool {
        self.incident.is_none_or(|id| block.incidents.contains(&id))
            && self.status.is_none_or(|status| block.status() == status)
            && self.state.is_none_or(|state| block.state == state)
            && self.location.is_none_or(|loc| block.location == loc)
            && self.block_type.is_none_or(|how| block.block_type == how)
    }
}
