//! Block data model.

use crate::types::{
    ActionId, BlockId, BlockLocationId, BlockTypeId, BusinessLineId, IncidentId, Status,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A blocking mechanism, e.g. "firewall rule" or "DNS sinkhole".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockType {
    pub id: BlockTypeId,
    pub name: String,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A place where blocking can happen, with the mechanisms it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    pub id: BlockLocationId,
    pub name: String,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
    #[serde(default)]
    pub types: BTreeSet<BlockTypeId>,
}

impl BlockLocation {
    pub fn supports(&self, block_type: BlockTypeId) -> bool {
        self.types.contains(&block_type)
    }
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lifecycle state of a block. Blocks are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    #[default]
    Proposed,
    Approved,
    Refused,
    Enforced,
    Blocked,
    DeletionProposed,
    DeletionApproved,
    Deleted,
}

impl BlockState {
    pub const ALL: [BlockState; 8] = [
        BlockState::Proposed,
        BlockState::Approved,
        BlockState::Refused,
        BlockState::Enforced,
        BlockState::Blocked,
        BlockState::DeletionProposed,
        BlockState::DeletionApproved,
        BlockState::Deleted,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BlockState::Proposed => "Proposed",
            BlockState::Approved => "Approved",
            BlockState::Refused => "Refused",
            BlockState::Enforced => "Enforced",
            BlockState::Blocked => "Blocked",
            BlockState::DeletionProposed => "Deletion proposed",
            BlockState::DeletionApproved => "Deletion approved",
            BlockState::Deleted => "Deleted",
        }
    }

    /// A block is active while it is in place on the device.
    pub fn status(&self) -> Status {
        match self {
            BlockState::Enforced | BlockState::DeletionProposed | BlockState::DeletionApproved => {
                Status::Active
            }
            _ => Status::Inactive,
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockState::Proposed => "proposed",
            BlockState::Approved => "approved",
            BlockState::Refused => "refused",
            BlockState::Enforced => "enforced",
            BlockState::Blocked => "blocked",
            BlockState::DeletionProposed => "deletion_proposed",
            BlockState::DeletionApproved => "deletion_approved",
            BlockState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A blocking measure: `what` blocked at `location` using `block_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(rename = "where")]
    pub location: BlockLocationId,
    #[serde(rename = "how")]
    pub block_type: BlockTypeId,
    pub what: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub state: BlockState,
    #[serde(default)]
    pub incidents: BTreeSet<IncidentId>,
    #[serde(default)]
    pub actions: BTreeSet<ActionId>,
    pub created_on: DateTime<Utc>,
}

impl Block {
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Whether `what` designates the same target, ignoring case.
    pub fn targets(&self, what: &str) -> bool {
        self.what.to_lowercase() == what.to_lowercase()
    }

    /// "{how} on {where}: {what}".
    pub fn describe(&self, block_type: &BlockType, location: &BlockLocation) -> String {
        format!("{} on {}: {}", block_type.name, location.name, self.what)
    }
}

/// Request to block one or more targets on behalf of an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequest {
    pub incident: IncidentId,
    #[serde(rename = "where")]
    pub location: BlockLocationId,
    #[serde(rename = "how")]
    pub block_type: BlockTypeId,
    /// One target per line.
    pub what: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl BlockRequest {
    /// Non-empty, trimmed target lines, first spelling kept when a target
    /// repeats with different case.
    pub fn targets(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.what
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && seen.insert(line.to_lowercase()))
            .collect()
    }
}

/// What happened to one target line of a [`BlockRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "block", rename_all = "snake_case")]
pub enum BlockRequestOutcome {
    Created(BlockId),
    Reused(BlockId),
}

impl BlockRequestOutcome {
    pub fn block(&self) -> BlockId {
        match self {
            BlockRequestOutcome::Created(id) | BlockRequestOutcome::Reused(id) => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        let active: Vec<_> = BlockState::ALL
            .into_iter()
            .filter(|state| state.status() == Status::Active)
            .collect();
        assert_eq!(
            active,
            vec![
                BlockState::Enforced,
                BlockState::DeletionProposed,
                BlockState::DeletionApproved
            ]
        );
    }

    #[test]
    fn test_targets_ignore_case() {
        let block = Block {
            id: BlockId(1),
            location: BlockLocationId(1),
            block_type: BlockTypeId(1),
            what: "Evil.COM".into(),
            comment: None,
            state: BlockState::Proposed,
            incidents: BTreeSet::new(),
            actions: BTreeSet::new(),
            created_on: Utc::now(),
        };
        assert!(block.targets("evil.com"));
        assert!(!block.targets("evil.org"));

        let how = BlockType {
            id: BlockTypeId(1),
            name: "DNS sinkhole".into(),
        };
        let location = BlockLocation {
            id: BlockLocationId(1),
            name: "Core DNS".into(),
            business_line: None,
            types: BTreeSet::from([BlockTypeId(1)]),
        };
        assert_eq!(block.describe(&how, &location), "DNS sinkhole on Core DNS: Evil.COM");
        assert!(location.supports(BlockTypeId(1)));
    }

    #[test]
    fn test_request_targets_skip_blank_lines() {
        let request = BlockRequest {
            incident: IncidentId(1),
            location: BlockLocationId(1),
            block_type: BlockTypeId(1),
            what: "1.2.3.4\n\n  evil.com  \r\n".into(),
            comment: None,
        };
        assert_eq!(request.targets(), vec!["1.2.3.4", "evil.com"]);
    }

    #[test]
    fn test_request_targets_repeat_once() {
        let request = BlockRequest {
            incident: IncidentId(1),
            location: BlockLocationId(1),
            block_type: BlockTypeId(1),
            what: "Evil.com\nevil.COM\n8.8.8.8\nevil.com".into(),
            comment: None,
        };
        assert_eq!(request.targets(), vec!["Evil.com", "8.8.8.8"]);
    }

    #[test]
    fn test_state_serde_names() {
        let json = serde_json::to_string(&BlockState::DeletionProposed).unwrap();
        assert_eq!(json, "\"deletion_proposed\"");
        assert_eq!(BlockState::DeletionProposed.to_string(), "deletion_proposed");
    }
}
