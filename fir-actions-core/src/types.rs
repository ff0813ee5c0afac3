//! Identifiers and small shared types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Identifier of an [`Action`](crate::action::Action).
    ActionId,
    "A#"
);
record_id!(
    /// Identifier of an [`ActionComment`](crate::action::ActionComment).
    CommentId,
    "C#"
);
record_id!(
    /// Identifier of a [`Block`](crate::block::Block).
    BlockId,
    "B#"
);
record_id!(BlockLocationId, "L#");
record_id!(BlockTypeId, "T#");
record_id!(
    /// Identifier of a [`BusinessLine`](crate::business_line::BusinessLine).
    BusinessLineId,
    "BL#"
);
record_id!(
    /// Identifier of an [`Incident`](crate::incident::Incident).
    IncidentId,
    "I#"
);
record_id!(ActionTemplateId, "AT#");
record_id!(ActionListId, "AL#");
record_id!(ArtifactId, "R#");

/// Coarse lifecycle status shown in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Inactive,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "Active"),
            Status::Inactive => write!(f, "Inactive"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "inactive" => Ok(Status::Inactive),
            other => Err(format!("unknown status group '{other}'")),
        }
    }
}

/// Reference to a stored entity, used by hooks and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Action(ActionId),
    Block(BlockId),
    Incident(IncidentId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Action(id) => write!(f, "action {id}"),
            EntityRef::Block(id) => write!(f, "block {id}"),
            EntityRef::Incident(id) => write!(f, "incident {id}"),
        }
    }
}
