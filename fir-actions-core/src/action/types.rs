//! Action data model.

use crate::types::{ActionId, BusinessLineId, CommentId, IncidentId, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of remediation work an action represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Investigation,
    Alerting,
    Countermeasure,
    Other,
}

impl ActionType {
    pub fn label(&self) -> &'static str {
        match self {
            ActionType::Investigation => "Investigation",
            ActionType::Alerting => "Alerting",
            ActionType::Countermeasure => "Countermeasure",
            ActionType::Other => "Other",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Investigation => write!(f, "investigation"),
            ActionType::Alerting => write!(f, "alerting"),
            ActionType::Countermeasure => write!(f, "countermeasure"),
            ActionType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "investigation" => Ok(ActionType::Investigation),
            "alerting" => Ok(ActionType::Alerting),
            "countermeasure" => Ok(ActionType::Countermeasure),
            "other" => Ok(ActionType::Other),
            other => Err(format!("unknown action type '{other}'")),
        }
    }
}

/// Lifecycle state of an action. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Created,
    Assigned,
    Blocked,
    Closed,
}

impl ActionState {
    pub const ALL: [ActionState; 4] = [
        ActionState::Created,
        ActionState::Assigned,
        ActionState::Blocked,
        ActionState::Closed,
    ];

    /// Human label used in audit comments.
    pub fn label(&self) -> &'static str {
        match self {
            ActionState::Created => "Created",
            ActionState::Assigned => "Assigned",
            ActionState::Blocked => "Blocked",
            ActionState::Closed => "Closed",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ActionState::Closed => Status::Inactive,
            _ => Status::Active,
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionState::Created => write!(f, "created"),
            ActionState::Assigned => write!(f, "assigned"),
            ActionState::Blocked => write!(f, "blocked"),
            ActionState::Closed => write!(f, "closed"),
        }
    }
}

/// A unit of remediation or investigation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: ActionState,
    /// Set on actions generated by a block cascade.
    #[serde(default)]
    pub auto_state: bool,
    pub opened_by: String,
    pub opened_on: DateTime<Utc>,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
    #[serde(default)]
    pub incident: Option<IncidentId>,
}

impl Action {
    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ActionState::Closed
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)
    }
}

/// Immutable audit entry written by every action transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionComment {
    pub id: CommentId,
    pub date: DateTime<Utc>,
    pub comment: String,
    pub action: ActionId,
    pub opened_by: String,
}

/// Request to create an action by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
    #[serde(default)]
    pub incident: Option<IncidentId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_parse_and_display() {
        for raw in ["investigation", "alerting", "countermeasure", "other"] {
            let parsed: ActionType = raw.parse().unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
        assert!("containment".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_status_is_active_until_closed() {
        assert_eq!(ActionState::Created.status(), Status::Active);
        assert_eq!(ActionState::Assigned.status(), Status::Active);
        assert_eq!(ActionState::Blocked.status(), Status::Active);
        assert_eq!(ActionState::Closed.status(), Status::Inactive);
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = Action {
            id: ActionId(1),
            action_type: ActionType::Countermeasure,
            subject: "Reset passwords".into(),
            description: String::new(),
            state: ActionState::Created,
            auto_state: false,
            opened_by: "alice".into(),
            opened_on: Utc::now(),
            business_line: None,
            incident: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "countermeasure");
        assert_eq!(json["state"], "created");
    }
}
