//! Terminal rendering of engine records.

use chrono::{DateTime, Local, Utc};
use fir_actions_core::artifacts::Extraction;
use fir_actions_core::{Action, ActionComment, Artifact, Block, BusinessLineTree};
use serde::Serialize;

/// A block with its "{how} on {where}: {what}" description.
#[derive(Debug, Serialize)]
pub struct BlockRow<'a> {
    #[serde(flatten)]
    pub block: &'a Block,
    pub description: String,
}

/// An action with its audit trail and the transitions open to the viewer.
#[derive(Debug, Serialize)]
pub struct ActionDetail<'a> {
    #[serde(flatten)]
    pub action: &'a Action,
    pub comments: &'a [ActionComment],
    pub available: Vec<&'static str>,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn local(date: DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

pub fn action_line(action: &Action, business_lines: &BusinessLineTree) -> String {
    let auto = if action.auto_state { " (auto)" } else { "" };
    format!(
        "{:<7} {:<9} {:<15} {:<16} {}{}",
        action.id.to_string(),
        action.state.label(),
        action.action_type.label(),
        business_lines.name_of(action.business_line),
        action.subject,
        auto
    )
}

pub fn block_line(row: &BlockRow<'_>) -> String {
    format!(
        "{:<7} {:<18} {:<10} {}",
        row.block.id.to_string(),
        row.block.state.label(),
        row.block.status().to_string(),
        row.description
    )
}

pub fn comment_line(comment: &ActionComment) -> String {
    format!(
        "  {} {}: {}",
        local(comment.date),
        comment.opened_by,
        comment.comment.replace("\n\n", " | ")
    )
}

pub fn artifact_line(artifact: &Artifact) -> String {
    format!("{:<7} {}", artifact.kind.name(), artifact.value)
}

pub fn extraction_lines(extraction: &Extraction) -> Vec<String> {
    extraction
        .iter()
        .flat_map(|(kind, values)| {
            values
                .iter()
                .map(move |value| format!("{:<7} {}", kind.name(), value))
        })
        .collect()
}

pub fn action_header(action: &Action, business_lines: &BusinessLineTree) -> Vec<String> {
    let mut lines = vec![
        format!("{} {}", action.id, action.subject),
        format!("  type:          {}", action.action_type.label()),
        format!("  state:         {}", action.state.label()),
        format!("  business line: {}", business_lines.name_of(action.business_line)),
        format!("  opened:        {} by {}", local(action.opened_on), action.opened_by),
    ];
    if let Some(incident) = action.incident {
        lines.push(format!("  incident:      {incident}"));
    }
    if !action.description.is_empty() {
        lines.push(String::new());
        lines.push(action.description.clone());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use fir_actions_core::{ActionId, ActionState, ActionType, ArtifactKind};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    fn action() -> Action {
        Action {
            id: ActionId(4),
            action_type: ActionType::Countermeasure,
            subject: "Enforce block B#1 on Edge".into(),
            description: String::new(),
            state: ActionState::Assigned,
            auto_state: true,
            opened_by: "soc".into(),
            opened_on: Utc::now(),
            business_line: None,
            incident: None,
        }
    }

    #[test]
    fn test_action_line_marks_automatic_actions() {
        let line = action_line(&action(), &BusinessLineTree::new());
        assert!(line.starts_with("A#4"));
        assert!(line.ends_with("Enforce block B#1 on Edge (auto)"));
    }

    #[test]
    fn test_extraction_lines_are_grouped_by_kind() {
        let extraction: Extraction = BTreeMap::from([
            (ArtifactKind::Ip, BTreeSet::from(["8.8.8.8".to_string()])),
            (ArtifactKind::Domain, BTreeSet::from(["evil.com".to_string()])),
        ]);
        assert_eq!(
            extraction_lines(&extraction),
            vec!["ip      8.8.8.8", "domain  evil.com"]
        );
    }

    #[test]
    fn test_action_detail_serializes_flat() {
        let action = action();
        let detail = ActionDetail {
            action: &action,
            comments: &[],
            available: vec!["Close"],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["subject"], "Enforce block B#1 on Edge");
        assert_eq!(value["available"][0], "Close");
    }
}
