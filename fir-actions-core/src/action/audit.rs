//! Append-only comment trail of action transitions.

use super::types::ActionComment;
use crate::types::{ActionId, CommentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Audit log of every action transition. Entries are never edited or removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionLog {
    entries: BTreeMap<CommentId, ActionComment>,
    next_id: u64,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its id.
    pub fn record(
        &mut self,
        action: ActionId,
        author: impl Into<String>,
        comment: impl Into<String>,
        date: DateTime<Utc>,
    ) -> CommentId {
        self.next_id += 1;
        let id = CommentId(self.next_id);
        self.entries.insert(
            id,
            ActionComment {
                id,
                date,
                comment: comment.into(),
                action,
                opened_by: author.into(),
            },
        );
        id
    }

    /// Entries of one action, oldest first.
    pub fn for_action(&self, action: ActionId) -> Vec<&ActionComment> {
        let mut entries: Vec<_> = self
            .entries
            .values()
            .filter(|entry| entry.action == action)
            .collect();
        entries.sort_by_key(|entry| (entry.date, entry.id));
        entries
    }

    pub fn last_for(&self, action: ActionId) -> Option<&ActionComment> {
        self.for_action(action).into_iter().last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_entries_are_ordered_per_action() {
        let mut log = ActionLog::new();
        let now = Utc::now();
        log.record(ActionId(1), "alice", "second", now);
        log.record(ActionId(2), "bob", "other action", now);
        log.record(ActionId(1), "alice", "first", now - Duration::minutes(5));

        let texts: Vec<_> = log
            .for_action(ActionId(1))
            .iter()
            .map(|entry| entry.comment.as_str())
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(log.last_for(ActionId(1)).unwrap().comment, "second");
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_last_for_unknown_action() {
        let log = ActionLog::new();
        assert!(log.last_for(ActionId(9)).is_none());
        assert!(log.is_empty());
    }
}
