//! Business line hierarchy.
//!
//! Business lines form a tree used both for ownership and for permission
//! evaluation. Each node stores its materialised root-first ancestry so that
//! inheritance checks never have to walk the map.

use crate::error::TransitionError;
use crate::types::BusinessLineId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A node of the organisational scope tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessLine {
    pub id: BusinessLineId,
    pub name: String,
    #[serde(default)]
    pub parent: Option<BusinessLineId>,
    /// Root-first path of ancestors, excluding this node.
    #[serde(default)]
    pub ancestry: Vec<BusinessLineId>,
}

impl BusinessLine {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn parent(&self) -> Option<BusinessLineId> {
        self.parent
    }

    /// This node followed by its ancestors, nearest first.
    pub fn lineage(&self) -> impl Iterator<Item = BusinessLineId> + '_ {
        std::iter::once(self.id).chain(self.ancestry.iter().rev().copied())
    }

    /// Whether `other` is this node or one of its ancestors.
    pub fn is_within(&self, other: BusinessLineId) -> bool {
        self.id == other || self.ancestry.contains(&other)
    }
}

impl fmt::Display for BusinessLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// All business lines, keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessLineTree {
    lines: BTreeMap<BusinessLineId, BusinessLine>,
    next_id: u64,
}

impl BusinessLineTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a business line under `parent` (or as a root).
    pub fn add(
        &mut self,
        name: impl Into<String>,
        parent: Option<BusinessLineId>,
    ) -> Result<BusinessLineId, TransitionError> {
        let ancestry = match parent {
            Some(parent_id) => {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| TransitionError::not_found("business line", parent_id))?;
                let mut path = parent.ancestry.clone();
                path.push(parent_id);
                path
            }
            None => Vec::new(),
        };
        self.next_id += 1;
        let id = BusinessLineId(self.next_id);
        self.lines.insert(
            id,
            BusinessLine {
                id,
                name: name.into(),
                parent,
                ancestry,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: BusinessLineId) -> Option<&BusinessLine> {
        self.lines.get(&id)
    }

    pub fn require(&self, id: BusinessLineId) -> Result<&BusinessLine, TransitionError> {
        self.get(id)
            .ok_or_else(|| TransitionError::not_found("business line", id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&BusinessLine> {
        self.lines
            .values()
            .find(|bl| bl.name.eq_ignore_ascii_case(name))
    }

    /// Display name of a business line, or a placeholder when unset.
    pub fn name_of(&self, id: Option<BusinessLineId>) -> String {
        id.and_then(|id| self.get(id))
            .map(|bl| bl.name.clone())
            .unwrap_or_else(|| "no business line".to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &BusinessLine> {
        self.lines.values()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (BusinessLineTree, BusinessLineId, BusinessLineId, BusinessLineId) {
        let mut tree = BusinessLineTree::new();
        let root = tree.add("Group", None).unwrap();
        let mid = tree.add("Retail", Some(root)).unwrap();
        let leaf = tree.add("Retail Paris", Some(mid)).unwrap();
        (tree, root, mid, leaf)
    }

    #[test]
    fn test_ancestry_is_materialised_root_first() {
        let (tree, root, mid, leaf) = sample();
        let leaf = tree.get(leaf).unwrap();
        assert_eq!(leaf.ancestry, vec![root, mid]);
        assert_eq!(leaf.parent(), Some(mid));
        assert!(!leaf.is_root());
        assert!(tree.get(root).unwrap().is_root());
    }

    #[test]
    fn test_lineage_is_nearest_first() {
        let (tree, root, mid, leaf) = sample();
        let lineage: Vec<_> = tree.get(leaf).unwrap().lineage().collect();
        assert_eq!(lineage, vec![leaf, mid, root]);
    }

    #[test]
    fn test_is_within() {
        let (tree, root, mid, leaf) = sample();
        let mid_bl = tree.get(mid).unwrap();
        assert!(mid_bl.is_within(root));
        assert!(mid_bl.is_within(mid));
        assert!(!mid_bl.is_within(leaf));
    }

    #[test]
    fn test_add_with_unknown_parent_fails() {
        let mut tree = BusinessLineTree::new();
        let err = tree.add("Orphan", Some(BusinessLineId(99))).unwrap_err();
        assert!(matches!(err, TransitionError::NotFound { .. }));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_find_by_name_is_case_insensitive() {
        let (tree, _, mid, _) = sample();
        assert_eq!(tree.find_by_name("retail").map(|bl| bl.id), Some(mid));
        assert!(tree.find_by_name("Wholesale").is_none());
    }
}
