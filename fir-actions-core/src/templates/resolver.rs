//! Action templates, template lists and their resolution for new incidents.

use super::render;
use crate::action::{Action, ActionState, ActionType};
use crate::business_line::BusinessLineTree;
use crate::error::TemplateError;
use crate::incident::Incident;
use crate::types::{ActionId, ActionListId, ActionTemplateId, BusinessLineId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// Blueprint of an action, rendered against an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub id: ActionTemplateId,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
}

impl ActionTemplate {
    /// "[Type] subject", followed by " - business line" when one is set.
    pub fn describe(&self, business_lines: &BusinessLineTree) -> String {
        let head = format!("[{}] {}", self.action_type.label(), self.subject);
        match self.business_line {
            Some(_) => format!("{head} - {}", business_lines.name_of(self.business_line)),
            None => head,
        }
    }
}

/// Templates grouped under a selection key. `None` fields and an empty
/// business line set match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionList {
    pub id: ActionListId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub business_lines: BTreeSet<BusinessLineId>,
    /// Templates in instantiation order.
    #[serde(default)]
    pub actions: Vec<ActionTemplateId>,
}

impl ActionList {
    pub fn matches(
        &self,
        category: Option<&str>,
        detection: Option<&str>,
        plan: Option<&str>,
        business_line: BusinessLineId,
    ) -> bool {
        fn field(wanted: &Option<String>, actual: Option<&str>) -> bool {
            wanted.as_deref().is_none_or(|w| Some(w) == actual)
        }
        field(&self.category, category)
            && field(&self.detection, detection)
            && field(&self.plan, plan)
            && (self.business_lines.is_empty() || self.business_lines.contains(&business_line))
    }
}

impl fmt::Display for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Input of a new action template; the id is allocated on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActionTemplate {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
}

/// Input of a new action list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewActionList {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub business_lines: BTreeSet<BusinessLineId>,
    #[serde(default)]
    pub actions: Vec<ActionTemplateId>,
}

/// Registered templates and lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCatalog {
    templates: BTreeMap<ActionTemplateId, ActionTemplate>,
    lists: BTreeMap<ActionListId, ActionList>,
    next_template_id: u64,
    next_list_id: u64,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Malformed `{{ }}` expressions are rejected here
    /// rather than when an incident is created.
    pub fn add_template(
        &mut self,
        template: NewActionTemplate,
    ) -> Result<ActionTemplateId, TemplateError> {
        render::validate(&template.subject)?;
        render::validate(&template.description)?;
        self.next_template_id += 1;
        let id = ActionTemplateId(self.next_template_id);
        self.templates.insert(
            id,
            ActionTemplate {
                id,
                action_type: template.action_type,
                subject: template.subject,
                description: template.description,
                business_line: template.business_line,
            },
        );
        Ok(id)
    }

    pub fn add_list(&mut self, list: NewActionList) -> ActionListId {
        self.next_list_id += 1;
        let id = ActionListId(self.next_list_id);
        self.lists.insert(
            id,
            ActionList {
                id,
                name: list.name,
                category: list.category,
                detection: list.detection,
                plan: list.plan,
                business_lines: list.business_lines,
                actions: list.actions,
            },
        );
        id
    }

    pub fn template(&self, id: ActionTemplateId) -> Option<&ActionTemplate> {
        self.templates.get(&id)
    }

    pub fn list(&self, id: ActionListId) -> Option<&ActionList> {
        self.lists.get(&id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &ActionTemplate> {
        self.templates.values()
    }

    pub fn lists(&self) -> impl Iterator<Item = &ActionList> {
        self.lists.values()
    }

    /// Lists applicable to an incident concerning `business_line`.
    ///
    /// Matches at `business_line` come first, then its parent's, up to the
    /// root. A list matched at several levels is kept at its first position.
    pub fn resolve(
        &self,
        category: Option<&str>,
        detection: Option<&str>,
        plan: Option<&str>,
        business_line: BusinessLineId,
        business_lines: &BusinessLineTree,
    ) -> Vec<&ActionList> {
        let lineage: Vec<BusinessLineId> = match business_lines.get(business_line) {
            Some(bl) => bl.lineage().collect(),
            None => vec![business_line],
        };

        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();
        for level in lineage {
            for list in self.lists.values() {
                if list.matches(category, detection, plan, level) && seen.insert(list.id) {
                    resolved.push(list);
                }
            }
        }
        debug!(
            business_line = business_line.get(),
            lists = resolved.len(),
            "Resolved action lists"
        );
        resolved
    }

    /// Render every template of every list resolved for every concerned
    /// business line of `incident` into new `created` actions.
    ///
    /// Actions are owned by the concerned business line they were resolved
    /// for and opened by the incident's opener.
    pub fn instantiate(
        &self,
        incident: &Incident,
        business_lines: &BusinessLineTree,
        next_action_id: &mut dyn FnMut() -> ActionId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Action>, TemplateError> {
        let ctx = serde_json::json!({ "incident": incident.template_context() });
        let mut actions = Vec::new();

        for &business_line in &incident.concerned_business_lines {
            let lists = self.resolve(
                incident.category.as_deref(),
                incident.detection.as_deref(),
                incident.plan.as_deref(),
                business_line,
                business_lines,
            );
            for list in lists {
                for template in list.actions.iter().filter_map(|id| self.templates.get(id)) {
                    actions.push(Action {
                        id: next_action_id(),
                        action_type: template.action_type,
                        subject: render::render_string(&template.subject, &ctx)?,
                        description: render::render_string(&template.description, &ctx)?,
                        state: ActionState::Created,
                        auto_state: false,
                        opened_by: incident.opened_by.clone(),
                        opened_on: now,
                        business_line: Some(business_line),
                        incident: Some(incident.id),
                    });
                }
            }
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IncidentId;
    use pretty_assertions::assert_eq;

    fn tree() -> (BusinessLineTree, BusinessLineId, BusinessLineId, BusinessLineId) {
        let mut tree = BusinessLineTree::new();
        let c = tree.add("Group", None).unwrap();
        let b = tree.add("Retail", Some(c)).unwrap();
        let a = tree.add("Retail Paris", Some(b)).unwrap();
        (tree, a, b, c)
    }

    fn template(catalog: &mut TemplateCatalog, subject: &str) -> ActionTemplateId {
        catalog
            .add_template(NewActionTemplate {
                action_type: ActionType::Investigation,
                subject: subject.into(),
                description: String::new(),
                business_line: None,
            })
            .unwrap()
    }

    fn list_for(
        catalog: &mut TemplateCatalog,
        name: &str,
        bl: Option<BusinessLineId>,
        actions: Vec<ActionTemplateId>,
    ) -> ActionListId {
        catalog.add_list(NewActionList {
            name: name.into(),
            business_lines: bl.into_iter().collect(),
            actions,
            ..NewActionList::default()
        })
    }

    fn incident(concerned: BusinessLineId) -> Incident {
        Incident {
            id: IncidentId(3),
            subject: "Credential leak".into(),
            description: "Passwords posted on a paste site".into(),
            category: Some("leak".into()),
            detection: None,
            plan: None,
            concerned_business_lines: BTreeSet::from([concerned]),
            opened_by: "alice".into(),
            opened_on: Utc::now(),
        }
    }

    #[test]
    fn test_resolution_walks_up_the_hierarchy() {
        let (bls, a, b, c) = tree();
        let mut catalog = TemplateCatalog::new();
        let root_list = list_for(&mut catalog, "root", Some(c), vec![]);
        let mid_list = list_for(&mut catalog, "mid", Some(b), vec![]);
        let leaf_list = list_for(&mut catalog, "leaf", Some(a), vec![]);

        let ids: Vec<_> = catalog
            .resolve(None, None, None, a, &bls)
            .iter()
            .map(|list| list.id)
            .collect();
        assert_eq!(ids, vec![leaf_list, mid_list, root_list]);
    }

    #[test]
    fn test_wildcard_list_is_not_duplicated() {
        let (bls, a, _, _) = tree();
        let mut catalog = TemplateCatalog::new();
        let any = list_for(&mut catalog, "any", None, vec![]);

        let resolved = catalog.resolve(None, None, None, a, &bls);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, any);
    }

    #[test]
    fn test_category_must_match_when_set() {
        let (bls, a, _, _) = tree();
        let mut catalog = TemplateCatalog::new();
        catalog.add_list(NewActionList {
            name: "phishing only".into(),
            category: Some("phishing".into()),
            ..NewActionList::default()
        });

        assert!(catalog.resolve(Some("leak"), None, None, a, &bls).is_empty());
        assert!(catalog.resolve(None, None, None, a, &bls).is_empty());
        assert_eq!(catalog.resolve(Some("phishing"), None, None, a, &bls).len(), 1);
    }

    #[test]
    fn test_instantiate_renders_and_orders_actions() {
        let (bls, a, b, _) = tree();
        let mut catalog = TemplateCatalog::new();
        let leaf_t = template(&mut catalog, "Reset passwords for {{ incident.subject }}");
        let mid_t = template(&mut catalog, "Notify legal about #{{ incident.id }}");
        list_for(&mut catalog, "mid", Some(b), vec![mid_t]);
        list_for(&mut catalog, "leaf", Some(a), vec![leaf_t]);

        let mut next = 0;
        let mut ids = || {
            next += 1;
            ActionId(next)
        };
        let actions = catalog
            .instantiate(&incident(a), &bls, &mut ids, Utc::now())
            .unwrap();

        let subjects: Vec<_> = actions.iter().map(|a| a.subject.as_str()).collect();
        assert_eq!(
            subjects,
            vec!["Reset passwords for Credential leak", "Notify legal about #3"]
        );
        for action in &actions {
            assert_eq!(action.state, ActionState::Created);
            assert!(!action.auto_state);
            assert_eq!(action.business_line, Some(a));
            assert_eq!(action.opened_by, "alice");
            assert_eq!(action.incident, Some(IncidentId(3)));
        }
    }

    #[test]
    fn test_malformed_template_rejected() {
        let mut catalog = TemplateCatalog::new();
        let err = catalog
            .add_template(NewActionTemplate {
                action_type: ActionType::Other,
                subject: "Broken {{ incident.subject".into(),
                description: String::new(),
                business_line: None,
            })
            .unwrap_err();
        assert!(matches!(err, TemplateError::Unclosed { .. }));
    }

    #[test]
    fn test_template_display() {
        let (bls, a, _, _) = tree();
        let template = ActionTemplate {
            id: ActionTemplateId(1),
            action_type: ActionType::Alerting,
            subject: "Warn the SOC".into(),
            description: String::new(),
            business_line: Some(a),
        };
        assert_eq!(template.describe(&bls), "[Alerting] Warn the SOC - Retail Paris");

        let unowned = ActionTemplate {
            business_line: None,
            ..template
        };
        assert_eq!(unowned.describe(&bls), "[Alerting] Warn the SOC");
    }
}
