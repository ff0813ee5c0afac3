//! TOML fixtures for reference data.
//!
//! A fixture names things instead of numbering them: business lines refer to
//! their parent by name, grants and locations to business lines, lists to
//! templates by key. [`Fixture::apply`] resolves the names against the
//! store as it goes.
//!
//! ```toml
//! [[business_lines]]
//! name = "Group"
//!
//! [[business_lines]]
//! name = "Retail"
//! parent = "Group"
//!
//! [[users]]
//! username = "alice"
//! grants = [{ permission = "handle_incidents", business_line = "Retail" }]
//!
//! [[block_types]]
//! name = "Firewall rule"
//!
//! [[locations]]
//! name = "Edge firewall"
//! business_line = "Group"
//! types = ["Firewall rule"]
//!
//! [[templates]]
//! key = "reset"
//! type = "countermeasure"
//! subject = "Reset credentials for {{ incident.subject }}"
//!
//! [[action_lists]]
//! name = "Leaks"
//! category = "leak"
//! business_lines = ["Retail"]
//! actions = ["reset"]
//! ```

use crate::action::ActionType;
use crate::error::{FirError, FixtureError};
use crate::permissions::{Grant, Permission, User};
use crate::store::Store;
use crate::templates::{NewActionList, NewActionTemplate};
use crate::types::{ActionTemplateId, BusinessLineId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub business_lines: Vec<BusinessLineSpec>,
    pub users: Vec<UserSpec>,
    pub block_types: Vec<BlockTypeSpec>,
    pub locations: Vec<LocationSpec>,
    pub templates: Vec<TemplateSpec>,
    pub action_lists: Vec<ActionListSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessLineSpec {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    #[serde(default)]
    pub superuser: bool,
    #[serde(default)]
    pub grants: Vec<GrantSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSpec {
    /// Codename, full (`incidents.view_incidents`) or short.
    pub permission: String,
    /// Business line name; omitted for a global grant.
    #[serde(default)]
    pub business_line: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTypeSpec {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSpec {
    pub name: String,
    #[serde(default)]
    pub business_line: Option<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Name used by `action_lists` to refer to this template.
    pub key: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub business_line: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionListSpec {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub business_lines: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Counts of what a fixture added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureReport {
    pub business_lines: usize,
    pub users: usize,
    pub block_types: usize,
    pub locations: usize,
    pub templates: usize,
    pub action_lists: usize,
}

impl Fixture {
    pub fn from_toml(source: &str) -> Result<Self, FixtureError> {
        toml::from_str(source).map_err(|e| FixtureError::Parse {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, FirError> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&source)?)
    }

    /// Add everything to `store`, in declaration order.
    ///
    /// On error `store` may be partially updated; apply to a copy when that
    /// matters.
    pub fn apply(&self, store: &mut Store) -> Result<FixtureReport, FirError> {
        let mut report = FixtureReport::default();

        for spec in &self.business_lines {
            if store.business_lines.find_by_name(&spec.name).is_some() {
                return Err(duplicate("business line", &spec.name));
            }
            let parent = spec
                .parent
                .as_deref()
                .map(|name| business_line(store, name))
                .transpose()?;
            store.business_lines.add(&spec.name, parent)?;
            report.business_lines += 1;
        }

        for spec in &self.users {
            if store.users.contains_key(&spec.username) {
                return Err(duplicate("user", &spec.username));
            }
            let mut user = User::new(&spec.username);
            user.is_superuser = spec.superuser;
            for grant in &spec.grants {
                let permission: Permission =
                    grant.permission.parse().map_err(|_| FixtureError::UnknownReference {
                        kind: "permission",
                        name: grant.permission.clone(),
                    })?;
                let scope = grant
                    .business_line
                    .as_deref()
                    .map(|name| business_line(store, name))
                    .transpose()?;
                user.grants.push(Grant {
                    permission,
                    business_line: scope,
                });
            }
            store.put_user(user);
            report.users += 1;
        }

        for spec in &self.block_types {
            if store.find_block_type(&spec.name).is_some() {
                return Err(duplicate("block type", &spec.name));
            }
            store.add_block_type(&spec.name);
            report.block_types += 1;
        }

        for spec in &self.locations {
            if store.find_location(&spec.name).is_some() {
                return Err(duplicate("block location", &spec.name));
            }
            let scope = spec
                .business_line
                .as_deref()
                .map(|name| business_line(store, name))
                .transpose()?;
            let types = spec
                .types
                .iter()
                .map(|name| {
                    store
                        .find_block_type(name)
                        .map(|t| t.id)
                        .ok_or_else(|| unknown("block type", name))
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            store.add_location(&spec.name, scope, types)?;
            report.locations += 1;
        }

        let mut keys: BTreeMap<&str, ActionTemplateId> = BTreeMap::new();
        for spec in &self.templates {
            if keys.contains_key(spec.key.as_str()) {
                return Err(duplicate("template", &spec.key));
            }
            let scope = spec
                .business_line
                .as_deref()
                .map(|name| business_line(store, name))
                .transpose()?;
            let id = store.templates.add_template(NewActionTemplate {
                action_type: spec.action_type,
                subject: spec.subject.clone(),
                description: spec.description.clone(),
                business_line: scope,
            })?;
            keys.insert(&spec.key, id);
            report.templates += 1;
        }

        for spec in &self.action_lists {
            let business_lines = spec
                .business_lines
                .iter()
                .map(|name| business_line(store, name))
                .collect::<Result<BTreeSet<_>, _>>()?;
            let actions = spec
                .actions
                .iter()
                .map(|key| {
                    keys.get(key.as_str())
                        .copied()
                        .ok_or_else(|| unknown("template", key))
                })
                .collect::<Result<Vec<_>, _>>()?;
            store.templates.add_list(NewActionList {
                name: spec.name.clone(),
                category: spec.category.clone(),
                detection: spec.detection.clone(),
                plan: spec.plan.clone(),
                business_lines,
                actions,
            });
            report.action_lists += 1;
        }

        Ok(report)
    }
}

fn business_line(store: &Store, name: &str) -> Result<BusinessLineId, FixtureError> {
    store
        .business_lines
        .find_by_name(name)
        .map(|bl| bl.id)
        .ok_or_else(|| unknown("business line", name))
}

fn unknown(kind: &'static str, name: &str) -> FixtureError {
    FixtureError::UnknownReference {
        kind,
        name: name.to_string(),
    }
}

fn duplicate(kind: &'static str, name: &str) -> FirError {
    FixtureError::Duplicate {
        kind,
        name: name.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionOracle, TreeAuthorization};

    const SAMPLE: &str = r#"
[[business_lines]]
name = "Group"

[[business_lines]]
name = "Retail"
parent = "Group"

[[users]]
username = "alice"
grants = [
  { permission = "handle_incidents", business_line = "Retail" },
  { permission = "incidents.view_incidents" },
]

[[block_types]]
name = "Firewall rule"

[[locations]]
name = "Edge firewall"
business_line = "Group"
types = ["Firewall rule"]

[[templates]]
key = "reset"
type = "countermeasure"
subject = "Reset credentials for {{ incident.subject }}"

[[action_lists]]
name = "Leaks"
category = "leak"
business_lines = ["Retail"]
actions = ["reset"]
"#;

    #[test]
    fn test_apply_sample() {
        let fixture = Fixture::from_toml(SAMPLE).unwrap();
        let mut store = Store::new();
        let report = fixture.apply(&mut store).unwrap();

        assert_eq!(
            report,
            FixtureReport {
                business_lines: 2,
                users: 1,
                block_types: 1,
                locations: 1,
                templates: 1,
                action_lists: 1,
            }
        );
        let retail = store.business_lines.find_by_name("retail").unwrap();
        assert_eq!(retail.ancestry.len(), 1);

        let alice = store.user("alice").unwrap();
        assert!(TreeAuthorization.allowed(alice, Permission::HandleIncidents, Some(retail)));
        assert!(TreeAuthorization.allowed(alice, Permission::ViewIncidents, None));

        let location = store.find_location("Edge firewall").unwrap();
        assert_eq!(location.types.len(), 1);
        assert_eq!(store.templates.lists().count(), 1);
    }

    #[test]
    fn test_unknown_parent() {
        let fixture = Fixture::from_toml(
            r#"
[[business_lines]]
name = "Retail"
parent = "Nowhere"
"#,
        )
        .unwrap();
        let err = fixture.apply(&mut Store::new()).unwrap_err();
        assert!(matches!(
            err,
            FirError::Fixture(FixtureError::UnknownReference {
                kind: "business line",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_user() {
        let fixture = Fixture::from_toml(
            r#"
[[users]]
username = "bob"

[[users]]
username = "bob"
"#,
        )
        .unwrap();
        let err = fixture.apply(&mut Store::new()).unwrap_err();
        assert!(matches!(
            err,
            FirError::Fixture(FixtureError::Duplicate { kind: "user", .. })
        ));
    }

    #[test]
    fn test_unknown_permission() {
        let fixture = Fixture::from_toml(
            r#"
[[users]]
username = "bob"
grants = [{ permission = "launch_missiles" }]
"#,
        )
        .unwrap();
        assert!(fixture.apply(&mut Store::new()).is_err());
    }

    #[test]
    fn test_parse_error() {
        let err = Fixture::from_toml("[[users]\nusername = ").unwrap_err();
        assert!(matches!(err, FixtureError::Parse { .. }));
    }
}
