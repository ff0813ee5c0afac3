//! Incidents as seen by the actions engine.
//!
//! The incident itself is owned by the surrounding application; this crate
//! only needs its classification (category, detection, plan) and the set of
//! concerned business lines, which `assign` may extend.

use crate::types::{BusinessLineId, IncidentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub concerned_business_lines: BTreeSet<BusinessLineId>,
    pub opened_by: String,
    pub opened_on: DateTime<Utc>,
}

impl Incident {
    /// Link a business line; returns `true` when it was not linked yet.
    pub fn concern(&mut self, business_line: BusinessLineId) -> bool {
        self.concerned_business_lines.insert(business_line)
    }

    pub fn concerns(&self, business_line: BusinessLineId) -> bool {
        self.concerned_business_lines.contains(&business_line)
    }

    /// Template rendering context exposed as `{{ incident.* }}`.
    pub fn template_context(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.get(),
            "subject": self.subject,
            "description": self.description,
            "category": self.category,
            "detection": self.detection,
            "plan": self.plan,
            "opened_by": self.opened_by,
            "opened_on": self.opened_on.format("%Y-%m-%d %H:%M").to_string(),
        })
    }
}

/// Request to register a new incident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewIncident {
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub concerned_business_lines: BTreeSet<BusinessLineId>,
}
