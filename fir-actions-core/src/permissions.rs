//! Permission oracle: answers whether a user may perform an operation on a
//! business-line scope.
//!
//! Grants on a business line are inherited by every descendant line. A
//! transition with no scope (an action without a business line, a location
//! without one) is only allowed through a global grant.

use crate::business_line::BusinessLine;
use crate::types::BusinessLineId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permissions consulted by transition guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "incidents.handle_incidents")]
    HandleIncidents,
    #[serde(rename = "incidents.view_incidents")]
    ViewIncidents,
    #[serde(rename = "fir_actions.can_approve_block")]
    CanApproveBlock,
    #[serde(rename = "fir_actions.can_enforce_block")]
    CanEnforceBlock,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::HandleIncidents,
        Permission::ViewIncidents,
        Permission::CanApproveBlock,
        Permission::CanEnforceBlock,
    ];

    pub fn codename(&self) -> &'static str {
        match self {
            Permission::HandleIncidents => "incidents.handle_incidents",
            Permission::ViewIncidents => "incidents.view_incidents",
            Permission::CanApproveBlock => "fir_actions.can_approve_block",
            Permission::CanEnforceBlock => "fir_actions.can_enforce_block",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codename())
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    /// Accepts the full codename or the part after the app prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| {
                let code = p.codename();
                code == s || code.split_once('.').map(|(_, short)| short) == Some(s)
            })
            .ok_or_else(|| format!("unknown permission '{s}'"))
    }
}

/// A permission held by a user, globally or on a business line subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub permission: Permission,
    /// `None` grants the permission everywhere.
    #[serde(default)]
    pub business_line: Option<BusinessLineId>,
}

impl Grant {
    pub fn global(permission: Permission) -> Self {
        Self {
            permission,
            business_line: None,
        }
    }

    pub fn on(permission: Permission, business_line: BusinessLineId) -> Self {
        Self {
            permission,
            business_line: Some(business_line),
        }
    }
}

/// An acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            is_superuser: false,
            grants: Vec::new(),
        }
    }

    pub fn superuser(username: impl Into<String>) -> Self {
        Self {
            is_superuser: true,
            ..Self::new(username)
        }
    }

    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// Answers whether `user` may exercise `permission` on `scope`.
///
/// Implementations must be side-effect free.
pub trait PermissionOracle: Send + Sync {
    fn allowed(&self, user: &User, permission: Permission, scope: Option<&BusinessLine>) -> bool;
}

/// Default oracle: superusers pass, global grants pass, and a grant on a
/// business line covers that line and all of its descendants.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeAuthorization;

impl PermissionOracle for TreeAuthorization {
    fn allowed(&self, user: &User, permission: Permission, scope: Option<&BusinessLine>) -> bool {
        if user.is_superuser {
            return true;
        }
        user.grants
            .iter()
            .filter(|grant| grant.permission == permission)
            .any(|grant| match (grant.business_line, scope) {
                (None, _) => true,
                (Some(granted), Some(line)) => line.is_within(granted),
                (Some(_), None) => false,
            })
    }
}
