//! Sessions and session authorization
//!
//! A session holds the roles a user activated at logon, each carrying its
//! effective constraint (assignment override merged over the role default)
//! so later checks re-validate without re-reading the directory.

pub mod authorizer;

pub use authorizer::SessionAuthorizer;

use crate::error::ConstraintViolation;
use crate::store::AuthWarning;
use crate::types::{TenantId, UserAdminRole, UserId, UserRole};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a role was left out of, or removed from, a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// The role's effective constraint failed
    Constraint(ConstraintViolation),
    /// Requested but not assigned to the user
    NotAssigned,
}

/// A role excluded from a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedRole {
    pub name: String,

    /// Administrative role. Always false for `NotAssigned`, since the name
    /// matched no assignment of either kind.
    pub admin: bool,

    pub reason: DropReason,
}

/// Logon request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub tenant: TenantId,

    pub user_id: UserId,

    /// `None` for a trusted logon that skips authentication
    pub credential: Option<String>,

    /// Roles to activate; `None` activates every assigned role
    pub roles: Option<Vec<String>>,
}

impl SessionRequest {
    /// Logon authenticated with a password
    pub fn with_password(
        tenant: impl Into<TenantId>,
        user_id: impl Into<UserId>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            user_id: user_id.into(),
            credential: Some(password.into()),
            roles: None,
        }
    }

    /// Logon by a trusted caller, no credential check
    pub fn trusted(tenant: impl Into<TenantId>, user_id: impl Into<UserId>) -> Self {
        Self {
            tenant: tenant.into(),
            user_id: user_id.into(),
            credential: None,
            roles: None,
        }
    }

    /// Activate only the named roles
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn requests(&self, role: &str) -> bool {
        self.roles
            .as_ref()
            .map_or(true, |roles| roles.iter().any(|r| r == role))
    }
}

/// Authenticated user session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,

    pub tenant: TenantId,

    pub user_id: UserId,

    /// Directory-internal user id
    pub internal_id: String,

    /// Active RBAC roles in activation order
    pub roles: Vec<UserRole>,

    /// Active administrative roles in activation order
    pub admin_roles: Vec<UserAdminRole>,

    /// Last time the session was used; drives timeout checks
    pub last_access: NaiveDateTime,

    /// False for trusted logons
    pub authenticated: bool,

    #[serde(default)]
    pub warnings: Vec<AuthWarning>,

    /// Roles left out at logon or pruned later
    #[serde(default)]
    pub dropped: Vec<DroppedRole>,
}

impl Session {
    pub fn session_roles(&self) -> &[UserRole] {
        &self.roles
    }

    pub fn session_admin_roles(&self) -> &[UserAdminRole] {
        &self.admin_roles
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|r| r.name.as_str())
    }

    pub fn admin_role_names(&self) -> impl Iterator<Item = &str> {
        self.admin_roles.iter().map(|r| r.name.as_str())
    }

    /// True if `role` is directly active
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.name == role)
    }

    pub fn has_admin_role(&self, role: &str) -> bool {
        self.admin_roles.iter().any(|r| r.name == role)
    }
}
