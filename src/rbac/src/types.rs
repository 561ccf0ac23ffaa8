//! Core RBAC entity types

use crate::constraint::Constraint;
use crate::error::{RbacError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// Opaque tenant identifier passed through every operation
pub type TenantId = String;

/// User identifier
pub type UserId = String;

/// Hierarchy a graph belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyKind {
    /// RBAC roles
    Role,
    /// Administrative roles
    AdminRole,
    /// User organizational units
    UserOu,
    /// Permission organizational units
    PermOu,
}

impl HierarchyKind {
    /// All hierarchy kinds
    pub const ALL: [HierarchyKind; 4] = [
        HierarchyKind::Role,
        HierarchyKind::AdminRole,
        HierarchyKind::UserOu,
        HierarchyKind::PermOu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "ROLE",
            Self::AdminRole => "ADMIN_ROLE",
            Self::UserOu => "USER_OU",
            Self::PermOu => "PERM_OU",
        }
    }
}

impl fmt::Display for HierarchyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchy edge: `child` inherits from `parent`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub child: String,
    pub parent: String,
}

impl Relationship {
    pub fn new(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }
}

/// Separation-of-duty set kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SdKind {
    /// Enforced when roles are assigned
    Static,
    /// Enforced when roles are activated in a session
    Dynamic,
}

impl fmt::Display for SdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => f.write_str("STATIC"),
            Self::Dynamic => f.write_str("DYNAMIC"),
        }
    }
}

/// Separation-of-duty set
///
/// No principal may hold `cardinality` or more of `members` at once,
/// counting roles inherited through the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdSet {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub kind: SdKind,

    pub members: BTreeSet<String>,

    pub cardinality: usize,
}

impl SdSet {
    pub fn new<I, S>(name: impl Into<String>, kind: SdKind, members: I, cardinality: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            members: members.into_iter().map(Into::into).collect(),
            cardinality,
        }
    }

    /// Validate the set definition
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RbacError::InvalidInput(
                "SoD set name cannot be empty".to_string(),
            ));
        }

        if self.cardinality < 2 {
            return Err(RbacError::InvalidInput(format!(
                "SoD set '{}' cardinality must be at least 2, got {}",
                self.name, self.cardinality
            )));
        }

        if self.cardinality > self.members.len() {
            return Err(RbacError::InvalidInput(format!(
                "SoD set '{}' cardinality {} exceeds its {} members",
                self.name,
                self.cardinality,
                self.members.len()
            )));
        }

        Ok(())
    }

    /// Members of this set present in `closure`, sorted
    pub fn matching(&self, closure: &HashSet<String>) -> Vec<String> {
        self.members
            .iter()
            .filter(|member| closure.contains(*member))
            .cloned()
            .collect()
    }

    /// True if holding `closure` breaks this set
    pub fn is_violated_by(&self, closure: &HashSet<String>) -> bool {
        self.members.iter().filter(|m| closure.contains(*m)).count() >= self.cardinality
    }
}

/// RBAC role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Materialized parent names; the hierarchy graph is authoritative
    #[serde(default)]
    pub parents: BTreeSet<String>,

    /// Materialized child names
    #[serde(default)]
    pub children: BTreeSet<String>,

    /// Default temporal policy for assignments of this role
    #[serde(default)]
    pub constraint: Constraint,

    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            constraint: Constraint::new(name.clone()),
            name,
            description: String::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            props: BTreeMap::new(),
        }
    }

    /// Replace the role constraint, keeping the role name on it
    pub fn with_constraint(mut self, mut constraint: Constraint) -> Self {
        constraint.name = self.name.clone();
        self.constraint = constraint;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.insert(parent.into());
        self
    }
}

/// Administrative role with its delegated administration range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRole {
    #[serde(flatten)]
    pub role: Role,

    /// User OUs this role administers
    #[serde(default)]
    pub os_u: BTreeSet<String>,

    /// Permission OUs this role administers
    #[serde(default)]
    pub os_p: BTreeSet<String>,

    /// Junior end of the administered role range
    #[serde(default)]
    pub begin_range: Option<String>,

    /// Senior end of the administered role range
    #[serde(default)]
    pub end_range: Option<String>,

    #[serde(default)]
    pub begin_inclusive: bool,

    #[serde(default)]
    pub end_inclusive: bool,
}

impl AdminRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            role: Role::new(name),
            os_u: BTreeSet::new(),
            os_p: BTreeSet::new(),
            begin_range: None,
            end_range: None,
            begin_inclusive: false,
            end_inclusive: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.role.name
    }

    /// Set the administered role range
    pub fn with_range(
        mut self,
        begin: impl Into<String>,
        begin_inclusive: bool,
        end: impl Into<String>,
        end_inclusive: bool,
    ) -> Self {
        self.begin_range = Some(begin.into());
        self.begin_inclusive = begin_inclusive;
        self.end_range = Some(end.into());
        self.end_inclusive = end_inclusive;
        self
    }

    pub fn with_user_ou(mut self, ou: impl Into<String>) -> Self {
        self.os_u.insert(ou.into());
        self
    }

    pub fn with_perm_ou(mut self, ou: impl Into<String>) -> Self {
        self.os_p.insert(ou.into());
        self
    }
}

/// Organizational unit for users or permissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub name: String,

    /// Either `UserOu` or `PermOu`
    pub kind: HierarchyKind,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub parents: BTreeSet<String>,

    #[serde(default)]
    pub children: BTreeSet<String>,
}

impl OrgUnit {
    pub fn new(name: impl Into<String>, kind: HierarchyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.insert(parent.into());
        self
    }
}

/// Directory user as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,

    /// Directory-internal identifier
    pub internal_id: String,

    /// User organizational unit
    #[serde(default)]
    pub ou: String,

    /// User-level temporal policy; a failure here aborts session creation
    #[serde(default)]
    pub constraint: Constraint,
}

impl User {
    pub fn new(user_id: impl Into<String>, ou: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            internal_id: uuid::Uuid::new_v4().to_string(),
            constraint: Constraint::new(user_id.clone()),
            user_id,
            ou: ou.into(),
        }
    }

    pub fn with_constraint(mut self, mut constraint: Constraint) -> Self {
        constraint.name = self.user_id.clone();
        self.constraint = constraint;
        self
    }
}

/// A user's assignment to a role, with per-assignment constraint overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: UserId,

    /// Role name
    pub name: String,

    /// Override; unset fields inherit from the role's constraint
    #[serde(default)]
    pub constraint: Constraint,

    /// Parent snapshot for display, not authoritative
    #[serde(default)]
    pub parents: BTreeSet<String>,
}

impl UserRole {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            user_id: user_id.into(),
            constraint: Constraint::new(name.clone()),
            name,
            parents: BTreeSet::new(),
        }
    }

    pub fn with_constraint(mut self, mut constraint: Constraint) -> Self {
        constraint.name = self.name.clone();
        self.constraint = constraint;
        self
    }
}

/// Assignment to an administrative role
pub type UserAdminRole = UserRole;

/// Operation on an object, granted to roles and users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub object_name: String,

    pub op_name: String,

    #[serde(default)]
    pub roles: BTreeSet<String>,

    #[serde(default)]
    pub users: BTreeSet<UserId>,

    /// Administrative permission, granted to admin roles
    #[serde(default)]
    pub admin: bool,

    /// Permission organizational unit of the object
    #[serde(default)]
    pub ou: Option<String>,
}

impl Permission {
    pub fn new(object_name: impl Into<String>, op_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            op_name: op_name.into(),
            roles: BTreeSet::new(),
            users: BTreeSet::new(),
            admin: false,
            ou: None,
        }
    }

    pub fn granted_to_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn granted_to_user(mut self, user: impl Into<String>) -> Self {
        self.users.insert(user.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn in_ou(mut self, ou: impl Into<String>) -> Self {
        self.ou = Some(ou.into());
        self
    }

    /// Lookup key, `object.op`
    pub fn key(&self) -> String {
        format!("{}.{}", self.object_name, self.op_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sd_set_validation() {
        let set = SdSet::new("bank", SdKind::Dynamic, ["Teller", "Auditor"], 2);
        assert!(set.validate().is_ok());

        let set = SdSet::new("bank", SdKind::Dynamic, ["Teller", "Auditor"], 1);
        assert!(set.validate().is_err());

        let set = SdSet::new("bank", SdKind::Static, ["Teller", "Auditor"], 3);
        assert!(set.validate().is_err());

        let set = SdSet::new("", SdKind::Static, ["Teller", "Auditor"], 2);
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_sd_set_matching() {
        let set = SdSet::new("bank", SdKind::Dynamic, ["Teller", "Auditor", "Clerk"], 2);
        let closure: HashSet<String> = ["Teller", "Clerk", "Guest"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(set.matching(&closure), vec!["Clerk", "Teller"]);
        assert!(set.is_violated_by(&closure));

        let closure: HashSet<String> = ["Teller"].iter().map(|s| s.to_string()).collect();
        assert!(!set.is_violated_by(&closure));
    }

    #[test]
    fn test_role_constraint_named_after_role() {
        let role = Role::new("Teller").with_constraint(Constraint::new("other"));
        assert_eq!(role.constraint.name, "Teller");

        let assignment = UserRole::new("alice", "Teller");
        assert_eq!(assignment.constraint.name, "Teller");
    }

    #[test]
    fn test_hierarchy_kind_serde() {
        let json = serde_json::to_string(&HierarchyKind::AdminRole).unwrap();
        assert_eq!(json, "\"ADMIN_ROLE\"");
        assert_eq!(HierarchyKind::PermOu.to_string(), "PERM_OU");
    }
}
