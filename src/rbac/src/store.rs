//! Directory collaborator contracts and an in-memory implementation

use crate::codec::{encode_properties, parse_properties, parse_relationships};
use crate::constraint::Constraint;
use crate::error::{EntityKind, RbacError, Result};
use crate::types::{
    AdminRole, HierarchyKind, OrgUnit, Permission, Relationship, Role, SdKind, SdSet, TenantId,
    User, UserAdminRole, UserRole,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Warning attached to a successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthWarning {
    /// Password expires soon
    PasswordExpiring { seconds_remaining: u64 },
    /// Password expired; grace logins left
    GraceLogins { remaining: u32 },
    /// Password must be changed
    PasswordReset,
}

/// Result of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    /// Directory-internal user id
    pub internal_id: String,

    #[serde(default)]
    pub warnings: Vec<AuthWarning>,
}

/// Credential verification collaborator
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a credential; fails with [`RbacError::Authentication`]
    async fn authenticate(
        &self,
        user_id: &str,
        credential: &str,
        tenant: &str,
    ) -> Result<Authentication>;
}

/// Directory persistence collaborator
///
/// Reads return owned entities; failures of the backing store surface as
/// [`RbacError::Collaborator`], missing entities as [`RbacError::NotFound`].
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Full edge list of one hierarchy
    async fn read_hier(&self, kind: HierarchyKind, tenant: &str) -> Result<Vec<Relationship>>;

    /// All SoD sets of one kind
    async fn read_sd_sets(&self, kind: SdKind, tenant: &str) -> Result<Vec<SdSet>>;

    /// SoD sets of one kind that list `role` as a member
    async fn find_sd_sets_for_role(
        &self,
        role: &str,
        kind: SdKind,
        tenant: &str,
    ) -> Result<Vec<SdSet>> {
        let sets = self.read_sd_sets(kind, tenant).await?;
        Ok(sets
            .into_iter()
            .filter(|set| set.members.contains(role))
            .collect())
    }

    async fn read_user(&self, user_id: &str, tenant: &str) -> Result<User>;

    async fn read_role(&self, name: &str, tenant: &str) -> Result<Role>;

    async fn read_admin_role(&self, name: &str, tenant: &str) -> Result<AdminRole>;

    async fn read_assigned_roles(&self, user_id: &str, tenant: &str) -> Result<Vec<UserRole>>;

    async fn read_assigned_admin_roles(
        &self,
        user_id: &str,
        tenant: &str,
    ) -> Result<Vec<UserAdminRole>>;

    async fn read_permission(&self, object_name: &str, op_name: &str, tenant: &str)
        -> Result<Permission>;

    async fn add_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()>;

    async fn remove_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()>;

    async fn assign_role(&self, tenant: &str, assignment: &UserRole) -> Result<()>;

    async fn deassign_role(&self, tenant: &str, user_id: &str, role: &str) -> Result<()>;

    /// Create or replace a SoD set
    async fn write_sd_set(&self, tenant: &str, set: &SdSet) -> Result<()>;

    /// Remove a SoD set, returning it
    async fn remove_sd_set(&self, tenant: &str, name: &str) -> Result<SdSet>;
}

/// Role as held by the directory: constraint and properties in raw form
#[derive(Debug, Clone)]
struct StoredRole {
    description: String,
    raw_constraint: String,
    raw_props: Vec<String>,
}

impl StoredRole {
    fn from_role(role: &Role) -> Self {
        Self {
            description: role.description.clone(),
            raw_constraint: role.constraint.encode(),
            raw_props: encode_properties(&role.props),
        }
    }

    fn to_role(&self, name: &str) -> Result<Role> {
        let mut constraint = Constraint::new(name);
        constraint.decode_into(&self.raw_constraint)?;

        let mut role = Role::new(name);
        role.description = self.description.clone();
        role.constraint = constraint;
        role.props = parse_properties(&self.raw_props);
        Ok(role)
    }
}

#[derive(Debug, Default)]
struct TenantData {
    /// Raw `child:parent` values per hierarchy
    hierarchies: HashMap<HierarchyKind, Vec<String>>,
    users: HashMap<String, User>,
    credentials: HashMap<String, [u8; 32]>,
    roles: HashMap<String, StoredRole>,
    admin_roles: HashMap<String, AdminRole>,
    assignments: HashMap<String, Vec<UserRole>>,
    admin_assignments: HashMap<String, Vec<UserAdminRole>>,
    permissions: HashMap<(String, String), Permission>,
    sd_sets: HashMap<String, SdSet>,
}

impl TenantData {
    fn edges(&self, kind: HierarchyKind) -> Vec<Relationship> {
        self.hierarchies
            .get(&kind)
            .map(|raw| parse_relationships(raw))
            .unwrap_or_default()
    }

    fn push_edge(&mut self, kind: HierarchyKind, edge: &Relationship) {
        let raw = edge.encode();
        let values = self.hierarchies.entry(kind).or_default();
        if !values.contains(&raw) {
            values.push(raw);
        }
    }

    /// Fill the materialized parent/child view of a node
    fn neighbours(&self, kind: HierarchyKind, name: &str) -> (BTreeSet<String>, BTreeSet<String>) {
        let mut parents = BTreeSet::new();
        let mut children = BTreeSet::new();
        for edge in self.edges(kind) {
            if edge.child == name {
                parents.insert(edge.parent);
            } else if edge.parent == name {
                children.insert(edge.child);
            }
        }
        (parents, children)
    }
}

/// In-memory directory
///
/// Holds hierarchy edges, role constraints and role properties in their raw
/// attribute encodings, the way a directory server would. Suitable for
/// embedding and tests.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    tenants: Arc<RwLock<HashMap<TenantId, TenantData>>>,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a user, optionally with a password
    pub async fn put_user(&self, tenant: &str, user: User, password: Option<&str>) {
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        if let Some(password) = password {
            data.credentials
                .insert(user.user_id.clone(), *blake3::hash(password.as_bytes()).as_bytes());
        }
        data.users.insert(user.user_id.clone(), user);
    }

    /// Store a role; its parent names become role hierarchy edges
    pub async fn put_role(&self, tenant: &str, role: Role) -> Result<()> {
        role.constraint.validate()?;
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        for parent in &role.parents {
            data.push_edge(HierarchyKind::Role, &Relationship::new(&role.name, parent));
        }
        data.roles.insert(role.name.clone(), StoredRole::from_role(&role));
        Ok(())
    }

    /// Store an admin role; its parent names become admin hierarchy edges
    pub async fn put_admin_role(&self, tenant: &str, admin_role: AdminRole) -> Result<()> {
        admin_role.role.constraint.validate()?;
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        for parent in &admin_role.role.parents {
            data.push_edge(
                HierarchyKind::AdminRole,
                &Relationship::new(admin_role.name(), parent),
            );
        }
        data.admin_roles
            .insert(admin_role.name().to_string(), admin_role);
        Ok(())
    }

    /// Store an organizational unit's parent edges
    pub async fn put_org_unit(&self, tenant: &str, ou: OrgUnit) -> Result<()> {
        if !matches!(ou.kind, HierarchyKind::UserOu | HierarchyKind::PermOu) {
            return Err(RbacError::InvalidInput(format!(
                "Org unit '{}' has non-OU kind {}",
                ou.name, ou.kind
            )));
        }
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        for parent in &ou.parents {
            data.push_edge(ou.kind, &Relationship::new(&ou.name, parent));
        }
        Ok(())
    }

    pub async fn put_permission(&self, tenant: &str, permission: Permission) {
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        data.permissions.insert(
            (permission.object_name.clone(), permission.op_name.clone()),
            permission,
        );
    }

    /// Assign an admin role
    pub async fn assign_admin_role(&self, tenant: &str, assignment: UserAdminRole) {
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        let list = data
            .admin_assignments
            .entry(assignment.user_id.clone())
            .or_default();
        list.retain(|existing| existing.name != assignment.name);
        list.push(assignment);
    }

    /// Raw relationship values of a hierarchy
    pub async fn raw_hier(&self, kind: HierarchyKind, tenant: &str) -> Vec<String> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant)
            .and_then(|data| data.hierarchies.get(&kind).cloned())
            .unwrap_or_default()
    }

    /// Append a raw relationship value as-is, without validation
    pub async fn push_raw_relationship(&self, kind: HierarchyKind, tenant: &str, raw: &str) {
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();
        data.hierarchies.entry(kind).or_default().push(raw.to_string());
    }
}

#[async_trait]
impl Authenticator for InMemoryDirectory {
    async fn authenticate(
        &self,
        user_id: &str,
        credential: &str,
        tenant: &str,
    ) -> Result<Authentication> {
        let tenants = self.tenants.read().await;
        let data = tenants
            .get(tenant)
            .ok_or_else(|| RbacError::Authentication(format!("unknown user {}", user_id)))?;

        let (Some(user), Some(stored)) = (data.users.get(user_id), data.credentials.get(user_id))
        else {
            return Err(RbacError::Authentication(format!("unknown user {}", user_id)));
        };

        if blake3::hash(credential.as_bytes()).as_bytes() != stored {
            return Err(RbacError::Authentication(format!(
                "invalid credential for {}",
                user_id
            )));
        }

        Ok(Authentication {
            internal_id: user.internal_id.clone(),
            warnings: Vec::new(),
        })
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn read_hier(&self, kind: HierarchyKind, tenant: &str) -> Result<Vec<Relationship>> {
        let tenants = self.tenants.read().await;
        let edges = tenants
            .get(tenant)
            .map(|data| data.edges(kind))
            .unwrap_or_default();
        debug!(kind = %kind, tenant, edges = edges.len(), "Read hierarchy");
        Ok(edges)
    }

    async fn read_sd_sets(&self, kind: SdKind, tenant: &str) -> Result<Vec<SdSet>> {
        let tenants = self.tenants.read().await;
        let mut sets: Vec<SdSet> = tenants
            .get(tenant)
            .map(|data| {
                data.sd_sets
                    .values()
                    .filter(|set| set.kind == kind)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sets)
    }

    async fn read_user(&self, user_id: &str, tenant: &str) -> Result<User> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant)
            .and_then(|data| data.users.get(user_id).cloned())
            .ok_or_else(|| RbacError::not_found(EntityKind::User, user_id))
    }

    async fn read_role(&self, name: &str, tenant: &str) -> Result<Role> {
        let tenants = self.tenants.read().await;
        let data = tenants
            .get(tenant)
            .ok_or_else(|| RbacError::not_found(EntityKind::Role, name))?;
        let stored = data
            .roles
            .get(name)
            .ok_or_else(|| RbacError::not_found(EntityKind::Role, name))?;

        let mut role = stored.to_role(name)?;
        let (parents, children) = data.neighbours(HierarchyKind::Role, name);
        role.parents = parents;
        role.children = children;
        Ok(role)
    }

    async fn read_admin_role(&self, name: &str, tenant: &str) -> Result<AdminRole> {
        let tenants = self.tenants.read().await;
        let data = tenants
            .get(tenant)
            .ok_or_else(|| RbacError::not_found(EntityKind::AdminRole, name))?;
        let mut admin_role = data
            .admin_roles
            .get(name)
            .cloned()
            .ok_or_else(|| RbacError::not_found(EntityKind::AdminRole, name))?;

        let (parents, children) = data.neighbours(HierarchyKind::AdminRole, name);
        admin_role.role.parents = parents;
        admin_role.role.children = children;
        Ok(admin_role)
    }

    async fn read_assigned_roles(&self, user_id: &str, tenant: &str) -> Result<Vec<UserRole>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant)
            .and_then(|data| data.assignments.get(user_id).cloned())
            .unwrap_or_default())
    }

    async fn read_assigned_admin_roles(
        &self,
        user_id: &str,
        tenant: &str,
    ) -> Result<Vec<UserAdminRole>> {
        let tenants = self.tenants.read().await;
        Ok(tenants
            .get(tenant)
            .and_then(|data| data.admin_assignments.get(user_id).cloned())
            .unwrap_or_default())
    }

    async fn read_permission(
        &self,
        object_name: &str,
        op_name: &str,
        tenant: &str,
    ) -> Result<Permission> {
        let tenants = self.tenants.read().await;
        tenants
            .get(tenant)
            .and_then(|data| {
                data.permissions
                    .get(&(object_name.to_string(), op_name.to_string()))
                    .cloned()
            })
            .ok_or_else(|| {
                RbacError::not_found(EntityKind::Permission, format!("{}.{}", object_name, op_name))
            })
    }

    async fn add_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(tenant.to_string())
            .or_default()
            .push_edge(kind, edge);
        Ok(())
    }

    async fn remove_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let raw = edge.encode();
        let values = tenants
            .get_mut(tenant)
            .and_then(|data| data.hierarchies.get_mut(&kind))
            .ok_or_else(|| RbacError::not_found(EntityKind::Relationship, raw.clone()))?;

        let before = values.len();
        values.retain(|value| value != &raw);
        if values.len() == before {
            return Err(RbacError::not_found(EntityKind::Relationship, raw));
        }
        Ok(())
    }

    async fn assign_role(&self, tenant: &str, assignment: &UserRole) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let data = tenants.entry(tenant.to_string()).or_default();

        if !data.users.contains_key(&assignment.user_id) {
            return Err(RbacError::not_found(EntityKind::User, &assignment.user_id));
        }
        if !data.roles.contains_key(&assignment.name) {
            return Err(RbacError::not_found(EntityKind::Role, &assignment.name));
        }

        let list = data
            .assignments
            .entry(assignment.user_id.clone())
            .or_default();
        list.retain(|existing| existing.name != assignment.name);
        list.push(assignment.clone());
        Ok(())
    }

    async fn deassign_role(&self, tenant: &str, user_id: &str, role: &str) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        let list = tenants
            .get_mut(tenant)
            .and_then(|data| data.assignments.get_mut(user_id))
            .ok_or_else(|| RbacError::not_found(EntityKind::Assignment, format!("{}:{}", user_id, role)))?;

        let before = list.len();
        list.retain(|existing| existing.name != role);
        if list.len() == before {
            return Err(RbacError::not_found(
                EntityKind::Assignment,
                format!("{}:{}", user_id, role),
            ));
        }
        Ok(())
    }

    async fn write_sd_set(&self, tenant: &str, set: &SdSet) -> Result<()> {
        let mut tenants = self.tenants.write().await;
        tenants
            .entry(tenant.to_string())
            .or_default()
            .sd_sets
            .insert(set.name.clone(), set.clone());
        Ok(())
    }

    async fn remove_sd_set(&self, tenant: &str, name: &str) -> Result<SdSet> {
        let mut tenants = self.tenants.write().await;
        tenants
            .get_mut(tenant)
            .and_then(|data| data.sd_sets.remove(name))
            .ok_or_else(|| RbacError::not_found(EntityKind::SdSet, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "acme";

    #[tokio::test]
    async fn test_role_round_trips_through_raw_form() {
        let dir = InMemoryDirectory::new();
        let mut role = Role::new("Teller")
            .with_parent("Supervisor")
            .with_constraint(Constraint::new("Teller").with_day_mask("23456").with_timeout(15));
        role.props.insert("branch".to_string(), "north".to_string());
        dir.put_role(TENANT, role.clone()).await.unwrap();
        dir.put_role(TENANT, Role::new("Clerk").with_parent("Teller"))
            .await
            .unwrap();

        let read = dir.read_role("Teller", TENANT).await.unwrap();
        assert_eq!(read.constraint, role.constraint);
        assert_eq!(read.props, role.props);
        assert!(read.parents.contains("Supervisor"));
        assert!(read.children.contains("Clerk"));

        assert_eq!(
            dir.raw_hier(HierarchyKind::Role, TENANT).await,
            vec!["Teller:Supervisor", "Clerk:Teller"]
        );
    }

    #[tokio::test]
    async fn test_malformed_raw_edges_skipped() {
        let dir = InMemoryDirectory::new();
        dir.push_raw_relationship(HierarchyKind::Role, TENANT, "Teller:Supervisor")
            .await;
        dir.push_raw_relationship(HierarchyKind::Role, TENANT, "garbage")
            .await;
        dir.push_raw_relationship(HierarchyKind::Role, TENANT, ":Supervisor")
            .await;

        let edges = dir.read_hier(HierarchyKind::Role, TENANT).await.unwrap();
        assert_eq!(edges, vec![Relationship::new("Teller", "Supervisor")]);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let dir = InMemoryDirectory::new();
        let user = User::new("alice", "branch");
        let internal = user.internal_id.clone();
        dir.put_user(TENANT, user, Some("s3cret")).await;

        let auth = dir.authenticate("alice", "s3cret", TENANT).await.unwrap();
        assert_eq!(auth.internal_id, internal);

        assert!(matches!(
            dir.authenticate("alice", "wrong", TENANT).await,
            Err(RbacError::Authentication(_))
        ));
        assert!(matches!(
            dir.authenticate("bob", "s3cret", TENANT).await,
            Err(RbacError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_find_sd_sets_for_role() {
        let dir = InMemoryDirectory::new();
        dir.write_sd_set(TENANT, &SdSet::new("cash", SdKind::Dynamic, ["Teller", "Auditor"], 2))
            .await
            .unwrap();
        dir.write_sd_set(TENANT, &SdSet::new("books", SdKind::Static, ["Teller", "Clerk"], 2))
            .await
            .unwrap();

        let sets = dir
            .find_sd_sets_for_role("Teller", SdKind::Dynamic, TENANT)
            .await
            .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].name, "cash");

        let none = dir
            .find_sd_sets_for_role("Guest", SdKind::Dynamic, TENANT)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_relationship() {
        let dir = InMemoryDirectory::new();
        dir.put_role(TENANT, Role::new("Teller").with_parent("Supervisor"))
            .await
            .unwrap();

        let edge = Relationship::new("Teller", "Supervisor");
        dir.remove_relationship(HierarchyKind::Role, TENANT, &edge)
            .await
            .unwrap();

        let err = dir
            .remove_relationship(HierarchyKind::Role, TENANT, &edge)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::NotFound { entity: EntityKind::Relationship, .. }
        ));
        assert_eq!(err.to_string(), "relationship not found: Teller:Supervisor");

        let err = dir
            .remove_relationship(HierarchyKind::UserOu, TENANT, &edge)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RbacError::NotFound { entity: EntityKind::Relationship, .. }
        ));
    }

    #[tokio::test]
    async fn test_assignment_requires_user_and_role() {
        let dir = InMemoryDirectory::new();
        dir.put_user(TENANT, User::new("alice", "branch"), None).await;
        dir.put_role(TENANT, Role::new("Teller")).await.unwrap();

        assert!(dir.assign_role(TENANT, &UserRole::new("alice", "Teller")).await.is_ok());
        assert!(matches!(
            dir.assign_role(TENANT, &UserRole::new("alice", "Ghost")).await,
            Err(RbacError::NotFound { entity: EntityKind::Role, .. })
        ));

        dir.deassign_role(TENANT, "alice", "Teller").await.unwrap();
        assert!(dir.deassign_role(TENANT, "alice", "Teller").await.is_err());
    }
}
