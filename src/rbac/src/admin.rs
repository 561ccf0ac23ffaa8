//! Hierarchy administration and delegated (ARBAC) administration checks

use crate::error::{EntityKind, RbacError, Result};
use crate::hierarchy::{GraphCache, HierarchyGraph};
use crate::session::Session;
use crate::sod::SodEngine;
use crate::store::DirectoryStore;
use crate::types::{AdminRole, HierarchyKind, Permission, Relationship, UserRole};
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Mutates hierarchies and user assignments
///
/// Every mutation is checked against the cached graph, persisted, and then
/// the cached graph is invalidated so the next read reloads it.
#[derive(Clone, Debug)]
pub struct HierarchyAdmin {
    graphs: GraphCache,
    sod: SodEngine,
}

impl HierarchyAdmin {
    pub fn new(graphs: GraphCache, sod: SodEngine) -> Self {
        Self { graphs, sod }
    }

    fn store(&self) -> &Arc<dyn DirectoryStore> {
        self.graphs.store()
    }

    /// Make `child` inherit from `parent`
    pub async fn add_inheritance(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        child: &str,
        parent: &str,
    ) -> Result<()> {
        self.ensure_node(kind, tenant, child).await?;
        self.ensure_node(kind, tenant, parent).await?;

        let graph = self.graphs.graph_for(kind, tenant).await?;
        graph.validate_relationship(child, parent, false)?;
        graph.with_added_edge(child, parent)?;

        self.store()
            .add_relationship(kind, tenant, &Relationship::new(child, parent))
            .await?;
        self.graphs.invalidate(kind, tenant).await;

        info!(kind = %kind, tenant, child, parent, "Added inheritance");
        Ok(())
    }

    /// Remove the direct edge `child -> parent`
    pub async fn delete_inheritance(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        child: &str,
        parent: &str,
    ) -> Result<()> {
        let graph = self.graphs.graph_for(kind, tenant).await?;
        graph.validate_relationship(child, parent, true)?;
        graph.with_removed_edge(child, parent)?;

        self.store()
            .remove_relationship(kind, tenant, &Relationship::new(child, parent))
            .await?;
        self.graphs.invalidate(kind, tenant).await;

        info!(kind = %kind, tenant, child, parent, "Deleted inheritance");
        Ok(())
    }

    /// Assign a role, enforcing static separation of duty
    pub async fn assign_user(&self, tenant: &str, assignment: &UserRole) -> Result<()> {
        assignment.constraint.validate()?;
        self.sod
            .validate_ssd_assignment(tenant, &assignment.user_id, &assignment.name)
            .await?;
        self.store().assign_role(tenant, assignment).await?;

        info!(tenant, user_id = %assignment.user_id, role = %assignment.name, "Assigned user");
        Ok(())
    }

    pub async fn deassign_user(&self, tenant: &str, user_id: &str, role: &str) -> Result<()> {
        self.store().deassign_role(tenant, user_id, role).await?;
        info!(tenant, user_id, role, "Deassigned user");
        Ok(())
    }

    /// Role and admin role edges must join existing entities
    async fn ensure_node(&self, kind: HierarchyKind, tenant: &str, name: &str) -> Result<()> {
        match kind {
            HierarchyKind::Role => self.store().read_role(name, tenant).await.map(|_| ()),
            HierarchyKind::AdminRole => self.store().read_admin_role(name, tenant).await.map(|_| ()),
            HierarchyKind::UserOu | HierarchyKind::PermOu => Ok(()),
        }
    }
}

/// Administrative permission checks over admin role ranges
#[derive(Clone, Debug)]
pub struct DelegatedAccess {
    graphs: GraphCache,
}

impl DelegatedAccess {
    pub fn new(graphs: GraphCache) -> Self {
        Self { graphs }
    }

    fn store(&self) -> &Arc<dyn DirectoryStore> {
        self.graphs.store()
    }

    /// True if an admin role of the session may assign `role` to `user_id`
    ///
    /// The user's OU must be one of the admin role's user OUs or below one,
    /// and `role` must lie within the admin role's range.
    pub async fn can_assign(&self, session: &Session, user_id: &str, role: &str) -> Result<bool> {
        let tenant = session.tenant.as_str();
        let admin_roles = self.session_admin_roles(session).await?;
        if admin_roles.is_empty() {
            return Ok(false);
        }

        let (user, ous, roles) = tokio::try_join!(
            self.store().read_user(user_id, tenant),
            self.graphs.graph_for(HierarchyKind::UserOu, tenant),
            self.graphs.graph_for(HierarchyKind::Role, tenant),
        )?;

        let allowed = admin_roles.iter().any(|admin| {
            in_org_units(&ous, &admin.os_u, &user.ou) && in_range(&roles, admin, role)
        });

        debug!(session = %session.id, user_id, role, allowed, "Checked delegated assignment");
        Ok(allowed)
    }

    /// True if an admin role of the session may grant `permission` to `role`
    ///
    /// The permission's OU must be one of the admin role's permission OUs or
    /// below one, and `role` must lie within the admin role's range.
    pub async fn can_grant(&self, session: &Session, role: &str, permission: &Permission) -> Result<bool> {
        let tenant = session.tenant.as_str();
        let Some(perm_ou) = permission.ou.as_deref() else {
            debug!(permission = %permission.key(), "Permission has no OU, grant refused");
            return Ok(false);
        };

        let admin_roles = self.session_admin_roles(session).await?;
        if admin_roles.is_empty() {
            return Ok(false);
        }

        let (ous, roles) = tokio::try_join!(
            self.graphs.graph_for(HierarchyKind::PermOu, tenant),
            self.graphs.graph_for(HierarchyKind::Role, tenant),
        )?;

        let allowed = admin_roles.iter().any(|admin| {
            in_org_units(&ous, &admin.os_p, perm_ou) && in_range(&roles, admin, role)
        });

        debug!(session = %session.id, role, permission = %permission.key(), allowed, "Checked delegated grant");
        Ok(allowed)
    }

    /// Admin roles active in the session, closed over ascendants
    async fn session_admin_roles(&self, session: &Session) -> Result<Vec<AdminRole>> {
        let tenant = session.tenant.as_str();
        let graph = self
            .graphs
            .graph_for(HierarchyKind::AdminRole, tenant)
            .await?;
        let mut names: Vec<String> = graph
            .ascendants_of_all(session.admin_role_names())
            .into_iter()
            .collect();
        names.sort();

        let reads = names.iter().map(|name| async move {
            match self.store().read_admin_role(name, tenant).await {
                Ok(admin_role) => Ok(Some(admin_role)),
                // Inherited names need not carry an admin range of their own
                Err(RbacError::NotFound { entity: EntityKind::AdminRole, .. }) => Ok(None),
                Err(e) => Err(e),
            }
        });

        Ok(try_join_all(reads).await?.into_iter().flatten().collect())
    }
}

/// `ou` equals a listed unit or is a descendant of one
fn in_org_units(graph: &HierarchyGraph, units: &BTreeSet<String>, ou: &str) -> bool {
    units.contains(ou) || units.iter().any(|unit| graph.is_descendant(unit, ou))
}

/// `role` equals an inclusive endpoint or lies strictly between the endpoints
///
/// `begin_range` is the junior end, `end_range` the senior end.
fn in_range(graph: &HierarchyGraph, admin: &AdminRole, role: &str) -> bool {
    let (Some(begin), Some(end)) = (admin.begin_range.as_deref(), admin.end_range.as_deref()) else {
        return false;
    };

    if (role == begin && admin.begin_inclusive) || (role == end && admin.end_inclusive) {
        return true;
    }

    graph.is_ascendant(begin, role) && graph.is_descendant(end, role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(begin_inclusive: bool, end_inclusive: bool) -> AdminRole {
        AdminRole::new("BranchAdmin").with_range("Teller", begin_inclusive, "Manager", end_inclusive)
    }

    fn roles() -> HierarchyGraph {
        HierarchyGraph::from_edges(
            HierarchyKind::Role,
            "acme",
            [
                ("Trainee", "Teller"),
                ("Teller", "Supervisor"),
                ("Supervisor", "Manager"),
                ("Manager", "Director"),
            ],
        )
    }

    #[test]
    fn test_range_endpoints() {
        let graph = roles();

        assert!(in_range(&graph, &admin(true, false), "Teller"));
        assert!(!in_range(&graph, &admin(false, false), "Teller"));
        assert!(in_range(&graph, &admin(false, true), "Manager"));
        assert!(!in_range(&graph, &admin(true, false), "Manager"));
    }

    #[test]
    fn test_range_interior() {
        let graph = roles();
        let admin = admin(false, false);

        assert!(in_range(&graph, &admin, "Supervisor"));
        assert!(!in_range(&graph, &admin, "Trainee"));
        assert!(!in_range(&graph, &admin, "Director"));
        assert!(!in_range(&graph, &admin, "Unrelated"));
    }

    #[test]
    fn test_range_unset() {
        assert!(!in_range(&roles(), &AdminRole::new("Nobody"), "Teller"));
    }

    #[test]
    fn test_org_unit_membership() {
        let ous = HierarchyGraph::from_edges(
            HierarchyKind::UserOu,
            "acme",
            [("north-branch", "retail"), ("retail", "bank")],
        );
        let units: BTreeSet<String> = ["retail".to_string()].into_iter().collect();

        assert!(in_org_units(&ous, &units, "retail"));
        assert!(in_org_units(&ous, &units, "north-branch"));
        assert!(!in_org_units(&ous, &units, "bank"));
    }
}
