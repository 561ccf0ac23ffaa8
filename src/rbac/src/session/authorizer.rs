//! Session creation and access checks

use super::{DropReason, DroppedRole, Session, SessionRequest};
use crate::config::EngineConfig;
use crate::constraint::{Constraint, ValidationContext, ValidatorChain};
use crate::error::{EntityKind, RbacError, Result};
use crate::hierarchy::GraphCache;
use crate::sod::SodEngine;
use crate::store::{Authenticator, DirectoryStore};
use crate::types::{HierarchyKind, UserRole};
use chrono::{Local, NaiveDateTime};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Creates sessions and answers access checks
///
/// # Architecture
///
/// ```text
/// SessionRequest → Authenticator → DirectoryStore (user, assignments)
///                        ↓
///      ValidatorChain (user: hard fail, roles: soft fail)
///                        ↓
///      GraphCache (role closure) → SodEngine (DSD) → Session
/// ```
pub struct SessionAuthorizer {
    authenticator: Arc<dyn Authenticator>,

    graphs: GraphCache,

    sod: SodEngine,

    validators: Arc<ValidatorChain>,

    /// Reject activations that break a DSD set
    enforce_dsd: bool,
}

impl SessionAuthorizer {
    /// Create an authorizer over shared caches
    pub fn new(
        graphs: GraphCache,
        sod: SodEngine,
        authenticator: Arc<dyn Authenticator>,
        config: &EngineConfig,
    ) -> Self {
        let validators = ValidatorChain::from_config(&config.validators);
        info!(
            validators = ?validators.names(),
            enforce_dsd = config.enforce_dsd,
            "SessionAuthorizer initialized"
        );

        Self {
            authenticator,
            graphs,
            sod,
            validators: Arc::new(validators),
            enforce_dsd: config.enforce_dsd,
        }
    }

    fn store(&self) -> &Arc<dyn DirectoryStore> {
        self.graphs.store()
    }

    pub fn validators(&self) -> &ValidatorChain {
        &self.validators
    }

    /// Log a user on at the current local time
    pub async fn create_session(&self, request: &SessionRequest) -> Result<Session> {
        self.create_session_at(request, Local::now().naive_local()).await
    }

    /// Log a user on as of `now`
    pub async fn create_session_at(
        &self,
        request: &SessionRequest,
        now: NaiveDateTime,
    ) -> Result<Session> {
        let tenant = request.tenant.as_str();
        let user_id = request.user_id.as_str();

        let authentication = match &request.credential {
            Some(credential) => Some(
                self.authenticator
                    .authenticate(user_id, credential, tenant)
                    .await
                    .inspect_err(|e| warn!(tenant, user_id, error = %e, "Authentication failed"))?,
            ),
            None => None,
        };

        let (user, assigned, assigned_admin) = tokio::try_join!(
            self.store().read_user(user_id, tenant),
            self.store().read_assigned_roles(user_id, tenant),
            self.store().read_assigned_admin_roles(user_id, tenant),
        )?;

        let mut dropped = Vec::new();
        if let Some(requested) = &request.roles {
            for name in requested {
                let known = assigned.iter().chain(&assigned_admin).any(|a| &a.name == name);
                if !known {
                    // Unmatched, so neither a role nor an admin role
                    dropped.push(DroppedRole {
                        name: name.clone(),
                        admin: false,
                        reason: DropReason::NotAssigned,
                    });
                }
            }
        }
        let assigned: Vec<UserRole> = assigned
            .into_iter()
            .filter(|a| request.requests(&a.name))
            .collect();
        let assigned_admin: Vec<UserRole> = assigned_admin
            .into_iter()
            .filter(|a| request.requests(&a.name))
            .collect();

        let ctx = ValidationContext::new(now);
        self.validators
            .validate(&user.constraint, &ctx)
            .map_err(|reason| {
                warn!(tenant, user_id, reason = %reason, "User constraint failed");
                RbacError::Constraint {
                    subject: user_id.to_string(),
                    reason,
                }
            })?;

        let role_defaults = try_join_all(
            assigned
                .iter()
                .map(|a| self.store().read_role(&a.name, tenant)),
        );
        let admin_defaults = try_join_all(
            assigned_admin
                .iter()
                .map(|a| self.store().read_admin_role(&a.name, tenant)),
        );
        let (roles, admin_roles) = tokio::try_join!(role_defaults, admin_defaults)?;

        let role_bases: Vec<Constraint> = roles.into_iter().map(|r| r.constraint).collect();
        let admin_bases: Vec<Constraint> = admin_roles
            .into_iter()
            .map(|r| r.role.constraint)
            .collect();

        let (active, mut failed) = self.activate(assigned, &role_bases, &ctx, false);
        let (active_admin, failed_admin) = self.activate(assigned_admin, &admin_bases, &ctx, true);
        failed.extend(failed_admin);
        for role in &failed {
            debug!(tenant, user_id, role = %role.name, reason = ?role.reason, "Dropped role at logon");
        }
        dropped.extend(failed);

        if self.enforce_dsd && !active.is_empty() {
            let graph = self.graphs.graph_for(HierarchyKind::Role, tenant).await?;
            let closure = graph.ascendants_of_all(active.iter().map(|r| r.name.as_str()));
            self.sod.check_dsd(tenant, &closure).await?;
        }

        let (internal_id, warnings) = match authentication {
            Some(auth) => (auth.internal_id, auth.warnings),
            None => (user.internal_id, Vec::new()),
        };

        let session = Session {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            user_id: user_id.to_string(),
            internal_id,
            roles: active,
            admin_roles: active_admin,
            last_access: now,
            authenticated: request.credential.is_some(),
            warnings,
            dropped,
        };

        info!(
            tenant,
            user_id,
            session = %session.id,
            roles = session.roles.len(),
            admin_roles = session.admin_roles.len(),
            dropped = session.dropped.len(),
            "Session created"
        );
        Ok(session)
    }

    /// Merge each assignment's override over its role default, then validate
    fn activate(
        &self,
        assignments: Vec<UserRole>,
        bases: &[Constraint],
        ctx: &ValidationContext,
        admin: bool,
    ) -> (Vec<UserRole>, Vec<DroppedRole>) {
        let merged = assignments
            .into_iter()
            .zip(bases)
            .map(|(mut assignment, base)| {
                assignment.constraint = assignment.constraint.merged_over(base);
                assignment
            })
            .collect();
        self.revalidate(merged, ctx, admin)
    }

    /// Partition roles by their effective constraint into survivors and dropped
    fn revalidate(
        &self,
        roles: Vec<UserRole>,
        ctx: &ValidationContext,
        admin: bool,
    ) -> (Vec<UserRole>, Vec<DroppedRole>) {
        let mut active = Vec::with_capacity(roles.len());
        let mut dropped = Vec::new();

        for role in roles {
            match self.validators.validate(&role.constraint, ctx) {
                Ok(()) => active.push(role),
                Err(reason) => dropped.push(DroppedRole {
                    name: role.name,
                    admin,
                    reason: DropReason::Constraint(reason),
                }),
            }
        }

        (active, dropped)
    }

    /// Re-check active roles, moving failures to `session.dropped`
    fn prune(&self, session: &mut Session, ctx: &ValidationContext) {
        let (roles, mut dropped) = self.revalidate(std::mem::take(&mut session.roles), ctx, false);
        let (admin_roles, admin_dropped) =
            self.revalidate(std::mem::take(&mut session.admin_roles), ctx, true);
        dropped.extend(admin_dropped);

        for role in &dropped {
            debug!(session = %session.id, role = %role.name, reason = ?role.reason, "Pruned active role");
        }

        session.roles = roles;
        session.admin_roles = admin_roles;
        session.dropped.extend(dropped);
    }

    /// Check access at the current local time
    pub async fn check_access(
        &self,
        session: &mut Session,
        object_name: &str,
        op_name: &str,
    ) -> Result<bool> {
        self.check_access_at(session, object_name, op_name, Local::now().naive_local())
            .await
    }

    /// True if the session's roles, closed over ascendants, are granted the
    /// permission, or the session user is granted it directly
    ///
    /// Active roles failing their constraints as of `now`, including idle
    /// timeouts measured from the last access, are dropped first.
    pub async fn check_access_at(
        &self,
        session: &mut Session,
        object_name: &str,
        op_name: &str,
        now: NaiveDateTime,
    ) -> Result<bool> {
        let ctx = ValidationContext::new(now).with_last_access(Some(session.last_access));
        self.prune(session, &ctx);
        session.last_access = now;

        let permission = match self
            .store()
            .read_permission(object_name, op_name, &session.tenant)
            .await
        {
            Ok(permission) => permission,
            Err(RbacError::NotFound { .. }) => {
                debug!(session = %session.id, object_name, op_name, "Permission not found");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if permission.users.contains(&session.user_id) {
            debug!(session = %session.id, permission = %permission.key(), "Granted to user");
            return Ok(true);
        }

        let (kind, names): (_, Vec<&str>) = if permission.admin {
            (HierarchyKind::AdminRole, session.admin_role_names().collect())
        } else {
            (HierarchyKind::Role, session.role_names().collect())
        };

        if names.is_empty() {
            return Ok(false);
        }

        let graph = self.graphs.graph_for(kind, &session.tenant).await?;
        let closure = graph.ascendants_of_all(names);
        let granted = permission.roles.iter().any(|role| closure.contains(role));

        debug!(
            session = %session.id,
            permission = %permission.key(),
            granted,
            "Access checked"
        );
        Ok(granted)
    }

    /// Activate an assigned role in an existing session
    pub async fn add_active_role(&self, session: &mut Session, role: &str) -> Result<()> {
        self.add_active_role_at(session, role, Local::now().naive_local())
            .await
    }

    pub async fn add_active_role_at(
        &self,
        session: &mut Session,
        role: &str,
        now: NaiveDateTime,
    ) -> Result<()> {
        if session.has_role(role) {
            return Err(RbacError::InvalidInput(format!(
                "Role '{}' already active in session {}",
                role, session.id
            )));
        }

        let tenant = session.tenant.clone();
        let (assigned, base) = tokio::try_join!(
            self.store().read_assigned_roles(&session.user_id, &tenant),
            self.store().read_role(role, &tenant),
        )?;

        let mut assignment = assigned
            .into_iter()
            .find(|a| a.name == role)
            .ok_or_else(|| {
                RbacError::not_found(EntityKind::Assignment, format!("{}:{}", session.user_id, role))
            })?;
        assignment.constraint = assignment.constraint.merged_over(&base.constraint);

        let ctx = ValidationContext::new(now).with_last_access(Some(session.last_access));
        self.validators
            .validate(&assignment.constraint, &ctx)
            .map_err(|reason| RbacError::Constraint {
                subject: role.to_string(),
                reason,
            })?;

        if self.enforce_dsd {
            let graph = self.graphs.graph_for(HierarchyKind::Role, &tenant).await?;
            let closure = graph.ascendants_of_all(session.role_names().chain(std::iter::once(role)));
            self.sod.check_dsd(&tenant, &closure).await?;
        }

        session.roles.push(assignment);
        session.last_access = now;
        info!(session = %session.id, role, "Role activated");
        Ok(())
    }

    /// Deactivate a role
    pub fn drop_active_role(&self, session: &mut Session, role: &str) -> Result<()> {
        let before = session.roles.len();
        session.roles.retain(|r| r.name != role);
        if session.roles.len() == before {
            return Err(RbacError::not_found(EntityKind::Role, role));
        }
        info!(session = %session.id, role, "Role deactivated");
        Ok(())
    }

    /// Active roles closed over ascendants
    pub async fn authorized_roles(&self, session: &Session) -> Result<HashSet<String>> {
        let graph = self
            .graphs
            .graph_for(HierarchyKind::Role, &session.tenant)
            .await?;
        Ok(graph.ascendants_of_all(session.role_names()))
    }

    /// Active administrative roles closed over ascendants
    pub async fn authorized_admin_roles(&self, session: &Session) -> Result<HashSet<String>> {
        let graph = self
            .graphs
            .graph_for(HierarchyKind::AdminRole, &session.tenant)
            .await?;
        Ok(graph.ascendants_of_all(session.admin_role_names()))
    }
}
