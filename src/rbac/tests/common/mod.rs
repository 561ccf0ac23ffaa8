//! Shared fixtures for integration tests

#![allow(dead_code)]

use arbiter_rbac::{
    AdminRole, DirectoryStore, HierarchyKind, InMemoryDirectory, Permission, RbacError,
    Relationship, Result, Role, SdKind, SdSet, User, UserAdminRole, UserRole,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const TENANT: &str = "acme";

/// Install a test-writer subscriber; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbiter_rbac=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// 2024-06-01 was a Saturday
pub fn saturday_at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub fn monday_at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Bank directory: Trainee → Teller → Supervisor, plus Auditor and Clerk
pub async fn bank_directory() -> InMemoryDirectory {
    let dir = InMemoryDirectory::new();

    dir.put_role(TENANT, Role::new("Supervisor")).await.unwrap();
    dir.put_role(TENANT, Role::new("Teller").with_parent("Supervisor"))
        .await
        .unwrap();
    dir.put_role(TENANT, Role::new("Trainee").with_parent("Teller"))
        .await
        .unwrap();
    dir.put_role(TENANT, Role::new("Auditor")).await.unwrap();
    dir.put_role(TENANT, Role::new("Clerk")).await.unwrap();

    dir.put_user(TENANT, User::new("alice", "north"), Some("alice-pw"))
        .await;
    dir.put_user(TENANT, User::new("bob", "north"), Some("bob-pw")).await;

    dir.put_permission(
        TENANT,
        Permission::new("Account", "debit").granted_to_role("Supervisor"),
    )
    .await;
    dir.put_permission(
        TENANT,
        Permission::new("Account", "audit").granted_to_role("Auditor"),
    )
    .await;
    dir.put_permission(
        TENANT,
        Permission::new("Ledger", "read").granted_to_user("bob"),
    )
    .await;

    dir
}

pub async fn assign(dir: &InMemoryDirectory, user: &str, roles: &[&str]) {
    for role in roles {
        dir.assign_role(TENANT, &UserRole::new(user, *role))
            .await
            .unwrap();
    }
}

pub fn cash_dsd() -> SdSet {
    SdSet::new("cash-handling", SdKind::Dynamic, ["Teller", "Auditor"], 2)
}

/// Store wrapper that counts hierarchy reads, delays them, and fails on request
///
/// Edges are read before the delay, so a slow read returns the snapshot taken
/// when it started.
#[derive(Clone)]
pub struct ScriptedStore {
    inner: InMemoryDirectory,
    hier_reads: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    delay: Duration,
}

impl ScriptedStore {
    pub fn new(inner: InMemoryDirectory) -> Self {
        Self {
            inner,
            hier_reads: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `count` hierarchy reads
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn hier_reads(&self) -> usize {
        self.hier_reads.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryDirectory {
        &self.inner
    }
}

#[async_trait]
impl DirectoryStore for ScriptedStore {
    async fn read_hier(&self, kind: HierarchyKind, tenant: &str) -> Result<Vec<Relationship>> {
        self.hier_reads.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let edges = self.inner.read_hier(kind, tenant).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if failing {
            return Err(RbacError::Collaborator("directory unavailable".to_string()));
        }
        edges
    }

    async fn read_sd_sets(&self, kind: SdKind, tenant: &str) -> Result<Vec<SdSet>> {
        self.inner.read_sd_sets(kind, tenant).await
    }

    async fn read_user(&self, user_id: &str, tenant: &str) -> Result<User> {
        self.inner.read_user(user_id, tenant).await
    }

    async fn read_role(&self, name: &str, tenant: &str) -> Result<Role> {
        self.inner.read_role(name, tenant).await
    }

    async fn read_admin_role(&self, name: &str, tenant: &str) -> Result<AdminRole> {
        self.inner.read_admin_role(name, tenant).await
    }

    async fn read_assigned_roles(&self, user_id: &str, tenant: &str) -> Result<Vec<UserRole>> {
        self.inner.read_assigned_roles(user_id, tenant).await
    }

    async fn read_assigned_admin_roles(
        &self,
        user_id: &str,
        tenant: &str,
    ) -> Result<Vec<UserAdminRole>> {
        self.inner.read_assigned_admin_roles(user_id, tenant).await
    }

    async fn read_permission(
        &self,
        object_name: &str,
        op_name: &str,
        tenant: &str,
    ) -> Result<Permission> {
        self.inner.read_permission(object_name, op_name, tenant).await
    }

    async fn add_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()> {
        self.inner.add_relationship(kind, tenant, edge).await
    }

    async fn remove_relationship(
        &self,
        kind: HierarchyKind,
        tenant: &str,
        edge: &Relationship,
    ) -> Result<()> {
        self.inner.remove_relationship(kind, tenant, edge).await
    }

    async fn assign_role(&self, tenant: &str, assignment: &UserRole) -> Result<()> {
        self.inner.assign_role(tenant, assignment).await
    }

    async fn deassign_role(&self, tenant: &str, user_id: &str, role: &str) -> Result<()> {
        self.inner.deassign_role(tenant, user_id, role).await
    }

    async fn write_sd_set(&self, tenant: &str, set: &SdSet) -> Result<()> {
        self.inner.write_sd_set(tenant, set).await
    }

    async fn remove_sd_set(&self, tenant: &str, name: &str) -> Result<SdSet> {
        self.inner.remove_sd_set(tenant, name).await
    }
}

