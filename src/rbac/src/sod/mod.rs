//! Separation of duty
//!
//! Static sets are checked when a role is assigned, dynamic sets when roles
//! are activated in a session. Both count a principal's roles closed over
//! ascendants in the role hierarchy: holding `Teller` also counts every role
//! `Teller` inherits.

pub mod cache;

pub use cache::DsdCache;

use crate::config::CacheConfig;
use crate::error::{EntityKind, RbacError, Result};
use crate::hierarchy::GraphCache;
use crate::store::DirectoryStore;
use crate::types::{HierarchyKind, SdKind, SdSet};
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SSD and DSD checker
#[derive(Clone, Debug)]
pub struct SodEngine {
    graphs: GraphCache,
    dsd: DsdCache,
}

impl SodEngine {
    /// Create an engine reading through the graph cache's directory
    pub fn new(graphs: GraphCache, dsd_config: &CacheConfig) -> Self {
        let dsd = DsdCache::new(Arc::clone(graphs.store()), dsd_config);
        Self { graphs, dsd }
    }

    fn store(&self) -> &Arc<dyn DirectoryStore> {
        self.graphs.store()
    }

    pub fn dsd_cache(&self) -> &DsdCache {
        &self.dsd
    }

    /// Check a role closure against static sets
    ///
    /// Fails on the first set, in the order given, that `closure` holds
    /// `cardinality` or more members of. Dynamic sets in `sets` are ignored.
    pub fn check_ssd(closure: &HashSet<String>, sets: &[SdSet]) -> Result<()> {
        for set in sets.iter().filter(|set| set.kind == SdKind::Static) {
            if set.is_violated_by(closure) {
                let roles = set.matching(closure);
                return Err(RbacError::SsdViolation {
                    set: set.name.clone(),
                    matched: roles.len(),
                    roles,
                    cardinality: set.cardinality,
                });
            }
        }
        Ok(())
    }

    /// Check an active role closure against the dynamic sets its members belong to
    pub async fn check_dsd(&self, tenant: &str, active_closure: &HashSet<String>) -> Result<()> {
        let lookups = active_closure
            .iter()
            .map(|role| self.dsd.sets_for_role(tenant, role));
        let found = try_join_all(lookups).await?;

        // Deduplicate by name; sorted for a stable report
        let mut sets: BTreeMap<&str, &SdSet> = BTreeMap::new();
        for set in found.iter().flat_map(|sets| sets.iter()) {
            sets.entry(set.name.as_str()).or_insert(set);
        }

        for set in sets.values() {
            if set.is_violated_by(active_closure) {
                let roles = set.matching(active_closure);
                warn!(tenant, set = %set.name, roles = ?roles, "DSD violation");
                return Err(RbacError::DsdViolation {
                    set: set.name.clone(),
                    matched: roles.len(),
                    roles,
                    cardinality: set.cardinality,
                });
            }
        }

        debug!(tenant, roles = active_closure.len(), sets = sets.len(), "DSD check passed");
        Ok(())
    }

    /// Check that assigning `role` to `user_id` keeps every static set intact
    pub async fn validate_ssd_assignment(&self, tenant: &str, user_id: &str, role: &str) -> Result<()> {
        let (assigned, graph, sets) = tokio::try_join!(
            self.store().read_assigned_roles(user_id, tenant),
            self.graphs.graph_for(HierarchyKind::Role, tenant),
            self.store().read_sd_sets(SdKind::Static, tenant),
        )?;

        let closure = graph.ascendants_of_all(
            assigned
                .iter()
                .map(|assignment| assignment.name.as_str())
                .chain(std::iter::once(role)),
        );

        Self::check_ssd(&closure, &sets).inspect_err(|e| {
            warn!(tenant, user_id, role, error = %e, "Assignment rejected by SSD");
        })
    }

    /// Create a new SoD set
    pub async fn create_sd_set(&self, tenant: &str, set: SdSet) -> Result<()> {
        set.validate()?;

        if self.find_sd_set(tenant, &set.name).await?.is_some() {
            return Err(RbacError::InvalidInput(format!(
                "SoD set '{}' already exists",
                set.name
            )));
        }

        self.store().write_sd_set(tenant, &set).await?;
        if set.kind == SdKind::Dynamic {
            self.dsd.invalidate_tenant(tenant).await;
        }

        info!(tenant, set = %set.name, kind = %set.kind, "Created SoD set");
        Ok(())
    }

    /// Replace an existing SoD set
    pub async fn update_sd_set(&self, tenant: &str, set: SdSet) -> Result<()> {
        set.validate()?;

        let existing = self
            .find_sd_set(tenant, &set.name)
            .await?
            .ok_or_else(|| RbacError::not_found(EntityKind::SdSet, &set.name))?;

        self.store().write_sd_set(tenant, &set).await?;
        if existing.kind == SdKind::Dynamic || set.kind == SdKind::Dynamic {
            self.dsd.invalidate_tenant(tenant).await;
        }

        info!(tenant, set = %set.name, kind = %set.kind, "Updated SoD set");
        Ok(())
    }

    /// Remove a SoD set
    pub async fn remove_sd_set(&self, tenant: &str, name: &str) -> Result<SdSet> {
        let removed = self.store().remove_sd_set(tenant, name).await?;
        if removed.kind == SdKind::Dynamic {
            self.dsd.invalidate_tenant(tenant).await;
        }

        info!(tenant, set = %name, kind = %removed.kind, "Removed SoD set");
        Ok(removed)
    }

    async fn find_sd_set(&self, tenant: &str, name: &str) -> Result<Option<SdSet>> {
        let (statics, dynamics) = tokio::try_join!(
            self.store().read_sd_sets(SdKind::Static, tenant),
            self.store().read_sd_sets(SdKind::Dynamic, tenant),
        )?;
        Ok(statics
            .into_iter()
            .chain(dynamics)
            .find(|set| set.name == name))
    }
}
