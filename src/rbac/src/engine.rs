//! Engine wiring
//!
//! Builds the shared caches once and hands the same instances to every
//! service, so an invalidation by an administrator is seen by sessions.

use crate::admin::{DelegatedAccess, HierarchyAdmin};
use crate::config::EngineConfig;
use crate::hierarchy::GraphCache;
use crate::session::SessionAuthorizer;
use crate::sod::SodEngine;
use crate::store::{Authenticator, DirectoryStore, InMemoryDirectory};
use std::sync::Arc;
use tracing::info;

/// RBAC engine - owns the caches and the services built on them
///
/// ```text
///              DirectoryStore
///                    ↓
///   GraphCache ──→ SodEngine (DsdCache)
///       ↓               ↓
///   SessionAuthorizer, HierarchyAdmin, DelegatedAccess
/// ```
pub struct RbacEngine {
    graphs: GraphCache,

    sod: SodEngine,

    sessions: SessionAuthorizer,

    admin: HierarchyAdmin,

    delegated: DelegatedAccess,

    config: EngineConfig,
}

impl RbacEngine {
    /// Create an engine over the given collaborators
    pub fn new(
        store: Arc<dyn DirectoryStore>,
        authenticator: Arc<dyn Authenticator>,
        config: EngineConfig,
    ) -> Self {
        let graphs = GraphCache::new(store, &config.graph_cache);
        let sod = SodEngine::new(graphs.clone(), &config.dsd_cache);
        let sessions = SessionAuthorizer::new(graphs.clone(), sod.clone(), authenticator, &config);
        let admin = HierarchyAdmin::new(graphs.clone(), sod.clone());
        let delegated = DelegatedAccess::new(graphs.clone());

        info!(
            enforce_dsd = config.enforce_dsd,
            graph_capacity = config.graph_cache.capacity,
            dsd_capacity = config.dsd_cache.capacity,
            "RbacEngine initialized"
        );

        Self {
            graphs,
            sod,
            sessions,
            admin,
            delegated,
            config,
        }
    }

    /// Engine over an in-memory directory acting as store and authenticator
    pub fn in_memory(directory: InMemoryDirectory, config: EngineConfig) -> Self {
        let directory = Arc::new(directory);
        Self::new(directory.clone(), directory, config)
    }

    pub fn graphs(&self) -> &GraphCache {
        &self.graphs
    }

    pub fn sod(&self) -> &SodEngine {
        &self.sod
    }

    pub fn sessions(&self) -> &SessionAuthorizer {
        &self.sessions
    }

    pub fn admin(&self) -> &HierarchyAdmin {
        &self.admin
    }

    pub fn delegated(&self) -> &DelegatedAccess {
        &self.delegated
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
