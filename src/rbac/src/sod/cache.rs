//! Role to DSD set lookup cache
//!
//! Keyed by (tenant, role). A role that belongs to no dynamic set is cached
//! as an empty list so repeated activations do not hit the directory.

use crate::config::CacheConfig;
use crate::error::{RbacError, Result};
use crate::stats::{CacheStats, Counters};
use crate::store::DirectoryStore;
use crate::types::{SdKind, SdSet, TenantId};
use dashmap::DashMap;
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type DsdKey = (TenantId, String);

const MAX_STALE_RELOADS: usize = 3;

#[derive(Clone)]
struct CachedSets {
    generation: u64,
    sets: Arc<Vec<SdSet>>,
}

/// Lazily populated (tenant, role) → DSD sets map
#[derive(Clone)]
pub struct DsdCache {
    store: Arc<dyn DirectoryStore>,

    sets: Cache<DsdKey, CachedSets>,

    /// Bumped per tenant whenever a dynamic set changes
    generations: Arc<DashMap<TenantId, u64>>,

    build_timeout: Duration,

    max_entries: u64,

    stats: Counters,
}

impl DsdCache {
    pub fn new(store: Arc<dyn DirectoryStore>, config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.capacity);
        if let Some(ttl) = config.ttl() {
            builder = builder.time_to_live(ttl);
        }

        Self {
            store,
            sets: builder.build(),
            generations: Arc::new(DashMap::new()),
            build_timeout: config.build_timeout(),
            max_entries: config.capacity,
            stats: Counters::default(),
        }
    }

    /// Dynamic sets listing `role` as a member; empty if none
    pub async fn sets_for_role(&self, tenant: &str, role: &str) -> Result<Arc<Vec<SdSet>>> {
        let key: DsdKey = (tenant.to_string(), role.to_string());
        let mut reloads = 0;

        loop {
            let current = self.generation(tenant);

            let cached = match self.sets.get(&key).await {
                Some(cached) => {
                    self.stats.increment("hits");
                    cached
                }
                None => {
                    self.stats.increment("misses");
                    self.load(&key).await?
                }
            };

            if cached.generation >= current || reloads == MAX_STALE_RELOADS {
                return Ok(cached.sets);
            }

            reloads += 1;
            self.sets.invalidate(&key).await;
        }
    }

    /// Drop every cached lookup for a tenant
    pub async fn invalidate_tenant(&self, tenant: &str) {
        {
            let mut generation = self.generations.entry(tenant.to_string()).or_insert(0);
            *generation += 1;
        }

        let stale: Vec<Arc<DsdKey>> = self
            .sets
            .iter()
            .filter(|(key, _)| key.0 == tenant)
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            self.sets.invalidate(key.as_ref()).await;
        }

        self.stats.increment("invalidations");
        debug!(tenant, "Invalidated DSD lookups");
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.sets.entry_count(), self.max_entries)
    }

    fn generation(&self, tenant: &str) -> u64 {
        self.generations.get(tenant).map(|g| *g).unwrap_or(0)
    }

    async fn load(&self, key: &DsdKey) -> Result<CachedSets> {
        let build = self.sets.try_get_with(key.clone(), self.build(key));

        match tokio::time::timeout(self.build_timeout, build).await {
            Ok(Ok(cached)) => Ok(cached),
            Ok(Err(source)) => Err(RbacError::CacheBuild {
                key: format!("DSD/{}/{}", key.0, key.1),
                source,
            }),
            Err(_) => {
                warn!(tenant = %key.0, role = %key.1, "Timed out waiting for DSD lookup");
                Err(RbacError::CacheBuild {
                    key: format!("DSD/{}/{}", key.0, key.1),
                    source: Arc::new(RbacError::Collaborator(format!(
                        "load did not finish within {:?}",
                        self.build_timeout
                    ))),
                })
            }
        }
    }

    async fn build(&self, key: &DsdKey) -> Result<CachedSets> {
        let (tenant, role) = key;
        let generation = self.generation(tenant);

        let sets = self
            .store
            .find_sd_sets_for_role(role, SdKind::Dynamic, tenant)
            .await
            .inspect_err(|e| {
                self.stats.increment("build_failures");
                warn!(tenant = %tenant, role = %role, error = %e, "Failed to read DSD sets");
            })?;

        self.stats.increment("builds");
        debug!(tenant = %tenant, role = %role, sets = sets.len(), "Loaded DSD sets for role");

        Ok(CachedSets {
            generation,
            sets: Arc::new(sets),
        })
    }
}

impl fmt::Debug for DsdCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsdCache")
            .field("entries", &self.sets.entry_count())
            .field("build_timeout", &self.build_timeout)
            .finish()
    }
}
