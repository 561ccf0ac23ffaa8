//! Single-flight cache of hierarchy graphs
//!
//! Concurrent misses on the same key share one directory read. A failed load
//! is handed to every waiter and nothing is cached, so the next call retries.
//! Each key carries a generation counter bumped by `invalidate` and `replace`;
//! a graph loaded under an older generation is discarded and reloaded, which
//! keeps a load racing with an invalidation from reinstalling stale edges.

use super::graph::HierarchyGraph;
use crate::config::CacheConfig;
use crate::error::{RbacError, Result};
use crate::stats::{CacheStats, Counters};
use crate::store::DirectoryStore;
use crate::types::{HierarchyKind, TenantId};
use dashmap::DashMap;
use moka::future::Cache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reloads attempted when invalidations keep landing mid-load
const MAX_STALE_RELOADS: usize = 3;

/// Cache key: one graph per hierarchy and tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphKey {
    pub kind: HierarchyKind,
    pub tenant: TenantId,
}

impl GraphKey {
    pub fn new(kind: HierarchyKind, tenant: impl Into<TenantId>) -> Self {
        Self {
            kind,
            tenant: tenant.into(),
        }
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.tenant)
    }
}

#[derive(Clone)]
struct CachedGraph {
    generation: u64,
    graph: Arc<HierarchyGraph>,
}

/// Hierarchy graph cache
#[derive(Clone)]
pub struct GraphCache {
    store: Arc<dyn DirectoryStore>,

    graphs: Cache<GraphKey, CachedGraph>,

    /// Bumped on every invalidate/replace of a key
    generations: Arc<DashMap<GraphKey, u64>>,

    build_timeout: Duration,

    max_entries: u64,

    stats: Counters,
}

impl GraphCache {
    /// Create a cache over `store`
    pub fn new(store: Arc<dyn DirectoryStore>, config: &CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.capacity);
        if let Some(ttl) = config.ttl() {
            builder = builder.time_to_live(ttl);
        }

        Self {
            store,
            graphs: builder.build(),
            generations: Arc::new(DashMap::new()),
            build_timeout: config.build_timeout(),
            max_entries: config.capacity,
            stats: Counters::default(),
        }
    }

    /// Directory this cache loads from
    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    /// Current graph for a hierarchy, loading it on a miss
    ///
    /// A call that starts after `invalidate` returns never sees the graph
    /// from before the invalidation.
    pub async fn graph_for(&self, kind: HierarchyKind, tenant: &str) -> Result<Arc<HierarchyGraph>> {
        let key = GraphKey::new(kind, tenant);
        let mut reloads = 0;

        loop {
            let current = self.generation(&key);

            let cached = match self.graphs.get(&key).await {
                Some(cached) => {
                    self.stats.increment("hits");
                    cached
                }
                None => {
                    self.stats.increment("misses");
                    self.load(&key).await?
                }
            };

            if cached.generation >= current {
                return Ok(cached.graph);
            }

            if reloads == MAX_STALE_RELOADS {
                warn!(key = %key, "Hierarchy keeps changing during load, serving last graph");
                return Ok(cached.graph);
            }

            reloads += 1;
            debug!(key = %key, reloads, "Discarding graph loaded before invalidation");
            self.graphs.invalidate(&key).await;
        }
    }

    /// Drop the cached graph; the next `graph_for` reloads it
    pub async fn invalidate(&self, kind: HierarchyKind, tenant: &str) {
        let key = GraphKey::new(kind, tenant);
        self.bump(&key);
        self.graphs.invalidate(&key).await;
        self.stats.increment("invalidations");
        debug!(key = %key, "Invalidated hierarchy graph");
    }

    /// Drop every hierarchy cached for a tenant
    pub async fn invalidate_tenant(&self, tenant: &str) {
        for kind in HierarchyKind::ALL {
            self.invalidate(kind, tenant).await;
        }
    }

    /// Install a graph built after a persisted mutation
    pub async fn replace(&self, graph: HierarchyGraph) -> Arc<HierarchyGraph> {
        let key = GraphKey::new(graph.kind(), graph.tenant());
        let generation = self.bump(&key);
        let graph = Arc::new(graph);

        self.graphs
            .insert(
                key.clone(),
                CachedGraph {
                    generation,
                    graph: Arc::clone(&graph),
                },
            )
            .await;

        debug!(key = %key, generation, "Replaced hierarchy graph");
        graph
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.graphs.entry_count(), self.max_entries)
    }

    fn generation(&self, key: &GraphKey) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    fn bump(&self, key: &GraphKey) -> u64 {
        let mut generation = self.generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Join or start the single build for `key`
    async fn load(&self, key: &GraphKey) -> Result<CachedGraph> {
        let build = self.graphs.try_get_with(key.clone(), self.build(key));

        match tokio::time::timeout(self.build_timeout, build).await {
            Ok(Ok(cached)) => Ok(cached),
            Ok(Err(source)) => Err(RbacError::CacheBuild {
                key: key.to_string(),
                source,
            }),
            Err(_) => {
                warn!(key = %key, timeout = ?self.build_timeout, "Timed out waiting for hierarchy load");
                Err(RbacError::CacheBuild {
                    key: key.to_string(),
                    source: Arc::new(RbacError::Collaborator(format!(
                        "load did not finish within {:?}",
                        self.build_timeout
                    ))),
                })
            }
        }
    }

    async fn build(&self, key: &GraphKey) -> Result<CachedGraph> {
        let generation = self.generation(key);

        let edges = match self.store.read_hier(key.kind, &key.tenant).await {
            Ok(edges) => edges,
            Err(e) => {
                self.stats.increment("build_failures");
                warn!(key = %key, error = %e, "Failed to read hierarchy");
                return Err(e);
            }
        };

        let graph = HierarchyGraph::from_relationships(key.kind, key.tenant.clone(), edges);
        self.stats.increment("builds");
        info!(
            key = %key,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            generation,
            "Loaded hierarchy graph"
        );

        Ok(CachedGraph {
            generation,
            graph: Arc::new(graph),
        })
    }
}

impl fmt::Debug for GraphCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCache")
            .field("entries", &self.graphs.entry_count())
            .field("build_timeout", &self.build_timeout)
            .finish()
    }
}
