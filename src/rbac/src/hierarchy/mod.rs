//! Hierarchy module
//!
//! Immutable per-tenant hierarchy graphs and the single-flight cache that
//! serves them. One graph exists per (hierarchy kind, tenant): roles, admin
//! roles, user OUs and permission OUs.
//!
//! # Features
//!
//! - **Closure Queries**: ascendants and descendants by breadth-first search
//! - **Cycle Prevention**: proposed edges are rejected before they are persisted
//! - **Copy-on-Write**: mutations build a new graph and swap it into the cache
//! - **Single-Flight Loads**: concurrent misses share one directory read
//!
//! # Example
//!
//! ```rust
//! use arbiter_rbac::hierarchy::{GraphCache, HierarchyGraph};
//! use arbiter_rbac::{CacheConfig, HierarchyKind, InMemoryDirectory, Role};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = InMemoryDirectory::new();
//! directory.put_role("acme", Role::new("Supervisor")).await?;
//! directory.put_role("acme", Role::new("Teller").with_parent("Supervisor")).await?;
//!
//! let cache = GraphCache::new(Arc::new(directory), &CacheConfig::default());
//! let graph = cache.graph_for(HierarchyKind::Role, "acme").await?;
//!
//! assert!(graph.ascendants("Teller").contains("Supervisor"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod graph;


pub use cache::{GraphCache, GraphKey};
pub use graph::HierarchyGraph;
