//! # Arbiter RBAC Engine
//!
//! Role-based and administrative role-based authorization decisions for an
//! identity directory.
//!
//! ## Features
//!
//! - **Role hierarchies** for roles, admin roles, user OUs and permission OUs
//! - **Separation of duty**: static sets at assignment, dynamic sets at activation
//! - **Temporal constraints**: date, lock date, clock time, day mask and idle timeout
//! - **Single-flight caching** of hierarchy graphs and DSD lookups
//! - **Delegated administration** over admin role ranges
//!
//! ## Example
//!
//! ```rust
//! use arbiter_rbac::{
//!     EngineConfig, InMemoryDirectory, Permission, RbacEngine, Role, SessionRequest, User, UserRole,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = InMemoryDirectory::new();
//!     directory.put_user("acme", User::new("alice", "branch"), Some("s3cret")).await;
//!     directory.put_role("acme", Role::new("Supervisor")).await?;
//!     directory.put_role("acme", Role::new("Teller").with_parent("Supervisor")).await?;
//!     directory
//!         .put_permission("acme", Permission::new("Account", "debit").granted_to_role("Supervisor"))
//!         .await;
//!
//!     let engine = RbacEngine::in_memory(directory, EngineConfig::default());
//!     engine.admin().assign_user("acme", &UserRole::new("alice", "Teller")).await?;
//!
//!     let request = SessionRequest::with_password("acme", "alice", "s3cret");
//!     let mut session = engine.sessions().create_session(&request).await?;
//!
//!     if engine.sessions().check_access(&mut session, "Account", "debit").await? {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod codec;
pub mod config;
pub mod constraint;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod session;
pub mod sod;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use admin::{DelegatedAccess, HierarchyAdmin};
pub use config::{CacheConfig, EngineConfig, ValidatorConfig};
pub use constraint::{Constraint, ValidationContext, Validator, ValidatorChain};
pub use engine::RbacEngine;
pub use error::{ConstraintViolation, EntityKind, RbacError, Result};
pub use hierarchy::{GraphCache, HierarchyGraph};
pub use session::{DropReason, DroppedRole, Session, SessionAuthorizer, SessionRequest};
pub use sod::{DsdCache, SodEngine};
pub use stats::CacheStats;
pub use store::{AuthWarning, Authentication, Authenticator, DirectoryStore, InMemoryDirectory};
pub use types::{
    AdminRole, HierarchyKind, OrgUnit, Permission, Relationship, Role, SdKind, SdSet, TenantId,
    User, UserAdminRole, UserId, UserRole,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
