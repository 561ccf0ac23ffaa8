//! Error types for the RBAC engine

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Temporal constraint failure reason reported by the validator chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintViolation {
    /// Today is not in the day mask
    BadDay,
    /// Today is outside the begin/end date window
    BadDate,
    /// Current clock time is outside the begin/end time window
    BadTime,
    /// Session idle for longer than the timeout
    Timeout,
    /// Today is inside the lock date window
    Locked,
}

impl ConstraintViolation {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadDay => "BAD_DAY",
            Self::BadDate => "BAD_DATE",
            Self::BadTime => "BAD_TIME",
            Self::Timeout => "TIMEOUT",
            Self::Locked => "LOCKED",
        }
    }
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind of entity a lookup failed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Role,
    AdminRole,
    OrgUnit,
    SdSet,
    Permission,
    Assignment,
    /// Direct hierarchy edge
    Relationship,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "user",
            Self::Role => "role",
            Self::AdminRole => "admin role",
            Self::OrgUnit => "org unit",
            Self::SdSet => "SoD set",
            Self::Permission => "permission",
            Self::Assignment => "assignment",
            Self::Relationship => "relationship",
        };
        f.write_str(name)
    }
}

/// RBAC engine errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// Temporal constraint failed for a user or role
    #[error("Constraint check failed for {subject}: {reason}")]
    Constraint {
        subject: String,
        reason: ConstraintViolation,
    },

    /// Activating the roles would break a dynamic separation-of-duty set
    #[error("DSD violation on set {set}: {matched} of {cardinality} conflicting roles {roles:?}")]
    DsdViolation {
        set: String,
        roles: Vec<String>,
        matched: usize,
        cardinality: usize,
    },

    /// Assigning the role would break a static separation-of-duty set
    #[error("SSD violation on set {set}: {matched} of {cardinality} conflicting roles {roles:?}")]
    SsdViolation {
        set: String,
        roles: Vec<String>,
        matched: usize,
        cardinality: usize,
    },

    /// Adding the edge would create a cycle
    #[error("Cycle detected: adding {child} -> {parent} would make {child} its own ascendant")]
    Cycle { child: String, parent: String },

    /// Proposed relationship change is not legal for the current graph
    #[error("Relationship violation {child} -> {parent}: {reason}")]
    RelationshipViolation {
        child: String,
        parent: String,
        reason: String,
    },

    /// Requested entity absent in the directory
    #[error("{entity} not found: {name}")]
    NotFound { entity: EntityKind, name: String },

    /// Credential check failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Failure surfaced by a persistence or authentication collaborator
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Cache rebuild failed or timed out; shared by every waiter on the build
    #[error("Cache build failed for {key}: {source}")]
    CacheBuild {
        key: String,
        #[source]
        source: Arc<RbacError>,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl RbacError {
    /// Shorthand for a missing entity
    pub fn not_found(entity: EntityKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            name: name.into(),
        }
    }

    /// Stable reason code for logging and display
    pub fn code(&self) -> &'static str {
        match self {
            Self::Constraint { reason, .. } => reason.code(),
            Self::DsdViolation { .. } => "DSD_VIOLATION",
            Self::SsdViolation { .. } => "SSD_VIOLATION",
            Self::Cycle { .. } => "CYCLE",
            Self::RelationshipViolation { .. } => "RELATIONSHIP_VIOLATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Authentication(_) => "AUTHENTICATION",
            Self::Collaborator(_) => "COLLABORATOR",
            Self::CacheBuild { .. } => "CACHE_BUILD",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// True for policy failures a caller may display and recover from
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Constraint { .. }
                | Self::DsdViolation { .. }
                | Self::SsdViolation { .. }
                | Self::Cycle { .. }
                | Self::RelationshipViolation { .. }
        )
    }
}

/// Result type for RBAC operations
pub type Result<T> = std::result::Result<T, RbacError>;
