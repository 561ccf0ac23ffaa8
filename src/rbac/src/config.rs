//! Engine configuration
//!
//! Every struct deserializes with serde and has a `Default`. `EngineConfig::from_env`
//! applies `ARBITER_*` environment overrides on top of the defaults:
//!
//! - `ARBITER_ENFORCE_DSD` - `true`/`false` (default `true`)
//! - `ARBITER_VALIDATORS` - comma-separated subset of
//!   `date,lock_date,clock_time,day_mask,timeout` (default all)
//! - `ARBITER_GRAPH_CACHE_CAPACITY` - hierarchy graphs kept (default 64)
//! - `ARBITER_DSD_CACHE_CAPACITY` - role lookups kept (default 10000)
//! - `ARBITER_CACHE_BUILD_TIMEOUT_SECS` - max wait on an in-flight build (default 60)
//! - `ARBITER_CACHE_TTL_SECS` - optional time-to-live for cached entries

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait on an in-flight cache build
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60);

/// Which temporal validators run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub date: bool,
    pub lock_date: bool,
    pub clock_time: bool,
    pub day_mask: bool,
    pub timeout: bool,
}

impl ValidatorConfig {
    /// Enable only the named validators
    pub fn only(names: &[&str]) -> Self {
        let has = |name: &str| names.iter().any(|n| n.trim().eq_ignore_ascii_case(name));
        Self {
            date: has("date"),
            lock_date: has("lock_date"),
            clock_time: has("clock_time"),
            day_mask: has("day_mask"),
            timeout: has("timeout"),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            date: true,
            lock_date: true,
            clock_time: true,
            day_mask: true,
            timeout: true,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub capacity: u64,

    /// Optional time-to-live for entries in seconds
    pub ttl_secs: Option<u64>,

    /// Maximum time a caller waits on an in-flight build, in seconds
    pub build_timeout_secs: u64,
}

impl CacheConfig {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: None,
            build_timeout_secs: DEFAULT_BUILD_TIMEOUT.as_secs(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject session activations that break a DSD set
    pub enforce_dsd: bool,

    /// Temporal validators to run
    pub validators: ValidatorConfig,

    /// Hierarchy graph cache
    pub graph_cache: CacheConfig,

    /// Role to DSD set lookup cache
    pub dsd_cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforce_dsd: true,
            validators: ValidatorConfig::default(),
            graph_cache: CacheConfig::with_capacity(64),
            dsd_cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ARBITER_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enforce) = lookup("ARBITER_ENFORCE_DSD").and_then(|s| s.parse().ok()) {
            config.enforce_dsd = enforce;
        }

        if let Some(names) = lookup("ARBITER_VALIDATORS") {
            let names: Vec<&str> = names.split(',').collect();
            config.validators = ValidatorConfig::only(&names);
        }

        if let Some(capacity) = lookup("ARBITER_GRAPH_CACHE_CAPACITY").and_then(|s| s.parse().ok()) {
            config.graph_cache.capacity = capacity;
        }

        if let Some(capacity) = lookup("ARBITER_DSD_CACHE_CAPACITY").and_then(|s| s.parse().ok()) {
            config.dsd_cache.capacity = capacity;
        }

        if let Some(secs) = lookup("ARBITER_CACHE_BUILD_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.graph_cache.build_timeout_secs = secs;
            config.dsd_cache.build_timeout_secs = secs;
        }

        let ttl: Option<u64> = lookup("ARBITER_CACHE_TTL_SECS").and_then(|s| s.parse().ok());
        if ttl.is_some() {
            config.graph_cache.ttl_secs = ttl;
            config.dsd_cache.ttl_secs = ttl;
        }

        config
    }
}
