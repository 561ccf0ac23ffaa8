//! Cache statistics shared by the graph and DSD caches

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot of cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    /// Completed loads from the directory
    pub builds: usize,
    pub build_failures: usize,
    pub invalidations: usize,
    /// Approximate live entry count
    pub entries: u64,
    pub max_entries: u64,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Named counters behind a concurrent map
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    stats: Arc<DashMap<&'static str, usize>>,
}

impl Counters {
    pub(crate) fn increment(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    pub(crate) fn get(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Snapshot with the given entry counts
    pub(crate) fn snapshot(&self, entries: u64, max_entries: u64) -> CacheStats {
        CacheStats {
            hits: self.get("hits"),
            misses: self.get("misses"),
            builds: self.get("builds"),
            build_failures: self.get("build_failures"),
            invalidations: self.get("invalidations"),
            entries,
            max_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        let counters = Counters::default();
        counters.increment("hits");
        counters.increment("hits");
        counters.increment("hits");
        counters.increment("misses");

        let stats = counters.snapshot(1, 10);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
