//! Age-based reclamation of cache entries
//!
//! Two jobs:
//! - purge the staging zone once per process (abandoned work from a crash is
//!   discarded, never resumed)
//! - sweep the finalized zone at most once per interval, removing entries
//!   whose manifest has not been touched for a whole interval

use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::{CacheStore, MANIFEST_FILE, remove_path};

/// Default eviction interval
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Sweep statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub evicted: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct Sweeper {
    interval: Duration,
    last_sweep: Mutex<Option<SystemTime>>,
    staging_purged: AtomicBool,
}

impl Sweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sweep: Mutex::new(None),
            staging_purged: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Purge the staging zone the first time this is called; later calls are no-ops
    pub fn purge_staging_once(&self, store: &CacheStore) -> Option<usize> {
        if self.staging_purged.swap(true, Ordering::SeqCst) {
            return None;
        }
        match store.purge_staging() {
            Ok(removed) => {
                info!(removed, "Purged abandoned staging work");
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "Failed to purge staging zone");
                None
            }
        }
    }

    /// Sweep unless a sweep already ran within the last interval
    pub fn maybe_sweep(&self, store: &CacheStore) -> Option<SweepStats> {
        let now = store.now();
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = *last {
                let elapsed = now.duration_since(previous).unwrap_or_default();
                if elapsed < self.interval {
                    debug!(elapsed_secs = elapsed.as_secs(), "Sweep skipped, rate limited");
                    return None;
                }
            }
            *last = Some(now);
        }
        Some(self.sweep_at(store, now))
    }

    /// Sweep now regardless of the rate limit
    pub fn sweep(&self, store: &CacheStore) -> SweepStats {
        let now = store.now();
        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = Some(now);
        self.sweep_at(store, now)
    }

    fn sweep_at(&self, store: &CacheStore, now: SystemTime) -> SweepStats {
        let mut stats = SweepStats::default();
        let root = store.finalized_root();

        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Cannot scan finalized zone");
                return stats;
            }
        };

        for entry in entries.flatten() {
            stats.scanned += 1;
            let path = entry.path();
            let modified = match fs::metadata(path.join(MANIFEST_FILE)).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => {
                    stats.skipped += 1;
                    continue;
                }
            };

            // Manifests stamped in the future count as fresh
            let idle = now.duration_since(modified).unwrap_or_default();
            if idle >= self.interval {
                debug!(entry = %path.display(), idle_secs = idle.as_secs(), "Evicting idle entry");
                if remove_path(&path) {
                    stats.evicted += 1;
                }
            }
        }

        info!(
            scanned = stats.scanned,
            evicted = stats.evicted,
            skipped = stats.skipped,
            "Finalized zone swept"
        );
        stats
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL)
    }
}
