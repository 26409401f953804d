//! Observability counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    cache_hits: AtomicU64,
    jobs_submitted: AtomicU64,
    jobs_failed: AtomicU64,
    entries_published: AtomicU64,
    entries_evicted: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "cache_hits", "Metric incremented");
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_submitted", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn entry_published(&self) {
        self.entries_published.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "entries_published", "Metric incremented");
    }

    pub fn entries_evicted(&self, count: usize) {
        self.entries_evicted.fetch_add(count as u64, Ordering::Relaxed);
        tracing::debug!(counter = "entries_evicted", count, "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            entries_published: self.entries_published.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub jobs_submitted: u64,
    pub jobs_failed: u64,
    pub entries_published: u64,
    pub entries_evicted: u64,
}
