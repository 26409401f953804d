//! Render job coordination
//!
//! [`JobQueue`] owns the in-flight job table and the one-shot failure table,
//! both behind a single mutex. Holding a [`QueueGuard`] is holding that
//! mutex, so "check cache, check job, start job" runs as one transaction and
//! at most one render is ever in flight per fingerprint.
//!
//! Job completion arrives from the runner's thread through `on_job_done`,
//! which takes the same mutex before touching the tables or publishing.

mod records;

pub use records::FailureRecord;

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fingerprint::Fingerprint;
use crate::observability::Metrics;
use crate::storage::{self, CacheStore, StorageError, SweepStats, Sweeper};
use crate::worker::{
    FinishedJob, JobId, JobProgress, JobRunner, RenderJob, RunnerError, format_traceback,
};
use records::Records;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Failed to copy book {book_id} into staging: {source}")]
    Copy {
        book_id: u64,
        #[source]
        source: io::Error,
    },

    #[error("Render already in flight as job {0}")]
    AlreadyQueued(JobId),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// What to render; the fingerprint is computed by the caller
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub fingerprint: Fingerprint,
    pub book_id: u64,
    pub format: String,
    pub size: u64,
    pub mtime: i64,
}

/// Queue occupancy, reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueSnapshot {
    pub in_flight: usize,
    pub unreported_failures: usize,
}

struct Inner {
    records: Mutex<Records>,
    store: CacheStore,
    sweeper: Sweeper,
    runner: Arc<dyn JobRunner>,
    metrics: Arc<Metrics>,
}

/// Cheap to clone; all clones share one set of tables
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(
        store: CacheStore,
        sweeper: Sweeper,
        runner: Arc<dyn JobRunner>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(Records::default()),
                store,
                sweeper,
                runner,
                metrics,
            }),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Take the queue lock for one check-then-act transaction
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            inner: &self.inner,
            records: self.inner.records(),
        }
    }

    /// Progress of a job as the runner reports it.
    ///
    /// Must be called without holding the queue lock. Jobs the runner has
    /// already forgotten are reported as finished.
    pub fn status(&self, id: JobId) -> JobProgress {
        self.inner
            .runner
            .poll(id)
            .unwrap_or_else(JobProgress::finished)
    }

    pub fn abort(&self, id: JobId) -> bool {
        self.inner.runner.abort(id)
    }

    pub fn runner_healthy(&self) -> bool {
        self.inner.runner.is_healthy()
    }

    /// Sweep the finalized zone under the queue lock.
    ///
    /// `force` ignores the rate limit; otherwise this is a no-op if a sweep
    /// ran within the last interval.
    pub fn sweep(&self, force: bool) -> Option<SweepStats> {
        let _records = self.inner.records();
        let stats = if force {
            Some(self.inner.sweeper.sweep(&self.inner.store))
        } else {
            self.inner.sweeper.maybe_sweep(&self.inner.store)
        };
        if let Some(stats) = &stats {
            self.inner.metrics.entries_evicted(stats.evicted);
        }
        stats
    }

    /// Discard abandoned staging work if no job has done so yet
    pub fn purge_staging(&self) -> Option<usize> {
        let _records = self.inner.records();
        self.inner.sweeper.purge_staging_once(&self.inner.store)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let records = self.inner.records();
        QueueSnapshot {
            in_flight: records.in_flight(),
            unreported_failures: records.unreported_failures(),
        }
    }
}

impl Inner {
    fn records(&self) -> MutexGuard<'_, Records> {
        // Every mutation leaves the tables consistent, so a panic elsewhere
        // does not invalidate them
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_job_done(&self, done: FinishedJob) {
        let FinishedJob { id, job, failure } = done;
        let fingerprint = &job.fingerprint;
        let mut records = self.records();

        if records.remove_job(fingerprint) != Some(id) {
            warn!(%fingerprint, job_id = %id, "Completed job had no matching record");
        }
        storage::remove_path(&job.input_path);

        if let Some(failure) = failure {
            warn!(
                %fingerprint,
                job_id = %id,
                aborted = failure.aborted,
                "Render job failed"
            );
            self.metrics.job_failed();
            records.record_failure(fingerprint.clone(), failure.into());
            storage::remove_path(&job.output_dir);
            return;
        }

        if let Some(stats) = self.sweeper.maybe_sweep(&self.store) {
            self.metrics.entries_evicted(stats.evicted);
        }
        self.store.remove(fingerprint);

        match self.store.publish(&job.output_dir, fingerprint) {
            Ok(()) => {
                info!(%fingerprint, job_id = %id, book_id = job.book_id, format = %job.format, "Render job published");
                self.metrics.entry_published();
                // Age is measured from publication, not from when the renderer wrote the manifest
                if let Err(e) = self.store.touch(fingerprint) {
                    warn!(%fingerprint, error = %e, "Published entry has no manifest");
                }
            }
            Err(e) => {
                error!(%fingerprint, job_id = %id, error = %e, "Failed to publish render");
                self.metrics.job_failed();
                records.record_failure(
                    fingerprint.clone(),
                    FailureRecord {
                        aborted: false,
                        traceback: format_traceback(&e),
                    },
                );
                storage::remove_path(&job.output_dir);
            }
        }
    }
}

/// Exclusive access to the job tables and the finalized zone
pub struct QueueGuard<'a> {
    inner: &'a Arc<Inner>,
    records: MutexGuard<'a, Records>,
}

impl QueueGuard<'_> {
    /// Touch and read a published entry
    pub fn cached(&self, fingerprint: &Fingerprint) -> Result<Option<Value>> {
        let found = self.inner.store.lookup(fingerprint)?;
        if found.is_some() {
            self.inner.metrics.cache_hit();
        }
        Ok(found)
    }

    /// Drop a published entry so the next request renders afresh
    pub fn discard_entry(&self, fingerprint: &Fingerprint) {
        debug!(%fingerprint, "Discarding cached render");
        self.inner.store.remove(fingerprint);
    }

    pub fn job_for(&self, fingerprint: &Fingerprint) -> Option<JobId> {
        self.records.job_for(fingerprint)
    }

    /// Report a failure once; the record is gone afterwards
    pub fn take_failure(&mut self, fingerprint: &Fingerprint) -> Option<FailureRecord> {
        self.records.take_failure(fingerprint)
    }

    /// Stage the book and hand a render to the runner.
    ///
    /// `copy_input` writes the raw book into the staging input file. On any
    /// error the staging area is discarded and no job record is left behind.
    pub fn start_job<F>(&mut self, request: JobRequest, copy_input: F) -> Result<JobId>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        if let Some(existing) = self.records.job_for(&request.fingerprint) {
            return Err(QueueError::AlreadyQueued(existing));
        }

        self.inner.sweeper.purge_staging_once(&self.inner.store);

        let mut staging = self.inner.store.new_staging_area(&request.format)?;
        if let Err(source) = copy_input(&mut staging.input) {
            staging.discard();
            return Err(QueueError::Copy {
                book_id: request.book_id,
                source,
            });
        }

        let input_path: PathBuf = staging.input_path.clone();
        let output_dir: PathBuf = staging.output_dir.clone();
        let job = RenderJob {
            description: format!("Render book {} ({})", request.book_id, request.format),
            fingerprint: request.fingerprint.clone(),
            book_id: request.book_id,
            format: request.format,
            size: request.size,
            mtime: request.mtime,
            input_path,
            output_dir,
        };

        let inner = Arc::clone(self.inner);
        let submitted = self
            .inner
            .runner
            .submit(job, Box::new(move |done| inner.on_job_done(done)));
        let id = match submitted {
            Ok(id) => id,
            Err(e) => {
                staging.discard();
                return Err(e.into());
            }
        };

        self.records.insert_job(request.fingerprint.clone(), id);
        self.inner.metrics.job_submitted();
        info!(fingerprint = %request.fingerprint, job_id = %id, "Render job queued");
        Ok(id)
    }
}
