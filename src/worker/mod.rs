//! Render job execution
//!
//! The cache core only talks to [`JobRunner`]: submit a render with a
//! completion callback, poll its progress, optionally abort it. Two runners
//! ship with the crate:
//! - [`WorkerPool`] - tokio worker tasks fed round-robin over mpsc channels
//! - [`ManualRunner`] - records submissions and lets the caller finish them

pub mod manual;
pub mod pool;
pub mod render;

pub use manual::ManualRunner;
pub use pool::WorkerPool;
pub use render::{PassthroughRenderer, RenderError, Renderer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::fingerprint::Fingerprint;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Job runner has no workers")]
    NoWorkers,

    #[error("Job runner is shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Runner-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
}

/// Snapshot returned by [`JobRunner::poll`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub status: JobStatus,
    pub traceback: Option<String>,
    pub aborted: bool,
}

impl JobProgress {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            traceback: None,
            aborted: false,
        }
    }

    /// What a runner reports for a job it no longer tracks
    pub fn finished() -> Self {
        Self {
            status: JobStatus::Finished,
            traceback: None,
            aborted: false,
        }
    }
}

/// Everything a renderer needs to produce one cache entry
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub description: String,
    pub fingerprint: Fingerprint,
    pub book_id: u64,
    pub format: String,
    pub size: u64,
    pub mtime: i64,
    /// Raw book copied into the staging zone
    pub input_path: PathBuf,
    /// Empty directory the renderer fills
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub aborted: bool,
    pub traceback: String,
}

/// Terminal report handed to the completion callback
#[derive(Debug)]
pub struct FinishedJob {
    pub id: JobId,
    pub job: RenderJob,
    pub failure: Option<JobFailure>,
}

impl FinishedJob {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

pub type Completion = Box<dyn FnOnce(FinishedJob) + Send + 'static>;

/// Cooperative cancellation flag shared between a runner and a renderer
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Asynchronous executor for render jobs.
///
/// Implementations must invoke `on_done` exactly once per accepted job and
/// never from inside `submit`: callers hold the cache lock while submitting
/// and the callback takes the same lock.
pub trait JobRunner: Send + Sync {
    fn submit(&self, job: RenderJob, on_done: Completion) -> Result<JobId>;

    /// `None` once the runner has forgotten the job
    fn poll(&self, id: JobId) -> Option<JobProgress>;

    /// Request cancellation; `false` if the job is unknown
    fn abort(&self, id: JobId) -> bool;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Render an error and its source chain, one cause per line
pub fn format_traceback(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_format_traceback_includes_sources() {
        let err = Outer(io::Error::other("disk on fire"));
        let traceback = format_traceback(&err);
        assert_eq!(traceback, "outer failure\ncaused by: disk on fire");
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::default();
        let clone = signal.clone();
        assert!(!clone.is_aborted());
        signal.abort();
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_job_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(JobStatus::Queued).unwrap(), "queued");
        assert_eq!(serde_json::to_value(JobId(7)).unwrap(), 7);
    }
}
