//! Runner driven by hand
//!
//! Submissions are parked until the caller finishes them, which makes the
//! ordering of "job accepted" and "job done" fully controllable. The
//! completion callback runs on the caller's thread.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::debug;

use super::{
    AbortSignal, Completion, FinishedJob, JobFailure, JobId, JobProgress, JobRunner, JobStatus,
    RenderJob, Renderer, Result,
};
use crate::storage::MANIFEST_FILE;

struct Parked {
    job: RenderJob,
    progress: JobProgress,
    abort: AbortSignal,
    on_done: Completion,
}

#[derive(Default)]
pub struct ManualRunner {
    next_id: AtomicU64,
    submissions: AtomicUsize,
    parked: Mutex<BTreeMap<JobId, Parked>>,
}

impl ManualRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of accepted submissions
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Ids of jobs not yet finished, oldest first
    pub fn pending(&self) -> Vec<JobId> {
        self.parked().keys().copied().collect()
    }

    pub fn job(&self, id: JobId) -> Option<RenderJob> {
        self.parked().get(&id).map(|p| p.job.clone())
    }

    pub fn set_running(&self, id: JobId) -> bool {
        match self.parked().get_mut(&id) {
            Some(parked) => {
                parked.progress.status = JobStatus::Running;
                true
            }
            None => false,
        }
    }

    /// Finish a job and run its completion callback on this thread
    pub fn finish(&self, id: JobId, failure: Option<JobFailure>) -> bool {
        // Released before the callback: it may call back into poll()
        let Some(parked) = self.parked().remove(&id) else {
            return false;
        };
        debug!(job_id = %id, failed = failure.is_some(), "Finishing manual job");
        (parked.on_done)(FinishedJob {
            id,
            job: parked.job,
            failure,
        });
        true
    }

    /// Write `manifest` into the job's output directory, then finish successfully
    pub fn succeed_with(&self, id: JobId, manifest: &serde_json::Value) -> io::Result<bool> {
        let Some(job) = self.job(id) else {
            return Ok(false);
        };
        let raw = serde_json::to_vec(manifest).map_err(io::Error::other)?;
        fs::write(job.output_dir.join(MANIFEST_FILE), raw)?;
        Ok(self.finish(id, None))
    }

    /// Run `renderer` on this thread, then finish with its outcome
    pub fn run_with(&self, id: JobId, renderer: &dyn Renderer) -> bool {
        let Some((job, abort)) = self.parked().get(&id).map(|p| (p.job.clone(), p.abort.clone())) else {
            return false;
        };
        let failure = renderer.render(&job, &abort).err().map(|e| JobFailure {
            aborted: abort.is_aborted(),
            traceback: super::format_traceback(&e),
        });
        self.finish(id, failure)
    }

    pub fn fail(&self, id: JobId, traceback: &str) -> bool {
        let aborted = self.parked().get(&id).is_some_and(|p| p.abort.is_aborted());
        self.finish(
            id,
            Some(JobFailure {
                aborted,
                traceback: traceback.to_string(),
            }),
        )
    }

    fn parked(&self) -> std::sync::MutexGuard<'_, BTreeMap<JobId, Parked>> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobRunner for ManualRunner {
    fn submit(&self, job: RenderJob, on_done: Completion) -> Result<JobId> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.parked().insert(
            id,
            Parked {
                job,
                progress: JobProgress::queued(),
                abort: AbortSignal::default(),
                on_done,
            },
        );
        Ok(id)
    }

    fn poll(&self, id: JobId) -> Option<JobProgress> {
        self.parked().get(&id).map(|p| p.progress.clone())
    }

    fn abort(&self, id: JobId) -> bool {
        match self.parked().get(&id) {
            Some(parked) => {
                parked.abort.abort();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn job() -> RenderJob {
        RenderJob {
            description: "Render book 1 (EPUB)".to_string(),
            fingerprint: Fingerprint::compute("lib", 1, "EPUB", 1, 1, 1),
            book_id: 1,
            format: "EPUB".to_string(),
            size: 1,
            mtime: 1,
            input_path: PathBuf::from("in.epub"),
            output_dir: PathBuf::from("out"),
        }
    }

    #[test]
    fn test_completion_waits_for_finish() {
        let runner = ManualRunner::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let id = runner
            .submit(job(), Box::new(move |done: FinishedJob| *sink.lock().unwrap() = Some(done.failed())))
            .unwrap();
        assert!(seen.lock().unwrap().is_none());
        assert_eq!(runner.poll(id).unwrap().status, JobStatus::Queued);

        assert!(runner.set_running(id));
        assert_eq!(runner.poll(id).unwrap().status, JobStatus::Running);

        assert!(runner.fail(id, "nope"));
        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert!(runner.poll(id).is_none());
        assert!(!runner.finish(id, None));
    }

    #[test]
    fn test_abort_marks_failure_as_aborted() {
        let runner = ManualRunner::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let id = runner
            .submit(
                job(),
                Box::new(move |done: FinishedJob| *sink.lock().unwrap() = done.failure.map(|f| f.aborted)),
            )
            .unwrap();
        assert!(runner.abort(id));
        runner.fail(id, "stopped");

        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_ids_and_submission_count() {
        let runner = ManualRunner::new();
        let a = runner.submit(job(), Box::new(|_| {})).unwrap();
        let b = runner.submit(job(), Box::new(|_| {})).unwrap();

        assert_eq!(a, JobId(1));
        assert_eq!(b, JobId(2));
        assert_eq!(runner.submissions(), 2);
        assert_eq!(runner.pending(), vec![a, b]);
    }
}
