use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    AbortSignal, Completion, FinishedJob, JobFailure, JobId, JobProgress, JobRunner, JobStatus,
    RenderError, RenderJob, Renderer, Result, RunnerError, format_traceback,
};

struct Submission {
    id: JobId,
    job: RenderJob,
    abort: AbortSignal,
    on_done: Completion,
}

struct Tracked {
    progress: JobProgress,
    abort: AbortSignal,
}

type JobTable = Arc<Mutex<HashMap<JobId, Tracked>>>;

/// Fixed pool of render workers
///
/// Architecture:
/// 1. `submit` assigns the next job id and records the job as queued
/// 2. The submission goes round-robin to one worker's channel
/// 3. Each worker runs renders one at a time on the blocking thread pool
/// 4. The completion callback runs on that blocking thread, after which the
///    pool forgets the job
///
/// Dropping the pool closes every channel; workers drain what they already
/// received and exit.
pub struct WorkerPool {
    worker_channels: Vec<mpsc::UnboundedSender<Submission>>,
    next_worker: AtomicUsize,
    next_id: AtomicU64,
    jobs: JobTable,
}

impl WorkerPool {
    /// Spawn `num_workers` worker tasks on the current tokio runtime
    pub fn spawn(renderer: Arc<dyn Renderer>, num_workers: usize) -> Self {
        info!(num_workers, "Starting render worker pool");

        let jobs: JobTable = Arc::default();
        let mut worker_channels = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::unbounded_channel();
            worker_channels.push(tx);
            tokio::spawn(run_worker(worker_id, rx, renderer.clone(), jobs.clone()));
            debug!(worker_id, "Spawned render worker");
        }

        Self {
            worker_channels,
            next_worker: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            jobs,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.worker_channels.len()
    }

    /// Check that no worker has exited
    pub fn health_check(&self) -> bool {
        self.worker_channels.iter().all(|ch| !ch.is_closed())
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Tracked>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobRunner for WorkerPool {
    fn submit(&self, job: RenderJob, on_done: Completion) -> Result<JobId> {
        if self.worker_channels.is_empty() {
            return Err(RunnerError::NoWorkers);
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let abort = AbortSignal::default();
        self.table().insert(
            id,
            Tracked {
                progress: JobProgress::queued(),
                abort: abort.clone(),
            },
        );

        let description = job.description.clone();
        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_channels.len();
        let submission = Submission {
            id,
            job,
            abort,
            on_done,
        };

        if self.worker_channels[worker_idx].send(submission).is_err() {
            warn!(job_id = %id, worker_idx, "Worker channel closed, job not delivered");
            self.table().remove(&id);
            return Err(RunnerError::Closed);
        }

        info!(job_id = %id, worker_idx, description, "Render job submitted");
        Ok(id)
    }

    fn poll(&self, id: JobId) -> Option<JobProgress> {
        self.table().get(&id).map(|tracked| tracked.progress.clone())
    }

    fn abort(&self, id: JobId) -> bool {
        match self.table().get(&id) {
            Some(tracked) => {
                tracked.abort.abort();
                info!(job_id = %id, "Render job abort requested");
                true
            }
            None => false,
        }
    }

    fn is_healthy(&self) -> bool {
        self.health_check()
    }
}

async fn run_worker(
    worker_id: usize,
    mut rx: mpsc::UnboundedReceiver<Submission>,
    renderer: Arc<dyn Renderer>,
    jobs: JobTable,
) {
    while let Some(submission) = rx.recv().await {
        let renderer = renderer.clone();
        let jobs = jobs.clone();
        let id = submission.id;
        if let Err(e) = tokio::task::spawn_blocking(move || execute(submission, renderer, jobs)).await {
            error!(worker_id, job_id = %id, error = %e, "Render task did not complete");
        }
    }
    debug!(worker_id, "Worker channel closed, exiting");
}

fn execute(submission: Submission, renderer: Arc<dyn Renderer>, jobs: JobTable) {
    let Submission {
        id,
        job,
        abort,
        on_done,
    } = submission;

    let failure = if abort.is_aborted() {
        Some(JobFailure {
            aborted: true,
            traceback: RenderError::Aborted.to_string(),
        })
    } else {
        set_status(&jobs, id, |p| p.status = JobStatus::Running);
        debug!(job_id = %id, description = %job.description, "Render started");
        match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&job, &abort))) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(JobFailure {
                aborted: matches!(e, RenderError::Aborted) || abort.is_aborted(),
                traceback: format_traceback(&e),
            }),
            Err(payload) => Some(JobFailure {
                aborted: false,
                traceback: panic_message(payload.as_ref()),
            }),
        }
    };

    match &failure {
        None => info!(job_id = %id, "Render finished"),
        Some(f) => warn!(job_id = %id, aborted = f.aborted, traceback = %f.traceback, "Render failed"),
    }
    set_status(&jobs, id, |p| {
        p.status = JobStatus::Finished;
        p.aborted = failure.as_ref().is_some_and(|f| f.aborted);
        p.traceback = failure.as_ref().map(|f| f.traceback.clone());
    });

    let finished = FinishedJob { id, job, failure };
    if panic::catch_unwind(AssertUnwindSafe(|| on_done(finished))).is_err() {
        error!(job_id = %id, "Completion callback panicked");
    }

    jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
}

fn set_status(jobs: &JobTable, id: JobId, update: impl FnOnce(&mut JobProgress)) {
    if let Some(tracked) = jobs.lock().unwrap_or_else(|e| e.into_inner()).get_mut(&id) {
        update(&mut tracked.progress);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("renderer panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("renderer panicked: {s}")
    } else {
        "renderer panicked".to_string()
    }
}
