use std::collections::HashMap;

use serde::Serialize;

use crate::fingerprint::Fingerprint;
use crate::worker::{JobFailure, JobId};

/// One-shot report of a failed render
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub aborted: bool,
    pub traceback: String,
}

impl From<JobFailure> for FailureRecord {
    fn from(failure: JobFailure) -> Self {
        Self {
            aborted: failure.aborted,
            traceback: failure.traceback,
        }
    }
}

/// In-flight jobs and unreported failures, keyed by fingerprint
#[derive(Debug, Default)]
pub(crate) struct Records {
    jobs: HashMap<Fingerprint, JobId>,
    failures: HashMap<Fingerprint, FailureRecord>,
}

impl Records {
    pub fn job_for(&self, fingerprint: &Fingerprint) -> Option<JobId> {
        self.jobs.get(fingerprint).copied()
    }

    pub fn insert_job(&mut self, fingerprint: Fingerprint, id: JobId) {
        self.jobs.insert(fingerprint, id);
    }

    pub fn remove_job(&mut self, fingerprint: &Fingerprint) -> Option<JobId> {
        self.jobs.remove(fingerprint)
    }

    /// Returns the failure and forgets it
    pub fn take_failure(&mut self, fingerprint: &Fingerprint) -> Option<FailureRecord> {
        self.failures.remove(fingerprint)
    }

    pub fn record_failure(&mut self, fingerprint: Fingerprint, failure: FailureRecord) {
        self.failures.insert(fingerprint, failure);
    }

    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    pub fn unreported_failures(&self) -> usize {
        self.failures.len()
    }
}
