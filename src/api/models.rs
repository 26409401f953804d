//! Response bodies owned by the HTTP layer.
//!
//! Viewer payloads (manifests, positions, annotations) are serialized
//! straight from [`crate::viewer`] types; only errors and health live here.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::observability::MetricsSnapshot;
use crate::queue::QueueSnapshot;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
    pub queue: QueueSnapshot,
}
