//! Response and request shapes of the viewer operations.
//!
//! A manifest request resolves to one of three JSON shapes:
//!
//! ```json
//! { "version": 1, "spine": ["..."], "metadata": {}, "last_read_positions": [], "annotations_map": {} }
//! { "aborted": false, "traceback": "...", "job_status": "finished" }
//! { "aborted": false, "traceback": null, "job_status": "queued", "job_id": 3 }
//! ```
//!
//! The first is a published render with live per-user fields merged in, the
//! second a failure reported exactly once, the third a render in flight.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::library::ReadPosition;
use crate::worker::{JobId, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ManifestResponse {
    Ready(Map<String, Value>),
    Failed {
        aborted: bool,
        traceback: String,
        job_status: JobStatus,
    },
    Pending {
        aborted: bool,
        traceback: Option<String>,
        job_status: JobStatus,
        job_id: JobId,
    },
}

impl ManifestResponse {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            ManifestResponse::Pending { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ManifestResponse::Ready(_))
    }
}

/// A published asset and the ETag it is served with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    pub path: PathBuf,
    pub etag: String,
}

/// Reading state of one book for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookAnnotations {
    pub last_read_positions: Vec<ReadPosition>,
    pub annotations_map: Map<String, Value>,
}

pub type PositionsByBook = BTreeMap<String, Vec<ReadPosition>>;
pub type AnnotationsByBook = BTreeMap<String, BookAnnotations>;

/// Body of a set-last-read-position request. Every key must be present;
/// `cfi` may be null or empty.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PositionUpdate {
    pub device: String,
    #[serde(deserialize_with = "required_option")]
    pub cfi: Option<String>,
    pub pos_frac: f64,
}

fn required_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_shape() {
        let response = ManifestResponse::Pending {
            aborted: false,
            traceback: None,
            job_status: JobStatus::Queued,
            job_id: JobId(3),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"aborted": false, "traceback": null, "job_status": "queued", "job_id": 3})
        );
    }

    #[test]
    fn test_failed_shape() {
        let response = ManifestResponse::Failed {
            aborted: true,
            traceback: "boom".into(),
            job_status: JobStatus::Finished,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"aborted": true, "traceback": "boom", "job_status": "finished"})
        );
    }

    #[test]
    fn test_position_update_requires_cfi_key() {
        let ok: PositionUpdate =
            serde_json::from_value(json!({"device": "d", "cfi": null, "pos_frac": 0.5})).unwrap();
        assert!(ok.cfi.is_none());

        let missing = serde_json::from_value::<PositionUpdate>(json!({"device": "d", "pos_frac": 0.5}));
        assert!(missing.is_err());
    }
}
