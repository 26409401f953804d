//! Renderer seam
//!
//! Converting an e-book into a viewer bundle is an external concern. The
//! runner only needs something that fills `output_dir` with a manifest and
//! assets, or fails.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::{AbortSignal, RenderJob};
use crate::fingerprint::RENDER_VERSION;
use crate::storage::MANIFEST_FILE;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render aborted")]
    Aborted,

    #[error("render failed: {0}")]
    Failed(String),

    #[error("render I/O error")]
    Io(#[from] io::Error),
}

pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob, abort: &AbortSignal) -> Result<(), RenderError>;
}

/// Publishes the book file unchanged with a minimal manifest.
///
/// Stands in for a real conversion pipeline so the server is usable on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn render(&self, job: &RenderJob, abort: &AbortSignal) -> Result<(), RenderError> {
        if abort.is_aborted() {
            return Err(RenderError::Aborted);
        }

        let name = format!("book.{}", job.format.to_lowercase());
        let copied = fs::copy(&job.input_path, job.output_dir.join(&name))?;

        if abort.is_aborted() {
            return Err(RenderError::Aborted);
        }

        let mut files = BTreeMap::new();
        files.insert(name.clone(), copied);
        let manifest = json!({
            "version": RENDER_VERSION,
            "book_format": job.format.to_uppercase(),
            "book_hash": {
                "size": job.size,
                "mtime": job.mtime,
                "hash": job.fingerprint,
            },
            "files": files,
            "spine": [name],
        });
        write_manifest(&job.output_dir, &manifest)?;

        debug!(fingerprint = %job.fingerprint, bytes = copied, "Passthrough render complete");
        Ok(())
    }
}

fn write_manifest(dir: &Path, manifest: &serde_json::Value) -> io::Result<()> {
    let raw = serde_json::to_vec(manifest).map_err(io::Error::other)?;
    fs::write(dir.join(MANIFEST_FILE), raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use tempfile::TempDir;

    fn job_in(temp_dir: &TempDir) -> RenderJob {
        let input_path = temp_dir.path().join("input.epub");
        let output_dir = temp_dir.path().join("out");
        fs::write(&input_path, b"PK-epub-bytes").unwrap();
        fs::create_dir(&output_dir).unwrap();
        RenderJob {
            description: "Render book 1 (EPUB)".to_string(),
            fingerprint: Fingerprint::compute("lib", 1, "EPUB", 13, 10, RENDER_VERSION),
            book_id: 1,
            format: "EPUB".to_string(),
            size: 13,
            mtime: 10,
            input_path,
            output_dir,
        }
    }

    #[test]
    fn test_passthrough_writes_manifest_and_book() {
        let temp_dir = TempDir::new().unwrap();
        let job = job_in(&temp_dir);

        PassthroughRenderer.render(&job, &AbortSignal::default()).unwrap();

        assert_eq!(fs::read(job.output_dir.join("book.epub")).unwrap(), b"PK-epub-bytes");
        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(job.output_dir.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["book_format"], "EPUB");
        assert_eq!(manifest["spine"][0], "book.epub");
        assert_eq!(manifest["files"]["book.epub"], 13);
        assert_eq!(manifest["book_hash"]["hash"], job.fingerprint.as_str());
    }

    #[test]
    fn test_missing_input_traceback_names_cause_once() {
        let temp_dir = TempDir::new().unwrap();
        let job = job_in(&temp_dir);
        fs::remove_file(&job.input_path).unwrap();

        let err = PassthroughRenderer.render(&job, &AbortSignal::default()).unwrap_err();
        let traceback = crate::worker::format_traceback(&err);

        assert!(traceback.starts_with("render I/O error\ncaused by: "), "{traceback}");
        assert_eq!(traceback.matches("caused by").count(), 1);
        assert_eq!(traceback.lines().count(), 2);
    }

    #[test]
    fn test_passthrough_honours_abort() {
        let temp_dir = TempDir::new().unwrap();
        let job = job_in(&temp_dir);
        let abort = AbortSignal::default();
        abort.abort();

        let err = PassthroughRenderer.render(&job, &abort).unwrap_err();
        assert!(matches!(err, RenderError::Aborted));
        assert!(!job.output_dir.join(MANIFEST_FILE).exists());
    }
}
