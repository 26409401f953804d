//! Request orchestration for the book viewer
//!
//! [`Viewer`] ties the library, the job queue and the cache together. A
//! manifest request either returns the cached render, reports a pending
//! failure once, reports an in-flight job, or starts a new one. It never
//! waits for a render to finish.
//!
//! All operations are synchronous and may touch the filesystem; async
//! callers run them on the blocking pool.

mod error;
pub mod models;

pub use error::{Result, ViewerError};
pub use models::{AnnotationsByBook, AssetLocation, BookAnnotations, ManifestResponse, PositionsByBook};

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bon::Builder;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::fingerprint::{Fingerprint, RENDER_VERSION};
use crate::library::{ANONYMOUS_USER, BookId, Library, ReadPosition};
use crate::queue::{JobQueue, JobRequest};
use crate::worker::JobStatus;
use models::PositionUpdate;

/// Formats the viewer renders unless configured otherwise
pub const DEFAULT_FORMATS: &[&str] = &[
    "EPUB", "AZW3", "MOBI", "DOCX", "FB2", "HTMLZ", "KEPUB", "TXT", "PDF",
];

fn default_formats() -> Vec<String> {
    DEFAULT_FORMATS.iter().map(|f| f.to_string()).collect()
}

fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

#[derive(Builder)]
pub struct Viewer {
    library: Arc<dyn Library>,
    queue: JobQueue,
    #[builder(default = system_clock())]
    clock: Arc<dyn Clock>,
    #[builder(default = default_formats())]
    formats: Vec<String>,
    #[builder(default = RENDER_VERSION)]
    render_version: u32,
}

impl Viewer {
    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn fingerprint(&self, book_id: BookId, format: &str, size: u64, mtime: i64) -> Fingerprint {
        Fingerprint::compute(
            self.library.library_id(),
            book_id,
            format,
            size,
            mtime,
            self.render_version,
        )
    }

    /// Fetch the rendered manifest of a book format, starting a render if needed
    pub fn book_manifest(
        &self,
        book_id: BookId,
        format: &str,
        user: Option<&str>,
        force_reload: bool,
    ) -> Result<ManifestResponse> {
        let format = format.to_uppercase();
        if !self.formats.contains(&format) {
            return Err(ViewerError::FormatNotViewable(format));
        }
        self.ensure_book(book_id)?;

        let fm = self.library.format_metadata(book_id, &format)?;
        let fingerprint = self.fingerprint(book_id, &format, fm.size, fm.mtime);

        let job_id = {
            let mut guard = self.queue.lock();
            if force_reload {
                guard.discard_entry(&fingerprint);
            }

            if let Some(manifest) = guard.cached(&fingerprint)? {
                drop(guard);
                return self.ready(book_id, &format, user, fingerprint, manifest);
            }

            if let Some(failure) = guard.take_failure(&fingerprint) {
                debug!(%fingerprint, "Reporting render failure");
                return Ok(ManifestResponse::Failed {
                    aborted: failure.aborted,
                    traceback: failure.traceback,
                    job_status: JobStatus::Finished,
                });
            }

            match guard.job_for(&fingerprint) {
                Some(id) => id,
                None => {
                    let request = JobRequest {
                        fingerprint: fingerprint.clone(),
                        book_id,
                        format: format.clone(),
                        size: fm.size,
                        mtime: fm.mtime,
                    };
                    let library = &self.library;
                    guard.start_job(request, |file| {
                        library
                            .copy_format_to(book_id, &format, file)
                            .map(|_| ())
                            .map_err(std::io::Error::other)
                    })?
                }
            }
        };

        let progress = self.queue.status(job_id);
        Ok(ManifestResponse::Pending {
            aborted: progress.aborted,
            traceback: progress.traceback,
            job_status: progress.status,
            job_id,
        })
    }

    fn ready(
        &self,
        book_id: BookId,
        format: &str,
        user: Option<&str>,
        fingerprint: Fingerprint,
        manifest: Value,
    ) -> Result<ManifestResponse> {
        let Value::Object(mut manifest) = manifest else {
            return Err(ViewerError::InvalidManifest(fingerprint));
        };
        let user_data = self.library.user_data();

        manifest.insert("metadata".into(), self.library.book_metadata(book_id)?);
        let positions = match user {
            Some(user) => user_data.last_read_positions(book_id, format, user),
            None => Vec::new(),
        };
        manifest.insert("last_read_positions".into(), to_value(positions));
        manifest.insert(
            "annotations_map".into(),
            Value::Object(user_data.annotations_map(book_id, format, user.unwrap_or(ANONYMOUS_USER))),
        );
        Ok(ManifestResponse::Ready(manifest))
    }

    /// Locate a published asset.
    ///
    /// `size` and `mtime` come from the client, so a stale link simply
    /// resolves to an entry that no longer exists.
    pub fn asset(
        &self,
        book_id: BookId,
        format: &str,
        size: u64,
        mtime: i64,
        name: &str,
    ) -> Result<AssetLocation> {
        self.ensure_book(book_id)?;
        let fingerprint = self.fingerprint(book_id, format, size, mtime);

        let path = match self.queue.store().asset_path(&fingerprint, name) {
            Ok(path) => path,
            Err(e) if e.is_not_found() => {
                return Err(ViewerError::AssetNotFound {
                    fingerprint,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(AssetLocation {
            path,
            etag: asset_etag(&fingerprint, name),
        })
    }

    /// Last read positions for `which` (`id1-FMT1_id2-FMT2`), keyed `id:FMT`
    pub fn last_read_positions(&self, which: &str, user: Option<&str>) -> Result<PositionsByBook> {
        let user = user.ok_or(ViewerError::LoginRequired)?;
        Ok(self
            .parse_which(which)
            .into_iter()
            .map(|(book_id, format)| {
                let positions = self.library.user_data().last_read_positions(book_id, &format, user);
                (format!("{book_id}:{format}"), positions)
            })
            .collect())
    }

    /// Store a position from a JSON body `{device, cfi, pos_frac}`
    pub fn set_last_read_position(
        &self,
        book_id: BookId,
        format: &str,
        user: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        self.ensure_book(book_id)?;
        let update: PositionUpdate = serde_json::from_slice(body).map_err(|_| ViewerError::InvalidData)?;

        let epoch = self
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        self.library.user_data().set_last_read_position(
            book_id,
            format,
            ReadPosition {
                device: update.device,
                cfi: update.cfi.filter(|cfi| !cfi.is_empty()),
                epoch,
                pos_frac: update.pos_frac,
                user: user.unwrap_or(ANONYMOUS_USER).to_string(),
            },
        );
        Ok(())
    }

    /// Positions and annotations for `which`; anonymous users see the shared `*` user
    pub fn annotations(&self, which: &str, user: Option<&str>) -> AnnotationsByBook {
        let user = user.unwrap_or(ANONYMOUS_USER);
        let user_data = self.library.user_data();
        self.parse_which(which)
            .into_iter()
            .map(|(book_id, format)| {
                let entry = BookAnnotations {
                    last_read_positions: user_data.last_read_positions(book_id, &format, user),
                    annotations_map: user_data.annotations_map(book_id, &format, user),
                };
                (format!("{book_id}:{format}"), entry)
            })
            .collect()
    }

    /// Merge annotations from a JSON body mapping type to a list of annotations
    pub fn update_annotations(
        &self,
        book_id: BookId,
        format: &str,
        user: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        self.ensure_book(book_id)?;
        let by_type: Map<String, Value> = serde_json::from_slice(body).map_err(|_| ViewerError::InvalidData)?;

        let mut incoming = Vec::new();
        for list in by_type.into_values() {
            match list {
                Value::Array(items) => incoming.extend(items),
                Value::Null => {}
                _ => return Err(ViewerError::InvalidData),
            }
        }

        info!(book_id, format, count = incoming.len(), "Updating annotations");
        self.library.user_data().merge_annotations(
            book_id,
            format,
            user.unwrap_or(ANONYMOUS_USER),
            incoming,
        );
        Ok(())
    }

    fn ensure_book(&self, book_id: BookId) -> Result<()> {
        if self.library.has_book(book_id) {
            Ok(())
        } else {
            Err(ViewerError::BookNotFound(book_id))
        }
    }

    /// Parse `id1-FMT1_id2-FMT2`, skipping malformed items and unknown books
    fn parse_which(&self, which: &str) -> Vec<(BookId, String)> {
        which
            .split('_')
            .filter_map(|item| {
                let (id, format) = item.split_once('-').unwrap_or((item, ""));
                let book_id = id.parse::<BookId>().ok()?;
                self.library
                    .has_book(book_id)
                    .then(|| (book_id, format.to_string()))
            })
            .collect()
    }
}

fn asset_etag(fingerprint: &Fingerprint, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(32);
    format!("\"{digest}\"")
}

fn to_value(positions: Vec<ReadPosition>) -> Value {
    Value::Array(
        positions
            .into_iter()
            .filter_map(|p| serde_json::to_value(p).ok())
            .collect(),
    )
}
