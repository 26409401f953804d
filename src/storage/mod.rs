//! Filesystem-backed render cache
//!
//! Layout under the cache root:
//! - `s/i/` raw input books copied for in-flight renders
//! - `s/o/` render output directories while a job runs
//! - `f/<fingerprint>/` published entries (`book-manifest.json` plus assets)
//!
//! An entry under `f/` is either complete or absent: renders write into
//! `s/o/` and are moved into place with a single directory rename.

mod lock;
mod path;
mod publish;
pub mod sweeper;

pub use lock::CacheLock;
pub use publish::RenamePolicy;
pub use sweeper::{SweepStats, Sweeper};

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::fingerprint::Fingerprint;

/// Manifest written by the renderer at the top of every entry
pub const MANIFEST_FILE: &str = "book-manifest.json";

const STAGING_DIR: &str = "s";
const STAGING_INPUT_DIR: &str = "i";
const STAGING_OUTPUT_DIR: &str = "o";
const FINALIZED_DIR: &str = "f";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid asset path: {0}")]
    InvalidPath(String),

    #[error("Cache root is in use by another process (lock held on {})", .0.display())]
    Locked(PathBuf),

    #[error("Corrupt manifest for {fingerprint}: {source}")]
    CorruptManifest {
        fingerprint: Fingerprint,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io { path, source }
        }
    }

    /// Missing entries and paths that resolve outside the cache are both
    /// reported to callers as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_) | StorageError::InvalidPath(_))
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Scratch space for one render: the copied input book and the output dir
#[derive(Debug)]
pub struct StagingArea {
    pub input: File,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
}

impl StagingArea {
    /// Delete both halves of the staging area (best effort)
    pub fn discard(self) {
        let StagingArea {
            input,
            input_path,
            output_dir,
        } = self;
        drop(input);
        remove_path(&input_path);
        remove_path(&output_dir);
    }
}

/// Content-addressed store of rendered books
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    rename_policy: RenamePolicy,
}

impl CacheStore {
    /// Open (creating if needed) a cache rooted at `root`
    pub fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!(root = %root.display(), "Opening render cache");

        let store = Self {
            root,
            clock,
            rename_policy: RenamePolicy::default(),
        };
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn with_rename_policy(mut self, policy: RenamePolicy) -> Self {
        self.rename_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn now(&self) -> SystemTime {
        self.clock.now()
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn finalized_root(&self) -> PathBuf {
        self.root.join(FINALIZED_DIR)
    }

    /// Where the entry for `fingerprint` lives once published. Pure path math.
    pub fn finalized_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.finalized_root().join(fingerprint.as_str())
    }

    pub fn manifest_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.finalized_path(fingerprint).join(MANIFEST_FILE)
    }

    /// Whether a published entry exists
    pub fn exists(&self, fingerprint: &Fingerprint) -> bool {
        self.manifest_path(fingerprint).is_file()
    }

    /// Refresh the entry's last-access time so eviction tracks reads
    pub fn touch(&self, fingerprint: &Fingerprint) -> Result<()> {
        let manifest = self.manifest_path(fingerprint);
        let file = File::options()
            .write(true)
            .open(&manifest)
            .map_err(|e| StorageError::io(e, &manifest))?;
        file.set_modified(self.clock.now())
            .map_err(|e| StorageError::io(e, &manifest))?;
        Ok(())
    }

    pub fn read_manifest(&self, fingerprint: &Fingerprint) -> Result<Value> {
        let manifest = self.manifest_path(fingerprint);
        let raw = fs::read(&manifest).map_err(|e| StorageError::io(e, &manifest))?;
        serde_json::from_slice(&raw).map_err(|source| StorageError::CorruptManifest {
            fingerprint: fingerprint.clone(),
            source,
        })
    }

    /// Touch and read an entry in one step; `None` when nothing is published
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<Value>> {
        let found = self
            .touch(fingerprint)
            .and_then(|_| self.read_manifest(fingerprint));
        match found {
            Ok(manifest) => {
                debug!(%fingerprint, "Render cache hit");
                Ok(Some(manifest))
            }
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Make `staging_dir` visible as the entry for `fingerprint`.
    ///
    /// Any previous entry is removed first; the move itself is one rename.
    pub fn publish(&self, staging_dir: &Path, fingerprint: &Fingerprint) -> Result<()> {
        let dest = self.finalized_path(fingerprint);
        match fs::remove_dir_all(&dest) {
            Ok(()) => debug!(%fingerprint, "Replaced existing entry"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(e, dest)),
        }

        publish::rename_with_retry(staging_dir, &dest, self.rename_policy).map_err(|source| {
            StorageError::Io {
                path: dest.clone(),
                source,
            }
        })?;

        info!(%fingerprint, "Published render");
        Ok(())
    }

    /// Delete an entry. Advisory: failures are logged, never returned.
    pub fn remove(&self, fingerprint: &Fingerprint) {
        remove_path(&self.finalized_path(fingerprint));
    }

    /// Allocate a unique input file and output directory for one render
    pub fn new_staging_area(&self, format: &str) -> Result<StagingArea> {
        let input_dir = self.staging_root().join(STAGING_INPUT_DIR);
        let output_dir = self.staging_root().join(STAGING_OUTPUT_DIR);
        let suffix = format!(".{}", format.to_lowercase());

        let (input, input_path) = tempfile::Builder::new()
            .prefix("")
            .suffix(&suffix)
            .tempfile_in(&input_dir)
            .map_err(|e| StorageError::io(e, &input_dir))?
            .keep()
            .map_err(|e| StorageError::io(e.error, &input_dir))?;

        let output_dir = match tempfile::Builder::new().prefix("").tempdir_in(&output_dir) {
            Ok(dir) => dir.keep(),
            Err(e) => {
                drop(input);
                remove_path(&input_path);
                return Err(StorageError::io(e, output_dir));
            }
        };

        debug!(
            input = %input_path.display(),
            output = %output_dir.display(),
            "Allocated staging area"
        );
        Ok(StagingArea {
            input,
            input_path,
            output_dir,
        })
    }

    /// Resolve an asset of a published entry.
    ///
    /// The result is confined to the finalized zone both lexically and after
    /// following symlinks; anything else is reported as not found.
    pub fn asset_path(&self, fingerprint: &Fingerprint, name: &str) -> Result<PathBuf> {
        let relative = path::confine(Path::new(fingerprint.as_str()).join(name))?;
        let base = self.finalized_root();
        let candidate = base.join(relative);

        let resolved = candidate
            .canonicalize()
            .map_err(|e| StorageError::io(e, &candidate))?;
        let base = base.canonicalize().map_err(|e| StorageError::io(e, &base))?;
        if !resolved.starts_with(&base) {
            warn!(%fingerprint, name, "Asset path escapes the cache, refusing");
            return Err(StorageError::InvalidPath(name.to_string()));
        }
        if !resolved.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Ok(resolved)
    }

    /// Discard everything in the staging zone; returns the entries removed
    pub fn purge_staging(&self) -> Result<usize> {
        let staging = self.staging_root();
        let mut removed = 0;
        let entries = fs::read_dir(&staging).map_err(|e| StorageError::io(e, &staging))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(e, &staging))?;
            if remove_path(&entry.path()) {
                removed += 1;
            }
        }
        self.ensure_layout()?;
        Ok(removed)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.staging_root().join(STAGING_INPUT_DIR),
            self.staging_root().join(STAGING_OUTPUT_DIR),
            self.finalized_root(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(e, &dir))?;
        }
        Ok(())
    }
}

/// Remove a file or directory tree, ignoring "already gone".
///
/// Returns `true` only when something was actually deleted.
pub(crate) fn remove_path(path: &Path) -> bool {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove cache path");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fp(n: u64) -> Fingerprint {
        Fingerprint::compute("lib", n, "EPUB", 100, 1, 1)
    }

    fn open_store(temp_dir: &TempDir) -> (CacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = CacheStore::open(temp_dir.path(), clock.clone()).unwrap();
        (store, clock)
    }

    fn publish_sample(store: &CacheStore, fingerprint: &Fingerprint) {
        let staging = store.new_staging_area("epub").unwrap();
        fs::write(staging.output_dir.join(MANIFEST_FILE), br#"{"spine":["index.html"]}"#).unwrap();
        fs::write(staging.output_dir.join("index.html"), b"<html/>").unwrap();
        store.publish(&staging.output_dir, fingerprint).unwrap();
    }

    #[test]
    fn test_open_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);

        assert!(temp_dir.path().join("s/i").is_dir());
        assert!(temp_dir.path().join("s/o").is_dir());
        assert!(temp_dir.path().join("f").is_dir());
        assert_eq!(
            store.finalized_path(&fp(1)),
            temp_dir.path().join("f").join(fp(1).as_str())
        );
    }

    #[test]
    fn test_publish_then_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);

        assert!(!store.exists(&fp(1)));
        assert!(store.lookup(&fp(1)).unwrap().is_none());

        publish_sample(&store, &fp(1));

        assert!(store.exists(&fp(1)));
        let manifest = store.lookup(&fp(1)).unwrap().unwrap();
        assert_eq!(manifest["spine"][0], "index.html");
    }

    #[test]
    fn test_publish_moves_staging_dir() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);

        let staging = store.new_staging_area("epub").unwrap();
        fs::write(staging.output_dir.join(MANIFEST_FILE), b"{}").unwrap();
        store.publish(&staging.output_dir, &fp(1)).unwrap();

        assert!(!staging.output_dir.exists());
        assert!(store.manifest_path(&fp(1)).is_file());
    }

    #[test]
    fn test_publish_replaces_previous_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));

        let staging = store.new_staging_area("epub").unwrap();
        fs::write(staging.output_dir.join(MANIFEST_FILE), br#"{"spine":[]}"#).unwrap();
        store.publish(&staging.output_dir, &fp(1)).unwrap();

        let manifest = store.read_manifest(&fp(1)).unwrap();
        assert_eq!(manifest["spine"].as_array().unwrap().len(), 0);
        assert!(!store.finalized_path(&fp(1)).join("index.html").exists());
    }

    #[test]
    fn test_touch_uses_clock() {
        let temp_dir = TempDir::new().unwrap();
        let (store, clock) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));

        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000);
        clock.set(later);
        store.touch(&fp(1)).unwrap();

        let modified = fs::metadata(store.manifest_path(&fp(1)))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(modified, later);
    }

    #[test]
    fn test_touch_missing_entry_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);

        let err = store.touch(&fp(9)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_corrupt_manifest_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        let staging = store.new_staging_area("epub").unwrap();
        fs::write(staging.output_dir.join(MANIFEST_FILE), b"not json").unwrap();
        store.publish(&staging.output_dir, &fp(1)).unwrap();

        assert!(matches!(
            store.lookup(&fp(1)),
            Err(StorageError::CorruptManifest { .. })
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));

        store.remove(&fp(1));
        assert!(!store.exists(&fp(1)));
        store.remove(&fp(1));
    }

    #[test]
    fn test_remove_path_reports_deletion() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("input.epub");
        let dir = temp_dir.path().join("out");
        fs::write(&file, b"book").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();

        assert!(remove_path(&file));
        assert!(remove_path(&dir));
        assert!(!remove_path(&file));
        assert!(!remove_path(&temp_dir.path().join("never-existed")));
    }

    #[test]
    fn test_io_error_names_cause_once() {
        let err = StorageError::Io {
            path: PathBuf::from("/cache/f/abc"),
            source: io::Error::other("disk on fire"),
        };
        let traceback = crate::worker::format_traceback(&err);
        assert_eq!(traceback, "I/O error at /cache/f/abc\ncaused by: disk on fire");
    }

    #[test]
    fn test_staging_areas_are_unique() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);

        let mut a = store.new_staging_area("EPUB").unwrap();
        let b = store.new_staging_area("EPUB").unwrap();

        assert_ne!(a.input_path, b.input_path);
        assert_ne!(a.output_dir, b.output_dir);
        assert!(a.input_path.to_string_lossy().ends_with(".epub"));
        assert!(a.input_path.starts_with(store.staging_root()));
        assert!(a.output_dir.starts_with(store.staging_root()));

        a.input.write_all(b"book").unwrap();
        assert_eq!(fs::read(&a.input_path).unwrap(), b"book");

        let (input_path, output_dir) = (a.input_path.clone(), a.output_dir.clone());
        a.discard();
        assert!(!input_path.exists());
        assert!(!output_dir.exists());
    }

    #[test]
    fn test_purge_staging() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        let a = store.new_staging_area("epub").unwrap();
        fs::write(store.staging_root().join("stray"), b"x").unwrap();

        let removed = store.purge_staging().unwrap();

        assert_eq!(removed, 3);
        assert!(!a.input_path.exists());
        assert!(!a.output_dir.exists());
        assert!(store.staging_root().join("i").is_dir());
        assert!(store.staging_root().join("o").is_dir());
        // Staging is usable again afterwards
        store.new_staging_area("epub").unwrap();
    }

    #[test]
    fn test_asset_path_resolves_inside_entry() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));

        let path = store.asset_path(&fp(1), "index.html").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"<html/>");
    }

    #[test]
    fn test_asset_path_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));
        fs::write(temp_dir.path().join("secret.txt"), b"secret").unwrap();

        let err = store.asset_path(&fp(1), "../../secret.txt").unwrap_err();
        assert!(err.is_not_found());
        let err = store.asset_path(&fp(1), "../../../../../etc/passwd").unwrap_err();
        assert!(err.is_not_found());
        let err = store.asset_path(&fp(1), "missing.html").unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_asset_path_rejects_symlink_escape() {
        let temp_dir = TempDir::new().unwrap();
        let (store, _) = open_store(&temp_dir);
        publish_sample(&store, &fp(1));
        fs::write(temp_dir.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(
            temp_dir.path().join("secret.txt"),
            store.finalized_path(&fp(1)).join("link.txt"),
        )
        .unwrap();

        let err = store.asset_path(&fp(1), "link.txt").unwrap_err();
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
