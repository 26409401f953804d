//! Library backed by a plain directory tree
//!
//! Layout:
//! ```text
//! <root>/.library_id          persisted library identity
//! <root>/<book_id>/<any>.<fmt>  one file per format
//! <root>/<book_id>/metadata.json  optional metadata object
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::{BookId, FormatMetadata, Library, LibraryError, Result, UserData};

const LIBRARY_ID_FILE: &str = ".library_id";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug)]
pub struct DirectoryLibrary {
    root: PathBuf,
    library_id: String,
    user_data: UserData,
}

impl DirectoryLibrary {
    /// Open a library rooted at `root`, creating it if needed.
    ///
    /// Without an explicit `library_id` the identity stored in the root is
    /// used, or a new one is generated and stored.
    pub fn open(root: impl AsRef<Path>, library_id: Option<String>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let library_id = match library_id {
            Some(id) => id,
            None => load_or_create_id(&root)?,
        };
        info!(root = %root.display(), library_id, "Opened book library");

        Ok(Self {
            root,
            library_id,
            user_data: UserData::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn book_dir(&self, book_id: BookId) -> PathBuf {
        self.root.join(book_id.to_string())
    }

    fn format_path(&self, book_id: BookId, format: &str) -> Result<PathBuf> {
        let dir = self.book_dir(book_id);
        if !dir.is_dir() {
            return Err(LibraryError::BookNotFound(book_id));
        }
        let wanted = format.to_uppercase();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.to_uppercase() == wanted);
            if matches && path.is_file() {
                return Ok(path);
            }
        }
        Err(LibraryError::FormatNotFound {
            book_id,
            format: wanted,
        })
    }
}

fn load_or_create_id(root: &Path) -> Result<String> {
    let path = root.join(LIBRARY_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        Ok(_) => create_id(&path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => create_id(&path),
        Err(e) => Err(e.into()),
    }
}

fn create_id(path: &Path) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    fs::write(path, &id)?;
    info!(library_id = %id, "Generated new library identity");
    Ok(id)
}

impl Library for DirectoryLibrary {
    fn library_id(&self) -> &str {
        &self.library_id
    }

    fn has_book(&self, book_id: BookId) -> bool {
        self.book_dir(book_id).is_dir()
    }

    fn format_metadata(&self, book_id: BookId, format: &str) -> Result<FormatMetadata> {
        let meta = fs::metadata(self.format_path(book_id, format)?)?;
        let since_epoch = meta.modified()?.duration_since(UNIX_EPOCH).unwrap_or_default();
        Ok(FormatMetadata {
            size: meta.len(),
            mtime: (since_epoch.as_millis() / 100) as i64,
        })
    }

    fn copy_format_to(&self, book_id: BookId, format: &str, dest: &mut dyn Write) -> Result<u64> {
        let mut src = File::open(self.format_path(book_id, format)?)?;
        Ok(io::copy(&mut src, dest)?)
    }

    fn book_metadata(&self, book_id: BookId) -> Result<Value> {
        if !self.has_book(book_id) {
            return Err(LibraryError::BookNotFound(book_id));
        }
        match fs::read(self.book_dir(book_id).join(METADATA_FILE)) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|source| LibraryError::InvalidMetadata { book_id, source }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(json!({ "title": book_id.to_string() })),
            Err(e) => Err(e.into()),
        }
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }
}
