//! Book metadata provider
//!
//! The render cache needs three things from the library: the current size and
//! modification time of a book format (the fingerprint inputs), a way to
//! stream the raw bytes into staging, and the metadata merged into manifests.
//! Per-user reading state lives alongside in [`UserData`].

pub mod directory;
pub mod memory;
pub mod user_data;

pub use directory::DirectoryLibrary;
pub use memory::MemoryLibrary;
pub use user_data::{ANONYMOUS_USER, ReadPosition, UserData};

use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub type BookId = u64;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("No book with id: {0} in the library")]
    BookNotFound(BookId),

    #[error("No {format} format for the book (id:{book_id}) in the library")]
    FormatNotFound { book_id: BookId, format: String },

    #[error("Invalid metadata for book {book_id}: {source}")]
    InvalidMetadata {
        book_id: BookId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Library I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LibraryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LibraryError::BookNotFound(_) | LibraryError::FormatNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Fingerprint inputs of one book format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatMetadata {
    pub size: u64,
    /// Modification time in tenths of a second since the epoch
    pub mtime: i64,
}

pub trait Library: Send + Sync {
    /// Stable identity of this library, part of every fingerprint
    fn library_id(&self) -> &str;

    fn has_book(&self, book_id: BookId) -> bool;

    fn format_metadata(&self, book_id: BookId, format: &str) -> Result<FormatMetadata>;

    /// Stream the raw bytes of a format into `dest`, returning the byte count
    fn copy_format_to(&self, book_id: BookId, format: &str, dest: &mut dyn Write) -> Result<u64>;

    /// Metadata object merged into manifests
    fn book_metadata(&self, book_id: BookId) -> Result<Value>;

    fn user_data(&self) -> &UserData;
}
