use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::library::{BookId, LibraryError};
use crate::queue::QueueError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("The format {0} cannot be viewed")]
    FormatNotViewable(String),

    #[error("No book with id: {0} in the library")]
    BookNotFound(BookId),

    #[error("No book file with hash: {fingerprint} and name: {name}")]
    AssetNotFound {
        fingerprint: Fingerprint,
        name: String,
    },

    #[error("login required for sync")]
    LoginRequired,

    #[error("Invalid data")]
    InvalidData,

    #[error("Cached manifest for {0} is not a JSON object")]
    InvalidManifest(Fingerprint),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ViewerError {
    /// Errors the HTTP layer reports as 404
    pub fn is_not_found(&self) -> bool {
        match self {
            ViewerError::FormatNotViewable(_)
            | ViewerError::BookNotFound(_)
            | ViewerError::AssetNotFound { .. }
            | ViewerError::LoginRequired
            | ViewerError::InvalidData => true,
            ViewerError::Library(e) => e.is_not_found(),
            ViewerError::Storage(e) => e.is_not_found(),
            ViewerError::InvalidManifest(_) | ViewerError::Queue(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ViewerError>;
