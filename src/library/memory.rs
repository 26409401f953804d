use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::{RwLock, RwLockReadGuard};

use serde_json::{Value, json};

use super::{BookId, FormatMetadata, Library, LibraryError, Result, UserData};

#[derive(Debug, Default)]
struct MemoryBook {
    metadata: Option<Value>,
    formats: HashMap<String, (Vec<u8>, i64)>,
}

/// Library held entirely in memory
#[derive(Debug)]
pub struct MemoryLibrary {
    library_id: String,
    books: RwLock<BTreeMap<BookId, MemoryBook>>,
    user_data: UserData,
}

impl MemoryLibrary {
    pub fn new(library_id: impl Into<String>) -> Self {
        Self {
            library_id: library_id.into(),
            books: RwLock::default(),
            user_data: UserData::new(),
        }
    }

    /// Add or replace one format of a book; `mtime` is in tenths of a second
    pub fn add_format(&self, book_id: BookId, format: &str, bytes: impl Into<Vec<u8>>, mtime: i64) {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        books
            .entry(book_id)
            .or_default()
            .formats
            .insert(format.to_uppercase(), (bytes.into(), mtime));
    }

    pub fn set_metadata(&self, book_id: BookId, metadata: Value) {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        books.entry(book_id).or_default().metadata = Some(metadata);
    }

    pub fn remove_book(&self, book_id: BookId) -> bool {
        let mut books = self.books.write().unwrap_or_else(|e| e.into_inner());
        books.remove(&book_id).is_some()
    }

    fn books(&self) -> RwLockReadGuard<'_, BTreeMap<BookId, MemoryBook>> {
        self.books.read().unwrap_or_else(|e| e.into_inner())
    }

    fn with_format<T>(&self, book_id: BookId, format: &str, f: impl FnOnce(&[u8], i64) -> T) -> Result<T> {
        let books = self.books();
        let book = books.get(&book_id).ok_or(LibraryError::BookNotFound(book_id))?;
        let (bytes, mtime) = book
            .formats
            .get(&format.to_uppercase())
            .ok_or_else(|| LibraryError::FormatNotFound {
                book_id,
                format: format.to_uppercase(),
            })?;
        Ok(f(bytes, *mtime))
    }
}

impl Library for MemoryLibrary {
    fn library_id(&self) -> &str {
        &self.library_id
    }

    fn has_book(&self, book_id: BookId) -> bool {
        self.books().contains_key(&book_id)
    }

    fn format_metadata(&self, book_id: BookId, format: &str) -> Result<FormatMetadata> {
        self.with_format(book_id, format, |bytes, mtime| FormatMetadata {
            size: bytes.len() as u64,
            mtime,
        })
    }

    fn copy_format_to(&self, book_id: BookId, format: &str, dest: &mut dyn Write) -> Result<u64> {
        self.with_format(book_id, format, |bytes, _| -> std::io::Result<u64> {
            dest.write_all(bytes)?;
            Ok(bytes.len() as u64)
        })?
        .map_err(LibraryError::from)
    }

    fn book_metadata(&self, book_id: BookId) -> Result<Value> {
        let books = self.books();
        let book = books.get(&book_id).ok_or(LibraryError::BookNotFound(book_id))?;
        Ok(book
            .metadata
            .clone()
            .unwrap_or_else(|| json!({ "title": book_id.to_string() })))
    }

    fn user_data(&self) -> &UserData {
        &self.user_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_lookup_is_case_insensitive() {
        let library = MemoryLibrary::new("lib");
        library.add_format(7, "epub", b"bytes".to_vec(), 42);

        let fm = library.format_metadata(7, "EPUB").unwrap();
        assert_eq!(fm, FormatMetadata { size: 5, mtime: 42 });

        let mut out = Vec::new();
        assert_eq!(library.copy_format_to(7, "Epub", &mut out).unwrap(), 5);
        assert_eq!(out, b"bytes");
    }

    #[test]
    fn test_missing_book_and_format() {
        let library = MemoryLibrary::new("lib");
        library.add_format(7, "EPUB", b"x".to_vec(), 1);

        assert!(matches!(
            library.format_metadata(8, "EPUB"),
            Err(LibraryError::BookNotFound(8))
        ));
        let err = library.format_metadata(7, "PDF").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "No PDF format for the book (id:7) in the library");
    }

    #[test]
    fn test_default_metadata_uses_id_as_title() {
        let library = MemoryLibrary::new("lib");
        library.add_format(7, "EPUB", b"x".to_vec(), 1);
        assert_eq!(library.book_metadata(7).unwrap()["title"], "7");

        library.set_metadata(7, json!({"title": "Dune", "authors": ["Frank Herbert"]}));
        assert_eq!(library.book_metadata(7).unwrap()["title"], "Dune");

        assert!(library.remove_book(7));
        assert!(!library.has_book(7));
    }
}
