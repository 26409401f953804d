//! Content-addressed cache keys for rendered books
//!
//! A fingerprint is the SHA-256 of the canonical JSON serialization of
//! `(library_id, book_id, FORMAT, size, mtime, render_version)`. Two requests
//! that agree on all six values share one render.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the render output layout. Bump whenever the manifest or asset
/// layout changes; previously cached entries become unreachable and age out.
pub const RENDER_VERSION: u32 = 1;

/// Hex digest length (SHA-256)
const DIGEST_LEN: usize = 64;

#[derive(Debug, Error)]
#[error("invalid fingerprint: {0}")]
pub struct InvalidFingerprint(String);

/// Opaque cache key for one render input
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a book format.
    ///
    /// `format` is upper-cased before hashing so `epub` and `EPUB` collide.
    pub fn compute(
        library_id: &str,
        book_id: u64,
        format: &str,
        size: u64,
        mtime: i64,
        version: u32,
    ) -> Self {
        let canonical = (library_id, book_id, format.to_uppercase(), size, mtime, version);
        // Serializing a tuple of strings and integers cannot fail
        let raw = serde_json::to_vec(&canonical).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    /// Accepts exactly the lower-case hex digests [`Fingerprint::compute`]
    /// produces, so a parsed fingerprint is always a single safe path segment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == DIGEST_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidFingerprint(s.to_string()))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}
