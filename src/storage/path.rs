//! Lexical path confinement for asset lookups

use std::path::{Component, Path, PathBuf};

use super::{Result, StorageError};

/// Normalizes a relative path without touching the filesystem.
///
/// `.` segments are dropped and `..` pops the previous segment. Paths that
/// would climb above their starting point, absolute paths, Windows prefixes,
/// NUL bytes and empty results are rejected.
pub(crate) fn confine(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let invalid = || StorageError::InvalidPath(path.display().to_string());

    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => {
                if segment.as_encoded_bytes().contains(&0) {
                    return Err(invalid());
                }
                components.push(segment);
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    return Err(invalid());
                }
            }
        }
    }

    if components.is_empty() {
        return Err(invalid());
    }
    Ok(components.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paths() {
        assert_eq!(confine("abc/index.html").unwrap(), Path::new("abc/index.html"));
        assert_eq!(confine("abc/./images//cover.jpg").unwrap(), Path::new("abc/images/cover.jpg"));
        assert_eq!(confine("abc/text/../index.html").unwrap(), Path::new("abc/index.html"));
    }

    #[test]
    fn test_escapes_are_rejected() {
        assert!(confine("../secret").is_err());
        assert!(confine("abc/../../secret").is_err());
        assert!(confine("/etc/passwd").is_err());
        assert!(confine("..").is_err());
    }

    #[test]
    fn test_degenerate_paths() {
        assert!(confine("").is_err());
        assert!(confine(".").is_err());
        assert!(confine("abc/..").is_err());
        assert!(confine("a\0b").is_err());
    }
}
