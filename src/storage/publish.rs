//! Atomic publication of a finished staging directory
//!
//! A single directory rename is the atomicity primitive: readers either see
//! the complete entry or nothing. Windows may briefly lock a destination that
//! a scanner or indexer has open, so there a permission failure is retried
//! once after a short delay.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Retry behaviour for a rename that hits a locked destination
#[derive(Debug, Clone, Copy)]
pub struct RenamePolicy {
    pub retry_on_lock: bool,
    pub delay: Duration,
}

impl RenamePolicy {
    pub fn for_platform(delay: Duration) -> Self {
        Self {
            retry_on_lock: cfg!(windows),
            delay,
        }
    }
}

impl Default for RenamePolicy {
    fn default() -> Self {
        Self::for_platform(Duration::from_secs(1))
    }
}

pub(crate) fn rename_with_retry(from: &Path, to: &Path, policy: RenamePolicy) -> io::Result<()> {
    rename_with(from, to, policy, |a, b| fs::rename(a, b))
}

fn rename_with<F>(from: &Path, to: &Path, policy: RenamePolicy, mut rename: F) -> io::Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    match rename(from, to) {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied && policy.retry_on_lock => {
            warn!(
                from = %from.display(),
                to = %to.display(),
                delay_ms = policy.delay.as_millis() as u64,
                "Rename hit a locked destination, retrying once"
            );
            thread::sleep(policy.delay);
            rename(from, to)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn retrying() -> RenamePolicy {
        RenamePolicy {
            retry_on_lock: true,
            delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_rename_moves_directory() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("staging");
        let to = temp_dir.path().join("final");
        fs::create_dir(&from).unwrap();
        fs::write(from.join("a.txt"), b"a").unwrap();

        rename_with_retry(&from, &to, RenamePolicy::default()).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(to.join("a.txt")).unwrap(), b"a");
    }

    #[test]
    fn test_locked_destination_is_retried_once() {
        let mut attempts = 0;
        let result = rename_with(Path::new("a"), Path::new("b"), retrying(), |_, _| {
            attempts += 1;
            if attempts == 1 {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(())
            }
        });

        assert!(result.is_ok());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_second_failure_is_returned() {
        let mut attempts = 0;
        let result = rename_with(Path::new("a"), Path::new("b"), retrying(), |_, _| {
            attempts += 1;
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_no_retry_without_lock_policy() {
        let mut attempts = 0;
        let policy = RenamePolicy {
            retry_on_lock: false,
            delay: Duration::from_millis(1),
        };
        let result = rename_with(Path::new("a"), Path::new("b"), policy, |_, _| {
            attempts += 1;
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        });

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut attempts = 0;
        let result = rename_with(Path::new("a"), Path::new("b"), retrying(), |_, _| {
            attempts += 1;
            Err(io::Error::from(io::ErrorKind::NotFound))
        });

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert_eq!(attempts, 1);
    }
}
