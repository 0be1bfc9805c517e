//! Error taxonomy for the dot engine.
//!
//! Library code returns [`DotError`] through the crate-wide [`Result`] alias.
//! Command handlers at the CLI boundary convert into [`anyhow::Error`] with
//! `?` and `main` maps the root cause back to an exit code through
//! [`DotError::exit_code`].
//!
//! ```text
//! DotError
//! ├── InvalidPath              exit 2
//! ├── PackageNotFound          exit 5
//! ├── Conflict                 exit 3
//! ├── PermissionDenied         exit 4
//! ├── CyclicDependency         exit 1
//! ├── ManifestVersionMismatch  exit 1
//! ├── ManifestCorrupt          exit 1
//! ├── ManifestLocked           exit 1
//! ├── ExecutorFailure          exit of the wrapped error
//! ├── Cancelled                exit 1
//! ├── Config                   exit 2
//! └── Io                       exit 1
//! ```

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::plan::Conflict;

/// Convenience alias used throughout the library.
pub type Result<T, E = DotError> = std::result::Result<T, E>;

/// Exit code for success.
pub const EXIT_OK: u8 = 0;
/// Exit code for generic failures.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for invalid arguments or paths.
pub const EXIT_INVALID: u8 = 2;
/// Exit code for unresolved conflicts.
pub const EXIT_CONFLICT: u8 = 3;
/// Exit code for permission failures.
pub const EXIT_PERMISSION: u8 = 4;
/// Exit code for unknown packages.
pub const EXIT_NOT_FOUND: u8 = 5;

/// Every failure the engine can report.
#[derive(Error, Debug)]
pub enum DotError {
    /// A path failed validation (not absolute, not clean, escapes its root).
    #[error("invalid path '{}': {reason}", .path.display())]
    InvalidPath {
        /// The offending path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A named package does not exist in the package directory.
    #[error("package '{0}' not found")]
    PackageNotFound(String),

    /// The planner found conflicts that block execution.
    #[error("{}", conflict_summary(.0))]
    Conflict(Vec<Conflict>),

    /// The filesystem refused access.
    #[error("permission denied: {op} {}", .path.display())]
    PermissionDenied {
        /// Operation that failed (`stat`, `symlink`, ...).
        op: &'static str,
        /// Path the operation touched.
        path: PathBuf,
    },

    /// The operation graph contains a cycle.
    #[error("dependency cycle between operations: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// The manifest was written by a newer (or unknown) schema version.
    #[error("manifest version '{found}' is not supported (newest known: '{supported}')")]
    ManifestVersionMismatch {
        /// Version string found on disk.
        found: String,
        /// Newest version this build understands.
        supported: String,
    },

    /// The manifest cannot be parsed.
    #[error("manifest {} is corrupt: {reason}", .path.display())]
    ManifestCorrupt {
        /// Manifest file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Another process holds the manifest lock.
    #[error("manifest is locked by another process ({})", .path.display())]
    ManifestLocked {
        /// The lock file.
        path: PathBuf,
    },

    /// An operation failed during execution; `rollback` lists anything that
    /// could not be undone.
    #[error("{operation} failed: {source}{}", rollback_summary(.rollback))]
    ExecutorFailure {
        /// Id of the failing operation.
        operation: String,
        /// Underlying cause.
        source: Box<Self>,
        /// Errors raised while rolling back.
        rollback: Vec<Self>,
    },

    /// The cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other I/O failure.
    #[error("{op} {}: {source}", .path.display())]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// Path the operation touched.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

fn conflict_summary(conflicts: &[Conflict]) -> String {
    match conflicts {
        [] => "conflict".to_string(),
        [only] => format!("conflict: {only}"),
        [first, rest @ ..] => format!("{} conflicts, first: {first}", rest.len() + 1),
    }
}

fn rollback_summary(errors: &[DotError]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(" (rollback incomplete: {} error(s))", errors.len())
    }
}

impl DotError {
    /// Build an error from an [`io::Error`], classifying permission failures.
    #[must_use]
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                op,
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Build an I/O error of the given kind without an OS error behind it.
    #[must_use]
    pub fn io_kind(op: &'static str, path: &Path, kind: io::ErrorKind, msg: &str) -> Self {
        Self::io(op, path, io::Error::new(kind, msg.to_string()))
    }

    /// Kind of the underlying I/O error, if this is one.
    #[must_use]
    pub fn io_error_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            Self::PermissionDenied { .. } => Some(io::ErrorKind::PermissionDenied),
            _ => None,
        }
    }

    /// `true` when the path did not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.io_error_kind() == Some(io::ErrorKind::NotFound)
    }

    /// `true` when the path already existed.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.io_error_kind() == Some(io::ErrorKind::AlreadyExists)
    }

    /// `true` when this error, or the error an executor failure wraps, is a
    /// cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ExecutorFailure { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidPath { .. } | Self::Config(_) => EXIT_INVALID,
            Self::PackageNotFound(_) => EXIT_NOT_FOUND,
            Self::Conflict(_) => EXIT_CONFLICT,
            Self::PermissionDenied { .. } => EXIT_PERMISSION,
            Self::ExecutorFailure { source, .. } => source.exit_code(),
            Self::CyclicDependency(_)
            | Self::ManifestVersionMismatch { .. }
            | Self::ManifestCorrupt { .. }
            | Self::ManifestLocked { .. }
            | Self::Cancelled
            | Self::Io { .. } => EXIT_FAILURE,
        }
    }

    /// One-line hint telling the user what to do next.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidPath { .. } => {
                Some("Use an absolute path without '.' or '..' components".to_string())
            }
            Self::PackageNotFound(name) => Some(format!(
                "Run 'dot list' to see installed packages, or check that '{name}' exists in the package directory"
            )),
            Self::Conflict(_) => Some(
                "Re-run with '--on-conflict backup' to keep existing files, or 'dot adopt' to move them into the package"
                    .to_string(),
            ),
            Self::PermissionDenied { path, .. } => Some(format!(
                "Check ownership and permissions of {}",
                path.display()
            )),
            Self::CyclicDependency(_) => {
                Some("This is a bug in plan construction; please report it".to_string())
            }
            Self::ManifestVersionMismatch { .. } => {
                Some("Upgrade dot to a version that understands this manifest".to_string())
            }
            Self::ManifestCorrupt { path, .. } => Some(format!(
                "Restore {} from a backup or remove it and run 'dot remanage' for each package",
                path.display()
            )),
            Self::ManifestLocked { path } => Some(format!(
                "Wait for the other dot process, or remove {} if none is running",
                path.display()
            )),
            Self::ExecutorFailure { source, rollback, .. } => {
                if rollback.is_empty() {
                    source.suggestion()
                } else {
                    Some("Run 'dot doctor' to inspect partially applied changes".to_string())
                }
            }
            Self::Cancelled => None,
            Self::Config(_) => Some("Run 'dot config show' to inspect the effective configuration".to_string()),
            Self::Io { .. } => Some("Run 'dot doctor' to check the state of managed links".to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::plan::ConflictKind;

    // -----------------------------------------------------------------------
    // Display
    // -----------------------------------------------------------------------

    #[test]
    fn invalid_path_display() {
        let e = DotError::InvalidPath {
            path: PathBuf::from("relative/x"),
            reason: "path must be absolute".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "invalid path 'relative/x': path must be absolute"
        );
    }

    #[test]
    fn package_not_found_display() {
        let e = DotError::PackageNotFound("vim".to_string());
        assert_eq!(e.to_string(), "package 'vim' not found");
    }

    #[test]
    fn cycle_display_names_operations() {
        let e = DotError::CyclicDependency(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(e.to_string(), "dependency cycle between operations: a -> b -> a");
    }

    #[test]
    fn conflict_display_counts() {
        let c = Conflict::new(ConflictKind::FileExists, "/home/u/.vimrc", "regular file in the way");
        let e = DotError::Conflict(vec![c.clone(), c]);
        assert!(e.to_string().starts_with("2 conflicts, first:"));
    }

    #[test]
    fn executor_failure_mentions_rollback() {
        let e = DotError::ExecutorFailure {
            operation: "link-create:/t/.vimrc".to_string(),
            source: Box::new(DotError::Cancelled),
            rollback: vec![DotError::Config("x".to_string())],
        };
        let text = e.to_string();
        assert!(text.contains("link-create:/t/.vimrc failed"));
        assert!(text.contains("rollback incomplete"));
    }

    // -----------------------------------------------------------------------
    // Exit codes
    // -----------------------------------------------------------------------

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(DotError::PackageNotFound("x".into()).exit_code(), 5);
        assert_eq!(DotError::Conflict(vec![]).exit_code(), 3);
        assert_eq!(
            DotError::PermissionDenied {
                op: "stat",
                path: PathBuf::from("/x")
            }
            .exit_code(),
            4
        );
        assert_eq!(
            DotError::InvalidPath {
                path: PathBuf::from("x"),
                reason: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(DotError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn executor_failure_uses_wrapped_exit_code() {
        let e = DotError::ExecutorFailure {
            operation: "op".to_string(),
            source: Box::new(DotError::PermissionDenied {
                op: "symlink",
                path: PathBuf::from("/t/x"),
            }),
            rollback: vec![],
        };
        assert_eq!(e.exit_code(), 4);
    }

    // -----------------------------------------------------------------------
    // Classification helpers
    // -----------------------------------------------------------------------

    #[test]
    fn io_classifies_permission_denied() {
        let e = DotError::io(
            "read",
            Path::new("/x"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(e, DotError::PermissionDenied { .. }));
    }

    #[test]
    fn not_found_helper() {
        let e = DotError::io_kind("lstat", Path::new("/x"), io::ErrorKind::NotFound, "missing");
        assert!(e.is_not_found());
        assert!(!e.is_already_exists());
    }

    #[test]
    fn cancelled_is_detected_through_executor_failure() {
        let e = DotError::ExecutorFailure {
            operation: "op".to_string(),
            source: Box::new(DotError::Cancelled),
            rollback: vec![],
        };
        assert!(e.is_cancelled());
    }

    #[test]
    fn package_not_found_suggests_list() {
        let hint = DotError::PackageNotFound("zsh".into()).suggestion().unwrap();
        assert!(hint.contains("dot list"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn error_is_send_sync() {
        assert_send_sync::<DotError>();
    }

    #[test]
    fn error_converts_to_anyhow() {
        let e = DotError::Cancelled;
        let any: anyhow::Error = e.into();
        assert!(any.downcast_ref::<DotError>().is_some());
    }
}
