//! Filesystem operations and their stable identifiers.
use std::fmt;

use serde::Serialize;

use crate::paths::{FilePath, PackagePath, TargetPath};

/// Stable identifier of an operation, derived from its kind and paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Borrow the textual id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One filesystem change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a symlink at `target` pointing to `source`.
    LinkCreate {
        /// Package-side file or directory.
        source: PackagePath,
        /// Location of the new link.
        target: TargetPath,
    },
    /// Remove the symlink at `target`.
    LinkDelete {
        /// Link to remove.
        target: TargetPath,
    },
    /// Create a directory.
    DirCreate {
        /// Directory to create.
        path: FilePath,
    },
    /// Remove a directory that is empty.
    DirDelete {
        /// Directory to remove.
        path: FilePath,
    },
    /// Remove a directory and everything in it.
    DirRemoveAll {
        /// Directory to remove.
        path: FilePath,
    },
    /// Copy a directory tree.
    DirCopy {
        /// Existing tree.
        src: FilePath,
        /// New location.
        dst: FilePath,
    },
    /// Move a file or directory.
    FileMove {
        /// Current location.
        src: FilePath,
        /// New location.
        dst: FilePath,
    },
    /// Move a file out of the way before linking.
    FileBackup {
        /// File being displaced.
        src: TargetPath,
        /// Where it goes.
        backup: FilePath,
    },
    /// Remove a regular file.
    FileDelete {
        /// File to remove.
        path: TargetPath,
    },
}

impl OperationKind {
    /// Short kebab-case tag used in ids and summaries.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::LinkCreate { .. } => "link-create",
            Self::LinkDelete { .. } => "link-delete",
            Self::DirCreate { .. } => "dir-create",
            Self::DirDelete { .. } => "dir-delete",
            Self::DirRemoveAll { .. } => "dir-remove-all",
            Self::DirCopy { .. } => "dir-copy",
            Self::FileMove { .. } => "file-move",
            Self::FileBackup { .. } => "file-backup",
            Self::FileDelete { .. } => "file-delete",
        }
    }

    /// The path this operation changes (the destination for moves/copies).
    #[must_use]
    pub fn primary_path(&self) -> &std::path::Path {
        match self {
            Self::LinkCreate { target, .. } | Self::LinkDelete { target } => target.as_path(),
            Self::DirCreate { path } | Self::DirDelete { path } | Self::DirRemoveAll { path } => {
                path.as_path()
            }
            Self::DirCopy { dst, .. } | Self::FileMove { dst, .. } => dst.as_path(),
            Self::FileBackup { src, .. } => src.as_path(),
            Self::FileDelete { path } => path.as_path(),
        }
    }

    /// Derive the stable id.
    #[must_use]
    pub fn id(&self) -> OperationId {
        let text = match self {
            Self::DirCopy { src, .. } | Self::FileMove { src, .. } => {
                format!("{}:{}->{}", self.tag(), src, self.primary_path().display())
            }
            _ => format!("{}:{}", self.tag(), self.primary_path().display()),
        };
        OperationId(text)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkCreate { source, target } => write!(f, "link {target} -> {source}"),
            Self::LinkDelete { target } => write!(f, "unlink {target}"),
            Self::DirCreate { path } => write!(f, "mkdir {path}"),
            Self::DirDelete { path } => write!(f, "rmdir {path}"),
            Self::DirRemoveAll { path } => write!(f, "rm -r {path}"),
            Self::DirCopy { src, dst } => write!(f, "copy {src} -> {dst}"),
            Self::FileMove { src, dst } => write!(f, "move {src} -> {dst}"),
            Self::FileBackup { src, backup } => write!(f, "backup {src} -> {backup}"),
            Self::FileDelete { path } => write!(f, "rm {path}"),
        }
    }
}

/// An operation plus the ids it must wait for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    /// Stable id.
    pub id: OperationId,
    /// What to do.
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Operations that must complete first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<OperationId>,
}

impl Operation {
    /// Wrap `kind` with its derived id and the given dependencies.
    #[must_use]
    pub fn new(kind: OperationKind, deps: Vec<OperationId>) -> Self {
        Self {
            id: kind.id(),
            kind,
            deps,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_distinct() {
        let link = OperationKind::LinkCreate {
            source: PackagePath::new("/repo/vim/dot-vimrc").unwrap(),
            target: TargetPath::new("/home/u/.vimrc").unwrap(),
        };
        let unlink = OperationKind::LinkDelete {
            target: TargetPath::new("/home/u/.vimrc").unwrap(),
        };
        assert_eq!(link.id().as_str(), "link-create:/home/u/.vimrc");
        assert_eq!(link.id(), link.clone().id());
        assert_ne!(link.id(), unlink.id());
    }

    #[test]
    fn display_reads_like_a_command() {
        let op = OperationKind::FileBackup {
            src: TargetPath::new("/home/u/.bashrc").unwrap(),
            backup: FilePath::new("/home/u/.bashrc.bak").unwrap(),
        };
        assert_eq!(op.to_string(), "backup /home/u/.bashrc -> /home/u/.bashrc.bak");
    }

    #[test]
    fn serializes_with_tag() {
        let op = Operation::new(
            OperationKind::DirCreate {
                path: FilePath::new("/home/u/.config").unwrap(),
            },
            vec![],
        );
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "dir_create");
        assert_eq!(json["path"], "/home/u/.config");
        assert!(json.get("deps").is_none());
    }
}
