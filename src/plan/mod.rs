//! Plans: the ordered set of filesystem operations a request needs, plus any
//! conflicts that block it.

pub mod graph;
pub mod operation;
mod planner;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub use graph::Dag;
pub use operation::{Operation, OperationId, OperationKind};
pub use planner::{Planner, PlannerSettings, UnmanageOptions};

use crate::manifest::PackageSource;

/// Why a planned link cannot be created as requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A regular file occupies the target path.
    FileExists,
    /// A real directory occupies the target path of a file.
    DirExists,
    /// A symlink points somewhere outside the package directory.
    WrongTarget,
    /// Another package already owns the target path.
    Ownership,
    /// A file to adopt does not exist.
    MissingSource,
    /// The path is already managed or already a symlink.
    AlreadyManaged,
    /// The path lies outside the target directory.
    InvalidTarget,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FileExists => "file exists",
            Self::DirExists => "directory exists",
            Self::WrongTarget => "wrong target",
            Self::Ownership => "owned by another package",
            Self::MissingSource => "missing source",
            Self::AlreadyManaged => "already managed",
            Self::InvalidTarget => "invalid target",
        };
        f.write_str(text)
    }
}

/// A blocking problem found while planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Category.
    pub kind: ConflictKind,
    /// Path the conflict is about.
    pub path: PathBuf,
    /// Human-readable explanation.
    pub detail: String,
    /// Extra facts (current link target, owning package, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl Conflict {
    /// Create a conflict without context.
    #[must_use]
    pub fn new(kind: ConflictKind, path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            detail: detail.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach one context entry.
    #[must_use]
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {} ({})", self.kind, self.path.display(), self.detail)
    }
}

/// Operation counts of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Links to create.
    pub link_create: usize,
    /// Links to delete.
    pub link_delete: usize,
    /// Directories to create.
    pub dir_create: usize,
    /// Empty directories to delete.
    pub dir_delete: usize,
    /// Directory trees to delete.
    pub dir_remove_all: usize,
    /// Directory trees to copy.
    pub dir_copy: usize,
    /// Files or directories to move.
    pub file_move: usize,
    /// Files to back up.
    pub file_backup: usize,
    /// Files to delete.
    pub file_delete: usize,
    /// Blocking conflicts.
    pub conflicts: usize,
    /// Non-blocking warnings.
    pub warnings: usize,
}

impl PlanSummary {
    /// Total number of operations.
    #[must_use]
    pub const fn operations(&self) -> usize {
        self.link_create
            + self.link_delete
            + self.dir_create
            + self.dir_delete
            + self.dir_remove_all
            + self.dir_copy
            + self.file_move
            + self.file_backup
            + self.file_delete
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (self.link_create, "link"),
            (self.link_delete, "unlink"),
            (self.dir_create, "mkdir"),
            (self.dir_delete, "rmdir"),
            (self.dir_remove_all, "rm -r"),
            (self.dir_copy, "copy"),
            (self.file_move, "move"),
            (self.file_backup, "backup"),
            (self.file_delete, "rm"),
        ]
        .iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, label)| format!("{n} {label}"))
        .collect();
        if parts.is_empty() {
            f.write_str("nothing to do")?;
        } else {
            f.write_str(&parts.join(", "))?;
        }
        if self.conflicts > 0 {
            write!(f, "; {} conflict(s)", self.conflicts)?;
        }
        Ok(())
    }
}

/// Everything needed to carry out one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    /// Operations in planning order; execution order comes from the DAG.
    pub operations: Vec<Operation>,
    /// Blocking conflicts. A plan with conflicts is never executed.
    pub conflicts: Vec<Conflict>,
    /// Non-blocking notes (skipped paths, links already absent, ...).
    pub warnings: Vec<String>,
    /// Complete link set of every package this plan touches, relative to the
    /// target directory.
    pub links: BTreeMap<String, BTreeSet<PathBuf>>,
    /// Backups made per package: link path to backup path.
    pub backups: BTreeMap<String, BTreeMap<PathBuf, PathBuf>>,
    /// Package sources to record.
    pub sources: BTreeMap<String, PackageSource>,
}

impl Plan {
    /// `true` when there are no conflicts.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// `true` when there is nothing to do on disk.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Count operations by kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary {
            conflicts: self.conflicts.len(),
            warnings: self.warnings.len(),
            ..PlanSummary::default()
        };
        for op in &self.operations {
            match op.kind {
                OperationKind::LinkCreate { .. } => s.link_create += 1,
                OperationKind::LinkDelete { .. } => s.link_delete += 1,
                OperationKind::DirCreate { .. } => s.dir_create += 1,
                OperationKind::DirDelete { .. } => s.dir_delete += 1,
                OperationKind::DirRemoveAll { .. } => s.dir_remove_all += 1,
                OperationKind::DirCopy { .. } => s.dir_copy += 1,
                OperationKind::FileMove { .. } => s.file_move += 1,
                OperationKind::FileBackup { .. } => s.file_backup += 1,
                OperationKind::FileDelete { .. } => s.file_delete += 1,
            }
        }
        s
    }

    /// Dependency graph over [`Plan::operations`].
    #[must_use]
    pub fn dag(&self) -> Dag {
        Dag::build(&self.operations)
    }

    /// Operations in a valid execution order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DotError::CyclicDependency`] for a cyclic plan.
    pub fn ordered(&self) -> crate::error::Result<Vec<&Operation>> {
        Ok(self
            .dag()
            .topological_order()?
            .into_iter()
            .filter_map(|i| self.operations.get(i))
            .collect())
    }
}
