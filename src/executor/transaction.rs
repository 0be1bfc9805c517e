//! Journal of applied side effects and the transaction that owns it.
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::error::{DotError, Result};
use crate::fs::FileSystem;
use crate::plan::OperationId;

/// One reversible side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Undo {
    /// A symlink was created.
    CreatedLink(PathBuf),
    /// A directory was created.
    CreatedDir(PathBuf),
    /// A symlink with these contents was removed.
    RemovedLink { link: PathBuf, contents: PathBuf },
    /// An empty directory with this mode was removed.
    RemovedDir { path: PathBuf, mode: u32 },
    /// A victim was renamed to a staging path; deleted for good on commit.
    Staged { original: PathBuf, staged: PathBuf },
    /// Something was renamed.
    Moved { from: PathBuf, to: PathBuf },
    /// A tree was copied to this path.
    Copied(PathBuf),
}

impl Undo {
    fn revert(&self, fs: &dyn FileSystem, ct: &CancelToken) -> Result<()> {
        match self {
            Self::CreatedLink(link) => fs.remove(ct, link),
            Self::CreatedDir(path) => fs.remove(ct, path),
            Self::RemovedLink { link, contents } => fs.symlink(ct, contents, link),
            Self::RemovedDir { path, mode } => fs.mkdir(ct, path, *mode),
            Self::Staged { original, staged } => fs.rename(ct, staged, original),
            Self::Moved { from, to } => fs.rename(ct, to, from),
            Self::Copied(path) => fs.remove_all(ct, path),
        }
    }
}

/// Side effects in completion order, grouped by operation.
#[derive(Debug, Default)]
pub(super) struct Journal {
    entries: Mutex<Vec<(OperationId, Vec<Undo>)>>,
}

impl Journal {
    pub(super) fn record(&self, id: OperationId, undo: Vec<Undo>) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, undo));
    }

    pub(super) fn into_entries(self) -> Vec<(OperationId, Vec<Undo>)> {
        self.entries
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Undo every entry in reverse completion order, collecting failures.
///
/// Runs with a fresh token so a cancelled run can still be reverted.
pub(super) fn revert_all(
    fs: &dyn FileSystem,
    entries: &[(OperationId, Vec<Undo>)],
) -> Vec<DotError> {
    let ct = CancelToken::new();
    let mut errors = Vec::new();
    for (id, steps) in entries.iter().rev() {
        for step in steps.iter().rev() {
            if let Err(e) = step.revert(fs, &ct) {
                tracing::warn!(operation = %id, error = %e, "rollback step failed");
                errors.push(e);
            }
        }
    }
    errors
}

/// Remove staged victims for good.
pub(super) fn purge_staged(
    fs: &dyn FileSystem,
    entries: &[(OperationId, Vec<Undo>)],
) -> Vec<DotError> {
    let ct = CancelToken::new();
    entries
        .iter()
        .flat_map(|(_, steps)| steps)
        .filter_map(|step| match step {
            Undo::Staged { staged, .. } => fs.remove_all(&ct, staged).err(),
            _ => None,
        })
        .collect()
}

/// The outcome of a successful execution.
///
/// Call [`commit`](Self::commit) once the result has been recorded, or
/// [`rollback`](Self::rollback) to undo it. Dropping an unfinished
/// transaction commits it.
#[derive(Debug)]
pub struct Transaction {
    fs: Arc<dyn FileSystem>,
    entries: Vec<(OperationId, Vec<Undo>)>,
    dry_run: bool,
    finished: bool,
}

impl Transaction {
    pub(super) fn new(
        fs: Arc<dyn FileSystem>,
        entries: Vec<(OperationId, Vec<Undo>)>,
        dry_run: bool,
    ) -> Self {
        Self {
            fs,
            entries,
            dry_run,
            finished: false,
        }
    }

    /// Ids of the operations that ran, in completion order.
    #[must_use]
    pub fn executed(&self) -> Vec<&OperationId> {
        self.entries.iter().map(|(id, _)| id).collect()
    }

    /// Number of operations that ran.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no operation ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when nothing was touched because the run was a dry run.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Make the changes permanent by deleting staged victims.
    ///
    /// # Errors
    ///
    /// Returns the first purge failure; the remaining victims are still
    /// attempted.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let mut errors = purge_staged(self.fs.as_ref(), &self.entries);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.swap_remove(0))
        }
    }

    /// Undo every change, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::ExecutorFailure`] listing the steps that could not
    /// be undone.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        let mut errors = revert_all(self.fs.as_ref(), &self.entries);
        if errors.is_empty() {
            Ok(())
        } else {
            let first = errors.remove(0);
            Err(DotError::ExecutorFailure {
                operation: "rollback".to_string(),
                source: Box::new(first),
                rollback: errors,
            })
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            for e in purge_staged(self.fs.as_ref(), &self.entries) {
                tracing::warn!(error = %e, "failed to purge staged file");
            }
        }
    }
}
