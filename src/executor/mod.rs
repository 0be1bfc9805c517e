//! Plan execution.
//!
//! Operations run level by level: every operation in a level has all of its
//! dependencies in earlier levels, so a level runs in parallel on a bounded
//! rayon pool and the next level starts only once the previous one is done.
//! Each side effect is journaled so an atomic run can be reverted.
mod transaction;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::config::{Config, SymlinkMode};
use crate::error::{DotError, Result};
use crate::fs::{DIR_MODE, FileSystem, copy_tree};
use crate::logging::Log;
use crate::paths::{PackagePath, TargetPath, relative_link, resolve_link};
use crate::plan::{Operation, OperationId, OperationKind, Plan};

pub use transaction::Transaction;
use transaction::{Journal, Undo, purge_staged, revert_all};

/// Infix of the sibling paths destructive operations move their victims to.
pub const STAGING_MARKER: &str = ".dot-staged-";

/// How a plan is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Log operations instead of performing them.
    pub dry_run: bool,
    /// Worker threads per level.
    pub max_parallel: usize,
    /// Revert everything on the first failure.
    pub atomic: bool,
    /// How link contents are written.
    pub symlink_mode: SymlinkMode,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_parallel: 1,
            atomic: true,
            symlink_mode: SymlinkMode::Relative,
        }
    }
}

impl ExecOptions {
    /// Options taken from the resolved configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            max_parallel: config.max_parallel,
            atomic: config.atomic,
            symlink_mode: config.symlink_mode,
        }
    }
}

/// Runs plans against a [`FileSystem`].
pub struct Executor {
    fs: Arc<dyn FileSystem>,
    opts: ExecOptions,
    log: Arc<dyn Log>,
    staged: AtomicU64,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("fs", &self.fs)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor over `fs`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, opts: ExecOptions, log: Arc<dyn Log>) -> Self {
        Self {
            fs,
            opts,
            log,
            staged: AtomicU64::new(0),
        }
    }

    /// Options this executor runs with.
    #[must_use]
    pub const fn options(&self) -> &ExecOptions {
        &self.opts
    }

    /// Execute `plan`.
    ///
    /// # Errors
    ///
    /// - [`DotError::Conflict`] when the plan has conflicts (nothing runs).
    /// - [`DotError::CyclicDependency`] for a cyclic plan (nothing runs).
    /// - [`DotError::Cancelled`] when `ct` fired and everything was reverted.
    /// - [`DotError::ExecutorFailure`] naming the failed operation, with any
    ///   errors raised while rolling back.
    pub fn execute(&self, ct: &CancelToken, plan: &Plan) -> Result<Transaction> {
        if !plan.is_executable() {
            return Err(DotError::Conflict(plan.conflicts.clone()));
        }
        let levels = plan.dag().levels()?;
        let _span = tracing::debug_span!(
            "execute",
            operations = plan.operations.len(),
            levels = levels.len()
        )
        .entered();

        if self.opts.dry_run {
            for op in levels.iter().flatten().filter_map(|&i| plan.operations.get(i)) {
                self.log.dry_run(&op.kind.to_string());
            }
            return Ok(Transaction::new(Arc::clone(&self.fs), Vec::new(), true));
        }
        ct.check()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.max_parallel.max(1))
            .thread_name(|i| format!("dot-exec-{i}"))
            .build()
            .map_err(|e| DotError::Config(format!("failed to start worker pool: {e}")))?;

        let journal = Journal::default();
        let failure: Mutex<Option<(OperationId, DotError)>> = Mutex::new(None);
        let stop = AtomicBool::new(false);

        for (depth, level) in levels.iter().enumerate() {
            tracing::debug!(level = depth, operations = level.len(), "starting level");
            pool.install(|| {
                level.par_iter().for_each(|&index| {
                    if stop.load(Ordering::SeqCst) || ct.is_cancelled() {
                        return;
                    }
                    let Some(op) = plan.operations.get(index) else {
                        return;
                    };
                    match self.apply(ct, op) {
                        Ok(undo) => {
                            self.log.debug(&op.kind.to_string());
                            journal.record(op.id.clone(), undo);
                        }
                        Err(e) => {
                            stop.store(true, Ordering::SeqCst);
                            let mut slot = failure
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner);
                            if slot.is_none() {
                                *slot = Some((op.id.clone(), e));
                            }
                        }
                    }
                });
            });
            if stop.load(Ordering::SeqCst) || ct.is_cancelled() {
                break;
            }
        }

        let entries = journal.into_entries();
        let failure = failure
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (operation, source) = match failure {
            Some((id, e)) => (id.to_string(), e),
            None if entries.len() == plan.operations.len() => {
                return Ok(Transaction::new(Arc::clone(&self.fs), entries, false));
            }
            None => ("cancelled".to_string(), DotError::Cancelled),
        };

        if self.opts.atomic {
            self.log.warn(&format!(
                "{operation} failed: {source}; rolling back {} operation(s)",
                entries.len()
            ));
            let rollback = revert_all(self.fs.as_ref(), &entries);
            if source.is_cancelled() && rollback.is_empty() {
                return Err(DotError::Cancelled);
            }
            Err(DotError::ExecutorFailure {
                operation,
                source: Box::new(source),
                rollback,
            })
        } else {
            for e in purge_staged(self.fs.as_ref(), &entries) {
                self.log.warn(&format!("failed to purge staged file: {e}"));
            }
            Err(DotError::ExecutorFailure {
                operation,
                source: Box::new(source),
                rollback: Vec::new(),
            })
        }
    }

    /// Apply one operation; on failure its own partial effects are reverted.
    fn apply(&self, ct: &CancelToken, op: &Operation) -> Result<Vec<Undo>> {
        ct.check()?;
        let mut undo = Vec::new();
        match self.apply_into(ct, &op.kind, &mut undo) {
            Ok(()) => Ok(undo),
            Err(e) => {
                for err in revert_all(self.fs.as_ref(), &[(op.id.clone(), undo)]) {
                    tracing::warn!(operation = %op.id, error = %err, "partial revert failed");
                }
                Err(e)
            }
        }
    }

    fn apply_into(&self, ct: &CancelToken, kind: &OperationKind, undo: &mut Vec<Undo>) -> Result<()> {
        let fs = self.fs.as_ref();
        match kind {
            OperationKind::LinkCreate { source, target } => {
                let link = target.as_path();
                match fs.lstat(ct, link) {
                    Ok(info) if info.is_symlink() => {
                        let existing = fs.read_link(ct, link)?;
                        if resolve_link(link, &existing) == source.as_path() {
                            return Ok(());
                        }
                        return Err(occupied("symlink", link, "a different link is in the way"));
                    }
                    Ok(_) => return Err(occupied("symlink", link, "path is occupied")),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.ensure_parent(ct, link, undo)?;
                fs.symlink(ct, &self.link_contents(source, target), link)?;
                undo.push(Undo::CreatedLink(link.to_path_buf()));
            }
            OperationKind::LinkDelete { target } => {
                let link = target.as_path();
                match fs.lstat(ct, link) {
                    Ok(info) if info.is_symlink() => {}
                    Ok(_) => {
                        return Err(DotError::io_kind(
                            "unlink",
                            link,
                            std::io::ErrorKind::InvalidInput,
                            "not a symlink",
                        ));
                    }
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                }
                let contents = fs.read_link(ct, link)?;
                fs.remove(ct, link)?;
                undo.push(Undo::RemovedLink {
                    link: link.to_path_buf(),
                    contents,
                });
            }
            OperationKind::DirCreate { path } => {
                let dir = path.as_path();
                match fs.lstat(ct, dir) {
                    Ok(info) if info.is_dir() => return Ok(()),
                    Ok(_) => return Err(occupied("mkdir", dir, "not a directory")),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.ensure_parent(ct, dir, undo)?;
                fs.mkdir(ct, dir, DIR_MODE)?;
                undo.push(Undo::CreatedDir(dir.to_path_buf()));
            }
            OperationKind::DirDelete { path } => {
                let dir = path.as_path();
                let info = match fs.lstat(ct, dir) {
                    Ok(info) if info.is_dir() => info,
                    Ok(_) => {
                        return Err(DotError::io_kind(
                            "rmdir",
                            dir,
                            std::io::ErrorKind::NotADirectory,
                            "not a directory",
                        ));
                    }
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e),
                };
                fs.remove(ct, dir)?;
                undo.push(Undo::RemovedDir {
                    path: dir.to_path_buf(),
                    mode: info.mode,
                });
            }
            OperationKind::DirRemoveAll { path } => {
                if fs.exists(ct, path.as_path())? {
                    self.stage(ct, path.as_path(), undo)?;
                }
            }
            OperationKind::FileDelete { path } => {
                let file = path.as_path();
                match fs.lstat(ct, file) {
                    Ok(info) if info.is_dir() => {
                        return Err(DotError::io_kind(
                            "rm",
                            file,
                            std::io::ErrorKind::IsADirectory,
                            "is a directory",
                        ));
                    }
                    Ok(_) => self.stage(ct, file, undo)?,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            OperationKind::DirCopy { src, dst } => {
                if fs.exists(ct, dst.as_path())? {
                    return Err(occupied("copy", dst.as_path(), "destination exists"));
                }
                self.ensure_parent(ct, dst.as_path(), undo)?;
                if let Err(e) = copy_tree(fs, ct, src.as_path(), dst.as_path()) {
                    if let Err(cleanup) = fs.remove_all(&CancelToken::new(), dst.as_path()) {
                        tracing::warn!(path = %dst, error = %cleanup, "failed to remove partial copy");
                    }
                    return Err(e);
                }
                undo.push(Undo::Copied(dst.as_path().to_path_buf()));
            }
            OperationKind::FileMove { src, dst } => {
                if !fs.exists(ct, src.as_path())? && fs.exists(ct, dst.as_path())? {
                    return Ok(());
                }
                self.ensure_parent(ct, dst.as_path(), undo)?;
                fs.rename(ct, src.as_path(), dst.as_path())?;
                undo.push(Undo::Moved {
                    from: src.as_path().to_path_buf(),
                    to: dst.as_path().to_path_buf(),
                });
            }
            OperationKind::FileBackup { src, backup } => {
                if !fs.exists(ct, src.as_path())? {
                    return Ok(());
                }
                if fs.exists(ct, backup.as_path())? {
                    return Err(occupied("backup", backup.as_path(), "backup already exists"));
                }
                self.ensure_parent(ct, backup.as_path(), undo)?;
                fs.rename(ct, src.as_path(), backup.as_path())?;
                undo.push(Undo::Moved {
                    from: src.as_path().to_path_buf(),
                    to: backup.as_path().to_path_buf(),
                });
            }
        }
        Ok(())
    }

    fn link_contents(&self, source: &PackagePath, target: &TargetPath) -> PathBuf {
        match (self.opts.symlink_mode, target.as_path().parent()) {
            (SymlinkMode::Relative, Some(dir)) => relative_link(dir, source.as_path()),
            _ => source.as_path().to_path_buf(),
        }
    }

    /// Create missing ancestors of `path`, journaling each one.
    fn ensure_parent(&self, ct: &CancelToken, path: &Path, undo: &mut Vec<Undo>) -> Result<()> {
        let fs = self.fs.as_ref();
        let mut missing = Vec::new();
        let mut cursor = path.parent();
        while let Some(dir) = cursor {
            match fs.lstat(ct, dir) {
                Ok(_) => break,
                Err(e) if e.is_not_found() => {
                    missing.push(dir);
                    cursor = dir.parent();
                }
                Err(e) => return Err(e),
            }
        }
        for dir in missing.into_iter().rev() {
            match fs.mkdir(ct, dir, DIR_MODE) {
                Ok(()) => undo.push(Undo::CreatedDir(dir.to_path_buf())),
                // A sibling operation in the same level got there first.
                Err(e) if e.is_already_exists() && fs.is_dir(ct, dir)? => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Move `path` to a sibling staging path so it can be restored.
    fn stage(&self, ct: &CancelToken, path: &Path, undo: &mut Vec<Undo>) -> Result<()> {
        let n = self.staged.fetch_add(1, Ordering::Relaxed);
        let name = path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let staged = path.with_file_name(format!(
            "{name}{STAGING_MARKER}{}-{n}",
            std::process::id()
        ));
        self.fs.rename(ct, path, &staged)?;
        undo.push(Undo::Staged {
            original: path.to_path_buf(),
            staged,
        });
        Ok(())
    }
}

fn occupied(op: &'static str, path: &Path, msg: &str) -> DotError {
    DotError::io_kind(op, path, std::io::ErrorKind::AlreadyExists, msg)
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::fs::{FsOp, MemoryFs};
    use crate::logging::RecordingLog;
    use crate::paths::FilePath;
    use crate::plan::{Conflict, ConflictKind};

    fn op(kind: OperationKind, deps: &[&Operation]) -> Operation {
        Operation::new(kind, deps.iter().map(|d| d.id.clone()).collect())
    }

    fn link(source: &str, target: &str) -> OperationKind {
        OperationKind::LinkCreate {
            source: PackagePath::new(source).unwrap(),
            target: TargetPath::new(target).unwrap(),
        }
    }

    fn mkdir(path: &str) -> OperationKind {
        OperationKind::DirCreate {
            path: FilePath::new(path).unwrap(),
        }
    }

    fn plan_of(operations: Vec<Operation>) -> Plan {
        Plan {
            operations,
            ..Plan::default()
        }
    }

    fn executor(fs: &Arc<MemoryFs>, opts: ExecOptions) -> (Executor, Arc<RecordingLog>) {
        let log = Arc::new(RecordingLog::default());
        let fs_dyn: Arc<dyn FileSystem> = Arc::clone(fs) as Arc<dyn FileSystem>;
        let log_dyn: Arc<dyn Log> = Arc::clone(&log) as Arc<dyn Log>;
        (Executor::new(fs_dyn, opts, log_dyn), log)
    }

    fn has_staging(fs: &MemoryFs) -> bool {
        fs.paths()
            .iter()
            .any(|p| p.to_string_lossy().contains(STAGING_MARKER))
    }

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    // ------------------------------------------------------------------
    // Happy path
    // ------------------------------------------------------------------

    #[test]
    fn creates_directories_before_links() {
        let fs = Arc::new(MemoryFs::new().with_file("/repo/nvim/dot-config/nvim/init.lua", b""));
        let dir = op(mkdir("/home/u/.config"), &[]);
        let ln = op(
            link("/repo/nvim/dot-config/nvim", "/home/u/.config/nvim"),
            &[&dir],
        );
        let (exec, _) = executor(&fs, ExecOptions::default());
        let ct = CancelToken::new();
        let tx = exec.execute(&ct, &plan_of(vec![ln, dir])).unwrap();
        assert_eq!(tx.len(), 2);
        tx.commit().unwrap();

        let contents = fs.read_link(&ct, p("/home/u/.config/nvim")).unwrap();
        assert!(contents.is_relative());
        assert_eq!(
            resolve_link(p("/home/u/.config/nvim"), &contents),
            PathBuf::from("/repo/nvim/dot-config/nvim")
        );
    }

    #[test]
    fn absolute_mode_writes_absolute_contents() {
        let fs = Arc::new(MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"").with_dir("/home/u"));
        let opts = ExecOptions {
            symlink_mode: SymlinkMode::Absolute,
            ..ExecOptions::default()
        };
        let (exec, _) = executor(&fs, opts);
        let ct = CancelToken::new();
        let plan = plan_of(vec![op(link("/repo/vim/dot-vimrc", "/home/u/.vimrc"), &[])]);
        exec.execute(&ct, &plan).unwrap().commit().unwrap();
        assert_eq!(
            fs.read_link(&ct, p("/home/u/.vimrc")).unwrap(),
            PathBuf::from("/repo/vim/dot-vimrc")
        );
    }

    #[test]
    fn rerunning_a_plan_is_idempotent() {
        let fs = Arc::new(MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"").with_dir("/home/u"));
        let dir = op(mkdir("/home/u/.vim"), &[]);
        let ln = op(link("/repo/vim/dot-vimrc", "/home/u/.vimrc"), &[]);
        let gone = op(
            OperationKind::FileDelete {
                path: TargetPath::new("/home/u/.absent").unwrap(),
            },
            &[],
        );
        let plan = plan_of(vec![dir, ln, gone]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        let ct = CancelToken::new();
        exec.execute(&ct, &plan).unwrap().commit().unwrap();
        let before = fs.paths();
        exec.execute(&ct, &plan).unwrap().commit().unwrap();
        assert_eq!(fs.paths(), before);
    }

    #[test]
    fn runs_wide_levels_in_parallel() {
        let mut fs = MemoryFs::new().with_dir("/home/u");
        let mut ops = Vec::new();
        for i in 0..32 {
            fs = fs.with_file(format!("/repo/pkg/f{i}"), b"");
            ops.push(op(link(&format!("/repo/pkg/f{i}"), &format!("/home/u/sub/f{i}")), &[]));
        }
        let fs = Arc::new(fs);
        let opts = ExecOptions {
            max_parallel: 4,
            ..ExecOptions::default()
        };
        let (exec, _) = executor(&fs, opts);
        let tx = exec.execute(&CancelToken::new(), &plan_of(ops)).unwrap();
        assert_eq!(tx.len(), 32);
        assert!(fs.is_dir(&CancelToken::new(), p("/home/u/sub")).unwrap());
    }

    // ------------------------------------------------------------------
    // Refusals
    // ------------------------------------------------------------------

    #[test]
    fn plans_with_conflicts_are_refused() {
        let fs = Arc::new(MemoryFs::new().with_file("/home/u/.vimrc", b"mine"));
        let mut plan = plan_of(vec![op(mkdir("/home/u/.vim"), &[])]);
        plan.conflicts.push(Conflict::new(
            ConflictKind::FileExists,
            "/home/u/.vimrc",
            "regular file",
        ));
        let (exec, _) = executor(&fs, ExecOptions::default());
        let err = exec.execute(&CancelToken::new(), &plan).unwrap_err();
        assert!(matches!(err, DotError::Conflict(ref c) if c.len() == 1));
        assert!(!fs.exists(&CancelToken::new(), p("/home/u/.vim")).unwrap());
    }

    #[test]
    fn cyclic_plans_run_nothing() {
        let fs = Arc::new(MemoryFs::new().with_dir("/home/u"));
        let a = mkdir("/home/u/a");
        let b = mkdir("/home/u/b");
        let plan = plan_of(vec![
            Operation::new(a.clone(), vec![b.id()]),
            Operation::new(b, vec![a.id()]),
        ]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        let err = exec.execute(&CancelToken::new(), &plan).unwrap_err();
        assert!(matches!(err, DotError::CyclicDependency(_)));
        assert!(!fs.exists(&CancelToken::new(), p("/home/u/a")).unwrap());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let fs = Arc::new(MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"").with_dir("/home/u"));
        let before = fs.paths();
        let opts = ExecOptions {
            dry_run: true,
            ..ExecOptions::default()
        };
        let (exec, log) = executor(&fs, opts);
        let plan = plan_of(vec![op(link("/repo/vim/dot-vimrc", "/home/u/.vimrc"), &[])]);
        let tx = exec.execute(&CancelToken::new(), &plan).unwrap();
        assert!(tx.is_dry_run());
        assert!(tx.is_empty());
        assert_eq!(fs.paths(), before);
        assert_eq!(
            log.messages("dry_run"),
            vec!["link /home/u/.vimrc -> /repo/vim/dot-vimrc".to_string()]
        );
    }

    #[test]
    fn existing_file_blocks_link() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/repo/vim/dot-vimrc", b"")
                .with_file("/home/u/.vimrc", b"mine"),
        );
        let (exec, _) = executor(&fs, ExecOptions::default());
        let plan = plan_of(vec![op(link("/repo/vim/dot-vimrc", "/home/u/.vimrc"), &[])]);
        let err = exec.execute(&CancelToken::new(), &plan).unwrap_err();
        let DotError::ExecutorFailure { source, .. } = err else {
            panic!("expected executor failure");
        };
        assert!(source.is_already_exists());
    }

    // ------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------

    #[test]
    fn atomic_failure_reverts_completed_operations() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/repo/a/x", b"")
                .with_file("/repo/a/y", b"")
                .with_dir("/home/u"),
        );
        fs.fail_on(FsOp::Symlink, "/home/u/y");
        let first = op(link("/repo/a/x", "/home/u/deep/x"), &[]);
        let second = op(link("/repo/a/y", "/home/u/y"), &[&first]);
        let (exec, log) = executor(&fs, ExecOptions::default());
        let err = exec
            .execute(&CancelToken::new(), &plan_of(vec![first, second]))
            .unwrap_err();

        let DotError::ExecutorFailure {
            operation,
            source,
            rollback,
        } = err
        else {
            panic!("expected executor failure");
        };
        assert_eq!(operation, "link-create:/home/u/y");
        assert!(matches!(*source, DotError::PermissionDenied { .. }));
        assert!(rollback.is_empty());
        assert_eq!(source.exit_code(), crate::error::EXIT_PERMISSION);

        let ct = CancelToken::new();
        assert!(!fs.exists(&ct, p("/home/u/deep/x")).unwrap());
        assert!(!fs.exists(&ct, p("/home/u/deep")).unwrap());
        assert_eq!(log.messages("warn").len(), 1);
    }

    #[test]
    fn non_atomic_failure_keeps_completed_operations() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/repo/a/x", b"")
                .with_file("/repo/a/y", b"")
                .with_dir("/home/u"),
        );
        fs.fail_on(FsOp::Symlink, "/home/u/y");
        let first = op(link("/repo/a/x", "/home/u/x"), &[]);
        let second = op(link("/repo/a/y", "/home/u/y"), &[&first]);
        let opts = ExecOptions {
            atomic: false,
            ..ExecOptions::default()
        };
        let (exec, _) = executor(&fs, opts);
        let err = exec
            .execute(&CancelToken::new(), &plan_of(vec![first, second]))
            .unwrap_err();
        assert!(matches!(err, DotError::ExecutorFailure { ref rollback, .. } if rollback.is_empty()));
        assert!(fs.is_symlink(&CancelToken::new(), p("/home/u/x")).unwrap());
    }

    #[test]
    fn deleted_file_is_restored_on_rollback() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/repo/sh/dot-bashrc", b"new")
                .with_file("/home/u/.bashrc", b"old"),
        );
        fs.fail_on(FsOp::Symlink, "/home/u/.bashrc");
        let delete = op(
            OperationKind::FileDelete {
                path: TargetPath::new("/home/u/.bashrc").unwrap(),
            },
            &[],
        );
        let ln = op(link("/repo/sh/dot-bashrc", "/home/u/.bashrc"), &[&delete]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        exec.execute(&CancelToken::new(), &plan_of(vec![delete, ln]))
            .unwrap_err();

        let ct = CancelToken::new();
        assert_eq!(fs.read_file(&ct, p("/home/u/.bashrc")).unwrap(), b"old");
        assert!(!has_staging(&fs));
    }

    #[test]
    fn commit_purges_staged_victims() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/home/u/.cache/x/1", b"")
                .with_file("/home/u/.bashrc", b"old"),
        );
        let plan = plan_of(vec![
            op(
                OperationKind::DirRemoveAll {
                    path: FilePath::new("/home/u/.cache").unwrap(),
                },
                &[],
            ),
            op(
                OperationKind::FileDelete {
                    path: TargetPath::new("/home/u/.bashrc").unwrap(),
                },
                &[],
            ),
        ]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        let tx = exec.execute(&CancelToken::new(), &plan).unwrap();
        assert!(has_staging(&fs));
        tx.commit().unwrap();
        assert!(!has_staging(&fs));
        assert_eq!(
            fs.paths(),
            vec![PathBuf::from("/"), PathBuf::from("/home"), PathBuf::from("/home/u")]
        );
    }

    #[test]
    fn transaction_rollback_undoes_a_successful_run() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/repo/vim/dot-vimrc", b"")
                .with_symlink("/home/u/.old", "/repo/old"),
        );
        let before = fs.paths();
        let plan = plan_of(vec![
            op(link("/repo/vim/dot-vimrc", "/home/u/.vimrc"), &[]),
            op(
                OperationKind::LinkDelete {
                    target: TargetPath::new("/home/u/.old").unwrap(),
                },
                &[],
            ),
        ]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        let tx = exec.execute(&CancelToken::new(), &plan).unwrap();
        tx.rollback().unwrap();
        assert_eq!(fs.paths(), before);
        assert_eq!(
            fs.read_link(&CancelToken::new(), p("/home/u/.old")).unwrap(),
            PathBuf::from("/repo/old")
        );
    }

    #[test]
    fn adopt_operations_move_and_copy() {
        let fs = Arc::new(
            MemoryFs::new()
                .with_file("/home/u/.gitconfig", b"[user]")
                .with_file("/home/u/.config/git/ignore", b"*.o")
                .with_dir("/repo"),
        );
        let plan = plan_of(vec![
            op(
                OperationKind::FileMove {
                    src: FilePath::new("/home/u/.gitconfig").unwrap(),
                    dst: FilePath::new("/repo/git/dot-gitconfig").unwrap(),
                },
                &[],
            ),
            op(
                OperationKind::DirCopy {
                    src: FilePath::new("/home/u/.config/git").unwrap(),
                    dst: FilePath::new("/repo/git/dot-config/git").unwrap(),
                },
                &[],
            ),
        ]);
        let (exec, _) = executor(&fs, ExecOptions::default());
        let ct = CancelToken::new();
        let tx = exec.execute(&ct, &plan).unwrap();
        assert_eq!(fs.read_file(&ct, p("/repo/git/dot-gitconfig")).unwrap(), b"[user]");
        assert_eq!(fs.read_file(&ct, p("/repo/git/dot-config/git/ignore")).unwrap(), b"*.o");
        tx.rollback().unwrap();
        assert_eq!(fs.read_file(&ct, p("/home/u/.gitconfig")).unwrap(), b"[user]");
        assert!(!fs.exists(&ct, p("/repo/git")).unwrap());
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    #[test]
    fn cancelled_token_runs_nothing() {
        let fs = Arc::new(MemoryFs::new().with_dir("/home/u"));
        let (exec, _) = executor(&fs, ExecOptions::default());
        let ct = CancelToken::new();
        ct.cancel();
        let err = exec
            .execute(&ct, &plan_of(vec![op(mkdir("/home/u/a"), &[])]))
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!fs.exists(&CancelToken::new(), p("/home/u/a")).unwrap());
    }

    #[test]
    fn cancellation_between_levels_rolls_back() {
        let fs = Arc::new(CancellingFs {
            inner: MemoryFs::new().with_dir("/home/u"),
            trigger: PathBuf::from("/home/u/a"),
            token: CancelToken::new(),
        });
        let first = op(mkdir("/home/u/a"), &[]);
        let second = op(mkdir("/home/u/a/b"), &[&first]);
        let exec = Executor::new(
            Arc::clone(&fs) as Arc<dyn FileSystem>,
            ExecOptions::default(),
            Arc::new(RecordingLog::default()),
        );
        let err = exec
            .execute(&fs.token, &plan_of(vec![first, second]))
            .unwrap_err();
        assert!(matches!(err, DotError::Cancelled));
        assert!(!fs.inner.exists(&CancelToken::new(), p("/home/u/a")).unwrap());
    }

    /// Fires `token` right after `trigger` is created.
    #[derive(Debug)]
    struct CancellingFs {
        inner: MemoryFs,
        trigger: PathBuf,
        token: CancelToken,
    }

    impl FileSystem for CancellingFs {
        fn stat(&self, ct: &CancelToken, path: &Path) -> Result<crate::fs::FileInfo> {
            self.inner.stat(ct, path)
        }
        fn lstat(&self, ct: &CancelToken, path: &Path) -> Result<crate::fs::FileInfo> {
            self.inner.lstat(ct, path)
        }
        fn read_dir(&self, ct: &CancelToken, path: &Path) -> Result<Vec<crate::fs::DirEntry>> {
            self.inner.read_dir(ct, path)
        }
        fn read_link(&self, ct: &CancelToken, path: &Path) -> Result<PathBuf> {
            self.inner.read_link(ct, path)
        }
        fn read_file(&self, ct: &CancelToken, path: &Path) -> Result<Vec<u8>> {
            self.inner.read_file(ct, path)
        }
        fn write_file(&self, ct: &CancelToken, path: &Path, data: &[u8], mode: u32) -> Result<()> {
            self.inner.write_file(ct, path, data, mode)
        }
        fn mkdir(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
            self.inner.mkdir(ct, path, mode)?;
            if path == self.trigger {
                self.token.cancel();
            }
            Ok(())
        }
        fn mkdir_all(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
            self.inner.mkdir_all(ct, path, mode)
        }
        fn remove(&self, ct: &CancelToken, path: &Path) -> Result<()> {
            self.inner.remove(ct, path)
        }
        fn remove_all(&self, ct: &CancelToken, path: &Path) -> Result<()> {
            self.inner.remove_all(ct, path)
        }
        fn symlink(&self, ct: &CancelToken, target: &Path, link: &Path) -> Result<()> {
            self.inner.symlink(ct, target, link)
        }
        fn rename(&self, ct: &CancelToken, from: &Path, to: &Path) -> Result<()> {
            self.inner.rename(ct, from, to)
        }
        fn create_exclusive(&self, ct: &CancelToken, path: &Path, data: &[u8]) -> Result<()> {
            self.inner.create_exclusive(ct, path, data)
        }
    }
}
