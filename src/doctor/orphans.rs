//! Orphan scan: symlinks in the target tree that no package claims.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use super::{ScanConfig, ScanMode};
use crate::cancel::CancelToken;
use crate::error::{DotError, Result};
use crate::fs::{FileKind, FileSystem};
use crate::ignore::IgnoreSet;
use crate::manifest::DoctorState;
use crate::paths::{relative_to, resolve_link};

/// Directory names the scan never descends into.
pub const SKIP_PATTERNS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".cache",
    "Caches",
    "node_modules",
    "Library",
    ".Trash",
    "*.app",
];

/// An unclaimed symlink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Orphan {
    /// Path relative to the target directory.
    pub path: PathBuf,
    /// Raw link contents.
    pub contents: PathBuf,
    /// Absolute, cleaned destination.
    pub resolved: PathBuf,
    /// The destination exists.
    pub target_exists: bool,
    /// The destination lies inside the package directory.
    pub points_into_package: bool,
}

/// What the scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanScan {
    /// Orphans sorted by path, at most `max_issues` of them.
    pub orphans: Vec<Orphan>,
    /// Symlinks skipped because doctor state acknowledges them.
    pub ignored: usize,
    /// Symlinks examined, managed or not.
    pub links_seen: usize,
    /// The issue cap stopped the walk early.
    pub truncated: bool,
}

/// Inputs for [`scan_orphans`].
#[derive(Debug)]
pub struct OrphanQuery<'a> {
    /// Root of the scan.
    pub target_dir: &'a Path,
    /// Links resolving under here point into packages.
    pub package_dir: &'a Path,
    /// Every managed link, relative to the target directory.
    pub managed: &'a BTreeSet<PathBuf>,
    /// Acknowledged links and patterns.
    pub doctor: &'a DoctorState,
    /// Mode and limits.
    pub config: &'a ScanConfig,
}

struct Walk<'a> {
    fs: &'a dyn FileSystem,
    ct: &'a CancelToken,
    query: &'a OrphanQuery<'a>,
    skip: IgnoreSet,
    acknowledged: IgnoreSet,
    found: Mutex<BTreeMap<PathBuf, Orphan>>,
    ignored: Mutex<BTreeSet<PathBuf>>,
    seen: Mutex<BTreeSet<PathBuf>>,
    issues: AtomicUsize,
}

/// Find symlinks under the target directory that are neither managed nor
/// acknowledged.
///
/// Symlinks are never followed, so link cycles cannot cause unbounded
/// recursion. The scan stops descending once `max_issues` orphans were
/// found.
///
/// # Errors
///
/// Fails on cancellation or when a pattern in the doctor state is invalid.
/// Unreadable directories are skipped.
pub fn scan_orphans(
    fs: &dyn FileSystem,
    ct: &CancelToken,
    query: &OrphanQuery<'_>,
) -> Result<OrphanScan> {
    let config = query.config;
    if config.mode == ScanMode::Off || config.max_issues == 0 {
        return Ok(OrphanScan::default());
    }

    let walk = Walk {
        fs,
        ct,
        query,
        skip: IgnoreSet::new(SKIP_PATTERNS, false)?,
        acknowledged: IgnoreSet::new(&query.doctor.ignored_patterns, false)?,
        found: Mutex::new(BTreeMap::new()),
        ignored: Mutex::new(BTreeSet::new()),
        seen: Mutex::new(BTreeSet::new()),
        issues: AtomicUsize::new(0),
    };

    let starts: Vec<PathBuf> = match config.mode {
        ScanMode::Deep => vec![PathBuf::new()],
        _ => scoped_roots(query.managed),
    };
    tracing::debug!(mode = ?config.mode, roots = starts.len(), depth = config.max_depth, "scanning for orphans");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_workers.max(1))
        .thread_name(|i| format!("dot-scan-{i}"))
        .build()
        .map_err(|e| DotError::Config(format!("failed to start scan pool: {e}")))?;

    let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
    let mut frontier: Vec<(PathBuf, usize)> = starts.into_iter().map(|s| (s, 0)).collect();
    while !frontier.is_empty() {
        ct.check()?;
        frontier.retain(|(dir, _)| visited.insert(dir.clone()));
        let next: Vec<Vec<(PathBuf, usize)>> = pool.install(|| {
            frontier
                .par_iter()
                .map(|(dir, depth)| walk.visit(dir, *depth))
                .collect::<Result<Vec<_>>>()
        })?;
        if walk.issues.load(Ordering::SeqCst) >= config.max_issues {
            break;
        }
        frontier = next.into_iter().flatten().collect();
    }

    let found = walk
        .found
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let truncated = found.len() >= config.max_issues;
    let orphans = found.into_values().take(config.max_issues).collect();
    let ignored = walk
        .ignored
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .len();
    let links_seen = walk
        .seen
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .len();
    Ok(OrphanScan {
        orphans,
        ignored,
        links_seen,
        truncated,
    })
}

/// Directories holding at least one managed link.
fn scoped_roots(managed: &BTreeSet<PathBuf>) -> Vec<PathBuf> {
    managed
        .iter()
        .map(|rel| rel.parent().map_or_else(PathBuf::new, Path::to_path_buf))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Walk<'_> {
    /// List one directory; returns the sub-directories to visit next.
    fn visit(&self, rel_dir: &Path, depth: usize) -> Result<Vec<(PathBuf, usize)>> {
        self.ct.check()?;
        if self.issues.load(Ordering::SeqCst) >= self.query.config.max_issues {
            return Ok(Vec::new());
        }
        let dir = self.query.target_dir.join(rel_dir);
        if dir.starts_with(self.query.package_dir) {
            return Ok(Vec::new());
        }
        let entries = match self.fs.read_dir(self.ct, &dir) {
            Ok(entries) => entries,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return Ok(Vec::new());
            }
        };

        let mut subdirs = Vec::new();
        for entry in entries {
            self.ct.check()?;
            let rel = rel_dir.join(&entry.name);
            match entry.kind {
                FileKind::Dir => {
                    if depth < self.query.config.max_depth
                        && !self.skip.is_entry_ignored(&rel, true)
                        && !self.acknowledged.is_ignored(&rel, true)
                    {
                        subdirs.push((rel, depth + 1));
                    }
                }
                FileKind::Symlink => self.inspect_link(&entry.path, rel)?,
                FileKind::File => {}
            }
        }
        Ok(subdirs)
    }

    fn inspect_link(&self, link: &Path, rel: PathBuf) -> Result<()> {
        lock(&self.seen).insert(rel.clone());
        if self.query.managed.contains(&rel) {
            return Ok(());
        }
        let contents = match self.fs.read_link(self.ct, link) {
            Ok(contents) => contents,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::debug!(link = %link.display(), error = %e, "cannot read link");
                return Ok(());
            }
        };
        if self.acknowledged.is_ignored(&rel, false)
            || self.query.doctor.is_link_ignored(&rel, &contents)
        {
            lock(&self.ignored).insert(rel);
            return Ok(());
        }

        let resolved = resolve_link(link, &contents);
        let target_exists = match self.fs.stat(self.ct, link) {
            Ok(_) => true,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(_) => false,
        };
        let orphan = Orphan {
            points_into_package: relative_to(&resolved, self.query.package_dir).is_some(),
            path: rel.clone(),
            contents,
            resolved,
            target_exists,
        };
        if lock(&self.found).insert(rel, orphan).is_none() {
            self.issues.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    fn managed(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    fn scan(fs: &MemoryFs, managed: &BTreeSet<PathBuf>, doctor: &DoctorState, config: &ScanConfig) -> OrphanScan {
        let query = OrphanQuery {
            target_dir: Path::new("/home/u"),
            package_dir: Path::new("/home/u/dotfiles"),
            managed,
            doctor,
            config,
        };
        scan_orphans(fs, &CancelToken::new(), &query).unwrap()
    }

    fn paths(result: &OrphanScan) -> Vec<String> {
        result
            .orphans
            .iter()
            .map(|o| o.path.display().to_string())
            .collect()
    }

    fn home() -> MemoryFs {
        MemoryFs::new()
            .with_file("/home/u/dotfiles/vim/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "dotfiles/vim/dot-vimrc")
            .with_symlink("/home/u/.old", "dotfiles/gone/dot-old")
            .with_symlink("/home/u/.config/app/link", "/etc/hosts")
            .with_file("/etc/hosts", b"")
            .with_symlink("/home/u/a/b/c/d/e/deep", "/nowhere")
    }

    #[test]
    fn scoped_scan_finds_siblings_of_managed_links() {
        let fs = home();
        let result = scan(
            &fs,
            &managed(&[".vimrc"]),
            &DoctorState::default(),
            &ScanConfig::new(ScanMode::Scoped),
        );
        // Depth 3 from the home directory reaches .config/app but not a/b/c/d/e.
        assert_eq!(paths(&result), vec![".config/app/link", ".old"]);
        let old = &result.orphans[1];
        assert!(old.points_into_package);
        assert!(!old.target_exists);
        assert_eq!(result.links_seen, 3);
    }

    #[test]
    fn deep_scan_honours_depth() {
        let fs = home();
        let config = ScanConfig::new(ScanMode::Deep);
        let result = scan(&fs, &managed(&[".vimrc"]), &DoctorState::default(), &config);
        assert_eq!(
            paths(&result),
            vec![".config/app/link", ".old", "a/b/c/d/e/deep"]
        );

        let shallow = ScanConfig {
            max_depth: 1,
            ..config
        };
        let result = scan(&fs, &managed(&[".vimrc"]), &DoctorState::default(), &shallow);
        assert_eq!(paths(&result), vec![".old"]);
    }

    #[test]
    fn off_mode_scans_nothing() {
        let result = scan(
            &home(),
            &managed(&[".vimrc"]),
            &DoctorState::default(),
            &ScanConfig::new(ScanMode::Off),
        );
        assert_eq!(result, OrphanScan::default());
    }

    #[test]
    fn max_issues_caps_results() {
        let mut fs = MemoryFs::new().with_dir("/home/u");
        for i in 0..20 {
            fs = fs.with_symlink(format!("/home/u/l{i:02}"), "/nowhere");
        }
        let config = ScanConfig {
            max_issues: 5,
            ..ScanConfig::new(ScanMode::Deep)
        };
        let result = scan(&fs, &managed(&[]), &DoctorState::default(), &config);
        assert_eq!(result.orphans.len(), 5);
        assert!(result.truncated);
    }

    #[test]
    fn symlink_cycles_do_not_recurse() {
        let fs = MemoryFs::new()
            .with_symlink("/home/u/loop/a", "/home/u/loop")
            .with_symlink("/home/u/x", "/home/u/y")
            .with_symlink("/home/u/y", "/home/u/x");
        let result = scan(
            &fs,
            &managed(&[]),
            &DoctorState::default(),
            &ScanConfig::new(ScanMode::Deep),
        );
        assert_eq!(paths(&result), vec!["loop/a", "x", "y"]);
        assert!(result.orphans.iter().all(|o| o.path != Path::new("loop/a") || o.target_exists));
    }

    #[test]
    fn skip_list_and_package_dir_are_not_walked() {
        let fs = MemoryFs::new()
            .with_symlink("/home/u/.git/hooks/pre-commit", "/nowhere")
            .with_symlink("/home/u/node_modules/.bin/tool", "/nowhere")
            .with_symlink("/home/u/Thing.app/Contents/x", "/nowhere")
            .with_symlink("/home/u/dotfiles/pkg/link", "/nowhere");
        let result = scan(
            &fs,
            &managed(&[]),
            &DoctorState::default(),
            &ScanConfig::new(ScanMode::Deep),
        );
        assert!(result.orphans.is_empty(), "{:?}", paths(&result));
    }

    #[test]
    fn acknowledged_links_and_patterns_are_counted_as_ignored() {
        let fs = home();
        let mut doctor = DoctorState::default();
        doctor.ignored_patterns.push(".config/app/*".to_string());
        let mut manifest = crate::manifest::Manifest::default();
        manifest.doctor = doctor;
        manifest.ignore_link(Path::new(".old"), Path::new("dotfiles/gone/dot-old"), "known");
        let result = scan(
            &fs,
            &managed(&[".vimrc"]),
            &manifest.doctor,
            &ScanConfig::new(ScanMode::Deep),
        );
        assert_eq!(paths(&result), vec!["a/b/c/d/e/deep"]);
        assert_eq!(result.ignored, 2);
    }
}
