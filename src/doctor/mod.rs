//! Diagnostics: link health, orphan detection and triage.
//!
//! [`diagnose`] combines per-link health checks, manifest consistency checks
//! and an orphan scan into one [`DiagnosticReport`].

pub mod health;
pub mod orphans;
pub mod triage;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use health::{HealthStatus, LinkHealth, Roots, check_link};
pub use orphans::{Orphan, OrphanQuery, OrphanScan, scan_orphans};
pub use triage::{OrphanCategory, TriageDecision, TriageResult};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::manifest::{MANIFEST_FILENAME, Manifest};

/// Default scoped scan depth.
pub const SCOPED_DEPTH: usize = 3;

/// Default deep scan depth.
pub const DEEP_DEPTH: usize = 10;

/// Default cap on reported orphans.
pub const DEFAULT_MAX_ISSUES: usize = 100;

/// How far the orphan scan looks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// No orphan scan.
    Off,
    /// Only directories that hold managed links.
    #[default]
    Scoped,
    /// The whole target tree.
    Deep,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Scoped => "scoped",
            Self::Deep => "deep",
        })
    }
}

/// Orphan scan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanConfig {
    /// Which directories are scanned.
    pub mode: ScanMode,
    /// Directory levels below each scan root.
    pub max_depth: usize,
    /// Threads in the scan pool.
    pub max_workers: usize,
    /// Stop after this many orphans.
    pub max_issues: usize,
}

impl ScanConfig {
    /// Defaults for `mode`.
    #[must_use]
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            max_depth: if mode == ScanMode::Deep {
                DEEP_DEPTH
            } else {
                SCOPED_DEPTH
            },
            max_workers: std::thread::available_parallelism().map_or(1, std::num::NonZero::get),
            max_issues: DEFAULT_MAX_ISSUES,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(ScanMode::default())
    }
}

/// How bad an issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Worth a look; exit code 1.
    Warning,
    /// Needs fixing; exit code 2.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Verdict of a diagnostic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    /// Nothing found.
    Ok,
    /// Warnings but no errors.
    Warnings,
    /// At least one error.
    Errors,
}

impl Overall {
    /// Process exit code for `dot doctor`.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warnings => 1,
            Self::Errors => 2,
        }
    }
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Warnings => "warnings",
            Self::Errors => "errors",
        })
    }
}

/// Category of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Link or its destination is gone.
    BrokenLink,
    /// Not a link, or a link pointing elsewhere.
    WrongTarget,
    /// Could not be inspected.
    PermissionDenied,
    /// Symlink into the package tree that no package claims.
    Orphan,
    /// Manifest fields disagree with each other.
    ManifestInconsistent,
    /// Recorded package directory no longer exists.
    MissingPackage,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BrokenLink => "broken_link",
            Self::WrongTarget => "wrong_target",
            Self::PermissionDenied => "permission_denied",
            Self::Orphan => "orphan",
            Self::ManifestInconsistent => "manifest_inconsistent",
            Self::MissingPackage => "missing_package",
        })
    }
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    /// Category.
    pub kind: IssueKind,
    /// How bad it is.
    pub severity: Severity,
    /// Relative to the target directory for link issues.
    pub path: PathBuf,
    /// What was found.
    pub message: String,
    /// A command that would fix it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Link counts of a diagnostic run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Managed plus orphaned plus acknowledged links.
    pub total_links: usize,
    /// Links recorded in the manifest.
    pub managed_links: usize,
    /// Managed links that are fine.
    pub healthy: usize,
    /// Broken or unreadable.
    pub broken: usize,
    /// Managed links pointing elsewhere.
    pub wrong_target: usize,
    /// Unclaimed links found by the orphan scan.
    pub orphaned: usize,
    /// Acknowledged through doctor state.
    pub ignored: usize,
}

/// Result of [`diagnose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    /// Worst severity found.
    pub overall: Overall,
    /// Link counts.
    pub stats: Stats,
    /// Findings, errors first.
    pub issues: Vec<Issue>,
    /// Orphans in detail, for triage.
    pub orphans: Vec<Orphan>,
    /// The orphan scan hit its issue cap.
    pub truncated: bool,
}

impl DiagnosticReport {
    fn from_parts(stats: Stats, issues: Vec<Issue>, scan: OrphanScan) -> Self {
        let overall = match issues.iter().map(|i| i.severity).max() {
            None => Overall::Ok,
            Some(Severity::Error) => Overall::Errors,
            Some(_) => Overall::Warnings,
        };
        Self {
            overall,
            stats,
            issues,
            orphans: scan.orphans,
            truncated: scan.truncated,
        }
    }
}

/// Check every managed link, the manifest itself and the target tree.
///
/// # Errors
///
/// Fails on cancellation or an invalid ignore pattern in the doctor state.
pub fn diagnose(
    fs: &dyn FileSystem,
    ct: &CancelToken,
    roots: &Roots<'_>,
    manifest: &Manifest,
    scan: &ScanConfig,
) -> Result<DiagnosticReport> {
    let mut stats = Stats::default();
    let mut issues = Vec::new();

    for problem in manifest.validate() {
        issues.push(Issue {
            kind: IssueKind::ManifestInconsistent,
            severity: Severity::Error,
            path: PathBuf::from(MANIFEST_FILENAME),
            message: problem,
            suggestion: Some("Run 'dot upgrade', then 'dot remanage' the affected packages".to_string()),
        });
    }

    for (name, info) in &manifest.packages {
        let package_dir = non_empty_or(&info.package_dir, roots.package_dir);
        match fs.stat(ct, &package_dir.join(name)) {
            Ok(stat) if stat.is_dir() => {}
            Err(e) if !e.is_not_found() => return Err(e),
            _ => issues.push(Issue {
                kind: IssueKind::MissingPackage,
                severity: Severity::Error,
                path: PathBuf::from(name),
                message: format!(
                    "package directory {} is missing",
                    package_dir.join(name).display()
                ),
                suggestion: Some(format!("Run 'dot unmanage {name}' to drop its links")),
            }),
        }
    }

    let checks: Vec<(&str, &PathBuf, &Path, &Path)> = manifest
        .packages
        .iter()
        .flat_map(|(name, info)| {
            let package_dir = non_empty_or(&info.package_dir, roots.package_dir);
            let target_dir = non_empty_or(&info.target_dir, roots.target_dir);
            info.links
                .iter()
                .map(move |link| (name.as_str(), link, target_dir, package_dir))
        })
        .collect();
    let results: Vec<(&PathBuf, LinkHealth)> = checks
        .par_iter()
        .map(|(name, link, target_dir, package_dir)| {
            let roots = Roots {
                target_dir,
                package_dir,
            };
            check_link(fs, ct, &roots, name, link).map(|h| (*link, h))
        })
        .collect::<Result<_>>()?;

    for (link, health) in results {
        stats.managed_links += 1;
        let kind = match health.status {
            HealthStatus::Healthy => {
                stats.healthy += 1;
                continue;
            }
            HealthStatus::Broken => {
                stats.broken += 1;
                IssueKind::BrokenLink
            }
            HealthStatus::Permission => {
                stats.broken += 1;
                IssueKind::PermissionDenied
            }
            HealthStatus::WrongTarget => {
                stats.wrong_target += 1;
                IssueKind::WrongTarget
            }
        };
        issues.push(Issue {
            kind,
            severity: health.severity,
            path: link.clone(),
            message: health.message,
            suggestion: health.suggestion,
        });
    }

    let managed: BTreeSet<PathBuf> = manifest.claims().into_keys().collect();
    let orphan_scan = scan_orphans(
        fs,
        ct,
        &OrphanQuery {
            target_dir: roots.target_dir,
            package_dir: roots.package_dir,
            managed: &managed,
            doctor: &manifest.doctor,
            config: scan,
        },
    )?;
    for orphan in &orphan_scan.orphans {
        let shown = orphan.path.display();
        let message = if orphan.target_exists {
            format!("{shown} -> {} is not managed", orphan.contents.display())
        } else {
            format!("{shown} -> {} is not managed and dangling", orphan.contents.display())
        };
        issues.push(Issue {
            kind: IssueKind::Orphan,
            severity: Severity::Warning,
            path: orphan.path.clone(),
            message,
            suggestion: Some(format!(
                "Run 'dot doctor ignore {shown}' to acknowledge it, or 'dot doctor triage'"
            )),
        });
    }
    stats.orphaned = orphan_scan.orphans.len();
    stats.ignored = orphan_scan.ignored;
    stats.total_links = stats.managed_links + stats.orphaned + stats.ignored;

    tracing::debug!(
        issues = issues.len(),
        managed = stats.managed_links,
        orphans = stats.orphaned,
        "diagnosis complete"
    );
    Ok(DiagnosticReport::from_parts(stats, issues, orphan_scan))
}

fn non_empty_or<'a>(recorded: &'a Path, fallback: &'a Path) -> &'a Path {
    if recorded.as_os_str().is_empty() {
        fallback
    } else {
        recorded
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use crate::manifest::{PackageInfo, PackageSource};

    fn roots() -> Roots<'static> {
        Roots {
            target_dir: Path::new("/home/u"),
            package_dir: Path::new("/repo"),
        }
    }

    fn manifest_with(links: &[&str]) -> Manifest {
        let mut info = PackageInfo::new(
            "vim",
            PackageSource::Managed,
            Path::new("/repo"),
            Path::new("/home/u"),
        );
        info.set_links(links.iter().map(PathBuf::from).collect());
        let mut manifest = Manifest::default();
        manifest.packages.insert("vim".to_string(), info);
        manifest
    }

    fn run(fs: &MemoryFs, manifest: &Manifest) -> DiagnosticReport {
        diagnose(fs, &CancelToken::new(), &roots(), manifest, &ScanConfig::default()).unwrap()
    }

    #[test]
    fn scan_defaults_depend_on_mode() {
        assert_eq!(ScanConfig::new(ScanMode::Scoped).max_depth, SCOPED_DEPTH);
        assert_eq!(ScanConfig::new(ScanMode::Deep).max_depth, DEEP_DEPTH);
        assert!(ScanConfig::default().max_workers >= 1);
        assert_eq!(ScanConfig::default().mode, ScanMode::Scoped);
    }

    #[test]
    fn healthy_install_is_ok() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"set nu")
            .with_symlink("/home/u/.vimrc", "../../repo/vim/dot-vimrc");
        let report = run(&fs, &manifest_with(&[".vimrc"]));
        assert_eq!(report.overall, Overall::Ok);
        assert!(report.issues.is_empty());
        assert_eq!(report.stats.healthy, 1);
        assert_eq!(report.stats.total_links, 1);
        assert_eq!(report.overall.exit_code(), 0);
    }

    #[test]
    fn deleted_package_file_is_a_broken_link() {
        let fs = MemoryFs::new()
            .with_dir("/repo/vim")
            .with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc");
        let report = run(&fs, &manifest_with(&[".vimrc"]));
        assert_eq!(report.overall, Overall::Errors);
        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::BrokenLink);
        assert_eq!(issue.path, PathBuf::from(".vimrc"));
        assert_eq!(
            issue.suggestion.as_deref(),
            Some("Run 'dot remanage vim' to restore link")
        );
        assert_eq!(report.stats.broken, 1);
        assert_eq!(report.overall.exit_code(), 2);
    }

    #[test]
    fn orphans_are_warnings() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_file("/opt/thing", b"")
            .with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc")
            .with_symlink("/home/u/.thing", "/opt/thing");
        let report = run(&fs, &manifest_with(&[".vimrc"]));
        assert_eq!(report.overall, Overall::Warnings);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::Orphan);
        assert_eq!(report.stats.orphaned, 1);
        assert_eq!(report.stats.total_links, 2);
        assert_eq!(report.orphans[0].path, PathBuf::from(".thing"));
    }

    #[test]
    fn acknowledged_orphans_are_counted_not_reported() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_file("/opt/thing", b"")
            .with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc")
            .with_symlink("/home/u/.thing", "/opt/thing");
        let mut manifest = manifest_with(&[".vimrc"]);
        manifest.ignore_link(Path::new(".thing"), Path::new("/opt/thing"), "");
        let report = run(&fs, &manifest);
        assert_eq!(report.overall, Overall::Ok);
        assert_eq!(report.stats.ignored, 1);
    }

    #[test]
    fn missing_package_directory_is_reported() {
        let fs = MemoryFs::new().with_dir("/home/u");
        let report = run(&fs, &manifest_with(&[]));
        assert_eq!(report.overall, Overall::Errors);
        assert_eq!(report.issues[0].kind, IssueKind::MissingPackage);
        assert_eq!(
            report.issues[0].suggestion.as_deref(),
            Some("Run 'dot unmanage vim' to drop its links")
        );
    }

    #[test]
    fn inconsistent_manifest_is_reported() {
        let fs = MemoryFs::new().with_dir("/repo/vim").with_dir("/home/u");
        let mut manifest = manifest_with(&[]);
        manifest.packages.get_mut("vim").unwrap().link_count = 3;
        let report = run(&fs, &manifest);
        assert_eq!(report.issues[0].kind, IssueKind::ManifestInconsistent);
        assert_eq!(report.overall, Overall::Errors);
    }

    #[test]
    fn kinds_render_in_snake_case() {
        assert_eq!(IssueKind::BrokenLink.to_string(), "broken_link");
        assert_eq!(
            serde_json::to_string(&IssueKind::BrokenLink).unwrap(),
            "\"broken_link\""
        );
        assert!(Severity::Error > Severity::Warning);
    }
}
