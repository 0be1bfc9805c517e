//! Per-link health checks.
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::Severity;
use crate::cancel::CancelToken;
use crate::error::{DotError, Result};
use crate::fs::FileSystem;
use crate::paths::resolve_link;

/// Directories a managed link is checked against.
#[derive(Debug, Clone, Copy)]
pub struct Roots<'a> {
    /// Where links live.
    pub target_dir: &'a Path,
    /// Where packages live; a package's links must point beneath
    /// `package_dir/<package>`.
    pub package_dir: &'a Path,
}

/// Classification of one managed link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Points at the expected package file.
    Healthy,
    /// The link or the file it points to is gone.
    Broken,
    /// Not a symlink, or a symlink pointing outside its package.
    WrongTarget,
    /// The link could not be inspected.
    Permission,
}

/// Result of [`check_link`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkHealth {
    /// Classification.
    pub status: HealthStatus,
    /// How bad a non-healthy status is.
    pub severity: Severity,
    /// What was found.
    pub message: String,
    /// A command that would fix it.
    pub suggestion: Option<String>,
    /// Where the link points, when it could be read.
    pub resolved: Option<PathBuf>,
}

impl LinkHealth {
    fn new(status: HealthStatus, severity: Severity, message: String) -> Self {
        Self {
            status,
            severity,
            message,
            suggestion: None,
            resolved: None,
        }
    }

    fn suggest(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    /// `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Classify the link `relative` (to the target directory) recorded for
/// `package`.
///
/// # Errors
///
/// Only cancellation is an error; every filesystem failure becomes a
/// [`HealthStatus`].
pub fn check_link(
    fs: &dyn FileSystem,
    ct: &CancelToken,
    roots: &Roots<'_>,
    package: &str,
    relative: &Path,
) -> Result<LinkHealth> {
    ct.check()?;
    let link = roots.target_dir.join(relative);
    let shown = relative.display();
    let remanage = format!("Run 'dot remanage {package}' to restore link");

    let info = match fs.lstat(ct, &link) {
        Ok(info) => info,
        Err(e) if e.is_not_found() => {
            return Ok(LinkHealth::new(
                HealthStatus::Broken,
                Severity::Error,
                format!("link {shown} is missing"),
            )
            .suggest(remanage));
        }
        Err(e) => return unreadable(e, &shown.to_string()),
    };

    if !info.is_symlink() {
        return Ok(LinkHealth::new(
            HealthStatus::WrongTarget,
            Severity::Warning,
            format!("{shown} exists but is not a symlink"),
        )
        .suggest(format!(
            "Move {shown} aside and run 'dot remanage {package}', or 'dot adopt {package} {}'",
            link.display()
        )));
    }

    let contents = match fs.read_link(ct, &link) {
        Ok(contents) => contents,
        Err(e) => return unreadable(e, &shown.to_string()),
    };
    let resolved = resolve_link(&link, &contents);
    let package_root = roots.package_dir.join(package);

    if !resolved.starts_with(&package_root) {
        let mut health = LinkHealth::new(
            HealthStatus::WrongTarget,
            Severity::Warning,
            format!(
                "{shown} points to {} outside package '{package}'",
                resolved.display()
            ),
        )
        .suggest(remanage);
        health.resolved = Some(resolved);
        return Ok(health);
    }

    let mut health = match fs.stat(ct, &link) {
        Ok(_) => LinkHealth::new(
            HealthStatus::Healthy,
            Severity::Info,
            format!("{shown} -> {}", resolved.display()),
        ),
        Err(e) if e.is_not_found() => LinkHealth::new(
            HealthStatus::Broken,
            Severity::Error,
            format!(
                "{shown} points to missing {}",
                resolved.display()
            ),
        )
        .suggest(remanage),
        Err(e) => return unreadable(e, &shown.to_string()),
    };
    health.resolved = Some(resolved);
    Ok(health)
}

fn unreadable(e: DotError, shown: &str) -> Result<LinkHealth> {
    if e.is_cancelled() {
        return Err(e);
    }
    Ok(LinkHealth::new(
        HealthStatus::Permission,
        Severity::Error,
        format!("cannot inspect {shown}: {e}"),
    )
    .suggest(format!("Check permissions of {shown}")))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fs::{FsOp, MemoryFs};

    fn roots() -> Roots<'static> {
        Roots {
            target_dir: Path::new("/home/u"),
            package_dir: Path::new("/repo"),
        }
    }

    fn check(fs: &MemoryFs, rel: &str) -> LinkHealth {
        check_link(fs, &CancelToken::new(), &roots(), "vim", Path::new(rel)).unwrap()
    }

    #[test]
    fn healthy_relative_link() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "../../repo/vim/dot-vimrc");
        let health = check(&fs, ".vimrc");
        assert!(health.is_healthy());
        assert_eq!(health.severity, Severity::Info);
        assert_eq!(health.resolved, Some(PathBuf::from("/repo/vim/dot-vimrc")));
    }

    #[test]
    fn missing_link_is_broken() {
        let fs = MemoryFs::new().with_dir("/home/u");
        let health = check(&fs, ".vimrc");
        assert_eq!(health.status, HealthStatus::Broken);
        assert_eq!(health.severity, Severity::Error);
        assert_eq!(
            health.suggestion.as_deref(),
            Some("Run 'dot remanage vim' to restore link")
        );
    }

    #[test]
    fn dangling_link_is_broken() {
        let fs = MemoryFs::new().with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc");
        let health = check(&fs, ".vimrc");
        assert_eq!(health.status, HealthStatus::Broken);
        assert!(health.message.contains("missing /repo/vim/dot-vimrc"));
    }

    #[test]
    fn regular_file_is_wrong_target() {
        let fs = MemoryFs::new().with_file("/home/u/.vimrc", b"mine");
        let health = check(&fs, ".vimrc");
        assert_eq!(health.status, HealthStatus::WrongTarget);
        assert_eq!(health.severity, Severity::Warning);
    }

    #[test]
    fn link_into_other_package_is_wrong_target() {
        let fs = MemoryFs::new()
            .with_file("/repo/emacs/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "/repo/emacs/dot-vimrc");
        let health = check(&fs, ".vimrc");
        assert_eq!(health.status, HealthStatus::WrongTarget);
        assert!(health.message.contains("outside package 'vim'"));
    }

    #[test]
    fn unreadable_link_is_permission() {
        let fs = MemoryFs::new().with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc");
        fs.fail_on(FsOp::ReadLink, "/home/u/.vimrc");
        let health = check(&fs, ".vimrc");
        assert_eq!(health.status, HealthStatus::Permission);
        assert_eq!(health.severity, Severity::Error);
    }

    #[test]
    fn cancellation_is_an_error() {
        let fs = MemoryFs::new();
        let ct = CancelToken::new();
        ct.cancel();
        let err = check_link(&fs, &ct, &roots(), "vim", Path::new(".vimrc")).unwrap_err();
        assert!(err.is_cancelled());
    }
}
