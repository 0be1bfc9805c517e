//! Git metadata of the package directory.
use std::path::Path;

use chrono::Utc;

use crate::manifest::RepositoryInfo;

/// What git knows about the checkout containing `package_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    /// URL of the `origin` remote.
    pub url: String,
    /// Checked-out branch; `None` when HEAD is detached.
    pub branch: Option<String>,
    /// HEAD commit id.
    pub commit: Option<String>,
}

/// Inspect the repository containing `package_dir`.
///
/// Returns `None` when it is not inside a git checkout or the checkout has
/// no `origin` remote.
#[must_use]
pub fn detect(package_dir: &Path) -> Option<Checkout> {
    let repo = match git2::Repository::discover(package_dir) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::debug!(dir = %package_dir.display(), "no git repository: {}", e.message());
            return None;
        }
    };
    let url = repo
        .find_remote("origin")
        .ok()
        .and_then(|remote| remote.url().map(str::to_string))?;
    let head = repo.head().ok();
    let branch = head
        .as_ref()
        .filter(|h| h.is_branch())
        .and_then(|h| h.shorthand().map(str::to_string));
    let commit = head
        .as_ref()
        .and_then(git2::Reference::target)
        .map(|oid| oid.to_string());
    Some(Checkout {
        url,
        branch,
        commit,
    })
}

/// Repository metadata to record after an operation.
///
/// Keeps `cloned_at` from `current` when the remote did not change; keeps
/// `current` unchanged when the checkout can no longer be inspected.
#[must_use]
pub fn refresh(current: Option<&RepositoryInfo>, package_dir: &Path) -> Option<RepositoryInfo> {
    let Some(checkout) = detect(package_dir) else {
        return current.cloned();
    };
    let cloned_at = current
        .filter(|info| info.url == checkout.url)
        .map_or_else(Utc::now, |info| info.cloned_at);
    Some(RepositoryInfo {
        url: checkout.url,
        branch: checkout.branch,
        cloned_at,
        commit: checkout.commit,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://example.com/me/dotfiles.git";

    fn commit_empty_tree(repo: &git2::Repository) -> git2::Oid {
        let sig = git2::Signature::now("tester", "tester@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap()
    }

    #[test]
    fn plain_directory_has_no_checkout() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path()), None);
    }

    #[test]
    fn checkout_without_origin_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        assert_eq!(detect(dir.path()), None);
    }

    #[test]
    fn unborn_branch_has_url_only() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("origin", URL).unwrap();
        let checkout = detect(dir.path()).unwrap();
        assert_eq!(checkout.url, URL);
        assert_eq!(checkout.commit, None);
    }

    #[test]
    fn subdirectory_finds_commit_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("origin", URL).unwrap();
        let oid = commit_empty_tree(&repo);
        let sub = dir.path().join("vim");
        std::fs::create_dir(&sub).unwrap();

        let checkout = detect(&sub).unwrap();
        assert_eq!(checkout.commit, Some(oid.to_string()));
        assert!(checkout.branch.is_some());
    }

    #[test]
    fn refresh_keeps_clone_time_for_same_remote() {
        let dir = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        repo.remote("origin", URL).unwrap();
        let then = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let current = RepositoryInfo {
            url: URL.to_string(),
            branch: None,
            cloned_at: then,
            commit: None,
        };
        let refreshed = refresh(Some(&current), dir.path()).unwrap();
        assert_eq!(refreshed.cloned_at, then);

        let moved = RepositoryInfo {
            url: "https://example.com/old.git".to_string(),
            ..current
        };
        assert_ne!(refresh(Some(&moved), dir.path()).unwrap().cloned_at, then);
    }

    #[test]
    fn refresh_without_checkout_keeps_current() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(refresh(None, dir.path()), None);
    }
}
