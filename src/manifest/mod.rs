//! The manifest: which package owns which link.
//!
//! A single JSON document stored in the manifest directory. It records every
//! managed package with its link set and backups, content hashes for drift
//! detection, optional repository metadata and the doctor's ignore state.

pub mod hash;
mod migrate;
mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub use migrate::{SUPPORTED_VERSIONS, migrate};
pub use store::{ManifestLock, ManifestStore};

/// Schema version written by this build.
pub const CURRENT_VERSION: &str = "2";

/// File name of the manifest inside the manifest directory.
pub const MANIFEST_FILENAME: &str = ".dot-manifest.json";

/// How a package came to be managed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSource {
    /// Linked from an existing package.
    #[default]
    Managed,
    /// Created by moving existing files into the package directory.
    Adopted,
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Managed => "managed",
            Self::Adopted => "adopted",
        })
    }
}

/// One managed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package name (same as its key).
    pub name: String,
    /// First successful manage or adopt.
    pub installed_at: DateTime<Utc>,
    /// Always `links.len()`.
    pub link_count: usize,
    /// Links relative to the target directory.
    pub links: BTreeSet<PathBuf>,
    /// Backups made when linking: link to backup path. Backups inside the
    /// target directory are stored relative to it, others absolute.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backups: BTreeMap<PathBuf, PathBuf>,
    /// How the package was installed.
    #[serde(default)]
    pub source: PackageSource,
    /// Target directory used when linking.
    pub target_dir: PathBuf,
    /// Package directory the links point into.
    pub package_dir: PathBuf,
}

impl PackageInfo {
    /// A package with no links yet.
    #[must_use]
    pub fn new(name: &str, source: PackageSource, package_dir: &Path, target_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            installed_at: Utc::now(),
            link_count: 0,
            links: BTreeSet::new(),
            backups: BTreeMap::new(),
            source,
            target_dir: target_dir.to_path_buf(),
            package_dir: package_dir.to_path_buf(),
        }
    }

    /// Replace the link set, keeping `link_count` in step.
    pub fn set_links(&mut self, links: BTreeSet<PathBuf>) {
        self.link_count = links.len();
        self.links = links;
    }
}

/// Where the package directory was cloned from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Remote URL.
    pub url: String,
    /// Checked-out branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// When the metadata was first recorded.
    pub cloned_at: DateTime<Utc>,
    /// Commit at the time of the last operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// A symlink the user told the doctor to stop reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredLink {
    /// Link contents at acknowledgement time.
    pub target: PathBuf,
    /// SHA-256 of `target`, so a retargeted link is reported again.
    pub target_hash: String,
    /// When the link was acknowledged.
    pub acknowledged_at: DateTime<Utc>,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Doctor state kept next to the package records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorState {
    /// Acknowledged links, keyed by path relative to the target directory.
    #[serde(default)]
    pub ignored_links: BTreeMap<PathBuf, IgnoredLink>,
    /// Globs excluded from orphan scans.
    #[serde(default)]
    pub ignored_patterns: Vec<String>,
}

impl DoctorState {
    /// `true` without any ignore entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignored_links.is_empty() && self.ignored_patterns.is_empty()
    }

    /// `true` when `path` is acknowledged and still points at the
    /// acknowledged target.
    #[must_use]
    pub fn is_link_ignored(&self, path: &Path, target: &Path) -> bool {
        self.ignored_links.get(path).is_some_and(|entry| {
            entry.target_hash == hash::hash_bytes(target.to_string_lossy().as_bytes())
        })
    }
}

/// The manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version.
    pub version: String,
    /// Last save; strictly increasing.
    pub updated_at: DateTime<Utc>,
    /// Managed packages by name.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageInfo>,
    /// Content hash per package.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Repository metadata, when the package directory is a git checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryInfo>,
    /// Doctor ignore state.
    #[serde(default, skip_serializing_if = "DoctorState::is_empty")]
    pub doctor: DoctorState,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            updated_at: Utc::now(),
            packages: BTreeMap::new(),
            hashes: BTreeMap::new(),
            repository: None,
            doctor: DoctorState::default(),
        }
    }
}

impl Manifest {
    /// Advance `updated_at` to now, or by one microsecond when the clock
    /// has not moved past the previous value.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + TimeDelta::microseconds(1)
        };
    }

    /// Package owning the link at `rel`, if any.
    #[must_use]
    pub fn owner_of(&self, rel: &Path) -> Option<&str> {
        self.packages
            .values()
            .find(|p| p.links.contains(rel))
            .map(|p| p.name.as_str())
    }

    /// Every recorded link with its owner.
    #[must_use]
    pub fn claims(&self) -> BTreeMap<PathBuf, String> {
        self.packages
            .values()
            .flat_map(|p| p.links.iter().map(|l| (l.clone(), p.name.clone())))
            .collect()
    }

    /// Total number of recorded links.
    #[must_use]
    pub fn link_total(&self) -> usize {
        self.packages.values().map(|p| p.links.len()).sum()
    }

    /// Drop a package and its hash.
    pub fn remove_package(&mut self, name: &str) -> Option<PackageInfo> {
        self.hashes.remove(name);
        self.packages.remove(name)
    }

    /// Describe every invariant violation; empty when consistent.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version != CURRENT_VERSION {
            problems.push(format!(
                "version {} is not the current version {CURRENT_VERSION}",
                self.version
            ));
        }
        let mut seen: BTreeMap<&Path, &str> = BTreeMap::new();
        for (key, pkg) in &self.packages {
            if key != &pkg.name {
                problems.push(format!("package key '{key}' holds package '{}'", pkg.name));
            }
            if pkg.link_count != pkg.links.len() {
                problems.push(format!(
                    "package '{key}' records {} links but link_count is {}",
                    pkg.links.len(),
                    pkg.link_count
                ));
            }
            for link in &pkg.links {
                if link.is_absolute() {
                    problems.push(format!("package '{key}' has absolute link {}", link.display()));
                }
                if let Some(other) = seen.insert(link.as_path(), key.as_str()) {
                    problems.push(format!(
                        "link {} is claimed by both '{other}' and '{key}'",
                        link.display()
                    ));
                }
            }
        }
        problems
    }

    /// Acknowledge the link at `path`.
    pub fn ignore_link(&mut self, path: &Path, target: &Path, reason: &str) {
        self.doctor.ignored_links.insert(
            path.to_path_buf(),
            IgnoredLink {
                target: target.to_path_buf(),
                target_hash: hash::hash_bytes(target.to_string_lossy().as_bytes()),
                acknowledged_at: Utc::now(),
                reason: reason.to_string(),
            },
        );
    }

    /// Forget an acknowledgement. Returns whether one existed.
    pub fn unignore_link(&mut self, path: &Path) -> bool {
        self.doctor.ignored_links.remove(path).is_some()
    }

    /// `true` when `path` is acknowledged and still points at the
    /// acknowledged target.
    #[must_use]
    pub fn is_link_ignored(&self, path: &Path, target: &Path) -> bool {
        self.doctor.is_link_ignored(path, target)
    }

    /// Append an orphan-scan ignore pattern. Returns `false` when it was
    /// already present.
    pub fn add_ignored_pattern(&mut self, pattern: &str) -> bool {
        if self.doctor.ignored_patterns.iter().any(|p| p == pattern) {
            return false;
        }
        self.doctor.ignored_patterns.push(pattern.to_string());
        true
    }

    /// Remove an orphan-scan ignore pattern. Returns whether it existed.
    pub fn remove_ignored_pattern(&mut self, pattern: &str) -> bool {
        let before = self.doctor.ignored_patterns.len();
        self.doctor.ignored_patterns.retain(|p| p != pattern);
        before != self.doctor.ignored_patterns.len()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn package(name: &str, links: &[&str]) -> PackageInfo {
        let mut info = PackageInfo::new(
            name,
            PackageSource::Managed,
            Path::new("/repo"),
            Path::new("/home/u"),
        );
        info.set_links(links.iter().map(PathBuf::from).collect());
        info
    }

    #[test]
    fn touch_is_strictly_increasing() {
        let mut m = Manifest::default();
        let mut last = m.updated_at;
        for _ in 0..100 {
            m.touch();
            assert!(m.updated_at > last);
            last = m.updated_at;
        }
    }

    #[test]
    fn touch_advances_past_a_future_timestamp() {
        let mut m = Manifest::default();
        let future = Utc::now() + TimeDelta::hours(1);
        m.updated_at = future;
        m.touch();
        assert_eq!(m.updated_at, future + TimeDelta::microseconds(1));
    }

    #[test]
    fn owner_lookup() {
        let mut m = Manifest::default();
        m.packages.insert("vim".into(), package("vim", &[".vimrc"]));
        assert_eq!(m.owner_of(Path::new(".vimrc")), Some("vim"));
        assert_eq!(m.owner_of(Path::new(".bashrc")), None);
        assert_eq!(m.link_total(), 1);
    }

    #[test]
    fn validate_reports_violations() {
        let mut m = Manifest::default();
        m.packages.insert("a".into(), package("a", &[".x"]));
        let mut b = package("b", &[".x", "/abs"]);
        b.link_count = 7;
        m.packages.insert("b".into(), b);
        let problems = m.validate();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(problems.iter().any(|p| p.contains("claimed by both")));
        assert!(problems.iter().any(|p| p.contains("link_count is 7")));
        assert!(problems.iter().any(|p| p.contains("absolute link")));
    }

    #[test]
    fn consistent_manifest_validates() {
        let mut m = Manifest::default();
        m.packages.insert("a".into(), package("a", &[".x", ".y"]));
        assert!(m.validate().is_empty());
    }

    #[test]
    fn ignored_patterns_are_deduplicated() {
        let mut m = Manifest::default();
        assert!(m.add_ignored_pattern(".cache/**"));
        assert!(!m.add_ignored_pattern(".cache/**"));
        assert_eq!(m.doctor.ignored_patterns.len(), 1);
        assert!(m.remove_ignored_pattern(".cache/**"));
        assert!(!m.remove_ignored_pattern(".cache/**"));
    }

    #[test]
    fn ignored_link_tracks_target() {
        let mut m = Manifest::default();
        let link = Path::new("/home/u/.old");
        m.ignore_link(link, Path::new("/gone"), "leftover");
        assert!(m.is_link_ignored(link, Path::new("/gone")));
        assert!(!m.is_link_ignored(link, Path::new("/elsewhere")));
        assert!(m.unignore_link(link));
        assert!(!m.is_link_ignored(link, Path::new("/gone")));
    }

    #[test]
    fn serialized_shape() {
        let mut m = Manifest::default();
        m.packages.insert("vim".into(), package("vim", &[".vimrc"]));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["version"], "2");
        assert_eq!(json["packages"]["vim"]["link_count"], 1);
        assert_eq!(json["packages"]["vim"]["source"], "managed");
        assert!(json.get("doctor").is_none());
        assert!(json.get("repository").is_none());
    }
}
