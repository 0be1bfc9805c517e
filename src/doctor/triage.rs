//! Orphan triage: classify orphans and record what to do with each.
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, PathBuf};

use serde::{Deserialize, Serialize};

use super::orphans::Orphan;
use crate::manifest::Manifest;

/// Heuristic grouping of orphans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCategory {
    /// The link points nowhere.
    Broken,
    /// Points into the package directory but no package claims it.
    StaleManaged,
    /// Lives under `.config` or `.local`.
    AppConfig,
    /// Anything else.
    Other,
}

impl OrphanCategory {
    /// Category of `orphan`.
    #[must_use]
    pub fn of(orphan: &Orphan) -> Self {
        if !orphan.target_exists {
            return Self::Broken;
        }
        if orphan.points_into_package {
            return Self::StaleManaged;
        }
        match orphan.path.components().next() {
            Some(Component::Normal(first)) if first == ".config" || first == ".local" => {
                Self::AppConfig
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for OrphanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Broken => "broken",
            Self::StaleManaged => "stale managed",
            Self::AppConfig => "application config",
            Self::Other => "other",
        })
    }
}

/// What to do with one orphan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TriageDecision {
    /// Acknowledge this link.
    Ignore {
        /// Note stored with the acknowledgement.
        reason: String,
    },
    /// Acknowledge everything matching a glob.
    IgnorePattern {
        /// Glob relative to the target directory.
        pattern: String,
    },
    /// Record the link as part of a package.
    Adopt {
        /// Package that takes the link.
        package: String,
    },
    /// Leave it for now.
    Skip,
}

/// Outcome counts of a triage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TriageResult {
    /// Links acknowledged.
    pub ignored: usize,
    /// New ignore patterns.
    pub patterns_added: usize,
    /// Links claimed by a package.
    pub adopted: usize,
    /// Orphans left alone.
    pub skipped: usize,
    /// Per-link failures as `(path, message)`.
    pub errors: Vec<(PathBuf, String)>,
}

impl TriageResult {
    /// `true` when the manifest was changed.
    #[must_use]
    pub const fn changed_manifest(&self) -> bool {
        self.ignored > 0 || self.patterns_added > 0
    }
}

/// Orphans by category, each group sorted by path.
#[must_use]
pub fn group(orphans: &[Orphan]) -> BTreeMap<OrphanCategory, Vec<&Orphan>> {
    let mut groups = BTreeMap::<OrphanCategory, Vec<&Orphan>>::new();
    for orphan in orphans {
        groups.entry(OrphanCategory::of(orphan)).or_default().push(orphan);
    }
    for members in groups.values_mut() {
        members.sort_by(|a, b| a.path.cmp(&b.path));
    }
    groups
}

/// Ask `decide` about every orphan, group by group, and apply ignore and
/// pattern decisions to `manifest`.
///
/// Adopt decisions are returned as package name to target-relative paths;
/// the caller runs them and adds to [`TriageResult::adopted`].
pub fn triage<F>(
    orphans: &[Orphan],
    manifest: &mut Manifest,
    mut decide: F,
) -> (TriageResult, BTreeMap<String, Vec<PathBuf>>)
where
    F: FnMut(OrphanCategory, &Orphan) -> TriageDecision,
{
    let mut result = TriageResult::default();
    let mut adopt = BTreeMap::<String, Vec<PathBuf>>::new();

    for (category, members) in group(orphans) {
        tracing::debug!(%category, count = members.len(), "triaging orphans");
        for orphan in members {
            match decide(category, orphan) {
                TriageDecision::Ignore { reason } => {
                    manifest.ignore_link(&orphan.path, &orphan.contents, &reason);
                    result.ignored += 1;
                }
                TriageDecision::IgnorePattern { pattern } => {
                    if pattern.trim().is_empty() {
                        result
                            .errors
                            .push((orphan.path.clone(), "empty ignore pattern".to_string()));
                    } else if manifest.add_ignored_pattern(&pattern) {
                        result.patterns_added += 1;
                    }
                }
                TriageDecision::Adopt { package } => {
                    adopt.entry(package).or_default().push(orphan.path.clone());
                }
                TriageDecision::Skip => result.skipped += 1,
            }
        }
    }
    (result, adopt)
}
