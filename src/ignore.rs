//! Ignore rules applied while scanning packages and hunting orphans.
//!
//! Patterns are globs evaluated in order; the last rule that matches a path
//! decides, and a leading `!` turns a rule into an override that re-includes
//! the path. A pattern without `/` matches the final component at any depth,
//! a pattern with `/` is anchored at the root of the tree being walked. A
//! trailing `/` restricts the rule to directories.
use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::error::{DotError, Result};
use crate::paths::slash_path;

/// Name of the per-package ignore file.
pub const IGNORE_FILE: &str = ".dotignore";

/// Patterns that are always ignored unless defaults are disabled.
pub const DEFAULT_PATTERNS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    "CVS",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*.swo",
    "*~",
    ".#*",
    "#*#",
    ".dot-manifest.json",
    IGNORE_FILE,
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    negated: bool,
    anchored: bool,
    dir_only: bool,
}

impl Rule {
    fn parse(raw: &str) -> Result<Self> {
        let (negated, body) = raw
            .strip_prefix('!')
            .map_or((false, raw), |rest| (true, rest));
        let (dir_only, body) = body
            .strip_suffix('/')
            .map_or((false, body), |rest| (true, rest));
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Err(DotError::Config(format!("empty ignore pattern '{raw}'")));
        }
        let pattern = Pattern::new(body)
            .map_err(|e| DotError::Config(format!("invalid ignore pattern '{raw}': {e}")))?;
        Ok(Self {
            pattern,
            negated,
            anchored,
            dir_only,
        })
    }

    fn matches(&self, rel: &str, name: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            self.pattern.matches_with(rel, MATCH_OPTIONS)
        } else {
            self.pattern.matches_with(name, MATCH_OPTIONS)
        }
    }
}

/// An ordered list of ignore rules.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    rules: Vec<Rule>,
}

impl IgnoreSet {
    /// Build a set from `patterns`, optionally preceded by
    /// [`DEFAULT_PATTERNS`].
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for a malformed glob.
    pub fn new<S: AsRef<str>>(patterns: &[S], use_defaults: bool) -> Result<Self> {
        let mut set = Self::default();
        if use_defaults {
            for pattern in DEFAULT_PATTERNS {
                set.push(pattern)?;
            }
        }
        for pattern in patterns {
            set.push(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Parse the contents of an ignore file: one pattern per line, `#`
    /// starts a comment, blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for a malformed glob.
    pub fn parse(text: &str) -> Result<Vec<String>> {
        let mut patterns = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            Rule::parse(line)?;
            patterns.push(line.to_string());
        }
        Ok(patterns)
    }

    /// Append one pattern (lowest position wins last).
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for a malformed glob.
    pub fn push(&mut self, pattern: &str) -> Result<()> {
        self.rules.push(Rule::parse(pattern)?);
        Ok(())
    }

    /// A copy of this set with `patterns` appended.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for a malformed glob.
    pub fn extended<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Self> {
        let mut set = self.clone();
        for pattern in patterns {
            set.push(pattern.as_ref())?;
        }
        Ok(set)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` without rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Verdict of the last matching rule for `rel` alone, ignoring ancestors.
    fn decide(&self, rel: &Path, is_dir: bool) -> Option<bool> {
        let text = slash_path(rel);
        let name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(&text, &name, is_dir))
            .map(|rule| !rule.negated)
    }

    /// `true` when `rel` (relative to the walked root) is excluded. A path is
    /// excluded when it matches, or when any ancestor directory is excluded.
    #[must_use]
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let mut ancestors: Vec<&Path> = rel
            .ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .collect();
        ancestors.reverse();
        if ancestors.iter().any(|a| self.decide(a, true) == Some(true)) {
            return true;
        }
        self.decide(rel, is_dir).unwrap_or(false)
    }

    /// Verdict for an entry whose ancestors were already found to be
    /// included. Walkers that prune ignored directories use this to avoid
    /// re-checking every ancestor.
    #[must_use]
    pub fn is_entry_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        self.decide(rel, is_dir).unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn set(patterns: &[&str]) -> IgnoreSet {
        IgnoreSet::new(patterns, false).unwrap()
    }

    #[test]
    fn defaults_ignore_vcs_and_editor_files() {
        let s = IgnoreSet::new::<&str>(&[], true).unwrap();
        assert!(s.is_ignored(Path::new(".git"), true));
        assert!(s.is_ignored(Path::new(".git/config"), false));
        assert!(s.is_ignored(Path::new("dot-vimrc.swp"), false));
        assert!(s.is_ignored(Path::new("notes~"), false));
        assert!(s.is_ignored(Path::new(".dot-manifest.json"), false));
        assert!(!s.is_ignored(Path::new("dot-vimrc"), false));
    }

    #[test]
    fn unanchored_pattern_matches_any_depth() {
        let s = set(&["*.log"]);
        assert!(s.is_ignored(Path::new("a.log"), false));
        assert!(s.is_ignored(Path::new("deep/er/b.log"), false));
        assert!(!s.is_ignored(Path::new("deep/er/b.txt"), false));
    }

    #[test]
    fn anchored_pattern_matches_from_root() {
        let s = set(&["dot-config/cache"]);
        assert!(s.is_ignored(Path::new("dot-config/cache"), true));
        assert!(s.is_ignored(Path::new("dot-config/cache/x"), false));
        assert!(!s.is_ignored(Path::new("other/dot-config/cache"), true));
    }

    #[test]
    fn star_does_not_cross_separator() {
        let s = set(&["dot-config/*.tmp"]);
        assert!(s.is_ignored(Path::new("dot-config/a.tmp"), false));
        assert!(!s.is_ignored(Path::new("dot-config/sub/a.tmp"), false));
    }

    #[test]
    fn double_star_crosses_segments() {
        let s = set(&["dot-config/**/*.tmp"]);
        assert!(s.is_ignored(Path::new("dot-config/sub/deeper/a.tmp"), false));
    }

    #[test]
    fn last_match_wins_with_negation() {
        let s = set(&["*.conf", "!keep.conf"]);
        assert!(s.is_ignored(Path::new("drop.conf"), false));
        assert!(!s.is_ignored(Path::new("keep.conf"), false));

        let reversed = set(&["!keep.conf", "*.conf"]);
        assert!(reversed.is_ignored(Path::new("keep.conf"), false));
    }

    #[test]
    fn negation_cannot_reinclude_under_ignored_directory() {
        let s = set(&["build", "!build/keep"]);
        assert!(s.is_ignored(Path::new("build/keep"), false));
    }

    #[test]
    fn trailing_slash_is_directory_only() {
        let s = set(&["cache/"]);
        assert!(s.is_ignored(Path::new("cache"), true));
        assert!(!s.is_ignored(Path::new("cache"), false));
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        let text = "# editor junk\n\n*.bak\n  !important.bak  \n";
        let patterns = IgnoreSet::parse(text).unwrap();
        assert_eq!(patterns, vec!["*.bak", "!important.bak"]);
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let err = IgnoreSet::new(&["[unclosed"], false).unwrap_err();
        assert!(matches!(err, DotError::Config(_)));
    }
}
