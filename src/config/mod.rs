//! Runtime configuration: TOML file, environment overrides and defaults.
//!
//! Precedence is CLI flags > environment > file > defaults. The CLI layer
//! applies its flags on top of the [`Config`] returned by [`Config::load`].
pub mod toml_loader;
pub mod validation;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::doctor::{ScanConfig, ScanMode};
use crate::dotfile::{DEFAULT_PREFIX, NameTranslator};
use crate::error::{DotError, Result};
use crate::ignore::IgnoreSet;
use crate::paths::{FilePath, PackagePath, TargetPath, clean};
use crate::plan::PlannerSettings;

pub use validation::ValidationWarning;

/// Environment variable naming an explicit config file.
pub const ENV_CONFIG: &str = "DOT_CONFIG";
/// Environment override for the package directory.
pub const ENV_PACKAGE_DIR: &str = "DOT_PACKAGE_DIR";
/// Environment override for the target directory.
pub const ENV_TARGET_DIR: &str = "DOT_TARGET_DIR";

/// Default seconds to wait for the manifest lock.
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

/// What to do when a target path is already occupied.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Report a conflict and refuse to execute.
    #[default]
    Fail,
    /// Move the occupant aside and link.
    Backup,
    /// Delete the occupant and link.
    Overwrite,
    /// Leave the occupant alone and skip the link.
    Skip,
}

impl ConflictPolicy {
    /// Lowercase name as used in config files and flags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Backup => "backup",
            Self::Overwrite => "overwrite",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = DotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "backup" => Ok(Self::Backup),
            "overwrite" => Ok(Self::Overwrite),
            "skip" => Ok(Self::Skip),
            _ => Err(DotError::Config(format!(
                "unknown conflict policy '{s}' (expected fail, backup, overwrite or skip)"
            ))),
        }
    }
}

/// How link contents are written.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkMode {
    /// Link contents relative to the link's directory.
    #[default]
    Relative,
    /// Absolute link contents.
    Absolute,
}

impl fmt::Display for SymlinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relative => "relative",
            Self::Absolute => "absolute",
        })
    }
}

impl FromStr for SymlinkMode {
    type Err = DotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relative" => Ok(Self::Relative),
            "absolute" => Ok(Self::Absolute),
            _ => Err(DotError::Config(format!(
                "unknown symlink mode '{s}' (expected relative or absolute)"
            ))),
        }
    }
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Directory holding the packages.
    pub package_dir: Option<String>,
    /// Directory the links are created in.
    pub target_dir: Option<String>,
    /// Directory holding the manifest; defaults to the target directory.
    pub manifest_dir: Option<String>,
    /// Roll back everything already done when an operation fails.
    pub atomic: Option<bool>,
    /// Upper bound on concurrently executing operations.
    pub max_parallel: Option<usize>,
    /// Relative or absolute link contents.
    pub symlink_mode: Option<SymlinkMode>,
    /// Link whole directories when a package owns them alone.
    pub folding: Option<bool>,
    /// What to do with files in the way.
    pub conflict_policy: Option<ConflictPolicy>,
    /// Appended to a displaced file's name.
    pub backup_suffix: Option<String>,
    /// When set, backups go here instead of next to the original.
    pub backup_dir: Option<String>,
    /// Prefix translated to a leading `.`.
    pub dotfile_prefix: Option<String>,
    /// Whether the prefix is translated at all.
    pub dotfile_translate: Option<bool>,
    /// Include the built-in ignore patterns.
    pub ignore_use_defaults: Option<bool>,
    /// Extra ignore globs applied to every package.
    pub ignore_patterns: Option<Vec<String>>,
    /// Seconds to wait for the manifest lock.
    pub lock_timeout_secs: Option<u64>,
    /// Orphan scan settings.
    pub scan: ScanFile,
}

/// The `[scan]` table of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanFile {
    /// Orphan scan mode.
    pub mode: Option<ScanMode>,
    /// Directory levels to descend.
    pub max_depth: Option<usize>,
    /// Worker threads for the scan.
    pub max_workers: Option<usize>,
    /// Stop after this many orphans.
    pub max_issues: Option<usize>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Directory holding the packages.
    pub package_dir: PathBuf,
    /// Directory the links are created in.
    pub target_dir: PathBuf,
    /// Directory holding the manifest; defaults to the target directory.
    pub manifest_dir: PathBuf,
    /// Plan and report without touching the filesystem.
    pub dry_run: bool,
    /// Roll back everything already done when an operation fails.
    pub atomic: bool,
    /// Upper bound on concurrently executing operations.
    pub max_parallel: usize,
    /// Relative or absolute link contents.
    pub symlink_mode: SymlinkMode,
    /// Link whole directories when a package owns them alone.
    pub folding: bool,
    /// What to do with files in the way.
    pub conflict_policy: ConflictPolicy,
    /// Appended to a displaced file's name.
    pub backup_suffix: String,
    /// When set, backups go here instead of next to the original.
    pub backup_dir: Option<PathBuf>,
    /// Prefix translated to a leading `.`.
    pub dotfile_prefix: String,
    /// Whether the prefix is translated at all.
    pub dotfile_translate: bool,
    /// Include the built-in ignore patterns.
    pub ignore_use_defaults: bool,
    /// Extra ignore globs applied to every package.
    pub ignore_patterns: Vec<String>,
    /// Seconds to wait for the manifest lock.
    pub lock_timeout_secs: u64,
    /// Orphan scan settings.
    pub scan: ScanConfig,
}

impl Config {
    /// Defaults for the given package and target directories. The manifest
    /// lives in the target directory.
    #[must_use]
    pub fn new(package_dir: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        let target_dir = target_dir.into();
        Self {
            package_dir: package_dir.into(),
            manifest_dir: target_dir.clone(),
            target_dir,
            dry_run: false,
            atomic: true,
            max_parallel: default_parallelism(),
            symlink_mode: SymlinkMode::default(),
            folding: true,
            conflict_policy: ConflictPolicy::default(),
            backup_suffix: ".bak".to_string(),
            backup_dir: None,
            dotfile_prefix: DEFAULT_PREFIX.to_string(),
            dotfile_translate: true,
            ignore_use_defaults: true,
            ignore_patterns: Vec::new(),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            scan: ScanConfig::default(),
        }
    }

    /// Load from the process environment and the config file it selects.
    ///
    /// `explicit` is the `--config` flag; `cwd` anchors the default package
    /// directory when none is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for unreadable files or invalid values,
    /// and [`DotError::InvalidPath`] for relative paths.
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let file = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(DotError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                toml_loader::load_config(path)?
            }
            None => match config_path(&env) {
                Some(path) => {
                    tracing::debug!(path = %path.display(), "loading config");
                    toml_loader::load_config(&path)?
                }
                None => ConfigFile::default(),
            },
        };
        Self::resolve(file, &env, cwd)
    }

    /// Merge a parsed file with environment overrides and defaults.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn resolve(
        file: ConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
        cwd: &Path,
    ) -> Result<Self> {
        let home = home_dir(env);

        let package_dir = match env(ENV_PACKAGE_DIR).or(file.package_dir) {
            Some(raw) => expand_path(&raw, home.as_deref())?,
            None => cwd.to_path_buf(),
        };
        let target_dir = match env(ENV_TARGET_DIR).or(file.target_dir) {
            Some(raw) => expand_path(&raw, home.as_deref())?,
            None => home.clone().ok_or_else(|| {
                DotError::Config(
                    "no target directory configured and HOME is not set".to_string(),
                )
            })?,
        };

        let mut config = Self::new(package_dir, target_dir);
        if let Some(raw) = file.manifest_dir {
            config.manifest_dir = expand_path(&raw, home.as_deref())?;
        }
        if let Some(raw) = file.backup_dir {
            config.backup_dir = Some(expand_path(&raw, home.as_deref())?);
        }
        if let Some(v) = file.atomic {
            config.atomic = v;
        }
        if let Some(v) = file.max_parallel {
            config.max_parallel = v;
        }
        if let Some(v) = file.symlink_mode {
            config.symlink_mode = v;
        }
        if let Some(v) = file.folding {
            config.folding = v;
        }
        if let Some(v) = file.conflict_policy {
            config.conflict_policy = v;
        }
        if let Some(v) = file.backup_suffix {
            config.backup_suffix = v;
        }
        if let Some(v) = file.dotfile_prefix {
            config.dotfile_prefix = v;
        }
        if let Some(v) = file.dotfile_translate {
            config.dotfile_translate = v;
        }
        if let Some(v) = file.ignore_use_defaults {
            config.ignore_use_defaults = v;
        }
        if let Some(v) = file.ignore_patterns {
            config.ignore_patterns = v;
        }
        if let Some(v) = file.lock_timeout_secs {
            config.lock_timeout_secs = v;
        }

        let mode = file.scan.mode.unwrap_or_default();
        let mut scan = ScanConfig::new(mode);
        if let Some(v) = file.scan.max_depth {
            scan.max_depth = v;
        }
        if let Some(v) = file.scan.max_workers {
            scan.max_workers = v;
        }
        if let Some(v) = file.scan.max_issues {
            scan.max_issues = v;
        }
        config.scan = scan;

        Ok(config)
    }

    /// Resolve symlinks in the package and target directories when they
    /// exist, so generated links point at real paths.
    #[must_use]
    pub fn canonicalized(mut self) -> Self {
        let manifest_follows_target = self.manifest_dir == self.target_dir;
        self.package_dir = canonical_or_clean(&self.package_dir);
        self.target_dir = canonical_or_clean(&self.target_dir);
        self.manifest_dir = if manifest_follows_target {
            self.target_dir.clone()
        } else {
            canonical_or_clean(&self.manifest_dir)
        };
        self
    }

    /// Soft checks; see [`validation`].
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationWarning> {
        validation::validate_all(self)
    }

    /// Name translator for package file names.
    #[must_use]
    pub fn translator(&self) -> NameTranslator {
        NameTranslator::new(self.dotfile_prefix.clone(), self.dotfile_translate)
    }

    /// Ignore patterns from the config, before any per-package `.dotignore`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid glob.
    pub fn ignore_set(&self) -> Result<IgnoreSet> {
        IgnoreSet::new(&self.ignore_patterns, self.ignore_use_defaults)
    }

    /// Settings for the planner, with paths validated.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::InvalidPath`] if a directory is not absolute.
    pub fn planner_settings(&self) -> Result<PlannerSettings> {
        let mut settings = PlannerSettings::new(
            PackagePath::new(&self.package_dir)?,
            TargetPath::new(&self.target_dir)?,
        );
        settings.folding = self.folding;
        settings.conflict_policy = self.conflict_policy;
        settings.backup_suffix.clone_from(&self.backup_suffix);
        settings.backup_dir = self.backup_dir.as_ref().map(FilePath::new).transpose()?;
        settings.translator = self.translator();
        Ok(settings)
    }

    /// [`Config::lock_timeout_secs`] as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Render as TOML for `dot config show`.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] if serialisation fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DotError::Config(format!("failed to render config: {e}")))
    }

    /// The on-disk form of these settings, for `dot config init`.
    ///
    /// `dry_run` is a per-invocation flag and is not written.
    #[must_use]
    pub fn to_file(&self) -> ConfigFile {
        let path = |p: &Path| Some(p.display().to_string());
        ConfigFile {
            package_dir: path(&self.package_dir),
            target_dir: path(&self.target_dir),
            manifest_dir: path(&self.manifest_dir),
            atomic: Some(self.atomic),
            max_parallel: Some(self.max_parallel),
            symlink_mode: Some(self.symlink_mode),
            folding: Some(self.folding),
            conflict_policy: Some(self.conflict_policy),
            backup_suffix: Some(self.backup_suffix.clone()),
            backup_dir: self.backup_dir.as_deref().and_then(path),
            dotfile_prefix: Some(self.dotfile_prefix.clone()),
            dotfile_translate: Some(self.dotfile_translate),
            ignore_use_defaults: Some(self.ignore_use_defaults),
            ignore_patterns: Some(self.ignore_patterns.clone()),
            lock_timeout_secs: Some(self.lock_timeout_secs),
            scan: ScanFile {
                mode: Some(self.scan.mode),
                max_depth: Some(self.scan.max_depth),
                max_workers: Some(self.scan.max_workers),
                max_issues: Some(self.scan.max_issues),
            },
        }
    }
}

/// Config file to read when `--config` is not given: `$DOT_CONFIG`, then
/// `$XDG_CONFIG_HOME/dot/config.toml`, then `~/.config/dot/config.toml`.
#[must_use]
pub fn config_path(env: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = env(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }
    if let Some(xdg) = env("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join("dot").join("config.toml"));
    }
    home_dir(env).map(|home| home.join(".config").join("dot").join("config.toml"))
}

/// Home directory from `HOME` (or `USERPROFILE` on Windows).
#[must_use]
pub fn home_dir(env: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    env("HOME").or_else(|| env("USERPROFILE")).map(PathBuf::from)
}

/// Expand a leading `~` and require the result to be absolute.
///
/// # Errors
///
/// Returns [`DotError::InvalidPath`] for relative paths or when `~` is used
/// without a known home directory.
pub fn expand_path(raw: &str, home: Option<&Path>) -> Result<PathBuf> {
    let expanded = if raw == "~" {
        home.map(Path::to_path_buf)
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home.map(|h| h.join(rest))
    } else {
        Some(PathBuf::from(raw))
    };
    let Some(path) = expanded else {
        return Err(DotError::InvalidPath {
            path: PathBuf::from(raw),
            reason: "cannot expand '~' without a home directory".to_string(),
        });
    };
    if !path.is_absolute() {
        return Err(DotError::InvalidPath {
            path,
            reason: "configured paths must be absolute or start with '~'".to_string(),
        });
    }
    Ok(clean(&path))
}

fn canonical_or_clean(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| clean(path))
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZero::get)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn parse(text: &str) -> ConfigFile {
        toml_loader::parse(text, Path::new("test.toml")).unwrap()
    }

    // ------------------------------------------------------------------
    // Defaults and precedence
    // ------------------------------------------------------------------

    #[test]
    fn defaults_from_home_and_cwd() {
        let env = env_of(&[("HOME", "/home/u")]);
        let config =
            Config::resolve(ConfigFile::default(), &env, Path::new("/home/u/dotfiles")).unwrap();
        assert_eq!(config.package_dir, PathBuf::from("/home/u/dotfiles"));
        assert_eq!(config.target_dir, PathBuf::from("/home/u"));
        assert_eq!(config.manifest_dir, PathBuf::from("/home/u"));
        assert!(config.atomic);
        assert!(config.folding);
        assert!(!config.dry_run);
        assert_eq!(config.conflict_policy, ConflictPolicy::Fail);
        assert_eq!(config.symlink_mode, SymlinkMode::Relative);
        assert_eq!(config.backup_suffix, ".bak");
        assert_eq!(config.dotfile_prefix, "dot-");
        assert_eq!(config.scan.mode, ScanMode::Scoped);
        assert_eq!(config.scan.max_depth, 3);
        assert!(config.max_parallel >= 1);
    }

    #[test]
    fn file_values_are_applied() {
        let file = parse(
            r#"
package_dir = "~/dotfiles"
target_dir = "/srv/home"
conflict_policy = "backup"
symlink_mode = "absolute"
folding = false
ignore_patterns = ["*.swp"]

[scan]
mode = "deep"
max_issues = 5
"#,
        );
        let env = env_of(&[("HOME", "/home/u")]);
        let config = Config::resolve(file, &env, Path::new("/")).unwrap();
        assert_eq!(config.package_dir, PathBuf::from("/home/u/dotfiles"));
        assert_eq!(config.target_dir, PathBuf::from("/srv/home"));
        assert_eq!(config.manifest_dir, PathBuf::from("/srv/home"));
        assert_eq!(config.conflict_policy, ConflictPolicy::Backup);
        assert_eq!(config.symlink_mode, SymlinkMode::Absolute);
        assert!(!config.folding);
        assert_eq!(config.ignore_patterns, vec!["*.swp".to_string()]);
        assert_eq!(config.scan.mode, ScanMode::Deep);
        assert_eq!(config.scan.max_depth, 10);
        assert_eq!(config.scan.max_issues, 5);
    }

    #[test]
    fn environment_beats_file() {
        let file = parse("package_dir = \"/from/file\"\ntarget_dir = \"/file/home\"\n");
        let env = env_of(&[
            ("HOME", "/home/u"),
            (ENV_PACKAGE_DIR, "/from/env"),
            (ENV_TARGET_DIR, "~/sandbox"),
        ]);
        let config = Config::resolve(file, &env, Path::new("/")).unwrap();
        assert_eq!(config.package_dir, PathBuf::from("/from/env"));
        assert_eq!(config.target_dir, PathBuf::from("/home/u/sandbox"));
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    #[test]
    fn relative_path_is_invalid() {
        let file = parse("package_dir = \"dotfiles\"\n");
        let env = env_of(&[("HOME", "/home/u")]);
        let err = Config::resolve(file, &env, Path::new("/")).unwrap_err();
        assert!(matches!(err, DotError::InvalidPath { .. }));
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID);
    }

    #[test]
    fn missing_home_without_target_is_config_error() {
        let env = env_of(&[]);
        let err = Config::resolve(ConfigFile::default(), &env, Path::new("/p")).unwrap_err();
        assert!(matches!(err, DotError::Config(_)));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = toml_loader::parse::<ConfigFile>("colour = true\n", Path::new("c.toml"))
            .unwrap_err();
        assert!(matches!(err, DotError::Config(_)));
    }

    #[test]
    fn bad_policy_is_rejected() {
        assert!(
            toml_loader::parse::<ConfigFile>("conflict_policy = \"ask\"\n", Path::new("c.toml"))
                .is_err()
        );
        assert!("ask".parse::<ConflictPolicy>().is_err());
        assert_eq!("BACKUP".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Backup);
    }

    // ------------------------------------------------------------------
    // Lookup and expansion
    // ------------------------------------------------------------------

    #[test]
    fn config_path_precedence() {
        let env = env_of(&[
            ("HOME", "/home/u"),
            ("XDG_CONFIG_HOME", "/xdg"),
            (ENV_CONFIG, "/explicit.toml"),
        ]);
        assert_eq!(config_path(&env), Some(PathBuf::from("/explicit.toml")));

        let env = env_of(&[("HOME", "/home/u"), ("XDG_CONFIG_HOME", "/xdg")]);
        assert_eq!(config_path(&env), Some(PathBuf::from("/xdg/dot/config.toml")));

        let env = env_of(&[("HOME", "/home/u")]);
        assert_eq!(
            config_path(&env),
            Some(PathBuf::from("/home/u/.config/dot/config.toml"))
        );
    }

    #[test]
    fn tilde_expansion() {
        let home = Path::new("/home/u");
        assert_eq!(expand_path("~", Some(home)).unwrap(), home);
        assert_eq!(
            expand_path("~/a/../b", Some(home)).unwrap(),
            PathBuf::from("/home/u/b")
        );
        assert!(expand_path("~/x", None).is_err());
    }

    #[test]
    fn planner_settings_carry_policy() {
        let mut config = Config::new("/repo", "/home/u");
        config.conflict_policy = ConflictPolicy::Skip;
        config.folding = false;
        config.backup_dir = Some(PathBuf::from("/home/u/.backups"));
        let settings = config.planner_settings().unwrap();
        assert_eq!(settings.conflict_policy, ConflictPolicy::Skip);
        assert!(!settings.folding);
        assert_eq!(
            settings.backup_dir.map(FilePath::into_path_buf),
            Some(PathBuf::from("/home/u/.backups"))
        );
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "target_dir = \"/t\"\nmax_parallel = 2\n").expect("write");
        let config = Config::load(Some(&path), Path::new("/p")).unwrap();
        assert_eq!(config.target_dir, PathBuf::from("/t"));
        assert_eq!(config.max_parallel, 2);
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/dot.toml")), Path::new("/p"))
            .unwrap_err();
        assert!(matches!(err, DotError::Config(_)));
    }

    #[test]
    fn written_file_loads_back_unchanged() {
        let mut config = Config::new("/repo", "/home/u");
        config.manifest_dir = PathBuf::from("/var/dot");
        config.ignore_patterns = vec!["*.swp".to_string()];
        config.scan = ScanConfig::new(ScanMode::Deep);
        let text = toml::to_string_pretty(&config.to_file()).unwrap();
        let env = env_of(&[]);
        let back = Config::resolve(parse(&text), &env, Path::new("/elsewhere")).unwrap();
        assert_eq!(back, config);
    }
}
