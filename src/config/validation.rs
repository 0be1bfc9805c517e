//! Soft configuration checks.
//!
//! Hard errors (unparseable files, relative paths) surface while loading;
//! everything here is advisory and reported as [`ValidationWarning`]s.
use std::fmt;

use super::Config;

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration source (e.g., "config.toml", "environment").
    pub source: String,
    /// The specific setting that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    /// Warning about `item` from `source`.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.source, self.item, self.message)
    }
}

/// Trait for configuration validators.
pub trait ConfigValidator {
    /// Validate the configuration and return any warnings found.
    fn validate(&self, config: &Config) -> Vec<ValidationWarning>;

    /// Return a human-readable name for this validator.
    fn name(&self) -> &'static str;
}

/// Checks the directory settings against each other and the filesystem.
#[derive(Debug, Default)]
pub struct DirectoryValidator;

impl ConfigValidator for DirectoryValidator {
    fn validate(&self, config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if !config.package_dir.is_dir() {
            warnings.push(ValidationWarning::new(
                self.name(),
                "package_dir",
                format!(
                    "package directory {} does not exist",
                    config.package_dir.display()
                ),
            ));
        }

        if config.target_dir.starts_with(&config.package_dir) {
            warnings.push(ValidationWarning::new(
                self.name(),
                "target_dir",
                format!(
                    "target directory {} is inside the package directory {}",
                    config.target_dir.display(),
                    config.package_dir.display()
                ),
            ));
        }

        if config.backup_suffix.is_empty() && config.backup_dir.is_none() {
            warnings.push(ValidationWarning::new(
                self.name(),
                "backup_suffix",
                "empty backup suffix without a backup_dir; backups will use numbered names",
            ));
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "directories"
    }
}

/// Checks dotfile naming and ignore settings.
#[derive(Debug, Default)]
pub struct NamingValidator;

impl ConfigValidator for NamingValidator {
    fn validate(&self, config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.dotfile_translate && config.dotfile_prefix.is_empty() {
            warnings.push(ValidationWarning::new(
                self.name(),
                "dotfile_prefix",
                "dotfile translation is enabled but the prefix is empty",
            ));
        }

        for pattern in &config.ignore_patterns {
            if pattern.trim().is_empty() {
                warnings.push(ValidationWarning::new(
                    self.name(),
                    "ignore_patterns",
                    "blank ignore pattern has no effect",
                ));
            }
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "naming"
    }
}

/// Checks worker counts and limits.
#[derive(Debug, Default)]
pub struct ParallelismValidator;

impl ConfigValidator for ParallelismValidator {
    fn validate(&self, config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.max_parallel == 0 {
            warnings.push(ValidationWarning::new(
                self.name(),
                "max_parallel",
                "max_parallel is 0; operations will run on a single thread",
            ));
        }
        if config.scan.max_workers == 0 {
            warnings.push(ValidationWarning::new(
                self.name(),
                "scan.max_workers",
                "scan.max_workers is 0; the orphan scan will run on a single thread",
            ));
        }
        if config.scan.max_issues == 0 {
            warnings.push(ValidationWarning::new(
                self.name(),
                "scan.max_issues",
                "scan.max_issues is 0; orphans will never be reported",
            ));
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "parallelism"
    }
}

/// Run every validator over `config`.
#[must_use]
pub fn validate_all(config: &Config) -> Vec<ValidationWarning> {
    let validators: [&dyn ConfigValidator; 3] =
        [&DirectoryValidator, &NamingValidator, &ParallelismValidator];
    validators
        .iter()
        .flat_map(|v| v.validate(config))
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        let packages = dir.join("dotfiles");
        std::fs::create_dir_all(&packages).expect("create package dir");
        Config::new(packages, dir.join("home"))
    }

    #[test]
    fn defaults_are_clean() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config_in(tmp.path());
        assert!(validate_all(&config).is_empty());
    }

    #[test]
    fn missing_package_dir_warns() {
        let config = Config::new("/nonexistent/dotfiles", "/nonexistent/home");
        let warnings = DirectoryValidator.validate(&config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].item, "package_dir");
    }

    #[test]
    fn target_inside_package_dir_warns() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(tmp.path());
        config.target_dir = config.package_dir.join("home");
        let warnings = validate_all(&config);
        assert!(warnings.iter().any(|w| w.item == "target_dir"));
    }

    #[test]
    fn empty_prefix_warns_only_when_translating() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(tmp.path());
        config.dotfile_prefix = String::new();
        assert_eq!(NamingValidator.validate(&config).len(), 1);
        config.dotfile_translate = false;
        assert!(NamingValidator.validate(&config).is_empty());
    }

    #[test]
    fn zero_parallelism_warns() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config_in(tmp.path());
        config.max_parallel = 0;
        let warnings = validate_all(&config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings[0].to_string(),
            "parallelism: max_parallel: max_parallel is 0; operations will run on a single thread"
        );
    }
}
