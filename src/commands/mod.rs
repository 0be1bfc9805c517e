//! Subcommand implementations and the setup they share.

pub mod adopt;
pub mod completions;
pub mod config;
pub mod doctor;
pub mod list;
pub mod manage;
pub mod output;
pub mod remanage;
pub mod status;
pub mod unmanage;
pub mod upgrade;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::client::{Client, OperationReport};
use crate::config::Config;
use crate::fs::OsFs;
use crate::logging::{Log, Logger};
use crate::paths::clean;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates configuration loading, flag overrides and client
/// construction so that each command does not have to repeat the
/// boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    /// Effective configuration after flags.
    pub config: Config,
    /// Client over the real filesystem.
    pub client: Client,
    /// Requested output format.
    pub format: OutputFormat,
}

impl CommandSetup {
    /// Load the configuration, apply global flags and then `adjust`, and
    /// build a client on the real filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or a
    /// configured path is invalid.
    pub fn init(
        global: &GlobalOpts,
        log: &Arc<Logger>,
        adjust: impl FnOnce(&mut Config),
    ) -> Result<Self> {
        let config = load_config(global, log, adjust)?;
        let client = Client::new(
            config.clone(),
            Arc::new(OsFs::new()),
            Arc::clone(log) as Arc<dyn Log>,
        )?;
        Ok(Self {
            config,
            client,
            format: global.format,
        })
    }
}

/// Resolve the effective configuration for this invocation.
///
/// # Errors
///
/// Returns an error if the configuration file is invalid or a path flag
/// cannot be made absolute.
pub fn load_config(
    global: &GlobalOpts,
    log: &Logger,
    adjust: impl FnOnce(&mut Config),
) -> Result<Config> {
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    let mut config = Config::load(global.config.as_deref(), &cwd)?;
    apply_global_flags(&mut config, global, &cwd);
    adjust(&mut config);
    let config = config.canonicalized();

    log.debug(&format!("package dir: {}", config.package_dir.display()));
    log.debug(&format!("target dir: {}", config.target_dir.display()));

    let warnings = config.validate();
    if !warnings.is_empty() {
        log.warn(&format!(
            "found {} configuration warning(s):",
            warnings.len()
        ));
        for warning in &warnings {
            log.warn(&format!("  {warning}"));
        }
    }
    Ok(config)
}

/// Command-line flags beat the environment and the file.
fn apply_global_flags(config: &mut Config, global: &GlobalOpts, cwd: &Path) {
    if let Some(dir) = &global.dir {
        config.package_dir = absolute(dir, cwd);
    }
    if let Some(target) = &global.target {
        let follows = config.manifest_dir == config.target_dir;
        config.target_dir = absolute(target, cwd);
        if follows {
            config.manifest_dir.clone_from(&config.target_dir);
        }
    }
    if global.dry_run {
        config.dry_run = true;
    }
}

fn absolute(path: &Path, cwd: &Path) -> PathBuf {
    clean(&cwd.join(path))
}

/// Print the outcome of a mutating operation in the requested format.
///
/// # Errors
///
/// Returns an error if JSON serialisation fails.
pub fn print_report(
    report: &OperationReport,
    format: OutputFormat,
    verb: &str,
    log: &Logger,
) -> Result<()> {
    for warning in &report.warnings {
        log.warn(warning);
    }
    match format {
        OutputFormat::Json => output::print_json(report),
        OutputFormat::Table => {
            let s = &report.summary;
            let mut table = output::Table::new(["OPERATION", "COUNT"]);
            for (label, n) in [
                ("link", s.link_create),
                ("unlink", s.link_delete),
                ("mkdir", s.dir_create),
                ("rmdir", s.dir_delete),
                ("remove tree", s.dir_remove_all),
                ("copy", s.dir_copy),
                ("move", s.file_move),
                ("backup", s.file_backup),
                ("delete", s.file_delete),
            ] {
                if n > 0 {
                    table.row([label.to_string(), n.to_string()]);
                }
            }
            output::print_text(&table.render(output::terminal_columns()));
            Ok(())
        }
        OutputFormat::Text => {
            let packages = report.packages.join(", ");
            if report.dry_run {
                log.info(&format!("would {verb} {packages}: {}", report.summary));
            } else {
                log.info(&format!(
                    "{verb} {packages}: {} ({} operation(s))",
                    report.summary, report.executed
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_paths() {
        let mut config = Config::new("/repo", "/home/u");
        let global = GlobalOpts {
            dir: Some(PathBuf::from("dots")),
            target: Some(PathBuf::from("/srv/home")),
            dry_run: true,
            ..GlobalOpts::default()
        };
        apply_global_flags(&mut config, &global, Path::new("/work"));
        assert_eq!(config.package_dir, PathBuf::from("/work/dots"));
        assert_eq!(config.target_dir, PathBuf::from("/srv/home"));
        assert_eq!(config.manifest_dir, PathBuf::from("/srv/home"));
        assert!(config.dry_run);
    }

    #[test]
    fn explicit_manifest_dir_survives_target_flag() {
        let mut config = Config::new("/repo", "/home/u");
        config.manifest_dir = PathBuf::from("/var/dot");
        let global = GlobalOpts {
            target: Some(PathBuf::from("/srv/home")),
            ..GlobalOpts::default()
        };
        apply_global_flags(&mut config, &global, Path::new("/work"));
        assert_eq!(config.manifest_dir, PathBuf::from("/var/dot"));
    }
}
