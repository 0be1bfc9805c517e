//! Command: inspect or create the configuration file.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use crate::cli::{ConfigAction, GlobalOpts, OutputFormat};
use crate::config::{self, Config};
use crate::logging::Logger;

use super::output;

/// Run the config command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, no config path
/// can be determined, or `init` finds an existing file without `--force`.
pub fn run(global: &GlobalOpts, action: ConfigAction, log: &Arc<Logger>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = super::load_config(global, log, |_| {})?;
            match global.format {
                OutputFormat::Json => output::print_json(&config)?,
                OutputFormat::Text | OutputFormat::Table => output::print_text(&config.to_toml()?),
            }
        }
        ConfigAction::Path => {
            output::print_text(&format!("{}\n", file_path(global)?.display()));
        }
        ConfigAction::Init { force } => {
            let config = super::load_config(global, log, |_| {})?;
            let path = file_path(global)?;
            init(&path, &config, force)?;
            log.info(&format!("wrote {}", path.display()));
        }
    }
    Ok(())
}

fn file_path(global: &GlobalOpts) -> Result<PathBuf> {
    if let Some(path) = &global.config {
        return Ok(path.clone());
    }
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    config::config_path(&env).context("cannot determine the config file path; set HOME or DOT_CONFIG")
}

fn init(path: &Path, config: &Config, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    let text = toml::to_string_pretty(&config.to_file())
        .context("failed to render configuration")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dot").join("config.toml");
        let config = Config::new("/repo", "/home/u");
        init(&path, &config, false).unwrap();
        let loaded = Config::load(Some(&path), Path::new("/elsewhere")).unwrap();
        assert_eq!(loaded.package_dir, PathBuf::from("/repo"));
        assert_eq!(loaded.target_dir, PathBuf::from("/home/u"));
    }

    #[test]
    fn init_refuses_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "folding = false\n").unwrap();
        let config = Config::new("/repo", "/home/u");
        let err = init(&path, &config, false).unwrap_err();
        assert!(err.to_string().contains("--force"), "{err}");
        init(&path, &config, true).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("package_dir = \"/repo\""), "{text}");
    }

    #[test]
    fn explicit_flag_wins() {
        let global = GlobalOpts {
            config: Some(PathBuf::from("/etc/dot.toml")),
            ..GlobalOpts::default()
        };
        assert_eq!(file_path(&global).unwrap(), PathBuf::from("/etc/dot.toml"));
    }
}
