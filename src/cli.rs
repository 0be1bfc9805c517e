//! Command-line interface definitions.

use std::io::IsTerminal as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::ConflictPolicy;
use crate::doctor::ScanMode;

/// Top-level CLI entry point for the dotfile package manager.
#[derive(Parser, Debug)]
#[command(
    name = "dot",
    about = "Manage dotfile packages as symlinks into your home directory",
    version
)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Options shared by every subcommand
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Package directory (defaults to the configured one, then the current directory)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    /// Target directory (defaults to the configured one, then $HOME)
    #[arg(short, long, global = true)]
    pub target: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Preview changes without applying
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t)]
    pub format: OutputFormat,

    /// When to use colors
    #[arg(long, global = true, value_enum, default_value_t)]
    pub color: ColorChoice,
}

/// How results are rendered on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable log lines
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
    /// Aligned columns
    Table,
}

/// `--color` setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    /// Color when stdout is a terminal and `NO_COLOR` is unset
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

impl ColorChoice {
    /// Resolve to a yes/no answer for this process.
    #[must_use]
    pub fn enabled(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => {
                std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
            }
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Link packages into the target directory
    Manage(ManageOpts),
    /// Remove the links of installed packages
    Unmanage(UnmanageOpts),
    /// Re-link installed packages after their contents changed
    Remanage(RemanageOpts),
    /// Move existing files into a package and link them back
    Adopt(AdoptOpts),
    /// Show health and drift of installed packages
    Status(StatusOpts),
    /// List installed packages
    List,
    /// Check links and look for orphaned symlinks
    Doctor(DoctorOpts),
    /// Inspect or create the configuration file
    Config {
        /// What to do with the configuration
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Rewrite an older manifest in the current format
    Upgrade,
    /// Print a shell completion script
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
    /// Print version information
    Version,
}

/// Options for the `manage` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ManageOpts {
    /// Packages to link
    #[arg(required = true)]
    pub packages: Vec<String>,

    /// Link every file individually instead of whole directories
    #[arg(long)]
    pub no_folding: bool,

    /// What to do with existing files in the way
    #[arg(long, value_enum)]
    pub on_conflict: Option<ConflictPolicy>,

    /// Write absolute link targets
    #[arg(long)]
    pub absolute: bool,
}

/// Options for the `unmanage` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct UnmanageOpts {
    /// Packages to unlink
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub packages: Vec<String>,

    /// Unlink every installed package
    #[arg(long)]
    pub all: bool,

    /// Move adopted files back into the target directory
    #[arg(long)]
    pub restore: bool,

    /// Delete the manifest once no package is left
    #[arg(long)]
    pub cleanup: bool,
}

/// Options for the `remanage` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct RemanageOpts {
    /// Packages to re-link
    #[arg(required = true)]
    pub packages: Vec<String>,
}

/// Options for the `adopt` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct AdoptOpts {
    /// Package to move the files into
    pub package: String,

    /// Files or directories to adopt
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

/// Options for the `status` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct StatusOpts {
    /// Packages to show (all when omitted)
    pub packages: Vec<String>,
}

/// Options for the `doctor` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct DoctorOpts {
    /// Orphan scan mode
    #[arg(long, value_enum)]
    pub scan: Option<ScanMode>,

    /// Directory levels the orphan scan descends
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Stop after this many orphans
    #[arg(long)]
    pub max_issues: Option<usize>,

    /// Change the doctor's ignore state instead of reporting
    #[command(subcommand)]
    pub action: Option<DoctorAction>,
}

/// Doctor sub-actions that change the doctor's ignore state.
#[derive(Subcommand, Debug, Clone)]
pub enum DoctorAction {
    /// Stop reporting a symlink
    Ignore {
        /// Symlink path, absolute or relative to the target directory
        path: PathBuf,
        /// Note stored with the acknowledgement
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Report a previously ignored symlink again
    Unignore {
        /// Symlink path, absolute or relative to the target directory
        path: PathBuf,
    },
    /// Exclude paths matching a glob from orphan scans
    IgnorePattern {
        /// Glob relative to the target directory
        pattern: String,
    },
    /// Remove an orphan-scan exclusion
    UnignorePattern {
        /// Glob as it was added
        pattern: String,
    },
    /// Resolve every orphan in one pass
    Triage {
        /// What to do with each orphan
        #[arg(long, value_enum)]
        action: TriageAction,
        /// Package for `--action adopt`
        #[arg(long, required_if_eq("action", "adopt"))]
        package: Option<String>,
    },
}

/// Batch decision for `doctor triage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriageAction {
    /// Acknowledge every orphan
    Ignore,
    /// Leave every orphan as it is
    Skip,
    /// Claim orphans that point into the package
    Adopt,
}

/// Config sub-actions.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write a configuration file with the current settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Command {
    /// Name used for the log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Manage(_) => "manage",
            Self::Unmanage(_) => "unmanage",
            Self::Remanage(_) => "remanage",
            Self::Adopt(_) => "adopt",
            Self::Status(_) => "status",
            Self::List => "list",
            Self::Doctor(_) => "doctor",
            Self::Config { .. } => "config",
            Self::Upgrade => "upgrade",
            Self::Completions { .. } => "completions",
            Self::Version => "version",
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_names() {
        let names: Vec<String> = Cli::command()
            .get_subcommands()
            .map(|c| c.get_name().to_string())
            .collect();
        insta::assert_snapshot!(names.join(" "), @"manage unmanage remanage adopt status list doctor config upgrade completions version");
    }

    #[test]
    fn parse_manage_with_options() {
        let cli = Cli::parse_from([
            "dot",
            "--dir",
            "/repo",
            "manage",
            "vim",
            "zsh",
            "--no-folding",
            "--on-conflict",
            "backup",
            "--absolute",
        ]);
        assert_eq!(cli.global.dir, Some(PathBuf::from("/repo")));
        let Command::Manage(opts) = cli.command else {
            panic!("expected manage");
        };
        assert_eq!(opts.packages, vec!["vim", "zsh"]);
        assert!(opts.no_folding);
        assert_eq!(opts.on_conflict, Some(ConflictPolicy::Backup));
        assert!(opts.absolute);
    }

    #[test]
    fn manage_requires_a_package() {
        assert!(Cli::try_parse_from(["dot", "manage"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["dot", "list", "-n", "--format", "json", "-q"]);
        assert!(cli.global.dry_run);
        assert!(cli.quiet);
        assert_eq!(cli.global.format, OutputFormat::Json);
    }

    #[test]
    fn unmanage_all_excludes_packages() {
        let cli = Cli::parse_from(["dot", "unmanage", "--all", "--restore"]);
        let Command::Unmanage(opts) = cli.command else {
            panic!("expected unmanage");
        };
        assert!(opts.all && opts.restore && !opts.cleanup);
        assert!(Cli::try_parse_from(["dot", "unmanage"]).is_err());
        assert!(Cli::try_parse_from(["dot", "unmanage", "vim", "--all"]).is_err());
    }

    #[test]
    fn adopt_takes_package_then_paths() {
        let cli = Cli::parse_from(["dot", "adopt", "nvim", "~/.config/nvim"]);
        let Command::Adopt(opts) = cli.command else {
            panic!("expected adopt");
        };
        assert_eq!(opts.package, "nvim");
        assert_eq!(opts.paths, vec![PathBuf::from("~/.config/nvim")]);
    }

    #[test]
    fn doctor_scan_flags_and_actions() {
        let cli = Cli::parse_from(["dot", "doctor", "--scan", "deep", "--max-issues", "5"]);
        let Command::Doctor(opts) = cli.command else {
            panic!("expected doctor");
        };
        assert_eq!(opts.scan, Some(ScanMode::Deep));
        assert_eq!(opts.max_issues, Some(5));
        assert!(opts.action.is_none());

        let cli = Cli::parse_from(["dot", "doctor", "ignore", ".tool", "--reason", "vendor"]);
        let Command::Doctor(DoctorOpts {
            action: Some(DoctorAction::Ignore { path, reason }),
            ..
        }) = cli.command
        else {
            panic!("expected doctor ignore");
        };
        assert_eq!(path, PathBuf::from(".tool"));
        assert_eq!(reason, "vendor");
    }

    #[test]
    fn triage_adopt_requires_package() {
        assert!(Cli::try_parse_from(["dot", "doctor", "triage", "--action", "adopt"]).is_err());
        let cli = Cli::parse_from([
            "dot", "doctor", "triage", "--action", "adopt", "--package", "misc",
        ]);
        let Command::Doctor(DoctorOpts {
            action: Some(DoctorAction::Triage { action, package }),
            ..
        }) = cli.command
        else {
            panic!("expected doctor triage");
        };
        assert_eq!(action, TriageAction::Adopt);
        assert_eq!(package.as_deref(), Some("misc"));
    }

    #[test]
    fn config_and_completions() {
        let cli = Cli::parse_from(["dot", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
        let cli = Cli::parse_from(["dot", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Command::Completions {
                shell: clap_complete::Shell::Bash
            }
        ));
        assert_eq!(cli.command.name(), "completions");
    }

    #[test]
    fn color_choice_is_explicit_when_forced() {
        assert!(ColorChoice::Always.enabled());
        assert!(!ColorChoice::Never.enabled());
    }
}
