//! Core logging types: console verbosity and the [`Log`] trait.

/// How much the console shows. The log file always receives debug events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    /// Informational output.
    #[default]
    Normal,
    /// Debug output as well.
    Verbose,
}

impl Verbosity {
    /// Resolve the `--quiet` and `--verbose` flags; quiet wins.
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Self::Quiet
        } else if verbose {
            Self::Verbose
        } else {
            Self::Normal
        }
    }
}

/// Abstraction over logging backends.
///
/// [`Logger`](super::logger::Logger) routes everything through `tracing`;
/// tests substitute recorders so engine code can log without knowing where
/// the output goes.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
}
