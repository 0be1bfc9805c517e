//! Command: move existing files into a package and link them back.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::cancel::CancelToken;
use crate::cli::{AdoptOpts, GlobalOpts};
use crate::logging::Logger;
use crate::paths::clean;

/// Run the adopt command.
///
/// Paths on the command line are relative to the working directory, not
/// the target directory.
///
/// # Errors
///
/// Returns an error if configuration loading fails, a file cannot be
/// adopted, or execution fails.
pub fn run(
    global: &GlobalOpts,
    opts: &AdoptOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    let files = absolute_paths(&opts.paths, &cwd);
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let report = setup.client.adopt(ct, &opts.package, &files)?;
    super::print_report(&report, setup.format, "adopt", log)
}

fn absolute_paths(paths: &[PathBuf], cwd: &Path) -> Vec<PathBuf> {
    paths.iter().map(|p| clean(&cwd.join(p))).collect()
}
