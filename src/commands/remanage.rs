//! Command: re-link installed packages.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{GlobalOpts, RemanageOpts};
use crate::logging::Logger;

/// Run the remanage command.
///
/// # Errors
///
/// Returns an error if configuration loading fails, a package is not
/// installed, or execution fails.
pub fn run(
    global: &GlobalOpts,
    opts: &RemanageOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let report = setup.client.remanage(ct, &opts.packages)?;
    super::print_report(&report, setup.format, "remanage", log)
}
