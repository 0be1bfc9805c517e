//! Command: remove the links of installed packages.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{GlobalOpts, UnmanageOpts};
use crate::logging::Logger;
use crate::plan::UnmanageOptions;

/// Run the unmanage command.
///
/// # Errors
///
/// Returns an error if configuration loading fails, a package is not
/// installed, or execution fails.
pub fn run(
    global: &GlobalOpts,
    opts: &UnmanageOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let packages = if opts.all {
        let installed: Vec<String> = setup
            .client
            .list(ct)?
            .into_iter()
            .map(|p| p.name)
            .collect();
        if installed.is_empty() {
            log.info("no packages are installed");
            return Ok(());
        }
        installed
    } else {
        opts.packages.clone()
    };

    let options = UnmanageOptions {
        restore: opts.restore,
        cleanup: opts.cleanup,
    };
    let report = setup.client.unmanage(ct, &packages, options)?;
    super::print_report(&report, setup.format, "unmanage", log)
}
