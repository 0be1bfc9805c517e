//! Command: link packages into the target directory.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{GlobalOpts, ManageOpts};
use crate::config::{Config, SymlinkMode};
use crate::logging::Logger;

/// Run the manage command.
///
/// # Errors
///
/// Returns an error if configuration loading fails, the plan has blocking
/// conflicts, or execution fails.
pub fn run(
    global: &GlobalOpts,
    opts: &ManageOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |config| apply(config, opts))?;
    let report = setup.client.manage(ct, &opts.packages)?;
    super::print_report(&report, setup.format, "manage", log)
}

fn apply(config: &mut Config, opts: &ManageOpts) {
    if opts.no_folding {
        config.folding = false;
    }
    if let Some(policy) = opts.on_conflict {
        config.conflict_policy = policy;
    }
    if opts.absolute {
        config.symlink_mode = SymlinkMode::Absolute;
    }
}
