//! Command: rewrite an older manifest in the current format.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::GlobalOpts;
use crate::logging::Logger;

/// Run the upgrade command.
///
/// # Errors
///
/// Returns an error if configuration loading fails or the manifest cannot
/// be read, backed up or rewritten.
pub fn run(global: &GlobalOpts, log: &Arc<Logger>, ct: &CancelToken) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    match setup.client.upgrade_manifest(ct)? {
        Some(backup) => log.info(&format!(
            "upgraded {} (previous version saved as {})",
            setup.client.manifest_path().display(),
            backup.display()
        )),
        None => log.info("manifest is already current"),
    }
    Ok(())
}
