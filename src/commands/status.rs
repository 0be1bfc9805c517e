//! Command: show health and drift of installed packages.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{GlobalOpts, OutputFormat, StatusOpts};
use crate::client::{Drift, PackageStatus};
use crate::logging::Logger;

use super::output::{self, Table};

/// Run the status command.
///
/// # Errors
///
/// Returns an error if configuration loading fails, the manifest cannot be
/// read, or a named package is not installed.
pub fn run(
    global: &GlobalOpts,
    opts: &StatusOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let statuses = setup.client.status(ct, &opts.packages)?;
    match setup.format {
        OutputFormat::Json => output::print_json(&statuses)?,
        OutputFormat::Table => {
            output::print_text(&table(&statuses).render(output::terminal_columns()));
        }
        OutputFormat::Text => {
            if statuses.is_empty() {
                log.info("no packages are installed");
            }
            for status in &statuses {
                log.info(&line(status));
            }
        }
    }
    Ok(())
}

fn line(status: &PackageStatus) -> String {
    let mut text = format!(
        "{} ({}): {} link(s), {} healthy",
        status.name, status.source, status.link_count, status.healthy
    );
    if status.broken > 0 {
        text.push_str(&format!(", {} broken", status.broken));
    }
    if status.wrong_target > 0 {
        text.push_str(&format!(", {} wrong target", status.wrong_target));
    }
    if status.drift != Drift::Unchanged {
        text.push_str(&format!(", {}", status.drift));
    }
    text
}

fn table(statuses: &[PackageStatus]) -> Table {
    let mut table = Table::new(["PACKAGE", "SOURCE", "LINKS", "HEALTHY", "BROKEN", "DRIFT"]);
    for s in statuses {
        table.row([
            s.name.clone(),
            s.source.to_string(),
            s.link_count.to_string(),
            s.healthy.to_string(),
            (s.broken + s.wrong_target).to_string(),
            s.drift.to_string(),
        ]);
    }
    table
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::manifest::PackageSource;

    fn status(name: &str, broken: usize, drift: Drift) -> PackageStatus {
        PackageStatus {
            name: name.to_string(),
            source: PackageSource::Managed,
            installed_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            link_count: 3,
            healthy: 3 - broken,
            broken,
            wrong_target: 0,
            drift,
        }
    }

    #[test]
    fn healthy_line_is_short() {
        assert_eq!(
            line(&status("vim", 0, Drift::Unchanged)),
            "vim (managed): 3 link(s), 3 healthy"
        );
    }

    #[test]
    fn problems_are_listed() {
        assert_eq!(
            line(&status("zsh", 1, Drift::Changed)),
            "zsh (managed): 3 link(s), 2 healthy, 1 broken, changed"
        );
    }

    #[test]
    fn table_has_row_per_package() {
        let rendered = table(&[status("vim", 0, Drift::Unchanged), status("git", 2, Drift::Missing)])
            .render(120);
        insta::assert_snapshot!(rendered, @r"
        PACKAGE  SOURCE   LINKS  HEALTHY  BROKEN  DRIFT
        vim      managed  3      3        0       unchanged
        git      managed  3      1        2       missing
        ");
    }
}
