//! Command: list installed packages.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::client::PackageSummary;
use crate::logging::Logger;

use super::output::{self, Table};

/// Run the list command.
///
/// # Errors
///
/// Returns an error if configuration loading fails or the manifest cannot
/// be read.
pub fn run(global: &GlobalOpts, log: &Arc<Logger>, ct: &CancelToken) -> Result<()> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let packages = setup.client.list(ct)?;
    match setup.format {
        OutputFormat::Json => output::print_json(&packages)?,
        OutputFormat::Table => {
            output::print_text(&table(&packages).render(output::terminal_columns()));
        }
        OutputFormat::Text => {
            if packages.is_empty() {
                log.info("no packages are installed");
            }
            for p in &packages {
                log.info(&format!(
                    "{} ({}, {} link(s), since {})",
                    p.name,
                    p.source,
                    p.link_count,
                    p.installed_at.format("%Y-%m-%d")
                ));
            }
        }
    }
    Ok(())
}

fn table(packages: &[PackageSummary]) -> Table {
    let mut table = Table::new(["PACKAGE", "SOURCE", "LINKS", "INSTALLED"]);
    for p in packages {
        table.row([
            p.name.clone(),
            p.source.to_string(),
            p.link_count.to_string(),
            p.installed_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::manifest::PackageSource;

    #[test]
    fn table_formats_dates() {
        let packages = [PackageSummary {
            name: "nvim".to_string(),
            source: PackageSource::Adopted,
            link_count: 1,
            installed_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        }];
        insta::assert_snapshot!(table(&packages).render(80), @r"
        PACKAGE  SOURCE   LINKS  INSTALLED
        nvim     adopted  1      1970-01-01 00:00
        ");
    }
}
