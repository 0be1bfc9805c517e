//! Command: check links, scan for orphans and manage the doctor's ignores.
use std::sync::Arc;

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::cli::{DoctorAction, DoctorOpts, GlobalOpts, OutputFormat, TriageAction};
use crate::client::Client;
use crate::doctor::{DiagnosticReport, Overall, ScanConfig, Severity, TriageDecision};
use crate::logging::Logger;

use super::output::{self, Table};

/// Run the doctor command and return the process exit code.
///
/// A plain check exits with 0, 1 or 2 for a healthy tree, warnings or
/// errors. Sub-actions exit with 0 unless some link could not be handled.
///
/// # Errors
///
/// Returns an error if configuration loading fails, the manifest cannot be
/// read, or a sub-action fails outright.
pub fn run(
    global: &GlobalOpts,
    opts: &DoctorOpts,
    log: &Arc<Logger>,
    ct: &CancelToken,
) -> Result<u8> {
    let setup = super::CommandSetup::init(global, log, |_| {})?;
    let scan = scan_override(setup.config.scan, opts);
    match &opts.action {
        None => {
            let report = setup.client.doctor(ct, scan)?;
            print(&report, setup.format, log)?;
            Ok(report.overall.exit_code())
        }
        Some(action) => act(&setup.client, action, scan, log, ct),
    }
}

/// `None` when no scan flag was given, so the client uses its config.
fn scan_override(base: ScanConfig, opts: &DoctorOpts) -> Option<ScanConfig> {
    if opts.scan.is_none() && opts.max_depth.is_none() && opts.max_issues.is_none() {
        return None;
    }
    let mut scan = match opts.scan {
        Some(mode) if mode != base.mode => ScanConfig {
            max_workers: base.max_workers,
            ..ScanConfig::new(mode)
        },
        _ => base,
    };
    if let Some(depth) = opts.max_depth {
        scan.max_depth = depth;
    }
    if let Some(max) = opts.max_issues {
        scan.max_issues = max;
    }
    Some(scan)
}

fn act(
    client: &Client,
    action: &DoctorAction,
    scan: Option<ScanConfig>,
    log: &Logger,
    ct: &CancelToken,
) -> Result<u8> {
    match action {
        DoctorAction::Ignore { path, reason } => {
            client.ignore_link(ct, path, reason)?;
            log.info(&format!("ignoring {}", path.display()));
        }
        DoctorAction::Unignore { path } => {
            if client.unignore_link(ct, path)? {
                log.info(&format!("no longer ignoring {}", path.display()));
            } else {
                log.warn(&format!("{} was not ignored", path.display()));
            }
        }
        DoctorAction::IgnorePattern { pattern } => {
            if client.add_ignore_pattern(ct, pattern)? {
                log.info(&format!("added ignore pattern '{pattern}'"));
            } else {
                log.info(&format!("pattern '{pattern}' is already ignored"));
            }
        }
        DoctorAction::UnignorePattern { pattern } => {
            if client.remove_ignore_pattern(ct, pattern)? {
                log.info(&format!("removed ignore pattern '{pattern}'"));
            } else {
                log.warn(&format!("pattern '{pattern}' was not ignored"));
            }
        }
        DoctorAction::Triage { action, package } => {
            let action = *action;
            let package = package.clone().unwrap_or_default();
            let result = client.triage(ct, scan, |category, _| match action {
                TriageAction::Ignore => TriageDecision::Ignore {
                    reason: format!("triaged as {category}"),
                },
                TriageAction::Adopt => TriageDecision::Adopt {
                    package: package.clone(),
                },
                TriageAction::Skip => TriageDecision::Skip,
            })?;
            log.info(&format!(
                "triage: {} ignored, {} adopted, {} skipped",
                result.ignored, result.adopted, result.skipped
            ));
            for (path, message) in &result.errors {
                log.error(&format!("{}: {message}", path.display()));
            }
            if !result.errors.is_empty() {
                return Ok(Overall::Warnings.exit_code());
            }
        }
    }
    Ok(0)
}

fn print(report: &DiagnosticReport, format: OutputFormat, log: &Logger) -> Result<()> {
    match format {
        OutputFormat::Json => output::print_json(report),
        OutputFormat::Table => {
            output::print_text(&issue_table(report).render(output::terminal_columns()));
            Ok(())
        }
        OutputFormat::Text => {
            for issue in &report.issues {
                let msg = format!("{}: {}", issue.path.display(), issue.message);
                match issue.severity {
                    Severity::Error => log.error(&msg),
                    Severity::Warning => log.warn(&msg),
                    Severity::Info => log.info(&msg),
                }
                if let Some(suggestion) = &issue.suggestion {
                    log.info(&format!("  {suggestion}"));
                }
            }
            if report.truncated {
                log.warn("orphan scan stopped early; raise --max-issues to see more");
            }
            log.info(&summary(report));
            Ok(())
        }
    }
}

fn summary(report: &DiagnosticReport) -> String {
    let s = &report.stats;
    format!(
        "{}: {} managed link(s), {} healthy, {} broken, {} wrong target, {} orphaned, {} ignored",
        report.overall, s.managed_links, s.healthy, s.broken, s.wrong_target, s.orphaned, s.ignored
    )
}

fn issue_table(report: &DiagnosticReport) -> Table {
    let mut table = Table::new(["SEVERITY", "KIND", "PATH", "MESSAGE"]);
    for issue in &report.issues {
        table.row([
            issue.severity.to_string(),
            issue.kind.to_string(),
            issue.path.display().to_string(),
            issue.message.clone(),
        ]);
    }
    table
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::doctor::{ScanMode, Stats};

    fn opts() -> DoctorOpts {
        DoctorOpts {
            scan: None,
            max_depth: None,
            max_issues: None,
            action: None,
        }
    }

    // ------------------------------------------------------------------
    // scan_override
    // ------------------------------------------------------------------

    #[test]
    fn no_flags_means_config_scan() {
        assert_eq!(scan_override(ScanConfig::default(), &opts()), None);
    }

    #[test]
    fn mode_flag_resets_depth() {
        let o = DoctorOpts {
            scan: Some(ScanMode::Deep),
            ..opts()
        };
        let scan = scan_override(ScanConfig::default(), &o).unwrap();
        assert_eq!(scan.mode, ScanMode::Deep);
        assert_eq!(scan.max_depth, crate::doctor::DEEP_DEPTH);
    }

    #[test]
    fn limits_override_config() {
        let mut base = ScanConfig::new(ScanMode::Scoped);
        base.max_issues = 7;
        let o = DoctorOpts {
            max_depth: Some(1),
            ..opts()
        };
        let scan = scan_override(base, &o).unwrap();
        assert_eq!(scan.mode, ScanMode::Scoped);
        assert_eq!(scan.max_depth, 1);
        assert_eq!(scan.max_issues, 7);
    }

    // ------------------------------------------------------------------
    // rendering
    // ------------------------------------------------------------------

    #[test]
    fn summary_counts() {
        let report = DiagnosticReport {
            overall: Overall::Ok,
            stats: Stats {
                total_links: 2,
                managed_links: 2,
                healthy: 2,
                ..Stats::default()
            },
            issues: Vec::new(),
            orphans: Vec::new(),
            truncated: false,
        };
        insta::assert_snapshot!(summary(&report), @"ok: 2 managed link(s), 2 healthy, 0 broken, 0 wrong target, 0 orphaned, 0 ignored");
    }
}
