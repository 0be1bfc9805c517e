//! `dot` command-line entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser as _;
use dot_cli::cancel::CancelToken;
use dot_cli::cli::{Cli, Command};
use dot_cli::commands;
use dot_cli::error::{DotError, EXIT_FAILURE};
use dot_cli::logging::{Logger, Verbosity, init_subscriber};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();
    let verbosity = Verbosity::from_flags(args.verbose, args.quiet);
    init_subscriber(verbosity, args.global.color.enabled(), args.command.name());
    let log = Arc::new(Logger::new(args.command.name()));

    let ct = CancelToken::new();
    let handler_ct = ct.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_ct.cancel()) {
        log.debug(&format!("cannot install Ctrl-C handler: {e}"));
    }

    match dispatch(&args, &log, &ct) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log.error(&format!("{e:#}"));
            let code = e.downcast_ref::<DotError>().map_or(EXIT_FAILURE, |dot| {
                if let Some(suggestion) = dot.suggestion() {
                    log.info(&suggestion);
                }
                dot.exit_code()
            });
            if let Some(path) = log.log_path() {
                log.debug(&format!("log written to {}", path.display()));
            }
            ExitCode::from(code)
        }
    }
}

fn dispatch(args: &Cli, log: &Arc<Logger>, ct: &CancelToken) -> anyhow::Result<u8> {
    let global = &args.global;
    match &args.command {
        Command::Manage(opts) => commands::manage::run(global, opts, log, ct)?,
        Command::Unmanage(opts) => commands::unmanage::run(global, opts, log, ct)?,
        Command::Remanage(opts) => commands::remanage::run(global, opts, log, ct)?,
        Command::Adopt(opts) => commands::adopt::run(global, opts, log, ct)?,
        Command::Status(opts) => commands::status::run(global, opts, log, ct)?,
        Command::List => commands::list::run(global, log, ct)?,
        Command::Doctor(opts) => return commands::doctor::run(global, opts, log, ct),
        Command::Config { action } => commands::config::run(global, *action, log)?,
        Command::Upgrade => commands::upgrade::run(global, log, ct)?,
        Command::Completions { shell } => commands::completions::run(*shell),
        Command::Version => commands::version::run(),
    }
    Ok(0)
}
