//! Dotfile package manager.
//!
//! Links the files of named packages from a package directory into a target
//! directory (usually `$HOME`), records ownership in a manifest, and checks
//! the result for broken or orphaned links.
//!
//! The public API is organised into layers:
//!
//! - **[`fs`]**, **[`paths`]**, **[`cancel`]**: the filesystem port, typed paths and cooperative cancellation
//! - **[`scanner`]**, **[`ignore`]**, **[`dotfile`]**: turn a package directory into an inventory
//! - **[`plan`]**: compute the operations a request needs, with conflicts
//! - **[`executor`]**: run a plan level by level with rollback
//! - **[`manifest`]**: the persisted ownership record and its lock
//! - **[`doctor`]**: health checks, orphan scans and triage
//! - **[`client`]**: the facade tying it together
//! - **[`commands`]**: top-level subcommand orchestration
#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod cancel;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod dotfile;
pub mod error;
pub mod executor;
pub mod fs;
pub mod ignore;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod plan;
pub mod repository;
pub mod scanner;

pub use cancel::CancelToken;
pub use client::{Client, Metrics, NoopMetrics, OperationReport};
pub use config::Config;
pub use error::{DotError, Result};
