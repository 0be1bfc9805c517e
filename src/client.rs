//! The engine's public entry point.
//!
//! A [`Client`] owns the configuration and the collaborators every operation
//! needs. Mutating operations are serialised by an in-process mutex and the
//! manifest lock file, load the manifest once and save it once.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::doctor::{
    self, DiagnosticReport, HealthStatus, Orphan, OrphanCategory, OrphanQuery, Roots, ScanConfig,
    TriageDecision, TriageResult,
};
use crate::error::{DotError, Result};
use crate::executor::{ExecOptions, Executor};
use crate::fs::FileSystem;
use crate::ignore::IgnoreSet;
use crate::logging::Log;
use crate::manifest::{
    Manifest, ManifestLock, ManifestStore, PackageInfo, PackageSource, hash::package_hash,
};
use crate::paths::{clean, relative_to};
use crate::plan::{Plan, PlanSummary, Planner, PlannerSettings, UnmanageOptions};
use crate::repository;
use crate::scanner::{Inventory, Scanner, validate_package_name};

/// Receives counters and timings from the client.
#[cfg_attr(test, mockall::automock)]
pub trait Metrics: Send + Sync {
    /// Add `value` to the counter `name`.
    fn counter(&self, name: &str, value: usize);
    /// Record how long the operation `name` took.
    fn timing(&self, name: &str, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &str, _value: usize) {}
    fn timing(&self, _name: &str, _elapsed: Duration) {}
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    /// Packages the operation was about.
    pub packages: Vec<String>,
    /// Operation counts of the plan.
    pub summary: PlanSummary,
    /// Operations actually performed (0 on a dry run).
    pub executed: usize,
    /// `true` when nothing was changed.
    pub dry_run: bool,
    /// Non-blocking notes from planning.
    pub warnings: Vec<String>,
}

/// Whether a package changed since it was last linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Drift {
    /// Same hash as when last linked.
    Unchanged,
    /// Files were added, removed or resized.
    Changed,
    /// No hash was recorded.
    Unknown,
    /// The package directory is gone.
    Missing,
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Unknown => "unknown",
            Self::Missing => "missing",
        })
    }
}

/// Per-package state reported by [`Client::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageStatus {
    /// Package name.
    pub name: String,
    /// How the package was installed.
    pub source: PackageSource,
    /// First successful manage or adopt.
    pub installed_at: DateTime<Utc>,
    /// Links recorded in the manifest.
    pub link_count: usize,
    /// Links pointing where they should.
    pub healthy: usize,
    /// Broken or unreadable links.
    pub broken: usize,
    /// Links pointing somewhere else.
    pub wrong_target: usize,
    /// Package content compared to the recorded hash.
    pub drift: Drift,
}

/// One line of [`Client::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    /// Package name.
    pub name: String,
    /// How the package was installed.
    pub source: PackageSource,
    /// Links recorded in the manifest.
    pub link_count: usize,
    /// First successful manage or adopt.
    pub installed_at: DateTime<Utc>,
}

/// Orchestrates scanning, planning, execution and the manifest.
pub struct Client {
    config: Config,
    fs: Arc<dyn FileSystem>,
    log: Arc<dyn Log>,
    metrics: Arc<dyn Metrics>,
    store: ManifestStore,
    settings: PlannerSettings,
    ignore: IgnoreSet,
    serial: Mutex<()>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("fs", &self.fs)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::InvalidPath`] for relative directories and
    /// [`DotError::Config`] for invalid ignore patterns.
    pub fn new(config: Config, fs: Arc<dyn FileSystem>, log: Arc<dyn Log>) -> Result<Self> {
        let settings = config.planner_settings()?;
        let ignore = config.ignore_set()?;
        let store = ManifestStore::new(Arc::clone(&fs), &config.manifest_dir);
        Ok(Self {
            config,
            fs,
            log,
            metrics: Arc::new(NoopMetrics),
            store,
            settings,
            ignore,
            serial: Mutex::new(()),
        })
    }

    /// Report counters to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Manifest file path.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        self.store.path()
    }

    // ------------------------------------------------------------------
    // Package operations
    // ------------------------------------------------------------------

    /// Compute the plan for managing `packages` without executing it.
    ///
    /// # Errors
    ///
    /// Fails when a package is missing, the manifest cannot be read, or on
    /// cancellation.
    pub fn plan_manage<S: AsRef<str> + Sync>(
        &self,
        ct: &CancelToken,
        packages: &[S],
    ) -> Result<Plan> {
        let manifest = self.store.load_or_default(ct)?;
        let inventories = self.scan(ct, packages)?;
        Planner::new(self.fs.as_ref(), &self.settings).plan_manage(ct, &inventories, &manifest)
    }

    /// Link `packages` into the target directory.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Conflict`] when the plan is blocked, plus scan,
    /// execution and manifest failures.
    pub fn manage<S: AsRef<str> + Sync>(
        &self,
        ct: &CancelToken,
        packages: &[S],
    ) -> Result<OperationReport> {
        let names = names(packages);
        let _span = tracing::info_span!("manage", packages = ?names).entered();
        let _serial = self.serialise();
        let _lock = self.lock(ct)?;
        let started = Instant::now();

        let manifest = self.store.load_or_default(ct)?;
        let mut warnings = Vec::new();
        let inventories: Vec<Inventory> = self
            .scan(ct, packages)?
            .into_iter()
            .filter(|inv| {
                if inv.is_empty() {
                    warnings.push(format!("package '{}' has nothing to link", inv.package));
                }
                !inv.is_empty()
            })
            .collect();
        if inventories.is_empty() {
            return Ok(OperationReport {
                packages: names,
                dry_run: self.config.dry_run,
                warnings,
                ..OperationReport::default()
            });
        }

        let plan =
            Planner::new(self.fs.as_ref(), &self.settings).plan_manage(ct, &inventories, &manifest)?;
        let mut report = self.run(ct, "manage", names, &plan, manifest)?;
        warnings.append(&mut report.warnings);
        report.warnings = warnings;
        self.metrics.timing("manage", started.elapsed());
        Ok(report)
    }

    /// Remove the links of installed `packages`.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::PackageNotFound`] for a package the manifest does
    /// not record, plus execution and manifest failures.
    pub fn unmanage<S: AsRef<str>>(
        &self,
        ct: &CancelToken,
        packages: &[S],
        options: UnmanageOptions,
    ) -> Result<OperationReport> {
        let names = names(packages);
        let _span = tracing::info_span!("unmanage", packages = ?names).entered();
        let _serial = self.serialise();
        let _lock = self.lock(ct)?;
        let started = Instant::now();

        let manifest = self.store.load_or_default(ct)?;
        let plan = Planner::new(self.fs.as_ref(), &self.settings)
            .plan_unmanage(ct, packages, &manifest, options)?;
        let report = self.run(ct, "unmanage", names, &plan, manifest)?;

        if options.cleanup && !report.dry_run {
            let remaining = self.store.load_or_default(ct)?;
            if remaining.packages.is_empty() {
                self.store.remove(ct)?;
                tracing::info!(path = %self.store.path().display(), "removed empty manifest");
            }
        }
        self.metrics.timing("unmanage", started.elapsed());
        Ok(report)
    }

    /// Bring installed `packages` in line with their current contents.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::PackageNotFound`] for a package that is not
    /// installed or whose directory is gone, plus execution and manifest
    /// failures.
    pub fn remanage<S: AsRef<str> + Sync>(
        &self,
        ct: &CancelToken,
        packages: &[S],
    ) -> Result<OperationReport> {
        let names = names(packages);
        let _span = tracing::info_span!("remanage", packages = ?names).entered();
        let _serial = self.serialise();
        let _lock = self.lock(ct)?;
        let started = Instant::now();

        let manifest = self.store.load_or_default(ct)?;
        if let Some(missing) = names.iter().find(|n| !manifest.packages.contains_key(*n)) {
            return Err(DotError::PackageNotFound(missing.clone()));
        }
        let inventories = self.scan(ct, packages)?;
        let plan = Planner::new(self.fs.as_ref(), &self.settings)
            .plan_remanage(ct, &inventories, &manifest)?;
        let report = self.run(ct, "remanage", names, &plan, manifest)?;
        self.metrics.timing("remanage", started.elapsed());
        Ok(report)
    }

    /// Move `files` into `package` and link them back.
    ///
    /// Relative paths are taken relative to the target directory.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Conflict`] for files that cannot be adopted, plus
    /// execution and manifest failures.
    pub fn adopt(
        &self,
        ct: &CancelToken,
        package: &str,
        files: &[PathBuf],
    ) -> Result<OperationReport> {
        let _span = tracing::info_span!("adopt", package, files = files.len()).entered();
        let _serial = self.serialise();
        let _lock = self.lock(ct)?;
        let started = Instant::now();

        let files: Vec<PathBuf> = files
            .iter()
            .map(|f| clean(&self.config.target_dir.join(f)))
            .collect();
        let manifest = self.store.load_or_default(ct)?;
        let plan = Planner::new(self.fs.as_ref(), &self.settings)
            .plan_adopt(ct, &files, package, &manifest)?;
        let report = self.run(ct, "adopt", vec![package.to_string()], &plan, manifest)?;
        self.metrics.timing("adopt", started.elapsed());
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Health, drift and counts of installed packages; all of them when
    /// `packages` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::PackageNotFound`] for a name the manifest does
    /// not record.
    pub fn status<S: AsRef<str>>(
        &self,
        ct: &CancelToken,
        packages: &[S],
    ) -> Result<Vec<PackageStatus>> {
        let manifest = self.store.load_or_default(ct)?;
        let selected: Vec<&PackageInfo> = if packages.is_empty() {
            manifest.packages.values().collect()
        } else {
            packages
                .iter()
                .map(|name| {
                    manifest
                        .packages
                        .get(name.as_ref())
                        .ok_or_else(|| DotError::PackageNotFound(name.as_ref().to_string()))
                })
                .collect::<Result<_>>()?
        };

        selected
            .into_iter()
            .map(|info| self.package_status(ct, &manifest, info))
            .collect()
    }

    fn package_status(
        &self,
        ct: &CancelToken,
        manifest: &Manifest,
        info: &PackageInfo,
    ) -> Result<PackageStatus> {
        let roots = self.roots();
        let mut status = PackageStatus {
            name: info.name.clone(),
            source: info.source,
            installed_at: info.installed_at,
            link_count: info.links.len(),
            healthy: 0,
            broken: 0,
            wrong_target: 0,
            drift: Drift::Unknown,
        };
        for link in &info.links {
            match doctor::check_link(self.fs.as_ref(), ct, &roots, &info.name, link)?.status {
                HealthStatus::Healthy => status.healthy += 1,
                HealthStatus::Broken | HealthStatus::Permission => status.broken += 1,
                HealthStatus::WrongTarget => status.wrong_target += 1,
            }
        }
        let root = self.settings.package_root.join(&info.name)?;
        status.drift = match package_hash(self.fs.as_ref(), ct, root.as_path()) {
            Err(e) if e.is_not_found() => Drift::Missing,
            Err(e) => return Err(e),
            Ok(current) => match manifest.hashes.get(&info.name) {
                None => Drift::Unknown,
                Some(stored) if *stored == current => Drift::Unchanged,
                Some(_) => Drift::Changed,
            },
        };
        Ok(status)
    }

    /// Installed packages sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be read.
    pub fn list(&self, ct: &CancelToken) -> Result<Vec<PackageSummary>> {
        let manifest = self.store.load_or_default(ct)?;
        Ok(manifest
            .packages
            .values()
            .map(|info| PackageSummary {
                name: info.name.clone(),
                source: info.source,
                link_count: info.links.len(),
                installed_at: info.installed_at,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Doctor
    // ------------------------------------------------------------------

    /// Check every managed link and scan for orphans, using `scan` instead
    /// of the configured limits when given.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be read or on cancellation.
    pub fn doctor(&self, ct: &CancelToken, scan: Option<ScanConfig>) -> Result<DiagnosticReport> {
        let _span = tracing::info_span!("doctor").entered();
        let manifest = self.store.load_or_default(ct)?;
        let scan = scan.unwrap_or(self.config.scan);
        let report = doctor::diagnose(self.fs.as_ref(), ct, &self.roots(), &manifest, &scan)?;
        self.metrics.counter("doctor_issues", report.issues.len());
        Ok(report)
    }

    /// Scan for orphans and apply `decide`'s verdict to each.
    ///
    /// Adopting an orphan records it under the package it already points
    /// into; links pointing elsewhere are reported in
    /// [`TriageResult::errors`].
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be read or saved, or on cancellation.
    pub fn triage<F>(
        &self,
        ct: &CancelToken,
        scan: Option<ScanConfig>,
        decide: F,
    ) -> Result<TriageResult>
    where
        F: FnMut(OrphanCategory, &Orphan) -> TriageDecision,
    {
        let _span = tracing::info_span!("triage").entered();
        let scan = scan.unwrap_or(self.config.scan);
        self.mutate(ct, |client, manifest| {
            let managed: BTreeSet<PathBuf> = manifest.claims().into_keys().collect();
            let found = doctor::scan_orphans(
                client.fs.as_ref(),
                ct,
                &OrphanQuery {
                    target_dir: &client.config.target_dir,
                    package_dir: &client.config.package_dir,
                    managed: &managed,
                    doctor: &manifest.doctor,
                    config: &scan,
                },
            )?;
            let (mut result, adopt) = doctor::triage::triage(&found.orphans, manifest, decide);
            for (package, links) in adopt {
                for link in links {
                    match client.claim_orphan(manifest, &found.orphans, &package, &link) {
                        Ok(()) => result.adopted += 1,
                        Err(e) => result.errors.push((link, e.to_string())),
                    }
                }
            }
            let changed = result.changed_manifest() || result.adopted > 0;
            Ok((result, changed))
        })
    }

    fn claim_orphan(
        &self,
        manifest: &mut Manifest,
        orphans: &[Orphan],
        package: &str,
        link: &Path,
    ) -> Result<()> {
        validate_package_name(package)?;
        let root = self.settings.package_root.join(package)?;
        let Some(orphan) = orphans.iter().find(|o| o.path == link) else {
            return Err(DotError::InvalidPath {
                path: link.to_path_buf(),
                reason: "not an orphan".to_string(),
            });
        };
        if !orphan.resolved.starts_with(root.as_path()) {
            return Err(DotError::InvalidPath {
                path: link.to_path_buf(),
                reason: format!("points to {} outside package '{package}'", orphan.resolved.display()),
            });
        }
        let info = manifest.packages.entry(package.to_string()).or_insert_with(|| {
            PackageInfo::new(
                package,
                PackageSource::Managed,
                &self.config.package_dir,
                &self.config.target_dir,
            )
        });
        let mut links = info.links.clone();
        links.insert(link.to_path_buf());
        info.set_links(links);
        Ok(())
    }

    /// Stop reporting the symlink at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::InvalidPath`] when `path` is not a symlink inside
    /// the target directory.
    pub fn ignore_link(&self, ct: &CancelToken, path: &Path, reason: &str) -> Result<()> {
        let rel = self.target_relative(path)?;
        let contents = self.fs.read_link(ct, &self.config.target_dir.join(&rel))?;
        self.mutate(ct, |_, manifest| {
            manifest.ignore_link(&rel, &contents, reason);
            Ok(((), true))
        })
    }

    /// Forget an acknowledgement. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be read or saved.
    pub fn unignore_link(&self, ct: &CancelToken, path: &Path) -> Result<bool> {
        let rel = self.target_relative(path)?;
        self.mutate(ct, |_, manifest| {
            let removed = manifest.unignore_link(&rel);
            Ok((removed, removed))
        })
    }

    /// Exclude paths matching `pattern` from orphan scans. Returns `false`
    /// when it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Config`] for an invalid glob.
    pub fn add_ignore_pattern(&self, ct: &CancelToken, pattern: &str) -> Result<bool> {
        IgnoreSet::new(&[pattern], false)?;
        self.mutate(ct, |_, manifest| {
            let added = manifest.add_ignored_pattern(pattern);
            Ok((added, added))
        })
    }

    /// Remove an orphan-scan pattern. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be read or saved.
    pub fn remove_ignore_pattern(&self, ct: &CancelToken, pattern: &str) -> Result<bool> {
        self.mutate(ct, |_, manifest| {
            let removed = manifest.remove_ignored_pattern(pattern);
            Ok((removed, removed))
        })
    }

    /// Rewrite an older manifest in the current schema. Returns the backup
    /// of the original, or `None` when it was already current.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be parsed, backed up or saved.
    pub fn upgrade_manifest(&self, ct: &CancelToken) -> Result<Option<PathBuf>> {
        let _serial = self.serialise();
        let _lock = self.store.lock(ct, self.config.lock_timeout())?;
        self.store.upgrade(ct)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn serialise(&self) -> MutexGuard<'_, ()> {
        self.serial
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The manifest lock, or `None` on a dry run, which writes nothing.
    fn lock(&self, ct: &CancelToken) -> Result<Option<ManifestLock>> {
        if self.config.dry_run {
            return Ok(None);
        }
        self.store.lock(ct, self.config.lock_timeout()).map(Some)
    }

    fn roots(&self) -> Roots<'_> {
        Roots {
            target_dir: &self.config.target_dir,
            package_dir: &self.config.package_dir,
        }
    }

    fn scan<S: AsRef<str> + Sync>(&self, ct: &CancelToken, packages: &[S]) -> Result<Vec<Inventory>> {
        Scanner::new(
            self.fs.as_ref(),
            &self.settings.package_root,
            &self.ignore,
            &self.settings.translator,
        )
        .scan_all(ct, packages)
    }

    fn target_relative(&self, path: &Path) -> Result<PathBuf> {
        let absolute = clean(&self.config.target_dir.join(path));
        match relative_to(&absolute, &self.config.target_dir) {
            Some(rel) if !rel.as_os_str().is_empty() => Ok(rel),
            _ => Err(DotError::InvalidPath {
                path: path.to_path_buf(),
                reason: "not inside the target directory".to_string(),
            }),
        }
    }

    /// Load, change and save the manifest under the locks. `f` returns its
    /// result and whether the manifest changed; unchanged manifests are not
    /// written.
    fn mutate<T, F>(&self, ct: &CancelToken, f: F) -> Result<T>
    where
        F: FnOnce(&Self, &mut Manifest) -> Result<(T, bool)>,
    {
        let _serial = self.serialise();
        let _lock = self.lock(ct)?;
        let mut manifest = self.store.load_or_default(ct)?;
        let (value, changed) = f(self, &mut manifest)?;
        if changed && !self.config.dry_run {
            self.store.save(ct, &mut manifest)?;
        }
        Ok(value)
    }

    /// Execute `plan`, record its outcome in `manifest` and save it.
    fn run(
        &self,
        ct: &CancelToken,
        operation: &str,
        packages: Vec<String>,
        plan: &Plan,
        mut manifest: Manifest,
    ) -> Result<OperationReport> {
        let summary = plan.summary();
        self.metrics.counter("conflicts", summary.conflicts);
        self.log.debug(&format!("{operation}: {summary}"));

        let executor = Executor::new(
            Arc::clone(&self.fs),
            ExecOptions::from_config(&self.config),
            Arc::clone(&self.log),
        );
        let tx = executor.execute(ct, plan)?;
        let executed = tx.len();

        if !tx.is_dry_run() {
            let saved = self
                .record(ct, plan, &mut manifest)
                .and_then(|()| self.store.save(ct, &mut manifest));
            if let Err(save_err) = saved {
                if self.config.atomic {
                    tracing::warn!(error = %save_err, "manifest not saved, rolling back");
                    if let Err(e) = tx.rollback() {
                        tracing::error!(error = %e, "rollback after failed save was incomplete");
                    }
                }
                return Err(save_err);
            }
            if let Err(e) = tx.commit() {
                self.log.warn(&format!("could not remove staged files: {e}"));
            }
        }

        self.metrics.counter("operations_executed", executed);
        self.metrics.counter("links_created", summary.link_create);
        self.metrics.counter("links_removed", summary.link_delete);
        tracing::debug!(operation, executed, "operation complete");
        Ok(OperationReport {
            packages,
            summary,
            executed,
            dry_run: self.config.dry_run,
            warnings: plan.warnings.clone(),
        })
    }

    /// Copy link sets, backups, sources and hashes from `plan` into
    /// `manifest`.
    fn record(&self, ct: &CancelToken, plan: &Plan, manifest: &mut Manifest) -> Result<()> {
        for (name, links) in &plan.links {
            if links.is_empty() {
                manifest.remove_package(name);
                continue;
            }
            let source = plan.sources.get(name).copied().unwrap_or_default();
            let info = manifest.packages.entry(name.clone()).or_insert_with(|| {
                PackageInfo::new(name, source, &self.config.package_dir, &self.config.target_dir)
            });
            info.set_links(links.clone());
            info.source = source;
            if let Some(backups) = plan.backups.get(name) {
                info.backups.clone_from(backups);
            }
            let root = self.settings.package_root.join(name)?;
            let hash = package_hash(self.fs.as_ref(), ct, root.as_path())?;
            manifest.hashes.insert(name.clone(), hash);
        }
        manifest.repository =
            repository::refresh(manifest.repository.as_ref(), &self.config.package_dir);
        Ok(())
    }
}

fn names<S: AsRef<str>>(packages: &[S]) -> Vec<String> {
    packages.iter().map(|p| p.as_ref().to_string()).collect()
}
