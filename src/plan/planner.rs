//! Turns package inventories and the manifest into a [`Plan`].
//!
//! The planner never writes. It keeps an overlay of the state the plan will
//! have produced so far, so a decision about a path below a directory it is
//! about to create, delete or unfold sees the future tree instead of the
//! current disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::{Conflict, ConflictKind, Operation, OperationId, OperationKind, Plan};
use crate::cancel::CancelToken;
use crate::config::ConflictPolicy;
use crate::dotfile::NameTranslator;
use crate::error::{DotError, Result};
use crate::fs::{FileKind, FileSystem};
use crate::manifest::{Manifest, PackageSource};
use crate::paths::{FilePath, PackagePath, TargetPath, clean, relative_to, resolve_link};
use crate::scanner::{EntryKind, Inventory, InventoryEntry, validate_package_name};

/// Inputs that shape every plan.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Directory holding the packages.
    pub package_root: PackagePath,
    /// Directory the links are created in.
    pub target_root: TargetPath,
    /// Link whole directories when possible.
    pub folding: bool,
    /// What to do with files in the way.
    pub conflict_policy: ConflictPolicy,
    /// Appended to a displaced file's name.
    pub backup_suffix: String,
    /// When set, backups go here, mirroring the relative path.
    pub backup_dir: Option<FilePath>,
    /// Maps package names to target names.
    pub translator: NameTranslator,
}

impl PlannerSettings {
    /// Settings with default policies for the given roots.
    #[must_use]
    pub fn new(package_root: PackagePath, target_root: TargetPath) -> Self {
        Self {
            package_root,
            target_root,
            folding: true,
            conflict_policy: ConflictPolicy::Fail,
            backup_suffix: ".bak".to_string(),
            backup_dir: None,
            translator: NameTranslator::default(),
        }
    }
}

/// Options for [`Planner::plan_unmanage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmanageOptions {
    /// Move adopted content back into the target directory.
    pub restore: bool,
    /// Remove the manifest once no package is left.
    pub cleanup: bool,
}

/// Builds plans against a filesystem snapshot.
#[derive(Debug)]
pub struct Planner<'a> {
    fs: &'a dyn FileSystem,
    settings: &'a PlannerSettings,
}

impl<'a> Planner<'a> {
    /// Create a planner.
    #[must_use]
    pub const fn new(fs: &'a dyn FileSystem, settings: &'a PlannerSettings) -> Self {
        Self { fs, settings }
    }

    /// Plan linking every inventory into the target directory.
    ///
    /// # Errors
    ///
    /// Conflicts are collected in the plan. Errors are reserved for
    /// cancellation and filesystem failures while probing.
    pub fn plan_manage(
        &self,
        ct: &CancelToken,
        inventories: &[Inventory],
        manifest: &Manifest,
    ) -> Result<Plan> {
        let mut b = Builder::new(self, ct, manifest);
        for inv in inventories {
            b.begin(&inv.package);
            b.manage(inv)?;
        }
        tracing::debug!(operations = b.ops.len(), conflicts = b.plan.conflicts.len(), "planned manage");
        Ok(b.finish())
    }

    /// Plan removing the links of installed packages.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::PackageNotFound`] for a package the manifest does
    /// not know, plus cancellation and probing failures.
    pub fn plan_unmanage<S: AsRef<str>>(
        &self,
        ct: &CancelToken,
        packages: &[S],
        manifest: &Manifest,
        options: UnmanageOptions,
    ) -> Result<Plan> {
        let mut b = Builder::new(self, ct, manifest);
        let leaving: BTreeSet<&str> = packages.iter().map(AsRef::as_ref).collect();
        let mut emptied = BTreeSet::new();
        let mut emptied_packages = BTreeSet::new();
        for name in packages {
            b.unmanage(name.as_ref(), options, &leaving, &mut emptied, &mut emptied_packages)?;
        }
        b.prune(&emptied, self.settings.target_root.as_path())?;
        b.prune(&emptied_packages, self.settings.package_root.as_path())?;
        tracing::debug!(operations = b.ops.len(), "planned unmanage");
        Ok(b.finish())
    }

    /// Plan bringing installed packages in line with their current
    /// contents: stale links are removed, missing ones created, correct
    /// ones left alone.
    ///
    /// # Errors
    ///
    /// Cancellation and probing failures.
    pub fn plan_remanage(
        &self,
        ct: &CancelToken,
        inventories: &[Inventory],
        manifest: &Manifest,
    ) -> Result<Plan> {
        let mut b = Builder::new(self, ct, manifest);
        for inv in inventories {
            b.begin(&inv.package);
            b.plan.links.insert(inv.package.clone(), BTreeSet::new());
            b.manage(inv)?;
        }
        let mut emptied = BTreeSet::new();
        for inv in inventories {
            b.drop_stale(&inv.package, &mut emptied)?;
        }
        b.prune(&emptied, self.settings.target_root.as_path())?;
        tracing::debug!(operations = b.ops.len(), "planned remanage");
        Ok(b.finish())
    }

    /// Plan moving existing files into `package` and linking them back.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::InvalidPath`] for a bad package name, plus
    /// cancellation and probing failures.
    pub fn plan_adopt(
        &self,
        ct: &CancelToken,
        files: &[PathBuf],
        package: &str,
        manifest: &Manifest,
    ) -> Result<Plan> {
        validate_package_name(package)?;
        let mut b = Builder::new(self, ct, manifest);
        b.begin(package);
        if !manifest.packages.contains_key(package) {
            b.plan.sources.insert(package.to_string(), PackageSource::Adopted);
        }
        for file in files {
            b.adopt(package, file)?;
        }
        tracing::debug!(operations = b.ops.len(), "planned adopt");
        Ok(b.finish())
    }
}

/// Planned state of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Planned {
    Absent,
    /// Created by the plan, so it starts out empty.
    FreshDir,
    Link(PathBuf),
    /// Something non-link will be there (moved or restored content).
    Occupied,
}

/// What a path holds, overlay first, disk second.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Probe {
    Missing,
    File,
    Dir,
    /// Symlink, with its contents resolved to an absolute path.
    Link(PathBuf),
}

struct Builder<'p, 'a> {
    planner: &'p Planner<'a>,
    ct: &'p CancelToken,
    manifest: &'p Manifest,
    ops: Vec<Operation>,
    index: HashMap<OperationId, usize>,
    overlay: HashMap<PathBuf, Planned>,
    /// Operation that makes a path exist.
    producers: HashMap<PathBuf, OperationId>,
    /// Operation that clears a path.
    clearers: HashMap<PathBuf, OperationId>,
    /// Link owner per relative target path, updated as the plan grows.
    claims: BTreeMap<PathBuf, String>,
    plan: Plan,
}

impl<'p, 'a> Builder<'p, 'a> {
    fn new(planner: &'p Planner<'a>, ct: &'p CancelToken, manifest: &'p Manifest) -> Self {
        Self {
            planner,
            ct,
            manifest,
            ops: Vec::new(),
            index: HashMap::new(),
            overlay: HashMap::new(),
            producers: HashMap::new(),
            clearers: HashMap::new(),
            claims: manifest.claims(),
            plan: Plan::default(),
        }
    }

    fn finish(mut self) -> Plan {
        self.plan.operations = self.ops;
        self.plan
    }

    fn fs(&self) -> &'a dyn FileSystem {
        self.planner.fs
    }

    fn settings(&self) -> &'a PlannerSettings {
        self.planner.settings
    }

    /// Seed the per-package records from the manifest.
    fn begin(&mut self, package: &str) {
        let existing = self.manifest.packages.get(package);
        self.plan
            .sources
            .entry(package.to_string())
            .or_insert_with(|| existing.map_or(PackageSource::Managed, |p| p.source));
        self.plan
            .backups
            .entry(package.to_string())
            .or_insert_with(|| existing.map(|p| p.backups.clone()).unwrap_or_default());
        self.links_of(package);
    }

    fn links_of(&mut self, package: &str) -> &mut BTreeSet<PathBuf> {
        let manifest = self.manifest;
        self.plan
            .links
            .entry(package.to_string())
            .or_insert_with(|| {
                manifest
                    .packages
                    .get(package)
                    .map(|p| p.links.clone())
                    .unwrap_or_default()
            })
    }

    fn record(&mut self, package: &str, rel: &Path) {
        self.links_of(package).insert(rel.to_path_buf());
        self.claims.insert(rel.to_path_buf(), package.to_string());
    }

    fn forget(&mut self, package: &str, rel: &Path) {
        self.links_of(package).remove(rel);
        if self.claims.get(rel).is_some_and(|o| o == package) {
            self.claims.remove(rel);
        }
    }

    fn conflict(&mut self, conflict: Conflict) {
        tracing::debug!(kind = %conflict.kind, path = %conflict.path.display(), "conflict");
        self.plan.conflicts.push(conflict);
    }

    // -----------------------------------------------------------------------
    // Overlay and operation bookkeeping
    // -----------------------------------------------------------------------

    fn probe(&self, path: &Path) -> Result<Probe> {
        if let Some(state) = self.overlay.get(path) {
            return Ok(match state {
                Planned::Absent => Probe::Missing,
                Planned::FreshDir => Probe::Dir,
                Planned::Link(dest) => Probe::Link(dest.clone()),
                Planned::Occupied => Probe::File,
            });
        }
        for ancestor in path.ancestors().skip(1) {
            match self.overlay.get(ancestor) {
                Some(Planned::Occupied) => break,
                Some(_) => return Ok(Probe::Missing),
                None => {}
            }
        }
        match self.fs().lstat(self.ct, path) {
            Ok(info) => Ok(match info.kind {
                FileKind::Symlink => {
                    let contents = self.fs().read_link(self.ct, path)?;
                    Probe::Link(resolve_link(path, &contents))
                }
                FileKind::Dir => Probe::Dir,
                FileKind::File => Probe::File,
            }),
            Err(e) if e.is_not_found() => Ok(Probe::Missing),
            Err(e) => Err(e),
        }
    }

    fn add(&mut self, kind: OperationKind, deps: Vec<OperationId>) -> OperationId {
        let id = kind.id();
        let deps = deps.into_iter().filter(|d| d != &id);
        if let Some(op) = self.index.get(&id).and_then(|&i| self.ops.get_mut(i)) {
            for dep in deps {
                if !op.deps.contains(&dep) {
                    op.deps.push(dep);
                }
            }
        } else {
            let mut unique: Vec<OperationId> = Vec::new();
            for dep in deps {
                if !unique.contains(&dep) {
                    unique.push(dep);
                }
            }
            self.index.insert(id.clone(), self.ops.len());
            self.ops.push(Operation::new(kind, unique));
        }
        id
    }

    /// Drop a link this plan was going to create at `target`. Returns
    /// whether there was one.
    fn withdraw_link(&mut self, target: &Path) -> bool {
        let Some(id) = self.producers.get(target).cloned() else {
            return false;
        };
        let Some(&i) = self.index.get(&id) else {
            return false;
        };
        if !matches!(
            self.ops.get(i).map(|op| &op.kind),
            Some(OperationKind::LinkCreate { .. })
        ) {
            return false;
        }
        self.ops.remove(i);
        self.index = self
            .ops
            .iter()
            .enumerate()
            .map(|(i, op)| (op.id.clone(), i))
            .collect();
        self.producers.remove(target);
        self.overlay.insert(target.to_path_buf(), Planned::Absent);
        true
    }

    /// Make sure `path` will be a directory. Returns the operation that
    /// creates it, if the plan creates it.
    fn ensure_dir(&mut self, path: &Path) -> Result<Option<OperationId>> {
        if path.parent().is_none() {
            return Ok(None);
        }
        match self.probe(path)? {
            Probe::Dir => Ok(self.producers.get(path).cloned()),
            Probe::Missing => {
                let mut deps = Vec::new();
                if let Some(parent) = path.parent()
                    && let Some(id) = self.ensure_dir(parent)?
                {
                    deps.push(id);
                }
                if let Some(id) = self.clearers.get(path) {
                    deps.push(id.clone());
                }
                let id = self.add(
                    OperationKind::DirCreate {
                        path: FilePath::new(path)?,
                    },
                    deps,
                );
                self.overlay.insert(path.to_path_buf(), Planned::FreshDir);
                self.producers.insert(path.to_path_buf(), id.clone());
                Ok(Some(id))
            }
            Probe::Link(dest) => {
                if !self.fs().is_dir(self.ct, &dest)? {
                    self.conflict(
                        Conflict::new(
                            ConflictKind::InvalidTarget,
                            path,
                            "parent is a symlink that does not lead to a directory",
                        )
                        .with_context("link_target", dest.display().to_string()),
                    );
                }
                Ok(None)
            }
            Probe::File => {
                self.conflict(Conflict::new(
                    ConflictKind::FileExists,
                    path,
                    "a file is in the way of a needed directory",
                ));
                Ok(None)
            }
        }
    }

    /// Plan a link at `target` for `package`.
    fn link(
        &mut self,
        package: &str,
        rel: &Path,
        source: &PackagePath,
        target: &TargetPath,
        mut deps: Vec<OperationId>,
    ) -> Result<()> {
        if let Some(parent) = target.as_path().parent()
            && let Some(id) = self.ensure_dir(parent)?
        {
            deps.push(id);
        }
        if let Some(id) = self.clearers.get(target.as_path()) {
            deps.push(id.clone());
        }
        let id = self.add(
            OperationKind::LinkCreate {
                source: source.clone(),
                target: target.clone(),
            },
            deps,
        );
        self.overlay.insert(
            target.as_path().to_path_buf(),
            Planned::Link(source.as_path().to_path_buf()),
        );
        self.producers.insert(target.as_path().to_path_buf(), id);
        self.record(package, rel);
        Ok(())
    }

    fn unlink(&mut self, target: &TargetPath) -> OperationId {
        let id = self.add(
            OperationKind::LinkDelete {
                target: target.clone(),
            },
            Vec::new(),
        );
        self.overlay
            .insert(target.as_path().to_path_buf(), Planned::Absent);
        self.clearers
            .insert(target.as_path().to_path_buf(), id.clone());
        id
    }

    /// Name of the package a path inside the package directory belongs to.
    fn package_of(&self, path: &Path) -> Option<String> {
        relative_to(path, self.settings().package_root.as_path())?
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
    }

    // -----------------------------------------------------------------------
    // Manage
    // -----------------------------------------------------------------------

    fn manage(&mut self, inv: &Inventory) -> Result<()> {
        for (_, entry) in inv.children_of(None) {
            self.manage_entry(inv, entry)?;
        }
        Ok(())
    }

    fn manage_children(&mut self, inv: &Inventory, entry: &InventoryEntry) -> Result<()> {
        for (_, child) in inv.children_of(Some(&entry.package_relative)) {
            self.manage_entry(inv, child)?;
        }
        Ok(())
    }

    fn can_fold(&self, package: &str, entry: &InventoryEntry) -> bool {
        self.settings().folding
            && entry.kind == EntryKind::Dir
            && entry.foldable
            && !self.claims.iter().any(|(rel, owner)| {
                owner != package && rel != &entry.relative && rel.starts_with(&entry.relative)
            })
    }

    fn manage_entry(&mut self, inv: &Inventory, entry: &InventoryEntry) -> Result<()> {
        self.ct.check()?;
        let package = inv.package.as_str();
        let rel = entry.relative.as_path();
        let target = self.settings().target_root.join(rel)?;
        let other_owner = self
            .claims
            .get(rel)
            .filter(|owner| owner.as_str() != package)
            .cloned();
        let is_dir = entry.kind == EntryKind::Dir;

        match self.probe(target.as_path())? {
            Probe::Link(dest) if dest == entry.source.as_path() => {
                if is_dir && !self.can_fold(package, entry) {
                    self.unfold(package, &target, &dest, package)?;
                    self.manage_children(inv, entry)?;
                } else {
                    self.record(package, rel);
                }
                Ok(())
            }
            Probe::Link(dest) if !dest.starts_with(self.settings().package_root.as_path()) => {
                self.conflict(
                    Conflict::new(
                        ConflictKind::WrongTarget,
                        target.as_path(),
                        "symlink points outside the package directory",
                    )
                    .with_context("current", dest.display().to_string()),
                );
                Ok(())
            }
            Probe::Link(dest) => {
                if is_dir && self.fs().is_dir(self.ct, &dest)? {
                    let holder = other_owner
                        .or_else(|| self.package_of(&dest))
                        .unwrap_or_else(|| package.to_string());
                    self.unfold(package, &target, &dest, &holder)?;
                    return self.manage_children(inv, entry);
                }
                if let Some(owner) = other_owner {
                    self.ownership(&target, &owner);
                    return Ok(());
                }
                let del = self.unlink(&target);
                self.link(package, rel, &entry.source, &target, vec![del])
            }
            _ if other_owner.is_some() => {
                if let Some(owner) = other_owner {
                    self.ownership(&target, &owner);
                }
                Ok(())
            }
            Probe::Missing => self.place(inv, entry, &target),
            Probe::Dir if is_dir => self.manage_children(inv, entry),
            Probe::Dir => self.displace(inv, entry, &target, true),
            Probe::File => self.displace(inv, entry, &target, false),
        }
    }

    fn ownership(&mut self, target: &TargetPath, owner: &str) {
        self.conflict(
            Conflict::new(
                ConflictKind::Ownership,
                target.as_path(),
                format!("already managed by package '{owner}'"),
            )
            .with_context("owner", owner),
        );
    }

    /// Plan an entry whose target is (or will be) free.
    fn place(&mut self, inv: &Inventory, entry: &InventoryEntry, target: &TargetPath) -> Result<()> {
        if entry.kind == EntryKind::Dir && !self.can_fold(&inv.package, entry) {
            self.ensure_dir(target.as_path())?;
            return self.manage_children(inv, entry);
        }
        self.link(&inv.package, &entry.relative, &entry.source, target, Vec::new())
    }

    /// Apply the conflict policy to a file or directory in the way.
    fn displace(
        &mut self,
        inv: &Inventory,
        entry: &InventoryEntry,
        target: &TargetPath,
        existing_dir: bool,
    ) -> Result<()> {
        let what = if existing_dir { "directory" } else { "file" };
        match self.settings().conflict_policy {
            ConflictPolicy::Fail => {
                let kind = if existing_dir {
                    ConflictKind::DirExists
                } else {
                    ConflictKind::FileExists
                };
                self.conflict(
                    Conflict::new(kind, target.as_path(), format!("existing {what} would be replaced"))
                        .with_context("package", inv.package.clone()),
                );
                return Ok(());
            }
            ConflictPolicy::Skip => {
                self.plan
                    .warnings
                    .push(format!("skipped {target}: existing {what} left in place"));
                return Ok(());
            }
            ConflictPolicy::Backup => {
                let backup = self.backup_path(&entry.relative, target)?;
                let mut deps = Vec::new();
                if self.settings().backup_dir.is_some()
                    && let Some(parent) = backup.as_path().parent()
                    && let Some(id) = self.ensure_dir(parent)?
                {
                    deps.push(id);
                }
                let id = self.add(
                    OperationKind::FileBackup {
                        src: target.clone(),
                        backup: backup.clone(),
                    },
                    deps,
                );
                self.overlay
                    .insert(backup.as_path().to_path_buf(), Planned::Occupied);
                self.clearers.insert(target.as_path().to_path_buf(), id);
                let recorded = self.backup_record(backup.as_path());
                self.plan
                    .backups
                    .entry(inv.package.clone())
                    .or_default()
                    .insert(entry.relative.clone(), recorded);
            }
            ConflictPolicy::Overwrite => {
                let kind = if existing_dir {
                    OperationKind::DirRemoveAll {
                        path: target.to_file_path(),
                    }
                } else {
                    OperationKind::FileDelete {
                        path: target.clone(),
                    }
                };
                let id = self.add(kind, Vec::new());
                self.clearers.insert(target.as_path().to_path_buf(), id);
            }
        }
        self.overlay
            .insert(target.as_path().to_path_buf(), Planned::Absent);
        self.place(inv, entry, target)
    }

    /// How a backup is stored in the manifest: relative to the target root
    /// when it lies inside it, absolute otherwise.
    fn backup_record(&self, backup: &Path) -> PathBuf {
        match relative_to(backup, self.settings().target_root.as_path()) {
            Some(rel) if !rel.as_os_str().is_empty() => rel,
            _ => backup.to_path_buf(),
        }
    }

    /// `<target><suffix>` or `<backup_dir>/<rel>`, with `.1`, `.2`, ...
    /// appended until the name is free.
    fn backup_path(&self, rel: &Path, target: &TargetPath) -> Result<FilePath> {
        let base = match &self.settings().backup_dir {
            Some(dir) => dir.as_path().join(rel),
            None => {
                let mut name = target.as_path().as_os_str().to_os_string();
                name.push(&self.settings().backup_suffix);
                PathBuf::from(name)
            }
        };
        let mut candidate = base.clone();
        let mut n = 1u32;
        while self.probe(&candidate)? != Probe::Missing {
            let mut name = base.as_os_str().to_os_string();
            name.push(format!(".{n}"));
            candidate = PathBuf::from(name);
            n += 1;
        }
        FilePath::new(candidate)
    }

    /// Replace the directory link at `target` (pointing at `dest`, owned by
    /// `holder`) with a real directory. When the holder is another package
    /// its children are linked individually; the caller plans its own.
    fn unfold(
        &mut self,
        package: &str,
        target: &TargetPath,
        dest: &Path,
        holder: &str,
    ) -> Result<()> {
        let rel = relative_to(target.as_path(), self.settings().target_root.as_path())
            .unwrap_or_default();
        tracing::debug!(path = %target, holder, "unfolding directory link");

        let mut deps = Vec::new();
        if !self.withdraw_link(target.as_path()) {
            deps.push(self.unlink(target));
        }
        let dir = self.add(
            OperationKind::DirCreate {
                path: target.to_file_path(),
            },
            deps,
        );
        self.overlay
            .insert(target.as_path().to_path_buf(), Planned::FreshDir);
        self.producers
            .insert(target.as_path().to_path_buf(), dir);
        self.forget(holder, &rel);

        if holder != package {
            for child in self.fs().read_dir(self.ct, dest)? {
                let child_rel = rel.join(&child.name);
                let child_target = target.join(&child.name)?;
                let child_source = PackagePath::new(dest.join(&child.name))?;
                self.link(holder, &child_rel, &child_source, &child_target, Vec::new())?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Remanage and unmanage
    // -----------------------------------------------------------------------

    /// Remove links the manifest records for `package` that the fresh plan
    /// no longer produces.
    fn drop_stale(&mut self, package: &str, emptied: &mut BTreeSet<PathBuf>) -> Result<()> {
        let manifest = self.manifest;
        let Some(info) = manifest.packages.get(package) else {
            return Ok(());
        };
        let package_dir = self.settings().package_root.join(package)?;
        let current = self.links_of(package).clone();
        for rel in info.links.difference(&current) {
            self.ct.check()?;
            if self.claims.get(rel).is_some_and(|o| o != package) {
                continue;
            }
            let target = self.settings().target_root.join(rel)?;
            if self.overlay.contains_key(target.as_path()) {
                continue;
            }
            self.claims.remove(rel);
            match self.probe(target.as_path())? {
                Probe::Link(dest) if dest.starts_with(package_dir.as_path()) => {
                    let del = self.unlink(&target);
                    self.restore_backup(package, rel, &target, del)?;
                    if let Some(parent) = target.as_path().parent() {
                        emptied.insert(parent.to_path_buf());
                    }
                }
                Probe::Missing => {}
                _ => self
                    .plan
                    .warnings
                    .push(format!("{target} is no longer a link into '{package}'; left in place")),
            }
        }
        Ok(())
    }

    fn restore_backup(
        &mut self,
        package: &str,
        rel: &Path,
        target: &TargetPath,
        after: OperationId,
    ) -> Result<()> {
        let backup = self
            .plan
            .backups
            .get_mut(package)
            .and_then(|b| b.remove(rel));
        let Some(recorded) = backup else {
            return Ok(());
        };
        let backup = clean(&self.settings().target_root.as_path().join(recorded));
        if self.probe(&backup)? == Probe::Missing {
            self.plan.warnings.push(format!(
                "backup {} for {target} is missing; nothing restored",
                backup.display()
            ));
            return Ok(());
        }
        self.add(
            OperationKind::FileMove {
                src: FilePath::new(&backup)?,
                dst: target.to_file_path(),
            },
            vec![after],
        );
        self.overlay.insert(backup, Planned::Absent);
        self.overlay
            .insert(target.as_path().to_path_buf(), Planned::Occupied);
        Ok(())
    }

    fn unmanage(
        &mut self,
        package: &str,
        options: UnmanageOptions,
        leaving: &BTreeSet<&str>,
        emptied: &mut BTreeSet<PathBuf>,
        emptied_packages: &mut BTreeSet<PathBuf>,
    ) -> Result<()> {
        let manifest = self.manifest;
        let Some(info) = manifest.packages.get(package) else {
            return Err(DotError::PackageNotFound(package.to_string()));
        };
        self.begin(package);
        self.plan.links.insert(package.to_string(), BTreeSet::new());
        let package_dir = self.settings().package_root.join(package)?;
        let restore = options.restore && info.source == PackageSource::Adopted;

        for rel in &info.links {
            self.ct.check()?;
            if self.claims.get(rel).is_some_and(|o| o == package) {
                self.claims.remove(rel);
            }
            let target = self.settings().target_root.join(rel)?;
            match self.probe(target.as_path())? {
                Probe::Missing => self
                    .plan
                    .warnings
                    .push(format!("{target} is already gone")),
                Probe::Link(dest) if dest.starts_with(package_dir.as_path()) => {
                    let del = self.unlink(&target);
                    if let Some(parent) = target.as_path().parent() {
                        emptied.insert(parent.to_path_buf());
                    }
                    let nested = self.nested_claims(rel, leaving);
                    if !nested.is_empty() {
                        if restore {
                            self.plan.warnings.push(format!(
                                "{target} holds links of other packages; its contents stay in '{package}'"
                            ));
                        }
                        self.relink_nested(&target, &nested)?;
                    } else if restore && self.probe(&dest)? != Probe::Missing {
                        self.add(
                            OperationKind::FileMove {
                                src: FilePath::new(&dest)?,
                                dst: target.to_file_path(),
                            },
                            vec![del],
                        );
                        self.overlay
                            .insert(target.as_path().to_path_buf(), Planned::Occupied);
                        if let Some(parent) = dest.parent() {
                            emptied_packages.insert(parent.to_path_buf());
                        }
                        self.overlay.insert(dest, Planned::Absent);
                    } else {
                        self.restore_backup(package, rel, &target, del)?;
                    }
                }
                Probe::Link(dest) => self.plan.warnings.push(format!(
                    "{target} points to {} instead of '{package}'; left in place",
                    dest.display()
                )),
                Probe::File | Probe::Dir => self
                    .plan
                    .warnings
                    .push(format!("{target} is no longer a link; left in place")),
            }
        }
        Ok(())
    }

    /// Links below `rel` owned by packages that stay installed.
    fn nested_claims(&self, rel: &Path, leaving: &BTreeSet<&str>) -> Vec<(PathBuf, String)> {
        self.claims
            .iter()
            .filter(|(path, owner)| {
                path.as_path() != rel
                    && path.starts_with(rel)
                    && !leaving.contains(owner.as_str())
            })
            .map(|(path, owner)| (path.clone(), owner.clone()))
            .collect()
    }

    /// Turn the directory link just removed at `target` into a real
    /// directory and link each of `nested` into it individually.
    fn relink_nested(&mut self, target: &TargetPath, nested: &[(PathBuf, String)]) -> Result<()> {
        tracing::debug!(path = %target, links = nested.len(), "unfolding for remaining packages");
        self.ensure_dir(target.as_path())?;
        for (rel, owner) in nested {
            self.begin(owner);
            let source_rel = self.settings().translator.untranslate_path(rel);
            let source = self.settings().package_root.join(owner)?.join(&source_rel)?;
            if self.probe(source.as_path())? == Probe::Missing {
                self.forget(owner, rel);
                self.plan.warnings.push(format!(
                    "{} of '{owner}' has no source at {source}; not re-created",
                    rel.display()
                ));
                continue;
            }
            let child = self.settings().target_root.join(rel)?;
            self.link(owner, rel, &source, &child, Vec::new())?;
        }
        Ok(())
    }

    /// Delete directories in `dirs` (and their ancestors below `root`) that
    /// the plan leaves empty, deepest first.
    fn prune(&mut self, dirs: &BTreeSet<PathBuf>, root: &Path) -> Result<()> {
        let mut candidates: BTreeSet<PathBuf> = BTreeSet::new();
        for dir in dirs {
            for ancestor in dir.ancestors() {
                if ancestor == root || !ancestor.starts_with(root) {
                    break;
                }
                candidates.insert(ancestor.to_path_buf());
            }
        }
        let mut ordered: Vec<PathBuf> = candidates.into_iter().collect();
        ordered.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

        for dir in ordered {
            self.ct.check()?;
            if self.probe(&dir)? != Probe::Dir {
                continue;
            }
            let entries = self.fs().read_dir(self.ct, &dir)?;
            let all_cleared = entries
                .iter()
                .all(|e| self.overlay.get(&e.path) == Some(&Planned::Absent));
            let gains_entries = self
                .overlay
                .iter()
                .any(|(p, s)| p.parent() == Some(dir.as_path()) && *s != Planned::Absent);
            if !all_cleared || gains_entries {
                continue;
            }
            let deps = entries
                .iter()
                .filter_map(|e| self.clearers.get(&e.path).cloned())
                .collect();
            let id = self.add(
                OperationKind::DirDelete {
                    path: FilePath::new(&dir)?,
                },
                deps,
            );
            self.overlay.insert(dir.clone(), Planned::Absent);
            self.clearers.insert(dir, id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Adopt
    // -----------------------------------------------------------------------

    fn adopt(&mut self, package: &str, file: &Path) -> Result<()> {
        self.ct.check()?;
        let settings = self.settings();
        let path = clean(file);
        let rel = match relative_to(&path, settings.target_root.as_path()) {
            Some(rel) if path.is_absolute() && !rel.as_os_str().is_empty() => rel,
            _ => {
                self.conflict(Conflict::new(
                    ConflictKind::InvalidTarget,
                    &path,
                    "not inside the target directory",
                ));
                return Ok(());
            }
        };
        if path.starts_with(settings.package_root.as_path()) {
            self.conflict(Conflict::new(
                ConflictKind::InvalidTarget,
                &path,
                "already inside the package directory",
            ));
            return Ok(());
        }
        if let Some(owner) = rel
            .ancestors()
            .find_map(|a| self.claims.get(a))
            .cloned()
        {
            self.conflict(
                Conflict::new(
                    ConflictKind::AlreadyManaged,
                    &path,
                    format!("already managed by package '{owner}'"),
                )
                .with_context("owner", owner),
            );
            return Ok(());
        }

        let target = TargetPath::new(&path)?;
        let existing_dir = match self.probe(&path)? {
            Probe::Missing => {
                self.conflict(Conflict::new(ConflictKind::MissingSource, &path, "does not exist"));
                return Ok(());
            }
            Probe::Link(dest) => {
                self.conflict(
                    Conflict::new(ConflictKind::AlreadyManaged, &path, "already a symlink")
                        .with_context("current", dest.display().to_string()),
                );
                return Ok(());
            }
            Probe::Dir => true,
            Probe::File => false,
        };

        let dest_rel = settings.translator.untranslate_path(&rel);
        let dest = settings.package_root.join(package)?.join(&dest_rel)?;
        if self.probe(dest.as_path())? != Probe::Missing {
            self.conflict(Conflict::new(
                ConflictKind::FileExists,
                dest.as_path(),
                "already exists in the package",
            ));
            return Ok(());
        }

        let mut deps = Vec::new();
        if let Some(parent) = dest.as_path().parent()
            && let Some(id) = self.ensure_dir(parent)?
        {
            deps.push(id);
        }
        let cleared = if existing_dir {
            let copy = self.add(
                OperationKind::DirCopy {
                    src: target.to_file_path(),
                    dst: dest.to_file_path(),
                },
                deps,
            );
            self.add(
                OperationKind::DirRemoveAll {
                    path: target.to_file_path(),
                },
                vec![copy],
            )
        } else {
            self.add(
                OperationKind::FileMove {
                    src: target.to_file_path(),
                    dst: dest.to_file_path(),
                },
                deps,
            )
        };
        self.overlay.insert(path.clone(), Planned::Absent);
        self.overlay
            .insert(dest.as_path().to_path_buf(), Planned::Occupied);
        self.clearers.insert(path, cleared);
        self.link(package, &rel, &dest, &target, Vec::new())
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use crate::ignore::IgnoreSet;
    use crate::manifest::PackageInfo;
    use crate::scanner::Scanner;

    fn settings() -> PlannerSettings {
        PlannerSettings::new(
            PackagePath::new("/repo").unwrap(),
            TargetPath::new("/home/u").unwrap(),
        )
    }

    fn scan(fs: &MemoryFs, s: &PlannerSettings, packages: &[&str]) -> Vec<Inventory> {
        let ignore = IgnoreSet::new::<&str>(&[], true).unwrap();
        Scanner::new(fs, &s.package_root, &ignore, &s.translator)
            .scan_all(&CancelToken::new(), packages)
            .unwrap()
    }

    fn manage(fs: &MemoryFs, s: &PlannerSettings, packages: &[&str], m: &Manifest) -> Plan {
        let inv = scan(fs, s, packages);
        Planner::new(fs, s)
            .plan_manage(&CancelToken::new(), &inv, m)
            .unwrap()
    }

    fn ids(plan: &Plan) -> Vec<String> {
        plan.operations.iter().map(|o| o.id.to_string()).collect()
    }

    fn manifest_with(name: &str, links: &[&str]) -> Manifest {
        let mut m = Manifest::default();
        let mut info = PackageInfo::new(
            name,
            PackageSource::Managed,
            Path::new("/repo"),
            Path::new("/home/u"),
        );
        info.set_links(links.iter().map(PathBuf::from).collect());
        m.packages.insert(name.to_string(), info);
        m
    }

    fn links(plan: &Plan, package: &str) -> Vec<String> {
        plan.links[package]
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Manage
    // -----------------------------------------------------------------------

    #[test]
    fn links_files_with_translated_names() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_dir("/home/u");
        let s = settings();
        let plan = manage(&fs, &s, &["vim"], &Manifest::default());
        assert!(plan.is_executable());
        assert_eq!(ids(&plan), vec!["link-create:/home/u/.vimrc"]);
        assert_eq!(links(&plan, "vim"), vec![".vimrc"]);
        assert_eq!(plan.sources["vim"], PackageSource::Managed);
    }

    #[test]
    fn foldable_directory_becomes_one_link() {
        let fs = MemoryFs::new()
            .with_file("/repo/tools/bin/a", b"")
            .with_file("/repo/tools/bin/b", b"")
            .with_dir("/home/u");
        let s = settings();
        let plan = manage(&fs, &s, &["tools"], &Manifest::default());
        assert_eq!(ids(&plan), vec!["link-create:/home/u/bin"]);
    }

    #[test]
    fn folding_disabled_creates_directory_and_children() {
        let fs = MemoryFs::new()
            .with_file("/repo/tools/bin/a", b"")
            .with_dir("/home/u");
        let mut s = settings();
        s.folding = false;
        let plan = manage(&fs, &s, &["tools"], &Manifest::default());
        assert_eq!(
            ids(&plan),
            vec!["dir-create:/home/u/bin", "link-create:/home/u/bin/a"]
        );
        assert_eq!(
            plan.operations[1].deps,
            vec![plan.operations[0].id.clone()]
        );
    }

    #[test]
    fn directory_with_translated_children_is_not_folded() {
        let fs = MemoryFs::new()
            .with_file("/repo/sh/dot-local/bin/dot-helper", b"")
            .with_dir("/home/u");
        let s = settings();
        let plan = manage(&fs, &s, &["sh"], &Manifest::default());
        assert_eq!(
            ids(&plan),
            vec![
                "dir-create:/home/u/.local",
                "dir-create:/home/u/.local/bin",
                "link-create:/home/u/.local/bin/.helper",
            ]
        );
    }

    #[test]
    fn translated_directory_name_alone_still_folds() {
        let fs = MemoryFs::new()
            .with_file("/repo/nvim/dot-config/nvim/init.vim", b"")
            .with_dir("/home/u");
        let plan = manage(&fs, &settings(), &["nvim"], &Manifest::default());
        assert_eq!(ids(&plan), vec!["link-create:/home/u/.config"]);
    }

    #[test]
    fn existing_directory_is_descended_into() {
        let fs = MemoryFs::new()
            .with_file("/repo/nvim/dot-config/nvim/init.vim", b"")
            .with_file("/home/u/.config/other/x", b"");
        let s = settings();
        let plan = manage(&fs, &s, &["nvim"], &Manifest::default());
        assert_eq!(ids(&plan), vec!["link-create:/home/u/.config/nvim"]);
        assert!(plan.operations[0].deps.is_empty());
    }

    #[test]
    fn correct_link_is_a_no_op() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "../../repo/vim/dot-vimrc");
        let s = settings();
        let plan = manage(&fs, &s, &["vim"], &manifest_with("vim", &[".vimrc"]));
        assert!(plan.is_empty());
        assert!(plan.is_executable());
        assert_eq!(links(&plan, "vim"), vec![".vimrc"]);
    }

    #[test]
    fn stale_link_into_package_is_replaced() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_file("/repo/old/vimrc", b"")
            .with_symlink("/home/u/.vimrc", "/repo/old/vimrc");
        let s = settings();
        let plan = manage(&fs, &s, &["vim"], &Manifest::default());
        assert_eq!(
            ids(&plan),
            vec!["link-delete:/home/u/.vimrc", "link-create:/home/u/.vimrc"]
        );
        assert_eq!(
            plan.operations[1].deps,
            vec![plan.operations[0].id.clone()]
        );
    }

    #[test]
    fn link_outside_package_dir_is_wrong_target() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "/etc/vimrc");
        let s = settings();
        let plan = manage(&fs, &s, &["vim"], &Manifest::default());
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::WrongTarget);
        assert_eq!(plan.conflicts[0].context["current"], "/etc/vimrc");
    }

    #[test]
    fn link_owned_by_another_package_is_an_ownership_conflict() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_file("/repo/neovim/dot-vimrc", b"")
            .with_symlink("/home/u/.vimrc", "/repo/neovim/dot-vimrc");
        let s = settings();
        let plan = manage(&fs, &s, &["vim"], &manifest_with("neovim", &[".vimrc"]));
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::Ownership);
        assert_eq!(plan.conflicts[0].context["owner"], "neovim");
    }

    // -----------------------------------------------------------------------
    // Conflict policies
    // -----------------------------------------------------------------------

    fn with_existing_bashrc() -> MemoryFs {
        MemoryFs::new()
            .with_file("/repo/bash/dot-bashrc", b"new")
            .with_file("/home/u/.bashrc", b"old")
    }

    #[test]
    fn fail_policy_reports_file_exists() {
        let fs = with_existing_bashrc();
        let plan = manage(&fs, &settings(), &["bash"], &Manifest::default());
        assert!(!plan.is_executable());
        assert_eq!(plan.conflicts[0].kind, ConflictKind::FileExists);
        assert!(plan.is_empty());
    }

    #[test]
    fn backup_policy_moves_file_aside_first() {
        let fs = with_existing_bashrc();
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Backup;
        let plan = manage(&fs, &s, &["bash"], &Manifest::default());
        assert!(plan.is_executable());
        assert_eq!(
            ids(&plan),
            vec!["file-backup:/home/u/.bashrc", "link-create:/home/u/.bashrc"]
        );
        assert_eq!(
            plan.backups["bash"][Path::new(".bashrc")],
            PathBuf::from(".bashrc.bak")
        );
        assert_eq!(
            plan.operations[1].deps,
            vec![plan.operations[0].id.clone()]
        );
    }

    #[test]
    fn backup_name_gets_numeric_suffix_when_taken() {
        let fs = with_existing_bashrc()
            .with_file("/home/u/.bashrc.bak", b"")
            .with_file("/home/u/.bashrc.bak.1", b"");
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Backup;
        let plan = manage(&fs, &s, &["bash"], &Manifest::default());
        let OperationKind::FileBackup { backup, .. } = &plan.operations[0].kind else {
            panic!("expected backup first");
        };
        assert_eq!(backup.as_path(), Path::new("/home/u/.bashrc.bak.2"));
    }

    #[test]
    fn backup_dir_mirrors_relative_path() {
        let fs = MemoryFs::new()
            .with_file("/repo/nvim/dot-config/nvim/init.vim", b"")
            .with_file("/home/u/.config/nvim/init.vim", b"");
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Backup;
        s.backup_dir = Some(FilePath::new("/home/u/.dot-backups").unwrap());
        let plan = manage(&fs, &s, &["nvim"], &Manifest::default());
        assert_eq!(
            ids(&plan),
            vec![
                "dir-create:/home/u/.dot-backups",
                "dir-create:/home/u/.dot-backups/.config",
                "dir-create:/home/u/.dot-backups/.config/nvim",
                "file-backup:/home/u/.config/nvim/init.vim",
                "link-create:/home/u/.config/nvim/init.vim",
            ]
        );
    }

    #[test]
    fn backup_outside_target_is_recorded_absolute() {
        let fs = with_existing_bashrc().with_dir("/var/backups");
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Backup;
        s.backup_dir = Some(FilePath::new("/var/backups").unwrap());
        let plan = manage(&fs, &s, &["bash"], &Manifest::default());
        assert_eq!(
            plan.backups["bash"][Path::new(".bashrc")],
            PathBuf::from("/var/backups/.bashrc")
        );
    }

    #[test]
    fn overwrite_policy_deletes_first() {
        let fs = with_existing_bashrc();
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Overwrite;
        let plan = manage(&fs, &s, &["bash"], &Manifest::default());
        assert_eq!(
            ids(&plan),
            vec!["file-delete:/home/u/.bashrc", "link-create:/home/u/.bashrc"]
        );
    }

    #[test]
    fn skip_policy_warns_and_omits_link() {
        let fs = with_existing_bashrc();
        let mut s = settings();
        s.conflict_policy = ConflictPolicy::Skip;
        let plan = manage(&fs, &s, &["bash"], &Manifest::default());
        assert!(plan.is_executable());
        assert!(plan.is_empty());
        assert_eq!(plan.warnings.len(), 1);
        assert!(links(&plan, "bash").is_empty());
    }

    #[test]
    fn file_facing_real_directory_is_dir_exists() {
        let fs = MemoryFs::new()
            .with_file("/repo/x/notes", b"")
            .with_dir("/home/u/notes");
        let plan = manage(&fs, &settings(), &["x"], &Manifest::default());
        assert_eq!(plan.conflicts[0].kind, ConflictKind::DirExists);
    }

    // -----------------------------------------------------------------------
    // Unfolding
    // -----------------------------------------------------------------------

    #[test]
    fn second_package_unfolds_first_packages_directory() {
        let fs = MemoryFs::new()
            .with_file("/repo/a/bin/one", b"")
            .with_file("/repo/b/bin/two", b"")
            .with_symlink("/home/u/bin", "../../repo/a/bin");
        let s = settings();
        let plan = manage(&fs, &s, &["b"], &manifest_with("a", &["bin"]));
        assert!(plan.is_executable(), "{:?}", plan.conflicts);
        assert_eq!(
            ids(&plan),
            vec![
                "link-delete:/home/u/bin",
                "dir-create:/home/u/bin",
                "link-create:/home/u/bin/one",
                "link-create:/home/u/bin/two",
            ]
        );
        assert_eq!(links(&plan, "a"), vec!["bin/one"]);
        assert_eq!(links(&plan, "b"), vec!["bin/two"]);
    }

    #[test]
    fn two_packages_in_one_run_share_a_directory() {
        let fs = MemoryFs::new()
            .with_file("/repo/a/bin/one", b"")
            .with_file("/repo/b/bin/two", b"")
            .with_dir("/home/u");
        let plan = manage(&fs, &settings(), &["a", "b"], &Manifest::default());
        assert!(plan.is_executable());
        assert_eq!(
            ids(&plan),
            vec![
                "dir-create:/home/u/bin",
                "link-create:/home/u/bin/one",
                "link-create:/home/u/bin/two",
            ]
        );
        assert!(plan.ordered().is_ok());
    }

    #[test]
    fn own_folded_link_unfolds_when_folding_is_disabled() {
        let fs = MemoryFs::new()
            .with_file("/repo/tools/bin/a", b"")
            .with_symlink("/home/u/bin", "/repo/tools/bin");
        let mut s = settings();
        s.folding = false;
        let plan = manage(&fs, &s, &["tools"], &manifest_with("tools", &["bin"]));
        assert_eq!(
            ids(&plan),
            vec![
                "link-delete:/home/u/bin",
                "dir-create:/home/u/bin",
                "link-create:/home/u/bin/a",
            ]
        );
        assert_eq!(links(&plan, "tools"), vec!["bin/a"]);
    }

    // -----------------------------------------------------------------------
    // Remanage
    // -----------------------------------------------------------------------

    #[test]
    fn remanage_removes_stale_links_and_keeps_good_ones() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"")
            .with_file("/repo/vim/dot-gvimrc", b"")
            .with_symlink("/home/u/.vimrc", "/repo/vim/dot-vimrc")
            .with_symlink("/home/u/.exrc", "/repo/vim/dot-exrc");
        let s = settings();
        let inv = scan(&fs, &s, &["vim"]);
        let m = manifest_with("vim", &[".vimrc", ".exrc"]);
        let plan = Planner::new(&fs, &s)
            .plan_remanage(&CancelToken::new(), &inv, &m)
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec!["link-create:/home/u/.gvimrc", "link-delete:/home/u/.exrc"]
        );
        assert_eq!(links(&plan, "vim"), vec![".gvimrc", ".vimrc"]);
    }

    // -----------------------------------------------------------------------
    // Unmanage
    // -----------------------------------------------------------------------

    #[test]
    fn unmanage_deletes_links_and_emptied_directories() {
        let fs = MemoryFs::new()
            .with_file("/repo/nvim/dot-config/nvim/init.vim", b"")
            .with_dir("/home/u/.config/nvim")
            .with_symlink(
                "/home/u/.config/nvim/init.vim",
                "/repo/nvim/dot-config/nvim/init.vim",
            );
        let s = settings();
        let m = manifest_with("nvim", &[".config/nvim/init.vim"]);
        let plan = Planner::new(&fs, &s)
            .plan_unmanage(&CancelToken::new(), &["nvim"], &m, UnmanageOptions::default())
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec![
                "link-delete:/home/u/.config/nvim/init.vim",
                "dir-delete:/home/u/.config/nvim",
                "dir-delete:/home/u/.config",
            ]
        );
        assert!(plan.links["nvim"].is_empty());
        let order: Vec<&str> = plan
            .ordered()
            .unwrap()
            .iter()
            .map(|o| o.kind.tag())
            .collect();
        assert_eq!(order, vec!["link-delete", "dir-delete", "dir-delete"]);
    }

    #[test]
    fn unmanage_keeps_directories_with_other_content() {
        let fs = MemoryFs::new()
            .with_file("/repo/nvim/dot-config/nvim", b"")
            .with_file("/home/u/.config/keep", b"")
            .with_symlink("/home/u/.config/nvim", "/repo/nvim/dot-config/nvim");
        let m = manifest_with("nvim", &[".config/nvim"]);
        let plan = Planner::new(&fs, &settings())
            .plan_unmanage(&CancelToken::new(), &["nvim"], &m, UnmanageOptions::default())
            .unwrap();
        assert_eq!(ids(&plan), vec!["link-delete:/home/u/.config/nvim"]);
    }

    #[test]
    fn unmanage_relinks_other_packages_inside_a_directory_link() {
        let fs = MemoryFs::new()
            .with_file("/repo/a/bin/one", b"")
            .with_file("/repo/b/bin/two", b"")
            .with_symlink("/home/u/bin", "/repo/a/bin");
        let mut m = manifest_with("a", &["bin"]);
        m.packages
            .extend(manifest_with("b", &["bin/two"]).packages);

        let plan = Planner::new(&fs, &settings())
            .plan_unmanage(&CancelToken::new(), &["a"], &m, UnmanageOptions::default())
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec![
                "link-delete:/home/u/bin",
                "dir-create:/home/u/bin",
                "link-create:/home/u/bin/two",
            ]
        );
        assert!(plan.links["a"].is_empty());
        assert_eq!(links(&plan, "b"), vec!["bin/two"]);
        assert!(plan.ordered().is_ok());

        let both = Planner::new(&fs, &settings())
            .plan_unmanage(&CancelToken::new(), &["a", "b"], &m, UnmanageOptions::default())
            .unwrap();
        assert_eq!(ids(&both), vec!["link-delete:/home/u/bin"]);
    }

    #[test]
    fn unmanage_restores_backups() {
        let fs = MemoryFs::new()
            .with_file("/repo/bash/dot-bashrc", b"new")
            .with_file("/home/u/.bashrc.bak", b"old")
            .with_symlink("/home/u/.bashrc", "/repo/bash/dot-bashrc");
        let mut m = manifest_with("bash", &[".bashrc"]);
        m.packages
            .get_mut("bash")
            .unwrap()
            .backups
            .insert(PathBuf::from(".bashrc"), PathBuf::from(".bashrc.bak"));
        let plan = Planner::new(&fs, &settings())
            .plan_unmanage(&CancelToken::new(), &["bash"], &m, UnmanageOptions::default())
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec![
                "link-delete:/home/u/.bashrc",
                "file-move:/home/u/.bashrc.bak->/home/u/.bashrc",
            ]
        );
    }

    #[test]
    fn unmanage_leaves_foreign_paths_alone() {
        let fs = MemoryFs::new()
            .with_file("/home/u/.vimrc", b"user edited")
            .with_symlink("/home/u/.gvimrc", "/elsewhere");
        let m = manifest_with("vim", &[".vimrc", ".gvimrc", ".exrc"]);
        let plan = Planner::new(&fs, &settings())
            .plan_unmanage(&CancelToken::new(), &["vim"], &m, UnmanageOptions::default())
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.warnings.len(), 3);
    }

    #[test]
    fn unmanage_unknown_package_is_not_found() {
        let fs = MemoryFs::new();
        let err = Planner::new(&fs, &settings())
            .plan_unmanage(
                &CancelToken::new(),
                &["ghost"],
                &Manifest::default(),
                UnmanageOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, DotError::PackageNotFound(_)));
    }

    // -----------------------------------------------------------------------
    // Adopt
    // -----------------------------------------------------------------------

    #[test]
    fn adopt_file_moves_and_links_back() {
        let fs = MemoryFs::new()
            .with_dir("/repo")
            .with_file("/home/u/.config/app/config.toml", b"x");
        let s = settings();
        let plan = Planner::new(&fs, &s)
            .plan_adopt(
                &CancelToken::new(),
                &[PathBuf::from("/home/u/.config/app/config.toml")],
                "app",
                &Manifest::default(),
            )
            .unwrap();
        assert!(plan.is_executable(), "{:?}", plan.conflicts);
        assert_eq!(
            ids(&plan),
            vec![
                "dir-create:/repo/app",
                "dir-create:/repo/app/dot-config",
                "dir-create:/repo/app/dot-config/app",
                "file-move:/home/u/.config/app/config.toml->/repo/app/dot-config/app/config.toml",
                "link-create:/home/u/.config/app/config.toml",
            ]
        );
        assert_eq!(plan.sources["app"], PackageSource::Adopted);
        assert_eq!(links(&plan, "app"), vec![".config/app/config.toml"]);
        assert!(plan.ordered().is_ok());
    }

    #[test]
    fn adopt_directory_copies_then_removes() {
        let fs = MemoryFs::new()
            .with_dir("/repo/ssh")
            .with_file("/home/u/.ssh/config", b"");
        let plan = Planner::new(&fs, &settings())
            .plan_adopt(
                &CancelToken::new(),
                &[PathBuf::from("/home/u/.ssh")],
                "ssh",
                &Manifest::default(),
            )
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec![
                "dir-copy:/home/u/.ssh->/repo/ssh/dot-ssh",
                "dir-remove-all:/home/u/.ssh",
                "link-create:/home/u/.ssh",
            ]
        );
    }

    #[test]
    fn adopt_rejects_bad_inputs() {
        let fs = MemoryFs::new()
            .with_dir("/repo")
            .with_symlink("/home/u/.linked", "/x")
            .with_dir("/home/u");
        let plan = Planner::new(&fs, &settings())
            .plan_adopt(
                &CancelToken::new(),
                &[
                    PathBuf::from("/home/u/.missing"),
                    PathBuf::from("/home/u/.linked"),
                    PathBuf::from("/etc/passwd"),
                ],
                "p",
                &Manifest::default(),
            )
            .unwrap();
        let kinds: Vec<ConflictKind> = plan.conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ConflictKind::MissingSource,
                ConflictKind::AlreadyManaged,
                ConflictKind::InvalidTarget,
            ]
        );
    }

    #[test]
    fn adopt_invalid_package_name_is_an_error() {
        let fs = MemoryFs::new();
        let result = Planner::new(&fs, &settings()).plan_adopt(
            &CancelToken::new(),
            &[],
            "../escape",
            &Manifest::default(),
        );
        assert!(matches!(result, Err(DotError::InvalidPath { .. })));
    }

    #[test]
    fn cancelled_planning_stops() {
        let fs = MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"");
        let s = settings();
        let inv = scan(&fs, &s, &["vim"]);
        let ct = CancelToken::new();
        ct.cancel();
        let result = Planner::new(&fs, &s).plan_manage(&ct, &inv, &Manifest::default());
        assert!(matches!(result, Err(DotError::Cancelled)));
    }
}
