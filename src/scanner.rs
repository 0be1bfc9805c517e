//! Package scanner: walks a package directory and produces its inventory.
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::dotfile::NameTranslator;
use crate::error::{DotError, Result};
use crate::fs::{FileKind, FileSystem};
use crate::ignore::{IGNORE_FILE, IgnoreSet};
use crate::paths::{PackagePath, validate_relative};

/// What an inventory entry is. Symlinks inside packages are kept as links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link inside the package.
    Symlink,
}

/// One linkable item of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Absolute source path inside the package.
    pub source: PackagePath,
    /// Path relative to the package root, as stored on disk.
    pub package_relative: PathBuf,
    /// Path relative to the target root, after dotfile translation.
    pub relative: PathBuf,
    /// Entry type.
    pub kind: EntryKind,
    /// For directories: nothing beneath was ignored and no descendant name
    /// needed translation, so one directory link exposes exactly this
    /// subtree. Always `false` for non-directories.
    pub foldable: bool,
}

/// Every linkable entry of one package, pre-order, siblings sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    /// Package name.
    pub package: String,
    /// Package root directory.
    pub root: PackagePath,
    /// Entries in deterministic pre-order.
    pub entries: Vec<InventoryEntry>,
}

impl Inventory {
    /// `true` when the package has nothing to link.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct children of the entry at `package_relative` (or of the root
    /// when `None`), in order.
    pub fn children_of<'a>(
        &'a self,
        parent: Option<&'a Path>,
    ) -> impl Iterator<Item = (usize, &'a InventoryEntry)> + 'a {
        self.entries.iter().enumerate().filter(move |(_, e)| {
            let p = e.package_relative.parent().filter(|p| !p.as_os_str().is_empty());
            p == parent
        })
    }
}

/// Walks package directories through the filesystem port.
#[derive(Debug)]
pub struct Scanner<'a> {
    fs: &'a dyn FileSystem,
    package_root: &'a PackagePath,
    ignore: &'a IgnoreSet,
    translator: &'a NameTranslator,
}

impl<'a> Scanner<'a> {
    /// Create a scanner rooted at the package directory.
    #[must_use]
    pub const fn new(
        fs: &'a dyn FileSystem,
        package_root: &'a PackagePath,
        ignore: &'a IgnoreSet,
        translator: &'a NameTranslator,
    ) -> Self {
        Self {
            fs,
            package_root,
            ignore,
            translator,
        }
    }

    /// Scan one package.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::PackageNotFound`] when the package is missing or
    /// not a directory, [`DotError::Cancelled`] when the token fires, and
    /// I/O errors from the walk.
    pub fn scan(&self, ct: &CancelToken, package: &str) -> Result<Inventory> {
        validate_package_name(package)?;
        let root = self.package_root.join(package)?;
        match self.fs.stat(ct, root.as_path()) {
            Ok(info) if info.is_dir() => {}
            Ok(_) => return Err(DotError::PackageNotFound(package.to_string())),
            Err(e) if e.is_not_found() => {
                return Err(DotError::PackageNotFound(package.to_string()));
            }
            Err(e) => return Err(e),
        }

        let ignore = self.package_ignore(ct, &root)?;
        let mut entries = Vec::new();
        self.walk(ct, &ignore, &root, Path::new(""), &mut entries)?;
        tracing::debug!(package, entries = entries.len(), "scanned package");
        Ok(Inventory {
            package: package.to_string(),
            root,
            entries,
        })
    }

    /// Scan several packages concurrently, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns the first error in input order.
    pub fn scan_all<S: AsRef<str> + Sync>(
        &self,
        ct: &CancelToken,
        packages: &[S],
    ) -> Result<Vec<Inventory>> {
        packages
            .par_iter()
            .map(|p| self.scan(ct, p.as_ref()))
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    /// Configured rules plus the package's own ignore file, if present.
    fn package_ignore(&self, ct: &CancelToken, root: &PackagePath) -> Result<IgnoreSet> {
        let file = root.join(IGNORE_FILE)?;
        match self.fs.read_file(ct, file.as_path()) {
            Ok(bytes) => {
                let patterns = IgnoreSet::parse(&String::from_utf8_lossy(&bytes))?;
                self.ignore.extended(&patterns)
            }
            Err(e) if e.is_not_found() => Ok(self.ignore.clone()),
            Err(e) => Err(e),
        }
    }

    /// Pre-order walk. Returns whether the subtree is foldable.
    fn walk(
        &self,
        ct: &CancelToken,
        ignore: &IgnoreSet,
        dir: &PackagePath,
        rel_dir: &Path,
        out: &mut Vec<InventoryEntry>,
    ) -> Result<bool> {
        let mut foldable = true;
        for entry in self.fs.read_dir(ct, dir.as_path())? {
            ct.check()?;
            let package_relative = rel_dir.join(&entry.name);
            let is_dir = entry.kind == FileKind::Dir;
            if ignore.is_entry_ignored(&package_relative, is_dir) {
                foldable = false;
                continue;
            }
            if self.translator.needs_translation(&entry.name) {
                foldable = false;
            }
            let source = dir.join(&entry.name)?;
            let relative = self.translator.translate_path(&package_relative);
            let kind = match entry.kind {
                FileKind::File => EntryKind::File,
                FileKind::Dir => EntryKind::Dir,
                FileKind::Symlink => EntryKind::Symlink,
            };
            let index = out.len();
            out.push(InventoryEntry {
                source: source.clone(),
                package_relative: package_relative.clone(),
                relative,
                kind,
                foldable: false,
            });
            if is_dir {
                let child_foldable = self.walk(ct, ignore, &source, &package_relative, out)?;
                if let Some(e) = out.get_mut(index) {
                    e.foldable = child_foldable;
                }
                foldable &= child_foldable;
            }
        }
        Ok(foldable)
    }
}

/// Check that a package name is a single plain path component.
///
/// # Errors
///
/// Returns [`DotError::InvalidPath`] otherwise.
pub fn validate_package_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    validate_relative(path)?;
    if path.components().count() != 1 {
        return Err(DotError::InvalidPath {
            path: path.to_path_buf(),
            reason: "package name must be a single path component".to_string(),
        });
    }
    Ok(())
}
