//! Filesystem port.
//!
//! Every component that touches disk goes through the [`FileSystem`] trait so
//! the planner, executor, manifest store and diagnostics can run against the
//! host ([`OsFs`]) or an in-memory tree ([`MemoryFs`]) interchangeably. Each
//! call takes a [`CancelToken`] and refuses to start once it has fired.

mod memory;
mod os;

use std::path::{Path, PathBuf};

pub use memory::{FsOp, MemoryFs};
pub use os::OsFs;

use crate::cancel::CancelToken;
use crate::error::Result;

/// Default mode for directories created by the engine.
pub const DIR_MODE: u32 = 0o755;

/// Default mode for files written by the engine.
pub const FILE_MODE: u32 = 0o644;

/// What a path is, as seen by `lstat` (or `stat` when links are followed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link (only reported when links are not followed).
    Symlink,
}

/// Metadata subset the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Entry type.
    pub kind: FileKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Unix permission bits (`0o644` style); synthesised on other platforms.
    pub mode: u32,
}

impl FileInfo {
    /// `true` for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    /// `true` for symbolic links.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}

/// One entry returned by [`FileSystem::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name of the entry.
    pub name: String,
    /// Full path (the directory argument joined with `name`).
    pub path: PathBuf,
    /// Entry type without following links.
    pub kind: FileKind,
}

/// Abstraction over every filesystem call the engine makes.
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Metadata of `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Fails when the path (or the link's target) does not exist.
    fn stat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo>;

    /// Metadata of `path` itself, never following a final symlink.
    ///
    /// # Errors
    ///
    /// Fails when the path does not exist.
    fn lstat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo>;

    /// Entries of directory `path`, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when `path` is missing or not a directory.
    fn read_dir(&self, ct: &CancelToken, path: &Path) -> Result<Vec<DirEntry>>;

    /// Raw contents of the symlink at `path`.
    ///
    /// # Errors
    ///
    /// Fails when `path` is not a symlink.
    fn read_link(&self, ct: &CancelToken, path: &Path) -> Result<PathBuf>;

    /// Full contents of a regular file.
    ///
    /// # Errors
    ///
    /// Fails when `path` is missing or a directory.
    fn read_file(&self, ct: &CancelToken, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate `path` with `data` and make it durable.
    ///
    /// # Errors
    ///
    /// Fails when the parent directory is missing or `path` is a directory.
    fn write_file(&self, ct: &CancelToken, path: &Path, data: &[u8], mode: u32) -> Result<()>;

    /// Create a single directory.
    ///
    /// # Errors
    ///
    /// Fails when `path` exists or its parent is missing.
    fn mkdir(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()>;

    /// Create a directory and all missing ancestors.
    ///
    /// # Errors
    ///
    /// Fails when an ancestor exists but is not a directory.
    fn mkdir_all(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()>;

    /// Remove a file, a symlink or an empty directory.
    ///
    /// # Errors
    ///
    /// Fails when `path` is missing or is a non-empty directory.
    fn remove(&self, ct: &CancelToken, path: &Path) -> Result<()>;

    /// Remove `path` and everything beneath it. A missing path is success.
    ///
    /// # Errors
    ///
    /// Fails when an entry cannot be removed.
    fn remove_all(&self, ct: &CancelToken, path: &Path) -> Result<()>;

    /// Create a symlink at `link` whose contents are `target`.
    ///
    /// # Errors
    ///
    /// Fails when `link` already exists or its parent is missing.
    fn symlink(&self, ct: &CancelToken, target: &Path, link: &Path) -> Result<()>;

    /// Atomically rename `from` to `to`, replacing a file or empty directory
    /// at `to`.
    ///
    /// # Errors
    ///
    /// Fails when `from` is missing or `to` is a non-empty directory.
    fn rename(&self, ct: &CancelToken, from: &Path, to: &Path) -> Result<()>;

    /// Create `path` with `data` only if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails with an already-exists error when `path` is present.
    fn create_exclusive(&self, ct: &CancelToken, path: &Path, data: &[u8]) -> Result<()>;

    /// `true` when something (even a dangling symlink) exists at `path`.
    ///
    /// # Errors
    ///
    /// Fails on errors other than not-found.
    fn exists(&self, ct: &CancelToken, path: &Path) -> Result<bool> {
        match self.lstat(ct, path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `true` when `path` resolves to a directory (following links).
    ///
    /// # Errors
    ///
    /// Fails on errors other than not-found.
    fn is_dir(&self, ct: &CancelToken, path: &Path) -> Result<bool> {
        match self.stat(ct, path) {
            Ok(info) => Ok(info.is_dir()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// `true` when `path` itself is a symlink.
    ///
    /// # Errors
    ///
    /// Fails on errors other than not-found.
    fn is_symlink(&self, ct: &CancelToken, path: &Path) -> Result<bool> {
        match self.lstat(ct, path) {
            Ok(info) => Ok(info.is_symlink()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy a regular file, keeping its mode.
    ///
    /// # Errors
    ///
    /// Fails when `from` cannot be read or `to` cannot be written.
    fn copy_file(&self, ct: &CancelToken, from: &Path, to: &Path) -> Result<()> {
        let info = self.stat(ct, from)?;
        let data = self.read_file(ct, from)?;
        self.write_file(ct, to, &data, info.mode)
    }
}

/// Recursively copy the tree at `src` to `dst`, recreating symlinks instead
/// of following them.
///
/// # Errors
///
/// Fails on the first entry that cannot be read or written.
pub fn copy_tree(fs: &dyn FileSystem, ct: &CancelToken, src: &Path, dst: &Path) -> Result<()> {
    let info = fs.lstat(ct, src)?;
    match info.kind {
        FileKind::Dir => {
            fs.mkdir(ct, dst, info.mode)?;
            for entry in fs.read_dir(ct, src)? {
                copy_tree(fs, ct, &entry.path, &dst.join(&entry.name))?;
            }
            Ok(())
        }
        FileKind::Symlink => {
            let target = fs.read_link(ct, src)?;
            fs.symlink(ct, &target, dst)
        }
        FileKind::File => fs.copy_file(ct, src, dst),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_preserves_structure_and_links() {
        let fs = MemoryFs::new()
            .with_file("/src/a.txt", b"a")
            .with_file("/src/sub/b.txt", b"b")
            .with_symlink("/src/link", "a.txt");
        let ct = CancelToken::new();

        copy_tree(&fs, &ct, Path::new("/src"), Path::new("/dst")).unwrap();

        assert_eq!(fs.read_file(&ct, Path::new("/dst/a.txt")).unwrap(), b"a");
        assert_eq!(fs.read_file(&ct, Path::new("/dst/sub/b.txt")).unwrap(), b"b");
        assert_eq!(
            fs.read_link(&ct, Path::new("/dst/link")).unwrap(),
            PathBuf::from("a.txt")
        );
    }

    #[test]
    fn helpers_treat_missing_as_false() {
        let fs = MemoryFs::new();
        let ct = CancelToken::new();
        assert!(!fs.exists(&ct, Path::new("/nope")).unwrap());
        assert!(!fs.is_dir(&ct, Path::new("/nope")).unwrap());
        assert!(!fs.is_symlink(&ct, Path::new("/nope")).unwrap());
    }

    #[test]
    fn exists_sees_dangling_links() {
        let fs = MemoryFs::new().with_symlink("/t/dangling", "/nowhere");
        let ct = CancelToken::new();
        assert!(fs.exists(&ct, Path::new("/t/dangling")).unwrap());
        assert!(!fs.is_dir(&ct, Path::new("/t/dangling")).unwrap());
        assert!(fs.is_symlink(&ct, Path::new("/t/dangling")).unwrap());
    }
}
