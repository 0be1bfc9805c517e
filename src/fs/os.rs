//! Host filesystem backed by [`std::fs`].
use std::io::Write as _;
use std::path::{Path, PathBuf};

use super::{DirEntry, FileInfo, FileKind, FileSystem};
use crate::cancel::CancelToken;
use crate::error::{DotError, Result};

/// [`FileSystem`] implementation that talks to the real disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl OsFs {
    /// Create the host filesystem handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn info_from(meta: &std::fs::Metadata) -> FileInfo {
    let kind = if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else if meta.is_dir() {
        FileKind::Dir
    } else {
        FileKind::File
    };
    FileInfo {
        kind,
        size: if kind == FileKind::Dir { 0 } else { meta.len() },
        mode: mode_of(meta),
    }
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

fn dir_builder(mode: u32, recursive: bool) -> std::fs::DirBuilder {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt as _;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    builder
}

/// Check if metadata represents a directory-like entry.
///
/// On Windows a directory symlink reports `is_dir() == false` from
/// `symlink_metadata`, so the raw `FILE_ATTRIBUTE_DIRECTORY` bit is used.
fn is_dir_like(meta: &std::fs::Metadata) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt as _;
        meta.file_attributes() & 0x10 != 0
    }
    #[cfg(not(windows))]
    {
        meta.is_dir()
    }
}

impl FileSystem for OsFs {
    fn stat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo> {
        ct.check()?;
        std::fs::metadata(path)
            .map(|m| info_from(&m))
            .map_err(|e| DotError::io("stat", path, e))
    }

    fn lstat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo> {
        ct.check()?;
        std::fs::symlink_metadata(path)
            .map(|m| info_from(&m))
            .map_err(|e| DotError::io("lstat", path, e))
    }

    fn read_dir(&self, ct: &CancelToken, path: &Path) -> Result<Vec<DirEntry>> {
        ct.check()?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| DotError::io("read_dir", path, e))? {
            let entry = entry.map_err(|e| DotError::io("read_dir", path, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| DotError::io("read_dir", &entry.path(), e))?;
            let kind = if file_type.is_symlink() {
                FileKind::Symlink
            } else if file_type.is_dir() {
                FileKind::Dir
            } else {
                FileKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_link(&self, ct: &CancelToken, path: &Path) -> Result<PathBuf> {
        ct.check()?;
        std::fs::read_link(path).map_err(|e| DotError::io("read_link", path, e))
    }

    fn read_file(&self, ct: &CancelToken, path: &Path) -> Result<Vec<u8>> {
        ct.check()?;
        std::fs::read(path).map_err(|e| DotError::io("read_file", path, e))
    }

    fn write_file(&self, ct: &CancelToken, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        ct.check()?;
        let wrap = |e| DotError::io("write_file", path, e);
        let mut file = std::fs::File::create(path).map_err(wrap)?;
        file.write_all(data).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
        set_mode(path, mode).map_err(wrap)
    }

    fn mkdir(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
        ct.check()?;
        dir_builder(mode, false)
            .create(path)
            .map_err(|e| DotError::io("mkdir", path, e))
    }

    fn mkdir_all(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
        ct.check()?;
        dir_builder(mode, true)
            .create(path)
            .map_err(|e| DotError::io("mkdir", path, e))
    }

    fn remove(&self, ct: &CancelToken, path: &Path) -> Result<()> {
        ct.check()?;
        let meta = std::fs::symlink_metadata(path).map_err(|e| DotError::io("remove", path, e))?;
        let result = if is_dir_like(&meta) {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        result.map_err(|e| DotError::io("remove", path, e))
    }

    fn remove_all(&self, ct: &CancelToken, path: &Path) -> Result<()> {
        ct.check()?;
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DotError::io("remove_all", path, e)),
        };
        let result = if meta.file_type().is_symlink() {
            if is_dir_like(&meta) {
                std::fs::remove_dir(path)
            } else {
                std::fs::remove_file(path)
            }
        } else if meta.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        result.map_err(|e| DotError::io("remove_all", path, e))
    }

    fn symlink(&self, ct: &CancelToken, target: &Path, link: &Path) -> Result<()> {
        ct.check()?;
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, link).map_err(|e| DotError::io("symlink", link, e))
        }
        #[cfg(windows)]
        {
            let resolved = crate::paths::resolve_link(link, target);
            let result = if resolved.is_dir() {
                std::os::windows::fs::symlink_dir(target, link)
            } else {
                std::os::windows::fs::symlink_file(target, link)
            };
            result.map_err(|e| DotError::io("symlink", link, e))
        }
    }

    fn rename(&self, ct: &CancelToken, from: &Path, to: &Path) -> Result<()> {
        ct.check()?;
        std::fs::rename(from, to).map_err(|e| DotError::io("rename", from, e))
    }

    fn create_exclusive(&self, ct: &CancelToken, path: &Path, data: &[u8]) -> Result<()> {
        ct.check()?;
        let wrap = |e| DotError::io("create_exclusive", path, e);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(wrap)?;
        file.write_all(data).map_err(wrap)?;
        file.sync_all().map_err(wrap)
    }
}
