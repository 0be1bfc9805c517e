//! In-memory filesystem used by tests and dry planning.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DIR_MODE, DirEntry, FILE_MODE, FileInfo, FileKind, FileSystem};
use crate::cancel::CancelToken;
use crate::error::{DotError, Result};

/// Symlink hops before a lookup is declared a loop.
const MAX_SYMLINK_HOPS: usize = 40;

/// Filesystem call selector for [`MemoryFs::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    /// [`FileSystem::stat`]
    Stat,
    /// [`FileSystem::lstat`]
    Lstat,
    /// [`FileSystem::read_dir`]
    ReadDir,
    /// [`FileSystem::read_link`]
    ReadLink,
    /// [`FileSystem::read_file`]
    ReadFile,
    /// [`FileSystem::write_file`]
    WriteFile,
    /// [`FileSystem::mkdir`] and [`FileSystem::mkdir_all`]
    Mkdir,
    /// [`FileSystem::remove`]
    Remove,
    /// [`FileSystem::remove_all`]
    RemoveAll,
    /// [`FileSystem::symlink`]
    Symlink,
    /// [`FileSystem::rename`]
    Rename,
    /// [`FileSystem::create_exclusive`]
    CreateExclusive,
}

impl FsOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Stat => "stat",
            Self::Lstat => "lstat",
            Self::ReadDir => "read_dir",
            Self::ReadLink => "read_link",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::Mkdir => "mkdir",
            Self::Remove => "remove",
            Self::RemoveAll => "remove_all",
            Self::Symlink => "symlink",
            Self::Rename => "rename",
            Self::CreateExclusive => "create_exclusive",
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: u32 },
    Dir { mode: u32 },
    Symlink { target: PathBuf },
}

impl Node {
    fn info(&self) -> FileInfo {
        match self {
            Self::File { data, mode } => FileInfo {
                kind: FileKind::File,
                size: data.len() as u64,
                mode: *mode,
            },
            Self::Dir { mode } => FileInfo {
                kind: FileKind::Dir,
                size: 0,
                mode: *mode,
            },
            Self::Symlink { target } => FileInfo {
                kind: FileKind::Symlink,
                size: target.as_os_str().len() as u64,
                mode: 0o777,
            },
        }
    }

    const fn is_dir(&self) -> bool {
        matches!(self, Self::Dir { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<PathBuf, Node>,
    faults: HashMap<(FsOp, PathBuf), io::ErrorKind>,
}

impl State {
    fn has_children(&self, dir: &Path) -> bool {
        self.nodes
            .range(dir.to_path_buf()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(dir))
            .next()
            .is_some()
    }

    fn subtree(&self, root: &Path) -> Vec<PathBuf> {
        self.nodes
            .range(root.to_path_buf()..)
            .take_while(|(p, _)| p.starts_with(root))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Walk `path` component by component, substituting symlinks. A final
    /// symlink is only followed when `follow_last` is set. The returned path
    /// may not exist; every ancestor of it does and is a directory.
    fn resolve(&self, path: &Path, follow_last: bool) -> io::Result<PathBuf> {
        let mut pending: VecDeque<OsString> = components(path);
        let mut current = PathBuf::from("/");
        let mut hops = 0usize;

        while let Some(name) = pending.pop_front() {
            if name == ".." {
                current.pop();
                continue;
            }
            let candidate = current.join(&name);
            let is_last = pending.is_empty();
            match self.nodes.get(&candidate) {
                Some(Node::Symlink { target }) if !is_last || follow_last => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(io::Error::other("too many levels of symbolic links"));
                    }
                    if target.is_absolute() {
                        current = PathBuf::from("/");
                    }
                    let mut expanded = components(target);
                    expanded.extend(pending);
                    pending = expanded;
                }
                Some(Node::Dir { .. }) => current = candidate,
                Some(_) if !is_last => {
                    return Err(io::Error::from(io::ErrorKind::NotADirectory));
                }
                Some(_) => current = candidate,
                None if !is_last => return Err(io::Error::from(io::ErrorKind::NotFound)),
                None => current = candidate,
            }
        }
        Ok(current)
    }

    fn require_parent_dir(&self, resolved: &Path) -> io::Result<()> {
        let parent = resolved.parent().unwrap_or_else(|| Path::new("/"));
        match self.nodes.get(parent) {
            Some(node) if node.is_dir() => Ok(()),
            Some(_) => Err(io::Error::from(io::ErrorKind::NotADirectory)),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

fn components(path: &Path) -> VecDeque<OsString> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}

/// A complete filesystem held in memory.
///
/// Behaves like a POSIX filesystem for everything the engine relies on:
/// parents must exist, non-empty directories cannot be removed, intermediate
/// symlinks are resolved and link loops are detected. Faults can be injected
/// per operation and path with [`MemoryFs::fail_on`].
#[derive(Debug)]
pub struct MemoryFs {
    state: Mutex<State>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a filesystem containing only `/`.
    #[must_use]
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .nodes
            .insert(PathBuf::from("/"), Node::Dir { mode: DIR_MODE });
        Self {
            state: Mutex::new(state),
        }
    }

    /// Add a regular file, creating parent directories.
    #[must_use]
    pub fn with_file(self, path: impl AsRef<Path>, data: &[u8]) -> Self {
        self.seed(path.as_ref(), Node::File {
            data: data.to_vec(),
            mode: FILE_MODE,
        });
        self
    }

    /// Add a directory, creating parent directories.
    #[must_use]
    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.seed(path.as_ref(), Node::Dir { mode: DIR_MODE });
        self
    }

    /// Add a symlink at `link` with contents `target`, creating parents.
    #[must_use]
    pub fn with_symlink(self, link: impl AsRef<Path>, target: impl Into<PathBuf>) -> Self {
        self.seed(link.as_ref(), Node::Symlink {
            target: target.into(),
        });
        self
    }

    /// Make every call of `op` on exactly `path` fail with permission denied.
    pub fn fail_on(&self, op: FsOp, path: impl Into<PathBuf>) {
        self.fail_on_with(op, path, io::ErrorKind::PermissionDenied);
    }

    /// Make every call of `op` on exactly `path` fail with `kind`.
    pub fn fail_on_with(&self, op: FsOp, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        self.lock().faults.insert((op, path.into()), kind);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// All paths currently present, sorted. Useful for whole-tree assertions.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().nodes.keys().cloned().collect()
    }

    fn seed(&self, path: &Path, node: Node) {
        let mut state = self.lock();
        let mut dir = PathBuf::from("/");
        if let Some(parent) = path.parent() {
            for name in components(parent) {
                dir.push(name);
                state
                    .nodes
                    .entry(dir.clone())
                    .or_insert(Node::Dir { mode: DIR_MODE });
            }
        }
        state.nodes.insert(path.to_path_buf(), node);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancellation and fault checks shared by every call.
    fn enter(&self, ct: &CancelToken, op: FsOp, path: &Path) -> Result<MutexGuard<'_, State>> {
        ct.check()?;
        let state = self.lock();
        if let Some(kind) = state.faults.get(&(op, path.to_path_buf())) {
            return Err(DotError::io_kind(op.name(), path, *kind, "injected fault"));
        }
        Ok(state)
    }
}

fn err(op: FsOp, path: &Path) -> impl FnOnce(io::Error) -> DotError + '_ {
    move |e| DotError::io(op.name(), path, e)
}

fn kind_err(op: FsOp, path: &Path, kind: io::ErrorKind) -> DotError {
    DotError::io(op.name(), path, io::Error::from(kind))
}

impl FileSystem for MemoryFs {
    fn stat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo> {
        let state = self.enter(ct, FsOp::Stat, path)?;
        let resolved = state.resolve(path, true).map_err(err(FsOp::Stat, path))?;
        state
            .nodes
            .get(&resolved)
            .map(Node::info)
            .ok_or_else(|| kind_err(FsOp::Stat, path, io::ErrorKind::NotFound))
    }

    fn lstat(&self, ct: &CancelToken, path: &Path) -> Result<FileInfo> {
        let state = self.enter(ct, FsOp::Lstat, path)?;
        let resolved = state.resolve(path, false).map_err(err(FsOp::Lstat, path))?;
        state
            .nodes
            .get(&resolved)
            .map(Node::info)
            .ok_or_else(|| kind_err(FsOp::Lstat, path, io::ErrorKind::NotFound))
    }

    fn read_dir(&self, ct: &CancelToken, path: &Path) -> Result<Vec<DirEntry>> {
        let state = self.enter(ct, FsOp::ReadDir, path)?;
        let resolved = state.resolve(path, true).map_err(err(FsOp::ReadDir, path))?;
        match state.nodes.get(&resolved) {
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(kind_err(FsOp::ReadDir, path, io::ErrorKind::NotADirectory)),
            None => return Err(kind_err(FsOp::ReadDir, path, io::ErrorKind::NotFound)),
        }
        let mut entries: Vec<DirEntry> = state
            .nodes
            .range(resolved.clone()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(&resolved))
            .filter(|(p, _)| p.parent() == Some(resolved.as_path()))
            .filter_map(|(p, node)| {
                let name = p.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry {
                    path: path.join(&name),
                    name,
                    kind: node.info().kind,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_link(&self, ct: &CancelToken, path: &Path) -> Result<PathBuf> {
        let state = self.enter(ct, FsOp::ReadLink, path)?;
        let resolved = state.resolve(path, false).map_err(err(FsOp::ReadLink, path))?;
        match state.nodes.get(&resolved) {
            Some(Node::Symlink { target }) => Ok(target.clone()),
            Some(_) => Err(kind_err(FsOp::ReadLink, path, io::ErrorKind::InvalidInput)),
            None => Err(kind_err(FsOp::ReadLink, path, io::ErrorKind::NotFound)),
        }
    }

    fn read_file(&self, ct: &CancelToken, path: &Path) -> Result<Vec<u8>> {
        let state = self.enter(ct, FsOp::ReadFile, path)?;
        let resolved = state.resolve(path, true).map_err(err(FsOp::ReadFile, path))?;
        match state.nodes.get(&resolved) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(_) => Err(kind_err(FsOp::ReadFile, path, io::ErrorKind::IsADirectory)),
            None => Err(kind_err(FsOp::ReadFile, path, io::ErrorKind::NotFound)),
        }
    }

    fn write_file(&self, ct: &CancelToken, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let mut state = self.enter(ct, FsOp::WriteFile, path)?;
        let resolved = state.resolve(path, true).map_err(err(FsOp::WriteFile, path))?;
        state
            .require_parent_dir(&resolved)
            .map_err(err(FsOp::WriteFile, path))?;
        if state.nodes.get(&resolved).is_some_and(Node::is_dir) {
            return Err(kind_err(FsOp::WriteFile, path, io::ErrorKind::IsADirectory));
        }
        state.nodes.insert(resolved, Node::File {
            data: data.to_vec(),
            mode,
        });
        Ok(())
    }

    fn mkdir(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
        let mut state = self.enter(ct, FsOp::Mkdir, path)?;
        let resolved = state.resolve(path, false).map_err(err(FsOp::Mkdir, path))?;
        if state.nodes.contains_key(&resolved) {
            return Err(kind_err(FsOp::Mkdir, path, io::ErrorKind::AlreadyExists));
        }
        state
            .require_parent_dir(&resolved)
            .map_err(err(FsOp::Mkdir, path))?;
        state.nodes.insert(resolved, Node::Dir { mode });
        Ok(())
    }

    fn mkdir_all(&self, ct: &CancelToken, path: &Path, mode: u32) -> Result<()> {
        let mut state = self.enter(ct, FsOp::Mkdir, path)?;
        let mut prefix = PathBuf::from("/");
        for name in components(path) {
            prefix.push(name);
            let resolved = state.resolve(&prefix, true).map_err(err(FsOp::Mkdir, path))?;
            match state.nodes.get(&resolved) {
                Some(Node::Dir { .. }) => {}
                Some(_) => return Err(kind_err(FsOp::Mkdir, path, io::ErrorKind::NotADirectory)),
                None => {
                    state.nodes.insert(resolved, Node::Dir { mode });
                }
            }
        }
        Ok(())
    }

    fn remove(&self, ct: &CancelToken, path: &Path) -> Result<()> {
        let mut state = self.enter(ct, FsOp::Remove, path)?;
        let resolved = state.resolve(path, false).map_err(err(FsOp::Remove, path))?;
        match state.nodes.get(&resolved) {
            None => return Err(kind_err(FsOp::Remove, path, io::ErrorKind::NotFound)),
            Some(Node::Dir { .. }) if state.has_children(&resolved) => {
                return Err(kind_err(FsOp::Remove, path, io::ErrorKind::DirectoryNotEmpty));
            }
            Some(_) => {}
        }
        if resolved == Path::new("/") {
            return Err(kind_err(FsOp::Remove, path, io::ErrorKind::PermissionDenied));
        }
        state.nodes.remove(&resolved);
        Ok(())
    }

    fn remove_all(&self, ct: &CancelToken, path: &Path) -> Result<()> {
        let mut state = self.enter(ct, FsOp::RemoveAll, path)?;
        let resolved = match state.resolve(path, false) {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DotError::io(FsOp::RemoveAll.name(), path, e)),
        };
        if resolved == Path::new("/") {
            return Err(kind_err(FsOp::RemoveAll, path, io::ErrorKind::PermissionDenied));
        }
        let is_dir = state.nodes.get(&resolved).is_some_and(Node::is_dir);
        if is_dir {
            for p in state.subtree(&resolved) {
                state.nodes.remove(&p);
            }
        } else {
            state.nodes.remove(&resolved);
        }
        Ok(())
    }

    fn symlink(&self, ct: &CancelToken, target: &Path, link: &Path) -> Result<()> {
        let mut state = self.enter(ct, FsOp::Symlink, link)?;
        let resolved = state.resolve(link, false).map_err(err(FsOp::Symlink, link))?;
        if state.nodes.contains_key(&resolved) {
            return Err(kind_err(FsOp::Symlink, link, io::ErrorKind::AlreadyExists));
        }
        state
            .require_parent_dir(&resolved)
            .map_err(err(FsOp::Symlink, link))?;
        state.nodes.insert(resolved, Node::Symlink {
            target: target.to_path_buf(),
        });
        Ok(())
    }

    fn rename(&self, ct: &CancelToken, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.enter(ct, FsOp::Rename, from)?;
        let src = state.resolve(from, false).map_err(err(FsOp::Rename, from))?;
        let dst = state.resolve(to, false).map_err(err(FsOp::Rename, to))?;
        let Some(src_node) = state.nodes.get(&src).cloned() else {
            return Err(kind_err(FsOp::Rename, from, io::ErrorKind::NotFound));
        };
        if src == dst {
            return Ok(());
        }
        if dst.starts_with(&src) {
            return Err(kind_err(FsOp::Rename, to, io::ErrorKind::InvalidInput));
        }
        state
            .require_parent_dir(&dst)
            .map_err(err(FsOp::Rename, to))?;
        match state.nodes.get(&dst) {
            Some(Node::Dir { .. }) if state.has_children(&dst) => {
                return Err(kind_err(FsOp::Rename, to, io::ErrorKind::DirectoryNotEmpty));
            }
            Some(Node::Dir { .. }) if !src_node.is_dir() => {
                return Err(kind_err(FsOp::Rename, to, io::ErrorKind::IsADirectory));
            }
            Some(node) if !node.is_dir() && src_node.is_dir() => {
                return Err(kind_err(FsOp::Rename, to, io::ErrorKind::NotADirectory));
            }
            _ => {}
        }
        state.nodes.remove(&dst);
        for old in state.subtree(&src) {
            if let Some(node) = state.nodes.remove(&old)
                && let Ok(rest) = old.strip_prefix(&src)
            {
                let new = if rest.as_os_str().is_empty() {
                    dst.clone()
                } else {
                    dst.join(rest)
                };
                state.nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn create_exclusive(&self, ct: &CancelToken, path: &Path, data: &[u8]) -> Result<()> {
        let mut state = self.enter(ct, FsOp::CreateExclusive, path)?;
        let resolved = state
            .resolve(path, false)
            .map_err(err(FsOp::CreateExclusive, path))?;
        if state.nodes.contains_key(&resolved) {
            return Err(kind_err(
                FsOp::CreateExclusive,
                path,
                io::ErrorKind::AlreadyExists,
            ));
        }
        state
            .require_parent_dir(&resolved)
            .map_err(err(FsOp::CreateExclusive, path))?;
        state.nodes.insert(resolved, Node::File {
            data: data.to_vec(),
            mode: FILE_MODE,
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    // -----------------------------------------------------------------------
    // POSIX-like rejections
    // -----------------------------------------------------------------------

    #[test]
    fn remove_rejects_non_empty_directory() {
        let fs = MemoryFs::new().with_file("/d/f", b"x");
        let ct = CancelToken::new();
        let err = fs.remove(&ct, p("/d")).unwrap_err();
        assert_eq!(err.io_error_kind(), Some(io::ErrorKind::DirectoryNotEmpty));
        fs.remove(&ct, p("/d/f")).unwrap();
        fs.remove(&ct, p("/d")).unwrap();
        assert!(!fs.exists(&ct, p("/d")).unwrap());
    }

    #[test]
    fn mkdir_requires_parent() {
        let fs = MemoryFs::new();
        let ct = CancelToken::new();
        assert!(fs.mkdir(&ct, p("/a/b"), DIR_MODE).unwrap_err().is_not_found());
        fs.mkdir_all(&ct, p("/a/b"), DIR_MODE).unwrap();
        assert!(fs.is_dir(&ct, p("/a/b")).unwrap());
        assert!(fs.mkdir(&ct, p("/a/b"), DIR_MODE).unwrap_err().is_already_exists());
    }

    #[test]
    fn symlink_refuses_existing_path() {
        let fs = MemoryFs::new().with_file("/t/x", b"");
        let ct = CancelToken::new();
        assert!(fs.symlink(&ct, p("/s"), p("/t/x")).unwrap_err().is_already_exists());
    }

    #[test]
    fn write_through_file_parent_fails() {
        let fs = MemoryFs::new().with_file("/f", b"");
        let ct = CancelToken::new();
        let err = fs.write_file(&ct, p("/f/child"), b"", FILE_MODE).unwrap_err();
        assert_eq!(err.io_error_kind(), Some(io::ErrorKind::NotADirectory));
    }

    // -----------------------------------------------------------------------
    // Symlink resolution
    // -----------------------------------------------------------------------

    #[test]
    fn intermediate_symlinks_are_followed() {
        let fs = MemoryFs::new()
            .with_file("/repo/bin/tool", b"#!")
            .with_symlink("/home/bin", "../repo/bin");
        let ct = CancelToken::new();
        assert_eq!(fs.read_file(&ct, p("/home/bin/tool")).unwrap(), b"#!");
        assert!(fs.lstat(&ct, p("/home/bin")).unwrap().is_symlink());
        assert!(fs.stat(&ct, p("/home/bin")).unwrap().is_dir());
        let names: Vec<String> = fs
            .read_dir(&ct, p("/home/bin"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["tool"]);
    }

    #[test]
    fn symlink_loop_is_an_error_not_a_hang() {
        let fs = MemoryFs::new()
            .with_symlink("/t/a", "/t/b")
            .with_symlink("/t/b", "/t/a");
        let ct = CancelToken::new();
        assert!(fs.stat(&ct, p("/t/a")).is_err());
        assert!(fs.lstat(&ct, p("/t/a")).unwrap().is_symlink());
    }

    #[test]
    fn remove_deletes_link_not_target() {
        let fs = MemoryFs::new()
            .with_file("/s/f", b"data")
            .with_symlink("/t/f", "/s/f");
        let ct = CancelToken::new();
        fs.remove(&ct, p("/t/f")).unwrap();
        assert!(fs.exists(&ct, p("/s/f")).unwrap());
    }

    // -----------------------------------------------------------------------
    // Rename
    // -----------------------------------------------------------------------

    #[test]
    fn rename_moves_whole_subtree() {
        let fs = MemoryFs::new()
            .with_file("/a/x/1", b"1")
            .with_file("/a/x/2", b"2")
            .with_dir("/b");
        let ct = CancelToken::new();
        fs.rename(&ct, p("/a/x"), p("/b/y")).unwrap();
        assert_eq!(fs.read_file(&ct, p("/b/y/2")).unwrap(), b"2");
        assert!(!fs.exists(&ct, p("/a/x")).unwrap());
    }

    #[test]
    fn rename_onto_non_empty_dir_fails() {
        let fs = MemoryFs::new().with_dir("/a").with_file("/b/f", b"");
        let ct = CancelToken::new();
        let err = fs.rename(&ct, p("/a"), p("/b")).unwrap_err();
        assert_eq!(err.io_error_kind(), Some(io::ErrorKind::DirectoryNotEmpty));
    }

    // -----------------------------------------------------------------------
    // Faults and cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn injected_fault_is_reported_as_permission_denied() {
        let fs = MemoryFs::new().with_dir("/t");
        fs.fail_on(FsOp::Symlink, "/t/x");
        let ct = CancelToken::new();
        let err = fs.symlink(&ct, p("/s"), p("/t/x")).unwrap_err();
        assert!(matches!(err, DotError::PermissionDenied { .. }));
        fs.clear_faults();
        fs.symlink(&ct, p("/s"), p("/t/x")).unwrap();
    }

    #[test]
    fn cancelled_token_blocks_every_call() {
        let fs = MemoryFs::new();
        let ct = CancelToken::new();
        ct.cancel();
        assert!(matches!(
            fs.mkdir(&ct, p("/x"), DIR_MODE),
            Err(DotError::Cancelled)
        ));
        assert!(fs.paths().len() == 1);
    }

    #[test]
    fn create_exclusive_only_once() {
        let fs = MemoryFs::new().with_dir("/t");
        let ct = CancelToken::new();
        fs.create_exclusive(&ct, p("/t/lock"), b"1").unwrap();
        assert!(
            fs.create_exclusive(&ct, p("/t/lock"), b"2")
                .unwrap_err()
                .is_already_exists()
        );
    }

    #[test]
    fn remove_all_missing_is_ok() {
        let fs = MemoryFs::new();
        let ct = CancelToken::new();
        fs.remove_all(&ct, p("/missing/deeper")).unwrap();
    }
}
