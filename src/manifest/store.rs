//! Loading, saving and locking the manifest file.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::migrate::{SUPPORTED_VERSIONS, migrate, version_of};
use super::{CURRENT_VERSION, MANIFEST_FILENAME, Manifest};
use crate::cancel::CancelToken;
use crate::error::{DotError, Result};
use crate::fs::{DIR_MODE, FILE_MODE, FileSystem};

/// Interval between lock attempts.
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// A lock older than this is assumed to belong to a crashed process.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(600);

/// Reads and writes the manifest through the filesystem port.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl ManifestStore {
    /// Store for `<manifest_dir>/.dot-manifest.json`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, manifest_dir: &Path) -> Self {
        Self {
            fs,
            path: manifest_dir.join(MANIFEST_FILENAME),
        }
    }

    /// Manifest file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn read_raw(&self, ct: &CancelToken) -> Result<Option<Vec<u8>>> {
        match self.fs.read_file(ct, &self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn corrupt(&self, reason: impl ToString) -> DotError {
        DotError::ManifestCorrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn parse(&self, bytes: &[u8]) -> Result<(Manifest, bool)> {
        let doc: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| self.corrupt(e))?;
        let version = version_of(&doc);
        if !SUPPORTED_VERSIONS.contains(&version.as_str()) {
            return Err(DotError::ManifestVersionMismatch {
                found: version,
                supported: CURRENT_VERSION.to_string(),
            });
        }
        let migrated = version != CURRENT_VERSION;
        let doc = migrate(doc).map_err(|e| self.corrupt(e))?;
        let manifest = serde_json::from_value(doc).map_err(|e| self.corrupt(e))?;
        Ok((manifest, migrated))
    }

    /// Load the manifest. A missing file is `None`; an older schema is
    /// migrated in memory.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::ManifestCorrupt`] for unparseable content and
    /// [`DotError::ManifestVersionMismatch`] for an unknown version.
    pub fn load(&self, ct: &CancelToken) -> Result<Option<Manifest>> {
        let Some(bytes) = self.read_raw(ct)? else {
            return Ok(None);
        };
        let (manifest, migrated) = self.parse(&bytes)?;
        if migrated {
            tracing::warn!(
                path = %self.path.display(),
                "manifest uses an older schema; migrated in memory (run 'dot upgrade' to rewrite it)"
            );
        }
        Ok(Some(manifest))
    }

    /// [`load`](Self::load), or an empty manifest when none exists.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_or_default(&self, ct: &CancelToken) -> Result<Manifest> {
        Ok(self.load(ct)?.unwrap_or_default())
    }

    /// Bump `updated_at` and write the manifest atomically through a
    /// temporary sibling.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written or renamed.
    pub fn save(&self, ct: &CancelToken, manifest: &mut Manifest) -> Result<()> {
        manifest.touch();
        let mut json = serde_json::to_string_pretty(manifest).map_err(|e| self.corrupt(e))?;
        json.push('\n');
        if let Some(dir) = self.path.parent() {
            self.fs.mkdir_all(ct, dir, DIR_MODE)?;
        }
        let tmp = self.sibling(".tmp");
        self.fs.write_file(ct, &tmp, json.as_bytes(), FILE_MODE)?;
        if let Err(e) = self.fs.rename(ct, &tmp, &self.path) {
            let _ = self.fs.remove(&CancelToken::new(), &tmp);
            return Err(e);
        }
        tracing::debug!(path = %self.path.display(), packages = manifest.packages.len(), "saved manifest");
        Ok(())
    }

    /// Delete the manifest. A missing file is success.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be removed.
    pub fn remove(&self, ct: &CancelToken) -> Result<()> {
        match self.fs.remove(ct, &self.path) {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    /// Take the inter-process lock, retrying until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::ManifestLocked`] on timeout and
    /// [`DotError::Cancelled`] when the token fires while waiting.
    pub fn lock(&self, ct: &CancelToken, timeout: Duration) -> Result<ManifestLock> {
        let path = self.lock_path();
        if let Some(dir) = path.parent() {
            self.fs.mkdir_all(ct, dir, DIR_MODE)?;
        }
        let started = Instant::now();
        loop {
            let contents = format!("pid={} at={}\n", std::process::id(), Utc::now().to_rfc3339());
            match self.fs.create_exclusive(ct, &path, contents.as_bytes()) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "acquired manifest lock");
                    return Ok(ManifestLock {
                        fs: Arc::clone(&self.fs),
                        path,
                    });
                }
                Err(e) if e.is_already_exists() => {
                    if self.lock_is_stale(ct, &path) {
                        tracing::warn!(path = %path.display(), "removing stale manifest lock");
                        match self.fs.remove(ct, &path) {
                            Err(e) if !e.is_not_found() => return Err(e),
                            _ => continue,
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(DotError::ManifestLocked { path });
                    }
                    ct.check()?;
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock_is_stale(&self, ct: &CancelToken, path: &Path) -> bool {
        let Ok(bytes) = self.fs.read_file(ct, path) else {
            return false;
        };
        let text = String::from_utf8_lossy(&bytes);
        text.split_whitespace()
            .find_map(|field| field.strip_prefix("at="))
            .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
            .and_then(|at| (Utc::now() - at.with_timezone(&Utc)).to_std().ok())
            .is_some_and(|age| age > LOCK_STALE_AFTER)
    }

    /// Rewrite an older manifest in the current schema, keeping a
    /// timestamped copy of the original. Returns the backup path, or `None`
    /// when there was nothing to upgrade.
    ///
    /// # Errors
    ///
    /// Fails when the manifest cannot be parsed, backed up or saved.
    pub fn upgrade(&self, ct: &CancelToken) -> Result<Option<PathBuf>> {
        let Some(bytes) = self.read_raw(ct)? else {
            return Ok(None);
        };
        let (mut manifest, migrated) = self.parse(&bytes)?;
        if !migrated {
            return Ok(None);
        }
        let backup = self.sibling(&format!(".{}.bak", Utc::now().format("%Y%m%dT%H%M%SZ")));
        self.fs.write_file(ct, &backup, &bytes, FILE_MODE)?;
        self.save(ct, &mut manifest)?;
        tracing::info!(backup = %backup.display(), "upgraded manifest to version {CURRENT_VERSION}");
        Ok(Some(backup))
    }
}

/// Holds the manifest lock file; removed on drop.
#[derive(Debug)]
pub struct ManifestLock {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl ManifestLock {
    /// The lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = self.fs.remove(&CancelToken::new(), &self.path)
            && !e.is_not_found()
        {
            tracing::warn!(path = %self.path.display(), "failed to release manifest lock: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fs::{FsOp, MemoryFs};
    use crate::manifest::{PackageInfo, PackageSource};

    fn store(fs: &Arc<MemoryFs>) -> ManifestStore {
        let dyn_fs: Arc<dyn FileSystem> = Arc::clone(fs) as Arc<dyn FileSystem>;
        ManifestStore::new(dyn_fs, Path::new("/home/u"))
    }

    fn memory() -> Arc<MemoryFs> {
        Arc::new(MemoryFs::new().with_dir("/home/u"))
    }

    // -----------------------------------------------------------------------
    // load / save
    // -----------------------------------------------------------------------

    #[test]
    fn missing_manifest_loads_as_none() {
        let fs = memory();
        let ct = CancelToken::new();
        assert!(store(&fs).load(&ct).unwrap().is_none());
        assert!(store(&fs).load_or_default(&ct).unwrap().packages.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let fs = memory();
        let ct = CancelToken::new();
        let s = store(&fs);
        let mut m = Manifest::default();
        let mut info = PackageInfo::new(
            "vim",
            PackageSource::Managed,
            Path::new("/repo"),
            Path::new("/home/u"),
        );
        info.set_links([PathBuf::from(".vimrc")].into());
        m.packages.insert("vim".into(), info);
        s.save(&ct, &mut m).unwrap();

        let loaded = s.load(&ct).unwrap().unwrap();
        assert_eq!(loaded, m);
        assert!(!fs.paths().iter().any(|p| p.ends_with(".dot-manifest.json.tmp")));
    }

    #[test]
    fn save_bumps_updated_at() {
        let fs = memory();
        let ct = CancelToken::new();
        let s = store(&fs);
        let mut m = Manifest::default();
        let before = m.updated_at;
        s.save(&ct, &mut m).unwrap();
        let first = m.updated_at;
        s.save(&ct, &mut m).unwrap();
        assert!(first > before);
        assert!(m.updated_at > first);
    }

    #[test]
    fn failed_rename_keeps_previous_manifest() {
        let fs = memory();
        let ct = CancelToken::new();
        let s = store(&fs);
        let mut m = Manifest::default();
        s.save(&ct, &mut m).unwrap();
        let original = fs.read_file(&ct, s.path()).unwrap();

        fs.fail_on(FsOp::Rename, "/home/u/.dot-manifest.json.tmp");
        m.packages.insert(
            "x".into(),
            PackageInfo::new("x", PackageSource::Managed, Path::new("/r"), Path::new("/home/u")),
        );
        assert!(s.save(&ct, &mut m).is_err());
        assert_eq!(fs.read_file(&ct, s.path()).unwrap(), original);
        assert!(!fs.paths().iter().any(|p| p.ends_with(".dot-manifest.json.tmp")));
    }

    #[test]
    fn garbage_is_corrupt() {
        let fs = Arc::new(MemoryFs::new().with_file("/home/u/.dot-manifest.json", b"{nope"));
        let err = store(&fs).load(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, DotError::ManifestCorrupt { .. }));
    }

    #[test]
    fn newer_version_is_a_mismatch() {
        let fs = Arc::new(MemoryFs::new().with_file(
            "/home/u/.dot-manifest.json",
            br#"{"version":"3","updated_at":"2024-01-01T00:00:00Z"}"#,
        ));
        let err = store(&fs).load(&CancelToken::new()).unwrap_err();
        assert!(matches!(
            err,
            DotError::ManifestVersionMismatch { ref found, .. } if found == "3"
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let fs = memory();
        let ct = CancelToken::new();
        let s = store(&fs);
        s.save(&ct, &mut Manifest::default()).unwrap();
        s.remove(&ct).unwrap();
        s.remove(&ct).unwrap();
        assert!(s.load(&ct).unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let fs = memory();
        let ct = CancelToken::new();
        let s = store(&fs);
        let guard = s.lock(&ct, Duration::from_millis(10)).unwrap();
        assert!(fs.exists(&ct, guard.path()).unwrap());

        let err = s.lock(&ct, Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, DotError::ManifestLocked { .. }));

        drop(guard);
        assert!(!fs.exists(&ct, &s.lock_path()).unwrap());
        let _again = s.lock(&ct, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let fs = Arc::new(MemoryFs::new().with_file(
            "/home/u/.dot-manifest.json.lock",
            b"pid=1 at=2000-01-01T00:00:00+00:00\n",
        ));
        let s = store(&fs);
        assert!(s.lock(&CancelToken::new(), Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn stale_lock_that_cannot_be_removed_fails() {
        let fs = Arc::new(MemoryFs::new().with_file(
            "/home/u/.dot-manifest.json.lock",
            b"pid=1 at=2000-01-01T00:00:00+00:00\n",
        ));
        fs.fail_on(FsOp::Remove, "/home/u/.dot-manifest.json.lock");
        let s = store(&fs);
        let err = s
            .lock(&CancelToken::new(), Duration::from_millis(100))
            .unwrap_err();
        assert!(!matches!(err, DotError::ManifestLocked { .. }));
        assert!(fs.exists(&CancelToken::new(), &s.lock_path()).unwrap());
    }

    // -----------------------------------------------------------------------
    // Upgrade
    // -----------------------------------------------------------------------

    #[test]
    fn upgrade_rewrites_v1_and_keeps_backup() {
        let v1 = br#"{"version":"1","tool":"dot","updated":"2024-03-01T10:00:00Z",
            "packages":{"vim":{"name":"vim","installed_at":"2024-03-01T10:00:00Z","files":[".vimrc"]}}}"#;
        let fs = Arc::new(MemoryFs::new().with_file("/home/u/.dot-manifest.json", v1));
        let ct = CancelToken::new();
        let s = store(&fs);

        let backup = s.upgrade(&ct).unwrap().unwrap();
        assert!(backup.to_string_lossy().ends_with(".bak"));
        assert_eq!(fs.read_file(&ct, &backup).unwrap(), v1.to_vec());

        let m = s.load(&ct).unwrap().unwrap();
        assert_eq!(m.version, CURRENT_VERSION);
        assert_eq!(m.packages["vim"].link_count, 1);
        assert!(s.upgrade(&ct).unwrap().is_none());
    }
}
