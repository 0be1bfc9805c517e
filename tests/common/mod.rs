// Shared helpers for integration tests.
//
// Provides a temporary package directory and target directory pair plus a
// client wired to the real filesystem, so each test can set up an isolated
// home without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dot_cli::config::Config;
use dot_cli::fs::OsFs;
use dot_cli::logging::Logger;
use dot_cli::manifest::{Manifest, ManifestStore};
use dot_cli::{CancelToken, Client};

/// An isolated package directory and target directory backed by a
/// [`tempfile::TempDir`].
///
/// Both directories are deleted when the context is dropped.
pub struct TestEnv {
    root: tempfile::TempDir,
    pub package_dir: PathBuf,
    pub target_dir: PathBuf,
    pub ct: CancelToken,
}

impl TestEnv {
    /// Create empty `packages/` and `home/` directories.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        // Resolve /tmp symlinks so link contents compare cleanly.
        let base = dunce::canonicalize(root.path()).expect("canonicalize temp dir");
        let package_dir = base.join("packages");
        let target_dir = base.join("home");
        std::fs::create_dir_all(&package_dir).expect("create package dir");
        std::fs::create_dir_all(&target_dir).expect("create target dir");
        Self {
            root,
            package_dir,
            target_dir,
            ct: CancelToken::new(),
        }
    }

    /// Default configuration for this environment.
    pub fn config(&self) -> Config {
        Config::new(&self.package_dir, &self.target_dir)
    }

    /// Client on the real filesystem with the default configuration.
    pub fn client(&self) -> Client {
        self.client_with(|_| {})
    }

    /// Client on the real filesystem after `adjust` tweaks the config.
    pub fn client_with(&self, adjust: impl FnOnce(&mut Config)) -> Client {
        let mut config = self.config();
        adjust(&mut config);
        Client::new(config, Arc::new(OsFs::new()), Arc::new(Logger::new("test")))
            .expect("build client")
    }

    /// Write `content` to `rel` inside the package directory.
    pub fn package_file(&self, rel: &str, content: &str) -> PathBuf {
        write(&self.package_dir.join(rel), content)
    }

    /// Write `content` to `rel` inside the target directory.
    pub fn target_file(&self, rel: &str, content: &str) -> PathBuf {
        write(&self.target_dir.join(rel), content)
    }

    pub fn target(&self, rel: &str) -> PathBuf {
        self.target_dir.join(rel)
    }

    /// Current manifest, or an empty one.
    pub fn manifest(&self) -> Manifest {
        ManifestStore::new(Arc::new(OsFs::new()), &self.target_dir)
            .load_or_default(&self.ct)
            .expect("load manifest")
    }

    /// Every path under the target directory with its kind and content,
    /// ignoring the manifest and its lock.
    pub fn snapshot(&self) -> Vec<(PathBuf, String)> {
        let mut out = Vec::new();
        collect(&self.target_dir, &self.target_dir, &mut out);
        out.sort();
        out
    }
}

fn write(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, content).expect("write file");
    path.to_path_buf()
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, String)>) {
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let entry = entry.expect("dir entry");
        let path = entry.path();
        let rel = path.strip_prefix(root).expect("under root").to_path_buf();
        if rel.to_string_lossy().starts_with(".dot-manifest") {
            continue;
        }
        let meta = std::fs::symlink_metadata(&path).expect("metadata");
        if meta.file_type().is_symlink() {
            let dest = std::fs::read_link(&path).expect("read link");
            out.push((rel, format!("link {}", dest.display())));
        } else if meta.is_dir() {
            out.push((rel, "dir".to_string()));
            collect(root, &path, out);
        } else {
            let content = std::fs::read_to_string(&path).expect("read file");
            out.push((rel, format!("file {content}")));
        }
    }
}
