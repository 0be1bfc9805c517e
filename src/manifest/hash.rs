//! Content hashes used for drift detection.
use std::fmt::Write as _;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fs::{FileKind, FileSystem};
use crate::paths::slash_path;

/// Lowercase hex SHA-256 digest of `bytes`.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for b in &result {
        // write! to a String is infallible; unwrap_or(()) makes that explicit.
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}

/// Hash of a package tree: one `kind path size mode` line per entry, sorted
/// by path, symlinks listed but not followed.
///
/// # Errors
///
/// Fails when the tree cannot be walked.
pub fn package_hash(fs: &dyn FileSystem, ct: &CancelToken, root: &Path) -> Result<String> {
    let mut lines = Vec::new();
    listing(fs, ct, root, Path::new(""), &mut lines)?;
    lines.sort();
    Ok(hash_bytes(lines.join("\n").as_bytes()))
}

fn listing(
    fs: &dyn FileSystem,
    ct: &CancelToken,
    dir: &Path,
    rel: &Path,
    out: &mut Vec<String>,
) -> Result<()> {
    for entry in fs.read_dir(ct, dir)? {
        let rel_path = rel.join(&entry.name);
        let info = fs.lstat(ct, &entry.path)?;
        let kind = match info.kind {
            FileKind::File => "file",
            FileKind::Dir => "dir",
            FileKind::Symlink => "symlink",
        };
        out.push(format!(
            "{kind} {} {} {:o}",
            slash_path(&rel_path),
            info.size,
            info.mode
        ));
        if info.kind == FileKind::Dir {
            listing(fs, ct, &entry.path, &rel_path, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    #[test]
    fn known_digests() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn package_hash_is_stable() {
        let fs = MemoryFs::new()
            .with_file("/repo/vim/dot-vimrc", b"set nu")
            .with_file("/repo/vim/colors/x.vim", b"");
        let ct = CancelToken::new();
        let a = package_hash(&fs, &ct, Path::new("/repo/vim")).unwrap();
        let b = package_hash(&fs, &ct, Path::new("/repo/vim")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn package_hash_changes_with_content_size() {
        let ct = CancelToken::new();
        let before = MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"set nu");
        let after = MemoryFs::new().with_file("/repo/vim/dot-vimrc", b"set nu rnu");
        assert_ne!(
            package_hash(&before, &ct, Path::new("/repo/vim")).unwrap(),
            package_hash(&after, &ct, Path::new("/repo/vim")).unwrap()
        );
    }

    #[test]
    fn package_hash_notices_new_files() {
        let ct = CancelToken::new();
        let before = MemoryFs::new().with_file("/repo/vim/a", b"");
        let after = MemoryFs::new()
            .with_file("/repo/vim/a", b"")
            .with_file("/repo/vim/b", b"");
        assert_ne!(
            package_hash(&before, &ct, Path::new("/repo/vim")).unwrap(),
            package_hash(&after, &ct, Path::new("/repo/vim")).unwrap()
        );
    }
}
