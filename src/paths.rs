//! Typed absolute paths.
//!
//! [`PackagePath`], [`TargetPath`] and [`FilePath`] wrap a [`PathBuf`] that
//! is guaranteed absolute and clean (no `.` or `..` components). The types
//! are deliberately distinct so a package source can never be passed where a
//! target location is expected.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DotError, Result};

/// Check that `path` is absolute and contains no `.`/`..` components.
///
/// # Errors
///
/// Returns [`DotError::InvalidPath`] describing the first problem found.
pub fn validate_absolute(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(invalid(path, "path must be absolute"));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid(path, "path contains '..'"));
    }
    // `components()` folds away interior `.` segments, so look at the raw text.
    let raw = path.to_string_lossy();
    if raw.split('/').any(|segment| segment == ".") {
        return Err(invalid(path, "path contains '.'"));
    }
    if raw.len() > 1 && (raw.ends_with('/') || raw.contains("//")) {
        return Err(invalid(path, "path is not clean"));
    }
    Ok(())
}

/// Check that `rel` is a relative path made of normal components only.
///
/// # Errors
///
/// Returns [`DotError::InvalidPath`] when `rel` is absolute, empty or
/// contains `.`/`..`.
pub fn validate_relative(rel: &Path) -> Result<()> {
    if rel.as_os_str().is_empty() {
        return Err(invalid(rel, "relative path is empty"));
    }
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(invalid(rel, "relative path must not escape its root"));
    }
    Ok(())
}

fn invalid(path: &Path, reason: &str) -> DotError {
    DotError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Lexically normalise `path`: drop `.` components and resolve `..` against
/// the preceding component. Never touches the filesystem.
#[must_use]
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Resolve the raw contents of a symlink located at `link` into an absolute,
/// cleaned path.
#[must_use]
pub fn resolve_link(link: &Path, contents: &Path) -> PathBuf {
    if contents.is_absolute() {
        clean(contents)
    } else {
        let base = link.parent().unwrap_or_else(|| Path::new("/"));
        clean(&base.join(contents))
    }
}

/// Compute the relative path that leads from directory `from_dir` to `to`.
///
/// Both inputs must be absolute and clean.
#[must_use]
pub fn relative_link(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let dest: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(dest.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in dest.iter().skip(common) {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Path of `path` relative to `root`, if `path` lies beneath it.
#[must_use]
pub fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Render a relative path with `/` separators regardless of platform.
#[must_use]
pub fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

macro_rules! typed_path {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "PathBuf", into = "PathBuf")]
        pub struct $name(PathBuf);

        impl $name {
            /// Validate and wrap `path`.
            ///
            /// # Errors
            ///
            /// Returns [`DotError::InvalidPath`] when `path` is relative or
            /// not clean.
            pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
                let path = path.into();
                validate_absolute(&path)?;
                Ok(Self(path))
            }

            /// Append a clean relative path.
            ///
            /// # Errors
            ///
            /// Returns [`DotError::InvalidPath`] when `rel` is absolute or
            /// tries to escape with `..`.
            pub fn join(&self, rel: impl AsRef<Path>) -> Result<Self> {
                let rel = rel.as_ref();
                validate_relative(rel)?;
                Ok(Self(self.0.join(rel)))
            }

            /// Parent directory, or `None` at the filesystem root.
            #[must_use]
            pub fn parent(&self) -> Option<Self> {
                self.0.parent().map(|p| Self(p.to_path_buf()))
            }

            /// Borrow the inner path.
            #[must_use]
            pub fn as_path(&self) -> &Path {
                &self.0
            }

            /// Final component as a lossy string.
            #[must_use]
            pub fn file_name(&self) -> Option<String> {
                self.0.file_name().map(|n| n.to_string_lossy().into_owned())
            }

            /// `true` when this path is `root` or lies beneath it.
            #[must_use]
            pub fn starts_with(&self, root: impl AsRef<Path>) -> bool {
                self.0.starts_with(root)
            }

            /// Re-type as a generic [`FilePath`].
            #[must_use]
            pub fn to_file_path(&self) -> FilePath {
                FilePath(self.0.clone())
            }

            /// Unwrap into the inner [`PathBuf`].
            #[must_use]
            pub fn into_path_buf(self) -> PathBuf {
                self.0
            }
        }

        impl AsRef<Path> for $name {
            fn as_ref(&self) -> &Path {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.display())
            }
        }

        impl TryFrom<PathBuf> for $name {
            type Error = DotError;

            fn try_from(path: PathBuf) -> Result<Self> {
                Self::new(path)
            }
        }

        impl From<$name> for PathBuf {
            fn from(path: $name) -> Self {
                path.0
            }
        }
    };
}

typed_path!(
    /// A path inside the package directory.
    PackagePath
);
typed_path!(
    /// A path inside the target directory.
    TargetPath
);
typed_path!(
    /// Any other absolute path (backups, staging, adoption destinations).
    FilePath
);

impl FilePath {
    /// Re-type as a [`TargetPath`].
    #[must_use]
    pub fn to_target_path(&self) -> TargetPath {
        TargetPath(self.0.clone())
    }

    /// Re-type as a [`PackagePath`].
    #[must_use]
    pub fn to_package_path(&self) -> PackagePath {
        PackagePath(self.0.clone())
    }
}
