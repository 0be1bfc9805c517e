//! Dotfile name translation: `dot-vimrc` in a package becomes `.vimrc` in the
//! target directory, and back again when adopting.
use std::path::{Component, Path, PathBuf};

/// Default prefix marking hidden targets.
pub const DEFAULT_PREFIX: &str = "dot-";

/// Bidirectional mapping between package names and target names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTranslator {
    prefix: String,
    enabled: bool,
}

impl Default for NameTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, true)
    }
}

impl NameTranslator {
    /// Create a translator for `prefix`; a disabled translator is the identity.
    #[must_use]
    pub fn new(prefix: impl Into<String>, enabled: bool) -> Self {
        let prefix = prefix.into();
        let enabled = enabled && !prefix.is_empty();
        Self { prefix, enabled }
    }

    /// Package-side name to target-side name.
    #[must_use]
    pub fn translate(&self, name: &str) -> String {
        if !self.enabled {
            return name.to_string();
        }
        match name.strip_prefix(&self.prefix) {
            Some(rest) if !rest.is_empty() => format!(".{rest}"),
            _ => name.to_string(),
        }
    }

    /// Target-side name to package-side name.
    #[must_use]
    pub fn untranslate(&self, name: &str) -> String {
        if !self.enabled || name == "." || name == ".." {
            return name.to_string();
        }
        match name.strip_prefix('.') {
            Some(rest) if !rest.is_empty() => format!("{}{rest}", self.prefix),
            _ => name.to_string(),
        }
    }

    /// `true` when [`translate`](Self::translate) would rename `name`.
    #[must_use]
    pub fn needs_translation(&self, name: &str) -> bool {
        self.translate(name) != name
    }

    /// Translate every component of a relative path.
    #[must_use]
    pub fn translate_path(&self, rel: &Path) -> PathBuf {
        map_components(rel, |n| self.translate(n))
    }

    /// Untranslate every component of a relative path.
    #[must_use]
    pub fn untranslate_path(&self, rel: &Path) -> PathBuf {
        map_components(rel, |n| self.untranslate(n))
    }
}

fn map_components(rel: &Path, f: impl Fn(&str) -> String) -> PathBuf {
    rel.components()
        .map(|c| match c {
            Component::Normal(name) => PathBuf::from(f(&name.to_string_lossy())),
            other => PathBuf::from(other.as_os_str()),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn translates_prefixed_names() {
        let t = NameTranslator::default();
        assert_eq!(t.translate("dot-foo"), ".foo");
        assert_eq!(t.translate("dot-foo.bar"), ".foo.bar");
        assert_eq!(t.translate("README"), "README");
        assert_eq!(t.translate("dot-"), "dot-");
    }

    #[test]
    fn untranslates_hidden_names() {
        let t = NameTranslator::default();
        assert_eq!(t.untranslate(".ssh"), "dot-ssh");
        assert_eq!(t.untranslate("bin"), "bin");
        assert_eq!(t.untranslate(".."), "..");
    }

    #[test]
    fn round_trip_is_identity_on_prefixed_names() {
        let t = NameTranslator::default();
        for name in ["dot-vimrc", "dot-config", "dot-a.b.c"] {
            assert_eq!(t.untranslate(&t.translate(name)), name);
        }
        for name in [".vimrc", ".config"] {
            assert_eq!(t.translate(&t.untranslate(name)), name);
        }
    }

    #[test]
    fn paths_translate_per_component() {
        let t = NameTranslator::default();
        assert_eq!(
            t.translate_path(Path::new("dot-config/nvim/dot-init.vim")),
            PathBuf::from(".config/nvim/.init.vim")
        );
        assert_eq!(
            t.untranslate_path(Path::new(".config/nvim/init.vim")),
            PathBuf::from("dot-config/nvim/init.vim")
        );
    }

    #[test]
    fn disabled_translator_is_identity() {
        let t = NameTranslator::new("dot-", false);
        assert_eq!(t.translate("dot-foo"), "dot-foo");
        assert_eq!(t.untranslate(".foo"), ".foo");
        assert!(!t.needs_translation("dot-foo"));
    }

    #[test]
    fn custom_prefix() {
        let t = NameTranslator::new("_", true);
        assert_eq!(t.translate("_bashrc"), ".bashrc");
        assert_eq!(t.untranslate(".bashrc"), "_bashrc");
    }
}
