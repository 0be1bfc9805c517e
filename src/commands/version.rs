//! Command: print version information.

/// Version string: `DOT_VERSION` from the build, else the crate version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("DOT_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Print the version to stdout.
pub fn run() {
    super::output::print_text(&format!("dot {}\n", version()));
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
