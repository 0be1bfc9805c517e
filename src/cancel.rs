//! Cooperative cancellation.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{DotError, Result};

/// Shared cancellation flag with an optional deadline.
///
/// Cloning is cheap and every clone observes the same flag. Long-running
/// loops call [`CancelToken::check`] on each iteration; every filesystem
/// call does so before touching the disk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a token that is never cancelled until [`cancel`](Self::cancel)
    /// is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that also expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Signal cancellation to every clone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// `true` once cancelled or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return [`DotError::Cancelled`] if the token has fired.
    ///
    /// # Errors
    ///
    /// Returns [`DotError::Cancelled`] after [`cancel`](Self::cancel) or
    /// once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DotError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_live() {
        let ct = CancelToken::new();
        assert!(!ct.is_cancelled());
        assert!(ct.check().is_ok());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let ct = CancelToken::new();
        let clone = ct.clone();
        clone.cancel();
        assert!(ct.is_cancelled());
        assert!(matches!(ct.check(), Err(DotError::Cancelled)));
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let ct = CancelToken::with_timeout(Duration::ZERO);
        assert!(ct.is_cancelled());
    }
}
