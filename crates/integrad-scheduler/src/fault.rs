//! Process-wide fatal fault signal.
//!
//! Background paths (dispatch, finish, log flush) cannot return errors to a
//! caller. When their store writes keep failing they raise the fault, and the
//! server answers with an orderly shutdown and a non-zero exit.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Debug, Clone, Default)]
pub struct Fault {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Fault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the fault. Only the first reason is kept.
    pub fn raise(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.reason.set(reason.clone()).is_ok() {
            error!(reason = %reason, "Fatal fault raised");
        }
        self.token.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the fault has been raised.
    pub async fn raised(&self) {
        self.token.cancelled().await;
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let fault = Fault::new();
        assert!(!fault.is_raised());
        assert_eq!(fault.reason(), None);

        let watcher = fault.clone();
        let waiting = tokio::spawn(async move { watcher.raised().await });

        fault.raise("store unavailable");
        fault.raise("something else");
        waiting.await.unwrap();

        assert!(fault.is_raised());
        assert_eq!(fault.reason(), Some("store unavailable"));
    }
}
