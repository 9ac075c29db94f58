//! Retrying transient store failures with exponential backoff.

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::StoreError;

/// Tracks attempts of one store operation.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    /// Start tracking a fresh operation.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 1,
        }
    }

    /// Decide whether to retry after `err`, sleeping first if so.
    ///
    /// Returns false for non-transient errors and once the attempt budget is
    /// spent.
    pub async fn retry(&mut self, err: &StoreError, operation: &str) -> bool {
        if !err.is_transient() || self.attempts >= self.policy.max_attempts {
            return false;
        }

        let delay = self.policy.backoff(self.attempts);
        warn!(
            "Transient failure while {operation} (attempt {}/{}): {err}; retrying in {delay:?}",
            self.attempts, self.policy.max_attempts
        );
        tokio::time::sleep(delay).await;
        self.attempts += 1;
        true
    }

    /// Attempts made so far, including the first.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
