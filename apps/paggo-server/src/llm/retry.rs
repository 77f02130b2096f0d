//! Retry with exponential backoff for LLM calls

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use super::LlmError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: usize,
    /// Delay before the first retry, doubled on each further one (milliseconds)
    pub base_delay_ms: u64,
    /// Upper bound for a single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay_ms: 600,
            max_delay_ms: 3_000,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_max_times(self.retries)
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(2.0)
    }
}

/// Run `call`, retrying transient failures under `policy`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    call: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    call.retry(policy.backoff())
        .when(|e: &LlmError| e.is_transient())
        .notify(|err: &LlmError, dur: Duration| {
            tracing::warn!("{} failed, retrying in {:?}: {}", operation, dur, err);
        })
        .await
}
