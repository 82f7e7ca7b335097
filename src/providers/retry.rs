use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_retry2::{
    strategy::{jitter, ExponentialBackoff},
    Retry, RetryError,
};
use tokio::time;
use tracing::warn;

use crate::{
    providers::LLMProvider,
    types::{CompletionRequest, CompletionResponse},
    LLMError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Limit on a single attempt. An attempt that runs over fails with
    /// [`LLMError::Timeout`], which is retried like any transient error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_attempt_timeout_ms(mut self, ms: u64) -> Self {
        self.attempt_timeout_ms = Some(ms);
        self
    }

    /// Longest a call can take when every attempt runs to `attempt` and
    /// every backoff sleeps its full, unjittered delay.
    pub fn budget(&self, attempt: Duration) -> Duration {
        let attempts = u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        let backoff: Duration = self.backoff().sum();
        attempt.saturating_mul(attempts).saturating_add(backoff)
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.initial_backoff_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_backoff_ms.max(1)))
            .take(self.max_retries)
    }

    /// Delays between attempts: `initial`, `2 * initial`, `4 * initial`, ...
    /// capped at `max_backoff_ms`, each scaled by random jitter.
    fn delays(&self) -> impl Iterator<Item = Duration> {
        self.backoff().map(jitter)
    }
}

/// Wraps a provider and retries transient failures with exponential backoff.
///
/// Permanent failures (auth, bad request, missing key) are returned after the
/// first attempt.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: LLMProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn attempt(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self.policy.attempt_timeout_ms {
            Some(ms) => time::timeout(Duration::from_millis(ms), self.inner.complete(request))
                .await
                .unwrap_or(Err(LLMError::Timeout)),
            None => self.inner.complete(request).await,
        }
    }
}

#[async_trait]
impl<P: LLMProvider> LLMProvider for RetryingProvider<P> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        if self.policy.max_retries == 0 {
            return self.attempt(request).await;
        }

        let provider = self.inner.name();

        Retry::spawn(self.policy.delays(), || {
            let request = request.clone();
            async move {
                match self.attempt(request).await {
                    Ok(response) => Ok(response),
                    Err(err) if err.is_retryable() => {
                        warn!(provider, error = %err, "transient provider error, will retry");
                        Err(RetryError::Transient {
                            err,
                            retry_after: None,
                        })
                    }
                    Err(err) => {
                        warn!(provider, error = %err, "permanent provider error, failing immediately");
                        Err(RetryError::Permanent(err))
                    }
                }
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
