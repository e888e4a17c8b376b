//! Bounded exponential backoff for provider calls.
//!
//! Only transient failures (`UpstreamTimeout`, `UpstreamUnavailable`) are
//! retried. The caller's [`QueryContext`] is honoured throughout: a
//! cancellation drops the in-flight request future (aborting the HTTP call)
//! and interrupts any backoff sleep, and an expired deadline ends the query
//! with `UpstreamTimeout`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{BirdingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): 500ms, 1s, 2s, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .checked_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Per-query cancellation signal and optional deadline.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Runs `fut` unless the query is cancelled or its deadline passes first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BirdingError::Cancelled),
            _ = deadline => Err(BirdingError::UpstreamTimeout {
                detail: "query deadline exceeded".to_string(),
            }),
            result = fut => result,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or runs out of retries.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &QueryContext,
    label: &str,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match ctx.guard(op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry < policy.max_retries && !ctx.is_expired() => {
                retry += 1;
                let delay = policy.backoff(retry);
                tracing::warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    label,
                    e,
                    retry,
                    policy.max_retries,
                    delay
                );
                ctx.guard(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!("{} failed after {} retries: {}", label, retry, e);
                }
                return Err(e);
            }
        }
    }
}
