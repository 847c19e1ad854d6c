use std::{future::Future, io, time::Duration};

use anyhow::Result;
use backoff::{backoff::Backoff, future::retry_notify};
use octocrab::GitHubError;
use runlens_core::config::RetryConfig;

/// Linear backoff: attempt `n` waits `delay * n` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { retries: 3, delay: Duration::from_millis(1000) } }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self { retries: config.retries, delay: Duration::from_millis(config.delay_ms) }
    }
}

const RETRYABLE_MESSAGES: &[&str] =
    &["econnreset", "connection reset", "timed out", "timeout", "network error", "dns error"];

/// Whether `err` looks like a transient transport failure.
///
/// Authentication failures and other 4xx responses are never retried.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = e.status() {
                return status.is_server_error() || status.as_u16() == 429;
            }
            if e.is_timeout() || e.is_connect() {
                return true;
            }
        }
        if let Some(octocrab::Error::GitHub { source, .. }) = cause.downcast_ref::<octocrab::Error>()
        {
            let GitHubError { status_code, .. } = source.as_ref();
            return status_code.is_server_error() || status_code.as_u16() == 429;
        }
        if let Some(e) = cause.downcast_ref::<io::Error>()
            && matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
    }
    let message = format!("{err:#}").to_lowercase();
    RETRYABLE_MESSAGES.iter().any(|m| message.contains(m))
}

/// Linear schedule for [`retry_notify`]: retry `n` waits `delay * n`, at most `retries` times.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(policy: RetryPolicy) -> Self { Self { policy, attempt: 0 } }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) { self.attempt = 0; }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.retries {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay * self.attempt)
    }
}

/// Call `f` until it succeeds, fails with a non-retryable error, or runs out of retries.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    retry_notify(
        LinearBackoff::new(policy),
        || {
            let fut = f();
            async move {
                fut.await.map_err(|e| {
                    if is_retryable(&e) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        },
        |e: anyhow::Error, delay: Duration| {
            attempt += 1;
            tracing::warn!(
                "{} failed, retrying in {}ms (attempt {}/{}): {:#}",
                label,
                delay.as_millis(),
                attempt,
                policy.retries,
                e
            );
        },
    )
    .await
}
