//! Bounded exponential-backoff execution of fallible async operations.

use crate::config::RetryConfig;
use backon::{ExponentialBuilder, Retryable};
use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
};
use thiserror::Error;

/// Every attempt failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {source}")]
pub struct RetryError<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Error of the last attempt.
    #[source]
    pub source: E,
}

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `on_error` observes every failure together with its 1-based attempt number. The delay before
/// retry `n` is `base_delay * 2^(n-1)`, capped at `max_delay`.
pub async fn retry<T, E, F, Fut, N>(
    policy: &RetryConfig,
    mut op: F,
    on_error: N,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: Fn(&E, u32),
{
    let attempts = AtomicU32::new(0);
    let backoff = ExponentialBuilder::default()
        .with_min_delay(policy.base_delay())
        .with_max_delay(policy.max_delay())
        .with_factor(2.0)
        .with_max_times(policy.max_attempts.saturating_sub(1) as usize);

    let attempt = || {
        let fut = op();
        let attempts = &attempts;
        let on_error = &on_error;
        async move {
            fut.await.inspect_err(|err| {
                let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                on_error(err, n);
            })
        }
    };

    attempt
        .retry(backoff)
        .await
        .map_err(|source| RetryError { attempts: attempts.load(Ordering::Relaxed), source })
}
