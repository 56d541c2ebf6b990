//! Bounded retry with capped exponential backoff for transient storage errors.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::{GatewayFuture, SourceFile, StorageGateway};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter:
    /// `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff plus up to 25% random jitter, still capped at `max_delay`.
    fn jittered(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let jitter_ms = (delay.as_millis() / 4) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        (delay + Duration::from_millis(jitter)).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is exhausted. Returns the last error in the latter cases.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.jittered(attempt);
                    warn!(
                        "[RETRY] {} failed (attempt {}/{}): {}; retrying in {}ms",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetryingGateway
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a gateway so every call retries `TransientStorage` failures.
/// Permission and not-found errors pass through on the first occurrence.
#[derive(Debug, Clone)]
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: StorageGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: StorageGateway> StorageGateway for RetryingGateway<G> {
    fn list<'a>(&'a self, folder: &'a str) -> GatewayFuture<'a, Vec<SourceFile>> {
        Box::pin(self.policy.run("list", move || self.inner.list(folder)))
    }

    fn read<'a>(&'a self, file: &'a SourceFile) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(self.policy.run("read", move || self.inner.read(file)))
    }

    fn write<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> GatewayFuture<'a, String> {
        Box::pin(self.policy.run("write", move || {
            self.inner.write(folder, name, bytes.clone())
        }))
    }

    fn move_entry<'a>(
        &'a self,
        id: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(self.policy.run("move", move || self.inner.move_entry(id, from, to)))
    }

    fn find<'a>(&'a self, folder: &'a str, name: &'a str) -> GatewayFuture<'a, Option<SourceFile>> {
        Box::pin(self.policy.run("find", move || self.inner.find(folder, name)))
    }
}
