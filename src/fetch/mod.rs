// src/fetch/mod.rs
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::model::DocumentDescriptor;

pub mod limiter;
pub mod local;
#[cfg(test)]
pub mod memory;
pub mod sheets;

pub use limiter::RateLimiter;
pub use local::LocalCsvSource;
#[cfg(test)]
pub use memory::MemorySource;
pub use sheets::SheetsSource;

/// Failures reported by a document source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Throttling, server-side and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Inclusive, 1-based row span of a document tab. `end == None` reads to the
/// last populated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl RowRange {
    pub fn single(row: usize) -> Self {
        Self {
            start: row,
            end: Some(row),
        }
    }

    pub fn starting_at(row: usize) -> Self {
        Self {
            start: row,
            end: None,
        }
    }

    /// Zero-based slice bounds for a document of `len` rows.
    pub fn bounds(&self, len: usize) -> (usize, usize) {
        let lo = self.start.saturating_sub(1).min(len);
        let hi = self.end.map_or(len, |e| e.min(len)).max(lo);
        (lo, hi)
    }
}

/// Where input documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<DocumentDescriptor>, FetchError>;

    /// Rows in `range`, every cell rendered as a string.
    async fn fetch_rows(
        &self,
        document: &DocumentDescriptor,
        range: RowRange,
    ) -> Result<Vec<Vec<String>>, FetchError>;
}

/// Retry and pacing policy for outbound source calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Ceiling on a single retry wait.
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// saturating at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

/// `fetch_rows` gated by the shared limiter, retrying retryable failures with
/// exponential backoff. Every attempt passes through the limiter.
pub async fn fetch_rows_with_retry(
    source: &dyn DocumentSource,
    limiter: &RateLimiter,
    policy: RetryPolicy,
    document: &DocumentDescriptor,
    range: RowRange,
) -> Result<Vec<Vec<String>>, FetchError> {
    let mut attempts = 0;
    loop {
        limiter.acquire().await;
        match source.fetch_rows(document, range).await {
            Ok(rows) => {
                debug!(document = %document.name, rows = rows.len(), "fetched rows");
                return Ok(rows);
            }
            Err(e) if e.is_retryable() && attempts < policy.max_retries => {
                attempts += 1;
                let backoff = backoff_delay(policy.base_delay, attempts);
                warn!(
                    document = %document.name,
                    attempt = attempts,
                    delay_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying"
                );
                sleep(backoff).await;
            }
            Err(e) => {
                error!(document = %document.name, attempts = attempts + 1, error = %e, "fetch failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn doc() -> DocumentDescriptor {
        DocumentDescriptor::new("d1", "Texas Sales Tax Research")
    }

    #[test]
    fn retryable_classification() {
        assert!(FetchError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(FetchError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!FetchError::Http { status: 403, body: String::new() }.is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn range_bounds_clamp_to_document() {
        assert_eq!(RowRange::single(4).bounds(10), (3, 4));
        assert_eq!(RowRange::starting_at(5).bounds(10), (4, 10));
        assert_eq!(RowRange::starting_at(20).bounds(10), (10, 10));
        assert_eq!(RowRange { start: 2, end: Some(50) }.bounds(10), (1, 10));
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 33), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn large_retry_budgets_do_not_overflow() {
        let source = MemorySource::new();
        source.add_document("d1", "Texas Sales Tax Research", vec![vec!["a".into()]]);
        source.fail_times("d1", 40, 503);
        let limiter = RateLimiter::new(Duration::ZERO);
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_millis(10),
        };

        let rows = fetch_rows_with_retry(&source, &limiter, policy, &doc(), RowRange::starting_at(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.calls("d1"), 41);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let source = MemorySource::new();
        source.add_document("d1", "Texas Sales Tax Research", vec![vec!["a".into()]]);
        source.fail_times("d1", 2, 503);
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        };

        let rows = fetch_rows_with_retry(&source, &limiter, policy, &doc(), RowRange::starting_at(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(source.calls("d1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let source = Arc::new(MemorySource::new());
        source.add_document("d1", "Texas Sales Tax Research", vec![]);
        source.fail_times("d1", 10, 403);
        let limiter = RateLimiter::new(Duration::ZERO);

        let err = fetch_rows_with_retry(
            source.as_ref(),
            &limiter,
            RetryPolicy::default(),
            &doc(),
            RowRange::starting_at(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Http { status: 403, .. }));
        assert_eq!(source.calls("d1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_give_up_after_limit() {
        let source = MemorySource::new();
        source.add_document("d1", "Texas Sales Tax Research", vec![]);
        source.fail_times("d1", 10, 500);
        let limiter = RateLimiter::new(Duration::ZERO);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };

        assert!(
            fetch_rows_with_retry(&source, &limiter, policy, &doc(), RowRange::starting_at(1))
                .await
                .is_err()
        );
        assert_eq!(source.calls("d1"), 3);
    }
}
