use super::bounded;
use crate::domain::ports::{CacheRef, RateLimitDecision};
use crate::error::{PaymentError, Result};
use std::time::Duration;
use tracing::{error, warn};

/// Fixed-window admission control over the shared cache.
///
/// Each check is one atomic increment of the counter for
/// `(subject, floor(now / window))`. Two adjacent windows can together admit
/// up to twice the limit around the boundary; that is accepted for coarse
/// admission control and is not a sliding log.
///
/// A cache failure rejects the request (fail closed).
#[derive(Clone)]
pub struct RateLimiter {
    cache: CacheRef,
    limit: u64,
    window: Duration,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(cache: CacheRef, limit: u64, window: Duration, timeout: Duration) -> Self {
        Self {
            cache,
            limit,
            window,
            timeout,
        }
    }

    pub fn key(subject: &str) -> String {
        format!("rate_limit:{subject}")
    }

    pub async fn check(&self, subject: &str) -> Result<()> {
        let key = Self::key(subject);
        let decision = bounded(
            self.timeout,
            self.cache.is_rate_limited(&key, self.limit, self.window),
        )
        .await
        .map_err(|e| {
            error!(subject, error = %e, "rate limit check failed, rejecting request");
            PaymentError::internal(e)
        })?;

        match decision {
            RateLimitDecision::Allowed { .. } => Ok(()),
            RateLimitDecision::Limited { retry_after } => {
                warn!(
                    subject,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit exceeded"
                );
                Err(PaymentError::RateLimited {
                    retry_after: retry_after.max(Duration::from_millis(1)),
                })
            }
        }
    }
}
