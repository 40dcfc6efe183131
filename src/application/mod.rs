//! Application layer containing the payment orchestration logic.
//!
//! `PaymentOrchestrator` is the entry point consumed by transport layers. It
//! composes the processor router, the fixed-window rate limiter and the
//! distributed payment lock around the domain state machine. The service is
//! meant to run as many stateless replicas, so every piece of shared mutable
//! state lives behind the repository and cache ports.

pub mod lock;
pub mod orchestrator;
pub mod rate_limit;
pub mod router;

use crate::domain::ports::CacheError;
use std::future::Future;
use std::time::Duration;

/// Runs a remote cache call with an upper bound on its latency.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Timeout(limit)),
    }
}
