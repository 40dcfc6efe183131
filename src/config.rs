use crate::error::{PaymentError, Result};
use std::time::Duration;

/// Tunables for the orchestration core.
///
/// `lock_ttl` bounds how long a crashed instance can leave a payment in
/// `Processing`; it must stay above `processor_timeout` so a live holder never
/// loses its lock mid-call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub lock_ttl: Duration,
    pub lock_heartbeat: Duration,
    pub processor_timeout: Duration,
    /// Admissions per subject per window.
    pub rate_limit: u64,
    pub rate_limit_window: Duration,
    /// Upper bound on every remote cache call.
    pub cache_timeout: Duration,
    pub read_cache_ttl: Duration,
    /// Recorded on every ledger entry written by this instance.
    pub actor: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_heartbeat: Duration::from_secs(10),
            processor_timeout: Duration::from_secs(20),
            rate_limit: 100,
            rate_limit_window: Duration::from_secs(1),
            cache_timeout: Duration::from_millis(250),
            read_cache_ttl: Duration::from_secs(30),
            actor: "payflow".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lock_ttl", self.lock_ttl),
            ("lock_heartbeat", self.lock_heartbeat),
            ("processor_timeout", self.processor_timeout),
            ("rate_limit_window", self.rate_limit_window),
            ("cache_timeout", self.cache_timeout),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, d)| d.is_zero()) {
            return Err(PaymentError::validation(format!("{name} must be positive")));
        }
        if self.rate_limit == 0 {
            return Err(PaymentError::validation("rate_limit must be positive"));
        }
        if self.processor_timeout >= self.lock_ttl {
            return Err(PaymentError::validation(
                "processor_timeout must be shorter than lock_ttl",
            ));
        }
        if self.lock_heartbeat >= self.lock_ttl {
            return Err(PaymentError::validation(
                "lock_heartbeat must be shorter than lock_ttl",
            ));
        }
        if self.actor.trim().is_empty() {
            return Err(PaymentError::validation("actor must not be empty"));
        }
        Ok(())
    }
}
