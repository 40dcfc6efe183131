//! Contracts the orchestration core consumes from its collaborators.
//!
//! Storage, the shared cache, processor gateways and notification delivery
//! all live behind these traits. Adapters report failures through the error
//! types defined here; the orchestrator translates them into
//! [`PaymentError`](crate::error::PaymentError) so they never leak further.

use super::ledger::{LedgerEntry, Refund};
use super::money::Amount;
use super::payment::{Metadata, Payment, PaymentId, PaymentStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Card data, bank details or wallet tokens handed to a processor.
pub type PaymentDetails = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("declined: {0}")]
    Declined(String),
    #[error("gateway error: {0}")]
    Gateway(String),
}

#[derive(Error, Debug)]
#[error("notification failed: {0}")]
pub struct NotifierError(pub String);

/// Result of inserting a new payment.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// A live payment already holds the same (merchant, order) pair.
    Existing(Payment),
}

/// Query parameters for listing payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFilter {
    pub client_id: Option<String>,
    pub merchant_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl PaymentFilter {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 100;

    /// Clamps an out-of-range limit back to the default page size.
    pub fn normalized(mut self) -> Self {
        if self.limit == 0 || self.limit > Self::MAX_LIMIT {
            self.limit = Self::DEFAULT_LIMIT;
        }
        self
    }

    pub fn matches(&self, payment: &Payment) -> bool {
        self.client_id
            .as_deref()
            .is_none_or(|c| c == payment.client_id)
            && self
                .merchant_id
                .as_deref()
                .is_none_or(|m| m == payment.merchant_id)
            && self.status.is_none_or(|s| s == payment.status)
    }
}

impl Default for PaymentFilter {
    fn default() -> Self {
        Self {
            client_id: None,
            merchant_id: None,
            status: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Durable storage for payments.
///
/// Implementations must enforce that at most one non-cancelled payment exists
/// per (merchant, order) pair; `create` reports the survivor instead of
/// inserting a second one.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: &Payment) -> Result<CreateOutcome, RepositoryError>;
    async fn get_by_id(&self, id: PaymentId) -> Result<Option<Payment>, RepositoryError>;
    /// Returns the live (non-cancelled) payment for the pair, if any.
    async fn get_by_merchant_and_order(
        &self,
        merchant_id: &str,
        order_id: &str,
    ) -> Result<Option<Payment>, RepositoryError>;
    async fn update(&self, payment: &Payment) -> Result<(), RepositoryError>;
    /// Newest first, paged by `filter.offset` / `filter.limit`.
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, RepositoryError>;
}

/// Append-only history of payments and their refunds.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), RepositoryError>;
    /// Entries in the order they were appended.
    async fn entries(&self, payment_id: PaymentId) -> Result<Vec<LedgerEntry>, RepositoryError>;
    async fn record_refund(&self, refund: &Refund) -> Result<(), RepositoryError>;
    async fn refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, RepositoryError>;
}

/// Outcome of one fixed-window admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { count: u64 },
    Limited { retry_after: Duration },
}

/// Shared remote cache reachable from every service instance.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Counts one request for `key` in the current fixed window.
    ///
    /// The counter key is `(key, floor(now / window))`. The increment is
    /// atomic and the first increment of a window sets the key's expiry to
    /// `window`. Once the count exceeds `limit` the remaining TTL of the
    /// window key is returned as the retry interval.
    async fn is_rate_limited(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<RateLimitDecision, CacheError>;
}

/// Cross-instance mutual exclusion backed by the shared cache.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Atomic test-and-set. Returns `false` if someone else holds `key`.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
    /// Idempotent: releasing a missing lock succeeds.
    async fn release_lock(&self, key: &str) -> Result<(), CacheError>;
    /// Pushes the expiry of a held lock out to `ttl` from now. Returns `false`
    /// if the lock had already expired.
    async fn extend_lock(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
}

/// Successful charge as reported by a processor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessorReceipt {
    pub processor_ref: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundReceipt {
    pub refund_ref: String,
}

/// Adapter for an external card network or bank gateway.
///
/// Each call is exactly one attempt; adapters must not retry internally.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        payment: &Payment,
        details: &PaymentDetails,
    ) -> Result<ProcessorReceipt, ProcessorError>;

    async fn refund(
        &self,
        payment: &Payment,
        amount: Amount,
        reason: &str,
    ) -> Result<RefundReceipt, ProcessorError>;
}

/// Best-effort delivery of status changes to interested parties.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_status_change(&self, payment: &Payment) -> Result<(), NotifierError>;
}

pub type PaymentRepositoryRef = Arc<dyn PaymentRepository>;
pub type LedgerRepositoryRef = Arc<dyn LedgerRepository>;
pub type CacheRef = Arc<dyn Cache>;
pub type DistributedLockRef = Arc<dyn DistributedLock>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type NotifierRef = Arc<dyn Notifier>;
