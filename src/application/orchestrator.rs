use super::bounded;
use super::lock::{HeldLock, PaymentLock};
use super::rate_limit::RateLimiter;
use super::router::ProcessorRouter;
use crate::config::OrchestratorConfig;
use crate::domain::ledger::{LedgerEntry, Refund, refunded_total};
use crate::domain::money::{Amount, Currency, PaymentMethod};
use crate::domain::payment::{Metadata, NewPayment, Payment, PaymentId, Transition};
use crate::domain::ports::{
    CacheRef, CreateOutcome, DistributedLockRef, LedgerRepositoryRef, NotifierRef, PaymentDetails,
    PaymentFilter, PaymentRepositoryRef, RepositoryError,
};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Input of [`PaymentOrchestrator::create_payment`].
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub client_id: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub description: String,
    pub metadata: Metadata,
}

impl CreatePaymentRequest {
    fn validate(self) -> Result<NewPayment> {
        let required = [
            ("client_id", &self.client_id),
            ("merchant_id", &self.merchant_id),
            ("order_id", &self.order_id),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(PaymentError::validation(format!("{field} is required")));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(PaymentError::validation(format!(
                "Description exceeds {MAX_DESCRIPTION_CHARS} characters"
            )));
        }
        Ok(NewPayment {
            amount: Amount::new(self.amount)?,
            client_id: self.client_id,
            merchant_id: self.merchant_id,
            order_id: self.order_id,
            currency: self.currency,
            method: self.method,
            description: self.description,
            metadata: self.metadata,
        })
    }
}

/// Audit trail of one payment.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentHistory {
    pub entries: Vec<LedgerEntry>,
    pub refunds: Vec<Refund>,
}

pub fn payment_cache_key(id: PaymentId) -> String {
    format!("payment:{id}")
}

fn rate_limit_subject(payment: &Payment) -> String {
    format!("{}:{}", payment.merchant_id, payment.client_id)
}

fn storage_error(err: RepositoryError) -> PaymentError {
    error!(error = %err, "storage call failed");
    PaymentError::internal(err)
}

/// The entry point consumed by transport layers.
///
/// `PaymentOrchestrator` owns no mutable state of its own. Every instance in a
/// cluster shares the repositories and the cache, and the payment lock is the
/// only thing that serializes work on a single payment. Processing, refunds
/// and cancellation all run under that lock; reads never take it.
pub struct PaymentOrchestrator {
    config: OrchestratorConfig,
    payments: PaymentRepositoryRef,
    ledger: LedgerRepositoryRef,
    cache: CacheRef,
    router: ProcessorRouter,
    notifier: NotifierRef,
    rate_limiter: RateLimiter,
    lock: PaymentLock,
}

impl PaymentOrchestrator {
    /// Creates a new `PaymentOrchestrator`.
    ///
    /// # Arguments
    ///
    /// * `config` - Timeouts and limits, validated here.
    /// * `payments` - The payment store.
    /// * `ledger` - The append-only history store.
    /// * `cache` - Shared cache used for rate limiting and read-through reads.
    /// * `lock` - Shared lock service, usually the same backend as `cache`.
    /// * `router` - Processor registry, fixed for the lifetime of the service.
    /// * `notifier` - Best-effort status-change delivery.
    pub fn new(
        config: OrchestratorConfig,
        payments: PaymentRepositoryRef,
        ledger: LedgerRepositoryRef,
        cache: CacheRef,
        lock: DistributedLockRef,
        router: ProcessorRouter,
        notifier: NotifierRef,
    ) -> Result<Self> {
        config.validate()?;
        let rate_limiter = RateLimiter::new(
            cache.clone(),
            config.rate_limit,
            config.rate_limit_window,
            config.cache_timeout,
        );
        let lock = PaymentLock::new(
            lock,
            config.lock_ttl,
            config.lock_heartbeat,
            config.cache_timeout,
        );
        Ok(Self {
            config,
            payments,
            ledger,
            cache,
            router,
            notifier,
            rate_limiter,
            lock,
        })
    }

    /// Opens a `Pending` payment, or returns the live payment that already
    /// holds the same (merchant, order) pair.
    #[instrument(
        skip_all,
        fields(merchant_id = %request.merchant_id, order_id = %request.order_id)
    )]
    pub async fn create_payment(&self, request: CreatePaymentRequest) -> Result<Payment> {
        let new = request.validate()?;

        if let Some(existing) = self
            .payments
            .get_by_merchant_and_order(&new.merchant_id, &new.order_id)
            .await
            .map_err(storage_error)?
        {
            info!(payment_id = %existing.id, "duplicate create resolved to existing payment");
            return Ok(existing);
        }

        let payment = Payment::new(new);
        match self.payments.create(&payment).await.map_err(storage_error)? {
            // Lost a race with a concurrent create for the same order.
            CreateOutcome::Existing(existing) => {
                info!(payment_id = %existing.id, "duplicate create resolved to existing payment");
                Ok(existing)
            }
            CreateOutcome::Created => {
                self.append(payment.id, payment.creation()).await?;
                info!(
                    payment_id = %payment.id,
                    amount = %payment.amount,
                    currency = %payment.currency,
                    method = %payment.method,
                    "payment created"
                );
                self.notify(&payment);
                Ok(payment)
            }
        }
    }

    /// Charges a `Pending` payment through its method's processor.
    ///
    /// Exactly one external call is made per successful lock acquisition. A
    /// processor failure or timeout leaves the payment `Failed` and is
    /// returned as `ExternalProcessorError`.
    #[instrument(skip_all, fields(payment_id = %id))]
    pub async fn process_payment(&self, id: PaymentId, details: PaymentDetails) -> Result<Payment> {
        let payment = self.load(id).await?;
        payment.ensure_processable()?;
        self.router.resolve(payment.method)?;
        self.rate_limiter.check(&rate_limit_subject(&payment)).await?;

        let held = self.lock.acquire(id).await?;
        let outcome = self.process_locked(&held, id, &details).await;
        held.release().await;
        outcome
    }

    async fn process_locked(
        &self,
        held: &HeldLock,
        id: PaymentId,
        details: &PaymentDetails,
    ) -> Result<Payment> {
        // The copy loaded before locking may be stale.
        let mut payment = self.load(id).await?;
        payment.ensure_processable()?;

        let transition = payment.mark_processing()?;
        self.payments.update(&payment).await.map_err(storage_error)?;
        self.append(id, transition).await?;
        self.invalidate(id).await;

        let call = tokio::time::timeout(
            self.config.processor_timeout,
            self.router.process(&payment, details),
        );
        let verdict = match held.run(call).await {
            Ok(Ok(Ok(receipt))) => Ok(receipt),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("processor timed out".to_string()),
        };

        let (transition, result) = match verdict {
            Ok(receipt) => match payment.mark_completed(receipt.processor_ref) {
                Ok(transition) => {
                    payment.metadata.extend(receipt.metadata);
                    (transition, Ok(()))
                }
                Err(e) => {
                    let reason = format!("invalid processor response: {e}");
                    (payment.mark_failed(&reason)?, Err(reason))
                }
            },
            Err(reason) => (payment.mark_failed(&reason)?, Err(reason)),
        };

        self.payments.update(&payment).await.map_err(storage_error)?;
        self.append(id, transition).await?;
        self.invalidate(id).await;
        self.notify(&payment);

        match result {
            Ok(()) => {
                info!(
                    processor_ref = payment.processor_ref.as_deref().unwrap_or_default(),
                    "payment completed"
                );
                Ok(payment)
            }
            Err(reason) => {
                warn!(%reason, "payment failed");
                Err(PaymentError::ExternalProcessorError(reason))
            }
        }
    }

    /// Refunds part or all of a `Completed` or `PartiallyRefunded` payment.
    ///
    /// A processor failure is recorded as a failed refund attempt and leaves
    /// the payment unchanged.
    #[instrument(skip_all, fields(payment_id = %id, %amount))]
    pub async fn refund_payment(
        &self,
        id: PaymentId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Payment> {
        let amount = Amount::new(amount)?;
        let payment = self.load(id).await?;
        payment.ensure_refundable(amount)?;
        self.router.resolve(payment.method)?;
        self.rate_limiter.check(&rate_limit_subject(&payment)).await?;

        let held = self.lock.acquire(id).await?;
        let outcome = self.refund_locked(&held, id, amount, reason).await;
        held.release().await;
        outcome
    }

    async fn refund_locked(
        &self,
        held: &HeldLock,
        id: PaymentId,
        amount: Amount,
        reason: &str,
    ) -> Result<Payment> {
        let mut payment = self.load(id).await?;

        // Succeeded refunds in the ledger are authoritative. They disagree with
        // the payment only when an earlier payment write was lost.
        let refunds = self.ledger.refunds(id).await.map_err(storage_error)?;
        let recorded = refunded_total(&refunds);
        if recorded != payment.refunded_amount {
            warn!(
                %recorded,
                stored = %payment.refunded_amount,
                "refunded amount out of step with ledger, using ledger total"
            );
            payment.refunded_amount = recorded;
        }
        payment.ensure_refundable(amount)?;

        let call = tokio::time::timeout(
            self.config.processor_timeout,
            self.router.refund(&payment, amount, reason),
        );
        let verdict = match held.run(call).await {
            Ok(Ok(Ok(receipt))) => Ok(receipt),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("processor timed out".to_string()),
        };

        let receipt = match verdict {
            Ok(receipt) => receipt,
            Err(failure) => {
                warn!(%failure, "refund failed");
                self.ledger
                    .record_refund(&Refund::failed(id, amount, reason, &failure))
                    .await
                    .map_err(storage_error)?;
                return Err(PaymentError::ExternalProcessorError(failure));
            }
        };

        let transition = payment.mark_refunded(amount)?;
        self.ledger
            .record_refund(&Refund::succeeded(
                id,
                amount,
                reason,
                receipt.refund_ref.clone(),
            ))
            .await
            .map_err(storage_error)?;
        self.payments.update(&payment).await.map_err(storage_error)?;
        self.append(id, transition).await?;
        self.invalidate(id).await;
        self.notify(&payment);

        info!(
            refund_ref = %receipt.refund_ref,
            status = %payment.status,
            "refund succeeded"
        );
        Ok(payment)
    }

    /// Cancels a payment that has not been sent to a processor yet.
    ///
    /// The (merchant, order) pair is free again afterwards.
    #[instrument(skip_all, fields(payment_id = %id))]
    pub async fn cancel_payment(&self, id: PaymentId) -> Result<Payment> {
        let held = self.lock.acquire(id).await?;
        let outcome = self.cancel_locked(id).await;
        held.release().await;
        outcome
    }

    async fn cancel_locked(&self, id: PaymentId) -> Result<Payment> {
        let mut payment = self.load(id).await?;
        let transition = payment.mark_cancelled()?;
        self.payments.update(&payment).await.map_err(storage_error)?;
        self.append(id, transition).await?;
        self.invalidate(id).await;
        self.notify(&payment);
        info!("payment cancelled");
        Ok(payment)
    }

    /// Reads a payment, preferring the shared cache.
    ///
    /// Cache failures are logged and bypassed. The result may briefly lag a
    /// concurrent mutation.
    #[instrument(skip_all, fields(payment_id = %id))]
    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        let key = payment_cache_key(id);
        match bounded(self.config.cache_timeout, self.cache.get(&key)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Payment>(&bytes) {
                Ok(payment) => {
                    debug!("served from cache");
                    return Ok(payment);
                }
                Err(e) => warn!(error = %e, "discarding unreadable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache read failed, falling back to storage"),
        }

        let payment = self.load(id).await?;
        if !self.fill_cache(&key, &payment).await || payment.is_settled() {
            return Ok(payment);
        }

        // A mutation may have invalidated the key between our load and the
        // write above, leaving a stale copy behind.
        let current = self.load(id).await?;
        if current.updated_at != payment.updated_at || current.status != payment.status {
            debug!("payment changed during read-through, dropping cached copy");
            self.invalidate(id).await;
        }
        Ok(current)
    }

    /// Returns whether the payment was written to the cache.
    async fn fill_cache(&self, key: &str, payment: &Payment) -> bool {
        let bytes = match serde_json::to_vec(payment) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode payment for cache");
                return false;
            }
        };
        let ttl = self.config.read_cache_ttl;
        match bounded(self.config.cache_timeout, self.cache.set(key, bytes, ttl)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "cache write failed");
                false
            }
        }
    }

    /// Looks up the live payment for a (merchant, order) pair.
    pub async fn find_by_order(&self, merchant_id: &str, order_id: &str) -> Result<Option<Payment>> {
        self.payments
            .get_by_merchant_and_order(merchant_id, order_id)
            .await
            .map_err(storage_error)
    }

    /// Lists payments newest first.
    pub async fn list_payments(&self, filter: PaymentFilter) -> Result<Vec<Payment>> {
        self.payments
            .list(&filter.normalized())
            .await
            .map_err(storage_error)
    }

    /// Returns the ledger entries and refund attempts of a payment.
    #[instrument(skip_all, fields(payment_id = %id))]
    pub async fn payment_history(&self, id: PaymentId) -> Result<PaymentHistory> {
        self.load(id).await?;
        let entries = self.ledger.entries(id).await.map_err(storage_error)?;
        let refunds = self.ledger.refunds(id).await.map_err(storage_error)?;
        Ok(PaymentHistory { entries, refunds })
    }

    async fn load(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get_by_id(id)
            .await
            .map_err(storage_error)?
            .ok_or(PaymentError::NotFound(id))
    }

    async fn append(&self, id: PaymentId, transition: Transition) -> Result<()> {
        let entry = LedgerEntry::record(id, transition, &self.config.actor);
        self.ledger.append(&entry).await.map_err(storage_error)
    }

    async fn invalidate(&self, id: PaymentId) {
        let key = payment_cache_key(id);
        if let Err(e) = bounded(self.config.cache_timeout, self.cache.delete(&key)).await {
            warn!(%key, error = %e, "failed to invalidate cached payment");
        }
    }

    /// Fire and forget. Delivery failures are logged and never surface.
    fn notify(&self, payment: &Payment) {
        let notifier = self.notifier.clone();
        let payment = payment.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_status_change(&payment).await {
                warn!(
                    payment_id = %payment.id,
                    status = %payment.status,
                    error = %e,
                    "status notification failed"
                );
            }
        });
    }
}
