#![allow(dead_code)]

use async_trait::async_trait;
use payflow::application::orchestrator::{CreatePaymentRequest, PaymentOrchestrator};
use payflow::application::router::ProcessorRouter;
use payflow::config::OrchestratorConfig;
use payflow::domain::money::{Amount, Currency, PaymentMethod};
use payflow::domain::payment::{Metadata, Payment, PaymentStatus};
use payflow::domain::ports::{
    Notifier, NotifierError, NotifierRef, PaymentDetails, PaymentProcessor, ProcessorError,
    ProcessorReceipt, RefundReceipt,
};
use payflow::infrastructure::in_memory::{InMemoryLedgerRepository, InMemoryPaymentRepository};
use payflow::infrastructure::memory_cache::InMemoryCache;
use rust_decimal::Decimal;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

pub const SCRIPT_HEADER: &str = "command, merchant, order, client, amount, currency, method, note";

/// Writes a command script with the standard header.
pub fn write_script(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{SCRIPT_HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file.flush().unwrap();
    file
}

pub fn card_request(merchant: &str, order: &str, amount: Decimal) -> CreatePaymentRequest {
    CreatePaymentRequest {
        client_id: "C1".to_string(),
        merchant_id: merchant.to_string(),
        order_id: order.to_string(),
        amount,
        currency: Currency::Usd,
        method: PaymentMethod::Card,
        description: "integration test".to_string(),
        metadata: Metadata::new(),
    }
}

/// Processor double that counts calls and answers with a fixed outcome.
pub struct CountingProcessor {
    pub charges: AtomicUsize,
    pub refunds: AtomicUsize,
    charge_outcome: Result<String, ProcessorError>,
    refund_outcome: Result<String, ProcessorError>,
    latency: Duration,
}

impl CountingProcessor {
    pub fn succeeding(processor_ref: &str) -> Self {
        Self {
            charges: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
            charge_outcome: Ok(processor_ref.to_string()),
            refund_outcome: Ok("re_1".to_string()),
            latency: Duration::ZERO,
        }
    }

    pub fn failing(error: ProcessorError) -> Self {
        Self {
            charge_outcome: Err(error),
            ..Self::succeeding("unused")
        }
    }

    pub fn with_failing_refunds(mut self, error: ProcessorError) -> Self {
        self.refund_outcome = Err(error);
        self
    }

    /// Delays every charge and refund by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn charges(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refunds(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for CountingProcessor {
    fn name(&self) -> &str {
        "counting"
    }

    async fn process(
        &self,
        _payment: &Payment,
        _details: &PaymentDetails,
    ) -> Result<ProcessorReceipt, ProcessorError> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.charge_outcome.clone().map(|processor_ref| ProcessorReceipt {
            processor_ref,
            metadata: Metadata::new(),
        })
    }

    async fn refund(
        &self,
        _payment: &Payment,
        _amount: Amount,
        _reason: &str,
    ) -> Result<RefundReceipt, ProcessorError> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.refund_outcome
            .clone()
            .map(|refund_ref| RefundReceipt { refund_ref })
    }
}

/// Notifier double that remembers every status it was told about.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<PaymentStatus>>,
}

impl RecordingNotifier {
    pub fn seen(&self) -> Vec<PaymentStatus> {
        self.seen.lock().unwrap().clone()
    }

    /// Waits for the background deliveries to arrive.
    pub async fn wait_for(&self, count: usize) -> Vec<PaymentStatus> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.seen.lock().unwrap().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("notifications did not arrive");
        self.seen()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_status_change(&self, payment: &Payment) -> Result<(), NotifierError> {
        self.seen.lock().unwrap().push(payment.status);
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_status_change(&self, _payment: &Payment) -> Result<(), NotifierError> {
        Err(NotifierError("webhook endpoint unreachable".to_string()))
    }
}

/// Shared backing services. Every orchestrator built from one `Stack`
/// behaves like a separate service instance in the same cluster.
#[derive(Default)]
pub struct Stack {
    pub payments: Arc<InMemoryPaymentRepository>,
    pub ledger: Arc<InMemoryLedgerRepository>,
    pub cache: Arc<InMemoryCache>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(
        &self,
        config: OrchestratorConfig,
        processor: Arc<CountingProcessor>,
        notifier: NotifierRef,
    ) -> PaymentOrchestrator {
        let router = ProcessorRouter::new().with_processor(PaymentMethod::Card, processor);
        PaymentOrchestrator::new(
            config,
            self.payments.clone(),
            self.ledger.clone(),
            self.cache.clone(),
            self.cache.clone(),
            router,
            notifier,
        )
        .unwrap()
    }

    pub fn default_instance(&self, processor: Arc<CountingProcessor>) -> PaymentOrchestrator {
        self.instance(
            OrchestratorConfig::default(),
            processor,
            Arc::new(RecordingNotifier::default()),
        )
    }
}
