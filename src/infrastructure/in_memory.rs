use crate::domain::ledger::{LedgerEntry, Refund};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{
    CreateOutcome, LedgerRepository, PaymentFilter, PaymentRepository, RepositoryError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTable {
    payments: HashMap<PaymentId, Payment>,
    /// (merchant, order) -> live payment. Cancelled payments drop out.
    by_order: HashMap<(String, String), PaymentId>,
}

/// A thread-safe in-memory payment store.
///
/// Uses `Arc<RwLock<..>>` so clones share the same data. The (merchant, order)
/// index is checked and written under one write lock, which is what makes
/// concurrent duplicate creates collapse onto a single payment.
#[derive(Default, Clone)]
pub struct InMemoryPaymentRepository {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentRepository {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn order_key(payment: &Payment) -> (String, String) {
    (payment.merchant_id.clone(), payment.order_id.clone())
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn create(&self, payment: &Payment) -> Result<CreateOutcome, RepositoryError> {
        let mut table = self.table.write().await;
        let key = order_key(payment);
        if let Some(existing) = table.by_order.get(&key).and_then(|id| table.payments.get(id)) {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }
        if table.payments.contains_key(&payment.id) {
            return Err(RepositoryError::Query(format!(
                "payment {} already exists",
                payment.id
            )));
        }
        table.by_order.insert(key, payment.id);
        table.payments.insert(payment.id, payment.clone());
        Ok(CreateOutcome::Created)
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Option<Payment>, RepositoryError> {
        let table = self.table.read().await;
        Ok(table.payments.get(&id).cloned())
    }

    async fn get_by_merchant_and_order(
        &self,
        merchant_id: &str,
        order_id: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        let table = self.table.read().await;
        let key = (merchant_id.to_string(), order_id.to_string());
        Ok(table
            .by_order
            .get(&key)
            .and_then(|id| table.payments.get(id))
            .cloned())
    }

    async fn update(&self, payment: &Payment) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        if !table.payments.contains_key(&payment.id) {
            return Err(RepositoryError::Query(format!(
                "payment {} does not exist",
                payment.id
            )));
        }
        if payment.status == PaymentStatus::Cancelled {
            let key = order_key(payment);
            if table.by_order.get(&key) == Some(&payment.id) {
                table.by_order.remove(&key);
            }
        }
        table.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, RepositoryError> {
        let table = self.table.read().await;
        let mut matching: Vec<&Payment> = table
            .payments
            .values()
            .filter(|p| filter.matches(p))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect())
    }
}

/// A thread-safe in-memory ledger.
///
/// Entries and refunds are only ever appended.
#[derive(Default, Clone)]
pub struct InMemoryLedgerRepository {
    entries: Arc<RwLock<HashMap<PaymentId, Vec<LedgerEntry>>>>,
    refunds: Arc<RwLock<HashMap<PaymentId, Vec<Refund>>>>,
}

impl InMemoryLedgerRepository {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries
            .entry(entry.payment_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn entries(&self, payment_id: PaymentId) -> Result<Vec<LedgerEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&payment_id).cloned().unwrap_or_default())
    }

    async fn record_refund(&self, refund: &Refund) -> Result<(), RepositoryError> {
        let mut refunds = self.refunds.write().await;
        refunds
            .entry(refund.payment_id)
            .or_default()
            .push(refund.clone());
        Ok(())
    }

    async fn refunds(&self, payment_id: PaymentId) -> Result<Vec<Refund>, RepositoryError> {
        let refunds = self.refunds.read().await;
        Ok(refunds.get(&payment_id).cloned().unwrap_or_default())
    }
}
