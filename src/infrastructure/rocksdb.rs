use crate::domain::ledger::{LedgerEntry, Refund};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::domain::ports::{
    CreateOutcome, LedgerRepository, PaymentFilter, PaymentRepository, RepositoryError,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping (merchant, order) to the live payment id.
pub const CF_ORDER_INDEX: &str = "order_index";
/// Column Family for ledger entries, keyed by payment id then time.
pub const CF_LEDGER: &str = "ledger";
/// Column Family for refund attempts, keyed by payment id then time.
pub const CF_REFUNDS: &str = "refunds";

/// A persistent store implementation using RocksDB.
///
/// Implements both the payment and the ledger repository over separate
/// Column Families. Writes that touch the order index go through one mutex so
/// the check for an existing live payment and the insert form a single step.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that every column family this store uses exists.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYMENTS, CF_ORDER_INDEX, CF_LEDGER, CF_REFUNDS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors).map_err(PaymentError::internal)?;

        Ok(Self {
            db: Arc::new(db),
            writes: Arc::default(),
        })
    }

    fn cf(&self, name: &str) -> std::result::Result<&ColumnFamily, RepositoryError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RepositoryError::Unavailable(format!("{name} column family not found")))
    }

    fn load_payment(&self, id: &Uuid) -> std::result::Result<Option<Payment>, RepositoryError> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_cf(cf, id.as_bytes()).map_err(query_error)? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn live_payment_for(
        &self,
        merchant_id: &str,
        order_id: &str,
    ) -> std::result::Result<Option<Payment>, RepositoryError> {
        let cf = self.cf(CF_ORDER_INDEX)?;
        let Some(bytes) = self
            .db
            .get_cf(cf, order_key(merchant_id, order_id))
            .map_err(query_error)?
        else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&bytes)
            .map_err(|e| RepositoryError::Serialization(format!("bad order index entry: {e}")))?;
        self.load_payment(&id)
    }

    /// Values stored under `payment_id`, in key order.
    fn scan_for<T: DeserializeOwned>(
        &self,
        cf_name: &str,
        payment_id: PaymentId,
    ) -> std::result::Result<Vec<T>, RepositoryError> {
        let cf = self.cf(cf_name)?;
        let prefix: &[u8] = payment_id.as_uuid().as_bytes();
        let mut values = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(query_error)?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(decode(&value)?);
        }
        Ok(values)
    }
}

fn query_error(e: rocksdb::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> std::result::Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, RepositoryError> {
    serde_json::from_slice(bytes).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn order_key(merchant_id: &str, order_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(merchant_id.len() + order_id.len() + 1);
    key.extend_from_slice(merchant_id.as_bytes());
    key.push(0);
    key.extend_from_slice(order_id.as_bytes());
    key
}

/// `payment id | big-endian nanos | record id`, so a prefix scan yields
/// records in time order.
fn history_key(payment_id: PaymentId, at: DateTime<Utc>, record_id: &Uuid) -> Vec<u8> {
    let nanos = at.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(payment_id.as_uuid().as_bytes());
    key.extend_from_slice(&nanos.to_be_bytes());
    key.extend_from_slice(record_id.as_bytes());
    key
}

#[async_trait]
impl PaymentRepository for RocksDBStore {
    async fn create(&self, payment: &Payment) -> std::result::Result<CreateOutcome, RepositoryError> {
        let _guard = self.writes.lock().await;
        if let Some(existing) = self.live_payment_for(&payment.merchant_id, &payment.order_id)? {
            return Ok(CreateOutcome::Existing(existing));
        }
        if self.load_payment(payment.id.as_uuid())?.is_some() {
            return Err(RepositoryError::Query(format!(
                "payment {} already exists",
                payment.id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_uuid().as_bytes(),
            encode(payment)?,
        );
        batch.put_cf(
            self.cf(CF_ORDER_INDEX)?,
            order_key(&payment.merchant_id, &payment.order_id),
            payment.id.as_uuid().as_bytes(),
        );
        self.db.write(batch).map_err(query_error)?;
        Ok(CreateOutcome::Created)
    }

    async fn get_by_id(&self, id: PaymentId) -> std::result::Result<Option<Payment>, RepositoryError> {
        self.load_payment(id.as_uuid())
    }

    async fn get_by_merchant_and_order(
        &self,
        merchant_id: &str,
        order_id: &str,
    ) -> std::result::Result<Option<Payment>, RepositoryError> {
        self.live_payment_for(merchant_id, order_id)
    }

    async fn update(&self, payment: &Payment) -> std::result::Result<(), RepositoryError> {
        let _guard = self.writes.lock().await;
        if self.load_payment(payment.id.as_uuid())?.is_none() {
            return Err(RepositoryError::Query(format!(
                "payment {} does not exist",
                payment.id
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PAYMENTS)?,
            payment.id.as_uuid().as_bytes(),
            encode(payment)?,
        );
        if payment.status == PaymentStatus::Cancelled {
            let index = self.cf(CF_ORDER_INDEX)?;
            let key = order_key(&payment.merchant_id, &payment.order_id);
            let indexed = self.db.get_cf(index, &key).map_err(query_error)?;
            if indexed.as_deref() == Some(payment.id.as_uuid().as_bytes().as_slice()) {
                batch.delete_cf(index, key);
            }
        }
        self.db.write(batch).map_err(query_error)
    }

    async fn list(&self, filter: &PaymentFilter) -> std::result::Result<Vec<Payment>, RepositoryError> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut matching = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(query_error)?;
            let payment: Payment = decode(&value)?;
            if filter.matches(&payment) {
                matching.push(payment);
            }
        }
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for RocksDBStore {
    async fn append(&self, entry: &LedgerEntry) -> std::result::Result<(), RepositoryError> {
        let key = history_key(entry.payment_id, entry.timestamp, &entry.id);
        self.db
            .put_cf(self.cf(CF_LEDGER)?, key, encode(entry)?)
            .map_err(query_error)
    }

    async fn entries(
        &self,
        payment_id: PaymentId,
    ) -> std::result::Result<Vec<LedgerEntry>, RepositoryError> {
        self.scan_for(CF_LEDGER, payment_id)
    }

    async fn record_refund(&self, refund: &Refund) -> std::result::Result<(), RepositoryError> {
        let key = history_key(refund.payment_id, refund.created_at, &refund.id);
        self.db
            .put_cf(self.cf(CF_REFUNDS)?, key, encode(refund)?)
            .map_err(query_error)
    }

    async fn refunds(&self, payment_id: PaymentId) -> std::result::Result<Vec<Refund>, RepositoryError> {
        self.scan_for(CF_REFUNDS, payment_id)
    }
}
