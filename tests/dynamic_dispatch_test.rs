use payflow::domain::ledger::LedgerEntry;
use payflow::domain::money::{Amount, Currency, PaymentMethod};
use payflow::domain::payment::{Metadata, NewPayment, Payment};
use payflow::domain::ports::{
    CacheRef, CreateOutcome, DistributedLockRef, LedgerRepositoryRef, PaymentRepositoryRef,
    RateLimitDecision,
};
use payflow::infrastructure::in_memory::{InMemoryLedgerRepository, InMemoryPaymentRepository};
use payflow::infrastructure::memory_cache::InMemoryCache;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn payment() -> Payment {
    Payment::new(NewPayment {
        client_id: "C1".to_string(),
        merchant_id: "M1".to_string(),
        order_id: "O1".to_string(),
        amount: Amount::new(dec!(100.0)).unwrap(),
        currency: Currency::Eur,
        method: PaymentMethod::Wallet,
        description: String::new(),
        metadata: Metadata::new(),
    })
}

#[tokio::test]
async fn test_repositories_as_trait_objects() {
    let payments: PaymentRepositoryRef = Arc::new(InMemoryPaymentRepository::new());
    let ledger: LedgerRepositoryRef = Arc::new(InMemoryLedgerRepository::new());

    let p = payment();
    let entry = LedgerEntry::record(p.id, p.creation(), "test");
    let id = p.id;

    // Verify Send + Sync by spawning tasks
    let payment_handle = tokio::spawn(async move {
        assert_eq!(payments.create(&p).await.unwrap(), CreateOutcome::Created);
        payments.get_by_id(p.id).await.unwrap().unwrap()
    });

    let ledger_handle = tokio::spawn(async move {
        ledger.append(&entry).await.unwrap();
        ledger.entries(entry.payment_id).await.unwrap()
    });

    let retrieved = payment_handle.await.unwrap();
    assert_eq!(retrieved.id, id);

    let entries = ledger_handle.await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payment_id, id);
}

#[tokio::test]
async fn test_one_cache_behind_both_ports() {
    let backend = Arc::new(InMemoryCache::new());
    let cache: CacheRef = backend.clone();
    let lock: DistributedLockRef = backend;

    let handle = tokio::spawn(async move {
        assert!(lock.acquire_lock("payment-lock:1", Duration::from_secs(5)).await.unwrap());
        lock.acquire_lock("payment-lock:1", Duration::from_secs(5))
            .await
            .unwrap()
    });
    assert!(!handle.await.unwrap());

    assert_eq!(
        cache
            .is_rate_limited("rate_limit:M1:C1", 10, Duration::from_secs(60))
            .await
            .unwrap(),
        RateLimitDecision::Allowed { count: 1 }
    );
    assert_eq!(cache.get("payment-lock:1").await.unwrap(), Some(b"locked".to_vec()));
}
