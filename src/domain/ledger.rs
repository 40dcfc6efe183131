use super::money::Amount;
use super::payment::{PaymentId, PaymentStatus, Transition};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of one state change of a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub payment_id: PaymentId,
    /// `None` for the entry that opened the payment.
    pub from_status: Option<PaymentStatus>,
    pub to_status: PaymentStatus,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl LedgerEntry {
    pub fn record(payment_id: PaymentId, transition: Transition, actor: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            from_status: transition.from,
            to_status: transition.to,
            amount: transition.amount,
            timestamp: transition.at,
            actor: actor.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Succeeded,
    Failed,
}

/// One refund attempt against a payment.
///
/// Only `Succeeded` refunds count toward the payment's refunded total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: PaymentId,
    pub amount: Amount,
    pub reason: String,
    pub status: RefundStatus,
    pub refund_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Refund {
    pub fn succeeded(
        payment_id: PaymentId,
        amount: Amount,
        reason: impl Into<String>,
        refund_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            reason: reason.into(),
            status: RefundStatus::Succeeded,
            refund_ref: Some(refund_ref.into()),
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(
        payment_id: PaymentId,
        amount: Amount,
        reason: impl Into<String>,
        failure_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            reason: reason.into(),
            status: RefundStatus::Failed,
            refund_ref: None,
            failure_reason: Some(failure_reason.into()),
            created_at: Utc::now(),
        }
    }
}

/// Sum of the successful refunds in `refunds`.
pub fn refunded_total<'a>(refunds: impl IntoIterator<Item = &'a Refund>) -> Decimal {
    refunds
        .into_iter()
        .filter(|r| r.status == RefundStatus::Succeeded)
        .map(|r| r.amount.value())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_copies_transition() {
        let id = PaymentId::new();
        let at = Utc::now();
        let entry = LedgerEntry::record(
            id,
            Transition {
                from: Some(PaymentStatus::Pending),
                to: PaymentStatus::Processing,
                amount: dec!(12.34),
                at,
            },
            "worker-1",
        );
        assert_eq!(entry.payment_id, id);
        assert_eq!(entry.from_status, Some(PaymentStatus::Pending));
        assert_eq!(entry.to_status, PaymentStatus::Processing);
        assert_eq!(entry.amount, dec!(12.34));
        assert_eq!(entry.timestamp, at);
        assert_eq!(entry.actor, "worker-1");
    }

    #[test]
    fn test_refunded_total_ignores_failed_attempts() {
        let id = PaymentId::new();
        let refunds = vec![
            Refund::succeeded(id, Amount::new(dec!(10)).unwrap(), "damaged", "re_1"),
            Refund::failed(id, Amount::new(dec!(50)).unwrap(), "damaged", "gateway down"),
            Refund::succeeded(id, Amount::new(dec!(2.5)).unwrap(), "late", "re_2"),
        ];
        assert_eq!(refunded_total(&refunds), dec!(12.5));
    }
}
