use super::money::{Amount, Currency, PaymentMethod};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque key/value data carried alongside a payment.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for PaymentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for PaymentId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| PaymentError::validation(format!("Invalid payment id {s:?}: {e}")))
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a payment.
///
/// `Processing` is the only transient state; it is entered and left while the
/// payment lock is held. A refund runs in place on a `Completed` or
/// `PartiallyRefunded` payment under the same lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    PartiallyRefunded,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyRefunded => "partially_refunded",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further processing attempt is permitted from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::Cancelled
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partially_refunded" => Ok(Self::PartiallyRefunded),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PaymentError::validation(format!(
                "Unknown payment status: {other}"
            ))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single accepted state change, produced by the `mark_*` operations and
/// turned into a ledger entry by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Option<PaymentStatus>,
    pub to: PaymentStatus,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

/// Fields required to open a new payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub client_id: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub description: String,
    pub metadata: Metadata,
}

/// A monetary transaction and its position in the payment lifecycle.
///
/// All mutation goes through the `mark_*` methods. An illegal transition
/// returns an error and leaves the payment untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub client_id: String,
    pub merchant_id: String,
    pub order_id: String,
    pub amount: Amount,
    /// Sum of all successful refunds.
    pub refunded_amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// External charge reference, written once on completion.
    pub processor_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(new: NewPayment) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            client_id: new.client_id,
            merchant_id: new.merchant_id,
            order_id: new.order_id,
            amount: new.amount,
            refunded_amount: Decimal::ZERO,
            currency: new.currency,
            method: new.method,
            status: PaymentStatus::Pending,
            description: new.description,
            metadata: new.metadata,
            processor_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// The transition that opened this payment.
    pub fn creation(&self) -> Transition {
        Transition {
            from: None,
            to: PaymentStatus::Pending,
            amount: self.amount.value(),
            at: self.created_at,
        }
    }

    /// Amount still available for refunds.
    pub fn refundable_amount(&self) -> Decimal {
        match self.status {
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded => {
                self.amount.value() - self.refunded_amount
            }
            _ => Decimal::ZERO,
        }
    }

    /// A payment in a terminal status with nothing left to refund never
    /// changes again.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() && self.refundable_amount().is_zero()
    }

    /// Checks that a processing attempt may start.
    ///
    /// A payment already in `Processing` has an attempt in flight somewhere in
    /// the cluster, which is reported as `AlreadyInProgress`.
    pub fn ensure_processable(&self) -> Result<()> {
        match self.status {
            PaymentStatus::Pending => Ok(()),
            PaymentStatus::Processing => Err(PaymentError::AlreadyInProgress(self.id)),
            from => Err(PaymentError::InvalidStateTransition {
                from,
                attempted: "process",
            }),
        }
    }

    /// Checks that `amount` may be refunded right now.
    pub fn ensure_refundable(&self, amount: Amount) -> Result<()> {
        match self.status {
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded => {
                let remaining = self.refundable_amount();
                if amount.value() > remaining {
                    Err(PaymentError::validation(format!(
                        "Refund amount {amount} exceeds refundable amount {}",
                        remaining.normalize()
                    )))
                } else {
                    Ok(())
                }
            }
            PaymentStatus::Processing => Err(PaymentError::AlreadyInProgress(self.id)),
            from => Err(PaymentError::InvalidStateTransition {
                from,
                attempted: "refund",
            }),
        }
    }

    pub fn mark_processing(&mut self) -> Result<Transition> {
        self.guard(&[PaymentStatus::Pending], "process")?;
        Ok(self.transition_to(PaymentStatus::Processing, self.amount.value()))
    }

    pub fn mark_completed(&mut self, processor_ref: impl Into<String>) -> Result<Transition> {
        self.guard(&[PaymentStatus::Processing], "complete")?;
        let processor_ref = processor_ref.into();
        if processor_ref.trim().is_empty() {
            return Err(PaymentError::validation("Processor reference is empty"));
        }
        if self.processor_ref.is_some() {
            return Err(PaymentError::InvalidStateTransition {
                from: self.status,
                attempted: "overwrite processor reference of",
            });
        }
        self.processor_ref = Some(processor_ref);
        let transition = self.transition_to(PaymentStatus::Completed, self.amount.value());
        self.processed_at = Some(transition.at);
        Ok(transition)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<Transition> {
        self.guard(&[PaymentStatus::Processing], "fail")?;
        self.failure_reason = Some(reason.into());
        Ok(self.transition_to(PaymentStatus::Failed, self.amount.value()))
    }

    pub fn mark_refunded(&mut self, amount: Amount) -> Result<Transition> {
        self.guard(
            &[PaymentStatus::Completed, PaymentStatus::PartiallyRefunded],
            "refund",
        )?;
        self.ensure_refundable(amount)?;
        self.refunded_amount += amount.value();
        let next = if self.refunded_amount == self.amount.value() {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        Ok(self.transition_to(next, amount.value()))
    }

    pub fn mark_cancelled(&mut self) -> Result<Transition> {
        self.guard(&[PaymentStatus::Pending], "cancel")?;
        Ok(self.transition_to(PaymentStatus::Cancelled, Decimal::ZERO))
    }

    fn guard(&self, allowed: &[PaymentStatus], attempted: &'static str) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(PaymentError::InvalidStateTransition {
                from: self.status,
                attempted,
            })
        }
    }

    fn transition_to(&mut self, to: PaymentStatus, amount: Decimal) -> Transition {
        let at = Utc::now();
        let from = std::mem::replace(&mut self.status, to);
        self.updated_at = at;
        Transition {
            from: Some(from),
            to,
            amount,
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn payment(amount: Decimal) -> Payment {
        Payment::new(NewPayment {
            client_id: "C1".to_string(),
            merchant_id: "M1".to_string(),
            order_id: "O1".to_string(),
            amount: Amount::new(amount).unwrap(),
            currency: Currency::Usd,
            method: PaymentMethod::Card,
            description: "test order".to_string(),
            metadata: Metadata::new(),
        })
    }

    fn payment_in(status: PaymentStatus) -> Payment {
        let mut p = payment(dec!(100.00));
        p.status = status;
        p
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[test]
    fn test_new_payment_is_pending_without_reference() {
        let p = payment(dec!(100.00));
        assert_eq!(p.status, PaymentStatus::Pending);
        assert!(p.processor_ref.is_none());
        assert!(p.processed_at.is_none());
        assert_eq!(p.creation().from, None);
        assert_eq!(p.creation().to, PaymentStatus::Pending);
    }

    #[test]
    fn test_happy_path_to_completed() {
        let mut p = payment(dec!(100.00));
        let t = p.mark_processing().unwrap();
        assert_eq!(t.from, Some(PaymentStatus::Pending));
        assert_eq!(t.to, PaymentStatus::Processing);

        let t = p.mark_completed("ch_123").unwrap();
        assert_eq!(t.to, PaymentStatus::Completed);
        assert_eq!(p.processor_ref.as_deref(), Some("ch_123"));
        assert_eq!(p.processed_at, Some(t.at));
    }

    #[test]
    fn test_failed_records_reason() {
        let mut p = payment(dec!(10));
        p.mark_processing().unwrap();
        p.mark_failed("card declined").unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.failure_reason.as_deref(), Some("card declined"));
        assert!(p.processor_ref.is_none());
    }

    #[rstest]
    #[case(PaymentStatus::Processing)]
    #[case(PaymentStatus::Completed)]
    #[case(PaymentStatus::Failed)]
    #[case(PaymentStatus::PartiallyRefunded)]
    #[case(PaymentStatus::Refunded)]
    #[case(PaymentStatus::Cancelled)]
    fn test_mark_processing_only_from_pending(#[case] status: PaymentStatus) {
        let mut p = payment_in(status);
        let before = p.clone();
        let err = p.mark_processing().unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidStateTransition { from, .. } if from == status
        ));
        assert_eq!(p, before);
    }

    #[rstest]
    #[case(PaymentStatus::Pending)]
    #[case(PaymentStatus::Completed)]
    #[case(PaymentStatus::Failed)]
    #[case(PaymentStatus::Cancelled)]
    fn test_complete_and_fail_only_from_processing(#[case] status: PaymentStatus) {
        let mut p = payment_in(status);
        let before = p.clone();
        assert!(p.mark_completed("ch_1").is_err());
        assert!(p.mark_failed("nope").is_err());
        assert_eq!(p, before);
    }

    #[rstest]
    #[case(PaymentStatus::Pending)]
    #[case(PaymentStatus::Processing)]
    #[case(PaymentStatus::Failed)]
    #[case(PaymentStatus::Refunded)]
    #[case(PaymentStatus::Cancelled)]
    fn test_refund_requires_completed(#[case] status: PaymentStatus) {
        let mut p = payment_in(status);
        let before = p.clone();
        assert!(p.mark_refunded(amount(dec!(1))).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn test_empty_processor_reference_is_rejected() {
        let mut p = payment(dec!(5));
        p.mark_processing().unwrap();
        assert!(matches!(
            p.mark_completed("  "),
            Err(PaymentError::ValidationError(_))
        ));
        assert_eq!(p.status, PaymentStatus::Processing);
    }

    #[test]
    fn test_processor_reference_is_write_once() {
        let mut p = payment_in(PaymentStatus::Processing);
        p.processor_ref = Some("ch_old".to_string());
        assert!(p.mark_completed("ch_new").is_err());
        assert_eq!(p.processor_ref.as_deref(), Some("ch_old"));
        assert_eq!(p.status, PaymentStatus::Processing);
    }

    #[test]
    fn test_partial_then_full_refund() {
        let mut p = payment_in(PaymentStatus::Completed);

        let t = p.mark_refunded(amount(dec!(30.00))).unwrap();
        assert_eq!(t.to, PaymentStatus::PartiallyRefunded);
        assert_eq!(t.amount, dec!(30.00));
        assert_eq!(p.refundable_amount(), dec!(70.00));

        let t = p.mark_refunded(amount(dec!(70.00))).unwrap();
        assert_eq!(t.from, Some(PaymentStatus::PartiallyRefunded));
        assert_eq!(t.to, PaymentStatus::Refunded);
        assert_eq!(p.refunded_amount, dec!(100.00));
        assert_eq!(p.refundable_amount(), Decimal::ZERO);
    }

    #[rstest]
    #[case(PaymentStatus::Pending, false)]
    #[case(PaymentStatus::Processing, false)]
    #[case(PaymentStatus::Completed, false)]
    #[case(PaymentStatus::PartiallyRefunded, false)]
    #[case(PaymentStatus::Failed, true)]
    #[case(PaymentStatus::Refunded, true)]
    #[case(PaymentStatus::Cancelled, true)]
    fn test_settled_payments(#[case] status: PaymentStatus, #[case] settled: bool) {
        assert_eq!(payment_in(status).is_settled(), settled);
    }

    #[test]
    fn test_refund_over_remaining_is_validation_error() {
        let mut p = payment_in(PaymentStatus::Completed);
        p.mark_refunded(amount(dec!(60))).unwrap();
        let before = p.clone();

        let err = p.mark_refunded(amount(dec!(40.01))).unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError(_)));
        assert_eq!(p, before);
    }

    #[test]
    fn test_repeated_small_refunds_stay_exact() {
        let mut p = payment(dec!(1.00));
        p.status = PaymentStatus::Completed;
        for _ in 0..10 {
            p.mark_refunded(amount(dec!(0.10))).unwrap();
        }
        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refunded_amount, dec!(1.00));
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut p = payment(dec!(1));
        p.mark_cancelled().unwrap();
        assert_eq!(p.status, PaymentStatus::Cancelled);

        let mut p = payment_in(PaymentStatus::Processing);
        assert!(p.mark_cancelled().is_err());
        assert_eq!(p.status, PaymentStatus::Processing);
    }

    #[test]
    fn test_ensure_processable() {
        assert!(payment_in(PaymentStatus::Pending).ensure_processable().is_ok());
        assert!(matches!(
            payment_in(PaymentStatus::Processing).ensure_processable(),
            Err(PaymentError::AlreadyInProgress(_))
        ));
        assert!(matches!(
            payment_in(PaymentStatus::Completed).ensure_processable(),
            Err(PaymentError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        let json = serde_json::to_string(&PaymentStatus::PartiallyRefunded).unwrap();
        assert_eq!(json, "\"partially_refunded\"");
        assert_eq!(
            "partially_refunded".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::PartiallyRefunded
        );
    }
}
