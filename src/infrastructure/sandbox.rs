use crate::domain::money::Amount;
use crate::domain::payment::{Metadata, Payment};
use crate::domain::ports::{
    PaymentDetails, PaymentProcessor, ProcessorError, ProcessorReceipt, RefundReceipt,
};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// A deterministic processor for demos and end-to-end runs.
///
/// Every charge succeeds unless the details carry `decline=true`. Charge
/// references are derived from the payment id, so they are stable per
/// payment.
#[derive(Debug, Clone, Default)]
pub struct SandboxProcessor {
    latency: Duration,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn wants_decline(details: &PaymentDetails) -> bool {
    match details.get("decline") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn process(
        &self,
        payment: &Payment,
        details: &PaymentDetails,
    ) -> Result<ProcessorReceipt, ProcessorError> {
        self.delay().await;
        if wants_decline(details) {
            return Err(ProcessorError::Declined(
                "sandbox declined the charge".to_string(),
            ));
        }
        let mut metadata = Metadata::new();
        metadata.insert("processor".to_string(), Value::from("sandbox"));
        Ok(ProcessorReceipt {
            processor_ref: format!("ch_{}", payment.id.as_uuid().simple()),
            metadata,
        })
    }

    async fn refund(
        &self,
        _payment: &Payment,
        _amount: Amount,
        _reason: &str,
    ) -> Result<RefundReceipt, ProcessorError> {
        self.delay().await;
        Ok(RefundReceipt {
            refund_ref: format!("re_{}", Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Currency, PaymentMethod};
    use crate::domain::payment::NewPayment;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::new(NewPayment {
            client_id: "C1".to_string(),
            merchant_id: "M1".to_string(),
            order_id: "O1".to_string(),
            amount: Amount::new(dec!(10)).unwrap(),
            currency: Currency::Gbp,
            method: PaymentMethod::BankTransfer,
            description: String::new(),
            metadata: Metadata::new(),
        })
    }

    #[tokio::test]
    async fn test_charge_reference_is_stable_per_payment() {
        let sandbox = SandboxProcessor::new();
        let p = payment();
        let first = sandbox.process(&p, &PaymentDetails::new()).await.unwrap();
        let second = sandbox.process(&p, &PaymentDetails::new()).await.unwrap();
        assert_eq!(first.processor_ref, second.processor_ref);
        assert!(first.processor_ref.starts_with("ch_"));
    }

    #[tokio::test]
    async fn test_decline_flag() {
        let sandbox = SandboxProcessor::new();
        let p = payment();

        let mut details = PaymentDetails::new();
        details.insert("decline".to_string(), Value::from("TRUE"));
        assert!(matches!(
            sandbox.process(&p, &details).await,
            Err(ProcessorError::Declined(_))
        ));

        details.insert("decline".to_string(), Value::Bool(false));
        assert!(sandbox.process(&p, &details).await.is_ok());
    }
}
