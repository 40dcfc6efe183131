use crate::domain::money::{Amount, PaymentMethod};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    PaymentDetails, PaymentProcessorRef, ProcessorError, ProcessorReceipt, RefundReceipt,
};
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Maps each payment method to the processor adapter that handles it.
///
/// The registry is assembled once by the wiring layer and is immutable
/// afterwards. Every dispatch is a single external call with no retries.
#[derive(Clone, Default)]
pub struct ProcessorRouter {
    processors: HashMap<PaymentMethod, PaymentProcessorRef>,
}

impl ProcessorRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `processor` for `method`, replacing any earlier registration.
    pub fn with_processor(mut self, method: PaymentMethod, processor: PaymentProcessorRef) -> Self {
        self.processors.insert(method, processor);
        self
    }

    pub fn resolve(&self, method: PaymentMethod) -> Result<&PaymentProcessorRef> {
        self.processors
            .get(&method)
            .ok_or(PaymentError::UnsupportedMethod(method))
    }

    /// Charges `payment` through its method's processor.
    ///
    /// The outer `Result` fails only when no processor is registered; the
    /// inner one carries the processor's own verdict.
    pub async fn process(
        &self,
        payment: &Payment,
        details: &PaymentDetails,
    ) -> Result<std::result::Result<ProcessorReceipt, ProcessorError>> {
        let processor = self.resolve(payment.method)?;
        debug!(
            payment_id = %payment.id,
            processor = processor.name(),
            "dispatching charge"
        );
        Ok(processor.process(payment, details).await)
    }

    pub async fn refund(
        &self,
        payment: &Payment,
        amount: Amount,
        reason: &str,
    ) -> Result<std::result::Result<RefundReceipt, ProcessorError>> {
        let processor = self.resolve(payment.method)?;
        debug!(
            payment_id = %payment.id,
            processor = processor.name(),
            %amount,
            "dispatching refund"
        );
        Ok(processor.refund(payment, amount, reason).await)
    }
}

impl fmt::Debug for ProcessorRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (method, processor) in &self.processors {
            map.entry(method, &processor.name());
        }
        map.finish()
    }
}
