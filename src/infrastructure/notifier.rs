use crate::domain::payment::Payment;
use crate::domain::ports::{Notifier, NotifierError};
use async_trait::async_trait;
use tracing::info;

/// Publishes status changes as structured log events under the
/// `payflow::notify` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify_status_change(&self, payment: &Payment) -> Result<(), NotifierError> {
        info!(
            target: "payflow::notify",
            payment_id = %payment.id,
            merchant_id = %payment.merchant_id,
            order_id = %payment.order_id,
            status = %payment.status,
            "payment status changed"
        );
        Ok(())
    }
}
