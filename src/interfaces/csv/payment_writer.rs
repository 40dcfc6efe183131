use crate::domain::money::{Currency, PaymentMethod};
use crate::domain::payment::{Payment, PaymentId, PaymentStatus};
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: PaymentId,
    merchant: &'a str,
    order: &'a str,
    client: &'a str,
    amount: Decimal,
    refunded: Decimal,
    currency: Currency,
    method: PaymentMethod,
    status: PaymentStatus,
    processor_ref: &'a str,
}

impl<'a> From<&'a Payment> for PaymentRow<'a> {
    fn from(p: &'a Payment) -> Self {
        Self {
            id: p.id,
            merchant: &p.merchant_id,
            order: &p.order_id,
            client: &p.client_id,
            amount: p.amount.value().normalize(),
            refunded: p.refunded_amount.normalize(),
            currency: p.currency,
            method: p.method,
            status: p.status,
            processor_ref: p.processor_ref.as_deref().unwrap_or_default(),
        }
    }
}

/// Writes a CSV snapshot of payments, one row per payment.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments<'a>(
        &mut self,
        payments: impl IntoIterator<Item = &'a Payment>,
    ) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow::from(payment))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
