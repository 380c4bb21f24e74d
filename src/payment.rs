use std::sync::Arc;

use tracing::{error, info};

use crate::dispatch::{DispatchOutcome, Dispatcher, NotificationRequest};
use crate::error::ServiceError;
use crate::limits::MAX_PAYMENT_CENTS;
use crate::model::*;
use crate::observability::PAYMENTS_TOTAL;
use crate::store::PaymentLedger;

/// Runs capture and invoice construction side by side; both must finish
/// before anything is returned.
pub struct PaymentCoordinator {
    ledger: Arc<dyn PaymentLedger>,
    dispatcher: Arc<Dispatcher>,
}

impl PaymentCoordinator {
    pub fn new(ledger: Arc<dyn PaymentLedger>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { ledger, dispatcher }
    }

    /// All or nothing: a failed capture discards the invoice and surfaces as
    /// `PaymentFailed`.
    pub async fn process(&self, payment: Payment) -> Result<Invoice, ServiceError> {
        if payment.amount_cents <= 0 {
            return Err(ServiceError::validation("payment amount must be positive"));
        }
        if payment.amount_cents > MAX_PAYMENT_CENTS {
            return Err(ServiceError::validation(format!(
                "payment amount exceeds {MAX_PAYMENT_CENTS} cents"
            )));
        }

        let ledger = self.ledger.clone();
        let to_capture = payment.clone();
        let capture = tokio::spawn(async move { ledger.capture(&to_capture).await });
        let invoicing = tokio::spawn(async move { Invoice::for_payment(&payment) });

        let (captured, invoice) = tokio::join!(capture, invoicing);
        let failure = match (captured, invoice) {
            (Ok(Ok(())), Ok(invoice)) => {
                metrics::counter!(PAYMENTS_TOTAL, "status" => "captured").increment(1);
                info!(payment = %invoice.payment_id, invoice = %invoice.id, "payment captured");
                return Ok(invoice);
            }
            (Ok(Err(e)), _) => e.to_string(),
            (Err(join), _) | (_, Err(join)) => join.to_string(),
        };
        metrics::counter!(PAYMENTS_TOTAL, "status" => "failed").increment(1);
        error!("payment processing failed: {failure}");
        Err(ServiceError::PaymentFailed)
    }

    /// `process`, then a receipt notification for the payer.
    pub async fn process_and_notify(
        &self,
        payment: Payment,
        user_id: UserId,
        recipient: Option<String>,
    ) -> Result<(Invoice, DispatchOutcome), ServiceError> {
        let invoice = self.process(payment).await?;
        let delivery = self
            .dispatcher
            .dispatch(NotificationRequest::payment_received(user_id, &invoice, recipient))
            .await?;
        Ok((invoice, delivery))
    }
}
