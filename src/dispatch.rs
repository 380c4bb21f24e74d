//! Post-commit fan-out: a mandatory notification row plus a best-effort email
//! bounded by a time budget.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::error::ServiceError;
use crate::limits::MAX_MESSAGE_LEN;
use crate::mail::Mailer;
use crate::model::*;
use crate::observability::{DISPATCH_OUTCOMES_TOTAL, EMAIL_DELIVERY_SECONDS};
use crate::store::NotificationLog;

/// What happens to an email task still running when the budget runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PendingPolicy {
    /// Leave it running; its result only reaches the log.
    #[default]
    Detach,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub budget: Duration,
    pub on_timeout: PendingPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(5),
            on_timeout: PendingPolicy::Detach,
        }
    }
}

/// One notification to record and (when an address is known) email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    pub user_id: UserId,
    /// Stored in the notification log.
    pub message: String,
    pub subject: String,
    pub body_html: String,
    pub recipient: Option<String>,
}

impl NotificationRequest {
    pub fn adhoc(user_id: UserId, message: impl Into<String>, recipient: Option<String>) -> Self {
        let message = message.into();
        Self {
            user_id,
            subject: "New notification".into(),
            body_html: format!("<p>You have a new notification:<br> {message}</p>"),
            message,
            recipient,
        }
    }

    pub fn return_reminder(user_id: UserId, message: impl Into<String>, recipient: Option<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            subject: "Return reminder".into(),
            body_html: "<p>Remember to return the vehicle on time to avoid extra charges.</p>".into(),
            recipient,
        }
    }

    pub fn reservation_confirmed(
        reservation: &Reservation,
        vehicle: Option<&Vehicle>,
        recipient: Option<String>,
    ) -> Self {
        let from = format_ms(reservation.span.start);
        let until = format_ms(reservation.span.end);
        let vehicle_line = vehicle
            .map(Vehicle::describe)
            .unwrap_or_else(|| reservation.vehicle_id.to_string());
        Self {
            user_id: reservation.user_id,
            message: format!("Reservation {} confirmed from {from} until {until}", reservation.id),
            subject: "Vehicle reservation confirmed".into(),
            body_html: format!(
                "Your reservation has been confirmed from {from} until {until}. \
                 Reservation details:<p>Vehicle: {vehicle_line}</p>"
            ),
            recipient,
        }
    }

    pub fn payment_received(user_id: UserId, invoice: &Invoice, recipient: Option<String>) -> Self {
        let amount = format!("{}.{:02}", invoice.amount_cents / 100, invoice.amount_cents % 100);
        Self {
            user_id,
            message: format!("Payment {} received: {amount}", invoice.payment_id),
            subject: "Payment received".into(),
            body_html: format!(
                "<p>We received your payment of {amount}.</p><p>Invoice: {}</p>",
                invoice.id
            ),
            recipient,
        }
    }
}

/// Merged result of the email half of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    /// Delivery failed inside the budget. The notification row still exists.
    SendFailed(String),
    /// Still running when the budget ran out, or never started for lack of an address.
    Pending,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::SendFailed(_) => "send_failed",
            DispatchOutcome::Pending => "pending",
        }
    }

    /// Caller-facing summary of the email side.
    pub fn message(&self) -> String {
        match self {
            DispatchOutcome::Sent => "email sent".into(),
            DispatchOutcome::SendFailed(reason) => format!("email delivery failed: {reason}"),
            DispatchOutcome::Pending => "email delivery is taking longer than expected".into(),
        }
    }
}

pub struct Dispatcher {
    log: Arc<dyn NotificationLog>,
    mailer: Arc<dyn Mailer>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(log: Arc<dyn NotificationLog>, mailer: Arc<dyn Mailer>, config: DispatchConfig) -> Self {
        Self { log, mailer, config }
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Persist the notification, then give the email at most `budget`.
    ///
    /// Only a failure to persist the notification is an error. Email problems
    /// are reported through the outcome.
    pub async fn dispatch(&self, request: NotificationRequest) -> Result<DispatchOutcome, ServiceError> {
        validate_message(&request.message)?;

        self.log
            .append_notification(Notification {
                id: Ulid::new(),
                user_id: request.user_id,
                message: request.message,
                sent_at: now_ms(),
            })
            .await?;

        let Some(to) = request.recipient else {
            warn!(user = %request.user_id, "no email address for user, email not attempted");
            return Ok(record(DispatchOutcome::Pending));
        };

        let mailer = self.mailer.clone();
        let subject = request.subject;
        let body = request.body_html;
        let mut delivery = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = mailer.send(&to, &subject, &body).await;
            metrics::histogram!(EMAIL_DELIVERY_SECONDS).record(started.elapsed().as_secs_f64());
            match &result {
                Ok(()) => debug!(%to, "email delivered"),
                Err(e) => warn!(%to, "email delivery failed: {e}"),
            }
            result
        });

        let outcome = match tokio::time::timeout(self.config.budget, &mut delivery).await {
            Ok(Ok(Ok(()))) => DispatchOutcome::Sent,
            Ok(Ok(Err(e))) => DispatchOutcome::SendFailed(e.to_string()),
            Ok(Err(join)) => DispatchOutcome::SendFailed(format!("email task failed: {join}")),
            Err(_) => {
                warn!(
                    budget_ms = self.config.budget.as_millis() as u64,
                    "email delivery is taking too long, responding without it"
                );
                if self.config.on_timeout == PendingPolicy::Abort {
                    delivery.abort();
                }
                DispatchOutcome::Pending
            }
        };
        Ok(record(outcome))
    }

    /// The ad-hoc notice followed by the return reminder. Stops at the first
    /// persistence failure.
    pub async fn dispatch_both(
        &self,
        user_id: UserId,
        message: &str,
        recipient: Option<String>,
    ) -> Result<[DispatchOutcome; 2], ServiceError> {
        let first = self
            .dispatch(NotificationRequest::adhoc(user_id, message, recipient.clone()))
            .await?;
        let second = self
            .dispatch(NotificationRequest::return_reminder(user_id, message, recipient))
            .await?;
        Ok([first, second])
    }

    pub async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>, ServiceError> {
        Ok(self.log.notifications_for(user_id).await?)
    }
}

fn validate_message(message: &str) -> Result<(), ServiceError> {
    if message.trim().is_empty() {
        return Err(ServiceError::validation("notification message is empty"));
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(ServiceError::validation(format!(
            "notification message exceeds {MAX_MESSAGE_LEN} bytes"
        )));
    }
    Ok(())
}

fn record(outcome: DispatchOutcome) -> DispatchOutcome {
    metrics::counter!(DISPATCH_OUTCOMES_TOTAL, "outcome" => outcome.label()).increment(1);
    info!(outcome = outcome.label(), "notification dispatched");
    outcome
}
