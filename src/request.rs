//! Inbound request bodies and outbound views. Timestamps cross this boundary
//! as RFC 3339 strings and become `Ms` inside.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ServiceError;
use crate::model::*;
use crate::reservation::NewReservation;

pub fn parse_timestamp(field: &str, value: &str) -> Result<Ms, ServiceError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.timestamp_millis())
        .map_err(|e| ServiceError::validation(format!("{field}: invalid RFC 3339 timestamp {value:?}: {e}")))
}

pub fn to_rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

fn parse_span(start: &str, end: &str) -> Result<Span, ServiceError> {
    let start = parse_timestamp("start_time", start)?;
    let end = parse_timestamp("end_time", end)?;
    Span::checked(start, end).ok_or_else(|| ServiceError::validation("start_time must be before end_time"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReservationRequest {
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    /// Both or neither; when absent the booking starts now.
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub email: Option<String>,
}

impl CreateReservationRequest {
    pub fn into_new_reservation(self) -> Result<NewReservation, ServiceError> {
        let span = match (&self.start_time, &self.end_time) {
            (Some(start), Some(end)) => Some(parse_span(start, end)?),
            (None, None) => None,
            _ => {
                return Err(ServiceError::validation(
                    "start_time and end_time must be given together",
                ));
            }
        };
        Ok(NewReservation {
            user_id: self.user_id,
            vehicle_id: self.vehicle_id,
            span,
            contact: self.email.filter(|e| !e.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReservationRequest {
    pub start_time: String,
    pub end_time: String,
    pub status: ReservationStatus,
}

impl UpdateReservationRequest {
    pub fn into_changes(self) -> Result<ReservationChanges, ServiceError> {
        Ok(ReservationChanges {
            span: parse_span(&self.start_time, &self.end_time)?,
            status: self.status,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityRequest {
    pub vehicle_id: VehicleId,
    pub start_time: String,
    pub end_time: String,
}

impl AvailabilityRequest {
    pub fn span(&self) -> Result<Span, ServiceError> {
        parse_span(&self.start_time, &self.end_time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationBody {
    pub user_id: UserId,
    pub message: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub reservation_id: Option<ReservationId>,
    pub amount_cents: i64,
}

impl PaymentRequest {
    pub fn into_payment(self) -> Payment {
        Payment {
            id: Ulid::new(),
            reservation_id: self.reservation_id,
            amount_cents: self.amount_cents,
        }
    }
}

/// Reservation as the request layer shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: ReservationId,
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    pub start_time: String,
    pub end_time: String,
    pub status: ReservationStatus,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            vehicle_id: r.vehicle_id,
            start_time: to_rfc3339(r.span.start),
            end_time: to_rfc3339(r.span.end),
            status: r.status,
        }
    }
}
