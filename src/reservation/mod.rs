//! Reservation lifecycle: admission control on create, overwrite-style
//! updates, soft and hard removal.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::availability::AvailabilityChecker;
use crate::dispatch::{DispatchOutcome, Dispatcher, NotificationRequest};
use crate::error::{EntityKind, ServiceError, StoreError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{
    RESERVATION_CONFLICTS_TOTAL, RESERVATIONS_CREATED_TOTAL, RESERVATIONS_SWEPT_TOTAL,
};
use crate::store::{IntervalStore, Transition};

/// How a create turns a passed availability check into a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionMode {
    /// Plain insert after the advisory check. Concurrent creates for
    /// overlapping spans can both land.
    #[default]
    CheckThenInsert,
    /// The store re-checks overlap under the vehicle's write lock.
    Exclusive,
}

impl AdmissionMode {
    fn label(self) -> &'static str {
        match self {
            AdmissionMode::CheckThenInsert => "check_then_insert",
            AdmissionMode::Exclusive => "exclusive",
        }
    }
}

/// Whether an update is checked against the vehicle's other reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    #[default]
    Overwrite,
    Revalidate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    /// `None` books from now for the default duration.
    pub span: Option<Span>,
    /// Address for the confirmation email.
    pub contact: Option<String>,
}

/// A committed reservation and what happened to its confirmation email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booking {
    pub reservation: Reservation,
    pub delivery: DispatchOutcome,
}

impl Booking {
    pub fn message(&self) -> String {
        format!("reservation created, {}", self.delivery.message())
    }
}

pub struct ReservationManager {
    store: Arc<dyn IntervalStore>,
    checker: AvailabilityChecker,
    dispatcher: Arc<Dispatcher>,
    admission: AdmissionMode,
    update_policy: UpdatePolicy,
}

impl ReservationManager {
    pub fn new(
        store: Arc<dyn IntervalStore>,
        dispatcher: Arc<Dispatcher>,
        boundary: Boundary,
        admission: AdmissionMode,
        update_policy: UpdatePolicy,
    ) -> Self {
        Self {
            checker: AvailabilityChecker::new(store.clone(), boundary),
            store,
            dispatcher,
            admission,
            update_policy,
        }
    }

    pub fn checker(&self) -> &AvailabilityChecker {
        &self.checker
    }

    /// Check, insert, then dispatch the confirmation, strictly in that order.
    ///
    /// A conflict leaves the store untouched. Once the row is inserted it
    /// stays, even if recording the notification fails afterwards.
    pub async fn create(&self, request: NewReservation) -> Result<Booking, ServiceError> {
        let span = match request.span {
            Some(span) => span,
            None => {
                let now = now_ms();
                Span::new(now, now + DEFAULT_RESERVATION_MS)
            }
        };
        validate_span(&span)?;

        let availability = self.checker.is_available(request.vehicle_id, span).await?;
        if !availability.available {
            return Err(conflict(request.vehicle_id, span, availability.conflicting));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            user_id: request.user_id,
            vehicle_id: request.vehicle_id,
            span,
            status: ReservationStatus::Active,
        };
        match self.admission {
            AdmissionMode::CheckThenInsert => self.store.insert_reservation(reservation.clone()).await?,
            AdmissionMode::Exclusive => {
                match self
                    .store
                    .insert_reservation_exclusive(reservation.clone(), self.checker.boundary())
                    .await
                {
                    Ok(()) => {}
                    Err(StoreError::Overlap { existing, .. }) => {
                        return Err(conflict(request.vehicle_id, span, vec![existing]));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        metrics::counter!(RESERVATIONS_CREATED_TOTAL, "mode" => self.admission.label()).increment(1);
        info!(
            reservation = %reservation.id,
            vehicle = %reservation.vehicle_id,
            start = span.start,
            end = span.end,
            "reservation created"
        );

        // Only decorates the email, so a failed lookup is not fatal.
        let vehicle = match self.store.vehicle(reservation.vehicle_id).await {
            Ok(v) => v,
            Err(e) => {
                debug!("vehicle lookup for confirmation failed: {e}");
                None
            }
        };
        let delivery = self
            .dispatcher
            .dispatch(NotificationRequest::reservation_confirmed(
                &reservation,
                vehicle.as_ref(),
                request.contact,
            ))
            .await?;
        Ok(Booking { reservation, delivery })
    }

    pub async fn get(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.store
            .reservation(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::Reservation, id))
    }

    pub async fn list(&self) -> Result<Vec<Reservation>, ServiceError> {
        Ok(self.store.list_reservations().await?)
    }

    /// Overwrite span and status. Under `UpdatePolicy::Overwrite` nothing is
    /// checked against other reservations. Under `Revalidate` an active result
    /// must be free of other active rows; with `AdmissionMode::Exclusive` the
    /// store makes that check under the vehicle's write lock.
    pub async fn update(&self, id: ReservationId, changes: ReservationChanges) -> Result<Reservation, ServiceError> {
        validate_span(&changes.span)?;
        let current = self.get(id).await?;
        let revalidate =
            self.update_policy == UpdatePolicy::Revalidate && changes.status == ReservationStatus::Active;

        let updated = if revalidate && self.admission == AdmissionMode::Exclusive {
            match self
                .store
                .update_reservation_exclusive(id, changes, self.checker.boundary())
                .await
            {
                Ok(updated) => updated,
                Err(StoreError::Overlap { existing, .. }) => {
                    return Err(conflict(current.vehicle_id, changes.span, vec![existing]));
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            if revalidate {
                let availability = self
                    .checker
                    .is_available_except(current.vehicle_id, changes.span, id)
                    .await?;
                if !availability.available {
                    return Err(conflict(current.vehicle_id, changes.span, availability.conflicting));
                }
            }
            self.store.update_reservation(id, changes).await?
        };
        let updated = updated.ok_or_else(|| ServiceError::not_found(EntityKind::Reservation, id))?;
        info!(reservation = %id, status = ?updated.status, "reservation updated");
        Ok(updated)
    }

    /// Hard delete.
    pub async fn delete(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        let removed = self
            .store
            .delete_reservation(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(EntityKind::Reservation, id))?;
        info!(reservation = %id, "reservation deleted");
        Ok(removed)
    }

    /// Soft removal: the row stays, its interval is freed.
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.finish(id, ReservationStatus::Cancelled).await
    }

    pub async fn complete(&self, id: ReservationId) -> Result<Reservation, ServiceError> {
        self.finish(id, ReservationStatus::Completed).await
    }

    /// Mark every active reservation that ended at or before `now` completed.
    /// Returns how many rows moved.
    pub async fn complete_elapsed(&self, now: Ms) -> Result<usize, ServiceError> {
        let mut completed = 0;
        for r in self.store.elapsed_reservations(now).await? {
            match self
                .store
                .transition_reservation(r.id, ReservationStatus::Active, ReservationStatus::Completed, Some(now))
                .await?
            {
                Transition::Applied(_) => {
                    completed += 1;
                    info!(reservation = %r.id, "reservation completed after its end time");
                }
                // Changed between the scan and the transition.
                Transition::Rejected(current) => {
                    debug!("sweeper skip {}: now {:?} ending {}", r.id, current.status, current.span.end)
                }
                Transition::Missing => debug!("sweeper skip {}: already gone", r.id),
            }
        }
        metrics::counter!(RESERVATIONS_SWEPT_TOTAL).increment(completed as u64);
        Ok(completed)
    }

    async fn finish(&self, id: ReservationId, status: ReservationStatus) -> Result<Reservation, ServiceError> {
        match self
            .store
            .transition_reservation(id, ReservationStatus::Active, status, None)
            .await?
        {
            Transition::Applied(updated) => {
                info!(reservation = %id, status = ?status, "reservation closed");
                Ok(updated)
            }
            Transition::Rejected(current) => Err(ServiceError::validation(format!(
                "reservation {id} is {:?}, only active reservations can change state",
                current.status
            ))),
            Transition::Missing => Err(ServiceError::not_found(EntityKind::Reservation, id)),
        }
    }
}

fn conflict(vehicle_id: VehicleId, span: Span, conflicting: Vec<ReservationId>) -> ServiceError {
    metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
    warn!(vehicle = %vehicle_id, start = span.start, end = span.end, "vehicle not available");
    ServiceError::Conflict {
        vehicle_id,
        span,
        conflicting,
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), ServiceError> {
    if span.start >= span.end {
        return Err(ServiceError::validation("start time must be before end time"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(ServiceError::validation("time range is outside the supported window"));
    }
    if span.duration_ms() > MAX_RESERVATION_MS {
        return Err(ServiceError::validation(format!(
            "reservation longer than {} hours",
            MAX_RESERVATION_MS / HOUR_MS
        )));
    }
    Ok(())
}
