use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::*;

/// Result of a guarded status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied(Reservation),
    /// The row no longer meets the precondition; carries its current state.
    Rejected(Reservation),
    Missing,
}

/// Reservation and vehicle persistence consumed by admission control.
#[async_trait]
pub trait IntervalStore: Send + Sync {
    /// Plain insert. Performs no overlap check of its own.
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;

    /// Insert only if no active reservation on the vehicle conflicts under
    /// `boundary`; the check and the insert are atomic for that vehicle.
    async fn insert_reservation_exclusive(
        &self,
        reservation: Reservation,
        boundary: Boundary,
    ) -> Result<(), StoreError>;

    /// Reservations whose closed interval meets `span`, optionally filtered by
    /// status. Callers narrow the result with their boundary rule.
    async fn reservations_overlapping(
        &self,
        vehicle_id: VehicleId,
        span: Span,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// `None` when no row has this id.
    async fn update_reservation(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Like `update_reservation`, but an active result must not conflict with
    /// any other active row under `boundary`. Checked and written under the
    /// vehicle's write lock; a conflict is `StoreError::Overlap`.
    async fn update_reservation_exclusive(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
        boundary: Boundary,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Move `id` from `from` to `to`, leaving its span alone. With `ended_by`
    /// the row must also end at or before that instant. Checked and written
    /// under the vehicle's write lock.
    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        ended_by: Option<Ms>,
    ) -> Result<Transition, StoreError>;

    /// Hard delete. `None` when no row has this id.
    async fn delete_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    async fn list_reservations(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Active reservations whose end is at or before `now`.
    async fn elapsed_reservations(&self, now: Ms) -> Result<Vec<Reservation>, StoreError>;

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError>;

    async fn vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, StoreError>;

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError>;

    /// `false` when the vehicle is unknown.
    async fn update_vehicle_location(&self, id: VehicleId, location: GeoPoint) -> Result<bool, StoreError>;

    /// `false` when the vehicle is unknown.
    async fn update_vehicle_status(&self, id: VehicleId, status: VehicleStatus) -> Result<bool, StoreError>;
}

/// Append-only notification rows.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn append_notification(&self, notification: Notification) -> Result<(), StoreError>;

    async fn notifications_for(&self, user_id: UserId) -> Result<Vec<Notification>, StoreError>;
}

/// Payment capture.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn capture(&self, payment: &Payment) -> Result<(), StoreError>;
}

/// Mirror of externally sourced characters.
#[async_trait]
pub trait CharacterStore: Send + Sync {
    /// Insert unless a row with the same id exists. Returns whether a row was added.
    async fn save_character_if_absent(&self, character: Character) -> Result<bool, StoreError>;

    /// Case-insensitive substring match on name, ordered by id.
    async fn characters(
        &self,
        limit: usize,
        offset: usize,
        search: &str,
    ) -> Result<Vec<Character>, StoreError>;

    async fn character_count(&self) -> Result<usize, StoreError>;
}
