use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::*;

use super::{IntervalStore, SharedLedger, Store, Transition};

impl Store {
    /// The vehicle and ledger currently holding reservation `id`.
    fn ledger_holding(&self, id: ReservationId) -> Option<(VehicleId, SharedLedger)> {
        let vehicle_id = self.reservation_to_vehicle.get(&id).map(|e| *e.value())?;
        Some((vehicle_id, self.get_ledger(&vehicle_id)?))
    }
}

#[async_trait]
impl IntervalStore for Store {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let ledger = self.ledger_or_create(reservation.vehicle_id);
        let mut guard = ledger.write().await;
        self.persist_and_apply(&mut guard, &Event::ReservationInserted(reservation))
            .await
    }

    async fn insert_reservation_exclusive(
        &self,
        reservation: Reservation,
        boundary: Boundary,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let ledger = self.ledger_or_create(reservation.vehicle_id);
        let mut guard = ledger.write().await;
        if reservation.is_active()
            && let Some(existing) = guard
                .active_conflicts(&reservation.span, boundary, None)
                .first()
                .copied()
        {
            return Err(StoreError::Overlap {
                vehicle_id: reservation.vehicle_id,
                existing,
            });
        }
        self.persist_and_apply(&mut guard, &Event::ReservationInserted(reservation))
            .await
    }

    async fn reservations_overlapping(
        &self,
        vehicle_id: VehicleId,
        span: Span,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let Some(ledger) = self.get_ledger(&vehicle_id) else {
            return Ok(Vec::new());
        };
        let guard = ledger.read().await;
        Ok(guard
            .meeting(&span)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let Some((_, ledger)) = self.ledger_holding(id) else {
            return Ok(None);
        };
        let guard = ledger.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, StoreError> {
        let _gate = self.gate.read().await;
        let Some((vehicle_id, ledger)) = self.ledger_holding(id) else {
            return Ok(None);
        };
        let mut guard = ledger.write().await;
        if guard.get(id).is_none() {
            return Ok(None);
        }
        let event = Event::ReservationUpdated { id, vehicle_id, changes };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.get(id).cloned())
    }

    async fn update_reservation_exclusive(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
        boundary: Boundary,
    ) -> Result<Option<Reservation>, StoreError> {
        let _gate = self.gate.read().await;
        let Some((vehicle_id, ledger)) = self.ledger_holding(id) else {
            return Ok(None);
        };
        let mut guard = ledger.write().await;
        if guard.get(id).is_none() {
            return Ok(None);
        }
        if changes.status == ReservationStatus::Active
            && let Some(existing) = guard
                .active_conflicts(&changes.span, boundary, Some(id))
                .first()
                .copied()
        {
            return Err(StoreError::Overlap { vehicle_id, existing });
        }
        let event = Event::ReservationUpdated { id, vehicle_id, changes };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.get(id).cloned())
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        ended_by: Option<Ms>,
    ) -> Result<Transition, StoreError> {
        let _gate = self.gate.read().await;
        let Some((vehicle_id, ledger)) = self.ledger_holding(id) else {
            return Ok(Transition::Missing);
        };
        let mut guard = ledger.write().await;
        let Some(current) = guard.get(id).cloned() else {
            return Ok(Transition::Missing);
        };
        let due = ended_by.is_none_or(|t| current.span.end <= t);
        if current.status != from || !due {
            return Ok(Transition::Rejected(current));
        }
        let changes = ReservationChanges {
            span: current.span,
            status: to,
        };
        let event = Event::ReservationUpdated { id, vehicle_id, changes };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Transition::Applied(Reservation { status: to, ..current }))
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let _gate = self.gate.read().await;
        let Some((vehicle_id, ledger)) = self.ledger_holding(id) else {
            return Ok(None);
        };
        let mut guard = ledger.write().await;
        let Some(existing) = guard.get(id).cloned() else {
            return Ok(None);
        };
        let event = Event::ReservationDeleted { id, vehicle_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(Some(existing))
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            all.extend(guard.reservations.iter().cloned());
        }
        all.sort_by_key(|r| (r.span.start, r.id));
        Ok(all)
    }

    async fn elapsed_reservations(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        let ledgers: Vec<_> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut due = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            due.extend(guard.elapsed_active(now).cloned());
        }
        Ok(due)
    }

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        self.persist_record(Event::VehicleUpserted(vehicle)).await
    }

    async fn vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.vehicles.get(&id).map(|e| e.value().clone()))
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        let mut vehicles: Vec<Vehicle> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        vehicles.sort_by_key(|v| v.id);
        Ok(vehicles)
    }

    async fn update_vehicle_location(&self, id: VehicleId, location: GeoPoint) -> Result<bool, StoreError> {
        if !self.vehicles.contains_key(&id) {
            return Ok(false);
        }
        self.persist_record(Event::VehicleLocated { id, location }).await?;
        Ok(true)
    }

    async fn update_vehicle_status(&self, id: VehicleId, status: VehicleStatus) -> Result<bool, StoreError> {
        if !self.vehicles.contains_key(&id) {
            return Ok(false);
        }
        self.persist_record(Event::VehicleStatusChanged { id, status }).await?;
        Ok(true)
    }
}
