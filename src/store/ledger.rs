use crate::model::*;

/// Every reservation row of one vehicle, kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct VehicleLedger {
    pub vehicle_id: VehicleId,
    pub reservations: Vec<Reservation>,
}

impl VehicleLedger {
    pub fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            reservations: Vec::new(),
        }
    }

    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Overwrite span and status, re-sorting if the start moved.
    pub fn apply_changes(&mut self, id: ReservationId, changes: ReservationChanges) -> Option<Reservation> {
        let mut row = self.remove(id)?;
        row.span = changes.span;
        row.status = changes.status;
        self.insert(row.clone());
        Some(row)
    }

    /// Rows whose closed interval meets `query`. This is a superset of what
    /// either boundary rule treats as a conflict.
    pub fn meeting(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start <= query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end >= query.start)
    }

    /// Active rows blocking `span` under `boundary`, skipping `exclude`.
    pub fn active_conflicts(
        &self,
        span: &Span,
        boundary: Boundary,
        exclude: Option<ReservationId>,
    ) -> Vec<ReservationId> {
        self.meeting(span)
            .filter(|r| r.is_active() && Some(r.id) != exclude)
            .filter(|r| boundary.conflicts(&r.span, span))
            .map(|r| r.id)
            .collect()
    }

    pub fn elapsed_active(&self, now: Ms) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(move |r| r.is_active() && r.span.end <= now)
    }
}
