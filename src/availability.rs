use std::sync::Arc;

use serde::Serialize;

use crate::error::ServiceError;
use crate::model::*;
use crate::store::IntervalStore;

/// Answer to "may this vehicle be booked for this span?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub reason: String,
    /// Active reservations standing in the way.
    pub conflicting: Vec<ReservationId>,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        self.available
    }
}

/// Pure decision over the vehicle's existing reservations. Rows that are not
/// active never block.
pub fn decide(existing: &[Reservation], span: &Span, boundary: Boundary) -> Availability {
    let conflicting: Vec<ReservationId> = existing
        .iter()
        .filter(|r| r.is_active() && boundary.conflicts(&r.span, span))
        .map(|r| r.id)
        .collect();
    if conflicting.is_empty() {
        Availability {
            available: true,
            reason: "vehicle is available".into(),
            conflicting,
        }
    } else {
        Availability {
            available: false,
            reason: "vehicle is not available in the requested time range".into(),
            conflicting,
        }
    }
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start and internally disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for b in base {
        let mut cursor = b.start;
        while ri < to_remove.len() && to_remove[ri].end <= cursor {
            ri += 1;
        }
        for r in to_remove[ri..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }
    result
}

/// Store-backed availability queries. Advisory only: nothing stops another
/// writer between a check and the insert that follows it.
pub struct AvailabilityChecker {
    store: Arc<dyn IntervalStore>,
    boundary: Boundary,
}

impl AvailabilityChecker {
    pub fn new(store: Arc<dyn IntervalStore>, boundary: Boundary) -> Self {
        Self { store, boundary }
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub async fn is_available(&self, vehicle_id: VehicleId, span: Span) -> Result<Availability, ServiceError> {
        let existing = self
            .store
            .reservations_overlapping(vehicle_id, span, Some(ReservationStatus::Active))
            .await?;
        Ok(decide(&existing, &span, self.boundary))
    }

    /// Like `is_available`, ignoring one reservation (the one being edited).
    pub async fn is_available_except(
        &self,
        vehicle_id: VehicleId,
        span: Span,
        exclude: ReservationId,
    ) -> Result<Availability, ServiceError> {
        let mut existing = self
            .store
            .reservations_overlapping(vehicle_id, span, Some(ReservationStatus::Active))
            .await?;
        existing.retain(|r| r.id != exclude);
        Ok(decide(&existing, &span, self.boundary))
    }

    /// Every known vehicle with no active reservation blocking `span`.
    pub async fn available_vehicles(&self, span: Span) -> Result<Vec<Vehicle>, ServiceError> {
        let mut free = Vec::new();
        for vehicle in self.store.list_vehicles().await? {
            if self.is_available(vehicle.id, span).await?.available {
                free.push(vehicle);
            }
        }
        Ok(free)
    }

    /// Sub-spans of `window` not covered by any active reservation.
    pub async fn free_windows(&self, vehicle_id: VehicleId, window: Span) -> Result<Vec<Span>, ServiceError> {
        let existing = self
            .store
            .reservations_overlapping(vehicle_id, window, Some(ReservationStatus::Active))
            .await?;
        let mut taken: Vec<Span> = existing
            .iter()
            .filter(|r| r.span.overlaps(&window))
            .map(|r| Span::new(r.span.start.max(window.start), r.span.end.min(window.end)))
            .collect();
        taken.sort_by_key(|s| s.start);
        Ok(subtract_intervals(&[window], &merge_overlapping(&taken)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use proptest::prelude::*;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;

    fn active(vehicle_id: VehicleId, start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: Ulid::new(),
            vehicle_id,
            span: Span::new(start, end),
            status: ReservationStatus::Active,
        }
    }

    async fn checker_with(rows: Vec<Reservation>, boundary: Boundary) -> AvailabilityChecker {
        let store = Arc::new(Store::in_memory());
        for r in rows {
            store.insert_reservation(r).await.unwrap();
        }
        AvailabilityChecker::new(store, boundary)
    }

    #[test]
    fn decide_empty_is_available() {
        let result = decide(&[], &Span::new(0, H), Boundary::HalfOpen);
        assert!(result.available);
        assert!(result.conflicting.is_empty());
    }

    #[test]
    fn decide_ignores_terminal_rows() {
        let mut cancelled = active(Ulid::nil(), 0, 2 * H);
        cancelled.status = ReservationStatus::Cancelled;
        let result = decide(&[cancelled], &Span::new(H, 3 * H), Boundary::Closed);
        assert!(result.available);
    }

    #[test]
    fn decide_reports_conflicting_ids() {
        let a = active(Ulid::nil(), 0, 2 * H);
        let b = active(Ulid::nil(), 3 * H, 4 * H);
        let result = decide(&[a.clone(), b], &Span::new(H, 2 * H + 1), Boundary::HalfOpen);
        assert!(!result.available);
        assert_eq!(result.conflicting, vec![a.id]);
        assert!(result.reason.contains("not available"));
    }

    #[tokio::test]
    async fn booked_morning_blocks_overlap_but_not_adjacent() {
        let vid = Ulid::new();
        let checker = checker_with(vec![active(vid, 10 * H, 12 * H)], Boundary::HalfOpen).await;
        assert!(!checker.is_available(vid, Span::new(11 * H, 13 * H)).await.unwrap().available);
        assert!(checker.is_available(vid, Span::new(12 * H, 14 * H)).await.unwrap().available);
    }

    #[tokio::test]
    async fn closed_boundary_blocks_adjacent() {
        let vid = Ulid::new();
        let checker = checker_with(vec![active(vid, 10 * H, 12 * H)], Boundary::Closed).await;
        assert!(!checker.is_available(vid, Span::new(12 * H, 14 * H)).await.unwrap().available);
        assert!(checker.is_available(vid, Span::new(12 * H + 1, 14 * H)).await.unwrap().available);
    }

    #[tokio::test]
    async fn other_vehicles_do_not_interfere() {
        let vid = Ulid::new();
        let checker = checker_with(vec![active(vid, 0, 10 * H)], Boundary::HalfOpen).await;
        assert!(checker.is_available(Ulid::new(), Span::new(0, 10 * H)).await.unwrap().available);
    }

    #[tokio::test]
    async fn except_skips_the_edited_row() {
        let vid = Ulid::new();
        let mine = active(vid, 0, 2 * H);
        let checker = checker_with(vec![mine.clone()], Boundary::HalfOpen).await;
        let span = Span::new(H, 3 * H);
        assert!(!checker.is_available(vid, span).await.unwrap().available);
        assert!(checker.is_available_except(vid, span, mine.id).await.unwrap().available);
    }

    #[tokio::test]
    async fn available_vehicles_filters_booked() {
        let store = Arc::new(Store::in_memory());
        let mut ids = Vec::new();
        for plate in ["A", "B"] {
            let v = Vehicle {
                id: Ulid::new(),
                license_plate: plate.into(),
                brand: "Fiat".into(),
                model: "500".into(),
                status: VehicleStatus::Available,
                location: None,
            };
            ids.push(v.id);
            store.upsert_vehicle(v).await.unwrap();
        }
        store.insert_reservation(active(ids[0], 0, 4 * H)).await.unwrap();
        let checker = AvailabilityChecker::new(store, Boundary::HalfOpen);
        let free = checker.available_vehicles(Span::new(H, 2 * H)).await.unwrap();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].id, ids[1]);
    }

    #[tokio::test]
    async fn free_windows_carve_out_bookings() {
        let vid = Ulid::new();
        let checker = checker_with(
            vec![
                active(vid, 9 * H, 10 * H),
                active(vid, 12 * H, 14 * H),
                active(vid, 13 * H, 15 * H),
            ],
            Boundary::HalfOpen,
        )
        .await;
        let free = checker.free_windows(vid, Span::new(8 * H, 18 * H)).await.unwrap();
        assert_eq!(
            free,
            vec![
                Span::new(8 * H, 9 * H),
                Span::new(10 * H, 12 * H),
                Span::new(15 * H, 18 * H),
            ]
        );
    }

    #[test]
    fn merge_joins_adjacent() {
        let merged = merge_overlapping(&[Span::new(0, 10), Span::new(10, 20), Span::new(30, 40)]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);
    }

    #[test]
    fn subtract_empty_removals() {
        let base = vec![Span::new(0, 100)];
        assert_eq!(subtract_intervals(&base, &[]), base);
        assert!(subtract_intervals(&[], &[Span::new(0, 10)]).is_empty());
    }

    fn arb_rows() -> impl Strategy<Value = Vec<(Ms, Ms, bool)>> {
        prop::collection::vec((0i64..200, 1i64..50, any::<bool>()), 0..20)
    }

    proptest! {
        #[test]
        fn decide_is_negation_of_intersection(
            rows in arb_rows(),
            start in 0i64..200,
            len in 1i64..50,
            closed in any::<bool>(),
        ) {
            let boundary = if closed { Boundary::Closed } else { Boundary::HalfOpen };
            let existing: Vec<Reservation> = rows
                .iter()
                .map(|&(s, l, is_active)| {
                    let mut r = active(Ulid::nil(), s, s + l);
                    if !is_active {
                        r.status = ReservationStatus::Cancelled;
                    }
                    r
                })
                .collect();
            let query = Span::new(start, start + len);
            let intersects = existing.iter().any(|r| {
                r.is_active()
                    && match boundary {
                        Boundary::HalfOpen => r.span.start < query.end && query.start < r.span.end,
                        Boundary::Closed => r.span.start <= query.end && query.start <= r.span.end,
                    }
            });
            prop_assert_eq!(decide(&existing, &query, boundary).available, !intersects);
        }

        #[test]
        fn free_windows_never_intersect_bookings(
            rows in prop::collection::vec((0i64..200, 1i64..50), 0..10),
        ) {
            let spans: Vec<Span> = {
                let mut v: Vec<Span> = rows.iter().map(|&(s, l)| Span::new(s, s + l)).collect();
                v.sort_by_key(|s| s.start);
                merge_overlapping(&v)
            };
            let window = Span::new(0, 300);
            let free = subtract_intervals(&[window], &spans);
            for f in &free {
                prop_assert!(spans.iter().all(|s| !s.overlaps(f)));
            }
            let covered: Ms = free.iter().map(Span::duration_ms).sum::<Ms>()
                + spans.iter().map(|s| s.end.min(300) - s.start.max(0)).filter(|d| *d > 0).sum::<Ms>();
            prop_assert_eq!(covered, window.duration_ms());
        }
    }
}
