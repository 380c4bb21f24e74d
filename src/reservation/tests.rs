use super::*;
use crate::dispatch::DispatchConfig;
use crate::mail::LogMailer;
use crate::store::{NotificationLog, Store};
use async_trait::async_trait;
use std::sync::Mutex;
use proptest::prelude::*;
use tokio::sync::Barrier;

const H: Ms = HOUR_MS;
/// 2026-01-01T00:00:00Z
const DAY0: Ms = 1_767_225_600_000;

fn at(hour: i64) -> Ms {
    DAY0 + hour * H
}

fn manager_with(
    store: Arc<dyn IntervalStore>,
    log: Arc<dyn NotificationLog>,
    admission: AdmissionMode,
    update_policy: UpdatePolicy,
) -> ReservationManager {
    let dispatcher = Dispatcher::new(log, Arc::new(LogMailer), DispatchConfig::default());
    ReservationManager::new(store, Arc::new(dispatcher), Boundary::HalfOpen, admission, update_policy)
}

fn manager(store: &Arc<Store>) -> ReservationManager {
    manager_with(
        store.clone(),
        store.clone(),
        AdmissionMode::CheckThenInsert,
        UpdatePolicy::Overwrite,
    )
}

fn booking(vehicle_id: VehicleId, start: Ms, end: Ms) -> NewReservation {
    NewReservation {
        user_id: Ulid::new(),
        vehicle_id,
        span: Some(Span::new(start, end)),
        contact: Some("driver@example.com".into()),
    }
}

#[tokio::test]
async fn create_defaults_to_two_hours_from_now() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let before = now_ms();
    let booked = m
        .create(NewReservation {
            user_id: Ulid::new(),
            vehicle_id: Ulid::new(),
            span: None,
            contact: None,
        })
        .await
        .unwrap();
    let span = booked.reservation.span;
    assert!(span.start >= before && span.start <= now_ms());
    assert_eq!(span.duration_ms(), 2 * H);
    assert_eq!(booked.reservation.status, ReservationStatus::Active);
    // No address: the notification exists, the email is pending.
    assert_eq!(booked.delivery, DispatchOutcome::Pending);
    assert_eq!(
        store.notifications_for(booked.reservation.user_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn create_sends_confirmation() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let booked = m.create(booking(Ulid::new(), at(10), at(12))).await.unwrap();
    assert_eq!(booked.delivery, DispatchOutcome::Sent);
    assert_eq!(booked.message(), "reservation created, email sent");
    assert_eq!(m.get(booked.reservation.id).await.unwrap(), booked.reservation);
}

#[tokio::test]
async fn overlapping_create_conflicts_adjacent_succeeds() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let vid = Ulid::new();
    let first = m.create(booking(vid, at(10), at(12))).await.unwrap();

    let err = m.create(booking(vid, at(11), at(13))).await.unwrap_err();
    match err {
        ServiceError::Conflict { conflicting, .. } => {
            assert_eq!(conflicting, vec![first.reservation.id]);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(m.list().await.unwrap().len(), 1);

    m.create(booking(vid, at(12), at(14))).await.unwrap();
    assert_eq!(m.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn closed_boundary_rejects_touching() {
    let store = Arc::new(Store::in_memory());
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(LogMailer), DispatchConfig::default());
    let m = ReservationManager::new(
        store.clone(),
        Arc::new(dispatcher),
        Boundary::Closed,
        AdmissionMode::Exclusive,
        UpdatePolicy::Overwrite,
    );
    let vid = Ulid::new();
    m.create(booking(vid, at(10), at(12))).await.unwrap();
    let err = m.create(booking(vid, at(12), at(14))).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn invalid_spans_never_reach_the_store() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let vid = Ulid::new();
    let mut inverted = booking(vid, at(0), at(1));
    inverted.span = Some(Span {
        start: at(5),
        end: at(1),
    });
    let too_long = booking(vid, at(0), at(0) + MAX_RESERVATION_MS + 1);
    let ancient = booking(vid, 0, H);
    for request in [inverted, too_long, ancient] {
        let err = m.create(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)), "{err:?}");
    }
    assert!(m.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let id = Ulid::new();
    let changes = ReservationChanges {
        span: Span::new(at(0), at(1)),
        status: ReservationStatus::Active,
    };
    for err in [
        m.get(id).await.unwrap_err(),
        m.update(id, changes).await.unwrap_err(),
        m.delete(id).await.unwrap_err(),
        m.cancel(id).await.unwrap_err(),
    ] {
        assert_eq!(err.status_code(), 404, "{err}");
    }
}

#[tokio::test]
async fn overwrite_update_skips_the_check() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let vid = Ulid::new();
    m.create(booking(vid, at(10), at(12))).await.unwrap();
    let second = m.create(booking(vid, at(14), at(16))).await.unwrap();

    let moved = m
        .update(
            second.reservation.id,
            ReservationChanges {
                span: Span::new(at(11), at(13)),
                status: ReservationStatus::Active,
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.span, Span::new(at(11), at(13)));
}

#[tokio::test]
async fn revalidating_update_rejects_overlap_but_not_itself() {
    let store = Arc::new(Store::in_memory());
    let m = manager_with(
        store.clone(),
        store.clone(),
        AdmissionMode::CheckThenInsert,
        UpdatePolicy::Revalidate,
    );
    let vid = Ulid::new();
    let first = m.create(booking(vid, at(10), at(12))).await.unwrap();
    let second = m.create(booking(vid, at(14), at(16))).await.unwrap();

    let into_first = ReservationChanges {
        span: Span::new(at(11), at(13)),
        status: ReservationStatus::Active,
    };
    let err = m.update(second.reservation.id, into_first).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));
    assert_eq!(m.get(second.reservation.id).await.unwrap().span, Span::new(at(14), at(16)));

    // Stretching over its own old interval is fine.
    let stretched = ReservationChanges {
        span: Span::new(at(13), at(17)),
        status: ReservationStatus::Active,
    };
    m.update(second.reservation.id, stretched).await.unwrap();

    // Cancelling never conflicts.
    let cancelled = ReservationChanges {
        span: Span::new(at(11), at(13)),
        status: ReservationStatus::Cancelled,
    };
    m.update(second.reservation.id, cancelled).await.unwrap();
    assert!(m.get(first.reservation.id).await.unwrap().is_active());
}

#[tokio::test]
async fn cancel_frees_the_interval() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let vid = Ulid::new();
    let first = m.create(booking(vid, at(10), at(12))).await.unwrap();
    let cancelled = m.cancel(first.reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    m.create(booking(vid, at(10), at(12))).await.unwrap();
    // The cancelled row is still listed.
    assert_eq!(m.list().await.unwrap().len(), 2);

    let again = m.cancel(first.reservation.id).await.unwrap_err();
    assert_eq!(again.status_code(), 400);
    assert!(m.complete(first.reservation.id).await.is_err());
}

#[tokio::test]
async fn delete_is_hard() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let booked = m.create(booking(Ulid::new(), at(1), at(2))).await.unwrap();
    m.delete(booked.reservation.id).await.unwrap();
    assert_eq!(m.get(booked.reservation.id).await.unwrap_err().status_code(), 404);
}

#[tokio::test]
async fn complete_elapsed_only_touches_finished_active_rows() {
    let store = Arc::new(Store::in_memory());
    let m = manager(&store);
    let vid = Ulid::new();
    let done = m.create(booking(vid, at(1), at(2))).await.unwrap();
    let cancelled = m.create(booking(vid, at(2), at(3))).await.unwrap();
    m.cancel(cancelled.reservation.id).await.unwrap();
    let running = m.create(booking(vid, at(4), at(6))).await.unwrap();

    assert_eq!(m.complete_elapsed(at(5)).await.unwrap(), 1);
    assert_eq!(
        m.get(done.reservation.id).await.unwrap().status,
        ReservationStatus::Completed
    );
    assert_eq!(
        m.get(cancelled.reservation.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    assert!(m.get(running.reservation.id).await.unwrap().is_active());
    assert_eq!(m.complete_elapsed(at(5)).await.unwrap(), 0);
}

struct BrokenLog;

#[async_trait]
impl NotificationLog for BrokenLog {
    async fn append_notification(&self, _n: Notification) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("notifications table locked".into()))
    }

    async fn notifications_for(&self, _user_id: UserId) -> Result<Vec<Notification>, StoreError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn notification_failure_keeps_reservation() {
    let store = Arc::new(Store::in_memory());
    let m = manager_with(
        store.clone(),
        Arc::new(BrokenLog),
        AdmissionMode::CheckThenInsert,
        UpdatePolicy::Overwrite,
    );
    let vid = Ulid::new();
    let err = m.create(booking(vid, at(10), at(12))).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(_)));

    let rows = m.list().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].vehicle_id, vid);
}

/// A real store with another writer slipped in between a manager's read and
/// its write.
struct InterleavingStore {
    inner: Store,
    /// Every availability read waits here, so racers all see the same rows.
    barrier: Option<Barrier>,
    /// Applied right after the next elapsed scan returns.
    after_scan: Mutex<Option<(ReservationId, ReservationChanges)>>,
    /// Booked right after the next single-row lookup returns.
    after_lookup: Mutex<Option<Reservation>>,
}

impl InterleavingStore {
    fn new() -> Self {
        Self {
            inner: Store::in_memory(),
            barrier: None,
            after_scan: Mutex::new(None),
            after_lookup: Mutex::new(None),
        }
    }
}

#[async_trait]
impl IntervalStore for InterleavingStore {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.inner.insert_reservation(reservation).await
    }

    async fn insert_reservation_exclusive(
        &self,
        reservation: Reservation,
        boundary: Boundary,
    ) -> Result<(), StoreError> {
        self.inner.insert_reservation_exclusive(reservation, boundary).await
    }

    async fn reservations_overlapping(
        &self,
        vehicle_id: VehicleId,
        span: Span,
        status: Option<ReservationStatus>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let rows = self.inner.reservations_overlapping(vehicle_id, span, status).await?;
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        Ok(rows)
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let row = self.inner.reservation(id).await?;
        let booked = self.after_lookup.lock().unwrap().take();
        if let Some(other) = booked {
            self.inner.insert_reservation_exclusive(other, Boundary::HalfOpen).await?;
        }
        Ok(row)
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, StoreError> {
        self.inner.update_reservation(id, changes).await
    }

    async fn update_reservation_exclusive(
        &self,
        id: ReservationId,
        changes: ReservationChanges,
        boundary: Boundary,
    ) -> Result<Option<Reservation>, StoreError> {
        self.inner.update_reservation_exclusive(id, changes, boundary).await
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        ended_by: Option<Ms>,
    ) -> Result<Transition, StoreError> {
        self.inner.transition_reservation(id, from, to, ended_by).await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.inner.delete_reservation(id).await
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.list_reservations().await
    }

    async fn elapsed_reservations(&self, now: Ms) -> Result<Vec<Reservation>, StoreError> {
        let rows = self.inner.elapsed_reservations(now).await?;
        let pending = self.after_scan.lock().unwrap().take();
        if let Some((id, changes)) = pending {
            self.inner.update_reservation(id, changes).await?;
        }
        Ok(rows)
    }

    async fn upsert_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        self.inner.upsert_vehicle(vehicle).await
    }

    async fn vehicle(&self, id: VehicleId) -> Result<Option<Vehicle>, StoreError> {
        self.inner.vehicle(id).await
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        self.inner.list_vehicles().await
    }

    async fn update_vehicle_location(&self, id: VehicleId, location: GeoPoint) -> Result<bool, StoreError> {
        self.inner.update_vehicle_location(id, location).await
    }

    async fn update_vehicle_status(&self, id: VehicleId, status: VehicleStatus) -> Result<bool, StoreError> {
        self.inner.update_vehicle_status(id, status).await
    }
}

#[tokio::test]
async fn sweeper_leaves_a_row_extended_after_its_scan() {
    let store = Arc::new(InterleavingStore::new());
    let log = Arc::new(Store::in_memory());
    let m = manager_with(store.clone(), log, AdmissionMode::Exclusive, UpdatePolicy::Overwrite);
    let booked = m.create(booking(Ulid::new(), at(8), at(10))).await.unwrap();
    let id = booked.reservation.id;

    let extended = ReservationChanges {
        span: Span::new(at(8), at(14)),
        status: ReservationStatus::Active,
    };
    *store.after_scan.lock().unwrap() = Some((id, extended));

    assert_eq!(m.complete_elapsed(at(11)).await.unwrap(), 0);
    let row = m.get(id).await.unwrap();
    assert_eq!(row.span, Span::new(at(8), at(14)));
    assert!(row.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_cancel_and_complete_close_once() {
    let store = Arc::new(Store::in_memory());
    let m = Arc::new(manager(&store));
    let booked = m.create(booking(Ulid::new(), at(10), at(12))).await.unwrap();
    let id = booked.reservation.id;

    let cancel = tokio::spawn({
        let m = m.clone();
        async move { m.cancel(id).await }
    });
    let complete = tokio::spawn({
        let m = m.clone();
        async move { m.complete(id).await }
    });
    let results = [cancel.await.unwrap(), complete.await.unwrap()];

    let closed: Vec<&Reservation> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(closed.len(), 1);
    assert!(results.iter().any(|r| matches!(r, Err(ServiceError::Validation(_)))));
    assert_eq!(m.get(id).await.unwrap().status, closed[0].status);
}

#[tokio::test]
async fn exclusive_revalidated_update_sees_a_booking_made_after_its_read() {
    let store = Arc::new(InterleavingStore::new());
    let log = Arc::new(Store::in_memory());
    let m = manager_with(store.clone(), log, AdmissionMode::Exclusive, UpdatePolicy::Revalidate);
    let vid = Ulid::new();
    let moving = m.create(booking(vid, at(14), at(16))).await.unwrap();

    let late = Reservation {
        id: Ulid::new(),
        user_id: Ulid::new(),
        vehicle_id: vid,
        span: Span::new(at(10), at(12)),
        status: ReservationStatus::Active,
    };
    *store.after_lookup.lock().unwrap() = Some(late.clone());

    let changes = ReservationChanges {
        span: Span::new(at(11), at(15)),
        status: ReservationStatus::Active,
    };
    match m.update(moving.reservation.id, changes).await {
        Err(ServiceError::Conflict { conflicting, .. }) => assert_eq!(conflicting, vec![late.id]),
        other => panic!("expected conflict, got {other:?}"),
    }
    let rows = m.list().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(m.get(moving.reservation.id).await.unwrap().span, Span::new(at(14), at(16)));
    assert_no_active_overlap(&rows).unwrap();
}

async fn race_two_creates(admission: AdmissionMode) -> (Vec<Result<Booking, ServiceError>>, usize) {
    let store = Arc::new(InterleavingStore {
        barrier: Some(Barrier::new(2)),
        ..InterleavingStore::new()
    });
    let log = Arc::new(Store::in_memory());
    let m = Arc::new(manager_with(store.clone(), log, admission, UpdatePolicy::Overwrite));
    let vid = Ulid::new();

    let a = tokio::spawn({
        let m = m.clone();
        async move { m.create(booking(vid, at(10), at(12))).await }
    });
    let b = tokio::spawn({
        let m = m.clone();
        async move { m.create(booking(vid, at(11), at(13))).await }
    });
    let results = vec![a.await.unwrap(), b.await.unwrap()];
    let rows = store.inner.list_reservations().await.unwrap().len();
    (results, rows)
}

#[tokio::test]
async fn legacy_admission_double_books_under_race() {
    let (results, rows) = race_two_creates(AdmissionMode::CheckThenInsert).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn exclusive_admission_admits_one_racer() {
    let (results, rows) = race_two_creates(AdmissionMode::Exclusive).await;
    let admitted = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::Conflict { .. })))
        .count();
    assert_eq!((admitted, conflicts), (1, 1));
    assert_eq!(rows, 1);
}

#[derive(Debug, Clone)]
enum Op {
    Create { vehicle: usize, start: i64, len: i64 },
    Update { pick: usize, start: i64, len: i64, cancel: bool },
    Delete { pick: usize },
    Cancel { pick: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 0i64..48, 1i64..6).prop_map(|(vehicle, start, len)| Op::Create { vehicle, start, len }),
        (any::<usize>(), 0i64..48, 1i64..6, any::<bool>())
            .prop_map(|(pick, start, len, cancel)| Op::Update { pick, start, len, cancel }),
        any::<usize>().prop_map(|pick| Op::Delete { pick }),
        any::<usize>().prop_map(|pick| Op::Cancel { pick }),
    ]
}

/// Runs `ops` single-threaded and returns every reservation left in the store.
async fn run_ops(ops: Vec<Op>, update_policy: UpdatePolicy) -> Vec<Reservation> {
    let store = Arc::new(Store::in_memory());
    let m = manager_with(store.clone(), store.clone(), AdmissionMode::CheckThenInsert, update_policy);
    let vehicles = [Ulid::new(), Ulid::new(), Ulid::new()];
    for op in ops {
        let rows = m.list().await.unwrap();
        let pick = |i: usize| (!rows.is_empty()).then(|| rows[i % rows.len()].id);
        // Conflicts, validation and missing ids are all expected outcomes here.
        let _ = match op {
            Op::Create { vehicle, start, len } => m
                .create(booking(vehicles[vehicle], at(start), at(start + len)))
                .await
                .map(|_| ()),
            Op::Update { pick: i, start, len, cancel } => match pick(i) {
                Some(id) => {
                    let status = if cancel {
                        ReservationStatus::Cancelled
                    } else {
                        ReservationStatus::Active
                    };
                    let changes = ReservationChanges {
                        span: Span::new(at(start), at(start + len)),
                        status,
                    };
                    m.update(id, changes).await.map(|_| ())
                }
                None => Ok(()),
            },
            Op::Delete { pick: i } => match pick(i) {
                Some(id) => m.delete(id).await.map(|_| ()),
                None => Ok(()),
            },
            Op::Cancel { pick: i } => match pick(i) {
                Some(id) => m.cancel(id).await.map(|_| ()),
                None => Ok(()),
            },
        };
    }
    m.list().await.unwrap()
}

fn assert_no_active_overlap(rows: &[Reservation]) -> Result<(), TestCaseError> {
    for (i, a) in rows.iter().enumerate() {
        for b in &rows[i + 1..] {
            if a.vehicle_id == b.vehicle_id && a.is_active() && b.is_active() {
                prop_assert!(!a.span.overlaps(&b.span), "{a:?} overlaps {b:?}");
            }
        }
    }
    Ok(())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn revalidated_sequences_keep_the_invariant(ops in prop::collection::vec(arb_op(), 1..40)) {
        let rows = runtime().block_on(run_ops(ops, UpdatePolicy::Revalidate));
        assert_no_active_overlap(&rows)?;
    }

    /// Without updates the default policies keep the invariant too.
    #[test]
    fn default_policy_without_updates_keeps_the_invariant(
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let ops: Vec<Op> = ops.into_iter().filter(|op| !matches!(op, Op::Update { .. })).collect();
        let rows = runtime().block_on(run_ops(ops, UpdatePolicy::Overwrite));
        assert_no_active_overlap(&rows)?;
    }
}
