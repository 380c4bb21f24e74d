mod interface;
mod ledger;
mod records;
mod reservations;

pub use interface::{CharacterStore, IntervalStore, NotificationLog, PaymentLedger, Transition};
pub use ledger::VehicleLedger;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::error::StoreError;
use crate::journal::Journal;
use crate::model::*;

pub type SharedLedger = Arc<RwLock<VehicleLedger>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal file. Appends that queue up while a flush is running are
/// written together and share one fsync.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            JournalCommand::Append { event, response } => {
                batch.push((event, response));
                while let Ok(next) = rx.try_recv() {
                    match next {
                        JournalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
                commit_batch(&mut journal, &mut batch);
            }
            other => deferred = Some(other),
        }
        if let Some(cmd) = deferred {
            handle_control(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let outcome = journal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let reply = match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.install_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            let mut single = vec![(event, response)];
            commit_batch(journal, &mut single);
        }
    }
}

/// Apply a reservation event to the vehicle's ledger (caller holds the lock).
fn apply_to_ledger(
    ledger: &mut VehicleLedger,
    event: &Event,
    index: &DashMap<ReservationId, VehicleId>,
) {
    match event {
        Event::ReservationInserted(reservation) => {
            index.insert(reservation.id, reservation.vehicle_id);
            ledger.insert(reservation.clone());
        }
        Event::ReservationUpdated { id, changes, .. } => {
            ledger.apply_changes(*id, *changes);
        }
        Event::ReservationDeleted { id, .. } => {
            ledger.remove(*id);
            index.remove(id);
        }
        _ => {}
    }
}

/// The vehicle whose ledger an event touches, if any.
fn event_vehicle_id(event: &Event) -> Option<VehicleId> {
    match event {
        Event::ReservationInserted(r) => Some(r.vehicle_id),
        Event::ReservationUpdated { vehicle_id, .. } | Event::ReservationDeleted { vehicle_id, .. } => {
            Some(*vehicle_id)
        }
        _ => None,
    }
}

/// In-memory tables backed by an optional journal.
///
/// Reservations live in one `VehicleLedger` per vehicle behind a `RwLock`;
/// everything else sits in `DashMap` tables. Mutations go journal first,
/// then memory.
pub struct Store {
    pub(super) ledgers: DashMap<VehicleId, SharedLedger>,
    /// Reverse lookup: reservation id → vehicle id.
    pub(super) reservation_to_vehicle: DashMap<ReservationId, VehicleId>,
    pub(super) vehicles: DashMap<VehicleId, Vehicle>,
    pub(super) notifications: DashMap<UserId, Vec<Notification>>,
    pub(super) payments: DashMap<PaymentId, Payment>,
    pub(super) characters: DashMap<CharacterId, Character>,
    /// Serializes non-reservation writes so journal order matches apply order.
    pub(super) record_writes: Mutex<()>,
    /// Mutations hold it shared; compaction holds it exclusively so no write
    /// lands in the journal between the snapshot and the swap.
    pub(super) gate: RwLock<()>,
    journal_tx: Option<mpsc::Sender<JournalCommand>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store {
    /// A store with no journal. Nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            ledgers: DashMap::new(),
            reservation_to_vehicle: DashMap::new(),
            vehicles: DashMap::new(),
            notifications: DashMap::new(),
            payments: DashMap::new(),
            characters: DashMap::new(),
            record_writes: Mutex::new(()),
            gate: RwLock::new(()),
            journal_tx: None,
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a Tokio runtime: it spawns the writer task.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Journal::replay(&path)?;
        let journal = Journal::open(&path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, rx));

        let mut store = Self::in_memory();
        store.journal_tx = Some(tx);

        // Sole owner during replay: build ledgers unlocked, wrap them at the end.
        let mut ledgers: HashMap<VehicleId, VehicleLedger> = HashMap::new();
        for event in &events {
            match event_vehicle_id(event) {
                Some(vehicle_id) => {
                    let ledger = ledgers
                        .entry(vehicle_id)
                        .or_insert_with(|| VehicleLedger::new(vehicle_id));
                    apply_to_ledger(ledger, event, &store.reservation_to_vehicle);
                }
                None => store.apply_record(event),
            }
        }
        for (vehicle_id, ledger) in ledgers {
            store.ledgers.insert(vehicle_id, Arc::new(RwLock::new(ledger)));
        }
        tracing::info!(
            events = events.len(),
            reservations = store.reservation_to_vehicle.len(),
            vehicles = store.vehicles.len(),
            "store replayed journal"
        );
        Ok(store)
    }

    /// Hand the event to the group-commit writer and wait for the fsync.
    async fn journal_append(&self, event: &Event) -> Result<(), StoreError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Append {
            event: event.clone(),
            response,
        })
        .await
        .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    pub(super) fn get_ledger(&self, vehicle_id: &VehicleId) -> Option<SharedLedger> {
        self.ledgers.get(vehicle_id).map(|e| e.value().clone())
    }

    pub(super) fn ledger_or_create(&self, vehicle_id: VehicleId) -> SharedLedger {
        self.ledgers
            .entry(vehicle_id)
            .or_insert_with(|| Arc::new(RwLock::new(VehicleLedger::new(vehicle_id))))
            .value()
            .clone()
    }

    /// Journal-append + apply for a reservation event.
    pub(super) async fn persist_and_apply(
        &self,
        ledger: &mut VehicleLedger,
        event: &Event,
    ) -> Result<(), StoreError> {
        self.journal_append(event).await?;
        apply_to_ledger(ledger, event, &self.reservation_to_vehicle);
        Ok(())
    }

    /// Journal-append + apply for a non-reservation event.
    pub(super) async fn persist_record(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let _serial = self.record_writes.lock().await;
        self.journal_append(&event).await?;
        self.apply_record(&event);
        Ok(())
    }

    fn apply_record(&self, event: &Event) {
        match event {
            Event::VehicleUpserted(vehicle) => {
                self.vehicles.insert(vehicle.id, vehicle.clone());
            }
            Event::VehicleLocated { id, location } => {
                if let Some(mut vehicle) = self.vehicles.get_mut(id) {
                    vehicle.location = Some(*location);
                }
            }
            Event::VehicleStatusChanged { id, status } => {
                if let Some(mut vehicle) = self.vehicles.get_mut(id) {
                    vehicle.status = *status;
                }
            }
            Event::NotificationAppended(notification) => {
                self.notifications
                    .entry(notification.user_id)
                    .or_default()
                    .push(notification.clone());
            }
            Event::PaymentCaptured(payment) => {
                self.payments.insert(payment.id, payment.clone());
            }
            Event::CharacterSaved(character) => {
                self.characters
                    .entry(character.id)
                    .or_insert_with(|| character.clone());
            }
            // Ledger events are applied under the vehicle lock.
            Event::ReservationInserted(_)
            | Event::ReservationUpdated { .. }
            | Event::ReservationDeleted { .. } => {}
        }
    }

    pub fn payment(&self, id: &PaymentId) -> Option<Payment> {
        self.payments.get(id).map(|e| e.value().clone())
    }

    /// Rewrite the journal as the minimal event list that rebuilds current state.
    pub async fn compact_journal(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.journal_tx else {
            return Ok(());
        };
        let _exclusive = self.gate.write().await;

        let mut events: Vec<Event> = self
            .vehicles
            .iter()
            .map(|e| Event::VehicleUpserted(e.value().clone()))
            .collect();
        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        for ledger in ledgers {
            let guard = ledger.read().await;
            events.extend(guard.reservations.iter().cloned().map(Event::ReservationInserted));
        }
        for entry in self.notifications.iter() {
            events.extend(entry.value().iter().cloned().map(Event::NotificationAppended));
        }
        events.extend(self.payments.iter().map(|e| Event::PaymentCaptured(e.value().clone())));
        events.extend(self.characters.iter().map(|e| Event::CharacterSaved(e.value().clone())));

        let (response, rx) = oneshot::channel();
        tx.send(JournalCommand::Compact { events, response })
            .await
            .map_err(|_| StoreError::Unavailable("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.journal_tx else {
            return 0;
        };
        let (response, rx) = oneshot::channel();
        if tx
            .send(JournalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
