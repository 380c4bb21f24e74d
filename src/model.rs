use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type ReservationId = Ulid;
pub type VehicleId = Ulid;
pub type UserId = Ulid;
pub type NotificationId = Ulid;
pub type PaymentId = Ulid;

/// Ids handed out by the external character API.
pub type CharacterId = i64;

pub const HOUR_MS: Ms = 3_600_000;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// `2024-05-01 10:00:00` style rendering (UTC) for human-facing text.
pub fn format_ms(ms: Ms) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input, `None` when `start >= end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Closed-interval test: shared endpoints count as a meeting.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Which intersection rule admission control applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// `[start, end)`: a reservation ending at 12:00 leaves 12:00 free.
    #[default]
    HalfOpen,
    /// `[start, end]`: touching endpoints conflict.
    Closed,
}

impl Boundary {
    /// Does `existing` block `requested` under this rule?
    ///
    /// `Closed` is the three-way disjunction used by the legacy SQL query:
    /// requested start inside existing, requested end inside existing, or
    /// requested wrapping existing's start.
    pub fn conflicts(self, existing: &Span, requested: &Span) -> bool {
        match self {
            Boundary::HalfOpen => existing.overlaps(requested),
            Boundary::Closed => {
                let (s, t) = (requested.start, requested.end);
                (existing.start <= s && s <= existing.end)
                    || (existing.start <= t && t <= existing.end)
                    || (s <= existing.start && t >= existing.start)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub vehicle_id: VehicleId,
    pub span: Span,
    pub status: ReservationStatus,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

/// Fields an update overwrites wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationChanges {
    pub span: Span,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    Reserved,
    InUse,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub license_plate: String,
    pub brand: String,
    pub model: String,
    pub status: VehicleStatus,
    /// Last reported position; absent until the first telemetry update.
    pub location: Option<GeoPoint>,
}

impl Vehicle {
    pub fn describe(&self) -> String {
        format!("{} {} ({})", self.brand, self.model, self.license_plate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub message: String,
    pub sent_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reservation_id: Option<ReservationId>,
    /// Minor currency units.
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Ulid,
    pub amount_cents: i64,
    pub payment_id: PaymentId,
}

impl Invoice {
    /// Invoices only read fields already present on the payment.
    pub fn for_payment(payment: &Payment) -> Self {
        Self {
            id: Ulid::new(),
            amount_cents: payment.amount_cents,
            payment_id: payment.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub image: String,
    pub status: String,
    pub gender: String,
    pub species: String,
}

/// Journal record format. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ReservationInserted(Reservation),
    ReservationUpdated {
        id: ReservationId,
        vehicle_id: VehicleId,
        changes: ReservationChanges,
    },
    ReservationDeleted {
        id: ReservationId,
        vehicle_id: VehicleId,
    },
    VehicleUpserted(Vehicle),
    VehicleLocated {
        id: VehicleId,
        location: GeoPoint,
    },
    VehicleStatusChanged {
        id: VehicleId,
        status: VehicleStatus,
    },
    NotificationAppended(Notification),
    PaymentCaptured(Payment),
    CharacterSaved(Character),
}
