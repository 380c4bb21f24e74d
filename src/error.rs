use thiserror::Error;
use ulid::Ulid;

use crate::model::{ReservationId, Span, VehicleId};

/// Failures raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("journal error: {0}")]
    Journal(String),
    /// Exclusive insert found an active reservation in the way.
    #[error("vehicle {vehicle_id} already reserved by {existing}")]
    Overlap {
        vehicle_id: VehicleId,
        existing: ReservationId,
    },
    /// The store cannot take writes at all, e.g. its journal writer is gone.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Reservation,
    Vehicle,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Reservation => f.write_str("reservation"),
            EntityKind::Vehicle => f.write_str("vehicle"),
        }
    }
}

/// Everything a core operation can report back to the request layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("vehicle {vehicle_id} is not available in [{}, {})", .span.start, .span.end)]
    Conflict {
        vehicle_id: VehicleId,
        span: Span,
        conflicting: Vec<ReservationId>,
    },
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: Ulid },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("error processing the payment or generating the invoice")]
    PaymentFailed,
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn not_found(kind: EntityKind, id: Ulid) -> Self {
        ServiceError::NotFound { kind, id }
    }

    /// HTTP-equivalent status for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::NotFound { .. } => 404,
            ServiceError::Conflict { .. } => 409,
            ServiceError::Store(_) | ServiceError::PaymentFailed => 500,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("failed to build email: {0}")]
    Build(String),
    #[error("failed to send email: {0}")]
    Transport(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unknown value {value:?}, expected one of {expected}")]
    UnknownChoice {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{0} is required when MAILTRAP_HOST is set")]
    MissingSmtpSetting(&'static str),
}

/// Failures that stop an import run. Per-row store errors are only logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("character source error: {0}")]
    Source(String),
    #[error("import stopped after {0} pages")]
    TooManyPages(usize),
}
