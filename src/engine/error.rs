use ulid::Ulid;

use crate::model::{Booker, Ms, Span};
use crate::store::StoreError;

/// The open claim a candidate span ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingReservation {
    pub id: Ulid,
    pub booker: Booker,
    pub span: Span,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval { start: Ms, end: Ms },
    InvalidTimestamp(String),
    Conflict(ConflictingReservation),
    ReservationNotFound(Ulid),
    CarNotFound(String),
    InvalidMileage(String),
    InvalidState { id: Ulid, state: &'static str },
    InvalidBooker(&'static str),
    LimitExceeded(&'static str),
    StoreUnavailable(String),
}

impl EngineError {
    /// Stable machine-readable kind, used in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } | EngineError::InvalidTimestamp(_) => {
                "invalid_interval"
            }
            EngineError::Conflict(_) => "conflicting_reservation",
            EngineError::ReservationNotFound(_) | EngineError::CarNotFound(_) => "not_found",
            EngineError::InvalidMileage(_) => "invalid_mileage",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::InvalidBooker(_) => "invalid_request",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::InvalidTimestamp(s) => write!(f, "invalid timestamp: {s:?}"),
            EngineError::Conflict(c) => write!(
                f,
                "car already reserved by {} during [{}, {}) (reservation {})",
                c.booker.name, c.span.start, c.span.end, c.id
            ),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::CarNotFound(name) => write!(f, "car not found: {name}"),
            EngineError::InvalidMileage(msg) => write!(f, "invalid mileage: {msg}"),
            EngineError::InvalidState { id, state } => {
                write!(f, "reservation {id} is {state}; operation not allowed")
            }
            EngineError::InvalidBooker(msg) => write!(f, "invalid booker: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ReservationNotFound(id) => EngineError::ReservationNotFound(id),
            StoreError::CarNotFound(name) => EngineError::CarNotFound(name),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

/// Two or more open claims cover the same instant. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    pub car: String,
    pub at: Ms,
    /// Colliding reservations, earliest start first. The first one won.
    pub reservation_ids: Vec<Ulid>,
}

impl std::fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "car {} has {} overlapping open reservations at {}: {:?}",
            self.car,
            self.reservation_ids.len(),
            self.at,
            self.reservation_ids
        )
    }
}
