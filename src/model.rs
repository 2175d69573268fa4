use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds, UTC. The only time type inside the engine.
pub type Ms = i64;

/// Odometer reading in kilometres.
pub type Mileage = f64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Two half-open spans overlap iff each starts before the other ends.
    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Who holds a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booker {
    pub name: String,
    pub email: String,
}

/// A fleet vehicle. The name is the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Car {
    pub name: String,
    pub last_mileage: Mileage,
}

/// Where a reservation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Awaiting approval. Does not block anyone.
    Pending,
    /// Approved, trip not started yet.
    Approved,
    /// Trip started. `missing_mileage` is actual minus recorded odometer
    /// at pickup; negative means the car reads lower than expected.
    InProgress { missing_mileage: Mileage },
    /// Trip finished. Terminal.
    Completed {
        missing_mileage: Mileage,
        end_mileage: Mileage,
        distance_traveled: Mileage,
    },
}

/// Whether a reservation currently claims its car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Unclaimed,
    Open,
    Closed,
}

impl ReservationStatus {
    pub fn occupancy(&self) -> Occupancy {
        match self {
            ReservationStatus::Pending => Occupancy::Unclaimed,
            ReservationStatus::Approved | ReservationStatus::InProgress { .. } => Occupancy::Open,
            ReservationStatus::Completed { .. } => Occupancy::Closed,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::InProgress { .. } => "in_progress",
            ReservationStatus::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub car: String,
    pub booker: Booker,
    pub span: Span,
    /// Odometer at pickup. Recorded at booking, overwritten when the trip starts.
    pub start_mileage: Mileage,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_open_claim(&self) -> bool {
        self.status.occupancy() == Occupancy::Open
    }
}

/// Partial update applied by `ReservationStore::update_reservation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationPatch {
    pub status: Option<ReservationStatus>,
    pub start_mileage: Option<Mileage>,
    pub end: Option<Ms>,
}

impl ReservationPatch {
    pub fn apply(&self, r: &mut Reservation) {
        if let Some(status) = self.status {
            r.status = status;
        }
        if let Some(mileage) = self.start_mileage {
            r.start_mileage = mileage;
        }
        if let Some(end) = self.end {
            r.span.end = end;
        }
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CarRegistered {
        name: String,
        last_mileage: Mileage,
    },
    CarMileageUpdated {
        name: String,
        mileage: Mileage,
    },
    ReservationInserted {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        car: String,
        patch: ReservationPatch,
    },
}
