use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::ReservationStore;

use super::{ConflictingReservation, Engine, EngineError};

pub fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// First open claim in `reservations` that overlaps `candidate`, by start
/// time then id. Pending and completed reservations never conflict.
pub fn find_conflict<'a>(
    reservations: &'a [Reservation],
    candidate: &Span,
) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| r.is_open_claim() && r.span.overlaps(candidate))
        .min_by_key(|r| (r.span.start, r.id))
}

impl<S: ReservationStore> Engine<S> {
    /// Check `candidate` against the car's open claims, skipping `exclude`.
    ///
    /// Pure read. The answer only stays true while the caller holds the car lock.
    pub async fn check_conflict(
        &self,
        car: &str,
        candidate: &Span,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let open = self.store.find_open_reservations(car, exclude).await?;
        match find_conflict(&open, candidate) {
            None => Ok(()),
            Some(hit) => {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
                tracing::debug!(
                    car,
                    candidate_start = candidate.start,
                    candidate_end = candidate.end,
                    "conflicts with reservation {}",
                    hit.id
                );
                Err(EngineError::Conflict(ConflictingReservation {
                    id: hit.id,
                    booker: hit.booker.clone(),
                    span: hit.span,
                }))
            }
        }
    }
}
