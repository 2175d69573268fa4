mod conflict;
mod error;
mod mutations;
mod queries;
mod status;

pub use conflict::{find_conflict, validate_span};
pub use error::{ConflictingReservation, ConsistencyWarning, EngineError};
pub use mutations::NewReservation;
pub use status::{project, CarStatus, NextBooking, Projection};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::*;
use crate::store::ReservationStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSettings {
    /// New reservations start out approved instead of pending.
    pub auto_approve: bool,
}

/// Reservation conflict engine and status projector over a `ReservationStore`.
///
/// Writers are serialized per car: every lifecycle operation takes the car's
/// lock before its conflict check and holds it through the store write, so
/// two overlapping claims can't both pass the check. Reads don't lock.
pub struct Engine<S> {
    store: Arc<S>,
    settings: EngineSettings,
    car_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: ReservationStore> Engine<S> {
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            store,
            settings,
            car_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub(super) async fn lock_car(&self, car: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .car_locks
            .entry(car.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Lookup reservation → car, take the car lock, then re-read the
    /// reservation so the caller works on state no other writer can touch.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: Ulid,
    ) -> Result<(Reservation, OwnedMutexGuard<()>), EngineError> {
        let car = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::ReservationNotFound(id))?
            .car;
        let guard = self.lock_car(&car).await;
        let current = self
            .store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::ReservationNotFound(id))?;
        Ok((current, guard))
    }
}
