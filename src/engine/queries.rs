use ulid::Ulid;

use crate::model::*;
use crate::store::ReservationStore;

use super::{Engine, EngineError};

impl<S: ReservationStore> Engine<S> {
    pub async fn list_cars(&self) -> Result<Vec<Car>, EngineError> {
        Ok(self.store.list_cars().await?)
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .find_reservation(id)
            .await?
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// All reservations for a car, earliest first.
    pub async fn car_reservations(&self, car: &str) -> Result<Vec<Reservation>, EngineError> {
        let mut reservations = self.store.reservations_for_car(car).await?;
        reservations.sort_by_key(|r| (r.span.start, r.id));
        Ok(reservations)
    }

    /// A booker's reservations across the fleet, most recent first.
    pub async fn booker_history(&self, email: &str) -> Result<Vec<Reservation>, EngineError> {
        let mut reservations = self.store.reservations_for_booker(email.trim()).await?;
        reservations.sort_by_key(|r| std::cmp::Reverse((r.span.start, r.id)));
        Ok(reservations)
    }
}
