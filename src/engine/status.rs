use ulid::Ulid;

use crate::model::*;
use crate::store::ReservationStore;

use super::{ConsistencyWarning, Engine, EngineError};

/// What a car is doing at an instant.
#[derive(Debug, Clone, PartialEq)]
pub enum CarStatus {
    InUse {
        reservation_id: Ulid,
        booker: Booker,
        span: Span,
        start_mileage: Mileage,
        /// Set once the trip has started.
        missing_mileage: Option<Mileage>,
    },
    Free {
        next: Option<NextBooking>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NextBooking {
    pub reservation_id: Ulid,
    pub start: Ms,
    pub booker: Booker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub status: CarStatus,
    pub warning: Option<ConsistencyWarning>,
}

/// Project a car's status at `now` from one snapshot of its reservations.
///
/// Only open claims count. If several cover `now` the earliest start wins
/// (then lowest id) and the collision is reported as a warning.
pub fn project(car: &str, reservations: &[Reservation], now: Ms) -> Projection {
    let mut current: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.is_open_claim() && r.span.contains_instant(now))
        .collect();
    current.sort_by_key(|r| (r.span.start, r.id));

    if let Some(first) = current.first() {
        let warning = (current.len() > 1).then(|| ConsistencyWarning {
            car: car.to_string(),
            at: now,
            reservation_ids: current.iter().map(|r| r.id).collect(),
        });
        let missing_mileage = match first.status {
            ReservationStatus::InProgress { missing_mileage } => Some(missing_mileage),
            _ => None,
        };
        return Projection {
            status: CarStatus::InUse {
                reservation_id: first.id,
                booker: first.booker.clone(),
                span: first.span,
                start_mileage: first.start_mileage,
                missing_mileage,
            },
            warning,
        };
    }

    let next = reservations
        .iter()
        .filter(|r| r.is_open_claim() && r.span.start > now)
        .min_by_key(|r| (r.span.start, r.id))
        .map(|r| NextBooking {
            reservation_id: r.id,
            start: r.span.start,
            booker: r.booker.clone(),
        });
    Projection {
        status: CarStatus::Free { next },
        warning: None,
    }
}

impl<S: ReservationStore> Engine<S> {
    pub async fn project_status(&self, car: &str, now: Ms) -> Result<CarStatus, EngineError> {
        Ok(self.car_status(car, now).await?.1)
    }

    /// The car record and its status, both from the same snapshot.
    pub async fn car_status(&self, car: &str, now: Ms) -> Result<(Car, CarStatus), EngineError> {
        let (record, open) = self
            .store
            .car_snapshot(car)
            .await?
            .ok_or_else(|| EngineError::CarNotFound(car.to_string()))?;
        let status = report(project(car, &open, now));
        Ok((record, status))
    }

    /// Status of every car in the fleet, sorted by car name.
    pub async fn fleet_status(&self, now: Ms) -> Result<Vec<(Car, CarStatus)>, EngineError> {
        let cars = self.store.list_cars().await?;
        let mut out = Vec::with_capacity(cars.len());
        for car in cars {
            out.push(self.car_status(&car.name, now).await?);
        }
        Ok(out)
    }
}

fn report(projection: Projection) -> CarStatus {
    if let Some(warning) = projection.warning {
        metrics::counter!(crate::observability::CONSISTENCY_WARNINGS_TOTAL).increment(1);
        tracing::warn!("{warning}");
    }
    projection.status
}
