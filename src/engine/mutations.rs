use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::RESERVATIONS_CREATED_TOTAL;
use crate::store::ReservationStore;

use super::conflict::validate_span;
use super::{Engine, EngineError};

/// A validated-shape create request, timestamps already parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub car: String,
    pub booker: Booker,
    /// Odometer the booker expects at pickup. Defaults to the car's last reading.
    pub start_mileage: Option<Mileage>,
    pub span: Span,
}

fn validate_booker(booker: &Booker) -> Result<(), EngineError> {
    if booker.name.trim().is_empty() {
        return Err(EngineError::InvalidBooker("name is empty"));
    }
    if booker.name.len() > MAX_BOOKER_NAME_LEN {
        return Err(EngineError::LimitExceeded("booker name too long"));
    }
    if booker.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("booker email too long"));
    }
    match booker.email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::InvalidBooker("email is not an address")),
    }
}

fn validate_mileage(what: &str, mileage: Mileage) -> Result<(), EngineError> {
    if !mileage.is_finite() || !(0.0..=MAX_MILEAGE).contains(&mileage) {
        return Err(EngineError::InvalidMileage(format!("{what} {mileage} out of range")));
    }
    Ok(())
}

fn require_status(
    r: &Reservation,
    allowed: fn(&ReservationStatus) -> bool,
) -> Result<(), EngineError> {
    if allowed(&r.status) {
        Ok(())
    } else {
        Err(EngineError::InvalidState {
            id: r.id,
            state: r.status.label(),
        })
    }
}

impl<S: ReservationStore> Engine<S> {
    pub async fn create_reservation(
        &self,
        req: NewReservation,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        if req.car.len() > MAX_CAR_NAME_LEN {
            return Err(EngineError::LimitExceeded("car name too long"));
        }
        validate_booker(&req.booker)?;
        validate_span(&req.span)?;
        if let Some(m) = req.start_mileage {
            validate_mileage("start mileage", m)?;
        }
        let car = self
            .store
            .find_car(&req.car)
            .await?
            .ok_or_else(|| EngineError::CarNotFound(req.car.clone()))?;

        let status = if self.settings.auto_approve {
            ReservationStatus::Approved
        } else {
            ReservationStatus::Pending
        };

        let _guard = self.lock_car(&car.name).await;
        self.check_conflict(&car.name, &req.span, None).await?;

        let reservation = Reservation {
            id: Ulid::new(),
            car: car.name,
            booker: req.booker,
            span: req.span,
            start_mileage: req.start_mileage.unwrap_or(car.last_mileage),
            status,
            created_at: now,
        };
        self.store.insert_reservation(reservation.clone()).await?;

        metrics::counter!(RESERVATIONS_CREATED_TOTAL, "status" => status.label()).increment(1);
        info!(
            car = %reservation.car,
            booker = %reservation.booker.email,
            "reservation {} created ({})",
            reservation.id,
            status.label()
        );
        Ok(reservation)
    }

    /// Pending → approved. The reservation becomes an open claim, so it is
    /// checked against the other open claims first.
    pub async fn approve_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (mut r, _guard) = self.resolve_reservation_write(id).await?;
        require_status(&r, |s| matches!(s, ReservationStatus::Pending))?;
        self.check_conflict(&r.car, &r.span, Some(id)).await?;

        let patch = ReservationPatch {
            status: Some(ReservationStatus::Approved),
            ..Default::default()
        };
        self.store.update_reservation(id, patch.clone()).await?;
        patch.apply(&mut r);
        info!(car = %r.car, "reservation {id} approved");
        Ok(r)
    }

    /// Record the odometer at pickup.
    pub async fn start_trip(
        &self,
        id: Ulid,
        actual_mileage: Mileage,
    ) -> Result<Reservation, EngineError> {
        validate_mileage("actual mileage", actual_mileage)?;
        let (mut r, _guard) = self.resolve_reservation_write(id).await?;
        require_status(&r, |s| matches!(s, ReservationStatus::Approved))?;

        let missing_mileage = actual_mileage - r.start_mileage;
        if missing_mileage < 0.0 {
            warn!(
                car = %r.car,
                "reservation {id}: odometer reads {actual_mileage}, {} below the recorded {}",
                -missing_mileage,
                r.start_mileage
            );
        }

        let patch = ReservationPatch {
            status: Some(ReservationStatus::InProgress { missing_mileage }),
            start_mileage: Some(actual_mileage),
            end: None,
        };
        self.store.update_reservation(id, patch.clone()).await?;
        patch.apply(&mut r);
        info!(car = %r.car, "trip started for reservation {id}, missing mileage {missing_mileage}");
        Ok(r)
    }

    /// Record the odometer at return. Closes the claim and updates the car.
    ///
    /// The car's odometer is written before the reservation, so a failed
    /// store write leaves the trip in progress and the call can be retried.
    /// The odometer only moves forward.
    pub async fn complete_trip(
        &self,
        id: Ulid,
        end_mileage: Mileage,
    ) -> Result<Reservation, EngineError> {
        validate_mileage("end mileage", end_mileage)?;
        let (mut r, _guard) = self.resolve_reservation_write(id).await?;
        let ReservationStatus::InProgress { missing_mileage } = r.status else {
            return Err(EngineError::InvalidState {
                id,
                state: r.status.label(),
            });
        };

        let distance_traveled = end_mileage - r.start_mileage;
        if distance_traveled < 0.0 {
            return Err(EngineError::InvalidMileage(format!(
                "end mileage {end_mileage} is below start mileage {}",
                r.start_mileage
            )));
        }

        let patch = ReservationPatch {
            status: Some(ReservationStatus::Completed {
                missing_mileage,
                end_mileage,
                distance_traveled,
            }),
            ..Default::default()
        };
        let car = self
            .store
            .find_car(&r.car)
            .await?
            .ok_or_else(|| EngineError::CarNotFound(r.car.clone()))?;
        if end_mileage >= car.last_mileage {
            self.store.update_car_mileage(&r.car, end_mileage).await?;
        } else {
            warn!(
                car = %r.car,
                "reservation {id}: end mileage {end_mileage} is below the car's {}, odometer kept",
                car.last_mileage
            );
        }
        self.store.update_reservation(id, patch.clone()).await?;
        patch.apply(&mut r);
        info!(car = %r.car, "trip completed for reservation {id}, {distance_traveled} km");
        Ok(r)
    }

    /// Push an open reservation's end later.
    pub async fn extend_reservation(
        &self,
        id: Ulid,
        new_end: Ms,
    ) -> Result<Reservation, EngineError> {
        let (mut r, _guard) = self.resolve_reservation_write(id).await?;
        require_status(&r, |s| s.occupancy() == Occupancy::Open)?;

        let candidate = Span::new(r.span.end, new_end)?;
        validate_span(&Span::new(r.span.start, new_end)?)?;
        self.check_conflict(&r.car, &candidate, Some(id)).await?;

        let patch = ReservationPatch {
            end: Some(new_end),
            ..Default::default()
        };
        self.store.update_reservation(id, patch.clone()).await?;
        patch.apply(&mut r);
        info!(car = %r.car, "reservation {id} extended to {new_end}");
        Ok(r)
    }
}
