use std::sync::Arc;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::{CarStatus, Engine, EngineError, NewReservation};
use crate::model::*;
use crate::observability::REQUESTS_TOTAL;
use crate::store::ReservationStore;
use crate::time::{format_timestamp, parse_timestamp};

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateReservationRequest {
    pub car: String,
    pub booker_name: String,
    pub booker_email: String,
    #[serde(default)]
    pub start_mileage: Option<Mileage>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartTripRequest {
    pub id: Ulid,
    pub actual_mileage: Mileage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompleteTripRequest {
    pub id: Ulid,
    pub end_mileage: Mileage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtendRequest {
    pub id: Ulid,
    pub new_end: String,
}

/// One request line. `at` defaults to the current time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListCars,
    FleetStatus {
        #[serde(default)]
        at: Option<String>,
    },
    CarStatus {
        car: String,
        #[serde(default)]
        at: Option<String>,
    },
    CarReservations {
        car: String,
    },
    History {
        email: String,
    },
    GetReservation {
        id: Ulid,
    },
    CreateReservation(CreateReservationRequest),
    ApproveReservation {
        id: Ulid,
    },
    StartTrip(StartTripRequest),
    CompleteTrip(CompleteTripRequest),
    ExtendReservation(ExtendRequest),
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Success { data: Value },
    Error { error: ErrorBody },
}

impl Response {
    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Response::Error {
            error: ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error("bad_request", message)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }
}

// ── Views ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CarView<'a> {
    name: &'a str,
    last_mileage: Mileage,
}

#[derive(Debug, Serialize)]
struct ReservationView {
    id: String,
    car: String,
    booker_name: String,
    booker_email: String,
    start: String,
    end: String,
    status: &'static str,
    start_mileage: Mileage,
    missing_mileage: Option<Mileage>,
    end_mileage: Option<Mileage>,
    distance_traveled: Option<Mileage>,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct NextBookingView {
    reservation_id: String,
    start: String,
    booker_name: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum StatusView {
    InUse {
        reservation_id: String,
        booker_name: String,
        booker_email: String,
        start: String,
        end: String,
        start_mileage: Mileage,
        missing_mileage: Option<Mileage>,
    },
    Free {
        next_booking: Option<NextBookingView>,
    },
}

#[derive(Debug, Serialize)]
struct CarStatusView<'a> {
    name: &'a str,
    last_mileage: Mileage,
    summary: String,
    #[serde(flatten)]
    status: StatusView,
}

/// Error that reaches the caller: a stable kind plus a readable message.
#[derive(Debug)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError {
            kind: "internal",
            message: e.to_string(),
        }
    }
}

/// Typed front door over the engine: parses timestamps, dispatches, and
/// renders results with timestamps in the fleet's local offset.
pub struct Api<S> {
    engine: Arc<Engine<S>>,
    offset: FixedOffset,
}

impl<S: ReservationStore> Api<S> {
    pub fn new(engine: Arc<Engine<S>>, offset: FixedOffset) -> Self {
        Self { engine, offset }
    }

    pub fn engine(&self) -> &Arc<Engine<S>> {
        &self.engine
    }

    pub async fn handle(&self, req: Request, now: Ms) -> Response {
        let label = crate::observability::command_label(&req);
        let started = std::time::Instant::now();
        let result = self.execute(req, now).await;
        metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => label)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(data) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => label, "status" => "success")
                    .increment(1);
                Response::Success { data }
            }
            Err(e) => {
                metrics::counter!(REQUESTS_TOTAL, "op" => label, "status" => "error").increment(1);
                tracing::debug!(op = label, kind = e.kind, "request failed: {}", e.message);
                Response::error(e.kind, e.message)
            }
        }
    }

    async fn execute(&self, req: Request, now: Ms) -> Result<Value, ApiError> {
        let engine = &self.engine;
        match req {
            Request::ListCars => {
                let cars = engine.list_cars().await.map_err(|e| self.api_error(e))?;
                let views: Vec<CarView> = cars.iter().map(car_view).collect();
                Ok(serde_json::to_value(views)?)
            }
            Request::FleetStatus { at } => {
                let at = self.instant(at.as_deref(), now)?;
                let fleet = engine.fleet_status(at).await.map_err(|e| self.api_error(e))?;
                let views: Vec<CarStatusView> = fleet
                    .iter()
                    .map(|(car, status)| self.status_view(car, status))
                    .collect();
                Ok(serde_json::to_value(views)?)
            }
            Request::CarStatus { car, at } => {
                let at = self.instant(at.as_deref(), now)?;
                let (found, status) = engine
                    .car_status(&car, at)
                    .await
                    .map_err(|e| self.api_error(e))?;
                Ok(serde_json::to_value(self.status_view(&found, &status))?)
            }
            Request::CarReservations { car } => {
                let list = engine
                    .car_reservations(&car)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservations_value(&list)
            }
            Request::History { email } => {
                let list = engine
                    .booker_history(&email)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservations_value(&list)
            }
            Request::GetReservation { id } => {
                let r = engine.get_reservation(id).await.map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
            Request::CreateReservation(req) => {
                let new = self.new_reservation(req)?;
                let r = engine
                    .create_reservation(new, now)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
            Request::ApproveReservation { id } => {
                let r = engine
                    .approve_reservation(id)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
            Request::StartTrip(req) => {
                let r = engine
                    .start_trip(req.id, req.actual_mileage)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
            Request::CompleteTrip(req) => {
                let r = engine
                    .complete_trip(req.id, req.end_mileage)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
            Request::ExtendReservation(req) => {
                let new_end =
                    parse_timestamp(&req.new_end, self.offset).map_err(|e| self.api_error(e))?;
                let r = engine
                    .extend_reservation(req.id, new_end)
                    .await
                    .map_err(|e| self.api_error(e))?;
                self.reservation_value(&r)
            }
        }
    }

    fn instant(&self, at: Option<&str>, now: Ms) -> Result<Ms, ApiError> {
        match at {
            Some(s) => parse_timestamp(s, self.offset).map_err(|e| self.api_error(e)),
            None => Ok(now),
        }
    }

    fn new_reservation(&self, req: CreateReservationRequest) -> Result<NewReservation, ApiError> {
        let start = parse_timestamp(&req.start, self.offset).map_err(|e| self.api_error(e))?;
        let end = parse_timestamp(&req.end, self.offset).map_err(|e| self.api_error(e))?;
        let span = Span::new(start, end).map_err(|e| self.api_error(e))?;
        Ok(NewReservation {
            car: req.car,
            booker: Booker {
                name: req.booker_name.trim().to_string(),
                email: req.booker_email.trim().to_string(),
            },
            start_mileage: req.start_mileage,
            span,
        })
    }

    fn ts(&self, ms: Ms) -> String {
        format_timestamp(ms, self.offset)
    }

    fn api_error(&self, e: EngineError) -> ApiError {
        let message = match &e {
            EngineError::Conflict(c) => format!(
                "car is already reserved by {} from {} to {}",
                c.booker.name,
                self.ts(c.span.start),
                self.ts(c.span.end)
            ),
            EngineError::InvalidInterval { start, end } => format!(
                "end {} must be after start {}",
                self.ts(*end),
                self.ts(*start)
            ),
            other => other.to_string(),
        };
        ApiError {
            kind: e.kind(),
            message,
        }
    }

    fn reservation_view(&self, r: &Reservation) -> ReservationView {
        let (missing_mileage, end_mileage, distance_traveled) = match r.status {
            ReservationStatus::Pending | ReservationStatus::Approved => (None, None, None),
            ReservationStatus::InProgress { missing_mileage } => {
                (Some(missing_mileage), None, None)
            }
            ReservationStatus::Completed {
                missing_mileage,
                end_mileage,
                distance_traveled,
            } => (Some(missing_mileage), Some(end_mileage), Some(distance_traveled)),
        };
        ReservationView {
            id: r.id.to_string(),
            car: r.car.clone(),
            booker_name: r.booker.name.clone(),
            booker_email: r.booker.email.clone(),
            start: self.ts(r.span.start),
            end: self.ts(r.span.end),
            status: r.status.label(),
            start_mileage: r.start_mileage,
            missing_mileage,
            end_mileage,
            distance_traveled,
            created_at: self.ts(r.created_at),
        }
    }

    fn reservation_value(&self, r: &Reservation) -> Result<Value, ApiError> {
        Ok(serde_json::to_value(self.reservation_view(r))?)
    }

    fn reservations_value(&self, list: &[Reservation]) -> Result<Value, ApiError> {
        let views: Vec<ReservationView> = list.iter().map(|r| self.reservation_view(r)).collect();
        Ok(serde_json::to_value(views)?)
    }

    fn status_view<'a>(&self, car: &'a Car, status: &CarStatus) -> CarStatusView<'a> {
        let (summary, status) = match status {
            CarStatus::InUse {
                reservation_id,
                booker,
                span,
                start_mileage,
                missing_mileage,
            } => (
                format!("in use by {} until {}", booker.name, self.ts(span.end)),
                StatusView::InUse {
                    reservation_id: reservation_id.to_string(),
                    booker_name: booker.name.clone(),
                    booker_email: booker.email.clone(),
                    start: self.ts(span.start),
                    end: self.ts(span.end),
                    start_mileage: *start_mileage,
                    missing_mileage: *missing_mileage,
                },
            ),
            CarStatus::Free { next: Some(next) } => (
                format!("free until {}", self.ts(next.start)),
                StatusView::Free {
                    next_booking: Some(NextBookingView {
                        reservation_id: next.reservation_id.to_string(),
                        start: self.ts(next.start),
                        booker_name: next.booker.name.clone(),
                    }),
                },
            ),
            CarStatus::Free { next: None } => (
                "free, no upcoming booking".to_string(),
                StatusView::Free { next_booking: None },
            ),
        };
        CarStatusView {
            name: &car.name,
            last_mileage: car.last_mileage,
            summary,
            status,
        }
    }
}

fn car_view(car: &Car) -> CarView<'_> {
    CarView {
        name: &car.name,
        last_mileage: car.last_mileage,
    }
}
