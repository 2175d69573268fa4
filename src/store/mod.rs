mod wal_store;

pub use wal_store::{run_compactor, WalStore};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ReservationNotFound(Ulid),
    CarNotFound(String),
    /// Backing storage can't be reached. Retrying is the caller's call.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::CarNotFound(name) => write!(f, "car not found: {name}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence seam for the engine.
///
/// Every read returns owned snapshots; a single call never mixes records
/// from before and after a concurrent write to the same car. Implementations
/// do not enforce the no-overlap invariant; the engine serializes writers
/// per car before calling in.
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    async fn find_car(&self, name: &str) -> Result<Option<Car>, StoreError>;

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError>;

    /// Approved and in-progress reservations for `car`, ascending start,
    /// without `exclude` if given.
    async fn find_open_reservations(
        &self,
        car: &str,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// The car together with its open reservations, read as one snapshot.
    async fn car_snapshot(
        &self,
        car: &str,
    ) -> Result<Option<(Car, Vec<Reservation>)>, StoreError>;

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Every reservation of `car` regardless of status, ascending start.
    async fn reservations_for_car(&self, car: &str) -> Result<Vec<Reservation>, StoreError>;

    /// Every reservation made by `email`, ascending start.
    async fn reservations_for_booker(&self, email: &str) -> Result<Vec<Reservation>, StoreError>;

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Ulid, StoreError>;

    async fn update_reservation(&self, id: Ulid, patch: ReservationPatch) -> Result<(), StoreError>;

    async fn update_car_mileage(&self, car: &str, mileage: Mileage) -> Result<(), StoreError>;
}
