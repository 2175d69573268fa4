use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{ReservationStore, StoreError};

pub type SharedCarState = Arc<RwLock<CarState>>;

/// One car and every reservation ever made for it.
#[derive(Debug, Clone)]
pub struct CarState {
    pub car: Car,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl CarState {
    pub fn new(car: Car) -> Self {
        Self {
            car,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn open_claims(&self, exclude: Option<Ulid>) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(move |r| r.is_open_claim() && Some(r.id) != exclude)
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then does one fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<Pending>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

/// Apply an event to one car's state (caller holds the lock).
fn apply_to_car(cs: &mut CarState, event: &Event, index: &DashMap<Ulid, String>) {
    match event {
        Event::CarMileageUpdated { mileage, .. } => {
            cs.car.last_mileage = *mileage;
        }
        Event::ReservationInserted { reservation } => {
            index.insert(reservation.id, reservation.car.clone());
            cs.insert_reservation(reservation.clone());
        }
        Event::ReservationUpdated { id, patch, .. } => {
            if let Some(r) = cs.get_mut(*id) {
                patch.apply(r);
            }
        }
        // Registration is handled at the DashMap level, not here
        Event::CarRegistered { .. } => {}
    }
}

fn event_car(event: &Event) -> &str {
    match event {
        Event::CarRegistered { name, .. } | Event::CarMileageUpdated { name, .. } => name,
        Event::ReservationInserted { reservation } => &reservation.car,
        Event::ReservationUpdated { car, .. } => car,
    }
}

/// In-memory reservation store made durable by a write-ahead log.
pub struct WalStore {
    cars: DashMap<String, SharedCarState>,
    /// Reverse lookup: reservation id → car name
    reservation_to_car: DashMap<Ulid, String>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `path` and start the writer task. Must run inside a
    /// tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&path)?;
        let wal = Wal::open(&path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            cars: DashMap::new(),
            reservation_to_car: DashMap::new(),
            wal_tx,
        };

        // Nobody else holds these Arcs yet, so try_write never contends.
        // Never block here: open may run inside an async context.
        for event in &events {
            if let Event::CarRegistered { name, last_mileage } = event {
                let car = Car {
                    name: name.clone(),
                    last_mileage: *last_mileage,
                };
                store
                    .cars
                    .insert(name.clone(), Arc::new(RwLock::new(CarState::new(car))));
                continue;
            }
            let Some(state) = store.get_car(event_car(event)) else {
                continue;
            };
            let mut guard = state
                .try_write()
                .map_err(|_| io::Error::other("replay: car state locked"))?;
            apply_to_car(&mut guard, event, &store.reservation_to_car);
        }

        info!(
            cars = store.cars.len(),
            reservations = store.reservation_to_car.len(),
            "replayed {} WAL events",
            events.len()
        );
        Ok(store)
    }

    fn get_car(&self, name: &str) -> Option<SharedCarState> {
        self.cars.get(name).map(|e| e.value().clone())
    }

    fn all_cars(&self) -> Vec<SharedCarState> {
        self.cars.iter().map(|e| e.value().clone()).collect()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn persist_and_apply(&self, cs: &mut CarState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_car(cs, event, &self.reservation_to_car);
        Ok(())
    }

    /// Add a car to the fleet. Returns false if it was already registered.
    pub async fn register_car(
        &self,
        name: &str,
        last_mileage: Mileage,
    ) -> Result<bool, StoreError> {
        if self.cars.contains_key(name) {
            return Ok(false);
        }
        let event = Event::CarRegistered {
            name: name.to_string(),
            last_mileage,
        };
        self.wal_append(&event).await?;
        let car = Car {
            name: name.to_string(),
            last_mileage,
        };
        self.cars
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(CarState::new(car))));
        Ok(true)
    }

    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    /// Rewrite the WAL with just the events needed to recreate current state.
    ///
    /// Read locks on every car are held until the swap is done, so no write
    /// can land between the snapshot and the new file.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let states = self.all_cars();
        let mut guards = Vec::with_capacity(states.len());
        for state in states {
            guards.push(state.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::CarRegistered {
                name: guard.car.name.clone(),
                last_mileage: guard.car.last_mileage,
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationInserted {
                    reservation: reservation.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find_car(&self, name: &str) -> Result<Option<Car>, StoreError> {
        match self.get_car(name) {
            Some(state) => Ok(Some(state.read().await.car.clone())),
            None => Ok(None),
        }
    }

    async fn list_cars(&self) -> Result<Vec<Car>, StoreError> {
        let mut cars = Vec::with_capacity(self.cars.len());
        for state in self.all_cars() {
            cars.push(state.read().await.car.clone());
        }
        cars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cars)
    }

    async fn find_open_reservations(
        &self,
        car: &str,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, StoreError> {
        let state = self
            .get_car(car)
            .ok_or_else(|| StoreError::CarNotFound(car.to_string()))?;
        let guard = state.read().await;
        Ok(guard.open_claims(exclude).cloned().collect())
    }

    async fn car_snapshot(
        &self,
        car: &str,
    ) -> Result<Option<(Car, Vec<Reservation>)>, StoreError> {
        let Some(state) = self.get_car(car) else {
            return Ok(None);
        };
        let guard = state.read().await;
        Ok(Some((guard.car.clone(), guard.open_claims(None).cloned().collect())))
    }

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(car) = self.reservation_to_car.get(&id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let Some(state) = self.get_car(&car) else {
            return Ok(None);
        };
        let guard = state.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn reservations_for_car(&self, car: &str) -> Result<Vec<Reservation>, StoreError> {
        let state = self
            .get_car(car)
            .ok_or_else(|| StoreError::CarNotFound(car.to_string()))?;
        let guard = state.read().await;
        Ok(guard.reservations.clone())
    }

    async fn reservations_for_booker(&self, email: &str) -> Result<Vec<Reservation>, StoreError> {
        let mut found = Vec::new();
        for state in self.all_cars() {
            let guard = state.read().await;
            found.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.booker.email == email)
                    .cloned(),
            );
        }
        found.sort_by_key(|r| (r.span.start, r.id));
        Ok(found)
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Ulid, StoreError> {
        let id = reservation.id;
        let state = self
            .get_car(&reservation.car)
            .ok_or_else(|| StoreError::CarNotFound(reservation.car.clone()))?;
        let mut guard = state.write().await;
        let event = Event::ReservationInserted { reservation };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<(), StoreError> {
        let car = self
            .reservation_to_car
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::ReservationNotFound(id))?;
        let state = self
            .get_car(&car)
            .ok_or(StoreError::ReservationNotFound(id))?;
        let mut guard = state.write().await;
        if guard.get(id).is_none() {
            return Err(StoreError::ReservationNotFound(id));
        }
        let event = Event::ReservationUpdated { id, car, patch };
        self.persist_and_apply(&mut guard, &event).await
    }

    async fn update_car_mileage(&self, car: &str, mileage: Mileage) -> Result<(), StoreError> {
        let state = self
            .get_car(car)
            .ok_or_else(|| StoreError::CarNotFound(car.to_string()))?;
        let mut guard = state.write().await;
        let event = Event::CarMileageUpdated {
            name: car.to_string(),
            mileage,
        };
        self.persist_and_apply(&mut guard, &event).await
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
