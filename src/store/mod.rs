//! In-memory entity store for bookings, drivers and vehicles.
//!
//! Cross-entity writes go through a [`UnitOfWork`]: it takes row locks in a
//! fixed global order (bookings, then drivers, then vehicles), stages every
//! write, and applies them together on [`UnitOfWork::commit`]. Dropping a unit
//! of work without committing discards the staged writes.
//!
//! Driver locations and booking ETAs are kept outside the lockable rows so the
//! tracking path never waits on an assignment.

mod snapshot;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::models::booking::{Booking, Eta};
use crate::models::dispatch::DispatchTask;
use crate::models::driver::{Driver, LocationFix};
use crate::models::payment::Payment;
use crate::models::vehicle::Vehicle;

pub use snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Booking(Uuid),
    Driver(Uuid),
    Vehicle(Uuid),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Booking(id) => write!(f, "booking {id}"),
            RowKey::Driver(id) => write!(f, "driver {id}"),
            RowKey::Vehicle(id) => write!(f, "vehicle {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(RowKey),

    #[error("lock on {requested} requested while holding {held}")]
    LockOrder { requested: RowKey, held: RowKey },

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct Store {
    bookings: DashMap<Uuid, Booking>,
    drivers: DashMap<Uuid, Driver>,
    vehicles: DashMap<Uuid, Vehicle>,
    payments: DashMap<Uuid, Payment>,
    dispatch_tasks: DashMap<Uuid, DispatchTask>,
    locations: DashMap<Uuid, LocationFix>,
    etas: DashMap<Uuid, Eta>,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    // Commits hold it shared, snapshots exclusive.
    commit_gate: RwLock<()>,
}

impl Store {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            bookings: DashMap::new(),
            drivers: DashMap::new(),
            vehicles: DashMap::new(),
            payments: DashMap::new(),
            dispatch_tasks: DashMap::new(),
            locations: DashMap::new(),
            etas: DashMap::new(),
            row_locks: DashMap::new(),
            lock_timeout,
            commit_gate: RwLock::new(()),
        }
    }

    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            store: self,
            guards: Vec::new(),
            locked: Vec::new(),
            bookings: HashMap::new(),
            drivers: HashMap::new(),
            vehicles: HashMap::new(),
        }
    }

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.bookings.get(&id).map(|entry| entry.value().clone())
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.bookings
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn driver(&self, id: Uuid) -> Option<Driver> {
        self.drivers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn drivers(&self) -> Vec<Driver> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn vehicle(&self, id: Uuid) -> Option<Vehicle> {
        self.vehicles.get(&id).map(|entry| entry.value().clone())
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn payment(&self, booking_id: Uuid) -> Option<Payment> {
        self.payments
            .get(&booking_id)
            .map(|entry| entry.value().clone())
    }

    pub fn record_payment(&self, payment: Payment) {
        self.payments.insert(payment.booking_id, payment);
    }

    pub fn location(&self, driver_id: Uuid) -> Option<LocationFix> {
        self.locations.get(&driver_id).map(|entry| *entry.value())
    }

    pub fn record_location(&self, driver_id: Uuid, fix: LocationFix) {
        self.locations.insert(driver_id, fix);
    }

    pub fn eta(&self, booking_id: Uuid) -> Option<Eta> {
        self.etas.get(&booking_id).map(|entry| *entry.value())
    }

    /// Writes the ETA only if `accept` holds for the booking as currently
    /// stored. The booking entry stays read-locked across the check and the
    /// write, so a concurrent commit cannot slip in between.
    pub fn record_eta_if<F>(&self, booking_id: Uuid, eta: Eta, accept: F) -> bool
    where
        F: FnOnce(&Booking) -> bool,
    {
        let Some(booking) = self.bookings.get(&booking_id) else {
            return false;
        };

        if !accept(booking.value()) {
            return false;
        }

        self.etas.insert(booking_id, eta);
        true
    }

    pub fn dispatch_task(&self, booking_id: Uuid) -> Option<DispatchTask> {
        self.dispatch_tasks
            .get(&booking_id)
            .map(|entry| *entry.value())
    }

    pub fn dispatch_tasks(&self) -> Vec<DispatchTask> {
        self.dispatch_tasks
            .iter()
            .map(|entry| *entry.value())
            .collect()
    }

    pub fn claim_dispatch_task(&self, task: DispatchTask) -> bool {
        match self.dispatch_tasks.entry(task.booking_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(task);
                true
            }
        }
    }

    pub fn advance_dispatch_task(&self, current: &DispatchTask, next: DispatchTask) -> bool {
        match self.dispatch_tasks.get_mut(&current.booking_id) {
            Some(mut stored) if *stored == *current => {
                *stored = next;
                true
            }
            _ => false,
        }
    }

    pub fn remove_dispatch_task(&self, booking_id: Uuid) -> Option<DispatchTask> {
        self.dispatch_tasks
            .remove(&booking_id)
            .map(|(_, task)| task)
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn insert_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.bookings.len(), self.drivers.len(), self.vehicles.len())
    }

    pub fn remove_booking(&self, booking_id: Uuid) -> Option<Booking> {
        self.bookings.remove(&booking_id).map(|(_, booking)| booking)
    }

    async fn lock_row(&self, key: RowKey) -> Result<RowGuard<'_>, StoreError> {
        let lock = self.row_locks.entry(key).or_default().value().clone();
        let acquired = tokio::time::timeout(self.lock_timeout, lock.lock_owned()).await;

        match acquired {
            Ok(guard) => Ok(RowGuard {
                store: self,
                key,
                guard: Some(guard),
            }),
            Err(_) => {
                self.release_row(key);
                Err(StoreError::LockTimeout(key))
            }
        }
    }

    // Entry creation and removal both run under the shard lock, so a count of
    // one means no holder and no waiter.
    fn release_row(&self, key: RowKey) {
        self.row_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct RowGuard<'a> {
    store: &'a Store,
    key: RowKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RowGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.release_row(self.key);
    }
}

pub struct UnitOfWork<'a> {
    store: &'a Store,
    guards: Vec<RowGuard<'a>>,
    locked: Vec<RowKey>,
    bookings: HashMap<Uuid, Booking>,
    drivers: HashMap<Uuid, Driver>,
    vehicles: HashMap<Uuid, Vehicle>,
}

impl UnitOfWork<'_> {
    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.locked.contains(&key) {
            return Ok(());
        }

        if let Some(held) = self.locked.last().copied() {
            if key < held {
                return Err(StoreError::LockOrder {
                    requested: key,
                    held,
                });
            }
        }

        let guard = self.store.lock_row(key).await?;
        self.guards.push(guard);
        self.locked.push(key);
        Ok(())
    }

    pub async fn lock_booking(&mut self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.acquire(RowKey::Booking(id)).await?;
        Ok(self
            .bookings
            .get(&id)
            .cloned()
            .or_else(|| self.store.booking(id)))
    }

    pub async fn lock_driver(&mut self, id: Uuid) -> Result<Option<Driver>, StoreError> {
        self.acquire(RowKey::Driver(id)).await?;
        Ok(self
            .drivers
            .get(&id)
            .cloned()
            .or_else(|| self.store.driver(id)))
    }

    pub async fn lock_vehicle(&mut self, id: Uuid) -> Result<Option<Vehicle>, StoreError> {
        self.acquire(RowKey::Vehicle(id)).await?;
        Ok(self
            .vehicles
            .get(&id)
            .cloned()
            .or_else(|| self.store.vehicle(id)))
    }

    pub fn put_booking(&mut self, booking: Booking) {
        debug_assert!(self.locked.contains(&RowKey::Booking(booking.id)));
        self.bookings.insert(booking.id, booking);
    }

    pub fn put_driver(&mut self, driver: Driver) {
        debug_assert!(self.locked.contains(&RowKey::Driver(driver.id)));
        self.drivers.insert(driver.id, driver);
    }

    pub fn put_vehicle(&mut self, vehicle: Vehicle) {
        debug_assert!(self.locked.contains(&RowKey::Vehicle(vehicle.id)));
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub async fn commit(self) {
        let store = self.store;
        let gate = store.commit_gate.read().await;

        for (id, booking) in self.bookings {
            let finished = booking.status.is_terminal();
            store.bookings.insert(id, booking);
            if finished {
                store.etas.remove(&id);
            }
        }

        for (id, driver) in self.drivers {
            store.drivers.insert(id, driver);
        }

        for (id, vehicle) in self.vehicles {
            store.vehicles.insert(id, vehicle);
        }

        drop(gate);
        drop(self.guards);
    }
}
