use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::booking::{Booking, Eta};
use crate::models::dispatch::DispatchTask;
use crate::models::driver::{Driver, LocationFix};
use crate::models::payment::Payment;
use crate::models::vehicle::Vehicle;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub bookings: Vec<Booking>,
    pub drivers: Vec<Driver>,
    pub vehicles: Vec<Vehicle>,
    pub payments: Vec<Payment>,
    pub dispatch_tasks: Vec<DispatchTask>,
    pub locations: Vec<(Uuid, LocationFix)>,
    pub etas: Vec<(Uuid, Eta)>,
}

impl Store {
    /// Copy of every table taken with commits held off, so no unit of work is
    /// captured half applied.
    pub async fn snapshot(&self) -> Snapshot {
        let _gate = self.commit_gate.write().await;

        Snapshot {
            taken_at: Some(Utc::now()),
            bookings: self.bookings(),
            drivers: self.drivers(),
            vehicles: self.vehicles(),
            payments: self
                .payments
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
            dispatch_tasks: self.dispatch_tasks(),
            locations: self
                .locations
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            etas: self
                .etas
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    pub fn restore(&self, snapshot: Snapshot) {
        for booking in snapshot.bookings {
            self.bookings.insert(booking.id, booking);
        }
        for driver in snapshot.drivers {
            self.drivers.insert(driver.id, driver);
        }
        for vehicle in snapshot.vehicles {
            self.vehicles.insert(vehicle.id, vehicle);
        }
        for payment in snapshot.payments {
            self.payments.insert(payment.booking_id, payment);
        }
        for task in snapshot.dispatch_tasks {
            self.dispatch_tasks.insert(task.booking_id, task);
        }
        for (driver_id, fix) in snapshot.locations {
            self.locations.insert(driver_id, fix);
        }
        for (booking_id, eta) in snapshot.etas {
            self.etas.insert(booking_id, eta);
        }
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot().await;
        let body = serde_json::to_vec_pretty(&snapshot)?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            path = %path.display(),
            bookings = snapshot.bookings.len(),
            dispatch_tasks = snapshot.dispatch_tasks.len(),
            "store snapshot saved"
        );
        Ok(())
    }

    pub async fn save_periodically(&self, path: &Path, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = self.save_snapshot(path).await {
                warn!(path = %path.display(), error = %err, "periodic snapshot failed");
            }
        }
    }

    pub async fn load_snapshot(&self, path: &Path) -> Result<bool, StoreError> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&body)?;
        info!(
            path = %path.display(),
            bookings = snapshot.bookings.len(),
            dispatch_tasks = snapshot.dispatch_tasks.len(),
            "store snapshot loaded"
        );
        self.restore(snapshot);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use crate::models::booking::{Booking, BookingKind};
    use crate::models::dispatch::DispatchTask;
    use crate::models::vehicle::Vehicle;
    use crate::store::Store;

    #[tokio::test]
    async fn snapshot_survives_a_restart() {
        let path = std::env::temp_dir().join(format!("dispatch-{}.json", uuid::Uuid::new_v4()));

        let original = Store::new(Duration::from_millis(50));
        let booking = Booking::new(BookingKind::Emergency, None, None, Utc::now());
        let task = DispatchTask::new(booking.id, booking.created_at);
        original.insert_booking(booking.clone());
        original.insert_vehicle(Vehicle::new("B 1234 XY".to_string()));
        assert!(original.claim_dispatch_task(task));
        original.save_snapshot(&path).await.unwrap();

        let restarted = Store::new(Duration::from_millis(50));
        assert!(restarted.load_snapshot(&path).await.unwrap());

        assert_eq!(restarted.booking(booking.id).unwrap().id, booking.id);
        assert_eq!(restarted.dispatch_task(booking.id), Some(task));
        assert_eq!(restarted.vehicles().len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn periodic_snapshots_reach_disk() {
        let path = std::env::temp_dir().join(format!("periodic-{}.json", uuid::Uuid::new_v4()));
        let store = Arc::new(Store::new(Duration::from_millis(50)));
        store.insert_vehicle(Vehicle::new("B 9 AMB".to_string()));

        let saver = {
            let store = store.clone();
            let path = path.clone();
            let every = Duration::from_millis(10);
            tokio::spawn(async move { store.save_periodically(&path, every).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        saver.abort();

        let restarted = Store::new(Duration::from_millis(50));
        assert!(restarted.load_snapshot(&path).await.unwrap());
        assert_eq!(restarted.vehicles().len(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn snapshot_waits_for_a_commit_in_progress() {
        let store = Store::new(Duration::from_millis(50));
        let commit = store.commit_gate.read().await;

        let blocked = tokio::time::timeout(Duration::from_millis(30), store.snapshot()).await;
        assert!(blocked.is_err());

        drop(commit);
        let snapshot = store.snapshot().await;
        assert!(snapshot.bookings.is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_an_error() {
        let store = Store::new(Duration::from_millis(50));
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));

        assert!(!store.load_snapshot(&path).await.unwrap());
    }
}
