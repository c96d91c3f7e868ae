use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::{Config, DispatchPolicy};
use crate::models::dispatch::DispatchTask;
use crate::models::event::Notification;
use crate::observability::metrics::Metrics;
use crate::store::Store;

pub struct AppState {
    pub store: Store,
    pub dispatch_tx: mpsc::Sender<DispatchTask>,
    pub notifications_tx: broadcast::Sender<Notification>,
    pub metrics: Metrics,
    pub policy: DispatchPolicy,
    pub average_speed_kmh: f64,
    pub rng: Mutex<StdRng>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<DispatchTask>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let (notifications_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let (shutdown, _) = watch::channel(false);

        let rng = match config.dispatch_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        (
            Self {
                store: Store::new(config.store_lock_timeout),
                dispatch_tx,
                notifications_tx,
                metrics: Metrics::new(),
                policy: config.dispatch,
                average_speed_kmh: config.average_speed_kmh,
                rng: Mutex::new(rng),
                shutdown,
            },
            dispatch_rx,
        )
    }

    pub fn notify(&self, notification: Notification) {
        let _ = self.notifications_tx.send(notification);
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
