//! Emergency auto-assignment.
//!
//! Each invocation performs exactly one search-and-claim attempt for one
//! booking and then returns. Retries re-enqueue the stored [`DispatchTask`]
//! after a fixed delay, so the whole sequence survives on the task record
//! alone and any worker can pick it up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::guard::{self, AssignOutcome};
use crate::engine::lifecycle::AssignTarget;
use crate::engine::queue::{enqueue_after, enqueue_task};
use crate::engine::selection;
use crate::error::AppError;
use crate::models::booking::Booking;
use crate::models::dispatch::{DispatchTask, Phase};
use crate::models::event::Notification;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Assigned {
        driver_id: Uuid,
        phase: Phase,
    },
    /// Another path assigned or closed the booking first.
    Resolved,
    /// Booking no longer needs dispatching, or this task copy is stale.
    Skipped,
    Retry {
        next: DispatchTask,
        delay: Duration,
        phase: Phase,
    },
    Escalated {
        attempts: u32,
    },
}

impl AttemptOutcome {
    fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Assigned { .. } => "assigned",
            AttemptOutcome::Resolved => "resolved",
            AttemptOutcome::Skipped => "skipped",
            AttemptOutcome::Retry { .. } => "retry",
            AttemptOutcome::Escalated { .. } => "escalated",
        }
    }
}

pub async fn start_dispatch(
    state: &AppState,
    booking: &Booking,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let task = DispatchTask::new(booking.id, now);
    if !state.store.claim_dispatch_task(task) {
        return Ok(false);
    }

    if let Err(err) = enqueue_task(state, task).await {
        state.store.remove_dispatch_task(booking.id);
        return Err(err);
    }
    info!(booking_id = %booking.id, "emergency dispatch started");
    Ok(true)
}

pub async fn recover_dispatch_tasks(state: &AppState) -> Result<usize, AppError> {
    let tasks = state.store.dispatch_tasks();
    for task in &tasks {
        enqueue_task(state, *task).await?;
    }

    if !tasks.is_empty() {
        info!(tasks = tasks.len(), "recovered dispatch tasks");
    }
    Ok(tasks.len())
}

/// Drains the dispatch queue until the state signals shutdown, then waits for
/// the attempts already running.
pub async fn run_dispatch_engine(
    state: Arc<AppState>,
    mut task_rx: mpsc::Receiver<DispatchTask>,
    workers: usize,
) {
    info!(workers, "dispatch engine started");
    let workers = workers.max(1);
    let permits = Arc::new(Semaphore::new(workers));
    let mut shutdown = state.shutdown_signal();

    loop {
        if state.is_shutting_down() {
            break;
        }

        let task = tokio::select! {
            _ = shutdown.changed() => continue,
            task = task_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        state.metrics.dispatch_tasks_in_queue.dec();

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let state = state.clone();

        tokio::spawn(async move {
            handle_task(&state, task).await;
            drop(permit);
        });
    }

    if permits.acquire_many(workers as u32).await.is_err() {
        warn!("dispatch engine stopped without draining attempts");
        return;
    }
    info!("dispatch engine stopped");
}

pub async fn handle_task(state: &Arc<AppState>, task: DispatchTask) -> AttemptOutcome {
    let outcome = run_attempt(state, task, Utc::now()).await;

    if let AttemptOutcome::Retry { next, delay, .. } = &outcome {
        enqueue_after(state.clone(), *next, *delay);
    }

    outcome
}

pub async fn run_attempt(
    state: &AppState,
    task: DispatchTask,
    now: DateTime<Utc>,
) -> AttemptOutcome {
    let store = &state.store;
    let booking_id = task.booking_id;

    if store.dispatch_task(booking_id) != Some(task) {
        return AttemptOutcome::Skipped;
    }

    let booking = match store.booking(booking_id) {
        Some(booking) if booking.is_unassigned() => booking,
        _ => {
            store.remove_dispatch_task(booking_id);
            info!(booking_id = %booking_id, "booking no longer pending; dispatch stopped");
            return AttemptOutcome::Skipped;
        }
    };

    let elapsed = task.elapsed(now);
    let phase = Phase::for_elapsed(elapsed, state.policy.nearby_window);

    let outcome = match search_and_claim(state, &booking, phase, now).await {
        Ok(Some(AssignOutcome::Assigned(assigned))) => {
            store.remove_dispatch_task(booking_id);
            AttemptOutcome::Assigned {
                driver_id: assigned.driver_id.unwrap_or_default(),
                phase,
            }
        }
        Ok(Some(AssignOutcome::AlreadyTaken | AssignOutcome::BookingNotPending)) => {
            store.remove_dispatch_task(booking_id);
            AttemptOutcome::Resolved
        }
        Ok(Some(AssignOutcome::DriverUnavailable)) | Ok(None) => {
            retry_or_escalate(state, task, elapsed, phase, now).await
        }
        Err(err) => {
            warn!(
                booking_id = %booking_id,
                attempt = task.attempt,
                phase = phase.as_str(),
                error = %err,
                "dispatch attempt failed; treating as no candidate"
            );
            retry_or_escalate(state, task, elapsed, phase, now).await
        }
    };

    state
        .metrics
        .dispatch_attempts_total
        .with_label_values(&[phase.as_str(), outcome.label()])
        .inc();

    outcome
}

async fn search_and_claim(
    state: &AppState,
    booking: &Booking,
    phase: Phase,
    now: DateTime<Utc>,
) -> Result<Option<AssignOutcome>, AppError> {
    let pool = selection::eligible_drivers(&state.store);

    let candidate = {
        let mut rng = state
            .rng
            .lock()
            .map_err(|_| AppError::Internal("dispatch rng lock poisoned".to_string()))?;
        selection::select(phase, booking.pickup.as_ref(), &pool, &mut *rng)
    };

    let Some(candidate) = candidate else {
        return Ok(None);
    };

    info!(
        booking_id = %booking.id,
        driver_id = %candidate.driver_id,
        phase = phase.as_str(),
        distance_km = candidate.distance_km,
        "dispatch candidate found"
    );

    let outcome = guard::try_assign(
        state,
        booking.id,
        candidate.driver_id,
        AssignTarget::Dispatched,
        now,
    )
    .await?;

    Ok(Some(outcome))
}

async fn retry_or_escalate(
    state: &AppState,
    task: DispatchTask,
    elapsed: Duration,
    phase: Phase,
    now: DateTime<Utc>,
) -> AttemptOutcome {
    let policy = &state.policy;

    if task.attempt < policy.max_attempts && elapsed < policy.total_window {
        let next = task.next_attempt();
        if !state.store.advance_dispatch_task(&task, next) {
            return AttemptOutcome::Skipped;
        }

        info!(
            booking_id = %task.booking_id,
            attempt = task.attempt,
            phase = phase.as_str(),
            "no driver assigned; retrying"
        );
        return AttemptOutcome::Retry {
            next,
            delay: policy.retry_delay,
            phase,
        };
    }

    // Removing the record is the one-shot gate for the escalation.
    if state.store.remove_dispatch_task(task.booking_id).is_none() {
        return AttemptOutcome::Skipped;
    }

    if let Err(err) = mark_escalated(state, task.booking_id, now).await {
        error!(booking_id = %task.booking_id, error = %err, "failed to record escalation");
    }

    state.metrics.dispatch_escalations_total.inc();
    state.notify(Notification::UnassignedEscalation {
        booking_id: task.booking_id,
        attempts: task.attempt,
    });
    warn!(
        booking_id = %task.booking_id,
        attempts = task.attempt,
        "no driver found for emergency booking; escalated"
    );

    AttemptOutcome::Escalated {
        attempts: task.attempt,
    }
}

async fn mark_escalated(
    state: &AppState,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut uow = state.store.begin();
    if let Some(mut booking) = uow.lock_booking(booking_id).await? {
        if booking.is_unassigned() {
            booking.escalated_at = Some(now);
            uow.put_booking(booking);
            uow.commit().await;
        }
    }
    Ok(())
}
