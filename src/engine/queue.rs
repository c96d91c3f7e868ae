use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::error;

use crate::error::AppError;
use crate::models::dispatch::DispatchTask;
use crate::state::AppState;

pub async fn enqueue_task(state: &AppState, task: DispatchTask) -> Result<(), AppError> {
    state
        .dispatch_tx
        .send(task)
        .await
        .map_err(|err| AppError::Internal(format!("dispatch queue send failed: {err}")))?;

    state.metrics.dispatch_tasks_in_queue.inc();
    Ok(())
}

/// Re-enqueues `task` once `delay` has passed. The task record is already
/// stored, so a timer dropped at shutdown is picked up by the next recovery.
pub fn enqueue_after(state: Arc<AppState>, task: DispatchTask, delay: Duration) {
    tokio::spawn(async move {
        sleep(delay).await;
        if state.is_shutting_down() {
            return;
        }
        if let Err(err) = enqueue_task(&state, task).await {
            error!(
                booking_id = %task.booking_id,
                attempt = task.attempt,
                error = %err,
                "failed to re-enqueue dispatch task"
            );
        }
    });
}
