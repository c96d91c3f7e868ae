pub mod actions;
pub mod fleet;
pub mod guard;
pub mod intake;
pub mod lifecycle;
pub mod queue;
pub mod scheduler;
pub mod selection;
pub mod sync;
pub mod tracking;

use crate::models::event::{Notification, TransitionEvent};
use crate::state::AppState;

pub(crate) fn publish_transition(state: &AppState, event: &TransitionEvent) {
    state
        .metrics
        .booking_transitions_total
        .with_label_values(&[event.to.as_str()])
        .inc();
    state.notify(Notification::from(event));
}
