use std::sync::Arc;
use std::time::Duration;

use ambulance_dispatch::config::Config;
use ambulance_dispatch::engine::guard::{try_assign, AssignOutcome};
use ambulance_dispatch::engine::intake::{self, NewBooking};
use ambulance_dispatch::engine::lifecycle::AssignTarget;
use ambulance_dispatch::engine::scheduler::{
    recover_dispatch_tasks, run_attempt, run_dispatch_engine, AttemptOutcome,
};
use ambulance_dispatch::engine::{actions, fleet, sync, tracking};
use ambulance_dispatch::error::{AppError, ErrorKind, Rejection};
use ambulance_dispatch::geo::{haversine_km, GeoPoint};
use ambulance_dispatch::models::booking::{Booking, BookingKind, BookingStatus};
use ambulance_dispatch::models::dispatch::{DispatchTask, Phase};
use ambulance_dispatch::models::driver::{Driver, DriverStatus};
use ambulance_dispatch::models::event::Notification;
use ambulance_dispatch::models::payment::{PaymentKind, PaymentStatus};
use ambulance_dispatch::models::vehicle::VehicleStatus;
use ambulance_dispatch::state::AppState;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

const PICKUP: GeoPoint = GeoPoint {
    lat: -6.2000,
    lng: 106.8166,
};

fn setup_with(config: Config) -> (Arc<AppState>, mpsc::Receiver<DispatchTask>) {
    let (state, rx) = AppState::new(&config);
    (Arc::new(state), rx)
}

fn setup() -> (Arc<AppState>, mpsc::Receiver<DispatchTask>) {
    setup_with(Config {
        dispatch_seed: Some(7),
        ..Config::default()
    })
}

/// A point `km` north of the pickup.
fn north_of_pickup(km: f64) -> GeoPoint {
    GeoPoint {
        lat: PICKUP.lat + km / 111.195,
        lng: PICKUP.lng,
    }
}

async fn crew(state: &AppState, name: &str, location: Option<GeoPoint>) -> Driver {
    let vehicle = fleet::register_vehicle(&state.store, format!("AMB-{name}")).unwrap();
    let name = name.to_string();
    let driver = fleet::register_driver(&state.store, name, Some(vehicle.id), Utc::now())
        .await
        .unwrap();
    if let Some(point) = location {
        tracking::update_location(state, driver.id, point, Utc::now()).unwrap();
    }
    driver
}

async fn booking(state: &AppState, kind: BookingKind) -> Booking {
    intake::create_booking(
        state,
        NewBooking {
            kind,
            pickup: Some(PICKUP),
            destination: Some(north_of_pickup(8.0)),
        },
    )
    .await
    .unwrap()
}

fn driver_status(state: &AppState, driver: &Driver) -> DriverStatus {
    state.store.driver(driver.id).unwrap().status
}

fn vehicle_status(state: &AppState, driver: &Driver) -> VehicleStatus {
    let vehicle_id = driver.vehicle_id.unwrap();
    state.store.vehicle(vehicle_id).unwrap().status
}

fn booking_status(state: &AppState, booking: &Booking) -> BookingStatus {
    state.store.booking(booking.id).unwrap().status
}

fn rejection(err: AppError) -> Rejection {
    match err {
        AppError::Rejected(rejection) => rejection,
        other => panic!("expected a domain rejection, got {other}"),
    }
}

#[tokio::test]
async fn nearest_driver_wins_and_manual_accept_sees_already_taken() {
    let (state, _rx) = setup();
    let d1 = crew(&state, "d1", Some(north_of_pickup(1.2))).await;
    let d2 = crew(&state, "d2", Some(north_of_pickup(3.4))).await;
    let b1 = booking(&state, BookingKind::Emergency).await;

    let d1_fix = state.store.location(d1.id).unwrap();
    assert!((haversine_km(&d1_fix.point, &PICKUP) - 1.2).abs() < 0.01);

    let task = state.store.dispatch_task(b1.id).unwrap();
    let outcome = run_attempt(&state, task, task.started_at + chrono::Duration::seconds(2)).await;
    assert_eq!(
        outcome,
        AttemptOutcome::Assigned {
            driver_id: d1.id,
            phase: Phase::Nearby,
        }
    );

    let stored = state.store.booking(b1.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Dispatched);
    assert_eq!(stored.driver_id, Some(d1.id));
    assert_eq!(stored.vehicle_id, d1.vehicle_id);
    assert!(stored.confirmed_at.is_some());
    assert_eq!(driver_status(&state, &d1), DriverStatus::Busy);
    assert_eq!(vehicle_status(&state, &d1), VehicleStatus::OnDuty);
    assert!(state.store.dispatch_task(b1.id).is_none());

    let err = actions::accept_emergency(&state, b1.id, d2.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyTaken);
    assert_eq!(err.to_string(), "booking already accepted by another driver");
    assert_eq!(driver_status(&state, &d2), DriverStatus::Available);
    assert_eq!(vehicle_status(&state, &d2), VehicleStatus::Available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_exactly_one_winner() {
    let (state, _rx) = setup();
    let booking_id = booking(&state, BookingKind::Scheduled).await.id;

    let mut drivers = Vec::new();
    for i in 0..8 {
        drivers.push(crew(&state, &format!("c{i}"), None).await);
    }

    let handles: Vec<_> = drivers
        .iter()
        .map(|driver| {
            let state = state.clone();
            let driver_id = driver.id;
            tokio::spawn(async move {
                try_assign(&state, booking_id, driver_id, AssignTarget::Confirmed, Utc::now())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AssignOutcome::Assigned(_) => winners += 1,
            AssignOutcome::AlreadyTaken => {}
            other => panic!("unexpected outcome {}", other.label()),
        }
    }
    assert_eq!(winners, 1);

    let stored = state.store.booking(booking_id).unwrap();
    let busy: Vec<_> = drivers
        .iter()
        .filter(|driver| driver_status(&state, driver) == DriverStatus::Busy)
        .collect();
    assert_eq!(busy.len(), 1);
    assert_eq!(stored.driver_id, Some(busy[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scheduler_and_manual_accept_race_resolves_once() {
    let (state, _rx) = setup();
    let scheduled_pick = crew(&state, "near", Some(north_of_pickup(0.5))).await;
    let manual = crew(&state, "manual", Some(north_of_pickup(9.0))).await;
    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();
    let (booking_id, manual_id) = (b.id, manual.id);

    let scheduler_state = state.clone();
    let manual_state = state.clone();
    let (attempt, accepted) = tokio::join!(
        tokio::spawn(async move { run_attempt(&scheduler_state, task, Utc::now()).await }),
        tokio::spawn(async move {
            actions::accept_emergency(&manual_state, booking_id, manual_id).await
        }),
    );
    let attempt = attempt.unwrap();
    let accepted = accepted.unwrap();

    let stored = state.store.booking(b.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Dispatched);

    match accepted {
        Ok(result) => {
            assert_eq!(result.booking.driver_id, Some(manual.id));
            assert!(matches!(
                attempt,
                AttemptOutcome::Resolved | AttemptOutcome::Skipped
            ));
            assert_eq!(driver_status(&state, &scheduled_pick), DriverStatus::Available);
        }
        Err(err) => {
            assert_eq!(err.kind(), ErrorKind::AlreadyTaken);
            assert!(matches!(attempt, AttemptOutcome::Assigned { .. }));
            assert_eq!(stored.driver_id, Some(scheduled_pick.id));
            assert_eq!(driver_status(&state, &manual), DriverStatus::Available);
        }
    }
}

#[tokio::test]
async fn a_busy_driver_cannot_take_a_second_booking_until_the_first_ends() {
    let (state, _rx) = setup();
    let d = crew(&state, "solo", None).await;
    let first = booking(&state, BookingKind::Emergency).await;
    let second = booking(&state, BookingKind::Scheduled).await;

    actions::accept_emergency(&state, first.id, d.id).await.unwrap();

    let outcome = try_assign(&state, second.id, d.id, AssignTarget::Confirmed, Utc::now())
        .await
        .unwrap();
    assert!(matches!(outcome, AssignOutcome::DriverUnavailable));
    assert_eq!(booking_status(&state, &second), BookingStatus::Pending);

    actions::complete(&state, first.id, d.id).await.unwrap();
    assert_eq!(driver_status(&state, &d), DriverStatus::Available);

    let outcome = try_assign(&state, second.id, d.id, AssignTarget::Confirmed, Utc::now())
        .await
        .unwrap();
    assert!(outcome.is_assigned());
    assert_eq!(state.store.driver(d.id).unwrap().completed_trips, 1);
}

#[tokio::test]
async fn search_phase_switches_after_the_nearby_window() {
    let (state, _rx) = setup();
    crew(&state, "near", Some(north_of_pickup(0.8))).await;

    let early = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(early.id).unwrap();
    let outcome = run_attempt(&state, task, task.started_at + chrono::Duration::seconds(29)).await;
    assert!(matches!(
        outcome,
        AttemptOutcome::Assigned {
            phase: Phase::Nearby,
            ..
        }
    ));

    crew(&state, "late", Some(north_of_pickup(2.0))).await;
    let late = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(late.id).unwrap();
    let outcome = run_attempt(&state, task, task.started_at + chrono::Duration::seconds(31)).await;
    assert!(matches!(
        outcome,
        AttemptOutcome::Assigned {
            phase: Phase::Broadcast,
            ..
        }
    ));
}

#[tokio::test]
async fn exhausted_retry_budget_escalates_exactly_once() {
    let (state, _rx) = setup();
    let mut notifications = state.notifications_tx.subscribe();
    let b = booking(&state, BookingKind::Emergency).await;

    let mut task = state.store.dispatch_task(b.id).unwrap();
    for attempt in 1..=12i64 {
        let now = task.started_at + chrono::Duration::seconds(5 * (attempt - 1));
        match run_attempt(&state, task, now).await {
            AttemptOutcome::Retry { next, delay, .. } => {
                assert!(attempt < 12, "attempt {attempt} should have escalated");
                assert_eq!(delay, Duration::from_secs(5));
                assert_eq!(state.store.dispatch_task(b.id), Some(next));
                task = next;
            }
            AttemptOutcome::Escalated { attempts } => {
                assert_eq!(attempt, 12);
                assert_eq!(attempts, 12);
            }
            other => panic!("unexpected outcome {other:?} at attempt {attempt}"),
        }
    }

    assert!(state.store.dispatch_task(b.id).is_none());
    assert_eq!(
        run_attempt(&state, task, Utc::now()).await,
        AttemptOutcome::Skipped
    );

    let stored = state.store.booking(b.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(stored.escalated_at.is_some());

    let mut escalations = 0;
    while let Ok(notification) = notifications.try_recv() {
        if let Notification::UnassignedEscalation { booking_id, attempts } = notification {
            assert_eq!(booking_id, b.id);
            assert_eq!(attempts, 12);
            escalations += 1;
        }
    }
    assert_eq!(escalations, 1);
}

#[tokio::test]
async fn transient_store_fault_is_consumed_as_a_retry() {
    let (state, _rx) = setup_with(Config {
        store_lock_timeout: Duration::from_millis(50),
        ..Config::default()
    });
    crew(&state, "ready", Some(north_of_pickup(1.0))).await;
    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();

    let mut blocker = state.store.begin();
    blocker.lock_booking(b.id).await.unwrap();

    let outcome = run_attempt(&state, task, task.started_at).await;
    assert!(matches!(outcome, AttemptOutcome::Retry { .. }));
    drop(blocker);

    let next = state.store.dispatch_task(b.id).unwrap();
    assert_eq!(next.attempt, 2);
    let outcome = run_attempt(&state, next, next.started_at + chrono::Duration::seconds(5)).await;
    assert!(matches!(outcome, AttemptOutcome::Assigned { .. }));
}

#[tokio::test]
async fn queued_task_is_a_no_op_once_the_booking_was_taken() {
    let (state, _rx) = setup();
    let d = crew(&state, "quick", None).await;
    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();

    actions::accept_emergency(&state, b.id, d.id).await.unwrap();

    assert_eq!(run_attempt(&state, task, Utc::now()).await, AttemptOutcome::Skipped);
    assert!(state.store.dispatch_task(b.id).is_none());
}

#[tokio::test]
async fn transitions_from_non_adjacent_states_leave_the_booking_unchanged() {
    let (state, _rx) = setup();
    let d = crew(&state, "idle", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;

    let err = actions::complete(&state, b.id, d.id).await.unwrap_err();
    assert!(matches!(rejection(err), Rejection::InvalidTransition { .. }));
    assert_eq!(booking_status(&state, &b), BookingStatus::Pending);

    actions::accept(&state, b.id, d.id).await.unwrap();
    let err = actions::arrive(&state, b.id, d.id).await.unwrap_err();
    assert!(matches!(rejection(err), Rejection::InvalidTransition { .. }));
    assert_eq!(booking_status(&state, &b), BookingStatus::Confirmed);

    let stranger = crew(&state, "stranger", None).await;
    let err = actions::start(&state, b.id, stranger.id).await.unwrap_err();
    assert_eq!(rejection(err), Rejection::NotBoundDriver(stranger.id));
    assert_eq!(booking_status(&state, &b), BookingStatus::Confirmed);
}

#[tokio::test]
async fn emergency_completion_from_arrived_requires_settled_payment() {
    let (state, _rx) = setup();
    let d = crew(&state, "medic", None).await;
    let b = booking(&state, BookingKind::Emergency).await;

    actions::accept_emergency(&state, b.id, d.id).await.unwrap();
    let arrived = actions::arrive(&state, b.id, d.id).await.unwrap();
    assert_eq!(arrived.booking.status, BookingStatus::Arrived);
    assert!(arrived.booking.pickup_at.is_some());

    let err = actions::complete(&state, b.id, d.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PaymentRequired);
    assert_eq!(booking_status(&state, &b), BookingStatus::Arrived);
    assert_eq!(driver_status(&state, &d), DriverStatus::Busy);

    intake::record_payment(&state, b.id, PaymentKind::Full, PaymentStatus::Settled, Utc::now())
        .unwrap();
    let done = actions::complete(&state, b.id, d.id).await.unwrap();

    assert_eq!(done.booking.status, BookingStatus::Completed);
    assert!(done.booking.completed_at.is_some());
    assert_eq!(driver_status(&state, &d), DriverStatus::Available);
    assert_eq!(vehicle_status(&state, &d), VehicleStatus::Available);
    assert_eq!(state.store.driver(d.id).unwrap().completed_trips, 1);
}

#[tokio::test]
async fn emergency_departure_without_payment_carries_a_warning() {
    let (state, _rx) = setup();
    let d = crew(&state, "medic", None).await;
    let b = booking(&state, BookingKind::Emergency).await;

    actions::accept_emergency(&state, b.id, d.id).await.unwrap();
    actions::arrive(&state, b.id, d.id).await.unwrap();
    let departed = actions::depart(&state, b.id, d.id).await.unwrap();

    assert_eq!(departed.booking.status, BookingStatus::Enroute);
    assert!(departed.warning.is_some());

    let done = actions::complete(&state, b.id, d.id).await.unwrap();
    assert_eq!(done.booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn cancellation_frees_resources_and_cannot_repeat() {
    let (state, _rx) = setup();
    let d3 = crew(&state, "d3", None).await;
    let b2 = booking(&state, BookingKind::Emergency).await;
    actions::accept_emergency(&state, b2.id, d3.id).await.unwrap();

    let cancelled = actions::cancel(&state, b2.id, d3.id, "patient unreachable")
        .await
        .unwrap();
    assert_eq!(cancelled.booking.status, BookingStatus::Cancelled);
    let cancellation = cancelled.booking.cancellation.unwrap();
    assert_eq!(cancellation.reason, "patient unreachable");
    assert_eq!(driver_status(&state, &d3), DriverStatus::Available);
    assert_eq!(vehicle_status(&state, &d3), VehicleStatus::Available);

    let err = actions::cancel(&state, b2.id, d3.id, "patient unreachable")
        .await
        .unwrap_err();
    assert!(matches!(rejection(err), Rejection::InvalidTransition { .. }));
    assert_eq!(booking_status(&state, &b2), BookingStatus::Cancelled);
    assert_eq!(driver_status(&state, &d3), DriverStatus::Available);
}

#[tokio::test]
async fn cancel_without_reason_is_rejected() {
    let (state, _rx) = setup();
    let d = crew(&state, "d", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;
    actions::accept(&state, b.id, d.id).await.unwrap();

    let err = actions::cancel(&state, b.id, d.id, "  ").await.unwrap_err();
    assert_eq!(rejection(err), Rejection::MissingReason);
    assert_eq!(booking_status(&state, &b), BookingStatus::Confirmed);
}

#[tokio::test]
async fn scheduled_trip_walks_the_full_lifecycle() {
    let (state, _rx) = setup();
    let d = crew(&state, "planner", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;

    let accepted = actions::accept(&state, b.id, d.id).await.unwrap();
    assert_eq!(accepted.booking.status, BookingStatus::Confirmed);
    assert_eq!(driver_status(&state, &d), DriverStatus::Busy);

    let started = actions::start(&state, b.id, d.id).await.unwrap();
    assert_eq!(started.booking.status, BookingStatus::Dispatched);
    assert!(started.booking.pickup_at.is_some());

    actions::arrive(&state, b.id, d.id).await.unwrap();

    let err = actions::depart(&state, b.id, d.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PaymentRequired);

    intake::record_payment(
        &state,
        b.id,
        PaymentKind::DownPayment,
        PaymentStatus::Settled,
        Utc::now(),
    )
    .unwrap();
    actions::depart(&state, b.id, d.id).await.unwrap();

    let done = actions::complete(&state, b.id, d.id).await.unwrap();
    assert_eq!(done.booking.status, BookingStatus::Completed);
    assert_eq!(driver_status(&state, &d), DriverStatus::Available);
}

#[tokio::test]
async fn failed_payment_on_confirm_can_be_retried() {
    let (state, _rx) = setup();
    let d = crew(&state, "d", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;
    intake::record_payment(
        &state,
        b.id,
        PaymentKind::DownPayment,
        PaymentStatus::Failed,
        Utc::now(),
    )
    .unwrap();

    let accepted = actions::accept(&state, b.id, d.id).await.unwrap();
    assert_eq!(accepted.booking.status, BookingStatus::PaymentFailed);
    assert_eq!(driver_status(&state, &d), DriverStatus::Busy);

    let retried = intake::retry_payment(&state, b.id, true).await.unwrap();
    assert_eq!(retried.booking.status, BookingStatus::Confirmed);
    assert!(state.store.payment(b.id).unwrap().is_settled());

    actions::start(&state, b.id, d.id).await.unwrap();
    assert_eq!(booking_status(&state, &b), BookingStatus::Dispatched);
}

#[tokio::test]
async fn failed_payment_retry_cancels_and_frees_the_driver() {
    let (state, _rx) = setup();
    let d = crew(&state, "d", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;
    intake::record_payment(&state, b.id, PaymentKind::Full, PaymentStatus::Failed, Utc::now())
        .unwrap();
    actions::accept(&state, b.id, d.id).await.unwrap();

    let retried = intake::retry_payment(&state, b.id, false).await.unwrap();
    assert_eq!(retried.booking.status, BookingStatus::Cancelled);
    assert_eq!(driver_status(&state, &d), DriverStatus::Available);
    assert_eq!(vehicle_status(&state, &d), VehicleStatus::Available);

    let err = intake::retry_payment(&state, b.id, true).await.unwrap_err();
    assert!(matches!(rejection(err), Rejection::InvalidTransition { .. }));
}

#[tokio::test]
async fn shift_change_is_blocked_during_a_live_booking() {
    let (state, _rx) = setup();
    let d = crew(&state, "shift", None).await;
    let b = booking(&state, BookingKind::Emergency).await;
    actions::accept_emergency(&state, b.id, d.id).await.unwrap();

    let err = sync::set_driver_status(&state.store, d.id, DriverStatus::Off, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(rejection(err), Rejection::DriverHasLiveBooking(d.id));
    assert_eq!(driver_status(&state, &d), DriverStatus::Busy);

    actions::complete(&state, b.id, d.id).await.unwrap();
    let off = sync::set_driver_status(&state.store, d.id, DriverStatus::Off, Utc::now())
        .await
        .unwrap();
    assert_eq!(off.status, DriverStatus::Off);
}

#[tokio::test]
async fn ineligible_drivers_are_never_candidates() {
    let (state, _rx) = setup();
    let inactive = crew(&state, "inactive", Some(north_of_pickup(0.2))).await;
    fleet::set_driver_active(&state.store, inactive.id, false).await.unwrap();

    let in_shop = crew(&state, "in-shop", Some(north_of_pickup(0.3))).await;
    fleet::set_vehicle_status(&state.store, in_shop.vehicle_id.unwrap(), VehicleStatus::Maintenance)
        .await
        .unwrap();

    let no_vehicle = fleet::register_driver(&state.store, "walker".to_string(), None, Utc::now())
        .await
        .unwrap();
    tracking::update_location(&state, no_vehicle.id, north_of_pickup(0.1), Utc::now()).unwrap();

    let eligible = crew(&state, "eligible", Some(north_of_pickup(6.0))).await;

    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();
    let outcome = run_attempt(&state, task, task.started_at).await;

    assert_eq!(
        outcome,
        AttemptOutcome::Assigned {
            driver_id: eligible.id,
            phase: Phase::Nearby,
        }
    );

    let direct = try_assign(&state, b.id, inactive.id, AssignTarget::Dispatched, Utc::now())
        .await
        .unwrap();
    assert!(matches!(direct, AssignOutcome::AlreadyTaken));
}

#[tokio::test]
async fn eta_is_tracked_only_until_pickup() {
    let (state, _rx) = setup();
    let d = crew(&state, "tracker", Some(north_of_pickup(10.0))).await;
    let b = booking(&state, BookingKind::Emergency).await;
    actions::accept_emergency(&state, b.id, d.id).await.unwrap();

    tracking::update_location(&state, d.id, north_of_pickup(4.0), Utc::now()).unwrap();
    let eta = state.store.eta(b.id).unwrap();
    assert!((eta.minutes - 6.0).abs() < 0.1);

    actions::arrive(&state, b.id, d.id).await.unwrap();
    tracking::update_location(&state, d.id, north_of_pickup(0.0), Utc::now()).unwrap();
    assert!((state.store.eta(b.id).unwrap().minutes - 6.0).abs() < 0.1);

    actions::complete(&state, b.id, d.id).await.unwrap_err();
    intake::record_payment(&state, b.id, PaymentKind::Full, PaymentStatus::Settled, Utc::now())
        .unwrap();
    actions::complete(&state, b.id, d.id).await.unwrap();
    assert!(state.store.eta(b.id).is_none());
}

#[tokio::test]
async fn assignment_emits_notifications_in_order() {
    let (state, _rx) = setup();
    let mut notifications = state.notifications_tx.subscribe();
    let d = crew(&state, "n", None).await;
    let b = booking(&state, BookingKind::Scheduled).await;

    actions::accept(&state, b.id, d.id).await.unwrap();

    assert_eq!(
        notifications.try_recv().unwrap(),
        Notification::DriverAssigned {
            booking_id: b.id,
            driver_id: d.id,
        }
    );
    assert_eq!(
        notifications.try_recv().unwrap(),
        Notification::BookingStatusChanged {
            booking_id: b.id,
            old: BookingStatus::Pending,
            new: BookingStatus::Confirmed,
        }
    );
}

#[tokio::test]
async fn dispatch_engine_assigns_a_new_emergency_booking() {
    let (state, rx) = setup();
    tokio::spawn(run_dispatch_engine(state.clone(), rx, 2));
    let d = crew(&state, "on-call", Some(north_of_pickup(1.0))).await;
    let b = booking(&state, BookingKind::Emergency).await;

    let mut assigned = None;
    for _ in 0..50 {
        let stored = state.store.booking(b.id).unwrap();
        if stored.status == BookingStatus::Dispatched {
            assigned = stored.driver_id;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(assigned, Some(d.id));
    assert_eq!(driver_status(&state, &d), DriverStatus::Busy);
    assert!(state.store.dispatch_task(b.id).is_none());
}

#[tokio::test]
async fn dispatch_engine_stops_on_shutdown_and_keeps_stored_tasks() {
    let (state, rx) = setup();
    let engine = tokio::spawn(run_dispatch_engine(state.clone(), rx, 2));
    let b = booking(&state, BookingKind::Emergency).await;

    state.begin_shutdown();
    tokio::time::timeout(Duration::from_secs(1), engine)
        .await
        .expect("engine stops after shutdown")
        .unwrap();

    assert_eq!(booking_status(&state, &b), BookingStatus::Pending);
    assert!(state.store.dispatch_task(b.id).is_some());
}

#[tokio::test]
async fn hard_deadline_escalates_before_the_budget_is_spent() {
    let (state, _rx) = setup();
    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();
    assert_eq!(task.attempt, 1);

    let outcome = run_attempt(&state, task, task.started_at + chrono::Duration::seconds(91)).await;

    assert_eq!(outcome, AttemptOutcome::Escalated { attempts: 1 });
    assert!(state.store.dispatch_task(b.id).is_none());
    assert!(state.store.booking(b.id).unwrap().escalated_at.is_some());
}

#[tokio::test]
async fn driver_lost_between_selection_and_claim_is_retried() {
    let (state, _rx) = setup();
    let d = crew(&state, "fading", Some(north_of_pickup(1.0))).await;
    let b = booking(&state, BookingKind::Emergency).await;
    let task = state.store.dispatch_task(b.id).unwrap();

    let mut holder = state.store.begin();
    let mut driver = holder.lock_driver(d.id).await.unwrap().unwrap();

    let attempt = {
        let state = state.clone();
        tokio::spawn(async move { run_attempt(&state, task, task.started_at).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    driver.is_active = false;
    holder.put_driver(driver);
    holder.commit().await;

    let outcome = attempt.await.unwrap();
    assert!(matches!(
        outcome,
        AttemptOutcome::Retry {
            phase: Phase::Nearby,
            ..
        }
    ));
    assert_eq!(booking_status(&state, &b), BookingStatus::Pending);
    assert_eq!(state.store.dispatch_task(b.id).unwrap().attempt, 2);
    assert_eq!(driver_status(&state, &d), DriverStatus::Available);
}

#[tokio::test]
async fn stale_task_copy_is_skipped_without_advancing_the_record() {
    let (state, _rx) = setup();
    let b = booking(&state, BookingKind::Emergency).await;
    let first = state.store.dispatch_task(b.id).unwrap();

    let AttemptOutcome::Retry { next, .. } = run_attempt(&state, first, first.started_at).await
    else {
        panic!("expected a retry with no drivers on shift");
    };

    let later = first.started_at + chrono::Duration::seconds(5);
    assert_eq!(run_attempt(&state, first, later).await, AttemptOutcome::Skipped);
    assert_eq!(state.store.dispatch_task(b.id), Some(next));
}

#[tokio::test]
async fn stored_tasks_are_requeued_after_a_restart() {
    let path = std::env::temp_dir().join(format!("dispatch-recovery-{}.json", Uuid::new_v4()));
    let (before, _before_rx) = setup();
    let b = booking(&before, BookingKind::Emergency).await;
    before.store.save_snapshot(&path).await.unwrap();

    let (after, mut rx) = setup();
    assert!(after.store.load_snapshot(&path).await.unwrap());
    assert_eq!(recover_dispatch_tasks(&after).await.unwrap(), 1);

    let requeued = rx.try_recv().unwrap();
    assert_eq!(requeued.booking_id, b.id);
    assert_eq!(after.store.dispatch_task(b.id), Some(requeued));
    assert_eq!(booking_status(&after, &b), BookingStatus::Pending);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn failed_enqueue_leaves_no_booking_behind() {
    let (state, rx) = setup();
    drop(rx);

    let err = intake::create_booking(
        &state,
        NewBooking {
            kind: BookingKind::Emergency,
            pickup: Some(PICKUP),
            destination: None,
        },
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(state.store.bookings().is_empty());
    assert!(state.store.dispatch_tasks().is_empty());
}
