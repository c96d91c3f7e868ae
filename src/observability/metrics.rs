use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub assignments_total: IntCounterVec,
    pub dispatch_attempts_total: IntCounterVec,
    pub dispatch_tasks_in_queue: IntGauge,
    pub dispatch_escalations_total: IntCounter,
    pub booking_transitions_total: IntCounterVec,
    pub time_to_assign_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment claims by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let dispatch_attempts_total = IntCounterVec::new(
            Opts::new(
                "dispatch_attempts_total",
                "Emergency dispatch attempts by phase and outcome",
            ),
            &["phase", "outcome"],
        )
        .expect("valid dispatch_attempts_total metric");

        let dispatch_tasks_in_queue = IntGauge::new(
            "dispatch_tasks_in_queue",
            "Dispatch tasks waiting for a worker",
        )
        .expect("valid dispatch_tasks_in_queue metric");

        let dispatch_escalations_total = IntCounter::new(
            "dispatch_escalations_total",
            "Emergency bookings escalated after exhausting the retry budget",
        )
        .expect("valid dispatch_escalations_total metric");

        let booking_transitions_total = IntCounterVec::new(
            Opts::new("booking_transitions_total", "Booking transitions by target status"),
            &["to"],
        )
        .expect("valid booking_transitions_total metric");

        let time_to_assign_seconds = HistogramVec::new(
            HistogramOpts::new(
                "time_to_assign_seconds",
                "Seconds from booking creation to driver assignment",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 90.0, 300.0, 900.0]),
            &["kind"],
        )
        .expect("valid time_to_assign_seconds metric");

        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(dispatch_attempts_total.clone()))
            .expect("register dispatch_attempts_total");
        registry
            .register(Box::new(dispatch_tasks_in_queue.clone()))
            .expect("register dispatch_tasks_in_queue");
        registry
            .register(Box::new(dispatch_escalations_total.clone()))
            .expect("register dispatch_escalations_total");
        registry
            .register(Box::new(booking_transitions_total.clone()))
            .expect("register booking_transitions_total");
        registry
            .register(Box::new(time_to_assign_seconds.clone()))
            .expect("register time_to_assign_seconds");

        Self {
            registry,
            assignments_total,
            dispatch_attempts_total,
            dispatch_tasks_in_queue,
            dispatch_escalations_total,
            booking_transitions_total,
            time_to_assign_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
