use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

lazy_static! {
    static ref CDP_SESSIONS_TOTAL: IntCounter =
        IntCounter::new("accessly_cdp_sessions_total", "Browser sessions opened").unwrap();
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("accessly_cdp_commands_total", "Total CDP commands executed"),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "accessly_cdp_command_failures_total",
            "Total CDP command failures"
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "accessly_cdp_command_duration_seconds",
            "CDP command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_EVENTS_TOTAL: IntCounter =
        IntCounter::new("accessly_cdp_events_total", "Total CDP events consumed").unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_SESSIONS_TOTAL.clone());
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_FAILURES_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
}

pub fn record_session() {
    CDP_SESSIONS_TOTAL.inc();
}

pub fn record_command(method: &str) {
    CDP_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_event() {
    CDP_EVENTS_TOTAL.inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    CDP_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    CDP_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_move_with_recorded_commands() {
        let method = "Page.captureScreenshot";
        let commands = CDP_COMMANDS_TOTAL.with_label_values(&[method]).get();
        let failures = CDP_COMMAND_FAILURES_TOTAL.with_label_values(&[method]).get();
        let samples = CDP_COMMAND_DURATION
            .with_label_values(&[method])
            .get_sample_count();

        record_command(method);
        record_command_success(method, Duration::from_micros(150));
        record_command_failure(method);

        assert!(CDP_COMMANDS_TOTAL.with_label_values(&[method]).get() > commands);
        assert!(CDP_COMMAND_FAILURES_TOTAL.with_label_values(&[method]).get() > failures);
        assert!(
            CDP_COMMAND_DURATION
                .with_label_values(&[method])
                .get_sample_count()
                > samples
        );
    }

    #[test]
    fn registering_twice_is_harmless() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_session();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|name| name == "accessly_cdp_sessions_total"));
    }
}
