use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use cdp_adapter::metrics as cdp_metrics;
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{
    core::Collector, histogram_opts, Encoder, Histogram, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref ANALYSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("accessly_analyses_total", "Analyses by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref ANALYSIS_DURATION: Histogram = Histogram::with_opts(histogram_opts!(
        "accessly_analysis_duration_seconds",
        "End-to-end analysis latency",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 60.0, 90.0, 120.0]
    ))
    .unwrap();
    static ref SUGGESTION_FALLBACKS: IntCounter = IntCounter::new(
        "accessly_suggestion_fallbacks_total",
        "Suggestions replaced by the fallback text"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, ANALYSES_TOTAL.clone());
        register(registry, ANALYSIS_DURATION.clone());
        register(registry, SUGGESTION_FALLBACKS.clone());
        cdp_metrics::register_metrics(registry);
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn record_analysis(outcome: &str, elapsed: Duration) {
    ANALYSES_TOTAL.with_label_values(&[outcome]).inc();
    ANALYSIS_DURATION.observe(elapsed.as_secs_f64());
}

pub fn record_suggestion_fallback() {
    SUGGESTION_FALLBACKS.inc();
}

/// Text exposition of the global registry.
pub fn render() -> Response {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
    }

    match (
        String::from_utf8(buffer),
        HeaderValue::from_str(encoder.format_type()),
    ) {
        (Ok(body), Ok(content_type)) => ([(CONTENT_TYPE, content_type)], body).into_response(),
        (Err(err), _) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
        (_, Err(err)) => {
            error!(?err, "failed to build content-type header");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_exposes_app_and_cdp_families() {
        register_metrics();
        register_metrics();
        record_analysis("success", Duration::from_millis(20));
        record_suggestion_fallback();
        let names: Vec<String> = global_registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|name| name == "accessly_analyses_total"));
        assert!(names
            .iter()
            .any(|name| name == "accessly_suggestion_fallbacks_total"));
    }
}
