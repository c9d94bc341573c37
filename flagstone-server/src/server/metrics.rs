use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// All application metrics
pub struct Metrics {
    // Evaluation
    pub eval_total: IntCounterVec,
    pub eval_duration: HistogramVec,
    pub eval_errors: IntCounterVec,

    // Definition mutations
    pub mutation_total: IntCounterVec,
    pub flags_total: IntGaugeVec,

    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        let eval_total = IntCounterVec::new(
            Opts::new("fs_eval_total", "Total number of flag evaluations"),
            &["tenant"],
        )
        .expect("failed to create eval_total metric");

        let eval_duration = HistogramVec::new(
            HistogramOpts::new("fs_eval_duration_seconds", "Duration of flag evaluations")
                .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01]),
            &["tenant"],
        )
        .expect("failed to create eval_duration metric");

        let eval_errors = IntCounterVec::new(
            Opts::new("fs_eval_errors_total", "Total number of failed evaluation requests"),
            &["tenant"],
        )
        .expect("failed to create eval_errors metric");

        let mutation_total = IntCounterVec::new(
            Opts::new("fs_mutation_total", "Total number of definition mutations"),
            &["op", "status"],
        )
        .expect("failed to create mutation_total metric");

        let flags_total = IntGaugeVec::new(
            Opts::new("fs_flags_total", "Number of flags per tenant"),
            &["tenant"],
        )
        .expect("failed to create flags_total metric");

        let http_requests_total = IntCounterVec::new(
            Opts::new("fs_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "fs_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )
        .expect("failed to create http_request_duration metric");

        registry.register(Box::new(eval_total.clone())).expect("register eval_total");
        registry.register(Box::new(eval_duration.clone())).expect("register eval_duration");
        registry.register(Box::new(eval_errors.clone())).expect("register eval_errors");
        registry.register(Box::new(mutation_total.clone())).expect("register mutation_total");
        registry.register(Box::new(flags_total.clone())).expect("register flags_total");
        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");
        registry.register(Box::new(http_request_duration.clone())).expect("register http_request_duration");

        Self {
            eval_total,
            eval_duration,
            eval_errors,
            mutation_total,
            flags_total,
            http_requests_total,
            http_request_duration,
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// Axum handler for GET /metrics — returns Prometheus text format
pub async fn handle_metrics() -> Response {
    // Ensure all metric collectors are registered on first call.
    let _ = metrics();
    let registry = REGISTRY.get_or_init(Registry::new);
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "encode error").into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Axum middleware that records HTTP request count and duration.
pub async fn track_metrics(request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let m = metrics();
    m.http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    m.http_request_duration
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}
