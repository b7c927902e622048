use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::METRICS_PORT;

/// Process-wide metrics registry, created once at startup and injected into
/// every component that records.
pub struct Metrics {
    registry: Registry,
    pub tracked_deaths: IntCounter,
    pub tracked_level_ups: IntCounter,
    pub notifications_sent: IntCounterVec,
    pub upstream_requests: IntCounterVec,
    pub scrape_requests: IntCounterVec,
    pub upstream_request_duration: HistogramVec,
    pub scrape_request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tracked_deaths = IntCounter::new(
            "deathwatch_tracked_deaths_total",
            "Death events that passed deduplication and the freshness window.",
        )?;
        let tracked_level_ups = IntCounter::new(
            "deathwatch_tracked_level_ups_total",
            "Level-up events detected against stored baselines.",
        )?;
        let notifications_sent = IntCounterVec::new(
            Opts::new(
                "deathwatch_notifications_sent_total",
                "Notification attempts handed to the chat platform.",
            ),
            &["kind", "status"],
        )?;
        let upstream_requests = IntCounterVec::new(
            Opts::new(
                "deathwatch_upstream_requests_total",
                "JSON API requests by endpoint and response status.",
            ),
            &["endpoint", "status"],
        )?;
        let scrape_requests = IntCounterVec::new(
            Opts::new(
                "deathwatch_scrape_requests_total",
                "World-page scrape requests by response status.",
            ),
            &["status"],
        )?;
        let upstream_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "deathwatch_upstream_request_duration_seconds",
                "JSON API request duration by endpoint and response status.",
            ),
            &["endpoint", "status"],
        )?;
        let scrape_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "deathwatch_scrape_request_duration_seconds",
                "World-page scrape request duration by response status.",
            ),
            &["status"],
        )?;

        registry.register(Box::new(tracked_deaths.clone()))?;
        registry.register(Box::new(tracked_level_ups.clone()))?;
        registry.register(Box::new(notifications_sent.clone()))?;
        registry.register(Box::new(upstream_requests.clone()))?;
        registry.register(Box::new(scrape_requests.clone()))?;
        registry.register(Box::new(upstream_request_duration.clone()))?;
        registry.register(Box::new(scrape_request_duration.clone()))?;

        Ok(Self {
            registry,
            tracked_deaths,
            tracked_level_ups,
            notifications_sent,
            upstream_requests,
            scrape_requests,
            upstream_request_duration,
            scrape_request_duration,
        })
    }

    pub fn record_upstream_request(&self, endpoint: &str, status: &str, elapsed: Duration) {
        self.upstream_requests
            .with_label_values(&[endpoint, status])
            .inc();
        self.upstream_request_duration
            .with_label_values(&[endpoint, status])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_scrape_request(&self, status: &str, elapsed: Duration) {
        self.scrape_requests.with_label_values(&[status]).inc();
        self.scrape_request_duration
            .with_label_values(&[status])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_notification(&self, kind: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.notifications_sent
            .with_label_values(&[kind, status])
            .inc();
    }

    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!("failed to encode metrics exposition: {e}");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Serve the text exposition on `:2112/metrics` until cancelled.
pub async fn serve(metrics: Arc<Metrics>, cancel: CancellationToken) {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{METRICS_PORT}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind metrics listener");
            return;
        }
    };
    info!("metrics exporter listening on {addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
    {
        error!(error = %e, "metrics exporter failed");
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}
