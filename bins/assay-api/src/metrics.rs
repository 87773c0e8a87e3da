// Prometheus metrics for the Assay API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Archives stored through the upload endpoint
    pub static ref UPLOADS: IntCounter = IntCounter::new(
        "assay_uploads_total",
        "Total number of submission archives stored"
    )
    .expect("metric can be created");

    // Jobs accepted (counter with assignment label)
    pub static ref JOBS_SUBMITTED: CounterVec = CounterVec::new(
        Opts::new("assay_jobs_submitted_total", "Total number of grading jobs accepted"),
        &["assignment"]
    )
    .expect("metric can be created");

    // Submissions rejected before a job was created
    pub static ref JOBS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("assay_jobs_rejected_total", "Total grading requests rejected"),
        &["reason"]
    )
    .expect("metric can be created");

    // Jobs finished (counter with assignment and outcome labels)
    pub static ref JOBS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("assay_jobs_completed_total", "Total number of grading jobs finished"),
        &["assignment", "outcome"]
    )
    .expect("metric can be created");

    // Wall-clock job duration, admission wait excluded
    pub static ref JOB_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "assay_job_duration_seconds",
            "Grading job duration in seconds"
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]),
        &["outcome"]
    )
    .expect("metric can be created");

    // Connected WebSocket sessions
    pub static ref LIVE_SESSIONS: IntGauge = IntGauge::new(
        "assay_live_sessions",
        "Currently connected client sessions"
    )
    .expect("metric can be created");
}

/// Initialize metrics registry
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(UPLOADS.clone()))?;
    REGISTRY.register(Box::new(JOBS_SUBMITTED.clone()))?;
    REGISTRY.register(Box::new(JOBS_REJECTED.clone()))?;
    REGISTRY.register(Box::new(JOBS_COMPLETED.clone()))?;
    REGISTRY.register(Box::new(JOB_DURATION.clone()))?;
    REGISTRY.register(Box::new(LIVE_SESSIONS.clone()))?;
    Ok(())
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_upload() {
    UPLOADS.inc();
}

pub fn record_job_submitted(assignment: &str) {
    JOBS_SUBMITTED.with_label_values(&[assignment]).inc();
}

pub fn record_job_rejected(reason: &str) {
    JOBS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_job_completed(assignment: &str, outcome: &str, duration_secs: f64) {
    JOBS_COMPLETED.with_label_values(&[assignment, outcome]).inc();
    JOB_DURATION.with_label_values(&[outcome]).observe(duration_secs);
}

pub fn session_opened() {
    LIVE_SESSIONS.inc();
}

pub fn session_closed() {
    LIVE_SESSIONS.dec();
}
