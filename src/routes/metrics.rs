use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition of the job counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service records.
pub fn describe() {
    metrics::describe_counter!("video_jobs_submitted_total", "Video jobs accepted by the API");
    metrics::describe_counter!("video_jobs_completed_total", "Video jobs that finished rendering");
    metrics::describe_counter!("video_jobs_failed_total", "Video jobs that failed or were lost");
    metrics::describe_counter!(
        "video_poll_timeouts_total",
        "Polls that ran out of local budget"
    );
    metrics::describe_counter!(
        "video_poll_cancelled_total",
        "Polls stopped by the user or cancelled remotely"
    );
    metrics::describe_histogram!(
        "video_render_seconds",
        "Time from first status query to a finished render"
    );
    metrics::describe_gauge!("video_sessions_active", "Live front-end sessions");
}
