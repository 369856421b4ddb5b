use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use prompt_to_video::app_state::AppState;
use prompt_to_video::config::AppConfig;
use prompt_to_video::flows::Backend;
use prompt_to_video::routes;
use prompt_to_video::services::openai::OpenAiVideosClient;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing prompt-to-video server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // The server still starts without a key so /health can report it
    let backend = match OpenAiVideosClient::from_config(&config) {
        Ok(client) => {
            tracing::info!(base_url = %config.base_url(), "Videos API client ready");
            Some(Backend::from_config(Arc::new(client), &config))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Videos API unavailable; remote actions will fail");
            None
        }
    };

    let bind_addr = config.bind_addr.clone();
    let idle_ttl = config.session_idle_ttl();
    let state = AppState::new(config, backend);

    // Expire idle sessions in the background
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(idle_ttl / 4);
        loop {
            tick.tick().await;
            let purged = sessions.purge_idle(idle_ttl);
            if purged > 0 {
                tracing::info!(purged = purged, "Purged idle sessions");
            }
        }
    });

    let app = Router::new()
        .merge(routes::router(state))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting prompt-to-video on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .expect("Server error");
}
