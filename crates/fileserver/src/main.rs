use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::trace::TraceLayer;

mod layout;
mod routes;

use dispatch_common::config::SystemConfig;

/// Shared application state for the file-transfer HTTP surface.
pub struct AppState {
    pub tasks_dir: String,
    pub results_dir: String,
    pub metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("dispatch fileserver starting");

    let config_path = std::env::var("DISPATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dispatch.toml"));

    let content = std::fs::read_to_string(&config_path).unwrap_or_else(|e| {
        tracing::error!(path = %config_path.display(), error = %e, "failed to read configuration — refusing to start");
        std::process::exit(1);
    });

    let system_config: SystemConfig = toml::from_str(&content).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to parse configuration — refusing to start");
        std::process::exit(1);
    });

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let state = Arc::new(AppState {
        tasks_dir: system_config.paths.tasks_dir.clone(),
        results_dir: system_config.paths.results_dir.clone(),
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/download/{task_id}/{filename}",
            get(routes::download_handler),
        )
        .route(
            "/upload/result/{task_id}/{filename}",
            post(routes::upload_result_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_addr = format!(
        "{}:{}",
        system_config.server.bind_addr, system_config.server.file_port
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!(addr = %bind_addr, "dispatch fileserver listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> String {
    state.metrics_handle.render()
}
