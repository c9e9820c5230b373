use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::watch;

use dispatch_server::channel::tls;
use dispatch_server::config;
use dispatch_server::dispatcher;
use dispatch_server::reclaimer;
use dispatch_server::store::StoreClient;

struct MetricsState {
    handle: PrometheusHandle,
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

    tracing::info!("dispatch server starting");

    let config_path = std::env::var("DISPATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dispatch.toml"));

    let system_config = match config::load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");

    let store = match StoreClient::connect(&system_config.store.database_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open store — refusing to start");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.migrate().await {
        tracing::error!(error = %e, "failed to run store migrations");
        std::process::exit(1);
    }

    let store = Arc::new(store);

    let tls_config = match tls::load_or_create_server_config(Path::new(&system_config.server.cert_dir)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to set up TLS — refusing to start");
            std::process::exit(1);
        }
    };
    let acceptor = tls::acceptor(tls_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reclaimer background task.
    {
        let store = Arc::clone(&store);
        let lease = system_config.lease.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            reclaimer::run(store, lease, shutdown_rx).await;
        });
    }

    // Command channel listener.
    {
        let store = Arc::clone(&store);
        let lease = system_config.lease.clone();
        let idle_timeout = Duration::from_secs(system_config.server.idle_read_timeout_secs);
        let bind_addr = format!(
            "{}:{}",
            system_config.server.bind_addr, system_config.server.command_port
        );

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(error = %e, "failed to bind command channel listener");
                    std::process::exit(1);
                }
            };

            tracing::info!(addr = %bind_addr, "command channel listening");

            loop {
                let (tcp_stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let store = Arc::clone(&store);
                let lease = lease.clone();

                tokio::spawn(async move {
                    match acceptor.accept(tcp_stream).await {
                        Ok(tls_stream) => {
                            dispatcher::handle_connection(tls_stream, peer, store, lease, idle_timeout)
                                .await;
                        }
                        Err(e) => {
                            tracing::warn!(%peer, error = %e, "TLS handshake failed");
                        }
                    }
                });
            }
        });
    }

    // File-transfer HTTP surface lives in the sibling `dispatch-fileserver`
    // binary; this process exposes only health/metrics for itself.
    let metrics_state = Arc::new(MetricsState {
        handle: metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_state);

    let admin_bind = format!(
        "{}:{}",
        system_config.server.bind_addr, system_config.server.metrics_port
    );
    let listener = tokio::net::TcpListener::bind(&admin_bind)
        .await
        .expect("failed to bind admin/metrics listener");

    tracing::info!(addr = %admin_bind, "admin metrics endpoint listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> String {
    state.handle.render()
}
