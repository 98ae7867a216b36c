//! # Camera Server
//!
//! Serves a local camera over HTTP until interrupted, then releases the camera.

use std::sync::Arc;

use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use cv_camserver::config::Config;
use cv_camserver::{http, StreamServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "cv_camserver=info".into()),
        )
        .init();

    let config = Config::parse();

    info!("Starting Camera Server...");
    info!("Camera index: {}", config.camera_index);

    let server = Arc::new(StreamServer::new(config.session_builder(), config.address()));

    // Open the camera now rather than on the first request
    server.session();

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("Server will run on http://{}", listener.local_addr()?);
    info!(
        "Access the camera feed at: http://<YOUR_IP_ADDRESS>:{}",
        config.port
    );

    let result = axum::serve(listener, http::create_router(Arc::clone(&server)))
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&server)))
        .await;

    // No-op after a signal, releases the camera if serving failed instead
    http::shutdown(server).await;

    result.map_err(|e| anyhow::anyhow!("Server error: {e}"))
}

/// Resolve on Ctrl-C or SIGTERM, ending live streams so open connections can complete.
async fn shutdown_signal(server: Arc<StreamServer>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }

    info!("Shutting down...");
    http::shutdown(server).await;
}
