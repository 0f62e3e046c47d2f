mod auth;
mod catalog;
mod cli;
mod config;
mod control;
mod error;
mod handlers;
mod liveness;
mod protocol;
mod registry;
mod relay;
mod secrets;
mod spaces;
mod telemetry;
#[cfg(test)]
mod testutil;
mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::SpaceCatalog;
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::control::{ControlCoordinator, PresenceGate};
use crate::registry::ConnectionRegistry;
use crate::relay::SignalingRelay;
use crate::secrets::CredentialStore;
use crate::spaces::SessionManager;
use crate::telemetry::Telemetry;
use crate::websocket::{websocket_handler, HubState};

#[tokio::main]
async fn main() {
    let telemetry = match Telemetry::init() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to initialise telemetry: {e:#}");
            std::process::exit(1);
        }
    };

    let cli = Cli::parse();

    // Check if running as probe client
    if let Some(Commands::Probe {
        url,
        space,
        robot_id,
        secret_file,
        request_control,
        watch_secs,
    }) = cli.command
    {
        if let Err(e) =
            cli::run_probe(url, space, robot_id, secret_file, request_control, watch_secs).await
        {
            error!("probe client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("starting Portal Hub on port {}", config.port);

    let catalog = match SpaceCatalog::load(&config.catalog_path) {
        Ok(c) => c,
        Err(e) => {
            error!(
                "failed to load space catalog from {}: {}",
                config.catalog_path.display(),
                e
            );
            std::process::exit(1);
        }
    };
    info!(
        "loaded {} spaces from {}",
        catalog.len(),
        config.catalog_path.display()
    );

    let credentials = match CredentialStore::load(&config.secrets_dir) {
        Ok(c) => c,
        Err(e) => {
            error!(
                "failed to load robot secrets from {}: {}",
                config.secrets_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let catalog = Arc::new(catalog);
    let credentials = Arc::new(credentials);
    let sessions = Arc::new(SessionManager::new(Arc::clone(&registry), Arc::clone(&catalog)));
    let control = Arc::new(ControlCoordinator::new(
        Arc::clone(&registry),
        Arc::clone(&sessions),
        Arc::new(PresenceGate),
        config.gate_timeout(),
    ));
    let relay = SignalingRelay::new(Arc::clone(&registry), Arc::clone(&sessions));

    liveness::spawn_monitor(
        Arc::clone(&registry),
        Arc::clone(&sessions),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
    );

    let state = HubState {
        registry,
        catalog,
        credentials,
        sessions,
        control,
        relay,
        metrics: telemetry.metrics_handle(),
    };

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/spaces", get(handlers::list_spaces))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    info!("Portal Hub listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("failed to start server");
}
