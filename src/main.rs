//! vend402 gatekeeper HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that gates vending machine
//! dispenses behind verified Stellar payments.
//!
//! Endpoints:
//! - `GET /gatekeeper` – Endpoint description
//! - `POST /gatekeeper` – Issue payment challenges, verify payments
//! - `GET /gatekeeper/devices/{device_id}/dispense` – Long poll for dispense events
//! - `GET /healthz` – Liveness probe
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `HORIZON_URL` selects the ledger network
//! - `OTEL_*` variables enable tracing export

use axum::http::Method;
use axum::{Extension, Router};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use vend402::config::Config;
use vend402::device::StaticDeviceDirectory;
use vend402::gatekeeper_local::GatekeeperLocal;
use vend402::handlers::{self, DispenseWait};
use vend402::ledger::HorizonGateway;
use vend402::notifier::DispenseHub;
use vend402::sig_down::SigDown;
use vend402::store::MemoryStore;
use vend402::telemetry::Telemetry;

/// Initializes the vend402 gatekeeper server.
///
/// - Loads `.env` variables.
/// - Initializes tracing.
/// - Builds the gatekeeper from the configured device table and Horizon URL.
/// - Starts an Axum HTTP server with the vend402 protocol handlers.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::load()?;

    let devices = Arc::new(StaticDeviceDirectory::new(config.devices().clone()));
    let ledger = Arc::new(HorizonGateway::new(
        config.horizon_url().clone(),
        config.ledger_timeout(),
    )?);
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(DispenseHub::new());
    let gatekeeper = GatekeeperLocal::new(
        devices,
        ledger,
        store,
        hub.clone(),
        config.gatekeeper_settings(),
    );

    let http_endpoints = Router::new()
        .merge(handlers::routes())
        .layer(Extension(gatekeeper))
        .layer(Extension(hub))
        .layer(Extension(DispenseWait(config.long_poll_wait())))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;
    sig_down.recv().await;

    Ok(())
}
