//! HTTP endpoints of the vend402 **gatekeeper**.
//!
//! The protocol surface is a single action-discriminated endpoint,
//! `POST /gatekeeper`, that issues payment challenges (as `402 Payment
//! Required` bodies) and verifies submitted payments. Next to it sit a
//! discovery endpoint, a health probe, and a long-poll endpoint vending
//! machines use to wait for dispense events.
//!
//! All payloads follow the wire types in [`crate::types`] and are compatible
//! with the vend402 TypeScript client.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router, response::IntoResponse};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::instrument;

use crate::device::StaticDeviceDirectory;
use crate::gatekeeper::Gatekeeper;
use crate::gatekeeper_local::{GatekeeperLocal, IssueError, VerifyError};
use crate::ledger::HorizonGateway;
use crate::notifier::DispenseHub;
use crate::store::MemoryStore;
use crate::types::{DeviceId, ErrorResponse, GatekeeperRequest, VerifyErrorCode, VerifyFailure};

/// The gatekeeper as wired in `main`: static device table, Horizon ledger
/// gateway, in-memory stores, in-process dispense hub.
pub type AppGatekeeper =
    GatekeeperLocal<StaticDeviceDirectory, HorizonGateway, MemoryStore, DispenseHub>;

/// How long `GET .../dispense` holds the connection open waiting for an event.
#[derive(Debug, Clone, Copy)]
pub struct DispenseWait(pub Duration);

/// All gatekeeper routes. Extensions for [`AppGatekeeper`],
/// `Arc<DispenseHub>`, and [`DispenseWait`] are layered on by the caller.
pub fn routes() -> Router {
    Router::new()
        .route("/gatekeeper", get(get_gatekeeper_info).post(post_gatekeeper))
        .route("/gatekeeper/devices/{device_id}/dispense", get(get_dispense))
        .route("/healthz", get(get_healthz))
}

/// `GET /gatekeeper`: Returns a machine-readable description of the endpoint.
///
/// Optional metadata, primarily useful for discoverability and debugging.
#[instrument(skip_all)]
pub async fn get_gatekeeper_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/gatekeeper",
        "description": "POST vend402 payment actions",
        "actions": {
            "getChallenge": { "deviceId": "string" },
            "verifyPayment": {
                "deviceId": "string",
                "txHash": "string",
                "challengeId": "string (optional)",
            },
        }
    }))
}

/// `GET /healthz`: Liveness probe.
pub async fn get_healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `POST /gatekeeper`: The vend402 protocol endpoint.
///
/// `getChallenge` responds `402 Payment Required` with a [`crate::types::Challenge`]
/// body. `verifyPayment` responds `200` with a [`crate::types::VerifySuccess`] or
/// `400` with a [`VerifyFailure`] carrying a stable error code. Unknown
/// machines are `404`; malformed bodies and unknown actions are `400` with
/// an `{error}` body; infrastructure failures are `500` with
/// `UNKNOWN_ERROR`.
#[instrument(skip_all)]
pub async fn post_gatekeeper(
    Extension(gatekeeper): Extension<AppGatekeeper>,
    body: Result<Json<GatekeeperRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: rejection.body_text(),
                }),
            )
                .into_response();
        }
    };
    match body {
        GatekeeperRequest::GetChallenge { device_id } => {
            match gatekeeper.issue_challenge(&device_id).await {
                Ok(challenge) => {
                    (StatusCode::PAYMENT_REQUIRED, Json(challenge)).into_response()
                }
                Err(IssueError::DeviceNotFound) => (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse {
                        error: "Machine not found".to_string(),
                    }),
                )
                    .into_response(),
                Err(error) => {
                    tracing::error!(error = ?error, "Challenge issuance failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse {
                            error: "Failed to generate challenge".to_string(),
                        }),
                    )
                        .into_response()
                }
            }
        }
        GatekeeperRequest::VerifyPayment {
            device_id,
            tx_hash,
            challenge_id,
        } => {
            match gatekeeper
                .verify_payment(&device_id, &tx_hash, challenge_id.as_ref())
                .await
            {
                Ok(success) => (StatusCode::OK, Json(success)).into_response(),
                Err(VerifyError::DeviceNotFound) => (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse {
                        error: "Machine not found".to_string(),
                    }),
                )
                    .into_response(),
                Err(error) => {
                    tracing::warn!(
                        error = ?error,
                        device_id = %device_id.0,
                        "Payment verification failed"
                    );
                    let code = error.code();
                    let status = if code == VerifyErrorCode::UnknownError {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::BAD_REQUEST
                    };
                    (
                        status,
                        Json(VerifyFailure {
                            success: false,
                            code,
                            message: error.to_string(),
                        }),
                    )
                        .into_response()
                }
            }
        }
    }
}

/// `GET /gatekeeper/devices/{device_id}/dispense`: Long poll for the next
/// dispense event on a machine.
///
/// Responds `200` with a [`crate::types::DispenseEvent`] as soon as one
/// arrives, or `204 No Content` once the wait window elapses. Machines are
/// expected to reconnect immediately in either case.
#[instrument(skip_all)]
pub async fn get_dispense(
    Path(device_id): Path<String>,
    Extension(hub): Extension<Arc<DispenseHub>>,
    Extension(DispenseWait(wait)): Extension<DispenseWait>,
) -> impl IntoResponse {
    let mut receiver = hub.subscribe(&DeviceId(device_id));
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv()).await {
            Ok(Ok(event)) => return (StatusCode::OK, Json(event)).into_response(),
            Ok(Err(RecvError::Lagged(skipped))) => {
                // A slow poller missed events; keep waiting for the next one.
                tracing::debug!(skipped, "Dispense listener lagged");
            }
            Ok(Err(RecvError::Closed)) | Err(_) => {
                return StatusCode::NO_CONTENT.into_response();
            }
        }
    }
}
