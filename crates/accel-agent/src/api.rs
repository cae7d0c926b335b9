//! HTTP surface for the orchestrator.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/claims/prepare` | Prepare a batch of claims |
//! | POST | `/api/v1/claims/unprepare` | Release a batch of claim UIDs |
//! | GET | `/api/v1/resources` | Current device pool |
//! | POST | `/api/v1/rescan` | Rediscover hardware |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use accel_core::{Claim, NamingStyle, PreparedDevice, TelemetrySnapshot};
use accel_health::TelemetrySource;
use accel_node::NodeState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiState {
    pub node: NodeState,
    pub sysfs_root: PathBuf,
    pub naming: NamingStyle,
    /// Source of GPU memory details on rescan.
    pub telemetry: Option<Arc<dyn TelemetrySource>>,
}

/// Telemetry details for discovery, empty without a source or on error.
pub fn telemetry_snapshot(source: Option<&dyn TelemetrySource>) -> TelemetrySnapshot {
    let Some(source) = source else {
        return TelemetrySnapshot::new();
    };
    source.discover().unwrap_or_else(|e| {
        warn!(error = %e, "telemetry unavailable, discovering without it");
        TelemetrySnapshot::new()
    })
}

pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/claims/prepare", post(prepare_claims))
        .route("/claims/unprepare", post(unprepare_claims))
        .route("/resources", get(list_resources))
        .route("/rescan", post(rescan))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Per-claim result; exactly one of the fields is set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<PreparedDevice>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprepareOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/v1/claims/prepare
async fn prepare_claims(State(state): State<ApiState>, Json(claims): Json<Vec<Claim>>) -> impl IntoResponse {
    let outcomes: BTreeMap<String, PrepareOutcome> = state
        .node
        .prepare_claims(&claims)
        .await
        .into_iter()
        .map(|(uid, result)| {
            let outcome = match result {
                Ok(prepared) => PrepareOutcome {
                    devices: Some(prepared.devices),
                    error: None,
                },
                Err(e) => PrepareOutcome {
                    devices: None,
                    error: Some(e.to_string()),
                },
            };
            (uid, outcome)
        })
        .collect();
    ApiResponse::ok(outcomes)
}

/// POST /api/v1/claims/unprepare
async fn unprepare_claims(State(state): State<ApiState>, Json(uids): Json<Vec<String>>) -> impl IntoResponse {
    let outcomes: BTreeMap<String, UnprepareOutcome> = state
        .node
        .unprepare_claims(&uids)
        .await
        .into_iter()
        .map(|(uid, result)| {
            let outcome = match result {
                Ok(changed) => UnprepareOutcome {
                    changed: Some(changed),
                    error: None,
                },
                Err(e) => UnprepareOutcome {
                    changed: None,
                    error: Some(e.to_string()),
                },
            };
            (uid, outcome)
        })
        .collect();
    ApiResponse::ok(outcomes)
}

/// GET /api/v1/resources
async fn list_resources(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.node.resources().await)
}

/// POST /api/v1/rescan
async fn rescan(State(state): State<ApiState>) -> impl IntoResponse {
    let family = state.node.family();
    let sysfs_root = state.sysfs_root.clone();
    let naming = state.naming;
    let telemetry = state.telemetry.clone();
    let scan = tokio::task::spawn_blocking(move || {
        let snapshot = telemetry_snapshot(telemetry.as_deref());
        accel_discovery::discover(family, &sysfs_root, naming, &snapshot)
    })
    .await;
    let inventory = match scan {
        Ok(inventory) => inventory,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
        }
    };

    match state.node.rescan(inventory).await {
        Ok(report) => {
            info!(added = report.added.len(), removed = report.removed.len(), "rescan via API");
            ApiResponse::ok(serde_json::json!({
                "added": report.added,
                "removed": report.removed,
                "updated": report.updated,
            }))
            .into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
