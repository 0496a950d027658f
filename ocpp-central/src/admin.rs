//! Administrative HTTP API
//!
//! - GET /                      - service banner
//! - GET /health                - liveness and connected count
//! - GET /chargepoints          - connected charge points
//! - GET /chargepoints/{id}     - one charge point
//! - POST /call                 - arbitrary call to one charge point
//! - POST /remoteStart          - RemoteStartTransaction
//! - POST /remoteStop           - RemoteStopTransaction
//! - POST /reset                - Reset
//! - POST /unlockConnector      - UnlockConnector
//! - POST /broadcast            - same call to every charge point

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;

use crate::backend::TransactionId;
use crate::central::{BroadcastOutcome, CentralSystem};
use crate::error::{OcppError, ServerError};
use crate::ocpp::ResetType;
use crate::registry::DeviceInfo;

const DEFAULT_CONNECTOR: i32 = 1;
const DEFAULT_ID_TAG: &str = "DEFAULT";

/// Build the admin router
pub fn router(system: CentralSystem) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/chargepoints", get(list_chargepoints))
        .route("/chargepoints/{cp_id}", get(get_chargepoint))
        .route("/call", post(call))
        .route("/remoteStart", post(remote_start))
        .route("/remoteStop", post(remote_stop))
        .route("/reset", post(reset))
        .route("/unlockConnector", post(unlock_connector))
        .route("/broadcast", post(broadcast))
        .with_state(system)
}

/// Serve the admin API on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, system: CentralSystem) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Admin API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(system)).await?;
    Ok(())
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallBody {
    pub cp_id: String,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartBody {
    pub cp_id: String,
    pub connector_id: Option<i32>,
    pub id_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopBody {
    pub cp_id: String,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    pub cp_id: String,
    #[serde(rename = "type")]
    pub reset_type: Option<ResetType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockConnectorBody {
    pub cp_id: String,
    pub connector_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastBody {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Reply from one charge point
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub cp_id: String,
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub sent: usize,
    pub results: Vec<BroadcastOutcome>,
}

/// Admin API errors
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Call(OcppError),
}

impl From<OcppError> for ApiError {
    fn from(e: OcppError) -> Self {
        ApiError::Call(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(cp_id) => (
                StatusCode::NOT_FOUND,
                format!("Charge point {} is not connected", cp_id),
            ),
            Self::Call(e) => {
                let status = match &e {
                    OcppError::NotConnected(_) => StatusCode::NOT_FOUND,
                    OcppError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    OcppError::Remote { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

// === Handlers ===

async fn banner(State(system): State<CentralSystem>) -> impl IntoResponse {
    Json(json!({
        "message": "OCPP central system running",
        "endpoints": {
            "health": "/health",
            "chargepoints": "/chargepoints",
            "chargepoint": "/chargepoints/{cpId}",
            "call": "/call (POST)",
            "remoteStart": "/remoteStart (POST)",
            "remoteStop": "/remoteStop (POST)",
            "reset": "/reset (POST)",
            "unlockConnector": "/unlockConnector (POST)",
            "broadcast": "/broadcast (POST)"
        },
        "websocket": format!("ws://{}/{{chargePointId}}", system.config().ws_addr)
    }))
}

async fn health(State(system): State<CentralSystem>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "connected": system.count() }))
}

async fn list_chargepoints(State(system): State<CentralSystem>) -> Json<Vec<DeviceInfo>> {
    Json(system.list())
}

async fn get_chargepoint(
    State(system): State<CentralSystem>,
    Path(cp_id): Path<String>,
) -> Result<Json<DeviceInfo>, ApiError> {
    system
        .device(&cp_id)
        .map(Json)
        .ok_or(ApiError::NotFound(cp_id))
}

async fn call(
    State(system): State<CentralSystem>,
    Json(body): Json<CallBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let timeout = body.timeout_ms.map(Duration::from_millis);
    let result = system
        .send_call(&body.cp_id, &body.action, body.payload, timeout)
        .await?;

    Ok(Json(CommandResponse {
        cp_id: body.cp_id,
        result,
    }))
}

async fn remote_start(
    State(system): State<CentralSystem>,
    Json(body): Json<RemoteStartBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let connector_id = body.connector_id.unwrap_or(DEFAULT_CONNECTOR);
    let id_tag = body.id_tag.as_deref().unwrap_or(DEFAULT_ID_TAG);
    let result = system
        .remote_start(&body.cp_id, Some(connector_id), id_tag)
        .await?;

    Ok(Json(CommandResponse {
        cp_id: body.cp_id,
        result,
    }))
}

async fn remote_stop(
    State(system): State<CentralSystem>,
    Json(body): Json<RemoteStopBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let result = system.remote_stop(&body.cp_id, body.transaction_id).await?;
    Ok(Json(CommandResponse {
        cp_id: body.cp_id,
        result,
    }))
}

async fn reset(
    State(system): State<CentralSystem>,
    Json(body): Json<ResetBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let reset_type = body.reset_type.unwrap_or(ResetType::Soft);
    let result = system.reset(&body.cp_id, reset_type).await?;
    Ok(Json(CommandResponse {
        cp_id: body.cp_id,
        result,
    }))
}

async fn unlock_connector(
    State(system): State<CentralSystem>,
    Json(body): Json<UnlockConnectorBody>,
) -> Result<Json<CommandResponse>, ApiError> {
    let connector_id = body.connector_id.unwrap_or(DEFAULT_CONNECTOR);
    let result = system.unlock_connector(&body.cp_id, connector_id).await?;
    Ok(Json(CommandResponse {
        cp_id: body.cp_id,
        result,
    }))
}

async fn broadcast(
    State(system): State<CentralSystem>,
    Json(body): Json<BroadcastBody>,
) -> Json<BroadcastResponse> {
    let results = system.broadcast(&body.action, body.payload).await;
    Json(BroadcastResponse {
        sent: results.len(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use crate::backend::MemoryBackend;
    use crate::central::DeviceSession;
    use crate::channel::{DeviceChannel, Outbound};
    use crate::config::CentralConfig;
    use crate::ocpp::{CallResult, Frame};

    fn system() -> CentralSystem {
        CentralSystem::new(CentralConfig::default(), Arc::new(MemoryBackend::new()))
    }

    /// Connect a fake charge point that answers every call with `reply`
    fn answering_device(system: &CentralSystem, cp_id: &str, reply: Value) -> DeviceSession {
        let (channel, mut rx) = DeviceChannel::new(8);
        let session = system.open_connection(Some(cp_id), channel, "127.0.0.1:1");

        let engine = system.clone();
        let link = session.clone();
        tokio::spawn(async move {
            while let Some(Outbound::Frame(Frame::Call(call))) = rx.recv().await {
                let frame = Frame::CallResult(CallResult::new(call.message_id, &reply).unwrap());
                engine.on_message(&link, frame.to_text().as_bytes()).await;
            }
        });
        session
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_counts_devices() {
        let system = system();
        answering_device(&system, "CP1", json!({}));

        let (status, body) = send(router(system), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "connected": 1}));
    }

    #[tokio::test]
    async fn test_chargepoint_lookup() {
        let system = system();
        answering_device(&system, "CP1", json!({}));

        let (status, body) = send(router(system.clone()), get_request("/chargepoints/CP1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpId"], "CP1");
        assert_eq!(body["vendor"], "unknown");
        assert_eq!(body["connected"], true);

        let (status, _) = send(router(system.clone()), get_request("/chargepoints/CP9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, list) = send(router(system), get_request("/chargepoints")).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_start_defaults() {
        let system = system();
        let (channel, mut rx) = DeviceChannel::new(8);
        let session = system.open_connection(Some("CP1"), channel, "127.0.0.1:1");

        let engine = system.clone();
        let device = tokio::spawn(async move {
            let Some(Outbound::Frame(Frame::Call(call))) = rx.recv().await else {
                panic!("Expected call");
            };
            let payload = call.payload.clone();
            let reply = Frame::CallResult(CallResult::new(call.message_id, json!({"status": "Accepted"})).unwrap());
            engine.on_message(&session, reply.to_text().as_bytes()).await;
            payload
        });

        let (status, body) = send(
            router(system),
            post_request("/remoteStart", json!({"cpId": "CP1"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"cpId": "CP1", "result": {"status": "Accepted"}}));
        assert_eq!(
            device.await.unwrap(),
            json!({"connectorId": 1, "idTag": "DEFAULT"})
        );
    }

    #[tokio::test]
    async fn test_call_to_absent_device_is_404() {
        let (status, body) = send(
            router(system()),
            post_request("/call", json!({"cpId": "CP404", "action": "Reset", "payload": {}})),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("CP404"));
    }

    #[tokio::test]
    async fn test_call_timeout_is_504() {
        let system = system();
        let (channel, _rx) = DeviceChannel::new(8);
        system.open_connection(Some("CP1"), channel, "127.0.0.1:1");

        let (status, _) = send(
            router(system),
            post_request(
                "/call",
                json!({"cpId": "CP1", "action": "Reset", "payload": {}, "timeoutMs": 20}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_broadcast_reports_each_device() {
        let system = system();
        answering_device(&system, "CP1", json!({"status": "Accepted"}));
        answering_device(&system, "CP2", json!({"status": "Accepted"}));

        let (status, body) = send(
            router(system),
            post_request("/broadcast", json!({"action": "TriggerMessage", "payload": {}})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sent"], 2);
        assert_eq!(body["results"][0]["cpId"], "CP1");
        assert_eq!(body["results"][1]["ok"], true);
    }
}
