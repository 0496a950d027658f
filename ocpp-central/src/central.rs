//! Central engine
//!
//! Owns the registry, the call table and the dispatcher. Transports open a
//! session per link, feed it raw messages and close it; administrative
//! callers issue outbound calls and broadcasts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, TransactionId};
use crate::channel::DeviceChannel;
use crate::config::CentralConfig;
use crate::dispatcher::Dispatcher;
use crate::error::OcppError;
use crate::ocpp::{
    CancelReservationRequest, Frame, OutboundAction, RemoteStartTransactionRequest,
    RemoteStopTransactionRequest, ReserveNowRequest, ResetRequest, ResetType,
    UnlockConnectorRequest,
};
use crate::pending::CallTable;
use crate::registry::{ConnectionId, DeviceInfo, Registry, RegistryEvent};

/// Prefix for ids handed to links that did not name themselves
pub const PLACEHOLDER_PREFIX: &str = "TEMP-";

/// One open link as seen by the engine
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub device_id: String,
    pub connection_id: ConnectionId,
    pub channel: DeviceChannel,
}

/// Per-device result of a broadcast
#[derive(Debug)]
pub struct BroadcastOutcome {
    pub device_id: String,
    pub result: Result<Value, OcppError>,
}

impl BroadcastOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

impl Serialize for BroadcastOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BroadcastOutcome", 3)?;
        state.serialize_field("cpId", &self.device_id)?;
        state.serialize_field("ok", &self.is_ok())?;
        match &self.result {
            Ok(result) => state.serialize_field("result", result)?,
            Err(e) => state.serialize_field("error", &e.to_string())?,
        }
        state.end()
    }
}

/// The central system engine
#[derive(Clone)]
pub struct CentralSystem {
    config: Arc<CentralConfig>,
    registry: Arc<Registry>,
    calls: Arc<CallTable>,
    dispatcher: Arc<Dispatcher>,
}

impl CentralSystem {
    /// Create the engine. Must be called from within a tokio runtime.
    pub fn new(config: CentralConfig, backend: Arc<dyn Backend>) -> Self {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone(), backend, config.heartbeat_interval);

        Self {
            config: Arc::new(config),
            registry,
            calls: CallTable::new(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn config(&self) -> &CentralConfig {
        &self.config
    }

    /// Register a new link. A link without an id gets a placeholder; a link
    /// replacing an earlier one for the same id asks the old one to close.
    pub fn open_connection(
        &self,
        device_id: Option<&str>,
        channel: DeviceChannel,
        remote_addr: impl Into<String>,
    ) -> DeviceSession {
        let device_id = match device_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => placeholder_id(),
        };

        let registration = self.registry.register(&device_id, channel.clone(), remote_addr);
        if let Some(old) = registration.replaced {
            old.channel.request_close();
        }

        DeviceSession {
            device_id,
            connection_id: registration.connection_id,
            channel,
        }
    }

    /// Handle one raw message received on `session`
    pub async fn on_message(&self, session: &DeviceSession, raw: &[u8]) {
        debug!("Received from {}: {}", session.device_id, String::from_utf8_lossy(raw));

        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to parse OCPP message from {}: {}", session.device_id, e);
                return;
            }
        };

        match frame {
            Frame::Call(call) => {
                let reply = self
                    .dispatcher
                    .dispatch(&session.device_id, session.connection_id, call)
                    .await;
                if session.channel.send(reply).await.is_err() {
                    debug!("Link to {} closed before reply could be queued", session.device_id);
                }
            }
            Frame::CallResult(result) => {
                if !self.calls.complete_result(&result.message_id, result.payload) {
                    debug!(
                        "Discarding CallResult {} from {}: no outstanding call",
                        result.message_id, session.device_id
                    );
                }
            }
            Frame::CallError(error) => {
                if !self.calls.complete_error(
                    &error.message_id,
                    error.error_code,
                    error.error_description,
                    error.error_details,
                ) {
                    debug!(
                        "Discarding CallError {} from {}: no outstanding call",
                        error.message_id, session.device_id
                    );
                }
            }
        }
    }

    /// Tear down a link: drop its registry record (unless already replaced)
    /// and fail the calls still waiting on it
    pub fn close_connection(&self, session: &DeviceSession) {
        self.registry
            .unregister_connection(&session.device_id, session.connection_id);

        let failed = self.calls.fail_connection(session.connection_id);
        if failed > 0 {
            info!(
                "Failed {} outstanding call(s) to {} on disconnect",
                failed, session.device_id
            );
        }
    }

    /// Issue a call to a connected charge point and wait for its reply
    pub async fn send_call(
        &self,
        device_id: &str,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, OcppError> {
        let record = self
            .registry
            .get(device_id)
            .ok_or_else(|| OcppError::NotConnected(device_id.to_string()))?;

        let handle = self
            .calls
            .send_call(
                &record.channel,
                device_id,
                record.connection_id,
                action,
                payload,
                timeout.unwrap_or(self.config.call_timeout),
            )
            .await?;

        handle.wait().await
    }

    async fn command(
        &self,
        device_id: &str,
        action: OutboundAction,
        request: impl Serialize,
    ) -> Result<Value, OcppError> {
        let payload = serde_json::to_value(request)?;
        self.send_call(device_id, &action.to_string(), payload, None).await
    }

    pub async fn remote_start(
        &self,
        device_id: &str,
        connector_id: Option<i32>,
        id_tag: &str,
    ) -> Result<Value, OcppError> {
        let request = RemoteStartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
        };
        self.command(device_id, OutboundAction::RemoteStartTransaction, request)
            .await
    }

    pub async fn remote_stop(
        &self,
        device_id: &str,
        transaction_id: TransactionId,
    ) -> Result<Value, OcppError> {
        let request = RemoteStopTransactionRequest { transaction_id };
        self.command(device_id, OutboundAction::RemoteStopTransaction, request)
            .await
    }

    pub async fn unlock_connector(
        &self,
        device_id: &str,
        connector_id: i32,
    ) -> Result<Value, OcppError> {
        let request = UnlockConnectorRequest { connector_id };
        self.command(device_id, OutboundAction::UnlockConnector, request)
            .await
    }

    pub async fn reset(&self, device_id: &str, reset_type: ResetType) -> Result<Value, OcppError> {
        let request = ResetRequest { reset_type };
        self.command(device_id, OutboundAction::Reset, request).await
    }

    pub async fn reserve_now(
        &self,
        device_id: &str,
        request: ReserveNowRequest,
    ) -> Result<Value, OcppError> {
        self.command(device_id, OutboundAction::ReserveNow, request)
            .await
    }

    pub async fn cancel_reservation(
        &self,
        device_id: &str,
        reservation_id: i32,
    ) -> Result<Value, OcppError> {
        let request = CancelReservationRequest { reservation_id };
        self.command(device_id, OutboundAction::CancelReservation, request)
            .await
    }

    /// Send the same call to every connected charge point.
    ///
    /// Calls run concurrently; one device failing or timing out does not
    /// affect the others. Outcomes are ordered by device id.
    pub async fn broadcast(&self, action: &str, payload: Value) -> Vec<BroadcastOutcome> {
        let device_ids = self.registry.device_ids();
        info!("Broadcasting {} to {} charge point(s)", action, device_ids.len());

        let calls = device_ids.into_iter().map(|device_id| {
            let payload = payload.clone();
            async move {
                let result = self.send_call(&device_id, action, payload, None).await;
                BroadcastOutcome { device_id, result }
            }
        });

        join_all(calls).await
    }

    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn list(&self) -> Vec<DeviceInfo> {
        self.registry.list()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceInfo> {
        self.registry.get(device_id).map(|record| record.info())
    }

    pub fn outstanding_calls(&self) -> usize {
        self.calls.outstanding()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }
}

fn placeholder_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}{}", PLACEHOLDER_PREFIX, &uuid[..8])
}
