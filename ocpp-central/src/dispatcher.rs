//! Inbound action dispatcher
//!
//! Routes a charge point's CALL to its handler and produces exactly one
//! reply frame carrying the same message id. Handlers that need the backend
//! await it before replying; any failure becomes a CALLERROR.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};
use crate::ocpp::{
    from_payload, BootNotificationRequest, BootNotificationResponse, Call, CallError, CallResult,
    EmptyResponse, ErrorCode, Frame, HeartbeatResponse, IdTagInfo, IdTagInfoResponse,
    InboundAction, RegistrationStatus, StartTransactionResponse, StatusResponse,
};
use crate::registry::{ConnectionId, DeviceMetadata, Registry};

/// Status echoed for UnlockConnector when the payload carries none
const DEFAULT_UNLOCK_STATUS: &str = "Unlocked";
/// Status echoed for Reset when the payload carries none
const DEFAULT_RESET_STATUS: &str = "Accepted";
const ACCEPTED: &str = "Accepted";

/// Outcome of one handler before it is framed
enum Reply {
    Result(Value),
    Error(ErrorCode, String),
}

impl Reply {
    fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Reply::Result(value),
            Err(e) => Reply::Error(ErrorCode::InternalError, e.to_string()),
        }
    }

    fn backend_failure(error: BackendError) -> Self {
        Reply::Error(ErrorCode::InternalError, error.to_string())
    }
}

/// Routes inbound calls to their handlers
pub struct Dispatcher {
    registry: Arc<Registry>,
    backend: Arc<dyn Backend>,
    heartbeat_interval: i32,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, backend: Arc<dyn Backend>, heartbeat_interval: i32) -> Self {
        Self {
            registry,
            backend,
            heartbeat_interval,
        }
    }

    /// Handle one CALL received on link `connection_id` of `device_id` and
    /// build its reply
    pub async fn dispatch(&self, device_id: &str, connection_id: ConnectionId, call: Call) -> Frame {
        let Call {
            message_id,
            action,
            payload,
        } = call;

        let reply = match action.parse::<InboundAction>() {
            Ok(action) => {
                self.registry.touch(device_id, connection_id);
                debug!("{} from {} ({})", action, device_id, message_id);
                self.handle(device_id, connection_id, action, &payload).await
            }
            Err(e) => {
                warn!("Unsupported action from {}: {}", device_id, action);
                Reply::Error(ErrorCode::NotSupported, e.to_string())
            }
        };

        match reply {
            Reply::Result(payload) => Frame::CallResult(CallResult {
                message_id,
                payload,
            }),
            Reply::Error(code, description) => {
                Frame::CallError(CallError::new(message_id, code, description))
            }
        }
    }

    async fn handle(
        &self,
        device_id: &str,
        connection_id: ConnectionId,
        action: InboundAction,
        payload: &Value,
    ) -> Reply {
        match action {
            InboundAction::BootNotification => {
                self.boot_notification(device_id, connection_id, payload).await
            }
            InboundAction::Heartbeat => self.heartbeat(device_id).await,
            InboundAction::StatusNotification => {
                match self.backend.record_status(device_id, payload).await {
                    Ok(()) => Reply::ok(EmptyResponse {}),
                    Err(e) => self.failed(device_id, action, e),
                }
            }
            InboundAction::StartTransaction => self.start_transaction(device_id, payload).await,
            InboundAction::StopTransaction => {
                match self.backend.end_transaction(device_id, payload).await {
                    Ok(()) => {
                        info!("Transaction stopped on {}", device_id);
                        Reply::ok(IdTagInfoResponse {
                            id_tag_info: IdTagInfo::accepted(),
                        })
                    }
                    Err(e) => self.failed(device_id, action, e),
                }
            }
            InboundAction::MeterValues => {
                match self.backend.record_meter_values(device_id, payload).await {
                    Ok(()) => Reply::ok(EmptyResponse {}),
                    Err(e) => self.failed(device_id, action, e),
                }
            }
            InboundAction::UnlockConnector => Reply::ok(StatusResponse {
                status: echoed_status(payload, DEFAULT_UNLOCK_STATUS),
            }),
            InboundAction::Reset => Reply::ok(StatusResponse {
                status: echoed_status(payload, DEFAULT_RESET_STATUS),
            }),
            InboundAction::TriggerMessage => Reply::ok(StatusResponse {
                status: ACCEPTED.to_string(),
            }),
            InboundAction::FirmwareStatusNotification => Reply::ok(EmptyResponse {}),
            InboundAction::Authorize => Reply::ok(IdTagInfoResponse {
                id_tag_info: IdTagInfo::accepted(),
            }),
        }
    }

    async fn boot_notification(
        &self,
        device_id: &str,
        connection_id: ConnectionId,
        payload: &Value,
    ) -> Reply {
        let boot: BootNotificationRequest = from_payload(payload);
        info!(
            "BootNotification from {}: {} {}",
            device_id,
            boot.charge_point_vendor.as_deref().unwrap_or("?"),
            boot.charge_point_model.as_deref().unwrap_or("?")
        );

        self.registry.update_metadata(
            device_id,
            connection_id,
            DeviceMetadata {
                vendor: boot.charge_point_vendor,
                model: boot.charge_point_model,
                serial_number: boot.charge_point_serial_number,
                firmware_version: boot.firmware_version,
            },
        );

        if let Err(e) = self.backend.register_device(device_id, payload).await {
            return self.failed(device_id, InboundAction::BootNotification, e);
        }

        Reply::ok(BootNotificationResponse {
            current_time: Utc::now(),
            interval: self.heartbeat_interval,
            status: RegistrationStatus::Accepted,
        })
    }

    async fn heartbeat(&self, device_id: &str) -> Reply {
        let now = Utc::now();
        match self.backend.record_heartbeat(device_id, now).await {
            Ok(()) => Reply::ok(HeartbeatResponse { current_time: now }),
            Err(e) => self.failed(device_id, InboundAction::Heartbeat, e),
        }
    }

    async fn start_transaction(&self, device_id: &str, payload: &Value) -> Reply {
        match self.backend.begin_transaction(device_id, payload).await {
            Ok(transaction_id) => {
                info!("Transaction {} started on {}", transaction_id, device_id);
                Reply::ok(StartTransactionResponse {
                    transaction_id,
                    id_tag_info: IdTagInfo::accepted(),
                })
            }
            Err(BackendError::Rejected(reason)) => {
                warn!("Backend declined transaction on {}: {}", device_id, reason);
                Reply::Error(ErrorCode::Rejected, reason)
            }
            Err(e) => self.failed(device_id, InboundAction::StartTransaction, e),
        }
    }

    fn failed(&self, device_id: &str, action: InboundAction, error: BackendError) -> Reply {
        warn!("Backend failed {} for {}: {}", action, device_id, error);
        Reply::backend_failure(error)
    }
}

fn echoed_status(payload: &Value, default: &str) -> String {
    payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}
