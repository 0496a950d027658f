//! OCPP 1.6 message types
//!
//! The central system treats inbound payloads as opaque JSON. The request
//! structs below are read leniently (every field optional) where a handler or
//! the backend wants a specific field; the response structs are what the
//! central system itself sends back.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Actions
// ============================================================================

/// Actions a charge point may call on the central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundAction {
    BootNotification,
    Heartbeat,
    StatusNotification,
    StartTransaction,
    StopTransaction,
    UnlockConnector,
    Reset,
    MeterValues,
    TriggerMessage,
    FirmwareStatusNotification,
    Authorize,
}

#[derive(Debug, Error)]
#[error("Unknown action: {0}")]
pub struct UnknownAction(pub String);

impl InboundAction {
    pub fn as_str(self) -> &'static str {
        match self {
            InboundAction::BootNotification => "BootNotification",
            InboundAction::Heartbeat => "Heartbeat",
            InboundAction::StatusNotification => "StatusNotification",
            InboundAction::StartTransaction => "StartTransaction",
            InboundAction::StopTransaction => "StopTransaction",
            InboundAction::UnlockConnector => "UnlockConnector",
            InboundAction::Reset => "Reset",
            InboundAction::MeterValues => "MeterValues",
            InboundAction::TriggerMessage => "TriggerMessage",
            InboundAction::FirmwareStatusNotification => "FirmwareStatusNotification",
            InboundAction::Authorize => "Authorize",
        }
    }
}

impl std::fmt::Display for InboundAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InboundAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BootNotification" => Ok(InboundAction::BootNotification),
            "Heartbeat" => Ok(InboundAction::Heartbeat),
            "StatusNotification" => Ok(InboundAction::StatusNotification),
            "StartTransaction" => Ok(InboundAction::StartTransaction),
            "StopTransaction" => Ok(InboundAction::StopTransaction),
            "UnlockConnector" => Ok(InboundAction::UnlockConnector),
            "Reset" => Ok(InboundAction::Reset),
            "MeterValues" => Ok(InboundAction::MeterValues),
            "TriggerMessage" => Ok(InboundAction::TriggerMessage),
            "FirmwareStatusNotification" => Ok(InboundAction::FirmwareStatusNotification),
            "Authorize" => Ok(InboundAction::Authorize),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// Commands the central system sends to charge points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAction {
    RemoteStartTransaction,
    RemoteStopTransaction,
    UnlockConnector,
    Reset,
    ReserveNow,
    CancelReservation,
}

impl std::fmt::Display for OutboundAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status carried in IdTagInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Reset kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Hard,
    Soft,
}

// ============================================================================
// Inbound requests (read leniently)
// ============================================================================

/// BootNotification request (CP -> CS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootNotificationRequest {
    pub charge_point_vendor: Option<String>,
    pub charge_point_model: Option<String>,
    pub charge_point_serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

/// StatusNotification request (CP -> CS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusNotificationRequest {
    pub connector_id: Option<i32>,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub timestamp: Option<String>,
    pub info: Option<String>,
}

/// StartTransaction request (CP -> CS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartTransactionRequest {
    pub connector_id: Option<i32>,
    pub id_tag: Option<String>,
    pub meter_start: Option<i64>,
    pub timestamp: Option<String>,
    pub reservation_id: Option<i32>,
}

/// StopTransaction request (CP -> CS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopTransactionRequest {
    pub transaction_id: Option<i64>,
    pub meter_stop: Option<i64>,
    pub timestamp: Option<String>,
    pub reason: Option<String>,
}

/// MeterValues request (CP -> CS)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeterValuesRequest {
    pub connector_id: Option<i32>,
    pub transaction_id: Option<i64>,
    pub meter_value: Vec<MeterValue>,
}

/// One timestamped group of samples; the samples themselves stay opaque
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeterValue {
    pub timestamp: Option<String>,
    pub sampled_value: Vec<serde_json::Value>,
}

/// Read a typed view of an opaque payload, falling back to the default (all
/// fields absent) when the payload does not fit
pub fn from_payload<T: DeserializeOwned + Default>(payload: &serde_json::Value) -> T {
    serde_json::from_value(payload.clone()).unwrap_or_default()
}

// ============================================================================
// Responses sent by the central system
// ============================================================================

/// Authorization details attached to transaction and Authorize responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
}

impl IdTagInfo {
    pub fn accepted() -> Self {
        Self {
            status: AuthorizationStatus::Accepted,
        }
    }
}

/// BootNotification response (CS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub current_time: DateTime<Utc>,
    pub interval: i32,
    pub status: RegistrationStatus,
}

/// Heartbeat response (CS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// StartTransaction response (CS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub transaction_id: i64,
    pub id_tag_info: IdTagInfo,
}

/// StopTransaction and Authorize responses share this shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfoResponse {
    pub id_tag_info: IdTagInfo,
}

/// Acknowledgement carrying a status string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Acknowledgement with no fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyResponse {}

// ============================================================================
// Outbound requests (CS -> CP)
// ============================================================================

/// RemoteStartTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStartTransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<i32>,
    pub id_tag: String,
}

/// RemoteStopTransaction request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStopTransactionRequest {
    pub transaction_id: i64,
}

/// UnlockConnector request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockConnectorRequest {
    pub connector_id: i32,
}

/// Reset request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

/// ReserveNow request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveNowRequest {
    pub connector_id: i32,
    pub expiry_date: DateTime<Utc>,
    pub id_tag: String,
    pub reservation_id: i32,
}

/// CancelReservation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationRequest {
    pub reservation_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boot_notification_is_read_leniently() {
        let boot: BootNotificationRequest = from_payload(&json!({
            "chargePointVendor": "EK",
            "chargePointModel": "EK3",
        }));
        assert_eq!(boot.charge_point_vendor.as_deref(), Some("EK"));
        assert_eq!(boot.charge_point_serial_number, None);

        // wrong types fall back to "nothing known"
        let boot: BootNotificationRequest = from_payload(&json!({"chargePointVendor": 7}));
        assert!(boot.charge_point_vendor.is_none());
    }

    #[test]
    fn test_start_transaction_response_shape() {
        let resp = StartTransactionResponse {
            transaction_id: 42,
            id_tag_info: IdTagInfo::accepted(),
        };
        assert_eq!(
            serde_json::to_value(resp).unwrap(),
            json!({"transactionId": 42, "idTagInfo": {"status": "Accepted"}})
        );
    }

    #[test]
    fn test_reset_request_uses_type_key() {
        let req = ResetRequest {
            reset_type: ResetType::Soft,
        };
        assert_eq!(serde_json::to_value(req).unwrap(), json!({"type": "Soft"}));
    }

    #[test]
    fn test_action_names() {
        assert_eq!("MeterValues".parse::<InboundAction>().unwrap(), InboundAction::MeterValues);
        assert!("GetConfiguration".parse::<InboundAction>().is_err());
        assert_eq!(OutboundAction::RemoteStartTransaction.to_string(), "RemoteStartTransaction");
    }
}
