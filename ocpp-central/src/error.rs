//! Call-level errors surfaced to whoever issued an outbound call

use serde_json::Value;
use thiserror::Error;

use crate::ocpp::ErrorCode;

/// Errors from calls the central system makes to charge points
#[derive(Debug, Error)]
pub enum OcppError {
    #[error("Charge point {0} is not connected")]
    NotConnected(String),

    #[error("Timeout waiting for {action} response from {device_id}")]
    Timeout { device_id: String, action: String },

    #[error("OCPP error from charge point: {code} - {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the WebSocket listener and admin server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
