//! Backend collaborator
//!
//! The system of record for charge point metadata, transactions and
//! telemetry. The dispatcher awaits every backend call before replying to
//! the charge point; a failure turns into a CALLERROR.
//!
//! - `http`: client for the charge point management REST backend
//! - `memory`: in-process store used when no backend URL is configured

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Transaction id handed out by the backend
pub type TransactionId = i64;

/// Errors from backend calls
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned HTTP {0}")]
    Status(u16),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// The backend answered but declined the operation
    #[error("Backend rejected the request: {0}")]
    Rejected(String),
}

/// Operations the central system needs from its backend
#[async_trait]
pub trait Backend: Send + Sync {
    async fn register_device(&self, device_id: &str, boot: &Value) -> Result<(), BackendError>;

    async fn record_heartbeat(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    async fn record_status(&self, device_id: &str, status: &Value) -> Result<(), BackendError>;

    /// Allocate a transaction id and persist the transaction start
    async fn begin_transaction(
        &self,
        device_id: &str,
        start: &Value,
    ) -> Result<TransactionId, BackendError>;

    async fn end_transaction(&self, device_id: &str, stop: &Value) -> Result<(), BackendError>;

    async fn record_meter_values(&self, device_id: &str, meter: &Value) -> Result<(), BackendError>;
}
