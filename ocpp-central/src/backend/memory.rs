//! In-process backend
//!
//! Keeps devices, transactions and telemetry in memory. Used when no
//! backend URL is configured and by tests that inspect what the dispatcher
//! recorded. Only the latest status per connector, open transactions and
//! bounded histories of stopped transactions and meter values are kept.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{Backend, BackendError, TransactionId};
use crate::ocpp::{
    from_payload, MeterValue, MeterValuesRequest, StatusNotificationRequest,
    StopTransactionRequest,
};

/// Meter samples retained across all devices
pub const METER_HISTORY: usize = 1024;
/// Stopped transactions retained after StopTransaction
pub const STOPPED_HISTORY: usize = 256;

/// Transaction opened by StartTransaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub device_id: String,
    pub start: Value,
    pub stop: Option<Value>,
}

#[derive(Debug)]
struct MemoryState {
    devices: HashMap<String, Value>,
    heartbeats: HashMap<String, DateTime<Utc>>,
    /// Latest status keyed by (device, connectorId)
    statuses: HashMap<(String, Option<i32>), Value>,
    /// Open transactions only
    transactions: HashMap<TransactionId, TransactionRecord>,
    stopped: VecDeque<TransactionRecord>,
    meter_values: VecDeque<(String, MeterValue)>,
    next_transaction_id: TransactionId,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
            heartbeats: HashMap::new(),
            statuses: HashMap::new(),
            transactions: HashMap::new(),
            stopped: VecDeque::new(),
            meter_values: VecDeque::new(),
            next_transaction_id: 1,
        }
    }
}

/// Backend that keeps everything in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boot payload last registered for `device_id`
    pub fn device(&self, device_id: &str) -> Option<Value> {
        self.state.lock().devices.get(device_id).cloned()
    }

    pub fn last_heartbeat(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().heartbeats.get(device_id).copied()
    }

    /// Latest status of every connector, ordered by device then connector
    pub fn statuses(&self) -> Vec<(String, Value)> {
        let state = self.state.lock();
        let mut latest: Vec<_> = state.statuses.iter().collect();
        latest.sort_by(|a, b| a.0.cmp(b.0));
        latest
            .into_iter()
            .map(|((device_id, _), status)| (device_id.clone(), status.clone()))
            .collect()
    }

    /// Open transaction, or one of the recently stopped ones
    pub fn transaction(&self, transaction_id: TransactionId) -> Option<TransactionRecord> {
        let state = self.state.lock();
        state
            .transactions
            .get(&transaction_id)
            .or_else(|| {
                state
                    .stopped
                    .iter()
                    .find(|tx| tx.transaction_id == transaction_id)
            })
            .cloned()
    }

    /// Transactions not yet stopped
    pub fn open_transactions(&self) -> Vec<TransactionRecord> {
        let mut open: Vec<TransactionRecord> =
            self.state.lock().transactions.values().cloned().collect();
        open.sort_by_key(|tx| tx.transaction_id);
        open
    }

    /// Most recent meter samples, oldest first
    pub fn meter_values(&self) -> Vec<(String, MeterValue)> {
        self.state.lock().meter_values.iter().cloned().collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn register_device(&self, device_id: &str, boot: &Value) -> Result<(), BackendError> {
        self.state
            .lock()
            .devices
            .insert(device_id.to_string(), boot.clone());
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        self.state
            .lock()
            .heartbeats
            .insert(device_id.to_string(), timestamp);
        Ok(())
    }

    async fn record_status(&self, device_id: &str, status: &Value) -> Result<(), BackendError> {
        let req: StatusNotificationRequest = from_payload(status);
        self.state
            .lock()
            .statuses
            .insert((device_id.to_string(), req.connector_id), status.clone());
        Ok(())
    }

    async fn begin_transaction(
        &self,
        device_id: &str,
        start: &Value,
    ) -> Result<TransactionId, BackendError> {
        let mut state = self.state.lock();
        let transaction_id = state.next_transaction_id;
        state.next_transaction_id += 1;

        state.transactions.insert(
            transaction_id,
            TransactionRecord {
                transaction_id,
                device_id: device_id.to_string(),
                start: start.clone(),
                stop: None,
            },
        );
        debug!("Opened transaction {} for {}", transaction_id, device_id);
        Ok(transaction_id)
    }

    async fn end_transaction(&self, device_id: &str, stop: &Value) -> Result<(), BackendError> {
        let req: StopTransactionRequest = from_payload(stop);
        let transaction_id = req
            .transaction_id
            .ok_or_else(|| BackendError::Rejected("missing transactionId".into()))?;

        let mut state = self.state.lock();
        let mut tx = state.transactions.remove(&transaction_id).ok_or_else(|| {
            BackendError::Rejected(format!(
                "unknown transaction {} from {}",
                transaction_id, device_id
            ))
        })?;

        tx.stop = Some(stop.clone());
        if state.stopped.len() == STOPPED_HISTORY {
            state.stopped.pop_front();
        }
        state.stopped.push_back(tx);
        Ok(())
    }

    async fn record_meter_values(&self, device_id: &str, meter: &Value) -> Result<(), BackendError> {
        let req: MeterValuesRequest = from_payload(meter);
        let mut state = self.state.lock();
        for mv in req.meter_value {
            if state.meter_values.len() == METER_HISTORY {
                state.meter_values.pop_front();
            }
            state.meter_values.push_back((device_id.to_string(), mv));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_transaction_ids_increase_from_one() {
        let backend = MemoryBackend::new();
        let first = backend.begin_transaction("CP1", &json!({"idTag": "A"})).await.unwrap();
        let second = backend.begin_transaction("CP2", &json!({"idTag": "B"})).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(backend.open_transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_end_transaction() {
        let backend = MemoryBackend::new();
        let id = backend.begin_transaction("CP1", &json!({})).await.unwrap();

        backend
            .end_transaction("CP1", &json!({"transactionId": id, "meterStop": 42}))
            .await
            .unwrap();

        let tx = backend.transaction(id).unwrap();
        assert_eq!(tx.stop.unwrap()["meterStop"], 42);
        assert!(backend.open_transactions().is_empty());

        // a second stop for the same id finds nothing open
        let again = backend
            .end_transaction("CP1", &json!({"transactionId": id}))
            .await;
        assert!(matches!(again, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_end_unknown_transaction_rejected() {
        let backend = MemoryBackend::new();
        let result = backend
            .end_transaction("CP1", &json!({"transactionId": 99}))
            .await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_meter_values_flattened() {
        let backend = MemoryBackend::new();
        backend
            .record_meter_values(
                "CP1",
                &json!({"meterValue": [
                    {"timestamp": "t1", "sampledValue": [{"value": "1"}]},
                    {"timestamp": "t2", "sampledValue": []}
                ]}),
            )
            .await
            .unwrap();

        let values = backend.meter_values();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].1.timestamp.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_status_keeps_latest_per_connector() {
        let backend = MemoryBackend::new();
        for status in ["Available", "Preparing", "Charging"] {
            backend
                .record_status("CP1", &json!({"connectorId": 1, "status": status}))
                .await
                .unwrap();
        }
        backend
            .record_status("CP1", &json!({"connectorId": 2, "status": "Faulted"}))
            .await
            .unwrap();

        let statuses = backend.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].1["status"], "Charging");
        assert_eq!(statuses[1].1["status"], "Faulted");
    }

    #[tokio::test]
    async fn test_stores_stay_bounded() {
        let backend = MemoryBackend::new();
        let sample = json!({"meterValue": [{"timestamp": "t", "sampledValue": []}]});

        for i in 0..(METER_HISTORY + 10) {
            backend.record_meter_values("CP1", &sample).await.unwrap();
            let id = backend.begin_transaction("CP1", &json!({})).await.unwrap();
            backend
                .end_transaction("CP1", &json!({"transactionId": id, "meterStop": i}))
                .await
                .unwrap();
        }

        assert_eq!(backend.meter_values().len(), METER_HISTORY);
        assert!(backend.open_transactions().is_empty());

        let state = backend.state.lock();
        assert_eq!(state.transactions.len(), 0);
        assert_eq!(state.stopped.len(), STOPPED_HISTORY);
        // the oldest stopped transactions were evicted first
        assert_eq!(
            state.stopped.front().map(|tx| tx.transaction_id),
            Some((METER_HISTORY + 10 - STOPPED_HISTORY + 1) as TransactionId)
        );
    }
}
