//! REST backend client
//!
//! Talks to the charge point management backend over HTTP. Endpoint paths
//! and body field names are the backend's own and are kept verbatim.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{Backend, BackendError, TransactionId};
use crate::ocpp::{
    from_payload, MeterValuesRequest, StartTransactionRequest, StatusNotificationRequest,
    StopTransactionRequest,
};

/// Transaction status values understood by the backend
const TRANSACTION_CHARGING: &str = "CARGANDO";
const TRANSACTION_FINISHED: &str = "FINALIZADO";

/// `result` value the backend uses to accept a transaction
const RESULT_OK: &str = "Ok";

#[derive(Debug, Serialize)]
struct RegisterChargepointBody<'a> {
    cp_id: &'a str,
    cp_data: &'a Value,
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    id: &'a str,
    hora: String,
}

#[derive(Debug, Serialize)]
struct UpdateConnectorBody<'a> {
    id_cp: &'a str,
    status: Option<String>,
    id_connector: Option<i32>,
    date: Option<String>,
    error_code: Option<String>,
    info: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetTransBody<'a> {
    id_cp: &'a str,
    id_trans: TransactionId,
    id_tag: Option<String>,
    meter_start: Option<i64>,
    started: Option<String>,
    connector_id: Option<i32>,
    status: &'static str,
    reservation_id: Option<i32>,
}

#[derive(Debug, Serialize)]
struct StopTransactionBody {
    id_trans: Option<i64>,
    finished: Option<String>,
    status: &'static str,
    meter_end: Option<i64>,
    message: String,
}

#[derive(Debug, Serialize)]
struct SetMeterValuesBody<'a> {
    chargepoint_id: &'a str,
    connector_id: Option<i32>,
    transaction_id: Option<i64>,
    meter_value: Vec<MeterValueBody>,
}

#[derive(Debug, Serialize)]
struct MeterValueBody {
    timestamp: Option<String>,
    sampled_value: Vec<Value>,
}

/// HTTP implementation of [`Backend`]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let resp = self.client.get(&url).send().await?;
        read_body(resp).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let resp = self.client.post(&url).json(body).send().await?;
        read_body(resp).await
    }

    async fn next_transaction_id(&self) -> Result<TransactionId, BackendError> {
        let body = self.get("/getColTrans").await?;
        parse_transaction_id(&body).ok_or_else(|| {
            BackendError::InvalidResponse(format!("no transaction id in {}", body))
        })
    }
}

/// Read a response body as JSON, keeping non-JSON text as a string
async fn read_body(resp: reqwest::Response) -> Result<Value, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(BackendError::Status(status.as_u16()));
    }

    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn parse_transaction_id(body: &Value) -> Option<TransactionId> {
    match body {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn register_device(&self, device_id: &str, boot: &Value) -> Result<(), BackendError> {
        let body = RegisterChargepointBody {
            cp_id: device_id,
            cp_data: boot,
        };
        self.post("/registerChargepoint", &body).await?;
        Ok(())
    }

    async fn record_heartbeat(
        &self,
        device_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let body = HeartbeatBody {
            id: device_id,
            hora: timestamp.to_rfc3339(),
        };
        self.post("/updateHB", &body).await?;
        Ok(())
    }

    async fn record_status(&self, device_id: &str, status: &Value) -> Result<(), BackendError> {
        let req: StatusNotificationRequest = from_payload(status);
        let body = UpdateConnectorBody {
            id_cp: device_id,
            status: req.status,
            id_connector: req.connector_id,
            date: req.timestamp,
            error_code: req.error_code,
            info: req.info,
        };
        self.post("/updateConnector", &body).await?;
        Ok(())
    }

    async fn begin_transaction(
        &self,
        device_id: &str,
        start: &Value,
    ) -> Result<TransactionId, BackendError> {
        let transaction_id = self.next_transaction_id().await?;
        let req: StartTransactionRequest = from_payload(start);

        let body = SetTransBody {
            id_cp: device_id,
            id_trans: transaction_id,
            id_tag: req.id_tag,
            meter_start: req.meter_start,
            started: req.timestamp,
            connector_id: req.connector_id,
            status: TRANSACTION_CHARGING,
            reservation_id: req.reservation_id,
        };
        let resp = self.post("/setTrans", &body).await?;

        match resp.get("result").and_then(Value::as_str) {
            Some(RESULT_OK) => {
                info!("Backend opened transaction {} for {}", transaction_id, device_id);
                Ok(transaction_id)
            }
            other => Err(BackendError::Rejected(format!(
                "transaction {} not accepted (result: {})",
                transaction_id,
                other.unwrap_or("missing")
            ))),
        }
    }

    async fn end_transaction(&self, _device_id: &str, stop: &Value) -> Result<(), BackendError> {
        let req: StopTransactionRequest = from_payload(stop);
        let body = StopTransactionBody {
            id_trans: req.transaction_id,
            finished: req.timestamp,
            status: TRANSACTION_FINISHED,
            meter_end: req.meter_stop,
            message: req.reason.unwrap_or_default(),
        };
        self.post("/stopTransaction", &body).await?;
        Ok(())
    }

    async fn record_meter_values(&self, device_id: &str, meter: &Value) -> Result<(), BackendError> {
        let req: MeterValuesRequest = from_payload(meter);
        let body = SetMeterValuesBody {
            chargepoint_id: device_id,
            connector_id: req.connector_id,
            transaction_id: req.transaction_id,
            meter_value: req
                .meter_value
                .into_iter()
                .map(|mv| MeterValueBody {
                    timestamp: mv.timestamp,
                    sampled_value: mv.sampled_value,
                })
                .collect(),
        };
        self.post("/setMeterValues", &body).await?;
        Ok(())
    }
}
