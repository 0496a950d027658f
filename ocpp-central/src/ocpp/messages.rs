//! OCPP-J message framing
//!
//! Every OCPP message is a positional JSON array:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! Position, not name, carries meaning. Payloads are kept as opaque JSON.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::types::InboundAction;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }

    /// Number of array elements a frame of this type carries
    pub fn arity(self) -> usize {
        match self {
            MessageType::Call => 4,
            MessageType::CallResult => 3,
            MessageType::CallError => 5,
        }
    }
}

/// OCPP-J error codes
///
/// `Other` keeps codes this implementation does not know verbatim, so a
/// CALLERROR from a device survives decode/encode unchanged. Codes compare by
/// their wire name: `Other("InternalError")` equals `InternalError`.
#[derive(Debug, Clone)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    SecurityError,
    TypeConstraintViolation,
    /// Not an OCPP-J code; sent when the backend declines a transaction
    Rejected,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::FormatViolation => "FormatViolation",
            ErrorCode::GenericError => "GenericError",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::Rejected => "Rejected",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s {
            "FormatViolation" => ErrorCode::FormatViolation,
            "GenericError" => ErrorCode::GenericError,
            "InternalError" => ErrorCode::InternalError,
            "NotImplemented" => ErrorCode::NotImplemented,
            "NotSupported" => ErrorCode::NotSupported,
            "OccurrenceConstraintViolation" => ErrorCode::OccurrenceConstraintViolation,
            "PropertyConstraintViolation" => ErrorCode::PropertyConstraintViolation,
            "ProtocolError" => ErrorCode::ProtocolError,
            "SecurityError" => ErrorCode::SecurityError,
            "TypeConstraintViolation" => ErrorCode::TypeConstraintViolation,
            "Rejected" => ErrorCode::Rejected,
            other => ErrorCode::Other(other.to_string()),
        }
    }
}

impl PartialEq for ErrorCode {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ErrorCode {}

impl std::hash::Hash for ErrorCode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a raw message could not be decoded into a frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON array")]
    NotAnArray,

    #[error("Missing or non-integer message type")]
    MissingMessageType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("{kind:?} frame needs {expected} elements, got {actual}")]
    WrongArity {
        kind: MessageType,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid {0} field")]
    InvalidField(&'static str),
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    /// Create a new CALL message with a fresh message id
    pub fn new(action: impl Into<String>, payload: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// The supported inbound action this call names, if any
    pub fn inbound_action(&self) -> Option<InboundAction> {
        self.action.parse().ok()
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: message_id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    /// Create a CALLERROR with empty details
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }
}

/// A decoded OCPP-J frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Frame {
    /// Decode a frame from raw JSON bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Array(mut array) = value else {
            return Err(FrameError::NotAnArray);
        };

        let kind = array
            .first()
            .and_then(Value::as_i64)
            .ok_or(FrameError::MissingMessageType)?;
        let kind = MessageType::from_tag(kind).ok_or(FrameError::UnknownMessageType(kind))?;

        if array.len() != kind.arity() {
            return Err(FrameError::WrongArity {
                kind,
                expected: kind.arity(),
                actual: array.len(),
            });
        }

        let message_id = take_string(&mut array[1], "messageId")?;

        match kind {
            MessageType::Call => {
                let action = take_string(&mut array[2], "action")?;
                Ok(Frame::Call(Call {
                    message_id,
                    action,
                    payload: array[3].take(),
                }))
            }
            MessageType::CallResult => Ok(Frame::CallResult(CallResult {
                message_id,
                payload: array[2].take(),
            })),
            MessageType::CallError => {
                let code = take_string(&mut array[2], "errorCode")?;
                let error_description = take_string(&mut array[3], "errorDescription")?;
                Ok(Frame::CallError(CallError {
                    message_id,
                    error_code: ErrorCode::from(code.as_str()),
                    error_description,
                    error_details: array[4].take(),
                }))
            }
        }
    }

    /// Encode to OCPP-J wire text
    pub fn to_text(&self) -> String {
        let array = match self {
            Frame::Call(c) => serde_json::json!([
                MessageType::Call as i32,
                &c.message_id,
                &c.action,
                &c.payload
            ]),
            Frame::CallResult(r) => serde_json::json!([
                MessageType::CallResult as i32,
                &r.message_id,
                &r.payload
            ]),
            Frame::CallError(e) => serde_json::json!([
                MessageType::CallError as i32,
                &e.message_id,
                e.error_code.as_str(),
                &e.error_description,
                &e.error_details
            ]),
        };
        array.to_string()
    }

    /// Get the message ID
    pub fn message_id(&self) -> &str {
        match self {
            Frame::Call(c) => &c.message_id,
            Frame::CallResult(r) => &r.message_id,
            Frame::CallError(e) => &e.message_id,
        }
    }
}

fn take_string(value: &mut Value, field: &'static str) -> Result<String, FrameError> {
    match value.take() {
        Value::String(s) => Ok(s),
        _ => Err(FrameError::InvalidField(field)),
    }
}
