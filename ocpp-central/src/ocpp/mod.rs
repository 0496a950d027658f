//! OCPP protocol layer
//!
//! - `types`: OCPP 1.6 payload types and the supported action set
//! - `messages`: OCPP-J framing (CALL, CALLRESULT, CALLERROR)

pub mod types;
pub mod messages;

pub use types::*;
pub use messages::*;
