//! # OCPP Central System
//!
//! OCPP 1.6 JSON central system for a fleet of charge points.
//!
//! Charge points connect over WebSocket (`ws://host:port/{chargePointId}`)
//! and exchange OCPP-J frames. Either side may initiate a call; every call is
//! answered by exactly one CALLRESULT or CALLERROR carrying the same message
//! id.
//!
//! ## Architecture
//!
//! ```text
//!  Charge points                         Operators
//!       │ WebSocket (ocpp1.6)                 │ HTTP JSON
//!       ▼                                     ▼
//! ┌──────────────┐                    ┌──────────────┐
//! │ CentralServer│                    │  admin API   │
//! └──────┬───────┘                    └──────┬───────┘
//!        │ on_message / close                │ send_call / broadcast
//!        ▼                                   ▼
//! ┌─────────────────────────────────────────────────┐
//! │                 CentralSystem                   │
//! │  ┌──────────┐  ┌────────────┐  ┌─────────────┐  │
//! │  │ Registry │  │ Dispatcher │  │  CallTable  │  │
//! │  └──────────┘  └─────┬──────┘  └─────────────┘  │
//! └──────────────────────┼──────────────────────────┘
//!                        │ async
//!                        ▼
//!              Backend (HTTP or memory)
//! ```
//!
//! ## Inbound actions
//!
//! | Action | Backend | Reply |
//! |--------|---------|-------|
//! | BootNotification | register_device | currentTime, interval, Accepted |
//! | Heartbeat | record_heartbeat | currentTime |
//! | StatusNotification | record_status | {} |
//! | StartTransaction | begin_transaction | transactionId, idTagInfo |
//! | StopTransaction | end_transaction | idTagInfo |
//! | MeterValues | record_meter_values | {} |
//! | Authorize, TriggerMessage, Reset, UnlockConnector, FirmwareStatusNotification | - | acknowledged |
//!
//! Anything else is answered with a `NotSupported` CALLERROR.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocpp_central::{admin, CentralConfig, CentralServer, CentralSystem, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CentralConfig::default();
//!     let system = CentralSystem::new(config.clone(), Arc::new(MemoryBackend::new()));
//!
//!     let server = CentralServer::bind(config.ws_addr).await?;
//!     tokio::spawn(admin::serve(config.admin_addr, system.clone()));
//!     server.run(system).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod ocpp;
pub mod error;
pub mod channel;
pub mod registry;
pub mod pending;
pub mod backend;
pub mod dispatcher;
pub mod central;
pub mod server;
pub mod admin;
pub mod config;

pub use config::CentralConfig;
pub use central::{BroadcastOutcome, CentralSystem, DeviceSession};
pub use server::CentralServer;
pub use error::{OcppError, ServerError};
pub use backend::{Backend, BackendError, HttpBackend, MemoryBackend};

// Re-export key types
pub use channel::{DeviceChannel, Outbound};
pub use registry::{DeviceInfo, RegistryEvent};
pub use ocpp::{Call, CallError, CallResult, ErrorCode, Frame, InboundAction, ResetType};
