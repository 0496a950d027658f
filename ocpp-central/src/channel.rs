//! Outbound half of a device link
//!
//! The engine never writes to a socket directly. Each link owns a bounded
//! queue; the transport's writer task drains it, encodes frames and honours
//! close requests.

use tokio::sync::mpsc;

use crate::error::OcppError;
use crate::ocpp::Frame;

/// Item queued for a device's writer task
#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    /// Ask the writer to close the link (used when a reconnect replaces it)
    Close,
}

/// Cloneable sending handle for one device link
#[derive(Debug, Clone)]
pub struct DeviceChannel {
    tx: mpsc::Sender<Outbound>,
}

impl DeviceChannel {
    /// Create a channel and the receiver its writer task will drain
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame for the device
    pub async fn send(&self, frame: Frame) -> Result<(), OcppError> {
        self.tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| OcppError::ConnectionClosed)
    }

    /// Request the writer to close the link. Best effort: a full or closed
    /// queue means the link is already going away or will be dropped anyway.
    pub fn request_close(&self) {
        let _ = self.tx.try_send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
