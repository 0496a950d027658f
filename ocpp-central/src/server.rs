//! WebSocket listener for charge points
//!
//! Each accepted link runs two tasks: this reader, which feeds messages to
//! the engine in arrival order, and a writer draining the link's outbound
//! queue into the socket.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::central::CentralSystem;
use crate::channel::{DeviceChannel, Outbound};
use crate::error::ServerError;

/// OCPP 1.6 JSON subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

type DeviceSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

/// Accepts charge point connections and hands them to the engine
pub struct CentralServer {
    listener: TcpListener,
}

impl CentralServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self, system: CentralSystem) -> Result<(), ServerError> {
        info!("OCPP WebSocket listening on ws://{}", self.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let system = system.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(system, stream, peer).await {
                    warn!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(64 * 1024),
        max_frame_size: Some(16 * 1024),
        ..Default::default()
    }
}

/// Charge point id carried in the request path: its last non-empty segment
pub fn device_id_from_path(path: &str) -> Option<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).last()
}

fn offers_ocpp16(request: &Request) -> bool {
    request
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|protocol| protocol.trim() == OCPP_SUBPROTOCOL)
}

async fn handle_connection(
    system: CentralSystem,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ServerError> {
    let mut path = String::new();
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        if offers_ocpp16(request) {
            response.headers_mut().insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(OCPP_SUBPROTOCOL),
            );
        } else {
            warn!("{} did not offer the {} subprotocol", peer, OCPP_SUBPROTOCOL);
        }
        Ok(response)
    };

    let ws_stream = accept_hdr_async_with_config(stream, callback, Some(ws_config())).await?;

    let (channel, outbound_rx) = DeviceChannel::new(system.config().outbound_queue);
    let session = system.open_connection(device_id_from_path(&path), channel, peer.to_string());
    let device_id = session.device_id.clone();

    let (sink, mut messages) = ws_stream.split();
    let mut writer = tokio::spawn(write_frames(device_id.clone(), sink, outbound_rx));

    loop {
        tokio::select! {
            msg = messages.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        system.on_message(&session, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if std::str::from_utf8(&data).is_ok() {
                            system.on_message(&session, &data).await;
                        } else {
                            warn!("Dropping non UTF-8 binary message from {}", device_id);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("{} sent close", device_id);
                        break;
                    }
                    // ping/pong is answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", device_id, e);
                        break;
                    }
                    None => break,
                }
            }
            _ = &mut writer => {
                debug!("Writer for {} finished", device_id);
                break;
            }
        }
    }

    system.close_connection(&session);
    writer.abort();
    Ok(())
}

async fn write_frames(device_id: String, mut sink: DeviceSink, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let text = frame.to_text();
                debug!("Sending to {}: {}", device_id, text);

                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!("Failed to send to {}: {}", device_id, e);
                    return;
                }
            }
            Outbound::Close => {
                info!("Closing replaced link of {}", device_id);
                break;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::Request as HttpRequest;

    #[test]
    fn test_device_id_from_path() {
        assert_eq!(device_id_from_path("/CP001"), Some("CP001"));
        assert_eq!(device_id_from_path("/ocpp/CP001/"), Some("CP001"));
        assert_eq!(device_id_from_path("/"), None);
        assert_eq!(device_id_from_path(""), None);
    }

    #[test]
    fn test_subprotocol_detection() {
        let offered = HttpRequest::builder()
            .header(header::SEC_WEBSOCKET_PROTOCOL, "ocpp2.0.1, ocpp1.6")
            .body(())
            .unwrap();
        let missing = HttpRequest::builder()
            .header(header::SEC_WEBSOCKET_PROTOCOL, "ocpp2.0.1")
            .body(())
            .unwrap();

        assert!(offers_ocpp16(&offered));
        assert!(!offers_ocpp16(&missing));
    }
}
