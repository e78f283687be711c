//! WebSocket listener and connection bootstrap
//!
//! Accepts TCP connections, upgrades them with an origin check, and hands
//! each upgraded socket to a pump pair registered with the hub.

use crate::client::{run_read_pump, run_write_pump, MAX_MESSAGE_SIZE, OUTBOUND_MESSAGE_BUFFER};
use crate::hub::{ClientHandle, ConnId, HubHandle};
use futures_util::StreamExt;
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Accepts client connections and wires each one into the hub.
pub struct Listener {
    listener: TcpListener,
    allowed_origin: String,
}

impl Listener {
    /// Binds the listening socket. Only upgrade requests carrying exactly
    /// `allowed_origin` in their Origin header will be accepted.
    pub async fn bind(addr: &str, allowed_origin: String) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            allowed_origin,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Each connection gets a fresh id and its own pump tasks;
    /// accept failures are logged and do not stop the loop.
    pub async fn serve(self, hub: HubHandle) {
        let mut next_conn_id: ConnId = 1;
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let conn = next_conn_id;
                    next_conn_id = next_conn_id.wrapping_add(1);
                    let origin = self.allowed_origin.clone();
                    let hub = hub.clone();
                    tokio::spawn(handle_connection(conn, stream, addr, origin, hub));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            }
        }
    }
}

/// True when the request's Origin header matches the allowed origin exactly.
fn origin_allowed(request: &Request, allowed_origin: &str) -> bool {
    request
        .headers()
        .get("Origin")
        .and_then(|value| value.to_str().ok())
        .map(|origin| origin == allowed_origin)
        .unwrap_or(false)
}

async fn handle_connection(
    conn: ConnId,
    stream: TcpStream,
    addr: SocketAddr,
    allowed_origin: String,
    hub: HubHandle,
) {
    let config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        ..WebSocketConfig::default()
    };

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if origin_allowed(request, &allowed_origin) {
            Ok(response)
        } else {
            debug!("Rejecting upgrade from {}: bad origin", addr);
            let mut forbidden = ErrorResponse::new(Some("origin not allowed".to_string()));
            *forbidden.status_mut() = StatusCode::FORBIDDEN;
            Err(forbidden)
        }
    };

    let websocket = match accept_hdr_async_with_config(stream, callback, Some(config)).await {
        Ok(websocket) => websocket,
        Err(e) => {
            debug!("Upgrade failed for {}: {}", addr, e);
            return;
        }
    };

    let (sink, stream) = websocket.split();
    let (sender, receiver) = mpsc::channel(OUTBOUND_MESSAGE_BUFFER);

    hub.register(ClientHandle {
        id: conn,
        addr,
        sender,
    });

    tokio::spawn(run_write_pump(conn, sink, receiver, hub.clone()));
    tokio::spawn(run_read_pump(conn, stream, hub));
}
