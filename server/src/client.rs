//! Per-connection read and write pumps
//!
//! Each accepted WebSocket is split in two. The read pump owns the receiving
//! half, unpacks transport frames into sub-messages, and forwards them to the
//! hub. The write pump owns the sending half, coalesces queued payloads into
//! one frame per write, and keeps the connection alive with periodic pings.
//! Either pump exiting unregisters the connection.

use crate::hub::{ConnId, HubHandle};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use shared::{append_sub_message, split_sub_messages};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// How long the read pump waits for any traffic before declaring the peer
/// dead. Pongs count as traffic, so pings keep healthy connections inside
/// the deadline.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period; must be shorter than [`PONG_WAIT`] so a healthy peer always
/// produces traffic before the read deadline fires.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Largest inbound transport frame accepted from a client.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Capacity of each connection's bounded outbound queue.
pub const OUTBOUND_MESSAGE_BUFFER: usize = 256;

/// Reads transport frames until the connection dies, the peer closes, or the
/// read deadline passes without traffic. Always unregisters on exit.
pub async fn run_read_pump(
    conn: ConnId,
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    hub: HubHandle,
) {
    loop {
        let message = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                debug!("Connection {} read deadline passed; closing", conn);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("Connection {} read error: {}", conn, e);
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(frame) => {
                if frame.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Connection {} sent an oversized frame of {} bytes; closing",
                        conn,
                        frame.len()
                    );
                    break;
                }
                for payload in split_sub_messages(&frame) {
                    hub.inbound(conn, payload.to_vec());
                }
            }
            Message::Close(_) => break,
            // Pongs already refreshed the deadline by arriving; pings are
            // answered by the protocol layer.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Text(_) => {
                debug!("Connection {} sent a text frame; ignoring", conn);
            }
            Message::Frame(_) => {}
        }
    }

    hub.unregister(conn);
    debug!("Connection {} read pump finished", conn);
}

/// Writes queued payloads to the socket, one coalesced frame per wake-up,
/// and pings on an interval. Exits when the hub closes the queue or the
/// socket fails. Always unregisters on exit.
pub async fn run_write_pump(
    conn: ConnId,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    hub: HubHandle,
) {
    let mut ping_ticker = interval(PING_PERIOD);
    ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it.
    ping_ticker.tick().await;

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(payload) = queued else {
                    // Hub dropped its sender: the connection was evicted or
                    // the hub is draining. Say goodbye properly.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let frame = match coalesce_frame(payload, &mut outbound) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Connection {} produced an unpackable payload: {}", conn, e);
                        break;
                    }
                };

                if let Err(e) = sink.send(Message::Binary(frame)).await {
                    debug!("Connection {} write error: {}", conn, e);
                    break;
                }
            }
            _ = ping_ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!("Connection {} ping failed: {}", conn, e);
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    hub.unregister(conn);
    debug!("Connection {} write pump finished", conn);
}

/// Packs `first` plus everything already waiting in the queue into a single
/// transport frame of length-prefixed sub-messages.
fn coalesce_frame(
    first: Vec<u8>,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> Result<Vec<u8>, shared::CodecError> {
    let mut frame = Vec::with_capacity(shared::SUB_MESSAGE_HEADER_LEN + first.len());
    append_sub_message(&mut frame, &first)?;
    while let Ok(payload) = outbound.try_recv() {
        append_sub_message(&mut frame, &payload)?;
    }
    Ok(frame)
}
