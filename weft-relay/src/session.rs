//! Per-connection WebSocket session.
//!
//! Each accepted socket gets a session that parses inbound JSON frames,
//! hands them to the relay serially, and forwards the connection's outbound
//! channel onto the socket. A session moves through
//! `unregistered → registered → closed`; the registered DID lives in the
//! relay's connection registry.

use crate::server::RelayServer;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use weft_types::ClientFrame;

/// Run a session until the socket closes.
pub async fn run_session(relay: Arc<RelayServer>, stream: TcpStream) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws.split();
    let (conn_id, mut outbound) = relay.attach();
    let max_frame = relay.config().limits.max_frame_size;

    // Forward outbound frames (routed by the relay) onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Inbound frames are processed one at a time, so a register fully
    // drains the mailbox before this connection's next frame.
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if text.len() > max_frame {
                    relay.reject_invalid(conn_id, "frame exceeds size limit");
                    continue;
                }
                match ClientFrame::from_json(&text) {
                    Ok(frame) => relay.handle_frame(conn_id, frame).await,
                    Err(e) => {
                        tracing::debug!("Connection {} sent malformed frame: {}", conn_id, e);
                        relay.reject_invalid(conn_id, "frame is not valid JSON");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                relay.reject_invalid(conn_id, "binary frames are not supported");
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("Connection {} sent close", conn_id);
                break;
            }
            Ok(_) => {
                // WebSocket-level ping/pong; liveness runs over protocol frames.
            }
            Err(e) => {
                tracing::debug!("Connection {} socket error: {}", conn_id, e);
                break;
            }
        }
    }

    relay.detach(conn_id);
    writer.abort();
}
