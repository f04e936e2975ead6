//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent frames for verification.
//! `recv()` waits on an internal channel, so a reader task behaves exactly
//! as it would against a live socket.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Mock transport for testing.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    recv_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    recv_tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent_frames: Vec<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    /// When true, a `{"type":"ping"}` frame sent through the transport is
    /// answered by queueing a `{"type":"pong"}` response.
    auto_pong: bool,
    /// When true, a `{"type":"send",...}` frame is answered by queueing a
    /// delivered receipt for the envelope's id.
    auto_receipt: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            recv_rx: Arc::new(tokio::sync::Mutex::new(recv_rx)),
            recv_tx,
        }
    }

    /// Queue a frame to be returned by a later `recv()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        let _ = self.recv_tx.send(data);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent_frames.clone()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.inner.lock().unwrap().connected_address.clone()
    }

    /// Cause the next `connect()` to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Answer outgoing pings with queued pongs.
    pub fn auto_pong(&self, enabled: bool) {
        self.inner.lock().unwrap().auto_pong = enabled;
    }

    /// Answer outgoing `send` frames with queued delivered receipts.
    pub fn auto_receipt(&self, enabled: bool) {
        self.inner.lock().unwrap().auto_receipt = enabled;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let (auto_pong, auto_receipt) = {
            let mut inner = self.inner.lock().unwrap();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            inner.sent_frames.push(data.to_vec());
            (inner.auto_pong, inner.auto_receipt)
        };

        if auto_pong && data == br#"{"type":"ping"}"# {
            let _ = self.recv_tx.send(br#"{"type":"pong"}"#.to_vec());
        }
        if auto_receipt {
            if let Some(receipt) = delivered_receipt_for(data) {
                let _ = self.recv_tx.send(receipt);
            }
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut rx = self.recv_rx.lock().await;
        rx.recv().await.ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        Ok(())
    }
}

/// Build a delivered-receipt frame answering a `send` frame, if it is one.
fn delivered_receipt_for(data: &[u8]) -> Option<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    if value.get("type")?.as_str()? != "send" {
        return None;
    }
    let id = value.get("envelope")?.get("id")?.as_str()?;
    Some(
        format!(
            r#"{{"type":"receipt","receipt":{{"messageId":"{id}","status":"delivered","timestamp":"1970-01-01T00:00:00Z"}}}}"#
        )
        .into_bytes(),
    )
}
