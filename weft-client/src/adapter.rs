//! The client-side transport adapter.
//!
//! [`RelayClient`] wraps one [`Transport`] connection: it registers a DID,
//! sends envelopes and resolves their delivery receipts, fans inbound
//! envelopes out to subscribers (acking once one has processed the message),
//! and watches the link with a ping/pong heartbeat.

use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use weft_types::{ClientFrame, DeliveryReceipt, Did, MessageEnvelope, ServerFrame, WireError};

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Wire encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Operation requires an established connection.
    #[error("not connected")]
    NotConnected,

    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The relay rejected a frame.
    #[error("relay rejected frame: {code}: {message}")]
    Rejected {
        /// Machine-readable error code from the relay.
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// The connection closed while a response was pending.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Connection lifecycle of a [`RelayClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection.
    Disconnected,
    /// Transport open, registration in flight.
    Connecting,
    /// Registered with the relay.
    Connected,
    /// A connection attempt failed.
    Error,
}

/// Configuration for [`RelayClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the relay to connect to (a WebSocket URL).
    pub relay_address: String,
    /// How often to send a `ping` (default: 30s).
    pub heartbeat_interval: Duration,
    /// How long to wait for the matching `pong` before declaring the
    /// connection dead (default: 10s, must be shorter than the interval).
    pub heartbeat_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with default heartbeat timing.
    pub fn new(relay_address: &str) -> Self {
        Self {
            relay_address: relay_address.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
        }
    }

    /// Override the heartbeat timing.
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_timeout = timeout;
        self
    }
}

/// Subscriber invoked for each inbound envelope.
///
/// Returning `Ok` counts as having processed the message; once at least one
/// subscriber succeeds the adapter acks the envelope automatically.
pub type MessageCallback = Arc<dyn Fn(&MessageEnvelope) -> Result<(), String> + Send + Sync>;

/// The client transport adapter.
///
/// Cheap to clone; clones share the underlying connection.
pub struct RelayClient<T: Transport + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport + 'static> Clone for RelayClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T> {
    config: ClientConfig,
    transport: T,
    state: Mutex<LinkState>,
    /// Receipt waiters keyed by envelope id. Never timed out locally: they
    /// resolve when the receipt arrives or when the connection closes.
    pending: Mutex<HashMap<String, oneshot::Sender<DeliveryReceipt>>>,
    callbacks: Mutex<Vec<MessageCallback>>,
    last_pong: Mutex<Instant>,
    connect_waiter: Mutex<Option<oneshot::Sender<Result<(), ClientError>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport + 'static> RelayClient<T> {
    /// Create a new adapter over the given transport.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state: Mutex::new(LinkState::Disconnected),
                pending: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                last_pong: Mutex::new(Instant::now()),
                connect_waiter: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().unwrap()
    }

    /// Whether the adapter is registered with the relay.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Register a subscriber for inbound envelopes.
    pub fn on_message(&self, callback: MessageCallback) {
        self.inner.callbacks.lock().unwrap().push(callback);
    }

    /// Connect to the relay and register the given DID.
    ///
    /// Resolves once the relay confirms registration; an `error` frame or a
    /// transport failure while connecting rejects and leaves the adapter in
    /// the `Error` state. This call itself never times out — callers wanting
    /// a connect timeout must race it externally.
    pub async fn connect(&self, did: &Did) -> Result<(), ClientError> {
        self.inner.set_state(LinkState::Connecting);

        if let Err(e) = self
            .inner
            .transport
            .connect(&self.inner.config.relay_address)
            .await
        {
            self.inner.set_state(LinkState::Error);
            return Err(ClientError::ConnectionFailed(e.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        *self.inner.connect_waiter.lock().unwrap() = Some(tx);

        // The read loop must be running before the relay's reply can arrive.
        let read_inner = Arc::clone(&self.inner);
        let read_task = tokio::spawn(async move { read_loop(read_inner).await });
        self.inner.tasks.lock().unwrap().push(read_task);

        if let Err(e) = self
            .send_frame(&ClientFrame::Register { did: did.clone() })
            .await
        {
            self.inner.set_state(LinkState::Error);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(())) => {
                *self.inner.last_pong.lock().unwrap() = Instant::now();
                self.inner.set_state(LinkState::Connected);

                let beat_inner = Arc::clone(&self.inner);
                let beat_task = tokio::spawn(async move { heartbeat_loop(beat_inner).await });
                self.inner.tasks.lock().unwrap().push(beat_task);

                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.set_state(LinkState::Error);
                Err(e)
            }
            Err(_) => {
                self.inner.set_state(LinkState::Error);
                Err(ClientError::ConnectionFailed(
                    "connection closed during registration".to_string(),
                ))
            }
        }
    }

    /// Send an envelope and wait for its delivery receipt.
    ///
    /// The receipt is the only place a caller observes `accepted` vs
    /// `delivered`.
    pub async fn send(&self, envelope: MessageEnvelope) -> Result<DeliveryReceipt, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let message_id = envelope.id.clone();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .unwrap()
            .insert(message_id.clone(), tx);

        if let Err(e) = self.send_frame(&ClientFrame::Send { envelope }).await {
            self.inner.pending.lock().unwrap().remove(&message_id);
            return Err(e);
        }

        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Stop the heartbeat and close the connection. Idempotent.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        for task in self.inner.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.inner.set_state(LinkState::Disconnected);
        self.inner.pending.lock().unwrap().clear();
        self.inner.transport.close().await.ok();
        Ok(())
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), ClientError> {
        let json = frame.to_json()?;
        self.inner.transport.send(json.as_bytes()).await?;
        Ok(())
    }
}

impl<T> Inner<T> {
    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }

    fn resolve_connect(&self, result: Result<(), ClientError>) -> bool {
        if let Some(tx) = self.connect_waiter.lock().unwrap().take() {
            let _ = tx.send(result);
            true
        } else {
            false
        }
    }
}

/// Read frames off the transport and dispatch them until the link dies.
async fn read_loop<T: Transport>(inner: Arc<Inner<T>>) {
    loop {
        let bytes = match inner.transport.recv().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Transport read ended: {}", e);
                break;
            }
        };

        let frame = match std::str::from_utf8(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|text| ServerFrame::from_json(text).map_err(|e| e.to_string()))
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Discarding malformed frame from relay: {}", e);
                continue;
            }
        };

        match frame {
            ServerFrame::Registered { did } => {
                tracing::debug!("Registered as {}", did);
                inner.resolve_connect(Ok(()));
            }
            ServerFrame::Message { envelope } => {
                deliver_message(&inner, envelope).await;
            }
            ServerFrame::Receipt { receipt } => {
                let waiter = inner.pending.lock().unwrap().remove(&receipt.message_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(receipt);
                    }
                    None => tracing::debug!(
                        "Receipt for unknown message {} discarded",
                        receipt.message_id
                    ),
                }
            }
            ServerFrame::Pong => {
                *inner.last_pong.lock().unwrap() = Instant::now();
            }
            ServerFrame::Error { code, message } => {
                let was_connecting = inner.resolve_connect(Err(ClientError::Rejected {
                    code: code.clone(),
                    message: message.clone(),
                }));
                if !was_connecting {
                    tracing::warn!("Relay error: {}: {}", code, message);
                }
            }
        }
    }

    // The link is gone: fail a pending connect, drop receipt waiters.
    let was_connecting = inner.resolve_connect(Err(ClientError::ConnectionClosed));
    {
        let mut state = inner.state.lock().unwrap();
        *state = if was_connecting {
            LinkState::Error
        } else {
            LinkState::Disconnected
        };
    }
    inner.pending.lock().unwrap().clear();
}

/// Fan an inbound envelope out to subscribers, then ack it.
///
/// The ack is sent once at least one subscriber has processed the envelope
/// without erroring; it is not a manual API the application must call.
async fn deliver_message<T: Transport>(inner: &Arc<Inner<T>>, envelope: MessageEnvelope) {
    let callbacks: Vec<MessageCallback> = inner.callbacks.lock().unwrap().clone();
    if callbacks.is_empty() {
        tracing::debug!("No subscribers for envelope {}, not acking", envelope.id);
        return;
    }

    let mut processed = false;
    for callback in &callbacks {
        match callback(&envelope) {
            Ok(()) => processed = true,
            Err(e) => tracing::warn!("Subscriber failed on envelope {}: {}", envelope.id, e),
        }
    }

    if !processed {
        return;
    }

    let ack = ClientFrame::Ack {
        message_id: envelope.id.clone(),
    };
    match ack.to_json() {
        Ok(json) => {
            if let Err(e) = inner.transport.send(json.as_bytes()).await {
                tracing::warn!("Failed to ack envelope {}: {}", envelope.id, e);
            }
        }
        Err(e) => tracing::error!("Failed to encode ack: {}", e),
    }
}

/// Send pings on a fixed interval; a missed pong kills the connection.
async fn heartbeat_loop<T: Transport>(inner: Arc<Inner<T>>) {
    let interval = inner.config.heartbeat_interval;
    let timeout = inner.config.heartbeat_timeout;

    loop {
        tokio::time::sleep(interval).await;
        if *inner.state.lock().unwrap() != LinkState::Connected {
            break;
        }

        let ping_sent = Instant::now();
        let ping = match ClientFrame::Ping.to_json() {
            Ok(json) => json,
            Err(_) => break,
        };
        if inner.transport.send(ping.as_bytes()).await.is_err() {
            tracing::warn!("Heartbeat send failed, closing connection");
            inner.transport.close().await.ok();
            inner.set_state(LinkState::Disconnected);
            break;
        }

        tokio::time::sleep(timeout).await;
        let pong_at = *inner.last_pong.lock().unwrap();
        if pong_at < ping_sent {
            tracing::warn!(
                "No pong within {:?}, treating connection as dead",
                timeout
            );
            inner.transport.close().await.ok();
            inner.set_state(LinkState::Disconnected);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_types::MessageKind;

    fn test_config() -> ClientConfig {
        ClientConfig::new("ws://relay.test")
    }

    fn registered_frame(did: &str) -> Vec<u8> {
        ServerFrame::Registered {
            did: Did::new(did),
        }
        .to_json()
        .unwrap()
        .into_bytes()
    }

    fn message_frame(envelope: &MessageEnvelope) -> Vec<u8> {
        ServerFrame::Message {
            envelope: envelope.clone(),
        }
        .to_json()
        .unwrap()
        .into_bytes()
    }

    fn receipt_frame(receipt: DeliveryReceipt) -> Vec<u8> {
        ServerFrame::Receipt { receipt }.to_json().unwrap().into_bytes()
    }

    fn envelope(to: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            MessageKind::ProfileUpdate,
            Did::new("did:key:me"),
            Did::new(to),
            serde_json::json!({"n": 1}),
        )
    }

    fn sent_client_frames(transport: &MockTransport) -> Vec<ClientFrame> {
        transport
            .sent_frames()
            .iter()
            .map(|bytes| ClientFrame::from_json(std::str::from_utf8(bytes).unwrap()).unwrap())
            .collect()
    }

    async fn connected_client() -> (RelayClient<MockTransport>, MockTransport) {
        let transport = MockTransport::new();
        transport.queue_response(registered_frame("did:key:me"));
        let client = RelayClient::new(test_config(), transport.clone());
        client.connect(&Did::new("did:key:me")).await.unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn connect_registers_and_resolves_on_registered() {
        let (client, transport) = connected_client().await;

        assert_eq!(client.state(), LinkState::Connected);
        assert_eq!(
            transport.connected_address(),
            Some("ws://relay.test".to_string())
        );
        match &sent_client_frames(&transport)[0] {
            ClientFrame::Register { did } => assert_eq!(did.as_str(), "did:key:me"),
            other => panic!("expected register, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn transport_failure_while_connecting_rejects() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");
        let client = RelayClient::new(test_config(), transport);

        let result = client.connect(&Did::new("did:key:me")).await;
        assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
        assert_eq!(client.state(), LinkState::Error);
    }

    #[tokio::test]
    async fn error_frame_while_connecting_rejects() {
        let transport = MockTransport::new();
        transport.queue_response(
            ServerFrame::error("INVALID_MESSAGE", "bad register")
                .to_json()
                .unwrap()
                .into_bytes(),
        );
        let client = RelayClient::new(test_config(), transport);

        let result = client.connect(&Did::new("did:key:me")).await;
        match result {
            Err(ClientError::Rejected { code, .. }) => assert_eq!(code, "INVALID_MESSAGE"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(client.state(), LinkState::Error);
    }

    #[tokio::test]
    async fn send_requires_connected_state() {
        let client = RelayClient::new(test_config(), MockTransport::new());
        let result = client.send(envelope("did:key:bob")).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn send_resolves_with_matching_receipt() {
        let (client, transport) = connected_client().await;

        let m = envelope("did:key:bob");
        let receipt_bytes = receipt_frame(DeliveryReceipt::accepted(&m.id));

        let sender = client.clone();
        let handle = tokio::spawn(async move { sender.send(m).await });

        // Let the send register its waiter before the receipt arrives
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.queue_response(receipt_bytes);

        let receipt = handle.await.unwrap().unwrap();
        assert_eq!(receipt.status, weft_types::DeliveryStatus::Accepted);

        // Register + send on the wire
        let frames = sent_client_frames(&transport);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], ClientFrame::Send { .. }));
    }

    #[tokio::test]
    async fn inbound_message_runs_callbacks_then_acks() {
        let (client, transport) = connected_client().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        client.on_message(Arc::new(move |_env: &MessageEnvelope| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let m = envelope("did:key:me");
        transport.queue_response(message_frame(&m));

        // Wait for the ack to appear on the wire
        let mut acked = false;
        for _ in 0..50 {
            if sent_client_frames(&transport)
                .iter()
                .any(|f| matches!(f, ClientFrame::Ack { message_id } if *message_id == m.id))
            {
                acked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(acked, "expected an automatic ack");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_ack_without_a_successful_callback() {
        let (client, transport) = connected_client().await;

        client.on_message(Arc::new(|_env: &MessageEnvelope| {
            Err("subscriber broke".to_string())
        }));

        let m = envelope("did:key:me");
        transport.queue_response(message_frame(&m));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!sent_client_frames(&transport)
            .iter()
            .any(|f| matches!(f, ClientFrame::Ack { .. })));
    }

    #[tokio::test]
    async fn no_ack_without_subscribers() {
        let (_client, transport) = connected_client().await;

        let m = envelope("did:key:me");
        transport.queue_response(message_frame(&m));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!sent_client_frames(&transport)
            .iter()
            .any(|f| matches!(f, ClientFrame::Ack { .. })));
    }

    #[tokio::test]
    async fn heartbeat_keeps_connection_alive_with_pongs() {
        let transport = MockTransport::new();
        transport.auto_pong(true);
        transport.queue_response(registered_frame("did:key:me"));
        let config = test_config()
            .with_heartbeat(Duration::from_millis(30), Duration::from_millis(20));
        let client = RelayClient::new(config, transport.clone());
        client.connect(&Did::new("did:key:me")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(client.state(), LinkState::Connected);
        let pings = sent_client_frames(&transport)
            .iter()
            .filter(|f| matches!(f, ClientFrame::Ping))
            .count();
        assert!(pings >= 2, "expected recurring pings, saw {}", pings);
    }

    #[tokio::test]
    async fn missed_pong_closes_the_connection() {
        let transport = MockTransport::new();
        transport.queue_response(registered_frame("did:key:me"));
        let config = test_config()
            .with_heartbeat(Duration::from_millis(30), Duration::from_millis(20));
        let client = RelayClient::new(config, transport.clone());
        client.connect(&Did::new("did:key:me")).await.unwrap();

        // No pongs ever arrive
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (client, transport) = connected_client().await;

        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(!transport.is_connected());
    }
}
