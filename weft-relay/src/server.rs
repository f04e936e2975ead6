//! Relay server core: connection registry, routing, and mailbox drain.
//!
//! `RelayServer` owns all in-memory state (connection registry, metrics,
//! rate limiters) and the durable mailbox. Sessions hand it parsed client
//! frames; outbound frames travel over per-connection channels, which keeps
//! the routing logic independent of any particular socket type.

use crate::config::Config;
use crate::error::StorageError;
use crate::limits::RateLimits;
use crate::mailbox::Mailbox;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use weft_types::{error_code, ClientFrame, DeliveryReceipt, Did, MessageEnvelope, ServerFrame};

/// Identifier of one live connection.
pub type ConnId = u64;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64` — no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted (before registration).
    pub connections_total: AtomicU64,
    /// Total successful registrations.
    pub registers_total: AtomicU64,
    /// Total `send` frames handled successfully.
    pub sends_total: AtomicU64,
    /// Total envelopes handed to at least one live connection.
    pub envelopes_delivered: AtomicU64,
    /// Total envelopes accepted for an offline recipient.
    pub envelopes_queued: AtomicU64,
    /// Total acks processed.
    pub acks_total: AtomicU64,
    /// Total rate limit rejections.
    pub rate_limit_hits: AtomicU64,
    /// Total protocol and storage errors reported to clients.
    pub errors_total: AtomicU64,
}

/// One live connection: its registered DID (if any) and its outbound channel.
struct Connection {
    did: Option<Did>,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

/// Main relay server.
pub struct RelayServer {
    config: Config,
    mailbox: Arc<Mailbox>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    /// All live connections by id.
    connections: DashMap<ConnId, Connection>,
    /// DID → set of live connection ids (multi-device).
    online: DashMap<Did, HashSet<ConnId>>,
    next_conn_id: AtomicU64,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.connections.len())
            .field("online_dids", &self.online.len())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Create a new relay with the given config and mailbox.
    pub fn new(config: Config, mailbox: Mailbox) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            mailbox: Arc::new(mailbox),
            rate_limits,
            metrics: RelayMetrics::default(),
            connections: DashMap::new(),
            online: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the mailbox.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Accept a new connection into the registry.
    ///
    /// Returns the connection id and the receiver end of its outbound frame
    /// channel; the session task forwards received frames onto the socket.
    pub fn attach(&self) -> (ConnId, mpsc::UnboundedReceiver<ServerFrame>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(conn_id, Connection { did: None, tx });
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Connection {} attached", conn_id);
        (conn_id, rx)
    }

    /// Remove a closing connection from the registry.
    ///
    /// If other connections remain for the same DID, the DID stays online;
    /// only when the last one closes does the DID become offline.
    pub fn detach(&self, conn_id: ConnId) {
        let Some((_, conn)) = self.connections.remove(&conn_id) else {
            return;
        };
        if let Some(did) = conn.did {
            let remaining = if let Some(mut set) = self.online.get_mut(&did) {
                set.remove(&conn_id);
                set.len()
            } else {
                0
            };
            if remaining == 0 {
                self.online.remove_if(&did, |_, set| set.is_empty());
            }
            tracing::debug!(
                "Connection {} detached from {} ({} remaining)",
                conn_id,
                did,
                remaining
            );
        } else {
            tracing::debug!("Connection {} detached (unregistered)", conn_id);
        }
    }

    /// Whether a DID has at least one live connection.
    pub fn is_online(&self, did: &Did) -> bool {
        self.online.get(did).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Number of live connections.
    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    /// Number of DIDs with at least one live connection.
    pub fn online_dids(&self) -> usize {
        self.online.len()
    }

    /// Handle one parsed client frame.
    ///
    /// Frames from a single connection are handled serially by its session
    /// task, so a `register` fully drains the mailbox before the same
    /// connection's next frame is processed.
    pub async fn handle_frame(&self, conn_id: ConnId, frame: ClientFrame) {
        match frame {
            ClientFrame::Register { did } => self.handle_register(conn_id, did).await,
            ClientFrame::Send { envelope } => self.handle_send(conn_id, envelope).await,
            ClientFrame::Ack { message_id } => self.handle_ack(conn_id, &message_id).await,
            ClientFrame::Ping => {
                self.send_to(conn_id, ServerFrame::Pong);
            }
        }
    }

    /// Report a malformed inbound frame on a connection.
    pub fn reject_invalid(&self, conn_id: ConnId, reason: &str) {
        self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        self.send_to(
            conn_id,
            ServerFrame::error(error_code::INVALID_MESSAGE, reason),
        );
    }

    async fn handle_register(&self, conn_id: ConnId, did: Did) {
        // Re-registering under a different DID moves the connection; an
        // existing connection for the same DID is never evicted. The
        // connections guard is released before touching the online map
        // (fan_out nests the two in the other order).
        let previous = {
            let Some(mut conn) = self.connections.get_mut(&conn_id) else {
                return;
            };
            conn.did.replace(did.clone())
        };
        if let Some(previous) = previous {
            if previous != did {
                if let Some(mut set) = self.online.get_mut(&previous) {
                    set.remove(&conn_id);
                }
                self.online.remove_if(&previous, |_, set| set.is_empty());
            }
        }
        self.online.entry(did.clone()).or_default().insert(conn_id);
        self.metrics.registers_total.fetch_add(1, Ordering::Relaxed);

        self.send_to(conn_id, ServerFrame::Registered { did: did.clone() });

        // Drain the mailbox: everything unacknowledged is redelivered here,
        // including envelopes handed to a now-dead connection.
        match self.mailbox.dequeue(&did).await {
            Ok(envelopes) => {
                let count = envelopes.len();
                for envelope in envelopes {
                    self.send_to(conn_id, ServerFrame::Message { envelope });
                }
                tracing::info!("Registered {} on connection {} ({} queued envelopes drained)",
                    did, conn_id, count);
            }
            Err(e) => {
                tracing::error!("Mailbox drain for {} failed: {}", did, e);
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                self.send_to(
                    conn_id,
                    ServerFrame::error(error_code::INTERNAL, "mailbox drain failed"),
                );
            }
        }
    }

    async fn handle_send(&self, conn_id: ConnId, envelope: MessageEnvelope) {
        let Some(sender) = self.registered_did(conn_id) else {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            self.send_to(
                conn_id,
                ServerFrame::error(error_code::NOT_REGISTERED, "register before sending"),
            );
            return;
        };

        if envelope.to_did.is_empty() {
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            self.send_to(
                conn_id,
                ServerFrame::error(error_code::MISSING_RECIPIENT, "envelope has no recipient"),
            );
            return;
        }

        if self.rate_limits.check_global().is_err()
            || self.rate_limits.check_message(sender.as_str()).is_err()
        {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            self.send_to(
                conn_id,
                ServerFrame::error(error_code::RATE_LIMITED, "message quota exceeded"),
            );
            return;
        }

        let recipient = envelope.to_did.clone();
        let message_id = envelope.id.clone();

        // Always enqueue first: queued and delivered-but-unacknowledged are
        // the same storage state, removed only by an ack or a later drain.
        if let Err(e) = self.mailbox.enqueue(&recipient, &envelope).await {
            tracing::error!("Enqueue for {} failed: {}", recipient, e);
            self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            self.send_to(
                conn_id,
                ServerFrame::error(error_code::INTERNAL, storage_failure_message(&e)),
            );
            return;
        }

        // Fan out to every live connection of the recipient DID.
        let delivered = self.fan_out(&recipient, &envelope);

        let receipt = if delivered > 0 {
            self.metrics.envelopes_delivered.fetch_add(1, Ordering::Relaxed);
            DeliveryReceipt::delivered(&message_id)
        } else {
            self.metrics.envelopes_queued.fetch_add(1, Ordering::Relaxed);
            DeliveryReceipt::accepted(&message_id)
        };
        self.metrics.sends_total.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            "Routed {} from {} to {} ({} live connections)",
            message_id,
            sender,
            recipient,
            delivered
        );

        self.send_to(conn_id, ServerFrame::Receipt { receipt });
    }

    async fn handle_ack(&self, conn_id: ConnId, message_id: &str) {
        // Acknowledgment is per-DID: any device registered under the
        // recipient DID may ack. An unregistered connection has no DID to
        // resolve a mailbox, so its acks are dropped.
        let Some(did) = self.registered_did(conn_id) else {
            tracing::debug!("Ack from unregistered connection {} ignored", conn_id);
            return;
        };

        match self.mailbox.acknowledge(&did, message_id).await {
            Ok(removed) => {
                self.metrics.acks_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Ack {} for {} ({})",
                    message_id,
                    did,
                    if removed { "removed" } else { "no matching row" }
                );
            }
            Err(e) => {
                tracing::error!("Ack {} for {} failed: {}", message_id, did, e);
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Push an envelope to every live connection of a DID.
    ///
    /// Returns how many connections it was handed to. A connection whose
    /// channel is closed counts as dead; the envelope stays in the mailbox
    /// either way.
    fn fan_out(&self, recipient: &Did, envelope: &MessageEnvelope) -> usize {
        let Some(conn_ids) = self.online.get(recipient) else {
            return 0;
        };
        let mut delivered = 0;
        for conn_id in conn_ids.iter() {
            if let Some(conn) = self.connections.get(conn_id) {
                let frame = ServerFrame::Message {
                    envelope: envelope.clone(),
                };
                if conn.tx.send(frame).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn registered_did(&self, conn_id: ConnId) -> Option<Did> {
        self.connections.get(&conn_id).and_then(|c| c.did.clone())
    }

    fn send_to(&self, conn_id: ConnId, frame: ServerFrame) {
        if let Some(conn) = self.connections.get(&conn_id) {
            let _ = conn.tx.send(frame);
        }
    }
}

fn storage_failure_message(e: &StorageError) -> String {
    format!("mailbox unavailable: {e}")
}
