//! Prometheus metrics endpoint.

use crate::server::RelayServer;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<RelayServer>>) -> impl IntoResponse {
    let m = relay.metrics();

    // Gauges — current state
    let connections = relay.total_connections();
    let online_dids = relay.online_dids();
    let queued = relay.mailbox().count(None).await.unwrap_or(0);

    // Counters — monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let registers = m.registers_total.load(Ordering::Relaxed);
    let sends = m.sends_total.load(Ordering::Relaxed);
    let delivered = m.envelopes_delivered.load(Ordering::Relaxed);
    let queued_total = m.envelopes_queued.load(Ordering::Relaxed);
    let acks = m.acks_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP weft_relay_connections_active Number of live connections
# TYPE weft_relay_connections_active gauge
weft_relay_connections_active {connections}

# HELP weft_relay_online_dids Number of DIDs with at least one live connection
# TYPE weft_relay_online_dids gauge
weft_relay_online_dids {online_dids}

# HELP weft_relay_mailbox_depth Envelopes currently queued in the mailbox
# TYPE weft_relay_mailbox_depth gauge
weft_relay_mailbox_depth {queued}

# HELP weft_relay_info Server information
# TYPE weft_relay_info gauge
weft_relay_info{{version="{version}"}} 1

# HELP weft_relay_connections_total Total connections accepted
# TYPE weft_relay_connections_total counter
weft_relay_connections_total {conns_total}

# HELP weft_relay_registers_total Total successful registrations
# TYPE weft_relay_registers_total counter
weft_relay_registers_total {registers}

# HELP weft_relay_sends_total Total send frames handled
# TYPE weft_relay_sends_total counter
weft_relay_sends_total {sends}

# HELP weft_relay_envelopes_delivered_total Envelopes handed to a live connection
# TYPE weft_relay_envelopes_delivered_total counter
weft_relay_envelopes_delivered_total {delivered}

# HELP weft_relay_envelopes_queued_total Envelopes accepted for offline recipients
# TYPE weft_relay_envelopes_queued_total counter
weft_relay_envelopes_queued_total {queued_total}

# HELP weft_relay_acks_total Total acknowledgments processed
# TYPE weft_relay_acks_total counter
weft_relay_acks_total {acks}

# HELP weft_relay_rate_limit_hits_total Total rate limit rejections
# TYPE weft_relay_rate_limit_hits_total counter
weft_relay_rate_limit_hits_total {rate_limits}

# HELP weft_relay_errors_total Total protocol and storage errors
# TYPE weft_relay_errors_total counter
weft_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
