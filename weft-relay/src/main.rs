//! weft-relay binary entry point.
//!
//! Usage:
//! ```bash
//! weft-relay --config relay.toml
//! ```

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use weft_relay::config::Config;
use weft_relay::mailbox::Mailbox;
use weft_relay::server::RelayServer;
use weft_relay::{http, session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        tracing::info!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        Config::default()
    };

    let mailbox = Mailbox::open(&config.storage.database)
        .await
        .context("opening mailbox database")?;
    let queued = mailbox.count(None).await.unwrap_or(0);
    tracing::info!("Mailbox ready ({} queued envelopes)", queued);

    let relay = Arc::new(RelayServer::new(config.clone(), mailbox));

    if config.http.enabled {
        http::health::init_start_time();
        let http_relay = relay.clone();
        let bind = config.http.bind_address.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(http_relay, &bind).await {
                tracing::error!("HTTP server failed: {}", e);
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    tracing::info!(
        "weft-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        config.server.bind_address
    );

    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", addr);
        tokio::spawn(session::run_session(relay.clone(), stream));
    }
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
