//! Connects to an echo WebSocket server, sends a few envelopes, and logs what comes back.
//!
//! This demo shows how to:
//! 1. Watch the connection status (the current value arrives immediately)
//! 2. Send envelopes once connected
//! 3. Read echoed frames as typed envelopes
//! 4. Close the connection so no reconnect follows
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,socket_relay=debug cargo run --example echo
//! ```
//!
//! Use a different endpoint:
//! ```sh
//! ECHO_URL=ws://127.0.0.1:9001 RUST_LOG=info cargo run --example echo
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use serde_json::json;
use socket_relay::ws::config::Config;
use socket_relay::ws::{ConnectionManager, MessageEnvelope};
use tokio::time::timeout;
use tracing::{error, info, warn};

const DEFAULT_ECHO_URL: &str = "wss://echo.websocket.org";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::var("ECHO_URL").unwrap_or_else(|_| DEFAULT_ECHO_URL.to_owned());

    let manager = ConnectionManager::new(Config::default())?;
    let mut status = manager.status();
    let mut messages = Box::pin(manager.messages().into_stream());

    manager.connect(url.as_str());

    let connected = timeout(Duration::from_secs(10), async {
        while let Some(connected) = status.recv().await {
            info!(connected, "status");
            if connected {
                return true;
            }
        }
        false
    })
    .await;

    if !matches!(connected, Ok(true)) {
        error!(%url, "could not connect");
        manager.close();
        return Ok(());
    }

    let outgoing = [
        MessageEnvelope::new("greeting", json!({ "text": "hello" })),
        MessageEnvelope::new("ticker", json!({ "symbol": "BTC-USD", "price": 100 })),
    ];
    for envelope in &outgoing {
        manager.send(envelope)?;
    }

    let mut received = 0;
    while let Ok(Some(result)) = timeout(Duration::from_secs(5), messages.next()).await {
        match result {
            Ok(envelope) => {
                info!(
                    msg_type = envelope.msg_type(),
                    payload = %envelope.payload(),
                    "received"
                );
                received += 1;
                if received >= outgoing.len() {
                    break;
                }
            }
            Err(e) => warn!(error = %e),
        }
    }

    manager.close();
    info!(received, state = ?manager.state(), "done");

    Ok(())
}
