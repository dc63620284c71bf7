//! Subscribe to two queues and acknowledge every message, reconnecting with
//! backoff whenever the broker goes away.
//!
//! ```text
//! cargo run --example consumer -- [config.json]
//! ```

use std::error::Error;
use std::sync::{Arc, Weak};
use std::time::Duration;

use stomp_client::{ClientConfig, Headers, StompClient};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DESTINATIONS: [&str; 2] = ["/queue/demo", "/queue/audit"];
const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn load_config() -> Result<ClientConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(ClientConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => Ok(ClientConfig::default().credentials("guest", "guest")),
    }
}

fn subscribe(client: &Weak<StompClient>) {
    let Some(client) = client.upgrade() else {
        return;
    };
    let acker = Arc::downgrade(&client);
    let result = client.subscribe_with_handler(
        DESTINATIONS,
        Headers::from([("ack", "client")]),
        move |body: &[u8], headers: &Headers| {
            info!(
                "Received {}: {}",
                headers.get("message-id").unwrap_or_default(),
                String::from_utf8_lossy(body)
            );
            if let Some(client) = acker.upgrade() {
                if let Err(e) = client.ack(headers) {
                    warn!("ack failed: {}", e);
                }
            }
        },
    );
    if let Err(e) = result {
        error!("subscribe failed: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let client = Arc::new(StompClient::new(load_config()?));

    let weak = Arc::downgrade(&client);
    client.on_connected(move || subscribe(&weak));
    client.on_error(|e| warn!("Broker error: {:?}", e));

    let (closed_tx, mut closed) = mpsc::unbounded_channel();
    client.on_disconnected(move |cause| {
        let _ = closed_tx.send(cause.map(ToString::to_string));
    });

    let mut backoff = Duration::from_millis(500);
    client.connect()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                if let Err(e) = client.unsubscribe(DESTINATIONS, Headers::new()) {
                    warn!("unsubscribe failed: {}", e);
                }
                let _ = client.disconnect();
                break;
            }
            Some(cause) = closed.recv() => {
                match cause {
                    Some(cause) => warn!("Connection lost: {}", cause),
                    None => info!("Connection closed"),
                }
                info!("Reconnecting in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                client.connect()?;
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
