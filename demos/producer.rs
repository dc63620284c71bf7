//! Publish a handful of messages inside a transaction and wait for the
//! broker's receipts.
//!
//! ```text
//! cargo run --example producer -- [host] [port]
//! ```

use std::error::Error;
use std::time::Duration;

use stomp_client::{ClientConfig, Headers, StompClient, DEFAULT_HOST, DEFAULT_PORT};
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => DEFAULT_PORT,
    };

    let client = StompClient::new(ClientConfig::new(host, port).credentials("guest", "guest"));

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    client.on_connected(move || {
        let _ = connected_tx.send(());
    });
    let (receipt_tx, mut receipts) = mpsc::unbounded_channel();
    client.on_receipt(move |id| {
        let _ = receipt_tx.send(id.to_string());
    });

    client.connect()?;
    tokio::time::timeout(Duration::from_secs(10), connected.recv())
        .await?
        .ok_or("client dropped before connecting")?;
    info!("Connected, session {:?}", client.session());

    let transaction = client.begin()?;
    let mut pending = Vec::new();
    for n in 0..5 {
        let headers = Headers::from([
            ("destination", "/queue/demo".to_string()),
            ("transaction", transaction.clone()),
            ("body", format!("message {n}")),
        ]);
        let frame = client.send(headers, true)?;
        pending.extend(frame.header("receipt").map(str::to_owned));
    }
    client.commit(&transaction)?;

    while !pending.is_empty() {
        let id = tokio::time::timeout(Duration::from_secs(10), receipts.recv())
            .await?
            .ok_or("receipt channel closed")?;
        pending.retain(|p| *p != id);
        info!("Receipt {} ({} outstanding)", id, pending.len());
    }

    client.disconnect()?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
