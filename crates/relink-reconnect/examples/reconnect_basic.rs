//! Basic reconnection example with failover and exponential backoff.
//!
//! Run with: cargo run --example reconnect_basic -p relink-reconnect
//!
//! A local listener accepts the first connection and immediately hangs up.
//! The client fails over to an address nobody listens on, comes back to the
//! listener, and closes the connection once it has reconnected.

use relink_reconnect::{
    Connection, ConnectionOptions, Container, MessagingHandler, ReconnectOptions, Transport,
};
use std::time::Duration;
use tokio::net::TcpListener;

struct Client;

impl MessagingHandler for Client {
    fn on_connection_open(&mut self, connection: &mut Connection<'_>) {
        println!(
            "open on {} (reconnected: {})",
            connection.target(),
            connection.reconnected()
        );
        if connection.reconnected() {
            connection.close();
        }
    }

    fn on_transport_error(&mut self, transport: &mut Transport<'_>) {
        if let Some(error) = transport.error() {
            println!("transport error: {error}");
        }
    }

    fn on_transport_close(&mut self, transport: &mut Transport<'_>) {
        if let Some(disposition) = transport.disposition() {
            println!("closed: {disposition}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("relink - Basic Example\n");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut accepted = 0;
        while let Ok((stream, _)) = listener.accept().await {
            accepted += 1;
            if accepted == 1 {
                drop(stream);
            } else {
                // Keep the second connection open until the client closes it.
                tokio::spawn(async move {
                    let _stream = stream;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                });
            }
        }
    });

    let container = Container::builder()
        .id("example")
        .on_attempt(|target, attempt| println!("attempt {attempt} -> {target}"))
        .on_retry(|retry, delay, target| println!("retry {retry} -> {target} in {delay:?}"))
        .build();

    let options = ConnectionOptions::builder()
        .reconnect(
            ReconnectOptions::new()
                .delay(Duration::from_millis(50))
                .multiplier(2.0)
                .max_delay(Duration::from_secs(1))
                .max_attempts(10),
        )
        .failover_urls(["127.0.0.1:1"])
        .connect_timeout(Duration::from_secs(1))
        .build();

    println!("Configuration:");
    println!("  Base: 127.0.0.1:{port}");
    println!("  Failover: 127.0.0.1:1");
    println!("  Backoff: 50ms doubling, capped at 1s, 10 retries\n");

    container.connect(format!("127.0.0.1:{port}"), options, Client)?;
    container.run().await;

    Ok(())
}
