//! Reconnection coordinator for messaging client connections.
//!
//! This crate keeps a logical connection alive across transport failures. On
//! every failure it lets the application react, picks the next address and
//! waits according to a backoff policy before trying again.
//!
//! # Features
//!
//! - **Layered options**: immutable [`ConnectionOptions`] values merged with
//!   [`ConnectionOptions::overlay`]; updates issued from callbacks take effect
//!   from the next attempt
//! - **Address selection**: a sticky override address beats the round-robin
//!   over the base address and the failover list
//! - **Backoff**: `initial_delay * multiplier^(n-1)`, capped, with an optional
//!   attempt limit, from [`relink_retry`]
//! - **Explicit state machine**: [`Coordinator`] maps `(phase, event)` to
//!   effects and can be driven without a network
//! - **Event system**: attempts, opens, failures, retries and closes reach
//!   listeners registered on the [`ContainerBuilder`]
//!
//! # Example
//!
//! ```rust,no_run
//! use relink_reconnect::{
//!     Connection, ConnectionOptions, Container, MessagingHandler, ReconnectOptions, Transport,
//! };
//! use std::time::Duration;
//!
//! struct Client;
//!
//! impl MessagingHandler for Client {
//!     fn on_connection_open(&mut self, connection: &mut Connection<'_>) {
//!         println!("open (reconnected: {})", connection.reconnected());
//!     }
//!
//!     fn on_transport_error(&mut self, transport: &mut Transport<'_>) {
//!         if let Some(error) = transport.error() {
//!             if error.is_authentication() {
//!                 transport.connection().close();
//!             }
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Container::builder()
//!     .on_retry(|retry, delay, target| println!("retry {retry} to {target} in {delay:?}"))
//!     .build();
//!
//! let options = ConnectionOptions::builder()
//!     .reconnect(
//!         ReconnectOptions::new()
//!             .delay(Duration::from_millis(100))
//!             .max_delay(Duration::from_secs(5)),
//!     )
//!     .failover_urls(["broker-b:5672"])
//!     .build();
//!
//! container.connect("broker-a:5672", options, Client)?;
//! container.run().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `tracing`: structured logs for attempts, failures, retries and closes
//! - `metrics`: `relink_*` counters and the retry delay histogram

mod container;
mod coordinator;
mod events;
mod handler;
pub mod options;
pub mod sequencer;
mod state;
mod transport;

pub use container::{ConnectionHandle, Container, ContainerBuilder, ContainerHandle};
pub use coordinator::{
    Command, Coordinator, Disposition, Effect, Event, FailureReason, Notification,
};
pub use events::ReconnectEvent;
pub use handler::{Connection, MessagingHandler, Transport};
pub use options::{
    overlay, ConnectionOptions, ConnectionOptionsBuilder, Field, ReconnectOptions,
    ReconnectPolicy,
};
pub use state::{ConnectionState, PendingOverride, Phase};
pub use transport::{share, ConnectRequest, Link, SharedConnector, TcpConnector};

// Re-export the retry building blocks for convenience
pub use relink_retry::{
    BackoffPolicy, ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction,
    RetriesExhausted,
};
