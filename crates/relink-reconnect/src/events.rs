//! Lifecycle events and the listeners that observe them.
//!
//! Listeners are registered on the [`ContainerBuilder`](crate::ContainerBuilder)
//! and shared by every connection the container opens. A listener may be
//! limited to one connection by name.

use crate::coordinator::Disposition;
use relink_core::{Address, TransportError};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events emitted by a container's connections.
#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    /// A connect attempt is starting.
    AttemptStarted {
        connection: String,
        timestamp: Instant,
        target: Address,
        attempt: u32,
    },
    /// A transport opened.
    Opened {
        connection: String,
        timestamp: Instant,
        target: Address,
        reconnected: bool,
    },
    /// A transport failed or could not be established.
    TransportFailed {
        connection: String,
        timestamp: Instant,
        error: TransportError,
    },
    /// The retry timer was armed.
    RetryScheduled {
        connection: String,
        timestamp: Instant,
        retry: u32,
        delay: Duration,
        target: Address,
    },
    /// The connection reached its terminal state.
    Closed {
        connection: String,
        timestamp: Instant,
        disposition: Disposition,
    },
}

impl ReconnectEvent {
    /// Short name of the event, e.g. `retry_scheduled`.
    pub fn event_type(&self) -> &'static str {
        match self {
            ReconnectEvent::AttemptStarted { .. } => "attempt_started",
            ReconnectEvent::Opened { .. } => "opened",
            ReconnectEvent::TransportFailed { .. } => "transport_failed",
            ReconnectEvent::RetryScheduled { .. } => "retry_scheduled",
            ReconnectEvent::Closed { .. } => "closed",
        }
    }

    /// When the event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            ReconnectEvent::AttemptStarted { timestamp, .. }
            | ReconnectEvent::Opened { timestamp, .. }
            | ReconnectEvent::TransportFailed { timestamp, .. }
            | ReconnectEvent::RetryScheduled { timestamp, .. }
            | ReconnectEvent::Closed { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the connection that emitted the event, e.g. `client/1`.
    pub fn connection(&self) -> &str {
        match self {
            ReconnectEvent::AttemptStarted { connection, .. }
            | ReconnectEvent::Opened { connection, .. }
            | ReconnectEvent::TransportFailed { connection, .. }
            | ReconnectEvent::RetryScheduled { connection, .. }
            | ReconnectEvent::Closed { connection, .. } => connection,
        }
    }
}

type Callback = Arc<dyn Fn(&ReconnectEvent) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    connection: Option<String>,
    callback: Callback,
}

impl Listener {
    fn wants(&self, event: &ReconnectEvent) -> bool {
        self.connection
            .as_deref()
            .map_or(true, |name| name == event.connection())
    }
}

/// The listeners registered on a container.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    listeners: Vec<Listener>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a listener for every connection's events.
    pub(crate) fn add<F>(&mut self, f: F)
    where
        F: Fn(&ReconnectEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Listener {
            connection: None,
            callback: Arc::new(f),
        });
    }

    /// Adds a listener for the events of the connection named `connection`.
    pub(crate) fn add_for<F>(&mut self, connection: impl Into<String>, f: F)
    where
        F: Fn(&ReconnectEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Listener {
            connection: Some(connection.into()),
            callback: Arc::new(f),
        });
    }

    /// Delivers `event` to every interested listener.
    ///
    /// A panicking listener does not keep the others from seeing the event
    /// and never unwinds into the connection's task.
    pub(crate) fn emit(&self, event: &ReconnectEvent) {
        for listener in self.listeners.iter().filter(|l| l.wants(event)) {
            let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (listener.callback)(event);
            }));
            if delivered.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    connection = event.connection(),
                    event = event.event_type(),
                    "event listener panicked"
                );
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
