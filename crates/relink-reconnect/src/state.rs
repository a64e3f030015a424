//! Connection state tracking for reconnection logic.

use relink_core::Address;

/// Where a logical connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Created, not yet started.
    Idle,
    /// A transport is being established.
    Connecting,
    /// The transport is up.
    Open,
    /// The transport-error callback is running.
    Reporting,
    /// Waiting for the retry timer.
    PendingRetry,
    /// Closed by the application or the container.
    Closed,
    /// Gave up.
    Failed,
}

impl Phase {
    /// Returns true for `Closed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }

    /// Short label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::Reporting => "reporting",
            Phase::PendingRetry => "pending_retry",
            Phase::Closed => "closed",
            Phase::Failed => "failed",
        }
    }
}

/// An address the next attempt must use instead of the failover rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOverride {
    /// Used for exactly one attempt.
    OneShot(Address),
    /// Used for every attempt until replaced or cleared.
    Sticky(Address),
}

impl PendingOverride {
    /// The override target.
    pub fn address(&self) -> &Address {
        match self {
            PendingOverride::OneShot(address) | PendingOverride::Sticky(address) => address,
        }
    }
}

/// Mutable per-connection bookkeeping owned by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub(crate) attempt_count: u32,
    pub(crate) has_connected_before: bool,
    pub(crate) failover_cursor: usize,
    pub(crate) one_shot: Option<Address>,
    pub(crate) sticky: Option<Address>,
    pub(crate) aborted: bool,
}

impl ConnectionState {
    /// Fresh state for a new logical connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries made since the last successful open.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Returns true once the connection has replaced a failed transport.
    pub fn reconnected(&self) -> bool {
        self.has_connected_before
    }

    /// Position in the `[base] ++ failover` rotation.
    pub fn failover_cursor(&self) -> usize {
        self.failover_cursor
    }

    /// The override the next attempt would use, if any. A one-shot override
    /// shadows a sticky one.
    pub fn pending_override(&self) -> Option<PendingOverride> {
        match (&self.one_shot, &self.sticky) {
            (Some(address), _) => Some(PendingOverride::OneShot(address.clone())),
            (None, Some(address)) => Some(PendingOverride::Sticky(address.clone())),
            (None, None) => None,
        }
    }

    /// Returns true if the application closed the connection from its
    /// transport-error callback.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn set_override(&mut self, target: PendingOverride) {
        match target {
            PendingOverride::OneShot(address) => self.one_shot = Some(address),
            PendingOverride::Sticky(address) => self.sticky = Some(address),
        }
    }
}
