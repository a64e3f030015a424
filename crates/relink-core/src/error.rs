//! Error types shared across relink.
//!
//! Two families live here:
//!
//! - [`TransportError`]: why an attempt to establish or keep a transport failed.
//!   It always names the address that was attempted, so that applications
//!   watching retries can tell which candidate failed.
//! - [`ConfigError`]: an option value was rejected where it was applied.
//!
//! # Pattern Matching
//!
//! ```rust
//! use relink_core::{Address, TransportError, TransportErrorKind};
//!
//! let error = TransportError::new(
//!     TransportErrorKind::Authentication,
//!     Address::new("broker:5672"),
//!     "PLAIN rejected",
//! );
//!
//! match error.kind() {
//!     TransportErrorKind::Authentication => eprintln!("check credentials: {error}"),
//!     _ => eprintln!("transport failed: {error}"),
//! }
//! assert!(error.to_string().contains("broker:5672"));
//! ```

use crate::address::Address;
use std::fmt;
use std::io;
use thiserror::Error;

/// Broad category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The peer refused the connection.
    Refused,
    /// The host name could not be resolved.
    Resolution,
    /// The peer rejected our credentials or mechanisms.
    Authentication,
    /// No answer within the connect timeout.
    Timeout,
    /// An established transport went away.
    Lost,
    /// Any other I/O failure.
    Io,
}

impl TransportErrorKind {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Refused => "refused",
            TransportErrorKind::Resolution => "resolution",
            TransportErrorKind::Authentication => "authentication",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Lost => "lost",
            TransportErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportErrorKind::Refused => "connection refused",
            TransportErrorKind::Resolution => "name resolution failed",
            TransportErrorKind::Authentication => "authentication failed",
            TransportErrorKind::Timeout => "connect timed out",
            TransportErrorKind::Lost => "connection lost",
            TransportErrorKind::Io => "i/o error",
        };
        f.write_str(text)
    }
}

/// A failure to establish or maintain a transport to one address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} [{address}]: {description}")]
pub struct TransportError {
    kind: TransportErrorKind,
    address: Address,
    description: String,
    redirect: Option<Address>,
}

impl TransportError {
    /// Creates a transport error for the attempted `address`.
    pub fn new(kind: TransportErrorKind, address: Address, description: impl Into<String>) -> Self {
        Self {
            kind,
            address,
            description: description.into(),
            redirect: None,
        }
    }

    /// Classifies an I/O error raised while talking to `address`.
    pub fn from_io(address: Address, error: &io::Error) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
            io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected => TransportErrorKind::Lost,
            _ if error.to_string().contains("lookup") => TransportErrorKind::Resolution,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, address, error.to_string())
    }

    /// Attaches a redirect target announced by the peer.
    ///
    /// The next attempt goes to the redirect target once, ahead of any
    /// configured override or failover address.
    pub fn with_redirect(mut self, target: Address) -> Self {
        self.redirect = Some(target);
        self
    }

    /// The failure category.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// The address that was attempted.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Human readable detail.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Redirect target announced by the peer, if any.
    pub fn redirect(&self) -> Option<&Address> {
        self.redirect.as_ref()
    }

    /// Returns true if the peer rejected authentication.
    pub fn is_authentication(&self) -> bool {
        self.kind == TransportErrorKind::Authentication
    }
}

/// An option value rejected at the point it was applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The address cannot be parsed.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The offending input.
        address: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The backoff multiplier is not a finite value of at least 1.0.
    #[error("reconnect multiplier must be finite and at least 1.0, got {0}")]
    InvalidMultiplier(f64),

    /// The backoff cap is below the initial delay.
    #[error("max delay {max_delay:?} is shorter than initial delay {initial_delay:?}")]
    InvalidDelay {
        /// Configured initial delay.
        initial_delay: std::time::Duration,
        /// Configured cap.
        max_delay: std::time::Duration,
    },

    /// A zero attempt limit would never allow a retry.
    #[error("max attempts must be at least 1")]
    InvalidMaxAttempts,

    /// The jitter factor is outside 0.0 to 1.0.
    #[error("jitter must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),

    /// A SASL mechanism name is malformed.
    #[error("invalid SASL mechanism name {0:?}")]
    InvalidMechanism(String),

    /// The connection already reached a terminal state.
    #[error("connection is closed")]
    ConnectionClosed,
}
