//! The reconnection state machine.
//!
//! [`Coordinator::handle`] consumes one [`Event`] and returns the [`Effect`]s
//! the caller must carry out, in order. It performs no I/O and never sleeps,
//! so every transition can be tested without a network or a runtime.
//!
//! Each `Effect::Notify` runs one application callback. Whatever the callback
//! asked for comes back as `Event::CallbackReturned`, which is how a
//! transport-error callback gets to abort, redirect or reconfigure the next
//! attempt before the coordinator decides what happens next.
//!
//! An options update that is only invalid once merged with the options in
//! force is not applied; it comes back as `Effect::RejectOptions`.
//!
//! ```rust
//! use relink_core::{Address, TransportError, TransportErrorKind};
//! use relink_reconnect::{ConnectionOptions, Coordinator, Effect, Event, ReconnectOptions};
//!
//! let options = ConnectionOptions::builder()
//!     .reconnect(ReconnectOptions::new())
//!     .failover_urls(["b"])
//!     .build();
//! let mut coordinator = Coordinator::new(Address::new("a"), options);
//!
//! assert!(matches!(&coordinator.handle(Event::Start)[..], [Effect::Connect { .. }]));
//!
//! let refused = TransportError::new(TransportErrorKind::Refused, Address::new("a"), "refused");
//! coordinator.handle(Event::TransportFailed(refused));
//! let effects = coordinator.handle(Event::CallbackReturned(Vec::new()));
//! match &effects[..] {
//!     [Effect::ScheduleRetry { target, .. }] => assert_eq!(target.as_str(), "b"),
//!     other => panic!("unexpected effects: {other:?}"),
//! }
//! ```

use crate::options::ConnectionOptions;
use crate::sequencer;
use crate::state::{ConnectionState, PendingOverride, Phase};
use relink_core::{Address, ConfigError, TransportError, TransportErrorKind};
use relink_retry::{plan, RetriesExhausted};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Something the application asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Close the connection. From a transport-error callback this aborts
    /// reconnection.
    Close,
    /// Layer these options on top of the current ones.
    UpdateOptions(ConnectionOptions),
    /// Connect to `address` next, once or until replaced.
    Redirect {
        /// The target.
        address: Address,
        /// Keep using it for every later attempt.
        sticky: bool,
    },
}

/// Why a connection gave up.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The retry limit was reached.
    #[error("{exhausted}; last error: {last_error}")]
    RetriesExhausted {
        /// The limit that was hit.
        exhausted: RetriesExhausted,
        /// The failure that would have needed one more retry.
        last_error: TransportError,
    },
    /// The transport failed and reconnection is not enabled.
    #[error("reconnect disabled: {0}")]
    ReconnectDisabled(TransportError),
}

impl FailureReason {
    /// The transport failure that ended the connection.
    pub fn error(&self) -> &TransportError {
        match self {
            FailureReason::RetriesExhausted { last_error, .. } => last_error,
            FailureReason::ReconnectDisabled(error) => error,
        }
    }
}

/// How a connection's transport lifetime ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// The application closed the connection.
    Clean,
    /// The application closed the connection from its transport-error
    /// callback, cancelling reconnection.
    Aborted,
    /// The container stopped.
    Stopped,
    /// No further attempt will be made.
    Failed(FailureReason),
}

impl Disposition {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Clean => "clean",
            Disposition::Aborted => "aborted",
            Disposition::Stopped => "stopped",
            Disposition::Failed(_) => "failed",
        }
    }

    /// Returns true for `Failed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Disposition::Failed(_))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// An application callback to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `on_connection_open`.
    ConnectionOpen {
        /// The transport replaced a failed one.
        reconnected: bool,
    },
    /// `on_transport_error`: a retryable failure.
    TransportError(TransportError),
    /// `on_connection_error`: a failure with reconnection disabled.
    ConnectionError(TransportError),
    /// `on_connection_close`: the application closed the connection.
    ConnectionClose,
    /// `on_transport_close`: the final notification.
    TransportClose(Disposition),
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin the first attempt.
    Start,
    /// The pending attempt produced a transport.
    Connected,
    /// The pending attempt or the open transport failed.
    TransportFailed(TransportError),
    /// The callback for the last `Notify` returned with these commands.
    CallbackReturned(Vec<Command>),
    /// The retry timer fired.
    RetryDue,
    /// A command from outside any callback.
    Command(Command),
    /// The container is stopping.
    Stop,
}

/// Work the caller performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Establish a transport to `target`.
    Connect {
        /// Where to connect.
        target: Address,
        /// Connect attempts over the connection's lifetime, 1-indexed.
        attempt: u32,
    },
    /// Run an application callback.
    Notify(Notification),
    /// Arm the retry timer.
    ScheduleRetry {
        /// How long to wait.
        delay: Duration,
        /// Retry number since the last open, 1-indexed.
        retry: u32,
        /// Where the retry will connect.
        target: Address,
    },
    /// Disarm the retry timer.
    CancelRetry,
    /// Drop the pending attempt or the open transport.
    Disconnect,
    /// An options update was not applied; report it to whoever sent it.
    RejectOptions(ConfigError),
}

/// Drives one logical connection through failures and retries.
#[derive(Debug, Clone)]
pub struct Coordinator {
    base: Address,
    options: ConnectionOptions,
    state: ConnectionState,
    phase: Phase,
    target: Option<Address>,
    last_error: Option<TransportError>,
    deferred: Vec<Command>,
    connects: u32,
}

impl Coordinator {
    /// A coordinator for a connection to `base`, not yet started.
    pub fn new(base: Address, options: ConnectionOptions) -> Self {
        Self {
            base,
            options,
            state: ConnectionState::new(),
            phase: Phase::Idle,
            target: None,
            last_error: None,
            deferred: Vec::new(),
            connects: 0,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Retry bookkeeping.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The options in force.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The address given at connect time.
    pub fn base(&self) -> &Address {
        &self.base
    }

    /// The address of the current or next attempt.
    pub fn target(&self) -> Option<&Address> {
        self.target.as_ref()
    }

    /// The most recent transport failure.
    pub fn last_error(&self) -> Option<&TransportError> {
        self.last_error.as_ref()
    }

    /// Connect attempts made so far.
    pub fn connects(&self) -> u32 {
        self.connects
    }

    /// Advances the state machine.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        if self.phase.is_terminal() {
            return Vec::new();
        }

        match event {
            Event::Start => self.on_start(),
            Event::Connected => self.on_connected(),
            Event::TransportFailed(error) => self.on_transport_failed(error),
            Event::CallbackReturned(commands) => self.on_callback_returned(commands),
            Event::RetryDue => self.on_retry_due(),
            Event::Command(command) => self.on_command(command),
            Event::Stop => self.on_stop(),
        }
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Idle {
            return Vec::new();
        }
        let target = sequencer::first(&mut self.state, &self.base);
        self.connect(target)
    }

    fn on_connected(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Connecting {
            return Vec::new();
        }
        self.transition(Phase::Open);
        self.state.attempt_count = 0;

        #[cfg(feature = "tracing")]
        tracing::info!(
            connection = %self.base,
            address = ?self.target.as_ref().map(ToString::to_string),
            reconnected = self.state.has_connected_before,
            "connection open"
        );

        vec![Effect::Notify(Notification::ConnectionOpen {
            reconnected: self.state.has_connected_before,
        })]
    }

    fn on_transport_failed(&mut self, error: TransportError) -> Vec<Effect> {
        if !matches!(self.phase, Phase::Connecting | Phase::Open) {
            return Vec::new();
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(connection = %self.base, error = %error, "transport failed");

        if !self.options.reconnect_enabled() {
            return self.fail_without_reconnect(error);
        }

        if let Some(redirect) = error.redirect() {
            self.state
                .set_override(PendingOverride::OneShot(redirect.clone()));
        }
        self.last_error = Some(error.clone());
        self.transition(Phase::Reporting);
        vec![Effect::Notify(Notification::TransportError(error))]
    }

    fn on_callback_returned(&mut self, commands: Vec<Command>) -> Vec<Effect> {
        if self.phase != Phase::Reporting {
            let mut effects = Vec::new();
            for command in commands {
                effects.extend(self.on_command(command));
            }
            return effects;
        }

        let mut effects = Vec::new();
        let deferred = std::mem::take(&mut self.deferred);
        for command in deferred.into_iter().chain(commands) {
            if let Err(error) = self.apply(command) {
                effects.push(Effect::RejectOptions(error));
            }
        }
        self.state.has_connected_before = true;
        effects.extend(self.plan_retry());
        effects
    }

    fn plan_retry(&mut self) -> Vec<Effect> {
        if self.state.aborted {
            #[cfg(feature = "tracing")]
            tracing::info!(connection = %self.base, "reconnect aborted by application");
            return self.finish(Phase::Closed, Disposition::Aborted);
        }

        let Some(policy) = self.options.reconnect_policy() else {
            let error = self.take_last_error();
            return self.fail_without_reconnect(error);
        };

        self.state.attempt_count = self.state.attempt_count.saturating_add(1);
        let retry = self.state.attempt_count;

        match plan(&policy.backoff, retry) {
            Ok(delay) => {
                let target = sequencer::next(&mut self.state, &self.base, &self.options);
                self.target = Some(target.clone());
                self.transition(Phase::PendingRetry);

                #[cfg(feature = "tracing")]
                tracing::debug!(
                    connection = %self.base,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    address = %target,
                    "retry scheduled"
                );

                vec![Effect::ScheduleRetry {
                    delay,
                    retry,
                    target,
                }]
            }
            Err(exhausted) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(connection = %self.base, %exhausted, "giving up");

                let last_error = self.take_last_error();
                self.finish(
                    Phase::Failed,
                    Disposition::Failed(FailureReason::RetriesExhausted {
                        exhausted,
                        last_error,
                    }),
                )
            }
        }
    }

    fn on_retry_due(&mut self) -> Vec<Effect> {
        if self.phase != Phase::PendingRetry {
            return Vec::new();
        }
        let target = self.target.take().unwrap_or_else(|| self.base.clone());
        self.connect(target)
    }

    fn on_command(&mut self, command: Command) -> Vec<Effect> {
        if self.phase == Phase::Reporting {
            self.deferred.push(command);
            return Vec::new();
        }

        match command {
            Command::Close => self.close(),
            other => match self.apply(other) {
                Ok(()) => Vec::new(),
                Err(error) => vec![Effect::RejectOptions(error)],
            },
        }
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        let mut effects = match self.phase {
            Phase::Connecting | Phase::Open => vec![Effect::Disconnect],
            Phase::PendingRetry => vec![Effect::CancelRetry],
            _ => Vec::new(),
        };

        #[cfg(feature = "tracing")]
        tracing::info!(connection = %self.base, phase = self.phase.as_str(), "stopped");

        effects.extend(self.finish(Phase::Closed, Disposition::Stopped));
        effects
    }

    fn close(&mut self) -> Vec<Effect> {
        let mut effects = match self.phase {
            Phase::Connecting | Phase::Open => vec![Effect::Disconnect],
            Phase::PendingRetry => vec![Effect::CancelRetry],
            _ => Vec::new(),
        };
        effects.push(Effect::Notify(Notification::ConnectionClose));
        effects.extend(self.finish(Phase::Closed, Disposition::Clean));
        effects
    }

    fn apply(&mut self, command: Command) -> Result<(), ConfigError> {
        match command {
            Command::Close => self.state.aborted = true,
            Command::UpdateOptions(update) => {
                let merged = self.options.overlay(&update);
                if let Err(error) = merged.validate_effective() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        connection = %self.base,
                        error = %error,
                        "rejecting option update"
                    );
                    return Err(error);
                }
                if update.touches_reconnect_url() {
                    self.state.sticky = None;
                }
                self.options = merged;
            }
            Command::Redirect { address, sticky } => {
                let target = if sticky {
                    PendingOverride::Sticky(address)
                } else {
                    PendingOverride::OneShot(address)
                };
                self.state.set_override(target);
            }
        }
        Ok(())
    }

    fn connect(&mut self, target: Address) -> Vec<Effect> {
        self.connects = self.connects.saturating_add(1);
        self.target = Some(target.clone());
        self.transition(Phase::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            connection = %self.base,
            address = %target,
            attempt = self.connects,
            "connecting"
        );

        vec![Effect::Connect {
            target,
            attempt: self.connects,
        }]
    }

    fn fail_without_reconnect(&mut self, error: TransportError) -> Vec<Effect> {
        let mut effects = vec![Effect::Notify(Notification::ConnectionError(error.clone()))];
        effects.extend(self.finish(
            Phase::Failed,
            Disposition::Failed(FailureReason::ReconnectDisabled(error)),
        ));
        effects
    }

    fn finish(&mut self, phase: Phase, disposition: Disposition) -> Vec<Effect> {
        self.transition(phase);
        self.deferred.clear();
        vec![Effect::Notify(Notification::TransportClose(disposition))]
    }

    fn take_last_error(&mut self) -> TransportError {
        self.last_error.clone().unwrap_or_else(|| {
            TransportError::new(
                TransportErrorKind::Lost,
                self.base.clone(),
                "transport failed",
            )
        })
    }

    fn transition(&mut self, to: Phase) {
        #[cfg(feature = "tracing")]
        if self.phase != to {
            tracing::trace!(
                connection = %self.base,
                from = self.phase.as_str(),
                to = to.as_str(),
                "phase transition"
            );
        }
        self.phase = to;
    }
}
