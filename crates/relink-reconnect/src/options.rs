//! Layered connection options.
//!
//! Every option is a [`Field`]: left to inherit from the layer below, set to a
//! value, or explicitly unset. Layers are immutable; [`ConnectionOptions::overlay`]
//! returns a new value where each field of the update wins unless it inherits.
//!
//! ```rust
//! use relink_reconnect::{ConnectionOptions, ReconnectOptions};
//! use std::time::Duration;
//!
//! let base = ConnectionOptions::builder()
//!     .user("user0")
//!     .reconnect(ReconnectOptions::new().delay(Duration::from_millis(5)))
//!     .build();
//!
//! // Only the attempt limit changes; the delay and the user are inherited.
//! let update = ConnectionOptions::builder()
//!     .reconnect(ReconnectOptions::new().max_attempts(3))
//!     .build();
//! let merged = base.overlay(&update);
//!
//! let policy = merged.reconnect_policy().unwrap();
//! assert_eq!(policy.backoff.initial_delay(), Duration::from_millis(5));
//! assert_eq!(policy.backoff.attempt_limit(), Some(3));
//! assert_eq!(merged.user(), Some("user0"));
//! ```

use relink_core::{Address, ConfigError};
use relink_retry::{BackoffPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MULTIPLIER};
use std::time::Duration;

/// One layered option value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    /// Take the value from the layer below.
    Inherit,
    /// Use this value.
    Set(T),
    /// Clear the value, even if a lower layer set it.
    Unset,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Inherit
    }
}

impl<T: Clone> Field<T> {
    /// `update` wins unless it inherits.
    pub fn overlay(&self, update: &Field<T>) -> Field<T> {
        match update {
            Field::Inherit => self.clone(),
            explicit => explicit.clone(),
        }
    }
}

impl<T> Field<T> {
    /// The value, if set.
    pub fn get(&self) -> Option<&T> {
        match self {
            Field::Set(value) => Some(value),
            Field::Inherit | Field::Unset => None,
        }
    }

    /// Returns true unless the field inherits.
    pub fn is_explicit(&self) -> bool {
        !matches!(self, Field::Inherit)
    }
}

/// Reconnect tuning. Its presence on a connection enables reconnection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconnectOptions {
    delay: Field<Duration>,
    multiplier: Field<f64>,
    max_delay: Field<Duration>,
    max_attempts: Field<u32>,
    jitter: Field<f64>,
}

impl ReconnectOptions {
    /// Options that inherit everything; on their own they resolve to the
    /// defaults (10ms, doubling, no cap, unlimited attempts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before the first retry.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Field::Set(delay);
        self
    }

    /// Growth factor between retries.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Field::Set(multiplier);
        self
    }

    /// Cap on the delay.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Field::Set(max_delay);
        self
    }

    /// Removes an inherited delay cap.
    pub fn unlimited_delay(mut self) -> Self {
        self.max_delay = Field::Unset;
        self
    }

    /// Retries allowed after a failure before giving up.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Field::Set(max_attempts);
        self
    }

    /// Removes an inherited attempt limit.
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = Field::Unset;
        self
    }

    /// Randomizes each delay by up to `factor` of its value.
    pub fn jitter(mut self, factor: f64) -> Self {
        self.jitter = Field::Set(factor);
        self
    }

    /// Field-wise overlay.
    pub fn overlay(&self, update: &ReconnectOptions) -> ReconnectOptions {
        ReconnectOptions {
            delay: self.delay.overlay(&update.delay),
            multiplier: self.multiplier.overlay(&update.multiplier),
            max_delay: self.max_delay.overlay(&update.max_delay),
            max_attempts: self.max_attempts.overlay(&update.max_attempts),
            jitter: self.jitter.overlay(&update.jitter),
        }
    }

    /// Fills unset fields with defaults.
    pub fn resolve(&self) -> BackoffPolicy {
        let initial_delay = self.delay.get().copied().unwrap_or(DEFAULT_INITIAL_DELAY);
        let mut policy = BackoffPolicy::new(initial_delay)
            .multiplier(self.multiplier.get().copied().unwrap_or(DEFAULT_MULTIPLIER))
            .jitter(self.jitter.get().copied().unwrap_or(0.0));
        if let Some(max_delay) = self.max_delay.get() {
            policy = policy.max_delay(*max_delay);
        }
        if let Some(max_attempts) = self.max_attempts.get() {
            policy = policy.max_attempts(*max_attempts);
        }
        policy
    }

    /// Checks the values set in this layer alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(&multiplier) = self.multiplier.get() {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ConfigError::InvalidMultiplier(multiplier));
            }
        }
        if let (Some(&initial_delay), Some(&max_delay)) =
            (self.delay.get(), self.max_delay.get())
        {
            if max_delay < initial_delay {
                return Err(ConfigError::InvalidDelay {
                    initial_delay,
                    max_delay,
                });
            }
        }
        if self.max_attempts.get() == Some(&0) {
            return Err(ConfigError::InvalidMaxAttempts);
        }
        if let Some(&jitter) = self.jitter.get() {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(ConfigError::InvalidJitter(jitter));
            }
        }
        Ok(())
    }
}

/// Reconnect behavior resolved from a fully layered [`ConnectionOptions`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delays and attempt limit.
    pub backoff: BackoffPolicy,
    /// Address every retry targets while set.
    pub sticky_override: Option<Address>,
}

/// Options for one logical connection.
///
/// Values are built with [`ConnectionOptions::builder`] and never mutated;
/// updates are layered on with [`overlay`](ConnectionOptions::overlay).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    reconnect: Field<ReconnectOptions>,
    reconnect_url: Field<Address>,
    failover_urls: Field<Vec<Address>>,
    container_id: Field<String>,
    virtual_host: Field<String>,
    user: Field<String>,
    password: Field<String>,
    sasl_enabled: Field<bool>,
    sasl_allowed_mechs: Field<Vec<String>>,
    sasl_allow_insecure_mechs: Field<bool>,
    idle_timeout: Field<Duration>,
    max_frame_size: Field<u32>,
    connect_timeout: Field<Duration>,
}

impl ConnectionOptions {
    /// An empty layer: every field inherits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for one options layer.
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }

    /// Returns `self` with every explicit field of `update` applied.
    pub fn overlay(&self, update: &ConnectionOptions) -> ConnectionOptions {
        let reconnect = match (&self.reconnect, &update.reconnect) {
            (Field::Set(base), Field::Set(layer)) => Field::Set(base.overlay(layer)),
            (base, layer) => base.overlay(layer),
        };

        ConnectionOptions {
            reconnect,
            reconnect_url: self.reconnect_url.overlay(&update.reconnect_url),
            failover_urls: self.failover_urls.overlay(&update.failover_urls),
            container_id: self.container_id.overlay(&update.container_id),
            virtual_host: self.virtual_host.overlay(&update.virtual_host),
            user: self.user.overlay(&update.user),
            password: self.password.overlay(&update.password),
            sasl_enabled: self.sasl_enabled.overlay(&update.sasl_enabled),
            sasl_allowed_mechs: self.sasl_allowed_mechs.overlay(&update.sasl_allowed_mechs),
            sasl_allow_insecure_mechs: self
                .sasl_allow_insecure_mechs
                .overlay(&update.sasl_allow_insecure_mechs),
            idle_timeout: self.idle_timeout.overlay(&update.idle_timeout),
            max_frame_size: self.max_frame_size.overlay(&update.max_frame_size),
            connect_timeout: self.connect_timeout.overlay(&update.connect_timeout),
        }
    }

    /// Returns true if reconnection is enabled.
    pub fn reconnect_enabled(&self) -> bool {
        matches!(self.reconnect, Field::Set(_))
    }

    /// The raw reconnect layer.
    pub fn reconnect(&self) -> Option<&ReconnectOptions> {
        self.reconnect.get()
    }

    /// Resolves the reconnect behavior, or `None` if reconnection is off.
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.reconnect.get().map(|reconnect| ReconnectPolicy {
            backoff: reconnect.resolve(),
            sticky_override: self.reconnect_url.get().cloned(),
        })
    }

    /// The sticky override address.
    pub fn reconnect_url(&self) -> Option<&Address> {
        self.reconnect_url.get()
    }

    /// Returns true if this layer sets or clears the sticky override.
    pub fn touches_reconnect_url(&self) -> bool {
        self.reconnect_url.is_explicit()
    }

    /// The failover list, empty if none is set.
    pub fn failover_urls(&self) -> &[Address] {
        self.failover_urls.get().map(Vec::as_slice).unwrap_or_default()
    }

    /// Container id override.
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.get().map(String::as_str)
    }

    /// Virtual host.
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.get().map(String::as_str)
    }

    /// User to authenticate as.
    pub fn user(&self) -> Option<&str> {
        self.user.get().map(String::as_str)
    }

    /// Password to authenticate with.
    pub fn password(&self) -> Option<&str> {
        self.password.get().map(String::as_str)
    }

    /// SASL on/off, if chosen.
    pub fn sasl_enabled(&self) -> Option<bool> {
        self.sasl_enabled.get().copied()
    }

    /// Allowed SASL mechanisms.
    pub fn sasl_allowed_mechs(&self) -> Option<&[String]> {
        self.sasl_allowed_mechs.get().map(Vec::as_slice)
    }

    /// Whether insecure mechanisms are allowed, if chosen.
    pub fn sasl_allow_insecure_mechs(&self) -> Option<bool> {
        self.sasl_allow_insecure_mechs.get().copied()
    }

    /// Idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.get().copied()
    }

    /// Max frame size.
    pub fn max_frame_size(&self) -> Option<u32> {
        self.max_frame_size.get().copied()
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.get().copied()
    }

    /// Checks the values set in this layer alone.
    ///
    /// Suitable for partial updates: cross-field checks only run when both
    /// fields are set in this layer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(address) = self.reconnect_url.get() {
            address.validate()?;
        }
        for address in self.failover_urls() {
            address.validate()?;
        }
        if let Some(reconnect) = self.reconnect.get() {
            reconnect.validate()?;
        }
        if let Some(mechanisms) = self.sasl_allowed_mechs.get() {
            for mechanism in mechanisms {
                if !is_mechanism_name(mechanism) {
                    return Err(ConfigError::InvalidMechanism(mechanism.clone()));
                }
            }
        }
        Ok(())
    }

    /// Checks these options as the complete configuration of a connection,
    /// including the resolved reconnect policy.
    pub fn validate_effective(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(policy) = self.reconnect_policy() {
            policy.backoff.validate()?;
        }
        Ok(())
    }
}

// RFC 4422 mechanism names: 1 to 20 of A-Z, 0-9, '-' and '_'.
fn is_mechanism_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 20
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '-' | '_'))
}

/// Builder for one [`ConnectionOptions`] layer.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    /// Creates a builder where every field inherits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables reconnection. Layered onto existing reconnect options field
    /// by field.
    pub fn reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.options.reconnect = Field::Set(reconnect);
        self
    }

    /// Disables reconnection.
    pub fn no_reconnect(mut self) -> Self {
        self.options.reconnect = Field::Unset;
        self
    }

    /// Sticky override: every retry targets this address until cleared.
    pub fn reconnect_url(mut self, address: impl Into<Address>) -> Self {
        self.options.reconnect_url = Field::Set(address.into());
        self
    }

    /// Clears the sticky override.
    pub fn clear_reconnect_url(mut self) -> Self {
        self.options.reconnect_url = Field::Unset;
        self
    }

    /// Addresses tried in turn after the base address.
    pub fn failover_urls<I, A>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.options.failover_urls = Field::Set(addresses.into_iter().map(Into::into).collect());
        self
    }

    /// Container id announced to the peer.
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.options.container_id = Field::Set(id.into());
        self
    }

    /// Virtual host requested from the peer.
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.options.virtual_host = Field::Set(virtual_host.into());
        self
    }

    /// User to authenticate as.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.options.user = Field::Set(user.into());
        self
    }

    /// Password to authenticate with.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Field::Set(password.into());
        self
    }

    /// Enables or disables SASL.
    pub fn sasl_enabled(mut self, enabled: bool) -> Self {
        self.options.sasl_enabled = Field::Set(enabled);
        self
    }

    /// Restricts SASL to the given mechanisms.
    pub fn sasl_allowed_mechs<I, S>(mut self, mechanisms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.sasl_allowed_mechs =
            Field::Set(mechanisms.into_iter().map(Into::into).collect());
        self
    }

    /// Allows mechanisms that send credentials in the clear.
    pub fn sasl_allow_insecure_mechs(mut self, allow: bool) -> Self {
        self.options.sasl_allow_insecure_mechs = Field::Set(allow);
        self
    }

    /// Idle timeout announced to the peer.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = Field::Set(timeout);
        self
    }

    /// Largest frame accepted from the peer.
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.options.max_frame_size = Field::Set(size);
        self
    }

    /// Upper bound on establishing one transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = Field::Set(timeout);
        self
    }

    /// Finishes the layer.
    pub fn build(self) -> ConnectionOptions {
        self.options
    }
}

impl From<ConnectionOptionsBuilder> for ConnectionOptions {
    fn from(builder: ConnectionOptionsBuilder) -> Self {
        builder.build()
    }
}

/// Free-function form of [`ConnectionOptions::overlay`].
pub fn overlay(base: &ConnectionOptions, update: &ConnectionOptions) -> ConnectionOptions {
    base.overlay(update)
}
