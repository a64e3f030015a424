//! Application callbacks.
//!
//! A [`MessagingHandler`] sees the life of one logical connection. Callbacks
//! run on the connection's serialized task; anything they ask for through
//! [`Connection`] is queued and applied by the coordinator after the callback
//! returns, so values read inside a callback still reflect the options in
//! force when it started.

use crate::container::ContainerHandle;
use crate::coordinator::{Command, Disposition};
use crate::options::ConnectionOptions;
use crate::state::ConnectionState;
use relink_core::{Address, ConfigError, TransportError};

/// Callbacks for one logical connection. Every method defaults to a no-op.
pub trait MessagingHandler: Send + 'static {
    /// A transport opened.
    fn on_connection_open(&mut self, _connection: &mut Connection<'_>) {}

    /// A transport failed and another attempt will follow unless the
    /// connection is closed here.
    fn on_transport_error(&mut self, _transport: &mut Transport<'_>) {}

    /// A transport failed and reconnection is disabled.
    fn on_connection_error(&mut self, _connection: &mut Connection<'_>) {}

    /// The application closed the connection.
    fn on_connection_close(&mut self, _connection: &mut Connection<'_>) {}

    /// Final notification; runs exactly once per connection.
    fn on_transport_close(&mut self, _transport: &mut Transport<'_>) {}
}

/// View of the logical connection handed to callbacks.
pub struct Connection<'a> {
    commands: &'a mut Vec<Command>,
    options: &'a ConnectionOptions,
    staged: Option<ConnectionOptions>,
    state: &'a ConnectionState,
    base: &'a Address,
    target: Option<&'a Address>,
    error: Option<&'a TransportError>,
    container: &'a ContainerHandle,
}

impl<'a> Connection<'a> {
    pub(crate) fn new(
        commands: &'a mut Vec<Command>,
        options: &'a ConnectionOptions,
        state: &'a ConnectionState,
        base: &'a Address,
        target: Option<&'a Address>,
        container: &'a ContainerHandle,
    ) -> Self {
        Self {
            commands,
            options,
            staged: None,
            state,
            base,
            target,
            error: None,
            container,
        }
    }

    pub(crate) fn with_error(mut self, error: Option<&'a TransportError>) -> Self {
        self.error = error;
        self
    }

    /// Closes the connection. Inside `on_transport_error` this cancels
    /// reconnection.
    pub fn close(&mut self) {
        self.commands.push(Command::Close);
    }

    /// Layers `update` onto the connection's options from the next attempt on.
    ///
    /// The update is checked against the options it will be merged with;
    /// a rejected update is not queued.
    pub fn update_options(
        &mut self,
        update: impl Into<ConnectionOptions>,
    ) -> Result<(), ConfigError> {
        let update = update.into();
        update.validate()?;

        let merged = self.staged.as_ref().unwrap_or(self.options).overlay(&update);
        merged.validate_effective()?;

        self.staged = Some(merged);
        self.commands.push(Command::UpdateOptions(update));
        Ok(())
    }

    /// Makes the next attempt target `address`, once.
    pub fn redirect(&mut self, address: impl Into<Address>) -> Result<(), ConfigError> {
        self.push_redirect(address.into(), false)
    }

    /// Makes every later attempt target `address` until replaced.
    pub fn redirect_sticky(&mut self, address: impl Into<Address>) -> Result<(), ConfigError> {
        self.push_redirect(address.into(), true)
    }

    fn push_redirect(&mut self, address: Address, sticky: bool) -> Result<(), ConfigError> {
        address.validate()?;
        self.commands.push(Command::Redirect { address, sticky });
        Ok(())
    }

    /// Returns true if this transport replaced a failed one.
    pub fn reconnected(&self) -> bool {
        self.state.reconnected()
    }

    /// Retries made since the last successful open.
    pub fn attempt_count(&self) -> u32 {
        self.state.attempt_count()
    }

    /// The options in force. Updates queued by this callback are not visible.
    pub fn options(&self) -> &ConnectionOptions {
        self.options
    }

    /// The configured user.
    pub fn user(&self) -> Option<&str> {
        self.options.user()
    }

    /// The configured virtual host.
    pub fn virtual_host(&self) -> Option<&str> {
        self.options.virtual_host()
    }

    /// The container id announced for this connection.
    pub fn container_id(&self) -> &str {
        self.options
            .container_id()
            .unwrap_or_else(|| self.container.id())
    }

    /// The address given at connect time.
    pub fn address(&self) -> &Address {
        self.base
    }

    /// The address of the current or most recent attempt.
    pub fn target(&self) -> &Address {
        self.target.unwrap_or(self.base)
    }

    /// The failure being reported, in `on_connection_error`.
    pub fn error(&self) -> Option<&TransportError> {
        self.error
    }

    /// The container running this connection.
    pub fn container(&self) -> &ContainerHandle {
        self.container
    }
}

/// View of the transport handed to transport callbacks.
pub struct Transport<'a> {
    connection: Connection<'a>,
    error: Option<&'a TransportError>,
    disposition: Option<&'a Disposition>,
}

impl<'a> Transport<'a> {
    pub(crate) fn new(
        connection: Connection<'a>,
        error: Option<&'a TransportError>,
        disposition: Option<&'a Disposition>,
    ) -> Self {
        Self {
            connection,
            error,
            disposition,
        }
    }

    /// Why the transport failed. Names the attempted address.
    pub fn error(&self) -> Option<&TransportError> {
        self.error
    }

    /// How the transport lifetime ended, in `on_transport_close`.
    pub fn disposition(&self) -> Option<&Disposition> {
        self.disposition
    }

    /// The owning connection.
    pub fn connection(&mut self) -> &mut Connection<'a> {
        &mut self.connection
    }
}
