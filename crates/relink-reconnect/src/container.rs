//! Running connections.
//!
//! A [`Container`] owns a connector and spawns one driver task per logical
//! connection. The driver feeds transport outcomes, timer expiries and
//! application commands into that connection's [`Coordinator`] and carries out
//! the effects it returns. All of it happens on a single task per connection,
//! so callbacks for one connection never run concurrently.

use crate::coordinator::{Command, Coordinator, Disposition, Effect, Event, Notification};
use crate::events::{Listeners, ReconnectEvent};
use crate::handler::{Connection, MessagingHandler, Transport};
use crate::options::ConnectionOptions;
use crate::transport::{share, ConnectRequest, Link, SharedConnector, TcpConnector};
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};
use relink_core::{Address, ConfigError, TaskHandle, TransportError, WorkQueue};
use relink_retry::RetryScheduler;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tower::Service;

#[cfg(feature = "metrics")]
static METRICS_INIT: std::sync::Once = std::sync::Once::new();

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Cloneable handle to a container, reachable from callbacks.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    id: Arc<str>,
    stop: Arc<watch::Sender<bool>>,
}

impl ContainerHandle {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            id: Arc::from(id.into()),
            stop: Arc::new(stop),
        }
    }

    /// The container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stops every connection: pending retries are cancelled, open
    /// transports dropped, and each connection closes with
    /// [`Disposition::Stopped`]. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Returns true once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }
}

/// Runs logical connections.
///
/// # Example
///
/// ```rust,no_run
/// use relink_reconnect::{
///     ConnectionOptions, Container, MessagingHandler, ReconnectOptions, Transport,
/// };
///
/// struct Logger;
///
/// impl MessagingHandler for Logger {
///     fn on_transport_error(&mut self, transport: &mut Transport<'_>) {
///         if let Some(error) = transport.error() {
///             eprintln!("transport error: {error}");
///         }
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let container = Container::builder().id("client0").build();
/// let options = ConnectionOptions::builder()
///     .reconnect(ReconnectOptions::new().max_attempts(5))
///     .failover_urls(["broker-b:5672", "broker-c:5672"])
///     .build();
///
/// container.connect("broker-a:5672", options, Logger)?;
/// container.run().await;
/// # Ok(())
/// # }
/// ```
pub struct Container {
    handle: ContainerHandle,
    connector: SharedConnector,
    listeners: Listeners,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    connections: AtomicU64,
}

impl Container {
    /// Creates a builder.
    pub fn builder() -> ContainerBuilder {
        #[cfg(feature = "metrics")]
        {
            METRICS_INIT.call_once(|| {
                describe_counter!(
                    "relink_attempts_total",
                    "Total number of transport connect attempts"
                );
                describe_counter!(
                    "relink_transport_errors_total",
                    "Total number of transport failures reported"
                );
                describe_counter!(
                    "relink_retries_scheduled_total",
                    "Total number of reconnect retries scheduled"
                );
                describe_counter!(
                    "relink_connections_closed_total",
                    "Total number of connections that reached a terminal state"
                );
                describe_histogram!(
                    "relink_retry_delay_seconds",
                    "Backoff delay before each reconnect retry"
                );
            });
        }
        ContainerBuilder::new()
    }

    /// The container id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// A cloneable handle for stopping the container from anywhere.
    pub fn handle(&self) -> ContainerHandle {
        self.handle.clone()
    }

    /// Starts a logical connection to `address`.
    ///
    /// The first attempt targets `address`; later attempts follow the
    /// options' sticky override and failover list.
    ///
    /// # Panics
    ///
    /// Panics if called from outside a tokio runtime.
    pub fn connect<H>(
        &self,
        address: impl Into<Address>,
        options: impl Into<ConnectionOptions>,
        handler: H,
    ) -> Result<ConnectionHandle, ConfigError>
    where
        H: MessagingHandler,
    {
        let address = address.into();
        let options = options.into();
        address.validate()?;
        options.validate_effective()?;
        if self.handle.is_stopped() {
            return Err(ConfigError::ConnectionClosed);
        }

        let seq = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("{}/{}", self.handle.id(), seq);
        let (queue, rx) = WorkQueue::channel();

        #[cfg(feature = "tracing")]
        tracing::info!(connection = %name, address = %address, "starting connection");

        let driver = Driver {
            name: name.clone(),
            coordinator: Coordinator::new(address, options),
            handler,
            queue: queue.clone(),
            scheduler: RetryScheduler::new(),
            generation: 0,
            attempt_task: None,
            link_task: None,
            rejected: None,
            connector: Arc::clone(&self.connector),
            listeners: self.listeners.clone(),
            container: self.handle.clone(),
        };
        let task = tokio::spawn(driver.run(rx, self.handle.subscribe()));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(task);
        }

        Ok(ConnectionHandle { name, queue })
    }

    /// Stops every connection. See [`ContainerHandle::stop`].
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Waits until every connection started so far is closed or failed.
    pub async fn run(&self) {
        loop {
            let next = match self.tasks.lock() {
                Ok(mut tasks) => tasks.pop(),
                Err(_) => None,
            };
            let Some(task) = next else {
                return;
            };
            if let Err(_error) = task.await {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    container = %self.handle.id(),
                    error = %_error,
                    "connection task failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.handle.id())
            .field("listeners", &self.listeners)
            .field("connections", &self.connections.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builder for [`Container`].
pub struct ContainerBuilder {
    id: Option<String>,
    connector: Option<SharedConnector>,
    listeners: Listeners,
}

impl ContainerBuilder {
    fn new() -> Self {
        Self {
            id: None,
            connector: None,
            listeners: Listeners::new(),
        }
    }

    /// Sets the container id. Defaults to a generated one.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the connector used for every attempt. Defaults to
    /// [`TcpConnector`].
    pub fn connector<S>(mut self, connector: S) -> Self
    where
        S: Service<ConnectRequest, Response = Link, Error = TransportError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.connector = Some(share(connector));
        self
    }

    /// Registers a listener for every connection event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReconnectEvent) + Send + Sync + 'static,
    {
        self.listeners.add(f);
        self
    }

    /// Registers a listener for the events of one connection, named the way
    /// [`ConnectionHandle::name`] reports it.
    pub fn on_connection_event<F>(mut self, connection: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ReconnectEvent) + Send + Sync + 'static,
    {
        self.listeners.add_for(connection, f);
        self
    }

    /// Registers a callback for each connect attempt.
    ///
    /// # Callback Signature
    /// `Fn(&Address, u32)` - the target and the 1-indexed attempt number.
    pub fn on_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(&Address, u32) + Send + Sync + 'static,
    {
        self.listeners.add(move |event| {
            if let ReconnectEvent::AttemptStarted {
                target, attempt, ..
            } = event
            {
                f(target, *attempt);
            }
        });
        self
    }

    /// Registers a callback for each opened transport.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Address, bool) + Send + Sync + 'static,
    {
        self.listeners.add(move |event| {
            if let ReconnectEvent::Opened {
                target,
                reconnected,
                ..
            } = event
            {
                f(target, *reconnected);
            }
        });
        self
    }

    /// Registers a callback for each transport failure.
    pub fn on_transport_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.listeners.add(move |event| {
            if let ReconnectEvent::TransportFailed { error, .. } = event {
                f(error);
            }
        });
        self
    }

    /// Registers a callback for each scheduled retry.
    ///
    /// # Callback Signature
    /// `Fn(u32, Duration, &Address)` - retry number, delay and target.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration, &Address) + Send + Sync + 'static,
    {
        self.listeners.add(move |event| {
            if let ReconnectEvent::RetryScheduled {
                retry,
                delay,
                target,
                ..
            } = event
            {
                f(*retry, *delay, target);
            }
        });
        self
    }

    /// Registers a callback for each connection's terminal state.
    pub fn on_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(&Disposition) + Send + Sync + 'static,
    {
        self.listeners.add(move |event| {
            if let ReconnectEvent::Closed { disposition, .. } = event {
                f(disposition);
            }
        });
        self
    }

    /// Builds the container.
    pub fn build(self) -> Container {
        let id = self.id.unwrap_or_else(|| {
            let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
            format!("relink-{}-{}", std::process::id(), seq)
        });
        Container {
            handle: ContainerHandle::new(id),
            connector: self
                .connector
                .unwrap_or_else(|| share(TcpConnector::new())),
            listeners: self.listeners,
            tasks: Mutex::new(Vec::new()),
            connections: AtomicU64::new(0),
        }
    }
}

impl std::fmt::Debug for ContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("id", &self.id)
            .field("connector", &self.connector.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}

/// Handle for acting on a connection from outside its callbacks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    name: String,
    queue: WorkQueue<Work>,
}

impl ConnectionHandle {
    /// The connection's name, `<container id>/<sequence>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closes the connection.
    pub fn close(&self) -> Result<(), ConfigError> {
        self.send(Command::Close)
    }

    /// Layers `update` onto the connection's options from the next attempt on.
    ///
    /// Resolves once the connection applied the update. An update that is
    /// invalid on its own, or only in combination with the options in force,
    /// is rejected with the [`ConfigError`] and leaves the options unchanged.
    pub async fn update_options(
        &self,
        update: impl Into<ConnectionOptions>,
    ) -> Result<(), ConfigError> {
        let update = update.into();
        update.validate()?;

        let (reply, applied) = oneshot::channel();
        let work = Work::Command {
            command: Command::UpdateOptions(update),
            reply: Some(reply),
        };
        if !self.queue.post(work) {
            return Err(ConfigError::ConnectionClosed);
        }
        // A dropped reply means the connection ended before applying it.
        applied.await.unwrap_or(Err(ConfigError::ConnectionClosed))
    }

    /// Makes the next attempt target `address`, once.
    pub fn redirect(&self, address: impl Into<Address>) -> Result<(), ConfigError> {
        let address = address.into();
        address.validate()?;
        self.send(Command::Redirect {
            address,
            sticky: false,
        })
    }

    /// Returns true once the connection reached a terminal state.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    fn send(&self, command: Command) -> Result<(), ConfigError> {
        if self.queue.post(Work::Command {
            command,
            reply: None,
        }) {
            Ok(())
        } else {
            Err(ConfigError::ConnectionClosed)
        }
    }
}

/// Items posted to a connection's queue. Everything produced by a spawned
/// task carries the generation it was started under.
pub(crate) enum Work {
    Connected { generation: u64, link: Link },
    ConnectFailed { generation: u64, error: TransportError },
    LinkLost { generation: u64, error: TransportError },
    RetryDue { generation: u64 },
    Command {
        command: Command,
        reply: Option<oneshot::Sender<Result<(), ConfigError>>>,
    },
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // The sender lives as long as any ContainerHandle, including the driver's.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

struct Driver<H> {
    name: String,
    coordinator: Coordinator,
    handler: H,
    queue: WorkQueue<Work>,
    scheduler: RetryScheduler,
    generation: u64,
    attempt_task: Option<TaskHandle>,
    link_task: Option<TaskHandle>,
    rejected: Option<ConfigError>,
    connector: SharedConnector,
    listeners: Listeners,
    container: ContainerHandle,
}

impl<H: MessagingHandler> Driver<H> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Work>, mut stop: watch::Receiver<bool>) {
        self.process(Event::Start);

        while !self.coordinator.phase().is_terminal() {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => self.process(Event::Stop),
                work = rx.recv() => match work {
                    Some(work) => self.dispatch(work),
                    None => break,
                },
            }
        }

        self.disconnect();
        self.scheduler.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!(connection = %self.name, "connection task finished");
    }

    fn dispatch(&mut self, work: Work) {
        match work {
            Work::Connected { generation, link } if generation == self.generation => {
                self.attempt_task = None;
                self.link_task = Some(self.queue.spawn(async move {
                    let error = link.await;
                    Work::LinkLost { generation, error }
                }));
                self.process(Event::Connected);
            }
            Work::ConnectFailed { generation, error } if generation == self.generation => {
                self.attempt_task = None;
                self.process(Event::TransportFailed(error));
            }
            Work::LinkLost { generation, error } if generation == self.generation => {
                self.link_task = None;
                self.process(Event::TransportFailed(error));
            }
            Work::RetryDue { generation } if generation == self.generation => {
                self.scheduler.disarm();
                self.process(Event::RetryDue);
            }
            Work::Command { command, reply } => {
                self.rejected = None;
                self.process(Event::Command(command));
                let outcome = match self.rejected.take() {
                    Some(error) => Err(error),
                    None => Ok(()),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            _stale => {
                #[cfg(feature = "tracing")]
                tracing::trace!(connection = %self.name, "dropping stale work item");
            }
        }
    }

    fn process(&mut self, event: Event) {
        let mut effects: VecDeque<Effect> = self.coordinator.handle(event).into();

        while let Some(effect) = effects.pop_front() {
            match effect {
                Effect::Connect { target, attempt } => self.connect(target, attempt),
                Effect::Notify(notification) => {
                    self.observe(&notification);
                    let commands = self.notify(&notification);
                    let follow_up = self.coordinator.handle(Event::CallbackReturned(commands));
                    for effect in follow_up.into_iter().rev() {
                        effects.push_front(effect);
                    }
                }
                Effect::ScheduleRetry {
                    delay,
                    retry,
                    target,
                } => self.schedule_retry(delay, retry, target),
                Effect::CancelRetry => {
                    self.generation += 1;
                    self.scheduler.cancel();
                }
                Effect::Disconnect => {
                    self.generation += 1;
                    self.disconnect();
                }
                Effect::RejectOptions(error) => self.rejected = Some(error),
            }
        }
    }

    fn connect(&mut self, target: Address, attempt: u32) {
        self.generation += 1;
        let generation = self.generation;

        #[cfg(feature = "metrics")]
        counter!("relink_attempts_total").increment(1);

        self.emit(ReconnectEvent::AttemptStarted {
            connection: self.name.clone(),
            timestamp: Instant::now(),
            target: target.clone(),
            attempt,
        });

        let options = Arc::new(self.coordinator.options().clone());
        let request = ConnectRequest::new(target, options, attempt);
        let pending = (self.connector)(request);
        self.attempt_task = Some(self.queue.spawn(async move {
            match pending.await {
                Ok(link) => Work::Connected { generation, link },
                Err(error) => Work::ConnectFailed { generation, error },
            }
        }));
    }

    fn schedule_retry(&mut self, delay: Duration, retry: u32, target: Address) {
        self.generation += 1;

        #[cfg(feature = "metrics")]
        {
            counter!("relink_retries_scheduled_total").increment(1);
            histogram!("relink_retry_delay_seconds").record(delay.as_secs_f64());
        }

        self.emit(ReconnectEvent::RetryScheduled {
            connection: self.name.clone(),
            timestamp: Instant::now(),
            retry,
            delay,
            target,
        });

        self.scheduler.arm(
            &self.queue,
            delay,
            Work::RetryDue {
                generation: self.generation,
            },
        );
    }

    fn disconnect(&mut self) {
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
    }

    fn observe(&self, notification: &Notification) {
        let event = match notification {
            Notification::ConnectionOpen { reconnected } => ReconnectEvent::Opened {
                connection: self.name.clone(),
                timestamp: Instant::now(),
                target: self
                    .coordinator
                    .target()
                    .unwrap_or(self.coordinator.base())
                    .clone(),
                reconnected: *reconnected,
            },
            Notification::TransportError(error) | Notification::ConnectionError(error) => {
                #[cfg(feature = "metrics")]
                counter!("relink_transport_errors_total", "kind" => error.kind().as_str())
                    .increment(1);

                ReconnectEvent::TransportFailed {
                    connection: self.name.clone(),
                    timestamp: Instant::now(),
                    error: error.clone(),
                }
            }
            Notification::TransportClose(disposition) => {
                #[cfg(feature = "metrics")]
                counter!("relink_connections_closed_total", "disposition" => disposition.as_str())
                    .increment(1);

                #[cfg(feature = "tracing")]
                tracing::info!(connection = %self.name, %disposition, "connection closed");

                ReconnectEvent::Closed {
                    connection: self.name.clone(),
                    timestamp: Instant::now(),
                    disposition: disposition.clone(),
                }
            }
            Notification::ConnectionClose => return,
        };
        self.emit(event);
    }

    fn notify(&mut self, notification: &Notification) -> Vec<Command> {
        let mut commands = Vec::new();
        let Driver {
            coordinator,
            handler,
            container,
            ..
        } = self;

        let connection = Connection::new(
            &mut commands,
            coordinator.options(),
            coordinator.state(),
            coordinator.base(),
            coordinator.target(),
            container,
        );

        match notification {
            Notification::ConnectionOpen { .. } => {
                let mut connection = connection;
                handler.on_connection_open(&mut connection);
            }
            Notification::TransportError(error) => {
                let mut transport = Transport::new(connection, Some(error), None);
                handler.on_transport_error(&mut transport);
            }
            Notification::ConnectionError(error) => {
                let mut connection = connection.with_error(Some(error));
                handler.on_connection_error(&mut connection);
            }
            Notification::ConnectionClose => {
                let mut connection = connection;
                handler.on_connection_close(&mut connection);
            }
            Notification::TransportClose(disposition) => {
                let error = match disposition {
                    Disposition::Failed(reason) => Some(reason.error()),
                    _ => None,
                };
                let mut transport = Transport::new(connection, error, Some(disposition));
                handler.on_transport_close(&mut transport);
            }
        }

        commands
    }

    fn emit(&self, event: ReconnectEvent) {
        if !self.listeners.is_empty() {
            self.listeners.emit(&event);
        }
    }
}
