//! Establishing transports.
//!
//! A connector is any [`tower::Service`] taking a [`ConnectRequest`] and
//! resolving to a [`Link`]: a future that completes with the error that ended
//! the established transport. Dropping the link closes the transport.
//!
//! ```rust
//! use relink_core::{TransportError, TransportErrorKind};
//! use relink_reconnect::{share, ConnectRequest, Link};
//! use tower::service_fn;
//!
//! // A connector that refuses everything.
//! let connector = share(service_fn(|request: ConnectRequest| async move {
//!     Err::<Link, _>(TransportError::new(
//!         TransportErrorKind::Refused,
//!         request.target().clone(),
//!         "no listener",
//!     ))
//! }));
//! # let _ = connector;
//! ```

use crate::options::ConnectionOptions;
use futures::future::{BoxFuture, FutureExt};
use relink_core::{Address, TransportError, TransportErrorKind};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tower::{Service, ServiceExt};

/// An established transport. Resolves with the failure that ended it.
pub type Link = BoxFuture<'static, TransportError>;

/// One connect attempt.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    target: Address,
    options: Arc<ConnectionOptions>,
    attempt: u32,
}

impl ConnectRequest {
    /// Creates a request for `target` under `options`.
    pub fn new(target: Address, options: Arc<ConnectionOptions>, attempt: u32) -> Self {
        Self {
            target,
            options,
            attempt,
        }
    }

    /// Where to connect.
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// The options in force for this attempt.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Connect attempts over the connection's lifetime, 1-indexed.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

pub(crate) type ConnectFn =
    dyn Fn(ConnectRequest) -> BoxFuture<'static, Result<Link, TransportError>> + Send + Sync;

/// A type-erased connector shared by every connection of a container.
pub type SharedConnector = Arc<ConnectFn>;

/// Erases a connector service so connections can share it.
pub fn share<S>(service: S) -> SharedConnector
where
    S: Service<ConnectRequest, Response = Link, Error = TransportError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    Arc::new(move |request: ConnectRequest| service.clone().oneshot(request).boxed())
}

/// Plain TCP connector.
///
/// The link completes when the peer shuts the stream down or a read fails.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    /// A connector with no timeout beyond the one in the connection options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout applied when the connection options do not set one.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

impl Service<ConnectRequest> for TcpConnector {
    type Response = Link;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Link, TransportError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ConnectRequest) -> Self::Future {
        let timeout = request.options().connect_timeout().or(self.connect_timeout);

        Box::pin(async move {
            let target = request.target;
            let (host, port) = {
                let parts = target.parts().map_err(|error| {
                    TransportError::new(
                        TransportErrorKind::Resolution,
                        target.clone(),
                        error.to_string(),
                    )
                })?;
                (parts.host().to_string(), parts.port())
            };

            let connect = TcpStream::connect((host.as_str(), port));
            let stream = match timeout {
                Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                    TransportError::new(
                        TransportErrorKind::Timeout,
                        target.clone(),
                        format!("no answer within {limit:?}"),
                    )
                })?,
                None => connect.await,
            }
            .map_err(|error| TransportError::from_io(target.clone(), &error))?;

            #[cfg(feature = "tracing")]
            tracing::debug!(address = %target, "tcp transport established");

            Ok::<Link, TransportError>(watch(stream, target))
        })
    }
}

fn watch(mut stream: TcpStream, address: Address) -> Link {
    Box::pin(async move {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => {
                    return TransportError::new(
                        TransportErrorKind::Lost,
                        address,
                        "peer closed the connection",
                    )
                }
                Ok(_) => continue,
                Err(error) => return TransportError::from_io(address, &error),
            }
        }
    })
}
