//! Connections: handshake, channel multiplexing, heartbeats, and the
//! public handle.
//!
//! [`Connection::open`] dials the transport, spawns the reactor task,
//! and resolves once the open handshake completes. The handle (and the
//! [`Session`], [`Sender`](crate::Sender), and
//! [`Receiver`](crate::Receiver) handles minted from it) communicates
//! with the reactor exclusively through commands; events stream out of
//! the receiver returned by `open`.

pub(crate) mod command;
mod reactor;
mod state;

pub use state::{ConnectionState, StateTrace};

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    address::AmqpAddress,
    config::{ConnectionOptions, SessionOptions},
    error::AmqpError,
    event::ConnectionEvent,
    sasl::Plain,
    session::Session,
    transport::{ByteStream, Connector, IoStream, TransportRegistry},
};

use command::Command;
use reactor::{Dial, Reactor};

/// Events observed from a connection, in dispatch order.
pub type EventStream = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Handle to an open connection.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    trace: StateTrace,
}

impl Connection {
    /// Dial `address` and complete the open handshake.
    ///
    /// Credentials in the address imply a SASL `PLAIN` layer unless the
    /// options already carry mechanisms.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the address is malformed, the scheme
    /// has no transport, the dial fails, or the handshake is refused.
    pub async fn open(
        address: &str,
        options: ConnectionOptions,
    ) -> Result<(Self, EventStream), AmqpError> {
        let address = AmqpAddress::parse(address)?;
        let registry = TransportRegistry::standard();
        Self::open_with_registry(&registry, address, options).await
    }

    /// Open using a caller-supplied transport registry.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] as for [`Connection::open`].
    pub async fn open_with_registry(
        registry: &TransportRegistry,
        address: AmqpAddress,
        options: ConnectionOptions,
    ) -> Result<(Self, EventStream), AmqpError> {
        let connector = registry.connector_for(&address.scheme)?;
        Self::open_with_connector(connector, address, options).await
    }

    /// Open using a specific connector, keeping it for reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] as for [`Connection::open`].
    pub async fn open_with_connector(
        connector: Arc<dyn Connector>,
        address: AmqpAddress,
        mut options: ConnectionOptions,
    ) -> Result<(Self, EventStream), AmqpError> {
        if options.hostname.is_none() {
            options.hostname = Some(address.host.clone());
        }
        if options.sasl.is_empty() {
            if let (Some(username), Some(password)) = (&address.username, &address.password) {
                options.sasl.push(Arc::new(Plain::new(username, password)));
            }
        }
        let io = connector.connect(&address, options.tls.as_ref()).await?;
        Self::spawn(io, Some(Dial { connector, address }), options).await
    }

    /// Run the protocol over an already-established byte stream.
    ///
    /// Reconnect policy is inert here: with no connector there is
    /// nothing to redial.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the handshake is refused.
    pub async fn open_with_stream(
        stream: impl ByteStream + 'static,
        options: ConnectionOptions,
    ) -> Result<(Self, EventStream), AmqpError> {
        Self::spawn(Box::new(stream), None, options).await
    }

    /// Start the protocol over a byte stream without waiting for the
    /// handshake. The returned [`Opening`] resolves when it completes,
    /// while the handle and event stream stay observable even if it
    /// fails.
    pub fn start_with_stream(
        stream: impl ByteStream + 'static,
        options: ConnectionOptions,
    ) -> (Self, EventStream, Opening) {
        Self::start(Box::new(stream), None, options)
    }

    fn start(
        io: IoStream,
        dial: Option<Dial>,
        options: ConnectionOptions,
    ) -> (Self, EventStream, Opening) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let trace = StateTrace::new();

        let reactor = Reactor::new(
            io,
            dial,
            options,
            events_tx,
            trace.clone(),
            open_tx,
            cmd_rx,
            shutdown.clone(),
        );
        tokio::spawn(reactor.run());

        (
            Self {
                commands: cmd_tx,
                shutdown,
                trace,
            },
            events_rx,
            Opening(open_rx),
        )
    }

    async fn spawn(
        io: IoStream,
        dial: Option<Dial>,
        options: ConnectionOptions,
    ) -> Result<(Self, EventStream), AmqpError> {
        let (connection, events_rx, opening) = Self::start(io, dial, options);
        opening.wait().await?;
        Ok((connection, events_rx))
    }

    /// Begin a new session.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError::OverCapacity`] when channels are exhausted,
    /// or [`AmqpError::Disconnected`] when the connection is gone.
    pub async fn begin(&self, options: SessionOptions) -> Result<Session, AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Begin { options, reply })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        let channel = rx
            .await
            .map_err(|_| AmqpError::Disconnected("begin abandoned by teardown".into()))??;
        Ok(Session {
            commands: self.commands.clone(),
            channel,
        })
    }

    /// Close the connection, awaiting the close handshake.
    ///
    /// Closing before the handshake finishes cancels the connect.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the reactor is already gone.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close { error: None, reply })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("close abandoned by teardown".into()))?
    }

    /// Abort without the close handshake, as on fatal local errors.
    pub fn abort(&self) { self.shutdown.cancel(); }

    /// The states this connection has passed through, oldest first.
    #[must_use]
    pub fn state_trace(&self) -> Vec<ConnectionState> { self.trace.snapshot() }
}

/// The in-flight open handshake of a started connection.
pub struct Opening(oneshot::Receiver<Result<(), AmqpError>>);

impl Opening {
    /// Resolve when the handshake completes or fails.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure, or [`AmqpError::Disconnected`]
    /// when the reactor died first.
    pub async fn wait(self) -> Result<(), AmqpError> {
        self.0
            .await
            .map_err(|_| AmqpError::Disconnected("connection reactor died".into()))?
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}
