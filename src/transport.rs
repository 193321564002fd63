//! The byte-stream seam between the protocol core and the network.
//!
//! The core consumes any bidirectional byte stream. A [`Connector`]
//! dials one for an address; the [`TransportRegistry`] maps URL schemes
//! to connectors so `amqp://` resolves to plain TCP while TLS or
//! WebSocket carriers can be plugged in without touching the core.

use std::{collections::HashMap, io, sync::Arc};

use async_trait::async_trait;
use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{address::AmqpAddress, config::TlsOptions, error::AmqpError};

/// A bidirectional byte stream the reactor can own.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Boxed stream handed to the connection reactor.
pub type IoStream = Box<dyn ByteStream>;

/// Dials a byte stream for an address.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Establish a stream to `address`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the dial fails.
    async fn connect(
        &self,
        address: &AmqpAddress,
        tls: Option<&TlsOptions>,
    ) -> io::Result<IoStream>;
}

/// Plain TCP transport for the `amqp` scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &AmqpAddress,
        _tls: Option<&TlsOptions>,
    ) -> io::Result<IoStream> {
        debug!("dialling {}", address.endpoint());
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Scheme-to-connector registry.
///
/// The default registry serves `amqp` over TCP. Secure and WebSocket
/// schemes are registered by the embedding application, which owns the
/// TLS stack.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl TransportRegistry {
    /// A registry with the built-in TCP connector for `amqp`.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register("amqp", Arc::new(TcpConnector));
        registry
    }

    /// Register (or replace) the connector for `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, connector: Arc<dyn Connector>) {
        self.connectors
            .insert(scheme.into().to_ascii_lowercase(), connector);
    }

    /// Resolve the connector for `scheme`.
    ///
    /// # Errors
    ///
    /// An unregistered scheme is a hard configuration error.
    pub fn connector_for(&self, scheme: &str) -> Result<Arc<dyn Connector>, AmqpError> {
        self.connectors
            .get(&scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AmqpError::Argument(format!("no transport registered for scheme {scheme}")))
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("schemes", &schemes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_serves_amqp() {
        let registry = TransportRegistry::standard();
        assert!(registry.connector_for("amqp").is_ok());
        assert!(registry.connector_for("AMQP").is_ok());
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let registry = TransportRegistry::standard();
        let err = registry.connector_for("wss").expect_err("unregistered");
        assert!(matches!(err, AmqpError::Argument(_)));
    }
}
