//! The enumerated event surface.
//!
//! A connection owns one event channel; every externally observable
//! happening is one of these variants, dispatched from the reactor in
//! arrival order. Handlers must not block.

use crate::{error::AmqpError, performative::ErrorRecord};

/// Events surfaced by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The open handshake completed; the connection is usable.
    Connected,
    /// The connection ended, cleanly or otherwise.
    Disconnected {
        /// The failure that ended it, absent for a clean local close.
        error: Option<AmqpError>,
    },
    /// An error was received from the peer or raised on inbound traffic.
    ErrorReceived(AmqpError),
    /// A session ended, locally or by the peer.
    SessionEnded {
        /// The session's local channel.
        channel: u16,
        /// Error carried by the end performative, if any.
        error: Option<ErrorRecord>,
    },
    /// A link finished its attach handshake.
    LinkAttached {
        /// The link name.
        name: String,
    },
    /// A link detached.
    LinkDetached {
        /// The link name.
        name: String,
        /// Error carried by the detach performative, if any.
        error: Option<ErrorRecord>,
    },
}
