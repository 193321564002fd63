//! Commands flowing from handles into the connection reactor.
//!
//! Every handle method is a command plus a oneshot the reactor completes
//! exactly once. This keeps all protocol state inside the reactor task;
//! handles never touch it directly.

use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{ReceiverOptions, SenderOptions, SessionOptions},
    error::AmqpError,
    link::Delivery,
    message::Message,
    performative::{DeliveryState, ErrorRecord},
};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, AmqpError>>;

pub(crate) enum Command {
    /// Close the connection, optionally carrying an error.
    Close {
        error: Option<ErrorRecord>,
        reply: Reply<()>,
    },
    /// Begin a session; replies with the local channel.
    Begin {
        options: SessionOptions,
        reply: Reply<u16>,
    },
    /// End a session.
    End { channel: u16, reply: Reply<()> },
    /// Attach a sender link; replies with the local handle and name.
    AttachSender {
        channel: u16,
        options: SenderOptions,
        reply: Reply<(u32, String)>,
    },
    /// Attach a receiver link; replies with the local handle and name.
    AttachReceiver {
        channel: u16,
        options: ReceiverOptions,
        deliveries: mpsc::UnboundedSender<Delivery>,
        reply: Reply<(u32, String)>,
    },
    /// Send a message on a sender link; replies with the settled state.
    Send {
        channel: u16,
        handle: u32,
        message: Message,
        reply: Reply<DeliveryState>,
    },
    /// Detach a link; replies when the peer's detach arrives.
    Detach {
        channel: u16,
        handle: u32,
        closed: bool,
        reply: Reply<()>,
    },
    /// Emit a disposition for a received delivery.
    Dispose {
        channel: u16,
        handle: u32,
        delivery_id: u32,
        state: DeliveryState,
        reply: Reply<()>,
    },
    /// Grant additional credit on a receiver link.
    AddCredit {
        channel: u16,
        handle: u32,
        credit: u32,
        reply: Reply<()>,
    },
}
