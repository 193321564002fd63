//! Sender links: outbound transfers, fragmentation bookkeeping, and
//! settlement tracking.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{SendMode, SenderOptions},
    connection::command::Command,
    error::AmqpError,
    message::Message,
    performative::{DeliveryState, Flow},
};

/// Completes one `send` call, exactly once.
pub(crate) type SendResolver = oneshot::Sender<Result<DeliveryState, AmqpError>>;

/// A send waiting for credit or window.
pub(crate) struct PendingSend {
    pub(crate) message: Message,
    pub(crate) reply: SendResolver,
}

/// Sender-side link bookkeeping.
pub(crate) struct SenderState {
    pub(crate) options: SenderOptions,
    /// Deliveries initiated on this link.
    pub(crate) delivery_count: u32,
    /// Transfers the peer has authorised.
    pub(crate) link_credit: u32,
    /// Sends queued behind credit or window exhaustion.
    pub(crate) pending: VecDeque<PendingSend>,
    /// Resolvers awaiting a settling disposition, by delivery id.
    pub(crate) unsettled: HashMap<u32, SendResolver>,
}

impl SenderState {
    pub(crate) fn new(options: SenderOptions) -> Self {
        let delivery_count = options.initial_delivery_count;
        Self {
            options,
            delivery_count,
            link_credit: 0,
            pending: VecDeque::new(),
            unsettled: HashMap::new(),
        }
    }

    /// Messages queued and not yet on the wire.
    pub(crate) fn available(&self) -> u32 {
        u32::try_from(self.pending.len()).unwrap_or(u32::MAX)
    }

    /// Apply a peer flow addressed to this link: the peer's view of our
    /// delivery count plus its credit grant defines our remaining credit.
    pub(crate) fn on_flow(&mut self, flow: &Flow) {
        if let Some(credit) = flow.link_credit {
            let peer_count = flow.delivery_count.unwrap_or(self.delivery_count);
            self.link_credit = peer_count
                .wrapping_add(credit)
                .wrapping_sub(self.delivery_count);
        }
    }

    /// Consume the drain request: burn remaining credit so the peer sees
    /// it exhausted.
    pub(crate) fn drain_credit(&mut self) {
        self.delivery_count = self.delivery_count.wrapping_add(self.link_credit);
        self.link_credit = 0;
    }

    /// Settle `delivery_id` with `state`, resolving its send future.
    pub(crate) fn settle(&mut self, delivery_id: u32, state: &DeliveryState) {
        let Some(resolver) = self.unsettled.remove(&delivery_id) else {
            return;
        };
        let outcome = match state {
            DeliveryState::Rejected { error } => Err(error.clone().map_or_else(
                || AmqpError::Protocol("delivery rejected without error".into()),
                AmqpError::Peer,
            )),
            other => Ok(other.clone()),
        };
        let _ = resolver.send(outcome);
    }

    /// Reject every in-flight settlement; unsettled state does not
    /// survive a detach.
    pub(crate) fn fail_unsettled(&mut self, error: &AmqpError) {
        for (_, resolver) in self.unsettled.drain() {
            let _ = resolver.send(Err(error.clone()));
        }
    }

    /// Reject every queued send.
    pub(crate) fn fail_pending(&mut self, error: &AmqpError) {
        for pending in self.pending.drain(..) {
            let _ = pending.reply.send(Err(error.clone()));
        }
    }

    pub(crate) const fn send_mode(&self) -> SendMode { self.options.send_mode }
}

/// Handle to a sender link.
///
/// `send` preserves call order on the wire: the first transfer of one
/// message is written before any transfer of the next.
#[derive(Clone)]
pub struct Sender {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) channel: u16,
    pub(crate) handle: u32,
    pub(crate) name: String,
}

impl Sender {
    /// The link name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Send a message, completing per the link's [`SendMode`].
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link detaches with an error, the
    /// connection closes, or the peer rejects the delivery.
    pub async fn send(&self, message: Message) -> Result<DeliveryState, AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                channel: self.channel,
                handle: self.handle,
                message,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("send abandoned by teardown".into()))?
    }

    /// Detach without closing; the link may reattach later.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] if the peer's detach carries an error.
    pub async fn detach(&self) -> Result<(), AmqpError> {
        self.detach_inner(false).await
    }

    /// Detach and close the link.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] if the peer's detach carries an error.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.detach_inner(true).await
    }

    async fn detach_inner(&self, closed: bool) -> Result<(), AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Detach {
                channel: self.channel,
                handle: self.handle,
                closed,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("detach abandoned by teardown".into()))?
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("handle", &self.handle)
            .finish()
    }
}
