//! Links: the named, credit-governed endpoints transfers ride on.
//!
//! [`LinkCore`] carries the attach/detach state machine and the pieces
//! both roles share; [`SenderState`] and [`ReceiverState`] add the
//! role-specific bookkeeping. The session owns link cores and routes
//! frames to them; the public [`Sender`] and [`Receiver`] handles talk
//! to the reactor through commands.

mod receiver;
mod sender;

pub use receiver::{Delivery, Receiver};
pub(crate) use receiver::{ReceiverState, TransferOutcome};
pub use sender::Sender;
pub(crate) use sender::{PendingSend, SendResolver, SenderState};

use log::debug;
use tokio::sync::oneshot;

use crate::{
    backoff::RetrySeries,
    connection::command::Reply,
    error::AmqpError,
    performative::{Attach, Role},
};

/// Attach/detach lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkState {
    /// No attach in flight.
    Detached,
    /// Our attach is on the wire; awaiting the peer's.
    Attaching,
    /// Both attaches exchanged.
    Attached,
    /// Our detach is on the wire; awaiting the peer's.
    Detaching,
}

/// Role-specific link state.
pub(crate) enum LinkKind {
    Sender(SenderState),
    Receiver(ReceiverState),
}

/// One link endpoint owned by a session.
pub(crate) struct LinkCore {
    pub(crate) name: String,
    pub(crate) handle: u32,
    pub(crate) remote_handle: Option<u32>,
    pub(crate) state: LinkState,
    pub(crate) reattach: Option<RetrySeries>,
    pub(crate) pending_attach: Option<Reply<(u32, String)>>,
    pub(crate) pending_detach: Option<oneshot::Sender<Result<(), AmqpError>>>,
    pub(crate) kind: LinkKind,
}

impl LinkCore {
    pub(crate) fn new(name: String, handle: u32, kind: LinkKind) -> Self {
        let reattach = match &kind {
            LinkKind::Sender(sender) => sender.options.reattach,
            LinkKind::Receiver(receiver) => receiver.options.reattach,
        }
        .map(RetrySeries::new);
        Self {
            name,
            handle,
            remote_handle: None,
            state: LinkState::Detached,
            reattach,
            pending_attach: None,
            pending_detach: None,
            kind,
        }
    }

    /// Build the attach performative from the link policy.
    pub(crate) fn make_attach(&self) -> Attach {
        match &self.kind {
            LinkKind::Sender(sender) => Attach {
                name: self.name.clone(),
                handle: self.handle,
                role: Role::Sender,
                snd_settle_mode: sender.options.snd_settle_mode,
                rcv_settle_mode: sender.options.rcv_settle_mode,
                source: sender.options.source.clone(),
                target: Some(sender.options.target.clone()),
                unsettled: None,
                incomplete_unsettled: false,
                initial_delivery_count: Some(sender.options.initial_delivery_count),
                max_message_size: sender.options.max_message_size,
                offered_capabilities: None,
                desired_capabilities: None,
                properties: None,
            },
            LinkKind::Receiver(receiver) => Attach {
                name: self.name.clone(),
                handle: self.handle,
                role: Role::Receiver,
                snd_settle_mode: receiver.options.snd_settle_mode,
                rcv_settle_mode: receiver.options.rcv_settle_mode,
                source: Some(receiver.options.source.clone()),
                target: receiver.options.target.clone(),
                unsettled: None,
                incomplete_unsettled: false,
                initial_delivery_count: None,
                max_message_size: receiver.options.max_message_size,
                offered_capabilities: None,
                desired_capabilities: None,
                properties: None,
            },
        }
    }

    /// Record the peer's attach response.
    pub(crate) fn on_attach_received(&mut self, attach: &Attach) {
        self.remote_handle = Some(attach.handle);
        self.state = LinkState::Attached;
        if let Some(series) = &mut self.reattach {
            series.reset();
        }
        debug!(
            "link {} attached: handle={} remote_handle={}",
            self.name, self.handle, attach.handle
        );
        if let Some(reply) = self.pending_attach.take() {
            let _ = reply.send(Ok((self.handle, self.name.clone())));
        }
    }

    /// Transition to detached without emitting frames, used on transport
    /// loss so reconnect does not race duplicate detach traffic.
    pub(crate) fn force_detach(&mut self, error: &AmqpError) {
        self.state = LinkState::Detached;
        self.remote_handle = None;
        if let Some(reply) = self.pending_attach.take() {
            let _ = reply.send(Err(error.clone()));
        }
        if let Some(reply) = self.pending_detach.take() {
            let _ = reply.send(Ok(()));
        }
        match &mut self.kind {
            LinkKind::Sender(sender) => sender.fail_unsettled(error),
            LinkKind::Receiver(receiver) => receiver.reset_partial(),
        }
    }

    /// Fail every pending completion; used on terminal teardown.
    pub(crate) fn fail_all(&mut self, error: &AmqpError) {
        if let Some(reply) = self.pending_attach.take() {
            let _ = reply.send(Err(error.clone()));
        }
        if let Some(reply) = self.pending_detach.take() {
            let _ = reply.send(Err(error.clone()));
        }
        match &mut self.kind {
            LinkKind::Sender(sender) => {
                sender.fail_unsettled(error);
                sender.fail_pending(error);
            }
            LinkKind::Receiver(receiver) => receiver.reset_partial(),
        }
    }

    pub(crate) fn sender_mut(&mut self) -> Option<&mut SenderState> {
        match &mut self.kind {
            LinkKind::Sender(sender) => Some(sender),
            LinkKind::Receiver(_) => None,
        }
    }

    pub(crate) fn receiver_mut(&mut self) -> Option<&mut ReceiverState> {
        match &mut self.kind {
            LinkKind::Receiver(receiver) => Some(receiver),
            LinkKind::Sender(_) => None,
        }
    }
}
