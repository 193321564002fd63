//! Sessions: window flow control, link demux, and delivery-id
//! assignment.
//!
//! A session owns its links and all their bookkeeping; the connection
//! reactor routes inbound frames here by channel and flushes whatever
//! frames the session pushes onto the outbound list. Windows count
//! deliveries: the delivery id advances once per delivery, continuation
//! frames of a fragmented message consume nothing further.

use std::{collections::HashMap, time::Duration};

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{ReceiverOptions, SendMode, SenderOptions, SessionOptions, WindowPolicy},
    connection::command::{Command, Reply},
    error::AmqpError,
    event::ConnectionEvent,
    frame::AmqpFrame,
    link::{
        Delivery,
        LinkCore,
        LinkKind,
        LinkState,
        PendingSend,
        Receiver,
        ReceiverState,
        SendResolver,
        Sender,
        SenderState,
        TransferOutcome,
    },
    message::Message,
    performative::{
        Attach,
        Begin,
        DeliveryState,
        Detach,
        Disposition,
        End,
        ErrorRecord,
        Flow,
        Performative,
        Role,
        SenderSettleMode,
        Transfer,
        conditions,
    },
};

/// Conservative bound on the frame header plus an encoded transfer
/// performative, excluding the delivery tag which is sized separately.
const TRANSFER_FRAME_OVERHEAD: usize = 64;

/// Session lifecycle as seen from this side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Our begin is on the wire.
    BeginSent,
    /// Both begins exchanged.
    Mapped,
    /// Our end is on the wire.
    EndSent,
    /// Gone; awaiting removal.
    Ended,
}

/// A link reattach the reactor should schedule.
pub(crate) struct ReattachRequest {
    pub(crate) handle: u32,
    pub(crate) delay: Duration,
}

pub(crate) struct SessionCore {
    pub(crate) channel: u16,
    pub(crate) remote_channel: Option<u16>,
    pub(crate) options: SessionOptions,
    pub(crate) state: SessionState,
    /// Frame ceiling negotiated at the connection, applied when
    /// fragmenting outbound deliveries.
    pub(crate) max_frame_size: u32,
    next_outgoing_id: u32,
    next_incoming_id: u32,
    incoming_window: u32,
    outgoing_window: u32,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,
    links: HashMap<u32, LinkCore>,
    by_remote_handle: HashMap<u32, u32>,
    by_name: HashMap<String, u32>,
    delivery_tag_counter: u64,
    pub(crate) pending_begin: Option<Reply<u16>>,
    pub(crate) pending_end: Option<Reply<()>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl SessionCore {
    pub(crate) fn new(
        channel: u16,
        options: SessionOptions,
        max_frame_size: u32,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        pending_begin: Reply<u16>,
    ) -> Self {
        Self {
            channel,
            remote_channel: None,
            options,
            state: SessionState::BeginSent,
            max_frame_size,
            next_outgoing_id: 1,
            next_incoming_id: 0,
            incoming_window: options.incoming_window,
            outgoing_window: options.outgoing_window,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
            links: HashMap::new(),
            by_remote_handle: HashMap::new(),
            by_name: HashMap::new(),
            delivery_tag_counter: 1,
            pending_begin: Some(pending_begin),
            pending_end: None,
            events,
        }
    }

    pub(crate) fn make_begin(&self) -> Performative {
        Performative::Begin(Begin {
            remote_channel: None,
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.outgoing_window,
            handle_max: self.options.handle_max,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        })
    }

    /// Record the peer's begin response and seed the remote windows.
    pub(crate) fn on_begin(&mut self, begin: &Begin, remote_channel: u16) {
        self.remote_channel = Some(remote_channel);
        self.remote_incoming_window = begin.incoming_window;
        self.remote_outgoing_window = begin.outgoing_window;
        self.next_incoming_id = begin.next_outgoing_id;
        self.state = SessionState::Mapped;
        debug!(
            "session mapped: channel={} remote_channel={} remote_incoming_window={}",
            self.channel, remote_channel, self.remote_incoming_window
        );
        if let Some(reply) = self.pending_begin.take() {
            let _ = reply.send(Ok(self.channel));
        }
    }

    pub(crate) fn make_end(&mut self, reply: Reply<()>) -> Performative {
        self.state = SessionState::EndSent;
        self.pending_end = Some(reply);
        Performative::End(End { error: None })
    }

    /// Handle the peer's end, echoing one if the peer initiated.
    pub(crate) fn on_end(&mut self, end: &End, out: &mut Vec<AmqpFrame>) {
        let teardown = AmqpError::Disconnected("session ended".into());
        for link in self.links.values_mut() {
            link.fail_all(&teardown);
        }
        if self.state == SessionState::EndSent {
            if let Some(reply) = self.pending_end.take() {
                let outcome = end
                    .error
                    .clone()
                    .map_or(Ok(()), |error| Err(AmqpError::Peer(error)));
                let _ = reply.send(outcome);
            }
        } else {
            out.push(self.frame(Performative::End(End { error: None })));
        }
        self.state = SessionState::Ended;
        let _ = self.events.send(ConnectionEvent::SessionEnded {
            channel: self.channel,
            error: end.error.clone(),
        });
    }

    /// Lowest unused local handle.
    fn allocate_handle(&self) -> Result<u32, AmqpError> {
        (0..=self.options.handle_max)
            .find(|handle| !self.links.contains_key(handle))
            .ok_or(AmqpError::OverCapacity("link handles exhausted"))
    }

    fn register_link(
        &mut self,
        name: String,
        handle: u32,
        kind: LinkKind,
        reply: Reply<(u32, String)>,
        out: &mut Vec<AmqpFrame>,
    ) {
        let mut link = LinkCore::new(name.clone(), handle, kind);
        link.state = LinkState::Attaching;
        link.pending_attach = Some(reply);
        let attach = link.make_attach();
        self.by_name.insert(name, handle);
        self.links.insert(handle, link);
        out.push(self.frame(Performative::Attach(Box::new(attach))));
    }

    /// Create a sender link and emit its attach.
    pub(crate) fn attach_sender(
        &mut self,
        options: SenderOptions,
        reply: Reply<(u32, String)>,
        out: &mut Vec<AmqpFrame>,
    ) {
        let handle = match self.allocate_handle() {
            Ok(handle) => handle,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let name = options.name.clone().unwrap_or_else(|| {
            format!(
                "sender-{}-{}",
                options.target.address.as_deref().unwrap_or("anonymous"),
                handle
            )
        });
        self.register_link(
            name,
            handle,
            LinkKind::Sender(SenderState::new(options)),
            reply,
            out,
        );
    }

    /// Create a receiver link and emit its attach.
    pub(crate) fn attach_receiver(
        &mut self,
        options: ReceiverOptions,
        deliveries: mpsc::UnboundedSender<Delivery>,
        reply: Reply<(u32, String)>,
        out: &mut Vec<AmqpFrame>,
    ) {
        let handle = match self.allocate_handle() {
            Ok(handle) => handle,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let name = options.name.clone().unwrap_or_else(|| {
            format!(
                "receiver-{}-{}",
                options.source.address.as_deref().unwrap_or("anonymous"),
                handle
            )
        });
        self.register_link(
            name,
            handle,
            LinkKind::Receiver(ReceiverState::new(options, deliveries)),
            reply,
            out,
        );
    }

    /// Handle a peer attach, which answers ours; peer-initiated links
    /// are refused.
    pub(crate) fn on_attach(&mut self, attach: &Attach, out: &mut Vec<AmqpFrame>) {
        let Some(&handle) = self.by_name.get(&attach.name) else {
            warn!(
                "peer-initiated attach for unknown link {:?}; refusing",
                attach.name
            );
            out.push(self.frame(Performative::Detach(Detach {
                handle: attach.handle,
                closed: true,
                error: Some(ErrorRecord::new(conditions::NOT_IMPLEMENTED)),
            })));
            return;
        };
        self.by_remote_handle.insert(attach.handle, handle);
        let mut initial_credit = None;
        let name;
        {
            let Some(link) = self.links.get_mut(&handle) else {
                return;
            };
            link.on_attach_received(attach);
            name = link.name.clone();
            if let Some(receiver) = link.receiver_mut() {
                receiver.on_attach(attach.initial_delivery_count);
                let credit = receiver.replenish();
                initial_credit = Some((receiver.delivery_count, credit));
            }
        }
        if let Some((delivery_count, credit)) = initial_credit {
            out.push(self.link_flow(handle, delivery_count, credit));
        }
        let _ = self.events.send(ConnectionEvent::LinkAttached { name });
        self.drain_sender(handle, out);
    }

    /// Detach a link locally.
    pub(crate) fn detach(
        &mut self,
        handle: u32,
        closed: bool,
        reply: Reply<()>,
        out: &mut Vec<AmqpFrame>,
    ) {
        let Some(link) = self.links.get_mut(&handle) else {
            let _ = reply.send(Err(AmqpError::Argument(format!(
                "no link with handle {handle}"
            ))));
            return;
        };
        // A local detach cancels any pending reattach.
        link.reattach = None;
        link.state = LinkState::Detaching;
        link.pending_detach = Some(reply);
        out.push(self.frame(Performative::Detach(Detach {
            handle,
            closed,
            error: None,
        })));
    }

    /// Handle a peer detach: completes ours, or echoes and maybe
    /// schedules a reattach.
    pub(crate) fn on_detach(
        &mut self,
        detach: &Detach,
        out: &mut Vec<AmqpFrame>,
    ) -> Option<ReattachRequest> {
        let Some(&handle) = self.by_remote_handle.get(&detach.handle) else {
            warn!("detach for unknown remote handle {}", detach.handle);
            return None;
        };
        self.by_remote_handle.remove(&detach.handle);

        let peer_error = detach.error.clone();
        let teardown = peer_error.clone().map_or_else(
            || AmqpError::Disconnected("link detached".into()),
            AmqpError::Peer,
        );

        let name;
        let we_initiated;
        let mut request = None;
        {
            let Some(link) = self.links.get_mut(&handle) else {
                return None;
            };
            link.remote_handle = None;
            name = link.name.clone();
            we_initiated = link.state == LinkState::Detaching;
            link.state = LinkState::Detached;
            if let Some(sender) = link.sender_mut() {
                sender.fail_unsettled(&teardown);
            }
            if we_initiated {
                if let Some(reply) = link.pending_detach.take() {
                    let outcome = peer_error
                        .clone()
                        .map_or(Ok(()), |error| Err(AmqpError::Peer(error)));
                    let _ = reply.send(outcome);
                }
            } else {
                // Peer-initiated: reattach when policy permits, otherwise
                // the queued work has nowhere to go.
                match link
                    .reattach
                    .as_mut()
                    .and_then(crate::backoff::RetrySeries::next_delay)
                {
                    Some(delay) => {
                        debug!("scheduling reattach of {name} in {delay:?}");
                        request = Some(ReattachRequest { handle, delay });
                    }
                    None => {
                        if let Some(sender) = link.sender_mut() {
                            sender.fail_pending(&teardown);
                        }
                    }
                }
            }
        }

        if !we_initiated {
            out.push(self.frame(Performative::Detach(Detach {
                handle,
                closed: detach.closed,
                error: None,
            })));
        }
        let _ = self.events.send(ConnectionEvent::LinkDetached {
            name,
            error: peer_error,
        });
        if detach.closed {
            self.remove_link(handle);
            request = None;
        }
        request
    }

    /// Re-send attach after a reattach backoff fires.
    pub(crate) fn reattach(&mut self, handle: u32, out: &mut Vec<AmqpFrame>) {
        let attach = {
            let Some(link) = self.links.get_mut(&handle) else {
                return;
            };
            if link.state != LinkState::Detached {
                return;
            }
            debug!("reattaching link {}", link.name);
            link.state = LinkState::Attaching;
            link.make_attach()
        };
        out.push(self.frame(Performative::Attach(Box::new(attach))));
    }

    fn remove_link(&mut self, handle: u32) {
        if let Some(link) = self.links.remove(&handle) {
            self.by_name.remove(&link.name);
            if let Some(remote) = link.remote_handle {
                self.by_remote_handle.remove(&remote);
            }
        }
    }

    /// Queue or transmit a message on a sender link.
    pub(crate) fn send(
        &mut self,
        handle: u32,
        message: Message,
        reply: SendResolver,
        out: &mut Vec<AmqpFrame>,
    ) {
        let window_ok = self.remote_incoming_window >= 1;
        let strict = self.options.window_policy == WindowPolicy::Strict;

        let (attached, credit_ok) = {
            let Some(link) = self.links.get_mut(&handle) else {
                let _ = reply.send(Err(AmqpError::Argument(format!(
                    "no link with handle {handle}"
                ))));
                return;
            };
            let attached = link.state == LinkState::Attached;
            if link.state == LinkState::Detached && link.reattach.is_none() {
                let _ = reply.send(Err(AmqpError::Disconnected(
                    "link is detached".into(),
                )));
                return;
            }
            let Some(sender) = link.sender_mut() else {
                let _ = reply.send(Err(AmqpError::Argument(
                    "send on a receiver link".into(),
                )));
                return;
            };
            if let Some(limit) = sender.options.max_message_size {
                match message.encode() {
                    Ok(encoded) if encoded.len() as u64 > limit => {
                        let _ = reply.send(Err(AmqpError::OverCapacity(
                            "message exceeds the link's max-message-size",
                        )));
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = reply.send(Err(err.into()));
                        return;
                    }
                }
            }
            (attached, sender.link_credit >= 1)
        };

        if attached && credit_ok && window_ok {
            self.transmit(handle, &message, reply, out);
            return;
        }
        if strict && attached {
            let reason = if credit_ok {
                "session incoming window exhausted at the peer"
            } else {
                "link credit exhausted"
            };
            let _ = reply.send(Err(AmqpError::OverCapacity(reason)));
            return;
        }
        // Queue until attach or flow lets it through.
        if let Some(sender) = self
            .links
            .get_mut(&handle)
            .and_then(LinkCore::sender_mut)
        {
            sender.pending.push_back(PendingSend { message, reply });
        }
    }

    /// Put one delivery on the wire, fragmenting at the frame ceiling.
    fn transmit(
        &mut self,
        handle: u32,
        message: &Message,
        reply: SendResolver,
        out: &mut Vec<AmqpFrame>,
    ) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                let _ = reply.send(Err(err.into()));
                return;
            }
        };

        let delivery_id = self.next_outgoing_id;
        let tag = Bytes::from(self.delivery_tag_counter.to_string());
        self.delivery_tag_counter += 1;
        self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
        self.outgoing_window = self.outgoing_window.saturating_sub(1);
        self.remote_incoming_window = self.remote_incoming_window.saturating_sub(1);

        let channel = self.channel;
        let budget = self.max_frame_size as usize;
        let Some(sender) = self
            .links
            .get_mut(&handle)
            .and_then(LinkCore::sender_mut)
        else {
            return;
        };
        sender.delivery_count = sender.delivery_count.wrapping_add(1);
        sender.link_credit = sender.link_credit.saturating_sub(1);

        let presettled = sender.options.snd_settle_mode == SenderSettleMode::Settled;
        let overhead = TRANSFER_FRAME_OVERHEAD + tag.len();
        let ideal = budget.saturating_sub(overhead).max(1);
        let chunks: Vec<&[u8]> = if payload.len() + overhead <= budget {
            vec![payload.as_ref()]
        } else {
            payload.chunks(ideal).collect()
        };
        let last = chunks.len() - 1;
        debug!(
            "transmitting delivery {delivery_id} ({} bytes) in {} frame(s)",
            payload.len(),
            chunks.len()
        );
        for (index, chunk) in chunks.iter().enumerate() {
            let mut transfer = Transfer::new(handle);
            transfer.more = index < last;
            if index == 0 {
                transfer.delivery_id = Some(delivery_id);
                transfer.delivery_tag = Some(tag.clone());
                transfer.message_format = Some(0);
                transfer.settled = Some(presettled);
            }
            let mut body = BytesMut::with_capacity(chunk.len());
            body.extend_from_slice(chunk);
            out.push(AmqpFrame {
                channel,
                performative: Some(Performative::Transfer(transfer)),
                payload: body.freeze(),
            });
        }

        if presettled || sender.send_mode() == SendMode::OnSent {
            let _ = reply.send(Ok(DeliveryState::Accepted));
        } else {
            sender.unsettled.insert(delivery_id, reply);
        }
    }

    /// Transmit queued sends while credit and window allow.
    pub(crate) fn drain_sender(&mut self, handle: u32, out: &mut Vec<AmqpFrame>) {
        loop {
            if self.remote_incoming_window == 0 {
                return;
            }
            let next = {
                let Some(link) = self.links.get_mut(&handle) else {
                    return;
                };
                if link.state != LinkState::Attached {
                    return;
                }
                let Some(sender) = link.sender_mut() else {
                    return;
                };
                if sender.link_credit == 0 || sender.pending.is_empty() {
                    return;
                }
                sender.pending.pop_front()
            };
            let Some(PendingSend { message, reply }) = next else {
                return;
            };
            self.transmit(handle, &message, reply, out);
        }
    }

    /// Apply an inbound flow to the session and, when addressed, a link.
    pub(crate) fn on_flow(&mut self, flow: &Flow, out: &mut Vec<AmqpFrame>) {
        self.next_incoming_id = flow.next_outgoing_id;
        self.remote_outgoing_window = flow.outgoing_window;
        self.remote_incoming_window = match flow.next_incoming_id {
            Some(next_incoming_id) => next_incoming_id
                .wrapping_add(flow.incoming_window)
                .wrapping_sub(self.next_outgoing_id),
            None => flow.incoming_window,
        };

        match flow.handle {
            Some(remote_handle) => {
                let Some(&handle) = self.by_remote_handle.get(&remote_handle) else {
                    warn!("flow for unknown remote handle {remote_handle}");
                    return;
                };
                let is_sender = {
                    match self.links.get_mut(&handle).and_then(LinkCore::sender_mut) {
                        Some(sender) => {
                            sender.on_flow(flow);
                            true
                        }
                        None => false,
                    }
                };
                if is_sender {
                    self.drain_sender(handle, out);
                    if flow.drain {
                        // Burn leftover credit and report it consumed.
                        let (delivery_count, available) = {
                            let Some(sender) = self
                                .links
                                .get_mut(&handle)
                                .and_then(LinkCore::sender_mut)
                            else {
                                return;
                            };
                            sender.drain_credit();
                            (sender.delivery_count, sender.available())
                        };
                        out.push(self.link_flow_drained(handle, delivery_count, available));
                    }
                }
            }
            None => {
                // A session flow may unblock every sender link.
                let handles: Vec<u32> = self.links.keys().copied().collect();
                for handle in handles {
                    self.drain_sender(handle, out);
                }
            }
        }

        if flow.echo {
            out.push(self.session_flow(false));
        }
    }

    /// Route an inbound transfer to its receiver link.
    pub(crate) fn on_transfer(
        &mut self,
        transfer: &Transfer,
        payload: &[u8],
        out: &mut Vec<AmqpFrame>,
    ) -> Result<(), AmqpError> {
        let Some(&handle) = self.by_remote_handle.get(&transfer.handle) else {
            return Err(AmqpError::Protocol(format!(
                "transfer for unknown remote handle {}",
                transfer.handle
            )));
        };

        let (outcome, replenish) = {
            let Some(link) = self.links.get_mut(&handle) else {
                return Err(AmqpError::Protocol("transfer for a removed link".into()));
            };
            let Some(receiver) = link.receiver_mut() else {
                return Err(AmqpError::Protocol(
                    "transfer addressed to a sender link".into(),
                ));
            };

            let new_delivery = receiver.partial.is_none() && !transfer.aborted;
            let outcome = receiver.on_transfer(transfer, payload)?;
            if new_delivery {
                if let Some(delivery_id) = transfer.delivery_id {
                    self.next_incoming_id = delivery_id.wrapping_add(1);
                }
                self.incoming_window = self.incoming_window.saturating_sub(1);
                self.remote_outgoing_window = self.remote_outgoing_window.saturating_sub(1);
            }

            let replenish = (matches!(outcome, TransferOutcome::Complete { .. })
                && receiver.wants_replenish())
            .then(|| {
                let credit = receiver.replenish();
                (receiver.delivery_count, credit)
            });
            (outcome, replenish)
        };

        if let TransferOutcome::Complete {
            delivery_id,
            auto_accept: true,
        } = outcome
        {
            out.push(self.frame(Performative::Disposition(Disposition {
                role: Role::Receiver,
                first: delivery_id,
                last: None,
                settled: true,
                state: Some(DeliveryState::Accepted),
                batchable: false,
            })));
        }
        if let Some((delivery_count, credit)) = replenish {
            out.push(self.link_flow(handle, delivery_count, credit));
        }

        // Re-advertise the session window before it pins the peer.
        if self.incoming_window == 0 {
            self.incoming_window = self.options.incoming_window;
            out.push(self.session_flow(false));
        }
        Ok(())
    }

    /// Apply an inbound disposition to the sender links it covers.
    pub(crate) fn on_disposition(&mut self, disposition: &Disposition) {
        if disposition.role != Role::Receiver || !disposition.settled {
            // Unsettled updates are held until the peer settles.
            return;
        }
        let state = disposition
            .state
            .clone()
            .unwrap_or(DeliveryState::Accepted);
        for link in self.links.values_mut() {
            let Some(sender) = link.sender_mut() else {
                continue;
            };
            let covered: Vec<u32> = sender
                .unsettled
                .keys()
                .copied()
                .filter(|&id| disposition.covers(id))
                .collect();
            for delivery_id in covered {
                sender.settle(delivery_id, &state);
            }
        }
    }

    /// Emit a disposition decided by the application (second settle
    /// mode).
    pub(crate) fn dispose(
        &mut self,
        handle: u32,
        delivery_id: u32,
        state: DeliveryState,
        reply: Reply<()>,
        out: &mut Vec<AmqpFrame>,
    ) {
        {
            let Some(receiver) = self
                .links
                .get_mut(&handle)
                .and_then(LinkCore::receiver_mut)
            else {
                let _ = reply.send(Err(AmqpError::Argument(format!(
                    "no receiver link with handle {handle}"
                ))));
                return;
            };
            receiver.unsettled.remove(&delivery_id);
        }
        out.push(self.frame(Performative::Disposition(Disposition {
            role: Role::Receiver,
            first: delivery_id,
            last: None,
            settled: true,
            state: Some(state),
            batchable: false,
        })));
        let _ = reply.send(Ok(()));
    }

    /// Grant extra credit on a receiver link.
    pub(crate) fn add_credit(
        &mut self,
        handle: u32,
        credit: u32,
        reply: Reply<()>,
        out: &mut Vec<AmqpFrame>,
    ) {
        let granted = {
            let Some(receiver) = self
                .links
                .get_mut(&handle)
                .and_then(LinkCore::receiver_mut)
            else {
                let _ = reply.send(Err(AmqpError::Argument(format!(
                    "no receiver link with handle {handle}"
                ))));
                return;
            };
            receiver.link_credit = receiver.link_credit.saturating_add(credit);
            (receiver.delivery_count, receiver.link_credit)
        };
        out.push(self.link_flow(handle, granted.0, granted.1));
        let _ = reply.send(Ok(()));
    }

    /// Fail everything on transport loss without emitting frames. Links
    /// with a reattach policy keep their queued sends for the reconnect;
    /// the rest have nowhere to go.
    pub(crate) fn force_detach_all(&mut self, error: &AmqpError) {
        for link in self.links.values_mut() {
            link.force_detach(error);
            if link.reattach.is_none() {
                link.fail_all(error);
            }
        }
        self.by_remote_handle.clear();
        self.remote_channel = None;
        if let Some(reply) = self.pending_begin.take() {
            let _ = reply.send(Err(error.clone()));
        }
        if let Some(reply) = self.pending_end.take() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// Terminal teardown: fail every completion on every link.
    pub(crate) fn fail_all(&mut self, error: &AmqpError) {
        for link in self.links.values_mut() {
            link.fail_all(error);
        }
        if let Some(reply) = self.pending_begin.take() {
            let _ = reply.send(Err(error.clone()));
        }
        if let Some(reply) = self.pending_end.take() {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// Rebuild wire state after a reconnect: fresh begin, and links with
    /// a reattach policy go straight back on the wire.
    pub(crate) fn replay_after_reconnect(
        &mut self,
        max_frame_size: u32,
        out: &mut Vec<AmqpFrame>,
    ) {
        self.state = SessionState::BeginSent;
        self.max_frame_size = max_frame_size;
        self.next_outgoing_id = 1;
        self.next_incoming_id = 0;
        self.incoming_window = self.options.incoming_window;
        self.outgoing_window = self.options.outgoing_window;
        self.remote_incoming_window = 0;
        self.remote_outgoing_window = 0;
        out.push(self.frame(self.make_begin()));
        let handles: Vec<u32> = self
            .links
            .iter()
            .filter(|(_, link)| link.reattach.is_some())
            .map(|(&handle, _)| handle)
            .collect();
        for handle in handles {
            self.reattach(handle, out);
        }
    }

    /// A session-level flow snapshot.
    pub(crate) fn session_flow(&self, echo: bool) -> AmqpFrame {
        self.frame(Performative::Flow(Flow {
            next_incoming_id: Some(self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.outgoing_window,
            handle: None,
            delivery_count: None,
            link_credit: None,
            available: None,
            drain: false,
            echo,
            properties: None,
        }))
    }

    /// A flow carrying receiver credit for one link.
    fn link_flow(&self, handle: u32, delivery_count: u32, credit: u32) -> AmqpFrame {
        let mut frame = self.session_flow(false);
        if let Some(Performative::Flow(flow)) = frame.performative.as_mut() {
            flow.handle = Some(handle);
            flow.delivery_count = Some(delivery_count);
            flow.link_credit = Some(credit);
        }
        frame
    }

    /// A flow answering a drain request on a sender link.
    fn link_flow_drained(&self, handle: u32, delivery_count: u32, available: u32) -> AmqpFrame {
        let mut frame = self.link_flow(handle, delivery_count, 0);
        if let Some(Performative::Flow(flow)) = frame.performative.as_mut() {
            flow.drain = true;
            flow.available = Some(available);
        }
        frame
    }

    fn frame(&self, performative: Performative) -> AmqpFrame {
        AmqpFrame::new(self.channel, performative)
    }
}

/// Handle to a session.
#[derive(Clone)]
pub struct Session {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) channel: u16,
}

impl Session {
    /// The session's local channel.
    #[must_use]
    pub const fn channel(&self) -> u16 { self.channel }

    /// Attach a sender link on this session.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the attach fails or the connection is
    /// gone.
    pub async fn attach_sender(&self, options: SenderOptions) -> Result<Sender, AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::AttachSender {
                channel: self.channel,
                options,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        let (handle, name) = rx
            .await
            .map_err(|_| AmqpError::Disconnected("attach abandoned by teardown".into()))??;
        Ok(Sender {
            commands: self.commands.clone(),
            channel: self.channel,
            handle,
            name,
        })
    }

    /// Attach a receiver link on this session.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the attach fails or the connection is
    /// gone.
    pub async fn attach_receiver(&self, options: ReceiverOptions) -> Result<Receiver, AmqpError> {
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::AttachReceiver {
                channel: self.channel,
                options,
                deliveries: deliveries_tx,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        let (handle, name) = rx
            .await
            .map_err(|_| AmqpError::Disconnected("attach abandoned by teardown".into()))??;
        Ok(Receiver {
            commands: self.commands.clone(),
            channel: self.channel,
            handle,
            name,
            deliveries: deliveries_rx,
        })
    }

    /// End the session, awaiting the peer's end.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] if the peer's end carries an error.
    pub async fn end(&self) -> Result<(), AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::End {
                channel: self.channel,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("end abandoned by teardown".into()))?
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel)
            .finish()
    }
}
