//! Receiver links: inbound reassembly, credit replenishment, and
//! application-driven dispositions.

use std::collections::HashSet;

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::ReceiverOptions,
    connection::command::Command,
    error::AmqpError,
    message::Message,
    performative::{DeliveryState, ErrorRecord, ReceiverSettleMode, Transfer},
};

/// A delivery surfaced to the application.
#[derive(Debug)]
pub struct Delivery {
    /// Session-scoped delivery id.
    pub delivery_id: u32,
    /// Link-scoped delivery tag.
    pub delivery_tag: Bytes,
    /// The decoded message.
    pub message: Message,
    /// The delivery is already settled; dispositions are unnecessary.
    pub settled: bool,
}

/// A delivery being reassembled across transfer frames.
pub(crate) struct PartialDelivery {
    pub(crate) delivery_id: u32,
    pub(crate) delivery_tag: Bytes,
    pub(crate) settled: bool,
    pub(crate) buffer: BytesMut,
}

/// What the session should do after a transfer lands on a receiver.
pub(crate) enum TransferOutcome {
    /// Mid-delivery; nothing to surface yet.
    Incomplete,
    /// A complete delivery was surfaced; `auto_accept` asks the session
    /// to emit an accepted disposition (first settle mode).
    Complete {
        delivery_id: u32,
        auto_accept: bool,
    },
    /// The sender aborted the delivery; the buffer was dropped.
    Aborted,
}

/// Receiver-side link bookkeeping.
pub(crate) struct ReceiverState {
    pub(crate) options: ReceiverOptions,
    /// Credit currently outstanding at the peer.
    pub(crate) link_credit: u32,
    /// Deliveries received, continuing the sender's count.
    pub(crate) delivery_count: u32,
    pub(crate) partial: Option<PartialDelivery>,
    pub(crate) deliveries: mpsc::UnboundedSender<Delivery>,
    /// Deliveries awaiting an application disposition (second mode).
    pub(crate) unsettled: HashSet<u32>,
}

impl ReceiverState {
    pub(crate) fn new(
        options: ReceiverOptions,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            options,
            link_credit: 0,
            delivery_count: 0,
            partial: None,
            deliveries,
            unsettled: HashSet::new(),
        }
    }

    /// Seed the delivery count from the sender's attach.
    pub(crate) fn on_attach(&mut self, initial_delivery_count: Option<u32>) {
        if let Some(count) = initial_delivery_count {
            self.delivery_count = count;
        }
    }

    /// Consume one transfer frame addressed to this link.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError::Protocol`] when a continuation diverges from
    /// the delivery it claims to continue, and [`AmqpError`] decode
    /// failures for malformed assembled payloads.
    pub(crate) fn on_transfer(
        &mut self,
        transfer: &Transfer,
        payload: &[u8],
    ) -> Result<TransferOutcome, AmqpError> {
        if transfer.aborted {
            self.partial = None;
            return Ok(TransferOutcome::Aborted);
        }

        if let Some(partial) = self.partial.as_mut() {
            // Continuations may repeat the id and tag, but only
            // identically.
            if transfer.delivery_id.is_some_and(|id| id != partial.delivery_id) {
                return Err(AmqpError::Protocol(format!(
                    "continuation transfer changed delivery-id from {} to {:?}",
                    partial.delivery_id, transfer.delivery_id
                )));
            }
            if transfer
                .delivery_tag
                .as_ref()
                .is_some_and(|tag| *tag != partial.delivery_tag)
            {
                return Err(AmqpError::Protocol(
                    "continuation transfer changed the delivery-tag".into(),
                ));
            }
            if transfer.settled == Some(true) {
                partial.settled = true;
            }
        } else {
            // First frame of a delivery: id and tag are mandatory and
            // consume one credit.
            let delivery_id = transfer.delivery_id.ok_or_else(|| {
                AmqpError::Protocol("first transfer of a delivery without delivery-id".into())
            })?;
            let delivery_tag = transfer.delivery_tag.clone().ok_or_else(|| {
                AmqpError::Protocol("first transfer of a delivery without delivery-tag".into())
            })?;
            self.delivery_count = self.delivery_count.wrapping_add(1);
            self.link_credit = self.link_credit.saturating_sub(1);
            self.partial = Some(PartialDelivery {
                delivery_id,
                delivery_tag,
                settled: transfer.settled.unwrap_or(false),
                buffer: BytesMut::new(),
            });
        }

        let Some(partial) = self.partial.as_mut() else {
            return Err(AmqpError::Protocol("transfer lost its delivery".into()));
        };
        partial.buffer.extend_from_slice(payload);
        if transfer.more {
            return Ok(TransferOutcome::Incomplete);
        }

        let Some(partial) = self.partial.take() else {
            return Err(AmqpError::Protocol("transfer lost its delivery".into()));
        };
        debug!(
            "delivery {} complete: {} bytes",
            partial.delivery_id,
            partial.buffer.len()
        );
        let message = Message::decode(&partial.buffer)?;
        let settled = partial.settled;
        let auto_accept =
            !settled && self.options.rcv_settle_mode == ReceiverSettleMode::First;
        if !settled && self.options.rcv_settle_mode == ReceiverSettleMode::Second {
            self.unsettled.insert(partial.delivery_id);
        }
        let delivery_id = partial.delivery_id;
        let _ = self.deliveries.send(Delivery {
            delivery_id,
            delivery_tag: partial.delivery_tag,
            message,
            settled,
        });
        Ok(TransferOutcome::Complete {
            delivery_id,
            auto_accept,
        })
    }

    /// Whether outstanding credit has fallen below the watermark.
    pub(crate) fn wants_replenish(&self) -> bool {
        self.link_credit < self.options.watermark()
    }

    /// Top credit back up to the configured grant, returning the new
    /// outstanding figure for the flow frame.
    pub(crate) fn replenish(&mut self) -> u32 {
        self.link_credit = self.options.credit;
        self.link_credit
    }

    /// Drop any partial delivery, as on force-detach.
    pub(crate) fn reset_partial(&mut self) { self.partial = None; }
}

/// Handle to a receiver link.
pub struct Receiver {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) channel: u16,
    pub(crate) handle: u32,
    pub(crate) name: String,
    pub(crate) deliveries: mpsc::UnboundedReceiver<Delivery>,
}

impl Receiver {
    /// The link name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// The next delivery, in arrival order; `None` once the link and
    /// reactor are gone.
    pub async fn recv(&mut self) -> Option<Delivery> { self.deliveries.recv().await }

    /// Accept a delivery (second settle mode).
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link or connection are gone.
    pub async fn accept(&self, delivery: &Delivery) -> Result<(), AmqpError> {
        self.dispose(delivery, DeliveryState::Accepted).await
    }

    /// Reject a delivery with an error.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link or connection are gone.
    pub async fn reject(
        &self,
        delivery: &Delivery,
        error: Option<ErrorRecord>,
    ) -> Result<(), AmqpError> {
        self.dispose(delivery, DeliveryState::Rejected { error }).await
    }

    /// Release a delivery back to the sender.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link or connection are gone.
    pub async fn release(&self, delivery: &Delivery) -> Result<(), AmqpError> {
        self.dispose(delivery, DeliveryState::Released).await
    }

    /// Modify and release a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link or connection are gone.
    pub async fn modify(
        &self,
        delivery: &Delivery,
        delivery_failed: bool,
        undeliverable_here: bool,
    ) -> Result<(), AmqpError> {
        self.dispose(
            delivery,
            DeliveryState::Modified {
                delivery_failed,
                undeliverable_here,
                message_annotations: None,
            },
        )
        .await
    }

    /// Grant additional link credit beyond the automatic watermark.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError`] when the link or connection are gone.
    pub async fn add_credit(&self, credit: u32) -> Result<(), AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::AddCredit {
                channel: self.channel,
                handle: self.handle,
                credit,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("credit abandoned by teardown".into()))?
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

    async fn dispose(&self, delivery: &Delivery, state: DeliveryState) -> Result<(), AmqpError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Dispose {
                channel: self.channel,
                handle: self.handle,
                delivery_id: delivery.delivery_id,
                state,
                reply,
            })
            .map_err(|_| AmqpError::Disconnected("connection reactor is gone".into()))?;
        rx.await
            .map_err(|_| AmqpError::Disconnected("disposition abandoned by teardown".into()))?
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("handle", &self.handle)
            .finish()
    }
}
