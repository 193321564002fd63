//! Connection, session, and link policies.
//!
//! Policy is passed explicitly; nothing here is global. Every option has
//! a default matching common broker expectations, and the option structs
//! expose chainable `with_` setters.

use std::{sync::Arc, time::Duration};

use crate::{
    backoff::RetryPolicy,
    frame::MIN_MAX_FRAME_SIZE,
    performative::{ReceiverSettleMode, SenderSettleMode, Source, Target},
    sasl::SaslMechanism,
};

/// When a sender's send future completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendMode {
    /// Complete once the last transfer frame is written.
    OnSent,
    /// Complete when the peer's disposition settles the delivery.
    #[default]
    OnSettle,
}

/// How the session treats a send that would overdraw the peer's
/// incoming window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Fail the send with an over-capacity error.
    Strict,
    /// Clamp at zero and queue until a flow restores the window.
    #[default]
    Relaxed,
}

/// TLS material handed through to the transport seam. The core never
/// interprets it.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// PEM-encoded private key.
    pub key: Option<Vec<u8>>,
    /// PEM-encoded certificate chain.
    pub cert: Option<Vec<u8>>,
    /// PEM-encoded trust anchors.
    pub ca: Option<Vec<u8>>,
    /// Verify the server certificate.
    pub reject_unauthorized: bool,
}

/// Connection-level policy.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Container identity sent in the open performative.
    pub container_id: String,
    /// Hostname override for open and SASL; defaults to the dialled host.
    pub hostname: Option<String>,
    /// Advertised maximum frame size; clamped to the spec minimum of 512.
    pub max_frame_size: u32,
    /// Highest channel number offered to the peer.
    pub channel_max: u16,
    /// Desired idle timeout driving outbound heartbeats.
    pub idle_timeout: Option<Duration>,
    /// Reconnect policy after transport loss.
    pub reconnect: Option<RetryPolicy>,
    /// SASL mechanisms in preference order; empty means no SASL layer.
    pub sasl: Vec<Arc<dyn SaslMechanism>>,
    /// TLS material for transports that use it.
    pub tls: Option<TlsOptions>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            container_id: "amqwire".into(),
            hostname: None,
            max_frame_size: 65_536,
            channel_max: 1024,
            idle_timeout: None,
            reconnect: None,
            sasl: Vec::new(),
            tls: None,
        }
    }
}

impl ConnectionOptions {
    /// Options with the given container id.
    #[must_use]
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            ..Self::default()
        }
    }

    /// Set the advertised maximum frame size (clamped to 512).
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size.max(MIN_MAX_FRAME_SIZE);
        self
    }

    /// Set the idle timeout driving heartbeats.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: RetryPolicy) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Add a SASL mechanism to the preference list.
    #[must_use]
    pub fn with_sasl(mut self, mechanism: Arc<dyn SaslMechanism>) -> Self {
        self.sasl.push(mechanism);
        self
    }

    /// Advertised idle timeout in milliseconds, if any.
    #[must_use]
    pub fn idle_timeout_millis(&self) -> Option<u32> {
        self.idle_timeout
            .map(|t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX))
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("container_id", &self.container_id)
            .field("hostname", &self.hostname)
            .field("max_frame_size", &self.max_frame_size)
            .field("channel_max", &self.channel_max)
            .field("idle_timeout", &self.idle_timeout)
            .field("reconnect", &self.reconnect)
            .field("sasl_mechanisms", &self.sasl.len())
            .finish_non_exhaustive()
    }
}

/// Session-level policy.
#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    /// Transfers we will accept before re-advertising the window.
    pub incoming_window: u32,
    /// Transfers we may emit.
    pub outgoing_window: u32,
    /// Highest link handle offered to the peer.
    pub handle_max: u32,
    /// Strict or relaxed window accounting.
    pub window_policy: WindowPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            incoming_window: 2048,
            outgoing_window: 2048,
            handle_max: 255,
            window_policy: WindowPolicy::Relaxed,
        }
    }
}

/// Sender link policy.
#[derive(Clone, Debug)]
pub struct SenderOptions {
    /// Link name; generated from the target address when absent.
    pub name: Option<String>,
    /// Where messages land.
    pub target: Target,
    /// Local source, usually empty for senders.
    pub source: Option<Source>,
    /// Sender settlement mode.
    pub snd_settle_mode: SenderSettleMode,
    /// Receiver settlement mode requested of the peer.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Initial delivery count advertised on attach.
    pub initial_delivery_count: u32,
    /// Largest message we will send.
    pub max_message_size: Option<u64>,
    /// When send futures complete.
    pub send_mode: SendMode,
    /// Reattach policy after a peer-initiated detach.
    pub reattach: Option<RetryPolicy>,
}

impl SenderOptions {
    /// Sender options targeting `address`.
    #[must_use]
    pub fn target(address: impl Into<String>) -> Self {
        Self {
            name: None,
            target: Target::with_address(address),
            source: Some(Source::default()),
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            initial_delivery_count: 1,
            max_message_size: None,
            send_mode: SendMode::default(),
            reattach: None,
        }
    }

    /// Set the send completion mode.
    #[must_use]
    pub fn with_send_mode(mut self, send_mode: SendMode) -> Self {
        self.send_mode = send_mode;
        self
    }

    /// Set the reattach policy.
    #[must_use]
    pub fn with_reattach(mut self, reattach: RetryPolicy) -> Self {
        self.reattach = Some(reattach);
        self
    }
}

/// Receiver link policy.
#[derive(Clone, Debug)]
pub struct ReceiverOptions {
    /// Link name; generated from the source address when absent.
    pub name: Option<String>,
    /// Where messages originate.
    pub source: Source,
    /// Local target, usually empty for receivers.
    pub target: Option<Target>,
    /// Sender settlement mode requested of the peer.
    pub snd_settle_mode: SenderSettleMode,
    /// Receiver settlement mode.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Credit granted on attach and restored at the watermark.
    pub credit: u32,
    /// Replenish when outstanding credit falls below this; defaults to
    /// half the initial credit.
    pub credit_watermark: Option<u32>,
    /// Largest message we will accept.
    pub max_message_size: Option<u64>,
    /// Reattach policy after a peer-initiated detach.
    pub reattach: Option<RetryPolicy>,
}

impl ReceiverOptions {
    /// Receiver options reading from `address`.
    #[must_use]
    pub fn source(address: impl Into<String>) -> Self {
        Self {
            name: None,
            source: Source::with_address(address),
            target: Some(Target::default()),
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            credit: 100,
            credit_watermark: None,
            max_message_size: None,
            reattach: None,
        }
    }

    /// Set the initial credit.
    #[must_use]
    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    /// Set the receiver settlement mode.
    #[must_use]
    pub fn with_rcv_settle_mode(mut self, mode: ReceiverSettleMode) -> Self {
        self.rcv_settle_mode = mode;
        self
    }

    /// The effective replenishment watermark.
    #[must_use]
    pub fn watermark(&self) -> u32 { self.credit_watermark.unwrap_or(self.credit / 2) }
}
