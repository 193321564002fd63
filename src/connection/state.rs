//! Connection state machine vocabulary.

use std::sync::{Arc, Mutex};

/// States of the connection handshake and teardown.
///
/// Transitions are driven by the reactor; the variants mirror the
/// protocol's open/close choreography, with the SASL tunnel folded into
/// [`InSasl`](Self::InSasl).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected,
    /// Transport up; no header sent yet.
    Start,
    /// SASL negotiation in progress.
    InSasl,
    /// Peer's header arrived before ours went out.
    HdrRcvd,
    /// Our protocol header is on the wire.
    HdrSent,
    /// Both headers exchanged.
    HdrExch,
    /// Peer's open arrived before ours went out.
    OpenRcvd,
    /// Our open is on the wire.
    OpenSent,
    /// Open handshake complete; traffic flows.
    Opened,
    /// Peer's close arrived first.
    CloseRcvd,
    /// Our close is on the wire.
    CloseSent,
    /// We closed with an error and are discarding inbound frames.
    Discarding,
    /// Tearing the transport down.
    Disconnecting,
    /// The reactor has finished.
    End,
}

impl ConnectionState {
    /// True once no further traffic is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::End)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Start => "START",
            Self::InSasl => "IN_SASL",
            Self::HdrRcvd => "HDR_RCVD",
            Self::HdrSent => "HDR_SENT",
            Self::HdrExch => "HDR_EXCH",
            Self::OpenRcvd => "OPEN_RCVD",
            Self::OpenSent => "OPEN_SENT",
            Self::Opened => "OPENED",
            Self::CloseRcvd => "CLOSE_RCVD",
            Self::CloseSent => "CLOSE_SENT",
            Self::Discarding => "DISCARDING",
            Self::Disconnecting => "DISCONNECTING",
            Self::End => "END",
        };
        f.write_str(name)
    }
}

/// Shared, ordered record of the states a connection has passed through.
///
/// The reactor appends on every transition; handles and tests read a
/// snapshot. Useful for asserting handshake choreography.
#[derive(Clone, Default)]
pub struct StateTrace {
    states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl StateTrace {
    /// A trace seeded with [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new() -> Self {
        let trace = Self::default();
        trace.push(ConnectionState::Disconnected);
        trace
    }

    pub(crate) fn push(&self, state: ConnectionState) {
        if let Ok(mut states) = self.states.lock() {
            if states.last() != Some(&state) {
                states.push(state);
            }
        }
    }

    /// Snapshot of the states seen so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionState> {
        self.states.lock().map(|states| states.clone()).unwrap_or_default()
    }
}

impl std::fmt::Debug for StateTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
