//! The per-connection reactor task.
//!
//! One task owns the transport, the parse buffer, every state machine,
//! and all timers, so frames are processed strictly in arrival order and
//! no lock guards protocol state. Handles reach it through the command
//! channel; completions travel back over oneshots; everything else is an
//! event.
//!
//! State machine handlers never touch the socket: they append frames to
//! an outbound buffer which the reactor flushes after each step, keeping
//! side effects out of the transitions and frame boundaries intact on
//! the byte stream.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::{Buf, BytesMut};
use log::{debug, info, trace, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    address::AmqpAddress,
    backoff::RetrySeries,
    config::ConnectionOptions,
    connection::{
        command::{Command, Reply},
        state::{ConnectionState, StateTrace},
    },
    error::AmqpError,
    event::ConnectionEvent,
    frame::{
        AMQP_PROTOCOL_HEADER,
        AmqpFrame,
        Frame,
        FrameCodec,
        MIN_MAX_FRAME_SIZE,
        SASL_PROTOCOL_HEADER,
        parse_protocol_header,
    },
    performative::{Close, ErrorRecord, Open, Performative, conditions},
    sasl::{SaslClient, SaslStep},
    session::{SessionCore, SessionState},
    transport::{Connector, IoStream},
};

const READ_CHUNK: usize = 8 * 1024;

/// How to re-establish the transport after loss.
pub(crate) struct Dial {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) address: AmqpAddress,
}

/// Work the timer wheel asks the reactor to do.
#[derive(Default)]
struct TickActions {
    /// The reconnect backoff expired; dial again.
    dial: bool,
    /// The peer's idle window elapsed with no inbound traffic.
    peer_idle_expired: bool,
}

pub(crate) struct Reactor {
    io: Option<IoStream>,
    read_buf: BytesMut,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    shutdown: CancellationToken,
    dial: Option<Dial>,
    core: Core,
}

impl Reactor {
    pub(crate) fn new(
        io: IoStream,
        dial: Option<Dial>,
        options: ConnectionOptions,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        trace: StateTrace,
        pending_open: Reply<()>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            io: Some(io),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            cmd_rx,
            commands_open: true,
            shutdown,
            dial,
            core: Core::new(options, events, trace, pending_open),
        }
    }

    /// Drive the connection until it terminates.
    pub(crate) async fn run(mut self) {
        self.core.start();
        self.flush().await;

        loop {
            if self.core.finished {
                break;
            }

            let deadline = self.core.next_deadline();
            let step = {
                let io = self.io.as_mut();
                let read_buf = &mut self.read_buf;
                tokio::select! {
                    biased;

                    () = self.shutdown.cancelled() => Step::Shutdown,
                    cmd = self.cmd_rx.recv(), if self.commands_open => Step::Command(cmd),
                    res = Self::read_some(io, read_buf) => Step::Read(res),
                    () = Self::sleep_until(deadline), if deadline.is_some() => Step::Tick,
                }
            };

            match step {
                Step::Shutdown => {
                    self.core
                        .terminate(Some(AmqpError::Disconnected("shutdown requested".into())));
                }
                Step::Command(None) => {
                    // Every handle is gone; close out cleanly.
                    self.commands_open = false;
                    self.core.close_orphaned();
                }
                Step::Command(Some(command)) => self.core.handle_command(command),
                Step::Read(Ok(0)) => {
                    self.handle_transport_loss(AmqpError::Disconnected(
                        "transport closed by peer".into(),
                    ));
                }
                Step::Read(Ok(_)) => {
                    self.core.last_incoming = Instant::now();
                    if let Err(error) = self.core.on_bytes(&mut self.read_buf) {
                        self.core.on_inbound_error(error);
                    }
                }
                Step::Read(Err(err)) => {
                    self.handle_transport_loss(AmqpError::Io(err));
                }
                Step::Tick => {
                    let actions = self.core.on_tick(Instant::now());
                    if actions.peer_idle_expired {
                        self.handle_transport_loss(AmqpError::Disconnected(
                            "peer idle timeout expired with no inbound traffic".into(),
                        ));
                    }
                    if actions.dial {
                        self.redial().await;
                    }
                }
            }

            self.flush().await;
        }

        self.flush().await;
        if let Some(io) = self.io.as_mut() {
            let _ = io.shutdown().await;
        }
        debug!("connection reactor finished");
    }

    async fn read_some(io: Option<&mut IoStream>, buf: &mut BytesMut) -> std::io::Result<usize> {
        match io {
            Some(io) => {
                buf.reserve(READ_CHUNK);
                io.read_buf(buf).await
            }
            None => std::future::pending().await,
        }
    }

    async fn sleep_until(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Write out everything the state machines queued.
    async fn flush(&mut self) {
        if self.core.out.is_empty() {
            return;
        }
        let Some(io) = self.io.as_mut() else {
            self.core.out.clear();
            return;
        };
        let bytes = self.core.out.split();
        trace!("flushing {} outbound bytes", bytes.len());
        if let Err(err) = io.write_all(&bytes).await {
            self.handle_transport_loss(AmqpError::Io(err));
        }
    }

    fn handle_transport_loss(&mut self, error: AmqpError) {
        self.io = None;
        self.read_buf.clear();
        let can_redial = self.dial.is_some();
        self.core.on_transport_loss(error, can_redial);
    }

    /// Attempt the reconnect dial the backoff released.
    async fn redial(&mut self) {
        let Some(dial) = self.dial.as_ref() else {
            return;
        };
        info!("reconnecting to {}", dial.address);
        match dial
            .connector
            .connect(&dial.address, self.core.options.tls.as_ref())
            .await
        {
            Ok(io) => {
                self.io = Some(io);
                self.read_buf.clear();
                self.core.start();
            }
            Err(err) => {
                warn!("reconnect dial failed: {err}");
                self.core.on_dial_failure(AmqpError::Io(err));
            }
        }
    }
}

enum Step {
    Shutdown,
    Command(Option<Command>),
    Read(std::io::Result<usize>),
    Tick,
}

/// All protocol state for one connection.
struct Core {
    options: ConnectionOptions,
    state: ConnectionState,
    /// Set by [`Core::terminate`]; the reactor exits once true. Distinct
    /// from [`ConnectionState::Disconnected`], which also describes the
    /// gap between transport loss and a reconnect dial.
    finished: bool,
    trace: StateTrace,
    codec: FrameCodec,
    out: BytesMut,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    sessions: HashMap<u16, SessionCore>,
    remote_to_local: HashMap<u16, u16>,
    /// The peer's open, once received.
    remote_open: Option<Open>,
    /// min(local, peer) frame ceiling applied to outbound fragmentation.
    negotiated_max_frame: u32,
    sasl: Option<SaslClient>,
    awaiting_header: bool,
    pending_open: Option<Reply<()>>,
    pending_close: Option<Reply<()>>,
    last_outgoing: Instant,
    last_incoming: Instant,
    /// Pending link reattaches: fire time, channel, handle.
    reattach_timers: Vec<(Instant, u16, u32)>,
    reconnect: Option<RetrySeries>,
    reconnect_at: Option<Instant>,
}

impl Core {
    fn new(
        options: ConnectionOptions,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        trace: StateTrace,
        pending_open: Reply<()>,
    ) -> Self {
        let reconnect = options.reconnect.map(RetrySeries::new);
        let max_frame = options.max_frame_size.max(MIN_MAX_FRAME_SIZE);
        Self {
            options,
            state: ConnectionState::Disconnected,
            finished: false,
            trace,
            codec: FrameCodec::new(max_frame),
            out: BytesMut::new(),
            events,
            sessions: HashMap::new(),
            remote_to_local: HashMap::new(),
            remote_open: None,
            negotiated_max_frame: max_frame,
            sasl: None,
            awaiting_header: false,
            pending_open: Some(pending_open),
            pending_close: None,
            last_outgoing: Instant::now(),
            last_incoming: Instant::now(),
            reattach_timers: Vec::new(),
            reconnect,
            reconnect_at: None,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("connection state {} -> {}", self.state, state);
            self.state = state;
            self.trace.push(state);
        }
    }

    /// Begin the handshake on a fresh transport.
    fn start(&mut self) {
        self.set_state(ConnectionState::Start);
        self.last_outgoing = Instant::now();
        self.last_incoming = Instant::now();
        self.reconnect_at = None;
        if self.options.sasl.is_empty() {
            self.out.extend_from_slice(&AMQP_PROTOCOL_HEADER);
            self.set_state(ConnectionState::HdrSent);
        } else {
            self.sasl = Some(SaslClient::new(
                self.options.sasl.clone(),
                self.options.hostname.clone(),
            ));
            self.out.extend_from_slice(&SASL_PROTOCOL_HEADER);
            self.set_state(ConnectionState::InSasl);
        }
        self.awaiting_header = true;
    }

    /// Consume buffered inbound bytes: the protocol header first, then
    /// complete frames in arrival order.
    fn on_bytes(&mut self, buf: &mut BytesMut) -> Result<(), AmqpError> {
        loop {
            if self.awaiting_header {
                if buf.len() < 8 {
                    return Ok(());
                }
                let mut header = [0u8; 8];
                header.copy_from_slice(&buf[..8]);
                buf.advance(8);
                self.on_protocol_header(header)?;
                continue;
            }
            match self.codec.decode(buf)? {
                Some(frame) => self.dispatch(frame)?,
                None => return Ok(()),
            }
            if self.finished {
                return Ok(());
            }
        }
    }

    fn on_protocol_header(&mut self, header: [u8; 8]) -> Result<(), AmqpError> {
        let id = parse_protocol_header(header)?;
        let expected_sasl = self.state == ConnectionState::InSasl;
        let got_sasl = id == crate::frame::ProtocolId::Sasl;
        if expected_sasl != got_sasl {
            return Err(AmqpError::Version(header));
        }
        self.awaiting_header = false;
        if !expected_sasl {
            // Both AMQP headers exchanged; open immediately.
            self.set_state(ConnectionState::HdrExch);
            self.send_open();
            self.set_state(ConnectionState::OpenSent);
        }
        Ok(())
    }

    fn send_open(&mut self) {
        let open = Open {
            container_id: self.options.container_id.clone(),
            hostname: self.options.hostname.clone(),
            max_frame_size: self.codec.max_frame_size,
            channel_max: self.options.channel_max,
            idle_timeout: self.options.idle_timeout_millis(),
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        self.write_amqp(AmqpFrame::new(0, Performative::Open(open)));
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), AmqpError> {
        trace!("inbound {}", frame.name());
        match frame {
            Frame::Sasl(body) => self.on_sasl(&body),
            Frame::Amqp(frame) => self.on_amqp(frame),
        }
    }

    fn on_sasl(&mut self, body: &crate::performative::SaslBody) -> Result<(), AmqpError> {
        if self.state != ConnectionState::InSasl {
            return Err(AmqpError::Protocol(format!(
                "{} outside sasl negotiation",
                body.name()
            )));
        }
        let Some(client) = self.sasl.as_mut() else {
            return Err(AmqpError::Protocol("sasl frame without a sasl layer".into()));
        };
        match client.on_frame(body)? {
            SaslStep::Send(reply) => {
                self.write_frame(&Frame::Sasl(reply));
            }
            SaslStep::Done => {
                self.sasl = None;
                self.out.extend_from_slice(&AMQP_PROTOCOL_HEADER);
                self.last_outgoing = Instant::now();
                self.awaiting_header = true;
                self.set_state(ConnectionState::HdrSent);
            }
        }
        Ok(())
    }

    fn on_amqp(&mut self, frame: AmqpFrame) -> Result<(), AmqpError> {
        let Some(performative) = frame.performative else {
            // Heartbeat; receipt already refreshed the idle clock.
            return Ok(());
        };
        match performative {
            Performative::Open(open) => self.on_open(open),
            Performative::Close(close) => self.on_close(&close),
            Performative::Begin(begin) => self.on_begin(&begin, frame.channel),
            other => self.route_to_session(frame.channel, other, &frame.payload),
        }
    }

    fn on_open(&mut self, open: Open) -> Result<(), AmqpError> {
        if self.state != ConnectionState::OpenSent {
            return Err(AmqpError::Protocol(format!(
                "open received in state {}",
                self.state
            )));
        }
        self.negotiated_max_frame = self
            .codec
            .max_frame_size
            .min(open.max_frame_size)
            .max(MIN_MAX_FRAME_SIZE);
        info!(
            "connection opened: peer container={} max_frame={} idle_timeout={:?}ms",
            open.container_id, self.negotiated_max_frame, open.idle_timeout
        );
        self.remote_open = Some(open);
        self.set_state(ConnectionState::Opened);
        if let Some(series) = self.reconnect.as_mut() {
            series.reset();
        }
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Ok(()));
        }
        let _ = self.events.send(ConnectionEvent::Connected);

        // Surviving sessions re-begin and their links queue reattaches.
        let mut out = Vec::new();
        for session in self.sessions.values_mut() {
            session.replay_after_reconnect(self.negotiated_max_frame, &mut out);
        }
        for frame in out {
            self.write_amqp(frame);
        }
        Ok(())
    }

    fn on_close(&mut self, close: &Close) -> Result<(), AmqpError> {
        if let Some(error) = &close.error {
            warn!("peer closed the connection: {error}");
            let _ = self
                .events
                .send(ConnectionEvent::ErrorReceived(AmqpError::Peer(error.clone())));
        }
        match self.state {
            ConnectionState::CloseSent | ConnectionState::Discarding => {
                if let Some(reply) = self.pending_close.take() {
                    let outcome = close
                        .error
                        .clone()
                        .map_or(Ok(()), |error| Err(AmqpError::Peer(error)));
                    let _ = reply.send(outcome);
                }
                self.terminate(close.error.clone().map(AmqpError::Peer));
            }
            _ => {
                self.set_state(ConnectionState::CloseRcvd);
                self.write_amqp(AmqpFrame::new(
                    0,
                    Performative::Close(Close { error: None }),
                ));
                self.terminate(close.error.clone().map(AmqpError::Peer));
            }
        }
        Ok(())
    }

    fn on_begin(&mut self, begin: &crate::performative::Begin, remote_channel: u16) -> Result<(), AmqpError> {
        let Some(local_channel) = begin.remote_channel else {
            warn!("peer-initiated session on channel {remote_channel}; not supported");
            return Ok(());
        };
        let Some(session) = self.sessions.get_mut(&local_channel) else {
            return Err(AmqpError::Protocol(format!(
                "begin response for unknown channel {local_channel}"
            )));
        };
        self.remote_to_local.insert(remote_channel, local_channel);
        session.on_begin(begin, remote_channel);
        Ok(())
    }

    fn route_to_session(
        &mut self,
        remote_channel: u16,
        performative: Performative,
        payload: &bytes::Bytes,
    ) -> Result<(), AmqpError> {
        let Some(&local_channel) = self.remote_to_local.get(&remote_channel) else {
            return Err(AmqpError::Protocol(format!(
                "{} on unmapped channel {remote_channel}",
                performative.name()
            )));
        };
        let Some(session) = self.sessions.get_mut(&local_channel) else {
            return Err(AmqpError::Protocol(format!(
                "{} on removed channel {remote_channel}",
                performative.name()
            )));
        };

        let mut out = Vec::new();
        let mut reattach = None;
        let mut ended = false;
        match performative {
            Performative::Attach(attach) => session.on_attach(&attach, &mut out),
            Performative::Flow(flow) => session.on_flow(&flow, &mut out),
            Performative::Transfer(transfer) => {
                session.on_transfer(&transfer, payload, &mut out)?;
            }
            Performative::Disposition(disposition) => session.on_disposition(&disposition),
            Performative::Detach(detach) => {
                reattach = session.on_detach(&detach, &mut out);
            }
            Performative::End(end) => {
                session.on_end(&end, &mut out);
                ended = session.state == SessionState::Ended;
            }
            Performative::Open(_) | Performative::Begin(_) | Performative::Close(_) => {
                unreachable!("routed at the connection level")
            }
        }

        if let Some(request) = reattach {
            self.reattach_timers.push((
                Instant::now() + request.delay,
                local_channel,
                request.handle,
            ));
        }
        if ended {
            self.sessions.remove(&local_channel);
            self.remote_to_local.remove(&remote_channel);
        }
        for frame in out {
            self.write_amqp(frame);
        }
        Ok(())
    }

    /// A codec, framing, or protocol violation on inbound traffic closes
    /// the connection with an error.
    fn on_inbound_error(&mut self, error: AmqpError) {
        warn!("inbound error: {error}");
        let _ = self.events.send(ConnectionEvent::ErrorReceived(error.clone()));
        match self.state {
            ConnectionState::Opened | ConnectionState::OpenSent | ConnectionState::OpenRcvd => {
                let condition = match &error {
                    AmqpError::Codec(_) | AmqpError::Frame(_) | AmqpError::Protocol(_) => {
                        conditions::FRAMING_ERROR
                    }
                    _ => conditions::NOT_IMPLEMENTED,
                };
                let record =
                    ErrorRecord::with_description(condition, error.to_string());
                self.write_amqp(AmqpFrame::new(
                    0,
                    Performative::Close(Close {
                        error: Some(record),
                    }),
                ));
                self.set_state(ConnectionState::Discarding);
                self.fail_sessions(&error);
            }
            ConnectionState::Discarding | ConnectionState::CloseSent => {
                // Already closing; give up on the handshake.
                self.terminate(Some(error));
            }
            _ => {
                // Header-phase failure (bad version or SASL): tear down.
                self.set_state(ConnectionState::Disconnecting);
                self.terminate(Some(error));
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Close { error, reply } => self.local_close(error, reply),
            Command::Begin { options, reply } => self.begin_session(options, reply),
            Command::End { channel, reply } => {
                let Some(session) = self.sessions.get_mut(&channel) else {
                    let _ = reply.send(Err(AmqpError::Argument(format!(
                        "no session on channel {channel}"
                    ))));
                    return;
                };
                let end = session.make_end(reply);
                self.write_amqp(AmqpFrame::new(channel, end));
            }
            Command::AttachSender {
                channel,
                options,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.attach_sender(options, reply, out);
                });
            }
            Command::AttachReceiver {
                channel,
                options,
                deliveries,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.attach_receiver(options, deliveries, reply, out);
                });
            }
            Command::Send {
                channel,
                handle,
                message,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.send(handle, message, reply, out);
                });
            }
            Command::Detach {
                channel,
                handle,
                closed,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.detach(handle, closed, reply, out);
                });
            }
            Command::Dispose {
                channel,
                handle,
                delivery_id,
                state,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.dispose(handle, delivery_id, state, reply, out);
                });
            }
            Command::AddCredit {
                channel,
                handle,
                credit,
                reply,
            } => {
                self.with_session_frames(channel, move |session, out| {
                    session.add_credit(handle, credit, reply, out);
                });
            }
        }
    }

    /// Run `f` against a session and flush the frames it queues. The
    /// callback owns its reply channel, so a missing session simply
    /// drops it and the caller observes the teardown.
    fn with_session_frames(
        &mut self,
        channel: u16,
        f: impl FnOnce(&mut SessionCore, &mut Vec<AmqpFrame>),
    ) {
        let Some(session) = self.sessions.get_mut(&channel) else {
            warn!("command for unknown session channel {channel}");
            return;
        };
        let mut out = Vec::new();
        f(session, &mut out);
        for frame in out {
            self.write_amqp(frame);
        }
    }

    fn begin_session(&mut self, options: crate::config::SessionOptions, reply: Reply<u16>) {
        if self.state != ConnectionState::Opened {
            let _ = reply.send(Err(AmqpError::Disconnected(
                "connection is not open".into(),
            )));
            return;
        }
        let Some(channel) = self.next_channel() else {
            let _ = reply.send(Err(AmqpError::OverCapacity("channels exhausted")));
            return;
        };
        let session = SessionCore::new(
            channel,
            options,
            self.negotiated_max_frame,
            self.events.clone(),
            reply,
        );
        let begin = session.make_begin();
        self.sessions.insert(channel, session);
        self.write_amqp(AmqpFrame::new(channel, begin));
    }

    /// Lowest unused channel in `[1, channel_max]`.
    fn next_channel(&self) -> Option<u16> {
        (1..=self.options.channel_max).find(|channel| !self.sessions.contains_key(channel))
    }

    fn local_close(&mut self, error: Option<ErrorRecord>, reply: Reply<()>) {
        match self.state {
            ConnectionState::Opened => {
                let discarding = error.is_some();
                self.write_amqp(AmqpFrame::new(
                    0,
                    Performative::Close(Close { error }),
                ));
                self.pending_close = Some(reply);
                self.set_state(if discarding {
                    ConnectionState::Discarding
                } else {
                    ConnectionState::CloseSent
                });
            }
            _ => {
                // Closing before OPENED cancels the connect attempt.
                let _ = reply.send(Ok(()));
                self.set_state(ConnectionState::Disconnecting);
                self.terminate(None);
            }
        }
    }

    /// All handles dropped: initiate a clean close, or terminate outright
    /// when the handshake never finished.
    fn close_orphaned(&mut self) {
        if self.state == ConnectionState::Opened {
            debug!("all handles dropped; closing connection");
            self.write_amqp(AmqpFrame::new(
                0,
                Performative::Close(Close { error: None }),
            ));
            self.set_state(ConnectionState::CloseSent);
        } else if !self.finished {
            self.terminate(None);
        }
    }

    fn fail_sessions(&mut self, error: &AmqpError) {
        for session in self.sessions.values_mut() {
            session.fail_all(error);
        }
    }

    /// Final teardown: complete everything still pending and go quiet.
    fn terminate(&mut self, error: Option<AmqpError>) {
        if self.finished {
            return;
        }
        let teardown = error
            .clone()
            .unwrap_or_else(|| AmqpError::Disconnected("connection closed".into()));
        if let Some(reply) = self.pending_open.take() {
            let _ = reply.send(Err(teardown.clone()));
        }
        if let Some(reply) = self.pending_close.take() {
            let _ = reply.send(Ok(()));
        }
        for session in self.sessions.values_mut() {
            session.fail_all(&teardown);
        }
        self.sessions.clear();
        self.remote_to_local.clear();
        self.reattach_timers.clear();
        let _ = self.events.send(ConnectionEvent::Disconnected { error });
        self.set_state(ConnectionState::Disconnected);
        self.finished = true;
    }

    /// Transport gone: force-detach everything, then either arm the
    /// reconnect backoff or terminate.
    fn on_transport_loss(&mut self, error: AmqpError, can_redial: bool) {
        warn!("transport lost: {error}");
        for session in self.sessions.values_mut() {
            session.force_detach_all(&error);
        }
        self.remote_to_local.clear();
        self.reattach_timers.clear();
        self.remote_open = None;
        self.out.clear();

        let delay = can_redial
            .then(|| {
                self.reconnect
                    .as_mut()
                    .and_then(crate::backoff::RetrySeries::next_delay)
            })
            .flatten();
        match delay {
            Some(delay) => {
                let _ = self.events.send(ConnectionEvent::Disconnected {
                    error: Some(error),
                });
                self.set_state(ConnectionState::Disconnected);
                debug!("reconnecting in {delay:?}");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                self.terminate(Some(error));
            }
        }
    }

    /// A reconnect dial failed; try again or give up.
    fn on_dial_failure(&mut self, error: AmqpError) {
        match self
            .reconnect
            .as_mut()
            .and_then(crate::backoff::RetrySeries::next_delay)
        {
            Some(delay) => self.reconnect_at = Some(Instant::now() + delay),
            None => self.terminate(Some(error)),
        }
    }

    /// The earliest instant any timer needs service.
    fn next_deadline(&self) -> Option<Instant> {
        let mut deadline: Option<Instant> = None;
        let mut consider = |candidate: Option<Instant>| {
            if let Some(candidate) = candidate {
                deadline = Some(deadline.map_or(candidate, |d| d.min(candidate)));
            }
        };

        if self.state == ConnectionState::Opened {
            if let Some(idle) = self.options.idle_timeout {
                consider(Some(self.last_outgoing + idle / 2));
            }
            if let Some(peer_idle) = self.peer_idle_timeout() {
                consider(Some(self.last_incoming + peer_idle));
            }
        }
        consider(self.reattach_timers.iter().map(|(at, _, _)| *at).min());
        consider(self.reconnect_at);
        deadline
    }

    fn peer_idle_timeout(&self) -> Option<Duration> {
        self.remote_open
            .as_ref()
            .and_then(|open| open.idle_timeout)
            .filter(|&ms| ms > 0)
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Service every due timer.
    fn on_tick(&mut self, now: Instant) -> TickActions {
        let mut actions = TickActions::default();

        if self.state == ConnectionState::Opened {
            if let Some(idle) = self.options.idle_timeout {
                if now.duration_since(self.last_outgoing) >= idle / 2 {
                    trace!("emitting heartbeat");
                    self.write_frame(&Frame::Amqp(AmqpFrame::heartbeat()));
                }
            }
            if let Some(peer_idle) = self.peer_idle_timeout() {
                if now.duration_since(self.last_incoming) > peer_idle {
                    actions.peer_idle_expired = true;
                    return actions;
                }
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            actions.dial = true;
        }

        let due: Vec<(u16, u32)> = {
            let (fire, keep): (Vec<_>, Vec<_>) = self
                .reattach_timers
                .drain(..)
                .partition(|(at, _, _)| *at <= now);
            self.reattach_timers = keep;
            fire.into_iter().map(|(_, channel, handle)| (channel, handle)).collect()
        };
        for (channel, handle) in due {
            self.with_session_frames(channel, move |session, out| {
                session.reattach(handle, out);
            });
        }

        actions
    }

    fn write_amqp(&mut self, frame: AmqpFrame) {
        self.write_frame(&Frame::Amqp(frame));
    }

    fn write_frame(&mut self, frame: &Frame) {
        trace!("outbound {}", frame.name());
        if let Err(err) = self.codec.encode(frame, &mut self.out) {
            // Encoding our own frames only fails on a local bug; close
            // the connection rather than ship a torn frame.
            warn!("failed to encode outbound {}: {err}", frame.name());
            self.terminate(Some(err.into()));
            return;
        }
        self.last_outgoing = Instant::now();
    }
}
