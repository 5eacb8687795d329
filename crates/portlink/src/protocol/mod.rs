// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Connection choreographer.
//!
//! A [`Protocol`] drives one side of one physical connection through
//! handshake, steady-state message exchange, and close, insulating the port
//! layer from the particular [`Carrier`](crate::carrier::Carrier) in use.
//!
//! # State machine
//!
//! ```text
//!      +-------------+
//!      | Unconnected |  stream exists, no carrier chosen
//!      +------+------+
//!             | open_outbound() / open_inbound()
//!             v
//!      +-------------+   magic sniff, sender specifier,
//!      | Handshaking |   extra header, header response
//!      +------+------+
//!             | handshake complete        (failure: diagnostic
//!             v                            text + Closed)
//!      +-------------+
//!      |   Active    |  send_index -> payload -> reply? -> ack?
//!      +------+------+
//!             | close()
//!             v
//!      +-------------+
//!      |   Closed    |  carrier dropped once, stream released
//!      +-------------+
//! ```
//!
//! Closing is idempotent; a pending acknowledgement is flushed on the way
//! down so the peer is never left waiting for one.

pub mod frame;

use std::sync::Arc;

use crate::carrier::{Carrier, CarrierRegistry, Index};
use crate::error::{Error, Result};
use crate::io::{ConnectionStream, StreamInterrupter};
use crate::route::Route;

use frame::{Frame, PortCommand, PROTOCOL_NOT_FOUND_TEXT};

// ============================================================================
// States and messages
// ============================================================================

/// Protocol lifecycle states.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtocolState {
    /// Stream exists, no carrier chosen.
    #[default]
    Unconnected,

    /// Specifier/header exchange in progress.
    Handshaking,

    /// Able to carry messages.
    Active,

    /// Terminal; carrier and stream released.
    Closed,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolState::Unconnected => "Unconnected",
            ProtocolState::Handshaking => "Handshaking",
            ProtocolState::Active => "Active",
            ProtocolState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}

/// One received message: its command frame and payload.
#[derive(Debug)]
pub struct Message {
    pub command: PortCommand,
    pub payload: Vec<u8>,
}

/// What [`Protocol::begin_read`] produced.
#[derive(Debug)]
pub enum Incoming {
    /// A well-formed message.
    Message(Message),

    /// Text-mode: a line that is not a recognized command.
    Unknown(String),
}

/// Consumer of an application reply read back after a send.
pub trait ReplyReader: Send {
    fn read_reply(&mut self, payload: &[u8]);
}

impl ReplyReader for Vec<u8> {
    fn read_reply(&mut self, payload: &[u8]) {
        self.clear();
        self.extend_from_slice(payload);
    }
}

// ============================================================================
// Protocol
// ============================================================================

/// Drives one side of one connection; owns the stream and the carrier.
pub struct Protocol {
    streams: Option<Box<dyn ConnectionStream>>,
    interrupter: Arc<dyn StreamInterrupter>,
    carrier: Option<Box<dyn Carrier>>,
    registry: Arc<CarrierRegistry>,
    route: Route,
    state: ProtocolState,
    pending_ack: bool,
    envelope: String,
}

impl Protocol {
    /// Take ownership of a freshly-opened stream.
    pub fn new(stream: Box<dyn ConnectionStream>, registry: Arc<CarrierRegistry>) -> Self {
        let interrupter = stream.interrupter();
        Self {
            streams: Some(stream),
            interrupter,
            carrier: None,
            registry,
            route: Route::null(),
            state: ProtocolState::Unconnected,
            pending_ack: false,
            envelope: String::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Replace the logical names of the route. The live transport and the
    /// negotiated carrier are untouched.
    pub fn rename(&mut self, route: Route) {
        let carrier_name = match &self.carrier {
            Some(c) => c.name().to_owned(),
            None => self.route.carrier_name().to_owned(),
        };
        self.route = route.with_carrier_name(&carrier_name);
    }

    /// Envelope text of the last data message read.
    pub fn envelope(&self) -> &str {
        &self.envelope
    }

    /// Handle that wakes a thread blocked reading this connection.
    pub fn interrupter(&self) -> Arc<dyn StreamInterrupter> {
        self.interrupter.clone()
    }

    /// Whether the negotiated carrier can currently carry messages.
    pub fn is_active(&self) -> bool {
        self.state == ProtocolState::Active
            && self.carrier.as_ref().is_some_and(|c| c.is_active())
    }

    /// Whether the underlying stream is still healthy.
    pub fn is_ok(&self) -> bool {
        self.state == ProtocolState::Active && self.streams.as_ref().is_some_and(|s| s.is_ok())
    }

    /// Capability view of the negotiated carrier (None before negotiation).
    pub fn carrier(&self) -> Option<&dyn Carrier> {
        self.carrier.as_deref()
    }

    /// The carrier set this connection negotiates from.
    pub fn carrier_registry(&self) -> Arc<CarrierRegistry> {
        self.registry.clone()
    }

    /// Swap in a carrier by name before any handshake has run.
    ///
    /// The previous carrier, if any, is dropped here; once handshaking has
    /// begun the carrier is fixed for the life of the connection.
    pub fn set_carrier(&mut self, name: &str) -> Result<()> {
        if self.state != ProtocolState::Unconnected {
            return Err(Error::InvalidState(format!(
                "cannot change carrier while {}",
                self.state
            )));
        }
        let carrier = self.registry.choose_by_name(name)?;
        self.route = self.route.with_carrier_name(name);
        self.carrier = Some(carrier);
        Ok(())
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Outbound handshake: declare ourselves and wait for the header reply.
    ///
    /// On failure the connection is closed and never becomes Active.
    pub fn open_outbound(&mut self, route: Route) -> Result<()> {
        if self.state != ProtocolState::Unconnected {
            return Err(Error::InvalidState(format!(
                "cannot open while {}",
                self.state
            )));
        }
        let carrier_name = route.carrier_name().to_owned();
        self.route = route;
        self.set_carrier(&carrier_name)?;
        self.state = ProtocolState::Handshaking;

        let result: Result<()> = (|| {
            let route = self.route.clone();
            let (carrier, io) = self.parts()?;
            carrier.send_header(&route, io)?;
            carrier.expect_reply_to_header(&route, io)
        })();

        match result {
            Ok(()) => {
                self.state = ProtocolState::Active;
                log::debug!("[PROTO] outbound connection {} active", self.route);
                Ok(())
            }
            Err(e) => {
                log::debug!("[PROTO] outbound handshake on {} failed: {}", self.route, e);
                self.close();
                Err(e)
            }
        }
    }

    /// Inbound handshake: sniff the carrier magic, learn the sender's name,
    /// and acknowledge the header.
    ///
    /// `name` is the local port name that accepted the stream. If the magic
    /// matches no registered carrier, a human-readable diagnostic block is
    /// written back before the connection fails with
    /// [`Error::ProtocolNotFound`].
    pub fn open_inbound(&mut self, name: &str) -> Result<()> {
        if self.state != ProtocolState::Unconnected {
            return Err(Error::InvalidState(format!(
                "cannot open while {}",
                self.state
            )));
        }
        self.state = ProtocolState::Handshaking;
        self.route = self.route.with_to_name(name);

        match self.expect_protocol_specifier() {
            Ok(()) => {}
            Err(e) => {
                self.close();
                return Err(e);
            }
        }

        let result: Result<String> = (|| {
            let (carrier, io) = self.parts()?;
            let sender = carrier.expect_sender_specifier(io)?;
            carrier.expect_extra_header(io)?;
            Ok(sender)
        })();

        let sender = match result {
            Ok(sender) => sender,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        self.route = self.route.with_from_name(&sender);

        let respond: Result<()> = (|| {
            let route = self.route.clone();
            let (carrier, io) = self.parts()?;
            carrier.respond_to_header(&route, io)
        })();

        match respond {
            Ok(()) => {
                self.state = ProtocolState::Active;
                log::debug!("[PROTO] inbound connection {} active", self.route);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Read the first 8 bytes and select a carrier from their magic.
    fn expect_protocol_specifier(&mut self) -> Result<()> {
        let io = self.io()?;
        let mut header = [0u8; 8];
        io.read_exact(&mut header)
            .map_err(|_| Error::HandshakeFailed("connection died before the magic".into()))?;

        // A carrier planted by set_carrier gets first refusal.
        if let Some(carrier) = &self.carrier {
            if carrier.check_header(&header) {
                return Ok(());
            }
        }

        match self.registry.choose_by_header(&header) {
            Ok(carrier) => {
                self.route = self.route.with_carrier_name(carrier.name());
                self.carrier = Some(carrier);
                Ok(())
            }
            Err(Error::ProtocolNotFound) => {
                // Not one of ours: answer with the safety-net text so a
                // human at a raw socket learns what this endpoint is.
                let io = self.io()?;
                let _ = io.write_all(PROTOCOL_NOT_FOUND_TEXT.as_bytes());
                let _ = io.flush();
                Err(Error::ProtocolNotFound)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    /// Send one message: index, payload, optional inline reply, ack.
    ///
    /// Returns whether a reply was obtained. Does nothing (and reports no
    /// reply) when the carrier is not active. Connectionless and broadcast
    /// carriers never block for an inline reply; whatever reply exists
    /// travels out-of-band and the handler is skipped with a log note.
    pub fn write_message(
        &mut self,
        command: &PortCommand,
        payload: &[u8],
        mut reply: Option<&mut dyn ReplyReader>,
    ) -> Result<bool> {
        if !self.is_active() {
            return Ok(false);
        }
        let route = self.route.clone();
        let (carrier, io) = self.parts()?;

        carrier.send_index(command, payload.len(), io)?;
        carrier.send_payload(payload, io)?;

        let mut got_reply = false;
        if let Some(handler) = reply.take() {
            let inline_ok = carrier.supports_reply()
                && !carrier.is_connectionless()
                && !carrier.is_broadcast();
            if inline_ok {
                let bytes = carrier.expect_reply(io)?;
                handler.read_reply(&bytes);
                got_reply = true;
            } else {
                log::info!(
                    "[PROTO] connection {} does not support inline replies (try \"tcp\" or \"text\")",
                    route
                );
            }
        }

        if carrier.require_ack() {
            carrier.expect_ack(io)?;
        }
        Ok(got_reply)
    }

    /// Wait for the next message announcement and read its payload.
    ///
    /// Returns `Ok(None)` when the stream has ended — including the case
    /// where the peer or network dropped mid-wait, so a closing connection
    /// exits its read loop instead of treating the silence as an error.
    pub fn begin_read(&mut self) -> Result<Option<Incoming>> {
        if self.state != ProtocolState::Active {
            return Ok(None);
        }
        self.pending_ack = true;

        if !self.streams.as_ref().is_some_and(|s| s.is_ok()) {
            return Ok(None);
        }

        let (carrier, io) = self.parts()?;
        let index = match carrier.expect_index(io) {
            Ok(index) => index,
            Err(Error::StreamClosed) => return Ok(None),
            Err(e) => return Err(e),
        };

        match index {
            Index::End => Ok(None),
            Index::Unknown { line } => Ok(Some(Incoming::Unknown(line))),
            Index::Message {
                command,
                payload_len,
            } => {
                let payload = if command.frame().carries_payload() {
                    match carrier.expect_payload(payload_len, io) {
                        Ok(payload) => payload,
                        Err(Error::StreamClosed) => return Ok(None),
                        Err(e) => return Err(e),
                    }
                } else {
                    Vec::new()
                };
                if let Frame::Data { .. } = command.frame() {
                    self.envelope = command.text().to_owned();
                }
                Ok(Some(Incoming::Message(Message { command, payload })))
            }
        }
    }

    /// Finish one read: flush the application reply, then acknowledge.
    ///
    /// The order is deliberate — the peer sees the reply before the
    /// transport-level ack, never the other way around.
    pub fn end_read(&mut self, reply: Option<&[u8]>) -> Result<()> {
        if let Some(bytes) = reply {
            let (carrier, io) = self.parts()?;
            if carrier.supports_reply() {
                carrier.send_reply(bytes, io)?;
            }
        }
        self.send_ack()
    }

    /// Send the pending acknowledgement, if the carrier wants one.
    pub fn send_ack(&mut self) -> Result<()> {
        if !self.pending_ack {
            return Ok(());
        }
        self.pending_ack = false;
        let (carrier, io) = self.parts()?;
        if carrier.require_ack() {
            carrier.send_ack(io)?;
        }
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Best-effort wait for the peer's one-line acknowledgement of a quit
    /// command. Only text-mode carriers with reply support answer one; for
    /// everything else this returns immediately.
    pub fn read_quit_ack(&mut self, timeout: std::time::Duration) {
        let Ok((carrier, io)) = self.parts() else {
            return;
        };
        if carrier.is_text_mode() && carrier.supports_reply() {
            let _ = io.set_read_timeout(Some(timeout));
            let _ = frame::read_line(io);
            let _ = io.set_read_timeout(None);
        }
    }

    /// Wake any thread blocked reading this connection.
    ///
    /// Flushes the pending ack first so the peer's send loop is not left
    /// waiting on it.
    pub fn interrupt(&mut self) {
        if self.state == ProtocolState::Active {
            if self.pending_ack {
                let _ = self.send_ack();
            }
            self.interrupter.interrupt();
        }
    }

    /// Tear the connection down. Safe to call any number of times; the
    /// carrier is dropped exactly once.
    pub fn close(&mut self) {
        if self.state == ProtocolState::Closed {
            return;
        }
        if self.pending_ack {
            // best effort: comms may already be down
            let _ = self.send_ack();
        }
        self.state = ProtocolState::Closed;
        if let Some(mut stream) = self.streams.take() {
            stream.close();
        }
        self.carrier = None;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn parts(&mut self) -> Result<(&mut dyn Carrier, &mut dyn ConnectionStream)> {
        match (&mut self.carrier, &mut self.streams) {
            (Some(carrier), Some(streams)) => Ok((carrier.as_mut(), streams.as_mut())),
            _ => Err(Error::InvalidState("connection is closed".into())),
        }
    }

    fn io(&mut self) -> Result<&mut dyn ConnectionStream> {
        self.streams
            .as_mut()
            .map(|s| s.as_mut() as &mut dyn ConnectionStream)
            .ok_or_else(|| Error::InvalidState("connection is closed".into()))
    }
}

impl Drop for Protocol {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;
    use frame::{make_framed_int, read_framed_int};
    use std::thread;

    fn registry() -> Arc<CarrierRegistry> {
        Arc::new(CarrierRegistry::default())
    }

    fn mock_protocol_pair() -> (Protocol, Protocol) {
        let (a, b) = MockStream::pair();
        (
            Protocol::new(Box::new(a), registry()),
            Protocol::new(Box::new(b), registry()),
        )
    }

    /// Run the outbound handshake on a thread while the inbound side
    /// executes on the caller; both block on each other's bytes.
    fn handshaken_pair(carrier: &str) -> (Protocol, Protocol) {
        let (mut out, mut inp) = mock_protocol_pair();
        let route = Route::new("/writer", "/reader", carrier);
        let sender = thread::spawn(move || {
            out.open_outbound(route).unwrap();
            out
        });
        inp.open_inbound("/reader").unwrap();
        (sender.join().unwrap(), inp)
    }

    #[test]
    fn test_tcp_handshake_establishes_route() {
        let (out, inp) = handshaken_pair("tcp");
        assert_eq!(out.state(), ProtocolState::Active);
        assert_eq!(inp.state(), ProtocolState::Active);
        assert_eq!(inp.route().from_name(), "/writer");
        assert_eq!(inp.route().to_name(), "/reader");
        assert_eq!(inp.route().carrier_name(), "tcp");
        assert!(out.is_active());
    }

    #[test]
    fn test_text_handshake_establishes_route() {
        let (out, inp) = handshaken_pair("text");
        assert_eq!(inp.route().from_name(), "/writer");
        assert_eq!(inp.route().carrier_name(), "text");
        assert!(out.is_active());
    }

    #[test]
    fn test_unknown_magic_sends_diagnostic_and_fails() {
        use std::io::{Read, Write};

        let (mut probe, inbound) = MockStream::pair();
        let mut protocol = Protocol::new(Box::new(inbound), registry());

        probe.write_all(b"GET / HT").unwrap();

        let err = protocol.open_inbound("/reader").unwrap_err();
        assert!(matches!(err, Error::ProtocolNotFound));
        assert_eq!(protocol.state(), ProtocolState::Closed);

        // The diagnostic block was written verbatim before the close.
        let mut written = vec![0u8; PROTOCOL_NOT_FOUND_TEXT.len()];
        probe.read_exact(&mut written).unwrap();
        assert_eq!(written, PROTOCOL_NOT_FOUND_TEXT.as_bytes());
    }

    #[test]
    fn test_message_round_trip_with_reply_and_ack() {
        let (mut out, mut inp) = handshaken_pair("tcp");

        let sender = thread::spawn(move || {
            let mut reply = Vec::new();
            let got = out
                .write_message(
                    &PortCommand::data("", true),
                    b"request",
                    Some(&mut reply as &mut dyn ReplyReader),
                )
                .unwrap();
            (out, got, reply)
        });

        match inp.begin_read().unwrap() {
            Some(Incoming::Message(msg)) => {
                assert_eq!(msg.payload, b"request");
                assert_eq!(
                    msg.command.frame(),
                    Frame::Data {
                        expects_reply: true
                    }
                );
            }
            other => panic!("unexpected incoming: {:?}", other),
        }
        inp.end_read(Some(b"response")).unwrap();

        let (_out, got_reply, reply) = sender.join().unwrap();
        assert!(got_reply);
        assert_eq!(reply, b"response");
    }

    #[test]
    fn test_reply_precedes_ack_on_the_wire() {
        use std::io::{Read, Write};

        // Drive only the inbound side; feed it a canned tcp message and
        // inspect the bytes it writes back.
        let (mut feeder, inbound) = MockStream::pair();
        let mut protocol = Protocol::new(Box::new(inbound), registry());

        let mut wire = Vec::new();
        let tcp = crate::carrier::TcpCarrier::new();
        wire.extend_from_slice(&tcp.header());
        frame::write_sender_name(&mut wire, "/writer").unwrap();
        feeder.write_all(&wire).unwrap();

        // Handshake: consume the header response from the read pipe.
        protocol.open_inbound("/reader").unwrap();
        assert_eq!(read_framed_int(&mut feeder).unwrap(), 0);

        let mut msg = Vec::new();
        let cmd = PortCommand::data("", true);
        let block = cmd.encode();
        msg.extend_from_slice(&make_framed_int(block.len() as i32));
        msg.extend_from_slice(&block);
        msg.extend_from_slice(&make_framed_int(4));
        msg.extend_from_slice(b"ping");
        feeder.write_all(&msg).unwrap();

        match protocol.begin_read().unwrap() {
            Some(Incoming::Message(m)) => assert_eq!(m.payload, b"ping"),
            other => panic!("unexpected incoming: {:?}", other),
        }
        protocol.end_read(Some(b"pong")).unwrap();

        // Wire order: framed reply length, reply bytes, then the ack (0).
        assert_eq!(read_framed_int(&mut feeder).unwrap(), 4);
        let mut reply = [0u8; 4];
        feeder.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"pong");
        assert_eq!(read_framed_int(&mut feeder).unwrap(), 0);
    }

    #[test]
    fn test_begin_read_on_dead_stream_is_clean_exit() {
        let (mut out, mut inp) = handshaken_pair("tcp");
        out.close();
        assert!(inp.begin_read().unwrap().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut out, _inp) = handshaken_pair("tcp");
        out.close();
        assert_eq!(out.state(), ProtocolState::Closed);
        out.close();
        assert_eq!(out.state(), ProtocolState::Closed);
        assert!(out.carrier().is_none());
    }

    #[test]
    fn test_set_carrier_rejected_after_handshake() {
        let (mut out, _inp) = handshaken_pair("tcp");
        assert!(matches!(
            out.set_carrier("udp"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_set_carrier_replaces_before_handshake() {
        let (a, _b) = MockStream::pair();
        let mut protocol = Protocol::new(Box::new(a), registry());
        protocol.set_carrier("udp").unwrap();
        protocol.set_carrier("text").unwrap();
        assert_eq!(protocol.route().carrier_name(), "text");
    }

    #[test]
    fn test_rename_keeps_live_carrier() {
        let (mut out, _inp) = handshaken_pair("tcp");
        out.rename(Route::new("/new-src", "/new-dst", "udp"));
        assert_eq!(out.route().from_name(), "/new-src");
        assert_eq!(out.route().to_name(), "/new-dst");
        // the carrier name cannot be renamed away from the live transport
        assert_eq!(out.route().carrier_name(), "tcp");
    }

    #[test]
    fn test_write_message_inactive_is_noop() {
        struct DeadCarrier;
        impl Carrier for DeadCarrier {
            fn name(&self) -> &'static str {
                "dead"
            }
            fn header(&self) -> [u8; 8] {
                *b"DEADDEAD"
            }
            fn check_header(&self, header: &[u8; 8]) -> bool {
                header == b"DEADDEAD"
            }
            fn is_active(&self) -> bool {
                false
            }
        }

        let mut registry = CarrierRegistry::empty();
        registry.register(|| Box::new(DeadCarrier));

        let (a, _b) = MockStream::pair();
        let mut protocol = Protocol::new(Box::new(a), Arc::new(registry));
        protocol.set_carrier("dead").unwrap();
        // Force active state without a handshake to isolate the check.
        protocol.state = ProtocolState::Active;

        let sent = protocol
            .write_message(&PortCommand::data("", false), b"x", None)
            .unwrap();
        assert!(!sent);
    }

    #[test]
    fn test_envelope_captured_from_data_command() {
        let (mut out, mut inp) = handshaken_pair("tcp");
        let sender = thread::spawn(move || {
            out.write_message(&PortCommand::data("stamp 42", false), b"payload", None)
                .unwrap();
            out
        });
        match inp.begin_read().unwrap() {
            Some(Incoming::Message(_)) => {}
            other => panic!("unexpected incoming: {:?}", other),
        }
        assert_eq!(inp.envelope(), "stamp 42");
        inp.end_read(None).unwrap();
        sender.join().unwrap();
    }
}
