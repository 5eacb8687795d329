// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Pluggable transport-negotiation strategies.
//!
//! A [`Carrier`] tells the connection choreographer how one transport
//! performs its handshake, frames messages, and (optionally) acknowledges
//! them. Capability flags gate which sub-protocol steps run; the default
//! trait methods implement the binary stream sub-protocol that `tcp` and
//! `udp` share, and line-oriented carriers override them wholesale.
//!
//! Carriers are selected two ways:
//! - by name, when dialing out (`CarrierRegistry::choose_by_name`),
//! - by sniffing the first 8 bytes of an inbound stream against each
//!   registered magic (`CarrierRegistry::choose_by_header`).
//!
//! A carrier instance is exclusively owned by the Protocol that selected it
//! and is dropped when that Protocol closes.

pub mod tcp;
pub mod text;
pub mod udp;

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::io::ConnectionStream;
use crate::protocol::frame::{self, PortCommand};
use crate::route::Route;

pub use tcp::TcpCarrier;
pub use text::TextCarrier;
pub use udp::UdpCarrier;

/// What [`Carrier::expect_index`] found at the head of the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Index {
    /// A message follows: its command frame and payload length
    /// (text-mode carriers report zero and deliver the payload as a line).
    Message {
        command: PortCommand,
        payload_len: usize,
    },

    /// Text-mode only: a line that is not a recognized command.
    /// The receiver may answer with a help block.
    Unknown { line: String },

    /// Clean end of stream; the read loop should exit without error.
    End,
}

/// A transport/negotiation strategy for one connection.
///
/// Default method bodies implement the framed binary sub-protocol; see the
/// module docs. All I/O goes through the Protocol's stream, passed in
/// explicitly so the carrier holds no transport state of its own.
pub trait Carrier: Send {
    /// Carrier name as used in routes and registry records.
    fn name(&self) -> &'static str;

    /// The 8-byte magic this carrier writes at the head of a connection.
    fn header(&self) -> [u8; 8];

    /// Whether an inbound 8-byte magic selects this carrier.
    fn check_header(&self, header: &[u8; 8]) -> bool;

    /// Absorb parameters encoded in a matched inbound magic.
    fn set_parameters(&mut self, _header: &[u8; 8]) {}

    // ========================================================================
    // Capability flags
    // ========================================================================

    /// Datagram-style transport with no connection state on the wire.
    fn is_connectionless(&self) -> bool {
        false
    }

    /// One send reaches several receivers.
    fn is_broadcast(&self) -> bool {
        false
    }

    /// In-band control commands can share the data channel.
    fn can_escape(&self) -> bool {
        true
    }

    /// Every message must be acknowledged at the transport level.
    fn require_ack(&self) -> bool {
        false
    }

    /// Line-oriented human-readable wire format.
    fn is_text_mode(&self) -> bool {
        false
    }

    /// The receiver can send an application reply on the same connection.
    fn supports_reply(&self) -> bool {
        false
    }

    /// Whether the carrier is currently able to carry messages.
    fn is_active(&self) -> bool {
        true
    }

    /// Carrier rewrites payloads on the way in.
    fn modifies_incoming_data(&self) -> bool {
        false
    }

    /// Carrier rewrites payloads on the way out.
    fn modifies_outgoing_data(&self) -> bool {
        false
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Outbound side: write the magic and the sender specifier.
    fn send_header(&mut self, route: &Route, io: &mut dyn ConnectionStream) -> Result<()> {
        io.write_all(&self.header())?;
        frame::write_sender_name(io, route.from_name())?;
        io.flush()?;
        Ok(())
    }

    /// Inbound side: read the sender's declared name (the magic has already
    /// been consumed by the sniffer).
    fn expect_sender_specifier(&mut self, io: &mut dyn ConnectionStream) -> Result<String> {
        frame::read_sender_name(io)
    }

    /// Inbound side: any carrier-specific fields after the sender specifier.
    fn expect_extra_header(&mut self, _io: &mut dyn ConnectionStream) -> Result<()> {
        Ok(())
    }

    /// Inbound side: acknowledge the header back to the sender.
    fn respond_to_header(&mut self, _route: &Route, io: &mut dyn ConnectionStream) -> Result<()> {
        frame::write_framed_int(io, 0)?;
        io.flush()?;
        if io.is_ok() {
            Ok(())
        } else {
            Err(Error::StreamClosed)
        }
    }

    /// Outbound side: consume the inbound side's header acknowledgement.
    fn expect_reply_to_header(
        &mut self,
        _route: &Route,
        io: &mut dyn ConnectionStream,
    ) -> Result<()> {
        let code = frame::read_framed_int(io)?;
        if code < 0 {
            return Err(Error::HandshakeFailed(format!(
                "peer rejected header (code {})",
                code
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Steady state
    // ========================================================================

    /// Announce that a message follows: command block and payload length.
    fn send_index(
        &mut self,
        command: &PortCommand,
        payload_len: usize,
        io: &mut dyn ConnectionStream,
    ) -> Result<()> {
        if self.can_escape() {
            let block = command.encode();
            frame::write_framed_int(io, block.len() as i32)?;
            io.write_all(&block)?;
        }
        if command.frame().carries_payload() {
            frame::write_framed_int(io, payload_len as i32)?;
        }
        Ok(())
    }

    /// Read the announcement written by [`Carrier::send_index`].
    fn expect_index(&mut self, io: &mut dyn ConnectionStream) -> Result<Index> {
        let command = if self.can_escape() {
            let block_len = frame::read_framed_int(io)?;
            if !(1..=frame::MAX_SENDER_NAME_LEN as i32).contains(&block_len) {
                return Err(Error::StreamClosed);
            }
            let mut block = vec![0u8; block_len as usize];
            io.read_exact(&mut block)?;
            PortCommand::decode(&block).ok_or(Error::StreamClosed)?
        } else {
            PortCommand::data("", true)
        };
        let payload_len = if command.frame().carries_payload() {
            let len = frame::read_framed_int(io)?;
            if len < 0 {
                return Err(Error::StreamClosed);
            }
            len as usize
        } else {
            0
        };
        Ok(Index::Message {
            command,
            payload_len,
        })
    }

    /// Write the payload bytes and push them onto the wire.
    fn send_payload(&mut self, payload: &[u8], io: &mut dyn ConnectionStream) -> Result<()> {
        io.write_all(payload)?;
        io.flush()?;
        Ok(())
    }

    /// Read the payload announced by the index.
    fn expect_payload(&mut self, len: usize, io: &mut dyn ConnectionStream) -> Result<Vec<u8>> {
        let mut payload = vec![0u8; len];
        io.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Send an application reply back to the message's sender.
    fn send_reply(&mut self, payload: &[u8], io: &mut dyn ConnectionStream) -> Result<()> {
        frame::write_framed_int(io, payload.len() as i32)?;
        io.write_all(payload)?;
        io.flush()?;
        Ok(())
    }

    /// Read the application reply to a message we sent.
    fn expect_reply(&mut self, io: &mut dyn ConnectionStream) -> Result<Vec<u8>> {
        let len = frame::read_framed_int(io)?;
        if len < 0 {
            return Err(Error::StreamClosed);
        }
        let mut payload = vec![0u8; len as usize];
        io.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Acknowledge a received message (only called when `require_ack`).
    fn send_ack(&mut self, io: &mut dyn ConnectionStream) -> Result<()> {
        frame::write_framed_int(io, 0)?;
        io.flush()?;
        Ok(())
    }

    /// Consume the acknowledgement of a message we sent.
    fn expect_ack(&mut self, io: &mut dyn ConnectionStream) -> Result<()> {
        let len = frame::read_framed_int(io)?;
        if len > 0 {
            // ack may carry a body; discard it
            let mut scratch = vec![0u8; len as usize];
            io.read_exact(&mut scratch)?;
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Factory for one carrier type.
pub type CarrierFactory = fn() -> Box<dyn Carrier>;

/// The set of carriers a process knows how to speak.
///
/// Constructed explicitly and shared by `Arc`; there is no process-global
/// registry. `default()` registers the built-in `tcp`, `udp` and `text`
/// carriers.
pub struct CarrierRegistry {
    factories: Vec<CarrierFactory>,
}

impl CarrierRegistry {
    /// Empty registry (no carriers known).
    pub fn empty() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Add a carrier type.
    pub fn register(&mut self, factory: CarrierFactory) {
        self.factories.push(factory);
    }

    /// Instantiate the carrier with the given name.
    pub fn choose_by_name(&self, name: &str) -> Result<Box<dyn Carrier>> {
        for factory in &self.factories {
            let carrier = factory();
            if carrier.name() == name {
                return Ok(carrier);
            }
        }
        Err(Error::NoSuchCarrier(name.to_owned()))
    }

    /// Instantiate the carrier whose magic matches an inbound header.
    ///
    /// The matched carrier absorbs any parameters the header encodes.
    pub fn choose_by_header(&self, header: &[u8; 8]) -> Result<Box<dyn Carrier>> {
        for factory in &self.factories {
            let mut carrier = factory();
            if carrier.check_header(header) {
                carrier.set_parameters(header);
                return Ok(carrier);
            }
        }
        Err(Error::ProtocolNotFound)
    }

    /// Names of all registered carriers, for registry advertisement.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.iter().map(|f| f().name()).collect()
    }
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(|| Box::new(TcpCarrier::new()));
        registry.register(|| Box::new(UdpCarrier::new()));
        registry.register(|| Box::new(TextCarrier::new()));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_by_name() {
        let registry = CarrierRegistry::default();
        assert_eq!(registry.choose_by_name("tcp").unwrap().name(), "tcp");
        assert_eq!(registry.choose_by_name("udp").unwrap().name(), "udp");
        assert_eq!(registry.choose_by_name("text").unwrap().name(), "text");
        assert!(matches!(
            registry.choose_by_name("shmem"),
            Err(Error::NoSuchCarrier(_))
        ));
    }

    #[test]
    fn test_sniff_selects_only_the_matching_carrier() {
        let registry = CarrierRegistry::default();
        for name in ["tcp", "udp", "text"] {
            let magic = registry.choose_by_name(name).unwrap().header();
            let chosen = registry.choose_by_header(&magic).unwrap();
            assert_eq!(chosen.name(), name);
        }
    }

    #[test]
    fn test_sniff_unknown_magic_fails() {
        let registry = CarrierRegistry::default();
        let result = registry.choose_by_header(b"GET / HT");
        assert!(matches!(result, Err(Error::ProtocolNotFound)));
    }

    #[test]
    fn test_names_lists_builtins() {
        let names = CarrierRegistry::default().names();
        assert_eq!(names, vec!["tcp", "udp", "text"]);
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = CarrierRegistry::empty();
        assert!(registry.choose_by_name("tcp").is_err());
        assert!(registry.choose_by_header(b"PL\x01\x00\x00\x00NK").is_err());
    }
}
