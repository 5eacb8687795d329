// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Line-oriented human-readable carrier.
//!
//! The entry point for humans and debug tooling: type `CONNECT /name` at a
//! raw socket and the port answers in plain text. Every sub-protocol step
//! is a newline-terminated line, so the binary trait defaults are replaced
//! wholesale. Payloads are single lines; there is no transport ack.

use std::io::Write;

use super::{Carrier, Index};
use crate::error::{Error, Result};
use crate::io::ConnectionStream;
use crate::protocol::frame::{read_line, PortCommand};
use crate::route::Route;

/// The 8-byte magic: the literal first half of a `CONNECT ` line.
pub const TEXT_MAGIC: &[u8; 8] = b"CONNECT ";

/// Line-oriented carrier for humans and debug tooling.
pub struct TextCarrier {
    active: bool,
}

impl TextCarrier {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Default for TextCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for TextCarrier {
    fn name(&self) -> &'static str {
        "text"
    }

    fn header(&self) -> [u8; 8] {
        *TEXT_MAGIC
    }

    fn check_header(&self, header: &[u8; 8]) -> bool {
        header == TEXT_MAGIC
    }

    fn can_escape(&self) -> bool {
        true
    }

    fn is_text_mode(&self) -> bool {
        true
    }

    fn supports_reply(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.active
    }

    // ========================================================================
    // Handshake (all lines)
    // ========================================================================

    fn send_header(&mut self, route: &Route, io: &mut dyn ConnectionStream) -> Result<()> {
        io.write_all(TEXT_MAGIC)?;
        io.write_all(route.from_name().as_bytes())?;
        io.write_all(b"\n")?;
        io.flush()?;
        Ok(())
    }

    fn expect_sender_specifier(&mut self, io: &mut dyn ConnectionStream) -> Result<String> {
        // The sniffer consumed `CONNECT `; the rest of the line is the name.
        match read_line(io)? {
            Some(name) if !name.trim().is_empty() => Ok(name.trim().to_owned()),
            Some(_) => Ok("anonymous".to_owned()),
            None => Err(Error::HandshakeFailed("connect line truncated".into())),
        }
    }

    fn respond_to_header(&mut self, route: &Route, io: &mut dyn ConnectionStream) -> Result<()> {
        let line = format!("Welcome {}\n", route.from_name());
        io.write_all(line.as_bytes())?;
        io.flush()?;
        if io.is_ok() {
            Ok(())
        } else {
            Err(Error::StreamClosed)
        }
    }

    fn expect_reply_to_header(
        &mut self,
        _route: &Route,
        io: &mut dyn ConnectionStream,
    ) -> Result<()> {
        match read_line(io)? {
            Some(_welcome) => Ok(()),
            None => Err(Error::HandshakeFailed("no welcome line".into())),
        }
    }

    // ========================================================================
    // Steady state (all lines)
    // ========================================================================

    fn send_index(
        &mut self,
        command: &PortCommand,
        _payload_len: usize,
        io: &mut dyn ConnectionStream,
    ) -> Result<()> {
        let line = command.encode_line();
        io.write_all(line.as_bytes())?;
        io.write_all(b"\n")?;
        Ok(())
    }

    fn expect_index(&mut self, io: &mut dyn ConnectionStream) -> Result<Index> {
        match read_line(io)? {
            None => Ok(Index::End),
            Some(line) => match PortCommand::decode_line(&line) {
                Some(command) => Ok(Index::Message {
                    command,
                    payload_len: 0,
                }),
                None => Ok(Index::Unknown { line }),
            },
        }
    }

    fn send_payload(&mut self, payload: &[u8], io: &mut dyn ConnectionStream) -> Result<()> {
        io.write_all(payload)?;
        if payload.last() != Some(&b'\n') {
            io.write_all(b"\n")?;
        }
        io.flush()?;
        Ok(())
    }

    fn expect_payload(&mut self, _len: usize, io: &mut dyn ConnectionStream) -> Result<Vec<u8>> {
        match read_line(io)? {
            Some(line) => Ok(line.into_bytes()),
            None => Err(Error::StreamClosed),
        }
    }

    fn send_reply(&mut self, payload: &[u8], io: &mut dyn ConnectionStream) -> Result<()> {
        self.send_payload(payload, io)
    }

    fn expect_reply(&mut self, io: &mut dyn ConnectionStream) -> Result<Vec<u8>> {
        self.expect_payload(0, io)
    }

    // No transport ack in text mode.
    fn send_ack(&mut self, _io: &mut dyn ConnectionStream) -> Result<()> {
        Ok(())
    }

    fn expect_ack(&mut self, _io: &mut dyn ConnectionStream) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::MockStream;
    use crate::protocol::frame::Frame;
    use std::io::Read;

    #[test]
    fn test_flags() {
        let c = TextCarrier::new();
        assert!(c.is_text_mode());
        assert!(c.can_escape());
        assert!(c.supports_reply());
        assert!(!c.require_ack());
        assert!(!c.is_connectionless());
    }

    #[test]
    fn test_connect_line_handshake() {
        let (mut out_io, mut in_io) = MockStream::pair();
        let mut sender = TextCarrier::new();
        let mut receiver = TextCarrier::new();
        let route = Route::new("/console", "/robot", "text");

        sender.send_header(&route, &mut out_io).unwrap();

        let mut magic = [0u8; 8];
        in_io.read_exact(&mut magic).unwrap();
        assert_eq!(&magic, TEXT_MAGIC);

        let name = receiver.expect_sender_specifier(&mut in_io).unwrap();
        assert_eq!(name, "/console");

        receiver.respond_to_header(&route, &mut in_io).unwrap();
        sender.expect_reply_to_header(&route, &mut out_io).unwrap();
    }

    #[test]
    fn test_anonymous_connect() {
        let io = MockStream::new();
        io.feed(b"\n");
        let mut receiver = TextCarrier::new();
        let mut io = io;
        assert_eq!(
            receiver.expect_sender_specifier(&mut io).unwrap(),
            "anonymous"
        );
    }

    #[test]
    fn test_command_and_payload_as_lines() {
        let (mut out_io, mut in_io) = MockStream::pair();
        let mut sender = TextCarrier::new();
        let mut receiver = TextCarrier::new();

        let cmd = PortCommand::data("", true);
        sender.send_index(&cmd, 0, &mut out_io).unwrap();
        sender.send_payload(b"hello world", &mut out_io).unwrap();

        match receiver.expect_index(&mut in_io).unwrap() {
            Index::Message { command, .. } => {
                assert_eq!(
                    command.frame(),
                    Frame::Data {
                        expects_reply: true
                    }
                );
            }
            other => panic!("unexpected index: {:?}", other),
        }
        assert_eq!(
            receiver.expect_payload(0, &mut in_io).unwrap(),
            b"hello world"
        );
    }

    #[test]
    fn test_unknown_line_is_reported_not_fatal() {
        let io = MockStream::new();
        io.feed(b"bogus command\n");
        let mut receiver = TextCarrier::new();
        let mut io = io;
        match receiver.expect_index(&mut io).unwrap() {
            Index::Unknown { line } => assert_eq!(line, "bogus command"),
            other => panic!("unexpected index: {:?}", other),
        }
    }

    #[test]
    fn test_eof_is_clean_end() {
        let mut io = MockStream::new();
        io.close_incoming();
        let mut receiver = TextCarrier::new();
        assert_eq!(receiver.expect_index(&mut io).unwrap(), Index::End);
    }
}
