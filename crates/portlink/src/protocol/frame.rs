// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Low-level wire primitives shared by the carriers.
//!
//! # Framed integers
//!
//! Lengths and sub-protocol markers travel as 8-byte *framed integers*:
//!
//! ```text
//! byte 0  1  2  3  4  5  6  7
//!      'P''L' <i32 little-endian> 'N''K'
//! ```
//!
//! The sentinel bytes double as a sanity check: a framed integer read from a
//! byte stream that does not carry them means the stream is corrupt or the
//! peer is not speaking this protocol.
//!
//! # Commands
//!
//! In-band control is a closed set of frames, each a one-byte tag plus a
//! short text argument (the envelope, for data frames). Only carriers that
//! `can_escape` ever put these on the wire.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Size of a framed integer on the wire.
pub const FRAMED_INT_LEN: usize = 8;

/// Maximum sender-name length accepted during the handshake.
pub const MAX_SENDER_NAME_LEN: usize = 1000;

/// Text block written to a peer whose first 8 bytes match no carrier.
///
/// A safety net for accidental raw-socket probing; written verbatim before
/// the connection is dropped.
pub const PROTOCOL_NOT_FOUND_TEXT: &str = "* Error. Protocol not found.\r\n\
* Hello. You appear to be trying to communicate with a portlink port.\r\n\
* The first 8 bytes sent to a port select the protocol to speak, and the\r\n\
* 8 bytes you sent were not associated with any known protocol.\r\n\
* If you are a human, try typing \"CONNECT foo\" followed by a <RETURN>.\r\n\
* The 8 bytes \"CONNECT \" correspond to a simple text-mode protocol.\r\n\
* Goodbye.\r\n";

// ============================================================================
// Framed integers
// ============================================================================

/// Encode a framed integer.
pub fn make_framed_int(value: i32) -> [u8; FRAMED_INT_LEN] {
    let mut bytes = [0u8; FRAMED_INT_LEN];
    bytes[0] = b'P';
    bytes[1] = b'L';
    bytes[2..6].copy_from_slice(&value.to_le_bytes());
    bytes[6] = b'N';
    bytes[7] = b'K';
    bytes
}

/// Decode a framed integer, if the sentinels are present.
pub fn interpret_framed_int(bytes: &[u8; FRAMED_INT_LEN]) -> Option<i32> {
    if bytes[0] == b'P' && bytes[1] == b'L' && bytes[6] == b'N' && bytes[7] == b'K' {
        let mut value = [0u8; 4];
        value.copy_from_slice(&bytes[2..6]);
        Some(i32::from_le_bytes(value))
    } else {
        None
    }
}

/// Write a framed integer to a stream (no flush).
pub fn write_framed_int<W: Write + ?Sized>(w: &mut W, value: i32) -> Result<()> {
    w.write_all(&make_framed_int(value))?;
    Ok(())
}

/// Read a framed integer from a stream.
pub fn read_framed_int<R: Read + ?Sized>(r: &mut R) -> Result<i32> {
    let mut bytes = [0u8; FRAMED_INT_LEN];
    r.read_exact(&mut bytes)?;
    interpret_framed_int(&bytes).ok_or(Error::StreamClosed)
}

// ============================================================================
// Sender specifier
// ============================================================================

/// Write the sender-name block: [4-byte LE length][name bytes][NUL].
pub fn write_sender_name<W: Write + ?Sized>(w: &mut W, name: &str) -> Result<()> {
    let len = (name.len() + 1) as i32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(name.as_bytes())?;
    w.write_all(&[0u8])?;
    Ok(())
}

/// Read the sender-name block written by [`write_sender_name`].
///
/// The announced length is clamped to `1..=MAX_SENDER_NAME_LEN` so a
/// hostile peer cannot make us allocate unbounded memory.
pub fn read_sender_name<R: Read + ?Sized>(r: &mut R) -> Result<String> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = (i32::from_le_bytes(len_bytes).clamp(1, MAX_SENDER_NAME_LEN as i32)) as usize;
    let mut name = vec![0u8; len];
    r.read_exact(&mut name)?;
    // trailing NUL is part of the block, not the name
    while name.last() == Some(&0) {
        name.pop();
    }
    String::from_utf8(name).map_err(|_| Error::HandshakeFailed("sender name not UTF-8".into()))
}

// ============================================================================
// Lines (text-mode carriers)
// ============================================================================

/// Read one newline-terminated line, stripping `\r\n`/`\n`.
///
/// Returns `None` on EOF before any byte arrives.
pub fn read_line<R: Read + ?Sized>(r: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte) {
            Ok(0) => {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(e) => return Err(e.into()),
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| Error::HandshakeFailed("line not UTF-8".into()))
}

// ============================================================================
// Command frames
// ============================================================================

/// The closed set of in-band control frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Ask the peer to close the connection ('q').
    Quit,
    /// A payload follows; 'd' expects a reply, 'D' suppresses it.
    Data { expects_reply: bool },
    /// An administrative payload follows ('a').
    Admin,
}

impl Frame {
    /// The wire tag for this frame.
    pub fn tag(self) -> u8 {
        match self {
            Frame::Quit => b'q',
            Frame::Data {
                expects_reply: true,
            } => b'd',
            Frame::Data {
                expects_reply: false,
            } => b'D',
            Frame::Admin => b'a',
        }
    }

    /// Decode a wire tag, if it names a known frame.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'q' => Some(Frame::Quit),
            b'd' => Some(Frame::Data {
                expects_reply: true,
            }),
            b'D' => Some(Frame::Data {
                expects_reply: false,
            }),
            b'a' => Some(Frame::Admin),
            _ => None,
        }
    }

    /// Whether a payload block follows this frame on the wire.
    pub fn carries_payload(self) -> bool {
        matches!(self, Frame::Data { .. } | Frame::Admin)
    }
}

/// A frame plus its short text argument.
///
/// For data frames the text carries the envelope; for the others it is
/// usually empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortCommand {
    frame: Frame,
    text: String,
}

impl PortCommand {
    pub fn new(frame: Frame, text: &str) -> Self {
        Self {
            frame,
            text: text.to_owned(),
        }
    }

    /// Data frame carrying an envelope.
    pub fn data(envelope: &str, expects_reply: bool) -> Self {
        Self::new(Frame::Data { expects_reply }, envelope)
    }

    pub fn quit() -> Self {
        Self::new(Frame::Quit, "")
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Binary form: tag byte followed by the text bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.text.len());
        bytes.push(self.frame.tag());
        bytes.extend_from_slice(self.text.as_bytes());
        bytes
    }

    /// Decode the binary form. `None` for an unknown tag.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        let frame = Frame::from_tag(tag)?;
        let text = String::from_utf8_lossy(rest).into_owned();
        Some(Self { frame, text })
    }

    /// Text-mode form: the tag character, then the argument if any.
    pub fn encode_line(&self) -> String {
        if self.text.is_empty() {
            (self.frame.tag() as char).to_string()
        } else {
            format!("{} {}", self.frame.tag() as char, self.text)
        }
    }

    /// Decode the text-mode form. `None` for an empty or unknown line.
    pub fn decode_line(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let tag = chars.next()?;
        let frame = Frame::from_tag(tag as u8)?;
        let text = chars.as_str().trim_start().to_owned();
        Some(Self { frame, text })
    }
}
