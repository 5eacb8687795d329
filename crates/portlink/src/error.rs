// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Error types for port communication.
//!
//! Failures are grouped by where they occur: name resolution, connection
//! handshake, steady-state transport, API usage, and local resources.
//! Connection-scoped failures never abort the owning port; resolution
//! metadata failures are always non-fatal (see the resolver).

use std::io;

/// Errors returned by portlink operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Resolution errors
    // ========================================================================
    /// The registry could not be reached and no fallback succeeded.
    RegistryUnreachable(String),
    /// The registry answered but knows no port by this name.
    NameNotFound(String),
    /// The registry reply did not parse as a registration line.
    MalformedReply(String),

    // ========================================================================
    // Handshake errors
    // ========================================================================
    /// The first 8 bytes of an inbound stream matched no registered carrier.
    ProtocolNotFound,
    /// A carrier was requested by a name the registry does not know.
    NoSuchCarrier(String),
    /// Header/specifier exchange failed before any data flowed.
    HandshakeFailed(String),

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// The stream died mid-message (peer reset, write failure).
    StreamClosed,
    /// I/O error with underlying cause.
    Io(io::Error),

    // ========================================================================
    // Usage errors
    // ========================================================================
    /// `wait_before=false, wait_after=true` is not a supported send mode.
    UnsupportedFlagCombination,
    /// A contact was used before it was resolved to a host and port.
    InvalidContact(String),
    /// Operation not valid in the connection's current state.
    InvalidState(String),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Could not spawn a worker thread for an asynchronous connection.
    ThreadSpawn(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RegistryUnreachable(msg) => write!(f, "registry unreachable: {}", msg),
            Error::NameNotFound(name) => write!(f, "name not found: {}", name),
            Error::MalformedReply(line) => write!(f, "malformed registry reply: {}", line),
            Error::ProtocolNotFound => write!(f, "protocol not found"),
            Error::NoSuchCarrier(name) => write!(f, "no such carrier: {}", name),
            Error::HandshakeFailed(msg) => write!(f, "handshake failed: {}", msg),
            Error::StreamClosed => write!(f, "stream closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::UnsupportedFlagCombination => {
                write!(f, "wait_before=false with wait_after=true is not supported")
            }
            Error::InvalidContact(msg) => write!(f, "invalid contact: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::ThreadSpawn(msg) => write!(f, "could not spawn worker thread: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe => Error::StreamClosed,
            _ => Error::Io(e),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::ProtocolNotFound.to_string(), "protocol not found");
        assert_eq!(
            Error::NameNotFound("/camera".into()).to_string(),
            "name not found: /camera"
        );
        assert!(Error::UnsupportedFlagCombination
            .to_string()
            .contains("wait_before"));
    }

    #[test]
    fn test_io_conversion_maps_eof_to_stream_closed() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(Error::from(eof), Error::StreamClosed));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(Error::from(reset), Error::StreamClosed));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(Error::from(denied), Error::Io(_)));
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "inner"));
        assert!(err.source().is_some());
        assert!(Error::ProtocolNotFound.source().is_none());
    }
}
