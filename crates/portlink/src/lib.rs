// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! # portlink - port-to-port communication for robotics middleware
//!
//! The inter-process communication core of a robot software bus: named
//! endpoints locate each other through a registry, negotiate a transport
//! ("carrier") from an 8-byte magic, exchange payloads with optional
//! acknowledgement, and tear connections down cleanly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portlink::{NameConfig, NameResolver, Result};
//!
//! fn main() -> Result<()> {
//!     // Resolve a logical port name against the registry (with multicast
//!     // fallback when the registry's address is unknown).
//!     let resolver = NameResolver::new(NameConfig::new());
//!     let contact = resolver.query("/robot/camera")?;
//!     println!("/robot/camera lives at {}", contact);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     Owning port (external)                   |
//! |        pub/sub fan-out, connection lists: PortManager        |
//! +--------------------------------------------------------------+
//! |                        Connection units                      |
//! |   PortOutputUnit (sync/async send)  |  PortInputUnit (loop)  |
//! +--------------------------------------------------------------+
//! |                          Protocol                            |
//! |     handshake -> index -> payload -> reply? -> ack? -> close |
//! +--------------------------------------------------------------+
//! |                 Carriers        |       Name resolution      |
//! |   tcp | udp | text (sniffed)    |  registry, scan, config    |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Contact`] | Resolved network address for a logical port name |
//! | [`Route`] | (from, to, carrier) triple identifying a connection |
//! | [`Protocol`] | Connection choreographer owning stream and carrier |
//! | [`PortOutputUnit`] | Per-connection output worker |
//! | [`PortInputUnit`] | Per-connection input worker |
//! | [`NameResolver`] | Registry client with multicast fallback |
//!
//! ## Modules Overview
//!
//! - [`port`] - connection units and the owning-port interface
//! - [`protocol`] - handshake/ack state machine and wire frames
//! - [`carrier`] - transport strategies and the sniffing registry
//! - [`resolve`] - name resolution, config cache, fallback discovery
//! - [`io`] - the blocking stream abstraction

/// Pluggable transport strategies (tcp, udp, text) and their registry.
pub mod carrier;
/// Resolved network addresses for logical port names.
pub mod contact;
/// Error taxonomy for resolution, handshake, transport and usage failures.
pub mod error;
/// Blocking two-way byte streams with interrupt support.
pub mod io;
/// Per-connection input/output workers and the owning-port interface.
pub mod port;
/// The connection choreographer and its wire primitives.
pub mod protocol;
/// Name resolution: registry client, config cache, multicast fallback.
pub mod resolve;
/// Logical connection identity.
pub mod route;

pub use carrier::{Carrier, CarrierRegistry, TcpCarrier, TextCarrier, UdpCarrier};
pub use contact::Contact;
pub use error::{Error, Result};
pub use io::{ConnectionStream, StreamInterrupter, TcpTwoWay};
pub use port::{PortEvent, PortInputUnit, PortManager, PortOutputUnit, SendOutcome, Tracker};
pub use protocol::frame::{Frame, PortCommand};
pub use protocol::{Incoming, Message, Protocol, ProtocolState, ReplyReader};
pub use resolve::{FallbackDiscovery, NameConfig, NameResolver};
pub use route::Route;

/// portlink version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
