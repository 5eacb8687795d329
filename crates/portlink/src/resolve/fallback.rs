// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Multicast fallback discovery.
//!
//! On ad hoc robot networks the registry's address is frequently not known
//! in advance. When the configured address cannot be reached, the resolver
//! broadcasts a probe to a well-known multicast group and waits a bounded
//! window for any registry to answer with its own registration line.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol as SockProtocol, Socket, Type};

use crate::contact::Contact;
use crate::error::{Error, Result};
use crate::resolve::parse_registration;

/// Multicast group the discovery probe is sent to.
pub const DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 10, 1);

/// Port registries listen on for discovery probes.
pub const DISCOVERY_PORT: u16 = 10012;

/// The probe datagram. Registries answer with a `registration` line.
pub const DISCOVERY_PROBE: &[u8] = b"NAME_SERVER probe\n";

/// How long one scan waits before giving up.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(3);

/// Probe resend / receive poll interval within the window.
const POLL_STEP: Duration = Duration::from_millis(250);

/// Discovery probe client.
#[derive(Clone, Debug)]
pub struct FallbackDiscovery {
    /// Where probes are sent; the multicast group by default, overridable
    /// with a unicast address (tests, constrained networks).
    target: SocketAddr,

    /// Bounded scan window.
    window: Duration,
}

impl FallbackDiscovery {
    pub fn new() -> Self {
        Self {
            target: SocketAddr::V4(SocketAddrV4::new(DISCOVERY_GROUP, DISCOVERY_PORT)),
            window: DEFAULT_SCAN_WINDOW,
        }
    }

    /// Send probes to a specific address instead of the multicast group.
    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = target;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Probe for a registry and return the first valid contact offered.
    ///
    /// Blocks for at most the scan window. Probes are re-sent every poll
    /// step so a registry that starts mid-scan is still found.
    pub fn scan(&self) -> Result<Contact> {
        let socket = self.probe_socket()?;
        let deadline = Instant::now() + self.window;
        let mut buf = [0u8; 512];

        log::info!("[MCAST] scanning for a registry at {}", self.target);
        loop {
            let _ = socket.send_to(DISCOVERY_PROBE, self.target);

            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    if let Some(contact) = parse_registration(&text) {
                        if contact.is_valid() {
                            log::info!("[MCAST] registry found at {} (via {})", contact, from);
                            return Ok(contact);
                        }
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(Error::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(Error::RegistryUnreachable(
                    "discovery window elapsed with no answer".into(),
                ));
            }
        }
    }

    // Probe sockets are plain senders; replies come back unicast to the
    // ephemeral source port, so no group join is needed on this side.
    fn probe_socket(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(SockProtocol::UDP))
            .map_err(Error::Io)?;
        socket.set_reuse_address(true).map_err(Error::Io)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        socket.bind(&bind_addr.into()).map_err(Error::Io)?;
        socket.set_multicast_loop_v4(true).map_err(Error::Io)?;
        let _ = socket.set_multicast_ttl_v4(1);
        socket
            .set_read_timeout(Some(POLL_STEP))
            .map_err(Error::Io)?;
        Ok(socket.into())
    }
}

impl Default for FallbackDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    /// A unicast stand-in for a registry's discovery responder.
    fn spawn_responder(reply: &'static [u8]) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 128];
            if let Ok((n, from)) = socket.recv_from(&mut buf) {
                assert_eq!(&buf[..n], DISCOVERY_PROBE);
                let _ = socket.send_to(reply, from);
            }
        });
        addr
    }

    #[test]
    fn test_scan_finds_responder() {
        let addr =
            spawn_responder(b"registration name /root ip 127.0.0.1 port 10000 type tcp\n");
        let discovery = FallbackDiscovery::new()
            .with_target(addr)
            .with_window(Duration::from_secs(2));

        let contact = discovery.scan().unwrap();
        assert_eq!(contact.host(), "127.0.0.1");
        assert_eq!(contact.port(), 10000);
    }

    #[test]
    fn test_scan_ignores_garbage_answers() {
        let addr = spawn_responder(b"hello there\n");
        let discovery = FallbackDiscovery::new()
            .with_target(addr)
            .with_window(Duration::from_millis(600));

        assert!(matches!(
            discovery.scan(),
            Err(Error::RegistryUnreachable(_))
        ));
    }

    #[test]
    fn test_scan_times_out_with_no_registry() {
        // Nothing listens here; the window must bound the wait.
        let dead = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = dead.local_addr().unwrap();
        drop(dead);

        let discovery = FallbackDiscovery::new()
            .with_target(addr)
            .with_window(Duration::from_millis(400));

        let started = Instant::now();
        assert!(discovery.scan().is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
