// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! The [`ConnectionStream`] trait and its TCP implementation.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};

use crate::contact::Contact;

/// Handle that can wake a thread blocked in a read on the stream.
///
/// Obtained before the stream is handed to a worker thread; calling
/// `interrupt` from any other thread forces the blocked read to return.
pub trait StreamInterrupter: Send + Sync {
    fn interrupt(&self);
}

/// A blocking two-way byte stream owned by one Protocol.
///
/// Unifies TCP and in-memory test streams. Implementations track their own
/// health: after a read/write failure or an interrupt, `is_ok` returns false
/// and the connection choreographer winds the connection down.
pub trait ConnectionStream: Read + Write + Send {
    /// Whether the stream is still usable.
    fn is_ok(&self) -> bool;

    /// Local address, when the transport has one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Peer address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Set the read timeout (`None` blocks indefinitely).
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()>;

    /// Cheap shareable handle that can interrupt a blocked read.
    fn interrupter(&self) -> Arc<dyn StreamInterrupter>;

    /// Release the transport. Further reads/writes fail.
    fn close(&mut self);
}

// ============================================================================
// TCP implementation
// ============================================================================

/// TCP-backed [`ConnectionStream`].
pub struct TcpTwoWay {
    stream: TcpStream,
    ok: Arc<AtomicBool>,
}

impl TcpTwoWay {
    /// Wrap an already-connected stream (e.g. from a listener accept).
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        Self::configure(&stream)?;
        Ok(Self {
            stream,
            ok: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Dial a contact with a connect timeout.
    pub fn connect(contact: &Contact, timeout: Duration) -> io::Result<Self> {
        let mut last_err =
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no address for contact");
        for addr in resolve_addrs(contact)? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    // Nagle off for small handshake packets, keepalive so a dead peer is
    // noticed even on idle connections.
    fn configure(stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let sock = SockRef::from(stream);
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
        // Keepalive is advisory; some platforms refuse it on odd sockets.
        let _ = sock.set_tcp_keepalive(&keepalive);
        Ok(())
    }

    fn mark_dead_on<T>(&self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.ok.store(false, Ordering::Release);
        }
        result
    }
}

fn resolve_addrs(contact: &Contact) -> io::Result<Vec<SocketAddr>> {
    use std::net::ToSocketAddrs;
    if !contact.is_valid() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unresolved contact {}", contact),
        ));
    }
    Ok((contact.host(), contact.port() as u16)
        .to_socket_addrs()?
        .collect())
}

impl Read for TcpTwoWay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let r = self.stream.read(buf);
        match &r {
            Ok(0) if !buf.is_empty() => self.ok.store(false, Ordering::Release),
            Err(_) => self.ok.store(false, Ordering::Release),
            _ => {}
        }
        r
    }
}

impl Write for TcpTwoWay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let r = self.stream.write(buf);
        self.mark_dead_on(r)
    }

    fn flush(&mut self) -> io::Result<()> {
        let r = self.stream.flush();
        self.mark_dead_on(r)
    }
}

impl ConnectionStream for TcpTwoWay {
    fn is_ok(&self) -> bool {
        self.ok.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(dur)
    }

    fn interrupter(&self) -> Arc<dyn StreamInterrupter> {
        Arc::new(TcpInterrupter {
            stream: self.stream.try_clone().ok(),
            ok: self.ok.clone(),
        })
    }

    fn close(&mut self) {
        self.ok.store(false, Ordering::Release);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct TcpInterrupter {
    stream: Option<TcpStream>,
    ok: Arc<AtomicBool>,
}

impl StreamInterrupter for TcpInterrupter {
    fn interrupt(&self) {
        self.ok.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn loopback_pair() -> (TcpTwoWay, TcpTwoWay) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let join = thread::spawn(move || listener.accept().unwrap().0);
        let client = TcpStream::connect(addr).unwrap();
        let server = join.join().unwrap();
        (
            TcpTwoWay::from_stream(client).unwrap(),
            TcpTwoWay::from_stream(server).unwrap(),
        )
    }

    #[test]
    fn test_round_trip() {
        let (mut a, mut b) = loopback_pair();
        a.write_all(b"ping").unwrap();
        a.flush().unwrap();

        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[test]
    fn test_eof_marks_stream_dead() {
        let (mut a, mut b) = loopback_pair();
        a.close();

        let mut buf = [0u8; 4];
        let _ = b.read(&mut buf);
        assert!(!b.is_ok());
    }

    #[test]
    fn test_interrupt_wakes_blocked_reader() {
        let (_a, mut b) = loopback_pair();
        let interrupter = b.interrupter();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 4];
            // Blocks until the interrupter shuts the socket down.
            let _ = b.read(&mut buf);
            b.is_ok()
        });

        thread::sleep(Duration::from_millis(50));
        interrupter.interrupt();
        assert!(!reader.join().unwrap());
    }

    #[test]
    fn test_connect_rejects_unresolved_contact() {
        let c = Contact::invalid("/nowhere");
        assert!(TcpTwoWay::connect(&c, Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_addresses_present() {
        let (a, _b) = loopback_pair();
        assert!(a.local_addr().is_some());
        assert!(a.peer_addr().is_some());
    }
}
