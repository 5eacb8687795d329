// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! In-memory blocking stream pair for tests.
//!
//! Unlike a socket, a [`MockStream`] lets tests feed bytes into the read
//! side, capture everything written, inject one-shot errors, and exercise
//! the interrupt path without real network timing.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::stream::{ConnectionStream, StreamInterrupter};

struct PipeInner {
    buf: VecDeque<u8>,
    closed: bool,
    read_error: Option<io::ErrorKind>,
}

/// One direction of byte flow between two mock endpoints.
struct Pipe {
    inner: Mutex<PipeInner>,
    readable: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(PipeInner {
                buf: VecDeque::new(),
                closed: false,
                read_error: None,
            }),
            readable: Condvar::new(),
        })
    }

    fn push(&self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        inner.buf.extend(data);
        self.readable.notify_all();
        Ok(data.len())
    }

    fn pull(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(kind) = inner.read_error.take() {
                return Err(io::Error::new(kind, "injected error"));
            }
            if !inner.buf.is_empty() {
                let n = buf.len().min(inner.buf.len());
                for (i, byte) in inner.buf.drain(..n).enumerate() {
                    buf[i] = byte;
                }
                return Ok(n);
            }
            if inner.closed {
                return Ok(0); // EOF
            }
            match timeout {
                Some(dur) => {
                    if self.readable.wait_for(&mut inner, dur).timed_out() {
                        return Err(io::Error::new(io::ErrorKind::WouldBlock, "read timed out"));
                    }
                }
                None => self.readable.wait(&mut inner),
            }
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.readable.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn set_read_error(&self, kind: io::ErrorKind) {
        self.inner.lock().read_error = Some(kind);
    }

    fn drain(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.buf.drain(..).collect()
    }
}

/// Blocking in-memory [`ConnectionStream`] for tests.
pub struct MockStream {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    read_timeout: Mutex<Option<Duration>>,
}

impl MockStream {
    /// Standalone stream; reads block on [`MockStream::feed`], writes are
    /// captured for [`MockStream::drain_written`].
    pub fn new() -> Self {
        Self {
            incoming: Pipe::new(),
            outgoing: Pipe::new(),
            read_timeout: Mutex::new(None),
        }
    }

    /// Connected pair: what one writes, the other reads.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Pipe::new();
        let b_to_a = Pipe::new();
        let a = Self {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
            read_timeout: Mutex::new(None),
        };
        let b = Self {
            incoming: a_to_b,
            outgoing: b_to_a,
            read_timeout: Mutex::new(None),
        };
        (a, b)
    }

    /// Make `data` available to this stream's reader.
    pub fn feed(&self, data: &[u8]) {
        let _ = self.incoming.push(data);
    }

    /// Take every byte written so far (on a paired stream this steals
    /// bytes the peer has not read yet).
    pub fn drain_written(&self) -> Vec<u8> {
        self.outgoing.drain()
    }

    /// Fail the next read with the given error kind.
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        self.incoming.set_read_error(kind);
    }

    /// Signal EOF to this stream's reader.
    pub fn close_incoming(&self) {
        self.incoming.close();
    }
}

impl Default for MockStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = *self.read_timeout.lock();
        self.incoming.pull(buf, timeout)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ConnectionStream for MockStream {
    fn is_ok(&self) -> bool {
        !self.incoming.is_closed() && !self.outgoing.is_closed()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        *self.read_timeout.lock() = dur;
        Ok(())
    }

    fn interrupter(&self) -> Arc<dyn StreamInterrupter> {
        Arc::new(MockInterrupter {
            incoming: self.incoming.clone(),
            outgoing: self.outgoing.clone(),
        })
    }

    fn close(&mut self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

struct MockInterrupter {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
}

impl StreamInterrupter for MockInterrupter {
    fn interrupt(&self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_feed_and_read() {
        let mut s = MockStream::new();
        s.feed(b"hello");
        let mut buf = [0u8; 5];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_write_capture() {
        let mut s = MockStream::new();
        s.write_all(b"captured").unwrap();
        assert_eq!(s.drain_written(), b"captured");
        assert!(s.drain_written().is_empty());
    }

    #[test]
    fn test_pair_round_trip() {
        let (mut a, mut b) = MockStream::pair();
        a.write_all(b"over").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"over");
    }

    #[test]
    fn test_blocking_read_wakes_on_peer_write() {
        let (mut a, mut b) = MockStream::pair();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            b.write_all(b"x").unwrap();
        });
        let mut buf = [0u8; 1];
        a.read_exact(&mut buf).unwrap();
        writer.join().unwrap();
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn test_interrupt_unblocks_reader() {
        let (mut a, _b) = MockStream::pair();
        let interrupter = a.interrupter();
        let reader = thread::spawn(move || {
            let mut buf = [0u8; 1];
            a.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(30));
        interrupter.interrupt();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_read_timeout() {
        let mut s = MockStream::new();
        s.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 1];
        let err = s.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_error_injection_is_one_shot() {
        let mut s = MockStream::new();
        s.inject_read_error(io::ErrorKind::ConnectionReset);
        let mut buf = [0u8; 1];
        assert_eq!(
            s.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
        s.feed(b"y");
        assert_eq!(s.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn test_write_to_closed_peer_fails() {
        let (mut a, mut b) = MockStream::pair();
        b.close();
        assert!(a.write(b"z").is_err());
    }
}
