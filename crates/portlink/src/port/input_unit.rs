// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Per-connection input worker.
//!
//! A [`PortInputUnit`] services one inbound connection on its own thread:
//! it runs the inbound handshake, reports the connection to the owning
//! port, then loops reading frames and dispatching them — data to
//! [`PortManager::deliver`], admin to [`PortManager::admin`], quit to the
//! exit path. Unknown lines on text-mode connections get a help block, so a
//! human at a raw socket can find their way.
//!
//! Closing a unit whose thread is blocked in a read requires interrupting
//! the stream; a flag alone cannot unblock a system call. `close_main`
//! interrupts, joins, and is idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::io::StreamInterrupter;
use crate::port::{PortEvent, PortManager};
use crate::protocol::frame::Frame;
use crate::protocol::{Incoming, Protocol};
use crate::route::Route;

/// Answer to `?` or any unrecognized command on a text-mode connection.
const HELP_TEXT: &str = "This is a portlink port. Commands it responds to:\n\
  d <env>  payload follows; the reply, if any, is sent back\n\
  D <env>  payload follows; replies are suppressed\n\
  a        administrative payload follows\n\
  q        disconnect\n\
  ?        this help\n";

/// Input-side worker for one connection.
pub struct PortInputUnit {
    route: Arc<Mutex<Route>>,
    closing: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    interrupter: Arc<dyn StreamInterrupter>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PortInputUnit {
    /// Spawn the service thread for a freshly-accepted stream.
    ///
    /// Returns once the worker has signaled readiness on its one-shot
    /// channel; the handshake itself proceeds on the worker so a slow peer
    /// cannot stall the accept loop. A handshake failure tears the
    /// connection down without it ever reaching the owner's connection
    /// list.
    pub fn start(protocol: Protocol, manager: Arc<dyn PortManager>) -> Result<Self> {
        let closing = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let interrupter = protocol.interrupter();
        let route = Arc::new(Mutex::new(protocol.route().clone()));
        let (ready_tx, ready_rx) = channel::bounded(0);

        let worker = Worker {
            protocol,
            port_name: manager.port_name(),
            manager,
            closing: closing.clone(),
            finished: finished.clone(),
            route: route.clone(),
        };
        let handle = thread::Builder::new()
            .name("portlink-in".to_owned())
            .spawn(move || worker.run(ready_tx))
            .map_err(|e| Error::ThreadSpawn(e.to_string()))?;

        // Signaled exactly once, before the worker's main loop.
        let _ = ready_rx.recv();

        Ok(Self {
            route,
            closing,
            finished,
            interrupter,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The connection's route (official once the handshake completed).
    pub fn route(&self) -> Route {
        self.route.lock().clone()
    }

    /// Whether the service thread is still running.
    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }

    /// Wake the worker out of a blocked read and flag it to stop.
    pub fn interrupt(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.interrupter.interrupt();
        }
    }

    /// Interrupt, then join the worker. Safe to call repeatedly.
    pub fn close_main(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.interrupt();
            let _ = handle.join();
        }
    }
}

impl Drop for PortInputUnit {
    fn drop(&mut self) {
        self.close_main();
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    protocol: Protocol,
    port_name: String,
    manager: Arc<dyn PortManager>,
    closing: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    route: Arc<Mutex<Route>>,
}

impl Worker {
    fn run(mut self, ready: Sender<()>) {
        let _ = ready.send(());

        if let Err(e) = self.protocol.open_inbound(&self.port_name) {
            // Never exposed to the owner: the connection simply goes away.
            log::debug!(
                "[UNIT] inbound handshake for {} failed: {}",
                self.port_name,
                e
            );
            self.finished.store(true, Ordering::Release);
            return;
        }

        let route = self.protocol.route().clone();
        *self.route.lock() = route.clone();

        let opened = PortEvent::connection_opened(route.clone(), true);
        log::info!("[UNIT] {}", opened.message);
        self.manager.report(&opened);

        self.read_loop(&route);

        self.protocol.close();
        let closed = PortEvent::connection_closed(route, true);
        log::info!("[UNIT] {}", closed.message);
        self.manager.report(&closed);
        self.finished.store(true, Ordering::Release);
    }

    fn read_loop(&mut self, route: &Route) {
        let (supports_reply, is_text) = match self.protocol.carrier() {
            Some(c) => (c.supports_reply(), c.is_text_mode()),
            None => return,
        };

        while !self.closing.load(Ordering::Acquire) {
            let incoming = match self.protocol.begin_read() {
                Ok(Some(incoming)) => incoming,
                Ok(None) => break,
                Err(e) => {
                    log::debug!("[UNIT] read on {} failed: {}", route, e);
                    break;
                }
            };

            let keep_going = match incoming {
                Incoming::Unknown(line) => {
                    log::debug!("[UNIT] unrecognized command on {}: {:?}", route, line);
                    self.protocol.end_read(Some(HELP_TEXT.as_bytes())).is_ok()
                }
                Incoming::Message(msg) => match msg.command.frame() {
                    Frame::Quit => {
                        // Text peers block briefly for a goodbye line.
                        let farewell = if is_text { Some(&b"bye"[..]) } else { None };
                        let _ = self.protocol.end_read(farewell);
                        false
                    }
                    Frame::Data { expects_reply } => {
                        let envelope = self.protocol.envelope().to_owned();
                        self.manager.set_envelope(&envelope);
                        let wants_reply = expects_reply && supports_reply;
                        let mut reply_buf = Vec::new();
                        self.manager.deliver(
                            route,
                            &msg.payload,
                            &envelope,
                            if wants_reply {
                                Some(&mut reply_buf)
                            } else {
                                None
                            },
                        );
                        // The sender reads a reply frame whenever it asked
                        // for one; a declined delivery answers with an
                        // empty reply, never with silence.
                        let reply = if wants_reply {
                            Some(reply_buf.as_slice())
                        } else {
                            None
                        };
                        self.protocol.end_read(reply).is_ok()
                    }
                    Frame::Admin => {
                        let mut reply_buf = Vec::new();
                        let handled = self.manager.admin(
                            route,
                            &msg.payload,
                            if supports_reply {
                                Some(&mut reply_buf)
                            } else {
                                None
                            },
                        );
                        let reply = if supports_reply && handled && !reply_buf.is_empty() {
                            Some(reply_buf.as_slice())
                        } else {
                            None
                        };
                        self.protocol.end_read(reply).is_ok()
                    }
                },
            };

            if !keep_going || !self.protocol.is_ok() {
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::CarrierRegistry;
    use crate::io::mock::MockStream;
    use crate::port::testing::RecordingManager;
    use crate::protocol::frame::PortCommand;
    use crate::protocol::ReplyReader;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::time::Duration;

    fn registry() -> Arc<CarrierRegistry> {
        Arc::new(CarrierRegistry::default())
    }

    /// Start an input unit on one end of a mock pair; return the unit, the
    /// outbound protocol talking to it, and the recording manager.
    fn started_unit(manager: Arc<RecordingManager>) -> (PortInputUnit, Protocol) {
        let (out_stream, in_stream) = MockStream::pair();
        let inbound = Protocol::new(Box::new(in_stream), registry());
        let unit = PortInputUnit::start(inbound, manager).unwrap();

        let mut out = Protocol::new(Box::new(out_stream), registry());
        out.open_outbound(Route::new("/writer", "/reader", "tcp"))
            .unwrap();
        (unit, out)
    }

    fn wait_until(pred: impl Fn() -> bool) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_data_is_delivered_with_envelope() {
        let manager = Arc::new(RecordingManager::default());
        let (unit, mut out) = started_unit(manager.clone());

        out.write_message(&PortCommand::data("stamp 9", false), b"reading", None)
            .unwrap();

        wait_until(|| !manager.payloads.lock().is_empty());
        assert_eq!(manager.payloads.lock()[0], b"reading");
        assert_eq!(manager.envelopes.lock()[0], "stamp 9");

        out.close();
        unit.close_main();
    }

    #[test]
    fn test_reply_flows_back_to_sender() {
        let manager = Arc::new(RecordingManager::replying(b"sensor ok"));
        let (unit, mut out) = started_unit(manager.clone());
        let mut reply = Vec::new();
        let got = out
            .write_message(
                &PortCommand::data("", true),
                b"status?",
                Some(&mut reply as &mut dyn ReplyReader),
            )
            .unwrap();
        assert!(got);
        assert_eq!(reply, b"sensor ok");

        out.close();
        unit.close_main();
    }

    #[test]
    fn test_declined_delivery_still_answers_the_reply_frame() {
        let manager = Arc::new(RecordingManager::declining());
        let (unit, mut out) = started_unit(manager.clone());

        // The manager declines the payload; the sender must still see its
        // reply frame (empty) and the ack, in that order, without hanging.
        let mut reply = Vec::new();
        let got = out
            .write_message(
                &PortCommand::data("", true),
                b"unwanted",
                Some(&mut reply as &mut dyn ReplyReader),
            )
            .unwrap();
        assert!(got);
        assert!(reply.is_empty());
        assert_eq!(manager.payloads.lock()[0], b"unwanted");

        out.close();
        unit.close_main();
    }

    #[test]
    fn test_quit_ends_the_unit() {
        let manager = Arc::new(RecordingManager::default());
        let (unit, mut out) = started_unit(manager.clone());

        out.write_message(&PortCommand::quit(), b"", None).unwrap();
        wait_until(|| !unit.is_running());

        let events = manager.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events[0].created && events[0].incoming);
        assert!(!events[1].created && events[1].incoming);
        drop(events);

        unit.close_main();
        out.close();
    }

    #[test]
    fn test_admin_payload_routed_to_manager() {
        let manager = Arc::new(RecordingManager::default());
        let (unit, mut out) = started_unit(manager.clone());

        out.write_message(
            &PortCommand::new(Frame::Admin, ""),
            b"disconnect /writer",
            None,
        )
        .unwrap();

        wait_until(|| !manager.admin_payloads.lock().is_empty());
        assert_eq!(manager.admin_payloads.lock()[0], b"disconnect /writer");

        out.close();
        unit.close_main();
    }

    #[test]
    fn test_close_interrupts_blocked_reader() {
        let manager = Arc::new(RecordingManager::default());
        let (unit, _out) = started_unit(manager.clone());

        // No traffic: the worker is blocked in a read. Closing must still
        // complete promptly.
        unit.close_main();
        assert!(!unit.is_running());

        // opened + closed, exactly once each
        let events = manager.events.lock();
        assert_eq!(events.iter().filter(|e| e.created).count(), 1);
        assert_eq!(events.iter().filter(|e| !e.created).count(), 1);
    }

    #[test]
    fn test_close_main_is_idempotent() {
        let manager = Arc::new(RecordingManager::default());
        let (unit, _out) = started_unit(manager.clone());

        unit.close_main();
        unit.close_main();

        let events = manager.events.lock();
        assert_eq!(events.iter().filter(|e| !e.created).count(), 1);
    }

    #[test]
    fn test_failed_handshake_never_reported() {
        let manager = Arc::new(RecordingManager::default());
        let (mut probe, in_stream) = MockStream::pair();
        let inbound = Protocol::new(Box::new(in_stream), registry());
        let unit = PortInputUnit::start(inbound, manager.clone()).unwrap();

        probe.write_all(b"NOT-OURS").unwrap();
        wait_until(|| !unit.is_running());

        assert!(manager.events.lock().is_empty());

        // The prober got the diagnostic text.
        let mut first = [0u8; 7];
        probe.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"* Error");
    }

    #[test]
    fn test_text_connection_gets_help_for_unknown_command() {
        let manager = Arc::new(RecordingManager::default());
        let (probe, in_stream) = MockStream::pair();
        let inbound = Protocol::new(Box::new(in_stream), registry());
        let unit = PortInputUnit::start(inbound, manager).unwrap();

        let mut probe = probe;
        probe.write_all(b"CONNECT /human\n").unwrap();
        let mut reader = BufReader::new(&mut probe);

        let mut welcome = String::new();
        reader.read_line(&mut welcome).unwrap();
        assert!(welcome.starts_with("Welcome"));

        reader.get_mut().write_all(b"help me\n").unwrap();
        let mut answer = String::new();
        reader.read_line(&mut answer).unwrap();
        assert!(answer.starts_with("This is a portlink port"));

        reader.get_mut().write_all(b"q\n").unwrap();
        let mut farewell = String::new();
        reader.read_line(&mut farewell).unwrap();
        assert_eq!(farewell.trim_end(), "bye");

        unit.close_main();
    }
}
