// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Per-connection output worker.
//!
//! A [`PortOutputUnit`] owns one outbound [`Protocol`] and presents a
//! uniform `send` regardless of threading:
//!
//! - a unit starts in synchronous mode, sending on the caller's thread;
//! - the first `wait_after=false` send upgrades it to a dedicated worker
//!   thread, started lazily and joined on close;
//! - in asynchronous mode at most one send is in flight at a time. A send
//!   arriving while the worker is busy is **dropped and logged** — that is
//!   the unit's backpressure policy, one outstanding message per
//!   destination, and deliberately not a queue.
//!
//! The opaque tracker token threaded through `send` correlates completion
//! bookkeeping with the original request: accepting a send stores the new
//! token and hands the previous one back to the caller under the unit lock.

use std::any::Any;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::io::TcpTwoWay;
use crate::port::{PortEvent, PortManager};
use crate::protocol::frame::{Frame, PortCommand};
use crate::protocol::{Protocol, ReplyReader};
use crate::resolve::NameResolver;
use crate::route::Route;

/// Opaque caller-supplied token threaded through `send`.
///
/// Owned by whoever currently holds it; ownership transfers on every swap.
pub type Tracker = Box<dyn Any + Send>;

/// Timeout for dialing the peer's control channel during close.
const CONTROL_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for a text-mode peer to acknowledge a quit.
const QUIT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// What a `send` call produced.
pub struct SendOutcome {
    /// Token handed back to the caller: the previous in-flight token when
    /// the send was accepted, or the caller's own token when it was not.
    pub tracker: Option<Tracker>,

    /// Whether an application reply was read back (synchronous sends only).
    pub got_reply: bool,
}

// ============================================================================
// Worker plumbing
// ============================================================================

struct Job {
    command: PortCommand,
    payload: Vec<u8>,
    want_reply: bool,
    completion: Option<Sender<SendDone>>,
}

struct SendDone {
    got_reply: bool,
    reply: Vec<u8>,
}

enum SenderState {
    /// Sends run on the caller's thread.
    Sync(Box<Protocol>),

    /// Sends run on the worker thread.
    Async(AsyncSender),

    /// Closed; the protocol is gone.
    Retired,
}

struct AsyncSender {
    jobs: Sender<Job>,
    handle: JoinHandle<Box<Protocol>>,
}

/// In-flight marker shared with the worker.
struct Flight {
    busy: Mutex<bool>,
    done: Condvar,
}

// ============================================================================
// The unit
// ============================================================================

/// Output-side worker for one connection.
pub struct PortOutputUnit {
    route: Route,
    manager: Arc<dyn PortManager>,
    resolver: Option<Arc<NameResolver>>,
    state: Mutex<SenderState>,
    flight: Arc<Flight>,
    active: Arc<AtomicBool>,
    tracker: Mutex<Option<Tracker>>,
    closed: AtomicBool,
    removal_reported: AtomicBool,
}

impl PortOutputUnit {
    /// Wrap an already-handshaken outbound protocol.
    ///
    /// Reports the new connection to the owning port.
    pub fn new(
        protocol: Protocol,
        manager: Arc<dyn PortManager>,
        resolver: Option<Arc<NameResolver>>,
    ) -> Self {
        let route = protocol.route().clone();
        let active = Arc::new(AtomicBool::new(protocol.is_active()));
        let opened = PortEvent::connection_opened(route.clone(), false);
        log::info!("[UNIT] {}", opened.message);
        manager.report(&opened);
        Self {
            route,
            manager,
            resolver,
            state: Mutex::new(SenderState::Sync(Box::new(protocol))),
            flight: Arc::new(Flight {
                busy: Mutex::new(false),
                done: Condvar::new(),
            }),
            active,
            tracker: Mutex::new(None),
            closed: AtomicBool::new(false),
            removal_reported: AtomicBool::new(false),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Whether the connection can still carry messages.
    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.active.load(Ordering::Acquire)
    }

    /// Take the token of the last accepted send (owner bookkeeping).
    pub fn take_tracker(&self) -> Option<Tracker> {
        self.tracker.lock().take()
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Send one payload over this connection.
    ///
    /// - `wait_before` waits for any in-flight send to finish first;
    ///   without it, a busy unit drops the new send (logged, no error).
    /// - `wait_after` completes the transport write (and any reply read)
    ///   before returning; `wait_before=false` with `wait_after=true` is
    ///   rejected as [`Error::UnsupportedFlagCombination`].
    /// - A unit whose carrier is not active returns the caller's tracker
    ///   unchanged and sends nothing.
    pub fn send(
        &self,
        payload: &[u8],
        mut reply: Option<&mut dyn ReplyReader>,
        tracker: Option<Tracker>,
        envelope: &str,
        wait_before: bool,
        wait_after: bool,
    ) -> Result<SendOutcome> {
        if !wait_before && wait_after {
            return Err(Error::UnsupportedFlagCombination);
        }
        if !self.is_active() {
            return Ok(SendOutcome {
                tracker,
                got_reply: false,
            });
        }

        if wait_after {
            let command = PortCommand::data(envelope, reply.is_some());
            self.send_waiting(command, payload, reply, tracker)
        } else {
            if reply.is_some() {
                log::info!(
                    "[UNIT] reply handler on {} ignored: replies need wait_after",
                    self.route
                );
            }
            let command = PortCommand::data(envelope, false);
            self.send_background(command, payload, tracker, wait_before)
        }
    }

    /// Synchronous path: the caller observes completion.
    fn send_waiting(
        &self,
        command: PortCommand,
        payload: &[u8],
        mut reply: Option<&mut dyn ReplyReader>,
        tracker: Option<Tracker>,
    ) -> Result<SendOutcome> {
        let mut state = self.state.lock();
        match &mut *state {
            SenderState::Sync(protocol) => {
                if !protocol.is_active() {
                    self.active.store(false, Ordering::Release);
                    return Ok(SendOutcome {
                        tracker,
                        got_reply: false,
                    });
                }
                let previous = self.swap_tracker(tracker);
                let reply_arg: Option<&mut dyn ReplyReader> = match reply.as_mut() {
                    Some(r) => Some(&mut **r),
                    None => None,
                };
                let got_reply =
                    match protocol.write_message(&command, payload, reply_arg) {
                        Ok(got_reply) => got_reply,
                        Err(e) => {
                            log::debug!("[UNIT] send on {} failed: {}", self.route, e);
                            self.mark_broken();
                            false
                        }
                    };
                Ok(SendOutcome {
                    tracker: previous,
                    got_reply,
                })
            }
            SenderState::Async(sender) => {
                // Once a worker exists every send funnels through it; the
                // caller still observes completion via a rendezvous.
                self.wait_until_free();
                let previous = self.swap_tracker(tracker);
                let (done_tx, done_rx) = channel::bounded(1);
                let job = Job {
                    command,
                    payload: payload.to_vec(),
                    want_reply: reply.is_some(),
                    completion: Some(done_tx),
                };
                if sender.jobs.send(job).is_err() {
                    self.release_flight();
                    self.mark_broken();
                    return Ok(SendOutcome {
                        tracker: previous,
                        got_reply: false,
                    });
                }
                let done = done_rx.recv().unwrap_or(SendDone {
                    got_reply: false,
                    reply: Vec::new(),
                });
                if done.got_reply {
                    if let Some(handler) = reply {
                        handler.read_reply(&done.reply);
                    }
                }
                Ok(SendOutcome {
                    tracker: previous,
                    got_reply: done.got_reply,
                })
            }
            SenderState::Retired => Ok(SendOutcome {
                tracker,
                got_reply: false,
            }),
        }
    }

    /// Asynchronous path: never blocks the caller on the transport.
    fn send_background(
        &self,
        command: PortCommand,
        payload: &[u8],
        tracker: Option<Tracker>,
        wait_before: bool,
    ) -> Result<SendOutcome> {
        let mut state = self.state.lock();
        self.ensure_worker(&mut state)?;

        let sender = match &*state {
            SenderState::Async(sender) => sender,
            _ => {
                return Ok(SendOutcome {
                    tracker,
                    got_reply: false,
                })
            }
        };

        // At-most-one-in-flight: claim the slot or drop the send.
        {
            let mut busy = self.flight.busy.lock();
            if *busy {
                if wait_before {
                    while *busy {
                        self.flight.done.wait(&mut busy);
                    }
                } else {
                    log::warn!(
                        "[UNIT] send on {} dropped: previous send still in flight",
                        self.route
                    );
                    return Ok(SendOutcome {
                        tracker,
                        got_reply: false,
                    });
                }
            }
            *busy = true;
        }

        let previous = self.swap_tracker(tracker);
        let job = Job {
            command,
            payload: payload.to_vec(),
            want_reply: false,
            completion: None,
        };
        if sender.jobs.send(job).is_err() {
            self.release_flight();
            self.mark_broken();
        }
        Ok(SendOutcome {
            tracker: previous,
            got_reply: false,
        })
    }

    fn release_flight(&self) {
        let mut busy = self.flight.busy.lock();
        *busy = false;
        self.flight.done.notify_all();
    }

    /// Upgrade to a worker thread, started lazily on the first
    /// asynchronous send. The caller holds the state lock.
    fn ensure_worker(&self, state: &mut SenderState) -> Result<()> {
        if !matches!(&*state, SenderState::Sync(_)) {
            return Ok(());
        }
        let protocol = match mem::replace(state, SenderState::Retired) {
            SenderState::Sync(protocol) => protocol,
            other => {
                *state = other;
                return Ok(());
            }
        };

        let (jobs_tx, jobs_rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(0);
        let flight = self.flight.clone();
        let active = self.active.clone();
        let route = self.route.clone();

        let spawned = thread::Builder::new()
            .name(format!("portlink-out{}", route.to_name()))
            .spawn(move || worker_main(protocol, jobs_rx, ready_tx, flight, active, route));

        match spawned {
            Ok(handle) => {
                // The worker signals exactly once before entering its loop,
                // so the caller observes a fully-initialized unit.
                let _ = ready_rx.recv();
                *state = SenderState::Async(AsyncSender {
                    jobs: jobs_tx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                // Thread exhaustion is the one fatal case: the protocol
                // went down with the closure, so retire the unit.
                self.mark_broken();
                Err(Error::ThreadSpawn(e.to_string()))
            }
        }
    }

    fn wait_until_free(&self) {
        let mut busy = self.flight.busy.lock();
        while *busy {
            self.flight.done.wait(&mut busy);
        }
        *busy = true;
    }

    fn swap_tracker(&self, tracker: Option<Tracker>) -> Option<Tracker> {
        let mut slot = self.tracker.lock();
        mem::replace(&mut *slot, tracker)
    }

    fn mark_broken(&self) {
        self.active.store(false, Ordering::Release);
        self.report_removed();
    }

    fn report_removed(&self) {
        if !self.removal_reported.swap(true, Ordering::AcqRel) {
            let event = PortEvent::connection_closed(self.route.clone(), false);
            log::info!("[UNIT] {}", event.message);
            self.manager.report(&event);
        }
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Tear the connection down. Idempotent; waits for any in-flight
    /// background send before releasing the transport.
    pub fn close_main(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let state = mem::replace(&mut *self.state.lock(), SenderState::Retired);
        let protocol = match state {
            SenderState::Sync(protocol) => Some(protocol),
            SenderState::Async(AsyncSender { jobs, handle }) => {
                // Closing the channel lets the worker drain and exit; the
                // join waits out any in-flight send before we touch the
                // protocol again.
                drop(jobs);
                handle.join().ok()
            }
            SenderState::Retired => None,
        };

        if let Some(mut protocol) = protocol {
            self.send_quit(&mut protocol);
            protocol.close();
        }
        self.active.store(false, Ordering::Release);
        self.report_removed();
    }

    /// Ask the peer to let go of this connection.
    ///
    /// Two-tier policy: connectionless/broadcast carriers have no reliable
    /// in-band channel, so the request goes out-of-band through a fresh
    /// control connection to the peer; everyone else that can escape gets
    /// an in-band quit, with a brief wait for the text-mode acknowledgement.
    fn send_quit(&self, protocol: &mut Protocol) {
        let Some(carrier) = protocol.carrier() else {
            return;
        };
        let out_of_band = carrier.is_connectionless() || carrier.is_broadcast();
        let can_escape = carrier.can_escape();

        if out_of_band {
            self.quit_out_of_band(protocol);
        } else if can_escape && protocol.is_active() {
            if let Err(e) = protocol.write_message(&PortCommand::quit(), b"", None) {
                log::debug!("[UNIT] quit for {} not delivered: {}", self.route, e);
            } else {
                protocol.read_quit_ack(QUIT_ACK_TIMEOUT);
            }
        }
    }

    /// Resolve the peer and send a disconnect request over a short-lived
    /// control connection (best effort).
    fn quit_out_of_band(&self, protocol: &Protocol) {
        let Some(resolver) = &self.resolver else {
            log::debug!(
                "[UNIT] no resolver, cannot ask {} to drop {}",
                self.route.to_name(),
                self.route.from_name()
            );
            return;
        };
        let contact = match resolver.query(self.route.to_name()) {
            Ok(contact) if contact.is_valid() => contact,
            _ => {
                log::debug!("[UNIT] peer {} not resolvable for disconnect", self.route.to_name());
                return;
            }
        };
        let stream = match TcpTwoWay::connect(&contact, CONTROL_DIAL_TIMEOUT) {
            Ok(stream) => stream,
            Err(e) => {
                log::debug!("[UNIT] control dial to {} failed: {}", contact, e);
                return;
            }
        };

        let mut control = Protocol::new(Box::new(stream), protocol.carrier_registry());
        let route = Route::new(self.route.from_name(), self.route.to_name(), "tcp");
        if control.open_outbound(route).is_ok() {
            let request = format!("disconnect {}", self.route.from_name());
            let _ = control.write_message(
                &PortCommand::new(Frame::Admin, ""),
                request.as_bytes(),
                None,
            );
        }
        control.close();
    }
}

impl Drop for PortOutputUnit {
    fn drop(&mut self) {
        self.close_main();
    }
}

// ============================================================================
// Worker
// ============================================================================

fn worker_main(
    mut protocol: Box<Protocol>,
    jobs: Receiver<Job>,
    ready: Sender<()>,
    flight: Arc<Flight>,
    active: Arc<AtomicBool>,
    route: Route,
) -> Box<Protocol> {
    let _ = ready.send(());
    for job in jobs.iter() {
        let mut reply_buf = Vec::new();
        let result = if job.want_reply {
            protocol.write_message(
                &job.command,
                &job.payload,
                Some(&mut reply_buf as &mut dyn ReplyReader),
            )
        } else {
            protocol.write_message(&job.command, &job.payload, None)
        };

        let done = match result {
            Ok(got_reply) => SendDone {
                got_reply,
                reply: reply_buf,
            },
            Err(e) => {
                log::debug!("[UNIT] background send on {} failed: {}", route, e);
                active.store(false, Ordering::Release);
                SendDone {
                    got_reply: false,
                    reply: Vec::new(),
                }
            }
        };
        if !protocol.is_active() {
            active.store(false, Ordering::Release);
        }
        if let Some(completion) = job.completion {
            let _ = completion.send(done);
        }

        let mut busy = flight.busy.lock();
        *busy = false;
        flight.done.notify_all();
    }
    protocol
}

// ============================================================================
// Tests
// ============================================================================
