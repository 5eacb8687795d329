// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Per-connection workers and the owning-port interface.
//!
//! A logical port owns one [`PortOutputUnit`](output_unit::PortOutputUnit)
//! per outbound connection and one
//! [`PortInputUnit`](input_unit::PortInputUnit) per inbound connection. The
//! port itself (fan-out, pub/sub bookkeeping) is an external collaborator
//! seen only through the [`PortManager`] trait.

pub mod input_unit;
pub mod output_unit;

use crate::route::Route;

pub use input_unit::PortInputUnit;
pub use output_unit::{PortOutputUnit, SendOutcome, Tracker};

// ============================================================================
// Events
// ============================================================================

/// Informational connection event reported to the owning port.
///
/// Reporting is a side effect for observability, not part of the transport
/// correctness contract.
#[derive(Clone, Debug)]
pub struct PortEvent {
    /// The connection's route.
    pub route: Route,

    /// True when the connection appeared, false when it went away.
    pub created: bool,

    /// True for input-side connections.
    pub incoming: bool,

    /// Human-readable description.
    pub message: String,
}

impl PortEvent {
    /// A connection came up.
    pub fn connection_opened(route: Route, incoming: bool) -> Self {
        let message = if incoming {
            format!(
                "Receiving input from {} to {} using {}",
                route.from_name(),
                route.to_name(),
                route.carrier_name()
            )
        } else {
            format!(
                "Sending output from {} to {} using {}",
                route.from_name(),
                route.to_name(),
                route.carrier_name()
            )
        };
        Self {
            route,
            created: true,
            incoming,
            message,
        }
    }

    /// A connection went away.
    pub fn connection_closed(route: Route, incoming: bool) -> Self {
        let message = if incoming {
            format!(
                "Removing input from {} to {}",
                route.from_name(),
                route.to_name()
            )
        } else {
            format!(
                "Removing output from {} to {}",
                route.from_name(),
                route.to_name()
            )
        };
        Self {
            route,
            created: false,
            incoming,
            message,
        }
    }
}

// ============================================================================
// Owning port
// ============================================================================

/// The owning port, as seen by its connection units.
///
/// Implemented by the port layer above this crate; units call in to deliver
/// payloads and report lifecycle events. All methods may be called from a
/// unit's worker thread.
pub trait PortManager: Send + Sync {
    /// Name of the owning port, e.g. `/robot/state`.
    fn port_name(&self) -> String;

    /// Connection opened/closed notification.
    fn report(&self, event: &PortEvent);

    /// A data payload arrived. When `reply` is present the peer is waiting
    /// for an answer; fill the buffer and return true to send it.
    fn deliver(
        &self,
        route: &Route,
        payload: &[u8],
        envelope: &str,
        reply: Option<&mut Vec<u8>>,
    ) -> bool;

    /// An administrative payload arrived.
    fn admin(&self, route: &Route, payload: &[u8], reply: Option<&mut Vec<u8>>) -> bool {
        let _ = (route, payload, reply);
        false
    }

    /// Record the envelope text carried by the latest data message.
    fn set_envelope(&self, envelope: &str) {
        let _ = envelope;
    }
}
