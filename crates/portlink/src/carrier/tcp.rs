// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Reliable stream carrier.
//!
//! The default carrier: connection-oriented, acknowledged, and able to
//! multiplex control commands with data on the same stream. Uses the binary
//! sub-protocol implemented by the trait defaults.

use super::Carrier;
use crate::protocol::frame::{interpret_framed_int, make_framed_int};

/// Magic code carried in the tcp header's framed integer.
const TCP_MAGIC_CODE: i32 = 10;

/// Reliable, acknowledged stream carrier.
pub struct TcpCarrier {
    active: bool,
}

impl TcpCarrier {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Default for TcpCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for TcpCarrier {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn header(&self) -> [u8; 8] {
        make_framed_int(TCP_MAGIC_CODE)
    }

    fn check_header(&self, header: &[u8; 8]) -> bool {
        interpret_framed_int(header) == Some(TCP_MAGIC_CODE)
    }

    fn can_escape(&self) -> bool {
        true
    }

    fn require_ack(&self) -> bool {
        true
    }

    fn supports_reply(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
