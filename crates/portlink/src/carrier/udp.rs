// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Connectionless datagram-style carrier.
//!
//! No in-band control channel and no transport acknowledgement: control
//! traffic (such as a disconnect request) must travel out-of-band, which is
//! why the output unit treats connectionless carriers specially on close.
//! Replies, if the application produces any, are read back out-of-band
//! rather than inline with the send.

use super::Carrier;
use crate::protocol::frame::{interpret_framed_int, make_framed_int};

/// Magic code carried in the udp header's framed integer.
const UDP_MAGIC_CODE: i32 = 20;

/// Connectionless carrier: no escape channel, no acks, no inline replies.
pub struct UdpCarrier {
    active: bool,
}

impl UdpCarrier {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Default for UdpCarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Carrier for UdpCarrier {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn header(&self) -> [u8; 8] {
        make_framed_int(UDP_MAGIC_CODE)
    }

    fn check_header(&self, header: &[u8; 8]) -> bool {
        interpret_framed_int(header) == Some(UDP_MAGIC_CODE)
    }

    fn is_connectionless(&self) -> bool {
        true
    }

    fn can_escape(&self) -> bool {
        false
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
