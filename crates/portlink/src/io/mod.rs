// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Byte-stream abstraction for connections.
//!
//! A [`ConnectionStream`] is the blocking two-way stream a
//! [`Protocol`](crate::protocol::Protocol) owns. The trait exists so that:
//! - plain TCP works out of the box ([`stream::TcpTwoWay`]),
//! - a thread blocked in `read` can be woken from outside through a cheap
//!   [`StreamInterrupter`] handle (flagging alone cannot unblock a system
//!   call),
//! - tests run against an in-memory pair (`mock::MockStream`).

pub mod stream;

#[cfg(test)]
pub mod mock;

pub use stream::{ConnectionStream, StreamInterrupter, TcpTwoWay};
