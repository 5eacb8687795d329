// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Resolved network addresses for logical port names.
//!
//! A [`Contact`] is what a name query resolves to: a host, a port number and
//! the carrier to speak. An unresolved query may carry only the name; such a
//! contact reports `!is_valid()` and must not be dialed.
//!
//! # Literal specifiers
//!
//! A name of the form `host:port` or `host:port/carrier` bypasses the
//! registry entirely:
//!
//! ```
//! use portlink::Contact;
//!
//! let c = Contact::parse("10.0.0.7:10012/udp").unwrap();
//! assert_eq!(c.host(), "10.0.0.7");
//! assert_eq!(c.port(), 10012);
//! assert_eq!(c.carrier(), "udp");
//! ```

use crate::error::{Error, Result};

/// Default carrier assumed when a specifier names none.
pub const DEFAULT_CARRIER: &str = "tcp";

/// A resolved (or resolvable) network address for a named port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    /// Registered logical name, e.g. `/robot/camera` (may be empty).
    reg_name: String,

    /// Carrier to use when dialing, e.g. `tcp`.
    carrier: String,

    /// Host name or dotted address. Empty until resolved.
    host: String,

    /// Port number. Zero or negative until resolved.
    port: i32,
}

impl Contact {
    /// Build a fully-specified contact.
    pub fn new(reg_name: &str, carrier: &str, host: &str, port: i32) -> Self {
        Self {
            reg_name: reg_name.to_owned(),
            carrier: carrier.to_owned(),
            host: host.to_owned(),
            port,
        }
    }

    /// Build a contact from a socket address, without a registered name.
    pub fn from_host_port(host: &str, port: i32) -> Self {
        Self::new("", DEFAULT_CARRIER, host, port)
    }

    /// An unresolved contact carrying only the queried name.
    ///
    /// Returned by failed queries; reports `!is_valid()`.
    pub fn invalid(reg_name: &str) -> Self {
        Self {
            reg_name: reg_name.to_owned(),
            carrier: String::new(),
            host: String::new(),
            port: -1,
        }
    }

    /// Parse a literal `host:port` or `host:port/carrier` specifier.
    ///
    /// Returns an error for anything else (registry names start with `/`
    /// and are never mistaken for specifiers).
    pub fn parse(spec: &str) -> Result<Self> {
        let (addr, carrier) = match spec.split_once('/') {
            Some((a, c)) if !c.is_empty() => (a, c),
            Some((a, _)) => (a, DEFAULT_CARRIER),
            None => (spec, DEFAULT_CARRIER),
        };
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidContact(format!("missing port in '{}'", spec)))?;
        if host.is_empty() {
            return Err(Error::InvalidContact(format!("missing host in '{}'", spec)));
        }
        let port: i32 = port
            .parse()
            .map_err(|_| Error::InvalidContact(format!("bad port in '{}'", spec)))?;
        if port <= 0 {
            return Err(Error::InvalidContact(format!(
                "port must be positive in '{}'",
                spec
            )));
        }
        Ok(Self::new("", carrier, host, port))
    }

    /// Whether a string looks like a literal `host:port[/carrier]` specifier.
    pub fn is_literal_specifier(name: &str) -> bool {
        if name.starts_with('/') {
            return false;
        }
        let addr = name.split_once('/').map_or(name, |(a, _)| a);
        match addr.rsplit_once(':') {
            Some((host, port)) => {
                !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
            }
            None => false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Registered logical name (may be empty).
    pub fn reg_name(&self) -> &str {
        &self.reg_name
    }

    /// Carrier name (may be empty on an unresolved contact).
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number (zero or negative when unresolved).
    pub fn port(&self) -> i32 {
        self.port
    }

    /// A contact is valid once it has a non-empty host and a positive port.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port > 0
    }

    /// Copy of this contact with a different registered name.
    pub fn with_reg_name(&self, reg_name: &str) -> Self {
        Self {
            reg_name: reg_name.to_owned(),
            ..self.clone()
        }
    }

    /// Copy of this contact with a different carrier.
    pub fn with_carrier(&self, carrier: &str) -> Self {
        Self {
            carrier: carrier.to_owned(),
            ..self.clone()
        }
    }

    /// `host:port` form suitable for dialing.
    pub fn socket_spec(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}/{}", self.host, self.port, self.carrier)
        } else {
            write!(f, "{} (unresolved)", self.reg_name)
        }
    }
}
