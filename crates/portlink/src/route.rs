// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Logical connection identity.
//!
//! A [`Route`] is the (from, to, carrier) triple naming one direction of one
//! connection. It is fixed once a connection has begun handshaking, except
//! that a rename may replace the logical names; the live transport never
//! changes.

/// The (from-name, to-name, carrier-name) triple identifying a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    from_name: String,
    to_name: String,
    carrier_name: String,
}

impl Route {
    /// Build a route from its three parts.
    pub fn new(from_name: &str, to_name: &str, carrier_name: &str) -> Self {
        Self {
            from_name: from_name.to_owned(),
            to_name: to_name.to_owned(),
            carrier_name: carrier_name.to_owned(),
        }
    }

    /// Placeholder route used before a connection knows its peers.
    pub fn null() -> Self {
        Self::new("null", "null", "tcp")
    }

    /// Source port name.
    pub fn from_name(&self) -> &str {
        &self.from_name
    }

    /// Destination port name.
    pub fn to_name(&self) -> &str {
        &self.to_name
    }

    /// Carrier name.
    pub fn carrier_name(&self) -> &str {
        &self.carrier_name
    }

    /// Copy with a different source name.
    pub fn with_from_name(&self, from_name: &str) -> Self {
        Self {
            from_name: from_name.to_owned(),
            ..self.clone()
        }
    }

    /// Copy with a different destination name.
    pub fn with_to_name(&self, to_name: &str) -> Self {
        Self {
            to_name: to_name.to_owned(),
            ..self.clone()
        }
    }

    /// Copy with a different carrier name.
    pub fn with_carrier_name(&self, carrier_name: &str) -> Self {
        Self {
            carrier_name: carrier_name.to_owned(),
            ..self.clone()
        }
    }

    /// Copy with source and destination exchanged.
    ///
    /// Used when a connection reverses direction.
    pub fn swapped(&self) -> Self {
        Self {
            from_name: self.to_name.clone(),
            to_name: self.from_name.clone(),
            carrier_name: self.carrier_name.clone(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}->{}",
            self.from_name, self.carrier_name, self.to_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_display() {
        let r = Route::new("/writer", "/reader", "tcp");
        assert_eq!(r.to_string(), "/writer->tcp->/reader");
    }

    #[test]
    fn test_route_swapped() {
        let r = Route::new("/a", "/b", "udp").swapped();
        assert_eq!(r.from_name(), "/b");
        assert_eq!(r.to_name(), "/a");
        assert_eq!(r.carrier_name(), "udp");
    }

    #[test]
    fn test_route_with_parts() {
        let r = Route::null()
            .with_from_name("/src")
            .with_to_name("/dst")
            .with_carrier_name("text");
        assert_eq!(r, Route::new("/src", "/dst", "text"));
    }
}
