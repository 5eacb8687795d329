// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! The registration record store.
//!
//! Maps logical port names to contacts plus free-form metadata properties
//! (`offers`, `accepts`, `ips`, `process`). Registrations without a port
//! number get one assigned from a rolling pool.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;

use portlink::Contact;

/// First port handed out to a registration without one.
pub const PORT_POOL_BASE: u16 = 10002;

/// One name's registration.
#[derive(Clone, Debug)]
pub struct NameRecord {
    pub contact: Contact,
    pub properties: HashMap<String, Vec<String>>,
}

/// Concurrent name → record store.
pub struct NameRegistry {
    records: DashMap<String, NameRecord>,
    next_port: Mutex<u16>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_port: Mutex::new(PORT_POOL_BASE),
        }
    }

    /// Register a name, replacing any previous registration.
    ///
    /// A non-positive port means "assign one for me".
    pub fn register(&self, name: &str, carrier: &str, host: &str, port: i32) -> Contact {
        let port = if port > 0 { port } else { self.allocate_port() };
        let contact = Contact::new(name, carrier, host, port);
        self.records.insert(
            name.to_owned(),
            NameRecord {
                contact: contact.clone(),
                properties: HashMap::new(),
            },
        );
        contact
    }

    /// Look a name up.
    pub fn query(&self, name: &str) -> Option<Contact> {
        self.records.get(name).map(|r| r.contact.clone())
    }

    /// Drop a registration; returns what was registered, if anything.
    pub fn unregister(&self, name: &str) -> Option<Contact> {
        self.records.remove(name).map(|(_, r)| r.contact)
    }

    /// Replace one metadata property of a registered name.
    pub fn set_property(&self, name: &str, key: &str, values: Vec<String>) -> bool {
        match self.records.get_mut(name) {
            Some(mut record) => {
                record.properties.insert(key.to_owned(), values);
                true
            }
            None => false,
        }
    }

    /// Read a metadata property back.
    pub fn property(&self, name: &str, key: &str) -> Option<Vec<String>> {
        self.records
            .get(name)
            .and_then(|r| r.properties.get(key).cloned())
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // Ports already taken by explicit registrations are skipped.
    fn allocate_port(&self) -> i32 {
        let mut next = self.next_port.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let candidate = *next;
            *next = next.wrapping_add(1).max(PORT_POOL_BASE);
            let in_use = self
                .records
                .iter()
                .any(|r| r.contact.port() == candidate as i32);
            if !in_use {
                return candidate as i32;
            }
        }
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a contact as the textual registration reply line.
pub fn textify(contact: &Contact) -> String {
    if contact.is_valid() {
        format!(
            "registration name {} ip {} port {} type {}",
            contact.reg_name(),
            contact.host(),
            contact.port(),
            contact.carrier()
        )
    } else {
        format!(
            "registration name {} ip none port none type {}",
            contact.reg_name(),
            if contact.carrier().is_empty() {
                "tcp"
            } else {
                contact.carrier()
            }
        )
    }
}
