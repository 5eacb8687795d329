// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Name resolution against the registry.
//!
//! The [`NameResolver`] translates logical port names to network
//! [`Contact`]s and back using the registry's textual wire protocol:
//!
//! ```text
//! -> register /camera tcp 10.0.0.4 0
//! <- registration name /camera ip 10.0.0.4 port 10002 type tcp
//! <- *** end of message
//!
//! -> NAME_SERVER query /camera
//! <- registration name /camera ip 10.0.0.4 port 10002 type tcp
//! <- *** end of message
//! ```
//!
//! A name shaped like `host:port[/carrier]` never touches the registry; it
//! parses directly into a contact. When the registry cannot be reached and
//! scanning is enabled, a multicast probe hunts for one
//! ([`fallback::FallbackDiscovery`]), and the found address may be
//! persisted ([`config::NameConfig`]) so later processes skip the scan.
//!
//! There is no process-global resolver: construct one per process (or per
//! test) and share it by `Arc`. The cached registry address sits behind a
//! single lock and is initialized at most once until `invalidate`.

pub mod config;
pub mod fallback;

use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;

use crate::contact::Contact;
use crate::error::{Error, Result};
use crate::io::stream::TcpTwoWay;
use crate::io::ConnectionStream;
use crate::protocol::frame::read_line;

pub use config::NameConfig;
pub use fallback::FallbackDiscovery;

/// Well-known registry port.
pub const DEFAULT_REGISTRY_PORT: u16 = 10000;

/// Line terminating every registry reply.
pub const END_OF_MESSAGE: &str = "*** end of message";

/// Default socket timeout for registry round trips.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Reply parsing
// ============================================================================

/// Find and parse a `registration name … ip … port … type …` line.
///
/// Returns `Some` even for a "not registered" answer (`ip none`), which
/// parses into an invalid contact carrying only the name. A line that
/// starts with `registration` but names no port is noise, not an answer,
/// and is skipped.
pub fn parse_registration(text: &str) -> Option<Contact> {
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("registration") {
            continue;
        }
        let mut name = "";
        let mut host = "";
        let mut port = -1;
        let mut carrier = "";
        while let (Some(key), Some(value)) = (tokens.next(), tokens.next()) {
            match key {
                "name" => name = value,
                "ip" => host = value,
                "port" => port = value.parse().unwrap_or(-1),
                "type" => carrier = value,
                _ => {}
            }
        }
        if name.is_empty() {
            continue;
        }
        if host.is_empty() || host == "none" || port <= 0 {
            return Some(Contact::invalid(name));
        }
        let carrier = if carrier.is_empty() { "tcp" } else { carrier };
        return Some(Contact::new(name, carrier, host, port));
    }
    None
}

// ============================================================================
// Resolver
// ============================================================================

/// Registry client: query, register, unregister, metadata advertisement.
pub struct NameResolver {
    config: NameConfig,
    discovery: FallbackDiscovery,
    scan_enabled: bool,
    save_on_scan: bool,
    timeout: Duration,
    explicit_registry: Option<Contact>,
    offered_carriers: Vec<String>,
    cache: Mutex<Option<Contact>>,
}

impl NameResolver {
    pub fn new(config: NameConfig) -> Self {
        Self {
            config,
            discovery: FallbackDiscovery::new(),
            scan_enabled: true,
            save_on_scan: false,
            timeout: DEFAULT_TIMEOUT,
            explicit_registry: None,
            offered_carriers: vec!["tcp".to_owned(), "udp".to_owned(), "text".to_owned()],
            cache: Mutex::new(None),
        }
    }

    /// Pin the registry address, bypassing the config file.
    pub fn with_registry(mut self, contact: Contact) -> Self {
        self.explicit_registry = Some(contact);
        self
    }

    /// Enable or disable the multicast fallback scan.
    pub fn with_scan(mut self, enabled: bool) -> Self {
        self.scan_enabled = enabled;
        self
    }

    /// Persist a scanned registry address to the config file.
    pub fn with_save_on_scan(mut self, enabled: bool) -> Self {
        self.save_on_scan = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the discovery client (tests point it at a unicast stub).
    pub fn with_discovery(mut self, discovery: FallbackDiscovery) -> Self {
        self.discovery = discovery;
        self
    }

    /// Carriers advertised with `set <name> offers/accepts …`.
    pub fn with_offered_carriers(mut self, carriers: Vec<String>) -> Self {
        self.offered_carriers = carriers;
        self
    }

    /// Forget the cached registry address; the next operation re-resolves.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// The registry address this resolver is talking to.
    ///
    /// Lazy: pinned address, then config file, then the well-known local
    /// default. Cached until [`NameResolver::invalidate`].
    pub fn registry_contact(&self) -> Contact {
        let mut cache = self.cache.lock();
        if let Some(contact) = &*cache {
            return contact.clone();
        }
        let contact = if let Some(contact) = &self.explicit_registry {
            contact.clone()
        } else if let Some((contact, mode)) = self.config.read_registry() {
            log::debug!("[NAME] registry {} from config ({})", contact, mode);
            contact
        } else {
            Contact::from_host_port("127.0.0.1", DEFAULT_REGISTRY_PORT as i32)
        };
        *cache = Some(contact.clone());
        contact
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Resolve a logical name to a contact.
    ///
    /// `host:port[/carrier]` literals parse directly, with no registry
    /// round trip.
    pub fn query(&self, name: &str) -> Result<Contact> {
        if Contact::is_literal_specifier(name) {
            return Contact::parse(name);
        }
        let command = format!("NAME_SERVER query {}", name);
        let reply = self.round_trip_with_fallback(&command)?;
        self.interpret_reply(name, &reply)
    }

    /// Register a name, with a best-effort local address hint.
    ///
    /// On success the full carrier set, local addresses and process id are
    /// advertised as fire-and-forget metadata updates; their failure never
    /// rolls back the registration.
    pub fn register(&self, name: &str, suggestion: Option<&Contact>) -> Result<Contact> {
        let carrier = suggestion
            .map(|c| c.carrier())
            .filter(|c| !c.is_empty())
            .unwrap_or("tcp");
        let host = match suggestion.map(|c| c.host()).filter(|h| !h.is_empty()) {
            Some(host) => host.to_owned(),
            None => self.best_local_address(),
        };
        let port = suggestion.map(|c| c.port()).filter(|p| *p > 0).unwrap_or(0);

        let command = format!("register {} {} {} {}", name, carrier, host, port);
        let reply = self.round_trip_with_fallback(&command)?;
        let contact = self.interpret_reply(name, &reply)?;

        self.advertise(name);
        Ok(contact)
    }

    /// Remove a registration. Single best-effort round trip.
    pub fn unregister(&self, name: &str) -> Result<Contact> {
        let command = format!("NAME_SERVER unregister {}", name);
        let reply = self.round_trip_with_fallback(&command)?;
        Ok(parse_registration(&reply).unwrap_or_else(|| Contact::invalid(name)))
    }

    /// Fire-and-forget metadata updates after a registration.
    fn advertise(&self, name: &str) {
        let offers = self.offered_carriers.join(" ");
        let ips = self.local_addresses().join(" ");
        let commands = [
            format!("set {} offers {}", name, offers),
            format!("set {} accepts {}", name, offers),
            format!("set {} ips {}", name, ips),
            format!("set {} process {}", name, std::process::id()),
        ];
        for command in commands {
            if let Err(e) = self.round_trip(&command) {
                log::debug!("[NAME] metadata update '{}' failed: {}", command, e);
            }
        }
    }

    fn interpret_reply(&self, name: &str, reply: &str) -> Result<Contact> {
        match parse_registration(reply) {
            Some(contact) if contact.is_valid() => Ok(contact),
            Some(_) => Err(Error::NameNotFound(name.to_owned())),
            None => {
                let leftover = reply.lines().find(|l| !l.trim().is_empty());
                match leftover {
                    Some(line) => Err(Error::MalformedReply(line.to_owned())),
                    None => Err(Error::NameNotFound(name.to_owned())),
                }
            }
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// One round trip; on connection failure, scan for a registry and
    /// retry once against whatever the scan found.
    fn round_trip_with_fallback(&self, command: &str) -> Result<String> {
        let contact = self.registry_contact();
        match self.round_trip_to(&contact, command) {
            Ok(reply) => Ok(reply),
            Err(e) if self.scan_enabled => {
                log::warn!("[NAME] registry at {} unreachable ({}), scanning", contact, e);
                let found = self.discovery.scan()?;
                *self.cache.lock() = Some(found.clone());
                if self.save_on_scan {
                    if let Err(e) = self.config.write_registry(&found, config::MODE_SCANNED) {
                        log::debug!("[NAME] could not cache scanned registry: {}", e);
                    }
                }
                self.round_trip_to(&found, command)
            }
            Err(e) => Err(e),
        }
    }

    fn round_trip(&self, command: &str) -> Result<String> {
        let contact = self.registry_contact();
        self.round_trip_to(&contact, command)
    }

    /// Send one newline-terminated command and collect the reply up to the
    /// end-of-message marker (or EOF).
    fn round_trip_to(&self, contact: &Contact, command: &str) -> Result<String> {
        let mut stream = TcpTwoWay::connect(contact, self.timeout)
            .map_err(|e| Error::RegistryUnreachable(format!("{}: {}", contact, e)))?;
        let _ = stream.set_read_timeout(Some(self.timeout));

        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reply = String::new();
        loop {
            match read_line(&mut stream)? {
                None => break,
                Some(line) => {
                    if line.trim() == END_OF_MESSAGE {
                        break;
                    }
                    reply.push_str(&line);
                    reply.push('\n');
                }
            }
        }
        Ok(reply)
    }

    // ========================================================================
    // Local interfaces
    // ========================================================================

    /// Address hint for registrations: honors the configured prefix pin,
    /// falls back to the default-route interface, then loopback.
    fn best_local_address(&self) -> String {
        if let Some(prefix) = self.config.address_prefix() {
            if let Ok(interfaces) = local_ip_address::list_afinet_netifas() {
                for (_ifname, ip) in interfaces {
                    if let IpAddr::V4(v4) = ip {
                        let text = v4.to_string();
                        if text.starts_with(prefix) {
                            return text;
                        }
                    }
                }
            }
            log::debug!("[NAME] no interface matches prefix {}", prefix);
        }
        match local_ip_address::local_ip() {
            Ok(ip) => ip.to_string(),
            Err(_) => "127.0.0.1".to_owned(),
        }
    }

    /// All non-loopback IPv4 addresses, for the `set … ips` update.
    fn local_addresses(&self) -> Vec<String> {
        let mut addrs = Vec::new();
        if let Ok(interfaces) = local_ip_address::list_afinet_netifas() {
            for (_ifname, ip) in interfaces {
                if let IpAddr::V4(v4) = ip {
                    if !v4.is_loopback() {
                        addrs.push(v4.to_string());
                    }
                }
            }
        }
        if addrs.is_empty() {
            addrs.push("127.0.0.1".to_owned());
        }
        addrs
    }
}

// ============================================================================
// Tests
// ============================================================================
