// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Persisted resolver configuration.
//!
//! The registry's address is cached in a small text file so that processes
//! started after a successful discovery skip the scan. Two formats are
//! accepted on read:
//!
//! ```text
//! 10.0.0.5 10000 registry
//! ```
//!
//! or the bracketed property block older tools write:
//!
//! ```text
//! [default]
//! host=10.0.0.5
//! port=10000
//! ```
//!
//! Writing always produces the first form.

use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::contact::Contact;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "PORTLINK_CONF";

/// Default mode recorded for a directly-configured registry.
pub const MODE_REGISTRY: &str = "registry";

/// Mode recorded when the address came from a multicast scan.
pub const MODE_SCANNED: &str = "scanned";

/// Where and how resolver settings are persisted.
#[derive(Clone, Debug)]
pub struct NameConfig {
    /// Namespace, used as the file stem (default `default`).
    namespace: String,

    /// Explicit directory override (tests mostly); otherwise the
    /// environment/home rules apply.
    config_dir: Option<PathBuf>,

    /// When set, the registration address hint must start with this
    /// prefix (pins multi-homed hosts to one network).
    address_prefix: Option<String>,
}

impl NameConfig {
    pub fn new() -> Self {
        Self {
            namespace: "default".to_owned(),
            config_dir: None,
            address_prefix: None,
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_owned();
        self
    }

    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    pub fn with_address_prefix(mut self, prefix: &str) -> Self {
        self.address_prefix = Some(prefix.to_owned());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn address_prefix(&self) -> Option<&str> {
        self.address_prefix.as_deref()
    }

    /// Directory holding resolver files: explicit override, then
    /// `$PORTLINK_CONF`, then `$HOME/.portlink/conf`.
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
            return PathBuf::from(dir);
        }
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        PathBuf::from(home).join(".portlink").join("conf")
    }

    /// The namespace's registry-address file.
    pub fn config_file(&self) -> PathBuf {
        let stem: String = self
            .namespace
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.config_dir().join(format!("{}.conf", stem))
    }

    /// Read the cached registry address, if a readable file exists.
    ///
    /// Returns the contact and the recorded mode string.
    pub fn read_registry(&self) -> Option<(Contact, String)> {
        let text = fs::read_to_string(self.config_file()).ok()?;
        parse_registry_config(&text)
    }

    /// Persist the registry address in the plain triple format.
    pub fn write_registry(&self, contact: &Contact, mode: &str) -> io::Result<()> {
        let dir = self.config_dir();
        fs::create_dir_all(&dir)?;
        let body = format!("{} {} {}\n", contact.host(), contact.port(), mode);
        fs::write(self.config_file(), body)
    }
}

impl Default for NameConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse either accepted file format into a contact and mode.
fn parse_registry_config(text: &str) -> Option<(Contact, String)> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let first = lines.next()?;
    if first.starts_with('[') {
        // property-block format
        let mut host = None;
        let mut port = None;
        let mut mode = MODE_REGISTRY.to_owned();
        for line in lines {
            match line.split_once('=') {
                Some(("host", v)) => host = Some(v.trim().to_owned()),
                Some(("port", v)) => port = v.trim().parse::<i32>().ok(),
                Some(("mode", v)) => mode = v.trim().to_owned(),
                _ => {}
            }
        }
        let host = host?;
        let port = port?;
        if host.is_empty() || port <= 0 {
            return None;
        }
        Some((Contact::from_host_port(&host, port), mode))
    } else {
        // whitespace triple: host port [mode]
        let mut parts = first.split_whitespace();
        let host = parts.next()?;
        let port = parts.next()?.parse::<i32>().ok()?;
        if port <= 0 {
            return None;
        }
        let mode = parts.next().unwrap_or(MODE_REGISTRY).to_owned();
        Some((Contact::from_host_port(host, port), mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &tempfile::TempDir) -> NameConfig {
        NameConfig::new().with_config_dir(dir.path().to_path_buf())
    }

    #[test]
    fn test_round_trip_plain_format() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);

        let contact = Contact::from_host_port("10.1.2.3", 10000);
        config.write_registry(&contact, MODE_SCANNED).unwrap();

        let (read, mode) = config.read_registry().unwrap();
        assert_eq!(read.host(), "10.1.2.3");
        assert_eq!(read.port(), 10000);
        assert_eq!(mode, MODE_SCANNED);
    }

    #[test]
    fn test_reads_property_block_format() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);

        std::fs::create_dir_all(config.config_dir()).unwrap();
        std::fs::write(
            config.config_file(),
            "[default]\nhost=192.168.1.9\nport=10050\n",
        )
        .unwrap();

        let (read, mode) = config.read_registry().unwrap();
        assert_eq!(read.host(), "192.168.1.9");
        assert_eq!(read.port(), 10050);
        assert_eq!(mode, MODE_REGISTRY);
    }

    #[test]
    fn test_reads_triple_with_comments() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);

        std::fs::create_dir_all(config.config_dir()).unwrap();
        std::fs::write(
            config.config_file(),
            "# cached by discovery\n\n10.0.0.7 10000 registry\n",
        )
        .unwrap();

        let (read, mode) = config.read_registry().unwrap();
        assert_eq!(read.host(), "10.0.0.7");
        assert_eq!(mode, MODE_REGISTRY);
    }

    #[test]
    fn test_missing_or_bad_files() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir);
        assert!(config.read_registry().is_none());

        std::fs::create_dir_all(config.config_dir()).unwrap();
        std::fs::write(config.config_file(), "not a config\n").unwrap();
        assert!(config.read_registry().is_none());

        std::fs::write(config.config_file(), "host -5\n").unwrap();
        assert!(config.read_registry().is_none());
    }

    #[test]
    fn test_namespace_names_the_file() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir).with_namespace("/lab/ns");
        let file = config.config_file();
        assert_eq!(file.file_name().unwrap(), "_lab_ns.conf");
    }
}
