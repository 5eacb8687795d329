// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 portlink developers

//! Name server core: the line-oriented command loop and the multicast
//! discovery responder.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use portlink::resolve::fallback::{DISCOVERY_GROUP, DISCOVERY_PORT, DISCOVERY_PROBE};
use portlink::resolve::END_OF_MESSAGE;
use portlink::Contact;

use crate::registry::{textify, NameRegistry};

/// Errors the server can fail with.
#[derive(Debug)]
pub enum ServerError {
    /// Could not bind the listening socket.
    Bind(String),
    /// I/O error in the accept loop.
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(msg) => write!(f, "bind failed: {}", msg),
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// The standalone registry process.
pub struct NameServer {
    registry: Arc<NameRegistry>,
    bind_address: String,
    port: u16,
    advertise_host: String,
    enable_discovery: bool,
    shutdown: Arc<Notify>,
}

impl NameServer {
    pub fn new(bind_address: &str, port: u16, advertise_host: &str, enable_discovery: bool) -> Self {
        Self {
            registry: Arc::new(NameRegistry::new()),
            bind_address: bind_address.to_owned(),
            port,
            advertise_host: advertise_host.to_owned(),
            enable_discovery,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn registry(&self) -> Arc<NameRegistry> {
        self.registry.clone()
    }

    /// Stop the accept loop and the discovery responder.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind((self.bind_address.as_str(), self.port))
            .await
            .map_err(|e| ServerError::Bind(format!("{}:{}: {}", self.bind_address, self.port, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener (tests bind to port 0).
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!("name server listening on {}", local);

        // Register ourselves, so `query /root` documents the registry.
        let self_contact = Contact::new(
            "/root",
            "tcp",
            &self.advertise_host,
            i32::from(local.port()),
        );
        self.registry
            .register("/root", "tcp", &self.advertise_host, i32::from(local.port()));

        if self.enable_discovery {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                discovery_responder(self_contact, shutdown).await;
            });
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("connection from {}", peer);
                            let registry = self.registry.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, registry).await {
                                    debug!("connection from {} ended: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => warn!("accept error: {}", e),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("name server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Serve one control connection: one reply block per command line.
async fn handle_connection(
    stream: TcpStream,
    registry: Arc<NameRegistry>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("command: {}", line);
        let reply = handle_command(&registry, line);
        writer.write_all(reply.as_bytes()).await?;
        writer
            .write_all(format!("{}\n", END_OF_MESSAGE).as_bytes())
            .await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Execute one textual command and produce the reply body.
///
/// The optional `NAME_SERVER` prefix some clients send is accepted and
/// stripped.
pub fn handle_command(registry: &NameRegistry, line: &str) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let parts: &[&str] = match parts.split_first() {
        Some((&"NAME_SERVER", rest)) => rest,
        _ => &parts,
    };

    match parts {
        ["register", name, rest @ ..] => {
            let carrier = rest.first().copied().unwrap_or("tcp");
            let host = rest.get(1).copied().unwrap_or("127.0.0.1");
            let port = rest
                .get(2)
                .and_then(|p| p.parse::<i32>().ok())
                .unwrap_or(0);
            let contact = registry.register(name, carrier, host, port);
            info!("registered {} at {}", name, contact);
            format!("{}\n", textify(&contact))
        }
        ["unregister", name] => {
            let previous = registry.unregister(name);
            if previous.is_some() {
                info!("unregistered {}", name);
            }
            format!("{}\n", textify(&Contact::invalid(name)))
        }
        ["query", name] => match registry.query(name) {
            Some(contact) => format!("{}\n", textify(&contact)),
            None => String::new(),
        },
        ["set", name, key, values @ ..] => {
            let values: Vec<String> = values.iter().map(|v| (*v).to_owned()).collect();
            if registry.set_property(name, key, values) {
                "ok\n".to_owned()
            } else {
                format!("*** error: {} is not registered\n", name)
            }
        }
        ["help"] => "\
+ register $portname [$carrier [$host [$port]]]\n\
+ unregister $portname\n\
+ query $portname\n\
+ set $portname $property $value...\n\
+ help\n"
            .to_owned(),
        _ => "*** error: unrecognized command\n".to_owned(),
    }
}

/// Answer multicast discovery probes with our own registration line.
async fn discovery_responder(contact: Contact, shutdown: Arc<Notify>) {
    let socket = match UdpSocket::bind(("0.0.0.0", DISCOVERY_PORT)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("discovery responder disabled: {}", e);
            return;
        }
    };
    if let Err(e) = socket.join_multicast_v4(DISCOVERY_GROUP, std::net::Ipv4Addr::UNSPECIFIED) {
        warn!("could not join {}: {}", DISCOVERY_GROUP, e);
    }
    info!(
        "discovery responder on {}:{} advertising {}",
        DISCOVERY_GROUP, DISCOVERY_PORT, contact
    );

    let reply = format!("{}\n", textify(&contact));
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => {
                        if &buf[..n] == DISCOVERY_PROBE {
                            debug!("probe from {}", from);
                            let _ = socket.send_to(reply.as_bytes(), from).await;
                        }
                    }
                    Err(e) => {
                        warn!("discovery recv error: {}", e);
                        return;
                    }
                }
            }
            _ = shutdown.notified() => return,
        }
    }
}
