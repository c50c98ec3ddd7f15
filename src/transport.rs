//! UDP transport to SNMP agents.
//!
//! One connected, blocking UDP socket per endpoint. Every receive is bounded
//! by a timeout so that a silent agent cannot stall a poll cycle.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use thiserror::Error;

use crate::ber::{self, DecodeError};

/// Well-known SNMP agent port ("snmp" service).
pub const SNMP_PORT: u16 = 161;

/// Receive buffer capacity for one response datagram.
pub const RESPONSE_MAX: usize = 512;

/// Errors that can occur while talking to an endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Hostname lookup failed.
    #[error("Cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    /// No resolved address accepted a socket.
    #[error("Could not open a socket to any address of {host}")]
    Unavailable { host: String },
    /// Fewer bytes than the message length left the socket.
    #[error("Message partially transmitted: {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },
    #[error("Send failed: {0}")]
    Send(#[source] io::Error),
    /// The peer answered with an empty datagram.
    #[error("Peer SNMP controller closed the connection")]
    PeerClosed,
    #[error("No response within {0:?}")]
    TimedOut(Duration),
    #[error("Receive failed: {0}")]
    Recv(#[source] io::Error),
    /// The outgoing buffer does not hold the message its header declares.
    #[error("Invalid outgoing message: {0}")]
    InvalidMessage(#[from] DecodeError),
}

/// Total length of a BER message, read from its own length prefix.
///
/// # Errors
/// Fails when the prefix is malformed or declares more bytes than `message` holds.
pub fn message_len(message: &[u8]) -> Result<usize, DecodeError> {
    if message.is_empty() {
        return Err(DecodeError::Truncated {
            needed: 2,
            available: 0,
        });
    }
    let (content, consumed) = ber::decode_length(&message[1..])?;
    let total = 1 + consumed + content;
    if total > message.len() {
        return Err(DecodeError::Truncated {
            needed: total,
            available: message.len(),
        });
    }
    Ok(total)
}

/// Resolves `host`, `host:port`, `ip`, `ip:port` or `[v6]:port`.
fn resolve(host: &str, default_port: u16) -> io::Result<Vec<SocketAddr>> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if !name.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Ok((name, port).to_socket_addrs()?.collect());
            }
        }
    }
    let name = host.trim_start_matches('[').trim_end_matches(']');
    Ok((name, default_port).to_socket_addrs()?.collect())
}

fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

/// An open UDP association with one SNMP agent.
///
/// The socket is released when the connection is dropped or closed.
#[derive(Debug)]
pub struct Connection {
    host: String,
    addr: SocketAddr,
    socket: UdpSocket,
}

impl Connection {
    /// Resolves `host` and opens a socket to the first address that accepts one.
    ///
    /// # Errors
    /// [`TransportError::Resolve`] when lookup fails, [`TransportError::Unavailable`]
    /// when no candidate address can be used.
    pub fn open(host: &str, default_port: u16) -> Result<Self, TransportError> {
        let candidates = resolve(host, default_port).map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?;

        for addr in candidates {
            let socket = match UdpSocket::bind(unspecified_for(&addr)) {
                Ok(s) => s,
                Err(e) => {
                    log::debug!("Cannot bind socket for {} ({}): {}", host, addr, e);
                    continue;
                }
            };
            if let Err(e) = socket.connect(addr) {
                log::debug!("Cannot connect socket to {} ({}): {}", host, addr, e);
                continue;
            }

            log::debug!("Opened SNMP endpoint {} at {}", host, addr);
            return Ok(Connection {
                host: host.to_string(),
                addr,
                socket,
            });
        }

        Err(TransportError::Unavailable {
            host: host.to_string(),
        })
    }

    /// Hostname the connection was opened for.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resolved agent address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sends exactly the bytes declared by the message's own length prefix.
    ///
    /// # Errors
    /// [`TransportError::PartialSend`] on a short write, [`TransportError::Send`]
    /// on a socket error.
    pub fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        let len = message_len(message)?;
        log::trace!("-> {} ({} bytes): {}", self.host, len, ber::HexDump(&message[..len]));

        match self.socket.send(&message[..len]) {
            Ok(sent) if sent == len => Ok(()),
            Ok(sent) => Err(TransportError::PartialSend {
                sent,
                expected: len,
            }),
            Err(e) => Err(TransportError::Send(e)),
        }
    }

    /// Receives one datagram into `buf`, waiting at most `timeout`.
    ///
    /// # Errors
    /// [`TransportError::TimedOut`] when nothing arrives in time,
    /// [`TransportError::PeerClosed`] on an empty datagram,
    /// [`TransportError::Recv`] on a socket error.
    pub fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if timeout.is_zero() {
            return Err(TransportError::TimedOut(timeout));
        }
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(TransportError::Recv)?;

        match self.socket.recv(buf) {
            Ok(0) => Err(TransportError::PeerClosed),
            Ok(n) => {
                log::trace!("<- {} ({} bytes): {}", self.host, n, ber::HexDump(&buf[..n]));
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(TransportError::TimedOut(timeout))
            }
            Err(e) => Err(TransportError::Recv(e)),
        }
    }

    /// Discards every datagram already queued on the socket without waiting.
    ///
    /// Returns how many were dropped. A pending ICMP error from an earlier
    /// send is cleared as well.
    ///
    /// # Errors
    /// [`TransportError::Recv`] when the socket mode cannot be switched or a
    /// receive fails for another reason.
    pub fn drain(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.socket
            .set_nonblocking(true)
            .map_err(TransportError::Recv)?;

        let mut dropped = 0;
        let result = loop {
            match self.socket.recv(buf) {
                Ok(n) => {
                    log::trace!("<- {} late ({} bytes): {}", self.host, n, ber::HexDump(&buf[..n]));
                    dropped += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(dropped),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => continue,
                Err(e) => break Err(TransportError::Recv(e)),
            }
        };

        self.socket
            .set_nonblocking(false)
            .map_err(TransportError::Recv)?;
        result
    }

    /// Closes the connection. Dropping `self` releases the socket, so this
    /// happens exactly once per connection.
    pub fn close(self) {
        log::debug!("Closing SNMP endpoint {} ({})", self.host, self.addr);
    }
}
