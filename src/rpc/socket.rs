//! UDP socket layer carrying one bencoded control message per datagram.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};

use tracing::{debug, trace};

use crate::common::Message;

use super::config::Config;

const MTU: usize = 2048;

/// A [UdpSocket] wrapper owned by a single node.
///
/// Reads block up to the configured receive timeout; the timeout is not an
/// error but the node's cooperative stabilization schedule.
#[derive(Debug)]
pub struct RingSocket {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
}

/// Outcome of one blocking read on the socket.
#[derive(Debug)]
pub enum Received {
    /// A well-formed message and its origin.
    Message(Message, SocketAddrV4),
    /// The read timed out with no traffic: time to stabilize.
    Timeout,
    /// A datagram arrived but was dropped (undecodable, empty, or IPv6).
    Dropped,
}

impl RingSocket {
    pub(crate) fn new(config: &Config) -> Result<Self, std::io::Error> {
        let socket = if let Some(port) = config.port {
            UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))?
        } else {
            UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?
        };

        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unimplemented!("RingSocket does not support Ipv6"),
        };

        socket.set_read_timeout(Some(config.recv_timeout))?;

        Ok(Self { socket, local_addr })
    }

    // === Getters ===

    /// Returns the address the socket is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    // === Public Methods ===

    /// Receives a single control message on the socket, blocking up to the
    /// receive timeout.
    pub fn recv_from(&mut self) -> Received {
        let mut buf = [0u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, SocketAddr::V4(from))) => {
                let bytes = &buf[..amt];

                if bytes.is_empty() {
                    trace!(context = "socket_validation", ?from, "Empty datagram");
                    return Received::Dropped;
                }

                match Message::from_bytes(bytes) {
                    Ok(message) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?message,
                            ?from,
                            "Received message"
                        );
                        Received::Message(message, from)
                    }
                    Err(error) => {
                        trace!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid bencode message."
                        );
                        Received::Dropped
                    }
                }
            }
            Ok((_, SocketAddr::V6(_))) => {
                trace!(
                    context = "socket_validation",
                    message = "Received IPv6 packet"
                );
                Received::Dropped
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Received::Timeout
            }
            Err(e) => {
                trace!(context = "socket_error", ?e, "recv_from failed unexpectedly");
                Received::Dropped
            }
        }
    }

    /// Send a message, best effort: failures are logged and swallowed, the
    /// next stabilization or lookup cycle is the only retry.
    pub fn send(&self, address: SocketAddrV4, message: &Message) {
        let _ = self.try_send(address, message).map_err(|e| {
            debug!(?e, ?address, "Error sending message");
        });
    }

    // === Private Methods ===

    fn try_send(&self, address: SocketAddrV4, message: &Message) -> Result<(), SendMessageError> {
        self.socket.send_to(&message.to_bytes()?, address)?;
        trace!(context = "socket_message_sending", ?message, ?address);
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
/// Failure to put a message on the wire.
pub enum SendMessageError {
    /// Errors related to serializing control messages.
    #[error("Failed to serialize message: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}
