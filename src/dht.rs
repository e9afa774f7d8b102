//! Dht node handle.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, info};

use crate::common::{Id, Message, Node};
use crate::rpc::{Config, Info, Rpc};

const MTU: usize = 2048;

/// A handle to a running Chord node.
///
/// Cheap to clone. The node itself is a single-threaded engine running in a
/// dedicated thread; it stops on [Dht::shutdown] or when the last handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct Dht {
    sender: Sender<ActorMessage>,
    local_addr: SocketAddrV4,
    request_timeout: Duration,
}

impl Dht {
    /// Returns a builder to tweak configuration before starting the node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    /// Binds a node and starts its engine loop in a background thread.
    ///
    /// Fails only if the listening address cannot be bound.
    pub fn new(config: Config) -> Result<Dht, std::io::Error> {
        let request_timeout = config.request_timeout;

        let mut rpc = Rpc::new(config)?;
        let local_addr = rpc.local_addr();

        let (sender, receiver) = flume::unbounded();

        thread::Builder::new()
            .name("ringline".to_string())
            .spawn(move || run(&mut rpc, receiver))?;

        info!(?local_addr, "Chord node listening");

        Ok(Dht {
            sender,
            local_addr,
            request_timeout,
        })
    }

    // === Getters ===

    /// Local UDP socket address this node is listening on.
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Information about this node's current ring state.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.sender
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Blocks until this node has joined the ring.
    ///
    /// Returns immediately for a node started without a bootstrap address,
    /// since it forms a ring of one from the start.
    pub fn bootstrapped(&self) -> Result<(), DhtWasShutdown> {
        while !self.info()?.inside_ring() {
            thread::sleep(Duration::from_millis(5));
        }

        Ok(())
    }

    /// Stops the engine loop and waits for it to acknowledge.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.sender.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Stores `value` under `key` on whichever node owns the key.
    ///
    /// Inserts are idempotent: putting an existing key returns
    /// [PutError::KeyExists] and leaves the stored value untouched.
    pub fn put(&self, key: &str, value: Bytes) -> Result<(), PutError> {
        let reply = self.call(|client_addr| Message::Put {
            key: key.to_string(),
            value,
            from: Some(client_addr),
        })?;

        match reply {
            Message::Ack { .. } => Ok(()),
            Message::Nack => Err(PutError::KeyExists),
            other => {
                debug!(?other, "Unexpected put reply");
                Err(PutError::Request(RequestError::UnexpectedResponse))
            }
        }
    }

    /// Retrieves the value stored under `key`, or None if the owning node
    /// does not have it.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>, RequestError> {
        let reply = self.call(|client_addr| Message::Get {
            key: key.to_string(),
            from: Some(client_addr),
        })?;

        match reply {
            Message::Ack { value } => Ok(value),
            Message::Nack => Ok(None),
            other => {
                debug!(?other, "Unexpected get reply");
                Err(RequestError::UnexpectedResponse)
            }
        }
    }

    /// Asks the ring which node is responsible for `target`.
    pub fn find_successor(&self, target: Id) -> Result<Node, RequestError> {
        let reply = self.call(|client_addr| Message::Successor {
            target,
            from: client_addr,
        })?;

        match reply {
            Message::SuccessorResponse { successor, .. } => Ok(successor),
            other => {
                debug!(?other, "Unexpected lookup reply");
                Err(RequestError::UnexpectedResponse)
            }
        }
    }

    // === Private Methods ===

    /// One-shot datagram exchange from an ephemeral client socket: the
    /// request enters the ring through this node, and the owning node
    /// replies straight to the client socket.
    fn call(&self, build: impl FnOnce(SocketAddrV4) -> Message) -> Result<Message, RequestError> {
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        socket.set_read_timeout(Some(self.request_timeout))?;

        let client_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unimplemented!("ringline does not support Ipv6"),
        };

        let message = build(client_addr);
        socket.send_to(&message.to_bytes()?, self.local_addr)?;

        let mut buf = [0u8; MTU];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((amt, _)) => {
                    if let Ok(reply) = Message::from_bytes(&buf[..amt]) {
                        return Ok(reply);
                    }
                    // Undecodable datagrams are dropped; keep waiting for
                    // the real reply until the timeout runs out.
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(RequestError::Timeout)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn run(rpc: &mut Rpc, receiver: Receiver<ActorMessage>) {
    loop {
        match receiver.try_recv() {
            Ok(ActorMessage::Info(sender)) => {
                let _ = sender.send(rpc.info());
            }
            Ok(ActorMessage::Shutdown(sender)) => {
                debug!("Shutting down the node loop");
                let _ = sender.send(());
                break;
            }
            Err(TryRecvError::Disconnected) => {
                debug!("All Dht handles were dropped, shutting down");
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        rpc.tick();
    }
}

#[derive(Debug)]
enum ActorMessage {
    Info(Sender<Info>),
    Shutdown(Sender<()>),
}

#[derive(Debug, Clone, Default)]
/// Builds a [Dht] node.
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Address of a node already in the ring to join through.
    pub fn bootstrap(mut self, address: SocketAddrV4) -> Self {
        self.0.bootstrap = Some(address);
        self
    }

    /// Explicit UDP port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);
        self
    }

    /// Receive timeout of the node socket, which is also the stabilization
    /// cadence.
    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.0.recv_timeout = timeout;
        self
    }

    /// Timeout of client calls ([Dht::put], [Dht::get], ...).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.0.request_timeout = timeout;
        self
    }

    /// Ring size exponent: all ids live in `[0, 2^m_bits)`.
    pub fn m_bits(mut self, m_bits: u8) -> Self {
        self.0.m_bits = m_bits;
        self
    }

    /// Starts the node.
    pub fn build(self) -> Result<Dht, std::io::Error> {
        Dht::new(self.0)
    }
}

/// The node's engine thread is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("Dht node was shutdown")]
pub struct DhtWasShutdown;

#[derive(Debug, thiserror::Error)]
/// Transport-level failure of a client call.
pub enum RequestError {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    /// Errors related to serializing control messages.
    #[error("Failed to serialize message: {0}")]
    Bencode(#[from] serde_bencode::Error),

    /// No reply arrived within the request timeout. The ring may still be
    /// converging, or the message was lost; retrying is safe.
    #[error("No reply within the request timeout")]
    Timeout,

    /// The reply did not match the request, most likely a stray datagram
    /// from an earlier call.
    #[error("Unexpected reply message")]
    UnexpectedResponse,
}

#[derive(Debug, thiserror::Error)]
/// [Dht::put] failure.
pub enum PutError {
    /// The owning node already stores this key; inserts never overwrite.
    #[error("Key already exists on the owning node")]
    KeyExists,

    #[error(transparent)]
    /// Transport-level failure.
    Request(#[from] RequestError),
}

/// A local ring for tests and examples: `count` nodes, the first starting
/// alone and the rest joining through it sequentially.
///
/// Nodes run with a short receive timeout so stabilization converges
/// quickly, and a 16-bit ring so hashed node ids are effectively unique.
#[derive(Debug)]
pub struct Testnet {
    pub nodes: Vec<Dht>,
}

/// Ring size exponent used by [Testnet] nodes.
pub const TESTNET_M_BITS: u8 = 16;

impl Testnet {
    pub fn new(count: usize) -> Result<Testnet, std::io::Error> {
        let mut nodes: Vec<Dht> = Vec::with_capacity(count);

        for _ in 0..count {
            let mut builder = Dht::builder()
                .recv_timeout(Duration::from_millis(25))
                .m_bits(TESTNET_M_BITS);

            if let Some(first) = nodes.first() {
                builder = builder.bootstrap(first.local_addr());
            }

            let node = builder.build()?;

            // Join one node at a time; concurrent joins through the same
            // bootstrap converge too, just less predictably.
            node.bootstrapped().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "node shut down before joining the ring",
                )
            })?;

            nodes.push(node);
        }

        Ok(Testnet { nodes })
    }
}
