//! Chord ring maintenance and key routing engine.

mod config;
mod info;
mod socket;

use std::net::SocketAddrV4;

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::common::{contains, FingerTable, Id, Keystore, Message, Node};

pub use config::{Config, DEFAULT_RECV_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
pub use info::Info;
pub use socket::{Received, RingSocket, SendMessageError};

/// A single Chord node: socket, ring pointers, finger table and keystore,
/// all owned by one sequential engine.
///
/// Nothing happens until [Rpc::tick] is called; each tick receives at most
/// one datagram and reacts to it. Handlers never wait for replies inline:
/// every outbound message is fire-and-forget, because a reply may require
/// this same engine to process other messages first.
#[derive(Debug)]
pub struct Rpc {
    socket: RingSocket,
    id: Id,
    address: SocketAddrV4,
    bootstrap: Option<SocketAddrV4>,
    inside_ring: bool,
    successor: Node,
    predecessor: Option<Node>,
    finger_table: FingerTable,
    keystore: Keystore,
}

impl Rpc {
    /// Binds the node socket and derives the node id from the bound
    /// address. No ring traffic is sent before the first [Rpc::tick].
    pub fn new(config: Config) -> Result<Rpc, std::io::Error> {
        let socket = RingSocket::new(&config)?;
        let address = socket.local_addr();
        let id = Id::hash(&address.to_string(), config.m_bits);

        let this = Node::new(id, address);

        Ok(Rpc {
            socket,
            id,
            address,
            bootstrap: config.bootstrap,
            // Without a bootstrap address the node starts a ring of one:
            // it is its own successor and has no predecessor yet.
            inside_ring: config.bootstrap.is_none(),
            successor: this,
            predecessor: None,
            finger_table: FingerTable::new(id, address, config.m_bits),
            keystore: Keystore::new(),
        })
    }

    // === Getters ===

    /// Returns the node's [Id].
    pub fn id(&self) -> Id {
        self.id
    }

    /// Returns the address the node is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.address
    }

    /// True once the node has joined (or started) a ring.
    pub fn inside_ring(&self) -> bool {
        self.inside_ring
    }

    /// The node's immediate clockwise neighbor.
    pub fn successor(&self) -> Node {
        self.successor
    }

    /// The node's immediate counter-clockwise neighbor, if known.
    pub fn predecessor(&self) -> Option<Node> {
        self.predecessor
    }

    pub fn finger_table(&self) -> &FingerTable {
        &self.finger_table
    }

    /// Number of key/value pairs stored on this node.
    pub fn stored_keys(&self) -> usize {
        self.keystore.len()
    }

    /// A lightweight snapshot of this node's ring state.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Advances the node by one step: receive one datagram, blocking up to
    /// the configured receive timeout, and react to it.
    ///
    /// While outside the ring a timeout retransmits the join request; once
    /// inside, a timeout runs a stabilization round.
    pub fn tick(&mut self) {
        match self.bootstrap {
            Some(bootstrap) if !self.inside_ring => self.bootstrap_tick(bootstrap),
            _ => self.steady_tick(),
        }
    }

    // === Private Methods ===

    /// One bootstrap round: (re)send the join request, then wait one
    /// receive timeout for the reply. Anything else that arrives before we
    /// are inside the ring is ignored.
    fn bootstrap_tick(&mut self, bootstrap: SocketAddrV4) {
        self.socket.send(
            bootstrap,
            &Message::JoinRequest {
                candidate: Node::new(self.id, self.address),
            },
        );

        if let Received::Message(Message::JoinResponse { successor }, _) = self.socket.recv_from() {
            self.successor = successor;
            // Coarse initial approximation; stabilization refines it.
            self.finger_table.fill(successor);
            self.inside_ring = true;
            info!(id = ?self.id, ?successor, "Joined the ring");
        }
    }

    fn steady_tick(&mut self) {
        match self.socket.recv_from() {
            Received::Message(message, from) => self.handle_message(message, from),
            Received::Timeout => self.start_stabilization(),
            Received::Dropped => {}
        }
    }

    fn handle_message(&mut self, message: Message, from: SocketAddrV4) {
        trace!(id = ?self.id, ?message, ?from, "Handling message");

        match message {
            Message::JoinRequest { candidate } => self.handle_join_request(candidate),
            Message::Notify { predecessor } => self.handle_notify(predecessor),
            Message::Predecessor => {
                self.socket.send(
                    from,
                    &Message::Stabilize {
                        predecessor_id: self.predecessor.map(|p| p.id),
                    },
                );
            }
            Message::Stabilize { predecessor_id } => self.stabilize(predecessor_id, from),
            Message::Successor { target, from } => self.handle_successor(target, from),
            Message::SuccessorResponse { target, successor } => {
                if let Some(index) = self.finger_table.index_of_target(target) {
                    self.finger_table.update(index, successor);
                }
            }
            Message::Put {
                key,
                value,
                from: requester,
            } => self.handle_put(key, value, requester.unwrap_or(from)),
            Message::Get {
                key,
                from: requester,
            } => self.handle_get(key, requester.unwrap_or(from)),
            // A duplicate join reply after we already joined, or an
            // ack/nack that lost its requester; nothing to do.
            Message::JoinResponse { .. } | Message::Ack { .. } | Message::Nack => {}
        }
    }

    /// Inserts `candidate` into the ring, or passes the request along.
    fn handle_join_request(&mut self, candidate: Node) {
        debug!(id = ?self.id, ?candidate, "Join request");

        if self.id == self.successor.id {
            // Ring of one: the candidate becomes the successor and the
            // target of every finger.
            self.successor = candidate;
            self.finger_table.fill(candidate);
            self.socket.send(
                candidate.address,
                &Message::JoinResponse {
                    successor: Node::new(self.id, self.address),
                },
            );
        } else if contains(self.id, self.successor.id, candidate.id) {
            // The candidate slots in between us and our old successor: it
            // inherits the old successor, we adopt it as the new one and
            // announce ourselves as its predecessor.
            let reply = Message::JoinResponse {
                successor: self.successor,
            };
            self.successor = candidate;
            self.finger_table.update(1, candidate);
            self.socket.send(candidate.address, &reply);
            self.socket.send(
                candidate.address,
                &Message::Notify {
                    predecessor: Node::new(self.id, self.address),
                },
            );
        } else {
            // Walk the ring toward the right insertion point.
            self.socket
                .send(self.successor.address, &Message::JoinRequest { candidate });
        }
    }

    /// Adopts `candidate` as predecessor when none is known yet, or when it
    /// is strictly closer than the current one.
    fn handle_notify(&mut self, candidate: Node) {
        let accept = match self.predecessor {
            None => true,
            Some(current) => contains(current.id, self.id, candidate.id),
        };

        if accept {
            debug!(id = ?self.id, predecessor = ?candidate, "New predecessor");
            self.predecessor = Some(candidate);
        }
    }

    /// Quiet socket: ask the successor for its predecessor. The reply
    /// triggers the rest of the stabilization round.
    fn start_stabilization(&mut self) {
        trace!(id = ?self.id, "Stabilization round");
        self.socket
            .send(self.successor.address, &Message::Predecessor);
    }

    /// Reacts to the successor's predecessor pointer: adopt a closer
    /// successor if one appeared, re-announce ourselves, and re-resolve
    /// every finger target.
    fn stabilize(&mut self, predecessor_id: Option<Id>, from: SocketAddrV4) {
        debug!(id = ?self.id, ?predecessor_id, ?from, "Stabilize");

        if let Some(id) = predecessor_id {
            if id != self.successor.id && contains(self.id, self.successor.id, id) {
                // A node slotted in between us and our successor.
                let successor = Node::new(id, from);
                self.successor = successor;
                self.finger_table.update(1, successor);
            }
        }

        // Re-announce ourselves so the successor can learn or correct its
        // predecessor pointer.
        self.socket.send(
            self.successor.address,
            &Message::Notify {
                predecessor: Node::new(self.id, self.address),
            },
        );

        // Stale finger entries self-heal through these lookups.
        for (_, target, _) in self.finger_table.refresh() {
            let via = self.finger_table.find(target);
            self.socket.send(
                via,
                &Message::Successor {
                    target,
                    from: self.address,
                },
            );
        }
    }

    /// Lookup of the node responsible for `target`: answer the requester
    /// directly when our successor owns it, otherwise jump via the
    /// furthest preceding finger.
    fn handle_successor(&mut self, target: Id, requester: SocketAddrV4) {
        if contains(self.id, self.successor.id, target) {
            self.socket.send(
                requester,
                &Message::SuccessorResponse {
                    target,
                    successor: self.successor,
                },
            );
        } else {
            let via = self.finger_table.find(target);
            self.socket.send(
                via,
                &Message::Successor {
                    target,
                    from: requester,
                },
            );
        }
    }

    /// Routes a store request; idempotent insert at the owning node.
    fn handle_put(&mut self, key: String, value: Bytes, requester: SocketAddrV4) {
        let key_id = Id::hash(&key, self.finger_table.m_bits());
        debug!(id = ?self.id, key = %key, ?key_id, "Put");

        if self.id != self.successor.id && contains(self.id, self.successor.id, key_id) {
            self.socket.send(
                self.successor.address,
                &Message::Put {
                    key,
                    value,
                    from: Some(requester),
                },
            );
        } else if self.owns(key_id) {
            if self.keystore.insert_new(key, value) {
                self.socket.send(requester, &Message::Ack { value: None });
            } else {
                self.socket.send(requester, &Message::Nack);
            }
        } else {
            let via = self.finger_table.find(key_id);
            self.socket.send(
                via,
                &Message::Put {
                    key,
                    value,
                    from: Some(requester),
                },
            );
        }
    }

    /// Routes a retrieve request; answered by the owning node.
    fn handle_get(&mut self, key: String, requester: SocketAddrV4) {
        let key_id = Id::hash(&key, self.finger_table.m_bits());
        debug!(id = ?self.id, key = %key, ?key_id, "Get");

        if self.id != self.successor.id && contains(self.id, self.successor.id, key_id) {
            self.socket.send(
                self.successor.address,
                &Message::Get {
                    key,
                    from: Some(requester),
                },
            );
        } else if self.owns(key_id) {
            match self.keystore.get(&key) {
                Some(value) => self.socket.send(
                    requester,
                    &Message::Ack {
                        value: Some(value),
                    },
                ),
                None => self.socket.send(requester, &Message::Nack),
            }
        } else {
            let via = self.finger_table.find(key_id);
            self.socket.send(
                via,
                &Message::Get {
                    key,
                    from: Some(requester),
                },
            );
        }
    }

    /// Whether `key_id` falls in this node's owned interval
    /// `(predecessor, node]`. An unset predecessor degenerates to the whole
    /// ring, which is exactly right for a ring of one.
    fn owns(&self, key_id: Id) -> bool {
        match self.predecessor {
            Some(predecessor) => contains(predecessor.id, self.id, key_id),
            None => contains(self.id, self.id, key_id),
        }
    }
}

#[cfg(test)]
mod test {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::time::Duration;

    use super::*;

    // Short timeouts so stabilization rounds fire quickly, and a bigger
    // ring than the default so two hashed addresses colliding is not a
    // realistic concern.
    fn rpc(bootstrap: Option<SocketAddrV4>) -> Rpc {
        Rpc::new(Config {
            bootstrap,
            recv_timeout: Duration::from_millis(25),
            m_bits: 16,
            ..Default::default()
        })
        .expect("bind")
    }

    fn converged(a: &Rpc, b: &Rpc) -> bool {
        a.successor().id == b.id()
            && b.successor().id == a.id()
            && a.predecessor().map(|p| p.id) == Some(b.id())
            && b.predecessor().map(|p| p.id) == Some(a.id())
    }

    /// Drives two nodes by interleaving ticks on one thread until the ring
    /// of two is symmetric.
    fn converged_pair() -> (Rpc, Rpc) {
        let mut a = rpc(None);
        let mut b = rpc(Some(a.local_addr()));

        for _ in 0..400 {
            b.tick();
            a.tick();

            if converged(&a, &b) {
                return (a, b);
            }
        }

        panic!("two-node ring did not converge");
    }

    #[test]
    fn lone_node_is_its_own_successor() {
        let rpc = rpc(None);

        assert!(rpc.inside_ring());
        assert_eq!(rpc.successor().id, rpc.id());
        assert_eq!(rpc.predecessor(), None);
        assert_eq!(rpc.finger_table().len(), 16);
        assert!(rpc
            .finger_table()
            .entries()
            .iter()
            .all(|e| e.id == rpc.id()));
    }

    #[test]
    fn joining_node_stays_outside_until_a_reply_arrives() {
        // Nothing is listening on the bootstrap address; the join request
        // is retransmitted on every timeout and the node remains outside.
        let sink = RingSocket::new(&Config::default()).expect("bind");
        let mut rpc = rpc(Some(sink.local_addr()));

        rpc.tick();
        rpc.tick();

        assert!(!rpc.inside_ring());
    }

    #[test]
    fn two_nodes_converge_to_a_symmetric_ring() {
        let (a, b) = converged_pair();

        assert_eq!(a.successor().id, b.id());
        assert_eq!(b.successor().id, a.id());
        assert_eq!(a.predecessor().map(|p| p.id), Some(b.id()));
        assert_eq!(b.predecessor().map(|p| p.id), Some(a.id()));

        // The finger table never changes size, whatever stabilization did.
        assert_eq!(a.finger_table().len(), 16);
        assert_eq!(b.finger_table().len(), 16);
    }

    /// Sends `message` to node `a` from a client socket and keeps ticking
    /// both nodes until the client hears back.
    fn exchange(client: &mut RingSocket, a: &mut Rpc, b: &mut Rpc, message: Message) -> Message {
        client.send(a.local_addr(), &message);

        for _ in 0..400 {
            a.tick();
            b.tick();

            if let Received::Message(reply, _) = client.recv_from() {
                return reply;
            }
        }

        panic!("no reply for {:?}", message);
    }

    #[test]
    fn put_get_roundtrip_with_idempotent_inserts() {
        let (mut a, mut b) = converged_pair();

        let mut client = RingSocket::new(&Config {
            recv_timeout: Duration::from_millis(5),
            ..Default::default()
        })
        .expect("bind");

        let put = Message::Put {
            key: "answer".to_string(),
            value: Bytes::from("42"),
            from: None,
        };
        assert_eq!(
            exchange(&mut client, &mut a, &mut b, put),
            Message::Ack { value: None }
        );

        // A second put for the same key is refused, not overwritten.
        let duplicate = Message::Put {
            key: "answer".to_string(),
            value: Bytes::from("43"),
            from: None,
        };
        assert_eq!(
            exchange(&mut client, &mut a, &mut b, duplicate),
            Message::Nack
        );

        let get = Message::Get {
            key: "answer".to_string(),
            from: None,
        };
        assert_eq!(
            exchange(&mut client, &mut a, &mut b, get),
            Message::Ack {
                value: Some(Bytes::from("42"))
            }
        );

        let missing = Message::Get {
            key: "missing".to_string(),
            from: None,
        };
        assert_eq!(
            exchange(&mut client, &mut a, &mut b, missing),
            Message::Nack
        );
    }

    #[test]
    fn stale_finger_entries_self_heal() {
        let (mut a, mut b) = converged_pair();

        // Corrupt one entry with an unreachable address. The id is kept at
        // the node's own id so the corrupted entry cannot attract routing
        // and the refresh query still reaches a live node.
        let bogus = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 1);
        let index = 3;
        a.finger_table
            .update(index, Node::new(a.id(), bogus));
        assert_eq!(a.finger_table().entries()[index - 1].address, bogus);

        let refresh = a.finger_table().refresh();
        let (_, target, _) = refresh[index - 1];
        let expected = if contains(a.id(), b.id(), target) {
            Node::new(b.id(), b.local_addr())
        } else {
            Node::new(a.id(), a.local_addr())
        };

        for _ in 0..400 {
            a.tick();
            b.tick();

            if a.finger_table().entries()[index - 1].address != bogus {
                assert_eq!(a.finger_table().entries()[index - 1], expected);
                return;
            }
        }

        panic!("finger entry was never repaired");
    }
}
