//! Serialize and deserialize ring control messages.

mod internal;

use std::net::{Ipv4Addr, SocketAddrV4};

use bytes::Bytes;
use serde_bytes::ByteBuf;

use crate::common::{Id, Node};

/// A single control message; one bencoded dict per datagram, carrying a
/// `method` tag and an `args` payload.
///
/// Messages are transient: they exist on the wire and in a handler's stack,
/// never beyond that.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A node outside the ring asking to be inserted.
    JoinRequest {
        candidate: Node,
    },
    /// Reply to a join: the successor the candidate should adopt.
    JoinResponse {
        successor: Node,
    },
    /// Announces the sender as a (possibly closer) predecessor.
    Notify {
        predecessor: Node,
    },
    /// Reply to [Message::Predecessor]: the replying node's predecessor id,
    /// if it has one. Receiving it triggers a stabilization round.
    Stabilize {
        predecessor_id: Option<Id>,
    },
    /// Lookup of the node responsible for `target`; the answer goes
    /// directly to `from`.
    Successor {
        target: Id,
        from: SocketAddrV4,
    },
    /// Reply to [Message::Successor], echoing the requested target.
    SuccessorResponse {
        target: Id,
        successor: Node,
    },
    /// Store request. `from` is the original requester; the owning node
    /// replies to it directly instead of unwinding the forwarding path.
    /// A missing `from` is filled with the datagram's source address.
    Put {
        key: String,
        value: Bytes,
        from: Option<SocketAddrV4>,
    },
    /// Retrieve request; same `from` convention as [Message::Put].
    Get {
        key: String,
        from: Option<SocketAddrV4>,
    },
    /// Positive reply; carries the value for a successful get.
    Ack {
        value: Option<Bytes>,
    },
    /// Negative reply: duplicate key on put, missing key on get.
    Nack,
    /// Asks the receiver for its predecessor id, kicking off stabilization.
    Predecessor,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(&self.clone().into_wire())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message, serde_bencode::Error> {
        let wire: internal::WireMessage = serde_bencode::from_bytes(bytes)?;

        Ok(Message::from_wire(wire))
    }

    fn into_wire(self) -> internal::WireMessage {
        match self {
            Message::JoinRequest { candidate } => {
                internal::WireMessage::JoinReq(internal::JoinReqArgs {
                    id: candidate.id.0,
                    addr: addr_to_bytes(&candidate.address),
                })
            }
            Message::JoinResponse { successor } => {
                internal::WireMessage::JoinRep(internal::JoinRepArgs {
                    successor_id: successor.id.0,
                    successor_addr: addr_to_bytes(&successor.address),
                })
            }
            Message::Notify { predecessor } => {
                internal::WireMessage::Notify(internal::NotifyArgs {
                    predecessor_id: predecessor.id.0,
                    predecessor_addr: addr_to_bytes(&predecessor.address),
                })
            }
            Message::Stabilize { predecessor_id } => {
                internal::WireMessage::Stabilize(internal::StabilizeArgs {
                    predecessor_id: predecessor_id.map(|id| id.0),
                })
            }
            Message::Successor { target, from } => {
                internal::WireMessage::Successor(internal::SuccessorArgs {
                    id: target.0,
                    from: addr_to_bytes(&from),
                })
            }
            Message::SuccessorResponse { target, successor } => {
                internal::WireMessage::SuccessorRep(internal::SuccessorRepArgs {
                    req_id: target.0,
                    id: successor.id.0,
                    addr: addr_to_bytes(&successor.address),
                })
            }
            Message::Put { key, value, from } => internal::WireMessage::Put(internal::PutArgs {
                key,
                value: ByteBuf::from(value.to_vec()),
                from: from.map(|addr| addr_to_bytes(&addr)),
            }),
            Message::Get { key, from } => internal::WireMessage::Get(internal::GetArgs {
                key,
                from: from.map(|addr| addr_to_bytes(&addr)),
            }),
            Message::Ack { value } => internal::WireMessage::Ack(internal::AckArgs {
                value: value.map(|value| ByteBuf::from(value.to_vec())),
            }),
            Message::Nack => internal::WireMessage::Nack,
            Message::Predecessor => internal::WireMessage::Predecessor,
        }
    }

    fn from_wire(wire: internal::WireMessage) -> Message {
        match wire {
            internal::WireMessage::JoinReq(args) => Message::JoinRequest {
                candidate: Node::new(Id(args.id), addr_from_bytes(&args.addr)),
            },
            internal::WireMessage::JoinRep(args) => Message::JoinResponse {
                successor: Node::new(Id(args.successor_id), addr_from_bytes(&args.successor_addr)),
            },
            internal::WireMessage::Notify(args) => Message::Notify {
                predecessor: Node::new(
                    Id(args.predecessor_id),
                    addr_from_bytes(&args.predecessor_addr),
                ),
            },
            internal::WireMessage::Stabilize(args) => Message::Stabilize {
                predecessor_id: args.predecessor_id.map(Id),
            },
            internal::WireMessage::Successor(args) => Message::Successor {
                target: Id(args.id),
                from: addr_from_bytes(&args.from),
            },
            internal::WireMessage::SuccessorRep(args) => Message::SuccessorResponse {
                target: Id(args.req_id),
                successor: Node::new(Id(args.id), addr_from_bytes(&args.addr)),
            },
            internal::WireMessage::Put(args) => Message::Put {
                key: args.key,
                value: Bytes::from(args.value.into_vec()),
                from: args.from.as_ref().map(addr_from_bytes),
            },
            internal::WireMessage::Get(args) => Message::Get {
                key: args.key,
                from: args.from.as_ref().map(addr_from_bytes),
            },
            internal::WireMessage::Ack(args) => Message::Ack {
                value: args.value.map(|value| Bytes::from(value.into_vec())),
            },
            internal::WireMessage::Nack => Message::Nack,
            internal::WireMessage::Predecessor => Message::Predecessor,
        }
    }
}

fn addr_to_bytes(address: &SocketAddrV4) -> [u8; 6] {
    let mut bytes = [0u8; 6];

    bytes[..4].copy_from_slice(&address.ip().octets());
    bytes[4..].copy_from_slice(&address.port().to_be_bytes());

    bytes
}

fn addr_from_bytes(bytes: &[u8; 6]) -> SocketAddrV4 {
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    SocketAddrV4::new(ip, port)
}
