use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// On-the-wire shape of a control message: a dict with a `method` tag and
/// an `args` payload (omitted for the argument-less methods).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "method", content = "args")]
pub enum WireMessage {
    #[serde(rename = "join_req")]
    JoinReq(JoinReqArgs),

    #[serde(rename = "join_rep")]
    JoinRep(JoinRepArgs),

    #[serde(rename = "notify")]
    Notify(NotifyArgs),

    #[serde(rename = "stabilize")]
    Stabilize(StabilizeArgs),

    #[serde(rename = "successor")]
    Successor(SuccessorArgs),

    #[serde(rename = "successor_rep")]
    SuccessorRep(SuccessorRepArgs),

    #[serde(rename = "put")]
    Put(PutArgs),

    #[serde(rename = "get")]
    Get(GetArgs),

    #[serde(rename = "ack")]
    Ack(AckArgs),

    #[serde(rename = "nack")]
    Nack,

    #[serde(rename = "predecessor")]
    Predecessor,
}

// Addresses travel as 6 compact bytes: 4 for the IPv4 octets, 2 for the
// port in network order.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinReqArgs {
    pub id: u64,

    #[serde(with = "serde_bytes")]
    pub addr: [u8; 6],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JoinRepArgs {
    pub successor_id: u64,

    #[serde(with = "serde_bytes")]
    pub successor_addr: [u8; 6],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotifyArgs {
    pub predecessor_id: u64,

    #[serde(with = "serde_bytes")]
    pub predecessor_addr: [u8; 6],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StabilizeArgs {
    #[serde(default)]
    pub predecessor_id: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuccessorArgs {
    pub id: u64,

    #[serde(with = "serde_bytes")]
    pub from: [u8; 6],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuccessorRepArgs {
    pub req_id: u64,

    pub id: u64,

    #[serde(with = "serde_bytes")]
    pub addr: [u8; 6],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PutArgs {
    pub key: String,

    pub value: ByteBuf,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    pub from: Option<[u8; 6]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GetArgs {
    pub key: String,

    #[serde(default)]
    #[serde(with = "serde_bytes")]
    pub from: Option<[u8; 6]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AckArgs {
    #[serde(default)]
    pub value: Option<ByteBuf>,
}
