#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod dht;
pub mod rpc;

pub use crate::common::{contains, FingerTable, Id, Keystore, Message, Node, DEFAULT_M_BITS};
pub use bytes::Bytes;
pub use dht::{
    Dht, DhtBuilder, DhtWasShutdown, PutError, RequestError, Testnet, TESTNET_M_BITS,
};
