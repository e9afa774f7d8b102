use std::net::SocketAddrV4;
use std::time::Duration;

use crate::common::DEFAULT_M_BITS;

/// How long the node socket waits for traffic before running a
/// stabilization round.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// How long client calls ([crate::Dht::put], [crate::Dht::get], ...) wait
/// for a reply before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Node configurations
#[derive(Debug, Clone)]
pub struct Config {
    /// Address of any node already in the ring to join through.
    ///
    /// Defaults to None, which starts a new single-node ring.
    pub bootstrap: Option<SocketAddrV4>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where the OS assigns a free port.
    pub port: Option<u16>,
    /// Receive timeout of the node socket, which doubles as the
    /// stabilization cadence: the node stabilizes whenever the socket has
    /// been quiet this long. Shorter timeouts converge faster at the cost
    /// of more control traffic.
    ///
    /// Defaults to [DEFAULT_RECV_TIMEOUT]
    pub recv_timeout: Duration,
    /// Timeout of client calls made through a [crate::Dht] handle.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Ring size exponent: all ids live in `[0, 2^m_bits)`.
    ///
    /// Defaults to [DEFAULT_M_BITS]; supported range is 1..=32.
    pub m_bits: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap: None,
            port: None,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            m_bits: DEFAULT_M_BITS,
        }
    }
}
