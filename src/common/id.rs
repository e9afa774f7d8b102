//! Ring identifiers and the interval predicate behind every routing decision.
use std::fmt::{self, Debug, Display, Formatter};

use crc::{Crc, CRC_32_ISCSI};
use rand::Rng;

/// Number of bits of the identifier ring unless configured otherwise.
///
/// The ring then has `2^10 = 1024` positions.
pub const DEFAULT_M_BITS: u8 = 10;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Position of a node or key on the ring `[0, 2^m)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u64);

impl Id {
    /// Hashes an address or key string to an m-bit ring identifier.
    pub fn hash(input: &str, m_bits: u8) -> Id {
        let checksum = CASTAGNOLI.checksum(input.as_bytes());

        Id(u64::from(checksum) & ring_mask(m_bits))
    }

    /// A uniformly random m-bit identifier, useful as a lookup target.
    pub fn random(m_bits: u8) -> Id {
        let mut rng = rand::thread_rng();

        Id(rng.gen::<u64>() & ring_mask(m_bits))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// All-ones mask selecting the low `m_bits` bits.
pub(crate) fn ring_mask(m_bits: u8) -> u64 {
    if m_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << m_bits) - 1
    }
}

/// Returns true if `x` lies in the half-open ring interval `(lo, hi]`,
/// accounting for wraparound when `lo > hi`.
///
/// When `lo == hi` the interval is the entire ring and every id is
/// contained; that is the degenerate single-node case.
pub fn contains(lo: Id, hi: Id, x: Id) -> bool {
    if lo == hi {
        return true;
    }

    if lo < hi {
        lo < x && x <= hi
    } else {
        x > lo || x <= hi
    }
}
