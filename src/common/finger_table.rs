//! Per-node routing table with one shortcut entry per ring bit.
use std::net::SocketAddrV4;

use crate::common::{contains, ring_mask, Id, Node};

/// Routing table of exactly `m` entries.
///
/// Entry `i` (1-based) targets the id `(node_id + 2^(i-1)) mod 2^m` and
/// stores whichever node is currently believed to answer for that target,
/// which may be stale until the next refresh cycle. Entries are only ever
/// overwritten, never removed.
#[derive(Debug, Clone)]
pub struct FingerTable {
    node_id: Id,
    m_bits: u8,
    entries: Vec<Node>,
}

impl FingerTable {
    /// Creates a table with every entry pointing at the owning node itself.
    pub fn new(node_id: Id, address: SocketAddrV4, m_bits: u8) -> FingerTable {
        FingerTable {
            node_id,
            m_bits,
            entries: vec![Node::new(node_id, address); m_bits as usize],
        }
    }

    pub fn m_bits(&self) -> u8 {
        self.m_bits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries in index order.
    pub fn entries(&self) -> &[Node] {
        &self.entries
    }

    /// Overwrites every entry with the same pointer. Used when a ring of
    /// one first acquires a successor; stabilization corrects the coarse
    /// approximation afterwards.
    pub fn fill(&mut self, node: Node) {
        for entry in self.entries.iter_mut() {
            *entry = node;
        }
    }

    /// Overwrites entry `index` (1-based). Out of range indexes are ignored.
    pub fn update(&mut self, index: usize, node: Node) {
        if index >= 1 && index <= self.entries.len() {
            self.entries[index - 1] = node;
        }
    }

    /// Address of the furthest entry that precedes `target` without
    /// overshooting it, scanning from the last entry down; falls back to
    /// the immediate successor (entry 1) when no entry qualifies.
    pub fn find(&self, target: Id) -> SocketAddrV4 {
        for entry in self.entries.iter().rev() {
            if entry.id != target && contains(self.node_id, target, entry.id) {
                return entry.address;
            }
        }

        self.entries[0].address
    }

    /// Triples `(index, target_id, entry_address)` for every entry, driving
    /// the periodic re-resolution of the table.
    pub fn refresh(&self) -> Vec<(usize, Id, SocketAddrV4)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i + 1, self.target(i), entry.address))
            .collect()
    }

    /// The 1-based index whose target id equals `id`, if any. Matches an
    /// asynchronous lookup reply back to the entry that requested it.
    pub fn index_of_target(&self, id: Id) -> Option<usize> {
        (0..self.entries.len())
            .find(|&i| self.target(i) == id)
            .map(|i| i + 1)
    }

    fn target(&self, zero_index: usize) -> Id {
        Id(self.node_id.0.wrapping_add(1u64 << zero_index) & ring_mask(self.m_bits))
    }
}
