//! A sorted ring of entries keyed by node id.

use crate::core::{id::NodeId, partner::PartnerNode, range::NodeIdRange};

/// Anything that can be placed on a [`NodeRing`].
pub trait RingEntry {
    fn node_id(&self) -> NodeId;
}

impl RingEntry for NodeId {
    fn node_id(&self) -> NodeId {
        *self
    }
}

impl RingEntry for PartnerNode {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

/// Entries ordered by id, with positions wrapping around at both ends.
///
/// Positions are only stable until the next insertion or removal.
#[derive(Debug, Clone)]
pub struct NodeRing<T> {
    nodes: Vec<T>,
}

impl<T> Default for NodeRing<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: RingEntry> NodeRing<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the entry at `position`.
    ///
    /// Panics if the position is out of bounds, positions should come from this ring.
    pub fn node(&self, position: usize) -> &T {
        &self.nodes[position]
    }

    pub(crate) fn node_mut(&mut self, position: usize) -> &mut T {
        &mut self.nodes[position]
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter()
    }

    /// Position of the first entry with an id `>= id`, wrapping to 0 past the largest id.
    pub fn find_succ_or_same_position(&self, id: NodeId) -> usize {
        let position = self.nodes.partition_point(|node| node.node_id() < id);
        if position == self.nodes.len() {
            0
        } else {
            position
        }
    }

    /// Position of the entry with exactly this id.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.nodes
            .binary_search_by_key(&id, |node| node.node_id())
            .ok()
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.position(id).map(|position| &self.nodes[position])
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        let position = self.position(id)?;
        Some(&mut self.nodes[position])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.position(id).is_some()
    }

    pub fn pred(&self, position: usize) -> usize {
        if position == 0 {
            self.nodes.len().saturating_sub(1)
        } else {
            position - 1
        }
    }

    pub fn succ(&self, position: usize) -> usize {
        if position + 1 >= self.nodes.len() {
            0
        } else {
            position + 1
        }
    }

    /// Inserts the entry at its sorted position, returning that position.
    ///
    /// Returns `None` and leaves the ring untouched if the id is already present.
    pub fn add_node(&mut self, node: T) -> Option<usize> {
        match self
            .nodes
            .binary_search_by_key(&node.node_id(), |node| node.node_id())
        {
            Ok(_) => None,
            Err(position) => {
                self.nodes.insert(position, node);
                Some(position)
            }
        }
    }

    /// Removes the entry at `position`.
    pub fn remove_at(&mut self, position: usize) -> T {
        self.nodes.remove(position)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<T> {
        let position = self.position(id)?;
        Some(self.nodes.remove(position))
    }

    /// Swaps in a new entry for the one with the same id, returning the previous one.
    pub fn replace_node(&mut self, node: T) -> Option<T> {
        let position = self.position(node.node_id())?;
        Some(std::mem::replace(&mut self.nodes[position], node))
    }

    /// Entries lying on `range`, in ring order starting at the range's begin.
    pub fn nodes_in_range(&self, range: &NodeIdRange) -> Vec<&T> {
        if self.nodes.is_empty() || range.is_empty() {
            return vec![];
        }

        let mut position = self.find_succ_or_same_position(range.begin());
        let mut found = vec![];
        for _ in 0..self.nodes.len() {
            let node = &self.nodes[position];
            if !range.contains(node.node_id()) {
                break;
            }

            found.push(node);
            position = self.succ(position);
        }

        found
    }

    pub fn retain(&mut self, f: impl FnMut(&T) -> bool) {
        self.nodes.retain(f)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::{thread_rng, Rng};

    use super::*;

    fn id(raw: u64) -> NodeId {
        NodeId::from(raw)
    }

    fn ring(ids: &[u64]) -> NodeRing<NodeId> {
        let mut ring = NodeRing::new();
        for &raw in ids {
            ring.add_node(id(raw));
        }
        ring
    }

    // The smallest stored id >= target, wrapping to the smallest id overall.
    fn expected_succ_or_same(oracle: &BTreeSet<u64>, target: u64) -> Option<u64> {
        oracle
            .range(target..)
            .next()
            .or_else(|| oracle.iter().next())
            .copied()
    }

    #[test]
    fn add_keeps_order_and_rejects_duplicates() {
        let mut ring = ring(&[30, 10, 20]);
        let ids: Vec<_> = ring.iter().copied().collect();
        assert_eq!(ids, vec![id(10), id(20), id(30)]);

        assert_eq!(ring.add_node(id(20)), None);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.add_node(id(25)), Some(2));
    }

    #[test]
    fn find_succ_or_same_position() {
        let ring = ring(&[10, 20, 30]);
        assert_eq!(ring.find_succ_or_same_position(id(10)), 0);
        assert_eq!(ring.find_succ_or_same_position(id(11)), 1);
        assert_eq!(ring.find_succ_or_same_position(id(30)), 2);
        // Wraps around past the largest id.
        assert_eq!(ring.find_succ_or_same_position(id(31)), 0);
        assert_eq!(ring.find_succ_or_same_position(NodeId::MIN), 0);
    }

    #[test]
    fn find_succ_or_same_matches_oracle() {
        let mut rng = thread_rng();
        let mut ring = NodeRing::new();
        let mut oracle = BTreeSet::new();

        for _ in 0..2000 {
            let raw = rng.gen_range(0..200u64);
            if rng.gen_bool(0.6) {
                assert_eq!(ring.add_node(id(raw)).is_some(), oracle.insert(raw));
            } else {
                assert_eq!(ring.remove_node(id(raw)).is_some(), oracle.remove(&raw));
            }

            assert_eq!(ring.len(), oracle.len());

            let target = rng.gen_range(0..210u64);
            if let Some(expected) = expected_succ_or_same(&oracle, target) {
                let position = ring.find_succ_or_same_position(id(target));
                assert_eq!(*ring.node(position), id(expected));
            }

            // Every remaining member is found at its own position.
            for (position, raw) in oracle.iter().enumerate() {
                assert_eq!(ring.find_succ_or_same_position(id(*raw)), position);
            }
        }
    }

    #[test]
    fn pred_succ_are_circular() {
        let ring = ring(&[5, 10, 15, 20, 25]);
        for i in 0..ring.len() {
            assert_eq!(ring.succ(ring.pred(i)), i);
            assert_eq!(ring.pred(ring.succ(i)), i);
        }

        assert_eq!(ring.pred(0), 4);
        assert_eq!(ring.succ(4), 0);

        let single = ring_of_one();
        assert_eq!(single.pred(0), 0);
        assert_eq!(single.succ(0), 0);
    }

    fn ring_of_one() -> NodeRing<NodeId> {
        ring(&[7])
    }

    #[test]
    fn replace_and_remove() {
        let mut ring = ring(&[10, 20, 30]);
        assert_eq!(ring.replace_node(id(20)), Some(id(20)));
        assert_eq!(ring.replace_node(id(21)), None);

        assert_eq!(ring.remove_at(0), id(10));
        assert_eq!(ring.find_succ_or_same_position(id(5)), 0);
        assert_eq!(*ring.node(0), id(20));
    }

    #[test]
    fn nodes_in_range_wraps() {
        let ring = ring(&[10, 20, 30, 40]);
        let found: Vec<_> = ring
            .nodes_in_range(&NodeIdRange::new(id(35), id(15)))
            .into_iter()
            .copied()
            .collect();
        assert_eq!(found, vec![id(40), id(10)]);

        assert_eq!(ring.nodes_in_range(&NodeIdRange::FULL).len(), 4);
        assert!(ring.nodes_in_range(&NodeIdRange::EMPTY).is_empty());
        assert!(ring
            .nodes_in_range(&NodeIdRange::new(id(11), id(19)))
            .is_empty());
    }
}
