//! The ring of known nodes and the neighborhood window around the local node.

use std::net::SocketAddr;

use crate::core::{
    id::NodeId,
    partner::PartnerNode,
    range::NodeIdRange,
    ring::{NodeRing, RingEntry},
};

/// A [`NodeRing`] of partner nodes that tracks the neighborhood of the local node.
///
/// The neighborhood is the arc from the predecessor edge to the successor edge, walking forward
/// through the local node. Each side holds up to `hood_size` available nodes; shutdown nodes
/// inside the window are kept but not counted. Once the window has grown over every node the
/// neighborhood is complete and its range is the full ring.
#[derive(Debug, Clone)]
pub struct NodeRingWithHood {
    ring: NodeRing<PartnerNode>,
    this_id: NodeId,
    /// Outermost nodes of the window on each side. A complete window leaves `succ_edge` on the
    /// local node and `pred_edge` on its successor, so the two edges are adjacent instead of
    /// meeting on one node. `complete` is what marks the window as the full ring.
    pred_edge: NodeId,
    succ_edge: NodeId,
    pred_count: usize,
    succ_count: usize,
    complete: bool,
    hood_size: usize,
}

impl NodeRingWithHood {
    /// Creates the ring holding only the local node, with a neighborhood of just itself.
    pub fn new(this_node: PartnerNode, hood_size: usize) -> Self {
        let this_id = this_node.id();
        let mut ring = NodeRing::new();
        ring.add_node(this_node);

        Self {
            ring,
            this_id,
            pred_edge: this_id,
            succ_edge: this_id,
            pred_count: 0,
            succ_count: 0,
            complete: false,
            hood_size,
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn ring(&self) -> &NodeRing<PartnerNode> {
        &self.ring
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartnerNode> {
        self.ring.iter()
    }

    pub fn get(&self, id: NodeId) -> Option<&PartnerNode> {
        self.ring.get(id)
    }

    /// Mutable access for updates that don't change a node's availability.
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut PartnerNode> {
        self.ring.get_mut(id)
    }

    pub fn this_id(&self) -> NodeId {
        self.this_id
    }

    pub fn this_node(&self) -> &PartnerNode {
        // The local node is never removed.
        self.ring.node(self.this_position())
    }

    pub fn hood_size(&self) -> usize {
        self.hood_size
    }

    pub fn pred_edge(&self) -> NodeId {
        self.pred_edge
    }

    pub fn succ_edge(&self) -> NodeId {
        self.succ_edge
    }

    pub fn pred_hood_count(&self) -> usize {
        self.pred_count
    }

    pub fn succ_hood_count(&self) -> usize {
        self.succ_count
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_pred_hood_complete(&self) -> bool {
        self.complete || self.pred_count >= self.hood_size
    }

    pub fn is_succ_hood_complete(&self) -> bool {
        self.complete || self.succ_count >= self.hood_size
    }

    fn this_position(&self) -> usize {
        self.ring.find_succ_or_same_position(self.this_id)
    }

    fn position_of(&self, id: NodeId) -> usize {
        self.ring.find_succ_or_same_position(id)
    }

    /// The node one step past the predecessor edge.
    pub fn next_pred_edge(&self) -> &PartnerNode {
        self.ring.node(self.ring.pred(self.position_of(self.pred_edge)))
    }

    /// The node one step past the successor edge.
    pub fn next_succ_edge(&self) -> &PartnerNode {
        self.ring.node(self.ring.succ(self.position_of(self.succ_edge)))
    }

    /// Moves the predecessor edge one node further, returning `false` once the window already
    /// covers every node.
    pub fn extend_pred_edge(&mut self) -> bool {
        if self.complete {
            return false;
        }

        let next = self.next_pred_edge();
        let (next_id, available) = (next.id(), next.is_available());
        if next_id == self.succ_edge {
            self.complete = true;
            self.recount();
            return false;
        }

        self.pred_edge = next_id;
        if available {
            self.pred_count += 1;
        }

        true
    }

    /// Moves the successor edge one node further, returning `false` once the window already
    /// covers every node.
    pub fn extend_succ_edge(&mut self) -> bool {
        if self.complete {
            return false;
        }

        let next = self.next_succ_edge();
        let (next_id, available) = (next.id(), next.is_available());
        if next_id == self.pred_edge {
            self.complete = true;
            self.recount();
            return false;
        }

        self.succ_edge = next_id;
        if available {
            self.succ_count += 1;
        }

        true
    }

    pub fn can_shrink_pred_hood(&self) -> bool {
        self.can_shrink(self.pred_edge, self.pred_count)
    }

    pub fn can_shrink_succ_hood(&self) -> bool {
        self.can_shrink(self.succ_edge, self.succ_count)
    }

    fn can_shrink(&self, edge: NodeId, count: usize) -> bool {
        if self.complete || edge == self.this_id {
            return false;
        }

        let edge_available = self.ring.get(edge).map_or(false, |node| node.is_available());
        count > self.hood_size || (count == self.hood_size && !edge_available)
    }

    /// Pulls the predecessor edge one node closer to the local node.
    pub fn shrink_pred_hood(&mut self) {
        if self.pred_edge == self.this_id {
            return;
        }

        let position = self.position_of(self.pred_edge);
        if self.ring.node(position).is_available() {
            self.pred_count -= 1;
        }
        self.pred_edge = self.ring.node(self.ring.succ(position)).id();
    }

    /// Pulls the successor edge one node closer to the local node.
    pub fn shrink_succ_hood(&mut self) {
        if self.succ_edge == self.this_id {
            return;
        }

        let position = self.position_of(self.succ_edge);
        if self.ring.node(position).is_available() {
            self.succ_count -= 1;
        }
        self.succ_edge = self.ring.node(self.ring.pred(position)).id();
    }

    fn reset_edges(&mut self) {
        self.complete = false;
        self.pred_edge = self.this_id;
        self.succ_edge = self.this_id;
        self.pred_count = 0;
        self.succ_count = 0;
    }

    /// Marks the local node as knowing every node on the ring.
    pub fn set_complete_knowledge(&mut self) {
        self.reset_edges();
        while self.extend_pred_edge() {}
    }

    /// Shrinks a complete neighborhood back down to `hood_size` available nodes per side.
    pub fn break_complete_ring(&mut self, hood_size: usize) {
        self.hood_size = hood_size;
        self.reset_edges();

        while !self.is_pred_hood_complete() && self.extend_pred_edge() {}
        while !self.is_succ_hood_complete() && self.extend_succ_edge() {}
    }

    /// The arc covered by the neighborhood.
    pub fn hood_range(&self) -> NodeIdRange {
        if self.complete || self.ring.len() <= 1 {
            NodeIdRange::FULL
        } else {
            NodeIdRange::new(self.pred_edge, self.succ_edge)
        }
    }

    pub fn within_hood_range(&self, id: NodeId) -> bool {
        self.hood_range().contains(id)
    }

    /// Nodes from the predecessor edge up to, but excluding, the local node.
    pub fn pred_hood(&self) -> Vec<&PartnerNode> {
        let mut hood = vec![];
        if self.pred_edge == self.this_id {
            return hood;
        }

        let mut position = self.position_of(self.pred_edge);
        for _ in 0..self.ring.len() {
            let node = self.ring.node(position);
            if node.id() == self.this_id {
                break;
            }

            hood.push(node);
            position = self.ring.succ(position);
        }

        hood
    }

    /// Nodes after the local node up to and including the successor edge.
    pub fn succ_hood(&self) -> Vec<&PartnerNode> {
        let mut hood = vec![];
        if self.succ_edge == self.this_id {
            return hood;
        }

        let mut position = self.ring.succ(self.this_position());
        for _ in 0..self.ring.len() {
            let node = self.ring.node(position);
            hood.push(node);
            if node.id() == self.succ_edge || node.id() == self.this_id {
                break;
            }

            position = self.ring.succ(position);
        }

        hood
    }

    /// Every node in the neighborhood, excluding the local node.
    pub fn get_hood(&self) -> Vec<&PartnerNode> {
        if self.complete {
            return self
                .ring
                .iter()
                .filter(|node| node.id() != self.this_id)
                .collect();
        }

        let mut hood = self.pred_hood();
        hood.extend(self.succ_hood());
        hood
    }

    /// The nodes to probe for liveness: the closest available node on each side plus the two
    /// edges, or every available node when the neighborhood is complete.
    pub fn get_ping_targets(&self) -> Vec<&PartnerNode> {
        if self.complete {
            return self
                .ring
                .iter()
                .filter(|node| node.id() != self.this_id && node.is_available())
                .collect();
        }

        let mut candidates = vec![];
        candidates.extend(self.pred_hood().into_iter().rev().find(|node| node.is_available()));
        candidates.extend(self.succ_hood().into_iter().find(|node| node.is_available()));
        candidates.extend(self.ring.get(self.pred_edge));
        candidates.extend(self.ring.get(self.succ_edge));

        let mut targets: Vec<&PartnerNode> = vec![];
        for node in candidates {
            if node.id() != self.this_id
                && node.is_available()
                && !targets.iter().any(|target| target.id() == node.id())
            {
                targets.push(node);
            }
        }

        targets
    }

    /// Adds a node, counting it straight away if it lands inside the window.
    pub fn add_node(&mut self, node: PartnerNode) -> bool {
        if self.ring.add_node(node).is_none() {
            return false;
        }

        self.recount();
        true
    }

    /// Removes a node other than the local one, pulling in an edge that pointed at it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<PartnerNode> {
        if id == self.this_id || !self.ring.contains(id) {
            return None;
        }

        if self.complete {
            let removed = self.ring.remove_node(id);
            self.set_complete_knowledge();
            return removed;
        }

        if id == self.pred_edge {
            self.shrink_pred_hood();
        }

        if id == self.succ_edge {
            self.shrink_succ_hood();
        }

        let removed = self.ring.remove_node(id);
        self.recount();
        removed
    }

    /// Swaps in a new record for an existing node, keeping its ring position.
    pub fn replace_node(&mut self, node: PartnerNode) -> Option<PartnerNode> {
        let previous = self.ring.replace_node(node)?;
        self.recount();
        Some(previous)
    }

    /// Swaps in a new record for the local node.
    pub fn replace_this_node(&mut self, node: PartnerNode) -> Option<PartnerNode> {
        if node.id() != self.this_id {
            return None;
        }

        self.replace_node(node)
    }

    /// Flags every node listening on `address` as unknown.
    pub fn set_unknown_by_address(&mut self, address: SocketAddr) -> usize {
        let mut count = 0;
        for position in 0..self.ring.len() {
            let node = self.ring.node_mut(position);
            if node.id() != self.this_id && node.address() == address && !node.is_unknown() {
                node.set_unknown(true);
                count += 1;
            }
        }

        count
    }

    /// Drops every node the predicate rejects, except the local node and the two edges.
    pub fn retain(&mut self, mut keep: impl FnMut(&PartnerNode) -> bool) -> usize {
        let (this_id, pred_edge, succ_edge) = (self.this_id, self.pred_edge, self.succ_edge);
        let before = self.ring.len();
        self.ring.retain(|node| {
            let id = node.node_id();
            id == this_id || id == pred_edge || id == succ_edge || keep(node)
        });

        let removed = before - self.ring.len();
        if removed > 0 {
            if self.complete {
                self.set_complete_knowledge();
            } else {
                self.recount();
            }
        }

        removed
    }

    // Recomputes the available-node counts of both sides from the edges.
    fn recount(&mut self) {
        let len = self.ring.len();
        let this_position = self.this_position();

        let mut pred_count = 0;
        if self.pred_edge != self.this_id {
            let mut position = this_position;
            for _ in 0..len {
                position = self.ring.pred(position);
                let node = self.ring.node(position);
                if node.is_available() {
                    pred_count += 1;
                }

                if node.id() == self.pred_edge || node.id() == self.this_id {
                    break;
                }
            }
        }

        let mut succ_count = 0;
        if self.succ_edge != self.this_id {
            let mut position = this_position;
            for _ in 0..len {
                position = self.ring.succ(position);
                let node = self.ring.node(position);
                // A complete window can share its edge node between the two sides.
                if self.complete && node.id() == self.pred_edge {
                    break;
                }

                if node.is_available() {
                    succ_count += 1;
                }

                if node.id() == self.succ_edge || node.id() == self.this_id {
                    break;
                }
            }
        }

        self.pred_count = pred_count;
        self.succ_count = succ_count;
    }

    /// Checks the edges point at stored nodes and the counts match the window.
    pub fn verify_consistency(&self) -> bool {
        if !self.ring.contains(self.this_id)
            || !self.ring.contains(self.pred_edge)
            || !self.ring.contains(self.succ_edge)
        {
            return false;
        }

        let mut copy = self.clone();
        copy.recount();
        copy.pred_count == self.pred_count && copy.succ_count == self.succ_count
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::core::{
        id::NodeInstance,
        partner::NodePhase,
        token::RoutingToken,
    };

    fn node(raw: u64, phase: NodePhase) -> PartnerNode {
        PartnerNode::new(
            NodeInstance::new(NodeId::from(raw), 1),
            phase,
            "127.0.0.1:1".parse().unwrap(),
            RoutingToken::default(),
            OffsetDateTime::now_utc(),
        )
    }

    fn hood(this: u64, others: &[u64], hood_size: usize) -> NodeRingWithHood {
        let mut hood = NodeRingWithHood::new(node(this, NodePhase::Routing), hood_size);
        for &raw in others {
            hood.add_node(node(raw, NodePhase::Routing));
        }
        hood
    }

    fn ids(nodes: Vec<&PartnerNode>) -> Vec<u64> {
        nodes.into_iter().map(|node| node.id().value().low()).collect()
    }

    #[test]
    fn single_node_is_full() {
        let mut hood = hood(100, &[], 2);
        assert!(hood.hood_range().is_full());
        assert!(!hood.extend_pred_edge());
        assert!(hood.is_complete());
        assert!(hood.get_hood().is_empty());
        assert!(hood.get_ping_targets().is_empty());
    }

    #[test]
    fn complete_knowledge_leaves_edges_adjacent() {
        let mut hood = hood(100, &[90, 110, 120], 2);
        hood.set_complete_knowledge();

        assert!(hood.is_complete());
        assert_eq!(hood.succ_edge(), NodeId::from(100));
        assert_eq!(hood.pred_edge(), NodeId::from(110));
        assert!(hood.hood_range().is_full());
        assert_eq!(ids(hood.get_hood()), vec![90, 110, 120]);
        assert!(hood.verify_consistency());
    }

    #[test]
    fn extend_until_complete() {
        let mut hood = hood(100, &[90, 110, 120], 2);
        assert_eq!(hood.hood_range(), NodeIdRange::new(100.into(), 100.into()));

        assert!(hood.extend_pred_edge());
        assert_eq!(hood.pred_edge(), NodeId::from(90));
        assert_eq!(hood.pred_hood_count(), 1);

        assert!(hood.extend_succ_edge());
        assert_eq!(hood.succ_edge(), NodeId::from(110));
        assert_eq!(hood.hood_range(), NodeIdRange::new(90.into(), 110.into()));

        // The next predecessor of 90 wraps to 120.
        assert!(hood.extend_pred_edge());
        assert_eq!(hood.pred_edge(), NodeId::from(120));
        assert_eq!(hood.pred_hood_count(), 2);
        assert!(hood.is_pred_hood_complete());

        // Nothing is left beyond the successor edge.
        assert!(!hood.extend_succ_edge());
        assert!(hood.is_complete());
        assert!(hood.hood_range().is_full());
        assert_eq!(ids(hood.get_hood()), vec![90, 110, 120]);
        assert!(hood.verify_consistency());
    }

    #[test]
    fn break_complete_ring() {
        let mut hood = hood(100, &[60, 70, 80, 90, 110, 120, 130, 140], 4);
        hood.set_complete_knowledge();
        assert!(hood.is_complete());

        hood.break_complete_ring(2);
        assert!(!hood.is_complete());
        assert_eq!(hood.pred_edge(), NodeId::from(80));
        assert_eq!(hood.succ_edge(), NodeId::from(120));
        assert_eq!(hood.pred_hood_count(), 2);
        assert_eq!(hood.succ_hood_count(), 2);
        assert_eq!(ids(hood.get_hood()), vec![80, 90, 110, 120]);
        assert!(hood.verify_consistency());
    }

    #[test]
    fn add_inside_window_counts_immediately() {
        let mut hood = hood(100, &[60, 70, 80, 90, 110, 120, 130, 140], 2);
        hood.set_complete_knowledge();
        hood.break_complete_ring(2);

        assert!(hood.add_node(node(95, NodePhase::Routing)));
        assert_eq!(hood.pred_hood_count(), 3);
        assert!(hood.can_shrink_pred_hood());
        hood.shrink_pred_hood();
        assert_eq!(hood.pred_edge(), NodeId::from(90));
        assert_eq!(hood.pred_hood_count(), 2);
        assert!(!hood.can_shrink_pred_hood());

        // Outside the window: known but not counted.
        assert!(hood.add_node(node(50, NodePhase::Routing)));
        assert_eq!(hood.pred_hood_count(), 2);
        assert!(!hood.within_hood_range(50.into()));
        assert!(!hood.add_node(node(50, NodePhase::Routing)));
    }

    #[test]
    fn shutdown_edge_can_shrink() {
        let mut hood = hood(100, &[80, 90, 110, 120, 130], 2);
        hood.set_complete_knowledge();
        hood.break_complete_ring(2);
        assert_eq!(hood.succ_edge(), NodeId::from(120));

        hood.replace_node(node(120, NodePhase::Shutdown));
        assert_eq!(hood.succ_hood_count(), 1);
        assert!(!hood.can_shrink_succ_hood());
        assert!(!hood.is_succ_hood_complete());

        assert!(hood.extend_succ_edge());
        assert_eq!(hood.succ_hood_count(), 2);
        assert!(hood.is_succ_hood_complete());
    }

    #[test]
    fn remove_edge_pulls_it_in() {
        let mut hood = hood(100, &[60, 70, 80, 90, 110, 120, 130, 140], 2);
        hood.set_complete_knowledge();
        hood.break_complete_ring(2);

        assert!(hood.remove_node(80.into()).is_some());
        assert_eq!(hood.pred_edge(), NodeId::from(90));
        assert_eq!(hood.pred_hood_count(), 1);
        assert!(hood.remove_node(100.into()).is_none());
        assert!(hood.verify_consistency());
    }

    #[test]
    fn ping_targets() {
        let mut hood = hood(100, &[60, 70, 80, 90, 110, 120, 130, 140], 3);
        hood.set_complete_knowledge();
        hood.break_complete_ring(3);

        // Closest neighbors first, then the edges.
        assert_eq!(ids(hood.get_ping_targets()), vec![90, 110, 70, 130]);

        hood.replace_node(node(90, NodePhase::Shutdown));
        assert_eq!(ids(hood.get_ping_targets()), vec![80, 110, 70, 130]);
    }

    #[test]
    fn unknown_by_address() {
        let mut hood = hood(100, &[90, 110], 2);
        assert_eq!(hood.set_unknown_by_address("127.0.0.1:1".parse().unwrap()), 2);
        assert!(!hood.this_node().is_unknown());
        assert!(hood.get(90.into()).unwrap().is_unknown());
    }

    #[test]
    fn retain_keeps_edges() {
        let mut hood = hood(100, &[60, 70, 80, 90, 110, 120, 130, 140], 2);
        hood.set_complete_knowledge();
        hood.break_complete_ring(2);

        let range = hood.hood_range();
        let removed = hood.retain(|node| hood_contains(&range, node));
        assert_eq!(removed, 4);
        assert_eq!(hood.hood_range(), range);
        assert_eq!(hood.len(), 5);
    }

    fn hood_contains(range: &NodeIdRange, node: &PartnerNode) -> bool {
        range.contains(node.id())
    }
}
