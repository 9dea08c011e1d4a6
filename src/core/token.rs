//! Ownership of ring ranges.

use std::fmt;

use crate::core::{
    id::{LargeInteger, NodeId},
    message::RoutingTokenHeader,
    range::NodeIdRange,
};

/// The arc of the ring a node is authoritative for.
///
/// The version grows every time the arc changes, so token information arriving late can be told
/// apart from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingToken {
    range: NodeIdRange,
    version: u64,
}

impl Default for RoutingToken {
    fn default() -> Self {
        Self {
            range: NodeIdRange::EMPTY,
            version: 0,
        }
    }
}

impl RoutingToken {
    pub const fn new(range: NodeIdRange, version: u64) -> Self {
        Self { range, version }
    }

    pub const fn range(&self) -> NodeIdRange {
        self.range
    }

    pub const fn version(&self) -> u64 {
        self.version
    }

    pub fn is_full(&self) -> bool {
        self.range.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.range.contains(id)
    }

    /// Replaces the range and bumps the version.
    pub(crate) fn update(&mut self, range: NodeIdRange) {
        self.range = range;
        self.version += 1;
    }

    pub(crate) fn set_empty(&mut self) {
        self.update(NodeIdRange::EMPTY);
    }

    // Gives away `ceded`, keeping `kept`, and describes the transfer.
    fn cede(
        &mut self,
        kept: NodeIdRange,
        ceded: NodeIdRange,
        target_version: u64,
    ) -> RoutingTokenHeader {
        self.update(kept);
        RoutingTokenHeader::new(ceded, self.version, target_version)
    }

    /// Shrinks the token to make room for `neighbor`, returning the transfers to send to it.
    ///
    /// The boundary is the ring midpoint between `owner` and the neighbor. Each transfer bumps the
    /// version once.
    pub fn split(
        &mut self,
        owner: NodeId,
        neighbor: NodeId,
        neighbor_token: &RoutingToken,
    ) -> Vec<RoutingTokenHeader> {
        let mut transfers = vec![];
        let target_version = neighbor_token.version();

        if neighbor == owner || self.is_empty() {
            return transfers;
        }

        if self.contains(neighbor) {
            if self.is_full() {
                // The neighbor is both predecessor and successor: keep the half around us.
                let begin = neighbor.succ_mid_point(owner) + LargeInteger::ONE;
                let end = owner.succ_mid_point(neighbor);
                let ceded = NodeIdRange::new(end + LargeInteger::ONE, begin - LargeInteger::ONE);
                transfers.push(self.cede(NodeIdRange::new(begin, end), ceded, target_version));
            } else if owner.succ_dist(neighbor) <= owner.succ_dist(self.range.end()) {
                transfers.extend(self.split_succ(owner, neighbor, target_version));
            } else {
                transfers.extend(self.split_pred(owner, neighbor, target_version));
            }

            return transfers;
        }

        // The neighbor already owns an arc, only the midpoint between us moves.
        if !neighbor_token.is_empty() {
            if self.range.end() + LargeInteger::ONE == neighbor_token.range().begin() {
                transfers.extend(self.split_succ(owner, neighbor, target_version));
            }

            if neighbor_token.range().end() + LargeInteger::ONE == self.range.begin() {
                transfers.extend(self.split_pred(owner, neighbor, target_version));
            }
        }

        transfers
    }

    fn split_succ(
        &mut self,
        owner: NodeId,
        neighbor: NodeId,
        target_version: u64,
    ) -> Option<RoutingTokenHeader> {
        let mid = owner.succ_mid_point(neighbor);
        let (kept, ceded) = self.range.split_at(mid)?;
        if ceded.is_empty() || !kept.contains(owner) {
            return None;
        }

        Some(self.cede(kept, ceded, target_version))
    }

    fn split_pred(
        &mut self,
        owner: NodeId,
        neighbor: NodeId,
        target_version: u64,
    ) -> Option<RoutingTokenHeader> {
        let mid = neighbor.succ_mid_point(owner);
        let (ceded, kept) = self.range.split_at(mid)?;
        if kept.is_empty() || !kept.contains(owner) {
            return None;
        }

        Some(self.cede(kept, ceded, target_version))
    }

    /// Takes over the arc carried by `header`.
    ///
    /// An empty token adopts the arc if it covers `owner`; otherwise the arc has to be adjacent to
    /// or overlapping the current range. A transfer computed against another version of this
    /// token is stale and rejected.
    pub fn accept(&mut self, header: &RoutingTokenHeader, owner: NodeId) -> bool {
        let incoming = header.range();
        if incoming.is_empty() || header.target_version() != self.version {
            return false;
        }

        if self.is_empty() {
            if !incoming.contains(owner) {
                return false;
            }

            self.update(incoming);
            return true;
        }

        match self.range.merge(&incoming) {
            Some(merged) => {
                self.update(merged);
                true
            }
            None => false,
        }
    }

    /// Hands the part of the token past the `pred`/`succ` midpoint to the successor.
    pub fn release_succ_token(
        &mut self,
        pred: NodeId,
        succ: NodeId,
        succ_token_version: u64,
    ) -> Option<RoutingTokenHeader> {
        if self.is_empty() {
            return None;
        }

        if pred == succ || self.is_full() {
            return Some(self.cede(NodeIdRange::EMPTY, self.range, succ_token_version));
        }

        let mid = pred.succ_mid_point(succ);
        match self.range.split_at(mid) {
            Some((kept, ceded)) if !ceded.is_empty() => {
                Some(self.cede(kept, ceded, succ_token_version))
            }
            Some(_) => None,
            // The midpoint precedes the whole token, all of it is closer to the successor.
            None if pred.succ_dist(mid) < pred.succ_dist(self.range.begin()) => {
                Some(self.cede(NodeIdRange::EMPTY, self.range, succ_token_version))
            }
            None => None,
        }
    }

    /// Hands the part of the token up to the `pred`/`succ` midpoint to the predecessor.
    pub fn release_pred_token(
        &mut self,
        pred: NodeId,
        succ: NodeId,
        pred_token_version: u64,
    ) -> Option<RoutingTokenHeader> {
        if self.is_empty() {
            return None;
        }

        if pred == succ || self.is_full() {
            return Some(self.cede(NodeIdRange::EMPTY, self.range, pred_token_version));
        }

        let mid = pred.succ_mid_point(succ);
        match self.range.split_at(mid) {
            Some((ceded, kept)) => Some(self.cede(kept, ceded, pred_token_version)),
            // The midpoint follows the whole token, all of it is closer to the predecessor.
            None if pred.succ_dist(mid) > pred.succ_dist(self.range.end()) => {
                Some(self.cede(NodeIdRange::EMPTY, self.range, pred_token_version))
            }
            None => None,
        }
    }
}

impl fmt::Display for RoutingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.range, self.version)
    }
}
