//! Arcs of the identifier ring.

use std::fmt;

use crate::core::id::{LargeInteger, NodeId};

/// A closed arc `[begin, end]` of the ring, walking forward from `begin`.
///
/// When `begin > end` the arc wraps through zero. An arc whose end immediately precedes its begin
/// is empty, with the single exception of [`NodeIdRange::FULL`] (`[MIN, MAX]`) which covers the
/// whole ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdRange {
    begin: NodeId,
    end: NodeId,
}

impl NodeIdRange {
    pub const FULL: Self = Self {
        begin: NodeId::MIN,
        end: NodeId::MAX,
    };

    pub const EMPTY: Self = Self {
        begin: NodeId::new(LargeInteger::ONE),
        end: NodeId::MIN,
    };

    pub const fn new(begin: NodeId, end: NodeId) -> Self {
        Self { begin, end }
    }

    pub const fn begin(&self) -> NodeId {
        self.begin
    }

    pub const fn end(&self) -> NodeId {
        self.end
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    pub fn is_empty(&self) -> bool {
        !self.is_full() && self.end + LargeInteger::ONE == self.begin
    }

    // Offset of the last point from `begin`, only meaningful for non-empty ranges.
    fn span(&self) -> LargeInteger {
        self.begin.succ_dist(self.end)
    }

    /// Returns `true` if `id` lies on the arc.
    pub fn contains(&self, id: NodeId) -> bool {
        if self.is_full() {
            return true;
        }

        if self.is_empty() {
            return false;
        }

        self.begin.succ_dist(id) <= self.span()
    }

    /// Returns `true` if every point of `other` lies on this arc.
    pub fn contains_range(&self, other: &NodeIdRange) -> bool {
        if other.is_empty() || self.is_full() {
            return true;
        }

        if other.is_full() || self.is_empty() {
            return false;
        }

        self.contains(other.begin)
            && self.contains(other.end)
            && self.begin.succ_dist(other.begin) <= self.begin.succ_dist(other.end)
    }

    /// Returns `true` if the two arcs share no point.
    pub fn disjoint(&self, other: &NodeIdRange) -> bool {
        if self.is_empty() || other.is_empty() {
            return true;
        }

        !self.contains(other.begin) && !other.contains(self.begin)
    }

    /// Joins two overlapping or adjacent arcs, `None` if a gap separates them.
    pub fn merge(&self, other: &NodeIdRange) -> Option<NodeIdRange> {
        if other.is_empty() || self.contains_range(other) {
            return Some(*self);
        }

        if self.is_empty() || other.contains_range(self) {
            return Some(*other);
        }

        let joined = if self.contains(other.begin) || self.end + LargeInteger::ONE == other.begin
        {
            // Other extends this arc forward; it may also reach around to our begin.
            if other.contains(self.begin) || other.end + LargeInteger::ONE == self.begin {
                return Some(Self::FULL);
            }
            NodeIdRange::new(self.begin, other.end)
        } else if other.contains(self.begin) || other.end + LargeInteger::ONE == self.begin {
            NodeIdRange::new(other.begin, self.end)
        } else {
            return None;
        };

        Some(joined)
    }

    /// Splits the arc after `id`: `[begin, id]` and `[id + 1, end]`.
    ///
    /// Returns `None` if `id` isn't on the arc. The second half is empty when `id` is the end.
    pub fn split_at(&self, id: NodeId) -> Option<(NodeIdRange, NodeIdRange)> {
        if !self.contains(id) {
            return None;
        }

        let low = NodeIdRange::new(self.begin, id);
        let high = if id == self.end {
            Self::EMPTY
        } else {
            NodeIdRange::new(id + LargeInteger::ONE, self.end)
        };

        Some((low, high))
    }

    /// The intersection of two arcs, which on a ring can consist of up to two pieces.
    pub fn intersect(&self, other: &NodeIdRange) -> (NodeIdRange, NodeIdRange) {
        if self.is_empty() || other.is_empty() {
            return (Self::EMPTY, Self::EMPTY);
        }

        if self.is_full() {
            return (*other, Self::EMPTY);
        }

        if other.is_full() {
            return (*self, Self::EMPTY);
        }

        // Each piece of the intersection starts at one of the two begins.
        let piece_from = |start: NodeId| {
            let end = if start.succ_dist(self.end) <= start.succ_dist(other.end) {
                self.end
            } else {
                other.end
            };
            NodeIdRange::new(start, end)
        };

        let first = if self.contains(other.begin) {
            piece_from(other.begin)
        } else {
            Self::EMPTY
        };

        let second = if other.contains(self.begin) && self.begin != other.begin {
            piece_from(self.begin)
        } else {
            Self::EMPTY
        };

        if first.is_empty() {
            (second, Self::EMPTY)
        } else {
            (first, second)
        }
    }

    /// Removes `other` from this arc, leaving up to two pieces.
    pub fn subtract(&self, other: &NodeIdRange) -> (NodeIdRange, NodeIdRange) {
        if other.is_empty() {
            return (*self, Self::EMPTY);
        }

        if other.is_full() {
            return (Self::EMPTY, Self::EMPTY);
        }

        let complement = NodeIdRange::new(
            other.end + LargeInteger::ONE,
            other.begin - LargeInteger::ONE,
        );
        self.intersect(&complement)
    }
}

impl Default for NodeIdRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for NodeIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            write!(f, "(full)")
        } else if self.is_empty() {
            write!(f, "(empty)")
        } else {
            write!(f, "[{}, {}]", self.begin, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(begin: u64, end: u64) -> NodeIdRange {
        NodeIdRange::new(begin.into(), end.into())
    }

    #[test]
    fn full_and_empty() {
        assert!(NodeIdRange::FULL.is_full());
        assert!(!NodeIdRange::FULL.is_empty());
        assert!(NodeIdRange::EMPTY.is_empty());
        assert!(range(5, 4).is_empty());
        assert!(!range(4, 4).is_empty());
        assert!(NodeIdRange::default().is_full());

        assert!(NodeIdRange::FULL.contains(NodeId::MAX));
        assert!(NodeIdRange::FULL.contains(NodeId::MIN));
        assert!(!NodeIdRange::EMPTY.contains(NodeId::MIN));
        assert!(!NodeIdRange::EMPTY.contains(NodeId::from(1)));
    }

    #[test]
    fn contains() {
        let r = range(10, 20);
        assert!(r.contains(10.into()));
        assert!(r.contains(15.into()));
        assert!(r.contains(20.into()));
        assert!(!r.contains(9.into()));
        assert!(!r.contains(21.into()));
    }

    #[test]
    fn contains_wraps() {
        let r = NodeIdRange::new(NodeId::MAX - LargeInteger::from(5u64), 5.into());
        assert!(r.contains(NodeId::MAX));
        assert!(r.contains(NodeId::MIN));
        assert!(r.contains(5.into()));
        assert!(!r.contains(6.into()));
        assert!(!r.contains(NodeId::MAX - LargeInteger::from(6u64)));
    }

    #[test]
    fn contains_range() {
        let r = range(10, 20);
        assert!(r.contains_range(&range(12, 18)));
        assert!(r.contains_range(&range(10, 20)));
        assert!(!r.contains_range(&range(18, 12)));
        assert!(!r.contains_range(&range(5, 12)));
        assert!(r.contains_range(&NodeIdRange::EMPTY));
        assert!(!r.contains_range(&NodeIdRange::FULL));
        assert!(NodeIdRange::FULL.contains_range(&r));
    }

    #[test]
    fn disjoint() {
        assert!(range(10, 20).disjoint(&range(21, 30)));
        assert!(!range(10, 20).disjoint(&range(20, 30)));
        assert!(!range(10, 20).disjoint(&range(0, 10)));
        assert!(!range(10, 20).disjoint(&range(12, 13)));
        assert!(range(10, 20).disjoint(&NodeIdRange::EMPTY));
    }

    #[test]
    fn merge() {
        assert_eq!(range(10, 20).merge(&range(21, 30)), Some(range(10, 30)));
        assert_eq!(range(21, 30).merge(&range(10, 20)), Some(range(10, 30)));
        assert_eq!(range(10, 20).merge(&range(15, 30)), Some(range(10, 30)));
        assert_eq!(range(10, 20).merge(&range(12, 13)), Some(range(10, 20)));
        assert_eq!(range(10, 20).merge(&range(22, 30)), None);
        assert_eq!(range(10, 20).merge(&range(21, 9)), Some(NodeIdRange::FULL));
        assert_eq!(range(10, 20).merge(&NodeIdRange::EMPTY), Some(range(10, 20)));
    }

    #[test]
    fn split_and_merge_back() {
        let r = range(100, 200);
        let (low, high) = r.split_at(150.into()).unwrap();
        assert_eq!(low, range(100, 150));
        assert_eq!(high, range(151, 200));
        assert_eq!(low.merge(&high), Some(r));

        let (low, high) = r.split_at(200.into()).unwrap();
        assert_eq!(low, r);
        assert!(high.is_empty());

        assert!(r.split_at(201.into()).is_none());
    }

    #[test]
    fn subtract() {
        assert_eq!(
            range(10, 30).subtract(&range(15, 20)),
            (range(21, 30), range(10, 14))
        );
        assert_eq!(
            range(10, 30).subtract(&range(0, 20)),
            (range(21, 30), NodeIdRange::EMPTY)
        );
        assert_eq!(
            range(10, 30).subtract(&range(20, 40)),
            (range(10, 19), NodeIdRange::EMPTY)
        );
        assert_eq!(
            range(10, 30).subtract(&range(40, 50)),
            (range(10, 30), NodeIdRange::EMPTY)
        );

        let (a, b) = range(10, 30).subtract(&range(0, 40));
        assert!(a.is_empty() && b.is_empty());

        assert_eq!(
            NodeIdRange::FULL.subtract(&range(10, 20)),
            (range(21, 9), NodeIdRange::EMPTY)
        );
    }
}
