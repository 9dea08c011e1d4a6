//! Federation header types exchanged with the transport layer.
//!
//! Encoding these on the wire is left to the transport, the routing core only consumes and
//! produces the decoded values.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::core::{
    id::NodeInstance,
    partner::NodePhase,
    range::NodeIdRange,
    token::RoutingToken,
};

/// Everything a node advertises about itself, or relays about a neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerNodeHeader {
    pub instance: NodeInstance,
    pub phase: NodePhase,
    pub address: SocketAddr,
    pub token: RoutingToken,
    /// Opaque extension fields, carried through untouched.
    pub extensions: Bytes,
}

impl PartnerNodeHeader {
    pub fn new(
        instance: NodeInstance,
        phase: NodePhase,
        address: SocketAddr,
        token: RoutingToken,
    ) -> Self {
        Self {
            instance,
            phase,
            address,
            token,
            extensions: Bytes::new(),
        }
    }

    /// Returns a copy of the header with a different phase.
    pub fn with_phase(&self, phase: NodePhase) -> Self {
        Self {
            phase,
            ..self.clone()
        }
    }
}

/// An arc of a node's token handed to another node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingTokenHeader {
    range: NodeIdRange,
    version: u64,
    target_version: u64,
}

impl RoutingTokenHeader {
    pub const fn new(range: NodeIdRange, version: u64, target_version: u64) -> Self {
        Self {
            range,
            version,
            target_version,
        }
    }

    /// The arc being transferred.
    pub const fn range(&self) -> NodeIdRange {
        self.range
    }

    /// The sender's token version after giving the arc away.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The receiver's token version the transfer was computed against.
    pub const fn target_version(&self) -> u64 {
        self.target_version
    }
}

/// Federation header variants attached to messages between neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// State of a node, either the sender or one of its neighbors.
    PartnerNode(PartnerNodeHeader),
    /// The arc covered by the sender's neighborhood.
    NeighborhoodRange(NodeIdRange),
    /// The sender's view of the receiver's neighborhood version.
    NeighborhoodVersion(u64),
    /// A token transfer, at most two per message.
    RoutingToken(RoutingTokenHeader),
}

impl Header {
    pub fn variant_as_str(&self) -> &str {
        match self {
            Header::PartnerNode(_) => "partner_node",
            Header::NeighborhoodRange(_) => "neighborhood_range",
            Header::NeighborhoodVersion(_) => "neighborhood_version",
            Header::RoutingToken(_) => "routing_token",
        }
    }
}
