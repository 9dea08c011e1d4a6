//! The per-node record kept by the routing table.

use std::{fmt, net::SocketAddr};

use bytes::Bytes;
use time::OffsetDateTime;

use crate::core::{
    id::{NodeId, NodeInstance},
    message::PartnerNodeHeader,
    token::RoutingToken,
};

/// Lifecycle phase of a node, ordered from first to last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodePhase {
    Booting,
    Joining,
    Inserting,
    Routing,
    Shutdown,
}

impl NodePhase {
    /// Inserting and routing nodes take part in the ring.
    pub fn is_available(&self) -> bool {
        matches!(self, NodePhase::Inserting | NodePhase::Routing)
    }

    pub fn is_routing(&self) -> bool {
        *self == NodePhase::Routing
    }

    pub fn as_str(&self) -> &str {
        match self {
            NodePhase::Booting => "booting",
            NodePhase::Joining => "joining",
            NodePhase::Inserting => "inserting",
            NodePhase::Routing => "routing",
            NodePhase::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the local node knows about one member of the federation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerNode {
    instance: NodeInstance,
    phase: NodePhase,
    token: RoutingToken,
    address: SocketAddr,
    extensions: Bytes,
    // Set when the node failed to respond; cleared by any accepted update.
    is_unknown: bool,
    // Last time the local node heard from the node directly.
    last_access: OffsetDateTime,
    // Last time a header about the node was considered, even if it carried nothing new.
    last_consider: OffsetDateTime,
}

impl PartnerNode {
    pub fn new(
        instance: NodeInstance,
        phase: NodePhase,
        address: SocketAddr,
        token: RoutingToken,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            instance,
            phase,
            token,
            address,
            extensions: Bytes::new(),
            is_unknown: false,
            last_access: now,
            last_consider: now,
        }
    }

    /// Builds the record described by a header.
    pub fn from_header(header: &PartnerNodeHeader, now: OffsetDateTime) -> Self {
        Self {
            extensions: header.extensions.clone(),
            ..Self::new(
                header.instance,
                header.phase,
                header.address,
                header.token,
                now,
            )
        }
    }

    /// The header advertising this record.
    pub fn header(&self) -> PartnerNodeHeader {
        PartnerNodeHeader {
            instance: self.instance,
            phase: self.phase,
            address: self.address,
            token: self.token,
            extensions: self.extensions.clone(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.instance.id
    }

    pub fn instance(&self) -> NodeInstance {
        self.instance
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    pub fn token(&self) -> &RoutingToken {
        &self.token
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn extensions(&self) -> &Bytes {
        &self.extensions
    }

    pub fn is_available(&self) -> bool {
        self.phase.is_available()
    }

    pub fn is_routing(&self) -> bool {
        self.phase.is_routing()
    }

    pub fn is_shutdown(&self) -> bool {
        self.phase == NodePhase::Shutdown
    }

    pub fn is_unknown(&self) -> bool {
        self.is_unknown
    }

    pub fn last_access(&self) -> OffsetDateTime {
        self.last_access
    }

    pub fn last_consider(&self) -> OffsetDateTime {
        self.last_consider
    }

    pub(crate) fn set_phase(&mut self, phase: NodePhase) {
        self.phase = phase;
    }

    pub(crate) fn set_token(&mut self, token: RoutingToken) {
        self.token = token;
    }

    pub(crate) fn token_mut(&mut self) -> &mut RoutingToken {
        &mut self.token
    }

    pub(crate) fn set_instance(&mut self, instance: NodeInstance) {
        self.instance = instance;
    }

    pub(crate) fn set_unknown(&mut self, is_unknown: bool) {
        self.is_unknown = is_unknown;
    }

    pub(crate) fn touch_access(&mut self, now: OffsetDateTime) {
        self.last_access = now;
        self.last_consider = now;
    }

    pub(crate) fn touch_consider(&mut self, now: OffsetDateTime) {
        self.last_consider = now;
    }
}

impl fmt::Display for PartnerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.instance, self.phase, self.address)?;
        if self.is_unknown {
            write!(f, " (unknown)")?;
        }
        Ok(())
    }
}
