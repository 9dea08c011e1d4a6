//! The routing core of a federation: nodes organised on a 128-bit identifier ring.
//!
//! Every node keeps a [`RoutingTable`], its view of the ring. The table knows about some of the
//! other nodes and tracks their lifecycle [`NodePhase`], reconciling the state gossiped by its
//! neighbors with what it already knows. Around the local node it maintains a neighborhood of a
//! configurable number of live nodes on each side, used to detect failures and to decide which
//! node owns which part of the ring.
//!
//! Ownership is expressed with [`RoutingToken`]s: each routing node owns an arc of the ring and
//! the arcs of all nodes together cover it exactly. Tokens are split when a node joins next to
//! another one and released when a node leaves.
//!
//! Messages are routed greedily with [`RoutingTable::find_closest`]: each hop forwards to the
//! routing node closest to the target until the node owning the target is reached.
//!
//! Message transport is left to the caller. The table only consumes and produces the federation
//! [`message::Header`]s attached to messages.

#![cfg_attr(doc_cfg, feature(doc_cfg))]

mod core;
mod table;

pub use crate::core::{
    config::FederationConfig,
    error::{Error, Result},
    hood::NodeRingWithHood,
    id::{LargeInteger, NodeId, NodeInstance},
    message,
    partner::{NodePhase, PartnerNode},
    range::NodeIdRange,
    ring::{NodeRing, RingEntry},
    token::RoutingToken,
};
#[cfg(feature = "sync")]
pub use crate::table::SyncRoutingTable;
pub use crate::table::{NeighborHeadersOutcome, RoutingTable};
