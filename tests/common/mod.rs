use std::net::{Ipv4Addr, SocketAddr};

use federation::{
    message::PartnerNodeHeader, FederationConfig, NodeId, NodeInstance, NodePhase, RoutingTable,
    RoutingToken,
};
use tracing_subscriber::{fmt, EnvFilter};

#[allow(dead_code)]
pub fn enable_tracing() {
    fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

#[allow(dead_code)]
pub fn id(raw: u64) -> NodeId {
    NodeId::from(raw)
}

/// Every test node listens on localhost, on a port derived from its id.
#[allow(dead_code)]
pub fn addr(raw: u64) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, raw as u16))
}

#[allow(dead_code)]
pub fn header(raw: u64, instance_id: u64, phase: NodePhase) -> PartnerNodeHeader {
    PartnerNodeHeader::new(
        NodeInstance::new(id(raw), instance_id),
        phase,
        addr(raw),
        RoutingToken::default(),
    )
}

#[allow(dead_code)]
pub fn table(local: u64, neighborhood_size: usize) -> RoutingTable {
    RoutingTable::new(
        NodeInstance::new(id(local), 0),
        addr(local),
        FederationConfig::with_neighborhood_size(neighborhood_size),
    )
    .unwrap()
}

/// A table that started the federation on its own.
#[allow(dead_code)]
pub fn bootstrapped(local: u64, neighborhood_size: usize) -> RoutingTable {
    let mut table = table(local, neighborhood_size);
    table.bootstrap();
    table
}

/// Makes a node known the way a joining neighbor shows up: inserting first, then routing.
#[allow(dead_code)]
pub fn join(table: &mut RoutingTable, raw: u64) {
    table.consider(&header(raw, 1, NodePhase::Inserting), true);
    table.consider(&header(raw, 1, NodePhase::Routing), false);
}

#[allow(dead_code)]
pub fn raw_ids<'a>(nodes: impl IntoIterator<Item = &'a federation::PartnerNode>) -> Vec<u64> {
    nodes
        .into_iter()
        .map(|node| node.id().value().low())
        .collect()
}
