use std::{collections::HashSet, net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    core::{
        config::FederationConfig,
        error::Result,
        id::{NodeId, NodeInstance},
        message::{Header, PartnerNodeHeader, RoutingTokenHeader},
        partner::{NodePhase, PartnerNode},
        range::NodeIdRange,
    },
    table::{NeighborHeadersOutcome, RoutingTable},
};

#[cfg_attr(doc_cfg, doc(cfg(feature = "sync")))]
#[derive(Debug, Default, Clone)]
/// A routing table suitable for sharing between tasks.
///
/// It wraps [`RoutingTable`] behind a lock, returns owned records instead of references and can
/// run the periodic compaction in the background.
pub struct SyncRoutingTable {
    routing_table: Arc<RwLock<RoutingTable>>,
}

impl SyncRoutingTable {
    pub fn new(
        instance: NodeInstance,
        address: SocketAddr,
        config: FederationConfig,
    ) -> Result<Self> {
        Ok(Self::from(RoutingTable::new(instance, address, config)?))
    }

    pub fn local_id(&self) -> NodeId {
        self.routing_table.read().local_id()
    }

    pub fn local_node(&self) -> PartnerNode {
        self.routing_table.read().local_node().clone()
    }

    pub fn neighborhood_version(&self) -> u64 {
        self.routing_table.read().neighborhood_version()
    }

    pub fn bootstrap(&self) {
        self.routing_table.write().bootstrap()
    }

    pub fn change_phase(&self, phase: NodePhase) -> bool {
        self.routing_table.write().change_phase(phase)
    }

    pub fn get(&self, id: NodeId) -> Option<PartnerNode> {
        self.routing_table.read().get(id).cloned()
    }

    pub fn is_down(&self, instance: NodeInstance) -> bool {
        self.routing_table.read().is_down(instance)
    }

    pub fn consider(&self, header: &PartnerNodeHeader, is_inserting: bool) -> Option<PartnerNode> {
        self.routing_table
            .write()
            .consider_and_return(header, is_inserting)
    }

    pub fn set_shutdown(&self, instance: NodeInstance) {
        self.routing_table.write().set_shutdown(instance)
    }

    pub fn set_unknown(&self, instance: NodeInstance) {
        self.routing_table.write().set_unknown(instance)
    }

    pub fn set_unknown_address(&self, address: SocketAddr) {
        self.routing_table.write().set_unknown_address(address)
    }

    pub fn find_closest(&self, target: NodeId) -> Option<PartnerNode> {
        self.routing_table.read().find_closest(target).cloned()
    }

    pub fn get_routing_hop(&self, target: NodeId) -> (Option<PartnerNode>, bool) {
        let routing_table_g = self.routing_table.read();
        let (hop, owns) = routing_table_g.get_routing_hop(target);
        (hop.cloned(), owns)
    }

    pub fn get_hood(&self) -> (Vec<PartnerNode>, NodeIdRange) {
        let routing_table_g = self.routing_table.read();
        let (hood, range) = routing_table_g.get_hood();
        (hood.into_iter().cloned().collect(), range)
    }

    pub fn get_ping_targets(&self) -> Vec<PartnerNode> {
        self.routing_table
            .read()
            .get_ping_targets()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn extend_hood(
        &self,
        range: NodeIdRange,
        shutdown_nodes: &HashSet<NodeInstance>,
        available_nodes: Option<&HashSet<NodeInstance>>,
        version_matched: bool,
    ) -> bool {
        self.routing_table
            .write()
            .extend_hood(range, shutdown_nodes, available_nodes, version_matched)
    }

    pub fn process_neighbor_headers(
        &self,
        headers: &[Header],
        from: NodeInstance,
        is_inserting: bool,
        instance_matched: bool,
    ) -> Result<NeighborHeadersOutcome> {
        self.routing_table.write().process_neighbor_headers(
            headers,
            from,
            is_inserting,
            instance_matched,
        )
    }

    pub fn add_neighbor_headers(&self, echo_version: Option<u64>) -> Vec<Header> {
        self.routing_table.read().add_neighbor_headers(echo_version)
    }

    pub fn try_split_token(&self, neighbor: NodeId) -> Vec<RoutingTokenHeader> {
        self.routing_table.write().try_split_token(neighbor)
    }

    pub fn try_release_token(&self, partner: NodeId) -> Vec<RoutingTokenHeader> {
        self.routing_table.write().try_release_token(partner)
    }

    pub fn check_liveness(&self, target: &PartnerNodeHeader) -> bool {
        self.routing_table.write().check_liveness(target)
    }

    pub fn compact(&self) -> usize {
        self.routing_table.write().compact(OffsetDateTime::now_utc())
    }

    /// Compacts the table every `period` until the returned handle is aborted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_compaction(&self, period: Duration) -> JoinHandle<()> {
        let table = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = table.compact();
                if removed > 0 {
                    debug!(local_id = %table.local_id(), removed, "periodic compaction");
                }
            }
        })
    }

    /// Runs `f` with the table locked for reading.
    pub fn read<R>(&self, f: impl FnOnce(&RoutingTable) -> R) -> R {
        f(&self.routing_table.read())
    }

    /// Runs `f` with the table locked for writing.
    pub fn write<R>(&self, f: impl FnOnce(&mut RoutingTable) -> R) -> R {
        f(&mut self.routing_table.write())
    }
}

impl From<RoutingTable> for SyncRoutingTable {
    fn from(routing_table: RoutingTable) -> Self {
        Self {
            routing_table: Arc::new(RwLock::new(routing_table)),
        }
    }
}
