//! The routing table: the local view of the federation ring.

use std::{
    collections::HashSet,
    net::{Ipv4Addr, SocketAddr},
};

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::core::{
    config::FederationConfig,
    error::{Error, Result},
    hood::NodeRingWithHood,
    id::{LargeInteger, NodeId, NodeInstance},
    message::{Header, PartnerNodeHeader, RoutingTokenHeader},
    partner::{NodePhase, PartnerNode},
    range::NodeIdRange,
    ring::NodeRing,
    token::RoutingToken,
};

#[cfg(feature = "sync")]
mod sync;
#[cfg(feature = "sync")]
pub use sync::SyncRoutingTable;

/// What came out of processing the federation headers of an inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborHeadersOutcome {
    /// The sender's record after the headers were considered, if it is known.
    pub from: Option<PartnerNode>,
    /// Token transfers that couldn't be merged into the local token.
    pub rejected_tokens: Vec<RoutingTokenHeader>,
    /// Set if at least one partner header was dropped as suspected stale.
    pub headers_ignored: bool,
}

/// The local node's view of the federation.
///
/// Two rings are kept: the known ring holds every node ever heard of (including shutdown ones)
/// and tracks the neighborhood, the routing ring holds the ids of the available nodes and the
/// local node. Routing decisions are made on the latter.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    config: FederationConfig,
    // Every known node, the local one included.
    known: NodeRingWithHood,
    // Available nodes and the local node.
    routing: NodeRing<NodeId>,
    // Bumped every time the neighborhood changes.
    neighborhood_version: u64,
    // Whether the neighborhood range may be advertised to others.
    is_range_consistent: bool,
    last_compact: OffsetDateTime,
}

impl Default for RoutingTable {
    fn default() -> Self {
        let config = FederationConfig::default();
        let local = PartnerNode::new(
            NodeInstance::new(NodeId::rand(), 0),
            NodePhase::Booting,
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            RoutingToken::default(),
            OffsetDateTime::now_utc(),
        );

        Self::with_local_node(local, config)
    }
}

impl RoutingTable {
    /// Creates a table holding only the local node, in the booting phase.
    pub fn new(
        instance: NodeInstance,
        address: SocketAddr,
        config: FederationConfig,
    ) -> Result<Self> {
        config.validate()?;

        let local = PartnerNode::new(
            instance,
            NodePhase::Booting,
            address,
            RoutingToken::default(),
            OffsetDateTime::now_utc(),
        );

        Ok(Self::with_local_node(local, config))
    }

    fn with_local_node(local: PartnerNode, config: FederationConfig) -> Self {
        let mut routing = NodeRing::new();
        routing.add_node(local.id());

        Self {
            known: NodeRingWithHood::new(local, config.neighborhood_size),
            routing,
            neighborhood_version: 0,
            is_range_consistent: false,
            last_compact: OffsetDateTime::now_utc(),
            config,
        }
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Returns this table's local identifier.
    pub fn local_id(&self) -> NodeId {
        self.known.this_id()
    }

    /// Returns the local node's current record.
    pub fn local_node(&self) -> &PartnerNode {
        self.known.this_node()
    }

    pub fn neighborhood_version(&self) -> u64 {
        self.neighborhood_version
    }

    pub fn is_range_consistent(&self) -> bool {
        self.is_range_consistent
    }

    /// The number of known nodes, the local one included.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// The known ring, shutdown nodes included.
    pub fn known_ring(&self) -> &NodeRingWithHood {
        &self.known
    }

    /// Ids of the available nodes and the local node.
    pub fn routing_ring(&self) -> &NodeRing<NodeId> {
        &self.routing
    }

    // Applies a change to the local record.
    fn update_local(&mut self, f: impl FnOnce(&mut PartnerNode)) {
        let mut local = self.known.this_node().clone();
        f(&mut local);
        self.known.replace_this_node(local);
    }

    /// Starts a new federation: the local node routes and owns the whole ring.
    pub fn bootstrap(&mut self) {
        self.is_range_consistent = true;
        self.known.set_complete_knowledge();
        self.update_local(|local| {
            local.set_phase(NodePhase::Routing);
            local.token_mut().update(NodeIdRange::FULL);
        });

        info!(local_id = %self.local_id(), token = %self.local_node().token(), "bootstrapped");
    }

    /// Marks the neighborhood range as safe to advertise.
    pub fn start_routing(&mut self) {
        self.is_range_consistent = true;
    }

    /// Moves the local node to `phase`, returning `false` if it was already there.
    pub fn change_phase(&mut self, phase: NodePhase) -> bool {
        if self.local_node().phase() == phase {
            return false;
        }

        debug!(local_id = %self.local_id(), from = %self.local_node().phase(), to = %phase, "changing phase");
        self.update_local(|local| local.set_phase(phase));
        true
    }

    /// Starts a new incarnation of the local node, which has to join again.
    pub fn restart_instance(&mut self) {
        self.update_local(|local| {
            let instance = local.instance();
            local.set_instance(NodeInstance::new(instance.id, instance.instance_id + 1));
            local.set_phase(NodePhase::Joining);
        });

        info!(local_id = %self.local_id(), instance = %self.local_node().instance(), "restarted");
    }

    /// Tears the table down, returning the final record of the local node.
    pub fn close_site_node(self) -> PartnerNode {
        self.known.this_node().clone()
    }

    /// Returns the node with the given id, whatever its instance.
    pub fn get(&self, id: NodeId) -> Option<&PartnerNode> {
        self.known.get(id)
    }

    /// Returns the node only if its stored instance is exactly `instance`.
    pub fn get_instance(&self, instance: NodeInstance) -> Option<&PartnerNode> {
        self.known
            .get(instance.id)
            .filter(|node| node.instance().instance_id == instance.instance_id)
    }

    /// Returns `true` if a newer instance is known or this instance is shut down.
    pub fn is_down(&self, instance: NodeInstance) -> bool {
        self.known.get(instance.id).map_or(false, |node| {
            let stored = node.instance().instance_id;
            stored > instance.instance_id || (stored == instance.instance_id && node.is_shutdown())
        })
    }

    /// Reconciles the table with what a header says about a node.
    ///
    /// `is_inserting` is set when the header comes from a node that is inserting itself next to
    /// the local node. Stale headers are absorbed.
    pub fn consider(&mut self, header: &PartnerNodeHeader, is_inserting: bool) {
        self.consider_at(header, is_inserting, OffsetDateTime::now_utc());
    }

    /// Like [`RoutingTable::consider`], returning the resulting record. `None` means the header
    /// was ignored.
    pub fn consider_and_return(
        &mut self,
        header: &PartnerNodeHeader,
        is_inserting: bool,
    ) -> Option<PartnerNode> {
        let id = self.consider_at(header, is_inserting, OffsetDateTime::now_utc())?;
        self.known.get(id).cloned()
    }

    fn consider_at(
        &mut self,
        header: &PartnerNodeHeader,
        is_inserting: bool,
        now: OffsetDateTime,
    ) -> Option<NodeId> {
        let id = header.instance.id;
        let local_id = self.local_id();
        if id == local_id {
            return Some(id);
        }

        let existing = self
            .known
            .get(id)
            .map(|node| (node.instance().instance_id, node.phase(), node.token().version()));
        let in_routing = self.routing.contains(id);

        if let Some((instance_id, phase, _)) = existing {
            if instance_id > header.instance.instance_id
                || (instance_id == header.instance.instance_id && phase > header.phase)
            {
                if let Some(node) = self.known.get_mut(id) {
                    node.touch_access(now);
                }
                return Some(id);
            }
        }

        let newer_instance = existing.map_or(true, |(instance_id, _, _)| {
            instance_id < header.instance.instance_id
        });

        // An available node we never saw join, inside our neighborhood, can't legitimately
        // exist: we are probably looking at stale information about a node we forgot.
        let local = self.local_node();
        if header.phase.is_available()
            && (!in_routing || newer_instance)
            && self.known.within_hood_range(id)
            && local.is_available()
        {
            let suspect = if header.phase == NodePhase::Routing {
                Some(local.is_routing())
            } else if !is_inserting {
                Some(local.is_routing() && newer_instance)
            } else {
                None
            };

            match suspect {
                Some(true) => {
                    warn!(%local_id, instance = %header.instance, "setting suspected stale header to shutdown");
                    return self.consider_at(&header.with_phase(NodePhase::Shutdown), false, now);
                }
                Some(false) => {
                    info!(%local_id, instance = %header.instance, "ignoring suspected stale header");
                    return None;
                }
                None => {}
            }
        }

        let mut token_update_only = false;
        match existing {
            None => {
                self.known.add_node(PartnerNode::from_header(header, now));
            }
            Some((instance_id, ..)) if instance_id < header.instance.instance_id => {
                self.known.replace_node(PartnerNode::from_header(header, now));
            }
            Some((_, phase, token_version)) => {
                let newer_token = token_version < header.token.version();
                let newer_phase = phase < header.phase;

                if !newer_token && !newer_phase {
                    if let Some(node) = self.known.get_mut(id) {
                        if (header.token.version() != 0 && token_version != header.token.version())
                            || phase != header.phase
                        {
                            node.touch_access(now);
                        } else {
                            node.touch_consider(now);
                        }
                    }
                    return Some(id);
                }

                token_update_only = newer_token && !newer_phase;

                let mut updated = self.known.get(id)?.clone();
                if newer_phase {
                    updated.set_phase(header.phase);
                }
                if newer_token {
                    updated.set_token(header.token);
                }
                updated.set_unknown(false);
                updated.touch_access(now);
                self.known.replace_node(updated);
            }
        }

        let available = self.known.get(id).map_or(false, |node| node.is_available());
        let mut hood_changed = false;
        if in_routing {
            hood_changed = self.known.within_hood_range(id);
            if available {
                hood_changed = hood_changed && !token_update_only;
            } else {
                self.routing.remove_node(id);
            }
        } else if available {
            self.routing.add_node(id);

            if !self.known.is_complete() {
                while self.known.can_shrink_pred_hood() {
                    self.known.shrink_pred_hood();
                }

                while self.known.can_shrink_succ_hood() {
                    self.known.shrink_succ_hood();
                }

                hood_changed = self.known.within_hood_range(id);
            } else {
                self.known.break_complete_ring(self.config.neighborhood_size);
                hood_changed = true;
            }
        }

        if hood_changed {
            self.neighborhood_version += 1;
        }

        debug_assert!(self.verify_consistency());

        if let Some(node) = self.known.get(id) {
            debug!(%local_id, header = %header.instance, result = %node, "considered");
        }

        Some(id)
    }

    /// Marks the node as shut down if `instance` is at least as recent as the stored one.
    pub fn set_shutdown(&mut self, instance: NodeInstance) {
        let header = match self.known.get(instance.id) {
            Some(node)
                if node.instance().instance_id <= instance.instance_id && !node.is_shutdown() =>
            {
                node.header().with_phase(NodePhase::Shutdown)
            }
            _ => return,
        };

        info!(local_id = %self.local_id(), %instance, "setting to shutdown");
        self.consider_at(&header, false, OffsetDateTime::now_utc());
    }

    /// Flags the node as unknown if the stored instance is exactly `instance`.
    ///
    /// Only routing and shutdown nodes can be flagged.
    pub fn set_unknown(&mut self, instance: NodeInstance) {
        if instance.id == self.local_id() {
            return;
        }

        if let Some(node) = self.known.get_mut(instance.id) {
            if node.instance().instance_id == instance.instance_id
                && matches!(node.phase(), NodePhase::Routing | NodePhase::Shutdown)
            {
                node.set_unknown(true);
            }
        }
    }

    /// Flags every node listening on `address` as unknown.
    pub fn set_unknown_address(&mut self, address: SocketAddr) {
        let count = self.known.set_unknown_by_address(address);
        info!(local_id = %self.local_id(), %address, count, "address became unknown");
    }

    fn routing_node_at(&self, position: usize) -> Option<&PartnerNode> {
        self.known.get(*self.routing.node(position))
    }

    /// Returns the routing node closest to `target`.
    ///
    /// Ties go to the predecessor. Nodes flagged unknown are only returned if no other routing
    /// node is left, and if no other node routes at all the closest known node is returned
    /// whatever its phase. `None` means the local node is alone.
    pub fn find_closest(&self, target: NodeId) -> Option<&PartnerNode> {
        let len = self.routing.len();
        let succ_start = self.routing.find_succ_or_same_position(target);
        let pred_start = self.routing.pred(succ_start);

        let walk = |start: usize, forward: bool| {
            let mut first_routing = None;
            let mut position = start;
            for _ in 0..len {
                if let Some(node) = self.routing_node_at(position) {
                    if node.is_routing() {
                        first_routing.get_or_insert(position);
                        if !node.is_unknown() {
                            return (first_routing, Some(position));
                        }
                    }
                }

                position = if forward {
                    self.routing.succ(position)
                } else {
                    self.routing.pred(position)
                };
            }

            (first_routing, None)
        };

        let (saved_succ, found_succ) = walk(succ_start, true);
        let saved_succ = match saved_succ {
            Some(position) => position,
            None => return self.find_closest_known(target),
        };
        let (saved_pred, found_pred) = walk(pred_start, false);
        let saved_pred = saved_pred.unwrap_or(saved_succ);

        let local_id = self.local_id();
        if let (Some(pred), Some(succ)) = (found_pred, found_succ) {
            let (pred_id, succ_id) = (*self.routing.node(pred), *self.routing.node(succ));
            if target.pred_dist(pred_id) <= target.succ_dist(succ_id) {
                if pred_id != local_id {
                    return self.known.get(pred_id);
                }
            } else if succ_id != local_id {
                return self.known.get(succ_id);
            }
        }

        // Either only unknown nodes route or the best candidate is the local node.
        let (pred_id, succ_id) = (
            *self.routing.node(saved_pred),
            *self.routing.node(saved_succ),
        );
        if pred_id == local_id && succ_id == local_id {
            // No other node routes.
            return self.find_closest_known(target);
        }

        if target.pred_dist(pred_id) <= target.succ_dist(succ_id) {
            self.known.get(pred_id)
        } else {
            self.known.get(succ_id)
        }
    }

    // The closest node of any phase in the known ring, other than the local one.
    fn find_closest_known(&self, target: NodeId) -> Option<&PartnerNode> {
        let ring = self.known.ring();
        let local_id = self.local_id();
        if ring.len() <= 1 {
            return None;
        }

        let mut succ = ring.find_succ_or_same_position(target);
        if ring.node(succ).id() == local_id {
            succ = ring.succ(succ);
        }

        let mut pred = ring.pred(ring.find_succ_or_same_position(target));
        if ring.node(pred).id() == local_id {
            pred = ring.pred(pred);
        }

        let (pred_node, succ_node) = (ring.node(pred), ring.node(succ));
        if target.pred_dist(pred_node.id()) <= target.succ_dist(succ_node.id()) {
            Some(pred_node)
        } else {
            Some(succ_node)
        }
    }

    /// The next hop toward `target`, and whether the local node owns it.
    pub fn get_routing_hop(&self, target: NodeId) -> (Option<&PartnerNode>, bool) {
        let local = self.local_node();
        if local.token().contains(target) {
            return (Some(local), true);
        }

        (self.find_closest(target), false)
    }

    /// The neighborhood, excluding the local node, and the range it covers.
    pub fn get_hood(&self) -> (Vec<&PartnerNode>, NodeIdRange) {
        (self.known.get_hood(), self.known.hood_range())
    }

    pub fn hood_range(&self) -> NodeIdRange {
        self.known.hood_range()
    }

    /// Routing-ring neighbors flagged unknown, up to `neighborhood_size` hops on each side.
    pub fn get_extended_hood(&self) -> Vec<&PartnerNode> {
        let hood_size = self.config.neighborhood_size;
        let len = self.routing.len();
        let (pred_count, succ_count) = if len > hood_size * 2 {
            (hood_size, hood_size)
        } else {
            (len.saturating_sub(1), 0)
        };

        let Some(this_position) = self.routing.position(self.local_id()) else {
            return vec![];
        };

        let mut nodes = vec![];
        let mut position = this_position;
        for _ in 0..pred_count {
            position = self.routing.pred(position);
            nodes.extend(self.routing_node_at(position));
        }

        position = this_position;
        for _ in 0..succ_count {
            position = self.routing.succ(position);
            nodes.extend(self.routing_node_at(position));
        }

        nodes.retain(|node| node.is_unknown());
        nodes
    }

    /// The neighbors to probe for liveness.
    pub fn get_ping_targets(&self) -> Vec<&PartnerNode> {
        self.known.get_ping_targets()
    }

    fn routing_neighbor(&self, forward: bool) -> Option<&PartnerNode> {
        let position = self.routing.position(self.local_id())?;
        let neighbor = if forward {
            self.routing.succ(position)
        } else {
            self.routing.pred(position)
        };

        self.routing_node_at(neighbor)
    }

    /// The local node's predecessor on the routing ring, the local node itself when alone.
    pub fn predecessor(&self) -> Option<&PartnerNode> {
        self.routing_neighbor(false)
    }

    /// The local node's successor on the routing ring, the local node itself when alone.
    pub fn successor(&self) -> Option<&PartnerNode> {
        self.routing_neighbor(true)
    }

    /// The number of nodes in the routing phase, the local node included.
    pub fn routing_node_count(&self) -> usize {
        self.routing
            .iter()
            .filter_map(|id| self.known.get(*id))
            .filter(|node| node.is_routing())
            .count()
    }

    /// Grows the neighborhood into `range`, the neighborhood advertised by a neighbor.
    ///
    /// Edges stop at shutdown nodes the neighbor didn't confirm, and at available nodes missing
    /// from `available_nodes` when it is given. With `version_matched` the neighbor's view is
    /// known to be based on the current neighborhood, so the range only has to cover the new
    /// part.
    pub fn extend_hood(
        &mut self,
        range: NodeIdRange,
        shutdown_nodes: &HashSet<NodeInstance>,
        available_nodes: Option<&HashSet<NodeInstance>>,
        version_matched: bool,
    ) -> bool {
        let pred_extended =
            self.try_extend_hood(range, shutdown_nodes, available_nodes, version_matched, false);
        let succ_extended =
            self.try_extend_hood(range, shutdown_nodes, available_nodes, version_matched, true);

        if pred_extended || succ_extended {
            self.compact(OffsetDateTime::now_utc());
            self.neighborhood_version += 1;
            debug!(local_id = %self.local_id(), range = %self.hood_range(), "extended neighborhood");
            return true;
        }

        false
    }

    fn try_extend_hood(
        &mut self,
        range: NodeIdRange,
        shutdown_nodes: &HashSet<NodeInstance>,
        available_nodes: Option<&HashSet<NodeInstance>>,
        version_matched: bool,
        succ: bool,
    ) -> bool {
        let is_complete = |known: &NodeRingWithHood| {
            if succ {
                known.is_succ_hood_complete()
            } else {
                known.is_pred_hood_complete()
            }
        };

        if is_complete(&self.known) {
            return false;
        }

        let local_id = self.local_id();
        if !version_matched {
            let hood = if succ {
                self.known.succ_hood()
            } else {
                self.known.pred_hood()
            };

            if let Some(node) = hood
                .iter()
                .find(|node| node.is_shutdown() && !shutdown_nodes.contains(&node.instance()))
            {
                debug!(%local_id, instance = %node.instance(), succ, "unable to extend edge past unconfirmed shutdown node");
                return false;
            }
        }

        let mut extended = false;
        loop {
            let (next, edge) = if succ {
                (self.known.next_succ_edge(), self.known.succ_edge())
            } else {
                (self.known.next_pred_edge(), self.known.pred_edge())
            };
            let (next_id, next_instance) = (next.id(), next.instance());
            let (next_available, next_shutdown) = (next.is_available(), next.is_shutdown());

            if next_id == local_id && !range.is_full() {
                return extended;
            }

            let anchor = if version_matched { edge } else { local_id };
            let covered = if succ {
                NodeIdRange::new(anchor, next_id)
            } else {
                NodeIdRange::new(next_id, anchor)
            };
            if !range.contains_range(&covered) {
                return extended;
            }

            if next_available
                && available_nodes.map_or(false, |nodes| !nodes.contains(&next_instance))
            {
                return extended;
            }

            let moved = if succ {
                self.known.extend_succ_edge()
            } else {
                self.known.extend_pred_edge()
            };
            extended = true;
            if !moved {
                return extended;
            }

            if !version_matched && next_shutdown && !shutdown_nodes.contains(&next_instance) {
                return extended;
            }

            if next_available {
                debug!(%local_id, edge = %next_instance, succ, "extended edge");
            }

            if is_complete(&self.known) {
                return extended;
            }
        }
    }

    /// Applies the federation headers of an inbound message from `from`.
    ///
    /// `is_inserting` is set for messages sent by a node inserting itself next to the local one.
    /// Range, version and token headers are only honored when `instance_matched`, meaning the
    /// message was addressed to the current local instance. A matched message carrying more than
    /// one neighborhood range header or more than two token headers is invalid as a whole.
    #[instrument(level = "debug", skip_all, fields(local_id = %self.local_id(), from = %from))]
    pub fn process_neighbor_headers(
        &mut self,
        headers: &[Header],
        from: NodeInstance,
        is_inserting: bool,
        instance_matched: bool,
    ) -> Result<NeighborHeadersOutcome> {
        if instance_matched {
            let range_count = headers
                .iter()
                .filter(|header| matches!(header, Header::NeighborhoodRange(_)))
                .count();
            if range_count > 1 {
                return Err(Error::DuplicateNeighborhoodRange(from.to_string()));
            }

            let token_count = headers
                .iter()
                .filter(|header| matches!(header, Header::RoutingToken(_)))
                .count();
            if token_count > 2 {
                return Err(Error::TooManyRoutingTokens {
                    from: from.to_string(),
                    count: token_count,
                });
            }
        }

        let now = OffsetDateTime::now_utc();
        let mut outcome = NeighborHeadersOutcome::default();
        let mut shutdown_nodes = HashSet::new();
        let mut available_nodes = HashSet::new();
        let mut neighborhood_range = None;
        let mut version_matched = false;
        let mut incoming_tokens = vec![];
        let mut from_id = None;

        for header in headers {
            match header {
                Header::PartnerNode(node) => {
                    let is_from = node.instance.id == from.id;
                    match self.consider_at(node, is_inserting && is_from, now) {
                        None => outcome.headers_ignored = true,
                        Some(id) if is_from => from_id = Some(id),
                        Some(_) => {}
                    }

                    if node.phase == NodePhase::Shutdown {
                        shutdown_nodes.insert(node.instance);
                    } else if node.phase.is_available() {
                        available_nodes.insert(node.instance);
                    }
                }
                Header::NeighborhoodRange(range) if instance_matched => {
                    neighborhood_range = Some(*range);
                }
                Header::NeighborhoodVersion(version) if instance_matched => {
                    version_matched = *version == self.neighborhood_version;
                }
                Header::RoutingToken(token) if instance_matched => {
                    incoming_tokens.push(*token);
                }
                _ => {}
            }
        }

        if let Some(range) = neighborhood_range {
            if version_matched {
                // The sender saw our current neighborhood: whatever it didn't report in its
                // range is gone.
                let local_id = self.local_id();
                let missing: Vec<NodeInstance> = self
                    .routing
                    .nodes_in_range(&self.known.hood_range())
                    .into_iter()
                    .filter(|id| **id != local_id && range.contains(**id))
                    .filter_map(|id| self.known.get(*id))
                    .map(|node| node.instance())
                    .filter(|instance| !available_nodes.contains(instance))
                    .collect();

                for instance in missing {
                    info!(%instance, %range, "setting to shutdown, not reported in neighbor range");
                    self.set_shutdown(instance);
                }
            }

            self.extend_hood(range, &shutdown_nodes, Some(&available_nodes), version_matched);
        }

        let received_tokens = !incoming_tokens.is_empty();
        if received_tokens {
            let local_id = self.local_id();
            if !self.local_node().is_routing() {
                info!(phase = %self.local_node().phase(), "received token before routing");
            }

            for token in incoming_tokens {
                let old = *self.local_node().token();
                let accepted = match self.known.get_mut(local_id) {
                    Some(local) => local.token_mut().accept(&token, local_id),
                    None => false,
                };

                if accepted {
                    info!(%old, new = %self.local_node().token(), "accepted token");
                } else {
                    info!(%old, incoming = %token.range(), "rejected token");
                    outcome.rejected_tokens.push(token);
                }
            }
        }

        let from_id = from_id.unwrap_or(from.id);
        outcome.from = self.known.get(from_id).cloned();
        if outcome.from.is_none() && received_tokens {
            warn!("token sender is not in the routing table anymore");
        }

        Ok(outcome)
    }

    /// The federation headers to attach to an outbound message.
    ///
    /// The local node always comes first. Unless it is shut down, the neighborhood members follow,
    /// then the neighborhood range if it is consistent. `echo_version` is the neighborhood version
    /// the peer sent, echoed back so it can tell whether its neighborhood moved in between;
    /// without it the local version is advertised.
    pub fn add_neighbor_headers(&self, echo_version: Option<u64>) -> Vec<Header> {
        let local = self.local_node();
        let mut headers = vec![Header::PartnerNode(local.header())];

        if !local.is_shutdown() {
            headers.extend(
                self.known
                    .get_hood()
                    .into_iter()
                    .map(|node| Header::PartnerNode(node.header())),
            );

            if self.is_range_consistent {
                headers.push(Header::NeighborhoodRange(self.hood_range()));
            }
        }

        headers.push(Header::NeighborhoodVersion(
            echo_version.unwrap_or(self.neighborhood_version),
        ));

        headers
    }

    /// Cedes part of the local token to a neighbor, returning the transfers to send it.
    pub fn try_split_token(&mut self, neighbor: NodeId) -> Vec<RoutingTokenHeader> {
        let local_id = self.local_id();
        let neighbor_token = match self.known.get(neighbor) {
            Some(node) if neighbor != local_id => *node.token(),
            _ => return vec![],
        };

        let old = *self.local_node().token();
        let transfers = match self.known.get_mut(local_id) {
            Some(local) => local.token_mut().split(local_id, neighbor, &neighbor_token),
            None => return vec![],
        };

        if !transfers.is_empty() {
            info!(%local_id, %old, new = %self.local_node().token(), %neighbor, "split token");
        }

        transfers
    }

    /// Releases the local token to `partner` if it is the routing predecessor or successor.
    pub fn try_release_token(&mut self, partner: NodeId) -> Vec<RoutingTokenHeader> {
        let local_id = self.local_id();
        let (pred, succ) = match (self.predecessor(), self.successor()) {
            (Some(pred), Some(succ)) => (
                (pred.id(), pred.token().version()),
                (succ.id(), succ.token().version()),
            ),
            _ => return vec![],
        };

        let Some(local) = self.known.get_mut(local_id) else {
            return vec![];
        };

        let mut released = vec![];
        if partner == succ.0 {
            released.extend(local.token_mut().release_succ_token(pred.0, succ.0, succ.1));
        }

        if partner == pred.0 {
            released.extend(local.token_mut().release_pred_token(pred.0, succ.0, pred.1));
        }

        for token in &released {
            info!(%local_id, range = %token.range(), %partner, "releasing token");
        }

        released
    }

    /// Hands the local token over to the routing neighbors before leaving.
    ///
    /// Returns the routing members of the neighborhood with the token transfers addressed to
    /// each. The local token is empty afterwards.
    pub fn create_depart_headers(&mut self) -> Vec<(NodeInstance, Vec<RoutingTokenHeader>)> {
        let targets: Vec<NodeInstance> = self
            .known
            .get_hood()
            .into_iter()
            .filter(|node| node.is_routing())
            .map(|node| node.instance())
            .collect();

        let departs = targets
            .into_iter()
            .map(|target| (target, self.try_release_token(target.id)))
            .collect();

        if !self.local_node().token().is_empty() {
            self.update_local(|local| local.token_mut().set_empty());
        }

        departs
    }

    /// The neighborhood range, widened by the tokens of the edge nodes that overlap it.
    pub fn combined_hood_token_range(&self) -> NodeIdRange {
        let mut result = self.known.hood_range();

        for edge in [self.known.pred_edge(), self.known.succ_edge()] {
            if let Some(node) = self.known.get(edge) {
                let range = node.token().range();
                if node.is_available() && !range.is_empty() && !range.disjoint(&result) {
                    if let Some(merged) = result.merge(&range) {
                        result = merged;
                    }
                }
            }
        }

        result
    }

    /// Drops nodes that are no longer worth remembering, returning how many were removed.
    ///
    /// Available nodes outside the neighborhood go once they haven't been considered for a
    /// neighborhood exchange interval. Shutdown nodes that weren't heard of for that long go
    /// when the capacity is exceeded, or when the neighborhood is overpopulated for those inside
    /// it. Runs at most once per compact interval unless a bound is exceeded.
    #[instrument(level = "debug", skip_all, fields(local_id = %self.local_id()))]
    pub fn compact(&mut self, now: OffsetDateTime) -> usize {
        let capacity_exceeded = self.known.len() > self.config.routing_table_capacity;
        let remove_down_neighbor = capacity_exceeded
            || self.known.get_hood().len() > self.config.max_nodes_to_keep_in_neighborhood;

        if !capacity_exceeded
            && !remove_down_neighbor
            && now < self.last_compact + self.config.compact_interval
        {
            return 0;
        }

        self.last_compact = now;
        debug!(
            routing = self.routing.len(),
            known = self.known.len(),
            "compacting"
        );

        let time_bound = now - self.config.neighborhood_exchange_interval;
        let hood_range = self.known.hood_range();
        let mut dropped_available = vec![];

        let removed = self.known.retain(|node| {
            let in_hood = hood_range.contains(node.id());
            let remove = if node.is_available() {
                !in_hood && node.last_consider() < time_bound
            } else {
                node.last_access() < time_bound
                    && if in_hood {
                        remove_down_neighbor
                    } else {
                        capacity_exceeded
                    }
            };

            if remove {
                debug!(node = %node, "removing");
                if node.is_available() {
                    dropped_available.push(node.id());
                }
            }

            !remove
        });

        for id in dropped_available {
            self.routing.remove_node(id);
        }

        debug_assert!(self.verify_consistency());
        removed
    }

    /// Drops the shutdown nodes outside the neighborhood, returning how many were removed.
    pub fn test_compact(&mut self) -> usize {
        if self.known.is_complete() {
            return 0;
        }

        let range = self.known.hood_range();
        let removed = self
            .known
            .retain(|node| !(node.is_shutdown() && !range.contains(node.id())));

        debug!(local_id = %self.local_id(), removed, "compacted shutdown nodes");
        removed
    }

    /// Splits `range` among routing nodes for a broadcast.
    ///
    /// The part already covered locally (the neighborhood if `exclude_neighborhood`, otherwise
    /// the gap up to the routing neighbors plus the local token) is excluded and returned first.
    /// The rest is split into at most `broadcast_propagation_factor` sub-ranges, each paired
    /// with the node in its middle.
    pub fn partition_ranges(
        &self,
        range: NodeIdRange,
        exclude_neighborhood: bool,
    ) -> (NodeIdRange, Vec<(&PartnerNode, NodeIdRange)>) {
        let excluded = if exclude_neighborhood {
            self.known.hood_range()
        } else if self.routing.len() == 1 {
            NodeIdRange::FULL
        } else {
            match (self.predecessor(), self.successor()) {
                (Some(pred), Some(succ)) => {
                    let gap = NodeIdRange::new(
                        pred.id() + LargeInteger::ONE,
                        succ.id() - LargeInteger::ONE,
                    );
                    gap.merge(&self.local_node().token().range())
                        .unwrap_or(gap)
                }
                _ => NodeIdRange::FULL,
            }
        };

        let (first, second) = range.subtract(&excluded);
        let ids_in = |sub_range: &NodeIdRange| -> Vec<NodeId> {
            self.routing
                .nodes_in_range(sub_range)
                .into_iter()
                .copied()
                .collect()
        };
        let (first_ids, second_ids) = (ids_in(&first), ids_in(&second));

        let node_count = first_ids.len() + second_ids.len();
        if node_count == 0 {
            return (excluded, vec![]);
        }

        let factor = self.config.broadcast_propagation_factor;
        let (first_count, second_count) = if node_count > factor {
            let mut first_count =
                (factor as f64 * first_ids.len() as f64 / node_count as f64 + 0.5).floor() as usize;
            let mut second_count = factor - first_count;
            if first_count == 0 && !first_ids.is_empty() {
                first_count = 1;
                second_count = factor - 1;
            } else if second_count == 0 && !second_ids.is_empty() {
                first_count = factor - 1;
                second_count = 1;
            }
            (first_count, second_count)
        } else {
            (first_ids.len(), second_ids.len())
        };

        let mut parts = vec![];
        let groups = [
            (first, first_ids, first_count),
            (second, second_ids, second_count),
        ];
        for (sub_range, ids, count) in groups {
            for (id, sub) in partition(sub_range, &ids, count) {
                if let Some(node) = self.known.get(id) {
                    parts.push((node, sub));
                }
            }
        }

        (excluded, parts)
    }

    /// Answers a liveness query about `target`.
    ///
    /// A node claiming an id inside the local token can't be alive unless it is the local
    /// instance itself: it is marked as shut down and `false` returned.
    pub fn check_liveness(&mut self, target: &PartnerNodeHeader) -> bool {
        let local = self.local_node();
        if local.token().contains(target.instance.id) && local.instance() != target.instance {
            info!(local_id = %self.local_id(), instance = %target.instance, "setting to shutdown, inside local token");
            self.consider_at(
                &target.with_phase(NodePhase::Shutdown),
                false,
                OffsetDateTime::now_utc(),
            );
            return false;
        }

        true
    }

    /// Checks that both rings and the neighborhood agree with each other.
    pub fn verify_consistency(&self) -> bool {
        let local_id = self.local_id();
        if !self.known.verify_consistency() || !self.routing.contains(local_id) {
            return false;
        }

        let routing_known = self.routing.iter().all(|id| {
            self.known
                .get(*id)
                .map_or(false, |node| *id == local_id || node.is_available())
        });

        let available_routed = self
            .known
            .iter()
            .filter(|node| node.is_available())
            .all(|node| self.routing.contains(node.id()));

        routing_known && available_routed
    }
}

// Splits `range` into `count` consecutive sub-ranges over the sorted `ids` it contains.
fn partition(range: NodeIdRange, ids: &[NodeId], count: usize) -> Vec<(NodeId, NodeIdRange)> {
    let mut parts = vec![];
    if count == 0 || ids.is_empty() {
        return parts;
    }

    let mut start = 0;
    let mut sub_begin = range.begin();
    for i in 0..count {
        let mut sub_count = ids.len() / count;
        if i < ids.len() % count {
            sub_count += 1;
        }

        let next = start + sub_count;
        let sub_end = if i + 1 < count && next < ids.len() {
            ids[next - 1].succ_mid_point(ids[next])
        } else {
            range.end()
        };

        if sub_count > 0 {
            parts.push((ids[start + sub_count / 2], NodeIdRange::new(sub_begin, sub_end)));
        }

        start = next;
        sub_begin = sub_end + LargeInteger::ONE;
    }

    parts
}
