//! Routing table configuration.

use std::time::Duration;

use crate::core::error::{Error, Result};

/// Tunables of the routing table, passed in at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationConfig {
    /// The number of available nodes kept on each side of the local node.
    pub neighborhood_size: usize,
    /// The number of known nodes above which compaction drops shutdown nodes.
    pub routing_table_capacity: usize,
    /// The neighborhood population above which compaction drops shutdown neighbors.
    pub max_nodes_to_keep_in_neighborhood: usize,
    /// Minimum delay between two compactions.
    pub compact_interval: Duration,
    /// Nodes outside the neighborhood that weren't heard of for this long can be dropped.
    pub neighborhood_exchange_interval: Duration,
    /// The number of sub-ranges produced when partitioning a range for a broadcast.
    pub broadcast_propagation_factor: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            neighborhood_size: 4,
            routing_table_capacity: 1000,
            max_nodes_to_keep_in_neighborhood: 20,
            compact_interval: Duration::from_secs(60),
            neighborhood_exchange_interval: Duration::from_secs(4),
            broadcast_propagation_factor: 4,
        }
    }
}

impl FederationConfig {
    /// Same as the default, with a different neighborhood size.
    pub fn with_neighborhood_size(neighborhood_size: usize) -> Self {
        Self {
            neighborhood_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.neighborhood_size == 0 {
            return Err(Error::InvalidConfig("neighborhood_size must be at least 1"));
        }

        if self.routing_table_capacity < self.neighborhood_size * 2 + 1 {
            return Err(Error::InvalidConfig(
                "routing_table_capacity must hold the whole neighborhood",
            ));
        }

        if self.broadcast_propagation_factor == 0 {
            return Err(Error::InvalidConfig(
                "broadcast_propagation_factor must be at least 1",
            ));
        }

        Ok(())
    }
}
