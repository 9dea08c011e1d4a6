//! Crate error types.

use thiserror::Error;

/// Result type alias for fallible federation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the routing core.
///
/// Stale or duplicate gossip is not an error: it is absorbed by the table. Only malformed input
/// and invalid configuration are reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid node id {0:?}: expected 1 to 32 hex digits")]
    InvalidNodeId(String),
    #[error("more than one neighborhood range header in a message from {0}")]
    DuplicateNeighborhoodRange(String),
    #[error("{count} routing token headers in a message from {from}, at most 2 are allowed")]
    TooManyRoutingTokens { from: String, count: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
