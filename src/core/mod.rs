//! Foundational and often-reused types.

pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod hood;
pub(crate) mod id;
pub mod message;
pub(crate) mod partner;
pub(crate) mod range;
pub(crate) mod ring;
pub(crate) mod token;
