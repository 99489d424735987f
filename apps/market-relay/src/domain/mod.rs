//! Domain Layer - Core data-plane types.
//!
//! This layer contains the price table and the upstream link state
//! machine. Nothing here performs I/O.

/// Latest-price cache and tick types.
pub mod pricing;

/// Upstream link state tracking.
pub mod streaming;
