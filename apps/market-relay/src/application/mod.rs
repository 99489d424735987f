//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port interfaces the data plane depends on and
//! the service that supervises the background loops.

/// Port interfaces for external systems (broker, background loops).
pub mod ports;

/// Application services (startup supervision).
pub mod services;
