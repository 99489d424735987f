//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Market data feed WebSocket client.
pub mod feed;

/// Message broker subscription and fan-out loop.
pub mod broker;

/// Client session registry and broadcast.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// HTTP server: price queries and client WebSockets.
pub mod http;

/// Health check endpoints.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
