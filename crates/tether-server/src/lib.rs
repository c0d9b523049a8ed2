//! # tether-server
//!
//! Axum HTTP + `WebSocket` server exposing capabilities to authenticated
//! clients.
//!
//! - Auth gate: credential from query, `Authorization` header, or cookie,
//!   verified before the connection is registered
//! - [`registry::ConnectionRegistry`]: the single serialization point for
//!   connection membership
//! - [`router::McpRouter`]: exhaustive dispatch of request envelopes, one
//!   task per request, so completions may be out of order
//! - Keepalive pings per connection, stopped as soon as it closes
//! - `/health`, `/metrics`, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;
