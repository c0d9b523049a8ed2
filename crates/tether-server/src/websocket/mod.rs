//! WebSocket handshake, connection state, keepalive, and session lifecycle.

pub mod connection;
pub mod handshake;
pub mod keepalive;
pub mod session;
