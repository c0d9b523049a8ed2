//! # tether-client
//!
//! Client side of the tether protocol.
//!
//! - [`correlation::Correlator`]: tags each request with a fresh `req_<n>`
//!   id and resolves it from the matching terminal envelope, or times out
//! - [`pending::PendingRequests`]: the id → waiter table behind it
//! - [`state`]: the pure reconnect state machine
//! - [`reconnect::ReconnectSupervisor`]: applies it, owning the single
//!   reconnect timer
//! - [`session::ClientSession`]: a `tokio-tungstenite` connection driven by
//!   all of the above

#![deny(unsafe_code)]

pub mod config;
pub mod correlation;
pub mod errors;
pub mod pending;
pub mod reconnect;
pub mod session;
pub mod state;

pub use config::ClientConfig;
pub use correlation::{Correlator, InboundEvent, OutboundChannel};
pub use errors::ClientError;
pub use session::ClientSession;
pub use state::{Action, ConnectionEvent, ConnectionState};
