//! # tether-core
//!
//! Foundation types shared by the tether server, client, and agent binary.
//!
//! - **Envelopes**: [`Envelope`] and [`EnvelopeKind`], the JSON unit exchanged
//!   over the duplex channel
//! - **Methods**: [`McpMethod`], the finite set of request methods the router
//!   understands
//! - **Capabilities**: the [`CapabilityProvider`] boundary plus an in-memory
//!   [`CapabilityRegistry`]
//! - **Identity**: [`Identity`] decoded from a verified credential
//! - **Errors**: [`McpError`] and [`CapabilityError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack

#![deny(unsafe_code)]

pub mod capabilities;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod method;

pub use capabilities::{
    CapabilityProvider, CapabilityRegistry, ResourceContents, ResourceHandler, ResourceInfo,
    ToolCallResult, ToolContent, ToolHandler, ToolInfo,
};
pub use envelope::{Envelope, EnvelopeKind, PING_ID, UNKNOWN_ID, WELCOME_ID};
pub use errors::{CapabilityError, McpError};
pub use identity::{ConnectionKey, Identity};
pub use method::McpMethod;
