//! # Hub Library
//!
//! Bridges asynchronous backend events to live WebSocket connections.
//!
//! Backends push JSON envelopes onto a Redis list; the relay loop drains the
//! list and forwards each envelope to the connection named by its `boa-conn`
//! field. The same process accepts the WebSocket upgrades that populate the
//! connection registry, forwards `/api` traffic upstream and serves static
//! content.

// Declare the modules to re-export
pub mod configs;
pub mod connections;
pub mod core;
pub mod error;
pub mod loggers;
pub mod web;

// Re-export the types every binary needs
pub use crate::core::{
    Connection, ConnectionRegistry, ConnectionRole, DispatchOutcome, Envelope, MemoryQueue,
    MessageQueue, RelayLoop, RelayStats,
};
pub use configs::config_hub::{load_config, HubConfig};
pub use connections::{BackoffPolicy, BrokerHealth, RedisQueue};
pub use error::HubError;
pub use web::{build_router, ApiForwarder, HubState};
