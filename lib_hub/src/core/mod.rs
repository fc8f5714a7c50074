//! # Core Relay Module
//!
//! This module forms the heart of the hub: everything needed to move an
//! envelope from the broker queue onto the right live connection.
//!
//! ## Core Components:
//!
//! - **`registry`**: The authoritative `connection id -> Connection` map.
//!   At most one live connection per id; a later connect replaces the earlier
//!   one.
//!
//! - **`envelope`**: The unit of relay traffic. A mandatory `boa-conn` target
//!   plus an opaque JSON payload, validated at decode time.
//!
//! - **`queue`**: The `MessageQueue` seam the relay blocks on, with an
//!   in-memory implementation for tests and local runs.
//!
//! - **`relay`**: The perpetual dequeue -> decode -> lookup -> deliver loop,
//!   stoppable through a `CancellationToken`.
//!
//! - **`gateway`**: Upgrade handling. Derives the connection id from the
//!   request path, registers the connection, acknowledges it and unregisters
//!   it on close.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The in-memory connection registry.
pub mod registry;
/// Relay envelope decoding and encoding.
pub mod envelope;
/// The queue abstraction consumed by the relay loop.
pub mod queue;
/// The queue-driven relay loop.
pub mod relay;
/// WebSocket upgrade handling and per-connection sessions.
pub mod gateway;

// --- Public API Re-exports ---
pub use envelope::{Acknowledgement, Envelope, TARGET_FIELD};
pub use gateway::derive_connection_id;
pub use queue::{MemoryPublisher, MemoryQueue, MessageQueue};
pub use registry::{Connection, ConnectionRegistry, ConnectionRole};
pub use relay::{DispatchOutcome, RelayCounters, RelayLoop, RelayStats};
