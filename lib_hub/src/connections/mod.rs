//! # Connections Module
//!
//! This module handles the persistent connection to the broker that feeds the
//! relay loop, together with the retry policy and health state around it.

/// Exponential reconnect delays.
pub mod backoff;

/// Observable broker connection state.
pub mod broker_health;

/// Module for the Redis list used as the relay queue.
pub mod queue_redis;

pub use backoff::{Backoff, BackoffPolicy};
pub use broker_health::BrokerHealth;
pub use queue_redis::RedisQueue;
