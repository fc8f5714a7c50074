//! Broker connection state, published on a `watch` channel so the health
//! endpoint can report it without touching the queue.

use serde::Serialize;

/// Where the broker connection currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BrokerHealth {
    /// First connection attempt in progress.
    Connecting,
    /// Connected and consuming.
    Connected,
    /// Connection lost; waiting `retry_in_ms` before attempt number `attempt`.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next attempt.
        retry_in_ms: u64,
        /// Last error seen.
        last_error: String,
    },
    /// Retries exhausted; the queue will not reconnect on its own.
    Unavailable {
        /// Last error seen.
        last_error: String,
    },
}

impl BrokerHealth {
    /// True while items can be consumed.
    pub fn is_connected(&self) -> bool {
        matches!(self, BrokerHealth::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_state_tag() {
        let value = serde_json::to_value(BrokerHealth::Reconnecting {
            attempt: 3,
            retry_in_ms: 4000,
            last_error: "refused".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"state": "reconnecting", "attempt": 3, "retry_in_ms": 4000, "last_error": "refused"})
        );
        assert_eq!(
            serde_json::to_value(BrokerHealth::Connected).unwrap(),
            json!({"state": "connected"})
        );
    }
}
