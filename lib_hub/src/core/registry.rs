//! # Connection Registry
//!
//! Maps connection ids to live connections. The gateway writes on connect and
//! close, the relay loop reads on dispatch. All access goes through a single
//! mutex so registry operations form one total order across worker threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;

static NEXT_CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Whether a connection was opened by a browser client or a backend publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// Regular client connection; the id is used as-is.
    Subscriber,
    /// Connection opened under a `publisher` path; the id carries a `publisher/` prefix.
    Publisher,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Subscriber => f.write_str("subscriber"),
            ConnectionRole::Publisher => f.write_str("publisher"),
        }
    }
}

/// # Connection
///
/// A handle to one live WebSocket session. Cloning the handle is cheap; every
/// clone feeds the same outbound channel, which the session task drains onto
/// the socket.
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    role: ConnectionRole,
    seq: u64,
    sender: mpsc::UnboundedSender<String>,
    closer: CancellationToken,
}

impl Connection {
    /// Creates a handle around the session's outbound channel and close token.
    pub fn new(
        id: impl Into<String>,
        role: ConnectionRole,
        sender: mpsc::UnboundedSender<String>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            seq: NEXT_CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed),
            sender,
            closer,
        }
    }

    /// The registry key of this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The role derived from the upgrade path.
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Process-unique sequence number distinguishing reconnects under the same id.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Queues a text frame for the session to write.
    ///
    /// # Errors
    /// Returns `HubError::ConnectionClosed` once the session has ended.
    pub fn send(&self, frame: String) -> Result<(), HubError> {
        self.sender
            .send(frame)
            .map_err(|_| HubError::ConnectionClosed(self.id.clone()))
    }

    /// Asks the session to send a close frame and end.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// True once `close` was called or the server is shutting down.
    pub fn is_closing(&self) -> bool {
        self.closer.is_cancelled()
    }
}

/// # Connection Registry
///
/// Cloneable handle to the shared `id -> Connection` map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<String, Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        // Every critical section is a single insert/remove/get, so a panic
        // elsewhere cannot leave the map half-updated.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or overwrites the mapping for the connection's id.
    ///
    /// Returns the superseded connection, if any. The registry does not close
    /// it; that decision belongs to the caller.
    pub fn register(&self, connection: Connection) -> Option<Connection> {
        let mut entries = self.entries();
        entries.insert(connection.id.clone(), connection)
    }

    /// Looks up the live connection for `id`.
    pub fn lookup(&self, id: &str) -> Option<Connection> {
        self.entries().get(id).cloned()
    }

    /// Removes the mapping for `id` if present.
    pub fn unregister(&self, id: &str) -> Option<Connection> {
        self.entries().remove(id)
    }

    /// Removes the mapping for `id` only while it still belongs to the
    /// connection numbered `seq`.
    ///
    /// A session that was superseded by a newer connect under the same id
    /// must not remove its successor's entry when it closes.
    pub fn release(&self, id: &str, seq: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(current) if current.seq == seq => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Sorted snapshot of the registered ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Closes and removes every connection. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Connection> = self.entries().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.close();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: &str) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Connection::new(id, ConnectionRole::Subscriber, tx, CancellationToken::new()),
            rx,
        )
    }

    #[test]
    fn lookup_returns_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("abc123");
        assert!(registry.register(conn).is_none());

        let found = registry.lookup("abc123").expect("registered");
        assert_eq!(found.id(), "abc123");
        assert_eq!(found.role(), ConnectionRole::Subscriber);
        assert!(registry.lookup("other").is_none());
    }

    #[test]
    fn second_register_wins_and_returns_previous() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connection("dup");
        let (second, mut rx2) = connection("dup");
        let first_seq = first.seq();
        let second_seq = second.seq();

        registry.register(first);
        let previous = registry.register(second).expect("superseded entry");

        assert_eq!(previous.seq(), first_seq);
        assert!(!previous.is_closing(), "registry must not close the old handle");
        assert_eq!(registry.len(), 1);

        let current = registry.lookup("dup").expect("entry");
        assert_eq!(current.seq(), second_seq);
        current.send("ping".to_string()).expect("open");
        assert_eq!(rx2.try_recv().expect("frame"), "ping");
    }

    #[test]
    fn unregister_is_noop_when_absent() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister("missing").is_none());

        let (conn, _rx) = connection("gone");
        registry.register(conn);
        assert!(registry.unregister("gone").is_some());
        assert!(registry.lookup("gone").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn release_only_removes_the_owning_connection() {
        let registry = ConnectionRegistry::new();
        let (old, _rx1) = connection("same");
        let (new, _rx2) = connection("same");
        let old_seq = old.seq();
        let new_seq = new.seq();
        registry.register(old);
        registry.register(new);

        assert!(!registry.release("same", old_seq));
        assert_eq!(registry.lookup("same").map(|c| c.seq()), Some(new_seq));

        assert!(registry.release("same", new_seq));
        assert!(registry.lookup("same").is_none());
    }

    #[test]
    fn send_fails_after_receiver_dropped() {
        let (conn, rx) = connection("closed");
        drop(rx);
        let err = conn.send("late".to_string()).unwrap_err();
        assert!(matches!(err, HubError::ConnectionClosed(id) if id == "closed"));
    }

    #[test]
    fn close_all_cancels_every_connection() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = connection("a");
        let (b, _rb) = connection("b");
        let a_handle = a.clone();
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.close_all(), 2);
        assert!(a_handle.is_closing());
        assert!(registry.is_empty());
    }
}
