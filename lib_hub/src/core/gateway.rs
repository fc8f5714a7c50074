//! # Connection Gateway
//!
//! Turns upgrade requests into registered connections.
//!
//! The last non-empty path segment of the request is the connection id. A
//! request whose path contains `publisher` registers under `publisher/<id>`.
//! An empty id, or the literal `undefined` sent by clients that lost their id,
//! gets the socket terminated right after the handshake without touching the
//! registry.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::envelope::Acknowledgement;
use crate::core::registry::{Connection, ConnectionRegistry, ConnectionRole};
use crate::error::HubError;

const PUBLISHER_MARKER: &str = "publisher";
const UNSET_ID: &str = "undefined";

/// Derives the registry key and role from an upgrade request path.
///
/// The query string is not part of `path`; callers pass `Uri::path()`. A
/// `publisher` marker that only appears in the query does not namespace the id.
///
/// # Errors
/// `HubError::InvalidConnectionId` when no usable id can be derived.
pub fn derive_connection_id(path: &str) -> Result<(String, ConnectionRole), HubError> {
    let candidate = path.split('/').filter(|segment| !segment.is_empty()).next_back();

    let id = match candidate {
        Some(id) if id != UNSET_ID => id,
        _ => return Err(HubError::InvalidConnectionId(path.to_string())),
    };

    if path.contains(PUBLISHER_MARKER) {
        Ok((format!("{PUBLISHER_MARKER}/{id}"), ConnectionRole::Publisher))
    } else {
        Ok((id.to_string(), ConnectionRole::Subscriber))
    }
}

/// Completes the handshake for `path` and hands the socket to a session.
pub fn accept(
    ws: WebSocketUpgrade,
    path: &str,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) -> Response {
    match derive_connection_id(path) {
        Ok((id, role)) => {
            ws.on_upgrade(move |socket| run_session(socket, id, role, registry, shutdown))
        }
        Err(e) => {
            tracing::error!(error = %e, "Socket request is invalid, terminating");
            ws.on_upgrade(|socket| async move {
                // Dropping the socket without a close frame terminates the connection.
                drop(socket);
            })
        }
    }
}

/// Drives one registered connection until the client leaves, a newer connect
/// supersedes it, or the server shuts down.
pub async fn run_session(
    socket: WebSocket,
    id: String,
    role: ConnectionRole,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) {
    let (tx, mut outbound) = mpsc::unbounded_channel::<String>();
    let closer = shutdown.child_token();
    let connection = Connection::new(id.clone(), role, tx, closer.clone());
    let seq = connection.seq();

    // Queue the acknowledgement before the connection becomes visible to the
    // relay so it is always the first frame on the wire.
    match Acknowledgement::new(id.clone()).to_frame() {
        Ok(frame) => {
            let _ = connection.send(frame);
        }
        Err(e) => tracing::error!(conn_id = %id, error = %e, "Failed to encode acknowledgement"),
    }

    if let Some(previous) = registry.register(connection) {
        tracing::info!(conn_id = %id, previous_seq = previous.seq(), "Closing superseded connection");
        previous.close();
    }
    tracing::info!(conn_id = %id, %role, live = ?registry.ids(), "Connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = closer.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!(conn_id = %id, error = %e, "Socket write failed");
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => log_inbound(&id, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::debug!(conn_id = %id, bytes = bytes.len(), "Received binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %id, error = %e, "Socket read failed");
                        break;
                    }
                }
            }
        }
    }

    if registry.release(&id, seq) {
        tracing::info!(conn_id = %id, "Deleted");
    } else {
        tracing::debug!(conn_id = %id, "Session ended after its entry was replaced");
    }
}

/// Inbound client frames are only observed; nothing is routed from this side.
fn log_inbound(id: &str, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(_) => tracing::info!(conn_id = %id, message = text, "Received from client"),
        Err(e) => tracing::warn!(conn_id = %id, error = %e, message = text, "Client sent non-JSON frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_non_empty_segment_is_the_id() {
        assert_eq!(
            derive_connection_id("/abc123").unwrap(),
            ("abc123".to_string(), ConnectionRole::Subscriber)
        );
        assert_eq!(
            derive_connection_id("/hub/customer/abc123/").unwrap(),
            ("abc123".to_string(), ConnectionRole::Subscriber)
        );
        assert_eq!(
            derive_connection_id("//x//y//").unwrap(),
            ("y".to_string(), ConnectionRole::Subscriber)
        );
    }

    #[test]
    fn publisher_paths_are_namespaced() {
        assert_eq!(
            derive_connection_id("/publisher/pub1").unwrap(),
            ("publisher/pub1".to_string(), ConnectionRole::Publisher)
        );
        assert_eq!(
            derive_connection_id("/ws/my-publishers/pub1").unwrap(),
            ("publisher/pub1".to_string(), ConnectionRole::Publisher)
        );
    }

    #[test]
    fn empty_or_unset_ids_are_rejected() {
        for path in ["", "/", "///", "/undefined", "/publisher/undefined/"] {
            assert!(
                matches!(derive_connection_id(path), Err(HubError::InvalidConnectionId(_))),
                "path {path:?} should be rejected"
            );
        }
    }
}
