//! # Hub Test Harness
//!
//! Starts the full hub router on an ephemeral port with an in-memory queue so
//! integration tests can drive it with real WebSocket and HTTP clients.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use lib_hub::core::MemoryPublisher;
use lib_hub::{
    build_router, ApiForwarder, BrokerHealth, ConnectionRegistry, HubState, MemoryQueue, RelayLoop,
    RelayStats,
};

/// Client side of a hub WebSocket.
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound for any single wait in a test.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

/// Body of the static `index.html` fixture.
pub const INDEX_HTML: &str = "<html><body>hub</body></html>";
/// Body of the static `images/logo.txt` fixture.
pub const LOGO_TXT: &str = "logo-bytes";

/// A running hub wired to an in-memory queue.
pub struct TestHub {
    pub addr: SocketAddr,
    pub registry: ConnectionRegistry,
    pub stats: Arc<RelayStats>,
    pub publisher: MemoryPublisher,
    pub shutdown: CancellationToken,
    pub server: JoinHandle<()>,
    pub relay: JoinHandle<()>,
    _root: TempDir,
}

impl TestHub {
    /// Hub whose `/api` upstream refuses every connection.
    pub async fn start() -> TestHub {
        Self::start_with_upstream("127.0.0.1:1").await
    }

    /// Hub forwarding `/api/*` to `proxy_url`.
    pub async fn start_with_upstream(proxy_url: &str) -> TestHub {
        let root = tempfile::tempdir().expect("temp root");
        std::fs::write(root.path().join("index.html"), INDEX_HTML).expect("index fixture");
        std::fs::create_dir(root.path().join("images")).expect("images dir");
        std::fs::write(root.path().join("images").join("logo.txt"), LOGO_TXT)
            .expect("image fixture");

        let shutdown = CancellationToken::new();
        let registry = ConnectionRegistry::new();
        let stats = Arc::new(RelayStats::new());
        let queue = MemoryQueue::new();
        let publisher = queue.publisher();
        let (_health_tx, health) = watch::channel(BrokerHealth::Connected);

        let relay = tokio::spawn(
            RelayLoop::new(queue, registry.clone(), stats.clone(), shutdown.clone()).run(),
        );

        let state = HubState {
            registry: registry.clone(),
            stats: stats.clone(),
            health,
            forwarder: ApiForwarder::new(proxy_url).expect("proxy url"),
            shutdown: shutdown.clone(),
        };
        let app = build_router(state, root.path());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await;
        });

        TestHub {
            addr,
            registry,
            stats,
            publisher,
            shutdown,
            server,
            relay,
            _root: root,
        }
    }

    /// `ws://` URL for `path`.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// `http://` URL for `path`.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Opens a WebSocket on `path`.
    pub async fn connect(&self, path: &str) -> WsClient {
        let (ws, _) = tokio::time::timeout(STEP_TIMEOUT, connect_async(self.ws_url(path)))
            .await
            .expect("handshake timed out")
            .expect("handshake failed");
        ws
    }

    /// Opens a WebSocket on `path` and consumes the acknowledgement.
    pub async fn connect_acked(&self, path: &str) -> (WsClient, serde_json::Value) {
        let mut ws = self.connect(path).await;
        let ack = next_text(&mut ws).await;
        let ack = serde_json::from_str(&ack).expect("ack is JSON");
        (ws, ack)
    }

    /// Pushes a raw item as a backend publisher would.
    pub fn publish(&self, raw: impl Into<String>) {
        self.publisher.publish(raw);
    }

    /// Cancels the shared token and waits for the server and relay to stop.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.registry.close_all();
        tokio::time::timeout(STEP_TIMEOUT, self.relay)
            .await
            .expect("relay stops")
            .expect("relay task");
        tokio::time::timeout(STEP_TIMEOUT, self.server)
            .await
            .expect("server stops")
            .expect("server task");
    }
}

/// Next text frame, skipping pings and pongs.
pub async fn next_text(ws: &mut WsClient) -> String {
    loop {
        let frame = tokio::time::timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("no frame in time")
            .expect("stream ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// True if no text frame arrives within `window`.
pub async fn stays_quiet(ws: &mut WsClient, window: Duration) -> bool {
    match tokio::time::timeout(window, ws.next()).await {
        Err(_) => true,
        Ok(Some(Ok(Message::Text(_)))) => false,
        Ok(_) => true,
    }
}

/// Polls `check` until it holds or `STEP_TIMEOUT` elapses.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
