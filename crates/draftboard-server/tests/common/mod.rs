use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use draftboard_core::{Game, Side};
use draftboard_server::router;
use draftboard_server::config::ServerConfig;
use draftboard_server::state::{AppState, SharedStore};
use draftboard_server::store::MemoryStore;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server backed by an in-memory store.
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: SharedStore) -> Self {
        Self::from_config(ServerConfig::default(), store).await
    }

    pub async fn from_config(config: ServerConfig, store: SharedStore) -> Self {
        Self::from_state(AppState::new(config, store)).await
    }

    /// Start a test server over a prepared state, e.g. one with seeded ids.
    pub async fn from_state(state: AppState) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _server: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, game_id: &str) -> String {
        format!("ws://{}/websocket/{game_id}", self.addr)
    }

    /// Create a game over HTTP and return it.
    pub async fn create_game(&self, created_by: Side) -> Game {
        let resp = reqwest::Client::new()
            .post(format!("{}/create", self.base_url()))
            .json(&serde_json::json!({ "createdBy": i8::from(created_by) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        resp.json().await.unwrap()
    }

    /// Poll until the game's hub reports `n` registered connections.
    pub async fn wait_for_connections(&self, game_id: &str, n: usize) {
        let directory = Arc::clone(&self.state.directory);
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let count = directory.get(game_id).map_or(0, |hub| hub.connection_count());
                if count == n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {n} connections on {game_id}"));
    }

    /// Poll until the game has no live hub.
    pub async fn wait_for_no_hub(&self, game_id: &str) {
        let directory = Arc::clone(&self.state.directory);
        tokio::time::timeout(Duration::from_secs(5), async {
            while directory.get(game_id).is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Hub for {game_id} never terminated"));
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Read the next text frame (5s timeout).
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next data frame, returning None if nothing arrives in time.
pub async fn ws_try_read(stream: &mut WsStream, timeout_ms: u64) -> Option<Message> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => return msg,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

pub fn white_draft() -> serde_json::Value {
    serde_json::json!([[1, 1, 1, 1, 1, 1, 1, 1], [4, 2, 3, 5, 6, 3, 2, 4]])
}

pub fn black_draft() -> serde_json::Value {
    serde_json::json!([[-1, -1, -1, -1, -1, -1, -1, -1], [-4, -2, -3, -6, -5, -3, -2, -4]])
}
