use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::{Mutex, broadcast, oneshot};

/// How the mock answers a trigger request.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with `{"status":"started"}`.
    Started,
    Status(u16),
    /// 200 with a body that is not JSON.
    NotJson,
    /// Never answers.
    Hang,
}

/// A trigger request as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub path: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
enum PushCommand {
    Text(String),
    Close,
}

struct MockState {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<HashMap<String, MockReply>>,
    /// Frames to push to every socket after a trigger on the given path.
    scripts: Mutex<HashMap<String, Vec<String>>>,
    received: Mutex<Vec<String>>,
    connections: AtomicUsize,
    push_tx: broadcast::Sender<PushCommand>,
}

/// In-process setup backend: the four trigger endpoints plus `/ws`.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    _shutdown: oneshot::Sender<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            push_tx,
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/login", post(trigger_handler))
            .route("/api/register", post(trigger_handler))
            .route("/api/service/install", post(trigger_handler))
            .route("/api/service/start", post(trigger_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("mock backend");
        });

        Self {
            addr,
            state,
            _shutdown: tx,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn reply(&self, path: &str, reply: MockReply) {
        self.state
            .replies
            .lock()
            .await
            .insert(path.to_string(), reply);
    }

    /// Push `frames` to all sockets whenever `path` is triggered.
    pub async fn on_trigger(&self, path: &str, frames: Vec<serde_json::Value>) {
        let frames = frames.into_iter().map(|f| f.to_string()).collect();
        self.state
            .scripts
            .lock()
            .await
            .insert(path.to_string(), frames);
    }

    pub fn push(&self, frame: serde_json::Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.state.push_tx.send(PushCommand::Text(text.to_string()));
    }

    /// Close every open socket from the server side.
    pub fn drop_connections(&self) {
        let _ = self.state.push_tx.send(PushCommand::Close);
    }

    /// Number of sockets accepted so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().await.clone()
    }

    /// Text frames the client sent over `/ws`.
    pub async fn received(&self) -> Vec<String> {
        self.state.received.lock().await.clone()
    }

    pub async fn wait_for_connections(&self, n: usize) {
        wait_until(move || async move { self.connection_count() >= n }).await;
    }

    pub async fn wait_for_calls(&self, n: usize) {
        wait_until(move || async move { self.state.calls.lock().await.len() >= n }).await;
    }

    pub async fn wait_for_received(&self, n: usize) {
        wait_until(move || async move { self.state.received.lock().await.len() >= n }).await;
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "mock backend condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn trigger_handler(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    let body = serde_json::from_str(&body).ok();
    state.calls.lock().await.push(RecordedCall {
        path: path.clone(),
        body,
    });

    let reply = state
        .replies
        .lock()
        .await
        .get(&path)
        .cloned()
        .unwrap_or(MockReply::Started);

    if let Some(frames) = state.scripts.lock().await.get(&path) {
        for frame in frames {
            let _ = state.push_tx.send(PushCommand::Text(frame.clone()));
        }
    }

    match reply {
        MockReply::Started => Json(serde_json::json!({"status": "started"})).into_response(),
        MockReply::Status(code) => (
            StatusCode::from_u16(code).expect("status code"),
            "mock failure",
        )
            .into_response(),
        MockReply::NotJson => (StatusCode::OK, "started").into_response(),
        MockReply::Hang => {
            std::future::pending::<()>().await;
            StatusCode::OK.into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<MockState>) {
    let mut push_rx = state.push_tx.subscribe();
    // Count only once subscribed, so a test that waited for the connection
    // never pushes into the void.
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            cmd = push_rx.recv() => match cmd {
                Ok(PushCommand::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(PushCommand::Close) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Err(_) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    state.received.lock().await.push(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
