use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use genrelay_comfyui::api::ComfyUIApi;
use genrelay_comfyui::client::ComfyUIClient;
use genrelay_comfyui::monitor::MonitorSettings;
use genrelay_comfyui::reconnect::ReconnectPolicy;

/// One scripted action on a websocket session.
#[derive(Debug, Clone)]
pub enum Step {
    Send(String),
    Pause(Duration),
    /// Send a close frame and end the session.
    Close,
}

/// How the fake server answers the next `/ws` upgrade.
#[derive(Debug, Clone)]
pub enum Session {
    /// Run the steps, then hold the socket open until the client leaves.
    Accept(Vec<Step>),
    /// Reject the handshake with a 503.
    Refuse,
}

#[derive(Default)]
struct Inner {
    sessions: Mutex<VecDeque<Session>>,
    history: Mutex<Value>,
    unhealthy: AtomicBool,
    /// `/` and `/history` stall far longer than any test runs.
    hanging: AtomicBool,
    connections: AtomicUsize,
}

const HANG: Duration = Duration::from_secs(120);

/// In-process stand-in for a ComfyUI server.
#[derive(Clone, Default)]
pub struct FakeComfy {
    inner: Arc<Inner>,
    addr: Option<std::net::SocketAddr>,
}

impl FakeComfy {
    /// Bind to an ephemeral port and serve in the background.
    pub async fn start(sessions: Vec<Session>) -> Self {
        let mut fake = FakeComfy::default();
        *fake.inner.sessions.lock().unwrap() = sessions.into();
        *fake.inner.history.lock().unwrap() = json!({});

        let app = Router::new()
            .route("/", get(root))
            .route("/ws", get(ws_handler))
            .route("/history/{prompt_id}", get(history))
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        fake.addr = Some(listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        fake
    }

    pub fn api(&self) -> ComfyUIApi {
        ComfyUIApi::new(format!("http://{}", self.addr.unwrap()))
    }

    pub fn client(&self) -> ComfyUIClient {
        ComfyUIClient::new(format!("ws://{}", self.addr.unwrap()))
    }

    pub fn set_history(&self, document: Value) {
        *self.inner.history.lock().unwrap() = document;
    }

    pub fn set_unhealthy(&self) {
        self.inner.unhealthy.store(true, Ordering::SeqCst);
    }

    pub fn set_hanging(&self) {
        self.inner.hanging.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }
}

async fn root(State(fake): State<FakeComfy>) -> StatusCode {
    if fake.inner.hanging.load(Ordering::SeqCst) {
        tokio::time::sleep(HANG).await;
    }
    if fake.inner.unhealthy.load(Ordering::SeqCst) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn history(State(fake): State<FakeComfy>, Path(_prompt_id): Path<String>) -> Json<Value> {
    if fake.inner.hanging.load(Ordering::SeqCst) {
        tokio::time::sleep(HANG).await;
    }
    Json(fake.inner.history.lock().unwrap().clone())
}

async fn ws_handler(State(fake): State<FakeComfy>, ws: WebSocketUpgrade) -> Response {
    let session = fake
        .inner
        .sessions
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Session::Refuse);

    match session {
        Session::Refuse => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Session::Accept(steps) => {
            fake.inner.connections.fetch_add(1, Ordering::SeqCst);
            ws.on_upgrade(move |socket| run_session(socket, steps))
        }
    }
}

async fn run_session(mut socket: WebSocket, steps: Vec<Step>) {
    for step in steps {
        match step {
            Step::Send(text) => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            Step::Pause(duration) => tokio::time::sleep(duration).await,
            Step::Close => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

// ---- message builders ----

pub fn executing(node: Option<&str>, prompt_id: &str) -> Step {
    Step::Send(json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}}).to_string())
}

pub fn progress(value: i64, max: i64, prompt_id: &str) -> Step {
    Step::Send(
        json!({"type": "progress", "data": {"value": value, "max": max, "node": "3", "prompt_id": prompt_id}})
            .to_string(),
    )
}

pub fn status(queue_remaining: i32) -> Step {
    Step::Send(
        json!({"type": "status", "data": {"status": {"exec_info": {"queue_remaining": queue_remaining}}}})
            .to_string(),
    )
}

pub fn execution_error(prompt_id: &str, node_type: &str, message: &str) -> Step {
    Step::Send(
        json!({"type": "execution_error", "data": {
            "prompt_id": prompt_id,
            "node_id": "3",
            "node_type": node_type,
            "exception_message": message,
            "exception_type": "RuntimeError"
        }})
        .to_string(),
    )
}

/// Short timings so tests finish in well under a second.
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        receive_timeout: Duration::from_millis(50),
        max_execution_time: Duration::from_secs(5),
        stall_threshold: Duration::from_secs(10),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        },
        trace_frames: true,
    }
}
