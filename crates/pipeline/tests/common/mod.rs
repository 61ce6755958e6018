use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use genrelay_cloud::{ObjectStore, StorageError};
use genrelay_comfyui::api::ComfyUIApi;
use genrelay_comfyui::client::ComfyUIClient;
use genrelay_comfyui::monitor::MonitorSettings;
use genrelay_comfyui::reconnect::ReconnectPolicy;
use genrelay_core::config::WorkerConfig;
use genrelay_events::{callback_channel, CallbackEvent};
use genrelay_pipeline::{JobOrchestrator, JobRunner};

pub const PROMPT: &str = "prompt-1";

// ---------------------------------------------------------------------------
// Fake render server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Step {
    Send(String),
    Pause(Duration),
    Close,
}

#[derive(Debug, Clone)]
pub enum Session {
    Accept(Vec<Step>),
    Refuse,
}

/// How `/prompt` answers.
#[derive(Debug, Clone)]
pub enum PromptReply {
    Accept,
    Reject(Value),
    WithoutPromptId,
}

struct Inner {
    sessions: Mutex<VecDeque<Session>>,
    history: Mutex<Value>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    prompt_reply: Mutex<PromptReply>,
    fail_uploads: AtomicBool,
    uploads: AtomicUsize,
    prompts: AtomicUsize,
    views: AtomicUsize,
}

#[derive(Clone)]
pub struct FakeComfy {
    inner: Arc<Inner>,
    addr: std::net::SocketAddr,
}

impl FakeComfy {
    pub async fn start(sessions: Vec<Session>) -> Self {
        let inner = Arc::new(Inner {
            sessions: Mutex::new(sessions.into()),
            history: Mutex::new(json!({})),
            files: Mutex::new(HashMap::new()),
            prompt_reply: Mutex::new(PromptReply::Accept),
            fail_uploads: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            views: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .route("/ws", get(ws_handler))
            .route("/upload/image", post(upload))
            .route("/prompt", post(prompt))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { inner, addr }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_history(&self, document: Value) {
        *self.inner.history.lock().unwrap() = document;
    }

    pub fn add_file(&self, filename: &str, bytes: &[u8]) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
    }

    pub fn set_prompt_reply(&self, reply: PromptReply) {
        *self.inner.prompt_reply.lock().unwrap() = reply;
    }

    pub fn fail_uploads(&self) {
        self.inner.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> usize {
        self.inner.uploads.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> usize {
        self.inner.prompts.load(Ordering::SeqCst)
    }

    pub fn views(&self) -> usize {
        self.inner.views.load(Ordering::SeqCst)
    }
}

async fn ws_handler(State(inner): State<Arc<Inner>>, ws: WebSocketUpgrade) -> Response {
    let session = inner
        .sessions
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(Session::Refuse);
    match session {
        Session::Refuse => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Session::Accept(steps) => ws.on_upgrade(move |socket| run_session(socket, steps)),
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

async fn upload(State(inner): State<Arc<Inner>>, _body: Bytes) -> StatusCode {
    inner.uploads.fetch_add(1, Ordering::SeqCst);
    if inner.fail_uploads.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn prompt(State(inner): State<Arc<Inner>>, Json(_body): Json<Value>) -> Response {
    inner.prompts.fetch_add(1, Ordering::SeqCst);
    let reply = inner.prompt_reply.lock().unwrap().clone();
    match reply {
        PromptReply::Accept => Json(json!({"prompt_id": PROMPT, "number": 1, "node_errors": {}})).into_response(),
        PromptReply::Reject(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
        PromptReply::WithoutPromptId => Json(json!({"number": 1})).into_response(),
    }
}

async fn history(State(inner): State<Arc<Inner>>, UrlPath(_prompt_id): UrlPath<String>) -> Json<Value> {
    Json(inner.history.lock().unwrap().clone())
}

async fn view(
    State(inner): State<Arc<Inner>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    inner.views.fetch_add(1, Ordering::SeqCst);
    let filename = params.get("filename").cloned().unwrap_or_default();
    match inner.files.lock().unwrap().get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Stream messages
// ---------------------------------------------------------------------------

pub fn executing(node: Option<&str>) -> Step {
    Step::Send(json!({"type": "executing", "data": {"node": node, "prompt_id": PROMPT}}).to_string())
}

pub fn execution_error(message: &str) -> Step {
    Step::Send(
        json!({"type": "execution_error", "data": {
            "prompt_id": PROMPT,
            "node_id": "3",
            "node_type": "KSampler",
            "exception_message": message,
            "exception_type": "RuntimeError"
        }})
        .to_string(),
    )
}

/// A session that reports one running node and then completion.
pub fn completing_session() -> Session {
    Session::Accept(vec![
        Step::Pause(Duration::from_millis(20)),
        executing(Some("3")),
        executing(None),
    ])
}

pub fn history_with(outputs: Value) -> Value {
    json!({PROMPT: {"outputs": outputs, "status": {"status_str": "success", "completed": true, "messages": []}}})
}

// ---------------------------------------------------------------------------
// Object store double
// ---------------------------------------------------------------------------

/// Records uploads and checks the staged file exists at upload time.
#[derive(Default)]
pub struct RecordingStore {
    pub uploads: Mutex<Vec<(String, PathBuf, Vec<u8>)>>,
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload_file(
        &self,
        job_id: &str,
        path: &Path,
        filename: &str,
    ) -> Result<String, StorageError> {
        let bytes = std::fs::read(path).map_err(|e| StorageError::upload_failed(e.to_string()))?;
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), path.to_path_buf(), bytes));
        Ok(format!("https://store.example.com/{job_id}/{filename}"))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        receive_timeout: Duration::from_millis(50),
        max_execution_time: Duration::from_secs(5),
        stall_threshold: Duration::from_secs(10),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        },
        trace_frames: false,
    }
}

pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub callbacks: mpsc::Receiver<CallbackEvent>,
}

pub fn harness(
    fake: &FakeComfy,
    settings: MonitorSettings,
    store: Option<Arc<dyn ObjectStore>>,
) -> Harness {
    let config = WorkerConfig {
        comfy_host: fake.host(),
        ..Default::default()
    };
    let (sender, callbacks) = callback_channel(64);
    let runner = JobRunner::from_parts(
        ComfyUIApi::new(config.api_url()),
        ComfyUIClient::new(config.ws_url()),
        settings,
        store,
        sender,
    );
    Harness {
        orchestrator: JobOrchestrator::new(Arc::new(config), runner),
        callbacks,
    }
}

impl Harness {
    /// Collect callbacks until a terminal one (`complete` or `error`).
    pub async fn until_terminal(&mut self) -> Vec<CallbackEvent> {
        let mut events = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.callbacks.recv())
                .await
                .expect("timed out waiting for callbacks")
                .expect("callback channel closed");
            let terminal = matches!(event.action_name(), "complete" | "error");
            events.push(event);
            if terminal {
                return events;
            }
        }
    }
}

pub fn actions(events: &[CallbackEvent]) -> Vec<&'static str> {
    events.iter().map(CallbackEvent::action_name).collect()
}
