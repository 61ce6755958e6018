use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;

use genrelay_api::config::ServerConfig;
use genrelay_api::router::build_app_router;
use genrelay_api::state::AppState;
use genrelay_core::config::WorkerConfig;
use genrelay_events::{callback_channel, CallbackEvent};
use genrelay_pipeline::{JobOrchestrator, JobRunner};

/// Nothing listens here, so jobs fail fast and probes report unreachable.
pub const DEAD_HOST: &str = "127.0.0.1:9";

pub struct TestApp {
    pub router: Router,
    pub callbacks: mpsc::Receiver<CallbackEvent>,
}

/// Build the full application router against `comfy_host`, with callbacks
/// captured on a local queue.
pub fn build_test_app(comfy_host: &str) -> TestApp {
    let worker = WorkerConfig {
        comfy_host: comfy_host.to_string(),
        ..Default::default()
    };
    let (sender, callbacks) = callback_channel(16);
    let runner = JobRunner::new(&worker, None, sender);

    let state = AppState {
        orchestrator: JobOrchestrator::new(Arc::new(worker), runner),
        config: Arc::new(ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout_secs: 30,
        }),
    };

    TestApp {
        router: build_app_router(state),
        callbacks,
    }
}

/// A render server stub that only answers the liveness probe.
pub async fn healthy_render_server() -> String {
    let app = Router::new().route("/", get(|| async { StatusCode::OK }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
