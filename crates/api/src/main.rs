use std::net::SocketAddr;
use std::sync::Arc;

use genrelay_cloud::{ObjectStore, S3Store};
use genrelay_core::config::WorkerConfig;
use genrelay_events::CallbackDispatcher;
use genrelay_pipeline::{JobOrchestrator, JobRunner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genrelay_api::config::ServerConfig;
use genrelay_api::router::build_app_router;
use genrelay_api::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "genrelay_api=debug,genrelay_pipeline=debug,genrelay_comfyui=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let worker = WorkerConfig::from_env().expect("Invalid worker configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfy_host = %worker.comfy_host,
        comfy_base_dir = %worker.comfy_base_dir.display(),
        max_execution_time_secs = worker.max_execution_time.as_secs(),
        "Loaded configuration",
    );

    // --- Artifact storage ---
    let store: Option<Arc<dyn ObjectStore>> = match &worker.bucket {
        Some(bucket) => {
            tracing::info!(endpoint = %bucket.endpoint_url, bucket = %bucket.bucket_name, "Artifacts go to remote storage");
            Some(Arc::new(S3Store::new(bucket)))
        }
        None => {
            tracing::info!("No bucket configured, artifacts are returned inline");
            None
        }
    };

    // --- Callbacks ---
    let callbacks =
        CallbackDispatcher::spawn(worker.callback.as_ref()).expect("Failed to start callback dispatcher");

    // --- Job pipeline ---
    let runner = JobRunner::new(&worker, store, callbacks);
    let orchestrator = JobOrchestrator::new(Arc::new(worker), runner);

    // --- App state ---
    let state = AppState {
        orchestrator,
        config: Arc::new(config.clone()),
    };

    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // In-flight jobs are detached and end with the process.
    tracing::info!("Server stopped accepting connections");
}

/// `RUST_LOG` picks the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
