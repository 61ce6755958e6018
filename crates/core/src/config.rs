//! Worker configuration.
//!
//! Built once at startup and shared behind an `Arc`; nothing mutates it
//! afterwards.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// Silence on the event stream longer than this triggers a liveness probe.
pub const STALL_THRESHOLD: Duration = Duration::from_secs(120);

/// Callback webhook settings. Only present when an endpoint is configured.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub endpoint: String,
    /// Shared secret sent as the `X-API-Key` header.
    pub secret: String,
}

/// S3-compatible bucket settings. Presence switches artifacts from inline
/// base64 to remote URLs.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub region: String,
    /// Lifetime of the presigned URLs handed back to callers.
    pub url_expiry: Duration,
}

/// Render-server and job-execution settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `host:port` of the render server.
    pub comfy_host: String,
    /// Render server install directory, used by the external supervisor.
    pub comfy_base_dir: PathBuf,
    /// Wall-clock deadline for one job, measured from submission.
    pub max_execution_time: Duration,
    /// How long a single stream receive may block.
    pub receive_timeout: Duration,
    /// Reconnect budget for the whole lifetime of a job.
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Log every raw stream frame at `trace` level.
    pub ws_trace: bool,
    pub callback: Option<CallbackConfig>,
    pub bucket: Option<BucketConfig>,
    /// Echoed back to the platform so it recycles the worker after the job.
    pub refresh_worker: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfy_host: "127.0.0.1:3000".into(),
            comfy_base_dir: PathBuf::from("/workspace/ComfyUI"),
            max_execution_time: Duration::from_secs(1200),
            receive_timeout: Duration::from_secs(30),
            reconnect_attempts: 100,
            reconnect_delay: Duration::from_secs(3),
            ws_trace: false,
            callback: None,
            bucket: None,
            refresh_worker: false,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default               |
    /// |--------------------------------|-----------------------|
    /// | `COMFY_HOST`                   | `127.0.0.1:3000`      |
    /// | `COMFY_BASE_DIR`               | `/workspace/ComfyUI`  |
    /// | `MAX_EXECUTION_TIME`           | `1200` (s)            |
    /// | `WEBSOCKET_RECEIVE_TIMEOUT`    | `30` (s)              |
    /// | `WEBSOCKET_RECONNECT_ATTEMPTS` | `100`                 |
    /// | `WEBSOCKET_RECONNECT_DELAY_S`  | `3` (s)               |
    /// | `WEBSOCKET_TRACE`              | `false`               |
    /// | `CALLBACK_API_ENDPOINT`        | unset (disabled)      |
    /// | `CALLBACK_API_SECRET`          | empty                 |
    /// | `BUCKET_ENDPOINT_URL`          | unset (inline base64) |
    /// | `BUCKET_ACCESS_KEY_ID`         | empty                 |
    /// | `BUCKET_SECRET_ACCESS_KEY`     | empty                 |
    /// | `BUCKET_NAME`                  | `comfyui-outputs`     |
    /// | `BUCKET_REGION`                | `auto`                |
    /// | `BUCKET_URL_EXPIRY_SECS`       | `604800`              |
    /// | `REFRESH_WORKER`               | `false`               |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let callback = var("CALLBACK_API_ENDPOINT").map(|endpoint| CallbackConfig {
            endpoint,
            secret: lookup("CALLBACK_API_SECRET").unwrap_or_default(),
        });

        let bucket = match var("BUCKET_ENDPOINT_URL") {
            Some(endpoint_url) => Some(BucketConfig {
                endpoint_url,
                access_key_id: lookup("BUCKET_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: lookup("BUCKET_SECRET_ACCESS_KEY").unwrap_or_default(),
                bucket_name: var("BUCKET_NAME").unwrap_or_else(|| "comfyui-outputs".into()),
                region: var("BUCKET_REGION").unwrap_or_else(|| "auto".into()),
                url_expiry: Duration::from_secs(parse_or(
                    var("BUCKET_URL_EXPIRY_SECS"),
                    "BUCKET_URL_EXPIRY_SECS",
                    604_800,
                )?),
            }),
            None => None,
        };

        Ok(Self {
            comfy_host: var("COMFY_HOST").unwrap_or(defaults.comfy_host),
            comfy_base_dir: var("COMFY_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.comfy_base_dir),
            max_execution_time: Duration::from_secs(parse_or(
                var("MAX_EXECUTION_TIME"),
                "MAX_EXECUTION_TIME",
                defaults.max_execution_time.as_secs(),
            )?),
            receive_timeout: Duration::from_secs(parse_or(
                var("WEBSOCKET_RECEIVE_TIMEOUT"),
                "WEBSOCKET_RECEIVE_TIMEOUT",
                defaults.receive_timeout.as_secs(),
            )?),
            reconnect_attempts: parse_or(
                var("WEBSOCKET_RECONNECT_ATTEMPTS"),
                "WEBSOCKET_RECONNECT_ATTEMPTS",
                defaults.reconnect_attempts,
            )?,
            reconnect_delay: Duration::from_secs(parse_or(
                var("WEBSOCKET_RECONNECT_DELAY_S"),
                "WEBSOCKET_RECONNECT_DELAY_S",
                defaults.reconnect_delay.as_secs(),
            )?),
            ws_trace: parse_flag(var("WEBSOCKET_TRACE")),
            callback,
            bucket,
            refresh_worker: parse_flag(var("REFRESH_WORKER")),
        })
    }

    /// Base HTTP URL of the render server, e.g. `http://127.0.0.1:3000`.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.comfy_host)
    }

    /// Base websocket URL of the render server, e.g. `ws://127.0.0.1:3000`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.comfy_host)
    }

    /// Stream endpoint a caller can open to follow the job's progress.
    pub fn stream_endpoint(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={client_id}", self.ws_url())
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T, CoreError> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            CoreError::Config(format!("{key} must be a non-negative integer, got '{value}'"))
        }),
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    raw.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
