//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum. Message types this
//! crate does not model decode to [`ComfyUIMessage::Unknown`] rather than
//! failing, so callers can skip them explicitly.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// All ComfyUI WebSocket message types the relay distinguishes.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// A well-formed message of a type not modelled here.
    Unknown,
}

/// The `"type"` tag of a message.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MessageKind {
    Status,
    ExecutionStart,
    ExecutionCached,
    Executing,
    Progress,
    Executed,
    ExecutionError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    data: serde_json::Value,
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i64,
    /// Total number of steps.
    pub max: i64,
    #[serde(default, alias = "node_id")]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

impl StatusData {
    pub fn queue_remaining(&self) -> i32 {
        self.status.exec_info.queue_remaining
    }
}

impl ExecutingData {
    /// Whether this event belongs to `prompt_id`.
    pub fn is_for(&self, prompt_id: &str) -> bool {
        self.prompt_id.as_deref() == Some(prompt_id)
    }
}

impl ProgressData {
    /// Whether this event belongs to `prompt_id`.
    pub fn is_for(&self, prompt_id: &str) -> bool {
        self.prompt_id.as_deref() == Some(prompt_id)
    }

    /// Completion percentage (0-100), or 0 when `max` is not positive.
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

impl ErrorData {
    /// One-line description used in job error lists.
    pub fn describe(&self) -> String {
        format!(
            "Node Type: {}, Node ID: {}, Message: {}",
            self.node_type.as_deref().unwrap_or("unknown"),
            self.node_id.as_deref().unwrap_or("unknown"),
            self.exception_message,
        )
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or a known `type` whose `data` does
/// not match its schema. Unrecognised types yield
/// [`ComfyUIMessage::Unknown`].
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;

    let message = match kind {
        MessageKind::Status => ComfyUIMessage::Status(payload(data)?),
        MessageKind::ExecutionStart => ComfyUIMessage::ExecutionStart(payload(data)?),
        MessageKind::ExecutionCached => ComfyUIMessage::ExecutionCached(payload(data)?),
        MessageKind::Executing => ComfyUIMessage::Executing(payload(data)?),
        MessageKind::Progress => ComfyUIMessage::Progress(payload(data)?),
        MessageKind::Executed => ComfyUIMessage::Executed(payload(data)?),
        MessageKind::ExecutionError => ComfyUIMessage::ExecutionError(payload(data)?),
        MessageKind::Unknown => ComfyUIMessage::Unknown,
    };

    Ok(message)
}

fn payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}
