//! Per-job execution monitor.
//!
//! Consumes the render server's event stream for one submitted prompt and
//! drives its [`ExecutionState`] to a terminal phase. Completion is
//! inferred from an `executing` event with no node for our prompt;
//! `execution_error` for our prompt fails the job. Everything else is
//! observational and only refreshes the activity clock.
//!
//! Each receive is bounded by `min(receive_timeout, deadline - now)`, so the
//! wall-clock deadline is enforced even while the server is silent.

use std::time::Duration;

use futures::StreamExt;
use genrelay_core::config::{WorkerConfig, STALL_THRESHOLD};
use genrelay_core::error::CoreError;
use genrelay_core::execution::{ExecutionState, Phase};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIConnection};
use crate::history;
use crate::messages::{parse_message, ComfyUIMessage};
use crate::reconnect::{reconnect_loop, ReconnectBudget, ReconnectError, ReconnectPolicy};

/// Error recorded when the liveness probe fails after a stall.
pub const UNREACHABLE_ERROR: &str = "render server unreachable";

/// Timing knobs for one monitor run.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub receive_timeout: Duration,
    pub max_execution_time: Duration,
    /// Silence longer than this triggers a liveness probe.
    pub stall_threshold: Duration,
    pub reconnect: ReconnectPolicy,
    /// Log every raw text frame at `trace` level.
    pub trace_frames: bool,
}

impl MonitorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            receive_timeout: config.receive_timeout,
            max_execution_time: config.max_execution_time,
            stall_threshold: STALL_THRESHOLD,
            reconnect: ReconnectPolicy {
                max_attempts: config.reconnect_attempts,
                delay: config.reconnect_delay,
            },
            trace_frames: config.ws_trace,
        }
    }
}

/// Fatal monitor outcomes. Recoverable failures end in
/// [`Phase::Failed`] instead.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Job exceeded max execution time of {0} seconds")]
    ExecutionTimeout(u64),

    #[error(transparent)]
    State(#[from] CoreError),
}

/// Drives one job's event stream to a terminal phase.
#[derive(Debug, Clone)]
pub struct ExecutionMonitor {
    api: ComfyUIApi,
    client: ComfyUIClient,
    settings: MonitorSettings,
}

/// What a single frame meant for the receive loop.
enum FrameOutcome {
    Continue,
    ConnectionLost(String),
}

impl ExecutionMonitor {
    pub fn new(api: ComfyUIApi, client: ComfyUIClient, settings: MonitorSettings) -> Self {
        Self {
            api,
            client,
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run the receive loop until `state` is terminal or a fatal error
    /// occurs. The connection is closed on every exit path.
    pub async fn run(
        &self,
        mut connection: ComfyUIConnection,
        state: &mut ExecutionState,
    ) -> Result<Phase, MonitorError> {
        let result = self.drive(&mut connection, state).await;
        connection.close().await;
        result
    }

    async fn drive(
        &self,
        connection: &mut ComfyUIConnection,
        state: &mut ExecutionState,
    ) -> Result<Phase, MonitorError> {
        let deadline = state.started_at() + self.settings.max_execution_time;
        let mut budget = ReconnectBudget::new(self.settings.reconnect);

        loop {
            if state.phase().is_terminal() {
                return Ok(state.phase());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error());
            }
            let window = self.settings.receive_timeout.min(deadline - now);

            let outcome = match tokio::time::timeout(window, connection.ws_stream.next()).await {
                Err(_) => {
                    self.on_receive_timeout(state, deadline).await?;
                    FrameOutcome::Continue
                }
                Ok(Some(Ok(frame))) => self.on_frame(frame, state)?,
                Ok(Some(Err(e))) => FrameOutcome::ConnectionLost(e.to_string()),
                Ok(None) => FrameOutcome::ConnectionLost("WebSocket connection closed".into()),
            };

            if let FrameOutcome::ConnectionLost(reason) = outcome {
                tracing::warn!(
                    client_id = %connection.client_id,
                    prompt_id = %state.prompt_id(),
                    reason = %reason,
                    "ComfyUI stream lost",
                );
                let client_id = connection.client_id.clone();
                match reconnect_loop(&self.client, &client_id, &mut budget, deadline, reason).await {
                    Ok(fresh) => {
                        // The stale stream is already dead; dropping it is enough.
                        drop(std::mem::replace(connection, fresh));
                        self.recover_from_history(state, deadline).await?;
                    }
                    Err(ReconnectError::DeadlineExceeded) => return Err(self.timeout_error()),
                    Err(ReconnectError::Exhausted {
                        attempts,
                        last_error,
                    }) => {
                        tracing::error!(
                            client_id = %client_id,
                            attempts,
                            error = %last_error,
                            "Reconnect budget exhausted",
                        );
                        state.fail(last_error)?;
                    }
                }
            }
        }
    }

    fn on_frame(
        &self,
        frame: Message,
        state: &mut ExecutionState,
    ) -> Result<FrameOutcome, MonitorError> {
        match frame {
            Message::Text(text) => {
                state.touch();
                if self.settings.trace_frames {
                    tracing::trace!(prompt_id = %state.prompt_id(), frame = %text, "ComfyUI frame");
                }
                match parse_message(&text) {
                    Ok(message) => self.on_message(message, state)?,
                    Err(e) => {
                        tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                    }
                }
                Ok(FrameOutcome::Continue)
            }
            Message::Binary(_) => {
                // Preview images.
                state.touch();
                Ok(FrameOutcome::Continue)
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(FrameOutcome::Continue),
            Message::Close(frame) => Ok(FrameOutcome::ConnectionLost(match frame {
                Some(frame) => format!("WebSocket closed by server: {}", frame.reason),
                None => "WebSocket closed by server".to_string(),
            })),
        }
    }

    fn on_message(
        &self,
        message: ComfyUIMessage,
        state: &mut ExecutionState,
    ) -> Result<(), MonitorError> {
        let prompt_id = state.prompt_id().to_string();

        match message {
            ComfyUIMessage::Executing(data) if data.is_for(&prompt_id) => match data.node {
                None => {
                    tracing::info!(prompt_id = %prompt_id, "Execution finished");
                    state.complete()?;
                }
                Some(node) => {
                    tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
                    state.mark_executing()?;
                }
            },
            ComfyUIMessage::ExecutionStart(data) if data.prompt_id == prompt_id => {
                tracing::info!(prompt_id = %prompt_id, "Execution started");
                state.mark_executing()?;
            }
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
                let error = data.describe();
                tracing::error!(
                    prompt_id = %prompt_id,
                    error_type = %data.exception_type,
                    error = %error,
                    "Execution error",
                );
                state.fail(error)?;
            }
            ComfyUIMessage::Progress(data) if data.is_for(&prompt_id) => {
                tracing::debug!(
                    prompt_id = %prompt_id,
                    value = data.value,
                    max = data.max,
                    percent = data.percent(),
                    node = ?data.node,
                    "Generation progress",
                );
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.queue_remaining(),
                    "ComfyUI queue status",
                );
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::trace!(prompt_id = %data.prompt_id, cached = data.nodes.len(), "Cached nodes");
            }
            ComfyUIMessage::Executed(data) => {
                tracing::trace!(prompt_id = %data.prompt_id, node = %data.node, "Node produced output");
            }
            ComfyUIMessage::Unknown => {
                tracing::trace!(prompt_id = %prompt_id, "Ignoring unmodelled message type");
            }
            // Another prompt's events.
            ComfyUIMessage::Executing(_)
            | ComfyUIMessage::ExecutionStart(_)
            | ComfyUIMessage::ExecutionError(_)
            | ComfyUIMessage::Progress(_) => {}
        }

        Ok(())
    }

    async fn on_receive_timeout(
        &self,
        state: &mut ExecutionState,
        deadline: Instant,
    ) -> Result<(), MonitorError> {
        if Instant::now() >= deadline {
            return Ok(());
        }

        let idle = state.idle_for();
        if idle < self.settings.stall_threshold {
            tracing::debug!(prompt_id = %state.prompt_id(), "Receive timed out, still waiting");
            return Ok(());
        }

        let Ok(status) = tokio::time::timeout_at(deadline, self.api.check_reachable()).await else {
            return Err(self.timeout_error());
        };
        if status.reachable {
            tracing::info!(
                prompt_id = %state.prompt_id(),
                idle_secs = idle.as_secs(),
                "Stream quiet but ComfyUI is reachable",
            );
        } else {
            tracing::error!(
                prompt_id = %state.prompt_id(),
                detail = %status.detail,
                "ComfyUI unreachable after stall",
            );
            state.fail(UNREACHABLE_ERROR)?;
        }
        Ok(())
    }

    /// Re-read history after a reconnect so a completion emitted while the
    /// stream was down is not lost. Lookup failures are logged; the stream
    /// remains the source of truth. The lookup never outlives `deadline`.
    async fn recover_from_history(
        &self,
        state: &mut ExecutionState,
        deadline: Instant,
    ) -> Result<(), MonitorError> {
        let prompt_id = state.prompt_id().to_string();

        let lookup = tokio::time::timeout_at(deadline, self.api.get_history(&prompt_id)).await;
        let document = match lookup {
            Err(_) => return Err(self.timeout_error()),
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "History check after reconnect failed");
                return Ok(());
            }
        };

        let status = match history::entry_for(&document, &prompt_id) {
            Ok(entry) => entry.and_then(|entry| entry.status),
            Err(e) => {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Malformed history entry");
                None
            }
        };

        match status {
            Some(status) if status.is_error() => {
                tracing::info!(prompt_id = %prompt_id, "Prompt failed while disconnected");
                state.fail_with(status.error_messages())?;
            }
            Some(status) if status.completed => {
                tracing::info!(prompt_id = %prompt_id, "Prompt completed while disconnected");
                state.complete()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn timeout_error(&self) -> MonitorError {
        MonitorError::ExecutionTimeout(self.settings.max_execution_time.as_secs())
    }
}
