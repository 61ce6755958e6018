//! Job acceptance.
//!
//! [`JobOrchestrator::accept`] validates synchronously, then detaches the
//! job's background task and returns at once. The task is never joined;
//! its only observable outcome is the callbacks it emits.

use std::sync::Arc;

use genrelay_core::config::WorkerConfig;
use genrelay_core::error::CoreError;
use genrelay_core::job::{validate_input, Job, JobRequest};
use genrelay_events::CallbackEvent;
use serde::Serialize;
use tracing::Instrument;

use crate::runner::JobRunner;

/// Immediate response to an accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acceptance {
    pub status: &'static str,
    pub job_id: String,
    /// Stream endpoint the caller can open to follow progress.
    pub websocket: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub refresh_worker: bool,
}

/// Accepts jobs and starts their background tasks.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: Arc<WorkerConfig>,
    runner: Arc<JobRunner>,
}

impl JobOrchestrator {
    pub fn new(config: Arc<WorkerConfig>, runner: JobRunner) -> Self {
        Self {
            config,
            runner: Arc::new(runner),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Validate `request` and start its job.
    ///
    /// Must be called from within a Tokio runtime. On a validation error no
    /// task is started and no callback is sent.
    pub fn accept(&self, request: JobRequest) -> Result<Acceptance, CoreError> {
        let input = validate_input(request.input.as_ref())?;
        let job = Job::new(request.id, input);

        let acceptance = Acceptance {
            status: "accepted",
            job_id: job.job_id.clone(),
            websocket: self.config.stream_endpoint(&job.client_id),
            refresh_worker: self.config.refresh_worker,
        };

        // Enqueued before the task starts so it always precedes the
        // task's own callbacks.
        self.runner
            .callbacks()
            .notify(CallbackEvent::accepted(&job.job_id));

        let span = tracing::info_span!("job", job_id = %job.job_id, client_id = %job.client_id);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move { runner.run(job).await }.instrument(span));

        tracing::info!(job_id = %acceptance.job_id, "Accepted job, background processing started");
        Ok(acceptance)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use genrelay_core::job::ERR_MISSING_WORKFLOW;
    use genrelay_events::callback_channel;
    use serde_json::json;

    use super::*;

    fn build(refresh_worker: bool) -> (JobOrchestrator, tokio::sync::mpsc::Receiver<CallbackEvent>) {
        let config = WorkerConfig {
            // Nothing listens here; the spawned task fails fast.
            comfy_host: "127.0.0.1:9".into(),
            refresh_worker,
            ..Default::default()
        };
        let (callbacks, rx) = callback_channel(16);
        let runner = JobRunner::new(&config, None, callbacks);
        (JobOrchestrator::new(Arc::new(config), runner), rx)
    }

    #[tokio::test]
    async fn validation_error_starts_nothing() {
        let (orchestrator, mut rx) = build(false);
        let result = orchestrator.accept(JobRequest {
            id: None,
            input: Some(json!({"images": []})),
        });
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg == ERR_MISSING_WORKFLOW);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn acceptance_uses_caller_id_and_stream_endpoint() {
        let (orchestrator, mut rx) = build(false);
        let acceptance = orchestrator
            .accept(JobRequest {
                id: Some("job-42".into()),
                input: Some(json!({"workflow": {"1": {}}})),
            })
            .unwrap();

        assert_eq!(acceptance.status, "accepted");
        assert_eq!(acceptance.job_id, "job-42");
        assert!(acceptance
            .websocket
            .starts_with("ws://127.0.0.1:9/ws?clientId="));

        let first = rx.recv().await.unwrap();
        assert_eq!(first, CallbackEvent::accepted("job-42"));
    }

    #[tokio::test]
    async fn refresh_flag_is_serialized_only_when_set() {
        let (orchestrator, _rx) = build(true);
        let acceptance = orchestrator
            .accept(JobRequest {
                id: None,
                input: Some(json!({"workflow": {}})),
            })
            .unwrap();
        let value = serde_json::to_value(&acceptance).unwrap();
        assert_eq!(value["refresh_worker"], true);

        let (orchestrator, _rx) = build(false);
        let acceptance = orchestrator
            .accept(JobRequest {
                id: None,
                input: Some(json!({"workflow": {}})),
            })
            .unwrap();
        let value = serde_json::to_value(&acceptance).unwrap();
        assert!(value.get("refresh_worker").is_none());
    }
}
