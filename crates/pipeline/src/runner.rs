//! Background job execution.
//!
//! [`JobRunner::run`] is the whole life of one accepted job. It reports
//! exactly one terminal callback: `complete` when the prompt reached a
//! terminal phase (including `Failed`), `error` when the task had to be
//! aborted before that.

use std::sync::Arc;

use genrelay_cloud::ObjectStore;
use genrelay_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genrelay_comfyui::client::{ComfyUIClient, ComfyUIClientError};
use genrelay_comfyui::monitor::{ExecutionMonitor, MonitorError, MonitorSettings};
use genrelay_core::artifact::JobResult;
use genrelay_core::config::WorkerConfig;
use genrelay_core::execution::{ExecutionState, Phase};
use genrelay_core::job::{ImageInput, Job};
use genrelay_events::{CallbackEvent, CallbackSender};

use crate::outputs::{MaterializeError, OutputMaterializer};

/// Reasons a job's task is aborted. Reported through the `error` callback.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Connect(#[from] ComfyUIClientError),

    /// One message per image that could not be uploaded.
    #[error("Failed to upload {} image(s)", .0.len())]
    Upload(Vec<String>),

    #[error(transparent)]
    Submit(#[from] ComfyUIApiError),

    #[error("Missing prompt_id in queue response")]
    MissingPromptId,

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

impl JobError {
    /// Messages for the `error` callback.
    pub fn into_messages(self) -> Vec<String> {
        match self {
            Self::Upload(errors) => errors,
            other => vec![other.to_string()],
        }
    }
}

/// Everything a background job needs. Cheap to clone.
#[derive(Clone)]
pub struct JobRunner {
    api: ComfyUIApi,
    client: ComfyUIClient,
    monitor: ExecutionMonitor,
    materializer: OutputMaterializer,
    callbacks: CallbackSender,
}

impl JobRunner {
    pub fn new(
        config: &WorkerConfig,
        store: Option<Arc<dyn ObjectStore>>,
        callbacks: CallbackSender,
    ) -> Self {
        Self::from_parts(
            ComfyUIApi::new(config.api_url()),
            ComfyUIClient::new(config.ws_url()),
            MonitorSettings::from_config(config),
            store,
            callbacks,
        )
    }

    pub fn from_parts(
        api: ComfyUIApi,
        client: ComfyUIClient,
        settings: MonitorSettings,
        store: Option<Arc<dyn ObjectStore>>,
        callbacks: CallbackSender,
    ) -> Self {
        let monitor = ExecutionMonitor::new(api.clone(), client.clone(), settings);
        let materializer = OutputMaterializer::new(api.clone(), store, callbacks.clone());
        Self {
            api,
            client,
            monitor,
            materializer,
            callbacks,
        }
    }

    pub fn callbacks(&self) -> &CallbackSender {
        &self.callbacks
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Run `job` to the end and report the outcome.
    pub async fn run(&self, job: Job) {
        match self.execute(&job).await {
            Ok(result) => {
                tracing::info!(
                    job_id = %job.job_id,
                    artifacts = result.images.len(),
                    errors = result.errors.len(),
                    "Job finished",
                );
                self.callbacks
                    .notify(CallbackEvent::complete(&job.job_id, result));
            }
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Job aborted");
                self.callbacks
                    .notify(CallbackEvent::error(&job.job_id, e.into_messages()));
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<JobResult, JobError> {
        let connection = self.client.connect(&job.client_id).await?;

        let mut state = match self.submit(job).await {
            Ok(state) => state,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        self.callbacks.notify(CallbackEvent::in_queue(&job.job_id));

        let phase = self.monitor.run(connection, &mut state).await?;

        if phase == Phase::Failed {
            return Ok(JobResult {
                images: Vec::new(),
                errors: state.into_errors(),
            });
        }

        let images = self.materializer.collect(&job.job_id, &state).await?;
        Ok(JobResult {
            images,
            errors: state.into_errors(),
        })
    }

    /// Upload inputs and queue the workflow.
    async fn submit(&self, job: &Job) -> Result<ExecutionState, JobError> {
        self.upload_images(&job.images).await?;

        let response = self
            .api
            .submit_workflow(&job.workflow, &job.client_id)
            .await?;
        let prompt_id = response
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or(JobError::MissingPromptId)?;

        tracing::info!(job_id = %job.job_id, prompt_id = %prompt_id, "Queued workflow");
        Ok(ExecutionState::new(prompt_id))
    }

    /// Upload every image once, in order. Any failure aborts the job after
    /// all images have been tried.
    async fn upload_images(&self, images: &[ImageInput]) -> Result<(), JobError> {
        if images.is_empty() {
            return Ok(());
        }

        let mut errors = Vec::new();
        for image in images {
            let result = match image.decode() {
                Ok(bytes) => self
                    .api
                    .upload_image(&image.name, bytes)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(()) => tracing::debug!(name = %image.name, "Uploaded input image"),
                Err(e) => {
                    tracing::warn!(name = %image.name, error = %e, "Input image upload failed");
                    errors.push(format!("Error uploading {}: {e}", image.name));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(JobError::Upload(errors))
        }
    }
}
