//! Callback envelope.
//!
//! Serialized flat: `{"action": "...", "job_id": "...", ...action fields}`.

use genrelay_core::artifact::JobResult;
use serde::{Deserialize, Serialize};

/// One lifecycle notification for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    pub job_id: String,
    #[serde(flatten)]
    pub action: CallbackAction,
}

/// The lifecycle transition being reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallbackAction {
    /// The job was validated and handed to a background task.
    Accepted,
    /// The render server accepted the workflow.
    InQueue,
    /// One artifact reached remote storage.
    S3Upload {
        filename: String,
        /// Presigned URL of the uploaded object.
        data: String,
        /// Seconds since monitoring started.
        execution_time: f64,
    },
    /// The job reached a terminal phase.
    Complete { result: JobResult },
    /// The job's task was aborted.
    Error { errors: Vec<String> },
}

impl CallbackEvent {
    pub fn new(job_id: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            job_id: job_id.into(),
            action,
        }
    }

    pub fn accepted(job_id: impl Into<String>) -> Self {
        Self::new(job_id, CallbackAction::Accepted)
    }

    pub fn in_queue(job_id: impl Into<String>) -> Self {
        Self::new(job_id, CallbackAction::InQueue)
    }

    pub fn complete(job_id: impl Into<String>, result: JobResult) -> Self {
        Self::new(job_id, CallbackAction::Complete { result })
    }

    pub fn error(job_id: impl Into<String>, errors: Vec<String>) -> Self {
        Self::new(job_id, CallbackAction::Error { errors })
    }

    /// The wire name of the action, for logging.
    pub fn action_name(&self) -> &'static str {
        match self.action {
            CallbackAction::Accepted => "accepted",
            CallbackAction::InQueue => "in_queue",
            CallbackAction::S3Upload { .. } => "s3_upload",
            CallbackAction::Complete { .. } => "complete",
            CallbackAction::Error { .. } => "error",
        }
    }
}
