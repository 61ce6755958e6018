//! Output materialization.
//!
//! Walks a completed prompt's history, fetches each persisted file and
//! encodes it either inline (base64) or as a remote-storage URL. The
//! choice is fixed per materializer, so one job never mixes the two.
//! Problems with a single file are logged and that file is omitted; only
//! a failed history lookup aborts the whole step.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use genrelay_cloud::metadata::{needs_stripping, strip_comment_metadata};
use genrelay_cloud::{ObjectStore, StorageError};
use genrelay_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genrelay_comfyui::history::{self, FileInfo};
use genrelay_core::artifact::{
    file_extension, ArtifactEncoding, ArtifactKind, OutputArtifact, TRANSIENT_FILE_TYPE,
};
use genrelay_core::execution::ExecutionState;
use genrelay_events::{CallbackAction, CallbackEvent, CallbackSender};

/// File type assumed when history omits it.
const DEFAULT_FILE_TYPE: &str = "output";

/// Fatal materialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("Failed to fetch history: {0}")]
    History(#[source] ComfyUIApiError),

    #[error("Malformed history entry: {0}")]
    MalformedHistory(#[from] serde_json::Error),
}

/// Per-artifact errors. Never fail the job.
#[derive(Debug, thiserror::Error)]
enum ArtifactError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ComfyUIApiError),

    #[error("temporary file: {0}")]
    TempFile(#[from] std::io::Error),

    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),
}

/// Converts history outputs into [`OutputArtifact`]s.
#[derive(Clone)]
pub struct OutputMaterializer {
    api: ComfyUIApi,
    store: Option<Arc<dyn ObjectStore>>,
    callbacks: CallbackSender,
}

impl OutputMaterializer {
    /// With a `store`, every artifact is uploaded and reported as a URL;
    /// without one, every artifact is inlined.
    pub fn new(
        api: ComfyUIApi,
        store: Option<Arc<dyn ObjectStore>>,
        callbacks: CallbackSender,
    ) -> Self {
        Self {
            api,
            store,
            callbacks,
        }
    }

    pub fn encoding(&self) -> ArtifactEncoding {
        match self.store {
            Some(_) => ArtifactEncoding::RemoteUrl,
            None => ArtifactEncoding::Inline,
        }
    }

    /// Materialize every persisted output of `state`'s prompt.
    pub async fn collect(
        &self,
        job_id: &str,
        state: &ExecutionState,
    ) -> Result<Vec<OutputArtifact>, MaterializeError> {
        let prompt_id = state.prompt_id();
        let document = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(MaterializeError::History)?;

        let Some(entry) = history::entry_for(&document, prompt_id)? else {
            tracing::info!(job_id = %job_id, prompt_id = %prompt_id, "No history for prompt, no outputs");
            return Ok(Vec::new());
        };

        let execution_time = state.elapsed().as_secs_f64();
        let mut artifacts = Vec::new();

        for (node_id, output) in &entry.outputs {
            for (output_key, file) in output.files() {
                let file = match file {
                    Ok(file) => file,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, node_id = %node_id, error = %e, "Malformed output entry, skipping");
                        continue;
                    }
                };
                if file.file_type.as_deref() == Some(TRANSIENT_FILE_TYPE) {
                    tracing::debug!(job_id = %job_id, node_id = %node_id, "Skipping temporary output");
                    continue;
                }
                let Some(filename) = file.filename.as_deref().filter(|f| !f.is_empty()) else {
                    tracing::warn!(job_id = %job_id, node_id = %node_id, "Output entry has no filename, skipping");
                    continue;
                };
                let Some(kind) = ArtifactKind::infer(output_key, filename) else {
                    continue;
                };

                match self
                    .materialize(job_id, node_id, kind, filename, &file, execution_time)
                    .await
                {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(e) => {
                        tracing::warn!(
                            job_id = %job_id,
                            node_id = %node_id,
                            filename = %filename,
                            error = %e,
                            "Omitting artifact",
                        );
                    }
                }
            }
        }

        tracing::info!(job_id = %job_id, count = artifacts.len(), "Materialized outputs");
        Ok(artifacts)
    }

    async fn materialize(
        &self,
        job_id: &str,
        node_id: &str,
        kind: ArtifactKind,
        filename: &str,
        file: &FileInfo,
        execution_time: f64,
    ) -> Result<OutputArtifact, ArtifactError> {
        let file_type = file.file_type.as_deref().unwrap_or(DEFAULT_FILE_TYPE);
        let bytes = self
            .api
            .fetch_view(filename, &file.subfolder, file_type)
            .await?;

        let (encoding, data) = match &self.store {
            Some(store) => {
                let url = self
                    .upload(store.as_ref(), job_id, filename, &bytes)
                    .await?;
                self.callbacks.notify(CallbackEvent::new(
                    job_id,
                    CallbackAction::S3Upload {
                        filename: filename.to_string(),
                        data: url.clone(),
                        execution_time,
                    },
                ));
                (ArtifactEncoding::RemoteUrl, url)
            }
            None => (
                ArtifactEncoding::Inline,
                base64::engine::general_purpose::STANDARD.encode(&bytes),
            ),
        };

        Ok(OutputArtifact {
            filename: filename.to_string(),
            subfolder: file.subfolder.clone(),
            node_id: node_id.to_string(),
            kind,
            encoding,
            data,
        })
    }

    /// Stage `bytes` in a temporary file and upload it. The file is removed
    /// when the handle drops, whichever way this returns.
    async fn upload(
        &self,
        store: &dyn ObjectStore,
        job_id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, ArtifactError> {
        let extension = file_extension(filename);
        let staged = tempfile::Builder::new()
            .prefix("artifact-")
            .suffix(&extension)
            .tempfile()?;
        tokio::fs::write(staged.path(), bytes).await?;

        if needs_stripping(&extension) {
            strip_best_effort(staged.path()).await;
        }

        Ok(store.upload_file(job_id, staged.path(), filename).await?)
    }
}

async fn strip_best_effort(path: &Path) {
    if let Err(e) = strip_comment_metadata(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Could not strip container metadata");
    }
}
