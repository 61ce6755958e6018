//! Container comment stripping.
//!
//! Render servers embed the full workflow in the `comment` tag of MP4
//! outputs. It is removed before the file leaves the worker by remuxing
//! with `ffmpeg` (stream copy, no re-encode). Callers treat every failure
//! here as non-fatal.

use std::path::Path;

/// Extensions whose containers carry the comment tag.
const STRIPPED_EXTENSIONS: &[&str] = &[".mp4"];

/// Error type for metadata stripping.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether files with this dotted lowercase extension should be stripped.
pub fn needs_stripping(extension: &str) -> bool {
    STRIPPED_EXTENSIONS.contains(&extension)
}

/// Remove the `comment` tag from the container at `path`, in place.
pub async fn strip_comment_metadata(path: &Path) -> Result<(), MetadataError> {
    if !path.exists() {
        return Err(MetadataError::FileNotFound(path.display().to_string()));
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let remuxed = tempfile::Builder::new()
        .prefix("stripped-")
        .suffix(&suffix)
        .tempfile_in(dir)?;

    let output = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-i"])
        .arg(path)
        .args(["-map_metadata", "0", "-metadata", "comment=", "-c", "copy"])
        .arg(remuxed.path())
        .output()
        .await
        .map_err(MetadataError::NotFound)?;

    if !output.status.success() {
        return Err(MetadataError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    remuxed.persist(path).map_err(|e| MetadataError::Io(e.error))?;
    tracing::debug!(path = %path.display(), "Stripped container comment");
    Ok(())
}
