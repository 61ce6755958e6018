//! Output artifact and final job result types.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Extension assumed when an output filename carries none.
pub const DEFAULT_EXTENSION: &str = ".png";

/// File type marker the render server uses for non-persisted previews.
pub const TRANSIENT_FILE_TYPE: &str = "temp";

/// Extensions reported under `gifs` that are actually video containers.
const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".mkv"];

/// What kind of media an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Gif,
    Video,
}

impl ArtifactKind {
    /// Infer the kind from the history output key and the filename.
    ///
    /// Returns `None` for output keys that never carry files.
    pub fn infer(output_key: &str, filename: &str) -> Option<Self> {
        match output_key {
            "images" => Some(Self::Image),
            "gifs" if VIDEO_EXTENSIONS.contains(&file_extension(filename).as_str()) => {
                Some(Self::Video)
            }
            "gifs" => Some(Self::Gif),
            _ => None,
        }
    }
}

/// How an artifact's bytes are carried in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactEncoding {
    /// `data` holds the base64-encoded bytes.
    #[serde(rename = "base64")]
    Inline,
    /// `data` holds a URL into remote storage.
    #[serde(rename = "s3_url")]
    RemoteUrl,
}

/// A materialized output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub filename: String,
    pub subfolder: String,
    pub node_id: String,
    pub kind: ArtifactKind,
    #[serde(rename = "type")]
    pub encoding: ArtifactEncoding,
    pub data: String,
}

/// Final result delivered with the `complete` callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub images: Vec<OutputArtifact>,
    pub errors: Vec<String>,
}

/// Dotted, lowercased extension of `filename`, or [`DEFAULT_EXTENSION`].
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
