//! Typed view over the `/history/{prompt_id}` document.
//!
//! The render server answers with `{"<prompt_id>": {"outputs": {...},
//! "status": {...}}}`. Only the fields the relay acts on are modelled;
//! everything else is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `status_str` value the render server records for a failed prompt.
const STATUS_ERROR: &str = "error";

/// One prompt's entry in the history document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Outputs keyed by node ID. Ordered so artifacts come out stably.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Files produced by one node.
///
/// File descriptors are kept raw and decoded one at a time by
/// [`NodeOutput::files`], so a single malformed descriptor does not hide
/// the node's other files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<Value>,
    /// Animated outputs; video containers are reported here too.
    #[serde(default, deserialize_with = "null_as_default")]
    pub gifs: Vec<Value>,
}

/// A single output file descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subfolder: String,
    /// `output`, `input` or `temp`.
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
}

/// Execution status recorded in history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs in emission order.
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl NodeOutput {
    /// All file descriptors paired with the output key they came from.
    /// Each descriptor decodes independently.
    pub fn files(
        &self,
    ) -> impl Iterator<Item = (&'static str, Result<FileInfo, serde_json::Error>)> + '_ {
        self.images
            .iter()
            .map(|f| ("images", FileInfo::deserialize(f)))
            .chain(self.gifs.iter().map(|f| ("gifs", FileInfo::deserialize(f))))
    }
}

impl HistoryStatus {
    pub fn is_error(&self) -> bool {
        self.status_str.as_deref() == Some(STATUS_ERROR)
    }

    /// Error descriptions recorded in the status message log.
    ///
    /// Each `execution_error` entry is rendered the same way as a live
    /// stream error. Falls back to a generic message when the log holds
    /// none.
    pub fn error_messages(&self) -> Vec<String> {
        let errors: Vec<String> = self
            .messages
            .iter()
            .filter_map(|entry| {
                let pair = entry.as_array()?;
                if pair.first()?.as_str()? != "execution_error" {
                    return None;
                }
                let payload = pair.get(1)?;
                let field = |name: &str| {
                    payload
                        .get(name)
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string()
                };
                Some(format!(
                    "Node Type: {}, Node ID: {}, Message: {}",
                    field("node_type"),
                    field("node_id"),
                    payload
                        .get("exception_message")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                ))
            })
            .collect();

        if errors.is_empty() {
            vec!["Workflow execution failed".to_string()]
        } else {
            errors
        }
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Extract the entry for `prompt_id` from a raw history document.
///
/// A missing key means the prompt has not produced any history yet and
/// yields `Ok(None)`. A present but malformed entry is an error.
pub fn entry_for(document: &Value, prompt_id: &str) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match document.get(prompt_id) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => HistoryEntry::deserialize(raw).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_prompt_is_none() {
        let doc = json!({"other": {"outputs": {}}});
        assert!(entry_for(&doc, "p1").unwrap().is_none());
    }

    #[test]
    fn parses_outputs_and_status() {
        let doc = json!({
            "p1": {
                "outputs": {
                    "9": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]},
                    "12": {"gifs": [{"filename": "clip.mp4", "subfolder": "vid", "type": "output"}],
                           "text": ["ignored"]}
                },
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        });
        let entry = entry_for(&doc, "p1").unwrap().unwrap();
        assert_eq!(entry.outputs.len(), 2);

        let files: Vec<_> = entry.outputs["12"].files().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "gifs");
        assert_eq!(files[0].1.as_ref().unwrap().subfolder, "vid");

        let status = entry.status.unwrap();
        assert!(status.completed);
        assert!(!status.is_error());
    }

    #[test]
    fn file_without_name_still_parses() {
        let doc = json!({"p": {"outputs": {"1": {"images": [{"type": "temp"}]}}}});
        let entry = entry_for(&doc, "p").unwrap().unwrap();
        let (_, info) = entry.outputs["1"].files().next().unwrap();
        let info = info.unwrap();
        assert!(info.filename.is_none());
        assert_eq!(info.file_type.as_deref(), Some("temp"));
    }

    #[test]
    fn null_subfolder_reads_as_empty() {
        let doc = json!({"p": {"outputs": {"1": {"images": [{"filename": "a.png", "subfolder": null}]}}}});
        let entry = entry_for(&doc, "p").unwrap().unwrap();
        let (_, info) = entry.outputs["1"].files().next().unwrap();
        assert_eq!(info.unwrap().subfolder, "");
    }

    #[test]
    fn malformed_descriptor_does_not_hide_siblings() {
        let doc = json!({"p": {"outputs": {"1": {"images": [
            {"filename": 42},
            {"filename": "ok.png", "subfolder": "", "type": "output"}
        ]}}}});
        let entry = entry_for(&doc, "p").unwrap().unwrap();
        let files: Vec<_> = entry.outputs["1"].files().collect();
        assert_eq!(files.len(), 2);
        assert!(files[0].1.is_err());
        assert_eq!(files[1].1.as_ref().unwrap().filename.as_deref(), Some("ok.png"));
    }

    #[test]
    fn error_messages_from_status_log() {
        let status: HistoryStatus = serde_json::from_value(json!({
            "status_str": "error",
            "completed": false,
            "messages": [
                ["execution_start", {"prompt_id": "p"}],
                ["execution_error", {"node_id": "4", "node_type": "VAEDecode", "exception_message": "boom"}]
            ]
        }))
        .unwrap();
        assert!(status.is_error());
        assert_eq!(
            status.error_messages(),
            vec!["Node Type: VAEDecode, Node ID: 4, Message: boom".to_string()]
        );
    }

    #[test]
    fn error_messages_fall_back_to_generic() {
        let status = HistoryStatus {
            status_str: Some("error".into()),
            ..Default::default()
        };
        assert_eq!(status.error_messages(), vec!["Workflow execution failed"]);
    }
}
