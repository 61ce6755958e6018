//! Inbound job model and input validation.
//!
//! A caller posts `{id?, input: {workflow, images?}}`. [`validate_input`]
//! turns the raw `input` value into a [`JobInput`], and [`Job::new`]
//! assigns the identifiers the background task runs under.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Validation messages
// ---------------------------------------------------------------------------

/// Returned when the request carries no `input` at all.
pub const ERR_MISSING_INPUT: &str = "Please provide input";

/// Returned when `input` is a string that does not parse as JSON.
pub const ERR_INVALID_JSON: &str = "Invalid JSON format in input";

/// Returned when `input` parses but is not a JSON object.
pub const ERR_INPUT_NOT_OBJECT: &str = "Input must be a JSON object";

/// Returned when the `workflow` key is absent or null.
pub const ERR_MISSING_WORKFLOW: &str = "Missing 'workflow' parameter";

/// Returned when `images` is present but malformed.
pub const ERR_INVALID_IMAGES: &str =
    "'images' must be a list of objects with 'name' and 'image' keys";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw job request as received from the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRequest {
    /// Caller-supplied job identifier. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Job input. May be an object or a JSON-encoded string.
    #[serde(default)]
    pub input: Option<Value>,
}

/// An input image to upload to the render server before submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    /// Filename the workflow refers to.
    pub name: String,
    /// Data URI (`data:image/png;base64,...`) or bare base64 payload.
    pub image: String,
}

impl ImageInput {
    /// Decode the image payload into raw bytes.
    ///
    /// Anything up to and including the first `,` is treated as a data-URI
    /// header and discarded.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let payload = match self.image.split_once(',') {
            Some((_header, data)) => data,
            None => self.image.as_str(),
        };
        base64::engine::general_purpose::STANDARD.decode(payload.trim())
    }
}

/// Validated job input.
#[derive(Debug, Clone)]
pub struct JobInput {
    /// Opaque workflow document, passed through to the render server.
    pub workflow: Value,
    /// Images to upload first. Empty when none were supplied.
    pub images: Vec<ImageInput>,
}

/// A job accepted for background execution. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    /// Identifier binding the stream connection to this job.
    pub client_id: String,
    pub workflow: Value,
    pub images: Vec<ImageInput>,
}

impl Job {
    /// Build a job from validated input.
    ///
    /// Uses the caller's `job_id` when it is non-empty, otherwise generates
    /// one. The `client_id` is always freshly generated.
    pub fn new(job_id: Option<String>, input: JobInput) -> Self {
        let job_id = job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            job_id,
            client_id: uuid::Uuid::new_v4().to_string(),
            workflow: input.workflow,
            images: input.images,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a raw job `input` value.
///
/// Accepts either a JSON object or a string containing one. Requires a
/// non-null `workflow`; if `images` is present it must be a list whose
/// entries all carry string `name` and `image` fields.
pub fn validate_input(input: Option<&Value>) -> Result<JobInput, CoreError> {
    let decoded;
    let input = match input {
        None | Some(Value::Null) => return Err(invalid(ERR_MISSING_INPUT)),
        Some(Value::String(raw)) => {
            decoded = serde_json::from_str::<Value>(raw).map_err(|_| invalid(ERR_INVALID_JSON))?;
            &decoded
        }
        Some(other) => other,
    };

    let obj = input.as_object().ok_or_else(|| invalid(ERR_INPUT_NOT_OBJECT))?;

    let workflow = match obj.get("workflow") {
        None | Some(Value::Null) => return Err(invalid(ERR_MISSING_WORKFLOW)),
        Some(workflow) => workflow.clone(),
    };

    let images = match obj.get("images") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(parse_image)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| invalid(ERR_INVALID_IMAGES))?,
        Some(_) => return Err(invalid(ERR_INVALID_IMAGES)),
    };

    Ok(JobInput { workflow, images })
}

fn parse_image(item: &Value) -> Option<ImageInput> {
    let name = item.get("name")?.as_str()?;
    let image = item.get("image")?.as_str()?;
    Some(ImageInput {
        name: name.to_string(),
        image: image.to_string(),
    })
}

fn invalid(msg: &str) -> CoreError {
    CoreError::Validation(msg.to_string())
}
