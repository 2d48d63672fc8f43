//! Action framework for desktop control
//!
//! The model proposes actions through the `computer` tool; everything here turns
//! those proposals into OS effects and observations.

pub mod action;
pub mod computer;
pub mod desktop;
pub mod failsafe;
pub mod screenshot;
pub mod security;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// An action proposed by the model, as received
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRequest {
    /// Provider tool-use id, echoed back with the result
    pub id: String,
    /// Tool name the model addressed
    pub tool: String,
    /// Raw tool input (`{"action": ..., ...}`)
    pub input: Value,
}

impl ActionRequest {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            input,
        }
    }

    /// The `action` field, or an empty string when absent
    pub fn action_name(&self) -> &str {
        self.input.get("action").and_then(|v| v.as_str()).unwrap_or("")
    }
}

/// Why an action did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActionError {
    #[error("coordinate ({x}, {y}) is outside the screen (0-{max_x}, 0-{max_y})")]
    Bounds { x: i64, y: i64, max_x: i64, max_y: i64 },
    /// Corner pixels belong to the operator's failsafe gesture
    #[error("coordinate ({x}, {y}) is a screen corner reserved for the failsafe")]
    Corner { x: i64, y: i64 },
    #[error("unsupported action: {0}")]
    Unsupported(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("aborted by failsafe")]
    Aborted,
    #[error("denied by user")]
    Denied,
    #[error("os error: {0}")]
    Os(String),
}

impl ActionError {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::Bounds { .. } | ActionError::Corner { .. } => "bounds",
            ActionError::Unsupported(_) => "unsupported",
            ActionError::InvalidInput(_) => "invalid_input",
            ActionError::Aborted => "aborted",
            ActionError::Denied => "denied",
            ActionError::Os(_) => "os",
        }
    }
}

/// A captured screen image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screenshot {
    pub media_type: String,
    /// Base64-encoded image bytes
    #[serde(skip_serializing)]
    pub data: String,
    /// Size of the encoded payload, kept for transcripts
    pub encoded_len: usize,
}

impl Screenshot {
    pub fn jpeg_base64(data: String) -> Self {
        Self {
            media_type: "image/jpeg".to_string(),
            encoded_len: data.len(),
            data,
        }
    }
}

/// Observation produced for exactly one ActionRequest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Screenshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            image: None,
            error: None,
        }
    }

    pub fn image(image: Screenshot) -> Self {
        Self {
            success: true,
            output: None,
            image: Some(image),
            error: None,
        }
    }

    pub fn failure(error: ActionError) -> Self {
        Self {
            success: false,
            output: None,
            image: None,
            error: Some(error),
        }
    }

    /// Synthetic result for a request the operator declined
    pub fn denied() -> Self {
        Self::failure(ActionError::Denied)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.error, Some(ActionError::Aborted))
    }

    /// Text fed back to the model
    pub fn summary(&self) -> String {
        match (&self.error, &self.output, &self.image) {
            (Some(err), _, _) => format!("Error [{}]: {}", err.code(), err),
            (None, Some(out), _) => out.clone(),
            (None, None, Some(_)) => "Screenshot captured".to_string(),
            (None, None, None) => "Action completed".to_string(),
        }
    }
}

/// Maps an ActionRequest to an OS effect; never fails past its boundary
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the request, capturing every failure in the result
    async fn execute(&self, request: &ActionRequest) -> ActionResult;

    /// Human-readable description for prompts and logs
    fn describe(&self, request: &ActionRequest) -> String {
        action::describe(request)
    }
}
