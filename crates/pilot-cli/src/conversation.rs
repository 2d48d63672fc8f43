//! Conversation state for one task
//!
//! Append-only history replayed to the model on every turn.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::tools::{ActionRequest, ActionResult};

/// One entry in the history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    /// Task or follow-up text from the operator
    User { text: String },
    /// What the model proposed
    Model {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        actions: Vec<ActionRequest>,
    },
    /// Outcome of one ActionRequest
    Observation {
        request_id: String,
        result: ActionResult,
    },
}

/// Ordered, append-only history of a task
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    /// Unique identifier
    pub id: String,
    pub task: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a fresh history seeded with the task
    pub fn new(task: impl Into<String>, model: impl Into<String>) -> Self {
        let task = task.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            turns: vec![Turn::User { text: task.clone() }],
            task,
            model: model.into(),
            started_at: Utc::now(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Everything sent to the model, in order
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Number of observations recorded
    pub fn observation_count(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::Observation { .. }))
            .count()
    }

    /// Write the history as JSON; screenshot payloads are left out
    pub fn save_transcript(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Screenshot;
    use serde_json::json;

    #[test]
    fn test_new_conversation_starts_with_task() {
        let conv = Conversation::new("open the calculator", "test-model");
        assert!(!conv.id.is_empty());
        assert_eq!(conv.len(), 1);
        assert_eq!(
            conv.snapshot()[0],
            Turn::User { text: "open the calculator".to_string() }
        );
    }

    #[test]
    fn test_append_preserves_order() {
        let mut conv = Conversation::new("task", "m");
        let request = ActionRequest::new("t1", "computer", json!({"action": "screenshot"}));

        conv.append(Turn::Model { text: Some("looking".into()), actions: vec![request] });
        conv.append(Turn::Observation {
            request_id: "t1".into(),
            result: ActionResult::success("ok"),
        });

        assert_eq!(conv.len(), 3);
        assert!(matches!(conv.snapshot()[1], Turn::Model { .. }));
        assert!(matches!(conv.snapshot()[2], Turn::Observation { .. }));
        assert_eq!(conv.observation_count(), 1);
    }

    #[test]
    fn test_save_transcript_elides_image_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("transcript.json");

        let mut conv = Conversation::new("task", "m");
        conv.append(Turn::Observation {
            request_id: "t1".into(),
            result: ActionResult::image(Screenshot::jpeg_base64("SECRETPIXELS".into())),
        });
        conv.save_transcript(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("SECRETPIXELS"));

        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["task"], "task");
        assert_eq!(value["turns"][1]["turn"], "observation");
        assert_eq!(value["turns"][1]["result"]["image"]["encoded_len"], 12);
    }
}
