//! Model boundary: conversation snapshot in, proposed actions out

use anyhow::Result;
use async_trait::async_trait;
use pilot_core::{
    AnthropicClient, ComputerToolDefinition, ContentBlock, ImageSource, Message, MessagesRequest,
    ResponseBlock, Role, ToolResultContent,
};

use crate::conversation::Turn;
use crate::tools::desktop::ScreenSize;
use crate::tools::{ActionRequest, ActionResult};

/// What the model returned for one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub text: Option<String>,
    /// Empty means the model considers the task done
    pub actions: Vec<ActionRequest>,
}

impl ModelReply {
    pub fn done(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            actions: Vec::new(),
        }
    }
}

/// Anything that can propose the next actions
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn next_turn(&self, model: &str, conversation: &[Turn]) -> Result<ModelReply>;
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a computer use assistant that controls a desktop computer through the `computer` tool.
When performing tasks:
1. Always take a screenshot first to see the current state of the screen.
2. After each action, take another screenshot to verify the result.
3. Be precise with click coordinates - aim for the center of buttons and UI elements.
4. If an action fails, read the error and try an alternative approach.
5. Report your progress and any issues you encounter.

When the task is complete, reply with a short summary and do not call any more tools."#;

/// Computer-use model served by the Anthropic API
pub struct AnthropicModel {
    client: AnthropicClient,
    tool_version: String,
    max_tokens: u32,
    screen: ScreenSize,
    system_prompt: String,
}

impl AnthropicModel {
    pub fn new(client: AnthropicClient, tool_version: impl Into<String>, max_tokens: u32, screen: ScreenSize) -> Self {
        Self {
            client,
            tool_version: tool_version.into(),
            max_tokens,
            screen,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn build_request(&self, model: &str, conversation: &[Turn]) -> MessagesRequest {
        MessagesRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            system: Some(self.system_prompt.clone()),
            tools: vec![ComputerToolDefinition::new(
                self.tool_version.clone(),
                self.screen.width,
                self.screen.height,
            )],
            messages: render_messages(conversation),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicModel {
    async fn next_turn(&self, model: &str, conversation: &[Turn]) -> Result<ModelReply> {
        let request = self.build_request(model, conversation);
        let response = self.client.create_message(&request).await?;

        let actions = response
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::ToolUse { id, name, input } => {
                    Some(ActionRequest::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect();

        Ok(ModelReply {
            text: response.text(),
            actions,
        })
    }
}

fn tool_result_block(request_id: &str, result: &ActionResult) -> ContentBlock {
    let content = match (&result.error, &result.image) {
        (None, Some(image)) => ToolResultContent::Blocks(vec![ContentBlock::Image {
            source: ImageSource::base64(image.media_type.clone(), image.data.clone()),
        }]),
        _ => ToolResultContent::Text(result.summary()),
    };

    ContentBlock::ToolResult {
        tool_use_id: request_id.to_string(),
        content,
        is_error: if result.success { None } else { Some(true) },
    }
}

/// Render the history as provider messages
///
/// Consecutive observations share one user message, as the provider expects
/// every tool result of a turn to arrive together.
pub fn render_messages(conversation: &[Turn]) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    for turn in conversation {
        if !matches!(turn, Turn::Observation { .. }) && !pending_results.is_empty() {
            messages.push(Message::blocks(Role::User, std::mem::take(&mut pending_results)));
        }

        match turn {
            Turn::User { text } => messages.push(Message::user_text(text.clone())),
            Turn::Model { text, actions } => {
                let mut blocks = Vec::new();
                if let Some(text) = text {
                    blocks.push(ContentBlock::Text { text: text.clone() });
                }
                blocks.extend(actions.iter().map(|a| ContentBlock::ToolUse {
                    id: a.id.clone(),
                    name: a.tool.clone(),
                    input: a.input.clone(),
                }));
                messages.push(Message::blocks(Role::Assistant, blocks));
            }
            Turn::Observation { request_id, result } => {
                pending_results.push(tool_result_block(request_id, result));
            }
        }
    }

    if !pending_results.is_empty() {
        messages.push(Message::blocks(Role::User, pending_results));
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ActionError, Screenshot};
    use serde_json::json;

    #[test]
    fn test_render_groups_observations() {
        let click = ActionRequest::new("t1", "computer", json!({"action": "left_click", "coordinate": [1, 1]}));
        let shot = ActionRequest::new("t2", "computer", json!({"action": "screenshot"}));

        let turns = vec![
            Turn::User { text: "click it".into() },
            Turn::Model { text: Some("Sure".into()), actions: vec![click, shot] },
            Turn::Observation { request_id: "t1".into(), result: ActionResult::success("Left click at (1, 1)") },
            Turn::Observation {
                request_id: "t2".into(),
                result: ActionResult::image(Screenshot::jpeg_base64("AAAA".into())),
            },
        ];

        let messages = render_messages(&turns);
        assert_eq!(messages.len(), 3);

        let value = serde_json::to_value(&messages).unwrap();
        assert_eq!(value[0]["content"], "click it");
        assert_eq!(value[1]["role"], "assistant");
        assert_eq!(value[1]["content"][0]["type"], "text");
        assert_eq!(value[1]["content"][2]["id"], "t2");

        let results = &value[2]["content"];
        assert_eq!(value[2]["role"], "user");
        assert_eq!(results.as_array().unwrap().len(), 2);
        assert_eq!(results[0]["tool_use_id"], "t1");
        assert_eq!(results[0]["content"], "Left click at (1, 1)");
        assert_eq!(results[1]["content"][0]["type"], "image");
        assert_eq!(results[1]["content"][0]["source"]["data"], "AAAA");
    }

    #[test]
    fn test_render_marks_failures() {
        let turns = vec![
            Turn::User { text: "go".into() },
            Turn::Model { text: None, actions: vec![ActionRequest::new("t1", "computer", json!({}))] },
            Turn::Observation { request_id: "t1".into(), result: ActionResult::denied() },
            Turn::User { text: "follow up".into() },
        ];

        let value = serde_json::to_value(render_messages(&turns)).unwrap();
        assert_eq!(value[1]["content"].as_array().unwrap().len(), 1);
        assert_eq!(value[2]["content"][0]["is_error"], true);
        assert_eq!(value[2]["content"][0]["content"], "Error [denied]: denied by user");
        assert_eq!(value[3]["content"], "follow up");
    }

    #[test]
    fn test_failed_screenshot_is_text() {
        let block = tool_result_block("t", &ActionResult::failure(ActionError::Aborted));
        let value = serde_json::to_value(block).unwrap();
        assert_eq!(value["content"], "Error [aborted]: aborted by failsafe");
    }

    #[test]
    fn test_build_request_declares_computer_tool() {
        let client = AnthropicClient::new("sk-test", "http://localhost", "computer-use-2025-01-24", None).unwrap();
        let model = AnthropicModel::new(client, "computer_20250124", 1024, ScreenSize { width: 800, height: 600 })
            .with_system_prompt("custom");

        let request = model.build_request("claude-test", &[Turn::User { text: "hi".into() }]);
        assert_eq!(request.model, "claude-test");
        assert_eq!(request.system.as_deref(), Some("custom"));
        assert_eq!(request.tools[0].display_width_px, 800);
        assert_eq!(request.tools[0].tool_type, "computer_20250124");
        assert_eq!(request.messages.len(), 1);
    }
}
