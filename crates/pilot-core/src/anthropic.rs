//! Anthropic Messages API client (computer-use beta)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Name of the single tool the model drives the desktop through
pub const COMPUTER_TOOL_NAME: &str = "computer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the request history
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: &'static str,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64",
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// The computer-use tool declaration
#[derive(Debug, Clone, Serialize)]
pub struct ComputerToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: &'static str,
    pub display_width_px: u32,
    pub display_height_px: u32,
}

impl ComputerToolDefinition {
    pub fn new(tool_version: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            tool_type: tool_version.into(),
            name: COMPUTER_TOOL_NAME,
            display_width_px: width,
            display_height_px: height,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub tools: Vec<ComputerToolDefinition>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: String,
    pub content: Vec<ResponseBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

impl MessagesResponse {
    /// Concatenated text blocks, if any
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ResponseBlock::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("{}: {}", parsed.error.kind, parsed.error.message),
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.chars().take(500).collect(),
    }
}

/// Anthropic API client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    messages_url: String,
    api_key: String,
    beta_flag: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client; `timeout` of `None` leaves requests unbounded
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        beta_flag: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            anyhow::bail!("ANTHROPIC_API_KEY is not set. Export it or pass --api-key.");
        }

        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            messages_url: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            api_key,
            beta_flag: beta_flag.into(),
            client,
        })
    }

    /// Send one Messages request
    pub async fn create_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending messages request"
        );

        let resp = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", &self.beta_flag)
            .json(request)
            .send()
            .await
            .context("Failed to connect to Anthropic API")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Anthropic API returned an error");
            anyhow::bail!("Anthropic API error ({}): {}", status, describe_error_body(&body));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .context("Failed to parse messages response")?;

        if let Some(usage) = parsed.usage {
            debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = ?parsed.stop_reason,
                "Received messages response"
            );
        }

        Ok(parsed)
    }
}
