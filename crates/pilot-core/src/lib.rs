//! pilot-core: Shared library for desktop automation sessions
//!
//! Provides:
//! - Configuration loading (pilot.toml)
//! - Anthropic Messages API client (computer-use beta)

pub mod anthropic;
pub mod config;

pub use anthropic::{
    AnthropicClient, ComputerToolDefinition, ContentBlock, ImageSource, Message, MessageContent,
    MessagesRequest, MessagesResponse, ResponseBlock, Role, ToolResultContent, Usage,
    COMPUTER_TOOL_NAME,
};
pub use config::Config;
