//! Configuration management for pilot.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file searched for in the working tree
pub const CONFIG_FILE_NAME: &str = "pilot.toml";

/// Fallback screen size when the OS cannot be queried
pub const FALLBACK_DISPLAY: (u32, u32) = (1920, 1080);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_beta_flag")]
    pub beta_flag: String,
    #[serde(default = "default_tool_version")]
    pub tool_version: String,
    /// No timeout when unset
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_true")]
    pub confirm: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Auto-detected when unset
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default = "default_true")]
    pub failsafe_corners: bool,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_beta_flag() -> String {
    "computer-use-2025-01-24".to_string()
}

fn default_tool_version() -> String {
    "computer_20250124".to_string()
}

fn default_max_iterations() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            beta_flag: default_beta_flag(),
            tool_version: default_tool_version(),
            request_timeout_secs: None,
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            confirm: true,
            system_prompt: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            failsafe_corners: true,
        }
    }
}

impl Config {
    /// Load pilot.toml from the working tree, or defaults when none exists
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Find pilot.toml by searching current directory and parents
    pub fn find_config_path() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_config_from(current)
    }

    fn find_config_from(mut current: PathBuf) -> Option<PathBuf> {
        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Reject values the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be at least 1");
        }
        if self.anthropic.max_tokens == 0 {
            anyhow::bail!("anthropic.max_tokens must be at least 1");
        }
        if self.display.width == Some(0) || self.display.height == Some(0) {
            anyhow::bail!("display dimensions must be non-zero");
        }
        Ok(())
    }

    /// Configured screen size, if both dimensions are pinned
    pub fn display_size(&self) -> Option<(u32, u32)> {
        self.display.width.zip(self.display.height)
    }
}
