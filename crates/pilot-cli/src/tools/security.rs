//! Confirmation gate in front of the action executor

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::action::Action;
use super::ActionRequest;

/// Check if stdin is connected to a terminal
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

/// How the gate treats requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Ask the operator before each effectful action
    Confirm,
    /// Approve everything without asking
    Auto,
}

/// Outcome of reviewing one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
    Abort,
}

/// Request/response port to whoever approves actions
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// Ask about one request; `description` is already human-readable
    async fn confirm(&self, request: &ActionRequest, description: &str) -> Decision;
}

/// Stateless checkpoint between proposal and execution
#[derive(Clone)]
pub struct ConfirmationGate {
    mode: ConfirmMode,
    handler: Arc<dyn ConfirmationHandler>,
}

impl ConfirmationGate {
    pub fn new(mode: ConfirmMode, handler: Arc<dyn ConfirmationHandler>) -> Self {
        Self { mode, handler }
    }

    pub async fn review(&self, request: &ActionRequest, description: &str) -> Decision {
        if self.mode == ConfirmMode::Auto {
            debug!(action = %request.action_name(), "Auto-approving action");
            return Decision::Approve;
        }

        // Read-only actions need no approval
        if Action::parse(request).map_or(false, |a| a.is_read_only()) {
            return Decision::Approve;
        }

        let decision = self.handler.confirm(request, description).await;
        debug!(action = %request.action_name(), ?decision, "Operator decision");
        decision
    }
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate").field("mode", &self.mode).finish()
    }
}

/// Map one line of operator input; `None` means ask again
pub fn parse_reply(input: &str) -> Option<Decision> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(Decision::Approve),
        "n" | "no" => Some(Decision::Deny),
        "q" | "quit" | "a" | "abort" => Some(Decision::Abort),
        _ => None,
    }
}

pub type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Opens the reader for one prompt
pub type OpenInput = Box<dyn Fn() -> LineReader + Send + Sync>;

/// Terminal-based confirmation prompt
///
/// Every prompt reads through a fresh reader, so text buffered by a prompt
/// that was abandoned (failsafe, Ctrl+C) never answers a later one.
pub struct TerminalConfirmation {
    open_input: OpenInput,
    /// One prompt at a time
    prompt_lock: Mutex<()>,
    output: std::sync::Mutex<Box<dyn Write + Send>>,
}

impl TerminalConfirmation {
    /// Prompt on stdout, read answers from stdin
    pub fn new() -> Self {
        if !is_interactive() {
            warn!("stdin is not a terminal; confirmations will be read from piped input");
        }
        Self::with_io(
            Box::new(|| Box::new(BufReader::new(tokio::io::stdin())) as LineReader),
            Box::new(io::stdout()),
        )
    }

    pub fn with_io(open_input: OpenInput, output: Box<dyn Write + Send>) -> Self {
        Self {
            open_input,
            prompt_lock: Mutex::new(()),
            output: std::sync::Mutex::new(output),
        }
    }

    fn write(&self, text: &str) {
        if let Ok(mut out) = self.output.lock() {
            let _ = write!(out, "{}", text);
            let _ = out.flush();
        }
    }
}

impl Default for TerminalConfirmation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfirmationHandler for TerminalConfirmation {
    async fn confirm(&self, request: &ActionRequest, description: &str) -> Decision {
        let _prompt = self.prompt_lock.lock().await;
        let mut input = (self.open_input)();
        self.write(&format!("\n  \x1b[1m[Action]\x1b[0m {}\n", description));

        loop {
            self.write("  Confirm? [y/n/q]: ");

            let mut line = String::new();
            match input.read_line(&mut line).await {
                Ok(0) => {
                    debug!("End of input while confirming, aborting");
                    self.write("\n");
                    return Decision::Abort;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Failed to read confirmation, aborting");
                    return Decision::Abort;
                }
            }

            match parse_reply(&line) {
                Some(Decision::Deny) => {
                    self.write("  Skipped.\n");
                    return Decision::Deny;
                }
                Some(decision) => return decision,
                None => {
                    debug!(action = %request.action_name(), reply = %line.trim(), "Unrecognized reply");
                    self.write("  Please enter 'y' (yes), 'n' (no), or 'q' (quit)\n");
                }
            }
        }
    }
}

/// A confirmation handler that always approves
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, _request: &ActionRequest, _description: &str) -> Decision {
        Decision::Approve
    }
}
