//! Agent configuration and run state

use std::fmt;

use crate::conversation::Conversation;
use crate::tools::security::ConfirmMode;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: String,
    /// Maximum model turns with actions before stopping
    pub max_iterations: usize,
    /// Whether to ask before each action
    pub confirm_mode: ConfirmMode,
    /// Whether to print progress to the terminal
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            max_iterations: 10,
            confirm_mode: ConfirmMode::Confirm,
            verbose: true,
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_confirm_mode(mut self, mode: ConfirmMode) -> Self {
        self.confirm_mode = mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The model answered without proposing actions
    Completed,
    /// The iteration budget ran out
    IterationLimit,
    /// The operator aborted, or the failsafe fired
    AbortedByUser,
    /// The model could not be queried
    ModelError,
}

impl TerminationReason {
    /// Process exit code for a single-task run
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminationReason::Completed => 0,
            TerminationReason::ModelError => 1,
            TerminationReason::IterationLimit => 2,
            TerminationReason::AbortedByUser => 130,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::IterationLimit => write!(f, "iteration_limit"),
            TerminationReason::AbortedByUser => write!(f, "aborted_by_user"),
            TerminationReason::ModelError => write!(f, "model_error"),
        }
    }
}

/// Phase of a run; every phase except `Pending` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Pending,
    Terminated(TerminationReason),
}

/// State of the agent during execution
#[derive(Debug)]
pub struct AgentState {
    pub conversation: Conversation,
    /// Model turns processed so far
    pub iteration: usize,
    pub phase: AgentPhase,
    /// Last text the model produced
    pub final_text: Option<String>,
    /// Error detail for `ModelError`
    pub error: Option<String>,
}

impl AgentState {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            iteration: 0,
            phase: AgentPhase::Pending,
            final_text: None,
            error: None,
        }
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn terminate(&mut self, reason: TerminationReason) {
        if self.phase == AgentPhase::Pending {
            self.phase = AgentPhase::Terminated(reason);
        }
    }

    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.terminate(TerminationReason::ModelError);
    }

    pub fn is_terminated(&self) -> bool {
        self.phase != AgentPhase::Pending
    }

    /// Convert into the report handed to the front-end
    pub fn into_report(self) -> TerminationReport {
        let reason = match self.phase {
            AgentPhase::Terminated(reason) => reason,
            // Only reachable if the loop exits without a verdict
            AgentPhase::Pending => TerminationReason::IterationLimit,
        };
        TerminationReport {
            reason,
            iterations: self.iteration,
            final_text: self.final_text,
            error: self.error,
            conversation: self.conversation,
        }
    }
}

/// Outcome of `AgentLoop::run`
#[derive(Debug)]
pub struct TerminationReport {
    pub reason: TerminationReason,
    pub iterations: usize,
    pub final_text: Option<String>,
    pub error: Option<String>,
    pub conversation: Conversation,
}

impl TerminationReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}
