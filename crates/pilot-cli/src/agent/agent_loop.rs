//! Agent loop implementation

use std::io::{stdout, IsTerminal, Write};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::conversation::{Conversation, Turn};
use crate::progress::Spinner;
use crate::tools::failsafe::Failsafe;
use crate::tools::security::{ConfirmationGate, ConfirmationHandler, Decision};
use crate::tools::{ActionExecutor, ActionResult};

use super::model::{ModelClient, ModelReply};
use super::state::{AgentConfig, AgentState, TerminationReason, TerminationReport};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const BLUE: &str = "\x1b[94m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// The agent loop orchestrator
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    executor: Arc<dyn ActionExecutor>,
    gate: ConfirmationGate,
    failsafe: Failsafe,
    config: AgentConfig,
}

/// How processing a model turn ended
enum TurnOutcome {
    Continue,
    Aborted,
}

impl AgentLoop {
    /// Create a new agent loop; the gate runs in `config.confirm_mode`
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: Arc<dyn ActionExecutor>,
        confirmation: Arc<dyn ConfirmationHandler>,
        failsafe: Failsafe,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            executor,
            gate: ConfirmationGate::new(config.confirm_mode, confirmation),
            failsafe,
            config,
        }
    }

    /// Run the agent with a task until a terminal condition
    #[instrument(skip(self), fields(model = %self.config.model))]
    pub async fn run(&self, task: &str) -> Result<TerminationReport> {
        let task = task.trim();
        if task.is_empty() {
            anyhow::bail!("Task must not be empty");
        }
        if self.config.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }

        info!(
            task_len = task.len(),
            max_iterations = self.config.max_iterations,
            confirm = ?self.config.confirm_mode,
            "Starting agent loop"
        );
        let mut state = AgentState::new(Conversation::new(task, &self.config.model));

        while !state.is_terminated() {
            if state.iteration >= self.config.max_iterations {
                warn!(max_iterations = self.config.max_iterations, "Agent reached maximum iterations");
                self.say(&format!(
                    "\n{}[Max iterations ({}) reached]{}",
                    YELLOW, self.config.max_iterations, RESET
                ));
                state.terminate(TerminationReason::IterationLimit);
                break;
            }

            self.say(&format!(
                "\n{}[Iteration {}/{}]{}",
                DIM,
                state.iteration + 1,
                self.config.max_iterations,
                RESET
            ));

            let reply = match self.query_model(&state).await {
                Some(Ok(reply)) => reply,
                Some(Err(e)) => {
                    warn!(error = %e, "Model request failed");
                    self.say(&format!("{}Model error: {:#}{}", RED, e, RESET));
                    state.fail(format!("{:#}", e));
                    break;
                }
                None => {
                    self.abort(&mut state);
                    break;
                }
            };

            if let Some(ref text) = reply.text {
                self.say(&format!("\n{}Model:{} {}", BLUE, RESET, text));
                state.final_text = Some(text.clone());
            }

            // No proposed actions is the model's completion signal
            if reply.actions.is_empty() {
                info!(iterations = state.iteration, "Agent completed task");
                state.conversation.append(Turn::Model { text: reply.text, actions: Vec::new() });
                self.say(&format!("\n{}[Task completed]{}", GREEN, RESET));
                state.terminate(TerminationReason::Completed);
                break;
            }

            match self.process_actions(&mut state, reply).await {
                TurnOutcome::Continue => state.increment_iteration(),
                TurnOutcome::Aborted => {
                    self.abort(&mut state);
                    break;
                }
            }
        }

        let report = state.into_report();
        info!(
            reason = %report.reason,
            iterations = report.iterations,
            turns = report.conversation.len(),
            "Agent loop completed"
        );
        Ok(report)
    }

    /// `None` when the failsafe fired while waiting
    async fn query_model(&self, state: &AgentState) -> Option<Result<ModelReply>> {
        if self.failsafe.is_tripped() {
            return None;
        }

        debug!(turns = state.conversation.len(), "Querying model");
        let mut spinner = (self.config.verbose && stdout().is_terminal()).then(|| {
            let mut s = Spinner::new("Thinking...");
            s.start();
            s
        });

        let result = tokio::select! {
            biased;
            _ = self.failsafe.tripped() => None,
            reply = self.model.next_turn(&self.config.model, state.conversation.snapshot()) => Some(reply),
        };

        if let Some(ref mut s) = spinner {
            s.stop().await;
        }
        result
    }

    /// Gate and execute each proposed action in order
    async fn process_actions(&self, state: &mut AgentState, reply: ModelReply) -> TurnOutcome {
        let actions = reply.actions.clone();
        state.conversation.append(Turn::Model { text: reply.text, actions: reply.actions });
        debug!(action_count = actions.len(), "Processing proposed actions");

        for request in &actions {
            let description = self.executor.describe(request);

            let decision = tokio::select! {
                biased;
                _ = self.failsafe.tripped() => Decision::Abort,
                d = self.gate.review(request, &description) => d,
            };

            let result = match decision {
                Decision::Abort => {
                    info!(action = %request.action_name(), "Operator aborted the task");
                    return TurnOutcome::Aborted;
                }
                Decision::Deny => {
                    info!(action = %request.action_name(), "Operator denied action");
                    self.say(&format!("  {}Denied:{} {}", YELLOW, RESET, description));
                    ActionResult::denied()
                }
                Decision::Approve => {
                    self.say(&format!("  {}Executing:{} {}", CYAN, RESET, description));
                    self.executor.execute(request).await
                }
            };

            self.report_result(&result);
            let aborted = result.is_aborted();
            state.conversation.append(Turn::Observation {
                request_id: request.id.clone(),
                result,
            });

            if aborted {
                return TurnOutcome::Aborted;
            }
        }

        TurnOutcome::Continue
    }

    fn report_result(&self, result: &ActionResult) {
        if result.success {
            debug!("Action succeeded");
            return;
        }
        if let Some(ref err) = result.error {
            self.say(&format!("  {}Failed [{}]:{} {}", YELLOW, err.code(), RESET, err));
        }
    }

    fn abort(&self, state: &mut AgentState) {
        self.say(&format!("\n{}[Aborted by user]{}", YELLOW, RESET));
        state.terminate(TerminationReason::AbortedByUser);
    }

    fn say(&self, line: &str) {
        if self.config.verbose {
            let mut out = stdout().lock();
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::computer::tests::FakeDesktop;
    use crate::tools::computer::ComputerTool;
    use crate::tools::desktop::ScreenSize;
    use crate::tools::security::tests::Scripted;
    use crate::tools::security::{AutoApprove, ConfirmMode};
    use crate::tools::{ActionError, ActionRequest};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned replies and checks the conversation it is shown
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelReply>>>,
        /// Reply used once the script runs out
        fallback: Option<ModelReply>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn forever(reply: ModelReply) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                fallback: Some(reply),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn next_turn(&self, _model: &str, conversation: &[Turn]) -> Result<ModelReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_every_request_answered(conversation);

            if let Some(reply) = self.replies.lock().unwrap().pop_front() {
                return reply;
            }
            match &self.fallback {
                Some(reply) => Ok(reply.clone()),
                None => Ok(ModelReply::done("script exhausted")),
            }
        }
    }

    /// Exactly one observation per proposed action, before the next query
    fn assert_every_request_answered(conversation: &[Turn]) {
        let mut proposed = Vec::new();
        let mut answered = Vec::new();
        for turn in conversation {
            match turn {
                Turn::Model { actions, .. } => proposed.extend(actions.iter().map(|a| a.id.clone())),
                Turn::Observation { request_id, .. } => answered.push(request_id.clone()),
                Turn::User { .. } => {}
            }
        }
        assert_eq!(proposed, answered, "every proposed action needs exactly one result");
    }

    /// Executor that succeeds and counts calls
    struct CountingExecutor {
        executed: Mutex<Vec<String>>,
    }

    impl CountingExecutor {
        fn new() -> Self {
            Self { executed: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn execute(&self, request: &ActionRequest) -> ActionResult {
            self.executed.lock().unwrap().push(request.id.clone());
            ActionResult::success("ok")
        }
    }

    fn action(id: &str, input: Value) -> ActionRequest {
        ActionRequest::new(id, "computer", input)
    }

    fn reply(actions: Vec<ActionRequest>) -> ModelReply {
        ModelReply { text: None, actions }
    }

    fn config(max_iterations: usize, mode: ConfirmMode) -> AgentConfig {
        AgentConfig::new("test-model")
            .with_max_iterations(max_iterations)
            .with_confirm_mode(mode)
            .with_verbose(false)
    }

    fn fake_computer(failsafe: &Failsafe) -> Arc<ComputerTool> {
        Arc::new(ComputerTool::new(
            Box::new(FakeDesktop::new()),
            ScreenSize { width: 1024, height: 768 },
            failsafe.clone(),
        ))
    }

    fn observations(report: &TerminationReport) -> Vec<ActionResult> {
        report
            .conversation
            .snapshot()
            .iter()
            .filter_map(|t| match t {
                Turn::Observation { result, .. } => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_click_then_complete() {
        let failsafe = Failsafe::new();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "left_click", "coordinate": [10, 10]}))])),
            Ok(ModelReply::done("Clicked.")),
        ]));

        let agent = AgentLoop::new(
            model.clone(),
            fake_computer(&failsafe),
            Arc::new(AutoApprove),
            failsafe,
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("click at (10,10)").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.final_text.as_deref(), Some("Clicked."));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let results = observations(&report);
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let model = Arc::new(ScriptedModel::forever(reply(vec![action(
            "t",
            json!({"action": "screenshot"}),
        )])));
        let executor = Arc::new(CountingExecutor::new());

        let agent = AgentLoop::new(
            model.clone(),
            executor.clone(),
            Arc::new(AutoApprove),
            Failsafe::new(),
            config(1, ConfirmMode::Auto),
        );

        let report = agent.run("never finishes").await.unwrap();
        assert_eq!(report.reason, TerminationReason::IterationLimit);
        assert_ne!(report.exit_code(), 0);
        assert_eq!(report.iterations, 1);
        assert_eq!(executor.executed.lock().unwrap().len(), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_iterations_never_exceed_budget() {
        for max in 1..=4 {
            let model = Arc::new(ScriptedModel::forever(reply(vec![
                action("a", json!({"action": "screenshot"})),
                action("b", json!({"action": "screenshot"})),
            ])));
            let agent = AgentLoop::new(
                model,
                Arc::new(CountingExecutor::new()),
                Arc::new(AutoApprove),
                Failsafe::new(),
                config(max, ConfirmMode::Auto),
            );

            let report = agent.run("loop").await.unwrap();
            assert!(report.iterations <= max);
            assert_eq!(report.reason, TerminationReason::IterationLimit);
        }
    }

    #[tokio::test]
    async fn test_out_of_bounds_does_not_terminate() {
        let failsafe = Failsafe::new();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "mouse_move", "coordinate": [-5, 10]}))])),
            Ok(ModelReply::done("Gave up on that coordinate.")),
        ]));

        let agent = AgentLoop::new(
            model.clone(),
            fake_computer(&failsafe),
            Arc::new(AutoApprove),
            failsafe,
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("move somewhere").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        let results = observations(&report);
        assert_eq!(results[0].error.as_ref().map(|e| e.code()), Some("bounds"));
    }

    #[tokio::test]
    async fn test_unsupported_action_is_fed_back() {
        let failsafe = Failsafe::new();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "teleport"}))])),
            Ok(ModelReply::done("ok")),
        ]));

        let agent = AgentLoop::new(
            model,
            fake_computer(&failsafe),
            Arc::new(AutoApprove),
            failsafe,
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("teleport").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(
            observations(&report)[0].error,
            Some(ActionError::Unsupported("teleport".to_string()))
        );
    }

    #[tokio::test]
    async fn test_deny_records_result_and_continues() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "type", "text": "rm -rf"}))])),
            Ok(ModelReply::done("Understood.")),
        ]));
        let executor = Arc::new(CountingExecutor::new());
        let handler = Arc::new(Scripted::new([Decision::Deny]));

        let agent = AgentLoop::new(
            model.clone(),
            executor.clone(),
            handler,
            Failsafe::new(),
            config(10, ConfirmMode::Confirm),
        );

        let report = agent.run("type something").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(report.iterations, 1);
        assert!(executor.executed.lock().unwrap().is_empty());

        let results = observations(&report);
        assert_eq!(results, vec![ActionResult::denied()]);
    }

    #[tokio::test]
    async fn test_abort_discards_remaining_actions() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(reply(vec![
            action("t1", json!({"action": "left_click", "coordinate": [1, 1]})),
            action("t2", json!({"action": "left_click", "coordinate": [2, 2]})),
            action("t3", json!({"action": "left_click", "coordinate": [3, 3]})),
        ]))]));
        let executor = Arc::new(CountingExecutor::new());
        let handler = Arc::new(Scripted::new([Decision::Approve, Decision::Abort]));

        let agent = AgentLoop::new(
            model.clone(),
            executor.clone(),
            handler.clone(),
            Failsafe::new(),
            config(10, ConfirmMode::Confirm),
        );

        let report = agent.run("click three times").await.unwrap();
        assert_eq!(report.reason, TerminationReason::AbortedByUser);
        assert_ne!(report.exit_code(), 0);
        assert_eq!(executor.executed.lock().unwrap().as_slice(), ["t1"]);
        assert_eq!(handler.asked.load(Ordering::SeqCst), 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.iterations, 0);
    }

    #[tokio::test]
    async fn test_mixed_decisions_within_one_turn() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![
                action("t1", json!({"action": "left_click", "coordinate": [1, 1]})),
                action("t2", json!({"action": "type", "text": "secret"})),
                action("t3", json!({"action": "key", "text": "Return"})),
            ])),
            Ok(ModelReply::done("done")),
        ]));
        let executor = Arc::new(CountingExecutor::new());
        let handler = Arc::new(Scripted::new([Decision::Approve, Decision::Deny, Decision::Approve]));

        let agent = AgentLoop::new(
            model.clone(),
            executor.clone(),
            handler.clone(),
            Failsafe::new(),
            config(10, ConfirmMode::Confirm),
        );

        let report = agent.run("click, type, enter").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(report.iterations, 1);
        assert_eq!(handler.asked.load(Ordering::SeqCst), 3);
        assert_eq!(executor.executed.lock().unwrap().as_slice(), ["t1", "t3"]);

        let results = observations(&report);
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1], ActionResult::denied());
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_gate_follows_configured_mode() {
        // A handler that would deny everything is never consulted in auto mode
        let handler = Arc::new(Scripted::new([Decision::Deny]));
        let executor = Arc::new(CountingExecutor::new());
        let agent = AgentLoop::new(
            Arc::new(ScriptedModel::new(vec![
                Ok(reply(vec![action("t1", json!({"action": "type", "text": "hi"}))])),
                Ok(ModelReply::done("done")),
            ])),
            executor.clone(),
            handler.clone(),
            Failsafe::new(),
            config(10, ConfirmMode::Auto),
        );

        agent.run("type hi").await.unwrap();
        assert_eq!(handler.asked.load(Ordering::SeqCst), 0);
        assert_eq!(executor.executed.lock().unwrap().as_slice(), ["t1"]);
    }

    #[tokio::test]
    async fn test_model_move_to_corner_is_not_an_operator_abort() {
        let failsafe = Failsafe::new();
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "mouse_move", "coordinate": [0, 0]}))])),
            Ok(reply(vec![action("t2", json!({"action": "screenshot"}))])),
            Ok(ModelReply::done("done")),
        ]));

        let agent = AgentLoop::new(
            model.clone(),
            fake_computer(&failsafe),
            Arc::new(AutoApprove),
            failsafe.clone(),
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("park the pointer").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(report.iterations, 2);
        assert!(!failsafe.is_tripped());

        let results = observations(&report);
        assert_eq!(results[0].error, Some(ActionError::Corner { x: 0, y: 0 }));
        assert!(results[1].success);
        assert!(results[1].image.is_some());
    }

    #[tokio::test]
    async fn test_auto_mode_never_prompts() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(reply(vec![action("t1", json!({"action": "key", "text": "Return"}))])),
            Ok(ModelReply::done("done")),
        ]));
        let handler = Arc::new(Scripted::new([]));

        let agent = AgentLoop::new(
            model,
            Arc::new(CountingExecutor::new()),
            handler.clone(),
            Failsafe::new(),
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("press enter").await.unwrap();
        assert_eq!(report.reason, TerminationReason::Completed);
        assert_eq!(handler.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_error_is_fatal_without_retry() {
        let model = Arc::new(ScriptedModel::new(vec![Err(anyhow::anyhow!("401 unauthorized"))]));

        let agent = AgentLoop::new(
            model.clone(),
            Arc::new(CountingExecutor::new()),
            Arc::new(AutoApprove),
            Failsafe::new(),
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("anything").await.unwrap();
        assert_eq!(report.reason, TerminationReason::ModelError);
        assert_eq!(report.exit_code(), 1);
        assert!(report.error.unwrap().contains("401"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failsafe_mid_move_aborts_task() {
        let failsafe = Failsafe::new();
        let mut desktop = FakeDesktop::new();
        desktop.trip_on_move = Some(failsafe.clone());
        let computer = Arc::new(ComputerTool::new(
            Box::new(desktop),
            ScreenSize { width: 1024, height: 768 },
            failsafe.clone(),
        ));

        let model = Arc::new(ScriptedModel::new(vec![Ok(reply(vec![
            action("t1", json!({"action": "mouse_move", "coordinate": [100, 100]})),
            action("t2", json!({"action": "left_click", "coordinate": [100, 100]})),
        ]))]));

        let agent = AgentLoop::new(
            model.clone(),
            computer,
            Arc::new(AutoApprove),
            failsafe,
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("move the mouse").await.unwrap();
        assert_eq!(report.reason, TerminationReason::AbortedByUser);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        let results = observations(&report);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_aborted());
    }

    #[tokio::test]
    async fn test_tripped_failsafe_stops_before_model_query() {
        let failsafe = Failsafe::new();
        failsafe.trip("test");
        let model = Arc::new(ScriptedModel::new(vec![]));

        let agent = AgentLoop::new(
            model.clone(),
            Arc::new(CountingExecutor::new()),
            Arc::new(AutoApprove),
            failsafe,
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("anything").await.unwrap();
        assert_eq!(report.reason, TerminationReason::AbortedByUser);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_empty_task() {
        let agent = AgentLoop::new(
            Arc::new(ScriptedModel::new(vec![])),
            Arc::new(CountingExecutor::new()),
            Arc::new(AutoApprove),
            Failsafe::new(),
            config(10, ConfirmMode::Auto),
        );
        assert!(agent.run("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_starts_with_task() {
        let agent = AgentLoop::new(
            Arc::new(ScriptedModel::new(vec![Ok(ModelReply::done("nothing to do"))])),
            Arc::new(CountingExecutor::new()),
            Arc::new(AutoApprove),
            Failsafe::new(),
            config(10, ConfirmMode::Auto),
        );

        let report = agent.run("say hi").await.unwrap();
        let turns = report.conversation.snapshot();
        assert_eq!(turns[0], Turn::User { text: "say hi".to_string() });
        assert!(matches!(turns.last(), Some(Turn::Model { actions, .. }) if actions.is_empty()));
        assert_eq!(report.iterations, 0);
    }
}
