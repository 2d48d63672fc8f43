//! Agent framework for desktop tasks
//!
//! Observe-think-act loop: the model proposes actions, the gate reviews
//! them, the executor performs them, and the observations flow back.

mod agent_loop;
mod model;
mod state;

pub use agent_loop::AgentLoop;
pub use model::AnthropicModel;
pub use state::{AgentConfig, TerminationReason, TerminationReport};
