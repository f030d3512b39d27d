//! Agent seam.
//!
//! The navigation policy lives outside this crate. The runner drives any
//! [`TaskAgent`] through an observe/decide loop: each step it hands the
//! agent the current page snapshot plus accumulated memory, and the agent
//! answers with an optional action to invoke and an opaque output that is
//! relayed as telemetry.

use async_trait::async_trait;
use serde_json::Value;

use crate::relay::StepValue;

/// One decision from the agent.
#[derive(Debug, Clone)]
pub struct AgentStep {
    /// Action to invoke this step, if any.
    pub action: Option<ActionCall>,
    /// Raw model output, relayed verbatim as step telemetry.
    pub output: StepValue,
    /// Set when the agent considers the task finished.
    pub done: Option<AgentOutcome>,
}

#[derive(Debug, Clone)]
pub struct ActionCall {
    pub name: String,
    pub args: Value,
}

/// Terminal verdict from the agent.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub summary: String,
}

/// What the agent sees each step.
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub task: &'a str,
    pub step_index: usize,
    /// DOM summary of the active page.
    pub snapshot: &'a str,
    /// Action results the agent chose to retain.
    pub memory: &'a [String],
}

#[async_trait]
pub trait TaskAgent: Send + Sync {
    async fn next_step(&self, observation: Observation<'_>) -> anyhow::Result<AgentStep>;
}
