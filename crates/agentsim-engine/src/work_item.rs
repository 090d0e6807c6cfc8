use serde::{Deserialize, Serialize};

use agentsim_core::{SessionId, SimTime, StepKind};

/// Identity of one emitted step instance within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub step: String,
    pub iteration: u32,
    /// Fan-out branch index; 0 for steps without fan-out.
    pub branch: u32,
}

impl InstanceKey {
    pub fn new(step: impl Into<String>, iteration: u32, branch: u32) -> Self {
        Self {
            step: step.into(),
            iteration,
            branch,
        }
    }
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}.{}", self.step, self.iteration, self.branch)
    }
}

/// Sampled execution parameters handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkParams {
    LlmCall {
        input_tokens: u64,
        output_tokens: u64,
    },
    ToolCall {
        latency: SimTime,
        output_tokens: u64,
    },
}

/// A unit of work the host turns into a simulated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub session_id: SessionId,
    pub step_id: String,
    pub iteration: u32,
    pub branch: u32,
    /// When the triggering parent completion happened.
    pub released_at: SimTime,
    /// Earliest time the item may start. Tool calls add their latency.
    pub eligible_at: SimTime,
    pub params: WorkParams,
}

impl WorkItem {
    pub fn kind(&self) -> StepKind {
        match self.params {
            WorkParams::LlmCall { .. } => StepKind::LlmCall,
            WorkParams::ToolCall { .. } => StepKind::ToolCall,
        }
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.step_id.clone(), self.iteration, self.branch)
    }

    /// The completion notification for this item finishing at `at`.
    pub fn completion(&self, at: SimTime) -> StepCompletion {
        StepCompletion {
            session_id: self.session_id.clone(),
            step_id: self.step_id.clone(),
            iteration: self.iteration,
            branch: self.branch,
            completed_at: at,
        }
    }
}

/// Notification from the host that a work item finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub session_id: SessionId,
    pub step_id: String,
    pub iteration: u32,
    pub branch: u32,
    pub completed_at: SimTime,
}

impl StepCompletion {
    /// Completion of branch 0 of `step_id` at `iteration`.
    pub fn new(
        session_id: impl Into<SessionId>,
        step_id: impl Into<String>,
        iteration: u32,
        completed_at: SimTime,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            step_id: step_id.into(),
            iteration,
            branch: 0,
            completed_at,
        }
    }

    pub fn on_branch(mut self, branch: u32) -> Self {
        self.branch = branch;
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.step_id.clone(), self.iteration, self.branch)
    }
}
