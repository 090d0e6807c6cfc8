use std::collections::BTreeSet;

use agentsim_core::{Distribution, StepKind};

/// Kind-specific payload of a validated step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSpec {
    LlmCall {
        input_tokens: Distribution,
        output_tokens: Distribution,
    },
    ToolCall {
        tool: String,
    },
}

/// One node of a validated workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub id: String,
    /// Parents, deduplicated, in declaration order. Loop back-edges are
    /// not included.
    pub depends_on: Vec<String>,
    /// Number of parallel instances emitted per activation (1 = no fan-out).
    pub fan_out: u32,
    /// Grow the input size with prior loop passes' output.
    pub accumulate: bool,
    pub spec: StepSpec,
}

impl StepDefinition {
    pub fn kind(&self) -> StepKind {
        match self.spec {
            StepSpec::LlmCall { .. } => StepKind::LlmCall,
            StepSpec::ToolCall { .. } => StepKind::ToolCall,
        }
    }

    /// More than one parent: emission waits for a join.
    pub fn is_fan_in(&self) -> bool {
        self.depends_on.len() > 1
    }

    pub fn is_fan_out(&self) -> bool {
        self.fan_out > 1
    }

    /// The parent whose identity addresses this step's sampling streams.
    pub fn canonical_parent(&self) -> &str {
        self.depends_on.first().map(String::as_str).unwrap_or("")
    }
}

/// Named external-call profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub latency: Distribution,
    pub output_tokens: Distribution,
}

/// The workflow's bounded loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDefinition {
    pub members: BTreeSet<String>,
    pub max_iterations: u32,
    /// Only member without an in-body parent; re-emitted on each new pass.
    pub entry: String,
    /// Only member without an in-body child; its completion ends a pass.
    pub exit: String,
}

impl LoopDefinition {
    pub fn contains(&self, step: &str) -> bool {
        self.members.contains(step)
    }

    /// Iteration index of the last pass.
    pub fn final_pass(&self) -> u32 {
        self.max_iterations - 1
    }
}
