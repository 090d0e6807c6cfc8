use thiserror::Error;

use crate::types::{SessionId, SimTime};

/// Structural problems found while validating a workflow description.
///
/// Every variant names the workflow and the offending step or edge so the
/// description can be fixed without re-running anything.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("workflow '{workflow}' defines no steps")]
    EmptyWorkflow { workflow: String },

    #[error("workflow '{workflow}': step '{step}' is defined more than once")]
    DuplicateStep { workflow: String, step: String },

    // (a) reference resolution
    #[error("workflow '{workflow}': step '{step}' depends on unknown step '{parent}'")]
    UnknownDependency {
        workflow: String,
        step: String,
        parent: String,
    },

    #[error("workflow '{workflow}': step '{step}' references unknown tool '{tool}'")]
    UnknownTool {
        workflow: String,
        step: String,
        tool: String,
    },

    #[error("workflow '{workflow}': loop body names unknown step '{step}'")]
    UnknownLoopMember { workflow: String, step: String },

    #[error("workflow '{workflow}': loop step '{step}' depends on '{parent}', which is declared after it but does not follow it in the body; declare '{parent}' first")]
    MisorderedLoopEdge {
        workflow: String,
        step: String,
        parent: String,
    },

    // (b) acyclicity
    #[error("workflow '{workflow}': dependency cycle {}", path.join(" -> "))]
    Cycle { workflow: String, path: Vec<String> },

    // (c) root
    #[error("workflow '{workflow}' has no root step")]
    NoRoot { workflow: String },

    #[error("workflow '{workflow}' has {} root steps ({}), expected exactly one", roots.len(), roots.join(", "))]
    MultipleRoots { workflow: String, roots: Vec<String> },

    // (d) fan-out
    #[error("workflow '{workflow}': step '{step}' has fan_out {fan_out}, must be at least 2 when present")]
    InvalidFanOut {
        workflow: String,
        step: String,
        fan_out: u32,
    },

    // (e) loop shape
    #[error("workflow '{workflow}': loop body is not connected, unreachable members: {}", unreachable.join(", "))]
    DisconnectedLoop {
        workflow: String,
        unreachable: Vec<String>,
    },

    #[error("workflow '{workflow}': loop max_iterations must be at least 1")]
    InvalidLoopBound { workflow: String },

    #[error("workflow '{workflow}': loop body must have exactly one entry step, found [{}]", candidates.join(", "))]
    AmbiguousLoopEntry {
        workflow: String,
        candidates: Vec<String>,
    },

    #[error("workflow '{workflow}': loop body must have exactly one exit step, found [{}]", candidates.join(", "))]
    AmbiguousLoopExit {
        workflow: String,
        candidates: Vec<String>,
    },

    #[error("workflow '{workflow}': loop step '{step}' depends on '{parent}', which only runs after the loop body")]
    LoopWaitsOnExit {
        workflow: String,
        step: String,
        parent: String,
    },

    // (f) kind/field pairing
    #[error("workflow '{workflow}': llm-call step '{step}' needs both input and output size distributions")]
    MissingSizeDistribution { workflow: String, step: String },

    #[error("workflow '{workflow}': tool-call step '{step}' must not carry size distributions")]
    UnexpectedSizeDistribution { workflow: String, step: String },

    #[error("workflow '{workflow}': tool-call step '{step}' has no tool reference")]
    MissingTool { workflow: String, step: String },

    #[error("workflow '{workflow}': llm-call step '{step}' must not reference a tool")]
    UnexpectedTool { workflow: String, step: String },

    // (g) accumulate placement
    #[error("workflow '{workflow}': step '{step}' sets accumulate but is not in the loop body")]
    MisplacedAccumulate { workflow: String, step: String },

    #[error("workflow '{workflow}': tool-call step '{step}' cannot accumulate context")]
    AccumulateOnToolCall { workflow: String, step: String },

    #[error("workflow '{workflow}': invalid distribution for {owner}: {reason}")]
    InvalidDistribution {
        workflow: String,
        owner: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum AgentSimError {
    // Registry integrity errors (host/engine integration bugs)
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("Session {session}: step '{step}' is not part of workflow '{workflow}'")]
    UnknownStep {
        session: SessionId,
        workflow: String,
        step: String,
    },

    #[error("Workflow '{workflow}' has no tool named '{tool}'")]
    UnknownTool { workflow: String, tool: String },

    #[error("Session already exists: {0}")]
    DuplicateSession(SessionId),

    #[error("Session {session}: completion for {step}#{iteration}.{branch} which was never emitted")]
    UnexpectedCompletion {
        session: SessionId,
        step: String,
        iteration: u32,
        branch: u32,
    },

    #[error("Session {session}: {step}#{iteration} completed at {completed_at} before it was eligible at {eligible_at}")]
    CompletionBeforeEligible {
        session: SessionId,
        step: String,
        iteration: u32,
        eligible_at: SimTime,
        completed_at: SimTime,
    },

    #[error("Registry closed at horizon {0}, no further work is accepted")]
    RegistryClosed(SimTime),

    // Definition-time errors
    #[error("Workflow validation failed: {0}")]
    Validation(#[from] ValidationError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AgentSimError>;
