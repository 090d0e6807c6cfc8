//! Workflow definitions for agentic sessions.
//!
//! A workflow is a DAG of steps, each either an LLM call or an external tool
//! call, with at most one bounded loop. Raw [`WorkflowDescription`]s are
//! turned into an immutable [`WorkflowDag`] by [`validate`]; the DAG is then
//! shared read-only by every session instantiated from it.
//!
//! ```text
//! workflow.toml ──► WorkflowDescription ──► validate() ──► Arc<WorkflowDag>
//!                                                            │
//!                                                   SessionRegistry (engine)
//! ```

pub mod dag;
pub mod description;
pub mod step;
pub mod validator;

pub use dag::WorkflowDag;
pub use description::{LoopDescription, StepDescription, ToolDescription, WorkflowDescription};
pub use step::{LoopDefinition, StepDefinition, StepSpec, ToolDefinition};
pub use validator::validate;
