//! Workflow execution engine.
//!
//! The host simulator owns the clock and the event queue. It creates one
//! session per root arrival through [`SessionRegistry::create_session`] and
//! reports every finished work item through
//! [`SessionRegistry::on_step_complete`]; the registry answers with the work
//! items that became eligible as a result, which the host schedules as new
//! arrivals.
//!
//! ```text
//! host ──create_session──► SessionRegistry ──► root WorkItem
//!  ▲                             │
//!  └──── Vec<WorkItem> ◄── on_step_complete(StepCompletion)
//! ```

pub mod registry;
pub mod replay;
pub mod report;
pub mod state;
pub mod work_item;

pub use registry::{ConservationStats, HorizonReport, SessionRegistry};
pub use replay::{ReplayHost, ReplayOutcome};
pub use report::{PathHop, SessionReport};
pub use state::SessionStatus;
pub use work_item::{InstanceKey, StepCompletion, WorkItem, WorkParams};
