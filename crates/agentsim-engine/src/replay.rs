//! A minimal deterministic host for driving a registry without a full
//! simulator.
//!
//! There is no resource model: every work item runs as soon as it is
//! eligible. llm-call items take
//! `ceil(input * prefill_per_token + output * decode_per_token)` ticks and
//! tool-call items complete at their eligible time. Events scheduled for the
//! same tick are ordered by [`TieBreak`].

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use agentsim_core::config::{ReplayConfig, TieBreak};
use agentsim_core::error::Result;
use agentsim_core::{EngineConfig, SessionId, SimTime};
use agentsim_workflow::WorkflowDag;

use crate::registry::{HorizonReport, SessionRegistry};
use crate::report::SessionReport;
use crate::work_item::{StepCompletion, WorkItem, WorkParams};

enum Event {
    Arrival {
        session: SessionId,
        workflow: Arc<WorkflowDag>,
    },
    Finish(StepCompletion),
}

struct Scheduled {
    at: SimTime,
    order: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

/// Result of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    /// Every work item the registry emitted, in emission order.
    pub trace: Vec<WorkItem>,
    pub sessions: Vec<SessionReport>,
    pub horizon: HorizonReport,
}

pub struct ReplayHost {
    registry: SessionRegistry,
    config: ReplayConfig,
    horizon: Option<SimTime>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    now: SimTime,
    trace: Vec<WorkItem>,
}

impl ReplayHost {
    pub fn new(registry: SessionRegistry, config: ReplayConfig, horizon: Option<SimTime>) -> Self {
        Self {
            registry,
            config,
            horizon,
            queue: BinaryHeap::new(),
            seq: 0,
            now: 0,
            trace: Vec::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            SessionRegistry::with_seed(config.engine.seed),
            config.replay.clone(),
            config.engine.horizon,
        )
    }

    /// Schedule one root arrival.
    pub fn add_arrival(&mut self, workflow: Arc<WorkflowDag>, session: SessionId, at: SimTime) {
        self.push(at, Event::Arrival { session, workflow });
    }

    /// Schedule the configured number of root arrivals for `workflow`,
    /// named `<workflow>-<n>`.
    pub fn add_sessions(&mut self, workflow: Arc<WorkflowDag>) {
        for n in 0..self.config.sessions {
            let at = self.config.first_arrival + n as SimTime * self.config.interarrival;
            let id = SessionId::new(format!("{}-{}", workflow.name(), n));
            self.add_arrival(Arc::clone(&workflow), id, at);
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Process events until the queue drains or the horizon passes.
    pub fn run(mut self) -> Result<ReplayOutcome> {
        while let Some(Reverse(next)) = self.queue.pop() {
            if self.horizon.is_some_and(|h| next.at > h) {
                debug!(at = next.at, pending = self.queue.len() + 1, "Horizon reached");
                break;
            }
            self.now = next.at;
            let items = match next.event {
                Event::Arrival { session, workflow } => {
                    self.registry.create_session(workflow, session, next.at)?
                }
                Event::Finish(completion) => self.registry.on_step_complete(&completion)?,
            };
            for item in items {
                self.schedule(item);
            }
        }

        let horizon = self.horizon.unwrap_or(self.now);
        let report = self.registry.close_at_horizon(horizon);
        info!(
            horizon,
            items = self.trace.len(),
            completed = report.completed_sessions,
            abandoned = report.abandoned.len(),
            "Replay finished"
        );
        Ok(ReplayOutcome {
            trace: self.trace,
            sessions: self.registry.reports(),
            horizon: report,
        })
    }

    fn schedule(&mut self, item: WorkItem) {
        let finish_at = match item.params {
            WorkParams::LlmCall {
                input_tokens,
                output_tokens,
            } => {
                let service = input_tokens as f64 * self.config.prefill_per_token
                    + output_tokens as f64 * self.config.decode_per_token;
                item.eligible_at.saturating_add(service.ceil() as SimTime)
            }
            WorkParams::ToolCall { .. } => item.eligible_at,
        };
        self.push(finish_at, Event::Finish(item.completion(finish_at)));
        self.trace.push(item);
    }

    fn push(&mut self, at: SimTime, event: Event) {
        self.seq += 1;
        let order = match self.config.tie_break {
            TieBreak::Fifo => self.seq,
            TieBreak::Lifo => u64::MAX - self.seq,
        };
        self.queue.push(Reverse(Scheduled { at, order, event }));
    }
}
