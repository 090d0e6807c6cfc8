//! Per-session progress through one workflow instance.
//!
//! A `SessionState` is only ever touched by the
//! [`SessionRegistry`](crate::registry::SessionRegistry). Applying a
//! completion is a synchronous step from (state, completion) to
//! (state', new work items).

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use agentsim_core::error::{AgentSimError, Result};
use agentsim_core::{Draw, Sampler, SessionId, SimTime, StepKind, StreamKey};
use agentsim_workflow::{StepDefinition, StepSpec, WorkflowDag};

use crate::work_item::{InstanceKey, StepCompletion, WorkItem, WorkParams};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// A step at one iteration, all branches taken together.
pub(crate) type StepIter = (String, u32);

/// An emitted instance waiting for its completion.
#[derive(Debug, Clone)]
pub(crate) struct Issued {
    pub released_at: SimTime,
    pub eligible_at: SimTime,
    pub kind: StepKind,
    /// The parent step completion that released this instance.
    pub gate: Option<StepIter>,
}

/// A completed instance.
#[derive(Debug, Clone)]
pub(crate) struct Finished {
    pub key: InstanceKey,
    pub kind: StepKind,
    pub fan_out: bool,
    pub released_at: SimTime,
    pub eligible_at: SimTime,
    pub completed_at: SimTime,
    pub gate: Option<StepIter>,
}

pub struct SessionState {
    pub(crate) id: SessionId,
    pub(crate) dag: Arc<WorkflowDag>,
    pub(crate) status: SessionStatus,
    pub(crate) root_eligible_at: SimTime,
    /// Step-level completion times, populated once every branch finished.
    pub(crate) completions: HashMap<StepIter, SimTime>,
    /// Remaining parents per fan-in step and iteration.
    pub(crate) pending_joins: HashMap<StepIter, usize>,
    /// Remaining branches per fan-out step and iteration.
    pub(crate) pending_branches: HashMap<StepIter, u32>,
    /// Step iterations already emitted; each is emitted at most once.
    pub(crate) released: HashSet<StepIter>,
    /// Completed loop passes.
    pub(crate) loop_iteration: u32,
    /// Accumulated output tokens per `accumulate` step.
    pub(crate) context: HashMap<String, u64>,
    pub(crate) outstanding: BTreeMap<InstanceKey, Issued>,
    pub(crate) history: Vec<Finished>,
    pub(crate) finished: HashMap<InstanceKey, usize>,
    /// History index of the branch that closed each step iteration.
    pub(crate) closed_by: HashMap<StepIter, usize>,
    pub(crate) emitted: u64,
    pub(crate) completed_at: Option<SimTime>,
}

impl SessionState {
    /// Create the state and emit the root step, released at `root_arrival`.
    pub(crate) fn start(
        id: SessionId,
        dag: Arc<WorkflowDag>,
        root_arrival: SimTime,
        sampler: &dyn Sampler,
    ) -> Result<(Self, Vec<WorkItem>)> {
        let mut state = Self {
            id,
            dag: Arc::clone(&dag),
            status: SessionStatus::Active,
            root_eligible_at: root_arrival,
            completions: HashMap::new(),
            pending_joins: HashMap::new(),
            pending_branches: HashMap::new(),
            released: HashSet::new(),
            loop_iteration: 0,
            context: HashMap::new(),
            outstanding: BTreeMap::new(),
            history: Vec::new(),
            finished: HashMap::new(),
            closed_by: HashMap::new(),
            emitted: 0,
            completed_at: None,
        };
        let items = state.emit(dag.root(), 0, root_arrival, "", None, sampler)?;
        state.root_eligible_at = items
            .iter()
            .map(|i| i.eligible_at)
            .min()
            .unwrap_or(root_arrival);
        Ok((state, items))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn workflow(&self) -> &WorkflowDag {
        &self.dag
    }

    /// Completed loop passes so far.
    pub fn loop_iteration(&self) -> u32 {
        self.loop_iteration
    }

    /// When `step` finished at `iteration` (all branches), if it has.
    pub fn completion_time(&self, step: &str, iteration: u32) -> Option<SimTime> {
        self.completions.get(&(step.to_string(), iteration)).copied()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Apply one completion notification.
    ///
    /// Repeats of an already recorded instance are ignored. A completion for
    /// an instance that was never emitted, or one reported before its
    /// eligible time, is an integrity error.
    pub(crate) fn apply(
        &mut self,
        completion: &StepCompletion,
        sampler: &dyn Sampler,
    ) -> Result<Vec<WorkItem>> {
        let dag = Arc::clone(&self.dag);
        let step = dag
            .step(&completion.step_id)
            .ok_or_else(|| AgentSimError::UnknownStep {
                session: self.id.clone(),
                workflow: dag.name().to_string(),
                step: completion.step_id.clone(),
            })?;

        let key = completion.key();
        let at = completion.completed_at;
        if self.finished.contains_key(&key) {
            debug!(session = %self.id, instance = %key, at, "Duplicate completion ignored");
            return Ok(vec![]);
        }

        let issued = match self.outstanding.entry(key.clone()) {
            Entry::Vacant(_) => {
                return Err(AgentSimError::UnexpectedCompletion {
                    session: self.id.clone(),
                    step: key.step,
                    iteration: key.iteration,
                    branch: key.branch,
                })
            }
            Entry::Occupied(entry) => {
                if at < entry.get().eligible_at {
                    return Err(AgentSimError::CompletionBeforeEligible {
                        session: self.id.clone(),
                        step: key.step,
                        iteration: key.iteration,
                        eligible_at: entry.get().eligible_at,
                        completed_at: at,
                    });
                }
                entry.remove()
            }
        };

        self.finished.insert(key.clone(), self.history.len());
        self.history.push(Finished {
            key: key.clone(),
            kind: issued.kind,
            fan_out: step.is_fan_out(),
            released_at: issued.released_at,
            eligible_at: issued.eligible_at,
            completed_at: at,
            gate: issued.gate,
        });

        let items = match self.close_step(step, key.iteration) {
            Some(done_at) => self.release_children(&dag, step, key.iteration, done_at, sampler)?,
            None => vec![],
        };

        if self.outstanding.is_empty() && !self.pending_joins.is_empty() {
            warn!(
                session = %self.id,
                workflow = %dag.name(),
                at,
                waiting = self.pending_joins.len(),
                "Nothing outstanding but joins are still waiting; session left active"
            );
        } else if self.outstanding.is_empty() {
            self.status = SessionStatus::Completed;
            self.completed_at = Some(at);
            info!(
                session = %self.id,
                workflow = %dag.name(),
                at,
                steps = self.history.len(),
                "Session completed"
            );
        }

        Ok(items)
    }

    /// Record a step-level completion once every branch of `step` at
    /// `iteration` finished. Returns the step's completion time (its
    /// latest branch), or None while branches are still running.
    fn close_step(&mut self, step: &StepDefinition, iteration: u32) -> Option<SimTime> {
        let step_iter: StepIter = (step.id.clone(), iteration);

        if step.is_fan_out() {
            let remaining = self
                .pending_branches
                .entry(step_iter.clone())
                .or_insert(step.fan_out);
            *remaining -= 1;
            if *remaining > 0 {
                return None;
            }
            self.pending_branches.remove(&step_iter);
        }

        let mut closing: Option<usize> = None;
        for branch in 0..step.fan_out {
            let key = InstanceKey::new(step.id.clone(), iteration, branch);
            if let Some(&idx) = self.finished.get(&key) {
                let later = closing
                    .map_or(true, |c| self.history[idx].completed_at > self.history[c].completed_at);
                if later {
                    closing = Some(idx);
                }
            }
        }
        let idx = closing?;
        let done_at = self.history[idx].completed_at;
        self.completions.insert(step_iter.clone(), done_at);
        self.closed_by.insert(step_iter, idx);
        Some(done_at)
    }

    /// Examine the children of a completed step and emit the ones that
    /// became eligible, plus the loop re-entry when `step` ends a pass.
    fn release_children(
        &mut self,
        dag: &WorkflowDag,
        step: &StepDefinition,
        iteration: u32,
        done_at: SimTime,
        sampler: &dyn Sampler,
    ) -> Result<Vec<WorkItem>> {
        let mut items = Vec::new();
        let gate: StepIter = (step.id.clone(), iteration);
        let in_body = dag.is_loop_member(&step.id);

        if let Some(lp) = dag.loop_def().filter(|lp| in_body && lp.exit == step.id) {
            self.loop_iteration = iteration + 1;
            if self.loop_iteration < lp.max_iterations {
                let entry = dag
                    .step(&lp.entry)
                    .ok_or_else(|| AgentSimError::UnknownStep {
                        session: self.id.clone(),
                        workflow: dag.name().to_string(),
                        step: lp.entry.clone(),
                    })?;
                debug!(
                    session = %self.id,
                    pass = self.loop_iteration,
                    entry = %entry.id,
                    "Loop re-entry"
                );
                let next = self.loop_iteration;
                items.extend(self.emit(entry, next, done_at, &lp.exit, Some(gate.clone()), sampler)?);
            } else {
                debug!(session = %self.id, passes = self.loop_iteration, "Loop exhausted");
            }
        }

        for child in dag.children(&step.id) {
            let child_iter = match (in_body, dag.is_loop_member(&child.id)) {
                (true, true) => iteration,
                (true, false) => {
                    // Loop-exit edge: only the final pass releases it.
                    let final_pass = dag.loop_def().map_or(0, |lp| lp.final_pass());
                    if iteration < final_pass {
                        continue;
                    }
                    0
                }
                (false, _) => 0,
            };
            if self.released.contains(&(child.id.clone(), child_iter)) {
                continue;
            }

            let (released_at, child_gate) = if child.is_fan_in() {
                match self.join(dag, child, child_iter, &step.id) {
                    Some(ready) => ready,
                    None => continue,
                }
            } else {
                (done_at, gate.clone())
            };
            items.extend(self.emit(
                child,
                child_iter,
                released_at,
                child.canonical_parent(),
                Some(child_gate),
                sampler,
            )?);
        }

        Ok(items)
    }

    /// Count one parent arrival at a fan-in child. Returns the release time
    /// (latest parent completion) and the gating parent once the last
    /// parent is in.
    fn join(
        &mut self,
        dag: &WorkflowDag,
        child: &StepDefinition,
        child_iter: u32,
        trigger: &str,
    ) -> Option<(SimTime, StepIter)> {
        let child_in_body = dag.is_loop_member(&child.id);
        let final_pass = dag.loop_def().map_or(0, |lp| lp.final_pass());
        let parent_iter = |parent: &str| match (dag.is_loop_member(parent), child_in_body) {
            (true, true) => child_iter,
            (true, false) => final_pass,
            (false, _) => 0,
        };

        let target: StepIter = (child.id.clone(), child_iter);
        let completions = &self.completions;
        let remaining = self.pending_joins.entry(target.clone()).or_insert_with(|| {
            child
                .depends_on
                .iter()
                .filter(|p| {
                    p.as_str() == trigger
                        || !completions.contains_key(&(p.to_string(), parent_iter(p.as_str())))
                })
                .count()
        });
        *remaining -= 1;
        if *remaining > 0 {
            debug!(
                session = %self.id,
                step = %child.id,
                iteration = child_iter,
                remaining = *remaining,
                "Fan-in waiting"
            );
            return None;
        }
        self.pending_joins.remove(&target);

        let mut ready: Option<(SimTime, StepIter)> = None;
        for parent in &child.depends_on {
            let key: StepIter = (parent.clone(), parent_iter(parent.as_str()));
            if let Some(&t) = self.completions.get(&key) {
                if ready.as_ref().map_or(true, |(best, _)| t > *best) {
                    ready = Some((t, key));
                }
            }
        }
        ready
    }

    /// Emit every branch of `step` at `iteration`, sampling its parameters.
    fn emit(
        &mut self,
        step: &StepDefinition,
        iteration: u32,
        released_at: SimTime,
        stream_parent: &str,
        gate: Option<StepIter>,
        sampler: &dyn Sampler,
    ) -> Result<Vec<WorkItem>> {
        let dag = Arc::clone(&self.dag);
        let session = self.id.clone();
        let prior = if step.accumulate {
            self.context.get(&step.id).copied().unwrap_or(0)
        } else {
            0
        };
        let mut grown = 0u64;
        let mut items = Vec::with_capacity(step.fan_out as usize);

        for branch in 0..step.fan_out {
            let stream = |draw| StreamKey {
                session: &session,
                parent: stream_parent,
                child: &step.id,
                iteration,
                branch,
                draw,
            };
            let (eligible_at, params) = match &step.spec {
                StepSpec::LlmCall {
                    input_tokens,
                    output_tokens,
                } => {
                    let input = to_units(sampler.sample(input_tokens, &stream(Draw::InputTokens)));
                    let output =
                        to_units(sampler.sample(output_tokens, &stream(Draw::OutputTokens)));
                    grown = grown.saturating_add(output);
                    (
                        released_at,
                        WorkParams::LlmCall {
                            input_tokens: input.saturating_add(prior),
                            output_tokens: output,
                        },
                    )
                }
                StepSpec::ToolCall { tool } => {
                    let tool = dag.tool(tool).ok_or_else(|| AgentSimError::UnknownTool {
                        workflow: dag.name().to_string(),
                        tool: tool.clone(),
                    })?;
                    let latency = to_units(sampler.sample(&tool.latency, &stream(Draw::ToolLatency)));
                    let output =
                        to_units(sampler.sample(&tool.output_tokens, &stream(Draw::ToolOutput)));
                    (
                        released_at.saturating_add(latency),
                        WorkParams::ToolCall {
                            latency,
                            output_tokens: output,
                        },
                    )
                }
            };

            let item = WorkItem {
                session_id: session.clone(),
                step_id: step.id.clone(),
                iteration,
                branch,
                released_at,
                eligible_at,
                params,
            };
            self.outstanding.insert(
                item.key(),
                Issued {
                    released_at,
                    eligible_at,
                    kind: step.kind(),
                    gate: gate.clone(),
                },
            );
            self.emitted += 1;
            debug!(
                session = %session,
                step = %step.id,
                iteration,
                branch,
                released_at,
                eligible_at,
                "Work item emitted"
            );
            items.push(item);
        }

        if step.accumulate {
            let total = self.context.entry(step.id.clone()).or_default();
            *total = total.saturating_add(grown);
        }
        self.released.insert((step.id.clone(), iteration));
        Ok(items)
    }
}

/// Round a sampled value to whole tokens or ticks.
fn to_units(value: f64) -> u64 {
    value.round() as u64
}
