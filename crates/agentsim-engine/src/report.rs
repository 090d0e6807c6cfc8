//! Per-session metrics, answerable at completion or at the horizon.

use serde::{Deserialize, Serialize};

use agentsim_core::{SessionId, SimTime, StepKind};

use crate::state::{SessionState, SessionStatus};

/// One instance on a session's critical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathHop {
    pub step: String,
    pub iteration: u32,
    pub branch: u32,
    pub eligible_at: SimTime,
    pub completed_at: SimTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub workflow: String,
    pub status: SessionStatus,
    pub root_eligible_at: SimTime,
    /// Terminal completion time; None while active.
    pub finished_at: Option<SimTime>,
    /// `finished_at - root_eligible_at`; None while active.
    pub end_to_end_latency: Option<SimTime>,
    pub last_completion_at: Option<SimTime>,
    /// Completed step instances (each fan-out branch counts).
    pub steps_executed: usize,
    /// Sum of sampled latencies over completed tool calls.
    pub tool_wait: SimTime,
    pub fan_out_branches_completed: usize,
    /// Completed loop passes.
    pub loop_iterations: u32,
    pub critical_path: Vec<PathHop>,
    pub critical_path_latency: SimTime,
    pub items_emitted: u64,
    pub items_outstanding: usize,
}

impl SessionState {
    pub fn report(&self) -> SessionReport {
        let tool_wait = self
            .history
            .iter()
            .filter(|f| f.kind == StepKind::ToolCall)
            .map(|f| f.eligible_at - f.released_at)
            .sum();
        let fan_out_branches_completed = self.history.iter().filter(|f| f.fan_out).count();
        let last_completion_at = self.history.iter().map(|f| f.completed_at).max();

        let critical_path = self.critical_path();
        let critical_path_latency = match (critical_path.first(), critical_path.last()) {
            (Some(first), Some(last)) => last.completed_at.saturating_sub(first.eligible_at),
            _ => 0,
        };

        SessionReport {
            session_id: self.id.clone(),
            workflow: self.dag.name().to_string(),
            status: self.status,
            root_eligible_at: self.root_eligible_at,
            finished_at: self.completed_at,
            end_to_end_latency: self
                .completed_at
                .map(|t| t.saturating_sub(self.root_eligible_at)),
            last_completion_at,
            steps_executed: self.history.len(),
            tool_wait,
            fan_out_branches_completed,
            loop_iterations: self.loop_iteration,
            critical_path,
            critical_path_latency,
            items_emitted: self.emitted,
            items_outstanding: self.outstanding.len(),
        }
    }

    /// Walk back from the latest completion through each instance's gating
    /// parent to the root.
    fn critical_path(&self) -> Vec<PathHop> {
        let mut cursor = None;
        for (idx, f) in self.history.iter().enumerate() {
            if cursor.map_or(true, |c: usize| f.completed_at > self.history[c].completed_at) {
                cursor = Some(idx);
            }
        }

        let mut hops = Vec::new();
        while let Some(idx) = cursor {
            let f = &self.history[idx];
            hops.push(PathHop {
                step: f.key.step.clone(),
                iteration: f.key.iteration,
                branch: f.key.branch,
                eligible_at: f.eligible_at,
                completed_at: f.completed_at,
            });
            cursor = f.gate.as_ref().and_then(|g| self.closed_by.get(g).copied());
        }
        hops.reverse();
        hops
    }
}
