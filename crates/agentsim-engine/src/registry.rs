//! The session registry: the only owner and mutator of session state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use agentsim_core::error::{AgentSimError, Result};
use agentsim_core::{Sampler, SeededSampler, SessionId, SimTime};
use agentsim_workflow::WorkflowDag;

use crate::report::SessionReport;
use crate::state::{SessionState, SessionStatus};
use crate::work_item::{StepCompletion, WorkItem};

/// Registry-wide work item accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationStats {
    pub emitted: u64,
    pub completed: u64,
    pub outstanding: u64,
}

impl ConservationStats {
    /// Every emitted item is either completed or still outstanding.
    pub fn holds(&self) -> bool {
        self.emitted == self.completed + self.outstanding
    }
}

/// State of the registry when the simulation horizon was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorizonReport {
    pub horizon: SimTime,
    pub completed_sessions: usize,
    /// Sessions still active at the horizon.
    pub abandoned: Vec<SessionReport>,
    /// Outstanding work items across abandoned sessions.
    pub lost_items: u64,
    pub stats: ConservationStats,
}

/// Owns every session, keyed by id.
///
/// Each registry is self-contained: separate registries share nothing but
/// the read-only workflows handed to them.
pub struct SessionRegistry {
    sampler: Box<dyn Sampler>,
    sessions: BTreeMap<SessionId, SessionState>,
    closed_at: Option<SimTime>,
}

impl SessionRegistry {
    pub fn new(sampler: impl Sampler + 'static) -> Self {
        Self {
            sampler: Box::new(sampler),
            sessions: BTreeMap::new(),
            closed_at: None,
        }
    }

    /// Registry with the default seeded sampler.
    pub fn with_seed(seed: u64) -> Self {
        Self::new(SeededSampler::new(seed))
    }

    /// Start a session for one root arrival and return the root work item
    /// (one per branch if the root fans out).
    pub fn create_session(
        &mut self,
        workflow: Arc<WorkflowDag>,
        session_id: SessionId,
        root_arrival: SimTime,
    ) -> Result<Vec<WorkItem>> {
        self.ensure_open()?;
        if self.sessions.contains_key(&session_id) {
            return Err(AgentSimError::DuplicateSession(session_id));
        }

        let (state, items) = SessionState::start(
            session_id.clone(),
            workflow,
            root_arrival,
            self.sampler.as_ref(),
        )?;
        info!(
            session = %session_id,
            workflow = %state.workflow().name(),
            at = root_arrival,
            "Session created"
        );
        self.sessions.insert(session_id, state);
        Ok(items)
    }

    /// Apply a completion and return the work items it made eligible.
    ///
    /// Unknown sessions and steps are errors. A repeated completion returns
    /// no items and changes nothing.
    pub fn on_step_complete(&mut self, completion: &StepCompletion) -> Result<Vec<WorkItem>> {
        self.ensure_open()?;
        let state = self
            .sessions
            .get_mut(&completion.session_id)
            .ok_or_else(|| AgentSimError::UnknownSession(completion.session_id.clone()))?;
        let items = state.apply(completion, self.sampler.as_ref())?;
        debug!(
            session = %completion.session_id,
            step = %completion.step_id,
            iteration = completion.iteration,
            branch = completion.branch,
            at = completion.completed_at,
            released = items.len(),
            "Step completed"
        );
        Ok(items)
    }

    pub fn session(&self, id: &SessionId) -> Option<&SessionState> {
        self.sessions.get(id)
    }

    pub fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        self.get(id).map(SessionState::status)
    }

    pub fn report(&self, id: &SessionId) -> Result<SessionReport> {
        self.get(id).map(SessionState::report)
    }

    /// Reports for every session, ordered by id.
    pub fn reports(&self) -> Vec<SessionReport> {
        self.sessions.values().map(SessionState::report).collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status() == SessionStatus::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn stats(&self) -> ConservationStats {
        self.sessions
            .values()
            .fold(ConservationStats::default(), |mut acc, s| {
                acc.emitted += s.emitted;
                acc.completed += s.history.len() as u64;
                acc.outstanding += s.outstanding.len() as u64;
                acc
            })
    }

    /// Stop accepting calls. Active sessions stay active and are reported as
    /// abandoned; their outstanding items are lost to the horizon.
    pub fn close_at_horizon(&mut self, horizon: SimTime) -> HorizonReport {
        self.closed_at = Some(horizon);

        let mut abandoned = Vec::new();
        let mut completed_sessions = 0;
        for state in self.sessions.values() {
            match state.status() {
                SessionStatus::Completed => completed_sessions += 1,
                SessionStatus::Active => {
                    warn!(
                        session = %state.id(),
                        workflow = %state.workflow().name(),
                        outstanding = state.outstanding(),
                        horizon,
                        "Session abandoned at horizon"
                    );
                    abandoned.push(state.report());
                }
            }
        }
        let lost_items = abandoned.iter().map(|r| r.items_outstanding as u64).sum();
        let stats = self.stats();
        info!(
            horizon,
            completed = completed_sessions,
            abandoned = abandoned.len(),
            lost_items,
            "Registry closed"
        );

        HorizonReport {
            horizon,
            completed_sessions,
            abandoned,
            lost_items,
            stats,
        }
    }

    fn get(&self, id: &SessionId) -> Result<&SessionState> {
        self.sessions
            .get(id)
            .ok_or_else(|| AgentSimError::UnknownSession(id.clone()))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.closed_at {
            Some(at) => Err(AgentSimError::RegistryClosed(at)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use agentsim_test_utils::fixtures;

    use crate::work_item::WorkParams;

    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::with_seed(42)
    }

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    #[test]
    fn test_react_single_pass() {
        let mut reg = registry();
        let root = reg
            .create_session(fixtures::react_workflow(1), sid("r"), 1000)
            .unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!((root[0].step_id.as_str(), root[0].eligible_at), ("reason", 1000));

        let act = reg.on_step_complete(&root[0].completion(1200)).unwrap();
        assert_eq!(act.len(), 1);
        assert_eq!(act[0].step_id, "act");
        assert_eq!(act[0].released_at, 1200);
        assert_eq!(act[0].eligible_at, 1700);
        assert_eq!(
            act[0].params,
            WorkParams::ToolCall {
                latency: 500,
                output_tokens: 150
            }
        );

        let observe = reg.on_step_complete(&act[0].completion(1700)).unwrap();
        assert_eq!(observe.len(), 1);
        assert_eq!((observe[0].step_id.as_str(), observe[0].eligible_at), ("observe", 1700));

        let fin = reg.on_step_complete(&observe[0].completion(1850)).unwrap();
        assert_eq!(fin.len(), 1);
        assert_eq!(fin[0].step_id, "final-answer");
        assert_eq!(fin[0].eligible_at, 1850);
        assert_eq!(reg.session(&sid("r")).unwrap().loop_iteration(), 1);

        assert!(reg.on_step_complete(&fin[0].completion(2000)).unwrap().is_empty());
        assert_eq!(reg.status(&sid("r")).unwrap(), SessionStatus::Completed);
        assert_eq!(reg.active_sessions(), 0);
    }

    #[test]
    fn test_fan_in_emits_once_at_latest_parent() {
        let mut reg = registry();
        let root = reg
            .create_session(fixtures::fan_in_workflow(), sid("f"), 0)
            .unwrap();
        let tools = reg.on_step_complete(&root[0].completion(2000)).unwrap();
        let eligible: Vec<(&str, SimTime)> = tools
            .iter()
            .map(|t| (t.step_id.as_str(), t.eligible_at))
            .collect();
        assert_eq!(
            eligible,
            vec![("search-web", 2100), ("query-db", 2050), ("fetch-docs", 2130)]
        );

        // Complete in every order of arrival; the join fires on the third.
        let by_time = [&tools[1], &tools[0], &tools[2]];
        assert!(reg.on_step_complete(&by_time[0].completion(2050)).unwrap().is_empty());
        assert!(reg.on_step_complete(&by_time[1].completion(2100)).unwrap().is_empty());
        let synth = reg.on_step_complete(&by_time[2].completion(2130)).unwrap();
        assert_eq!(synth.len(), 1);
        assert_eq!(synth[0].step_id, "synthesize");
        assert_eq!(synth[0].eligible_at, 2130);
    }

    #[test]
    fn test_fan_in_any_interleaving() {
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let mut reg = registry();
            let root = reg
                .create_session(fixtures::fan_in_workflow(), sid("f"), 0)
                .unwrap();
            let tools = reg.on_step_complete(&root[0].completion(2000)).unwrap();
            let mut emitted = Vec::new();
            for i in order {
                let t = &tools[i];
                emitted.extend(reg.on_step_complete(&t.completion(t.eligible_at)).unwrap());
            }
            assert_eq!(emitted.len(), 1, "order {:?}", order);
            assert_eq!(emitted[0].eligible_at, 2130, "order {:?}", order);
        }
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let mut reg = registry();
        let root = reg
            .create_session(fixtures::react_workflow(2), sid("d"), 0)
            .unwrap();
        let done = root[0].completion(100);
        assert_eq!(reg.on_step_complete(&done).unwrap().len(), 1);
        let before = reg.stats();
        assert!(reg.on_step_complete(&done).unwrap().is_empty());
        assert_eq!(reg.stats(), before);

        // A different time for the same instance is still a repeat.
        assert!(reg.on_step_complete(&root[0].completion(150)).unwrap().is_empty());
        assert_eq!(reg.report(&sid("d")).unwrap().steps_executed, 1);
    }

    #[test]
    fn test_unknown_session_and_step_are_errors() {
        let mut reg = registry();
        reg.create_session(fixtures::react_workflow(1), sid("u"), 0)
            .unwrap();

        let err = reg
            .on_step_complete(&StepCompletion::new("missing", "reason", 0, 10))
            .unwrap_err();
        assert!(matches!(err, AgentSimError::UnknownSession(_)));

        let err = reg
            .on_step_complete(&StepCompletion::new("u", "nope", 0, 10))
            .unwrap_err();
        assert!(matches!(err, AgentSimError::UnknownStep { .. }));

        let err = reg
            .on_step_complete(&StepCompletion::new("u", "act", 0, 10))
            .unwrap_err();
        assert!(matches!(err, AgentSimError::UnexpectedCompletion { .. }));
    }

    #[test]
    fn test_completion_before_eligible_is_rejected() {
        let mut reg = registry();
        let root = reg
            .create_session(fixtures::react_workflow(1), sid("e"), 0)
            .unwrap();
        let act = reg.on_step_complete(&root[0].completion(100)).unwrap();
        let err = reg.on_step_complete(&act[0].completion(599)).unwrap_err();
        assert!(matches!(
            err,
            AgentSimError::CompletionBeforeEligible {
                eligible_at: 600,
                completed_at: 599,
                ..
            }
        ));
        assert_eq!(reg.on_step_complete(&act[0].completion(600)).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let mut reg = registry();
        reg.create_session(fixtures::fan_in_workflow(), sid("x"), 0)
            .unwrap();
        let err = reg
            .create_session(fixtures::fan_in_workflow(), sid("x"), 5)
            .unwrap_err();
        assert!(matches!(err, AgentSimError::DuplicateSession(_)));
    }

    #[test]
    fn test_loop_entry_never_exceeds_bound() {
        let mut reg = registry();
        let mut frontier = reg
            .create_session(fixtures::react_workflow(4), sid("l"), 0)
            .unwrap();
        let mut reason_iterations = Vec::new();
        while let Some(item) = frontier.pop() {
            if item.step_id == "reason" {
                reason_iterations.push(item.iteration);
            }
            frontier.extend(reg.on_step_complete(&item.completion(item.eligible_at + 10)).unwrap());
            assert!(reg.session(&sid("l")).unwrap().loop_iteration() <= 4);
        }
        assert_eq!(reason_iterations, vec![0, 1, 2, 3]);
        let report = reg.report(&sid("l")).unwrap();
        assert_eq!(report.loop_iterations, 4);
        // 4 passes of three steps plus final-answer.
        assert_eq!(report.steps_executed, 13);
    }

    #[test]
    fn test_conservation_and_horizon() {
        let mut reg = registry();
        let done = reg
            .create_session(fixtures::fan_in_workflow(), sid("a"), 0)
            .unwrap();
        let tools = reg.on_step_complete(&done[0].completion(10)).unwrap();
        reg.on_step_complete(&tools[0].completion(tools[0].eligible_at))
            .unwrap();
        reg.create_session(fixtures::fan_out_workflow(4), sid("b"), 0)
            .unwrap();

        let stats = reg.stats();
        assert!(stats.holds());
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.outstanding, 3);

        let report = reg.close_at_horizon(100);
        assert_eq!(report.completed_sessions, 0);
        assert_eq!(report.abandoned.len(), 2);
        assert_eq!(report.lost_items, 3);
        assert_eq!(
            report.stats.emitted,
            report.stats.completed + report.lost_items
        );

        assert!(reg.is_closed());
        let err = reg
            .create_session(fixtures::fan_in_workflow(), sid("c"), 200)
            .unwrap_err();
        assert!(matches!(err, AgentSimError::RegistryClosed(100)));
        assert!(reg
            .on_step_complete(&tools[1].completion(tools[1].eligible_at))
            .is_err());
        assert_eq!(reg.status(&sid("a")).unwrap(), SessionStatus::Active);
    }

    #[test]
    fn test_registries_are_independent() {
        let mut one = registry();
        let mut two = registry();
        let a = one
            .create_session(fixtures::mixed_workflow(), sid("s"), 0)
            .unwrap();
        two.create_session(fixtures::fan_in_workflow(), sid("other"), 0)
            .unwrap();
        let b = two
            .create_session(fixtures::mixed_workflow(), sid("s"), 0)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 2);
    }
}
