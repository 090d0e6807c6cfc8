use std::sync::Mutex;

use agentsim_core::{Distribution, Draw, Sampler, SeededSampler, SessionId, StreamKey};

/// One draw as seen by a [`RecordingSampler`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub session: SessionId,
    pub parent: String,
    pub child: String,
    pub iteration: u32,
    pub branch: u32,
    pub draw: Draw,
    pub value: f64,
}

/// Seeded sampler that remembers every key it was asked for.
pub struct RecordingSampler {
    inner: SeededSampler,
    draws: Mutex<Vec<RecordedDraw>>,
}

impl RecordingSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: SeededSampler::new(seed),
            draws: Mutex::new(Vec::new()),
        }
    }

    pub fn draws(&self) -> Vec<RecordedDraw> {
        self.draws.lock().unwrap().clone()
    }

    /// Draws recorded for one session, in the order they were made.
    pub fn draws_for(&self, session: &SessionId) -> Vec<RecordedDraw> {
        self.draws
            .lock()
            .unwrap()
            .iter()
            .filter(|d| &d.session == session)
            .cloned()
            .collect()
    }
}

impl Sampler for RecordingSampler {
    fn sample(&self, dist: &Distribution, key: &StreamKey<'_>) -> f64 {
        let value = self.inner.sample(dist, key);
        self.draws.lock().unwrap().push(RecordedDraw {
            session: key.session.clone(),
            parent: key.parent.to_string(),
            child: key.child.to_string(),
            iteration: key.iteration,
            branch: key.branch,
            draw: key.draw,
            value,
        });
        value
    }
}
