use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentSimError, Result};
use crate::types::SimTime;

/// Top-level agentsim configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Workflow description files, relative to the config file.
    #[serde(default)]
    pub workflows: Vec<String>,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    /// Global seed every sampling stream is derived from.
    #[serde(default)]
    pub seed: u64,
    /// Simulation end-of-time. None runs until every session completes.
    #[serde(default)]
    pub horizon: Option<SimTime>,
}

/// Settings for the reference replay host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Number of root arrivals per workflow.
    #[serde(default = "default_sessions")]
    pub sessions: usize,
    /// Arrival time of the first session.
    #[serde(default)]
    pub first_arrival: SimTime,
    /// Constant gap between consecutive root arrivals.
    #[serde(default)]
    pub interarrival: SimTime,
    /// Service ticks per input token of an llm-call item.
    #[serde(default)]
    pub prefill_per_token: f64,
    /// Service ticks per output token of an llm-call item.
    #[serde(default)]
    pub decode_per_token: f64,
    /// Order of events scheduled for the same tick.
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            first_arrival: 0,
            interarrival: 0,
            prefill_per_token: 0.0,
            decode_per_token: 0.0,
            tie_break: TieBreak::default(),
        }
    }
}

fn default_sessions() -> usize { 1 }

/// How simultaneous events are ordered by the replay host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Earliest scheduled first.
    #[default]
    Fifo,
    /// Latest scheduled first.
    Lifo,
}

impl EngineConfig {
    /// Load config from a TOML file, expanding `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgentSimError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self = toml::from_str(&expanded)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        let replay = &self.replay;
        if !(replay.prefill_per_token >= 0.0 && replay.decode_per_token >= 0.0) {
            return Err(AgentSimError::Config(
                "replay per-token costs must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve workflow paths against the directory holding the config file.
    pub fn workflow_paths(&self, config_path: &Path) -> Vec<PathBuf> {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        self.workflows
            .iter()
            .map(|p| {
                let p = Path::new(p);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    base.join(p)
                }
            })
            .collect()
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
