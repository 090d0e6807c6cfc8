//! Raw workflow descriptions as they come out of a TOML document.
//!
//! ```toml
//! name = "react"
//!
//! [loop]
//! steps = ["reason", "act", "observe"]
//! max_iterations = 3
//!
//! [[steps]]
//! id = "reason"
//! kind = "llm-call"
//! input_tokens = { type = "constant", value = 512.0 }
//! output_tokens = { type = "constant", value = 64.0 }
//!
//! [[steps]]
//! id = "act"
//! kind = "tool-call"
//! depends_on = ["reason"]
//! tool = "search"
//!
//! [tools.search]
//! latency = { type = "exponential", mean = 500.0 }
//! output_tokens = { type = "uniform", min = 100.0, max = 400.0 }
//! ```
//!
//! Nothing here is checked beyond what serde enforces; see
//! [`validate`](crate::validator::validate).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use agentsim_core::error::{AgentSimError, Result};
use agentsim_core::{Distribution, StepKind};

/// One workflow definition, unvalidated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescription {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "loop")]
    pub loop_block: Option<LoopDescription>,
    #[serde(default)]
    pub steps: Vec<StepDescription>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDescription>,
}

/// A step as written in the description. Kind-specific fields are optional
/// here and checked against `kind` by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescription {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub fan_out: Option<u32>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub input_tokens: Option<Distribution>,
    #[serde(default)]
    pub output_tokens: Option<Distribution>,
    #[serde(default)]
    pub accumulate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub latency: Distribution,
    pub output_tokens: Distribution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDescription {
    pub steps: Vec<String>,
    pub max_iterations: u32,
}

impl WorkflowDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            loop_block: None,
            steps: vec![],
            tools: BTreeMap::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: StepDescription) -> Self {
        self.steps.push(step);
        self
    }

    /// Register a tool profile.
    pub fn with_tool(
        mut self,
        name: impl Into<String>,
        latency: Distribution,
        output_tokens: Distribution,
    ) -> Self {
        self.tools.insert(
            name.into(),
            ToolDescription {
                latency,
                output_tokens,
            },
        );
        self
    }

    /// Set the loop block.
    pub fn with_loop<I, S>(mut self, steps: I, max_iterations: u32) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loop_block = Some(LoopDescription {
            steps: steps.into_iter().map(Into::into).collect(),
            max_iterations,
        });
        self
    }

    /// Parse a workflow description from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a workflow description from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| AgentSimError::ConfigNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }
}

impl StepDescription {
    /// An llm-call step with its size distributions.
    pub fn llm(id: impl Into<String>, input_tokens: Distribution, output_tokens: Distribution) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::LlmCall,
            depends_on: vec![],
            fan_out: None,
            tool: None,
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            accumulate: false,
        }
    }

    /// A tool-call step bound to a named tool.
    pub fn tool(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::ToolCall,
            depends_on: vec![],
            fan_out: None,
            tool: Some(tool.into()),
            input_tokens: None,
            output_tokens: None,
            accumulate: false,
        }
    }

    /// Set the parent steps.
    pub fn after<I, S>(mut self, parents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = parents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fan_out(mut self, width: u32) -> Self {
        self.fan_out = Some(width);
        self
    }

    pub fn accumulating(mut self) -> Self {
        self.accumulate = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_description() {
        let toml = r#"
name = "react"
description = "reason/act/observe"

[loop]
steps = ["reason", "act", "observe"]
max_iterations = 3

[[steps]]
id = "reason"
kind = "llm-call"
input_tokens = { type = "constant", value = 512.0 }
output_tokens = { type = "constant", value = 64.0 }

[[steps]]
id = "act"
kind = "tool-call"
depends_on = ["reason"]
tool = "search"

[[steps]]
id = "observe"
kind = "llm-call"
depends_on = ["act"]
accumulate = true
input_tokens = { type = "uniform", min = 100.0, max = 200.0 }
output_tokens = { type = "constant", value = 32.0 }

[tools.search]
latency = { type = "exponential", mean = 500.0 }
output_tokens = { type = "constant", value = 300.0 }
"#;
        let wf = WorkflowDescription::from_toml(toml).unwrap();
        assert_eq!(wf.name, "react");
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[1].kind, StepKind::ToolCall);
        assert_eq!(wf.steps[1].tool.as_deref(), Some("search"));
        assert!(wf.steps[2].accumulate);
        let lp = wf.loop_block.unwrap();
        assert_eq!(lp.max_iterations, 3);
        assert_eq!(lp.steps, vec!["reason", "act", "observe"]);
        assert!(wf.tools.contains_key("search"));
    }

    #[test]
    fn test_parse_error_is_toml_error() {
        let err = WorkflowDescription::from_toml("name = 3").unwrap_err();
        assert!(matches!(err, AgentSimError::Toml(_)));
    }

    #[test]
    fn test_builders() {
        let step = StepDescription::tool("fetch", "http")
            .after(["plan"])
            .with_fan_out(3);
        assert_eq!(step.kind, StepKind::ToolCall);
        assert_eq!(step.depends_on, vec!["plan"]);
        assert_eq!(step.fan_out, Some(3));
        assert!(step.input_tokens.is_none());

        let wf = WorkflowDescription::new("wf")
            .with_step(step)
            .with_loop(["fetch"], 2);
        assert_eq!(wf.loop_block.unwrap().max_iterations, 2);
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"name = \"tiny\"\n[[steps]]\nid = \"only\"\nkind = \"llm-call\"\n")
            .unwrap();
        let wf = WorkflowDescription::from_file(tmp.path()).unwrap();
        assert_eq!(wf.steps[0].id, "only");
    }
}
