use serde::{Deserialize, Serialize};

/// Simulated time in host clock ticks.
pub type SimTime = u64;

/// Unique session identifier, assigned by the host per root arrival.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a workflow step.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    LlmCall,
    ToolCall,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::LlmCall => write!(f, "llm-call"),
            StepKind::ToolCall => write!(f, "tool-call"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_kind_serde_names() {
        let kind: StepKind = serde_json::from_str("\"tool-call\"").unwrap();
        assert_eq!(kind, StepKind::ToolCall);
        assert_eq!(serde_json::to_string(&StepKind::LlmCall).unwrap(), "\"llm-call\"");
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("client-1/0");
        assert_eq!(id.to_string(), "client-1/0");
        assert_eq!(SessionId::from("client-1/0"), id);
    }
}
