use std::collections::HashMap;

use agentsim_core::ValidationError;

use crate::description::WorkflowDescription;
use crate::step::{LoopDefinition, StepDefinition, ToolDefinition};

/// A validated, immutable workflow.
///
/// Built once by [`validate`](crate::validator::validate) and shared by
/// reference (usually behind an `Arc`) across every session that runs it.
#[derive(Debug, Clone)]
pub struct WorkflowDag {
    name: String,
    steps: Vec<StepDefinition>,
    index: HashMap<String, usize>,
    /// parent id -> child positions, in declaration order.
    children: HashMap<String, Vec<usize>>,
    tools: HashMap<String, ToolDefinition>,
    loop_def: Option<LoopDefinition>,
    /// Dropped loop re-entry edges as (parent, child).
    back_edges: Vec<(String, String)>,
    root: usize,
}

impl WorkflowDag {
    pub(crate) fn new(
        name: String,
        steps: Vec<StepDefinition>,
        tools: HashMap<String, ToolDefinition>,
        loop_def: Option<LoopDefinition>,
        back_edges: Vec<(String, String)>,
        root: usize,
    ) -> Self {
        let index: HashMap<String, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, step) in steps.iter().enumerate() {
            for parent in &step.depends_on {
                children.entry(parent.clone()).or_default().push(pos);
            }
        }

        Self {
            name,
            steps,
            index,
            children,
            tools,
            loop_def,
            back_edges,
            root,
        }
    }

    /// Validate a description into a DAG.
    pub fn from_description(desc: &WorkflowDescription) -> Result<Self, ValidationError> {
        crate::validator::validate(desc)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All steps in declaration order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn root(&self) -> &StepDefinition {
        &self.steps[self.root]
    }

    /// Children of `id` via forward edges, in declaration order.
    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a StepDefinition> + 'a {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.steps[i])
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn loop_def(&self) -> Option<&LoopDefinition> {
        self.loop_def.as_ref()
    }

    pub fn is_loop_member(&self, id: &str) -> bool {
        self.loop_def.as_ref().is_some_and(|l| l.contains(id))
    }

    pub fn back_edges(&self) -> &[(String, String)] {
        &self.back_edges
    }
}
