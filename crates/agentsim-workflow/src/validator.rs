//! Static analysis turning a [`WorkflowDescription`] into a [`WorkflowDag`].
//!
//! Checks run in a fixed order and the first failure is returned:
//!
//! 1. every `depends_on`, `tool` and loop-member reference resolves
//! 2. the graph minus loop back-edges is acyclic; a body edge to a later
//!    declared parent must close the loop
//! 3. exactly one root remains
//! 4. `fan_out`, when present, is at least 2
//! 5. the loop body is connected with one entry and one exit, and no member
//!    waits on a step that runs after the body
//! 6. step kind matches its fields
//! 7. `accumulate` only appears on llm-call loop-body steps
//!
//! Distribution descriptors are checked last. Validation never touches a
//! clock or an RNG.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use agentsim_core::{StepKind, ValidationError};

use crate::dag::WorkflowDag;
use crate::description::WorkflowDescription;
use crate::step::{LoopDefinition, StepDefinition, StepSpec, ToolDefinition};

/// Validate a raw description.
pub fn validate(desc: &WorkflowDescription) -> Result<WorkflowDag, ValidationError> {
    let wf = desc.name.clone();
    let steps = &desc.steps;

    if steps.is_empty() {
        return Err(ValidationError::EmptyWorkflow { workflow: wf });
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (pos, step) in steps.iter().enumerate() {
        if index.insert(step.id.as_str(), pos).is_some() {
            return Err(ValidationError::DuplicateStep {
                workflow: wf,
                step: step.id.clone(),
            });
        }
    }

    // (a) references
    for step in steps {
        for parent in &step.depends_on {
            if !index.contains_key(parent.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    workflow: wf,
                    step: step.id.clone(),
                    parent: parent.clone(),
                });
            }
        }
        if let Some(tool) = &step.tool {
            if !desc.tools.contains_key(tool) {
                return Err(ValidationError::UnknownTool {
                    workflow: wf,
                    step: step.id.clone(),
                    tool: tool.clone(),
                });
            }
        }
    }
    let body: BTreeSet<&str> = match &desc.loop_block {
        Some(lp) => {
            for member in &lp.steps {
                if !index.contains_key(member.as_str()) {
                    return Err(ValidationError::UnknownLoopMember {
                        workflow: wf,
                        step: member.clone(),
                    });
                }
            }
            lp.steps.iter().map(String::as_str).collect()
        }
        None => BTreeSet::new(),
    };

    // Edges whose parent is declared before the child.
    let mut declared: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (pos, step) in steps.iter().enumerate() {
        for parent in &step.depends_on {
            let ppos = index[parent.as_str()];
            if ppos < pos {
                declared[ppos].push(pos);
            }
        }
    }

    // Forward parents per step. A body-internal edge pointing at an
    // earlier-or-same declared step is the loop's re-entry edge, provided
    // the child leads back to the parent.
    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut back_edges = Vec::new();
    for (pos, step) in steps.iter().enumerate() {
        for parent in &step.depends_on {
            let ppos = index[parent.as_str()];
            let internal = body.contains(parent.as_str()) && body.contains(step.id.as_str());
            if internal && ppos >= pos {
                if ppos != pos && !reaches(&declared, pos, ppos) {
                    return Err(ValidationError::MisorderedLoopEdge {
                        workflow: wf,
                        step: step.id.clone(),
                        parent: parent.clone(),
                    });
                }
                back_edges.push((parent.clone(), step.id.clone()));
                continue;
            }
            if !parents[pos].contains(&ppos) {
                parents[pos].push(ppos);
            }
        }
    }

    // (b) acyclicity
    if let Some(cycle) = find_cycle(&parents) {
        return Err(ValidationError::Cycle {
            workflow: wf,
            path: cycle.into_iter().map(|i| steps[i].id.clone()).collect(),
        });
    }

    // (c) exactly one root
    let roots: Vec<usize> = (0..steps.len()).filter(|&i| parents[i].is_empty()).collect();
    match roots.len() {
        0 => return Err(ValidationError::NoRoot { workflow: wf }),
        1 => {}
        _ => {
            return Err(ValidationError::MultipleRoots {
                workflow: wf,
                roots: roots.iter().map(|&i| steps[i].id.clone()).collect(),
            })
        }
    }

    // (d) fan-out width
    for step in steps {
        if let Some(width) = step.fan_out {
            if width < 2 {
                return Err(ValidationError::InvalidFanOut {
                    workflow: wf,
                    step: step.id.clone(),
                    fan_out: width,
                });
            }
        }
    }

    // (e) loop shape
    let loop_def = match &desc.loop_block {
        Some(lp) => Some(check_loop(&wf, steps, &index, &parents, &lp.steps, lp.max_iterations)?),
        None => None,
    };

    // (f) kind/field pairing
    let mut defs = Vec::with_capacity(steps.len());
    for (pos, step) in steps.iter().enumerate() {
        let spec = match step.kind {
            StepKind::LlmCall => {
                if step.tool.is_some() {
                    return Err(ValidationError::UnexpectedTool {
                        workflow: wf,
                        step: step.id.clone(),
                    });
                }
                match (&step.input_tokens, &step.output_tokens) {
                    (Some(input), Some(output)) => StepSpec::LlmCall {
                        input_tokens: input.clone(),
                        output_tokens: output.clone(),
                    },
                    _ => {
                        return Err(ValidationError::MissingSizeDistribution {
                            workflow: wf,
                            step: step.id.clone(),
                        })
                    }
                }
            }
            StepKind::ToolCall => {
                if step.input_tokens.is_some() || step.output_tokens.is_some() {
                    return Err(ValidationError::UnexpectedSizeDistribution {
                        workflow: wf,
                        step: step.id.clone(),
                    });
                }
                match &step.tool {
                    Some(tool) => StepSpec::ToolCall { tool: tool.clone() },
                    None => {
                        return Err(ValidationError::MissingTool {
                            workflow: wf,
                            step: step.id.clone(),
                        })
                    }
                }
            }
        };
        defs.push(StepDefinition {
            id: step.id.clone(),
            depends_on: parents[pos].iter().map(|&p| steps[p].id.clone()).collect(),
            fan_out: step.fan_out.unwrap_or(1),
            accumulate: step.accumulate,
            spec,
        });
    }

    // (g) accumulate placement
    for def in &defs {
        if !def.accumulate {
            continue;
        }
        if !body.contains(def.id.as_str()) {
            return Err(ValidationError::MisplacedAccumulate {
                workflow: wf,
                step: def.id.clone(),
            });
        }
        if def.kind() == StepKind::ToolCall {
            return Err(ValidationError::AccumulateOnToolCall {
                workflow: wf,
                step: def.id.clone(),
            });
        }
    }

    // Distribution descriptors
    let invalid = |owner: String, reason: String| ValidationError::InvalidDistribution {
        workflow: wf.clone(),
        owner,
        reason,
    };
    for def in &defs {
        if let StepSpec::LlmCall {
            input_tokens,
            output_tokens,
        } = &def.spec
        {
            input_tokens
                .check()
                .map_err(|r| invalid(format!("step '{}' input_tokens", def.id), r))?;
            output_tokens
                .check()
                .map_err(|r| invalid(format!("step '{}' output_tokens", def.id), r))?;
        }
    }
    let mut tools = HashMap::with_capacity(desc.tools.len());
    for (name, tool) in &desc.tools {
        tool.latency
            .check()
            .map_err(|r| invalid(format!("tool '{}' latency", name), r))?;
        tool.output_tokens
            .check()
            .map_err(|r| invalid(format!("tool '{}' output_tokens", name), r))?;
        tools.insert(
            name.clone(),
            ToolDefinition {
                name: name.clone(),
                latency: tool.latency.clone(),
                output_tokens: tool.output_tokens.clone(),
            },
        );
    }

    debug!(
        workflow = %wf,
        steps = defs.len(),
        back_edges = back_edges.len(),
        "Workflow validated"
    );

    Ok(WorkflowDag::new(wf, defs, tools, loop_def, back_edges, roots[0]))
}

/// Whether `to` is reachable from `from` along `children`.
fn reaches(children: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; children.len()];
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        if node == to {
            return true;
        }
        for &next in &children[node] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    false
}

/// Kahn's algorithm; on failure, walk parents among the unsorted nodes until
/// one repeats and return that cycle in parent -> child order, closed.
fn find_cycle(parents: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = parents.len();
    let mut indegree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(child);
        }
    }

    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut sorted = 0;
    while let Some(node) = queue.pop_front() {
        sorted += 1;
        for &child in &children[node] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }
    if sorted == n {
        return None;
    }

    // Every unsorted node still has an unsorted parent.
    let start = (0..n).find(|&i| indegree[i] > 0)?;
    let mut walk: Vec<usize> = Vec::new();
    let mut cur = start;
    loop {
        if let Some(at) = walk.iter().position(|&v| v == cur) {
            let mut cycle: Vec<usize> = walk[at..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0]);
            return Some(cycle);
        }
        walk.push(cur);
        cur = *parents[cur].iter().find(|&&p| indegree[p] > 0)?;
    }
}

fn check_loop(
    wf: &str,
    steps: &[crate::description::StepDescription],
    index: &HashMap<&str, usize>,
    parents: &[Vec<usize>],
    members: &[String],
    max_iterations: u32,
) -> Result<LoopDefinition, ValidationError> {
    if max_iterations == 0 {
        return Err(ValidationError::InvalidLoopBound {
            workflow: wf.to_string(),
        });
    }

    let in_body: BTreeSet<usize> = members.iter().map(|m| index[m.as_str()]).collect();

    // Undirected adjacency restricted to the body.
    let mut adjacent: HashMap<usize, Vec<usize>> = HashMap::new();
    for &node in &in_body {
        for &p in &parents[node] {
            if in_body.contains(&p) {
                adjacent.entry(node).or_default().push(p);
                adjacent.entry(p).or_default().push(node);
            }
        }
    }

    let Some(first) = members.first() else {
        return Err(ValidationError::AmbiguousLoopEntry {
            workflow: wf.to_string(),
            candidates: vec![],
        });
    };
    let start = index[first.as_str()];
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for &next in adjacent.get(&node).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    if seen.len() != in_body.len() {
        let mut unreachable: Vec<String> = Vec::new();
        for member in members {
            if !seen.contains(&index[member.as_str()]) && !unreachable.contains(member) {
                unreachable.push(member.clone());
            }
        }
        return Err(ValidationError::DisconnectedLoop {
            workflow: wf.to_string(),
            unreachable,
        });
    }

    let entries: Vec<usize> = in_body
        .iter()
        .copied()
        .filter(|&m| !parents[m].iter().any(|p| in_body.contains(p)))
        .collect();
    let exits: Vec<usize> = in_body
        .iter()
        .copied()
        .filter(|&m| {
            !in_body
                .iter()
                .any(|&other| parents[other].contains(&m))
        })
        .collect();
    let names = |v: &[usize]| v.iter().map(|&i| steps[i].id.clone()).collect::<Vec<_>>();
    if entries.len() != 1 {
        return Err(ValidationError::AmbiguousLoopEntry {
            workflow: wf.to_string(),
            candidates: names(&entries),
        });
    }
    if exits.len() != 1 {
        return Err(ValidationError::AmbiguousLoopExit {
            workflow: wf.to_string(),
            candidates: names(&exits),
        });
    }

    // Everything downstream of the body runs after its final pass, so a
    // member cannot wait on it.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); parents.len()];
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            children[p].push(child);
        }
    }
    let mut downstream = in_body.clone();
    let mut queue: VecDeque<usize> = in_body.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        for &next in &children[node] {
            if downstream.insert(next) {
                queue.push_back(next);
            }
        }
    }
    for &member in &in_body {
        for &p in &parents[member] {
            if !in_body.contains(&p) && downstream.contains(&p) {
                return Err(ValidationError::LoopWaitsOnExit {
                    workflow: wf.to_string(),
                    step: steps[member].id.clone(),
                    parent: steps[p].id.clone(),
                });
            }
        }
    }

    Ok(LoopDefinition {
        members: members.iter().cloned().collect(),
        max_iterations,
        entry: steps[entries[0]].id.clone(),
        exit: steps[exits[0]].id.clone(),
    })
}
