//! Canned workflows. Every fixture validates; constant distributions are used
//! wherever a test asserts on exact times or sizes.

use std::sync::Arc;

use agentsim_core::Distribution;
use agentsim_workflow::{validate, StepDescription, WorkflowDag, WorkflowDescription};

fn c(value: f64) -> Distribution {
    Distribution::constant(value)
}

fn build(desc: WorkflowDescription) -> Arc<WorkflowDag> {
    Arc::new(validate(&desc).expect("fixture workflow is valid"))
}

/// reason -> act (tool "search", latency 500) -> observe (accumulates),
/// looped `max_iterations` times, then final-answer.
///
/// observe samples 100 input and 20 output tokens per pass.
pub fn react_description(max_iterations: u32) -> WorkflowDescription {
    WorkflowDescription::new("react")
        .with_loop(["reason", "act", "observe"], max_iterations)
        .with_step(StepDescription::llm("reason", c(200.0), c(50.0)))
        .with_step(StepDescription::tool("act", "search").after(["reason"]))
        .with_step(
            StepDescription::llm("observe", c(100.0), c(20.0))
                .after(["act"])
                .accumulating(),
        )
        .with_step(StepDescription::llm("final-answer", c(300.0), c(120.0)).after(["observe"]))
        .with_tool("search", c(500.0), c(150.0))
}

pub fn react_workflow(max_iterations: u32) -> Arc<WorkflowDag> {
    build(react_description(max_iterations))
}

/// plan -> {search-web, query-db, fetch-docs} -> synthesize, with tool
/// latencies 100, 50 and 130.
pub fn fan_in_workflow() -> Arc<WorkflowDag> {
    build(
        WorkflowDescription::new("fan-in")
            .with_step(StepDescription::llm("plan", c(400.0), c(80.0)))
            .with_step(StepDescription::tool("search-web", "web").after(["plan"]))
            .with_step(StepDescription::tool("query-db", "db").after(["plan"]))
            .with_step(StepDescription::tool("fetch-docs", "docs").after(["plan"]))
            .with_step(
                StepDescription::llm("synthesize", c(900.0), c(200.0))
                    .after(["search-web", "query-db", "fetch-docs"]),
            )
            .with_tool("web", c(100.0), c(300.0))
            .with_tool("db", c(50.0), c(60.0))
            .with_tool("docs", c(130.0), c(500.0)),
    )
}

/// dispatch -> worker (fan_out = `width`) -> reduce.
pub fn fan_out_workflow(width: u32) -> Arc<WorkflowDag> {
    build(
        WorkflowDescription::new("fan-out")
            .with_step(StepDescription::llm("dispatch", c(128.0), c(32.0)))
            .with_step(
                StepDescription::llm("worker", c(256.0), c(64.0))
                    .after(["dispatch"])
                    .with_fan_out(width),
            )
            .with_step(StepDescription::llm("reduce", c(512.0), c(64.0)).after(["worker"])),
    )
}

/// plan -> [split -> {a, b} -> merge] x `max_iterations` -> report.
///
/// The fan-in `merge` closes each loop pass.
pub fn looped_fan_in_workflow(max_iterations: u32) -> Arc<WorkflowDag> {
    build(
        WorkflowDescription::new("looped-fan-in")
            .with_loop(["split", "a", "b", "merge"], max_iterations)
            .with_step(StepDescription::llm("plan", c(64.0), c(16.0)))
            .with_step(StepDescription::llm("split", c(64.0), c(16.0)).after(["plan"]))
            .with_step(StepDescription::tool("a", "probe").after(["split"]))
            .with_step(StepDescription::tool("b", "probe").after(["split"]))
            .with_step(StepDescription::llm("merge", c(128.0), c(16.0)).after(["a", "b"]))
            .with_step(StepDescription::llm("report", c(256.0), c(64.0)).after(["merge"]))
            .with_tool("probe", c(10.0), c(40.0)),
    )
}

/// A workflow exercising every feature with non-constant distributions:
/// fan-out tool calls, a fan-in loop entry and an accumulating loop exit.
pub fn mixed_description() -> WorkflowDescription {
    WorkflowDescription::new("mixed")
        .with_loop(["draft", "lint", "revise"], 3)
        .with_step(StepDescription::llm(
            "planner",
            Distribution::Normal {
                mean: 800.0,
                std_dev: 150.0,
                min: Some(100.0),
                max: None,
            },
            Distribution::Uniform {
                min: 40.0,
                max: 120.0,
            },
        ))
        .with_step(
            StepDescription::tool("search", "web")
                .after(["planner"])
                .with_fan_out(3),
        )
        .with_step(
            StepDescription::llm("draft", c(600.0), Distribution::Exponential {
                mean: 200.0,
                max: Some(2000.0),
            })
            .after(["planner", "search"]),
        )
        .with_step(StepDescription::tool("lint", "linter").after(["draft"]))
        .with_step(
            StepDescription::llm(
                "revise",
                Distribution::Uniform {
                    min: 200.0,
                    max: 400.0,
                },
                Distribution::Uniform {
                    min: 50.0,
                    max: 150.0,
                },
            )
            .after(["lint"])
            .accumulating(),
        )
        .with_step(StepDescription::llm("publish", c(1000.0), c(300.0)).after(["revise"]))
        .with_tool(
            "web",
            Distribution::Exponential {
                mean: 300.0,
                max: None,
            },
            Distribution::Uniform {
                min: 200.0,
                max: 800.0,
            },
        )
        .with_tool(
            "linter",
            Distribution::Uniform {
                min: 20.0,
                max: 80.0,
            },
            c(50.0),
        )
}

pub fn mixed_workflow() -> Arc<WorkflowDag> {
    build(mixed_description())
}
