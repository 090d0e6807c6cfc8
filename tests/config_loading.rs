use std::io::Write;
use std::sync::Arc;

use agentsim_core::config::TieBreak;
use agentsim_core::{AgentSimError, EngineConfig};
use agentsim_engine::ReplayHost;
use agentsim_test_utils::temp_file;
use agentsim_workflow::{validate, WorkflowDescription};

const REACT_TOML: &str = r#"
name = "react"

[loop]
steps = ["reason", "act", "observe"]
max_iterations = 2

[[steps]]
id = "reason"
kind = "llm-call"
depends_on = ["observe"]
input_tokens = { type = "constant", value = 200.0 }
output_tokens = { type = "constant", value = 50.0 }

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
input_tokens = { type = "constant", value = 100.0 }
output_tokens = { type = "constant", value = 20.0 }

[[steps]]
id = "final-answer"
kind = "llm-call"
depends_on = ["observe"]
input_tokens = { type = "normal", mean = 300.0, std_dev = 40.0 }
output_tokens = { type = "exponential", mean = 80.0, max = 400.0 }

[tools.search]
latency = { type = "constant", value = 500.0 }
output_tokens = { type = "uniform", min = 100.0, max = 200.0 }
"#;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
workflows = ["workflows/react.toml", "/abs/fan-in.toml"]

[engine]
seed = 7
horizon = 100000

[replay]
sessions = 4
first_arrival = 1000
interarrival = 250
prefill_per_token = 0.25
decode_per_token = 1.5
tie_break = "lifo"
"#;

    let tmp = temp_file(".toml", toml_content);

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.seed, 7);
    assert_eq!(config.engine.horizon, Some(100_000));
    assert_eq!(config.replay.sessions, 4);
    assert_eq!(config.replay.first_arrival, 1000);
    assert_eq!(config.replay.interarrival, 250);
    assert_eq!(config.replay.decode_per_token, 1.5);
    assert_eq!(config.replay.tie_break, TieBreak::Lifo);

    let paths = config.workflow_paths(tmp.path());
    let dir = tmp.path().parent().unwrap();
    assert_eq!(paths[0], dir.join("workflows/react.toml"));
    assert_eq!(paths[1], std::path::Path::new("/abs/fan-in.toml"));
}

#[test]
fn test_load_minimal_config_uses_defaults() {
    let tmp = temp_file(".toml", "workflows = []\n");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.engine.seed, 0);
    assert_eq!(config.engine.horizon, None);
    assert_eq!(config.replay.sessions, 1);
    assert_eq!(config.replay.tie_break, TieBreak::Fifo);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("AGENTSIM_TEST_SEED", "4242");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nseed = ${AGENTSIM_TEST_SEED}\n")
        .expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.engine.seed, 4242);
    std::env::remove_var("AGENTSIM_TEST_SEED");
}

#[test]
fn test_missing_and_invalid_config() {
    let err = EngineConfig::load(std::path::Path::new("/nonexistent/agentsim.toml")).unwrap_err();
    assert!(matches!(err, AgentSimError::ConfigNotFound(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[replay]\nprefill_per_token = -1.0\n")
        .expect("write toml");
    let err = EngineConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, AgentSimError::Config(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\nseed = 1\n").expect("write toml");
    assert!(matches!(
        EngineConfig::load(tmp.path()).unwrap_err(),
        AgentSimError::Toml(_)
    ));
}

#[test]
fn test_workflow_file_with_back_edge_validates() {
    let desc = WorkflowDescription::from_toml(REACT_TOML).expect("parse workflow");
    let dag = validate(&desc).expect("valid workflow");
    assert_eq!(dag.root().id, "reason");
    assert_eq!(
        dag.back_edges(),
        &[("observe".to_string(), "reason".to_string())]
    );
    let lp = dag.loop_def().unwrap();
    assert_eq!((lp.entry.as_str(), lp.exit.as_str()), ("reason", "observe"));
}

#[test]
fn test_config_drives_replay_end_to_end() {
    let dir = tempfile::tempdir().expect("create temp dir");
    std::fs::create_dir(dir.path().join("workflows")).unwrap();
    std::fs::write(dir.path().join("workflows/react.toml"), REACT_TOML).unwrap();
    let config_path = dir.path().join("agentsim.toml");
    std::fs::write(
        &config_path,
        r#"
workflows = ["workflows/react.toml"]

[engine]
seed = 11

[replay]
sessions = 2
interarrival = 100
prefill_per_token = 1.0
decode_per_token = 1.0
"#,
    )
    .unwrap();

    let config = EngineConfig::load(&config_path).expect("load config");
    let mut host = ReplayHost::from_config(&config);
    for path in config.workflow_paths(&config_path) {
        let desc = WorkflowDescription::from_file(&path).expect("read workflow");
        host.add_sessions(Arc::new(validate(&desc).expect("valid workflow")));
    }
    let outcome = host.run().expect("replay");

    assert_eq!(outcome.sessions.len(), 2);
    assert_eq!(outcome.horizon.completed_sessions, 2);
    for report in &outcome.sessions {
        assert_eq!(report.loop_iterations, 2);
        // Two passes of reason/act/observe plus final-answer.
        assert_eq!(report.steps_executed, 7);
        assert_eq!(report.tool_wait, 1000);
    }
    // reason 250 ticks, act 500, observe 120 / 140 on the second pass.
    let first = &outcome.sessions[0];
    assert_eq!(first.root_eligible_at, 0);
    let before_final = 250 + 500 + 120 + 250 + 500 + 140;
    assert!(first.finished_at.unwrap() >= before_final);
}
