//! End-to-end runs of the agent against scripted scenarios.
//!
//! Uses virtual time so settle delays do not slow the suite down.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use challenge_agent::config::AgentConfig;
use coordination::{Candidate, NullOracle, OracleCapability, PageSnapshot, Provenance};
use tokio_util::sync::CancellationToken;

/// Oracle that reads nothing from text and "sees" one code in screenshots.
struct VisionStub {
    code: String,
    vision_calls: Mutex<Vec<u32>>,
}

#[async_trait]
impl OracleCapability for VisionStub {
    async fn solve_from_text(
        &self,
        _snapshot: &PageSnapshot,
        _tried: &HashSet<String>,
        _challenge_index: u32,
    ) -> Option<Candidate> {
        None
    }

    async fn solve_from_image(
        &self,
        _screenshot: &[u8],
        tried: &HashSet<String>,
        challenge_index: u32,
    ) -> Option<Candidate> {
        self.vision_calls.lock().unwrap().push(challenge_index);
        (!tried.contains(&self.code))
            .then(|| Candidate::new(self.code.clone(), 0.7, Provenance::VisionOracle))
    }
}

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn config_for(dir: &Path, scenario: std::path::PathBuf, total: u32) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.run.total_items = total;
    config.run.timeout_secs = 120.0;
    config.run.scenario = Some(scenario);
    config.run.report_path = dir.join("run_stats.json");
    config
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_scenario_all_solved() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_file(
        dir.path(),
        "dynamic.toml",
        r#"
base_address = "https://demo.test"
layout = "dynamic"
start_required = true

[[challenges]]
code = "AB12C9"

[[challenges]]
code = "QW34ER"
reveal = "after_sweep"

[[challenges]]
code = "ZX56CV"
reveal = "console"

[[challenges]]
code = "VZ99QK"
reveal = "nowhere"
"#,
    );
    let config = config_for(dir.path(), scenario, 4);
    let oracle = VisionStub {
        code: "VZ99QK".into(),
        vision_calls: Mutex::new(Vec::new()),
    };

    let run = challenge_agent::execute(&config, &oracle, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.solved, 4);
    assert_eq!(run.exit_code(), 0);
    assert!(run.addressing.as_ref().is_some_and(|m| m.is_dynamic()));
    assert_eq!(*oracle.vision_calls.lock().unwrap(), vec![4]);
    assert_eq!(run.outcomes[3].attempts, 2);

    let raw = std::fs::read_to_string(dir.path().join("run_stats.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(report["solved"], 4);
    assert_eq!(report["met_deadline"], true);
    assert_eq!(report["challenges"][2]["answer"], "ZX56CV");
}

#[tokio::test(start_paused = true)]
async fn test_templated_scenario_with_unsolvable_item() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_file(
        dir.path(),
        "templated.json",
        r#"{
            "base_address": "https://demo.test",
            "layout": "templated",
            "challenges": [
                {"code": "AB12C9"},
                {"code": "QQ00QQ", "reveal": "nowhere"},
                {"code": "ZX56CV", "reveal": "hidden"}
            ]
        }"#,
    );
    let config = config_for(dir.path(), scenario, 3);

    let run = challenge_agent::execute(&config, &NullOracle, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.solved, 2);
    assert_eq!(run.failed, 1);
    assert_eq!(run.exit_code(), 1);
    assert!(!run.outcomes[1].success);
    assert_eq!(run.outcomes[1].attempts, 3);
    assert!(run.outcomes[1].tried_answers.is_empty());
    assert_eq!(run.outcomes[2].address, "https://demo.test/challenge/3");

    let raw = std::fs::read_to_string(dir.path().join("run_stats.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        report["addressing"],
        "templated:https://demo.test/challenge/{n}"
    );
    assert_eq!(report["challenges"][1]["error"], "attempts exhausted");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_still_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = write_file(
        dir.path(),
        "one.toml",
        "[[challenges]]\ncode = \"AB12C9\"\n",
    );
    let config = config_for(dir.path(), scenario, 1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = challenge_agent::execute(&config, &NullOracle, cancel)
        .await
        .unwrap();

    assert_eq!(run.skipped, 1);
    assert_ne!(run.exit_code(), 0);
    let raw = std::fs::read_to_string(dir.path().join("run_stats.json")).unwrap();
    assert!(raw.contains("\"terminal_error\": \"cancelled\""));
}

#[tokio::test]
async fn test_missing_scenario_is_an_error() {
    let config = AgentConfig::default();
    let err = challenge_agent::execute(&config, &NullOracle, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--scenario"));
}
