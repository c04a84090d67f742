//! Run report and end-of-run summary.
//!
//! The report is a single pretty-printed JSON file, overwritten every run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use coordination::{AttemptRecord, ChallengeOutcome, MetricsSink, OracleUsage, Run};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Per-challenge entry of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeReport {
    pub index: u32,
    pub address: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub attempts: u32,
    pub duration_secs: f64,
    pub slice_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tried_answers: Vec<String>,
    /// Submissions whose result page was inconclusive.
    pub unclear_checks: usize,
    pub attempt_log: Vec<AttemptRecord>,
}

impl From<&ChallengeOutcome> for ChallengeReport {
    fn from(outcome: &ChallengeOutcome) -> Self {
        Self {
            index: outcome.index,
            address: outcome.address.clone(),
            success: outcome.success,
            answer: outcome.answer.clone(),
            attempts: outcome.attempts,
            duration_secs: round_secs(outcome.elapsed),
            slice_secs: round_secs(outcome.slice),
            error: outcome.error.as_ref().map(|e| e.to_string()),
            tried_answers: outcome.tried_answers.clone(),
            unclear_checks: outcome.unclear_checks(),
            attempt_log: outcome.attempt_log.clone(),
        }
    }
}

/// Serialized form of a finalized [`Run`].
///
/// `solved + failed + skipped + not_reached` always equals `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressing: Option<String>,
    pub total: u32,
    pub solved: u32,
    pub failed: u32,
    pub skipped: u32,
    pub not_reached: u32,
    pub aborted: bool,
    pub completed_early: bool,
    pub met_deadline: bool,
    pub success_rate: f64,
    pub wall_clock_secs: f64,
    pub global_timeout_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
    pub oracle: OracleUsage,
    pub challenges: Vec<ChallengeReport>,
}

impl From<&Run> for RunReport {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id.to_string(),
            started_at: run.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            finished_at: run
                .finished_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            addressing: run.addressing.as_ref().map(|m| m.to_string()),
            total: run.total_items,
            solved: run.solved,
            failed: run.failed,
            skipped: run.skipped,
            not_reached: run.not_reached,
            aborted: run.aborted,
            completed_early: run.completed_early,
            met_deadline: run.met_deadline(),
            success_rate: run.success_rate(),
            wall_clock_secs: round_secs(run.wall_clock),
            global_timeout_secs: round_secs(run.global_timeout),
            terminal_error: run.terminal_error.clone(),
            oracle: run.oracle_usage.clone(),
            challenges: run.outcomes.iter().map(ChallengeReport::from).collect(),
        }
    }
}

/// Writes the run report as JSON to a fixed path.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonReportSink {
    fn record(&self, run: &Run) -> Result<()> {
        let report = RunReport::from(run);
        let json = serde_json::to_string_pretty(&report).context("failed to serialize run report")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        info!(path = %self.path.display(), "Wrote run report");
        Ok(())
    }
}

/// Log the end-of-run summary.
pub fn log_summary(run: &Run) {
    info!(
        run_id = %run.id,
        solved = run.solved,
        total = run.total_items,
        failed = run.failed,
        skipped = run.skipped,
        not_reached = run.not_reached,
        success_rate = %format!("{:.1}%", run.success_rate() * 100.0),
        duration = %format_duration(run.wall_clock),
        met_deadline = run.met_deadline(),
        "Run finished"
    );
    let usage = &run.oracle_usage;
    if usage.total_calls > 0 {
        info!(
            calls = usage.total_calls,
            failed = usage.failed_calls,
            tokens = usage.total_tokens(),
            cost_usd = %format!("{:.4}", usage.cost_usd),
            "Oracle usage"
        );
    }
    for outcome in run.outcomes.iter().filter(|o| !o.success) {
        warn!(
            challenge = outcome.index,
            attempts = outcome.attempts,
            error = %outcome.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            tried = ?outcome.tried_answers,
            "Unsolved challenge"
        );
    }
    if let Some(e) = &run.terminal_error {
        warn!(error = %e, "Run ended early");
    }
}

/// `2m05.0s` from a minute up, `4.25s` below.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 60.0 {
        let minutes = (secs / 60.0).floor();
        format!("{}m{:04.1}s", minutes as u64, secs - minutes * 60.0)
    } else {
        format!("{:.2}s", secs)
    }
}

fn round_secs(d: Duration) -> f64 {
    (d.as_secs_f64() * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use coordination::{AddressingMode, OutcomeError};

    use super::*;

    fn sample_run() -> Run {
        let mut run = Run::new(2, Duration::from_secs(60));
        run.addressing = Some(AddressingMode::Templated {
            template: "https://x.test/challenge/{n}".into(),
        });
        run.record(ChallengeOutcome {
            index: 1,
            address: "https://x.test/challenge/1".into(),
            success: true,
            answer: Some("AB12C9".into()),
            attempts: 1,
            elapsed: Duration::from_millis(1500),
            slice: Duration::from_secs(15),
            error: None,
            tried_answers: vec!["AB12C9".into()],
            attempt_log: vec![],
        });
        run.record(ChallengeOutcome {
            index: 2,
            address: "https://x.test/challenge/2".into(),
            success: false,
            answer: None,
            attempts: 3,
            elapsed: Duration::from_secs(9),
            slice: Duration::from_secs(15),
            error: Some(OutcomeError::AttemptsExhausted),
            tried_answers: vec![],
            attempt_log: vec![],
        });
        run.finalize(Duration::from_millis(10_500), OracleUsage::default());
        run
    }

    #[test]
    fn test_report_fields() {
        let report = RunReport::from(&sample_run());
        assert_eq!(report.total, 2);
        assert_eq!(report.solved, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.not_reached, 0);
        assert!(report.met_deadline);
        assert_eq!(report.wall_clock_secs, 10.5);
        assert_eq!(
            report.addressing.as_deref(),
            Some("templated:https://x.test/challenge/{n}")
        );
        assert_eq!(report.challenges[0].duration_secs, 1.5);
        assert_eq!(
            report.challenges[1].error.as_deref(),
            Some("attempts exhausted")
        );
    }

    #[test]
    fn test_sink_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path().join("out/run_stats.json"));
        sink.record(&sample_run()).unwrap();

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["solved"], 1);
        assert_eq!(value["challenges"][0]["answer"], "AB12C9");
        assert!(value["challenges"][1].get("answer").is_none());
        assert!(value["finished_at"].is_string());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(4250)), "4.25s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05.0s");
    }
}
