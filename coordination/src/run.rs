//! Run data model — per-challenge outcomes and the aggregate run
//!
//! A [`ChallengeOutcome`] is written once by the solver and never touched
//! again. A [`Run`] is built up by the orchestrator and handed to a
//! [`MetricsSink`] once finalized.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::OracleUsage;
use crate::escalation::AttemptRecord;

/// Why a challenge did not end in success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "message")]
pub enum OutcomeError {
    /// The per-challenge deadline passed before an attempt could start.
    TimedOut,
    /// Every attempt in the rotation was used without success.
    AttemptsExhausted,
    /// The browser session failed; the run stops after this challenge.
    Fatal(String),
}

impl std::fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "Timeout"),
            Self::AttemptsExhausted => write!(f, "attempts exhausted"),
            Self::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

/// Result of solving one challenge.
#[derive(Debug, Clone)]
pub struct ChallengeOutcome {
    /// 1-based challenge index.
    pub index: u32,
    pub address: String,
    pub success: bool,
    /// Last answer the browser accepted for submission.
    pub answer: Option<String>,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Time slice the challenge was given.
    pub slice: Duration,
    pub error: Option<OutcomeError>,
    /// Every submitted answer, in order.
    pub tried_answers: Vec<String>,
    pub attempt_log: Vec<AttemptRecord>,
}

impl ChallengeOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self.error, Some(OutcomeError::Fatal(_)))
    }

    /// Submissions whose page signal was inconclusive.
    pub fn unclear_checks(&self) -> usize {
        self.attempt_log
            .iter()
            .filter(|r| r.verdict.is_unclear())
            .count()
    }
}

/// How challenges are reached, decided once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AddressingMode {
    /// All challenges live on one page that changes as they are solved.
    Dynamic { address: String },
    /// Challenge `n` lives at the template with `{n}` replaced.
    Templated { template: String },
}

impl AddressingMode {
    /// Placeholder substituted with the challenge index.
    pub const PLACEHOLDER: &'static str = "{n}";

    /// Address for challenge `index`.
    pub fn resolve(&self, index: u32) -> String {
        match self {
            Self::Dynamic { address } => address.clone(),
            Self::Templated { template } => {
                template.replace(Self::PLACEHOLDER, &index.to_string())
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

impl std::fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dynamic { address } => write!(f, "dynamic:{}", address),
            Self::Templated { template } => write!(f, "templated:{}", template),
        }
    }
}

/// One end-to-end run over all challenges.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_items: u32,
    pub global_timeout: Duration,
    pub addressing: Option<AddressingMode>,
    pub outcomes: Vec<ChallengeOutcome>,
    pub solved: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Left unvisited because the page reported completion first.
    pub not_reached: u32,
    /// The loop stopped before visiting every challenge.
    pub aborted: bool,
    /// The page reported that every challenge is done.
    pub completed_early: bool,
    pub terminal_error: Option<String>,
    pub oracle_usage: OracleUsage,
    pub wall_clock: Duration,
}

impl Run {
    pub fn new(total_items: u32, global_timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            total_items,
            global_timeout,
            addressing: None,
            outcomes: Vec::new(),
            solved: 0,
            failed: 0,
            skipped: 0,
            not_reached: 0,
            aborted: false,
            completed_early: false,
            terminal_error: None,
            oracle_usage: OracleUsage::default(),
            wall_clock: Duration::ZERO,
        }
    }

    /// Append an outcome and update the counters.
    pub fn record(&mut self, outcome: ChallengeOutcome) {
        if outcome.success {
            self.solved += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Mark every challenge from `next_index` onwards as skipped.
    pub fn skip_from(&mut self, next_index: u32) {
        self.skipped = self.total_items.saturating_sub(next_index.saturating_sub(1));
        self.aborted = true;
    }

    /// Stop after challenge `last_index` because the page reports completion.
    pub fn complete_early(&mut self, last_index: u32) {
        self.not_reached = self.total_items.saturating_sub(last_index);
        self.completed_early = true;
    }

    /// Stamp end time, wall-clock duration and oracle usage.
    pub fn finalize(&mut self, wall_clock: Duration, oracle_usage: OracleUsage) {
        self.finished_at = Some(Utc::now());
        self.wall_clock = wall_clock;
        self.oracle_usage = oracle_usage;
    }

    pub fn met_deadline(&self) -> bool {
        self.wall_clock <= self.global_timeout
    }

    /// Everything solved within the deadline.
    pub fn all_solved(&self) -> bool {
        self.solved == self.total_items && self.met_deadline()
    }

    /// Process exit code expected by operators.
    pub fn exit_code(&self) -> i32 {
        if self.all_solved() {
            0
        } else {
            1
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        f64::from(self.solved) / f64::from(self.total_items)
    }

    pub fn summary(&self) -> String {
        format!(
            "run={} solved={}/{} failed={} skipped={} not_reached={} wall_clock={:.1}s met_deadline={}",
            self.id,
            self.solved,
            self.total_items,
            self.failed,
            self.skipped,
            self.not_reached,
            self.wall_clock.as_secs_f64(),
            self.met_deadline(),
        )
    }
}

/// Consumes a finalized run, e.g. by writing a report file.
pub trait MetricsSink {
    fn record(&self, run: &Run) -> anyhow::Result<()>;
}
