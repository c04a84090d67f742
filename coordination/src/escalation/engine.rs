//! Escalation Solver — per-challenge state machine
//!
//! Drives one challenge from `NotStarted` to a terminal state:
//!
//! ```text
//! NotStarted → Attempting(1)
//! Attempting(n):
//!   now ≥ deadline                → TimedOut
//!   n > rotation length           → Failed
//!   no candidate / already tried  → Attempting(n+1)   (nothing submitted)
//!   submit accepted               → Submitted
//!   submit rejected               → Attempting(n+1)
//! Submitted:
//!   settle, read a fresh signal, classify
//!   success / progressed / completion → Succeeded
//!   failure / ambiguous               → Attempting(n+1)
//! ```
//!
//! The page is never reloaded after a failed submission; templated mode
//! navigates only before the first attempt.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::{BrowserCapability, OracleCapability, PageSnapshot, ToolError};
use crate::error::ConfigError;
use crate::escalation::state::{
    AttemptRecord, AttemptVerdict, SolverState, Strategy, StrategyRotation, TriedAnswerSet,
};
use crate::extractor::{AnswerExtractor, Candidate};
use crate::run::{ChallengeOutcome, OutcomeError};
use crate::signal::{Classification, ResultClassifier};

/// Tunables for the solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wait between a submission and reading the result.
    pub settle_ms: u64,
    /// Wait before each challenge after the first in dynamic mode.
    pub transition_ms: u64,
    /// Strategy per attempt.
    pub rotation: StrategyRotation,
    /// When off, vision slots fall back to text extraction.
    pub vision_enabled: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1500,
            transition_ms: 300,
            rotation: StrategyRotation::default(),
            vision_enabled: true,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        StrategyRotation::new(self.rotation.strategies().to_vec()).map(|_| ())
    }

    /// Rotation with the vision toggle applied.
    pub fn effective_rotation(&self) -> StrategyRotation {
        if self.vision_enabled {
            self.rotation.clone()
        } else {
            self.rotation.without_vision()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }
}

/// How the solver gets onto the challenge page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePolicy {
    /// Templated addressing: navigate to the address unless already there.
    NavigateOnStart,
    /// Dynamic addressing: stay on the evolving page.
    StayOnPage,
}

/// Shared, read-only collaborators for every solver in a run.
#[derive(Clone, Copy)]
pub struct SolverDeps<'a> {
    pub browser: &'a dyn BrowserCapability,
    pub oracle: &'a dyn OracleCapability,
    pub extractor: &'a AnswerExtractor,
    pub classifier: &'a ResultClassifier,
    pub config: &'a SolverConfig,
}

/// Solves exactly one challenge. Build a fresh one per challenge.
pub struct EscalationSolver<'a> {
    deps: SolverDeps<'a>,
    rotation: StrategyRotation,
    policy: PagePolicy,
    state: SolverState,
    tried: TriedAnswerSet,
    log: Vec<AttemptRecord>,
    pending: Option<AttemptRecord>,
    answer: Option<String>,
    attempts: u32,
}

impl<'a> EscalationSolver<'a> {
    pub fn new(deps: SolverDeps<'a>, policy: PagePolicy) -> Self {
        Self {
            rotation: deps.config.effective_rotation(),
            deps,
            policy,
            state: SolverState::NotStarted,
            tried: TriedAnswerSet::new(),
            log: Vec::new(),
            pending: None,
            answer: None,
            attempts: 0,
        }
    }

    /// Seed the tried set, e.g. with answers known to be wrong.
    pub fn with_tried(mut self, answers: impl IntoIterator<Item = String>) -> Self {
        for answer in answers {
            self.tried.insert(&answer);
        }
        self
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Run the state machine for challenge `challenge_index` until it
    /// reaches a terminal state or hits a fatal browser error.
    pub async fn solve(
        mut self,
        address: &str,
        deadline: Instant,
        challenge_index: u32,
    ) -> ChallengeOutcome {
        let started = Instant::now();
        let slice = deadline.saturating_duration_since(started);
        let mut error = None;

        if let Err(e) = self.enter_page(address, challenge_index).await {
            error = Some(OutcomeError::Fatal(e.to_string()));
            self.state = SolverState::Failed;
        } else {
            self.state = SolverState::Attempting(1);
        }

        while !self.state.is_terminal() {
            let step = match self.state {
                SolverState::NotStarted => Ok(SolverState::Attempting(1)),
                SolverState::Attempting(n) => self.attempt(n, deadline, challenge_index).await,
                SolverState::Submitted { attempt } => {
                    self.check_result(attempt, challenge_index).await
                }
                terminal => Ok(terminal),
            };

            match step {
                Ok(next) => {
                    debug!(
                        challenge = challenge_index,
                        from = %self.state,
                        to = %next,
                        "solver transition"
                    );
                    self.state = next;
                }
                Err(e) => {
                    warn!(challenge = challenge_index, error = %e, "fatal browser error");
                    self.flush_pending(AttemptVerdict::SubmitFailed);
                    error = Some(OutcomeError::Fatal(e.to_string()));
                    self.state = SolverState::Failed;
                }
            }
        }

        let success = self.state == SolverState::Succeeded;
        if error.is_none() {
            error = match self.state {
                SolverState::TimedOut => Some(OutcomeError::TimedOut),
                SolverState::Failed => Some(OutcomeError::AttemptsExhausted),
                _ => None,
            };
        }

        ChallengeOutcome {
            index: challenge_index,
            address: address.to_string(),
            success,
            answer: self.answer,
            attempts: self.attempts,
            elapsed: started.elapsed(),
            slice,
            error,
            tried_answers: self.tried.into_vec(),
            attempt_log: self.log,
        }
    }

    async fn enter_page(&self, address: &str, challenge_index: u32) -> Result<(), ToolError> {
        match self.policy {
            PagePolicy::NavigateOnStart => {
                match self.deps.browser.current_address().await {
                    Ok(current) if current == address => return Ok(()),
                    Err(e) if e.is_fatal() => return Err(e),
                    _ => {}
                }
                if let Err(e) = self.deps.browser.navigate(address).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(challenge = challenge_index, error = %e, "navigation failed, solving current page");
                }
            }
            PagePolicy::StayOnPage => {
                let delay = self.deps.config.transition_delay();
                if challenge_index > 1 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }

    async fn attempt(
        &mut self,
        n: u32,
        deadline: Instant,
        challenge_index: u32,
    ) -> Result<SolverState, ToolError> {
        let Some(strategy) = self.rotation.for_attempt(n) else {
            return Ok(SolverState::Failed);
        };
        if Instant::now() >= deadline {
            info!(challenge = challenge_index, attempt = n, "challenge slice exhausted");
            return Ok(SolverState::TimedOut);
        }

        self.attempts = n;
        debug!(challenge = challenge_index, attempt = n, %strategy, "attempt");

        let candidate = self
            .run_strategy(strategy, challenge_index)
            .await?
            .filter(|c| !c.answer.is_empty());

        let Some(candidate) = candidate else {
            debug!(challenge = challenge_index, attempt = n, "no candidate");
            self.log.push(AttemptRecord {
                attempt: n,
                strategy,
                answer: None,
                provenance: None,
                verdict: AttemptVerdict::NoCandidate,
            });
            return Ok(SolverState::Attempting(n + 1));
        };

        let record = AttemptRecord {
            attempt: n,
            strategy,
            answer: Some(candidate.answer.clone()),
            provenance: Some(candidate.provenance),
            verdict: AttemptVerdict::AlreadyTried,
        };

        if !self.tried.insert(&candidate.answer) {
            debug!(challenge = challenge_index, answer = %candidate.answer, "already tried");
            self.log.push(record);
            return Ok(SolverState::Attempting(n + 1));
        }

        info!(
            challenge = challenge_index,
            attempt = n,
            answer = %candidate.answer,
            confidence = candidate.confidence,
            provenance = %candidate.provenance,
            "submitting"
        );
        match self
            .deps
            .browser
            .submit(
                &candidate.answer,
                candidate.input_hint.as_deref(),
                candidate.button_hint.as_deref(),
            )
            .await
        {
            Ok(true) => {
                self.answer = Some(candidate.answer);
                self.pending = Some(record);
                Ok(SolverState::Submitted { attempt: n })
            }
            Ok(false) => {
                warn!(challenge = challenge_index, attempt = n, "submit control not found");
                self.log.push(AttemptRecord {
                    verdict: AttemptVerdict::SubmitFailed,
                    ..record
                });
                Ok(SolverState::Attempting(n + 1))
            }
            Err(e) if e.is_fatal() => {
                self.pending = Some(record);
                Err(e)
            }
            Err(e) => {
                warn!(challenge = challenge_index, attempt = n, error = %e, "submit failed");
                self.log.push(AttemptRecord {
                    verdict: AttemptVerdict::SubmitFailed,
                    ..record
                });
                Ok(SolverState::Attempting(n + 1))
            }
        }
    }

    async fn check_result(
        &mut self,
        attempt: u32,
        challenge_index: u32,
    ) -> Result<SolverState, ToolError> {
        let settle = self.deps.config.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let result = match self.snapshot().await? {
            Some(snapshot) => {
                let signal = self.deps.classifier.read(&snapshot);
                self.deps.classifier.classify(&signal, challenge_index)
            }
            None => Classification::Ambiguous,
        };
        self.flush_pending(AttemptVerdict::Classified { result });

        match result {
            r if r.is_solved() => {
                info!(challenge = challenge_index, attempt, result = %r, "challenge solved");
                Ok(SolverState::Succeeded)
            }
            Classification::Failure => {
                info!(challenge = challenge_index, attempt, "answer rejected");
                Ok(SolverState::Attempting(attempt + 1))
            }
            _ => {
                warn!(challenge = challenge_index, attempt, "result unclear, continuing");
                Ok(SolverState::Attempting(attempt + 1))
            }
        }
    }

    async fn run_strategy(
        &self,
        strategy: Strategy,
        challenge_index: u32,
    ) -> Result<Option<Candidate>, ToolError> {
        match strategy {
            Strategy::InteractionAssisted => {
                if let Err(e) = self.deps.browser.perform_interaction_sweep().await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(challenge = challenge_index, error = %e, "interaction sweep failed");
                }
                self.heuristics_then_text_oracle(challenge_index).await
            }
            Strategy::TextExtraction => self.heuristics_then_text_oracle(challenge_index).await,
            Strategy::VisionAssisted => {
                let Some(snapshot) = self.snapshot().await? else {
                    return Ok(None);
                };
                match snapshot.screenshot.as_deref() {
                    Some(bytes) if !bytes.is_empty() => Ok(self
                        .deps
                        .oracle
                        .solve_from_image(bytes, self.tried.as_set(), challenge_index)
                        .await),
                    _ => {
                        debug!(challenge = challenge_index, "no screenshot available");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn heuristics_then_text_oracle(
        &self,
        challenge_index: u32,
    ) -> Result<Option<Candidate>, ToolError> {
        let Some(snapshot) = self.snapshot().await? else {
            return Ok(None);
        };
        if let Some(candidate) = self.scan_snapshot(&snapshot) {
            return Ok(Some(candidate));
        }
        debug!(challenge = challenge_index, "heuristics found nothing, asking oracle");
        Ok(self
            .deps
            .oracle
            .solve_from_text(&snapshot, self.tried.as_set(), challenge_index)
            .await)
    }

    /// Visible text first, then console, hidden elements and attributes.
    fn scan_snapshot(&self, snapshot: &PageSnapshot) -> Option<Candidate> {
        let tried = self.tried.as_set();
        std::iter::once(snapshot.visible_text.as_str())
            .chain(snapshot.secondary_sources())
            .find_map(|text| self.deps.extractor.extract_untried(text, tried))
    }

    /// Fresh snapshot; transient errors become `None`.
    async fn snapshot(&self) -> Result<Option<PageSnapshot>, ToolError> {
        match self.deps.browser.extract_page_snapshot().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "page snapshot failed");
                Ok(None)
            }
        }
    }

    fn flush_pending(&mut self, verdict: AttemptVerdict) {
        if let Some(record) = self.pending.take() {
            self.log.push(AttemptRecord { verdict, ..record });
        }
    }
}
