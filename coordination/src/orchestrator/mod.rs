//! Budget Orchestrator — the top-level challenge loop
//!
//! ```text
//! discover addressing (once)
//! for index in 1..=N:
//!     cancelled?            → skip the rest, terminal error "cancelled"
//!     global deadline hit?  → skip the rest
//!     slice = clamp(remaining / (N - index + 1), floor, ceiling)
//!     solve(address(index), now + slice, index)
//!     fatal outcome?        → stop, terminal error
//!     page says all done?   → stop early
//! finalize run
//! ```
//!
//! The run always ends with a finalized [`Run`], whatever happened.

pub mod discovery;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::budget::{BudgetConfig, TimeBudget};
use crate::capability::{BrowserCapability, OracleCapability};
use crate::error::ConfigError;
use crate::escalation::{EscalationSolver, PagePolicy, SolverConfig, SolverDeps};
use crate::extractor::{AnswerExtractor, ExtractorConfig};
use crate::run::{AddressingMode, Run};
use crate::signal::{ClassifierConfig, ResultClassifier};

pub use discovery::{AddressDiscovery, DiscoveryConfig};

/// Every tunable of the core, grouped the way config files lay them out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub budget: BudgetConfig,
    pub solver: SolverConfig,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
    pub discovery: DiscoveryConfig,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate()?;
        self.solver.validate()?;
        AnswerExtractor::new(&self.extractor)?;
        ResultClassifier::new(&self.classifier)?;
        AddressDiscovery::new(&self.discovery)?;
        Ok(())
    }
}

/// Drives every challenge of a run through an [`EscalationSolver`].
pub struct BudgetOrchestrator<'a> {
    browser: &'a dyn BrowserCapability,
    oracle: &'a dyn OracleCapability,
    extractor: AnswerExtractor,
    classifier: ResultClassifier,
    discovery: AddressDiscovery,
    budget: BudgetConfig,
    solver: SolverConfig,
    cancel: CancellationToken,
}

impl<'a> BudgetOrchestrator<'a> {
    pub fn new(
        browser: &'a dyn BrowserCapability,
        oracle: &'a dyn OracleCapability,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        config.budget.validate()?;
        config.solver.validate()?;
        Ok(Self {
            browser,
            oracle,
            extractor: AnswerExtractor::new(&config.extractor)?,
            classifier: ResultClassifier::new(&config.classifier)?,
            discovery: AddressDiscovery::new(&config.discovery)?,
            budget: config.budget.clone(),
            solver: config.solver.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop at the next checkpoint once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Solve challenges `1..=total_items` within `global_timeout`.
    pub async fn run(&self, total_items: u32, global_timeout: Duration) -> Run {
        let started = Instant::now();
        let mut run = Run::new(total_items, global_timeout);
        info!(
            run_id = %run.id,
            total_items,
            timeout_secs = global_timeout.as_secs_f64(),
            "run starting"
        );

        // A timeout too large to form a deadline ends the run here.
        let budget = match TimeBudget::starting_at(started, global_timeout, &self.budget) {
            Ok(budget) => budget,
            Err(e) => {
                run.terminal_error = Some(e.to_string());
                run.skip_from(1);
                run.finalize(started.elapsed(), self.oracle.usage());
                return run;
            }
        };

        let mode = match self.discovery.discover(self.browser, &self.classifier).await {
            Ok(mode) => mode,
            Err(e) => {
                error!(error = %e, "discovery failed, aborting run");
                run.terminal_error = Some(e.to_string());
                run.skip_from(1);
                run.finalize(started.elapsed(), self.oracle.usage());
                return run;
            }
        };
        run.addressing = Some(mode.clone());

        let policy = match mode {
            AddressingMode::Dynamic { .. } => PagePolicy::StayOnPage,
            AddressingMode::Templated { .. } => PagePolicy::NavigateOnStart,
        };
        let deps = SolverDeps {
            browser: self.browser,
            oracle: self.oracle,
            extractor: &self.extractor,
            classifier: &self.classifier,
            config: &self.solver,
        };

        for index in 1..=total_items {
            if self.cancel.is_cancelled() {
                warn!(next = index, "run cancelled");
                run.terminal_error = Some("cancelled".to_string());
                run.skip_from(index);
                break;
            }
            if budget.is_exhausted() {
                warn!(next = index, "global deadline reached, skipping remaining challenges");
                run.skip_from(index);
                break;
            }

            let items_left = total_items - index + 1;
            let slice = budget.slice(items_left);
            let address = mode.resolve(index);
            info!(
                challenge = index,
                slice_secs = slice.as_secs_f64(),
                remaining_secs = budget.remaining().as_secs_f64(),
                address = %address,
                "challenge starting"
            );

            let outcome = EscalationSolver::new(deps, policy)
                .solve(&address, Instant::now() + slice, index)
                .await;

            info!(
                challenge = index,
                success = outcome.success,
                attempts = outcome.attempts,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                answer = outcome.answer.as_deref().unwrap_or(""),
                "challenge finished"
            );

            let fatal = outcome.is_fatal();
            let fatal_message = outcome.error.as_ref().map(|e| e.to_string());
            run.record(outcome);

            if fatal {
                error!(challenge = index, "fatal error, aborting run");
                run.terminal_error = fatal_message;
                run.skip_from(index + 1);
                break;
            }

            if index < total_items && self.page_reports_completion().await {
                info!(challenge = index, "page reports all challenges complete");
                run.complete_early(index);
                break;
            }
        }

        run.finalize(started.elapsed(), self.oracle.usage());
        info!(
            success_rate = run.success_rate(),
            oracle_calls = run.oracle_usage.total_calls,
            oracle_cost_usd = run.oracle_usage.cost_usd,
            "{}",
            run.summary()
        );
        run
    }

    async fn page_reports_completion(&self) -> bool {
        match self.browser.extract_page_snapshot().await {
            Ok(snapshot) => self.classifier.read(&snapshot).completion,
            Err(e) => {
                debug!(error = %e, "completion check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_budget_rejected() {
        let mut config = OrchestratorConfig::default();
        config.budget.floor_secs = 20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rotation_over_attempt_limit_rejected() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"solver": {"rotation": ["text_extraction", "interaction_assisted", "text_extraction", "vision_assisted"]}}"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("solver.rotation"));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"solver": {"settle_ms": 200, "vision_enabled": false}, "budget": {"floor_secs": 4.0}}"#,
        )
        .unwrap();
        assert_eq!(config.solver.settle_ms, 200);
        assert!(!config.solver.vision_enabled);
        assert_eq!(config.solver.transition_ms, 300);
        assert_eq!(config.budget.floor_secs, 4.0);
        assert_eq!(config.budget.ceiling_secs, 15.0);
        assert!(config.validate().is_ok());
    }
}
