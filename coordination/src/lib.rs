//! Challenge Coordination Library
//!
//! Deterministic core of a deadline-bounded challenge runner:
//! - Budget orchestration across a fixed number of challenges
//! - Per-challenge escalation with strategy rotation and anti-repeat
//! - Heuristic answer extraction from page text
//! - Classification of noisy page signals after a submission
//!
//! # Components
//!
//! ## Orchestration
//! - [`BudgetOrchestrator`]: discovers addressing once, apportions the
//!   global deadline into per-challenge slices, aggregates a [`Run`]
//!
//! ## Solving
//! - [`EscalationSolver`]: state machine over a [`StrategyRotation`]
//! - [`AnswerExtractor`]: marker, standalone-line and mixed-token heuristics
//! - [`ResultClassifier`]: success / failure / progressed / completion / unclear
//!
//! ## Boundaries
//! - [`BrowserCapability`] and [`OracleCapability`]: async traits implemented
//!   by adapters outside this crate
//! - [`MetricsSink`]: consumes the finalized run
//!
//! # Usage
//!
//! ```ignore
//! let orchestrator = BudgetOrchestrator::new(&browser, &oracle, &config)?
//!     .with_cancellation(token);
//! let run = orchestrator.run(30, Duration::from_secs(300)).await;
//! std::process::exit(run.exit_code());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod budget;
pub mod capability;
pub mod error;
pub mod escalation;
pub mod extractor;
pub mod orchestrator;
pub mod run;
pub mod signal;

// Re-export boundary types
pub use capability::{
    BrowserCapability, NullOracle, OracleCapability, OracleUsage, PageSnapshot, ToolError,
    ToolResult,
};

// Re-export configuration types
pub use budget::{seconds, BudgetConfig, TimeBudget};
pub use error::{ConfigError, ConfigResult};
pub use extractor::{AnswerExtractor, Candidate, ExtractorConfig, MatchKind, Provenance};
pub use orchestrator::{AddressDiscovery, BudgetOrchestrator, DiscoveryConfig, OrchestratorConfig};
pub use signal::{classify, Classification, ClassifierConfig, PageSignal, ResultClassifier};

// Re-export escalation types
pub use escalation::{
    AttemptRecord, AttemptVerdict, EscalationSolver, PagePolicy, SolverConfig, SolverDeps,
    SolverState, Strategy, StrategyRotation, TriedAnswerSet, MAX_ATTEMPTS,
};

// Re-export run model types
pub use run::{AddressingMode, ChallengeOutcome, MetricsSink, OutcomeError, Run};
