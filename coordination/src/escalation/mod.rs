//! Escalation — bounded per-challenge retries with strategy rotation
//!
//! Each challenge gets a fixed number of attempts. Every attempt uses the
//! strategy at its position in the rotation and may only submit an answer
//! that has not been tried yet for this challenge.
//!
//! # Strategy Ladder
//!
//! ```text
//! Attempt 1: interaction sweep
//!     │  reveal hidden content, scan visible text and side channels,
//!     │  text oracle as last resort
//!     │
//!     ├─ success / progressed / completion → done
//!     ├─ failure / unclear → next attempt (no reload)
//!     │
//!     ▼
//! Attempt 2: vision
//!     │  screenshot to the vision oracle
//!     │
//!     ▼
//! Attempt 3: interaction sweep again
//!     │  the page may have revealed more after two submissions
//!     │
//!     ▼
//! Still unsolved → failed, orchestrator moves on
//! ```

pub mod engine;
pub mod state;

pub use engine::{EscalationSolver, PagePolicy, SolverConfig, SolverDeps};
pub use state::{
    AttemptRecord, AttemptVerdict, SolverState, Strategy, StrategyRotation, TriedAnswerSet,
    MAX_ATTEMPTS,
};
