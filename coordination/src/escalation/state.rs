//! Escalation State — solver states, strategy rotation, tried answers

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::extractor::Provenance;
use crate::signal::Classification;

/// Default number of attempts per challenge (length of the default rotation).
pub const MAX_ATTEMPTS: u32 = 3;

/// One way of producing a candidate answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Interaction sweep, re-read the page, heuristics, then the text oracle.
    InteractionAssisted,
    /// Screenshot sent to the vision oracle.
    VisionAssisted,
    /// Read the page as-is, heuristics, then the text oracle.
    TextExtraction,
}

impl Strategy {
    /// Whether this strategy may call the vision oracle.
    pub fn uses_vision(self) -> bool {
        matches!(self, Self::VisionAssisted)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InteractionAssisted => write!(f, "interaction"),
            Self::VisionAssisted => write!(f, "vision"),
            Self::TextExtraction => write!(f, "text"),
        }
    }
}

/// Fixed strategy order across attempts. Attempt `n` uses entry `n - 1`.
///
/// The default is interaction, vision, interaction: interaction is free and
/// yields the most, vision is the single costly fallback in the middle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyRotation(Vec<Strategy>);

impl Default for StrategyRotation {
    fn default() -> Self {
        Self(vec![
            Strategy::InteractionAssisted,
            Strategy::VisionAssisted,
            Strategy::InteractionAssisted,
        ])
    }
}

impl StrategyRotation {
    pub fn new(order: Vec<Strategy>) -> Result<Self, ConfigError> {
        if order.is_empty() {
            return Err(ConfigError::Invalid {
                field: "solver.rotation".into(),
                reason: "needs at least one strategy".into(),
            });
        }
        if order.len() > MAX_ATTEMPTS as usize {
            return Err(ConfigError::Invalid {
                field: "solver.rotation".into(),
                reason: format!(
                    "at most {MAX_ATTEMPTS} strategies allowed, got {}",
                    order.len()
                ),
            });
        }
        Ok(Self(order))
    }

    /// Strategy for 1-based `attempt`, `None` past the end of the table or
    /// past [`MAX_ATTEMPTS`].
    pub fn for_attempt(&self, attempt: u32) -> Option<Strategy> {
        if attempt > MAX_ATTEMPTS {
            return None;
        }
        let idx = usize::try_from(attempt.checked_sub(1)?).ok()?;
        self.0.get(idx).copied()
    }

    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.0.len())
            .unwrap_or(u32::MAX)
            .min(MAX_ATTEMPTS)
    }

    /// Same table with every vision slot replaced by plain text extraction.
    pub fn without_vision(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|s| {
                    if s.uses_vision() {
                        Strategy::TextExtraction
                    } else {
                        *s
                    }
                })
                .collect(),
        )
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.0
    }
}

/// States of the per-challenge machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverState {
    NotStarted,
    Attempting(u32),
    Submitted { attempt: u32 },
    Succeeded,
    Failed,
    TimedOut,
}

impl SolverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for SolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Attempting(n) => write!(f, "attempting({})", n),
            Self::Submitted { attempt } => write!(f, "submitted({})", attempt),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Answers already submitted for the current challenge.
///
/// Owned by exactly one solver; a fresh set exists per challenge.
#[derive(Debug, Clone, Default)]
pub struct TriedAnswerSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl TriedAnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, answer: &str) -> bool {
        self.seen.contains(answer)
    }

    /// Add `answer`. Returns `false` if it was already present.
    pub fn insert(&mut self, answer: &str) -> bool {
        if self.seen.insert(answer.to_string()) {
            self.order.push(answer.to_string());
            true
        } else {
            false
        }
    }

    pub fn as_set(&self) -> &HashSet<String> {
        &self.seen
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Answers in submission order.
    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// What an attempt ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttemptVerdict {
    /// The strategy produced nothing.
    NoCandidate,
    /// The strategy repeated an answer from the tried set; nothing submitted.
    AlreadyTried,
    /// The browser could not drive the input or the submit control.
    SubmitFailed,
    /// Submitted and classified.
    Classified { result: Classification },
}

impl AttemptVerdict {
    /// Submitted but the page gave no conclusive signal.
    pub fn is_unclear(self) -> bool {
        matches!(
            self,
            Self::Classified {
                result: Classification::Ambiguous
            }
        )
    }
}

/// Record of a single attempt, kept for the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub verdict: AttemptVerdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rotation() {
        let rotation = StrategyRotation::default();
        assert_eq!(rotation.max_attempts(), MAX_ATTEMPTS);
        assert_eq!(
            rotation.for_attempt(1),
            Some(Strategy::InteractionAssisted)
        );
        assert_eq!(rotation.for_attempt(2), Some(Strategy::VisionAssisted));
        assert_eq!(
            rotation.for_attempt(3),
            Some(Strategy::InteractionAssisted)
        );
        assert_eq!(rotation.for_attempt(0), None);
        assert_eq!(rotation.for_attempt(4), None);
    }

    #[test]
    fn test_rotation_without_vision() {
        let rotation = StrategyRotation::default().without_vision();
        assert_eq!(
            rotation.strategies(),
            &[
                Strategy::InteractionAssisted,
                Strategy::TextExtraction,
                Strategy::InteractionAssisted
            ]
        );
    }

    #[test]
    fn test_empty_rotation_rejected() {
        assert!(StrategyRotation::new(vec![]).is_err());
    }

    #[test]
    fn test_rotation_longer_than_max_attempts_rejected() {
        let err = StrategyRotation::new(vec![Strategy::TextExtraction; 4]).unwrap_err();
        assert!(err.to_string().contains("solver.rotation"));
        assert!(StrategyRotation::new(vec![Strategy::TextExtraction; 3]).is_ok());
    }

    #[test]
    fn test_unvalidated_rotation_is_capped() {
        let rotation: StrategyRotation =
            serde_json::from_str(&serde_json::to_string(&[Strategy::TextExtraction; 5]).unwrap())
                .unwrap();
        assert_eq!(rotation.max_attempts(), MAX_ATTEMPTS);
        assert_eq!(rotation.for_attempt(3), Some(Strategy::TextExtraction));
        assert_eq!(rotation.for_attempt(4), None);
    }

    #[test]
    fn test_rotation_deserializes_from_list() {
        let rotation: StrategyRotation =
            serde_json::from_str(r#"["text_extraction", "vision_assisted"]"#).unwrap();
        assert_eq!(rotation.max_attempts(), 2);
        assert_eq!(rotation.for_attempt(2), Some(Strategy::VisionAssisted));
    }

    #[test]
    fn test_tried_set_rejects_duplicates() {
        let mut tried = TriedAnswerSet::new();
        assert!(tried.insert("AB12C9"));
        assert!(!tried.insert("AB12C9"));
        assert!(tried.insert("ZZ34YY"));
        assert!(tried.contains("AB12C9"));
        assert_eq!(tried.len(), 2);
        assert_eq!(tried.into_vec(), vec!["AB12C9", "ZZ34YY"]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SolverState::Succeeded.is_terminal());
        assert!(SolverState::Failed.is_terminal());
        assert!(SolverState::TimedOut.is_terminal());
        assert!(!SolverState::Attempting(2).is_terminal());
        assert!(!SolverState::Submitted { attempt: 1 }.is_terminal());
    }

    #[test]
    fn test_unclear_verdict() {
        assert!(AttemptVerdict::Classified {
            result: Classification::Ambiguous
        }
        .is_unclear());
        assert!(!AttemptVerdict::Classified {
            result: Classification::Failure
        }
        .is_unclear());
        assert!(!AttemptVerdict::NoCandidate.is_unclear());
    }
}
