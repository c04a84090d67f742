//! Page signals and result classification
//!
//! After a submission the solver reads a fresh [`PageSignal`] and asks
//! [`classify`] what happened. Page-text heuristics are noisy, so an
//! inconclusive page is a first-class [`Classification::Ambiguous`] result
//! that triggers a retry instead of a failure record.
//!
//! Priority:
//!
//! ```text
//! step indicator > challenge index      → Progressed
//! success keyword, no failure keyword   → Success
//! failure keyword, no success keyword   → Failure
//! completion marker                     → Completion
//! otherwise                             → Ambiguous
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::capability::PageSnapshot;
use crate::error::ConfigError;

/// Abstracted page state. Derived fresh on every check, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignal {
    pub success: bool,
    pub failure: bool,
    /// Parsed "step N" indicator, if the page shows one.
    pub step: Option<u32>,
    /// The page says every challenge is done.
    pub completion: bool,
}

/// Outcome of one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Success,
    Failure,
    /// The page moved past the current challenge.
    Progressed { step: u32 },
    Completion,
    Ambiguous,
}

impl Classification {
    /// Whether the challenge counts as solved.
    pub fn is_solved(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Progressed { .. } | Self::Completion
        )
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Progressed { step } => write!(f, "progressed to step {}", step),
            Self::Completion => write!(f, "completion"),
            Self::Ambiguous => write!(f, "unclear"),
        }
    }
}

/// Classify `signal` for the challenge at `challenge_index` (1-based).
pub fn classify(signal: &PageSignal, challenge_index: u32) -> Classification {
    if let Some(step) = signal.step {
        if step > challenge_index {
            return Classification::Progressed { step };
        }
    }
    if signal.success && !signal.failure {
        return Classification::Success;
    }
    if signal.failure && !signal.success {
        return Classification::Failure;
    }
    if signal.completion {
        return Classification::Completion;
    }
    Classification::Ambiguous
}

/// Keyword sets and the step pattern, tuned per target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub success_keywords: Vec<String>,
    pub failure_keywords: Vec<String>,
    pub completion_markers: Vec<String>,
    /// Regex with one capture group holding the step number.
    pub step_pattern: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            success_keywords: [
                "correct",
                "success",
                "well done",
                "congratulations",
                "passed",
                "solved",
            ]
            .map(String::from)
            .to_vec(),
            failure_keywords: ["incorrect", "wrong", "try again", "failed", "invalid"]
                .map(String::from)
                .to_vec(),
            completion_markers: [
                "all challenges complete",
                "all challenges completed",
                "all steps complete",
                "you have completed all",
            ]
            .map(String::from)
            .to_vec(),
            step_pattern: r"(?i)\bstep\s*(\d+)".to_string(),
        }
    }
}

/// Turns page text into [`PageSignal`]s and classifies them.
#[derive(Debug, Clone)]
pub struct ResultClassifier {
    success: Option<Regex>,
    failure: Option<Regex>,
    completion: Option<Regex>,
    step: Regex,
}

impl ResultClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        let step = Regex::new(&config.step_pattern).map_err(|e| ConfigError::Pattern {
            field: "classifier.step_pattern".into(),
            source: e,
        })?;
        if step.captures_len() < 2 {
            return Err(ConfigError::Invalid {
                field: "classifier.step_pattern".into(),
                reason: "needs a capture group for the step number".into(),
            });
        }

        Ok(Self {
            success: keyword_set("classifier.success_keywords", &config.success_keywords)?,
            failure: keyword_set("classifier.failure_keywords", &config.failure_keywords)?,
            completion: keyword_set(
                "classifier.completion_markers",
                &config.completion_markers,
            )?,
            step,
        })
    }

    /// Derive a signal from raw page text.
    pub fn read_text(&self, text: &str) -> PageSignal {
        let hit = |re: &Option<Regex>| re.as_ref().is_some_and(|re| re.is_match(text));
        let step = self
            .step
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());

        PageSignal {
            success: hit(&self.success),
            failure: hit(&self.failure),
            step,
            completion: hit(&self.completion),
        }
    }

    /// Derive a signal from a snapshot's visible text.
    pub fn read(&self, snapshot: &PageSnapshot) -> PageSignal {
        self.read_text(&snapshot.visible_text)
    }

    pub fn classify(&self, signal: &PageSignal, challenge_index: u32) -> Classification {
        classify(signal, challenge_index)
    }
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default()).expect("default classifier config is valid")
    }
}

/// Whole-word, case-insensitive alternation. Empty sets never match.
fn keyword_set(field: &str, words: &[String]) -> Result<Option<Regex>, ConfigError> {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(|w| {
            w.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| ConfigError::Pattern {
            field: field.to_string(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(success: bool, failure: bool, step: Option<u32>, completion: bool) -> PageSignal {
        PageSignal {
            success,
            failure,
            step,
            completion,
        }
    }

    #[test]
    fn test_step_past_index_is_progress() {
        let s = signal(false, false, Some(5), false);
        assert_eq!(classify(&s, 4), Classification::Progressed { step: 5 });
    }

    #[test]
    fn test_progress_beats_failure_keyword() {
        let s = signal(false, true, Some(3), false);
        assert_eq!(classify(&s, 2), Classification::Progressed { step: 3 });
    }

    #[test]
    fn test_same_step_is_not_progress() {
        let s = signal(false, false, Some(4), false);
        assert_eq!(classify(&s, 4), Classification::Ambiguous);
    }

    #[test]
    fn test_keyword_rules() {
        assert_eq!(
            classify(&signal(true, false, None, false), 1),
            Classification::Success
        );
        assert_eq!(
            classify(&signal(false, true, None, false), 1),
            Classification::Failure
        );
        assert_eq!(
            classify(&signal(true, true, None, false), 1),
            Classification::Ambiguous
        );
        assert_eq!(
            classify(&signal(true, true, None, true), 1),
            Classification::Completion
        );
    }

    #[test]
    fn test_read_text() {
        let classifier = ResultClassifier::default();

        let s = classifier.read_text("Correct! Moving on to Step 5 of 30");
        assert!(s.success);
        assert!(!s.failure);
        assert_eq!(s.step, Some(5));

        let s = classifier.read_text("Incorrect code, try again.");
        assert!(s.failure);
        assert!(!s.success, "'incorrect' must not count as 'correct'");

        let s = classifier.read_text("Congratulations, all challenges complete!");
        assert!(s.completion);
    }

    #[test]
    fn test_read_text_without_indicators() {
        let classifier = ResultClassifier::default();
        let s = classifier.read_text("Enter the code below");
        assert_eq!(s, PageSignal::default());
        assert_eq!(classifier.classify(&s, 1), Classification::Ambiguous);
    }

    #[test]
    fn test_custom_keywords() {
        let config = ClassifierConfig {
            success_keywords: vec!["nice one".into()],
            failure_keywords: vec![],
            completion_markers: vec![],
            step_pattern: r"(?i)level\s+(\d+)".into(),
        };
        let classifier = ResultClassifier::new(&config).unwrap();
        let s = classifier.read_text("NICE   ONE - level 7");
        assert!(s.success);
        assert!(!s.failure);
        assert_eq!(s.step, Some(7));
    }

    #[test]
    fn test_step_pattern_needs_group() {
        let config = ClassifierConfig {
            step_pattern: r"step \d+".into(),
            ..ClassifierConfig::default()
        };
        assert!(ResultClassifier::new(&config).is_err());
    }

    #[test]
    fn test_solved_classifications() {
        assert!(Classification::Success.is_solved());
        assert!(Classification::Progressed { step: 2 }.is_solved());
        assert!(Classification::Completion.is_solved());
        assert!(!Classification::Failure.is_solved());
        assert!(!Classification::Ambiguous.is_solved());
    }
}
