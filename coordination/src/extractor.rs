//! Answer extraction from raw page text
//!
//! Deterministic, side-effect free. Three pattern families are tried in
//! priority order; the first token that survives the exclusion policy wins.
//!
//! | Priority | Pattern                              | Confidence |
//! |----------|--------------------------------------|------------|
//! | 1        | token alone on its own line          | 0.85       |
//! | 2        | token after `code:` / `answer:` ...  | 0.90       |
//! | 3        | any token with a letter and a digit  | 0.70       |
//!
//! Code length, markers and the exclusion lists are configuration: they are
//! tuned for one family of target pages, not general text analysis.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

static HAS_LETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]").unwrap());
static HAS_DIGIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]").unwrap());

/// Which pattern family produced a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    StandaloneLine,
    Marker,
    MixedToken,
}

impl MatchKind {
    /// Static confidence per source: marker > standalone line > mixed token.
    pub fn confidence(self) -> f64 {
        match self {
            Self::Marker => 0.9,
            Self::StandaloneLine => 0.85,
            Self::MixedToken => 0.7,
        }
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StandaloneLine => write!(f, "standalone_line"),
            Self::Marker => write!(f, "marker"),
            Self::MixedToken => write!(f, "mixed_token"),
        }
    }
}

/// Where a candidate answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Extractor(MatchKind),
    TextOracle,
    VisionOracle,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extractor(kind) => write!(f, "extractor:{}", kind),
            Self::TextOracle => write!(f, "text_oracle"),
            Self::VisionOracle => write!(f, "vision_oracle"),
        }
    }
}

/// A proposed answer. Produced and consumed within one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub answer: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Selector for the answer input, passed through to the browser as-is.
    pub input_hint: Option<String>,
    /// Selector for the submit control, passed through to the browser as-is.
    pub button_hint: Option<String>,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn new(answer: impl Into<String>, confidence: f64, provenance: Provenance) -> Self {
        Self {
            answer: answer.into().trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            input_hint: None,
            button_hint: None,
            provenance,
        }
    }

    pub fn with_input_hint(mut self, hint: impl Into<String>) -> Self {
        self.input_hint = Some(hint.into());
        self
    }

    pub fn with_button_hint(mut self, hint: impl Into<String>) -> Self {
        self.button_hint = Some(hint.into());
        self
    }
}

/// Tunables for [`AnswerExtractor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Exact length of a code.
    pub code_length: usize,
    /// Phrases that introduce a code, without the trailing colon.
    pub markers: Vec<String>,
    /// Words that happen to have the code length but are never codes.
    pub excluded_words: Vec<String>,
    /// Measurement units; `<digits><unit>` tokens are discarded.
    pub unit_suffixes: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let words = [
            "button", "scroll", "window", "screen", "number", "string", "submit", "reveal",
            "hidden", "secret", "answer", "please", "should", "cannot", "object", "before",
            "loaded", "appear", "unique", "random", "update", "return", "result", "format",
            "normal", "simple", "double", "single", "change", "select", "option", "middle",
            "center", "bottom", "yellow", "purple", "orange", "border", "shadow", "height",
            "length", "inside", "output", "source", "target", "status", "cookie", "accept",
            "signup", "labels", "block1", "block2", "block3", "margin", "pixels", "points",
            "widths", "offset", "cursor",
        ];
        Self {
            code_length: 6,
            markers: ["code is", "code", "answer", "revealed", "secret"]
                .map(String::from)
                .to_vec(),
            excluded_words: words.map(String::from).to_vec(),
            unit_suffixes: ["px", "ms", "em", "rem", "pt", "vh", "vw"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Pulls a short code out of arbitrary page text.
#[derive(Debug, Clone)]
pub struct AnswerExtractor {
    standalone: Regex,
    marker: Regex,
    token: Regex,
    unit: Option<Regex>,
    excluded: HashSet<String>,
}

impl AnswerExtractor {
    /// Compile the patterns for `config`.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ConfigError> {
        if config.code_length == 0 {
            return Err(ConfigError::Invalid {
                field: "extractor.code_length".into(),
                reason: "must be at least 1".into(),
            });
        }
        let n = config.code_length;

        let standalone = compile(
            "extractor.standalone",
            &format!(r"(?im)^[ \t\r]*([A-Za-z0-9]{{{n}}})[ \t\r]*$"),
        )?;

        let mut markers: Vec<String> = config
            .markers
            .iter()
            .map(|m| m.trim().trim_end_matches(':').trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if markers.is_empty() {
            return Err(ConfigError::Invalid {
                field: "extractor.markers".into(),
                reason: "at least one marker is required".into(),
            });
        }
        // Longest first so "code is" wins over "code".
        markers.sort_by_key(|m| std::cmp::Reverse(m.len()));
        let alternatives = markers
            .iter()
            .map(|m| {
                m.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        let marker = compile(
            "extractor.markers",
            &format!(r"(?i)\b(?:{alternatives})\s*[:\s]\s*([A-Za-z0-9]{{{n}}})\b"),
        )?;

        let token = compile("extractor.token", &format!(r"\b([A-Za-z0-9]{{{n}}})\b"))?;

        let suffixes = config
            .unit_suffixes
            .iter()
            .map(|s| regex::escape(s.trim()))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let unit = if suffixes.is_empty() {
            None
        } else {
            Some(compile(
                "extractor.unit_suffixes",
                &format!(r"(?i)^[0-9]+(?:{})$", suffixes.join("|")),
            )?)
        };

        Ok(Self {
            standalone,
            marker,
            token,
            unit,
            excluded: config
                .excluded_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        })
    }

    /// First acceptable code in `text`, if any.
    pub fn extract(&self, text: &str) -> Option<Candidate> {
        self.scan(text, |_| false)
    }

    /// Like [`extract`](Self::extract) but skips codes already in `tried`.
    pub fn extract_untried(&self, text: &str, tried: &HashSet<String>) -> Option<Candidate> {
        self.scan(text, |code| tried.contains(code))
    }

    /// Whether the exclusion policy rejects `token`.
    pub fn is_excluded(&self, token: &str) -> bool {
        if token.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
        if self.excluded.contains(&token.to_lowercase()) {
            return true;
        }
        self.unit.as_ref().is_some_and(|re| re.is_match(token))
    }

    fn scan(&self, text: &str, skip: impl Fn(&str) -> bool) -> Option<Candidate> {
        let families = [
            (MatchKind::StandaloneLine, &self.standalone),
            (MatchKind::Marker, &self.marker),
            (MatchKind::MixedToken, &self.token),
        ];

        for (kind, pattern) in families {
            for caps in pattern.captures_iter(text) {
                let token = &caps[1];
                if self.is_excluded(token) {
                    continue;
                }
                if kind == MatchKind::MixedToken
                    && !(HAS_LETTER.is_match(token) && HAS_DIGIT.is_match(token))
                {
                    continue;
                }
                let code = token.to_uppercase();
                if skip(&code) {
                    continue;
                }
                return Some(Candidate::new(
                    code,
                    kind.confidence(),
                    Provenance::Extractor(kind),
                ));
            }
        }
        None
    }
}

impl Default for AnswerExtractor {
    fn default() -> Self {
        Self::new(&ExtractorConfig::default()).expect("default extractor config is valid")
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::Pattern {
        field: field.to_string(),
        source: e,
    })
}
