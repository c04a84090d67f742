//! Capability Boundary — the browser and oracle seams
//!
//! The core never talks to a browser driver or an LLM provider directly.
//! Both sit behind async traits so the solver can be driven by a real
//! session, a scripted scenario, or an in-memory test double.
//!
//! ```text
//! EscalationSolver
//!   ├─ BrowserCapability  navigate / snapshot / sweep / submit
//!   └─ OracleCapability   text + vision fallbacks (never raise)
//! ```
//!
//! Every browser call returns `Result<T, ToolError>`. The solver matches on
//! [`ToolError::is_fatal`]: transient errors degrade the current attempt,
//! fatal ones abort the run.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extractor::Candidate;

/// Errors raised at the browser boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// No element matched the selector or label.
    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    /// A click, fill or wait did not finish in time.
    #[error("{operation} timed out")]
    Timeout { operation: String },

    /// Page navigation failed or timed out.
    #[error("navigation to {address} failed: {message}")]
    Navigation { address: String, message: String },

    /// The browsing session is gone (crash, closed context). Not recoverable.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    /// Anything else the driver reports.
    #[error("browser error: {0}")]
    Other(String),
}

impl ToolError {
    /// Whether this error ends the run rather than a single attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionLost(_))
    }
}

/// Result alias for browser operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Immutable view of the page at one point in time.
///
/// Produced fresh by every [`BrowserCapability::extract_page_snapshot`] call
/// and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// `innerText` of the document body.
    pub visible_text: String,
    /// Console messages captured since the page loaded.
    #[serde(default)]
    pub console_logs: Vec<String>,
    /// Text of elements that are present in the DOM but not rendered.
    #[serde(default)]
    pub hidden_elements: Vec<String>,
    /// `data-*` and similar attributes worth inspecting, keyed by name.
    #[serde(default)]
    pub dom_attributes: BTreeMap<String, String>,
    /// PNG bytes of the viewport, when the driver could capture one.
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

impl PageSnapshot {
    /// Snapshot holding only visible text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            visible_text: text.into(),
            ..Self::default()
        }
    }

    /// Secondary text sources in the order heuristics should scan them.
    pub fn secondary_sources(&self) -> impl Iterator<Item = &str> {
        self.console_logs
            .iter()
            .chain(self.hidden_elements.iter())
            .chain(self.dom_attributes.values())
            .map(String::as_str)
    }
}

/// The single browsing session used by a run.
///
/// Implementations own any interior locking; the core never calls two
/// methods concurrently.
#[async_trait]
pub trait BrowserCapability: Send + Sync {
    /// Load `address` in the current tab.
    async fn navigate(&self, address: &str) -> ToolResult<()>;

    /// Address currently shown in the tab.
    async fn current_address(&self) -> ToolResult<String>;

    /// Read a fresh [`PageSnapshot`].
    async fn extract_page_snapshot(&self) -> ToolResult<PageSnapshot>;

    /// Type `answer` and press the submit control.
    ///
    /// Hints come straight from the candidate and are passed through
    /// untouched. Returns `false` when no input or button could be driven.
    async fn submit(
        &self,
        answer: &str,
        input_hint: Option<&str>,
        button_hint: Option<&str>,
    ) -> ToolResult<bool>;

    /// Scroll, click, hover and drag heuristics bundled as one operation.
    async fn perform_interaction_sweep(&self) -> ToolResult<()>;

    /// Activate a control by its visible label (e.g. a "START" button).
    ///
    /// Returns `false` when nothing with that label exists.
    async fn activate(&self, _label: &str) -> ToolResult<bool> {
        Ok(false)
    }
}

/// Aggregate oracle usage counters carried into the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleUsage {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    #[serde(default)]
    pub calls_by_model: BTreeMap<String, u64>,
}

impl OracleUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Record one completed call.
    pub fn add_call(&mut self, model: &str, input_tokens: u64, output_tokens: u64, cost: f64) {
        self.total_calls += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cost_usd += cost;
        *self.calls_by_model.entry(model.to_string()).or_insert(0) += 1;
    }

    /// Record a call that produced no usable reply.
    pub fn add_failure(&mut self, model: &str) {
        self.total_calls += 1;
        self.failed_calls += 1;
        *self.calls_by_model.entry(model.to_string()).or_insert(0) += 1;
    }
}

/// AI-assisted fallback.
///
/// Implementations must swallow their own failures (network, malformed
/// reply) and return `None`; the core treats that exactly like "no
/// candidate".
#[async_trait]
pub trait OracleCapability: Send + Sync {
    async fn solve_from_text(
        &self,
        snapshot: &PageSnapshot,
        tried: &HashSet<String>,
        challenge_index: u32,
    ) -> Option<Candidate>;

    async fn solve_from_image(
        &self,
        screenshot: &[u8],
        tried: &HashSet<String>,
        challenge_index: u32,
    ) -> Option<Candidate>;

    /// Counters accumulated so far.
    fn usage(&self) -> OracleUsage {
        OracleUsage::default()
    }
}

/// Oracle that never answers. Used when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOracle;

#[async_trait]
impl OracleCapability for NullOracle {
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
        _tried: &HashSet<String>,
        _challenge_index: u32,
    ) -> Option<Candidate> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_session_loss_is_fatal() {
        assert!(ToolError::SessionLost("crashed".into()).is_fatal());
        assert!(!ToolError::SelectorNotFound("#answer".into()).is_fatal());
        assert!(!ToolError::Timeout {
            operation: "click".into()
        }
        .is_fatal());
        assert!(!ToolError::Navigation {
            address: "https://x.test".into(),
            message: "timeout".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_secondary_sources_order() {
        let mut snapshot = PageSnapshot::from_text("body");
        snapshot.console_logs.push("log".into());
        snapshot.hidden_elements.push("hidden".into());
        snapshot
            .dom_attributes
            .insert("data-code".into(), "attr".into());

        let sources: Vec<&str> = snapshot.secondary_sources().collect();
        assert_eq!(sources, vec!["log", "hidden", "attr"]);
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = OracleUsage::default();
        usage.add_call("gpt-4o", 1000, 200, 0.008);
        usage.add_failure("gpt-4o");

        assert_eq!(usage.total_calls, 2);
        assert_eq!(usage.failed_calls, 1);
        assert_eq!(usage.total_tokens(), 1200);
        assert_eq!(usage.calls_by_model["gpt-4o"], 2);
    }

    #[tokio::test]
    async fn test_null_oracle_never_answers() {
        let oracle = NullOracle;
        let snapshot = PageSnapshot::from_text("Code: AB12C9");
        assert!(oracle
            .solve_from_text(&snapshot, &HashSet::new(), 1)
            .await
            .is_none());
        assert!(oracle
            .solve_from_image(&[1, 2, 3], &HashSet::new(), 1)
            .await
            .is_none());
        assert_eq!(oracle.usage(), OracleUsage::default());
    }
}
