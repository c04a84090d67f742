//! Scripted in-memory site.
//!
//! A [`Scenario`] file describes a sequence of challenges and where each
//! one hides its code. [`ScenarioBrowser`] serves it through
//! [`BrowserCapability`] so the whole agent can be dry-run without a real
//! browser.
//!
//! ```toml
//! base_address = "https://demo.test"
//! layout = "dynamic"
//! start_required = true
//!
//! [[challenges]]
//! code = "AB12C9"
//!
//! [[challenges]]
//! code = "QW34ER"
//! reveal = "after_sweep"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use coordination::{BrowserCapability, PageSnapshot, ToolError, ToolResult};
use serde::Deserialize;
use tracing::debug;

/// PNG signature, enough for a vision request to carry something.
const PLACEHOLDER_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// How challenges are laid out on the site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One page at `{base}/step1` that swaps content.
    #[default]
    Dynamic,
    /// One page per challenge at `{base}/challenge/{n}`.
    Templated,
}

/// Where a challenge keeps its code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reveal {
    /// In the visible text.
    #[default]
    Visible,
    /// In the visible text only after an interaction sweep.
    AfterSweep,
    /// Logged to the console.
    Console,
    /// In an element that is not rendered.
    Hidden,
    /// In a `data-code` attribute.
    Attribute,
    /// Nowhere in the text; only an oracle could find it.
    Nowhere,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioChallenge {
    pub code: String,
    #[serde(default)]
    pub reveal: Reveal,
    /// Extra visible lines, e.g. distractor tokens.
    #[serde(default)]
    pub noise: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_base")]
    pub base_address: String,
    #[serde(default)]
    pub layout: Layout,
    /// A START control must be activated before challenge 1 shows.
    #[serde(default)]
    pub start_required: bool,
    pub challenges: Vec<ScenarioChallenge>,
}

fn default_base() -> String {
    "https://scenario.local".to_string()
}

impl Scenario {
    /// Load a `.json` or `.toml` scenario file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("invalid scenario {}", path.display()))?,
            _ => toml::from_str(&raw)
                .with_context(|| format!("invalid scenario {}", path.display()))?,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.challenges.is_empty() {
            bail!("scenario has no challenges");
        }
        if let Some(c) = self.challenges.iter().find(|c| c.code.trim().is_empty()) {
            bail!("scenario challenge with empty code: {:?}", c);
        }
        Ok(())
    }

    /// Address the run should start from.
    pub fn entry_address(&self) -> String {
        if self.start_required {
            self.base().to_string()
        } else {
            self.challenge_address(1)
        }
    }

    fn base(&self) -> &str {
        self.base_address.trim_end_matches('/')
    }

    fn challenge_address(&self, index: usize) -> String {
        match self.layout {
            Layout::Dynamic => format!("{}/step1", self.base()),
            Layout::Templated => format!("{}/challenge/{}", self.base(), index),
        }
    }
}

#[derive(Debug)]
struct SiteState {
    address: String,
    started: bool,
    /// 1-based challenge on screen.
    current: usize,
    /// Challenges answered correctly.
    solved: usize,
    swept: bool,
    feedback: Option<String>,
    submissions: Vec<(usize, String)>,
}

/// [`BrowserCapability`] over a [`Scenario`].
pub struct ScenarioBrowser {
    scenario: Scenario,
    state: Mutex<SiteState>,
}

impl ScenarioBrowser {
    pub fn new(scenario: Scenario) -> Self {
        let state = SiteState {
            address: String::new(),
            started: !scenario.start_required,
            current: 1,
            solved: 0,
            swept: false,
            feedback: None,
            submissions: Vec::new(),
        };
        Self {
            scenario,
            state: Mutex::new(state),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Every submission so far as `(challenge, answer)`.
    pub fn submissions(&self) -> Vec<(usize, String)> {
        self.lock().map(|s| s.submissions.clone()).unwrap_or_default()
    }

    fn lock(&self) -> ToolResult<std::sync::MutexGuard<'_, SiteState>> {
        self.state
            .lock()
            .map_err(|_| ToolError::SessionLost("scenario state poisoned".into()))
    }

    fn is_finished(&self, state: &SiteState) -> bool {
        state.solved >= self.scenario.challenges.len()
            && self.scenario.layout == Layout::Dynamic
    }

    fn render(&self, state: &SiteState) -> PageSnapshot {
        if !state.started {
            return PageSnapshot::from_text("Welcome! Press START to begin.");
        }
        if self.is_finished(state) {
            return PageSnapshot::from_text(
                "Congratulations! All challenges complete.",
            );
        }

        let Some(challenge) = self.scenario.challenges.get(state.current - 1) else {
            return PageSnapshot::from_text("Page not found");
        };
        let total = self.scenario.challenges.len();
        let mut lines = Vec::new();
        if let Some(feedback) = &state.feedback {
            lines.push(feedback.clone());
        }
        // Only the evolving page shows a step indicator.
        lines.push(match self.scenario.layout {
            Layout::Dynamic => format!("Step {} of {}", state.current, total),
            Layout::Templated => format!("Challenge {} of {}", state.current, total),
        });
        lines.push("Find the code and enter it below.".to_string());
        lines.extend(challenge.noise.iter().cloned());

        let mut snapshot = PageSnapshot {
            screenshot: Some(PLACEHOLDER_PNG.to_vec()),
            ..PageSnapshot::default()
        };
        let code_line = format!("Code: {}", challenge.code);
        match challenge.reveal {
            Reveal::Visible => lines.push(code_line),
            Reveal::AfterSweep if state.swept => lines.push(code_line),
            Reveal::AfterSweep => lines.push("Scroll down to reveal the code.".into()),
            Reveal::Console => snapshot.console_logs.push(format!("secret: {}", challenge.code)),
            Reveal::Hidden => snapshot.hidden_elements.push(code_line),
            Reveal::Attribute => {
                snapshot.dom_attributes =
                    BTreeMap::from([("data-code".to_string(), challenge.code.clone())]);
            }
            Reveal::Nowhere => {}
        }
        snapshot.visible_text = lines.join("\n");
        snapshot
    }
}

#[async_trait]
impl BrowserCapability for ScenarioBrowser {
    async fn navigate(&self, address: &str) -> ToolResult<()> {
        let mut state = self.lock()?;
        let base = self.scenario.base();
        if !address.starts_with(base) {
            return Err(ToolError::Navigation {
                address: address.to_string(),
                message: "outside the scenario".into(),
            });
        }
        if self.scenario.layout == Layout::Templated {
            if let Some(n) = address
                .rsplit('/')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
            {
                if n == 0 || n > self.scenario.challenges.len() {
                    return Err(ToolError::Navigation {
                        address: address.to_string(),
                        message: "no such challenge".into(),
                    });
                }
                state.current = n;
            }
        }
        state.address = address.to_string();
        state.swept = false;
        state.feedback = None;
        debug!(address, "scenario navigate");
        Ok(())
    }

    async fn current_address(&self) -> ToolResult<String> {
        Ok(self.lock()?.address.clone())
    }

    async fn extract_page_snapshot(&self) -> ToolResult<PageSnapshot> {
        let state = self.lock()?;
        Ok(self.render(&state))
    }

    async fn submit(
        &self,
        answer: &str,
        _input_hint: Option<&str>,
        _button_hint: Option<&str>,
    ) -> ToolResult<bool> {
        let mut state = self.lock()?;
        if !state.started || self.is_finished(&state) {
            return Ok(false);
        }
        let current = state.current;
        state.submissions.push((current, answer.to_string()));

        let Some(challenge) = self.scenario.challenges.get(current - 1) else {
            return Ok(false);
        };
        if challenge.code.eq_ignore_ascii_case(answer.trim()) {
            state.solved += 1;
            match self.scenario.layout {
                Layout::Dynamic => {
                    state.current += 1;
                    state.swept = false;
                    state.feedback = Some("Correct!".into());
                }
                Layout::Templated => {
                    state.feedback = Some("Correct! Well done.".into());
                }
            }
        } else {
            state.feedback = Some("Incorrect code, try again.".into());
        }
        Ok(true)
    }

    async fn perform_interaction_sweep(&self) -> ToolResult<()> {
        self.lock()?.swept = true;
        Ok(())
    }

    async fn activate(&self, label: &str) -> ToolResult<bool> {
        let mut state = self.lock()?;
        if state.started || !label.eq_ignore_ascii_case("start") {
            return Ok(false);
        }
        state.started = true;
        state.address = self.scenario.challenge_address(1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(layout: Layout) -> Scenario {
        Scenario {
            base_address: "https://demo.test".into(),
            layout,
            start_required: true,
            challenges: vec![
                ScenarioChallenge {
                    code: "AB12C9".into(),
                    reveal: Reveal::Visible,
                    noise: vec![],
                },
                ScenarioChallenge {
                    code: "QW34ER".into(),
                    reveal: Reveal::AfterSweep,
                    noise: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_start_gate() {
        let browser = ScenarioBrowser::new(scenario(Layout::Dynamic));
        let page = browser.extract_page_snapshot().await.unwrap();
        assert!(page.visible_text.contains("START"));
        assert!(!browser.submit("AB12C9", None, None).await.unwrap());

        assert!(browser.activate("START").await.unwrap());
        assert!(!browser.activate("START").await.unwrap());
        assert_eq!(
            browser.current_address().await.unwrap(),
            "https://demo.test/step1"
        );
    }

    #[tokio::test]
    async fn test_dynamic_progression() {
        let browser = ScenarioBrowser::new(scenario(Layout::Dynamic));
        browser.activate("start").await.unwrap();

        assert!(browser.submit("AB12C9", None, None).await.unwrap());
        let page = browser.extract_page_snapshot().await.unwrap();
        assert!(page.visible_text.contains("Correct!"));
        assert!(page.visible_text.contains("Step 2 of 2"));
        assert!(!page.visible_text.contains("QW34ER"));

        browser.perform_interaction_sweep().await.unwrap();
        let page = browser.extract_page_snapshot().await.unwrap();
        assert!(page.visible_text.contains("Code: QW34ER"));

        browser.submit("QW34ER", None, None).await.unwrap();
        let page = browser.extract_page_snapshot().await.unwrap();
        assert!(page.visible_text.contains("All challenges complete"));
    }

    #[tokio::test]
    async fn test_templated_navigation() {
        let browser = ScenarioBrowser::new(scenario(Layout::Templated));
        browser.activate("START").await.unwrap();
        browser
            .navigate("https://demo.test/challenge/2")
            .await
            .unwrap();
        browser.submit("WRONG1", None, None).await.unwrap();
        let page = browser.extract_page_snapshot().await.unwrap();
        assert!(page.visible_text.contains("Incorrect"));
        assert_eq!(browser.submissions(), vec![(2, "WRONG1".to_string())]);

        assert!(browser
            .navigate("https://demo.test/challenge/9")
            .await
            .is_err());
        assert!(browser.navigate("https://elsewhere.test").await.is_err());
    }

    #[test]
    fn test_parse_toml_and_json() {
        let toml_src = r#"
            layout = "templated"
            [[challenges]]
            code = "AB12C9"
            reveal = "console"
        "#;
        let s: Scenario = toml::from_str(toml_src).unwrap();
        assert_eq!(s.layout, Layout::Templated);
        assert_eq!(s.challenges[0].reveal, Reveal::Console);
        assert_eq!(s.entry_address(), "https://scenario.local/challenge/1");

        let s: Scenario =
            serde_json::from_str(r#"{"challenges": [{"code": "ZX56CV"}]}"#).unwrap();
        assert_eq!(s.layout, Layout::Dynamic);
        assert_eq!(s.challenges[0].reveal, Reveal::Visible);
    }

    #[test]
    fn test_empty_scenario_rejected() {
        let s: Scenario = serde_json::from_str(r#"{"challenges": []}"#).unwrap();
        assert!(s.validate().is_err());
    }
}
