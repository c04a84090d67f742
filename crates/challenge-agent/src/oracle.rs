//! OpenAI-compatible oracle.
//!
//! Sends the page (or a screenshot) to a chat-completions endpoint and asks
//! for a JSON object with the answer. Every failure is logged, counted and
//! turned into "no candidate".

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use coordination::{Candidate, OracleCapability, OracleUsage, PageSnapshot, Provenance};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OracleConfig;

/// First balanced-looking JSON object (one level of nesting).
static JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}").expect("valid regex"));

const SYSTEM_PROMPT: &str = "You solve web puzzle challenges. Each challenge hides a short \
alphanumeric code somewhere on the page. Reply with a single JSON object: \
{\"answer\": string, \"confidence\": number between 0 and 1, \"reasoning\": string, \
\"input_selector\": optional CSS selector of the answer input, \
\"submit_selector\": optional CSS selector of the submit button}. \
Never repeat an answer listed as already tried.";

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("reply has no message content")]
    EmptyReply,

    #[error("reply is not a JSON answer: {0}")]
    Unparseable(String),
}

/// What the model is asked to return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OracleReply {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub input_selector: Option<String>,
    #[serde(default, alias = "submit_button")]
    pub submit_selector: Option<String>,
}

/// Token counts reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct HttpOracle {
    client: reqwest::Client,
    config: OracleConfig,
    api_key: String,
    usage: Mutex<OracleUsage>,
}

impl HttpOracle {
    pub fn new(config: OracleConfig, api_key: String) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
            usage: Mutex::new(OracleUsage::default()),
        })
    }

    /// Build from config when an API key is available.
    pub fn from_env(config: &OracleConfig) -> Option<Result<Self, OracleError>> {
        let key = config.api_key()?;
        Some(Self::new(config.clone(), key))
    }

    fn text_prompt(&self, snapshot: &PageSnapshot, tried: &HashSet<String>, index: u32) -> String {
        let mut prompt = format!("Challenge {}.\n\nVisible page text:\n", index);
        prompt.push_str(truncate(&snapshot.visible_text, self.config.max_page_chars));

        if !snapshot.console_logs.is_empty() {
            prompt.push_str("\n\nConsole output:\n");
            prompt.push_str(&snapshot.console_logs.join("\n"));
        }
        if !snapshot.hidden_elements.is_empty() {
            prompt.push_str("\n\nHidden elements:\n");
            prompt.push_str(&snapshot.hidden_elements.join("\n"));
        }
        if !snapshot.dom_attributes.is_empty() {
            prompt.push_str("\n\nData attributes:\n");
            for (name, value) in &snapshot.dom_attributes {
                prompt.push_str(&format!("{}={}\n", name, value));
            }
        }
        prompt.push_str(&tried_clause(tried));
        prompt
    }

    async fn complete(&self, user_content: Value) -> Result<(String, TokenUsage), OracleError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content },
            ],
        });

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate(&body, 300).to_string(),
            });
        }

        let value: Value = response.json().await?;
        let usage = value
            .get("usage")
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok())
            .unwrap_or_default();
        let content = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(OracleError::EmptyReply)?
            .to_string();
        Ok((content, usage))
    }

    /// One round trip, with accounting. Never fails.
    async fn ask(
        &self,
        user_content: Value,
        tried: &HashSet<String>,
        provenance: Provenance,
        index: u32,
    ) -> Option<Candidate> {
        let model = self.config.model.as_str();
        match self.complete(user_content).await {
            Ok((content, tokens)) => {
                let cost = estimate_cost(&self.config, tokens.prompt_tokens, tokens.completion_tokens);
                self.record(|u| {
                    u.add_call(model, tokens.prompt_tokens, tokens.completion_tokens, cost)
                });
                match parse_reply(&content) {
                    Ok(reply) => {
                        debug!(
                            challenge = index,
                            %provenance,
                            reasoning = reply.reasoning.as_deref().unwrap_or(""),
                            "oracle replied"
                        );
                        reply_to_candidate(reply, tried, provenance)
                    }
                    Err(e) => {
                        warn!(challenge = index, %provenance, error = %e, "oracle reply unusable");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(challenge = index, %provenance, error = %e, "oracle call failed");
                self.record(|u| u.add_failure(model));
                None
            }
        }
    }

    fn record(&self, f: impl FnOnce(&mut OracleUsage)) {
        match self.usage.lock() {
            Ok(mut usage) => f(&mut *usage),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl OracleCapability for HttpOracle {
    async fn solve_from_text(
        &self,
        snapshot: &PageSnapshot,
        tried: &HashSet<String>,
        challenge_index: u32,
    ) -> Option<Candidate> {
        let prompt = self.text_prompt(snapshot, tried, challenge_index);
        self.ask(json!(prompt), tried, Provenance::TextOracle, challenge_index)
            .await
    }

    async fn solve_from_image(
        &self,
        screenshot: &[u8],
        tried: &HashSet<String>,
        challenge_index: u32,
    ) -> Option<Candidate> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(screenshot);
        let text = format!(
            "Challenge {}. Find the code shown in this screenshot.{}",
            challenge_index,
            tried_clause(tried)
        );
        let content = json!([
            { "type": "text", "text": text },
            {
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", encoded) }
            },
        ]);
        self.ask(content, tried, Provenance::VisionOracle, challenge_index)
            .await
    }

    fn usage(&self) -> OracleUsage {
        match self.usage.lock() {
            Ok(usage) => usage.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Parse model output as JSON, falling back to the first embedded object.
pub fn parse_reply(content: &str) -> Result<OracleReply, OracleError> {
    if let Ok(reply) = serde_json::from_str::<OracleReply>(content.trim()) {
        return Ok(reply);
    }
    JSON_OBJECT
        .find_iter(content)
        .find_map(|m| serde_json::from_str::<OracleReply>(m.as_str()).ok())
        .ok_or_else(|| OracleError::Unparseable(truncate(content, 120).to_string()))
}

/// Turn a reply into a candidate, dropping empty and already-tried answers.
pub fn reply_to_candidate(
    reply: OracleReply,
    tried: &HashSet<String>,
    provenance: Provenance,
) -> Option<Candidate> {
    let answer = reply.answer?.trim().to_string();
    if answer.is_empty() || tried.contains(&answer) {
        return None;
    }
    let mut candidate = Candidate::new(answer, reply.confidence.unwrap_or(0.5), provenance);
    if let Some(hint) = reply.input_selector.filter(|s| !s.trim().is_empty()) {
        candidate = candidate.with_input_hint(hint);
    }
    if let Some(hint) = reply.submit_selector.filter(|s| !s.trim().is_empty()) {
        candidate = candidate.with_button_hint(hint);
    }
    Some(candidate)
}

pub fn estimate_cost(config: &OracleConfig, input_tokens: u64, output_tokens: u64) -> f64 {
    input_tokens as f64 / 1000.0 * config.input_cost_per_1k
        + output_tokens as f64 / 1000.0 * config.output_cost_per_1k
}

fn tried_clause(tried: &HashSet<String>) -> String {
    if tried.is_empty() {
        return String::new();
    }
    let mut answers: Vec<&str> = tried.iter().map(String::as_str).collect();
    answers.sort_unstable();
    format!(
        "\n\nAlready tried (wrong, do not repeat): {}",
        answers.join(", ")
    )
}

/// Cut `s` to at most `max` bytes on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
