use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use coordination::{
    BudgetConfig, ClassifierConfig, DiscoveryConfig, ExtractorConfig, OrchestratorConfig,
    SolverConfig,
};
use serde::{Deserialize, Serialize};

/// Run-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Number of challenges in the sequence.
    pub total_items: u32,
    /// Hard deadline for the whole run.
    pub timeout_secs: f64,
    /// Entry address, or a template containing `{n}`.
    pub target: Option<String>,
    /// Where the JSON report is written.
    pub report_path: PathBuf,
    /// Scripted site to run against instead of a live browser.
    pub scenario: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            total_items: 30,
            timeout_secs: 300.0,
            target: None,
            report_path: PathBuf::from("run_stats.json"),
            scenario: None,
        }
    }
}

/// OpenAI-compatible oracle endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// USD per 1K prompt tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1K completion tokens.
    pub output_cost_per_1k: f64,
    /// Page text beyond this many characters is cut from prompts.
    pub max_page_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            max_tokens: 500,
            request_timeout_secs: 30,
            input_cost_per_1k: 0.005,
            output_cost_per_1k: 0.015,
            max_page_chars: 8000,
        }
    }
}

impl OracleConfig {
    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Complete agent configuration, one TOML table per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub run: RunSection,
    pub budget: BudgetConfig,
    pub solver: SolverConfig,
    pub extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
    pub discovery: DiscoveryConfig,
    pub oracle: OracleConfig,
}

/// Values given on the command line. `None` leaves the config untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub timeout_secs: Option<f64>,
    pub total_items: Option<u32>,
    pub target: Option<String>,
    pub no_vision: bool,
    pub scenario: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl AgentConfig {
    /// Defaults, overlaid with the TOML file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `CHALLENGE_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `CHALLENGE_*` variables using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CHALLENGE_TOTAL") {
            self.run.total_items = v
                .parse()
                .with_context(|| format!("CHALLENGE_TOTAL: not a count: {v}"))?;
        }
        if let Some(v) = lookup("CHALLENGE_TIMEOUT_SECS") {
            self.run.timeout_secs = v
                .parse()
                .with_context(|| format!("CHALLENGE_TIMEOUT_SECS: not a number: {v}"))?;
        }
        if let Some(v) = lookup("CHALLENGE_TARGET") {
            self.run.target = Some(v);
        }
        if let Some(v) = lookup("CHALLENGE_REPORT") {
            self.run.report_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHALLENGE_NO_VISION") {
            self.solver.vision_enabled = !parse_flag(&v)
                .with_context(|| format!("CHALLENGE_NO_VISION: not a boolean: {v}"))?;
        }
        if let Some(v) = lookup("CHALLENGE_ORACLE_URL") {
            self.oracle.base_url = v;
        }
        if let Some(v) = lookup("CHALLENGE_ORACLE_MODEL") {
            self.oracle.model = v;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(t) = cli.timeout_secs {
            self.run.timeout_secs = t;
        }
        if let Some(n) = cli.total_items {
            self.run.total_items = n;
        }
        if let Some(target) = &cli.target {
            self.run.target = Some(target.clone());
        }
        if cli.no_vision {
            self.solver.vision_enabled = false;
        }
        if let Some(scenario) = &cli.scenario {
            self.run.scenario = Some(scenario.clone());
        }
        if let Some(path) = &cli.report_path {
            self.run.report_path = path.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.total_items == 0 {
            bail!("run.total_items must be at least 1");
        }
        coordination::seconds("run.timeout_secs", self.run.timeout_secs)?;
        self.orchestrator_config()
            .validate()
            .context("invalid solver configuration")?;
        Ok(())
    }

    /// Saturates on values [`validate`](Self::validate) would reject.
    pub fn global_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.run.timeout_secs).unwrap_or(Duration::MAX)
    }

    /// Core configuration with the run target folded into discovery.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut discovery = self.discovery.clone();
        if let Some(target) = &self.run.target {
            discovery.entry_address = target.clone();
        }
        OrchestratorConfig {
            budget: self.budget.clone(),
            solver: self.solver.clone(),
            extractor: self.extractor.clone(),
            classifier: self.classifier.clone(),
            discovery,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.global_timeout(), Duration::from_secs(300));
        assert_eq!(config.run.report_path, PathBuf::from("run_stats.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config = AgentConfig::from_toml(
            r#"
            [run]
            total_items = 5
            timeout_secs = 60

            [budget]
            floor_secs = 4.0

            [solver]
            rotation = ["text_extraction", "vision_assisted"]

            [classifier]
            success_keywords = ["nice"]
            "#,
        )
        .unwrap();
        assert_eq!(config.run.total_items, 5);
        assert_eq!(config.budget.floor_secs, 4.0);
        assert_eq!(config.budget.ceiling_secs, 15.0);
        assert_eq!(config.solver.rotation.max_attempts(), 2);
        assert_eq!(config.classifier.success_keywords, vec!["nice"]);
        assert_eq!(config.oracle.model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_types_rejected() {
        assert!(AgentConfig::from_toml("[run]\ntotal_items = \"many\"").is_err());
    }

    #[test]
    fn test_precedence_env_then_cli() {
        let mut config = AgentConfig::from_toml("[run]\ntotal_items = 5\ntimeout_secs = 60").unwrap();
        let env: HashMap<&str, &str> = [
            ("CHALLENGE_TOTAL", "10"),
            ("CHALLENGE_TIMEOUT_SECS", "90"),
            ("CHALLENGE_NO_VISION", "true"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.run.total_items, 10);
        assert_eq!(config.run.timeout_secs, 90.0);
        assert!(!config.solver.vision_enabled);

        config.apply_cli(&CliOverrides {
            total_items: Some(3),
            target: Some("https://x.test/challenge/{n}".into()),
            ..CliOverrides::default()
        });
        assert_eq!(config.run.total_items, 3);
        assert_eq!(config.run.timeout_secs, 90.0);
        assert_eq!(
            config.orchestrator_config().discovery.entry_address,
            "https://x.test/challenge/{n}"
        );
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = AgentConfig::default();
        let err = config
            .apply_env_from(|k| (k == "CHALLENGE_TOTAL").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHALLENGE_TOTAL"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AgentConfig::default();
        config.run.total_items = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.budget.ceiling_secs = 1.0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.classifier.step_pattern = "(".into();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.apply_cli(&CliOverrides {
            timeout_secs: Some(1e30),
            ..CliOverrides::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("run.timeout_secs"));
        assert_eq!(config.global_timeout(), Duration::MAX);

        let mut config = AgentConfig::default();
        config.run.timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.budget.ceiling_secs = 1e30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[oracle]\nmodel = \"gpt-4o-mini\"\n").unwrap();
        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.oracle.model, "gpt-4o-mini");

        assert!(AgentConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
