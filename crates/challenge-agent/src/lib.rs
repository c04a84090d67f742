//! Challenge agent: wires the coordination core to its adapters.
//!
//! - [`config`]: layered configuration (defaults, TOML, env, CLI)
//! - [`oracle`]: OpenAI-compatible text and vision oracle
//! - [`scenario`]: scripted site for dry runs
//! - [`telemetry`]: JSON run report and summary logging

pub mod config;
pub mod oracle;
pub mod scenario;
pub mod telemetry;

use anyhow::{Context, Result};
use coordination::{BudgetOrchestrator, MetricsSink, NullOracle, OracleCapability, Run};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::oracle::HttpOracle;
use crate::scenario::{Scenario, ScenarioBrowser};
use crate::telemetry::JsonReportSink;

/// Pick the oracle: HTTP when an API key is configured, otherwise none.
pub fn build_oracle(config: &AgentConfig) -> Result<Box<dyn OracleCapability>> {
    match HttpOracle::from_env(&config.oracle) {
        Some(oracle) => {
            let oracle = oracle.context("failed to build oracle client")?;
            info!(model = %config.oracle.model, "Oracle enabled");
            Ok(Box::new(oracle))
        }
        None => {
            info!(
                env = %config.oracle.api_key_env,
                "No oracle API key, running heuristics only"
            );
            Ok(Box::new(NullOracle))
        }
    }
}

/// Run every challenge once and write the report.
///
/// The report is written even when the run aborts; a failure to write it
/// is logged and does not hide the run result.
pub async fn execute(
    config: &AgentConfig,
    oracle: &dyn OracleCapability,
    cancel: CancellationToken,
) -> Result<Run> {
    let scenario_path = config
        .run
        .scenario
        .as_deref()
        .context("no browser backend configured: pass --scenario <file>")?;
    let scenario = Scenario::from_path(scenario_path)?;
    info!(
        path = %scenario_path.display(),
        challenges = scenario.challenges.len(),
        "Loaded scenario"
    );

    let mut core = config.orchestrator_config();
    if core.discovery.entry_address.is_empty() {
        core.discovery.entry_address = scenario.entry_address();
    }
    let browser = ScenarioBrowser::new(scenario);

    let orchestrator = BudgetOrchestrator::new(&browser, oracle, &core)
        .context("invalid solver configuration")?
        .with_cancellation(cancel);
    let run = orchestrator
        .run(config.run.total_items, config.global_timeout())
        .await;

    telemetry::log_summary(&run);
    let sink = JsonReportSink::new(&config.run.report_path);
    if let Err(e) = sink.record(&run) {
        warn!("Failed to write run report: {e:#}");
    }
    Ok(run)
}
