use std::path::PathBuf;

use anyhow::Result;
use challenge_agent::config::{AgentConfig, CliOverrides};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Solve a sequence of browser challenges inside one hard deadline.
#[derive(Debug, Parser)]
#[command(name = "challenge-agent", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total time budget in seconds.
    #[arg(long)]
    timeout: Option<f64>,

    /// Number of challenges.
    #[arg(long)]
    total: Option<u32>,

    /// Entry address, or a template containing `{n}`.
    #[arg(long)]
    target: Option<String>,

    /// Disable the vision fallback.
    #[arg(long)]
    no_vision: bool,

    /// Scripted site to run against.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Report file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long, short, conflicts_with = "verbose")]
    quiet: bool,

    /// Log solver internals.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            timeout_secs: self.timeout,
            total_items: self.total,
            target: self.target.clone(),
            no_vision: self.no_vision,
            scenario: self.scenario.clone(),
            report_path: self.output.clone(),
        }
    }

    fn default_filter(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.default_filter().into()),
        )
        .init();

    let mut config = AgentConfig::load(cli.config.as_deref())?;
    config.apply_env()?;
    config.apply_cli(&cli.overrides());
    config.validate()?;

    info!(
        total = config.run.total_items,
        timeout_secs = config.run.timeout_secs,
        vision = config.solver.vision_enabled,
        "Challenge agent starting"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current challenge");
            on_signal.cancel();
        }
    });

    let oracle = challenge_agent::build_oracle(&config)?;
    let run = challenge_agent::execute(&config, oracle.as_ref(), cancel).await?;

    std::process::exit(run.exit_code());
}
