use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ar_config::{HumanDuration, RelayConfig};
use ar_runtime::lifecycle::{Relay, wait_for_signal};
use ar_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "arelay", about = "AlertRelay alert processing service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Run {
        /// Path to relay.yaml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Enable runtime metrics and periodic snapshot output
        #[arg(long)]
        metrics: bool,
        /// Override metrics report interval (e.g. "2s", "30s", "1m")
        #[arg(long)]
        metrics_interval: Option<String>,
        /// Override metrics listen address for /metrics endpoint
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Parse and validate a config file, then exit
    Check {
        /// Path to relay.yaml config file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            metrics,
            metrics_interval,
            metrics_listen,
        } => {
            let config_path = config
                .canonicalize()
                .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
            let mut relay_config = RelayConfig::load(&config_path)?;
            if metrics || metrics_interval.is_some() || metrics_listen.is_some() {
                relay_config.metrics.enabled = true;
            }
            if let Some(interval) = metrics_interval {
                relay_config.metrics.report_interval = HumanDuration::from_str(&interval)
                    .map_err(|e| anyhow::anyhow!("invalid --metrics-interval '{interval}': {e}"))?;
            }
            if let Some(listen) = metrics_listen {
                relay_config.metrics.listen = listen;
            }
            let base_dir = config_path
                .parent()
                .expect("config path must have a parent directory");

            let _guard = init_tracing(&relay_config.logging, base_dir)?;

            let relay = Relay::start(relay_config)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(domain = "sys", listen = %relay.listen_addr(), "AlertRelay started");

            wait_for_signal(relay.cancel_token()).await;
            relay.shutdown();
            relay.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        Commands::Check { config } => {
            let relay_config = RelayConfig::load(&config)?;
            println!(
                "ok: {} receivers, {} inhibit rules, route depth {}",
                relay_config.receivers.len(),
                relay_config.inhibit_rules.len(),
                relay_config.route.depth(),
            );
        }
    }

    Ok(())
}
