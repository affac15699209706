//! Rebalance Runner - unattended portfolio rebalancing agent
//!
//! 1. Loads configuration (YAML file + environment overrides)
//! 2. Wires the paper exchange or the live HTTP services
//! 3. Runs decision cycles on a fixed interval until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use rebalance_runner::config::CONFIG_PATH_ENV;
use rebalance_runner::{
    AgentConfig, AgentRunner, HttpExecutionService, HttpTokenLedger, HttpWalletService,
    InMemoryTokenLedger, PaperExchange, RunnerDeps, StateManager, SystemClock, TracingSink,
    TradingMode,
};

/// Rebalance runner entry point
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = AgentConfig::load(config_path.as_deref())?;

    // Initialize logging
    let level = config
        .agent
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Rebalance Runner...");
    info!(
        "Trader wallet: {}, treasury: {}",
        config.topology.trader_wallet, config.topology.treasury_wallet
    );

    let state = init_state(&config).await;
    let deps = build_deps(&config, state)?;

    let runner = AgentRunner::new(config, deps)
        .map_err(|e| anyhow::anyhow!("Invalid risk settings: {}", e))?;
    runner.start(None);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let status = runner.pause();
    info!(
        "Stopped after {} cycles ({} failures, {} rejections)",
        status.cycles, status.failures, status.rejections
    );

    Ok(())
}

/// Wire collaborators for the configured trading mode
fn build_deps(config: &AgentConfig, state: Option<StateManager>) -> anyhow::Result<RunnerDeps> {
    let services = &config.services;

    let deps = match config.agent.trading_mode {
        TradingMode::Paper => {
            info!("📝 Running in PAPER TRADING mode");
            let exchange = Arc::new(PaperExchange::from_config(config)?);
            RunnerDeps {
                execution: exchange.clone(),
                wallet: exchange,
                token_ledger: Arc::new(InMemoryTokenLedger::new(config.economy.initial_supply)),
                sink: Arc::new(TracingSink),
                clock: Arc::new(SystemClock),
                state,
            }
        }
        TradingMode::Live => {
            warn!("💰 Running in LIVE TRADING mode - real funds at risk");
            RunnerDeps {
                execution: Arc::new(HttpExecutionService::new(
                    &services.execution_url,
                    services.http_timeout_secs,
                )?),
                wallet: Arc::new(HttpWalletService::new(
                    &services.wallet_url,
                    services.http_timeout_secs,
                )?),
                token_ledger: Arc::new(HttpTokenLedger::new(
                    &services.token_ledger_url,
                    services.http_timeout_secs,
                )?),
                sink: Arc::new(TracingSink),
                clock: Arc::new(SystemClock),
                state,
            }
        }
    };

    Ok(deps)
}

/// State files are optional; failure to set them up only disables them.
async fn init_state(config: &AgentConfig) -> Option<StateManager> {
    let dir = config
        .agent
        .state_dir
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".rebalance-runner")));

    let Some(dir) = dir else {
        warn!("No state directory available, status files disabled");
        return None;
    };

    let state = StateManager::new(&dir);
    match state.init().await {
        Ok(()) => {
            info!("Writing state files under {}", dir.display());
            Some(state)
        }
        Err(e) => {
            warn!("Failed to create state directory {}: {}", dir.display(), e);
            None
        }
    }
}
