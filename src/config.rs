//! Runner Configuration
//!
//! Every field carries a serde default so an empty file (or no file at all)
//! yields a working paper-trading setup. Values are layered: optional YAML
//! file first, then `REBALANCE__<SECTION>__<FIELD>` environment variables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::amount::{BASE_MINT, MAX_TOKEN_DECIMALS, QUOTE_MINT};
use crate::risk::{Protocol, RiskSettings};

/// Default config file looked up when `REBALANCE_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "rebalance.yaml";

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "REBALANCE_CONFIG";

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "REBALANCE";

/// Top-level runner configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: RuntimeConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

impl AgentConfig {
    /// Load from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("risk.allowed_protocols")
                    .with_list_parse_key("topology.operational_wallets")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", file.display(), e))?;

        let config: AgentConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", file.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.risk
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid risk settings: {}", e))?;

        let s = &self.strategy;
        if !(0.0..=1.0).contains(&s.target_ratio) {
            return Err(anyhow::anyhow!(
                "strategy.target_ratio must be within [0, 1], got {}",
                s.target_ratio
            ));
        }
        if !(s.drift_threshold > 0.0 && s.drift_threshold < 1.0) {
            return Err(anyhow::anyhow!(
                "strategy.drift_threshold must be within (0, 1), got {}",
                s.drift_threshold
            ));
        }
        if !(s.max_swap_pct >= 0.05 && s.max_swap_pct <= 1.0) {
            return Err(anyhow::anyhow!(
                "strategy.max_swap_pct must be within [0.05, 1], got {}",
                s.max_swap_pct
            ));
        }
        if self.agent.loop_interval_ms == 0 {
            return Err(anyhow::anyhow!("agent.loop_interval_ms must be positive"));
        }
        let a = &self.agent;
        let decimals = [
            ("agent.base_decimals", Some(a.base_decimals)),
            ("agent.quote_decimals", Some(a.quote_decimals)),
            ("agent.aux_pair.decimals", a.aux_pair.as_ref().map(|aux| aux.decimals)),
        ];
        for (field, value) in decimals {
            if let Some(value) = value.filter(|d| *d > MAX_TOKEN_DECIMALS) {
                return Err(anyhow::anyhow!(
                    "{} must be at most {}, got {}",
                    field,
                    MAX_TOKEN_DECIMALS,
                    value
                ));
            }
        }
        if self.topology.operational_wallets.is_empty() {
            return Err(anyhow::anyhow!(
                "topology.operational_wallets must list at least one wallet"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Scheduler and execution plumbing
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    /// Periodic cycle interval
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    /// Upper bound on a single execution round-trip
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Where `state/now.json` is written; disabled when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_base_mint")]
    pub base_mint: String,
    #[serde(default = "default_quote_mint")]
    pub quote_mint: String,
    #[serde(default = "default_base_decimals")]
    pub base_decimals: u8,
    #[serde(default = "default_quote_decimals")]
    pub quote_decimals: u8,
    /// Price used when the quote lookup fails
    #[serde(default = "default_fallback_base_price")]
    pub fallback_base_price: f64,
    /// Secondary token pair considered when the main allocation is balanced
    #[serde(default)]
    pub aux_pair: Option<AuxPairConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::default(),
            loop_interval_ms: default_loop_interval_ms(),
            execution_timeout_ms: default_execution_timeout_ms(),
            state_dir: None,
            log_level: default_log_level(),
            base_mint: default_base_mint(),
            quote_mint: default_quote_mint(),
            base_decimals: default_base_decimals(),
            quote_decimals: default_quote_decimals(),
            fallback_base_price: default_fallback_base_price(),
            aux_pair: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AuxPairConfig {
    pub one_mint: String,
    pub two_mint: String,
    #[serde(default = "default_quote_decimals")]
    pub decimals: u8,
}

/// Allocation strategy parameters
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct StrategyConfig {
    /// Target share of portfolio value held in the base asset
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_max_swap_pct")]
    pub max_swap_pct: f64,
    /// Base balance that must remain after any swap
    #[serde(default = "default_min_base_reserve")]
    pub min_base_reserve: f64,
    #[serde(default = "default_max_daily_swaps")]
    pub max_daily_swaps: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            target_ratio: default_target_ratio(),
            drift_threshold: default_drift_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_swap_pct: default_max_swap_pct(),
            min_base_reserve: default_min_base_reserve(),
            max_daily_swaps: default_max_daily_swaps(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct GovernorConfig {
    #[serde(default = "default_risk_score_threshold")]
    pub risk_score_threshold: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            risk_score_threshold: default_risk_score_threshold(),
        }
    }
}

/// Reward token economy parameters
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct EconomyConfig {
    #[serde(default = "default_activity_mint_threshold")]
    pub activity_mint_threshold: u32,
    #[serde(default = "default_reward_mint_amount")]
    pub reward_mint_amount: Decimal,
    #[serde(default = "default_redistribution_threshold")]
    pub redistribution_threshold: Decimal,
    /// Share of trade notional sent to the treasury after a profitable swap
    #[serde(default = "default_reward_pct")]
    pub reward_pct: Decimal,
    #[serde(default = "default_loss_warning_streak")]
    pub loss_warning_streak: u32,
    /// Supply minted to the treasury when the economy is first created.
    /// 20% of it is split across operational wallets.
    #[serde(default = "default_initial_supply")]
    pub initial_supply: Decimal,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            activity_mint_threshold: default_activity_mint_threshold(),
            reward_mint_amount: default_reward_mint_amount(),
            redistribution_threshold: default_redistribution_threshold(),
            reward_pct: default_reward_pct(),
            loss_warning_streak: default_loss_warning_streak(),
            initial_supply: default_initial_supply(),
        }
    }
}

/// Wallet roles. Keys live with the wallet service; these are identifiers only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TopologyConfig {
    #[serde(default = "default_treasury_wallet")]
    pub treasury_wallet: String,
    #[serde(default = "default_trader_wallet")]
    pub trader_wallet: String,
    /// Wallets that must all be active before treasury redistribution.
    /// Includes the trader wallet.
    #[serde(default = "default_operational_wallets")]
    pub operational_wallets: Vec<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            treasury_wallet: default_treasury_wallet(),
            trader_wallet: default_trader_wallet(),
            operational_wallets: default_operational_wallets(),
        }
    }
}

/// Endpoints for live mode collaborators
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServicesConfig {
    #[serde(default = "default_execution_url")]
    pub execution_url: String,
    #[serde(default = "default_wallet_url")]
    pub wallet_url: String,
    #[serde(default = "default_token_ledger_url")]
    pub token_ledger_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Starting balances for the paper exchange
    #[serde(default = "default_paper_base_balance")]
    pub paper_base_balance: Decimal,
    #[serde(default = "default_paper_quote_balance")]
    pub paper_quote_balance: Decimal,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            execution_url: default_execution_url(),
            wallet_url: default_wallet_url(),
            token_ledger_url: default_token_ledger_url(),
            http_timeout_secs: default_http_timeout_secs(),
            paper_base_balance: default_paper_base_balance(),
            paper_quote_balance: default_paper_quote_balance(),
        }
    }
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_trade_size_base: default_max_trade_size_base(),
            max_slippage_bps: default_max_slippage_bps(),
            min_interval_ms: default_min_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            allowed_protocols: default_allowed_protocols(),
        }
    }
}

fn default_loop_interval_ms() -> u64 { 30_000 }
fn default_execution_timeout_ms() -> u64 { 60_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_base_mint() -> String { BASE_MINT.to_string() }
fn default_quote_mint() -> String { QUOTE_MINT.to_string() }
fn default_base_decimals() -> u8 { 9 }
fn default_quote_decimals() -> u8 { 6 }
fn default_fallback_base_price() -> f64 { 100.0 }

fn default_target_ratio() -> f64 { 0.55 }
fn default_drift_threshold() -> f64 { 0.08 }
fn default_cooldown_ms() -> u64 { 5 * 60 * 1000 }
fn default_max_swap_pct() -> f64 { 0.25 }
fn default_min_base_reserve() -> f64 { 0.05 }
fn default_max_daily_swaps() -> u32 { 20 }

fn default_risk_score_threshold() -> f64 { 70.0 }

pub(crate) fn default_max_trade_size_base() -> f64 { 0.5 }
pub(crate) fn default_max_slippage_bps() -> u32 { 100 }
pub(crate) fn default_min_interval_ms() -> u64 { 10_000 }
pub(crate) fn default_max_consecutive_failures() -> u32 { 3 }
pub(crate) fn default_allowed_protocols() -> BTreeSet<Protocol> {
    [Protocol::Hold, Protocol::Swap, Protocol::AuxSwap, Protocol::Transfer]
        .into_iter()
        .collect()
}

fn default_activity_mint_threshold() -> u32 { 5 }
fn default_reward_mint_amount() -> Decimal { Decimal::from(5_000) }
fn default_redistribution_threshold() -> Decimal { Decimal::from(50_000) }
fn default_reward_pct() -> Decimal { Decimal::new(7, 2) }
fn default_loss_warning_streak() -> u32 { 3 }
fn default_initial_supply() -> Decimal { Decimal::from(1_000_000) }

fn default_treasury_wallet() -> String { "treasury".to_string() }
fn default_trader_wallet() -> String { "trader".to_string() }
fn default_operational_wallets() -> Vec<String> {
    vec![
        "trader".to_string(),
        "liquidity".to_string(),
        "arbitrage".to_string(),
    ]
}

fn default_execution_url() -> String { "http://localhost:8090".to_string() }
fn default_wallet_url() -> String { "http://localhost:8091".to_string() }
fn default_token_ledger_url() -> String { "http://localhost:8092".to_string() }
fn default_http_timeout_secs() -> u64 { 30 }
// 2/3 base at the fallback price: one drift-sized swap fits max_trade_size_base
fn default_paper_base_balance() -> Decimal { Decimal::from(3) }
fn default_paper_quote_balance() -> Decimal { Decimal::from(150) }
