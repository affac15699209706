//! Allocation drift decision logic
//!
//! `decide` is pure: identical inputs (including `now`) always produce the
//! same intent. Rules are evaluated top to bottom and the first match wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::{clamp, round_dp};
use crate::clock::elapsed_ms;
use crate::config::StrategyConfig;
use crate::risk::Protocol;

/// Relative imbalance the aux pair must exceed before it is rebalanced
const AUX_DRIFT_TRIGGER: f64 = 0.25;

/// Minimum aux-one balance (in UI units) worth swapping
const AUX_MIN_BALANCE: f64 = 1.0;

/// Balances and counters the decision is taken from. Rebuilt every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub base_balance: f64,
    pub quote_balance: f64,
    pub base_price_in_quote: f64,
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Fraction of executed swaps that succeeded, 1.0 with no history
    pub trade_success_rate: f64,
    pub daily_trade_count: u32,
    pub consecutive_failures: u32,
    pub estimated_slippage_bps: u32,
    pub min_base_reserve: f64,
    #[serde(default)]
    pub aux_balances: Option<AuxBalances>,
}

impl PortfolioSnapshot {
    pub fn base_value(&self) -> f64 {
        self.base_balance * self.base_price_in_quote.max(0.0)
    }

    pub fn total_value(&self) -> f64 {
        self.quote_balance + self.base_value()
    }

    /// Share of total value held in base, 0 for an empty portfolio
    pub fn allocation_ratio(&self) -> f64 {
        let total = self.total_value();
        if total <= 0.0 {
            return 0.0;
        }
        self.base_value() / total
    }
}

/// Secondary token pair balances
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuxBalances {
    pub one: f64,
    pub two: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentAction {
    Swap,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapDirection {
    BaseToQuote,
    QuoteToBase,
    AuxPair,
}

impl SwapDirection {
    pub fn protocol(&self) -> Protocol {
        match self {
            SwapDirection::BaseToQuote | SwapDirection::QuoteToBase => Protocol::Swap,
            SwapDirection::AuxPair => Protocol::AuxSwap,
        }
    }
}

impl std::fmt::Display for SwapDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapDirection::BaseToQuote => write!(f, "BASE_TO_QUOTE"),
            SwapDirection::QuoteToBase => write!(f, "QUOTE_TO_BASE"),
            SwapDirection::AuxPair => write!(f, "AUX_PAIR"),
        }
    }
}

/// Output of one decision. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub action: IntentAction,
    pub direction: Option<SwapDirection>,
    /// Fraction of the source balance to move; 0 on HOLD
    pub amount_pct: f64,
    pub confidence: f64,
    pub reason: String,
}

impl TradeIntent {
    pub fn hold(confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            action: IntentAction::Hold,
            direction: None,
            amount_pct: 0.0,
            confidence,
            reason: reason.into(),
        }
    }

    /// Direction of a SWAP intent, `None` on HOLD
    pub fn swap_direction(&self) -> Option<SwapDirection> {
        match self.action {
            IntentAction::Swap => self.direction,
            IntentAction::Hold => None,
        }
    }

    pub fn is_hold(&self) -> bool {
        self.swap_direction().is_none()
    }
}

/// Strategy knobs consumed by `decide`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionParams {
    pub target_ratio: f64,
    pub drift_threshold: f64,
    pub cooldown_ms: u64,
    pub max_daily_trades: u32,
    pub max_swap_pct: f64,
}

impl From<&StrategyConfig> for DecisionParams {
    fn from(strategy: &StrategyConfig) -> Self {
        Self {
            target_ratio: strategy.target_ratio,
            drift_threshold: strategy.drift_threshold,
            cooldown_ms: strategy.cooldown_ms,
            max_daily_trades: strategy.max_daily_swaps,
            max_swap_pct: strategy.max_swap_pct,
        }
    }
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

/// Map a portfolio snapshot to a trade intent.
pub fn decide(snapshot: &PortfolioSnapshot, params: &DecisionParams, now: DateTime<Utc>) -> TradeIntent {
    if snapshot.total_value() <= 0.0 {
        return TradeIntent::hold(5.0, "No portfolio value available for allocation analysis.");
    }

    if let Some(last_trade_at) = snapshot.last_trade_at {
        if elapsed_ms(last_trade_at, now) < params.cooldown_ms as i64 {
            return TradeIntent::hold(15.0, "Cooldown window active.");
        }
    }

    if snapshot.daily_trade_count >= params.max_daily_trades {
        return TradeIntent::hold(12.0, "Daily swap count limit reached.");
    }

    let drift = snapshot.allocation_ratio() - params.target_ratio;
    let abs_drift = drift.abs();

    if abs_drift < params.drift_threshold {
        if let Some(intent) = decide_aux_pair(snapshot, params) {
            return intent;
        }
        return TradeIntent::hold(35.0, "Portfolio allocation is within target drift threshold.");
    }

    let direction = if drift > 0.0 {
        SwapDirection::BaseToQuote
    } else {
        SwapDirection::QuoteToBase
    };
    let amount_pct = clamp(abs_drift * 1.4, 0.05, params.max_swap_pct);

    let mut confidence = 50.0;
    confidence += clamp(abs_drift * 120.0, 0.0, 25.0);
    confidence += clamp(snapshot.trade_success_rate * 25.0, 0.0, 20.0);
    if snapshot.estimated_slippage_bps <= 50 {
        confidence += 8.0;
    }
    if snapshot.estimated_slippage_bps >= 150 {
        confidence -= 12.0;
    }
    confidence -= clamp(snapshot.consecutive_failures as f64 * 8.0, 0.0, 24.0);
    if snapshot.base_balance < snapshot.min_base_reserve * 2.0 {
        confidence -= 10.0;
    }
    let confidence = clamp(confidence, 1.0, 99.0);

    TradeIntent {
        action: IntentAction::Swap,
        direction: Some(direction),
        amount_pct: round_dp(amount_pct, 4),
        confidence: round_dp(confidence, 2),
        reason: format!(
            "Allocation drift {:.3} exceeded threshold {}.",
            abs_drift, params.drift_threshold
        ),
    }
}

fn decide_aux_pair(snapshot: &PortfolioSnapshot, params: &DecisionParams) -> Option<TradeIntent> {
    let aux = snapshot.aux_balances?;
    let one = aux.one.max(0.0);
    let two = aux.two.max(0.0);
    let total = one + two;
    if total <= 0.0 {
        return None;
    }

    let aux_drift = ((one - two) / total).abs();
    if aux_drift <= AUX_DRIFT_TRIGGER || one <= AUX_MIN_BALANCE {
        return None;
    }

    let amount_pct = clamp(aux_drift * 0.75, 0.05, params.max_swap_pct);
    let confidence = clamp(
        48.0 + aux_drift * 30.0 - snapshot.consecutive_failures as f64 * 6.0,
        1.0,
        95.0,
    );

    Some(TradeIntent {
        action: IntentAction::Swap,
        direction: Some(SwapDirection::AuxPair),
        amount_pct: round_dp(amount_pct, 4),
        confidence: round_dp(confidence, 2),
        reason: "Aux pair allocation drift exceeded threshold.".to_string(),
    })
}

/// Operator-facing side of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Buy,
    Sell,
    Hold,
}

/// Mints the runner trades between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMints {
    pub base: String,
    pub quote: String,
    pub aux: Option<(String, String)>,
}

impl AssetMints {
    /// (input, output) mints for a direction; `None` for an unconfigured aux pair
    pub fn route(&self, direction: SwapDirection) -> Option<(&str, &str)> {
        match direction {
            SwapDirection::BaseToQuote => Some((&self.base, &self.quote)),
            SwapDirection::QuoteToBase => Some((&self.quote, &self.base)),
            SwapDirection::AuxPair => self
                .aux
                .as_ref()
                .map(|(one, two)| (one.as_str(), two.as_str())),
        }
    }
}

/// Decision record kept in the runner status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecision {
    pub action: DecisionAction,
    pub protocol: Protocol,
    pub input_mint: Option<String>,
    pub output_mint: Option<String>,
    pub amount_base: f64,
    pub slippage_bps: u32,
    pub confidence: f64,
    pub reason: String,
}

impl AgentDecision {
    pub fn from_intent(
        intent: &TradeIntent,
        amount_base: f64,
        slippage_bps: u32,
        mints: &AssetMints,
    ) -> Self {
        let Some(direction) = intent.swap_direction() else {
            return Self {
                action: DecisionAction::Hold,
                protocol: Protocol::Hold,
                input_mint: None,
                output_mint: None,
                amount_base: 0.0,
                slippage_bps,
                confidence: intent.confidence,
                reason: intent.reason.clone(),
            };
        };

        let action = match direction {
            SwapDirection::BaseToQuote | SwapDirection::AuxPair => DecisionAction::Sell,
            SwapDirection::QuoteToBase => DecisionAction::Buy,
        };
        let (input_mint, output_mint) = match mints.route(direction) {
            Some((input, output)) => (Some(input.to_string()), Some(output.to_string())),
            None => (None, None),
        };

        Self {
            action,
            protocol: direction.protocol(),
            input_mint,
            output_mint,
            amount_base,
            slippage_bps,
            confidence: intent.confidence,
            reason: intent.reason.clone(),
        }
    }
}
