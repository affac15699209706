//! Trade governor - per-request pre-flight approval
//!
//! Scores a proposed swap against a computed risk score and hard caps. Runs
//! before the risk ledger's global gate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::{clamp, round_dp};
use crate::config::{GovernorConfig, StrategyConfig};

/// Caps the governor checks against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorLimits {
    pub risk_score_threshold: f64,
    pub max_swap_pct: f64,
    pub max_daily_swaps: u32,
    pub min_base_reserve: f64,
}

impl GovernorLimits {
    pub fn from_config(governor: &GovernorConfig, strategy: &StrategyConfig) -> Self {
        Self {
            risk_score_threshold: governor.risk_score_threshold,
            max_swap_pct: strategy.max_swap_pct,
            max_daily_swaps: strategy.max_daily_swaps,
            min_base_reserve: strategy.min_base_reserve,
        }
    }
}

/// Swap under review
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorRequest {
    pub base_balance: f64,
    pub requested_amount_base: f64,
    pub requested_pct: f64,
    pub slippage_bps: u32,
    pub max_allowed_slippage_bps: u32,
    pub daily_swap_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl GovernorVerdict {
    fn reject(reason: String) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

pub struct TradeGovernor {
    limits: GovernorLimits,
}

impl TradeGovernor {
    pub fn new(limits: GovernorLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &GovernorLimits {
        &self.limits
    }

    /// First violated cap wins; the reason names the cap and its value.
    pub fn evaluate(&self, request: &GovernorRequest, risk_score: f64) -> GovernorVerdict {
        let limits = &self.limits;

        if risk_score > limits.risk_score_threshold {
            return GovernorVerdict::reject(format!(
                "Risk score {:.2} exceeds threshold {}.",
                risk_score, limits.risk_score_threshold
            ));
        }

        if request.slippage_bps > request.max_allowed_slippage_bps {
            return GovernorVerdict::reject(format!(
                "Slippage {} bps exceeds allowed threshold {} bps.",
                request.slippage_bps, request.max_allowed_slippage_bps
            ));
        }

        if request.requested_pct > limits.max_swap_pct {
            return GovernorVerdict::reject(format!(
                "Requested swap percentage {:.4} exceeds cap {}.",
                request.requested_pct, limits.max_swap_pct
            ));
        }

        if request.daily_swap_count >= limits.max_daily_swaps {
            return GovernorVerdict::reject(format!(
                "Daily swap limit reached ({} of {}).",
                request.daily_swap_count, limits.max_daily_swaps
            ));
        }

        if request.base_balance - request.requested_amount_base < limits.min_base_reserve {
            return GovernorVerdict::reject(format!(
                "Swap would violate min base reserve ({}).",
                limits.min_base_reserve
            ));
        }

        GovernorVerdict {
            allowed: true,
            reason: "Governor approved swap.".to_string(),
        }
    }
}

/// Inputs to the heuristic risk score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskScoreInputs {
    pub intent_confidence: f64,
    pub consecutive_swap_failures: u32,
    pub max_slippage_bps: u32,
    pub base_balance: f64,
    pub min_base_reserve: f64,
    pub success_rate: f64,
}

/// Heuristic 0-100ish score; higher is riskier. An intent with no
/// confidence at all is scored as maximally risky.
pub fn risk_score(inputs: &RiskScoreInputs) -> f64 {
    if inputs.intent_confidence < 1.0 {
        return 100.0;
    }

    let mut score = inputs.consecutive_swap_failures as f64 * 18.0;
    score += inputs.max_slippage_bps as f64 / 5.0;
    if inputs.base_balance < inputs.min_base_reserve {
        score += 25.0;
    }
    score += (1.0 - inputs.success_rate) * 20.0;
    round_dp(score, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        let score = clamp(score, 0.0, 100.0);
        if score >= 65.0 {
            RiskLevel::High
        } else if score >= 35.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> TradeGovernor {
        TradeGovernor::new(GovernorLimits::from_config(
            &GovernorConfig::default(),
            &StrategyConfig::default(),
        ))
    }

    fn request() -> GovernorRequest {
        GovernorRequest {
            base_balance: 10.0,
            requested_amount_base: 0.5,
            requested_pct: 0.05,
            slippage_bps: 100,
            max_allowed_slippage_bps: 100,
            daily_swap_count: 0,
        }
    }

    #[test]
    fn test_approves_within_limits() {
        let verdict = governor().evaluate(&request(), 20.0);
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, "Governor approved swap.");
    }

    #[test]
    fn test_risk_score_rejected_first() {
        // Every other cap is violated too
        let bad = GovernorRequest {
            base_balance: 0.0,
            requested_amount_base: 5.0,
            requested_pct: 0.9,
            slippage_bps: 500,
            max_allowed_slippage_bps: 100,
            daily_swap_count: 99,
        };
        let verdict = governor().evaluate(&bad, 70.01);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, "Risk score 70.01 exceeds threshold 70.");

        // Exactly at threshold is allowed through to the next check
        let verdict = governor().evaluate(&bad, 70.0);
        assert!(verdict.reason.starts_with("Slippage 500 bps"));
    }

    #[test]
    fn test_each_cap_names_its_threshold() {
        let g = governor();

        let verdict = g.evaluate(
            &GovernorRequest {
                requested_pct: 0.3,
                ..request()
            },
            0.0,
        );
        assert_eq!(
            verdict.reason,
            "Requested swap percentage 0.3000 exceeds cap 0.25."
        );

        let verdict = g.evaluate(
            &GovernorRequest {
                daily_swap_count: 20,
                ..request()
            },
            0.0,
        );
        assert_eq!(verdict.reason, "Daily swap limit reached (20 of 20).");

        let verdict = g.evaluate(
            &GovernorRequest {
                base_balance: 0.54,
                requested_amount_base: 0.5,
                ..request()
            },
            0.0,
        );
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, "Swap would violate min base reserve (0.05).");
    }

    #[test]
    fn test_risk_score_formula() {
        let inputs = RiskScoreInputs {
            intent_confidence: 90.0,
            consecutive_swap_failures: 0,
            max_slippage_bps: 100,
            base_balance: 10.0,
            min_base_reserve: 0.05,
            success_rate: 1.0,
        };
        assert_eq!(risk_score(&inputs), 20.0);

        let stressed = RiskScoreInputs {
            consecutive_swap_failures: 2,
            base_balance: 0.01,
            success_rate: 0.5,
            ..inputs
        };
        // 36 + 20 + 25 + 10
        assert_eq!(risk_score(&stressed), 91.0);

        let unsure = RiskScoreInputs {
            intent_confidence: 0.5,
            ..inputs
        };
        assert_eq!(risk_score(&unsure), 100.0);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_score(20.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(35.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(65.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(250.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(-4.0), RiskLevel::Low);
    }
}
