//! Risk ledger - global admission gate and consecutive-failure circuit breaker
//!
//! Every execution attempt passes `assert_trade_allowed` immediately before it
//! is sent out, and reports back through `record_execution_success` or
//! `record_execution_failure`. Once the breaker opens it stays open until an
//! operator calls `reset_circuit_breaker`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{elapsed_ms, Clock};

/// Message returned for every admission check while the breaker is open
pub const CIRCUIT_OPEN_MESSAGE: &str = "Circuit breaker is open. Reset risk runtime to continue.";

/// Execution paths the runner can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Hold,
    /// Base/quote swap through the execution service
    Swap,
    /// Swap between the auxiliary token pair
    AuxSwap,
    Transfer,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Hold => write!(f, "hold"),
            Protocol::Swap => write!(f, "swap"),
            Protocol::AuxSwap => write!(f, "aux_swap"),
            Protocol::Transfer => write!(f, "transfer"),
        }
    }
}

/// Hard caps enforced on every execution
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RiskSettings {
    #[serde(default = "crate::config::default_max_trade_size_base")]
    pub max_trade_size_base: f64,
    #[serde(default = "crate::config::default_max_slippage_bps")]
    pub max_slippage_bps: u32,
    #[serde(default = "crate::config::default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "crate::config::default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "crate::config::default_allowed_protocols")]
    pub allowed_protocols: BTreeSet<Protocol>,
}

impl RiskSettings {
    /// Check the whole settings set, not just recently changed fields.
    pub fn validate(&self) -> Result<(), RiskConfigError> {
        if !self.max_trade_size_base.is_finite() || self.max_trade_size_base <= 0.0 {
            return Err(RiskConfigError::MaxTradeSize(self.max_trade_size_base));
        }
        if self.max_slippage_bps == 0 {
            return Err(RiskConfigError::MaxSlippage);
        }
        if self.min_interval_ms == 0 {
            return Err(RiskConfigError::MinInterval);
        }
        if self.max_consecutive_failures == 0 {
            return Err(RiskConfigError::MaxConsecutiveFailures);
        }
        if self.allowed_protocols.is_empty() {
            return Err(RiskConfigError::AllowedProtocols);
        }
        Ok(())
    }
}

/// Partial update for `RiskSettings`; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RiskSettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trade_size_base: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_protocols: Option<BTreeSet<Protocol>>,
}

impl RiskSettingsPatch {
    fn merge_into(&self, current: &RiskSettings) -> RiskSettings {
        RiskSettings {
            max_trade_size_base: self.max_trade_size_base.unwrap_or(current.max_trade_size_base),
            max_slippage_bps: self.max_slippage_bps.unwrap_or(current.max_slippage_bps),
            min_interval_ms: self.min_interval_ms.unwrap_or(current.min_interval_ms),
            max_consecutive_failures: self
                .max_consecutive_failures
                .unwrap_or(current.max_consecutive_failures),
            allowed_protocols: self
                .allowed_protocols
                .clone()
                .unwrap_or_else(|| current.allowed_protocols.clone()),
        }
    }
}

/// Mutable breaker state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskRuntime {
    pub consecutive_failures: u32,
    pub circuit_breaker_open: bool,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskStatus {
    pub settings: RiskSettings,
    pub runtime: RiskRuntime,
}

/// What is about to be executed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCheck {
    pub protocol: Protocol,
    pub amount_base: f64,
    pub slippage_bps: Option<u32>,
}

/// Invalid risk settings update
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskConfigError {
    #[error("max_trade_size_base must be a positive number, got {0}")]
    MaxTradeSize(f64),
    #[error("max_slippage_bps must be a positive integer")]
    MaxSlippage,
    #[error("min_interval_ms must be a positive integer")]
    MinInterval,
    #[error("max_consecutive_failures must be a positive integer")]
    MaxConsecutiveFailures,
    #[error("allowed_protocols must include at least one protocol")]
    AllowedProtocols,
}

/// Reason an execution was refused by the risk ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionError {
    #[error("{}", CIRCUIT_OPEN_MESSAGE)]
    CircuitOpen,
    #[error("Protocol {0} is not allowed")]
    ProtocolNotAllowed(Protocol),
    #[error("Trade size {amount} base exceeds max_trade_size_base {max}")]
    TradeTooLarge { amount: f64, max: f64 },
    #[error("slippage_bps {requested} exceeds max_slippage_bps {max}")]
    SlippageTooHigh { requested: u32, max: u32 },
    #[error("Rate limit active: wait {wait_secs}s")]
    RateLimited { wait_secs: u64 },
}

/// Global admission gate. Owns the settings and breaker state.
pub struct RiskLedger {
    settings: RiskSettings,
    runtime: RiskRuntime,
    clock: Arc<dyn Clock>,
}

impl RiskLedger {
    pub fn new(settings: RiskSettings, clock: Arc<dyn Clock>) -> Result<Self, RiskConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            runtime: RiskRuntime::default(),
            clock,
        })
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &RiskRuntime {
        &self.runtime
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            settings: self.settings.clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        self.runtime.circuit_breaker_open
    }

    /// Pure guard evaluated right before execution.
    pub fn assert_trade_allowed(&self, check: &RiskCheck) -> Result<(), AdmissionError> {
        if self.runtime.circuit_breaker_open {
            return Err(AdmissionError::CircuitOpen);
        }

        if !self.settings.allowed_protocols.contains(&check.protocol) {
            return Err(AdmissionError::ProtocolNotAllowed(check.protocol));
        }

        if check.amount_base > self.settings.max_trade_size_base {
            return Err(AdmissionError::TradeTooLarge {
                amount: check.amount_base,
                max: self.settings.max_trade_size_base,
            });
        }

        if let Some(requested) = check.slippage_bps {
            if requested > self.settings.max_slippage_bps {
                return Err(AdmissionError::SlippageTooHigh {
                    requested,
                    max: self.settings.max_slippage_bps,
                });
            }
        }

        if let Some(last) = self.runtime.last_execution_at {
            let elapsed = elapsed_ms(last, self.clock.now());
            let min_interval = self.settings.min_interval_ms as i64;
            if elapsed < min_interval {
                let remaining = (min_interval - elapsed) as u64;
                return Err(AdmissionError::RateLimited {
                    wait_secs: remaining.div_ceil(1000),
                });
            }
        }

        Ok(())
    }

    pub fn record_execution_success(&mut self) {
        self.runtime.consecutive_failures = 0;
        self.runtime.circuit_breaker_open = false;
        self.runtime.last_error = None;
        self.runtime.last_execution_at = Some(self.clock.now());
    }

    pub fn record_execution_failure(&mut self, error: &str) {
        self.runtime.consecutive_failures = self.runtime.consecutive_failures.saturating_add(1);
        self.runtime.last_error = Some(error.to_string());
        self.runtime.last_execution_at = Some(self.clock.now());

        if self.runtime.consecutive_failures >= self.settings.max_consecutive_failures {
            if !self.runtime.circuit_breaker_open {
                warn!(
                    "Circuit breaker opened after {} consecutive failures (last: {})",
                    self.runtime.consecutive_failures, error
                );
            }
            self.runtime.circuit_breaker_open = true;
        }
    }

    /// Merge, validate the merged result, then commit. All-or-nothing.
    pub fn update_risk(&mut self, patch: &RiskSettingsPatch) -> Result<RiskStatus, RiskConfigError> {
        let merged = patch.merge_into(&self.settings);
        merged.validate()?;
        info!("Risk settings updated: {:?}", merged);
        self.settings = merged;
        Ok(self.status())
    }

    pub fn reset_circuit_breaker(&mut self) -> RiskStatus {
        if self.runtime.circuit_breaker_open {
            info!("Circuit breaker reset by operator");
        }
        self.runtime.consecutive_failures = 0;
        self.runtime.circuit_breaker_open = false;
        self.runtime.last_error = None;
        self.status()
    }
}
