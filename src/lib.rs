//! Rebalance Runner Library
//!
//! Unattended two-asset rebalancing agent: an allocation drift decision,
//! a per-trade governor, a global risk ledger with a circuit breaker, reward
//! token bookkeeping, and a single-flight cycle scheduler tying them together.

pub mod amount;
pub mod client;
pub mod clock;
pub mod config;
pub mod decision;
pub mod economy;
pub mod executor;
pub mod governor;
pub mod notify;
pub mod risk;
pub mod runner;
pub mod state;
pub mod wallet;

// Re-export main types for convenience
pub use client::{HttpExecutionService, HttpTokenLedger, HttpWalletService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AgentConfig, TradingMode};
pub use decision::{decide, AgentDecision, PortfolioSnapshot, SwapDirection, TradeIntent};
pub use economy::{AgentTopology, EconomyLedger, InMemoryTokenLedger, TokenLedger};
pub use executor::{ExecutionService, PaperExchange, SwapExecution, SwapRequest};
pub use governor::{GovernorVerdict, RiskLevel, TradeGovernor};
pub use notify::{AgentEvent, BroadcastSink, NotificationSink, NotifyLevel, TracingSink};
pub use risk::{AdmissionError, Protocol, RiskConfigError, RiskLedger, RiskSettings, RiskSettingsPatch};
pub use runner::{
    AgentRunner, AgentStatus, CycleError, CycleOutcome, CycleReport, RejectionGate, RunnerDeps,
    SimulationReport,
};
pub use state::StateManager;
pub use wallet::{WalletBalances, WalletQuery};
