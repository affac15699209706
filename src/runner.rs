//! Cycle scheduler - drives decision, admission, execution and accounting
//!
//! `AgentRunner` is cheap to clone; every clone drives the same agent. At most
//! one cycle body runs at a time: a second caller arriving while a cycle is in
//! flight gets `CycleOutcome::Busy` and the current status instead of
//! queueing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::amount::{decimal_from_f64, raw_to_ui, round_dp, round_money, ui_to_raw};
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::decision::{
    decide, AgentDecision, AssetMints, AuxBalances, DecisionParams, IntentAction, PortfolioSnapshot,
    SwapDirection, TradeIntent,
};
use crate::economy::{AgentTopology, EconomyLedger, EconomyRuntime, TokenLedger, TradeOutcome};
use crate::executor::{ExecutionService, QuoteRequest, SwapExecution, SwapRequest};
use crate::governor::{
    risk_score, GovernorLimits, GovernorRequest, RiskLevel, RiskScoreInputs, TradeGovernor,
};
use crate::notify::{NotificationSink, NotifyLevel};
use crate::risk::{RiskCheck, RiskConfigError, RiskLedger, RiskSettingsPatch, RiskStatus};
use crate::state::StateManager;
use crate::wallet::{WalletBalances, WalletQuery};

/// Executed slippage at or below this share of the cap counts as profitable
const PROFITABLE_SLIPPAGE_SHARE: f64 = 0.6;

/// Floor applied to the base price when sizing quote-to-base swaps
const MIN_SIZING_PRICE: f64 = 0.0001;

/// Swap counters kept by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapStats {
    pub last_swap_at: Option<DateTime<Utc>>,
    pub successful_swaps: u64,
    pub failed_swaps: u64,
    pub daily_swap_count: u32,
    /// UTC day `daily_swap_count` belongs to
    pub daily_key: NaiveDate,
    pub consecutive_swap_failures: u32,
}

impl SwapStats {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            last_swap_at: None,
            successful_swaps: 0,
            failed_swaps: 0,
            daily_swap_count: 0,
            daily_key: today,
            consecutive_swap_failures: 0,
        }
    }

    /// Reset the daily counter if `today` is a new day. Returns true on rollover.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if self.daily_key == today {
            return false;
        }
        self.daily_key = today;
        self.daily_swap_count = 0;
        true
    }

    /// Daily count as it would read after a rollover check, without rolling
    pub fn daily_count_on(&self, today: NaiveDate) -> u32 {
        if self.daily_key == today {
            self.daily_swap_count
        } else {
            0
        }
    }

    /// Share of swaps that succeeded, 1.0 before the first swap
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_swaps + self.failed_swaps;
        if total == 0 {
            return 1.0;
        }
        self.successful_swaps as f64 / total as f64
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.last_swap_at = Some(now);
        self.daily_swap_count += 1;
        self.successful_swaps += 1;
        self.consecutive_swap_failures = 0;
    }

    fn record_failure(&mut self, now: DateTime<Utc>) {
        self.last_swap_at = Some(now);
        self.failed_swaps += 1;
        self.consecutive_swap_failures += 1;
    }
}

/// Scheduler-owned runtime state
#[derive(Debug, Clone)]
struct AgentRuntime {
    running: bool,
    interval_ms: u64,
    cycles: u64,
    failures: u64,
    rejections: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_action: String,
    last_decision: Option<AgentDecision>,
    last_intent: Option<TradeIntent>,
    last_signature: Option<String>,
    swap_stats: SwapStats,
}

/// Point-in-time view of the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub running: bool,
    pub cycle_in_progress: bool,
    pub interval_ms: u64,
    /// Completed cycles, including HOLD, rejected and failed ones
    pub cycles: u64,
    pub failures: u64,
    pub rejections: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_action: String,
    pub last_decision: Option<AgentDecision>,
    pub last_intent: Option<TradeIntent>,
    pub last_signature: Option<String>,
    pub topology: AgentTopology,
    pub swap_stats: SwapStats,
    pub risk: RiskStatus,
    pub economy: EconomyRuntime,
}

/// Which admission step refused a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionGate {
    Governor,
    RiskLedger,
    /// The amount could not be turned into a valid raw swap size
    Sizing,
}

impl fmt::Display for RejectionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionGate::Governor => write!(f, "governor"),
            RejectionGate::RiskLedger => write!(f, "risk ledger"),
            RejectionGate::Sizing => write!(f, "sizing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Another cycle was in flight; nothing was done
    Busy,
    Hold {
        reason: String,
    },
    Rejected {
        gate: RejectionGate,
        reason: String,
    },
    Executed {
        signature: String,
        direction: SwapDirection,
        amount_base: f64,
        notional: f64,
        slippage_bps: u32,
        profitable: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Portfolio snapshot failed: {0}")]
    Snapshot(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Dry-run result of `AgentRunner::simulate`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub intent: TradeIntent,
    pub decision: AgentDecision,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Share of portfolio value currently held in base
    pub portfolio_allocation: f64,
    pub risk: RiskStatus,
    pub economy: EconomyRuntime,
}

/// External collaborators the runner is wired to
pub struct RunnerDeps {
    pub execution: Arc<dyn ExecutionService>,
    pub wallet: Arc<dyn WalletQuery>,
    pub token_ledger: Arc<dyn TokenLedger>,
    pub sink: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    /// Initialised state directory; status is not persisted when unset
    pub state: Option<StateManager>,
}

/// Everything a cycle needs to know to size and admit one swap
#[derive(Debug, Clone)]
struct TradePlan {
    intent: TradeIntent,
    direction: SwapDirection,
    amount_base: f64,
    /// Amount in input token UI units
    input_amount: f64,
    input_decimals: u8,
    notional: f64,
    base_balance: f64,
    success_rate: f64,
    consecutive_swap_failures: u32,
    daily_swap_count: u32,
    slippage_bps: u32,
    /// Manual trades skip the slippage heuristic
    assume_profitable: bool,
}

/// Balances, price and decision for one pass
struct CycleContext {
    balances: WalletBalances,
    snapshot: PortfolioSnapshot,
    intent: TradeIntent,
    slippage_bps: u32,
}

#[derive(Serialize)]
struct JournalEntry<'a> {
    timestamp: DateTime<Utc>,
    last_action: &'a str,
    intent: &'a Option<TradeIntent>,
    decision: &'a Option<AgentDecision>,
    signature: &'a Option<String>,
}

struct Inner {
    config: AgentConfig,
    mints: AssetMints,
    params: DecisionParams,
    governor: TradeGovernor,
    risk: Mutex<RiskLedger>,
    economy: EconomyLedger,
    execution: Arc<dyn ExecutionService>,
    wallet: Arc<dyn WalletQuery>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    state: Option<StateManager>,
    runtime: Mutex<AgentRuntime>,
    cycle_gate: tokio::sync::Mutex<()>,
    ticker: Mutex<Option<CancellationToken>>,
}

/// Unattended rebalancing agent
#[derive(Clone)]
pub struct AgentRunner {
    inner: Arc<Inner>,
}

impl AgentRunner {
    pub fn new(config: AgentConfig, deps: RunnerDeps) -> Result<Self, RiskConfigError> {
        let risk = RiskLedger::new(config.risk.clone(), deps.clock.clone())?;
        let topology = AgentTopology::from(&config.topology);
        let economy = EconomyLedger::new(
            config.economy,
            topology,
            deps.token_ledger,
            deps.sink.clone(),
            deps.clock.clone(),
        );
        let mints = AssetMints {
            base: config.agent.base_mint.clone(),
            quote: config.agent.quote_mint.clone(),
            aux: config
                .agent
                .aux_pair
                .as_ref()
                .map(|aux| (aux.one_mint.clone(), aux.two_mint.clone())),
        };
        let runtime = AgentRuntime {
            running: false,
            interval_ms: config.agent.loop_interval_ms,
            cycles: 0,
            failures: 0,
            rejections: 0,
            last_run_at: None,
            last_action: "Idle".to_string(),
            last_decision: None,
            last_intent: None,
            last_signature: None,
            swap_stats: SwapStats::new(deps.clock.today()),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                params: DecisionParams::from(&config.strategy),
                governor: TradeGovernor::new(GovernorLimits::from_config(
                    &config.governor,
                    &config.strategy,
                )),
                mints,
                risk: Mutex::new(risk),
                economy,
                execution: deps.execution,
                wallet: deps.wallet,
                sink: deps.sink,
                clock: deps.clock,
                state: deps.state,
                runtime: Mutex::new(runtime),
                cycle_gate: tokio::sync::Mutex::new(()),
                ticker: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    fn with_runtime<R>(&self, f: impl FnOnce(&mut AgentRuntime) -> R) -> R {
        let mut runtime = self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut runtime)
    }

    fn with_risk<R>(&self, f: impl FnOnce(&mut RiskLedger) -> R) -> R {
        let mut risk = self
            .inner
            .risk
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut risk)
    }

    pub fn status(&self) -> AgentStatus {
        let runtime = self.with_runtime(|r| r.clone());
        AgentStatus {
            running: runtime.running,
            cycle_in_progress: self.inner.cycle_gate.try_lock().is_err(),
            interval_ms: runtime.interval_ms,
            cycles: runtime.cycles,
            failures: runtime.failures,
            rejections: runtime.rejections,
            last_run_at: runtime.last_run_at,
            last_action: runtime.last_action,
            last_decision: runtime.last_decision,
            last_intent: runtime.last_intent,
            last_signature: runtime.last_signature,
            topology: self.inner.economy.topology().clone(),
            swap_stats: runtime.swap_stats,
            risk: self.with_risk(|r| r.status()),
            economy: self.inner.economy.status(),
        }
    }

    /// Start the periodic ticker. The first cycle fires immediately. Calling
    /// this while already running changes nothing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, interval_ms: Option<u64>) -> AgentStatus {
        let mut ticker = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            debug!("Runner already started");
            drop(ticker);
            return self.status();
        }

        let interval_ms = interval_ms
            .unwrap_or(self.inner.config.agent.loop_interval_ms)
            .max(1);
        let token = CancellationToken::new();
        *ticker = Some(token.clone());
        drop(ticker);

        self.with_runtime(|r| {
            r.running = true;
            r.interval_ms = interval_ms;
            r.last_action = "Started".to_string();
        });
        info!("Runner started with {} ms cycle interval", interval_ms);
        self.inner.sink.emit(
            NotifyLevel::Info,
            "Agent started",
            json!({ "interval_ms": interval_ms }),
        );

        let runner = self.clone();
        tokio::spawn(async move { runner.tick_loop(interval_ms, token).await });

        self.status()
    }

    /// Stop the ticker. A cycle already in flight runs to completion.
    pub fn pause(&self) -> AgentStatus {
        let token = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(token) = token {
            token.cancel();
            self.with_runtime(|r| {
                r.running = false;
                r.last_action = "Paused".to_string();
            });
            info!("Runner paused");
            self.inner
                .sink
                .emit(NotifyLevel::Info, "Agent paused", serde_json::Value::Null);
        }

        self.status()
    }

    async fn tick_loop(self, interval_ms: u64, token: CancellationToken) {
        let mut ticker = interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Cycle ticker stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => {
                            if report.outcome == CycleOutcome::Busy {
                                debug!("Tick skipped, cycle already in progress");
                            }
                        }
                        Err(e) => {
                            error!("Cycle error: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Run one decision pass now. Returns `Busy` without doing anything if
    /// another cycle is in flight.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let Ok(gate) = self.inner.cycle_gate.try_lock() else {
            return Ok(self.busy_report());
        };

        let result = self.cycle_body().await;
        self.persist().await;
        drop(gate);

        result.map(|outcome| CycleReport {
            outcome,
            status: self.status(),
        })
    }

    /// Sell `amount_base` of the base asset now, through the same gates and
    /// the same single-flight guard as a scheduled cycle.
    pub async fn execute_manual_trade(&self, amount_base: f64) -> Result<CycleReport, CycleError> {
        if !amount_base.is_finite() || amount_base <= 0.0 {
            return Err(CycleError::InvalidRequest(format!(
                "amount_base must be a positive number, got {}",
                amount_base
            )));
        }

        let Ok(gate) = self.inner.cycle_gate.try_lock() else {
            return Ok(self.busy_report());
        };

        let result = self.manual_body(amount_base).await;
        self.persist().await;
        drop(gate);

        result.map(|outcome| CycleReport {
            outcome,
            status: self.status(),
        })
    }

    /// Dry-run the decision on live balances without executing or touching
    /// any counter.
    pub async fn simulate(&self) -> Result<SimulationReport, CycleError> {
        let context = self.build_context().await?;
        let plan = self.plan_for(&context);
        let amount_base = plan.as_ref().map(|p| p.amount_base).unwrap_or(0.0);
        let stats = self.with_runtime(|r| r.swap_stats.clone());

        let score = risk_score(&RiskScoreInputs {
            intent_confidence: context.intent.confidence,
            consecutive_swap_failures: stats.consecutive_swap_failures,
            max_slippage_bps: context.slippage_bps,
            base_balance: context.snapshot.base_balance,
            min_base_reserve: self.inner.config.strategy.min_base_reserve,
            success_rate: stats.success_rate(),
        });

        Ok(SimulationReport {
            decision: AgentDecision::from_intent(
                &context.intent,
                amount_base,
                context.slippage_bps,
                &self.inner.mints,
            ),
            intent: context.intent,
            risk_score: score,
            risk_level: RiskLevel::from_score(score),
            portfolio_allocation: round_dp(context.snapshot.allocation_ratio(), 4),
            risk: self.with_risk(|r| r.status()),
            economy: self.inner.economy.status(),
        })
    }

    pub fn update_risk_settings(&self, patch: &RiskSettingsPatch) -> Result<RiskStatus, RiskConfigError> {
        let status = self.with_risk(|r| r.update_risk(patch))?;
        self.inner.sink.emit(
            NotifyLevel::Info,
            "Risk settings updated",
            serde_json::to_value(&status.settings).unwrap_or_default(),
        );
        Ok(status)
    }

    pub fn reset_circuit_breaker(&self) -> RiskStatus {
        let status = self.with_risk(|r| r.reset_circuit_breaker());
        self.inner.sink.emit(
            NotifyLevel::Info,
            "Risk runtime reset",
            serde_json::Value::Null,
        );
        status
    }

    fn busy_report(&self) -> CycleReport {
        debug!("Cycle already in progress");
        CycleReport {
            outcome: CycleOutcome::Busy,
            status: self.status(),
        }
    }

    async fn cycle_body(&self) -> Result<CycleOutcome, CycleError> {
        let today = self.inner.clock.today();
        let rolled = self.with_runtime(|r| r.swap_stats.roll_day(today));
        if rolled {
            info!("New trading day {}, daily swap count reset", today);
        }

        let context = match self.build_context().await {
            Ok(context) => context,
            Err(e) => {
                self.with_runtime(|r| r.last_action = "Snapshot failed".to_string());
                return Err(e);
            }
        };
        let plan = self.plan_for(&context);
        let amount_base = plan.as_ref().map(|p| p.amount_base).unwrap_or(0.0);
        self.record_decision(&context.intent, amount_base, context.slippage_bps);

        match plan {
            None => {
                let reason = context.intent.reason.clone();
                self.complete_cycle(format!("HOLD: {}", reason));
                Ok(CycleOutcome::Hold { reason })
            }
            Some(plan) => self.execute_plan(plan).await,
        }
    }

    async fn manual_body(&self, amount_base: f64) -> Result<CycleOutcome, CycleError> {
        let today = self.inner.clock.today();
        self.with_runtime(|r| r.swap_stats.roll_day(today));

        let balances = self.fetch_balances().await?;
        let price = self.discover_price().await;
        let slippage_bps = self.with_risk(|r| r.settings().max_slippage_bps);
        let stats = self.with_runtime(|r| r.swap_stats.clone());

        let base_balance = balances.base_balance;
        let amount_pct = if base_balance > 0.0 {
            amount_base / base_balance
        } else {
            0.0
        };
        let intent = TradeIntent {
            action: IntentAction::Swap,
            direction: Some(SwapDirection::BaseToQuote),
            amount_pct: round_dp(amount_pct, 4),
            confidence: 100.0,
            reason: format!("Manual trade of {} base requested.", amount_base),
        };
        self.record_decision(&intent, amount_base, slippage_bps);

        if base_balance <= 0.0 {
            return Ok(self.reject(
                RejectionGate::Sizing,
                "No base balance available for manual trade.".to_string(),
            ));
        }

        let plan = TradePlan {
            intent,
            direction: SwapDirection::BaseToQuote,
            amount_base,
            input_amount: amount_base,
            input_decimals: self.inner.config.agent.base_decimals,
            notional: amount_base * price,
            base_balance,
            success_rate: stats.success_rate(),
            consecutive_swap_failures: stats.consecutive_swap_failures,
            daily_swap_count: stats.daily_swap_count,
            slippage_bps,
            assume_profitable: true,
        };
        self.execute_plan(plan).await
    }

    async fn fetch_balances(&self) -> Result<WalletBalances, CycleError> {
        let trader = &self.inner.config.topology.trader_wallet;
        self.inner.wallet.get_portfolio(trader).await.map_err(|e| {
            warn!("Portfolio lookup for {} failed: {}", trader, e);
            CycleError::Snapshot(e.to_string())
        })
    }

    /// Base price in quote from a one-unit quote, or the configured fallback.
    async fn discover_price(&self) -> f64 {
        let agent = &self.inner.config.agent;
        let fallback = agent.fallback_base_price;
        let one_base = 10u64.checked_pow(agent.base_decimals as u32).unwrap_or(u64::MAX);
        let request = QuoteRequest {
            input_mint: agent.base_mint.clone(),
            output_mint: agent.quote_mint.clone(),
            amount_raw: one_base,
            slippage_bps: self.with_risk(|r| r.settings().max_slippage_bps),
        };

        let quote = timeout(
            Duration::from_millis(agent.execution_timeout_ms),
            self.inner.execution.fetch_quote(&request),
        )
        .await;

        match quote {
            Ok(Ok(quote)) if quote.out_amount > 0 => {
                match raw_to_ui(quote.out_amount, agent.quote_decimals) {
                    Ok(price) => price,
                    Err(e) => {
                        warn!("Unusable price quote, using fallback price {}: {}", fallback, e);
                        fallback
                    }
                }
            }
            Ok(Ok(_)) => {
                warn!("Empty price quote, using fallback price {}", fallback);
                fallback
            }
            Ok(Err(e)) => {
                warn!("Price quote failed, using fallback price {}: {}", fallback, e);
                fallback
            }
            Err(_) => {
                warn!("Price quote timed out, using fallback price {}", fallback);
                fallback
            }
        }
    }

    async fn build_context(&self) -> Result<CycleContext, CycleError> {
        let balances = self.fetch_balances().await?;
        let price = self.discover_price().await;
        let now = self.inner.clock.now();
        let today = self.inner.clock.today();
        let slippage_bps = self.with_risk(|r| r.settings().max_slippage_bps);
        let stats = self.with_runtime(|r| r.swap_stats.clone());

        let aux_balances = self.inner.config.agent.aux_pair.as_ref().map(|aux| AuxBalances {
            one: balances.token_balance(&aux.one_mint),
            two: balances.token_balance(&aux.two_mint),
        });

        let snapshot = PortfolioSnapshot {
            base_balance: balances.base_balance,
            quote_balance: balances.quote_balance,
            base_price_in_quote: price,
            last_trade_at: stats.last_swap_at,
            trade_success_rate: stats.success_rate(),
            daily_trade_count: stats.daily_count_on(today),
            consecutive_failures: stats.consecutive_swap_failures,
            estimated_slippage_bps: slippage_bps,
            min_base_reserve: self.inner.config.strategy.min_base_reserve,
            aux_balances,
        };
        let intent = decide(&snapshot, &self.inner.params, now);

        Ok(CycleContext {
            balances,
            snapshot,
            intent,
            slippage_bps,
        })
    }

    /// Size a SWAP intent; `None` for HOLD.
    fn plan_for(&self, context: &CycleContext) -> Option<TradePlan> {
        let direction = context.intent.swap_direction()?;
        let agent = &self.inner.config.agent;
        let snapshot = &context.snapshot;
        let pct = context.intent.amount_pct;
        let price = snapshot.base_price_in_quote;

        let (amount_base, input_amount, input_decimals, notional) = match direction {
            SwapDirection::BaseToQuote => {
                let amount_base = round_dp(snapshot.base_balance * pct, 6);
                (amount_base, amount_base, agent.base_decimals, amount_base * price)
            }
            SwapDirection::QuoteToBase => {
                let notional = snapshot.quote_balance * pct;
                let amount_base = round_dp(notional / price.max(MIN_SIZING_PRICE), 6);
                (amount_base, notional, agent.quote_decimals, notional)
            }
            SwapDirection::AuxPair => {
                let one = snapshot.aux_balances.map(|a| a.one).unwrap_or(0.0);
                let decimals = agent.aux_pair.as_ref().map(|a| a.decimals).unwrap_or(0);
                (0.0, one * pct, decimals, 0.0)
            }
        };

        Some(TradePlan {
            intent: context.intent.clone(),
            direction,
            amount_base: amount_base.max(0.0),
            input_amount: input_amount.max(0.0),
            input_decimals,
            notional: notional.max(0.0),
            base_balance: context.balances.base_balance,
            success_rate: snapshot.trade_success_rate,
            consecutive_swap_failures: snapshot.consecutive_failures,
            daily_swap_count: snapshot.daily_trade_count,
            slippage_bps: context.slippage_bps,
            assume_profitable: false,
        })
    }

    fn record_decision(&self, intent: &TradeIntent, amount_base: f64, slippage_bps: u32) {
        let decision = AgentDecision::from_intent(intent, amount_base, slippage_bps, &self.inner.mints);
        self.with_runtime(|r| {
            r.last_decision = Some(decision);
            r.last_intent = Some(intent.clone());
        });

        let direction = intent
            .swap_direction()
            .map(|d| format!(" {}", d))
            .unwrap_or_default();
        let action = match intent.action {
            IntentAction::Swap => "SWAP",
            IntentAction::Hold => "HOLD",
        };
        self.inner.sink.emit(
            NotifyLevel::Info,
            &format!("Decision: {}{}", action, direction),
            json!({
                "confidence": intent.confidence,
                "reason": intent.reason,
                "amount_pct": intent.amount_pct,
            }),
        );
    }

    async fn execute_plan(&self, plan: TradePlan) -> Result<CycleOutcome, CycleError> {
        let config = &self.inner.config;

        let score = risk_score(&RiskScoreInputs {
            intent_confidence: plan.intent.confidence,
            consecutive_swap_failures: plan.consecutive_swap_failures,
            max_slippage_bps: plan.slippage_bps,
            base_balance: plan.base_balance,
            min_base_reserve: config.strategy.min_base_reserve,
            success_rate: plan.success_rate,
        });

        let verdict = self.inner.governor.evaluate(
            &GovernorRequest {
                base_balance: plan.base_balance,
                requested_amount_base: plan.amount_base,
                requested_pct: plan.intent.amount_pct,
                slippage_bps: plan.slippage_bps,
                max_allowed_slippage_bps: plan.slippage_bps,
                daily_swap_count: plan.daily_swap_count,
            },
            score,
        );
        if !verdict.allowed {
            return Ok(self.reject(RejectionGate::Governor, verdict.reason));
        }

        let check = RiskCheck {
            protocol: plan.direction.protocol(),
            amount_base: plan.amount_base,
            slippage_bps: Some(plan.slippage_bps),
        };
        if let Err(e) = self.with_risk(|r| r.assert_trade_allowed(&check)) {
            return Ok(self.reject(RejectionGate::RiskLedger, e.to_string()));
        }

        let Some((input_mint, output_mint)) = self.inner.mints.route(plan.direction) else {
            return Ok(self.reject(
                RejectionGate::Sizing,
                format!("No token pair configured for {}", plan.direction),
            ));
        };
        let amount_raw = match ui_to_raw(plan.input_amount, plan.input_decimals) {
            Ok(raw) => raw,
            Err(e) => return Ok(self.reject(RejectionGate::Sizing, e.to_string())),
        };

        let request = SwapRequest {
            wallet_id: config.topology.trader_wallet.clone(),
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount_raw,
            slippage_bps: plan.slippage_bps,
            max_allowed_slippage_bps: plan.slippage_bps,
            reason_ref: plan.intent.reason.clone(),
        };

        info!(
            "Executing {} swap: {} raw {} -> {} (risk score {:.2})",
            plan.direction, amount_raw, request.input_mint, request.output_mint, score
        );

        let timeout_ms = config.agent.execution_timeout_ms;
        let result = match timeout(
            Duration::from_millis(timeout_ms),
            self.inner.execution.execute_swap(&request),
        )
        .await
        {
            Ok(Ok(execution)) => Ok(execution),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Execution timed out after {} ms", timeout_ms)),
        };

        match result {
            Ok(execution) => Ok(self.on_execution_success(&plan, execution).await),
            Err(message) => {
                self.on_execution_failure(&plan, &message).await;
                Err(CycleError::ExecutionFailed(message))
            }
        }
    }

    async fn on_execution_success(&self, plan: &TradePlan, execution: SwapExecution) -> CycleOutcome {
        let now = self.inner.clock.now();
        self.with_runtime(|r| {
            r.swap_stats.record_success(now);
            r.last_signature = Some(execution.signature.clone());
        });

        let max_slippage = self.with_risk(|r| r.settings().max_slippage_bps);
        let profitable = plan.assume_profitable
            || execution.slippage_bps as f64 <= max_slippage as f64 * PROFITABLE_SLIPPAGE_SHARE;

        self.book_economy(self.trade_outcome(plan, true, profitable))
            .await;

        self.with_risk(|r| r.record_execution_success());
        self.complete_cycle(format!("Swap executed ({})", plan.direction));

        info!(
            "Swap executed: {} signature {} (slippage {} bps)",
            plan.direction, execution.signature, execution.slippage_bps
        );
        self.inner.sink.emit(
            NotifyLevel::Success,
            &format!("Swap executed: {}", plan.direction),
            json!({
                "signature": execution.signature,
                "route": execution.route,
                "in_amount": execution.in_amount,
                "out_amount": execution.out_amount,
                "slippage_bps": execution.slippage_bps,
                "confidence": plan.intent.confidence,
                "reason": plan.intent.reason,
            }),
        );

        CycleOutcome::Executed {
            signature: execution.signature,
            direction: plan.direction,
            amount_base: plan.amount_base,
            notional: plan.notional,
            slippage_bps: execution.slippage_bps,
            profitable,
        }
    }

    async fn on_execution_failure(&self, plan: &TradePlan, message: &str) {
        let now = self.inner.clock.now();
        self.with_runtime(|r| r.swap_stats.record_failure(now));

        self.book_economy(self.trade_outcome(plan, false, false))
            .await;

        self.with_risk(|r| r.record_execution_failure(message));
        self.with_runtime(|r| r.failures += 1);
        self.complete_cycle("Execution failed".to_string());

        error!("Swap {} failed: {}", plan.direction, message);
        self.inner.sink.emit(
            NotifyLevel::Error,
            message,
            json!({ "direction": plan.direction, "reason": plan.intent.reason }),
        );
    }

    /// Notional moves to the reward economy as an exact quote amount.
    fn trade_outcome(&self, plan: &TradePlan, successful: bool, profitable: bool) -> TradeOutcome {
        let notional = decimal_from_f64(plan.notional)
            .map(|n| round_money(n, self.inner.config.agent.quote_decimals as u32))
            .unwrap_or_default();
        TradeOutcome {
            successful,
            profitable,
            notional,
        }
    }

    /// Economy side effects never fail the cycle.
    async fn book_economy(&self, outcome: TradeOutcome) {
        let economy = &self.inner.economy;

        if let Err(e) = economy.on_trade_outcome(outcome).await {
            self.economy_warning("trade outcome", e);
            return;
        }
        if !outcome.successful {
            return;
        }
        if let Err(e) = economy.maybe_mint_activity_reward().await {
            self.economy_warning("activity mint", e);
        }
        if let Err(e) = economy.maybe_redistribute_from_treasury().await {
            self.economy_warning("treasury redistribution", e);
        }
    }

    fn economy_warning(&self, step: &str, e: anyhow::Error) {
        warn!("Economy {} failed: {}", step, e);
        self.inner.sink.emit(
            NotifyLevel::Warn,
            &format!("Economy {} failed", step),
            json!({ "error": e.to_string() }),
        );
    }

    fn reject(&self, gate: RejectionGate, reason: String) -> CycleOutcome {
        warn!("Swap rejected by {}: {}", gate, reason);
        self.with_runtime(|r| r.rejections += 1);
        self.complete_cycle(format!("Swap blocked: {}", reason));
        self.inner.sink.emit(
            NotifyLevel::Warn,
            &format!("Swap rejected by {}: {}", gate, reason),
            json!({ "gate": gate, "reason": reason }),
        );
        CycleOutcome::Rejected { gate, reason }
    }

    fn complete_cycle(&self, last_action: String) {
        let now = self.inner.clock.now();
        self.with_runtime(|r| {
            r.cycles += 1;
            r.last_run_at = Some(now);
            r.last_action = last_action;
        });
    }

    /// Best-effort write of the status snapshot and decision journal.
    async fn persist(&self) {
        let Some(state) = &self.inner.state else {
            return;
        };

        // The gate is still held here; the snapshot describes the finished cycle
        let mut status = self.status();
        status.cycle_in_progress = false;
        if let Err(e) = state.write_now(&status).await {
            warn!("Failed to write state/now.json: {}", e);
        }

        let entry = JournalEntry {
            timestamp: self.inner.clock.now(),
            last_action: &status.last_action,
            intent: &status.last_intent,
            decision: &status.last_decision,
            signature: &status.last_signature,
        };
        if let Err(e) = state
            .append_decision(self.inner.clock.today(), &entry)
            .await
        {
            warn!("Failed to append decision journal: {}", e);
        }
    }
}
