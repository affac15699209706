//! Reward token economy
//!
//! Trade outcomes drive three side effects on the reward token: a reward
//! transfer from trader to treasury after a profitable swap, an activity mint
//! into the treasury, and periodic redistribution from the treasury to the
//! operational wallets.
//!
//! Idempotency is counter based. A side effect that succeeds on the ledger
//! but whose result is lost (e.g. a timeout after the transfer landed) will
//! be repeated by the next trigger.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::amount::round_money;
use crate::clock::Clock;
use crate::config::{EconomyConfig, TopologyConfig};
use crate::notify::{NotificationSink, NotifyLevel};

/// Wallet inactive for longer than this blocks redistribution
const ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Share of the treasury paid out per redistribution, 10%
const REDISTRIBUTION_SHARE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Share of the initial supply split across operational wallets, 20%
const INITIAL_ALLOCATION_SHARE: Decimal = Decimal::from_parts(2, 0, 0, false, 1);

/// Reward token amounts are kept to cents
const REWARD_DP: u32 = 2;

/// Wallet roles. Identifiers only; keys stay with the wallet service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTopology {
    pub treasury_wallet: String,
    pub trader_wallet: String,
    pub operational_wallets: Vec<String>,
}

impl From<&TopologyConfig> for AgentTopology {
    fn from(config: &TopologyConfig) -> Self {
        Self {
            treasury_wallet: config.treasury_wallet.clone(),
            trader_wallet: config.trader_wallet.clone(),
            operational_wallets: config.operational_wallets.clone(),
        }
    }
}

/// Reward token operations. Amounts are in UI units of the reward token.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Create or load the reward mint and its accounts; returns the mint id.
    async fn initialize_economy(&self, topology: &AgentTopology) -> anyhow::Result<String>;

    async fn transfer(
        &self,
        mint: &str,
        from: &str,
        to: &str,
        amount: Decimal,
        reason: &str,
    ) -> anyhow::Result<String>;

    async fn mint_to(&self, mint: &str, wallet: &str, amount: Decimal, reason: &str) -> anyhow::Result<String>;

    async fn balance_of(&self, mint: &str, wallet: &str) -> anyhow::Result<Decimal>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletActivity {
    pub count: u64,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EconomyRuntime {
    pub initialized: bool,
    pub mint_address: Option<String>,
    pub trader_consecutive_losses: u32,
    pub trader_activity_count: u32,
    /// Entries are created on first activity and never removed
    pub activity: BTreeMap<String, WalletActivity>,
}

impl EconomyRuntime {
    fn mark_activity(&mut self, wallet: &str, now: DateTime<Utc>) {
        let entry = self.activity.entry(wallet.to_string()).or_default();
        entry.count += 1;
        entry.last_active_at = Some(now);
    }

    fn is_active(&self, wallet: &str, now: DateTime<Utc>) -> bool {
        self.activity
            .get(wallet)
            .and_then(|a| a.last_active_at)
            .map(|at| now.signed_duration_since(at) <= Duration::hours(ACTIVITY_WINDOW_HOURS))
            .unwrap_or(false)
    }
}

/// What happened to the trader's last swap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOutcome {
    pub successful: bool,
    pub profitable: bool,
    /// Trade value in quote units
    pub notional: Decimal,
}

pub struct EconomyLedger {
    config: EconomyConfig,
    topology: AgentTopology,
    ledger: Arc<dyn TokenLedger>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<EconomyRuntime>,
}

impl EconomyLedger {
    pub fn new(
        config: EconomyConfig,
        topology: AgentTopology,
        ledger: Arc<dyn TokenLedger>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            topology,
            ledger,
            sink,
            clock,
            state: Mutex::new(EconomyRuntime::default()),
        }
    }

    pub fn topology(&self) -> &AgentTopology {
        &self.topology
    }

    pub fn status(&self) -> EconomyRuntime {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, EconomyRuntime> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mint_address(&self) -> Option<String> {
        let state = self.lock();
        if state.initialized {
            state.mint_address.clone()
        } else {
            None
        }
    }

    /// Create or load the reward mint and mark every known wallet active.
    pub async fn initialize(&self) -> anyhow::Result<String> {
        let mint = self.ledger.initialize_economy(&self.topology).await?;
        let now = self.clock.now();

        let mut state = self.lock();
        state.initialized = true;
        state.mint_address = Some(mint.clone());
        state.mark_activity(&self.topology.treasury_wallet, now);
        for wallet in &self.topology.operational_wallets {
            state.mark_activity(wallet, now);
        }

        info!("Reward economy initialized with mint {}", mint);
        Ok(mint)
    }

    /// Book a trade outcome. Returns the reward transferred to the treasury,
    /// if any.
    pub async fn on_trade_outcome(&self, outcome: TradeOutcome) -> anyhow::Result<Option<Decimal>> {
        let mint = match self.mint_address() {
            Some(mint) => mint,
            None => self.initialize().await?,
        };

        let losses = {
            let now = self.clock.now();
            let mut state = self.lock();
            state.mark_activity(&self.topology.trader_wallet, now);
            state.trader_activity_count += 1;

            if outcome.successful && outcome.profitable {
                state.trader_consecutive_losses = 0;
            } else {
                state.trader_consecutive_losses += 1;
            }
            state.trader_consecutive_losses
        };

        if !outcome.successful {
            if losses >= self.config.loss_warning_streak {
                self.sink.emit(
                    NotifyLevel::Warn,
                    "Trader requested reward reduction after consecutive losses.",
                    json!({ "consecutive_losses": losses }),
                );
            }
            return Ok(None);
        }

        if !outcome.profitable {
            debug!("Unprofitable swap, loss streak now {}", losses);
            return Ok(None);
        }

        let reward =
            round_money(outcome.notional * self.config.reward_pct, REWARD_DP).max(Decimal::ONE);
        self.ledger
            .transfer(
                &mint,
                &self.topology.trader_wallet,
                &self.topology.treasury_wallet,
                reward,
                "Trader reward transfer after profitable swap",
            )
            .await?;

        info!("Reward of {} transferred to treasury", reward);
        Ok(Some(reward))
    }

    /// Mint into the treasury once enough trader activity accumulated.
    pub async fn maybe_mint_activity_reward(&self) -> anyhow::Result<bool> {
        let Some(mint) = self.mint_address() else {
            return Ok(false);
        };

        if self.lock().trader_activity_count < self.config.activity_mint_threshold {
            return Ok(false);
        }

        self.ledger
            .mint_to(
                &mint,
                &self.topology.treasury_wallet,
                self.config.reward_mint_amount,
                "Trader activity threshold reached",
            )
            .await?;

        let now = self.clock.now();
        let mut state = self.lock();
        state.trader_activity_count = 0;
        state.mark_activity(&self.topology.treasury_wallet, now);

        info!(
            "Minted {} reward tokens to treasury",
            self.config.reward_mint_amount
        );
        Ok(true)
    }

    /// Pay out a share of the treasury when every operational wallet is
    /// active. Returns the amount sent to each wallet.
    pub async fn maybe_redistribute_from_treasury(&self) -> anyhow::Result<Option<Decimal>> {
        let Some(mint) = self.mint_address() else {
            return Ok(None);
        };

        let wallets = &self.topology.operational_wallets;
        let active = {
            let now = self.clock.now();
            let state = self.lock();
            wallets.iter().filter(|w| state.is_active(w, now)).count()
        };

        if active != wallets.len() {
            self.sink.emit(
                NotifyLevel::Warn,
                "Treasury distribution skipped: inactive agent detected.",
                json!({ "active": active, "total": wallets.len() }),
            );
            return Ok(None);
        }

        let treasury = self
            .ledger
            .balance_of(&mint, &self.topology.treasury_wallet)
            .await?;
        if treasury < self.config.redistribution_threshold {
            return Ok(None);
        }

        let share = treasury * REDISTRIBUTION_SHARE / Decimal::from(wallets.len());
        let per_wallet = round_money(share, REWARD_DP);
        if per_wallet <= Decimal::ZERO {
            return Ok(None);
        }

        for wallet in wallets {
            self.ledger
                .transfer(
                    &mint,
                    &self.topology.treasury_wallet,
                    wallet,
                    per_wallet,
                    "Treasury redistribution",
                )
                .await?;
        }

        let now = self.clock.now();
        self.lock()
            .mark_activity(&self.topology.treasury_wallet, now);

        info!(
            "Treasury redistributed {} to each of {} wallets",
            per_wallet,
            wallets.len()
        );
        Ok(Some(per_wallet))
    }
}

/// Ledger movement recorded by `InMemoryTokenLedger`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub from: Option<String>,
    pub to: String,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Default)]
struct InMemoryBook {
    mint: Option<String>,
    balances: HashMap<String, Decimal>,
    entries: Vec<LedgerEntry>,
}

/// Process-local reward token ledger for paper mode and tests
pub struct InMemoryTokenLedger {
    initial_supply: Decimal,
    book: Mutex<InMemoryBook>,
}

impl InMemoryTokenLedger {
    pub fn new(initial_supply: Decimal) -> Self {
        Self {
            initial_supply,
            book: Mutex::new(InMemoryBook::default()),
        }
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    pub fn balance(&self, wallet: &str) -> Decimal {
        self.lock().balances.get(wallet).copied().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_mint(book: &InMemoryBook, mint: &str) -> anyhow::Result<()> {
        match &book.mint {
            Some(m) if m == mint => Ok(()),
            _ => Err(anyhow::anyhow!("Unknown reward mint {}", mint)),
        }
    }

    fn credit(book: &mut InMemoryBook, from: Option<&str>, to: &str, amount: Decimal, reason: &str) {
        *book.balances.entry(to.to_string()).or_default() += amount;
        book.entries.push(LedgerEntry {
            from: from.map(str::to_string),
            to: to.to_string(),
            amount,
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn initialize_economy(&self, topology: &AgentTopology) -> anyhow::Result<String> {
        let mut book = self.lock();
        if let Some(mint) = &book.mint {
            return Ok(mint.clone());
        }

        let mint = format!("reward-{}", uuid::Uuid::new_v4());
        book.mint = Some(mint.clone());
        Self::credit(
            &mut book,
            None,
            &topology.treasury_wallet,
            self.initial_supply,
            "Initial supply",
        );

        if !topology.operational_wallets.is_empty() {
            let pool = self.initial_supply * INITIAL_ALLOCATION_SHARE;
            let per_wallet = pool / Decimal::from(topology.operational_wallets.len());
            *book
                .balances
                .entry(topology.treasury_wallet.clone())
                .or_default() -= pool;
            for wallet in &topology.operational_wallets {
                Self::credit(
                    &mut book,
                    Some(&topology.treasury_wallet),
                    wallet,
                    per_wallet,
                    "Initial distribution",
                );
            }
        }

        Ok(mint)
    }

    async fn transfer(
        &self,
        mint: &str,
        from: &str,
        to: &str,
        amount: Decimal,
        reason: &str,
    ) -> anyhow::Result<String> {
        let mut book = self.lock();
        Self::check_mint(&book, mint)?;

        let available = book.balances.get(from).copied().unwrap_or_default();
        if available < amount {
            return Err(anyhow::anyhow!(
                "Insufficient reward balance: {} has {}, needs {}",
                from,
                available,
                amount
            ));
        }

        *book.balances.entry(from.to_string()).or_default() -= amount;
        Self::credit(&mut book, Some(from), to, amount, reason);
        Ok(format!("ledger-{}", book.entries.len()))
    }

    async fn mint_to(&self, mint: &str, wallet: &str, amount: Decimal, reason: &str) -> anyhow::Result<String> {
        let mut book = self.lock();
        Self::check_mint(&book, mint)?;
        Self::credit(&mut book, None, wallet, amount, reason);
        Ok(format!("ledger-{}", book.entries.len()))
    }

    async fn balance_of(&self, mint: &str, wallet: &str) -> anyhow::Result<Decimal> {
        let book = self.lock();
        Self::check_mint(&book, mint)?;
        Ok(book.balances.get(wallet).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::BroadcastSink;
    use chrono::TimeZone;

    struct Fixture {
        economy: EconomyLedger,
        ledger: Arc<InMemoryTokenLedger>,
        sink: BroadcastSink,
        clock: Arc<ManualClock>,
    }

    fn dec(value: &str) -> Decimal {
        Decimal::from_str_exact(value).unwrap()
    }

    fn fixture(config: EconomyConfig, initial_supply: i64) -> Fixture {
        let ledger = Arc::new(InMemoryTokenLedger::new(Decimal::from(initial_supply)));
        let sink = BroadcastSink::new(16);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 10, 8, 0, 0).unwrap(),
        ));
        let economy = EconomyLedger::new(
            config,
            AgentTopology::from(&TopologyConfig::default()),
            ledger.clone(),
            Arc::new(sink.clone()),
            clock.clone(),
        );
        Fixture {
            economy,
            ledger,
            sink,
            clock,
        }
    }

    fn profitable(notional: &str) -> TradeOutcome {
        TradeOutcome {
            successful: true,
            profitable: true,
            notional: dec(notional),
        }
    }

    #[tokio::test]
    async fn test_initialize_marks_all_wallets_active() {
        let f = fixture(EconomyConfig::default(), 1_000);
        let mint = f.economy.initialize().await.unwrap();

        let status = f.economy.status();
        assert!(status.initialized);
        assert_eq!(status.mint_address.as_deref(), Some(mint.as_str()));
        for wallet in ["treasury", "trader", "liquidity", "arbitrage"] {
            assert_eq!(status.activity[wallet].count, 1, "{}", wallet);
        }
        // 20% of supply split three ways
        assert_eq!(f.ledger.balance("treasury"), Decimal::from(800));
        assert_eq!(
            f.ledger.balance("liquidity"),
            Decimal::from(200) / Decimal::from(3)
        );

        // Initialising again loads the same mint
        assert_eq!(f.economy.initialize().await.unwrap(), mint);
    }

    #[tokio::test]
    async fn test_profitable_trade_pays_reward_to_treasury() {
        let f = fixture(EconomyConfig::default(), 1_000);

        let reward = f.economy.on_trade_outcome(profitable("250")).await.unwrap();
        assert_eq!(reward, Some(dec("17.5")));

        let status = f.economy.status();
        assert!(status.initialized);
        assert_eq!(status.trader_activity_count, 1);
        assert_eq!(status.trader_consecutive_losses, 0);
        assert_eq!(f.ledger.balance("treasury"), dec("817.5"));

        // Tiny trades still pay the minimum reward
        let reward = f.economy.on_trade_outcome(profitable("3")).await.unwrap();
        assert_eq!(reward, Some(Decimal::ONE));

    }

    #[tokio::test]
    async fn test_reward_rounds_half_cent_away_from_zero() {
        let config = EconomyConfig {
            reward_pct: dec("0.05"),
            ..EconomyConfig::default()
        };
        let f = fixture(config, 1_000);

        // 350.5 * 0.05 = 17.525
        let reward = f.economy.on_trade_outcome(profitable("350.5")).await.unwrap();
        assert_eq!(reward, Some(dec("17.53")));
        assert_eq!(f.ledger.balance("treasury"), dec("817.53"));
    }

    #[tokio::test]
    async fn test_loss_streak_warns_after_threshold() {
        let f = fixture(EconomyConfig::default(), 1_000);
        let mut rx = f.sink.subscribe();

        let failed = TradeOutcome {
            successful: false,
            profitable: false,
            notional: Decimal::TEN,
        };
        let unprofitable = TradeOutcome {
            successful: true,
            profitable: false,
            notional: Decimal::TEN,
        };

        f.economy.on_trade_outcome(unprofitable).await.unwrap();
        f.economy.on_trade_outcome(failed).await.unwrap();
        assert!(rx.try_recv().is_err());

        f.economy.on_trade_outcome(failed).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.level, NotifyLevel::Warn);
        assert_eq!(event.fields["consecutive_losses"], 3);

        assert_eq!(f.economy.status().trader_consecutive_losses, 3);
        f.economy.on_trade_outcome(profitable("100")).await.unwrap();
        assert_eq!(f.economy.status().trader_consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_activity_mint_resets_counter() {
        let config = EconomyConfig {
            activity_mint_threshold: 2,
            reward_mint_amount: Decimal::from(500),
            ..EconomyConfig::default()
        };
        let f = fixture(config, 1_000);

        // Not initialised yet: nothing to mint into
        assert!(!f.economy.maybe_mint_activity_reward().await.unwrap());

        f.economy.on_trade_outcome(profitable("10")).await.unwrap();
        assert!(!f.economy.maybe_mint_activity_reward().await.unwrap());

        f.economy.on_trade_outcome(profitable("10")).await.unwrap();
        let before = f.ledger.balance("treasury");
        assert!(f.economy.maybe_mint_activity_reward().await.unwrap());
        assert_eq!(f.ledger.balance("treasury"), before + Decimal::from(500));
        assert_eq!(f.economy.status().trader_activity_count, 0);
    }

    #[tokio::test]
    async fn test_redistribution_requires_active_wallets_and_threshold() {
        let config = EconomyConfig {
            redistribution_threshold: Decimal::from(600),
            ..EconomyConfig::default()
        };
        let f = fixture(config, 1_000);
        let mut rx = f.sink.subscribe();
        f.economy.initialize().await.unwrap();

        // Treasury at 800 after the initial split
        let per_wallet = f.economy.maybe_redistribute_from_treasury().await.unwrap();
        assert_eq!(per_wallet, Some(dec("26.67")));
        assert_eq!(f.ledger.balance("treasury"), dec("719.99"));
        assert_eq!(
            f.ledger.balance("liquidity"),
            Decimal::from(200) / Decimal::from(3) + dec("26.67")
        );

        // Two days later only the treasury and trader have been active
        f.clock.advance(Duration::hours(48));
        f.economy.on_trade_outcome(profitable("10")).await.unwrap();
        assert_eq!(f.economy.maybe_redistribute_from_treasury().await.unwrap(), None);

        let warning = loop {
            let event = rx.try_recv().unwrap();
            if event.level == NotifyLevel::Warn {
                break event;
            }
        };
        assert_eq!(warning.fields["active"], 1);
        assert_eq!(warning.fields["total"], 3);
    }

    #[tokio::test]
    async fn test_redistribution_skipped_below_threshold() {
        let f = fixture(EconomyConfig::default(), 1_000);
        f.economy.initialize().await.unwrap();
        assert_eq!(f.economy.maybe_redistribute_from_treasury().await.unwrap(), None);
        assert_eq!(f.ledger.balance("treasury"), Decimal::from(800));
    }

    #[tokio::test]
    async fn test_in_memory_ledger_rejects_overdraft() {
        let ledger = InMemoryTokenLedger::new(Decimal::TEN);
        let topology = AgentTopology::from(&TopologyConfig::default());
        let mint = ledger.initialize_economy(&topology).await.unwrap();

        assert!(ledger
            .transfer(&mint, "trader", "treasury", Decimal::ONE_HUNDRED, "too much")
            .await
            .is_err());
        assert!(ledger.balance_of("other-mint", "trader").await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_ledger_spends_exact_balance() {
        let ledger = InMemoryTokenLedger::new(Decimal::ZERO);
        let topology = AgentTopology {
            treasury_wallet: "treasury".to_string(),
            trader_wallet: "trader".to_string(),
            operational_wallets: Vec::new(),
        };
        let mint = ledger.initialize_economy(&topology).await.unwrap();
        ledger.mint_to(&mint, "trader", dec("0.3"), "seed").await.unwrap();

        ledger
            .transfer(&mint, "trader", "treasury", dec("0.1"), "first")
            .await
            .unwrap();
        ledger
            .transfer(&mint, "trader", "treasury", dec("0.2"), "second")
            .await
            .unwrap();

        assert_eq!(ledger.balance("trader"), Decimal::ZERO);
        assert_eq!(ledger.balance("treasury"), dec("0.3"));
        assert!(ledger
            .transfer(&mint, "trader", "treasury", dec("0.01"), "empty")
            .await
            .is_err());
    }
}
