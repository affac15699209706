//! Swap execution contract and the in-process paper exchange

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

use crate::amount::{decimal_from_f64, from_raw_amount, to_raw_amount};
use crate::config::AgentConfig;
use crate::wallet::{TokenBalance, WalletBalances, WalletQuery};

/// Swap to quote, sign and broadcast. Raw amounts are in the input mint's
/// smallest unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub wallet_id: String,
    pub input_mint: String,
    pub output_mint: String,
    pub amount_raw: u64,
    pub slippage_bps: u32,
    pub max_allowed_slippage_bps: u32,
    /// Decision reason, carried into the execution log
    pub reason_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapExecution {
    pub signature: String,
    pub route: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Slippage actually realised
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount_raw: u64,
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub route: String,
}

#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn execute_swap(&self, request: &SwapRequest) -> anyhow::Result<SwapExecution>;

    async fn fetch_quote(&self, request: &QuoteRequest) -> anyhow::Result<Quote>;
}

#[derive(Debug, Clone, Copy)]
struct PaperAsset {
    decimals: u8,
    /// Price of one UI unit in quote
    price: Decimal,
}

struct PaperBook {
    wallets: HashMap<String, HashMap<String, Decimal>>,
    rng: StdRng,
    swaps: u64,
}

impl PaperBook {
    fn holding(&self, wallet_id: &str, mint: &str) -> Decimal {
        self.wallets
            .get(wallet_id)
            .and_then(|w| w.get(mint))
            .copied()
            .unwrap_or_default()
    }
}

/// Fills swaps against fixed prices with random slippage. Implements both
/// the execution and wallet sides so paper mode needs no network.
pub struct PaperExchange {
    base_mint: String,
    quote_mint: String,
    assets: HashMap<String, PaperAsset>,
    book: Mutex<PaperBook>,
}

impl PaperExchange {
    pub fn new(
        base_mint: &str,
        base_decimals: u8,
        quote_mint: &str,
        quote_decimals: u8,
        base_price: Decimal,
    ) -> Self {
        let mut assets = HashMap::new();
        assets.insert(
            base_mint.to_string(),
            PaperAsset {
                decimals: base_decimals,
                price: base_price,
            },
        );
        assets.insert(
            quote_mint.to_string(),
            PaperAsset {
                decimals: quote_decimals,
                price: Decimal::ONE,
            },
        );

        Self {
            base_mint: base_mint.to_string(),
            quote_mint: quote_mint.to_string(),
            assets,
            book: Mutex::new(PaperBook {
                wallets: HashMap::new(),
                rng: StdRng::from_entropy(),
                swaps: 0,
            }),
        }
    }

    /// Paper exchange for the configured pair, with the trader wallet funded.
    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let agent = &config.agent;
        let base_price = decimal_from_f64(agent.fallback_base_price).ok_or_else(|| {
            anyhow::anyhow!("Invalid paper base price {}", agent.fallback_base_price)
        })?;

        let mut exchange = Self::new(
            &agent.base_mint,
            agent.base_decimals,
            &agent.quote_mint,
            agent.quote_decimals,
            base_price,
        );
        if let Some(aux) = &agent.aux_pair {
            exchange = exchange
                .with_asset(&aux.one_mint, aux.decimals, Decimal::ONE)
                .with_asset(&aux.two_mint, aux.decimals, Decimal::ONE);
        }

        let trader = &config.topology.trader_wallet;
        exchange.fund(trader, &agent.base_mint, config.services.paper_base_balance);
        exchange.fund(trader, &agent.quote_mint, config.services.paper_quote_balance);
        Ok(exchange)
    }

    /// Register an extra tradeable token priced in quote
    pub fn with_asset(mut self, mint: &str, decimals: u8, price: Decimal) -> Self {
        self.assets
            .insert(mint.to_string(), PaperAsset { decimals, price });
        self
    }

    /// Deterministic slippage for tests
    pub fn with_seed(self, seed: u64) -> Self {
        self.lock().rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Add `amount` UI units of `mint` to a wallet
    pub fn fund(&self, wallet_id: &str, mint: &str, amount: Decimal) {
        let mut book = self.lock();
        *book
            .wallets
            .entry(wallet_id.to_string())
            .or_default()
            .entry(mint.to_string())
            .or_default() += amount;
    }

    pub fn balance(&self, wallet_id: &str, mint: &str) -> Decimal {
        self.lock().holding(wallet_id, mint)
    }

    pub fn swap_count(&self) -> u64 {
        self.lock().swaps
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn asset(&self, mint: &str) -> anyhow::Result<PaperAsset> {
        self.assets
            .get(mint)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Unknown mint {}", mint))
    }

    /// UI output for `in_ui` of input before slippage
    fn convert(
        &self,
        input: PaperAsset,
        output: PaperAsset,
        in_ui: Decimal,
    ) -> anyhow::Result<Decimal> {
        if output.price <= Decimal::ZERO {
            return Err(anyhow::anyhow!("No paper price for output token"));
        }
        in_ui
            .checked_mul(input.price)
            .and_then(|value| value.checked_div(output.price))
            .ok_or_else(|| anyhow::anyhow!("Paper conversion of {} overflows", in_ui))
    }
}

#[async_trait]
impl ExecutionService for PaperExchange {
    async fn execute_swap(&self, request: &SwapRequest) -> anyhow::Result<SwapExecution> {
        if request.slippage_bps > request.max_allowed_slippage_bps {
            return Err(anyhow::anyhow!(
                "Requested slippage {} bps exceeds allowed {} bps",
                request.slippage_bps,
                request.max_allowed_slippage_bps
            ));
        }

        let input = self.asset(&request.input_mint)?;
        let output = self.asset(&request.output_mint)?;
        let in_ui = from_raw_amount(request.amount_raw, input.decimals)?;
        let quoted_out = self.convert(input, output, in_ui)?;

        let mut book = self.lock();
        let available = book.holding(&request.wallet_id, &request.input_mint);
        if available < in_ui {
            return Err(anyhow::anyhow!(
                "Insufficient balance: {} has {} of {}, needs {}",
                request.wallet_id,
                available,
                request.input_mint,
                in_ui
            ));
        }

        let slippage_bps = book.rng.gen_range(0..=request.slippage_bps);
        let kept = Decimal::ONE - Decimal::from(slippage_bps) / Decimal::from(10_000u32);
        let out_amount = to_raw_amount(quoted_out * kept, output.decimals)?;
        let out_ui = from_raw_amount(out_amount, output.decimals)?;

        let wallet = book.wallets.entry(request.wallet_id.clone()).or_default();
        *wallet.entry(request.input_mint.clone()).or_default() -= in_ui;
        *wallet.entry(request.output_mint.clone()).or_default() += out_ui;
        book.swaps += 1;

        let signature = format!("paper-{}", uuid::Uuid::new_v4());
        info!(
            "Paper swap #{}: {} {} -> {} {} ({} bps)",
            book.swaps, in_ui, request.input_mint, out_ui, request.output_mint, slippage_bps
        );

        Ok(SwapExecution {
            signature,
            route: "paper".to_string(),
            in_amount: request.amount_raw,
            out_amount,
            slippage_bps,
        })
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> anyhow::Result<Quote> {
        let input = self.asset(&request.input_mint)?;
        let output = self.asset(&request.output_mint)?;
        let in_ui = from_raw_amount(request.amount_raw, input.decimals)?;
        let out_ui = self.convert(input, output, in_ui)?;
        let out_amount = to_raw_amount(out_ui, output.decimals)?;

        debug!(
            "Paper quote {} {} -> {} {}",
            request.amount_raw, request.input_mint, out_amount, request.output_mint
        );

        Ok(Quote {
            in_amount: request.amount_raw,
            out_amount,
            price_impact_pct: 0.0,
            route: "paper".to_string(),
        })
    }
}

#[async_trait]
impl WalletQuery for PaperExchange {
    async fn get_portfolio(&self, wallet_id: &str) -> anyhow::Result<WalletBalances> {
        let book = self.lock();
        let amount = |mint: &str| book.holding(wallet_id, mint).to_f64().unwrap_or_default();

        let mut tokens: Vec<TokenBalance> = self
            .assets
            .iter()
            .filter(|(mint, _)| **mint != self.base_mint && **mint != self.quote_mint)
            .map(|(mint, asset)| TokenBalance {
                mint: mint.clone(),
                ui_amount: amount(mint),
                decimals: asset.decimals,
            })
            .collect();
        tokens.sort_by(|a, b| a.mint.cmp(&b.mint));

        Ok(WalletBalances {
            wallet_id: wallet_id.to_string(),
            base_balance: amount(&self.base_mint),
            quote_balance: amount(&self.quote_mint),
            tokens,
        })
    }
}
