//! HTTP clients for the live execution gateway, wallet service and token
//! ledger

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::economy::{AgentTopology, TokenLedger};
use crate::executor::{ExecutionService, Quote, QuoteRequest, SwapExecution, SwapRequest};
use crate::wallet::{WalletBalances, WalletQuery};

/// JSON-over-HTTP plumbing shared by the service clients
#[derive(Clone)]
struct JsonClient {
    client: Client,
    base_url: String,
}

impl JsonClient {
    fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> anyhow::Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("{} failed: {} - {}", what, status, text))
        }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> anyhow::Result<T> {
        let url = self.url(path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(anyhow::anyhow!("{} failed: {} - {}", what, status, text))
        }
    }
}

/// Execution gateway that quotes, signs and broadcasts swaps
pub struct HttpExecutionService {
    http: JsonClient,
}

impl HttpExecutionService {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    async fn execute_swap(&self, request: &SwapRequest) -> anyhow::Result<SwapExecution> {
        self.http.post("/v1/swap", request, "Swap execution").await
    }

    async fn fetch_quote(&self, request: &QuoteRequest) -> anyhow::Result<Quote> {
        self.http.post("/v1/quote", request, "Quote").await
    }
}

/// Custody service balance lookups
pub struct HttpWalletService {
    http: JsonClient,
}

impl HttpWalletService {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl WalletQuery for HttpWalletService {
    async fn get_portfolio(&self, wallet_id: &str) -> anyhow::Result<WalletBalances> {
        self.http
            .get(&format!("/v1/wallets/{}/portfolio", wallet_id), "Portfolio lookup")
            .await
    }
}

/// Reward token service
pub struct HttpTokenLedger {
    http: JsonClient,
}

impl HttpTokenLedger {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Ok(Self {
            http: JsonClient::new(base_url, timeout_secs)?,
        })
    }
}

#[async_trait]
impl TokenLedger for HttpTokenLedger {
    async fn initialize_economy(&self, topology: &AgentTopology) -> anyhow::Result<String> {
        let resp: MintResponse = self
            .http
            .post("/v1/economy/initialize", topology, "Economy initialization")
            .await?;
        Ok(resp.mint)
    }

    async fn transfer(
        &self,
        mint: &str,
        from: &str,
        to: &str,
        amount: Decimal,
        reason: &str,
    ) -> anyhow::Result<String> {
        let req = TransferRequest {
            mint,
            from,
            to,
            amount,
            reason,
        };
        let resp: SignatureResponse = self
            .http
            .post("/v1/economy/transfer", &req, "Reward transfer")
            .await?;
        Ok(resp.signature)
    }

    async fn mint_to(&self, mint: &str, wallet: &str, amount: Decimal, reason: &str) -> anyhow::Result<String> {
        let req = MintToRequest {
            mint,
            wallet,
            amount,
            reason,
        };
        let resp: SignatureResponse = self
            .http
            .post("/v1/economy/mint", &req, "Reward mint")
            .await?;
        Ok(resp.signature)
    }

    async fn balance_of(&self, mint: &str, wallet: &str) -> anyhow::Result<Decimal> {
        let resp: BalanceResponse = self
            .http
            .get(
                &format!("/v1/economy/{}/balances/{}", mint, wallet),
                "Reward balance lookup",
            )
            .await?;
        Ok(resp.amount)
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    mint: &'a str,
    from: &'a str,
    to: &'a str,
    amount: Decimal,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct MintToRequest<'a> {
    mint: &'a str,
    wallet: &'a str,
    amount: Decimal,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    mint: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    signature: String,
}

/// Accepts the amount as a JSON number or string
#[derive(Debug, Deserialize)]
struct BalanceResponse {
    amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let http = JsonClient::new("http://localhost:8090/", 5).unwrap();
        assert_eq!(http.url("/v1/swap"), "http://localhost:8090/v1/swap");
    }

    #[test]
    fn test_transfer_request_shape() {
        let req = TransferRequest {
            mint: "m",
            from: "trader",
            to: "treasury",
            amount: Decimal::new(15, 1),
            reason: "reward",
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["from"], "trader");
        // Reward amounts travel as exact decimal strings
        assert_eq!(value["amount"], "1.5");
    }

    #[test]
    fn test_balance_response_accepts_number_or_string() {
        let from_number: BalanceResponse = serde_json::from_str(r#"{"amount": 0.3}"#).unwrap();
        let from_string: BalanceResponse = serde_json::from_str(r#"{"amount": "0.3"}"#).unwrap();
        assert_eq!(from_number.amount, Decimal::new(3, 1));
        assert_eq!(from_string.amount, Decimal::new(3, 1));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        // Port 9 (discard) is never serving HTTP in test environments
        let wallet = HttpWalletService::new("http://127.0.0.1:9", 1).unwrap();
        assert!(wallet.get_portfolio("trader").await.is_err());
    }
}
