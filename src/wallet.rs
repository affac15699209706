//! Wallet balance lookups

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Read-only view of a custody service. Keys never leave it.
#[async_trait]
pub trait WalletQuery: Send + Sync {
    async fn get_portfolio(&self, wallet_id: &str) -> anyhow::Result<WalletBalances>;
}

/// Balances for one wallet, in UI units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletBalances {
    pub wallet_id: String,
    pub base_balance: f64,
    pub quote_balance: f64,
    #[serde(default)]
    pub tokens: Vec<TokenBalance>,
}

impl WalletBalances {
    /// UI balance of an extra token, 0 if the wallet does not hold it
    pub fn token_balance(&self, mint: &str) -> f64 {
        self.tokens
            .iter()
            .filter(|t| t.mint == mint)
            .map(|t| t.ui_amount)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub mint: String,
    pub ui_amount: f64,
    pub decimals: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_balance_defaults_to_zero() {
        let balances = WalletBalances {
            wallet_id: "trader".to_string(),
            base_balance: 1.0,
            quote_balance: 2.0,
            tokens: vec![TokenBalance {
                mint: "AUX1".to_string(),
                ui_amount: 42.5,
                decimals: 6,
            }],
        };
        assert_eq!(balances.token_balance("AUX1"), 42.5);
        assert_eq!(balances.token_balance("AUX2"), 0.0);
    }

    #[test]
    fn test_balances_deserialize_without_tokens() {
        let balances: WalletBalances = serde_json::from_str(
            r#"{"wallet_id": "trader", "base_balance": 3.5, "quote_balance": 120.0}"#,
        )
        .unwrap();
        assert!(balances.tokens.is_empty());
        assert_eq!(balances.base_balance, 3.5);
    }
}
