//! Exchange and storage connectivity configuration.
//!
//! Live trading requires `EXCHANGE_API_KEY`/`EXCHANGE_API_SECRET`; paper
//! mode runs without them. Missing secrets are only fatal when a live
//! order would actually be signed.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ExchangeEnvConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub rest_base_url: String,
    pub ws_url: String,
    pub redis_url: String,
    pub database_url: String,
    pub encryption_key: Option<String>,
    /// Process-wide REST budget, requests per second.
    pub rest_rate_budget_per_sec: u32,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Result<Self> {
        let rest_rate_budget_per_sec = env::var("EXCHANGE_RATE_BUDGET_PER_SEC")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<u32>()
            .context("Failed to parse EXCHANGE_RATE_BUDGET_PER_SEC")?;

        Ok(Self {
            api_key: env::var("EXCHANGE_API_KEY").ok().filter(|s| !s.is_empty()),
            api_secret: env::var("EXCHANGE_API_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            rest_base_url: env::var("EXCHANGE_REST_URL")
                .unwrap_or_else(|_| "https://api.kraken.com".to_string()),
            ws_url: env::var("EXCHANGE_WS_URL")
                .unwrap_or_else(|_| "wss://ws.kraken.com".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tidebot.db".to_string()),
            encryption_key: env::var("ENCRYPTION_KEY").ok().filter(|s| !s.is_empty()),
            rest_rate_budget_per_sec,
        })
    }

    /// Fails unless both live-trading credentials are present.
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => anyhow::bail!(
                "EXCHANGE_API_KEY and EXCHANGE_API_SECRET are required for live trading"
            ),
        }
    }
}
