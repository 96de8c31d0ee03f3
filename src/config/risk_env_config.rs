//! Circuit breaker and position risk configuration from environment
//! variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    // Asset breaker: both conditions must hold to trigger.
    pub asset_consecutive_losses: u32,
    pub asset_cumulative_loss_usd: Decimal,
    pub asset_auto_reset_hours: i64,

    // Cluster breaker.
    pub cluster_loss_pct_of_capital: Decimal,
    pub cluster_window_hours: i64,
    pub cluster_auto_reset_hours: i64,

    // Global breaker.
    pub global_daily_loss_pct: Decimal,

    /// Cadence of the auto-reset job.
    pub auto_reset_interval_secs: u64,

    // Sizing.
    pub max_position_pct_capital_per_pair: Decimal,
    pub min_order_notional_usd: Decimal,
    /// Fee fraction modeled into the sizing denominator (taker).
    pub fee_rate: Decimal,
    /// Slippage fraction modeled into the sizing denominator.
    pub slippage_rate: Decimal,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            asset_consecutive_losses: parse_u32("CB_ASSET_CONSECUTIVE_LOSSES", 2)?,
            asset_cumulative_loss_usd: parse_decimal("CB_ASSET_CUMULATIVE_LOSS_USD", "500")?,
            asset_auto_reset_hours: parse_i64("CB_ASSET_AUTO_RESET_HOURS", 24)?,
            cluster_loss_pct_of_capital: parse_decimal("CB_CLUSTER_LOSS_PCT", "5")?,
            cluster_window_hours: parse_i64("CB_CLUSTER_WINDOW_HOURS", 24)?,
            cluster_auto_reset_hours: parse_i64("CB_CLUSTER_AUTO_RESET_HOURS", 12)?,
            global_daily_loss_pct: parse_decimal("CB_GLOBAL_DAILY_LOSS_PCT", "5")?,
            auto_reset_interval_secs: parse_u64("CB_AUTO_RESET_INTERVAL_SECS", 300)?,
            max_position_pct_capital_per_pair: parse_decimal("MAX_POSITION_PCT_PER_PAIR", "10")?,
            min_order_notional_usd: parse_decimal("MIN_ORDER_NOTIONAL_USD", "10")?,
            fee_rate: parse_decimal("SIZING_FEE_RATE", "0.0016")?,
            slippage_rate: parse_decimal("SIZING_SLIPPAGE_RATE", "0.0004")?,
        })
    }
}

pub(crate) fn parse_u32(key: &str, default: u32) -> Result<u32> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    match env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("Failed to parse {}", key)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).with_context(|| format!("Failed to parse {} as decimal", key))
}
