//! Signal, selection, staleness and scheduler cadence configuration.

use crate::config::risk_env_config::{parse_decimal, parse_f64, parse_u64};
use crate::domain::trading::types::SignalConfig;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct TradingEnvConfig {
    // Signal defaults (per-campaign overrides come from the database).
    pub default_signal_config: SignalConfig,

    // Selection filter.
    pub min_volume_24h_usd: rust_decimal::Decimal,
    pub min_real_volume_ratio: rust_decimal::Decimal,
    pub max_spread_mid_pct: rust_decimal::Decimal,
    pub min_depth_top10_usd: rust_decimal::Decimal,
    pub min_atr_daily_pct: rust_decimal::Decimal,
    pub selection_top_n: usize,

    // Ranking weights.
    pub weight_volume: f64,
    pub weight_volatility: f64,
    pub weight_momentum: f64,
    pub weight_trend: f64,

    // Clustering.
    pub cluster_k: usize,
    pub cluster_max_members: usize,

    // Staleness thresholds, seconds.
    pub staleness_warn_secs: u64,
    pub staleness_hard_secs: u64,
    pub staleness_kill_secs: u64,
    pub quarantine_after_secs: u64,
    pub staleness_sweep_secs: u64,

    // Scheduler cadences.
    pub scheduler_tick_secs: u64,
    pub rebalance_interval_hours: u64,
    pub audit_interval_hours: u64,
}

impl TradingEnvConfig {
    pub fn from_env() -> Result<Self> {
        let default_signal_config = SignalConfig {
            enabled: true,
            long_atr_mult: parse_decimal("SIGNAL_LONG_ATR_MULT", "2")?,
            short_atr_mult: parse_decimal("SIGNAL_SHORT_ATR_MULT", "2")?,
            tp1_atr_mult: parse_decimal("SIGNAL_TP1_ATR_MULT", "1.2")?,
            tp2_atr_mult: parse_decimal("SIGNAL_TP2_ATR_MULT", "2.5")?,
            sl_atr_mult: parse_decimal("SIGNAL_SL_ATR_MULT", "1")?,
            risk_per_trade_bps: parse_decimal("SIGNAL_RISK_PER_TRADE_BPS", "20")?,
        };

        Ok(Self {
            default_signal_config,
            min_volume_24h_usd: parse_decimal("SELECT_MIN_VOLUME_24H_USD", "1000000")?,
            min_real_volume_ratio: parse_decimal("SELECT_MIN_REAL_VOLUME_RATIO", "0.5")?,
            max_spread_mid_pct: parse_decimal("SELECT_MAX_SPREAD_MID_PCT", "0.3")?,
            min_depth_top10_usd: parse_decimal("SELECT_MIN_DEPTH_TOP10_USD", "50000")?,
            min_atr_daily_pct: parse_decimal("SELECT_MIN_ATR_DAILY_PCT", "1")?,
            selection_top_n: parse_u64("SELECT_TOP_N", 50)? as usize,
            weight_volume: parse_f64("RANK_WEIGHT_VOLUME", 0.3)?,
            weight_volatility: parse_f64("RANK_WEIGHT_VOLATILITY", 0.2)?,
            weight_momentum: parse_f64("RANK_WEIGHT_MOMENTUM", 0.3)?,
            weight_trend: parse_f64("RANK_WEIGHT_TREND", 0.2)?,
            cluster_k: parse_u64("CLUSTER_K", 10)? as usize,
            cluster_max_members: parse_u64("CLUSTER_MAX_MEMBERS", 10)? as usize,
            staleness_warn_secs: parse_u64("STALENESS_WARN_SECS", 4)?,
            staleness_hard_secs: parse_u64("STALENESS_HARD_SECS", 12)?,
            staleness_kill_secs: parse_u64("STALENESS_KILL_SECS", 60)?,
            quarantine_after_secs: parse_u64("QUARANTINE_AFTER_SECS", 300)?,
            staleness_sweep_secs: parse_u64("STALENESS_SWEEP_SECS", 2)?,
            scheduler_tick_secs: parse_u64("SCHEDULER_TICK_SECS", 5)?,
            rebalance_interval_hours: parse_u64("REBALANCE_INTERVAL_HOURS", 8)?,
            audit_interval_hours: parse_u64("AUDIT_INTERVAL_HOURS", 24)?,
        })
    }
}
