use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Sizing profile of the investor behind a campaign. Controls how large a
/// universe the automatic selection builds relative to the position cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestorProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl InvestorProfile {
    /// Multiplier applied to `max_open_positions` when sizing the
    /// automatically selected universe.
    pub fn universe_multiplier(&self) -> usize {
        match self {
            InvestorProfile::Conservative => 2,
            InvestorProfile::Moderate => 3,
            InvestorProfile::Aggressive => 3,
        }
    }
}

impl fmt::Display for InvestorProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestorProfile::Conservative => "conservative",
            InvestorProfile::Moderate => "moderate",
            InvestorProfile::Aggressive => "aggressive",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for InvestorProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" | "c" => Ok(InvestorProfile::Conservative),
            "moderate" | "m" => Ok(InvestorProfile::Moderate),
            "aggressive" | "a" => Ok(InvestorProfile::Aggressive),
            other => anyhow::bail!("Invalid investor profile: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    Active,
    Paused,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            other => anyhow::bail!("Invalid campaign status: {}", other),
        }
    }
}

/// A trading campaign: one portfolio, one risk budget, one tradable set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    pub investor_profile: InvestorProfile,
    pub initial_capital: Decimal,
    pub max_open_positions: usize,
    /// Campaign-level pair block threshold, in R-units.
    pub max_loss_per_pair_r: Decimal,
    /// Daily loss that pauses the campaign, as a positive percentage.
    pub daily_loss_limit_pct: Decimal,
    /// 30d drawdown that pauses the campaign, as a positive percentage.
    pub max_drawdown_pct: Decimal,
    pub cooldown_minutes_after_cb: i64,
}

/// Mutable per-campaign risk state, loaded and persisted every scheduler
/// tick. Mutations within a tick are serialized per campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRiskState {
    pub campaign_id: String,
    pub current_equity: Decimal,
    pub hwm_equity: Decimal,
    pub daily_pnl: Decimal,
    pub daily_loss_pct: Decimal,
    pub current_dd_pct: Decimal,
    pub max_dd_pct: Decimal,
    /// Cumulative loss per pair in R-units (negative = losing).
    pub loss_in_r_by_pair: HashMap<String, Decimal>,
    pub trades_today: u32,
    pub positions_open: u32,
    pub cb_pair_triggered: Vec<String>,
    pub cb_daily_triggered: bool,
    pub cb_campaign_triggered: bool,
    pub cb_cooldown_until_ms: Option<i64>,
    pub last_daily_reset: NaiveDate,
    pub last_rebalance_ms: i64,
    pub last_audit_ms: i64,
    pub current_tradable_set: Vec<String>,
    /// Last ~10 error strings, newest first, for the monitoring path.
    pub recent_errors: Vec<String>,
}

impl CampaignRiskState {
    pub const MAX_RECENT_ERRORS: usize = 10;

    pub fn new(campaign_id: &str, equity: Decimal, today: NaiveDate) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            current_equity: equity,
            hwm_equity: equity,
            daily_pnl: Decimal::ZERO,
            daily_loss_pct: Decimal::ZERO,
            current_dd_pct: Decimal::ZERO,
            max_dd_pct: Decimal::ZERO,
            loss_in_r_by_pair: HashMap::new(),
            trades_today: 0,
            positions_open: 0,
            cb_pair_triggered: Vec::new(),
            cb_daily_triggered: false,
            cb_campaign_triggered: false,
            cb_cooldown_until_ms: None,
            last_daily_reset: today,
            last_rebalance_ms: 0,
            last_audit_ms: 0,
            current_tradable_set: Vec::new(),
            recent_errors: Vec::new(),
        }
    }

    /// Applies a closed trade: equity, daily PnL, drawdown, high-water
    /// mark, per-pair R bookkeeping and the day's trade counter.
    pub fn apply_trade(&mut self, symbol: &str, realized_pnl: Decimal, r_multiple: Option<Decimal>) {
        self.current_equity += realized_pnl;
        self.daily_pnl += realized_pnl;
        self.trades_today += 1;

        if self.current_equity > self.hwm_equity {
            self.hwm_equity = self.current_equity;
        }

        if self.hwm_equity > Decimal::ZERO {
            self.current_dd_pct = (self.hwm_equity - self.current_equity) / self.hwm_equity
                * rust_decimal_macros::dec!(100);
            if self.current_dd_pct > self.max_dd_pct {
                self.max_dd_pct = self.current_dd_pct;
            }
        }

        let day_base = self.current_equity - self.daily_pnl;
        if day_base > Decimal::ZERO && self.daily_pnl < Decimal::ZERO {
            self.daily_loss_pct = -self.daily_pnl / day_base * rust_decimal_macros::dec!(100);
        } else {
            self.daily_loss_pct = Decimal::ZERO;
        }

        if let Some(r) = r_multiple {
            *self
                .loss_in_r_by_pair
                .entry(symbol.to_string())
                .or_insert(Decimal::ZERO) += r;
        }
    }

    /// Whether the per-pair R budget blocks this symbol.
    pub fn pair_blocked(&self, symbol: &str, max_loss_per_pair_r: Decimal) -> bool {
        if self.cb_pair_triggered.iter().any(|s| s == symbol) {
            return true;
        }
        self.loss_in_r_by_pair
            .get(symbol)
            .map(|r| *r <= -max_loss_per_pair_r)
            .unwrap_or(false)
    }

    /// Resets daily counters at the UTC day boundary.
    pub fn daily_reset(&mut self, today: NaiveDate) {
        self.daily_pnl = Decimal::ZERO;
        self.daily_loss_pct = Decimal::ZERO;
        self.trades_today = 0;
        self.cb_daily_triggered = false;
        self.last_daily_reset = today;
    }

    pub fn record_error(&mut self, error: String) {
        self.recent_errors.insert(0, error);
        self.recent_errors.truncate(Self::MAX_RECENT_ERRORS);
    }

    pub fn in_cooldown(&self, now_ms: i64) -> bool {
        self.cb_cooldown_until_ms
            .map(|until| now_ms < until)
            .unwrap_or(false)
    }
}

/// Daily performance report persisted by the 24h audit. Statistics that
/// need at least 5 samples (VaR/ES) are `None` below the floor and land
/// as SQL NULLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub campaign_id: String,
    pub report_date: NaiveDate,
    pub trades: u32,
    pub hit_rate: Option<Decimal>,
    pub payoff: Option<Decimal>,
    pub expectancy_r: Option<Decimal>,
    pub var95_r: Option<Decimal>,
    pub es95_r: Option<Decimal>,
    pub avg_slippage_bps: Option<Decimal>,
    pub daily_pnl: Decimal,
    pub created_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state() -> CampaignRiskState {
        CampaignRiskState::new(
            "camp-1",
            dec!(100_000),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
    }

    #[test]
    fn test_apply_trade_updates_equity_and_hwm() {
        let mut s = state();
        s.apply_trade("BTC/USD", dec!(500), Some(dec!(2.5)));
        assert_eq!(s.current_equity, dec!(100_500));
        assert_eq!(s.hwm_equity, dec!(100_500));
        assert_eq!(s.trades_today, 1);
        assert_eq!(s.current_dd_pct, Decimal::ZERO);

        s.apply_trade("BTC/USD", dec!(-1005), Some(dec!(-5.025)));
        assert_eq!(s.current_equity, dec!(99_495));
        assert_eq!(s.hwm_equity, dec!(100_500));
        assert_eq!(s.current_dd_pct, dec!(1));
        assert_eq!(
            *s.loss_in_r_by_pair.get("BTC/USD").unwrap(),
            dec!(-2.525)
        );
    }

    #[test]
    fn test_pair_blocked_on_r_budget() {
        let mut s = state();
        s.apply_trade("SOL/USD", dec!(-40), Some(dec!(-2)));
        assert!(!s.pair_blocked("SOL/USD", dec!(3)));
        s.apply_trade("SOL/USD", dec!(-40), Some(dec!(-2)));
        assert!(s.pair_blocked("SOL/USD", dec!(3)));
        assert!(!s.pair_blocked("ETH/USD", dec!(3)));
    }

    #[test]
    fn test_daily_reset_clears_day_counters_only() {
        let mut s = state();
        s.apply_trade("BTC/USD", dec!(-2000), Some(dec!(-1)));
        assert!(s.daily_loss_pct > Decimal::ZERO);

        let next_day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        s.daily_reset(next_day);
        assert_eq!(s.daily_pnl, Decimal::ZERO);
        assert_eq!(s.trades_today, 0);
        assert_eq!(s.last_daily_reset, next_day);
        // Drawdown and R bookkeeping survive the day boundary.
        assert!(s.current_dd_pct > Decimal::ZERO);
        assert!(s.loss_in_r_by_pair.contains_key("BTC/USD"));
    }

    #[test]
    fn test_recent_errors_bounded() {
        let mut s = state();
        for i in 0..15 {
            s.record_error(format!("error {}", i));
        }
        assert_eq!(s.recent_errors.len(), CampaignRiskState::MAX_RECENT_ERRORS);
        assert_eq!(s.recent_errors[0], "error 14");
    }
}
