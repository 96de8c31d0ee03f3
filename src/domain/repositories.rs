//! Repository traits for durable state.
//!
//! SQLite implementations live under `infrastructure::persistence`; the
//! in-memory implementations under `infrastructure::repositories` back the
//! test suite. Position open/close are single operations here because they
//! must be atomic with their side effects (OCO orders, counters).

use crate::domain::market::{Bar, Ranking, SymbolMeta, Timeframe};
use crate::domain::risk::{Breaker, BreakerEvent, Campaign, CampaignRiskState, DailyReport};
use crate::domain::trading::types::{
    Order, OrderStatus, Position, Signal, SignalConfig, SignalStatus, Trade,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Durable bars (1m and 1h frames).
#[async_trait]
pub trait BarRepository: Send + Sync {
    /// Upserts a bar; persisted bars are non-overlapping per
    /// (symbol, frame) keyed by `bar_ts`.
    async fn save(&self, frame: Timeframe, bar: &Bar) -> Result<()>;

    /// Bars with `bar_ts` in `[start_ts, end_ts)`, ascending.
    async fn bars_range(
        &self,
        symbol: &str,
        frame: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Bar>>;

    /// The most recent `limit` bars, ascending.
    async fn latest_bars(&self, symbol: &str, frame: Timeframe, limit: usize) -> Result<Vec<Bar>>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn save(&self, signal: &Signal) -> Result<()>;
    async fn update_status(
        &self,
        signal_id: &str,
        status: SignalStatus,
        executed_at_ms: Option<i64>,
    ) -> Result<()>;
    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Signal>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &Order) -> Result<()>;
    async fn update(&self, order: &Order) -> Result<()>;
    async fn find(&self, order_id: &str) -> Result<Option<Order>>;
    async fn open_orders(&self, campaign_id: &str) -> Result<Vec<Order>>;
    /// Both legs of an OCO group.
    async fn orders_in_group(&self, oco_group_id: &str) -> Result<Vec<Order>>;
    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()>;
}

/// Positions with transactional open/close. Opening inserts the position
/// and both OCO orders and bumps the campaign counters in one unit;
/// closing removes the position, cancels the protective orders and
/// records the trade in one unit.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn open_position(
        &self,
        position: &Position,
        sl_order: &Order,
        tp_order: &Order,
    ) -> Result<()>;

    async fn close_position(
        &self,
        position_id: &str,
        trade: &Trade,
        cancel_order_ids: &[String],
    ) -> Result<()>;

    async fn open_positions(&self, campaign_id: &str) -> Result<Vec<Position>>;
    async fn find(&self, campaign_id: &str, symbol: &str) -> Result<Option<Position>>;
    async fn update_mark(&self, position: &Position) -> Result<()>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn trades_between(
        &self,
        campaign_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Trade>>;
    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Trade>>;
}

#[async_trait]
pub trait RankingRepository: Send + Sync {
    /// Persists a full selection run (ranks are a permutation of 1..=N).
    async fn save_run(&self, rankings: &[Ranking]) -> Result<()>;
    /// Rows of the most recent run, rank ascending.
    async fn latest_run(&self) -> Result<Vec<Ranking>>;
}

#[async_trait]
pub trait SymbolRepository: Send + Sync {
    async fn upsert(&self, meta: &SymbolMeta) -> Result<()>;
    async fn active_symbols(&self) -> Result<Vec<SymbolMeta>>;
    async fn set_active(&self, symbol_id: &str, active: bool) -> Result<()>;
}

#[async_trait]
pub trait BreakerRepository: Send + Sync {
    async fn upsert(&self, campaign_id: &str, breaker: &Breaker) -> Result<()>;
    async fn load_all(&self, campaign_id: &str) -> Result<Vec<Breaker>>;
}

#[async_trait]
pub trait BreakerEventRepository: Send + Sync {
    async fn append(&self, event: &BreakerEvent) -> Result<()>;
    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<BreakerEvent>>;
}

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn active_campaigns(&self) -> Result<Vec<Campaign>>;
    async fn update_status(&self, campaign_id: &str, status: &str) -> Result<()>;

    async fn load_risk_state(&self, campaign_id: &str) -> Result<Option<CampaignRiskState>>;
    async fn save_risk_state(&self, state: &CampaignRiskState) -> Result<()>;

    /// Per-(campaign, symbol) override, if configured.
    async fn signal_config(&self, campaign_id: &str, symbol: &str)
    -> Result<Option<SignalConfig>>;

    async fn save_daily_report(&self, report: &DailyReport) -> Result<()>;
    async fn daily_report(
        &self,
        campaign_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<DailyReport>>;
}
