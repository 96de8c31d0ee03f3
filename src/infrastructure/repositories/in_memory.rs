//! In-memory repository implementations.
//!
//! Thread-safe stand-ins for the sqlite repositories, used by unit and
//! integration tests and by ad-hoc paper runs without a database. The
//! trading repositories share one state block so position open/close can
//! honor the same atomicity contract as the SQL transactions (a single
//! lock guards the whole mutation).

use crate::domain::market::{Bar, Ranking, SymbolMeta, Timeframe};
use crate::domain::repositories::{
    BarRepository, BreakerEventRepository, BreakerRepository, CampaignRepository,
    OrderRepository, PositionRepository, RankingRepository, SignalRepository, SymbolRepository,
    TradeRepository,
};
use crate::domain::risk::{Breaker, BreakerEvent, Campaign, CampaignRiskState, DailyReport};
use crate::domain::trading::types::{
    Order, OrderStatus, Position, Signal, SignalConfig, SignalStatus, Trade,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct InMemoryBarRepository {
    bars: RwLock<HashMap<(Timeframe, String), BTreeMap<i64, Bar>>>,
}

impl InMemoryBarRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BarRepository for InMemoryBarRepository {
    async fn save(&self, frame: Timeframe, bar: &Bar) -> Result<()> {
        self.bars
            .write()
            .await
            .entry((frame, bar.symbol.clone()))
            .or_default()
            .insert(bar.bar_ts, bar.clone());
        Ok(())
    }

    async fn bars_range(
        &self,
        symbol: &str,
        frame: Timeframe,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<Bar>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(frame, symbol.to_string()))
            .map(|by_ts| {
                by_ts
                    .range(start_ts..end_ts)
                    .map(|(_, bar)| bar.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_bars(&self, symbol: &str, frame: Timeframe, limit: usize) -> Result<Vec<Bar>> {
        let bars = self.bars.read().await;
        Ok(bars
            .get(&(frame, symbol.to_string()))
            .map(|by_ts| {
                let mut tail: Vec<Bar> = by_ts.values().rev().take(limit).cloned().collect();
                tail.reverse();
                tail
            })
            .unwrap_or_default())
    }
}

/// Shared state for the trading repositories; one lock makes position
/// open/close atomic with their order and trade side effects.
#[derive(Default)]
pub struct InMemoryTradingState {
    inner: Mutex<TradingStateInner>,
}

#[derive(Default)]
struct TradingStateInner {
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    trades: Vec<Trade>,
}

impl InMemoryTradingState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub struct InMemoryPositionRepository {
    state: Arc<InMemoryTradingState>,
}

impl InMemoryPositionRepository {
    pub fn new(state: Arc<InMemoryTradingState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn open_position(
        &self,
        position: &Position,
        sl_order: &Order,
        tp_order: &Order,
    ) -> Result<()> {
        let mut inner = self.state.inner.lock().await;
        let duplicate = inner
            .positions
            .values()
            .any(|p| p.campaign_id == position.campaign_id && p.symbol == position.symbol);
        if duplicate {
            anyhow::bail!(
                "position already open for {}:{}",
                position.campaign_id,
                position.symbol
            );
        }
        inner
            .positions
            .insert(position.id.clone(), position.clone());
        inner.orders.insert(sl_order.id.clone(), sl_order.clone());
        inner.orders.insert(tp_order.id.clone(), tp_order.clone());
        Ok(())
    }

    async fn close_position(
        &self,
        position_id: &str,
        trade: &Trade,
        cancel_order_ids: &[String],
    ) -> Result<()> {
        let mut inner = self.state.inner.lock().await;
        if inner.positions.remove(position_id).is_none() {
            anyhow::bail!("position {} not found", position_id);
        }
        for order_id in cancel_order_ids {
            if let Some(order) = inner.orders.get_mut(order_id) {
                order.status = OrderStatus::Cancelled;
            }
        }
        inner.trades.push(trade.clone());
        Ok(())
    }

    async fn open_positions(&self, campaign_id: &str) -> Result<Vec<Position>> {
        let inner = self.state.inner.lock().await;
        let mut positions: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| p.campaign_id == campaign_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.opened_at_ms);
        Ok(positions)
    }

    async fn find(&self, campaign_id: &str, symbol: &str) -> Result<Option<Position>> {
        let inner = self.state.inner.lock().await;
        Ok(inner
            .positions
            .values()
            .find(|p| p.campaign_id == campaign_id && p.symbol == symbol)
            .cloned())
    }

    async fn update_mark(&self, position: &Position) -> Result<()> {
        let mut inner = self.state.inner.lock().await;
        if let Some(stored) = inner.positions.get_mut(&position.id) {
            stored.current_price = position.current_price;
            stored.unrealized_pnl = position.unrealized_pnl;
        }
        Ok(())
    }
}

pub struct InMemoryOrderRepository {
    state: Arc<InMemoryTradingState>,
}

impl InMemoryOrderRepository {
    pub fn new(state: Arc<InMemoryTradingState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save(&self, order: &Order) -> Result<()> {
        self.state
            .inner
            .lock()
            .await
            .orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<()> {
        self.save(order).await
    }

    async fn find(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.state.inner.lock().await.orders.get(order_id).cloned())
    }

    async fn open_orders(&self, campaign_id: &str) -> Result<Vec<Order>> {
        let inner = self.state.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| o.campaign_id == campaign_id && o.status.is_live())
            .cloned()
            .collect())
    }

    async fn orders_in_group(&self, oco_group_id: &str) -> Result<Vec<Order>> {
        let inner = self.state.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| o.oco_group_id.as_deref() == Some(oco_group_id))
            .cloned()
            .collect())
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        let mut inner = self.state.inner.lock().await;
        if let Some(order) = inner.orders.get_mut(order_id) {
            order.status = status;
        }
        Ok(())
    }
}

pub struct InMemoryTradeRepository {
    state: Arc<InMemoryTradingState>,
}

impl InMemoryTradeRepository {
    pub fn new(state: Arc<InMemoryTradingState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn trades_between(
        &self,
        campaign_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Trade>> {
        let inner = self.state.inner.lock().await;
        Ok(inner
            .trades
            .iter()
            .filter(|t| {
                t.campaign_id == campaign_id
                    && t.closed_at_ms >= start_ms
                    && t.closed_at_ms < end_ms
            })
            .cloned()
            .collect())
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Trade>> {
        let inner = self.state.inner.lock().await;
        Ok(inner
            .trades
            .iter()
            .rev()
            .filter(|t| t.campaign_id == campaign_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemorySignalRepository {
    signals: RwLock<Vec<Signal>>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalRepository for InMemorySignalRepository {
    async fn save(&self, signal: &Signal) -> Result<()> {
        self.signals.write().await.push(signal.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        signal_id: &str,
        status: SignalStatus,
        executed_at_ms: Option<i64>,
    ) -> Result<()> {
        let mut signals = self.signals.write().await;
        if let Some(signal) = signals.iter_mut().find(|s| s.id == signal_id) {
            signal.status = status;
            signal.executed_at_ms = executed_at_ms;
        }
        Ok(())
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals
            .iter()
            .rev()
            .filter(|s| s.campaign_id == campaign_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRankingRepository {
    runs: RwLock<Vec<Vec<Ranking>>>,
}

impl InMemoryRankingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RankingRepository for InMemoryRankingRepository {
    async fn save_run(&self, rankings: &[Ranking]) -> Result<()> {
        self.runs.write().await.push(rankings.to_vec());
        Ok(())
    }

    async fn latest_run(&self) -> Result<Vec<Ranking>> {
        Ok(self.runs.read().await.last().cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemorySymbolRepository {
    symbols: RwLock<BTreeMap<String, SymbolMeta>>,
}

impl InMemorySymbolRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SymbolRepository for InMemorySymbolRepository {
    async fn upsert(&self, meta: &SymbolMeta) -> Result<()> {
        self.symbols
            .write()
            .await
            .insert(meta.id.clone(), meta.clone());
        Ok(())
    }

    async fn active_symbols(&self) -> Result<Vec<SymbolMeta>> {
        Ok(self
            .symbols
            .read()
            .await
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect())
    }

    async fn set_active(&self, symbol_id: &str, active: bool) -> Result<()> {
        if let Some(meta) = self.symbols.write().await.get_mut(symbol_id) {
            meta.is_active = active;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBreakerRepository {
    breakers: RwLock<HashMap<String, (String, Breaker)>>,
}

impl InMemoryBreakerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BreakerRepository for InMemoryBreakerRepository {
    async fn upsert(&self, campaign_id: &str, breaker: &Breaker) -> Result<()> {
        self.breakers.write().await.insert(
            breaker.scope_key.clone(),
            (campaign_id.to_string(), breaker.clone()),
        );
        Ok(())
    }

    async fn load_all(&self, campaign_id: &str) -> Result<Vec<Breaker>> {
        Ok(self
            .breakers
            .read()
            .await
            .values()
            .filter(|(c, _)| c == campaign_id)
            .map(|(_, b)| b.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryBreakerEventRepository {
    events: RwLock<Vec<BreakerEvent>>,
}

impl InMemoryBreakerEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BreakerEventRepository for InMemoryBreakerEventRepository {
    async fn append(&self, event: &BreakerEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn recent(&self, campaign_id: &str, limit: usize) -> Result<Vec<BreakerEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.campaign_id == campaign_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: RwLock<Vec<Campaign>>,
    risk_states: RwLock<HashMap<String, CampaignRiskState>>,
    reports: RwLock<HashMap<(String, NaiveDate), DailyReport>>,
    signal_configs: RwLock<HashMap<(String, String), SignalConfig>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_campaign(&self, campaign: Campaign) {
        self.campaigns.write().await.push(campaign);
    }

    pub async fn set_signal_config(&self, campaign_id: &str, symbol: &str, config: SignalConfig) {
        self.signal_configs
            .write()
            .await
            .insert((campaign_id.to_string(), symbol.to_string()), config);
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn active_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .await
            .iter()
            .filter(|c| c.status == crate::domain::risk::CampaignStatus::Active)
            .cloned()
            .collect())
    }

    async fn update_status(&self, campaign_id: &str, status: &str) -> Result<()> {
        let mut campaigns = self.campaigns.write().await;
        if let Some(campaign) = campaigns.iter_mut().find(|c| c.id == campaign_id) {
            campaign.status = status.parse()?;
        }
        Ok(())
    }

    async fn load_risk_state(&self, campaign_id: &str) -> Result<Option<CampaignRiskState>> {
        Ok(self.risk_states.read().await.get(campaign_id).cloned())
    }

    async fn save_risk_state(&self, state: &CampaignRiskState) -> Result<()> {
        self.risk_states
            .write()
            .await
            .insert(state.campaign_id.clone(), state.clone());
        Ok(())
    }

    async fn signal_config(
        &self,
        campaign_id: &str,
        symbol: &str,
    ) -> Result<Option<SignalConfig>> {
        Ok(self
            .signal_configs
            .read()
            .await
            .get(&(campaign_id.to_string(), symbol.to_string()))
            .cloned())
    }

    async fn save_daily_report(&self, report: &DailyReport) -> Result<()> {
        self.reports.write().await.insert(
            (report.campaign_id.clone(), report.report_date),
            report.clone(),
        );
        Ok(())
    }

    async fn daily_report(
        &self,
        campaign_id: &str,
        report_date: NaiveDate,
    ) -> Result<Option<DailyReport>> {
        Ok(self
            .reports
            .read()
            .await
            .get(&(campaign_id.to_string(), report_date))
            .cloned())
    }
}
