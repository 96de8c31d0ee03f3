//! Campaign engine main loop.
//!
//! Ticks every ~5s and walks every active campaign through: risk-state
//! load, cooldown handling, daily reset, 8h rebalance, 24h audit, the
//! trading cycle and open-position management. Campaigns are processed
//! sequentially; one campaign's failure never stops the others. Position
//! open/close run through the repository's transactional operations so
//! the position, its OCO orders and the counters move together.

use crate::application::campaign::audit::compute_daily_report;
use crate::application::market_data::{IndicatorService, IndicatorSet, StalenessGuard};
use crate::application::risk_management::CircuitBreakerService;
use crate::application::selection::{AssetSelector, SelectorConfig};
use crate::application::signals::engine::SignalEngine;
use crate::application::signals::sizing::{SizingConfig, position_size};
use crate::domain::errors::RiskViolation;
use crate::domain::ports::{ExecutionAdapter, MarketStore};
use crate::domain::repositories::{
    CampaignRepository, OrderRepository, PositionRepository, RankingRepository, SignalRepository,
    SymbolRepository, TradeRepository,
};
use crate::domain::risk::{Campaign, CampaignRiskState, TradeGate};
use crate::domain::trading::types::{
    Order, OrderSide, OrderStatus, Position, Signal, SignalConfig, SignalStatus, SignalType,
};
use anyhow::{Context, Result};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct SchedulerServices {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub positions: Arc<dyn PositionRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub trades: Arc<dyn TradeRepository>,
    pub signals: Arc<dyn SignalRepository>,
    pub rankings: Arc<dyn RankingRepository>,
    pub symbols: Arc<dyn SymbolRepository>,
    pub store: Arc<dyn MarketStore>,
    pub indicators: Arc<IndicatorService>,
    pub guard: Arc<StalenessGuard>,
    pub breakers: Arc<CircuitBreakerService>,
    pub executor: Arc<dyn ExecutionAdapter>,
}

#[derive(Clone)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub rebalance_interval_ms: i64,
    pub audit_interval_ms: i64,
    pub selector: SelectorConfig,
    pub sizing: SizingConfig,
    pub default_signal_config: SignalConfig,
}

pub struct CampaignScheduler {
    services: SchedulerServices,
    config: SchedulerConfig,
    selector: AssetSelector,
    /// symbol -> cluster number from the latest selection run.
    cluster_map: RwLock<HashMap<String, u32>>,
}

impl CampaignScheduler {
    pub fn new(services: SchedulerServices, config: SchedulerConfig) -> Self {
        let selector = AssetSelector::new(config.selector.clone());
        Self {
            services,
            config,
            selector,
            cluster_map: RwLock::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.config.tick_secs));
        info!(
            "CampaignScheduler started (tick every {}s)",
            self.config.tick_secs
        );
        loop {
            interval.tick().await;
            self.tick_once().await;
        }
    }

    /// One pass over all active campaigns.
    pub async fn tick_once(&self) {
        let campaigns = match self.services.campaigns.active_campaigns().await {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load active campaigns: {}", e);
                return;
            }
        };

        for campaign in campaigns {
            if let Err(e) = self.process_campaign(&campaign).await {
                error!("Campaign {} tick failed: {}", campaign.id, e);
                // Failure isolation: record on the campaign and move on.
                if let Ok(Some(mut state)) =
                    self.services.campaigns.load_risk_state(&campaign.id).await
                {
                    state.record_error(e.to_string());
                    let _ = self.services.campaigns.save_risk_state(&state).await;
                }
            }
        }
    }

    pub async fn process_campaign(&self, campaign: &Campaign) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let today = Utc::now().date_naive();

        let mut state = match self.services.campaigns.load_risk_state(&campaign.id).await? {
            Some(state) => state,
            None => CampaignRiskState::new(&campaign.id, campaign.initial_capital, today),
        };

        // Invariant: positions_open mirrors the actual open set.
        let open = self.services.positions.open_positions(&campaign.id).await?;
        state.positions_open = open.len() as u32;

        if state.cb_campaign_triggered {
            if state.in_cooldown(now_ms) {
                self.manage_positions(campaign, &mut state, now_ms).await;
                self.services.campaigns.save_risk_state(&state).await?;
                return Ok(());
            }
            info!("Campaign {} cooldown elapsed, resuming", campaign.id);
            state.cb_campaign_triggered = false;
            state.cb_cooldown_until_ms = None;
        }

        if state.last_daily_reset < today {
            info!("Campaign {} daily reset", campaign.id);
            state.daily_reset(today);
        }

        if now_ms - state.last_rebalance_ms >= self.config.rebalance_interval_ms {
            if let Err(e) = self.rebalance(campaign, &mut state, now_ms).await {
                warn!("Campaign {} rebalance failed: {}", campaign.id, e);
                state.record_error(format!("rebalance: {}", e));
            }
        }

        if now_ms - state.last_audit_ms >= self.config.audit_interval_ms {
            if let Err(e) = self.audit(campaign, &mut state, now_ms).await {
                warn!("Campaign {} audit failed: {}", campaign.id, e);
                state.record_error(format!("audit: {}", e));
            }
        }

        self.trading_cycle(campaign, &mut state, now_ms).await;
        self.manage_positions(campaign, &mut state, now_ms).await;

        self.services.campaigns.save_risk_state(&state).await?;
        Ok(())
    }

    /// Refreshes the tradable set from the latest ranking run, running
    /// automatic selection when the universe is empty, and exits positions
    /// whose symbol dropped out.
    async fn rebalance(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        now_ms: i64,
    ) -> Result<()> {
        let mut rankings = self.services.rankings.latest_run().await?;

        if rankings.is_empty() {
            let candidates = self.selection_candidates(now_ms).await?;
            let run_id = Uuid::new_v4().to_string();
            let mut rng = StdRng::from_os_rng();
            rankings = self.selector.select(&candidates, &run_id, &mut rng);
            if !rankings.is_empty() {
                self.services.rankings.save_run(&rankings).await?;
                info!(
                    "Campaign {}: automatic selection ranked {} symbols (run {})",
                    campaign.id,
                    rankings.len(),
                    run_id
                );
            }
        }

        let universe_size = campaign.max_open_positions
            * campaign.investor_profile.universe_multiplier();
        let tradable: Vec<String> = rankings
            .iter()
            .take(universe_size)
            .map(|r| r.symbol_id.clone())
            .collect();

        {
            let mut clusters = self.cluster_map.write().await;
            clusters.clear();
            for r in &rankings {
                if let Some(c) = r.cluster_number {
                    clusters.insert(r.symbol_id.clone(), c);
                }
            }
        }

        // Exit positions whose symbol left the tradable set.
        let open = self.services.positions.open_positions(&campaign.id).await?;
        for position in open {
            if !tradable.contains(&position.symbol) {
                info!(
                    "Campaign {}: {} left the tradable set, exiting position",
                    campaign.id, position.symbol
                );
                if let Err(e) = self
                    .close_position(campaign, state, &position, "rebalance_exit", now_ms)
                    .await
                {
                    warn!("Rebalance exit failed for {}: {}", position.symbol, e);
                    state.record_error(format!("rebalance_exit {}: {}", position.symbol, e));
                }
            }
        }

        state.current_tradable_set = tradable;
        state.last_rebalance_ms = now_ms;
        Ok(())
    }

    /// Loads catalog entries and overlays the liquidity metrics that move
    /// intraday (spread from L1, depth from the persisted book) so the
    /// tradability filter sees the live cross-section.
    async fn selection_candidates(
        &self,
        now_ms: i64,
    ) -> Result<Vec<(crate::domain::market::SymbolMeta, IndicatorSet)>> {
        let metas = self.services.symbols.active_symbols().await?;
        let mut candidates = Vec::with_capacity(metas.len());
        for mut meta in metas {
            if let Ok(Some(quote)) = self.services.store.l1(&meta.id).await {
                let spread_pct = quote.spread_bps() / dec!(100);
                if spread_pct > Decimal::ZERO {
                    meta.spread_mid_pct = spread_pct;
                }
            }
            if let Ok(Some(book)) = self.services.store.l2_snapshot(&meta.id).await {
                let depth = book.depth_notional();
                if depth > Decimal::ZERO {
                    meta.depth_top10_usd = depth;
                }
            }

            let set = self.services.indicators.indicators(&meta.id, now_ms).await;
            if let (Some(atr), Some(price)) = (set.atr14, self.current_price(&meta.id).await)
                && price > Decimal::ZERO
            {
                meta.atr_daily_pct = atr / price * dec!(100);
            }
            candidates.push((meta, set));
        }
        Ok(candidates)
    }

    /// Computes and persists the daily report.
    async fn audit(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        now_ms: i64,
    ) -> Result<()> {
        let day_start_ms = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(now_ms - 86_400_000);

        let trades = self
            .services
            .trades
            .trades_between(&campaign.id, day_start_ms, now_ms)
            .await?;

        let report = compute_daily_report(
            &campaign.id,
            Utc::now().date_naive(),
            &trades,
            state.daily_pnl,
            now_ms,
        );
        self.services.campaigns.save_daily_report(&report).await?;
        info!(
            "Campaign {} daily report: {} trades, pnl {}",
            campaign.id, report.trades, report.daily_pnl
        );

        state.last_audit_ms = now_ms;
        Ok(())
    }

    /// Evaluates signals for the tradable set and opens positions until a
    /// cap or gate stops the cycle.
    async fn trading_cycle(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        now_ms: i64,
    ) {
        for symbol in state.current_tradable_set.clone() {
            if state.positions_open as usize >= campaign.max_open_positions {
                break;
            }
            if state.pair_blocked(&symbol, campaign.max_loss_per_pair_r) {
                continue;
            }

            match self.try_enter(campaign, state, &symbol, now_ms).await {
                Ok(()) => {}
                Err(e) => {
                    warn!("Campaign {} entry on {} failed: {}", campaign.id, symbol, e);
                    state.record_error(format!("{}: {}", symbol, e));
                }
            }
        }
    }

    async fn try_enter(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        symbol: &str,
        now_ms: i64,
    ) -> Result<()> {
        // Invariant: at most one open position per (campaign, symbol).
        if self
            .services
            .positions
            .find(&campaign.id, symbol)
            .await?
            .is_some()
        {
            return Ok(());
        }

        // Freshness gates: hard/kill zero the signal, warn blocks entry.
        if !self.services.guard.signals_allowed(symbol).await {
            return Ok(());
        }
        if self.services.guard.can_open_position(symbol).await.is_err() {
            return Ok(());
        }

        let Some(price) = self.current_price(symbol).await else {
            return Ok(());
        };
        let set = self.services.indicators.indicators(symbol, now_ms).await;
        let (Some(ema12), Some(ema36), Some(atr)) = (set.ema12, set.ema36, set.atr14) else {
            return Ok(());
        };

        let signal_config = self
            .services
            .campaigns
            .signal_config(&campaign.id, symbol)
            .await?
            .unwrap_or_else(|| self.config.default_signal_config.clone());

        let Some(signal_type) = SignalEngine::evaluate(&signal_config, price, ema12, ema36, atr)
        else {
            return Ok(());
        };

        let cluster = self.cluster_map.read().await.get(symbol).copied();
        let gate = self
            .services
            .breakers
            .can_trade(&campaign.id, symbol, cluster)
            .await;
        if !gate.allowed {
            info!(
                "Campaign {} signal on {} suppressed by breaker: {:?}",
                campaign.id, symbol, gate.reason
            );
            return Ok(());
        }

        self.open_position(
            campaign,
            state,
            symbol,
            signal_type,
            price,
            &set,
            &signal_config,
            &gate,
            cluster,
            now_ms,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_position(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        symbol: &str,
        signal_type: SignalType,
        price: Decimal,
        set: &IndicatorSet,
        signal_config: &SignalConfig,
        gate: &TradeGate,
        cluster: Option<u32>,
        now_ms: i64,
    ) -> Result<()> {
        let atr = set.atr14.context("missing atr")?;
        let targets = SignalEngine::targets(signal_config, signal_type, price, atr);

        let sized = match position_size(
            &self.config.sizing,
            state.current_equity,
            signal_config.risk_per_trade_bps,
            price,
            targets.sl,
        ) {
            Ok(sized) => sized,
            Err(violation) => {
                info!("Campaign {} {} not sized: {}", campaign.id, symbol, violation);
                return Ok(());
            }
        };

        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign.id.clone(),
            symbol: symbol.to_string(),
            signal_type,
            price_at_signal: price,
            ema12: set.ema12.unwrap_or_default(),
            ema36: set.ema36.unwrap_or_default(),
            atr,
            tp1: targets.tp1,
            tp2: targets.tp2,
            sl: targets.sl,
            quantity: sized.quantity,
            config_snapshot: signal_config.clone(),
            breaker_state: gate.state_label(),
            status: SignalStatus::Pending,
            created_at_ms: now_ms,
            executed_at_ms: None,
        };
        self.services.signals.save(&signal).await?;

        let entry_order = Order::market(
            &campaign.id,
            symbol,
            signal_type.entry_side(),
            sized.quantity,
            now_ms,
        );

        let placed = match self.services.executor.place(&entry_order).await {
            Ok(placed) => placed,
            Err(e) => {
                self.services
                    .signals
                    .update_status(&signal.id, SignalStatus::Cancelled, None)
                    .await?;
                if e.requires_reconciliation() {
                    error!(
                        "Campaign {} entry on {} requires manual reconciliation: {}",
                        campaign.id, symbol, e
                    );
                }
                return Err(e.into());
            }
        };

        self.services.orders.save(&placed).await?;

        if placed.status != OrderStatus::Filled {
            self.services
                .signals
                .update_status(&signal.id, SignalStatus::Expired, None)
                .await?;
            return Ok(());
        }

        let entry_price = placed.average_fill_price.unwrap_or(price);
        let slippage_bps = if price.is_zero() {
            Decimal::ZERO
        } else {
            ((entry_price - price) / price * dec!(10_000)).abs()
        };

        let (sl_order, tp_order) = Order::oco_pair(
            &campaign.id,
            symbol,
            signal_type.entry_side(),
            sized.quantity,
            targets.sl,
            targets.tp1,
            now_ms,
        );

        let position = Position {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign.id.clone(),
            symbol: symbol.to_string(),
            side: signal_type.entry_side(),
            quantity: sized.quantity,
            entry_price,
            current_price: entry_price,
            sl: targets.sl,
            tp: targets.tp1,
            oco_group_id: sl_order.oco_group_id.clone(),
            unrealized_pnl: Decimal::ZERO,
            risk_amount: sized.risk_amount,
            entry_slippage_bps: Some(slippage_bps),
            opened_at_ms: now_ms,
        };

        // Atomic: position + both OCO orders + counters, or nothing.
        self.services
            .positions
            .open_position(&position, &sl_order, &tp_order)
            .await?;
        self.services
            .signals
            .update_status(&signal.id, SignalStatus::Executed, Some(now_ms))
            .await?;

        state.positions_open += 1;
        info!(
            "Campaign {} opened {} {} qty {} @ {} (sl {}, tp {}, cluster {:?})",
            campaign.id, signal_type, symbol, sized.quantity, entry_price, targets.sl, targets.tp1,
            cluster
        );
        Ok(())
    }

    /// Marks open positions and closes the ones whose protective levels or
    /// breakers demand an exit.
    async fn manage_positions(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        now_ms: i64,
    ) {
        let open = match self.services.positions.open_positions(&campaign.id).await {
            Ok(open) => open,
            Err(e) => {
                error!("Campaign {} failed to list positions: {}", campaign.id, e);
                return;
            }
        };

        for mut position in open {
            if let Some(price) = self.current_price(&position.symbol).await {
                position.mark(price);
                let _ = self.services.positions.update_mark(&position).await;
            }

            let exit_reason = self.exit_reason(campaign, state, &position).await;
            let Some(reason) = exit_reason else { continue };

            info!(
                "Campaign {} closing {} ({})",
                campaign.id, position.symbol, reason
            );
            if let Err(e) = self
                .close_position(campaign, state, &position, reason, now_ms)
                .await
            {
                error!(
                    "Campaign {} close failed for {}: {}",
                    campaign.id, position.symbol, e
                );
                state.record_error(format!("close {}: {}", position.symbol, e));
            }
        }
    }

    async fn exit_reason(
        &self,
        campaign: &Campaign,
        state: &CampaignRiskState,
        position: &Position,
    ) -> Option<&'static str> {
        if state.cb_campaign_triggered {
            return Some("breaker_exit");
        }
        if state.pair_blocked(&position.symbol, campaign.max_loss_per_pair_r) {
            return Some("breaker_exit");
        }
        let asset_key = format!("{}:{}", campaign.id, position.symbol);
        if let Some(breaker) = self.services.breakers.breaker(&asset_key).await
            && breaker.is_triggered
        {
            return Some("breaker_exit");
        }

        let price = position.current_price;
        match position.side {
            OrderSide::Buy => {
                if price <= position.sl {
                    Some("sl_exit")
                } else if price >= position.tp {
                    Some("tp_exit")
                } else {
                    None
                }
            }
            OrderSide::Sell => {
                if price >= position.sl {
                    Some("sl_exit")
                } else if price <= position.tp {
                    Some("tp_exit")
                } else {
                    None
                }
            }
        }
    }

    async fn close_position(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        position: &Position,
        reason: &str,
        now_ms: i64,
    ) -> Result<()> {
        let exit_order = Order::market(
            &campaign.id,
            &position.symbol,
            position.side.opposite(),
            position.quantity,
            now_ms,
        );
        let placed = self
            .services
            .executor
            .place(&exit_order)
            .await
            .with_context(|| format!("exit order for {}", position.symbol))?;
        self.services.orders.save(&placed).await?;
        let exit_price = placed.average_fill_price.unwrap_or(position.current_price);

        // Taker fees on both leg notionals.
        let fees = self.config.sizing.fee_rate
            * (position.entry_price * position.quantity + exit_price * position.quantity);

        let trade =
            crate::domain::trading::types::Trade::from_position(position, exit_price, fees, now_ms);

        // Cancel both OCO legs; filling one would have cancelled the other
        // on the exchange, locally we cancel whatever is still live.
        let mut cancel_ids = Vec::new();
        if let Some(group) = &position.oco_group_id {
            for order in self.services.orders.orders_in_group(group).await? {
                if order.status.is_live() {
                    let _ = self.services.executor.cancel(&order.id).await;
                    cancel_ids.push(order.id);
                }
            }
        }

        // Atomic: close position + cancel orders + record the trade.
        self.services
            .positions
            .close_position(&position.id, &trade, &cancel_ids)
            .await?;

        state.positions_open = state.positions_open.saturating_sub(1);
        state.apply_trade(&position.symbol, trade.realized_pnl, trade.r_multiple());

        let cluster = self.cluster_map.read().await.get(&position.symbol).copied();
        self.services
            .breakers
            .record_trade_result(
                &campaign.id,
                &position.symbol,
                cluster,
                trade.realized_pnl,
                campaign.initial_capital,
                now_ms,
            )
            .await;

        self.apply_campaign_risk(campaign, state, now_ms).await;

        info!(
            "Campaign {} closed {} @ {} ({}) pnl {}",
            campaign.id, position.symbol, exit_price, reason, trade.realized_pnl
        );
        Ok(())
    }

    /// Campaign-level triggers after a closed trade: daily loss, 30d
    /// drawdown, per-pair R budget and the global breaker.
    async fn apply_campaign_risk(
        &self,
        campaign: &Campaign,
        state: &mut CampaignRiskState,
        now_ms: i64,
    ) {
        for (symbol, loss_r) in state.loss_in_r_by_pair.clone() {
            if loss_r <= -campaign.max_loss_per_pair_r
                && !state.cb_pair_triggered.contains(&symbol)
            {
                let violation = RiskViolation::PairLossLimit {
                    symbol: symbol.clone(),
                    loss_r,
                    max_r: campaign.max_loss_per_pair_r,
                };
                warn!("Campaign {}: {}", campaign.id, violation);
                state.cb_pair_triggered.push(symbol);
            }
        }

        let mut pause = false;
        if state.daily_loss_pct >= campaign.daily_loss_limit_pct {
            if !state.cb_daily_triggered {
                let violation = RiskViolation::DailyLossLimit {
                    loss_pct: state.daily_loss_pct.to_f64().unwrap_or(0.0),
                    limit_pct: campaign.daily_loss_limit_pct.to_f64().unwrap_or(0.0),
                };
                warn!("Campaign {}: {}", campaign.id, violation);
            }
            state.cb_daily_triggered = true;
            pause = true;
        }
        if state.current_dd_pct >= campaign.max_drawdown_pct {
            let violation = RiskViolation::MaxDrawdown {
                drawdown_pct: state.current_dd_pct.to_f64().unwrap_or(0.0),
                max_pct: campaign.max_drawdown_pct.to_f64().unwrap_or(0.0),
            };
            warn!("Campaign {}: {}", campaign.id, violation);
            pause = true;
        }

        if pause && !state.cb_campaign_triggered {
            state.cb_campaign_triggered = true;
            state.cb_cooldown_until_ms =
                Some(now_ms + campaign.cooldown_minutes_after_cb * 60_000);
            warn!(
                "Campaign {} paused with cooldown until {:?}",
                campaign.id, state.cb_cooldown_until_ms
            );
        }

        self.services
            .breakers
            .check_global(&campaign.id, state.daily_loss_pct, now_ms)
            .await;
    }

    async fn current_price(&self, symbol: &str) -> Option<Decimal> {
        if let Ok(Some(price)) = self.services.store.current_price(symbol).await {
            return Some(price);
        }
        self.services
            .store
            .l1(symbol)
            .await
            .ok()
            .flatten()
            .map(|quote| quote.mid())
    }
}
