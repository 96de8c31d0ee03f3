//! Campaign scheduler end-to-end over in-memory infrastructure and the
//! paper executor: rebalance picks the tradable set, a long signal opens
//! a position atomically with its OCO pair, and breaker trips close it.

use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tidebot::application::campaign::{CampaignScheduler, SchedulerConfig, SchedulerServices};
use tidebot::application::market_data::{
    IndicatorService, StalenessGuard, StalenessThresholds,
};
use tidebot::application::risk_management::{CircuitBreakerConfig, CircuitBreakerService};
use tidebot::application::selection::SelectorConfig;
use tidebot::application::signals::SizingConfig;
use tidebot::domain::market::{L1Quote, Ranking};
use tidebot::domain::ports::{MarketStore, RefreshDispatcher};
use tidebot::domain::repositories::{
    CampaignRepository, OrderRepository, PositionRepository, RankingRepository, SignalRepository,
    TradeRepository,
};
use tidebot::domain::risk::{Campaign, CampaignStatus, InvestorProfile};
use tidebot::domain::trading::types::{OrderStatus, OrderType, SignalConfig};
use tidebot::infrastructure::execution::PaperExecutionService;
use tidebot::infrastructure::market_store::InMemoryMarketStore;
use tidebot::infrastructure::repositories::in_memory::{
    InMemoryBarRepository, InMemoryBreakerEventRepository, InMemoryBreakerRepository,
    InMemoryCampaignRepository, InMemoryOrderRepository, InMemoryPositionRepository,
    InMemoryRankingRepository, InMemorySignalRepository, InMemorySymbolRepository,
    InMemoryTradeRepository, InMemoryTradingState,
};
use tokio::sync::RwLock;

struct NoopDispatcher;

#[async_trait]
impl RefreshDispatcher for NoopDispatcher {
    async fn request_refresh(&self, _symbol: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

fn campaign() -> Campaign {
    Campaign {
        id: "camp-1".to_string(),
        name: "integration".to_string(),
        status: CampaignStatus::Active,
        investor_profile: InvestorProfile::Moderate,
        initial_capital: dec!(100_000),
        max_open_positions: 3,
        max_loss_per_pair_r: dec!(3),
        daily_loss_limit_pct: dec!(5),
        max_drawdown_pct: dec!(20),
        cooldown_minutes_after_cb: 60,
    }
}

struct Harness {
    store: Arc<InMemoryMarketStore>,
    campaigns: Arc<InMemoryCampaignRepository>,
    positions: Arc<InMemoryPositionRepository>,
    orders: Arc<InMemoryOrderRepository>,
    trades: Arc<InMemoryTradeRepository>,
    signals: Arc<InMemorySignalRepository>,
    rankings: Arc<InMemoryRankingRepository>,
    guard: Arc<StalenessGuard>,
    breakers: Arc<CircuitBreakerService>,
    scheduler: CampaignScheduler,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryMarketStore::new());
    let bars = Arc::new(InMemoryBarRepository::new());
    let trading_state = InMemoryTradingState::new();
    let positions = Arc::new(InMemoryPositionRepository::new(trading_state.clone()));
    let orders = Arc::new(InMemoryOrderRepository::new(trading_state.clone()));
    let trades = Arc::new(InMemoryTradeRepository::new(trading_state.clone()));
    let signals = Arc::new(InMemorySignalRepository::new());
    let rankings = Arc::new(InMemoryRankingRepository::new());
    let symbols = Arc::new(InMemorySymbolRepository::new());
    let campaigns = Arc::new(InMemoryCampaignRepository::new());
    campaigns.add_campaign(campaign()).await;

    let breakers = Arc::new(CircuitBreakerService::new(
        CircuitBreakerConfig {
            asset_consecutive_losses: 2,
            asset_cumulative_loss_usd: dec!(500),
            asset_auto_reset_ms: 24 * 3_600_000,
            cluster_loss_pct_of_capital: dec!(5),
            cluster_window_ms: 24 * 3_600_000,
            cluster_auto_reset_ms: 12 * 3_600_000,
            global_daily_loss_pct: dec!(5),
        },
        Arc::new(InMemoryBreakerRepository::new()),
        Arc::new(InMemoryBreakerEventRepository::new()),
    ));

    let guard = Arc::new(StalenessGuard::new(
        store.clone(),
        Arc::new(NoopDispatcher),
        breakers.clone(),
        StalenessThresholds::default(),
        2,
    ));
    guard.set_symbols(vec!["BTC/USD".to_string()]).await;

    let indicators = Arc::new(IndicatorService::new(store.clone(), bars.clone()));
    let executor = Arc::new(PaperExecutionService::new(store.clone(), dec!(0.0016)));

    let scheduler = CampaignScheduler::new(
        SchedulerServices {
            campaigns: campaigns.clone(),
            positions: positions.clone(),
            orders: orders.clone(),
            trades: trades.clone(),
            signals: signals.clone(),
            rankings: rankings.clone(),
            symbols,
            store: store.clone(),
            indicators,
            guard: guard.clone(),
            breakers: breakers.clone(),
            executor,
        },
        SchedulerConfig {
            tick_secs: 5,
            rebalance_interval_ms: 8 * 3_600_000,
            audit_interval_ms: 24 * 3_600_000,
            selector: SelectorConfig {
                min_volume_24h_usd: dec!(1_000_000),
                min_real_volume_ratio: dec!(0.5),
                max_spread_mid_pct: dec!(0.3),
                min_depth_top10_usd: dec!(50_000),
                min_atr_daily_pct: dec!(1),
                top_n: 50,
                weight_volume: 0.3,
                weight_volatility: 0.2,
                weight_momentum: 0.3,
                weight_trend: 0.2,
                cluster_k: 10,
                cluster_max_members: 10,
            },
            sizing: SizingConfig {
                max_position_pct_capital_per_pair: dec!(10),
                min_order_notional_usd: dec!(10),
                fee_rate: dec!(0.0016),
                slippage_rate: dec!(0.0004),
            },
            default_signal_config: SignalConfig {
                enabled: true,
                long_atr_mult: dec!(2),
                short_atr_mult: dec!(2),
                tp1_atr_mult: dec!(1.2),
                tp2_atr_mult: dec!(2.5),
                sl_atr_mult: dec!(1),
                risk_per_trade_bps: dec!(2),
            },
        },
    );

    Harness {
        store,
        campaigns,
        positions,
        orders,
        trades,
        signals,
        rankings,
        guard,
        breakers,
        scheduler,
    }
}

/// Seeds a fresh uptrending BTC market matching the reference long
/// scenario: price 30000, ema12 29700, ema36 29500, atr 100.
async fn seed_uptrend(h: &Harness, now_ms: i64) {
    let quote = L1Quote {
        bid: dec!(29_999),
        bid_qty: dec!(5),
        ask: dec!(30_001),
        ask_qty: dec!(5),
        exchange_ts_ms: now_ms,
        ingest_ts_ms: now_ms,
    };
    h.store.put_l1("BTC/USD", &quote).await.unwrap();
    h.store
        .put_current_price("BTC/USD", dec!(30_000), now_ms)
        .await
        .unwrap();

    // Cached indicator set; the service serves these without history.
    h.store
        .put_indicator("atr", "BTC/USD", 14, dec!(100))
        .await
        .unwrap();
    h.store
        .put_indicator("ema", "BTC/USD", 12, dec!(29_700))
        .await
        .unwrap();
    h.store
        .put_indicator("ema", "BTC/USD", 36, dec!(29_500))
        .await
        .unwrap();

    h.rankings
        .save_run(&[Ranking {
            run_id: "run-1".to_string(),
            symbol_id: "BTC/USD".to_string(),
            rank: 1,
            score: dec!(1.5),
            cluster_number: Some(0),
        }])
        .await
        .unwrap();

    h.guard.sweep_once(now_ms).await;
}

#[tokio::test]
async fn test_long_entry_creates_position_with_oco_pair() {
    let h = harness().await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    seed_uptrend(&h, now_ms).await;

    h.scheduler.process_campaign(&campaign()).await.unwrap();

    // Position exists with the reference targets.
    let position = h
        .positions
        .find("camp-1", "BTC/USD")
        .await
        .unwrap()
        .expect("position should open");
    assert_eq!(position.sl, dec!(29_900));
    assert_eq!(position.tp, dec!(30_120));
    assert!((position.quantity - dec!(0.125)).abs() < dec!(0.001));
    assert_eq!(position.risk_amount, dec!(20));

    // OCO atomicity: both protective orders share the position's group.
    let group = position.oco_group_id.clone().expect("oco group");
    let legs = h.orders.orders_in_group(&group).await.unwrap();
    assert_eq!(legs.len(), 2);
    let types: Vec<OrderType> = legs.iter().map(|o| o.order_type).collect();
    assert!(types.contains(&OrderType::StopLoss));
    assert!(types.contains(&OrderType::TakeProfit));
    for leg in &legs {
        assert_eq!(leg.status, OrderStatus::Open);
        assert_eq!(leg.quantity, position.quantity);
    }

    // The signal was persisted, snapshotted and marked executed.
    let signals = h.signals.recent("camp-1", 10).await.unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].breaker_state, "clear");
    assert_eq!(
        signals[0].status,
        tidebot::domain::trading::types::SignalStatus::Executed
    );

    // Risk state mirrors the open set.
    let state = h
        .campaigns
        .load_risk_state("camp-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.positions_open, 1);
    assert_eq!(state.current_tradable_set, vec!["BTC/USD".to_string()]);

    // A second tick must not double-open the same symbol.
    h.scheduler.process_campaign(&campaign()).await.unwrap();
    let open = h.positions.open_positions("camp-1").await.unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn test_audit_writes_daily_report() {
    let h = harness().await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    seed_uptrend(&h, now_ms).await;

    h.scheduler.process_campaign(&campaign()).await.unwrap();

    let report = h
        .campaigns
        .daily_report("camp-1", chrono::Utc::now().date_naive())
        .await
        .unwrap()
        .expect("audit should persist a report");
    // No closed trades yet: counts are zero, VaR/ES stay NULL.
    assert_eq!(report.trades, 0);
    assert_eq!(report.var95_r, None);
    assert_eq!(report.es95_r, None);
}

#[tokio::test]
async fn test_asset_breaker_trip_closes_position() {
    let h = harness().await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    seed_uptrend(&h, now_ms).await;

    h.scheduler.process_campaign(&campaign()).await.unwrap();
    let position = h
        .positions
        .find("camp-1", "BTC/USD")
        .await
        .unwrap()
        .expect("position should open");

    // Two heavy losses arm the asset breaker for the pair.
    h.breakers
        .record_trade_result("camp-1", "BTC/USD", Some(0), dec!(-300), dec!(100_000), now_ms)
        .await;
    h.breakers
        .record_trade_result("camp-1", "BTC/USD", Some(0), dec!(-300), dec!(100_000), now_ms)
        .await;
    assert!(!h.breakers.can_trade("camp-1", "BTC/USD", Some(0)).await.allowed);

    h.scheduler.process_campaign(&campaign()).await.unwrap();

    // The position was closed as a breaker exit and its OCO legs died
    // with it.
    assert!(h.positions.find("camp-1", "BTC/USD").await.unwrap().is_none());
    let group = position.oco_group_id.unwrap();
    for leg in h.orders.orders_in_group(&group).await.unwrap() {
        assert_eq!(leg.status, OrderStatus::Cancelled);
    }
    let trades = h.trades.recent("camp-1", 10).await.unwrap();
    assert_eq!(trades.len(), 1);

    // With the breaker armed, no new position opens on later ticks.
    h.scheduler.process_campaign(&campaign()).await.unwrap();
    assert!(h.positions.find("camp-1", "BTC/USD").await.unwrap().is_none());
}
