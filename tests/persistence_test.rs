//! Sqlite repository round-trips: schema creation, bar storage, the
//! transactional position open/close, breaker persistence and NULL
//! handling in daily reports.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tidebot::domain::market::{Bar, Timeframe};
use tidebot::domain::repositories::{
    BarRepository, BreakerEventRepository, BreakerRepository, CampaignRepository,
    OrderRepository, PositionRepository, TradeRepository,
};
use tidebot::domain::risk::{
    Breaker, BreakerEvent, BreakerEventType, BreakerLevel, CampaignRiskState, DailyReport,
};
use tidebot::domain::trading::types::{Order, OrderSide, OrderStatus, Position, Trade};
use tidebot::infrastructure::persistence::Database;
use tidebot::infrastructure::persistence::repositories::{
    SqliteBarRepository, SqliteBreakerEventRepository, SqliteBreakerRepository,
    SqliteCampaignRepository, SqliteOrderRepository, SqlitePositionRepository,
    SqliteTradeRepository,
};

async fn database() -> Database {
    let path = std::env::temp_dir().join(format!("tidebot-test-{}.db", uuid::Uuid::new_v4()));
    Database::new(&format!("sqlite://{}", path.display()))
        .await
        .expect("test database")
}

fn bar(symbol: &str, ts: i64, close: Decimal) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        open: close - dec!(1),
        high: close + dec!(2),
        low: close - dec!(2),
        close,
        volume: dec!(10),
        trades_count: 4,
        vwap: close,
        bar_ts: ts,
    }
}

fn position(id: &str, symbol: &str, group: &str) -> Position {
    Position {
        id: id.to_string(),
        campaign_id: "camp-1".to_string(),
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        quantity: dec!(0.125),
        entry_price: dec!(30_006),
        current_price: dec!(30_006),
        sl: dec!(29_900),
        tp: dec!(30_120),
        oco_group_id: Some(group.to_string()),
        unrealized_pnl: Decimal::ZERO,
        risk_amount: dec!(20),
        entry_slippage_bps: Some(dec!(2)),
        opened_at_ms: 1_000,
    }
}

#[tokio::test]
async fn test_bar_round_trip_and_range_bounds() {
    let db = database().await;
    let repo = SqliteBarRepository::new(db);

    for ts in [0_i64, 60, 120, 180] {
        repo.save(Timeframe::OneMin, &bar("BTC/USD", ts, dec!(100)))
            .await
            .unwrap();
    }

    // Half-open range.
    let range = repo
        .bars_range("BTC/USD", Timeframe::OneMin, 60, 180)
        .await
        .unwrap();
    assert_eq!(range.len(), 2);
    assert_eq!(range[0].bar_ts, 60);
    assert_eq!(range[1].bar_ts, 120);

    // Upsert keeps bars non-overlapping per (symbol, frame, ts).
    repo.save(Timeframe::OneMin, &bar("BTC/USD", 60, dec!(105)))
        .await
        .unwrap();
    let range = repo
        .bars_range("BTC/USD", Timeframe::OneMin, 60, 61)
        .await
        .unwrap();
    assert_eq!(range.len(), 1);
    assert_eq!(range[0].close, dec!(105));

    // Short frames never reach the durable store.
    assert!(
        SqliteBarRepository::new(database().await)
            .save(Timeframe::OneSec, &bar("BTC/USD", 0, dec!(1)))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_position_open_close_is_transactional() {
    let db = database().await;
    let positions = SqlitePositionRepository::new(db.clone());
    let orders = SqliteOrderRepository::new(db.clone());
    let trades = SqliteTradeRepository::new(db.clone());

    let (sl, tp) = Order::oco_pair(
        "camp-1",
        "BTC/USD",
        OrderSide::Buy,
        dec!(0.125),
        dec!(29_900),
        dec!(30_120),
        1_000,
    );
    let group = sl.oco_group_id.clone().unwrap();
    let pos = position("pos-1", "BTC/USD", &group);

    positions.open_position(&pos, &sl, &tp).await.unwrap();

    // All three rows landed.
    assert!(positions.find("camp-1", "BTC/USD").await.unwrap().is_some());
    assert_eq!(orders.orders_in_group(&group).await.unwrap().len(), 2);

    // A second open on the same (campaign, symbol) violates the unique
    // constraint and must leave no extra orders behind.
    let (sl2, tp2) = Order::oco_pair(
        "camp-1",
        "BTC/USD",
        OrderSide::Buy,
        dec!(0.2),
        dec!(29_000),
        dec!(31_000),
        2_000,
    );
    let group2 = sl2.oco_group_id.clone().unwrap();
    let dup = position("pos-2", "BTC/USD", &group2);
    assert!(positions.open_position(&dup, &sl2, &tp2).await.is_err());
    assert!(orders.orders_in_group(&group2).await.unwrap().is_empty());

    // Close: position row gone, trade recorded, OCO legs cancelled.
    let trade = Trade::from_position(&pos, dec!(30_120), dec!(5), 5_000);
    let cancel_ids: Vec<String> = vec![sl.id.clone(), tp.id.clone()];
    positions
        .close_position("pos-1", &trade, &cancel_ids)
        .await
        .unwrap();

    assert!(positions.find("camp-1", "BTC/USD").await.unwrap().is_none());
    for leg in orders.orders_in_group(&group).await.unwrap() {
        assert_eq!(leg.status, OrderStatus::Cancelled);
    }
    let day = trades.trades_between("camp-1", 0, 10_000).await.unwrap();
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].exit_price, dec!(30_120));

    // Closing a missing position is a state conflict, not a silent no-op.
    assert!(
        positions
            .close_position("pos-1", &trade, &[])
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_breaker_and_event_round_trip() {
    let db = database().await;
    let breakers = SqliteBreakerRepository::new(db.clone());
    let events = SqliteBreakerEventRepository::new(db);

    let mut breaker = Breaker::new("camp-1:XYZ/USD", BreakerLevel::Asset);
    breaker.consecutive_losses = 2;
    breaker.cumulative_loss = dec!(600);
    breaker.trigger("two losses totalling $600", 1_000, 86_400_000);
    breakers.upsert("camp-1", &breaker).await.unwrap();

    let loaded = breakers.load_all("camp-1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0], breaker);

    events
        .append(&BreakerEvent {
            campaign_id: "camp-1".to_string(),
            level: BreakerLevel::Asset,
            breaker_key: "camp-1:XYZ/USD".to_string(),
            event_type: BreakerEventType::Triggered,
            reason: "two losses totalling $600".to_string(),
            metadata: serde_json::json!({ "symbol": "XYZ/USD" }),
            created_at_ms: 1_000,
        })
        .await
        .unwrap();

    let recent = events.recent("camp-1", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].event_type, BreakerEventType::Triggered);
    assert_eq!(recent[0].metadata["symbol"], "XYZ/USD");
}

#[tokio::test]
async fn test_campaign_lifecycle_and_order_status() {
    let db = database().await;
    let campaigns = SqliteCampaignRepository::new(db.clone());
    let orders = SqliteOrderRepository::new(db);

    let campaign = tidebot::domain::risk::Campaign {
        id: "camp-1".to_string(),
        name: "aggressive book".to_string(),
        status: tidebot::domain::risk::CampaignStatus::Active,
        investor_profile: tidebot::domain::risk::InvestorProfile::Aggressive,
        initial_capital: dec!(100_000),
        max_open_positions: 5,
        max_loss_per_pair_r: dec!(3),
        daily_loss_limit_pct: dec!(5),
        max_drawdown_pct: dec!(20),
        cooldown_minutes_after_cb: 60,
    };
    campaigns.create(&campaign).await.unwrap();

    let active = campaigns.active_campaigns().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0], campaign);

    campaigns.update_status("camp-1", "paused").await.unwrap();
    assert!(campaigns.active_campaigns().await.unwrap().is_empty());

    // Order status round trip.
    let mut order = Order::market("camp-1", "BTC/USD", OrderSide::Buy, dec!(0.5), 1_000);
    order.status = OrderStatus::Open;
    orders.save(&order).await.unwrap();
    assert_eq!(orders.open_orders("camp-1").await.unwrap().len(), 1);

    orders
        .set_status(&order.id, OrderStatus::Filled)
        .await
        .unwrap();
    let reloaded = orders.find(&order.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, OrderStatus::Filled);
    assert!(orders.open_orders("camp-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_risk_state_and_report_round_trip() {
    let db = database().await;
    let campaigns = SqliteCampaignRepository::new(db);

    let today = chrono::Utc::now().date_naive();
    let mut state = CampaignRiskState::new("camp-1", dec!(100_000), today);
    state.apply_trade("BTC/USD", dec!(-500), Some(dec!(-2.5)));
    campaigns.save_risk_state(&state).await.unwrap();

    let loaded = campaigns.load_risk_state("camp-1").await.unwrap().unwrap();
    assert_eq!(loaded, state);
    assert_eq!(
        *loaded.loss_in_r_by_pair.get("BTC/USD").unwrap(),
        dec!(-2.5)
    );

    // Under the 5-sample floor VaR/ES persist as NULL and come back None.
    let report = DailyReport {
        campaign_id: "camp-1".to_string(),
        report_date: today,
        trades: 3,
        hit_rate: Some(dec!(0.33)),
        payoff: None,
        expectancy_r: Some(dec!(-0.5)),
        var95_r: None,
        es95_r: None,
        avg_slippage_bps: Some(dec!(2.5)),
        daily_pnl: dec!(-500),
        created_at_ms: 1_000,
    };
    campaigns.save_daily_report(&report).await.unwrap();

    let loaded = campaigns
        .daily_report("camp-1", today)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, report);
    assert_eq!(loaded.var95_r, None);
    assert_eq!(loaded.es95_r, None);
}
