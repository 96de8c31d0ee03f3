use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    id TEXT PRIMARY KEY,
    exchange_symbol TEXT NOT NULL,
    display_symbol TEXT NOT NULL,
    volume_24h_usd TEXT NOT NULL,
    spread_mid_pct TEXT NOT NULL,
    depth_top10_usd TEXT NOT NULL,
    atr_daily_pct TEXT NOT NULL,
    real_volume_ratio TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS bars_1m (
    symbol TEXT NOT NULL,
    bar_ts INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    trades_count INTEGER NOT NULL,
    vwap TEXT NOT NULL,
    PRIMARY KEY (symbol, bar_ts)
);

CREATE TABLE IF NOT EXISTS bars_1h (
    symbol TEXT NOT NULL,
    bar_ts INTEGER NOT NULL,
    open TEXT NOT NULL,
    high TEXT NOT NULL,
    low TEXT NOT NULL,
    close TEXT NOT NULL,
    volume TEXT NOT NULL,
    trades_count INTEGER NOT NULL,
    vwap TEXT NOT NULL,
    PRIMARY KEY (symbol, bar_ts)
);

CREATE TABLE IF NOT EXISTS signals (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    signal_type TEXT NOT NULL,
    price_at_signal TEXT NOT NULL,
    ema12 TEXT NOT NULL,
    ema36 TEXT NOT NULL,
    atr TEXT NOT NULL,
    tp1 TEXT NOT NULL,
    tp2 TEXT NOT NULL,
    sl TEXT NOT NULL,
    quantity TEXT NOT NULL,
    config_json TEXT NOT NULL,
    breaker_state TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    executed_at_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_signals_campaign_time
ON signals (campaign_id, created_at_ms);

CREATE TABLE IF NOT EXISTS orders (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    order_type TEXT NOT NULL,
    quantity TEXT NOT NULL,
    price TEXT,
    stop_price TEXT,
    status TEXT NOT NULL,
    exchange_order_id TEXT,
    filled_qty TEXT NOT NULL,
    average_fill_price TEXT,
    oco_group_id TEXT,
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_campaign_status
ON orders (campaign_id, status);
CREATE INDEX IF NOT EXISTS idx_orders_oco_group
ON orders (oco_group_id);

CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    current_price TEXT NOT NULL,
    sl TEXT NOT NULL,
    tp TEXT NOT NULL,
    oco_group_id TEXT,
    unrealized_pnl TEXT NOT NULL,
    risk_amount TEXT NOT NULL,
    entry_slippage_bps TEXT,
    opened_at_ms INTEGER NOT NULL,
    UNIQUE (campaign_id, symbol)
);

CREATE TABLE IF NOT EXISTS trades (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    quantity TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    fees TEXT NOT NULL,
    risk_amount TEXT NOT NULL,
    entry_slippage_bps TEXT,
    opened_at_ms INTEGER NOT NULL,
    closed_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_campaign_time
ON trades (campaign_id, closed_at_ms);

CREATE TABLE IF NOT EXISTS rankings (
    run_id TEXT NOT NULL,
    symbol_id TEXT NOT NULL,
    rank INTEGER NOT NULL,
    score TEXT NOT NULL,
    cluster_number INTEGER,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, symbol_id)
);
CREATE INDEX IF NOT EXISTS idx_rankings_created
ON rankings (created_at_ms);

CREATE TABLE IF NOT EXISTS breakers (
    scope_key TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    level TEXT NOT NULL,
    is_triggered INTEGER NOT NULL,
    trigger_reason TEXT,
    consecutive_losses INTEGER NOT NULL,
    cumulative_loss TEXT NOT NULL,
    window_pnl TEXT NOT NULL,
    triggered_at_ms INTEGER,
    auto_reset_at_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_breakers_campaign
ON breakers (campaign_id);

CREATE TABLE IF NOT EXISTS breaker_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    campaign_id TEXT NOT NULL,
    level TEXT NOT NULL,
    breaker_key TEXT NOT NULL,
    event_type TEXT NOT NULL,
    reason TEXT NOT NULL,
    metadata_json TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_breaker_events_campaign_time
ON breaker_events (campaign_id, created_at_ms);

CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    investor_profile TEXT NOT NULL,
    initial_capital TEXT NOT NULL,
    max_open_positions INTEGER NOT NULL,
    max_loss_per_pair_r TEXT NOT NULL,
    daily_loss_limit_pct TEXT NOT NULL,
    max_drawdown_pct TEXT NOT NULL,
    cooldown_minutes_after_cb INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS campaign_risk_states (
    campaign_id TEXT PRIMARY KEY,
    state_json TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS campaign_daily_reports (
    campaign_id TEXT NOT NULL,
    report_date TEXT NOT NULL,
    trades INTEGER NOT NULL,
    hit_rate TEXT,
    payoff TEXT,
    expectancy_r TEXT,
    var95_r TEXT,
    es95_r TEXT,
    avg_slippage_bps TEXT,
    daily_pnl TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    PRIMARY KEY (campaign_id, report_date)
);

CREATE TABLE IF NOT EXISTS signal_configs (
    campaign_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    config_json TEXT NOT NULL,
    PRIMARY KEY (campaign_id, symbol)
);
"#;

/// Up to four jobs write sqlite at the same time: the scheduler tick, the
/// bar aggregator's 1m/1h saves, breaker persistence and the daily audit.
/// One spare connection on top of that covers ad-hoc reads.
const MAX_POOL_CONNECTIONS: u32 = 5;

/// Durable store wrapper shared by the sqlite repositories.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::prepare_backing_file(db_url).await?;

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            // WAL so the aggregator and breaker writers don't stall the
            // scheduler's reads mid-tick.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("sqlite connect failed for {}", db_url))?;

        let db = Self { pool };
        db.init().await?;
        info!("Durable store ready at {}", db_url);

        Ok(db)
    }

    /// File-backed urls need their parent directory before sqlite can
    /// create the database; `:memory:` variants have no backing file.
    async fn prepare_backing_file(db_url: &str) -> Result<()> {
        let Some(file) = db_url.strip_prefix("sqlite://") else {
            return Ok(());
        };
        if file.starts_with(':') {
            return Ok(());
        }
        if let Some(parent) = Path::new(file).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("could not create {}", parent.display()))?;
        }
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("schema creation failed")?;
        Ok(())
    }
}
