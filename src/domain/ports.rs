//! Service ports wired together by the application bootstrap.
//!
//! The staleness guard and the circuit breakers call into each other at
//! runtime; the cycle is broken here with the `StalenessSink` and
//! `RefreshDispatcher` traits so neither component imports the other
//! concretely.

use crate::domain::errors::ExecutionError;
use crate::domain::market::{Bar, L1Quote, L2Snapshot, Tick, Timeframe};
use crate::domain::risk::StalenessSeverity;
use crate::domain::trading::types::Order;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Hot key/value surface over ticks, quotes, books, short-frame bars and
/// cached indicators. Backed by redis in production and by an in-memory
/// map in tests.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Appends a tick to the symbol's ring (newest first, trimmed to the
    /// ring cap, ~1h TTL).
    async fn append_tick(&self, symbol: &str, tick: &Tick) -> Result<()>;

    /// Most recent ticks, newest first, up to `limit`.
    async fn recent_ticks(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>>;

    async fn put_l1(&self, symbol: &str, quote: &L1Quote) -> Result<()>;
    async fn l1(&self, symbol: &str) -> Result<Option<L1Quote>>;

    /// Replaces both sides of the persisted book (top 10 per side).
    async fn put_l2_snapshot(&self, symbol: &str, snapshot: &L2Snapshot) -> Result<()>;
    async fn l2_snapshot(&self, symbol: &str) -> Result<Option<L2Snapshot>>;
    async fn l2_timestamp_ms(&self, symbol: &str) -> Result<Option<i64>>;

    async fn put_current_price(&self, symbol: &str, price: Decimal, ts_ms: i64) -> Result<()>;
    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>>;

    /// Short-frame bars, 24h TTL, indexed by `bar_ts`.
    async fn put_hot_bar(&self, frame: Timeframe, bar: &Bar) -> Result<()>;
    async fn hot_bars(&self, frame: Timeframe, symbol: &str, limit: usize) -> Result<Vec<Bar>>;

    /// Cached indicator values, 300s TTL.
    async fn put_indicator(
        &self,
        name: &str,
        symbol: &str,
        period: u32,
        value: Decimal,
    ) -> Result<()>;
    async fn indicator(&self, name: &str, symbol: &str, period: u32) -> Result<Option<Decimal>>;
}

/// Order execution contract shared by the paper simulator and the live
/// exchange adapter.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Submits the order and drives it to a terminal (or open) state.
    /// The returned order carries fill quantity and average price.
    async fn place(&self, order: &Order) -> Result<Order, ExecutionError>;

    /// `true` if the order was cancelled, `false` if it was already done.
    async fn cancel(&self, order_id: &str) -> Result<bool, ExecutionError>;

    /// Mirrors the exchange's view of the order.
    async fn query(&self, order_id: &str) -> Result<Order, ExecutionError>;
}

/// One-shot targeted refresh of a symbol's market data over REST, used by
/// the staleness guard when a symbol degrades. Implementations dedupe
/// in-flight refreshes per symbol and time out after ~10s.
#[async_trait]
pub trait RefreshDispatcher: Send + Sync {
    async fn request_refresh(&self, symbol: &str) -> Result<()>;
}

/// Receiving side of staleness transitions; implemented by the circuit
/// breaker service.
#[async_trait]
pub trait StalenessSink: Send + Sync {
    /// Raises (or re-raises at a different severity) the staleness breaker.
    async fn on_staleness(&self, severity: StalenessSeverity, stale_symbols: usize, reason: &str);

    /// Clears the staleness breaker once all active symbols are fresh.
    async fn on_clean(&self);
}
