//! L2 write coalescing: while a write is in flight, later snapshots
//! replace the pending payload; the store converges to the last submitted
//! book and no intermediate payload is persisted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tidebot::application::market_data::CoalescedBookWriter;
use tidebot::domain::market::{Bar, BookLevel, L1Quote, L2Snapshot, Tick, Timeframe};
use tidebot::domain::ports::MarketStore;
use tidebot::infrastructure::market_store::InMemoryMarketStore;
use tokio::sync::Notify;

/// Store wrapper whose L2 writes block until released, so tests can hold
/// a write in flight deterministically.
struct GatedStore {
    inner: InMemoryMarketStore,
    gate: Notify,
    entered: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMarketStore::new(),
            gate: Notify::new(),
            entered: Notify::new(),
        }
    }
}

#[async_trait]
impl MarketStore for GatedStore {
    async fn append_tick(&self, symbol: &str, tick: &Tick) -> anyhow::Result<()> {
        self.inner.append_tick(symbol, tick).await
    }

    async fn recent_ticks(&self, symbol: &str, limit: usize) -> anyhow::Result<Vec<Tick>> {
        self.inner.recent_ticks(symbol, limit).await
    }

    async fn put_l1(&self, symbol: &str, quote: &L1Quote) -> anyhow::Result<()> {
        self.inner.put_l1(symbol, quote).await
    }

    async fn l1(&self, symbol: &str) -> anyhow::Result<Option<L1Quote>> {
        self.inner.l1(symbol).await
    }

    async fn put_l2_snapshot(&self, symbol: &str, snapshot: &L2Snapshot) -> anyhow::Result<()> {
        self.entered.notify_waiters();
        self.gate.notified().await;
        self.inner.put_l2_snapshot(symbol, snapshot).await
    }

    async fn l2_snapshot(&self, symbol: &str) -> anyhow::Result<Option<L2Snapshot>> {
        self.inner.l2_snapshot(symbol).await
    }

    async fn l2_timestamp_ms(&self, symbol: &str) -> anyhow::Result<Option<i64>> {
        self.inner.l2_timestamp_ms(symbol).await
    }

    async fn put_current_price(
        &self,
        symbol: &str,
        price: Decimal,
        ts_ms: i64,
    ) -> anyhow::Result<()> {
        self.inner.put_current_price(symbol, price, ts_ms).await
    }

    async fn current_price(&self, symbol: &str) -> anyhow::Result<Option<Decimal>> {
        self.inner.current_price(symbol).await
    }

    async fn put_hot_bar(&self, frame: Timeframe, bar: &Bar) -> anyhow::Result<()> {
        self.inner.put_hot_bar(frame, bar).await
    }

    async fn hot_bars(
        &self,
        frame: Timeframe,
        symbol: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Bar>> {
        self.inner.hot_bars(frame, symbol, limit).await
    }

    async fn put_indicator(
        &self,
        name: &str,
        symbol: &str,
        period: u32,
        value: Decimal,
    ) -> anyhow::Result<()> {
        self.inner.put_indicator(name, symbol, period, value).await
    }

    async fn indicator(
        &self,
        name: &str,
        symbol: &str,
        period: u32,
    ) -> anyhow::Result<Option<Decimal>> {
        self.inner.indicator(name, symbol, period).await
    }
}

fn snapshot(bid: Decimal, ts: i64) -> L2Snapshot {
    L2Snapshot {
        bids: vec![BookLevel {
            price: bid,
            quantity: dec!(1),
        }],
        asks: vec![BookLevel {
            price: bid + dec!(1),
            quantity: dec!(1),
        }],
        exchange_ts_ms: ts,
    }
}

#[tokio::test]
async fn test_updates_during_in_flight_write_coalesce_to_last() {
    let store = Arc::new(GatedStore::new());
    let writer = CoalescedBookWriter::new(store.clone());

    // u1 starts a write and parks at the gate.
    let entered = store.entered.notified();
    writer.submit("ETH/USD", snapshot(dec!(2001), 1)).await;
    entered.await;

    // u2 and u3 arrive while u1 is in flight: each replaces the pending
    // slot, nothing queues.
    writer.submit("ETH/USD", snapshot(dec!(2002), 2)).await;
    writer.submit("ETH/USD", snapshot(dec!(2003), 3)).await;

    // Release u1 and whatever follow-up write the coalescer schedules.
    let releaser = tokio::spawn({
        let store = store.clone();
        async move {
            loop {
                store.gate.notify_waiters();
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
        }
    });
    writer.flush().await;
    releaser.abort();

    // Exactly two writes total and the persisted book is u3; u2 was never
    // persisted.
    assert_eq!(store.inner.l2_write_count(), 2);
    let book = store.inner.l2_snapshot("ETH/USD").await.unwrap().unwrap();
    assert_eq!(book.exchange_ts_ms, 3);
    assert_eq!(book.bids[0].price, dec!(2003));
}

#[tokio::test]
async fn test_write_after_drain_starts_fresh() {
    let store = Arc::new(GatedStore::new());
    let writer = CoalescedBookWriter::new(store.clone());

    let releaser = tokio::spawn({
        let store = store.clone();
        async move {
            loop {
                store.gate.notify_waiters();
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
        }
    });

    writer.submit("ETH/USD", snapshot(dec!(2001), 1)).await;
    writer.flush().await;
    assert_eq!(store.inner.l2_write_count(), 1);

    // Next submission is independent and writes again.
    writer.submit("ETH/USD", snapshot(dec!(2005), 5)).await;
    writer.flush().await;
    releaser.abort();

    assert_eq!(store.inner.l2_write_count(), 2);
    let book = store.inner.l2_snapshot("ETH/USD").await.unwrap().unwrap();
    assert_eq!(book.exchange_ts_ms, 5);
}
