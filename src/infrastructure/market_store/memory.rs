//! In-memory `MarketStore` used by the test suite and by paper runs
//! without a redis instance. Mirrors the redis implementation's trimming
//! behavior; TTLs are not simulated because freshness decisions key off
//! stored timestamps, not key expiry.

use crate::domain::market::{Bar, L1Quote, L2Snapshot, Tick, Timeframe};
use crate::domain::ports::MarketStore;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

const TICK_RING_CAP: usize = 1000;

#[derive(Default)]
pub struct InMemoryMarketStore {
    /// Front = newest, matching the head-first redis list.
    ticks: RwLock<HashMap<String, VecDeque<Tick>>>,
    l1: RwLock<HashMap<String, L1Quote>>,
    l2: RwLock<HashMap<String, L2Snapshot>>,
    last_price: RwLock<HashMap<String, (Decimal, i64)>>,
    hot_bars: RwLock<HashMap<(Timeframe, String), BTreeMap<i64, Bar>>>,
    indicators: RwLock<HashMap<String, Decimal>>,
    /// Count of persisted L2 snapshots, observed by coalescing tests.
    l2_write_count: AtomicU64,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn l2_write_count(&self) -> u64 {
        self.l2_write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn append_tick(&self, symbol: &str, tick: &Tick) -> Result<()> {
        let mut ticks = self.ticks.write().await;
        let ring = ticks.entry(symbol.to_string()).or_default();
        ring.push_front(tick.clone());
        ring.truncate(TICK_RING_CAP);
        Ok(())
    }

    async fn recent_ticks(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>> {
        let ticks = self.ticks.read().await;
        Ok(ticks
            .get(symbol)
            .map(|ring| ring.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn put_l1(&self, symbol: &str, quote: &L1Quote) -> Result<()> {
        self.l1
            .write()
            .await
            .insert(symbol.to_string(), quote.clone());
        Ok(())
    }

    async fn l1(&self, symbol: &str) -> Result<Option<L1Quote>> {
        Ok(self.l1.read().await.get(symbol).cloned())
    }

    async fn put_l2_snapshot(&self, symbol: &str, snapshot: &L2Snapshot) -> Result<()> {
        self.l2
            .write()
            .await
            .insert(symbol.to_string(), snapshot.clone());
        self.l2_write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn l2_snapshot(&self, symbol: &str) -> Result<Option<L2Snapshot>> {
        Ok(self.l2.read().await.get(symbol).cloned())
    }

    async fn l2_timestamp_ms(&self, symbol: &str) -> Result<Option<i64>> {
        Ok(self
            .l2
            .read()
            .await
            .get(symbol)
            .map(|s| s.exchange_ts_ms))
    }

    async fn put_current_price(&self, symbol: &str, price: Decimal, ts_ms: i64) -> Result<()> {
        self.last_price
            .write()
            .await
            .insert(symbol.to_string(), (price, ts_ms));
        Ok(())
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self
            .last_price
            .read()
            .await
            .get(symbol)
            .map(|(price, _)| *price))
    }

    async fn put_hot_bar(&self, frame: Timeframe, bar: &Bar) -> Result<()> {
        let mut bars = self.hot_bars.write().await;
        bars.entry((frame, bar.symbol.clone()))
            .or_default()
            .insert(bar.bar_ts, bar.clone());
        Ok(())
    }

    async fn hot_bars(&self, frame: Timeframe, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let bars = self.hot_bars.read().await;
        Ok(bars
            .get(&(frame, symbol.to_string()))
            .map(|by_ts| {
                let mut recent: Vec<Bar> = by_ts.values().rev().take(limit).cloned().collect();
                recent.reverse();
                recent
            })
            .unwrap_or_default())
    }

    async fn put_indicator(
        &self,
        name: &str,
        symbol: &str,
        period: u32,
        value: Decimal,
    ) -> Result<()> {
        let key = format!("{}:{}:{}", name, symbol, period);
        self.indicators.write().await.insert(key, value);
        Ok(())
    }

    async fn indicator(&self, name: &str, symbol: &str, period: u32) -> Result<Option<Decimal>> {
        let key = format!("{}:{}:{}", name, symbol, period);
        Ok(self.indicators.read().await.get(&key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::OrderSide;
    use rust_decimal_macros::dec;

    fn tick(seq: u64) -> Tick {
        Tick {
            price: dec!(100),
            quantity: dec!(1),
            side: OrderSide::Buy,
            exchange_ts_ms: seq as i64,
            ingest_ts_ms: seq as i64,
            seq_id: seq,
        }
    }

    #[tokio::test]
    async fn test_tick_ring_is_bounded_and_newest_first() {
        let store = InMemoryMarketStore::new();
        for seq in 0..1100 {
            store.append_tick("BTC/USD", &tick(seq)).await.unwrap();
        }
        let recent = store.recent_ticks("BTC/USD", 2000).await.unwrap();
        assert_eq!(recent.len(), 1000);
        assert_eq!(recent[0].seq_id, 1099);
        assert_eq!(recent.last().unwrap().seq_id, 100);
    }

    #[tokio::test]
    async fn test_hot_bars_returns_ascending_tail() {
        let store = InMemoryMarketStore::new();
        for ts in [0_i64, 60, 120, 180] {
            let bar = Bar {
                symbol: "ETH/USD".to_string(),
                open: dec!(1),
                high: dec!(1),
                low: dec!(1),
                close: dec!(1),
                volume: dec!(1),
                trades_count: 1,
                vwap: dec!(1),
                bar_ts: ts,
            };
            store.put_hot_bar(Timeframe::OneMin, &bar).await.unwrap();
        }
        let bars = store
            .hot_bars(Timeframe::OneMin, "ETH/USD", 2)
            .await
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].bar_ts, 120);
        assert_eq!(bars[1].bar_ts, 180);
    }
}
