//! Redis-backed `MarketStore`.
//!
//! Key layout:
//! - `market:tick:{exch}:{sym}`          list (newest first, trimmed to 1000, 1h TTL)
//! - `market:l1:{exch}:{sym}`            hash (30s TTL)
//! - `market:l2:bids|asks:{exch}:{sym}`  sorted set by price, member `"price:qty"` (60s TTL)
//! - `market:l2:ts:{exch}:{sym}`         string, exchange ts in ms (60s TTL)
//! - `market:last:{exch}:{sym}`          string `"price|ts_ms"`
//! - `bars:{1s|5s}:{exch}:{sym}:{ts}`    string JSON (24h TTL) + ts-sorted index
//! - `indicators:{name}:{sym}:{period}`  string (300s TTL)

use crate::domain::market::types::parse_level;
use crate::domain::market::{Bar, L1Quote, L2Snapshot, Tick, Timeframe};
use crate::domain::ports::MarketStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

const TICK_RING_CAP: isize = 1000;
const TICK_TTL_SECS: usize = 3600;
const L1_TTL_SECS: usize = 30;
const L2_TTL_SECS: usize = 60;
const HOT_BAR_TTL_SECS: usize = 86_400;
const INDICATOR_TTL_SECS: usize = 300;
/// Depth persisted per side.
const L2_PERSIST_DEPTH: usize = 10;

pub struct RedisMarketStore {
    conn: MultiplexedConnection,
    exchange: String,
}

impl RedisMarketStore {
    pub async fn connect(redis_url: &str, exchange: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to connect to redis")?;
        tracing::info!("Connected to redis hot store at {}", redis_url);
        Ok(Self {
            conn,
            exchange: exchange.to_string(),
        })
    }

    fn tick_key(&self, symbol: &str) -> String {
        format!("market:tick:{}:{}", self.exchange, symbol)
    }

    fn l1_key(&self, symbol: &str) -> String {
        format!("market:l1:{}:{}", self.exchange, symbol)
    }

    fn l2_side_key(&self, side: &str, symbol: &str) -> String {
        format!("market:l2:{}:{}:{}", side, self.exchange, symbol)
    }

    fn l2_ts_key(&self, symbol: &str) -> String {
        format!("market:l2:ts:{}:{}", self.exchange, symbol)
    }

    fn last_key(&self, symbol: &str) -> String {
        format!("market:last:{}:{}", self.exchange, symbol)
    }

    fn bar_key(&self, frame: Timeframe, symbol: &str, ts: i64) -> String {
        format!("bars:{}:{}:{}:{}", frame.label(), self.exchange, symbol, ts)
    }

    fn bar_index_key(&self, frame: Timeframe, symbol: &str) -> String {
        format!("bars:index:{}:{}:{}", frame.label(), self.exchange, symbol)
    }
}

#[async_trait]
impl MarketStore for RedisMarketStore {
    async fn append_tick(&self, symbol: &str, tick: &Tick) -> Result<()> {
        let key = self.tick_key(symbol);
        let payload = serde_json::to_string(tick)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(&key, payload)
            .ignore()
            .ltrim(&key, 0, TICK_RING_CAP - 1)
            .ignore()
            .expire(&key, TICK_TTL_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to append tick")?;
        Ok(())
    }

    async fn recent_ticks(&self, symbol: &str, limit: usize) -> Result<Vec<Tick>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(self.tick_key(symbol), 0, limit as isize - 1)
            .await
            .context("Failed to read ticks")?;
        // Unparseable entries are dropped rather than failing the read.
        Ok(raw
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect())
    }

    async fn put_l1(&self, symbol: &str, quote: &L1Quote) -> Result<()> {
        let key = self.l1_key(symbol);
        let fields = [
            ("bid", quote.bid.to_string()),
            ("bid_qty", quote.bid_qty.to_string()),
            ("ask", quote.ask.to_string()),
            ("ask_qty", quote.ask_qty.to_string()),
            ("exchange_ts", quote.exchange_ts_ms.to_string()),
            ("ingest_ts", quote.ingest_ts_ms.to_string()),
        ];
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .expire(&key, L1_TTL_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to write L1")?;
        Ok(())
    }

    async fn l1(&self, symbol: &str) -> Result<Option<L1Quote>> {
        let mut conn = self.conn.clone();
        let map: std::collections::HashMap<String, String> = conn
            .hgetall(self.l1_key(symbol))
            .await
            .context("Failed to read L1")?;
        if map.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| -> Option<Decimal> {
            map.get(name).and_then(|v| Decimal::from_str(v).ok())
        };
        let ts = |name: &str| -> Option<i64> { map.get(name).and_then(|v| v.parse().ok()) };

        match (
            field("bid"),
            field("bid_qty"),
            field("ask"),
            field("ask_qty"),
            ts("exchange_ts"),
            ts("ingest_ts"),
        ) {
            (Some(bid), Some(bid_qty), Some(ask), Some(ask_qty), Some(ex), Some(ing)) => {
                Ok(Some(L1Quote {
                    bid,
                    bid_qty,
                    ask,
                    ask_qty,
                    exchange_ts_ms: ex,
                    ingest_ts_ms: ing,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn put_l2_snapshot(&self, symbol: &str, snapshot: &L2Snapshot) -> Result<()> {
        let bids_key = self.l2_side_key("bids", symbol);
        let asks_key = self.l2_side_key("asks", symbol);
        let ts_key = self.l2_ts_key(symbol);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&bids_key).ignore();
        pipe.del(&asks_key).ignore();
        for level in snapshot.bids.iter().take(L2_PERSIST_DEPTH) {
            let member = format!("{}:{}", level.price, level.quantity);
            let score = level.price.to_f64().unwrap_or(0.0);
            pipe.zadd(&bids_key, member, score).ignore();
        }
        for level in snapshot.asks.iter().take(L2_PERSIST_DEPTH) {
            let member = format!("{}:{}", level.price, level.quantity);
            let score = level.price.to_f64().unwrap_or(0.0);
            pipe.zadd(&asks_key, member, score).ignore();
        }
        pipe.set(&ts_key, snapshot.exchange_ts_ms).ignore();
        pipe.expire(&bids_key, L2_TTL_SECS).ignore();
        pipe.expire(&asks_key, L2_TTL_SECS).ignore();
        pipe.expire(&ts_key, L2_TTL_SECS).ignore();

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to write L2 snapshot")?;
        Ok(())
    }

    async fn l2_snapshot(&self, symbol: &str) -> Result<Option<L2Snapshot>> {
        let mut conn = self.conn.clone();
        let bids_raw: Vec<String> = conn
            .zrevrange(self.l2_side_key("bids", symbol), 0, -1)
            .await
            .context("Failed to read L2 bids")?;
        let asks_raw: Vec<String> = conn
            .zrange(self.l2_side_key("asks", symbol), 0, -1)
            .await
            .context("Failed to read L2 asks")?;
        let ts: Option<i64> = conn
            .get(self.l2_ts_key(symbol))
            .await
            .context("Failed to read L2 ts")?;

        if bids_raw.is_empty() && asks_raw.is_empty() {
            return Ok(None);
        }

        let parse_side = |raw: &[String]| {
            raw.iter()
                .filter_map(|member| {
                    let (price, qty) = member.split_once(':')?;
                    parse_level(price, qty)
                })
                .collect()
        };

        Ok(Some(L2Snapshot {
            bids: parse_side(&bids_raw),
            asks: parse_side(&asks_raw),
            exchange_ts_ms: ts.unwrap_or(0),
        }))
    }

    async fn l2_timestamp_ms(&self, symbol: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let ts: Option<i64> = conn
            .get(self.l2_ts_key(symbol))
            .await
            .context("Failed to read L2 ts")?;
        Ok(ts)
    }

    async fn put_current_price(&self, symbol: &str, price: Decimal, ts_ms: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.last_key(symbol), format!("{}|{}", price, ts_ms))
            .await
            .context("Failed to write current price")?;
        Ok(())
    }

    async fn current_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.last_key(symbol))
            .await
            .context("Failed to read current price")?;
        Ok(raw
            .as_deref()
            .and_then(|s| s.split_once('|'))
            .and_then(|(price, _)| Decimal::from_str(price).ok()))
    }

    async fn put_hot_bar(&self, frame: Timeframe, bar: &Bar) -> Result<()> {
        let key = self.bar_key(frame, &bar.symbol, bar.bar_ts);
        let index = self.bar_index_key(frame, &bar.symbol);
        let payload = serde_json::to_string(bar)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set_ex(&key, payload, HOT_BAR_TTL_SECS)
            .ignore()
            .zadd(&index, bar.bar_ts, bar.bar_ts as f64)
            .ignore()
            .expire(&index, HOT_BAR_TTL_SECS)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to write hot bar")?;
        Ok(())
    }

    async fn hot_bars(&self, frame: Timeframe, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let mut conn = self.conn.clone();
        let ts_list: Vec<i64> = conn
            .zrevrange(self.bar_index_key(frame, symbol), 0, limit as isize - 1)
            .await
            .context("Failed to read bar index")?;

        let mut bars = Vec::with_capacity(ts_list.len());
        for ts in ts_list.iter().rev() {
            let raw: Option<String> = conn
                .get(self.bar_key(frame, symbol, *ts))
                .await
                .context("Failed to read bar")?;
            if let Some(raw) = raw
                && let Ok(bar) = serde_json::from_str::<Bar>(&raw)
            {
                bars.push(bar);
            }
        }
        Ok(bars)
    }

    async fn put_indicator(
        &self,
        name: &str,
        symbol: &str,
        period: u32,
        value: Decimal,
    ) -> Result<()> {
        let key = format!("indicators:{}:{}:{}", name, symbol, period);
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value.to_string(), INDICATOR_TTL_SECS)
            .await
            .context("Failed to cache indicator")?;
        Ok(())
    }

    async fn indicator(&self, name: &str, symbol: &str, period: u32) -> Result<Option<Decimal>> {
        let key = format!("indicators:{}:{}:{}", name, symbol, period);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.context("Failed to read indicator")?;
        Ok(raw.as_deref().and_then(|s| Decimal::from_str(s).ok()))
    }
}
