//! REST market data: the fallback poller used while the stream is down
//! and the targeted per-symbol refresh the staleness guard dispatches.
//!
//! Fallback strategy for ~100 symbols: one batched Ticker call (≤20 pairs
//! per request), then Depth + Trades per symbol in parallel batches of 8
//! to respect the process-wide rate budget. Individual refreshes are
//! deduplicated per symbol with a 10s in-flight window.

use crate::application::market_data::CoalescedBookWriter;
use crate::domain::market::types::parse_level;
use crate::domain::market::{BookLevel, L1Quote, L2Snapshot, Tick};
use crate::domain::ports::{MarketStore, RefreshDispatcher};
use crate::domain::trading::symbols::{to_display_symbol, to_exchange_symbol};
use crate::domain::trading::types::OrderSide;
use crate::infrastructure::kraken::common::KrakenRestClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const POLL_INTERVAL_SECS: u64 = 2;
const TICKER_BATCH: usize = 20;
const DEPTH_BATCH: usize = 8;
const DEPTH_COUNT: &str = "10";
const REFRESH_IN_FLIGHT_MS: i64 = 10_000;

pub struct KrakenMarketData {
    rest: Arc<KrakenRestClient>,
    store: Arc<dyn MarketStore>,
    book_writer: Arc<CoalescedBookWriter>,
    symbols: Arc<RwLock<Vec<String>>>,
    /// Polling only runs while the stream is down.
    fallback_enabled: AtomicBool,
    /// Per-symbol refresh dedup: symbol -> started-at ms.
    in_flight: Mutex<HashMap<String, i64>>,
    tick_seq: AtomicU64,
}

impl KrakenMarketData {
    pub fn new(
        rest: Arc<KrakenRestClient>,
        store: Arc<dyn MarketStore>,
        book_writer: Arc<CoalescedBookWriter>,
        symbols: Arc<RwLock<Vec<String>>>,
    ) -> Self {
        Self {
            rest,
            store,
            book_writer,
            symbols,
            fallback_enabled: AtomicBool::new(false),
            in_flight: Mutex::new(HashMap::new()),
            tick_seq: AtomicU64::new(0),
        }
    }

    /// Toggled by the bootstrap on stream connect/disconnect events.
    pub fn set_fallback_enabled(&self, enabled: bool) {
        let was = self.fallback_enabled.swap(enabled, Ordering::SeqCst);
        if enabled && !was {
            info!("REST fallback polling enabled");
        } else if !enabled && was {
            info!("REST fallback polling disabled (stream is back)");
        }
    }

    pub fn is_fallback_enabled(&self) -> bool {
        self.fallback_enabled.load(Ordering::SeqCst)
    }

    pub async fn run_fallback_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(POLL_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if !self.is_fallback_enabled() {
                continue;
            }
            let symbols = self.symbols.read().await.clone();
            if symbols.is_empty() {
                continue;
            }
            if let Err(e) = self.poll_all(&symbols).await {
                warn!("REST fallback sweep failed: {}", e);
            }
        }
    }

    /// One full sweep: batched tickers, then depth+trades in parallel
    /// batches. A failing symbol never stops the sweep.
    pub async fn poll_all(&self, symbols: &[String]) -> Result<()> {
        for chunk in symbols.chunks(TICKER_BATCH) {
            if let Err(e) = self.poll_tickers(chunk).await {
                warn!("Ticker batch failed: {}", e);
            }
        }

        for chunk in symbols.chunks(DEPTH_BATCH) {
            let results = join_all(chunk.iter().map(|s| self.poll_symbol_books(s))).await;
            for (symbol, result) in chunk.iter().zip(results) {
                if let Err(e) = result {
                    warn!("Depth/Trades poll failed for {}: {}", symbol, e);
                }
            }
        }
        Ok(())
    }

    async fn poll_tickers(&self, symbols: &[String]) -> Result<()> {
        let pairs: Vec<String> = symbols
            .iter()
            .filter_map(|s| to_exchange_symbol(s))
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }
        let joined = pairs.join(",");

        let result = self.rest.public_get("Ticker", &[("pair", &joined)]).await?;
        let entries = result.as_object().context("Ticker result not an object")?;

        let now_ms = Utc::now().timestamp_millis();
        for (pair, payload) in entries {
            let Some(symbol) = to_display_symbol(pair) else {
                continue;
            };
            if let Err(e) = self.apply_ticker(&symbol, payload, now_ms).await {
                debug!("Ticker entry for {} dropped: {}", symbol, e);
            }
        }
        Ok(())
    }

    async fn apply_ticker(
        &self,
        symbol: &str,
        payload: &serde_json::Value,
        now_ms: i64,
    ) -> Result<()> {
        fn field<'a>(payload: &'a serde_json::Value, key: &str, idx: usize) -> Option<&'a str> {
            payload.get(key)?.get(idx)?.as_str()
        }

        let last = field(payload, "c", 0).context("missing last price")?;
        let qty = field(payload, "c", 1).unwrap_or("0");
        if let Some(level) = parse_level(last, qty) {
            let tick = Tick {
                price: level.price,
                quantity: level.quantity,
                side: OrderSide::Buy,
                exchange_ts_ms: now_ms,
                ingest_ts_ms: now_ms,
                seq_id: self.tick_seq.fetch_add(1, Ordering::Relaxed),
            };
            self.store.append_tick(symbol, &tick).await?;
            self.store
                .put_current_price(symbol, level.price, now_ms)
                .await?;
        }

        if let (Some(bid), Some(ask)) = (field(payload, "b", 0), field(payload, "a", 0)) {
            let bid_qty = field(payload, "b", 1).unwrap_or("0.00000001");
            let ask_qty = field(payload, "a", 1).unwrap_or("0.00000001");
            if let (Some(b), Some(a)) = (parse_level(bid, bid_qty), parse_level(ask, ask_qty)) {
                let quote = L1Quote {
                    bid: b.price,
                    bid_qty: b.quantity,
                    ask: a.price,
                    ask_qty: a.quantity,
                    exchange_ts_ms: now_ms,
                    ingest_ts_ms: now_ms,
                };
                self.store.put_l1(symbol, &quote).await?;
            }
        }
        Ok(())
    }

    async fn poll_symbol_books(&self, symbol: &str) -> Result<()> {
        self.poll_depth(symbol).await?;
        self.poll_trades(symbol).await
    }

    async fn poll_depth(&self, symbol: &str) -> Result<()> {
        let pair = to_exchange_symbol(symbol).context("bad symbol")?;
        let result = self
            .rest
            .public_get("Depth", &[("pair", &pair), ("count", DEPTH_COUNT)])
            .await?;
        let book = result
            .get(&pair)
            .or_else(|| result.as_object().and_then(|o| o.values().next()))
            .context("Depth result missing pair")?;

        let parse_side = |key: &str| -> Vec<BookLevel> {
            book.get(key)
                .and_then(|levels| levels.as_array())
                .map(|levels| {
                    levels
                        .iter()
                        .filter_map(|entry| {
                            let price = entry.get(0)?.as_str()?;
                            let qty = entry.get(1)?.as_str()?;
                            parse_level(price, qty)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut bids = parse_side("bids");
        let mut asks = parse_side("asks");
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let snapshot = L2Snapshot {
            bids,
            asks,
            exchange_ts_ms: Utc::now().timestamp_millis(),
        };
        self.book_writer.submit(symbol, snapshot).await;
        Ok(())
    }

    async fn poll_trades(&self, symbol: &str) -> Result<()> {
        let pair = to_exchange_symbol(symbol).context("bad symbol")?;
        let result = self.rest.public_get("Trades", &[("pair", &pair)]).await?;
        let trades = result
            .get(&pair)
            .or_else(|| {
                result
                    .as_object()
                    .and_then(|o| o.iter().find(|(k, _)| *k != "last").map(|(_, v)| v))
            })
            .and_then(|t| t.as_array())
            .context("Trades result missing pair")?;

        let now_ms = Utc::now().timestamp_millis();
        for entry in trades.iter().rev().take(50).rev() {
            let Some(fields) = entry.as_array() else {
                continue;
            };
            let (Some(price), Some(qty)) = (
                fields.first().and_then(|p| p.as_str()),
                fields.get(1).and_then(|q| q.as_str()),
            ) else {
                continue;
            };
            let Some(level) = parse_level(price, qty) else {
                continue;
            };

            let ts_ms = fields
                .get(2)
                .and_then(|t| t.as_f64())
                .map(|secs| (secs * 1000.0) as i64)
                .unwrap_or(now_ms);
            let side = match fields.get(3).and_then(|s| s.as_str()) {
                Some("s") => OrderSide::Sell,
                _ => OrderSide::Buy,
            };

            let tick = Tick {
                price: level.price,
                quantity: level.quantity,
                side,
                exchange_ts_ms: ts_ms,
                ingest_ts_ms: now_ms,
                seq_id: self.tick_seq.fetch_add(1, Ordering::Relaxed),
            };
            self.store.append_tick(symbol, &tick).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshDispatcher for KrakenMarketData {
    /// Targeted refresh of one symbol: ticker, depth and trades. Deduped
    /// per symbol while a refresh is already running.
    async fn request_refresh(&self, symbol: &str) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(started) = in_flight.get(symbol)
                && now_ms - started < REFRESH_IN_FLIGHT_MS
            {
                debug!("Refresh for {} already in flight", symbol);
                return Ok(());
            }
            in_flight.insert(symbol.to_string(), now_ms);
        }

        let target = [symbol.to_string()];
        let result = async {
            self.poll_tickers(&target).await?;
            self.poll_symbol_books(symbol).await
        }
        .await;

        self.in_flight.lock().await.remove(symbol);
        result
    }
}
