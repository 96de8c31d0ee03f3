//! Streaming market data session.
//!
//! Maintains one persistent connection subscribed to ticker and book-10
//! for all active symbols (batches of ≤20 pairs, ≥1s apart). Messages are
//! either event-typed objects (heartbeat, pong, systemStatus,
//! subscriptionStatus) or `[channelId, payload, channelName, pair]`
//! arrays. The in-memory book keeps the top 100 levels per side and
//! persists the top 10 through the coalesced writer. Reconnects use a
//! fixed 5s backoff and resubscribe idempotently; the book cache is
//! cleared on every (re)connect.

use crate::application::market_data::CoalescedBookWriter;
use crate::domain::market::types::parse_level;
use crate::domain::market::{BookLevel, L1Quote, L2Snapshot, Tick};
use crate::domain::ports::MarketStore;
use crate::domain::trading::symbols::{from_stream_pair, to_stream_pair};
use crate::domain::trading::types::OrderSide;
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const SUBSCRIBE_BATCH: usize = 20;
const SUBSCRIBE_BATCH_DELAY_MS: u64 = 1000;
const RECONNECT_BACKOFF_SECS: u64 = 5;
const PING_INTERVAL_SECS: u64 = 30;
const BOOK_DEPTH_SUBSCRIBED: usize = 10;
/// Levels kept in memory per side.
const BOOK_DEPTH_CACHED: usize = 100;

#[derive(Debug, Clone)]
pub enum IngestorEvent {
    Connected,
    Disconnected { reason: String },
    UnsupportedSymbol { symbol: String },
}

#[derive(Default)]
struct BookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_ts_ms: i64,
}

impl BookState {
    fn trim(&mut self) {
        // Bids keep the highest prices, asks the lowest.
        while self.bids.len() > BOOK_DEPTH_CACHED {
            let lowest = *self.bids.keys().next().expect("non-empty");
            self.bids.remove(&lowest);
        }
        while self.asks.len() > BOOK_DEPTH_CACHED {
            let highest = *self.asks.keys().next_back().expect("non-empty");
            self.asks.remove(&highest);
        }
    }

    fn snapshot(&self) -> L2Snapshot {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(BOOK_DEPTH_SUBSCRIBED)
            .map(|(price, qty)| BookLevel {
                price: *price,
                quantity: *qty,
            })
            .collect();
        let asks = self
            .asks
            .iter()
            .take(BOOK_DEPTH_SUBSCRIBED)
            .map(|(price, qty)| BookLevel {
                price: *price,
                quantity: *qty,
            })
            .collect();
        L2Snapshot {
            bids,
            asks,
            exchange_ts_ms: self.last_ts_ms,
        }
    }
}

pub struct KrakenWebSocketManager {
    ws_url: String,
    store: Arc<dyn MarketStore>,
    book_writer: Arc<CoalescedBookWriter>,
    event_tx: broadcast::Sender<IngestorEvent>,
    symbols: Arc<RwLock<Vec<String>>>,
    books: Mutex<HashMap<String, BookState>>,
    tick_seq: AtomicU64,
    last_liveness_ms: AtomicI64,
    validation_drops: AtomicU64,
}

impl KrakenWebSocketManager {
    pub fn new(
        ws_url: String,
        store: Arc<dyn MarketStore>,
        book_writer: Arc<CoalescedBookWriter>,
        symbols: Arc<RwLock<Vec<String>>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            ws_url,
            store,
            book_writer,
            event_tx,
            symbols,
            books: Mutex::new(HashMap::new()),
            tick_seq: AtomicU64::new(0),
            last_liveness_ms: AtomicI64::new(0),
            validation_drops: AtomicU64::new(0),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<IngestorEvent> {
        self.event_tx.subscribe()
    }

    pub fn last_liveness_ms(&self) -> i64 {
        self.last_liveness_ms.load(Ordering::Relaxed)
    }

    pub fn validation_drops(&self) -> u64 {
        self.validation_drops.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    info!("WebSocket session closed by server");
                    let _ = self.event_tx.send(IngestorEvent::Disconnected {
                        reason: "closed by server".to_string(),
                    });
                }
                Err(e) => {
                    error!("WebSocket session error: {}", e);
                    let _ = self.event_tx.send(IngestorEvent::Disconnected {
                        reason: e.to_string(),
                    });
                }
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(RECONNECT_BACKOFF_SECS)).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<()> {
        let symbols = self.symbols.read().await.clone();
        if symbols.is_empty() {
            warn!("No symbols to stream, retrying later");
            return Ok(());
        }

        info!("Connecting to stream at {}", self.ws_url);
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .context("WebSocket connect failed")?;
        info!("Stream connected; subscribing {} symbols", symbols.len());

        // A reconnect invalidates any sequenced book state.
        self.books.lock().await.clear();
        self.touch_liveness();
        let _ = self.event_tx.send(IngestorEvent::Connected);

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Message>(100);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Protocol-level ping keeps intermediaries and the liveness timer
        // honest.
        let ping_tx = out_tx.clone();
        let ping_task = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
            interval.tick().await;
            loop {
                interval.tick().await;
                let ping = serde_json::json!({ "event": "ping" }).to_string();
                if ping_tx.send(Message::Text(ping.into())).await.is_err() {
                    break;
                }
            }
        });

        // Batched subscriptions: ticker and book-10, ≤20 pairs per
        // message, ≥1s apart.
        let pairs: Vec<String> = symbols.iter().filter_map(|s| to_stream_pair(s)).collect();
        for chunk in pairs.chunks(SUBSCRIBE_BATCH) {
            for subscription in [
                serde_json::json!({ "name": "ticker" }),
                serde_json::json!({ "name": "book", "depth": BOOK_DEPTH_SUBSCRIBED }),
            ] {
                let msg = serde_json::json!({
                    "event": "subscribe",
                    "pair": chunk,
                    "subscription": subscription,
                })
                .to_string();
                out_tx
                    .send(Message::Text(msg.into()))
                    .await
                    .map_err(|_| anyhow::anyhow!("subscribe channel closed"))?;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(SUBSCRIBE_BATCH_DELAY_MS))
                .await;
        }

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.route_message(&text).await {
                        debug!("Unroutable message: {} ({})", e, text);
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = out_tx.send(Message::Pong(payload)).await;
                }
                Ok(Message::Pong(_)) => self.touch_liveness(),
                Ok(Message::Close(frame)) => {
                    info!("Stream closed by server: {:?}", frame);
                    break;
                }
                Err(e) => {
                    ping_task.abort();
                    return Err(crate::domain::errors::MarketDataError::ConnectionLost {
                        reason: e.to_string(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        ping_task.abort();
        Ok(())
    }

    fn touch_liveness(&self) {
        self.last_liveness_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn count_drop(&self) {
        self.validation_drops.fetch_add(1, Ordering::Relaxed);
    }

    async fn route_message(&self, text: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        match &value {
            serde_json::Value::Object(obj) => {
                match obj.get("event").and_then(|e| e.as_str()) {
                    Some("heartbeat") | Some("pong") | Some("systemStatus") => {
                        self.touch_liveness();
                    }
                    Some("subscriptionStatus") => self.handle_subscription_status(obj).await,
                    _ => {}
                }
                Ok(())
            }
            serde_json::Value::Array(items) => {
                self.touch_liveness();
                self.handle_channel_message(items).await
            }
            _ => Ok(()),
        }
    }

    async fn handle_subscription_status(
        &self,
        obj: &serde_json::Map<String, serde_json::Value>,
    ) {
        let status = obj.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status != "error" {
            return;
        }
        let message = obj
            .get("errorMessage")
            .and_then(|m| m.as_str())
            .unwrap_or("");
        let pair = obj.get("pair").and_then(|p| p.as_str()).unwrap_or("");

        if message.to_lowercase().contains("not supported")
            && let Some(symbol) = from_stream_pair(pair)
        {
            warn!("Exchange rejected pair {}: {}", pair, message);
            let _ = self
                .event_tx
                .send(IngestorEvent::UnsupportedSymbol { symbol });
        }
    }

    /// `[channelId, payload, channelName, pair]`
    async fn handle_channel_message(&self, items: &[serde_json::Value]) -> Result<()> {
        if items.len() < 4 {
            anyhow::bail!("short channel message");
        }
        let channel = items[items.len() - 2]
            .as_str()
            .context("missing channel name")?;
        let pair = items[items.len() - 1].as_str().context("missing pair")?;
        let symbol = from_stream_pair(pair).context("unknown pair form")?;

        if channel == "ticker" {
            self.handle_ticker(&symbol, &items[1]).await
        } else if channel.starts_with("book-") {
            // Snapshot and delta can arrive as separate payload objects in
            // one frame; apply each in order.
            for payload in &items[1..items.len() - 2] {
                self.handle_book(&symbol, payload).await?;
            }
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Ticker payload: `c[0]`=price, `c[1]`=qty, `b[0,1]`=bid/bidQty,
    /// `a[0,1]`=ask/askQty.
    async fn handle_ticker(&self, symbol: &str, payload: &serde_json::Value) -> Result<()> {
        fn field<'a>(payload: &'a serde_json::Value, key: &str, idx: usize) -> Option<&'a str> {
            payload.get(key)?.get(idx)?.as_str()
        }

        let now_ms = Utc::now().timestamp_millis();

        let Some(last) = field(payload, "c", 0) else {
            self.count_drop();
            anyhow::bail!("ticker missing last price");
        };
        let qty = field(payload, "c", 1).unwrap_or("0");

        // True aggressor side is unknown on the ticker channel.
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
        } else {
            self.count_drop();
        }

        if let (Some(bid), Some(bid_qty), Some(ask), Some(ask_qty)) = (
            field(payload, "b", 0),
            field(payload, "b", 1),
            field(payload, "a", 0),
            field(payload, "a", 1),
        ) {
            match (parse_level(bid, bid_qty), parse_level(ask, ask_qty)) {
                (Some(b), Some(a)) => {
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
                _ => self.count_drop(),
            }
        }

        Ok(())
    }

    /// Book payload: snapshot `{bs, as}` or delta `{b, a}` of
    /// `[price, volume, ts]` triples. A zero volume deletes the level.
    async fn handle_book(&self, symbol: &str, payload: &serde_json::Value) -> Result<()> {
        let snapshot = {
            let mut books = self.books.lock().await;
            let book = books.entry(symbol.to_string()).or_default();

            if payload.get("bs").is_some() || payload.get("as").is_some() {
                book.bids.clear();
                book.asks.clear();
                self.apply_levels(book, payload.get("bs"), true);
                self.apply_levels(book, payload.get("as"), false);
            } else {
                self.apply_levels(book, payload.get("b"), true);
                self.apply_levels(book, payload.get("a"), false);
            }
            book.trim();
            book.snapshot()
        };

        self.book_writer.submit(symbol, snapshot).await;
        Ok(())
    }

    fn apply_levels(&self, book: &mut BookState, levels: Option<&serde_json::Value>, bid: bool) {
        let Some(levels) = levels.and_then(|l| l.as_array()) else {
            return;
        };
        for triple in levels {
            let Some(entries) = triple.as_array() else {
                self.count_drop();
                continue;
            };
            let (Some(price_raw), Some(qty_raw)) =
                (entries.first().and_then(|p| p.as_str()), entries.get(1).and_then(|q| q.as_str()))
            else {
                self.count_drop();
                continue;
            };

            let Ok(price) = price_raw.parse::<Decimal>() else {
                self.count_drop();
                continue;
            };

            let side = if bid { &mut book.bids } else { &mut book.asks };

            // Delta with zero volume deletes the level.
            if qty_raw.parse::<Decimal>().map(|q| q.is_zero()).unwrap_or(false) {
                side.remove(&price);
            } else if let Some(level) = parse_level(price_raw, qty_raw) {
                side.insert(level.price, level.quantity);
            } else {
                self.count_drop();
                continue;
            }

            if let Some(ts_raw) = entries.get(2).and_then(|t| t.as_str())
                && let Ok(ts_secs) = ts_raw.parse::<f64>()
            {
                let ts_ms = (ts_secs * 1000.0) as i64;
                if ts_ms > book.last_ts_ms {
                    book.last_ts_ms = ts_ms;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::market_store::InMemoryMarketStore;
    use rust_decimal_macros::dec;

    fn manager() -> (Arc<InMemoryMarketStore>, KrakenWebSocketManager) {
        let store = Arc::new(InMemoryMarketStore::new());
        let writer = Arc::new(CoalescedBookWriter::new(store.clone()));
        let manager = KrakenWebSocketManager::new(
            "wss://example".to_string(),
            store.clone(),
            writer,
            Arc::new(RwLock::new(vec!["BTC/USD".to_string()])),
        );
        (store, manager)
    }

    #[tokio::test]
    async fn test_ticker_writes_tick_l1_and_price() {
        let (store, manager) = manager();
        let msg = serde_json::json!([
            42,
            {
                "c": ["30000.5", "0.25"],
                "b": ["30000.0", "1.5"],
                "a": ["30001.0", "2.0"],
                "v": ["100", "2500"],
                "h": ["99", "31000"],
                "l": ["98", "29000"]
            },
            "ticker",
            "XBT/USD"
        ])
        .to_string();

        manager.route_message(&msg).await.unwrap();

        let ticks = store.recent_ticks("BTC/USD", 10).await.unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].price, dec!(30000.5));
        assert_eq!(ticks[0].side, OrderSide::Buy);

        let quote = store.l1("BTC/USD").await.unwrap().unwrap();
        assert_eq!(quote.bid, dec!(30000.0));
        assert_eq!(quote.ask_qty, dec!(2.0));

        assert_eq!(
            store.current_price("BTC/USD").await.unwrap().unwrap(),
            dec!(30000.5)
        );
    }

    #[tokio::test]
    async fn test_book_snapshot_then_delta_with_delete() {
        let (store, manager) = manager();

        let snapshot = serde_json::json!([
            0,
            {
                "bs": [
                    ["30000.0", "1.0", "1700000000.1"],
                    ["29999.0", "2.0", "1700000000.1"]
                ],
                "as": [
                    ["30001.0", "1.5", "1700000000.1"],
                    ["30002.0", "2.5", "1700000000.1"]
                ]
            },
            "book-10",
            "XBT/USD"
        ])
        .to_string();
        manager.route_message(&snapshot).await.unwrap();
        manager.book_writer.flush().await;

        let book = store.l2_snapshot("BTC/USD").await.unwrap().unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0].price, dec!(30000.0)); // best bid first
        assert_eq!(book.asks[0].price, dec!(30001.0)); // best ask first

        // Delta deletes a bid and updates an ask.
        let delta = serde_json::json!([
            0,
            {
                "b": [["30000.0", "0", "1700000001.2"]],
                "a": [["30001.0", "9.0", "1700000001.3"]]
            },
            "book-10",
            "XBT/USD"
        ])
        .to_string();
        manager.route_message(&delta).await.unwrap();
        manager.book_writer.flush().await;

        let book = store.l2_snapshot("BTC/USD").await.unwrap().unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.bids[0].price, dec!(29999.0));
        assert_eq!(book.asks[0].quantity, dec!(9.0));
        assert_eq!(book.exchange_ts_ms, 1_700_000_001_300);
    }

    #[tokio::test]
    async fn test_unsupported_pair_emits_event() {
        let (_, manager) = manager();
        let mut events = manager.subscribe_events();

        let msg = serde_json::json!({
            "event": "subscriptionStatus",
            "status": "error",
            "errorMessage": "Subscription book-10 pair not supported",
            "pair": "XYZ/USD"
        })
        .to_string();
        manager.route_message(&msg).await.unwrap();

        match events.try_recv().unwrap() {
            IngestorEvent::UnsupportedSymbol { symbol } => assert_eq!(symbol, "XYZ/USD"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_levels_are_dropped_and_counted() {
        let (store, manager) = manager();
        let msg = serde_json::json!([
            42,
            { "c": ["-5", "0.25"] },
            "ticker",
            "XBT/USD"
        ])
        .to_string();
        manager.route_message(&msg).await.unwrap();

        assert!(store.recent_ticks("BTC/USD", 10).await.unwrap().is_empty());
        assert_eq!(manager.validation_drops(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_advances_liveness() {
        let (_, manager) = manager();
        assert_eq!(manager.last_liveness_ms(), 0);
        manager
            .route_message(&serde_json::json!({ "event": "heartbeat" }).to_string())
            .await
            .unwrap();
        assert!(manager.last_liveness_ms() > 0);
    }
}
