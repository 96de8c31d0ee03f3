use crate::domain::trading::types::OrderSide;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upper bound on any price or quantity accepted from the wire.
/// Anything larger is treated as a corrupt datum and dropped.
pub const MAX_LEVEL_MAGNITUDE: Decimal = dec!(1_000_000_000_000);

/// A single trade print for a symbol.
///
/// Ticks are append-only per symbol, stored newest-first in a bounded ring
/// (last 1000) with a ~1h TTL in the hot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: OrderSide,
    /// Exchange-reported timestamp, unix millis.
    pub exchange_ts_ms: i64,
    /// Local receive timestamp, unix millis.
    pub ingest_ts_ms: i64,
    pub seq_id: u64,
}

/// Latest-wins top-of-book quote, ~30s TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L1Quote {
    pub bid: Decimal,
    pub bid_qty: Decimal,
    pub ask: Decimal,
    pub ask_qty: Decimal,
    pub exchange_ts_ms: i64,
    pub ingest_ts_ms: i64,
}

impl L1Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }

    /// Spread in basis points of the mid. Zero mid yields zero.
    pub fn spread_bps(&self) -> Decimal {
        let mid = self.mid();
        if mid.is_zero() {
            return Decimal::ZERO;
        }
        (self.ask - self.bid) / mid * dec!(10_000)
    }
}

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Capped-depth order book snapshot as persisted to the hot store:
/// bids descending, asks ascending, top 10 per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Snapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub exchange_ts_ms: i64,
}

impl L2Snapshot {
    /// Notional resting in the top-10 of both sides, in quote currency.
    pub fn depth_notional(&self) -> Decimal {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .map(|l| l.price * l.quantity)
            .sum()
    }
}

/// OHLCV bar aligned to a frame boundary (`bar_ts % frame == 0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades_count: u32,
    pub vwap: Decimal,
    /// Unix seconds, aligned to the frame boundary.
    pub bar_ts: i64,
}

impl Bar {
    /// Aggregates a window of ticks into a bar. Ticks must be chronological
    /// (oldest first). Returns `None` for an empty window.
    pub fn from_ticks(symbol: &str, bar_ts: i64, ticks: &[Tick]) -> Option<Bar> {
        let first = ticks.first()?;
        let last = ticks.last()?;

        let mut high = first.price;
        let mut low = first.price;
        let mut volume = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        for tick in ticks {
            if tick.price > high {
                high = tick.price;
            }
            if tick.price < low {
                low = tick.price;
            }
            volume += tick.quantity;
            notional += tick.price * tick.quantity;
        }

        let vwap = if volume.is_zero() {
            last.price
        } else {
            notional / volume
        };

        Some(Bar {
            symbol: symbol.to_string(),
            open: first.price,
            high,
            low,
            close: last.price,
            volume,
            trades_count: ticks.len() as u32,
            vwap,
            bar_ts,
        })
    }

    /// Rolls child bars (chronological, e.g. 60 one-minute bars) up into a
    /// parent bar. Returns `None` for an empty slice.
    pub fn from_child_bars(symbol: &str, bar_ts: i64, children: &[Bar]) -> Option<Bar> {
        let first = children.first()?;
        let last = children.last()?;

        let mut high = first.high;
        let mut low = first.low;
        let mut volume = Decimal::ZERO;
        let mut notional = Decimal::ZERO;
        let mut trades_count = 0u32;
        for child in children {
            if child.high > high {
                high = child.high;
            }
            if child.low < low {
                low = child.low;
            }
            volume += child.volume;
            notional += child.vwap * child.volume;
            trades_count += child.trades_count;
        }

        let vwap = if volume.is_zero() {
            last.close
        } else {
            notional / volume
        };

        Some(Bar {
            symbol: symbol.to_string(),
            open: first.open,
            high,
            low,
            close: last.close,
            volume,
            trades_count,
            vwap,
            bar_ts,
        })
    }
}

/// Catalog entry for a tradable symbol with the liquidity metrics the
/// selector filters and ranks on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub id: String,
    pub exchange_symbol: String,
    pub display_symbol: String,
    pub volume_24h_usd: Decimal,
    pub spread_mid_pct: Decimal,
    pub depth_top10_usd: Decimal,
    pub atr_daily_pct: Decimal,
    pub real_volume_ratio: Option<Decimal>,
    pub is_active: bool,
}

/// One row of a selection run. Within a run, ranks are a permutation of
/// `1..=N`; `cluster_number` is set after clustering, in `[0, K)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub run_id: String,
    pub symbol_id: String,
    pub rank: u32,
    pub score: Decimal,
    pub cluster_number: Option<u32>,
}

/// Validates a raw order-book level. Rejects non-finite or non-positive
/// values and absurd magnitudes before they reach the store.
pub fn valid_level(price: Decimal, quantity: Decimal) -> bool {
    price > Decimal::ZERO
        && quantity > Decimal::ZERO
        && price <= MAX_LEVEL_MAGNITUDE
        && quantity <= MAX_LEVEL_MAGNITUDE
}

/// Parses a wire-format `(price, qty)` pair into a validated level.
/// Unparseable text (including NaN/Inf renderings) yields `None`.
pub fn parse_level(price: &str, quantity: &str) -> Option<BookLevel> {
    let price = Decimal::from_str(price).ok()?;
    let quantity = Decimal::from_str(quantity).ok()?;
    if valid_level(price, quantity) {
        Some(BookLevel { price, quantity })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: Decimal, qty: Decimal, ts_ms: i64) -> Tick {
        Tick {
            price,
            quantity: qty,
            side: OrderSide::Buy,
            exchange_ts_ms: ts_ms,
            ingest_ts_ms: ts_ms,
            seq_id: 0,
        }
    }

    #[test]
    fn test_bar_from_ticks_ohlcv() {
        let ticks = vec![
            tick(dec!(100), dec!(2), 1000),
            tick(dec!(110), dec!(1), 2000),
            tick(dec!(95), dec!(1), 3000),
            tick(dec!(105), dec!(4), 4000),
        ];
        let bar = Bar::from_ticks("BTC/USD", 0, &ticks).unwrap();
        assert_eq!(bar.open, dec!(100));
        assert_eq!(bar.high, dec!(110));
        assert_eq!(bar.low, dec!(95));
        assert_eq!(bar.close, dec!(105));
        assert_eq!(bar.volume, dec!(8));
        assert_eq!(bar.trades_count, 4);
        // vwap = (200 + 110 + 95 + 420) / 8
        assert_eq!(bar.vwap, dec!(825) / dec!(8));
    }

    #[test]
    fn test_bar_from_empty_window() {
        assert!(Bar::from_ticks("BTC/USD", 0, &[]).is_none());
    }

    #[test]
    fn test_hourly_rollup() {
        let children: Vec<Bar> = (0..60)
            .map(|i| Bar {
                symbol: "ETH/USD".to_string(),
                open: dec!(100) + Decimal::from(i),
                high: dec!(101) + Decimal::from(i),
                low: dec!(99) + Decimal::from(i),
                close: dec!(100.5) + Decimal::from(i),
                volume: dec!(1),
                trades_count: 2,
                vwap: dec!(100) + Decimal::from(i),
                bar_ts: i64::from(i) * 60,
            })
            .collect();

        let hour = Bar::from_child_bars("ETH/USD", 0, &children).unwrap();
        assert_eq!(hour.open, dec!(100));
        assert_eq!(hour.close, dec!(159.5));
        assert_eq!(hour.high, dec!(160));
        assert_eq!(hour.low, dec!(99));
        assert_eq!(hour.volume, dec!(60));
        assert_eq!(hour.trades_count, 120);
    }

    #[test]
    fn test_level_validation() {
        assert!(parse_level("30000.5", "0.25").is_some());
        assert!(parse_level("0", "1").is_none());
        assert!(parse_level("-5", "1").is_none());
        assert!(parse_level("NaN", "1").is_none());
        assert!(parse_level("inf", "1").is_none());
        assert!(parse_level("2000000000000", "1").is_none());
        assert!(parse_level("1", "0").is_none());
    }

    #[test]
    fn test_l1_spread_bps() {
        let quote = L1Quote {
            bid: dec!(99),
            bid_qty: dec!(1),
            ask: dec!(101),
            ask_qty: dec!(1),
            exchange_ts_ms: 0,
            ingest_ts_ms: 0,
        };
        assert_eq!(quote.mid(), dec!(100));
        assert_eq!(quote.spread_bps(), dec!(200));
    }
}
