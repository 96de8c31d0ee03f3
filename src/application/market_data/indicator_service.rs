//! Indicator reads with caching and a synthetic bootstrap fallback.
//!
//! Real values come from durable hourly bars over the last 30 days and are
//! cached in the hot store for 5 minutes. While a symbol has fewer than 37
//! bars of history (not enough for ATR14 + EMA36), a synthetic set derived
//! from the L1 mid and a base-asset ATR table stands in. The synthetic
//! pseudo-trend is a pure function of (symbol, minute) so runs reproduce.

use crate::domain::market::indicators::{atr, ema, realized_volatility};
use crate::domain::market::{Bar, Timeframe};
use crate::domain::ports::MarketStore;
use crate::domain::repositories::BarRepository;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::debug;

/// Minimum bar history for real ATR14 + EMA36.
const MIN_BARS_FOR_REAL: usize = 37;
/// 30 days of hourly bars.
const LOOKBACK_BARS: usize = 720;
const BARS_PER_WEEK: usize = 168;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    pub atr14: Option<Decimal>,
    pub ema12: Option<Decimal>,
    pub ema36: Option<Decimal>,
    pub volume_7d: Option<Decimal>,
    pub volatility_30d: Option<Decimal>,
    /// True when the set was synthesized from the mid price.
    pub synthetic: bool,
}

impl IndicatorSet {
    pub fn is_complete(&self) -> bool {
        self.atr14.is_some() && self.ema12.is_some() && self.ema36.is_some()
    }
}

pub struct IndicatorService {
    store: Arc<dyn MarketStore>,
    bars: Arc<dyn BarRepository>,
}

impl IndicatorService {
    pub fn new(store: Arc<dyn MarketStore>, bars: Arc<dyn BarRepository>) -> Self {
        Self { store, bars }
    }

    /// Returns the indicator set for `symbol`. Never fails: missing data
    /// and parse problems degrade to `None` fields or the synthetic set.
    pub async fn indicators(&self, symbol: &str, now_ms: i64) -> IndicatorSet {
        if let Some(cached) = self.read_cache(symbol).await {
            return cached;
        }

        let history = self
            .bars
            .latest_bars(symbol, Timeframe::OneHour, LOOKBACK_BARS)
            .await
            .unwrap_or_default();

        let set = if history.len() >= MIN_BARS_FOR_REAL {
            self.compute_real(symbol, &history).await
        } else {
            self.synthetic(symbol, now_ms).await
        };

        self.write_cache(symbol, &set).await;
        set
    }

    async fn compute_real(&self, symbol: &str, history: &[Bar]) -> IndicatorSet {
        let closes: Vec<Decimal> = history.iter().map(|b| b.close).collect();

        let week_volume: Decimal = history
            .iter()
            .rev()
            .take(BARS_PER_WEEK)
            .map(|b| b.volume)
            .sum();

        debug!("Computed indicators for {} from {} bars", symbol, history.len());
        IndicatorSet {
            atr14: atr(history, 14),
            ema12: ema(&closes, 12),
            ema36: ema(&closes, 36),
            volume_7d: Some(week_volume),
            volatility_30d: realized_volatility(&closes),
            synthetic: false,
        }
    }

    /// Synthetic bootstrap: ATR from the base asset's typical daily range,
    /// EMAs biased around the L1 mid so a deterministic pseudo-trend
    /// emerges per (symbol, minute). Without an L1 quote the set is empty.
    async fn synthetic(&self, symbol: &str, now_ms: i64) -> IndicatorSet {
        let Ok(Some(quote)) = self.store.l1(symbol).await else {
            return IndicatorSet {
                synthetic: true,
                ..IndicatorSet::default()
            };
        };
        let mid = quote.mid();
        if mid <= Decimal::ZERO {
            return IndicatorSet {
                synthetic: true,
                ..IndicatorSet::default()
            };
        }

        let atr_pct = typical_atr_pct(symbol);
        let atr14 = mid * atr_pct / dec!(100);

        let minute = now_ms / 60_000;
        let seed = fnv1a(&format!("{}:{}", symbol, minute));
        // Trend direction flips per (symbol, minute); spread scales with
        // the hash so not all symbols fire together.
        let up = seed % 2 == 0;
        let spread = Decimal::from(seed % 5 + 1) / dec!(10_000);

        let (ema12, ema36) = if up {
            let ema12 = mid * (Decimal::ONE - spread);
            (ema12, ema12 * (Decimal::ONE - spread * dec!(20)))
        } else {
            let ema12 = mid * (Decimal::ONE + spread);
            (ema12, ema12 * (Decimal::ONE + spread * dec!(20)))
        };

        IndicatorSet {
            atr14: Some(atr14),
            ema12: Some(ema12),
            ema36: Some(ema36),
            volume_7d: None,
            volatility_30d: Some(atr_pct / dec!(100)),
            synthetic: true,
        }
    }

    async fn read_cache(&self, symbol: &str) -> Option<IndicatorSet> {
        let atr14 = self.store.indicator("atr", symbol, 14).await.ok()??;
        let ema12 = self.store.indicator("ema", symbol, 12).await.ok()??;
        let ema36 = self.store.indicator("ema", symbol, 36).await.ok()??;
        let volume_7d = self.store.indicator("volume", symbol, 7).await.ok()?;
        let volatility_30d = self.store.indicator("volatility", symbol, 30).await.ok()?;

        Some(IndicatorSet {
            atr14: Some(atr14),
            ema12: Some(ema12),
            ema36: Some(ema36),
            volume_7d,
            volatility_30d,
            synthetic: false,
        })
    }

    async fn write_cache(&self, symbol: &str, set: &IndicatorSet) {
        // Synthetic values are cheap to rebuild and minute-dependent, so
        // only real sets are cached.
        if set.synthetic {
            return;
        }
        if let (Some(atr14), Some(ema12), Some(ema36)) = (set.atr14, set.ema12, set.ema36) {
            let _ = self.store.put_indicator("atr", symbol, 14, atr14).await;
            let _ = self.store.put_indicator("ema", symbol, 12, ema12).await;
            let _ = self.store.put_indicator("ema", symbol, 36, ema36).await;
            if let Some(v) = set.volume_7d {
                let _ = self.store.put_indicator("volume", symbol, 7, v).await;
            }
            if let Some(v) = set.volatility_30d {
                let _ = self.store.put_indicator("volatility", symbol, 30, v).await;
            }
        }
    }
}

/// Typical daily ATR as a percent of price, by base asset.
fn typical_atr_pct(symbol: &str) -> Decimal {
    match symbol.split_once('/').map(|(base, _)| base) {
        Some("BTC") => dec!(1.5),
        Some("ETH") => dec!(1.8),
        Some("SOL") => dec!(2.5),
        _ => dec!(2.5),
    }
}

/// FNV-1a over the seed string. Stable across runs and platforms, which
/// keeps the synthetic trend reproducible in tests.
fn fnv1a(input: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
