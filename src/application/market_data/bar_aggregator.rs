//! Boundary-aligned bar aggregation.
//!
//! For each symbol, timers aligned to the frame boundaries aggregate the
//! *previous* window out of the tick ring. A bar is only emitted when the
//! window saw at least one tick. Hourly bars are rolled up from minute
//! bars 5 seconds after the top of the hour and require exactly 60
//! children; the roll-up is retried a few times before the hour is
//! skipped. Short frames go to the hot store, 1m/1h to the durable store.

use crate::domain::market::{Bar, Tick, Timeframe};
use crate::domain::ports::MarketStore;
use crate::domain::repositories::BarRepository;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

const HOURLY_ROLLUP_DELAY_SECS: i64 = 5;
const HOURLY_ROLLUP_ATTEMPTS: u32 = 3;
const HOURLY_ROLLUP_RETRY_SECS: u64 = 2;
const MINUTES_PER_HOUR: usize = 60;

pub struct BarAggregator {
    store: Arc<dyn MarketStore>,
    bars: Arc<dyn BarRepository>,
    symbols: Arc<RwLock<Vec<String>>>,
}

impl BarAggregator {
    pub fn new(
        store: Arc<dyn MarketStore>,
        bars: Arc<dyn BarRepository>,
        symbols: Arc<RwLock<Vec<String>>>,
    ) -> Self {
        Self {
            store,
            bars,
            symbols,
        }
    }

    /// Spawns the frame timers. Each loop owns its frame; a failing symbol
    /// never stops the others.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for frame in Timeframe::tick_driven() {
            let aggregator = self.clone();
            handles.push(tokio::spawn(async move {
                aggregator.run_frame_loop(frame).await;
            }));
        }
        let aggregator = self.clone();
        handles.push(tokio::spawn(async move {
            aggregator.run_hourly_loop().await;
        }));
        info!("BarAggregator started (1s/5s/1m timers + hourly roll-up)");
        handles
    }

    async fn run_frame_loop(&self, frame: Timeframe) {
        loop {
            let now = Utc::now().timestamp_millis();
            let next_boundary_ms = (frame.align(now / 1000) + frame.seconds()) * 1000;
            let wait = (next_boundary_ms - now).max(0) as u64;
            tokio::time::sleep(tokio::time::Duration::from_millis(wait)).await;

            // Aggregate the window that just closed.
            let window_start = frame.align(next_boundary_ms / 1000) - frame.seconds();
            let symbols = self.symbols.read().await.clone();
            for symbol in symbols {
                if let Err(e) = self.aggregate_window(&symbol, frame, window_start).await {
                    error!("Bar aggregation failed for {} {}: {}", symbol, frame, e);
                }
            }
        }
    }

    async fn run_hourly_loop(&self) {
        loop {
            let now = Utc::now().timestamp();
            let next_fire = Timeframe::OneHour.align(now) + 3600 + HOURLY_ROLLUP_DELAY_SECS;
            let wait = (next_fire - now).max(0) as u64;
            tokio::time::sleep(tokio::time::Duration::from_secs(wait)).await;

            let hour_start = Timeframe::OneHour.align(Utc::now().timestamp()) - 3600;
            let symbols = self.symbols.read().await.clone();
            for symbol in symbols {
                if let Err(e) = self.build_hourly(&symbol, hour_start).await {
                    error!("Hourly roll-up failed for {}: {}", symbol, e);
                }
            }
        }
    }

    /// Aggregates `[window_start, window_start + frame)` from the tick
    /// ring. Returns the emitted bar, or `None` for an empty window.
    pub async fn aggregate_window(
        &self,
        symbol: &str,
        frame: Timeframe,
        window_start: i64,
    ) -> anyhow::Result<Option<Bar>> {
        let start_ms = window_start * 1000;
        let end_ms = start_ms + frame.millis();

        // Ring is newest-first; reverse into chronological order.
        let recent = self.store.recent_ticks(symbol, 1000).await?;
        let mut window: Vec<Tick> = recent
            .into_iter()
            .filter(|t| t.exchange_ts_ms >= start_ms && t.exchange_ts_ms < end_ms)
            .collect();
        window.reverse();

        let Some(bar) = Bar::from_ticks(symbol, window_start, &window) else {
            return Ok(None);
        };

        if frame.is_durable() {
            self.bars.save(frame, &bar).await?;
        } else {
            self.store.put_hot_bar(frame, &bar).await?;
        }
        debug!(
            "{} {} bar @ {}: O:{} H:{} L:{} C:{} V:{}",
            symbol, frame, bar.bar_ts, bar.open, bar.high, bar.low, bar.close, bar.volume
        );
        Ok(Some(bar))
    }

    /// Builds the hour starting at `hour_start` from its minute bars.
    /// Requires exactly 60 children; retries while the last minutes land,
    /// then skips the hour.
    pub async fn build_hourly(&self, symbol: &str, hour_start: i64) -> anyhow::Result<Option<Bar>> {
        for attempt in 1..=HOURLY_ROLLUP_ATTEMPTS {
            let children = self
                .bars
                .bars_range(symbol, Timeframe::OneMin, hour_start, hour_start + 3600)
                .await?;

            if children.len() == MINUTES_PER_HOUR {
                let Some(bar) = Bar::from_child_bars(symbol, hour_start, &children) else {
                    return Ok(None);
                };
                self.bars.save(Timeframe::OneHour, &bar).await?;
                info!("{} hourly bar @ {} built from 60 minutes", symbol, hour_start);
                return Ok(Some(bar));
            }

            if attempt < HOURLY_ROLLUP_ATTEMPTS {
                tokio::time::sleep(tokio::time::Duration::from_secs(HOURLY_ROLLUP_RETRY_SECS))
                    .await;
            } else {
                info!(
                    "{} hour @ {} skipped: {} of 60 minute bars present",
                    symbol,
                    hour_start,
                    children.len()
                );
            }
        }
        Ok(None)
    }
}
