//! Per-symbol freshness state machine.
//!
//! Age is measured against the freshest of {L1 ts, L2 ts (tick fallback),
//! tick ts}. Levels: fresh < 4s ≤ warn < 12s ≤ hard < 60s ≤ kill. A symbol
//! stale for 5 minutes is quarantined and excluded from the kill-switch
//! calculation until it returns to fresh. Entering warn dispatches a
//! one-shot REST refresh. The guard also raises and clears the staleness
//! branch of the circuit breaker through the injected sink.

use crate::domain::ports::{MarketStore, RefreshDispatcher, StalenessSink};
use crate::domain::risk::StalenessSeverity;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const SWEEP_CHUNK: usize = 20;
const REFRESH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FreshnessLevel {
    Fresh,
    Warn,
    Hard,
    Kill,
}

#[derive(Debug, Clone)]
pub struct StalenessThresholds {
    pub warn_ms: i64,
    pub hard_ms: i64,
    pub kill_ms: i64,
    pub quarantine_ms: i64,
}

impl Default for StalenessThresholds {
    fn default() -> Self {
        Self {
            warn_ms: 4_000,
            hard_ms: 12_000,
            kill_ms: 60_000,
            quarantine_ms: 300_000,
        }
    }
}

impl StalenessThresholds {
    pub fn classify(&self, age_ms: i64) -> FreshnessLevel {
        if age_ms < self.warn_ms {
            FreshnessLevel::Fresh
        } else if age_ms < self.hard_ms {
            FreshnessLevel::Warn
        } else if age_ms < self.kill_ms {
            FreshnessLevel::Hard
        } else {
            FreshnessLevel::Kill
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolHealth {
    pub level: FreshnessLevel,
    pub quarantined: bool,
    pub unsupported: bool,
    pub age_ms: i64,
    /// When the symbol last left `fresh`; cleared on recovery.
    pub stale_since_ms: Option<i64>,
    first_seen_ms: i64,
}

impl SymbolHealth {
    fn new(now_ms: i64) -> Self {
        Self {
            level: FreshnessLevel::Fresh,
            quarantined: false,
            unsupported: false,
            age_ms: 0,
            stale_since_ms: None,
            first_seen_ms: now_ms,
        }
    }

    /// Counts toward the kill switch only while supported and not
    /// quarantined.
    pub fn is_active(&self) -> bool {
        !self.quarantined && !self.unsupported
    }
}

/// What the sink was last told, to debounce breaker calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportedState {
    Unreported,
    Clean,
    Raised(StalenessSeverity),
}

pub struct StalenessGuard {
    store: Arc<dyn MarketStore>,
    refresh: Arc<dyn RefreshDispatcher>,
    sink: Arc<dyn StalenessSink>,
    thresholds: StalenessThresholds,
    sweep_interval_secs: u64,
    symbols: RwLock<Vec<String>>,
    health: RwLock<HashMap<String, SymbolHealth>>,
    kill_switch: AtomicBool,
    reported: Mutex<ReportedState>,
}

impl StalenessGuard {
    pub fn new(
        store: Arc<dyn MarketStore>,
        refresh: Arc<dyn RefreshDispatcher>,
        sink: Arc<dyn StalenessSink>,
        thresholds: StalenessThresholds,
        sweep_interval_secs: u64,
    ) -> Self {
        Self {
            store,
            refresh,
            sink,
            thresholds,
            sweep_interval_secs,
            symbols: RwLock::new(Vec::new()),
            health: RwLock::new(HashMap::new()),
            kill_switch: AtomicBool::new(false),
            reported: Mutex::new(ReportedState::Unreported),
        }
    }

    pub async fn set_symbols(&self, symbols: Vec<String>) {
        *self.symbols.write().await = symbols;
    }

    /// Marks a symbol the exchange rejected: quarantined, excluded from
    /// the kill switch, never refreshed again.
    pub async fn mark_unsupported(&self, symbol: &str) {
        let now_ms = Utc::now().timestamp_millis();
        let mut health = self.health.write().await;
        let entry = health
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolHealth::new(now_ms));
        entry.unsupported = true;
        entry.quarantined = true;
        warn!("Symbol {} marked unsupported and quarantined", symbol);
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(self.sweep_interval_secs));
        info!(
            "StalenessGuard started (sweep every {}s)",
            self.sweep_interval_secs
        );
        loop {
            interval.tick().await;
            self.sweep_once(Utc::now().timestamp_millis()).await;
        }
    }

    /// One sweep over all symbols, probing ages in parallel chunks of 20.
    pub async fn sweep_once(&self, now_ms: i64) {
        let symbols = self.symbols.read().await.clone();

        for chunk in symbols.chunks(SWEEP_CHUNK) {
            let probes = join_all(chunk.iter().map(|s| self.probe_age(s, now_ms))).await;
            for (symbol, age_ms) in probes {
                self.apply(&symbol, age_ms, now_ms).await;
            }
        }

        self.update_kill_switch().await;
        self.report_to_sink().await;
    }

    /// Reads the freshest known timestamp for the symbol. A symbol with no
    /// data yet ages from when the guard first saw it.
    async fn probe_age(&self, symbol: &str, now_ms: i64) -> (String, i64) {
        let l1_ts = self
            .store
            .l1(symbol)
            .await
            .ok()
            .flatten()
            .map(|q| q.exchange_ts_ms);
        let tick_ts = self
            .store
            .recent_ticks(symbol, 1)
            .await
            .ok()
            .and_then(|ticks| ticks.first().map(|t| t.exchange_ts_ms));
        let l2_ts = self
            .store
            .l2_timestamp_ms(symbol)
            .await
            .ok()
            .flatten()
            .or(tick_ts);

        let freshest = [l1_ts, l2_ts, tick_ts].into_iter().flatten().max();

        let age_ms = match freshest {
            Some(ts) => (now_ms - ts).max(0),
            None => {
                let health = self.health.read().await;
                let first_seen = health
                    .get(symbol)
                    .map(|h| h.first_seen_ms)
                    .unwrap_or(now_ms);
                now_ms - first_seen
            }
        };
        (symbol.to_string(), age_ms)
    }

    /// Applies one observation. Transitions are idempotent; the refresh
    /// dispatch fires only on the edge into warn-or-worse.
    async fn apply(&self, symbol: &str, age_ms: i64, now_ms: i64) {
        let mut dispatch_refresh = false;
        {
            let mut health = self.health.write().await;
            let entry = health
                .entry(symbol.to_string())
                .or_insert_with(|| SymbolHealth::new(now_ms));

            let old_level = entry.level;
            let new_level = self.thresholds.classify(age_ms);
            entry.age_ms = age_ms;

            if new_level == FreshnessLevel::Fresh {
                if entry.quarantined && !entry.unsupported {
                    entry.quarantined = false;
                    entry.stale_since_ms = None;
                    info!("Symbol {} recovered from quarantine", symbol);
                }
                entry.stale_since_ms = None;
            } else {
                if entry.stale_since_ms.is_none() {
                    entry.stale_since_ms = Some(now_ms.saturating_sub(age_ms));
                }
                if !entry.quarantined && age_ms >= self.thresholds.quarantine_ms {
                    entry.quarantined = true;
                    warn!(
                        "Symbol {} quarantined after {}ms of staleness",
                        symbol, age_ms
                    );
                }
            }

            if new_level != old_level {
                info!(
                    "Staleness {}: {:?} -> {:?} (age {}ms)",
                    symbol, old_level, new_level, age_ms
                );
                dispatch_refresh = old_level == FreshnessLevel::Fresh
                    && new_level >= FreshnessLevel::Warn
                    && !entry.quarantined
                    && !entry.unsupported;
            }
            entry.level = new_level;
        }

        if dispatch_refresh {
            self.dispatch_refresh(symbol);
        }
    }

    /// One-shot refresh with a hard timeout; dedup per symbol lives in the
    /// dispatcher.
    fn dispatch_refresh(&self, symbol: &str) {
        let refresh = self.refresh.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            let deadline = tokio::time::Duration::from_secs(REFRESH_TIMEOUT_SECS);
            match tokio::time::timeout(deadline, refresh.request_refresh(&symbol)).await {
                Ok(Ok(())) => info!("REST refresh completed for {}", symbol),
                Ok(Err(e)) => warn!("REST refresh failed for {}: {}", symbol, e),
                Err(_) => warn!("REST refresh timed out for {}", symbol),
            }
        });
    }

    async fn update_kill_switch(&self) {
        let health = self.health.read().await;
        let any_killed = health
            .values()
            .any(|h| h.is_active() && h.level == FreshnessLevel::Kill);
        drop(health);

        let was_active = self.kill_switch.swap(any_killed, Ordering::SeqCst);
        if any_killed && !was_active {
            warn!("KILL SWITCH ACTIVE: an active symbol exceeded the kill threshold");
        } else if !any_killed && was_active {
            info!("Kill switch deactivated: no active symbol above kill threshold");
        }
    }

    /// Raises/clears the staleness circuit breaker, debounced on change.
    async fn report_to_sink(&self) {
        let (severity, stale_count) = {
            let health = self.health.read().await;
            let active: Vec<&SymbolHealth> =
                health.values().filter(|h| h.is_active()).collect();
            let worst = active.iter().map(|h| h.level).max();
            let stale_count = active
                .iter()
                .filter(|h| h.level != FreshnessLevel::Fresh)
                .count();
            let severity = match worst {
                Some(FreshnessLevel::Kill) => Some(StalenessSeverity::Kill),
                Some(FreshnessLevel::Hard) => Some(StalenessSeverity::Hard),
                Some(FreshnessLevel::Warn) => Some(StalenessSeverity::Warn),
                _ => None,
            };
            (severity, stale_count)
        };

        let mut reported = self.reported.lock().await;
        match severity {
            Some(severity) => {
                if *reported != ReportedState::Raised(severity) {
                    let reason = format!("{} active symbols stale (worst: {})", stale_count, severity);
                    self.sink.on_staleness(severity, stale_count, &reason).await;
                    *reported = ReportedState::Raised(severity);
                }
            }
            None => {
                if *reported != ReportedState::Clean {
                    self.sink.on_clean().await;
                    *reported = ReportedState::Clean;
                }
            }
        }
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    pub async fn health(&self, symbol: &str) -> Option<SymbolHealth> {
        self.health.read().await.get(symbol).cloned()
    }

    /// Gate for opening new positions: blocked from `warn` upward and
    /// while the kill switch is active.
    pub async fn can_open_position(&self, symbol: &str) -> Result<(), String> {
        if self.is_kill_switch_active() {
            return Err("kill switch active: all trading paused".to_string());
        }
        match self.health(symbol).await {
            Some(h) if h.level >= FreshnessLevel::Warn => {
                Err(format!("{} data stale: block new positions", symbol))
            }
            Some(h) if h.quarantined => Err(format!("{} quarantined", symbol)),
            None => Err(format!("{} has no freshness state yet", symbol)),
            _ => Ok(()),
        }
    }

    /// Gate for signal evaluation: zeroed from `hard` upward.
    pub async fn signals_allowed(&self, symbol: &str) -> bool {
        if self.is_kill_switch_active() {
            return false;
        }
        match self.health(symbol).await {
            Some(h) => h.level < FreshnessLevel::Hard && !h.quarantined,
            None => false,
        }
    }

    /// (fresh, warn, hard, kill, quarantined) counts for the metrics
    /// reporter.
    pub async fn level_counts(&self) -> (usize, usize, usize, usize, usize) {
        let health = self.health.read().await;
        let mut counts = (0, 0, 0, 0, 0);
        for h in health.values() {
            if h.quarantined {
                counts.4 += 1;
                continue;
            }
            match h.level {
                FreshnessLevel::Fresh => counts.0 += 1,
                FreshnessLevel::Warn => counts.1 += 1,
                FreshnessLevel::Hard => counts.2 += 1,
                FreshnessLevel::Kill => counts.3 += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping_matches_table() {
        let t = StalenessThresholds::default();
        assert_eq!(t.classify(0), FreshnessLevel::Fresh);
        assert_eq!(t.classify(3_999), FreshnessLevel::Fresh);
        assert_eq!(t.classify(4_000), FreshnessLevel::Warn);
        assert_eq!(t.classify(11_999), FreshnessLevel::Warn);
        assert_eq!(t.classify(12_000), FreshnessLevel::Hard);
        assert_eq!(t.classify(59_999), FreshnessLevel::Hard);
        assert_eq!(t.classify(60_000), FreshnessLevel::Kill);
        assert_eq!(t.classify(600_000), FreshnessLevel::Kill);
    }

    #[test]
    fn test_levels_monotone_in_age() {
        let t = StalenessThresholds::default();
        let mut last = FreshnessLevel::Fresh;
        for age in (0..120_000).step_by(500) {
            let level = t.classify(age);
            assert!(level >= last, "level regressed at age {}", age);
            last = level;
        }
    }
}
