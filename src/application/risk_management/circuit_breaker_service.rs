//! Layered circuit breakers.
//!
//! Evaluation order is fixed: staleness → asset → cluster → global; the
//! first blocker wins. The asset breaker arms when consecutive losses and
//! cumulative loss both cross their thresholds. Cluster breakers watch
//! windowed PnL against a fraction of capital; the global breaker watches
//! daily loss. Every transition is persisted and emits an audit event.

use crate::domain::ports::StalenessSink;
use crate::domain::repositories::{BreakerEventRepository, BreakerRepository};
use crate::domain::risk::{
    Breaker, BreakerEvent, BreakerEventType, BreakerLevel, StalenessSeverity, TradeGate,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Scope used for staleness breaker events, which are process-wide.
const SYSTEM_SCOPE: &str = "system";

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub asset_consecutive_losses: u32,
    pub asset_cumulative_loss_usd: Decimal,
    pub asset_auto_reset_ms: i64,
    pub cluster_loss_pct_of_capital: Decimal,
    pub cluster_window_ms: i64,
    pub cluster_auto_reset_ms: i64,
    pub global_daily_loss_pct: Decimal,
}

impl CircuitBreakerConfig {
    pub fn from_risk_config(cfg: &crate::config::RiskEnvConfig) -> Self {
        Self {
            asset_consecutive_losses: cfg.asset_consecutive_losses,
            asset_cumulative_loss_usd: cfg.asset_cumulative_loss_usd,
            asset_auto_reset_ms: cfg.asset_auto_reset_hours * 3_600_000,
            cluster_loss_pct_of_capital: cfg.cluster_loss_pct_of_capital,
            cluster_window_ms: cfg.cluster_window_hours * 3_600_000,
            cluster_auto_reset_ms: cfg.cluster_auto_reset_hours * 3_600_000,
            global_daily_loss_pct: cfg.global_daily_loss_pct,
        }
    }
}

pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Breaker>>,
    /// Start of the current cluster PnL window, per cluster scope key.
    cluster_window_start: RwLock<HashMap<String, i64>>,
    staleness: RwLock<Option<StalenessSeverity>>,
    repo: Arc<dyn BreakerRepository>,
    events: Arc<dyn BreakerEventRepository>,
}

impl CircuitBreakerService {
    pub fn new(
        config: CircuitBreakerConfig,
        repo: Arc<dyn BreakerRepository>,
        events: Arc<dyn BreakerEventRepository>,
    ) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            cluster_window_start: RwLock::new(HashMap::new()),
            staleness: RwLock::new(None),
            repo,
            events,
        }
    }

    fn asset_key(campaign_id: &str, symbol: &str) -> String {
        format!("{}:{}", campaign_id, symbol)
    }

    fn cluster_key(campaign_id: &str, cluster: u32) -> String {
        format!("{}:cluster:{}", campaign_id, cluster)
    }

    /// Loads persisted breakers for a campaign into memory.
    pub async fn hydrate(&self, campaign_id: &str) -> anyhow::Result<()> {
        let persisted = self.repo.load_all(campaign_id).await?;
        let mut breakers = self.breakers.write().await;
        for breaker in persisted {
            breakers.insert(breaker.scope_key.clone(), breaker);
        }
        Ok(())
    }

    /// The breaker chain for a prospective trade; first blocker wins.
    pub async fn can_trade(
        &self,
        campaign_id: &str,
        symbol: &str,
        cluster: Option<u32>,
    ) -> TradeGate {
        if let Some(severity) = *self.staleness.read().await {
            return TradeGate::block(
                BreakerLevel::Staleness,
                format!("data staleness breaker raised ({})", severity),
            );
        }

        let breakers = self.breakers.read().await;

        let asset_key = Self::asset_key(campaign_id, symbol);
        if let Some(b) = breakers.get(&asset_key)
            && b.is_triggered
        {
            return TradeGate::block(
                BreakerLevel::Asset,
                b.trigger_reason.clone().unwrap_or_default(),
            );
        }

        if let Some(cluster) = cluster {
            let cluster_key = Self::cluster_key(campaign_id, cluster);
            if let Some(b) = breakers.get(&cluster_key)
                && b.is_triggered
            {
                return TradeGate::block(
                    BreakerLevel::Cluster,
                    b.trigger_reason.clone().unwrap_or_default(),
                );
            }
        }

        if let Some(b) = breakers.get(campaign_id)
            && b.is_triggered
        {
            return TradeGate::block(
                BreakerLevel::Global,
                b.trigger_reason.clone().unwrap_or_default(),
            );
        }

        TradeGate::allow()
    }

    /// Books a closed trade into the asset and cluster counters and arms
    /// whichever breakers cross their thresholds.
    pub async fn record_trade_result(
        &self,
        campaign_id: &str,
        symbol: &str,
        cluster: Option<u32>,
        pnl: Decimal,
        capital: Decimal,
        now_ms: i64,
    ) {
        self.update_asset_breaker(campaign_id, symbol, pnl, now_ms)
            .await;
        if let Some(cluster) = cluster {
            self.update_cluster_breaker(campaign_id, cluster, pnl, capital, now_ms)
                .await;
        }
    }

    async fn update_asset_breaker(
        &self,
        campaign_id: &str,
        symbol: &str,
        pnl: Decimal,
        now_ms: i64,
    ) {
        let key = Self::asset_key(campaign_id, symbol);
        let mut to_emit = None;
        {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers
                .entry(key.clone())
                .or_insert_with(|| Breaker::new(&key, BreakerLevel::Asset));

            if pnl < Decimal::ZERO {
                breaker.consecutive_losses += 1;
                breaker.cumulative_loss += -pnl;
            } else {
                breaker.consecutive_losses = 0;
                breaker.cumulative_loss = Decimal::ZERO;
            }

            // Both conditions must hold.
            let should_trigger = breaker.consecutive_losses >= self.config.asset_consecutive_losses
                && breaker.cumulative_loss >= self.config.asset_cumulative_loss_usd;
            if should_trigger && !breaker.is_triggered {
                let reason = format!(
                    "{} consecutive losses totalling ${}",
                    breaker.consecutive_losses, breaker.cumulative_loss
                );
                breaker.trigger(&reason, now_ms, self.config.asset_auto_reset_ms);
                warn!("Asset breaker triggered for {}: {}", key, reason);
                to_emit = Some((breaker.clone(), reason));
            } else {
                let snapshot = breaker.clone();
                drop(breakers);
                self.persist(campaign_id, &snapshot).await;
                return;
            }
        }

        if let Some((breaker, reason)) = to_emit {
            self.persist(campaign_id, &breaker).await;
            self.emit(
                campaign_id,
                BreakerLevel::Asset,
                &breaker.scope_key,
                BreakerEventType::Triggered,
                &reason,
                serde_json::json!({ "symbol": symbol }),
            )
            .await;
        }
    }

    async fn update_cluster_breaker(
        &self,
        campaign_id: &str,
        cluster: u32,
        pnl: Decimal,
        capital: Decimal,
        now_ms: i64,
    ) {
        let key = Self::cluster_key(campaign_id, cluster);

        // Roll the window forward when it has fully elapsed.
        {
            let mut windows = self.cluster_window_start.write().await;
            let start = windows.entry(key.clone()).or_insert(now_ms);
            if now_ms - *start >= self.config.cluster_window_ms {
                *start = now_ms;
                let mut breakers = self.breakers.write().await;
                if let Some(b) = breakers.get_mut(&key) {
                    b.window_pnl = Decimal::ZERO;
                }
            }
        }

        let mut to_emit = None;
        {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers
                .entry(key.clone())
                .or_insert_with(|| Breaker::new(&key, BreakerLevel::Cluster));
            breaker.window_pnl += pnl;

            let loss_floor = -(self.config.cluster_loss_pct_of_capital / dec!(100) * capital);
            if breaker.window_pnl <= loss_floor && !breaker.is_triggered {
                let reason = format!(
                    "cluster {} window PnL {} breached {}% of capital",
                    cluster, breaker.window_pnl, self.config.cluster_loss_pct_of_capital
                );
                breaker.trigger(&reason, now_ms, self.config.cluster_auto_reset_ms);
                warn!("Cluster breaker triggered for {}: {}", key, reason);
                to_emit = Some((breaker.clone(), reason));
            } else {
                let snapshot = breaker.clone();
                drop(breakers);
                self.persist(campaign_id, &snapshot).await;
                return;
            }
        }

        if let Some((breaker, reason)) = to_emit {
            self.persist(campaign_id, &breaker).await;
            self.emit(
                campaign_id,
                BreakerLevel::Cluster,
                &breaker.scope_key,
                BreakerEventType::Triggered,
                &reason,
                serde_json::json!({ "cluster": cluster }),
            )
            .await;
        }
    }

    /// Arms the global breaker when the campaign's daily loss crosses the
    /// limit. Resets at the next UTC midnight via the auto-reset job.
    pub async fn check_global(
        &self,
        campaign_id: &str,
        daily_loss_pct: Decimal,
        now_ms: i64,
    ) -> bool {
        if daily_loss_pct < self.config.global_daily_loss_pct {
            return false;
        }

        let ms_to_midnight = {
            let now = Utc::now();
            let next_midnight = (now.date_naive() + chrono::Days::new(1))
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or(now_ms + 86_400_000);
            (next_midnight - now_ms).max(60_000)
        };

        let mut to_emit = None;
        {
            let mut breakers = self.breakers.write().await;
            let breaker = breakers
                .entry(campaign_id.to_string())
                .or_insert_with(|| Breaker::new(campaign_id, BreakerLevel::Global));
            if !breaker.is_triggered {
                let reason = format!(
                    "daily loss {}% breached limit {}%",
                    daily_loss_pct, self.config.global_daily_loss_pct
                );
                breaker.trigger(&reason, now_ms, ms_to_midnight);
                warn!("Global breaker triggered for {}: {}", campaign_id, reason);
                to_emit = Some((breaker.clone(), reason));
            }
        }

        if let Some((breaker, reason)) = to_emit {
            self.persist(campaign_id, &breaker).await;
            self.emit(
                campaign_id,
                BreakerLevel::Global,
                campaign_id,
                BreakerEventType::Triggered,
                &reason,
                serde_json::Value::Null,
            )
            .await;
        }
        true
    }

    /// Resets every breaker whose `auto_reset_at` has passed, emitting one
    /// `auto_reset` event each.
    pub async fn process_auto_resets(&self, now_ms: i64) {
        let due: Vec<Breaker> = {
            let breakers = self.breakers.read().await;
            breakers
                .values()
                .filter(|b| b.is_due_for_auto_reset(now_ms))
                .cloned()
                .collect()
        };

        for stale in due {
            {
                let mut breakers = self.breakers.write().await;
                if let Some(b) = breakers.get_mut(&stale.scope_key) {
                    if !b.is_due_for_auto_reset(now_ms) {
                        continue;
                    }
                    b.reset();
                }
            }
            info!("Auto-reset breaker {}", stale.scope_key);
            let campaign_id = stale
                .scope_key
                .split(':')
                .next()
                .unwrap_or(&stale.scope_key)
                .to_string();
            let reset = {
                let breakers = self.breakers.read().await;
                breakers.get(&stale.scope_key).cloned()
            };
            if let Some(reset) = reset {
                self.persist(&campaign_id, &reset).await;
            }
            self.emit(
                &campaign_id,
                stale.level,
                &stale.scope_key,
                BreakerEventType::AutoReset,
                "auto_reset_at elapsed",
                serde_json::Value::Null,
            )
            .await;
        }
    }

    /// Manual reset; idempotent. Emits an event only when the breaker was
    /// actually armed.
    pub async fn manual_reset(&self, campaign_id: &str, scope_key: &str) {
        let was_triggered = {
            let mut breakers = self.breakers.write().await;
            match breakers.get_mut(scope_key) {
                Some(b) => {
                    let was = b.is_triggered;
                    b.reset();
                    was
                }
                None => false,
            }
        };

        if was_triggered {
            let (level, snapshot) = {
                let breakers = self.breakers.read().await;
                let b = breakers.get(scope_key).cloned();
                (b.as_ref().map(|b| b.level), b)
            };
            if let Some(snapshot) = snapshot {
                self.persist(campaign_id, &snapshot).await;
            }
            self.emit(
                campaign_id,
                level.unwrap_or(BreakerLevel::Asset),
                scope_key,
                BreakerEventType::Reset,
                "manual reset",
                serde_json::Value::Null,
            )
            .await;
        }
    }

    /// Periodic job driving auto-resets.
    pub async fn run_auto_reset_job(self: Arc<Self>, interval_secs: u64) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        info!("Breaker auto-reset job started (every {}s)", interval_secs);
        loop {
            interval.tick().await;
            self.process_auto_resets(Utc::now().timestamp_millis()).await;
        }
    }

    pub async fn breaker(&self, scope_key: &str) -> Option<Breaker> {
        self.breakers.read().await.get(scope_key).cloned()
    }

    pub async fn staleness_severity(&self) -> Option<StalenessSeverity> {
        *self.staleness.read().await
    }

    async fn persist(&self, campaign_id: &str, breaker: &Breaker) {
        if let Err(e) = self.repo.upsert(campaign_id, breaker).await {
            error!("Failed to persist breaker {}: {}", breaker.scope_key, e);
        }
    }

    async fn emit(
        &self,
        campaign_id: &str,
        level: BreakerLevel,
        breaker_key: &str,
        event_type: BreakerEventType,
        reason: &str,
        metadata: serde_json::Value,
    ) {
        let event = BreakerEvent {
            campaign_id: campaign_id.to_string(),
            level,
            breaker_key: breaker_key.to_string(),
            event_type,
            reason: reason.to_string(),
            metadata,
            created_at_ms: Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.events.append(&event).await {
            error!("Failed to append breaker event for {}: {}", breaker_key, e);
        }
    }
}

#[async_trait]
impl StalenessSink for CircuitBreakerService {
    async fn on_staleness(&self, severity: StalenessSeverity, stale_symbols: usize, reason: &str) {
        let changed = {
            let mut staleness = self.staleness.write().await;
            let changed = *staleness != Some(severity);
            *staleness = Some(severity);
            changed
        };
        if changed {
            warn!(
                "Staleness breaker raised at {} ({} symbols): {}",
                severity, stale_symbols, reason
            );
            self.emit(
                SYSTEM_SCOPE,
                BreakerLevel::Staleness,
                SYSTEM_SCOPE,
                BreakerEventType::Triggered,
                reason,
                serde_json::json!({ "severity": severity.to_string(), "stale": stale_symbols }),
            )
            .await;
        }
    }

    async fn on_clean(&self) {
        let was_raised = {
            let mut staleness = self.staleness.write().await;
            staleness.take().is_some()
        };
        if was_raised {
            info!("Staleness breaker cleared");
            self.emit(
                SYSTEM_SCOPE,
                BreakerLevel::Staleness,
                SYSTEM_SCOPE,
                BreakerEventType::Reset,
                "all active symbols fresh",
                serde_json::Value::Null,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryBreakerEventRepository, InMemoryBreakerRepository,
    };

    fn service() -> (Arc<InMemoryBreakerEventRepository>, CircuitBreakerService) {
        let events = Arc::new(InMemoryBreakerEventRepository::new());
        let config = CircuitBreakerConfig {
            asset_consecutive_losses: 2,
            asset_cumulative_loss_usd: dec!(500),
            asset_auto_reset_ms: 24 * 3_600_000,
            cluster_loss_pct_of_capital: dec!(5),
            cluster_window_ms: 24 * 3_600_000,
            cluster_auto_reset_ms: 12 * 3_600_000,
            global_daily_loss_pct: dec!(5),
        };
        let service = CircuitBreakerService::new(
            config,
            Arc::new(InMemoryBreakerRepository::new()),
            events.clone(),
        );
        (events, service)
    }

    #[tokio::test]
    async fn test_asset_breaker_requires_both_conditions() {
        let (_, service) = service();

        // Two consecutive losses below the cumulative floor: no trigger.
        service
            .record_trade_result("camp-1", "ABC/USD", None, dec!(-100), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "ABC/USD", None, dec!(-100), dec!(100_000), 0)
            .await;
        assert!(service.can_trade("camp-1", "ABC/USD", None).await.allowed);

        // Two $300 losses cross both thresholds.
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        let gate = service.can_trade("camp-1", "XYZ/USD", None).await;
        assert!(!gate.allowed);
        assert_eq!(gate.level, Some(BreakerLevel::Asset));
    }

    #[tokio::test]
    async fn test_win_resets_the_streak() {
        let (_, service) = service();
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(50), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        assert!(service.can_trade("camp-1", "XYZ/USD", None).await.allowed);
    }

    #[tokio::test]
    async fn test_staleness_blocks_first() {
        let (_, service) = service();

        // Arm the asset breaker, then raise staleness: precedence says
        // the staleness level is reported.
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-300), dec!(100_000), 0)
            .await;
        service.on_staleness(StalenessSeverity::Warn, 3, "stale").await;

        let gate = service.can_trade("camp-1", "XYZ/USD", None).await;
        assert_eq!(gate.level, Some(BreakerLevel::Staleness));

        service.on_clean().await;
        let gate = service.can_trade("camp-1", "XYZ/USD", None).await;
        assert_eq!(gate.level, Some(BreakerLevel::Asset));
    }

    #[tokio::test]
    async fn test_cluster_breaker_on_window_loss() {
        let (_, service) = service();
        // 5% of 100k = 5000.
        service
            .record_trade_result("camp-1", "AAA/USD", Some(3), dec!(-3000), dec!(100_000), 0)
            .await;
        assert!(service.can_trade("camp-1", "BBB/USD", Some(3)).await.allowed);
        service
            .record_trade_result("camp-1", "BBB/USD", Some(3), dec!(-2000), dec!(100_000), 0)
            .await;

        let gate = service.can_trade("camp-1", "CCC/USD", Some(3)).await;
        assert!(!gate.allowed);
        assert_eq!(gate.level, Some(BreakerLevel::Cluster));

        // Other clusters are unaffected.
        assert!(service.can_trade("camp-1", "CCC/USD", Some(4)).await.allowed);
    }

    #[tokio::test]
    async fn test_auto_reset_emits_exactly_one_event() {
        let (events, service) = service();
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-600), dec!(100_000), 1000)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-600), dec!(100_000), 1000)
            .await;
        assert!(!service.can_trade("camp-1", "XYZ/USD", None).await.allowed);

        let reset_time = 1000 + 24 * 3_600_000 + 1;
        service.process_auto_resets(reset_time).await;
        assert!(service.can_trade("camp-1", "XYZ/USD", None).await.allowed);

        // A second run must not emit again.
        service.process_auto_resets(reset_time + 5000).await;

        let all = events.recent("camp-1", 100).await.unwrap();
        let auto_resets = all
            .iter()
            .filter(|e| e.event_type == BreakerEventType::AutoReset)
            .count();
        assert_eq!(auto_resets, 1);
    }

    #[tokio::test]
    async fn test_manual_reset_idempotent() {
        let (events, service) = service();
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-600), dec!(100_000), 0)
            .await;
        service
            .record_trade_result("camp-1", "XYZ/USD", None, dec!(-600), dec!(100_000), 0)
            .await;

        let key = "camp-1:XYZ/USD";
        service.manual_reset("camp-1", key).await;
        assert!(service.can_trade("camp-1", "XYZ/USD", None).await.allowed);

        service.manual_reset("camp-1", key).await;
        let all = events.recent("camp-1", 100).await.unwrap();
        let resets = all
            .iter()
            .filter(|e| e.event_type == BreakerEventType::Reset)
            .count();
        assert_eq!(resets, 1);
    }

    #[tokio::test]
    async fn test_global_breaker_on_daily_loss() {
        let (_, service) = service();
        assert!(!service.check_global("camp-1", dec!(3), 0).await);
        assert!(service.can_trade("camp-1", "ANY/USD", None).await.allowed);

        assert!(service.check_global("camp-1", dec!(6), 0).await);
        let gate = service.can_trade("camp-1", "ANY/USD", None).await;
        assert_eq!(gate.level, Some(BreakerLevel::Global));
    }
}
