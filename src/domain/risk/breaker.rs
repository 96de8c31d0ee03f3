use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Breaker levels in evaluation order. When several would block a trade,
/// the first one in this order wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BreakerLevel {
    Staleness,
    Asset,
    Cluster,
    Global,
}

impl fmt::Display for BreakerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerLevel::Staleness => "staleness",
            BreakerLevel::Asset => "asset",
            BreakerLevel::Cluster => "cluster",
            BreakerLevel::Global => "global",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for BreakerLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staleness" => Ok(BreakerLevel::Staleness),
            "asset" => Ok(BreakerLevel::Asset),
            "cluster" => Ok(BreakerLevel::Cluster),
            "global" => Ok(BreakerLevel::Global),
            other => anyhow::bail!("Invalid breaker level: {}", other),
        }
    }
}

/// Severity of the data-staleness breaker branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StalenessSeverity {
    Warn,
    Hard,
    Kill,
}

impl fmt::Display for StalenessSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StalenessSeverity::Warn => "warn",
            StalenessSeverity::Hard => "hard",
            StalenessSeverity::Kill => "kill",
        };
        write!(f, "{}", s)
    }
}

/// A single circuit breaker instance, scoped per asset, cluster or
/// portfolio. Triggering an already-triggered breaker only refreshes the
/// reason (idempotent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breaker {
    /// Scope key, e.g. `camp-1:BTC/USD` (asset), `camp-1:cluster:3`
    /// (cluster) or `camp-1` (global).
    pub scope_key: String,
    pub level: BreakerLevel,
    pub is_triggered: bool,
    pub trigger_reason: Option<String>,
    pub consecutive_losses: u32,
    pub cumulative_loss: Decimal,
    pub window_pnl: Decimal,
    pub triggered_at_ms: Option<i64>,
    pub auto_reset_at_ms: Option<i64>,
}

impl Breaker {
    pub fn new(scope_key: &str, level: BreakerLevel) -> Self {
        Self {
            scope_key: scope_key.to_string(),
            level,
            is_triggered: false,
            trigger_reason: None,
            consecutive_losses: 0,
            cumulative_loss: Decimal::ZERO,
            window_pnl: Decimal::ZERO,
            triggered_at_ms: None,
            auto_reset_at_ms: None,
        }
    }

    /// Trips the breaker. Re-triggering only updates the reason.
    pub fn trigger(&mut self, reason: &str, now_ms: i64, auto_reset_after_ms: i64) {
        if self.is_triggered {
            self.trigger_reason = Some(reason.to_string());
            return;
        }
        self.is_triggered = true;
        self.trigger_reason = Some(reason.to_string());
        self.triggered_at_ms = Some(now_ms);
        self.auto_reset_at_ms = Some(now_ms + auto_reset_after_ms);
    }

    /// Clears the breaker and zeroes its counters. Idempotent.
    pub fn reset(&mut self) {
        self.is_triggered = false;
        self.trigger_reason = None;
        self.consecutive_losses = 0;
        self.cumulative_loss = Decimal::ZERO;
        self.window_pnl = Decimal::ZERO;
        self.triggered_at_ms = None;
        self.auto_reset_at_ms = None;
    }

    pub fn is_due_for_auto_reset(&self, now_ms: i64) -> bool {
        self.is_triggered
            && self
                .auto_reset_at_ms
                .map(|at| at <= now_ms)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerEventType {
    Triggered,
    Reset,
    AutoReset,
}

impl fmt::Display for BreakerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerEventType::Triggered => "triggered",
            BreakerEventType::Reset => "reset",
            BreakerEventType::AutoReset => "auto_reset",
        };
        write!(f, "{}", s)
    }
}

/// Audit event emitted on every breaker transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerEvent {
    pub campaign_id: String,
    pub level: BreakerLevel,
    pub breaker_key: String,
    pub event_type: BreakerEventType,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub created_at_ms: i64,
}

/// Verdict of the breaker chain for a prospective trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeGate {
    pub allowed: bool,
    pub level: Option<BreakerLevel>,
    pub reason: Option<String>,
}

impl TradeGate {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            level: None,
            reason: None,
        }
    }

    pub fn block(level: BreakerLevel, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            level: Some(level),
            reason: Some(reason.into()),
        }
    }

    /// Compact label recorded into signal snapshots.
    pub fn state_label(&self) -> String {
        match (&self.allowed, &self.level) {
            (true, _) => "clear".to_string(),
            (false, Some(level)) => format!("blocked:{}", level),
            (false, None) => "blocked".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trigger_is_idempotent() {
        let mut breaker = Breaker::new("camp-1:BTC/USD", BreakerLevel::Asset);
        breaker.trigger("first", 1000, 60_000);
        let triggered_at = breaker.triggered_at_ms;
        let reset_at = breaker.auto_reset_at_ms;

        breaker.trigger("second", 5000, 60_000);
        assert_eq!(breaker.triggered_at_ms, triggered_at);
        assert_eq!(breaker.auto_reset_at_ms, reset_at);
        assert_eq!(breaker.trigger_reason.as_deref(), Some("second"));
    }

    #[test]
    fn test_auto_reset_due() {
        let mut breaker = Breaker::new("camp-1", BreakerLevel::Global);
        assert!(!breaker.is_due_for_auto_reset(0));
        breaker.trigger("daily loss", 1000, 500);
        assert!(!breaker.is_due_for_auto_reset(1400));
        assert!(breaker.is_due_for_auto_reset(1500));
        breaker.reset();
        assert!(!breaker.is_due_for_auto_reset(10_000));
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let mut breaker = Breaker::new("camp-1:BTC/USD", BreakerLevel::Asset);
        breaker.consecutive_losses = 3;
        breaker.cumulative_loss = dec!(600);
        breaker.trigger("losses", 0, 1000);
        breaker.reset();
        assert_eq!(breaker.consecutive_losses, 0);
        assert_eq!(breaker.cumulative_loss, Decimal::ZERO);
        assert!(!breaker.is_triggered);
    }

    #[test]
    fn test_breaker_order_matches_precedence() {
        assert!(BreakerLevel::Staleness < BreakerLevel::Asset);
        assert!(BreakerLevel::Asset < BreakerLevel::Cluster);
        assert!(BreakerLevel::Cluster < BreakerLevel::Global);
    }
}
