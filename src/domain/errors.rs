use rust_decimal::Decimal;
use thiserror::Error;

/// Errors related to market data and connectivity
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("Service timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Symbol not supported by the exchange: {symbol}")]
    UnsupportedSymbol { symbol: String },
}

/// Errors surfaced by the order execution adapters.
///
/// `TimeoutWithManualReconcile` is the distinguished post-cancel case: a
/// fill was detected after the cancel, so the owning position flow must
/// halt until an operator reconciles it.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Exchange credentials missing: {context}")]
    CredentialsMissing { context: String },

    #[error("Exchange error: {message}")]
    Exchange { message: String },

    #[error("Rate limited by exchange: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(
        "Order {order_id} timed out and cancel found a fill of {filled_qty}: manual reconciliation required"
    )]
    TimeoutWithManualReconcile {
        order_id: String,
        filled_qty: Decimal,
    },

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Order state conflict: {reason}")]
    StateConflict { reason: String },
}

impl ExecutionError {
    /// Whether the owning position flow must stop and wait for an operator.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, ExecutionError::TimeoutWithManualReconcile { .. })
    }
}

/// Errors related to risk limit violations
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("Daily loss limit breached: {loss_pct:.2}% > {limit_pct:.2}%")]
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },

    #[error("Maximum drawdown exceeded: {drawdown_pct:.2}% > {max_pct:.2}%")]
    MaxDrawdown { drawdown_pct: f64, max_pct: f64 },

    #[error("Pair {symbol} blocked: loss of {loss_r}R exceeds {max_r}R")]
    PairLossLimit {
        symbol: String,
        loss_r: Decimal,
        max_r: Decimal,
    },

    #[error("Open position cap reached: {open} of {max}")]
    PositionCap { open: usize, max: usize },

    #[error("Order notional ${notional} below minimum ${min}")]
    BelowMinNotional { notional: Decimal, min: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reconcile_error_is_distinguished() {
        let err = ExecutionError::TimeoutWithManualReconcile {
            order_id: "abc".to_string(),
            filled_qty: dec!(0.2),
        };
        assert!(err.requires_reconciliation());
        assert!(err.to_string().contains("manual reconciliation"));

        let other = ExecutionError::NotFound {
            order_id: "abc".to_string(),
        };
        assert!(!other.requires_reconciliation());
    }

    #[test]
    fn test_risk_violation_formatting() {
        let violation = RiskViolation::PairLossLimit {
            symbol: "SOL/USD".to_string(),
            loss_r: dec!(-2.5),
            max_r: dec!(2),
        };
        let msg = violation.to_string();
        assert!(msg.contains("SOL/USD"));
        assert!(msg.contains("-2.5"));
    }
}
